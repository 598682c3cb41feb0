//! The located MiniZinc toolchain and its installed solvers.
//!
//! A [`DriverRegistry`] is created empty and populated explicitly with
//! [`DriverRegistry::set_location`]; nothing is probed lazily. Share it with
//! `Arc` between sessions. A failed probe clears the registry, so stale
//! solver lists are never reported.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{DriverError, SessionError};
use crate::identity::SolverIdentity;
use crate::process::{program_dir, run_blocking, LaunchSpec};

/// Default time each probe invocation may take.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[cfg(windows)]
const EXECUTABLE_NAME: &str = "minizinc.exe";
#[cfg(not(windows))]
const EXECUTABLE_NAME: &str = "minizinc";

static VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"version (\d+)\.(\d+)\.(\d+)").expect("valid version regex"));

/// A `major.minor.patch` toolchain version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    /// Extract the version triple from `--version` output.
    pub fn parse(output: &str) -> Option<Version> {
        let caps = VERSION.captures(output)?;
        Some(Version {
            major: caps[1].parse().ok()?,
            minor: caps[2].parse().ok()?,
            patch: caps[3].parse().ok()?,
        })
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Shape of the `--config-dirs` output.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigDirs {
    #[serde(default)]
    user_config_file: String,
    #[serde(default)]
    user_solver_config_dir: String,
    #[serde(default)]
    mzn_stdlib_dir: String,
}

fn non_empty(s: String) -> Option<PathBuf> {
    (!s.is_empty()).then(|| PathBuf::from(s))
}

/// Facts about a probed toolchain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Toolchain {
    pub executable: PathBuf,
    pub version: Version,
    /// First line of `--version` output.
    pub version_string: String,
    pub user_config_file: Option<PathBuf>,
    pub user_solver_config_dir: Option<PathBuf>,
    pub stdlib_dir: Option<PathBuf>,
}

impl Toolchain {
    /// Directory holding the executable; prepended to `PATH` for every run.
    pub fn install_dir(&self) -> Option<PathBuf> {
        program_dir(&self.executable)
    }
}

#[derive(Debug, Default)]
struct Inner {
    toolchain: Option<Toolchain>,
    solvers: Vec<Arc<SolverIdentity>>,
    /// Tag of a solver chosen with `set_default_solver`.
    default_solver: Option<String>,
}

/// Process-wide view of the installed toolchain.
#[derive(Debug)]
pub struct DriverRegistry {
    inner: RwLock<Inner>,
    probe_timeout: Duration,
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverRegistry {
    /// An unconfigured registry.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// A registry holding a known solver list without a toolchain.
    ///
    /// Useful for composing command lines offline; [`is_valid`] is false.
    ///
    /// [`is_valid`]: Self::is_valid
    pub fn with_solvers(solvers: Vec<SolverIdentity>) -> Self {
        let registry = Self::new();
        registry.inner.write().solvers = solvers.into_iter().map(Arc::new).collect();
        registry
    }

    /// Shared handle.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Locate and probe the toolchain.
    ///
    /// `location` is an installation directory or the executable itself;
    /// `None` searches `PATH`. On failure the registry is cleared.
    pub fn set_location(&self, location: Option<&Path>) -> Result<(), DriverError> {
        match self.probe(location) {
            Ok((toolchain, solvers)) => {
                info!(
                    executable = %toolchain.executable.display(),
                    version = %toolchain.version,
                    solvers = solvers.len(),
                    "toolchain configured"
                );
                *self.inner.write() = Inner {
                    toolchain: Some(toolchain),
                    solvers,
                    default_solver: None,
                };
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "toolchain probe failed");
                self.clear();
                Err(e)
            }
        }
    }

    fn probe(
        &self,
        location: Option<&Path>,
    ) -> Result<(Toolchain, Vec<Arc<SolverIdentity>>), DriverError> {
        let executable = locate_executable(location)?;

        let version_out = self.run_probe(&executable, &["--version"])?;
        let version = Version::parse(&version_out)
            .ok_or_else(|| DriverError::BadVersion(version_out.trim().to_string()))?;
        let version_string = version_out.lines().next().unwrap_or_default().trim().to_string();

        let dirs_out = self.run_probe(&executable, &["--config-dirs"])?;
        let dirs: ConfigDirs =
            serde_json::from_str(&dirs_out).map_err(|source| DriverError::BadJson {
                query: "--config-dirs".into(),
                source,
            })?;

        let solvers_out = self.run_probe(&executable, &["--solvers-json"])?;
        let solvers = SolverIdentity::parse_descriptor_list(&solvers_out)
            .map_err(|source| DriverError::BadJson {
                query: "--solvers-json".into(),
                source,
            })?
            .into_iter()
            .map(Arc::new)
            .collect();

        Ok((
            Toolchain {
                executable,
                version,
                version_string,
                user_config_file: non_empty(dirs.user_config_file),
                user_solver_config_dir: non_empty(dirs.user_solver_config_dir),
                stdlib_dir: non_empty(dirs.mzn_stdlib_dir),
            },
            solvers,
        ))
    }

    fn run_probe(&self, executable: &Path, args: &[&str]) -> Result<String, DriverError> {
        let query = args.join(" ");
        let mut spec = LaunchSpec::new(executable).args(args.iter().copied());
        if let Some(dir) = program_dir(executable) {
            spec = spec.prepend_path(dir);
        }
        debug!(query = %query, "probing toolchain");
        let out = run_blocking(&spec, Some(self.probe_timeout)).map_err(|e| match e {
            SessionError::Timeout(timeout) => DriverError::ProbeTimeout {
                query: query.clone(),
                timeout,
            },
            other => DriverError::Probe {
                query: query.clone(),
                source: Box::new(other),
            },
        })?;
        if !out.success() {
            return Err(DriverError::ProbeFailed {
                query,
                code: out.exit_code,
            });
        }
        Ok(out.stdout)
    }

    /// Forget the toolchain and all solvers.
    pub fn clear(&self) {
        *self.inner.write() = Inner::default();
    }

    /// Whether a usable toolchain is configured.
    pub fn is_valid(&self) -> bool {
        self.inner.read().toolchain.is_some()
    }

    pub fn toolchain(&self) -> Option<Toolchain> {
        self.inner.read().toolchain.clone()
    }

    /// The toolchain, or [`DriverError::NotConfigured`].
    pub fn require(&self) -> Result<Toolchain, DriverError> {
        self.toolchain().ok_or(DriverError::NotConfigured)
    }

    pub fn executable(&self) -> Option<PathBuf> {
        self.inner.read().toolchain.as_ref().map(|t| t.executable.clone())
    }

    pub fn version(&self) -> Option<Version> {
        self.inner.read().toolchain.as_ref().map(|t| t.version)
    }

    pub fn version_string(&self) -> Option<String> {
        self.inner
            .read()
            .toolchain
            .as_ref()
            .map(|t| t.version_string.clone())
    }

    pub fn user_config_file(&self) -> Option<PathBuf> {
        self.inner
            .read()
            .toolchain
            .as_ref()
            .and_then(|t| t.user_config_file.clone())
    }

    pub fn user_solver_config_dir(&self) -> Option<PathBuf> {
        self.inner
            .read()
            .toolchain
            .as_ref()
            .and_then(|t| t.user_solver_config_dir.clone())
    }

    pub fn stdlib_dir(&self) -> Option<PathBuf> {
        self.inner
            .read()
            .toolchain
            .as_ref()
            .and_then(|t| t.stdlib_dir.clone())
    }

    /// All known solvers.
    pub fn solvers(&self) -> Vec<Arc<SolverIdentity>> {
        self.inner.read().solvers.clone()
    }

    /// First known solver matching `query` (id, `id@version`, name or tag).
    pub fn find_solver(&self, query: &str) -> Option<Arc<SolverIdentity>> {
        self.inner
            .read()
            .solvers
            .iter()
            .find(|s| s.matches(query))
            .cloned()
    }

    /// Resolve a solver reference, asking the toolchain if it is not known.
    ///
    /// Solvers reported by the toolchain but absent from the cached list are
    /// added to it.
    pub fn lookup(&self, query: &str) -> Result<Arc<SolverIdentity>, DriverError> {
        if let Some(found) = self.find_solver(query) {
            return Ok(found);
        }
        let Some(executable) = self.executable() else {
            return Err(DriverError::UnknownSolver(query.to_string()));
        };
        let out = self
            .run_probe(&executable, &["--solver-json", query])
            .map_err(|_| DriverError::UnknownSolver(query.to_string()))?;
        let value: serde_json::Value = serde_json::from_str(&out)
            .map_err(|_| DriverError::UnknownSolver(query.to_string()))?;
        if !value.is_object() {
            return Err(DriverError::UnknownSolver(query.to_string()));
        }
        let identity = SolverIdentity::from_json(&value).map_err(|source| DriverError::BadJson {
            query: format!("--solver-json {query}"),
            source,
        })?;

        let mut inner = self.inner.write();
        if let Some(existing) = inner.solvers.iter().find(|s| same_solver(s, &identity)) {
            return Ok(Arc::clone(existing));
        }
        let identity = Arc::new(identity);
        inner.solvers.push(Arc::clone(&identity));
        Ok(identity)
    }

    /// The solver used when a configuration names none that can be found.
    ///
    /// A solver chosen with [`set_default_solver`](Self::set_default_solver)
    /// wins, then the one the toolchain marks as default, then the first.
    pub fn default_solver(&self) -> Option<Arc<SolverIdentity>> {
        let inner = self.inner.read();
        if let Some(tag) = &inner.default_solver {
            if let Some(s) = inner.solvers.iter().find(|s| &s.tag() == tag) {
                return Some(Arc::clone(s));
            }
        }
        inner
            .solvers
            .iter()
            .find(|s| s.is_default)
            .or_else(|| inner.solvers.first())
            .cloned()
    }

    pub fn set_default_solver(&self, query: &str) -> Result<(), DriverError> {
        let solver = self
            .find_solver(query)
            .ok_or_else(|| DriverError::UnknownSolver(query.to_string()))?;
        self.inner.write().default_solver = Some(solver.tag());
        Ok(())
    }
}

fn same_solver(a: &SolverIdentity, b: &SolverIdentity) -> bool {
    match (&a.config_file, &b.config_file) {
        (None, None) => a.id == b.id && a.version == b.version,
        (x, y) => x == y,
    }
}

fn locate_executable(location: Option<&Path>) -> Result<PathBuf, DriverError> {
    match location {
        Some(path) if path.is_file() => Ok(path.to_path_buf()),
        Some(dir) => {
            let candidate = dir.join(EXECUTABLE_NAME);
            if candidate.is_file() {
                Ok(candidate)
            } else {
                Err(DriverError::NotFound(dir.display().to_string()))
            }
        }
        None => which::which(EXECUTABLE_NAME).map_err(|_| DriverError::NotFound("PATH".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn solver(id: &str, default: bool) -> SolverIdentity {
        SolverIdentity::from_json(&json!({
            "id": id,
            "name": id.rsplit('.').next().unwrap(),
            "version": "1.0.0",
            "extraInfo": {"isDefault": default}
        }))
        .unwrap()
    }

    #[test]
    fn test_version_parse() {
        let v = Version::parse("MiniZinc to FlatZinc converter, version 2.8.5, build 1").unwrap();
        assert_eq!(v.to_string(), "2.8.5");
        assert!(v > Version { major: 2, minor: 5, patch: 0 });
        assert!(Version::parse("no version here").is_none());
    }

    #[test]
    fn test_empty_registry() {
        let reg = DriverRegistry::new();
        assert!(!reg.is_valid());
        assert!(reg.solvers().is_empty());
        assert!(reg.default_solver().is_none());
        assert!(matches!(reg.require(), Err(DriverError::NotConfigured)));
        assert!(matches!(
            reg.lookup("gecode"),
            Err(DriverError::UnknownSolver(_))
        ));
    }

    #[test]
    fn test_default_solver_selection() {
        let reg = DriverRegistry::with_solvers(vec![
            solver("org.a.first", false),
            solver("org.b.marked", true),
        ]);
        assert_eq!(reg.default_solver().unwrap().id, "org.b.marked");
        reg.set_default_solver("first").unwrap();
        assert_eq!(reg.default_solver().unwrap().id, "org.a.first");
        assert!(reg.set_default_solver("missing").is_err());
    }

    #[test]
    fn test_missing_location_clears() {
        let reg = DriverRegistry::with_solvers(vec![solver("org.a.first", false)]);
        let err = reg
            .set_location(Some(Path::new("/definitely/not/a/toolchain")))
            .unwrap_err();
        assert!(matches!(err, DriverError::NotFound(_)));
        assert!(reg.solvers().is_empty());
    }
}
