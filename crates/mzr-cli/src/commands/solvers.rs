use std::io::{self, Write};

use anyhow::Result;
use mzr_driver::DriverRegistry;
use tabwriter::TabWriter;

pub fn handle(registry: &DriverRegistry, json: bool) -> Result<()> {
    let solvers = registry.solvers();
    if json {
        let list: Vec<_> = solvers
            .iter()
            .map(|s| {
                serde_json::json!({
                    "id": s.id,
                    "name": s.name,
                    "version": s.version,
                    "tags": s.tags,
                    "stdFlags": s.std_flags,
                    "requiredFlags": s.required_flags,
                    "isDefault": s.is_default,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&list)?);
        return Ok(());
    }

    if let Some(version) = registry.version_string() {
        println!("{version}");
    }
    let default = registry.default_solver().map(|s| s.tag());
    let mut writer = TabWriter::new(io::stdout());
    writeln!(writer, "ID\tVERSION\tNAME\tTAGS\tDEFAULT")?;
    for solver in &solvers {
        let mark = if default.as_deref() == Some(solver.tag().as_str()) {
            "*"
        } else {
            ""
        };
        writeln!(
            writer,
            "{}\t{}\t{}\t{}\t{}",
            solver.id,
            solver.version,
            solver.name,
            solver.tags.join(","),
            mark
        )?;
    }
    writer.flush()?;
    Ok(())
}
