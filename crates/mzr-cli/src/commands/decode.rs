use std::path::Path;

use anyhow::Result;
use mzr_driver::StreamDecoder;

use super::read_input;

/// Decode captured output and print one JSON event per line.
pub fn handle(stdout: &Path, stderr: Option<&Path>) -> Result<()> {
    let out = read_input(stdout)?;
    let err = match stderr {
        Some(path) => read_input(path)?,
        None => Vec::new(),
    };
    for event in StreamDecoder::decode_all(&out, &err) {
        println!("{}", serde_json::to_string(&event)?);
    }
    Ok(())
}
