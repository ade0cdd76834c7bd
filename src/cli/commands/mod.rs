//! Command implementations for the CLI.
//!
//! Each command returns the process exit code. With `--json` every command
//! prints exactly one [`Envelope`](crate::io::Envelope) on stdout.

pub mod ask;
pub mod documents;
pub mod init;

use serde::Serialize;

use crate::error::RagError;
use crate::io::Envelope;

/// Print an envelope as pretty JSON and return its exit code.
pub fn print_json<T: Serialize>(envelope: &Envelope<T>) -> u8 {
    match envelope.to_json() {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("Error: failed to serialize output: {e}"),
    }
    envelope.exit_code
}

/// Report a failed operation and return its exit code.
pub fn report_error(err: &RagError, json: bool) -> u8 {
    let envelope: Envelope<()> = Envelope::from_error(err);
    if json {
        return print_json(&envelope);
    }

    eprintln!("Error: {err}");
    if let Some(suggestion) = err.suggestion() {
        eprintln!("  {suggestion}");
    }
    envelope.exit_code
}
