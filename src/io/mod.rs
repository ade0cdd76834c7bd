//! Output handling for the CLI.
//!
//! - JSON envelope with status, result code and exit code
//! - Human-readable tables for listings

pub mod envelope;
pub mod table;

pub use envelope::{EntityType, Envelope, ErrorDetails, Meta, ResultCode, SCHEMA_VERSION, Status};
