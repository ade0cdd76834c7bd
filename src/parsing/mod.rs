//! Turning uploaded files into text the chunkers understand.
//!
//! - [`DocumentParser`]: the parsing collaborator interface
//! - [`LocalParser`]: CSV/TSV to markdown tables, text/markdown to units,
//!   optional external commands for formats like PDF
//! - [`RetryingParser`]: bounded polling for parsers that answer `Pending`

pub mod local;
pub mod parser;
pub mod retry;

pub use local::LocalParser;
pub use parser::{
    DocumentParser, ParseError, ParseOutcome, ParsedContent, ParsedDocument, ParsedUnit,
};
pub use retry::{RetryPolicy, RetryingParser};
