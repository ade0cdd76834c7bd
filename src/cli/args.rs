//! CLI argument parsing using clap.

use clap::{
    ArgGroup, Parser, Subcommand, ValueEnum,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

use crate::documents::Category;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Question answering over document collections
#[derive(Parser)]
#[command(
    name = "dataroom",
    version = env!("CARGO_PKG_VERSION"),
    about = "Question answering over paged and tabular documents",
    long_about = "Index PDFs, markdown and CSV files into persistent vector collections and answer questions with citations.",
    next_line_help = true,
    styles = clap_cargo_style(),
    after_help = "Quick Start:\n  $ dataroom init\n  $ dataroom upload reports/ data/*.csv\n  $ dataroom ask \"Who is 30 years old?\"\n  $ dataroom list"
)]
pub struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Print the JSON envelope instead of human output
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Category filter accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CategoryArg {
    Paged,
    Tabular,
}

impl From<CategoryArg> for Category {
    fn from(value: CategoryArg) -> Self {
        match value {
            CategoryArg::Paged => Category::Paged,
            CategoryArg::Tabular => Category::Tabular,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize project
    #[command(about = "Set up .dataroom directory with default configuration")]
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Index new documents
    #[command(
        about = "Parse, chunk, embed and index documents",
        after_help = "Examples:\n  dataroom upload report.pdf\n  dataroom upload data/ --meta owner=finance\n  dataroom upload 'exports/*.csv' --no-progress"
    )]
    Upload {
        /// Files, directories (walked recursively) or glob patterns
        #[arg(value_name = "PATH", required = true)]
        paths: Vec<String>,

        /// Use this source id instead of deriving one (single file only)
        #[arg(long)]
        source_id: Option<String>,

        /// Extra metadata stored on every chunk, as key=value
        #[arg(long = "meta", value_name = "KEY=VALUE")]
        meta: Vec<String>,

        /// Disable the progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Replace an indexed document
    #[command(about = "Delete and re-index a document (uploads it if new)")]
    Update {
        path: PathBuf,

        /// Source id to replace; defaults to the one stored for this filename
        #[arg(long)]
        source_id: Option<String>,

        #[arg(long = "meta", value_name = "KEY=VALUE")]
        meta: Vec<String>,
    },

    /// Remove a document from every collection
    #[command(group(ArgGroup::new("target").required(true).args(["source_id", "file"])))]
    Delete {
        /// Source id as shown by `dataroom list`
        source_id: Option<String>,

        /// Delete by original filename instead
        #[arg(long)]
        file: Option<String>,
    },

    /// List indexed documents
    List,

    /// Show per-collection counts
    Stats,

    /// Remove every chunk from every collection
    Reset {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },

    /// Ask a question
    #[command(
        about = "Retrieve context for a question and generate an answer",
        after_help = "Examples:\n  dataroom ask \"What is Alice's age?\"\n  dataroom ask --image scan.png \"Is the fracture healing?\"\n  dataroom ask \"revenue 2023\" --context-only --category tabular"
    )]
    Ask {
        /// Question text
        text: Option<String>,

        /// Image to include in the query
        #[arg(long)]
        image: Option<PathBuf>,

        /// Print the retrieved context without calling the answer model
        #[arg(long)]
        context_only: bool,

        /// Restrict single-stage retrieval to one category
        #[arg(long, value_enum)]
        category: Option<CategoryArg>,
    },

    /// Show current configuration settings
    #[command(about = "Display active settings from .dataroom/settings.toml")]
    Config,
}
