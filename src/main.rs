use anyhow::Context;
use clap::Parser;

use dataroom::cli::commands::{ask, documents, init, report_error};
use dataroom::cli::{Cli, Commands};
use dataroom::{Dataroom, Settings, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cwd = std::env::current_dir().context("failed to read current directory")?;

    // Init runs before any settings exist.
    if let Commands::Init { force } = &cli.command {
        let code = init::run_init(&cwd, *force, cli.json);
        std::process::exit(code as i32);
    }

    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => Settings::load().context("failed to load settings")?,
    };
    let root = Settings::workspace_root().unwrap_or(cwd);
    settings.resolve_index_path(&root);

    logging::init_with_config(&settings.logging);

    if let Commands::Config = &cli.command {
        let code = init::run_config(&settings, cli.json);
        std::process::exit(code as i32);
    }

    let room = match Dataroom::open(settings) {
        Ok(room) => room,
        Err(e) => std::process::exit(report_error(&e, cli.json) as i32),
    };

    let json = cli.json;
    let code = match cli.command {
        Commands::Upload {
            paths,
            source_id,
            meta,
            no_progress,
        } => documents::run_upload(&room, &paths, source_id, &meta, no_progress, json),
        Commands::Update {
            path,
            source_id,
            meta,
        } => documents::run_update(&room, &path, source_id, &meta, json),
        Commands::Delete { source_id, file } => {
            documents::run_delete(&room, source_id.as_deref(), file.as_deref(), json)
        }
        Commands::List => documents::run_list(&room, json),
        Commands::Stats => documents::run_stats(&room, json),
        Commands::Reset { yes } => documents::run_reset(&room, yes, json),
        Commands::Ask {
            text,
            image,
            context_only,
            category,
        } => {
            ask::run_ask(
                &room,
                text,
                image,
                context_only,
                category.map(Into::into),
                json,
            )
            .await
        }
        Commands::Init { .. } | Commands::Config => 0,
    };

    std::process::exit(code as i32);
}
