//! PlayForge Runner - Bridge interface for the order bot
//!
//! Commands: run (default), prebuild, templates
//! Reads one JSON request from stdin, writes one JSON response to stdout.
//! Logs go to stderr only.

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::AsyncReadExt;

use playforge_core::{
    handle_request, prebuild_library, BuildScheduler, BuilderConfig, PlayablePipeline, RunnerResponse,
};

#[derive(Parser)]
#[command(name = "playforge-runner")]
#[command(about = "PlayForge Runner - Playable Build Pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Project root holding templates/, library/, previews/ and temp/
    #[arg(short, long, default_value = ".")]
    root: PathBuf,

    /// Optional JSON builder config; relative dirs resolve against --root
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Handle one request read from stdin
    Run,

    /// Build every library artifact
    Prebuild,

    /// List supported games
    Templates,
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

fn emit<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => println!("{json}"),
        Err(e) => println!(r#"{{"ok":false,"error":"{}"}}"#, e.to_string().replace('"', "'")),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match BuilderConfig::load(path, &cli.root) {
            Ok(config) => config,
            Err(e) => {
                emit(&RunnerResponse::failed(e.to_string()));
                return ExitCode::FAILURE;
            }
        },
        None => BuilderConfig::rooted(&cli.root),
    }
    .with_env_overrides();

    let (max_concurrent, max_queue) = (config.max_concurrent_builds, config.max_queue_size);
    let pipeline = Arc::new(PlayablePipeline::from_config(config));

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let mut raw = String::new();
            if let Err(e) = tokio::io::stdin().read_to_string(&mut raw).await {
                emit(&RunnerResponse::failed(e.to_string()));
                return ExitCode::FAILURE;
            }
            let scheduler = BuildScheduler::new(pipeline, max_concurrent, max_queue);
            let response = handle_request(&scheduler, &raw).await;
            emit(&response);
            if response.ok {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }

        Commands::Prebuild => match prebuild_library(&pipeline).await {
            Ok(entries) => {
                let saved: Vec<_> = entries
                    .iter()
                    .map(|e| {
                        serde_json::json!({
                            "game": e.game_id,
                            "geo": e.geo_id,
                            "variant": e.variant,
                            "path": e.path,
                        })
                    })
                    .collect();
                let failed = entries.iter().filter(|e| e.path.is_none()).count();
                emit(&serde_json::json!({ "ok": failed == 0, "entries": saved }));
                if failed == 0 {
                    ExitCode::SUCCESS
                } else {
                    ExitCode::from(2)
                }
            }
            Err(e) => {
                emit(&RunnerResponse::failed(e.to_string()));
                ExitCode::FAILURE
            }
        },

        Commands::Templates => {
            let templates: Vec<_> = pipeline
                .registry()
                .list()
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "game": t.game_key,
                        "templateDir": t.template_dir_name,
                        "buildCommand": t.build_command,
                        "output": t.output_artifact,
                        "libraryId": t.library_game_id,
                    })
                })
                .collect();
            emit(&templates);
            ExitCode::SUCCESS
        }
    }
}
