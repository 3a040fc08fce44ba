mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use muraldb::utils::config::load_config;
use muraldb::Session;

use crate::commands::Command;

#[derive(Parser, Debug)]
#[command(author, version, about = "Galleries, folders, tags and a public showcase", long_about = None)]
struct Args {
    /// Record store; overrides MURALDB_DB_PATH
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Blob directory; overrides MURALDB_BLOB_DIR
    #[arg(long, global = true)]
    blobs: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            match e.downcast_ref::<muraldb::Error>() {
                Some(failure) => {
                    eprintln!("{}", failure.user_message());
                    if let Some(hint) = failure.remediation() {
                        eprintln!("{hint}");
                    }
                }
                None => eprintln!("{:#}", e),
            }
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let mut config = load_config().context("Failed to resolve configuration")?;
    if let Some(db) = args.db {
        config.db_path = db;
    }
    if let Some(blobs) = args.blobs {
        config.blob_dir = blobs;
    }
    debug!("Using {:?}", config);

    let mut session = Session::open(&config)
        .with_context(|| format!("Failed to open the library at {:?}", config.db_path))?;
    commands::run(&mut session, args.command)
}
