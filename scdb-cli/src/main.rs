//! `scdb`: inspect and administer `.scdb` storage files from the command line.

mod cli;

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "scdb", version, about = "Inspect and administer .scdb storage files")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Emit machine-readable JSON instead of a formatted table.
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Open (creating if necessary) a .scdb file, run recovery, then close it.
    Open {
        path: PathBuf,
    },
    /// List the blocks stored in a .scdb file.
    Ls {
        path: PathBuf,
    },
    /// Print storage statistics for a .scdb file.
    Stats {
        path: PathBuf,
    },
    /// Reclaim free space in a .scdb file.
    Vacuum {
        path: PathBuf,
        /// One of: quick, incremental, full.
        #[arg(long, default_value = "quick")]
        mode: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    let mut stdout = io::stdout();

    let result = run(&cli, &mut stdout).await;
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("scdb: {message}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli, writer: &mut dyn Write) -> Result<(), String> {
    match &cli.command {
        Commands::Open { path } => {
            let opts = cli::open::OpenOptions { json: cli.json };
            cli::open::execute(path, &opts, writer).await.map_err(|e| e.to_string())
        }
        Commands::Ls { path } => {
            let opts = cli::ls::LsOptions { json: cli.json };
            cli::ls::execute(path, &opts, writer).await.map_err(|e| e.to_string())
        }
        Commands::Stats { path } => {
            let opts = cli::stats::StatsOptions { json: cli.json };
            cli::stats::execute(path, &opts, writer).await.map_err(|e| e.to_string())
        }
        Commands::Vacuum { path, mode } => {
            let mode = cli::vacuum::parse_mode(mode)?;
            let opts = cli::vacuum::VacuumOptions { mode, json: cli.json };
            cli::vacuum::execute(path, &opts, writer).await.map_err(|e| e.to_string())
        }
    }
}
