mod archive;
mod cmd;
mod output;
mod root;
mod stats;

use clap::{Parser, Subcommand};
use cmd::{
    filesystem::FilesystemSubcommand, lock::LockSubcommand, queue::QueueSubcommand,
    study::StudySubcommand,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "strata",
    about = "Rule-driven storage lifecycle engine for a medical-image archive",
    version,
    propagate_version = true
)]
struct Cli {
    /// Archive root holding strata.yaml (default: search upward from the current directory)
    #[arg(long, global = true, env = "STRATA_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create strata.yaml, the rules file and the catalog
    Init,

    /// Manage storage filesystems
    Filesystem {
        #[command(subcommand)]
        subcommand: FilesystemSubcommand,
    },

    /// Register and list stored studies
    Study {
        #[command(subcommand)]
        subcommand: StudySubcommand,
    },

    /// Inspect and toggle service locks
    Lock {
        #[command(subcommand)]
        subcommand: LockSubcommand,
    },

    /// Inspect the work queue
    Queue {
        #[command(subcommand)]
        subcommand: QueueSubcommand,
    },

    /// Run one scheduler tick and one work-queue drain, then exit
    Tick,

    /// Run ticks continuously until Ctrl-C
    Run {
        /// Seconds between ticks (default: scheduler.poll_interval_secs)
        #[arg(long)]
        interval: Option<u64>,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run { .. } | Commands::Tick => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root, cli.json),
        Commands::Filesystem { subcommand } => cmd::filesystem::run(&root, subcommand, cli.json),
        Commands::Study { subcommand } => cmd::study::run(&root, subcommand, cli.json),
        Commands::Lock { subcommand } => cmd::lock::run(&root, subcommand, cli.json),
        Commands::Queue { subcommand } => cmd::queue::run(&root, subcommand, cli.json),
        Commands::Tick => cmd::tick::run(&root, cli.json),
        Commands::Run { interval } => cmd::run::run(&root, interval),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
