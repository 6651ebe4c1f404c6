//! Hearth CLI: the main entry point.
//!
//! Commands:
//! - `chat`     : Interactive session (default)
//! - `ask`      : Single turn
//! - `verify`   : Edit/build/test loop until the commands pass
//! - `classify` : Show how the intent router reads a request
//! - `init`     : Write the default config

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "hearth",
    about = "Hearth — a local-first coding agent",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Project root the agent works in (defaults to the current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive session
    Chat,

    /// Send a single message and exit
    Ask {
        #[arg(short, long)]
        message: String,
    },

    /// Apply model edits and run build/test commands until they pass
    Verify {
        /// What the change should accomplish
        #[arg(short, long)]
        prompt: String,

        /// Verification command; repeat for several (default: detect)
        #[arg(short, long = "command")]
        commands: Vec<String>,

        #[arg(long)]
        max_iterations: Option<u32>,

        /// Stop at the first repeated failure instead of asking for a diagnosis
        #[arg(long)]
        no_unblocker: bool,
    },

    /// Print the intent decision for a request as JSON
    Classify { text: String },

    /// Write the default config file if none exists
    Init,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so streamed answers on stdout stay clean
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir()?,
    };

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => commands::chat::run(root, None).await?,
        Commands::Ask { message } => commands::chat::run(root, Some(message)).await?,
        Commands::Verify {
            prompt,
            commands,
            max_iterations,
            no_unblocker,
        } => {
            let options = commands::verify::VerifyOptions {
                prompt,
                commands,
                max_iterations,
                use_unblocker: !no_unblocker,
            };
            commands::verify::run(root, options).await?
        }
        Commands::Classify { text } => commands::classify::run(&text)?,
        Commands::Init => commands::init::run()?,
    }

    Ok(())
}
