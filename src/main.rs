use anyhow::Result;
use clap::{Parser, Subcommand};
use rehearse::commands::{self, ChatArgs};
use rehearse::config::Config;
use rehearse::events::PracticeMode;
use rehearse::logging;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rehearse")]
#[command(version = "0.1.0")]
#[command(about = "Practice interviews, debates and small talk with an AI partner", long_about = None)]
struct Cli {
    /// Verbose logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a practice conversation
    Chat {
        /// Practice mode (see `rehearse modes`)
        #[arg(short, long)]
        mode: Option<PracticeMode>,
        /// Do not store this conversation
        #[arg(long)]
        guest: bool,
        /// Title for the stored conversation
        #[arg(long)]
        title: Option<String>,
        /// Job description text file
        #[arg(long, value_name = "FILE")]
        job_description: Option<PathBuf>,
        /// Résumé text file
        #[arg(long = "cv", value_name = "FILE")]
        resume: Option<PathBuf>,
        /// JSON analysis of résumé vs. job ({"strengths": [...], "gaps": [...]})
        #[arg(long, value_name = "FILE")]
        analysis: Option<PathBuf>,
        /// Continue a stored conversation
        #[arg(long = "resume", value_name = "ID")]
        resume_conversation: Option<String>,
    },
    /// List practice modes
    Modes,
    /// List stored conversations
    History,
    /// Show or initialize the configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration with secrets masked
    Show,
    /// Write a default config file
    Init {
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let config = Config::load()?;

    match cli.command {
        None => commands::start_chat(&config, ChatArgs::default()).await,
        Some(Commands::Chat {
            mode,
            guest,
            title,
            job_description,
            resume,
            analysis,
            resume_conversation,
        }) => {
            let args = ChatArgs {
                mode,
                guest,
                title,
                job_description,
                resume,
                analysis,
                resume_conversation,
            };
            commands::start_chat(&config, args).await
        }
        Some(Commands::Modes) => {
            commands::list_modes();
            Ok(())
        }
        Some(Commands::History) => commands::show_history(&config).await,
        Some(Commands::Config { action: ConfigAction::Show }) => commands::show_config(&config),
        Some(Commands::Config {
            action: ConfigAction::Init { force },
        }) => commands::init_config(&config, force),
    }
}
