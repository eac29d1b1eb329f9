use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "aibot")]
#[command(about = "Conversational companion bot with persona state and per-user memory")]
pub struct Args {
    /// Data directory (defaults to the platform config dir)
    #[arg(short, long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Send one message and print the reply
    Chat {
        /// Sender identity
        #[arg(short, long)]
        user: String,
        /// Message text; prefix with // for admin directives
        message: String,
    },
    /// Interactive chat loop
    Repl {
        /// Sender identity
        #[arg(short, long)]
        user: String,
    },
    /// Show the bot status report
    Status,
    /// Export a user's chat history as a transcript
    Export {
        /// Target user id
        #[arg(short, long)]
        user: String,
    },
}
