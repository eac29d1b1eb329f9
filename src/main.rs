mod cli;
mod commands;
mod config;
mod error;
mod handler;
mod memory;
mod persona;
mod provider;
mod relationship;
mod social;

use std::io::{BufRead, Write};

use anyhow::Result;
use clap::Parser;
use colored::*;
use tracing_subscriber::EnvFilter;

use cli::{Args, Commands};
use config::Config;
use handler::{BotHandler, TYPING_DELAY};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::new(args.data_dir)?;
    let mut handler = BotHandler::new(config)?;

    match args.command {
        Commands::Chat { user, message } => {
            let reply = handler.handle_incoming(&user, &message).await;
            println!("{}: {}", "User".cyan(), message);
            println!("{}: {}", "AI".green(), reply);
        }
        Commands::Repl { user } => {
            println!("{}", "💬 Chat started (exit to quit)".yellow());
            let stdin = std::io::stdin();
            loop {
                print!("{} ", ">".cyan());
                std::io::stdout().flush()?;

                let mut line = String::new();
                if stdin.lock().read_line(&mut line)? == 0 {
                    break;
                }
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "exit" || line == "quit" {
                    break;
                }

                tokio::time::sleep(TYPING_DELAY).await;
                let reply = handler.handle_incoming(&user, line).await;
                println!("{}: {}", "AI".green(), reply);
            }
        }
        // Local subcommands read state directly; only directives
        // arriving through handle_incoming land in the audit trail.
        Commands::Status => {
            println!("{}", handler.status_report());
        }
        Commands::Export { user } => {
            println!("{}", handler.export_transcript(&user));
        }
    }

    Ok(())
}
