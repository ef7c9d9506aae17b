// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Brokerbench CLI
//!
//! Validates driver configuration and runs a smoke benchmark through the
//! full driver lifecycle.

use clap::{Parser, Subcommand};

mod commands;

/// Brokerbench - pluggable message broker benchmark drivers
#[derive(Parser)]
#[command(name = "brokerbench")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "brokerbench.yaml")]
    pub config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        file: String,
    },

    /// Run the driver lifecycle end to end and verify every payload
    Smoke {
        /// Number of messages to send
        #[arg(short, long, default_value_t = 1000)]
        messages: usize,

        /// Partitions of the smoke topic
        #[arg(short, long, default_value_t = 4)]
        partitions: u32,

        /// Payload size in bytes
        #[arg(long, default_value_t = 1024)]
        payload_size: usize,

        /// Run against the configured Kafka cluster instead of the
        /// in-process broker (requires the `rdkafka` feature)
        #[arg(long)]
        live: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    // Dispatch to command handlers
    match cli.command {
        Commands::Validate { file } => commands::validate::execute(&file).await,
        Commands::Smoke {
            messages,
            partitions,
            payload_size,
            live,
        } => {
            let options = commands::smoke::SmokeOptions {
                messages,
                partitions,
                payload_size,
                live,
            };
            commands::smoke::execute(&cli.config, options).await
        }
    }
}
