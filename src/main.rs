use std::fs::OpenOptions;

use anyhow::Error;
use clap::Parser;
use log::LevelFilter;
use simplelog::{
    ColorChoice, CombinedLogger, Config, ConfigBuilder, TermLogger, TerminalMode, WriteLogger,
};

use crate::config::{Cli, resolve_log_level};
use crate::program::Program;

mod backend;
mod cleanup;
mod config;
mod fsprobe;
mod models;
mod program;
mod report;

fn main() -> Result<(), Error> {
    // Load .env before anything reads the environment; a missing file is
    // fine.
    let _ = dotenv::dotenv();

    let cli = Cli::parse();
    let level = resolve_log_level(cli.log_level.as_deref())?;
    initialize_logger(level);

    let program = Program::new(cli);
    program.run()
}

/// Initializes the combined terminal and file logger with preset
/// filtering.
fn initialize_logger(level: LevelFilter) {
    let mut config = ConfigBuilder::new();
    config.add_filter_allow_str("refresharr");

    let log_file = match OpenOptions::new()
        .create(true)
        .append(true)
        .open("refresharr.log")
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Failed to open log file: {}. Logging to terminal only.", e);
            let _ = TermLogger::init(
                level,
                Config::default(),
                TerminalMode::Mixed,
                ColorChoice::Auto,
            );
            return;
        }
    };

    if let Err(e) = CombinedLogger::init(vec![
        TermLogger::new(
            level,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ),
        WriteLogger::new(LevelFilter::max(), config.build(), log_file),
    ]) {
        eprintln!(
            "Failed to initialize combined logger: {}. Falling back to terminal-only logging.",
            e
        );
        let _ = TermLogger::init(
            level,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        );
    }
}
