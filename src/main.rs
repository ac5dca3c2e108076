mod cli;
mod commands;
mod config;
mod engine;
mod paths;
mod progress;
mod state;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use config::{Overrides, Settings};
use state::IamsyncState;
use std::io;
use std::path::PathBuf;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub settings: Settings,
    pub desired_path: PathBuf,
    pub state_path: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    if let Command::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "iamsync", &mut io::stdout());
        return Ok(());
    }

    let global = cli.global;
    let settings = Settings::load()?.with_overrides(Overrides {
        profile: global.profile,
        region: global.region,
        file: global.file,
        jobs: global.jobs,
    });
    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        desired_path: settings.desired_state_path()?,
        state_path: IamsyncState::state_file()?,
        settings,
    };

    match &cli.command {
        Command::Plan(args) => {
            commands::plan::run(&ctx, &commands::connect(&ctx.settings)?, args)
        }
        Command::Apply(args) => {
            commands::apply::run(&ctx, &commands::connect(&ctx.settings)?, args)
        }
        Command::Import(args) => {
            commands::import::run(&ctx, &commands::connect(&ctx.settings)?, args)
        }
        Command::Status(args) => {
            commands::status::run(&ctx, &commands::connect(&ctx.settings)?, args)
        }
        Command::Validate => commands::validate::run(&ctx),
        Command::Keys(cmd) => commands::keys::run(&commands::connect(&ctx.settings)?, cmd),
        Command::Members(cmd) => {
            commands::members::run(&ctx, &commands::connect(&ctx.settings)?, cmd)
        }
        Command::Identities(cmd) => {
            commands::identities::run(&ctx, &commands::connect(&ctx.settings)?, cmd)
        }
        Command::Config(cmd) => commands::config::run(&ctx, cmd),
        Command::Completions { .. } => Ok(()),
    }
}
