#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::doc_markdown)]

mod commands;
mod logging;

use clap::Parser;
use hbs_preview_core::paths::{absolutize, canonical_key};
use hbs_preview_core::Config;
use miette::Result;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "hbs-preview")]
#[command(author, version, about = "Render and live-preview Handlebars templates with companion modules", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output and logs
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Render a template once
    Render {
        /// Template to render
        template: PathBuf,

        /// Write the HTML here instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Workspace folder (defaults to the working directory)
        #[arg(long, value_name = "DIR")]
        workspace: Option<PathBuf>,
    },

    /// Show the recipe a template's companion module resolves to
    Inspect {
        /// Template whose companion module to load
        template: PathBuf,

        /// Workspace folder (defaults to the working directory)
        #[arg(long, value_name = "DIR")]
        workspace: Option<PathBuf>,
    },

    /// Keep previews of templates up to date until Ctrl-C
    Watch {
        /// Templates to preview
        #[arg(required = true)]
        templates: Vec<PathBuf>,

        /// Directory receiving `<template>.html` files
        #[arg(long, value_name = "DIR")]
        out_dir: Option<PathBuf>,

        /// Delay before re-rendering after a change
        #[arg(long, value_name = "MS", env = "HBS_PREVIEW_DEBOUNCE_MS")]
        debounce_ms: Option<u64>,

        /// Workspace folder (defaults to the working directory)
        #[arg(long, value_name = "DIR")]
        workspace: Option<PathBuf>,
    },
}

fn with_workspace(config: Config, workspace: Option<PathBuf>) -> Config {
    let folder = workspace.unwrap_or_else(|| config.cwd.clone());
    let folder = canonical_key(&absolutize(&folder, &config.cwd));
    config.with_workspace_folder(folder)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    let config = Config::from_env(cwd)
        .with_verbosity(cli.verbose)
        .with_json_logs(cli.json);

    logging::init(config.verbosity, config.json_logs);

    match cli.command {
        Some(Commands::Version) | None => commands::version::run(),
        Some(Commands::Render {
            template,
            output,
            workspace,
        }) => {
            let config = with_workspace(config, workspace);
            commands::render::run(&config, &template, output.as_deref(), cli.json)
        }
        Some(Commands::Inspect { template, workspace }) => {
            let config = with_workspace(config, workspace);
            commands::inspect::run(&config, &template, cli.json)
        }
        Some(Commands::Watch {
            templates,
            out_dir,
            debounce_ms,
            workspace,
        }) => {
            let mut config = with_workspace(config, workspace);
            if let Some(ms) = debounce_ms {
                config = config.with_debounce(Duration::from_millis(ms));
            }
            let out_dir = absolutize(&out_dir.unwrap_or_else(|| config.cwd.clone()), &config.cwd);
            commands::watch::run(config, &templates, &out_dir)
        }
    }
}
