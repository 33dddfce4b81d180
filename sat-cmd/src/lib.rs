//! Command implementations for the survey-site imagery CLI.
//!
//! `process` fetches imagery statistics for every site and year; `select`
//! and `plot` rework its outputs offline.

use clap::{Args, Subcommand};
use config::Inputs;
use std::path::PathBuf;

pub mod config;
pub mod plot;
pub mod process;
pub mod select;

/// Inputs shared by every subcommand.
#[derive(Args)]
pub struct InputArgs {
    /// Path to the TOML run configuration
    #[arg(short = 'c', long)]
    config: PathBuf,

    /// GeoJSON file of survey sites (overrides `sites` in the config)
    #[arg(short = 's', long)]
    sites: Option<PathBuf>,

    /// Years to cover, comma separated (overrides `years` in the config)
    #[arg(short = 'y', long, value_delimiter = ',')]
    years: Vec<i32>,

    /// Directory for tables, charts and the summary (defaults to the
    /// geometry file's directory)
    #[arg(short = 'o', long)]
    output_dir: Option<PathBuf>,
}

impl InputArgs {
    fn load(&self) -> anyhow::Result<Inputs> {
        Inputs::load(
            &self.config,
            self.sites.as_deref(),
            &self.years,
            self.output_dir.as_deref(),
        )
    }
}

#[derive(Subcommand)]
pub enum Command {
    /// Fetch clear-sky, NDVI, LAI and AOT statistics per site and year,
    /// then write tables, charts and the closest-dates summary
    Process {
        #[command(flatten)]
        inputs: InputArgs,

        /// Skip chart rendering
        #[arg(long)]
        no_plots: bool,
    },

    /// Recompute the closest-dates summary from existing tables
    Select {
        #[command(flatten)]
        inputs: InputArgs,
    },

    /// Re-render charts from existing tables and summary
    Plot {
        #[command(flatten)]
        inputs: InputArgs,
    },
}

pub async fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Process { inputs, no_plots } => {
            process::run_process(inputs.load()?, !no_plots).await
        }
        Command::Select { inputs } => select::run_select(inputs.load()?),
        Command::Plot { inputs } => plot::run_plot(inputs.load()?),
    }
}
