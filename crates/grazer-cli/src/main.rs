//! Grazer command-line interface.
//!
//! Run beamline simulations from TOML job files:
//! ```sh
//! grazer run job.toml
//! grazer validate job.toml
//! grazer materials
//! ```

mod config;
mod runner;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "grazer")]
#[command(about = "Grazer: Monte Carlo X-ray tracing through capillary optics")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a simulation from a TOML job file.
    Run {
        /// Path to the job configuration file.
        config: PathBuf,
        /// Output directory (overrides config file setting).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Build the beamline and plots without tracing any rays.
    Validate {
        /// Path to the job configuration file.
        config: PathBuf,
    },
    /// List the built-in wall materials.
    Materials,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, output } => {
            println!("Grazer X-ray ray tracer");
            println!("=======================");
            let job = config::load_config(&config)?;
            println!("Configuration: {}", config.display());

            let report = runner::run_simulation(&job)?;
            if report.cancelled {
                println!("Run cancelled after {} round(s)", report.rounds_completed);
            }

            let out_dir = output.unwrap_or_else(|| PathBuf::from(&job.output.directory));

            if job.output.save_csv {
                for snapshot in report.tallies.snapshots() {
                    let csv_path = out_dir.join(format!("{}.csv", snapshot.name));
                    runner::write_plot_csv(&snapshot, &csv_path, &job)?;
                }
            }

            if job.output.save_json {
                runner::write_summary_json(&report, &out_dir.join("summary.json"))?;
            }

            println!(
                "Simulation complete: {} of {} rays accepted.",
                report.tallies.accepted, report.rays_traced
            );
            Ok(())
        }
        Commands::Validate { config } => {
            let job = config::load_config(&config)?;
            let (beamline, template) = runner::prepare(&job)?;
            println!("Configuration is valid: {}", config.display());
            println!("  Beams:");
            for (name, kind) in beamline.beam_names() {
                println!("    {:<24} {:?}", name, kind);
            }
            println!("  Plots: {}", template.histograms.len());
            Ok(())
        }
        Commands::Materials => {
            println!("Available materials:");
            println!();
            for (id, description) in grazer_materials::tabulated::BUILTIN_MATERIALS {
                println!("    {:<8} {}", id, description);
            }
            println!("    {:<8} {}", "ideal", "Lossless mirror, R = 1 at every angle and energy");
            Ok(())
        }
    }
}
