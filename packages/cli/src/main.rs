#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the forest alert pipeline.
//!
//! Uses `indicatif-log-bridge` (via [`forest_alert_cli_utils::init_logger`])
//! to route `log` output through `indicatif::MultiProgress` so that log
//! lines and progress bars never fight for the terminal.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use forest_alert_cli::config::{DEFAULT_ID_COLUMN, Overrides, PipelineConfig};
use forest_alert_cli::pipeline::{self, DirectInputs, Progress};
use forest_alert_overlay::{DEFAULT_DEFORESTED_CLASS, DEFAULT_WORKER_COUNT, OverlayOptions};
use forest_alert_raster::codec;
use forest_alert_raster::models::BackingKind;
use forest_alert_table::{read, write};

#[derive(Parser)]
#[command(name = "forest_alert", about = "Deforestation alert pipeline")]
struct Cli {
    /// Worker threads per stage (default: 2)
    #[arg(long, global = true, env = "FOREST_ALERT_WORKERS")]
    workers: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute direct deforestation and land-use metrics per plot
    Direct {
        /// Plot polygons (`GeoJSON`)
        #[arg(long)]
        plots: PathBuf,
        /// Feature property holding the plot id
        #[arg(long, default_value = DEFAULT_ID_COLUMN)]
        id_column: String,
        /// Classification band file
        #[arg(long)]
        raster: PathBuf,
        /// Protected-area polygons (`GeoJSON`)
        #[arg(long)]
        protected_areas: Option<PathBuf>,
        /// Farming frontier polygons (`GeoJSON`)
        #[arg(long)]
        farming_frontier: Option<PathBuf>,
        /// Raster class code counted as deforested
        #[arg(long, default_value_t = DEFAULT_DEFORESTED_CLASS)]
        deforested_class: i64,
        /// How the raster is shared with workers (auto, shared-memory,
        /// mapped-file, streaming)
        #[arg(long, default_value = "auto")]
        backing: BackingKind,
        /// Output CSV
        #[arg(long, short)]
        output: PathBuf,
    },
    /// Flag plots linked by movements to directly alerted plots
    Indirect {
        /// Direct metrics CSV (needs `id` and `alert_direct`)
        #[arg(long)]
        direct: PathBuf,
        /// Movement CSV (`origen_id`, `destination_id`)
        #[arg(long)]
        movements: PathBuf,
        /// Output CSV
        #[arg(long, short)]
        output: PathBuf,
    },
    /// Aggregate plot alerts per entity
    Entity {
        /// Plot alerts CSV written by `indirect`
        #[arg(long)]
        plots: PathBuf,
        /// Entity master CSV
        #[arg(long)]
        entities: PathBuf,
        /// Plot-to-entity mapping CSV
        #[arg(long)]
        mapping: PathBuf,
        /// Output CSV
        #[arg(long, short)]
        output: PathBuf,
    },
    /// Run all three stages from a TOML config
    Pipeline {
        /// Pipeline config file
        #[arg(long, short)]
        config: PathBuf,
        /// Override the configured output directory
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// Override the configured plot id property
        #[arg(long)]
        id_column: Option<String>,
        /// Override the configured deforested class code
        #[arg(long)]
        deforested_class: Option<i64>,
        /// Override the configured raster backing
        #[arg(long)]
        backing: Option<BackingKind>,
    },
    /// Print the header of a band file
    RasterInfo {
        /// Band file
        raster: PathBuf,
    },
}

#[allow(clippy::too_many_lines)]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = forest_alert_cli_utils::init_logger();
    let cli = Cli::parse();
    let progress = Progress::on(&multi);

    match cli.command {
        Commands::Direct {
            plots,
            id_column,
            raster,
            protected_areas,
            farming_frontier,
            deforested_class,
            backing,
            output,
        } => {
            let inputs = DirectInputs {
                plots: &plots,
                id_column: &id_column,
                raster: &raster,
                protected_areas: protected_areas.as_deref(),
                farming_frontier: farming_frontier.as_deref(),
            };
            let options = OverlayOptions {
                deforested_class,
                worker_count: cli.workers.unwrap_or(DEFAULT_WORKER_COUNT),
                backing,
            };
            let metrics = pipeline::run_direct(&inputs, &options, progress)?;
            write::write_file(&output, |file| write::write_direct_metrics(file, &metrics))?;
        }
        Commands::Indirect {
            direct,
            movements,
            output,
        } => {
            let direct = read::read_file(&direct, read::read_direct_metrics)?;
            let edges = read::read_file(&movements, read::read_movements)?;
            let workers = cli.workers.unwrap_or(DEFAULT_WORKER_COUNT);
            let alerts = pipeline::run_indirect(&direct, &edges, workers, progress)?;
            write::write_file(&output, |file| write::write_plot_alerts(file, &alerts))?;
        }
        Commands::Entity {
            plots,
            entities,
            mapping,
            output,
        } => {
            let plots = read::read_file(&plots, read::read_plot_alerts)?;
            let entities = read::read_file(&entities, read::read_entities)?;
            let mapping = read::read_file(&mapping, read::read_mapping)?;
            let workers = cli.workers.unwrap_or(DEFAULT_WORKER_COUNT);
            let aggregates = pipeline::run_entity(&plots, &entities, &mapping, workers, progress)?;
            write::write_file(&output, |file| {
                write::write_entity_aggregates(file, &aggregates)
            })?;
        }
        Commands::Pipeline {
            config,
            output_dir,
            id_column,
            deforested_class,
            backing,
        } => {
            let mut config = PipelineConfig::load(&config)?;
            config.apply(Overrides {
                worker_count: cli.workers,
                deforested_class,
                backing,
                output_dir,
                id_column,
            });
            let summary = pipeline::run_pipeline(&config, progress)?;
            println!(
                "{} plots: {} direct alerts, {} indirect alerts; {} of {} entities alerted",
                summary.plots,
                summary.direct_alerts,
                summary.indirect_alerts,
                summary.entity_alerts,
                summary.entities
            );
        }
        Commands::RasterInfo { raster } => {
            let mut reader = BufReader::new(File::open(&raster)?);
            let (header, data_offset) = codec::read_header(&mut reader)?;
            let t = header.transform;
            println!("{:<12} {}", "File", raster.display());
            println!("{:<12} {} x {}", "Size", header.width, header.height);
            println!("{:<12} {}", "Cell type", header.cell_type);
            println!(
                "{:<12} {}",
                "No data",
                header.nodata.map_or_else(|| "-".to_owned(), |v| v.to_string())
            );
            println!("{:<12} {}", "CRS", header.crs.as_deref().unwrap_or("-"));
            println!(
                "{:<12} [{}, {}, {}, {}, {}, {}]",
                "Transform", t.a, t.b, t.c, t.d, t.e, t.f
            );
            println!("{:<12} {} ha", "Cell area", t.pixel_area_ha());
            println!("{:<12} {data_offset}", "Data offset");
        }
    }

    Ok(())
}
