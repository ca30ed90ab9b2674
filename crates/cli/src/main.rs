//! accuflow CLI - flow accumulation and overland flow routing

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use accuflow_algorithms::hydrology::{
    accumulation_functions_with_progress, channel_distance, AccumulationInputs,
    AccumulationParams, ChannelDistanceParams, Hydrograph, KinematicWave, KinematicWaveParams,
    NewtonSolver, Operation, Precipitation, PrecipitationDistribution, RoutingMethod,
    RoutingParams,
};
use accuflow_core::io::{read_geotiff, write_geotiff, GeoTiffOptions};
use accuflow_core::{Progress, Raster};

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "accuflow")]
#[command(author, version, about = "Flow accumulation and overland flow routing", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show information about a raster file
    Info {
        /// Input raster file
        input: PathBuf,
    },
    /// Route material downslope with an accumulation operation
    Accumulate {
        /// Elevation surface
        surface: PathBuf,
        /// Material injected per cell
        input: PathBuf,
        /// Output flux raster
        output: PathBuf,
        /// accumulate, capacity, fraction, threshold or trigger
        #[arg(short, long, default_value = "accumulate")]
        operation: Operation,
        /// Control raster (required unless accumulating)
        #[arg(long)]
        control: Option<PathBuf>,
        /// Retained state of a previous pass
        #[arg(long)]
        state_in: Option<PathBuf>,
        /// Output state raster
        #[arg(long)]
        state_out: Option<PathBuf>,
        /// Switch to D8 where the linear-flow control exceeds the threshold
        #[arg(long)]
        d8_switch: bool,
        /// Linear-flow threshold
        #[arg(long, default_value = "0.0")]
        threshold: f64,
        /// Raster compared against the threshold instead of the outgoing flux
        #[arg(long)]
        linear_control: Option<PathBuf>,
    },
    /// Kinematic-wave overland flow simulation
    Kinwave {
        /// Input DEM file
        dem: PathBuf,
        /// Output discharge raster after the last timestep
        output: PathBuf,
        /// Manning roughness
        #[arg(long, default_value = "0.03")]
        roughness: f64,
        /// Per-cell Manning roughness raster
        #[arg(long)]
        roughness_grid: Option<PathBuf>,
        /// Simulated time span [h]
        #[arg(long, default_value = "1.0")]
        time_span: f64,
        /// Timestep [min]
        #[arg(long, default_value = "1.0")]
        time_step: f64,
        /// Newton-Raphson iteration limit
        #[arg(long, default_value = "100")]
        max_iterations: usize,
        /// Newton-Raphson convergence threshold
        #[arg(long, default_value = "0.0001")]
        epsilon: f64,
        /// d8 or mfd
        #[arg(short, long, default_value = "d8")]
        routing: RoutingMethod,
        /// Initial precipitation [mm]
        #[arg(long, default_value = "10.0")]
        precipitation: f64,
        /// homogeneous, above or left-half
        #[arg(long, default_value = "homogeneous")]
        distribution: String,
        /// Elevation threshold for `--distribution above` (default: DEM mean)
        #[arg(long)]
        above: Option<f64>,
        /// Constant lateral inflow [mm/h]
        #[arg(long, default_value = "0.0")]
        rain_rate: f64,
        /// Duration of the lateral inflow [h]
        #[arg(long, default_value = "0.0")]
        rain_duration: f64,
        /// Gauge cells as "row,col;row,col;..." (default: border outlets)
        #[arg(long)]
        gauges: Option<String>,
        /// Tab-separated hydrograph output
        #[arg(long)]
        hydrograph: Option<PathBuf>,
    },
    /// Vertical and horizontal distance to a channel network
    ChannelDistance {
        /// Input DEM file
        dem: PathBuf,
        /// Channel raster (any cell with data is a channel)
        channels: PathBuf,
        /// Output vertical distance raster
        output: PathBuf,
        /// d8 or mfd
        #[arg(short, long, default_value = "d8")]
        method: RoutingMethod,
        /// Output horizontal distance raster
        #[arg(long)]
        horizontal: Option<PathBuf>,
        /// Output overland flow distance raster
        #[arg(long)]
        overland: Option<PathBuf>,
    },
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Setting default subscriber failed")
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Progress bar driven by a routing pass.
struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    fn new(msg: &str) -> Self {
        let bar = ProgressBar::new(0);
        if let Ok(style) =
            ProgressStyle::with_template("{msg} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
        {
            bar.set_style(style.progress_chars("=> "));
        }
        bar.set_message(msg.to_string());
        Self { bar }
    }

    fn finish(self) {
        self.bar.finish_and_clear();
    }
}

impl Progress for BarProgress {
    fn proceed(&mut self, done: usize, total: usize) -> bool {
        if self.bar.length() != Some(total as u64) {
            self.bar.set_length(total as u64);
        }
        if done % 1024 == 0 || done + 1 == total {
            self.bar.set_position(done as u64);
        }
        true
    }
}

fn read_raster(path: &Path) -> Result<Raster<f64>> {
    let pb = spinner("Reading raster...");
    let raster: Raster<f64> = read_geotiff(path)
        .with_context(|| format!("Failed to read raster {}", path.display()))?;
    pb.finish_and_clear();
    info!("Input: {} x {}", raster.cols(), raster.rows());
    Ok(raster)
}

fn read_optional(path: Option<&PathBuf>) -> Result<Option<Raster<f64>>> {
    path.map(|p| read_raster(p)).transpose()
}

fn write_result(raster: &Raster<f64>, path: &Path) -> Result<()> {
    let pb = spinner("Writing output...");
    write_geotiff(raster, path, Some(GeoTiffOptions::default()))
        .with_context(|| format!("Failed to write {}", path.display()))?;
    pb.finish_and_clear();
    Ok(())
}

fn done(name: &str, path: &Path, elapsed: std::time::Duration) {
    println!("{} saved to: {}", name, path.display());
    println!("  Processing time: {:.2?}", elapsed);
}

fn parse_cells(s: &str) -> Result<Vec<(usize, usize)>> {
    s.split(';')
        .map(|pair| {
            let parts: Vec<&str> = pair.trim().split(',').collect();
            if parts.len() != 2 {
                anyhow::bail!("Cell must be 'row,col', got: {}", pair);
            }
            let row: usize = parts[0].trim().parse().context("Invalid row")?;
            let col: usize = parts[1].trim().parse().context("Invalid col")?;
            Ok((row, col))
        })
        .collect()
}

fn parse_distribution(s: &str, above: Option<f64>, dem: &Raster<f64>) -> Result<PrecipitationDistribution> {
    match s.to_lowercase().as_str() {
        "homogeneous" | "h" => Ok(PrecipitationDistribution::Homogeneous),
        "above" | "above-elevation" => {
            let threshold = match above {
                Some(t) => t,
                None => dem
                    .statistics()
                    .mean
                    .context("DEM has no valid cells to take the mean of")?,
            };
            Ok(PrecipitationDistribution::AboveElevation(threshold))
        }
        "left-half" | "left" => Ok(PrecipitationDistribution::LeftHalf),
        _ => anyhow::bail!(
            "Unknown distribution: {}. Use homogeneous, above or left-half.",
            s
        ),
    }
}

fn write_hydrograph(hydrograph: &Hydrograph, path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut out = BufWriter::new(file);

    write!(out, "TIME")?;
    for i in 0..hydrograph.gauges.len() {
        write!(out, "\tGAUGE_{:02}", i + 1)?;
    }
    writeln!(out)?;

    for (time, flows) in &hydrograph.rows {
        write!(out, "{}", time)?;
        for q in flows {
            write!(out, "\t{}", q)?;
        }
        writeln!(out)?;
    }
    out.flush()?;
    Ok(())
}

// ─── Main ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match cli.command {
        // ── Info ─────────────────────────────────────────────────────
        Commands::Info { input } => {
            let raster = read_raster(&input)?;
            let (rows, cols) = raster.shape();
            let bounds = raster.bounds();
            let stats = raster.statistics();

            println!("{}", input.display());
            println!("  rows x cols : {} x {}", rows, cols);
            println!("  cell size   : {}", raster.cell_size());
            println!("  extent      : x {:.3}..{:.3}, y {:.3}..{:.3}", bounds.0, bounds.2, bounds.1, bounds.3);
            match raster.nodata() {
                Some(nd) => println!("  no-data     : {}", nd),
                None => println!("  no-data     : NaN only"),
            }
            if let (Some(min), Some(max), Some(mean)) = (stats.min, stats.max, stats.mean) {
                println!("  values      : {:.4}..{:.4}, mean {:.4}", min, max, mean);
            }
            println!("  valid cells : {} of {}", stats.valid_count, raster.len());
        }

        // ── Accumulation functions ───────────────────────────────────
        Commands::Accumulate {
            surface,
            input,
            output,
            operation,
            control,
            state_in,
            state_out,
            d8_switch,
            threshold,
            linear_control,
        } => {
            let dem = read_raster(&surface)?;
            let input_grid = read_raster(&input)?;
            let control = read_optional(control.as_ref())?;
            let state_in = read_optional(state_in.as_ref())?;
            let linear_control = read_optional(linear_control.as_ref())?;

            let inputs = AccumulationInputs {
                surface: &dem,
                input: &input_grid,
                state_in: state_in.as_ref(),
                control: control.as_ref(),
                linear_control: linear_control.as_ref(),
            };
            let params = AccumulationParams {
                operation,
                routing: RoutingParams {
                    use_d8_switch: d8_switch,
                    threshold_linear: threshold,
                },
            };

            let start = Instant::now();
            let mut progress = BarProgress::new("Routing");
            let result = accumulation_functions_with_progress(&inputs, params, &mut progress)
                .context("Failed to run accumulation functions")?;
            progress.finish();
            let elapsed = start.elapsed();

            info!(
                "Pit flux: {:.4}, outflow: {:.4}",
                result.summary.pit_flux, result.summary.outflow
            );
            write_result(&result.flux, &output)?;
            done("Flux", &output, elapsed);

            match (state_out, result.state.as_ref()) {
                (Some(path), Some(state)) => {
                    write_result(state, &path)?;
                    println!("State saved to: {}", path.display());
                }
                (Some(_), None) => {
                    eprintln!("No state produced by '{}'; --state-out ignored.", operation)
                }
                _ => {}
            }
        }

        // ── Kinematic wave ───────────────────────────────────────────
        Commands::Kinwave {
            dem,
            output,
            roughness,
            roughness_grid,
            time_span,
            time_step,
            max_iterations,
            epsilon,
            routing,
            precipitation,
            distribution,
            above,
            rain_rate,
            rain_duration,
            gauges,
            hydrograph,
        } => {
            let dem = read_raster(&dem)?;
            let roughness_grid = read_optional(roughness_grid.as_ref())?;
            let distribution = parse_distribution(&distribution, above, &dem)?;
            let gauges = gauges.as_deref().map(parse_cells).transpose()?;

            let params = KinematicWaveParams {
                roughness,
                roughness_grid,
                time_span,
                time_step,
                solver: NewtonSolver::new(max_iterations, epsilon),
                routing,
                precipitation: Precipitation {
                    depth_mm: precipitation,
                    distribution,
                },
                rain_rate,
                rain_duration,
                gauges,
            };

            let start = Instant::now();
            let mut sim =
                KinematicWave::new(&dem, params).context("Failed to initialise kinematic wave")?;
            for (i, &(row, col)) in sim.gauges().iter().enumerate() {
                let (x, y) = dem.cell_center(row, col);
                debug!("GAUGE_{:02} at ({}, {}) = ({:.3}, {:.3})", i + 1, row, col, x, y);
            }
            let mut progress = BarProgress::new("Simulating");
            let result = sim.run(&mut progress);
            progress.finish();
            let elapsed = start.elapsed();

            let s = &result.summary;
            println!("Flow balance after {} steps:", s.steps);
            println!("  initial : {:.6}", s.initial);
            println!("  in area : {:.6}", s.stored);
            println!("  outflow : {:.6}", s.outflow);
            println!("  loss    : {:.6} ({:.2}%)", s.loss(), s.balance_percent());
            if s.unconverged > 0 {
                warn!("{} Newton solves hit the iteration limit", s.unconverged);
            }

            write_result(&result.flow, &output)?;
            done("Discharge", &output, elapsed);

            if let Some(path) = hydrograph {
                write_hydrograph(&result.hydrograph, &path)?;
                println!(
                    "Hydrograph ({} gauges) saved to: {}",
                    result.hydrograph.gauges.len(),
                    path.display()
                );
            }
        }

        // ── Channel distance ─────────────────────────────────────────
        Commands::ChannelDistance {
            dem,
            channels,
            output,
            method,
            horizontal,
            overland,
        } => {
            let dem = read_raster(&dem)?;
            let channels = read_raster(&channels)?;

            let pb = spinner("Computing distances...");
            let start = Instant::now();
            let result = channel_distance(&dem, &channels, ChannelDistanceParams { method })
                .context("Failed to compute channel distance")?;
            let elapsed = start.elapsed();
            pb.finish_and_clear();

            write_result(&result.vertical, &output)?;
            done("Vertical distance", &output, elapsed);
            if let Some(path) = horizontal {
                write_result(&result.horizontal, &path)?;
                println!("Horizontal distance saved to: {}", path.display());
            }
            if let Some(path) = overland {
                write_result(&result.overland, &path)?;
                println!("Overland distance saved to: {}", path.display());
            }
        }
    }

    Ok(())
}
