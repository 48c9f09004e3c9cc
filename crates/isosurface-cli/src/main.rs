//! Isosurface meshing command-line interface
//!
//! This CLI provides tools for:
//! - Meshing built-in distance fields with a sandboxed WebAssembly guest
//! - Writing the result as binary STL
//! - Comparing compiled and interpreted guest execution
//!
//! The guest is built separately from `crates/isosurface-guest` for
//! `wasm32-unknown-unknown` and passed with `--guest`.

mod stl;

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use isosurface_bridge::field::{Cuboid, Difference, Sphere, Torus};
use isosurface_bridge::{triangle_channel, DistanceField, ExecutionMode, Renderer, RendererConfig};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::stl::StlWriter;

#[derive(Parser)]
#[command(name = "isomesh")]
#[command(author, version, about = "Sandboxed isosurface meshing CLI", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Compiled meshing guest (.wasm or .wat)
    #[arg(short, long, default_value = "isosurface_guest.wasm", global = true)]
    guest: PathBuf,

    /// Renderer configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mesh a shape and write it as binary STL
    Render {
        /// Shape to mesh
        #[arg(short, long, value_enum, default_value = "box-minus-sphere")]
        shape: Shape,

        /// Output STL file
        #[arg(short, long, default_value = "mesh.stl")]
        output: PathBuf,

        /// Cells per axis (overrides the config file)
        #[arg(long)]
        cells: Option<u32>,

        /// Execution mode: compiled or interpreted (overrides the config file)
        #[arg(long)]
        mode: Option<ExecutionMode>,

        /// Triangles buffered between renderer and writer (0 = unbounded)
        #[arg(long, default_value = "1024")]
        buffer: usize,
    },

    /// Show the renderer configuration and the guest's exports
    Info {
        /// Execution mode: compiled or interpreted (overrides the config file)
        #[arg(long)]
        mode: Option<ExecutionMode>,
    },

    /// Time renders in both execution modes
    Bench {
        /// Shape to mesh
        #[arg(short, long, value_enum, default_value = "box-minus-sphere")]
        shape: Shape,

        /// Cells per axis (overrides the config file)
        #[arg(long)]
        cells: Option<u32>,

        /// Renders per mode
        #[arg(short = 'n', long, default_value = "5")]
        iterations: u32,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Built-in distance fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Shape {
    /// Unit cube with a sphere of radius 0.6 carved out
    BoxMinusSphere,
    /// Sphere of radius 1
    Sphere,
    /// Torus with radii 1 and 0.3
    Torus,
    /// Cube of side 1
    Cube,
}

impl Shape {
    fn field(self) -> Arc<dyn DistanceField> {
        match self {
            Shape::BoxMinusSphere => Arc::new(Difference::new(Cuboid::cube(0.5), Sphere::new(0.6))),
            Shape::Sphere => Arc::new(Sphere::new(1.0)),
            Shape::Torus => Arc::new(Torus::new(1.0, 0.3)),
            Shape::Cube => Arc::new(Cuboid::cube(0.5)),
        }
    }
}

/// Timing for one execution mode.
#[derive(Debug, Serialize)]
struct BenchResult {
    mode: ExecutionMode,
    iterations: u32,
    triangles: u64,
    load_ms: f64,
    mean_ms: f64,
    min_ms: f64,
    max_ms: f64,
}

fn load_config(path: Option<&Path>) -> Result<RendererConfig> {
    match path {
        Some(path) => RendererConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path)),
        None => Ok(RendererConfig::default()),
    }
}

fn build_renderer(guest: &Path, config: RendererConfig) -> Result<Renderer> {
    Renderer::from_file(config, guest).with_context(|| format!("Failed to load guest {:?}", guest))
}

fn cmd_render(
    guest: &Path,
    config: RendererConfig,
    shape: Shape,
    output: PathBuf,
    buffer: usize,
) -> Result<()> {
    let renderer = build_renderer(guest, config)?;
    info!("{}", renderer.info());
    info!("Meshing {:?} into {:?}", shape, output);

    let capacity = (buffer > 0).then_some(buffer);
    let (tx, rx) = triangle_channel(capacity);

    let file = File::create(&output).context("Failed to create output file")?;
    let title = format!("isomesh {:?} cells={}", shape, renderer.config().mesh_cells);
    let writer_thread = thread::spawn(move || -> Result<u32> {
        let mut writer = StlWriter::new(BufWriter::new(file), &title)?;
        for triangle in rx {
            writer.push(&triangle)?;
        }
        let count = writer.count();
        writer.finish()?;
        Ok(count)
    });

    let start = Instant::now();
    let rendered = renderer.render(shape.field(), tx);
    let elapsed = start.elapsed();

    let written = match writer_thread.join() {
        Ok(result) => result?,
        Err(_) => bail!("STL writer thread panicked"),
    };

    if let Err(e) = rendered {
        if let Err(rm) = std::fs::remove_file(&output) {
            warn!("Failed to remove incomplete output {:?}: {}", output, rm);
        }
        return Err(e).context("Render failed");
    }

    println!(
        "Rendered {} triangles in {:.3} ms -> {}",
        written,
        elapsed.as_secs_f64() * 1000.0,
        output.display()
    );
    Ok(())
}

fn cmd_info(guest: &Path, config: RendererConfig) -> Result<()> {
    let renderer = build_renderer(guest, config)?;
    let config = renderer.config();

    println!("{}", renderer.info());
    println!();
    println!("Guest:          {}", renderer.guest().name());
    println!("Exports:        {}", renderer.guest().exports().collect::<Vec<_>>().join(", "));
    println!("Mode:           {}", config.mode);
    println!("Mesh cells:     {}", config.mesh_cells);
    println!("Max memory:     {} MB", config.max_memory / (1024 * 1024));
    println!("AABB address:   {}", config.aabb_addr);
    if let Some(cache) = &config.cache_path {
        println!("Cache config:   {}", cache.display());
    }
    Ok(())
}

fn bench_mode(guest: &Path, config: RendererConfig, shape: Shape, iterations: u32) -> Result<BenchResult> {
    let mode = config.mode;
    let load_start = Instant::now();
    let renderer = build_renderer(guest, config)?;
    let load_ms = load_start.elapsed().as_secs_f64() * 1000.0;

    let field = shape.field();
    let mut times = Vec::with_capacity(iterations as usize);
    let mut triangles = 0;

    for i in 0..iterations {
        let (tx, rx) = triangle_channel(None);
        let drain = thread::spawn(move || rx.iter().count());

        let start = Instant::now();
        let stats = renderer
            .render(field.clone(), tx)
            .with_context(|| format!("{} render {} failed", mode, i))?;
        times.push(start.elapsed().as_secs_f64() * 1000.0);

        if drain.join().is_err() {
            bail!("drain thread panicked");
        }
        triangles = stats.triangles;
    }

    let mean_ms = times.iter().sum::<f64>() / times.len().max(1) as f64;
    let min_ms = times.iter().copied().fold(f64::INFINITY, f64::min);
    let max_ms = times.iter().copied().fold(0.0, f64::max);

    Ok(BenchResult {
        mode,
        iterations,
        triangles,
        load_ms,
        mean_ms,
        min_ms: if times.is_empty() { 0.0 } else { min_ms },
        max_ms,
    })
}

fn cmd_bench(guest: &Path, config: RendererConfig, shape: Shape, iterations: u32, json: bool) -> Result<()> {
    if iterations == 0 {
        bail!("iterations must be at least 1");
    }

    let mut results = Vec::new();
    for mode in [ExecutionMode::Compiled, ExecutionMode::Interpreted] {
        info!("Benchmarking {} mode", mode);
        results.push(bench_mode(guest, config.clone().mode(mode), shape, iterations)?);
    }

    if results[0].triangles != results[1].triangles {
        warn!(
            "Execution modes disagree: {} vs {} triangles",
            results[0].triangles, results[1].triangles
        );
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    println!("{:?} at {} cells, {} renders per mode", shape, config.mesh_cells, iterations);
    println!();
    println!(
        "{:<12} {:>10} {:>10} {:>10} {:>10} {:>10}",
        "mode", "triangles", "load ms", "mean ms", "min ms", "max ms"
    );
    for r in &results {
        println!(
            "{:<12} {:>10} {:>10.2} {:>10.2} {:>10.2} {:>10.2}",
            r.mode.to_string(),
            r.triangles,
            r.load_ms,
            r.mean_ms,
            r.min_ms,
            r.max_ms
        );
    }
    if results[0].mean_ms > 0.0 {
        println!();
        println!("Interpreted / compiled: {:.1}x", results[1].mean_ms / results[0].mean_ms);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG wins over -v
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Render {
            shape,
            output,
            cells,
            mode,
            buffer,
        } => {
            if let Some(cells) = cells {
                config = config.mesh_cells(cells);
            }
            if let Some(mode) = mode {
                config = config.mode(mode);
            }
            cmd_render(&cli.guest, config, shape, output, buffer)
        }

        Commands::Info { mode } => {
            if let Some(mode) = mode {
                config = config.mode(mode);
            }
            cmd_info(&cli.guest, config)
        }

        Commands::Bench {
            shape,
            cells,
            iterations,
            json,
        } => {
            if let Some(cells) = cells {
                config = config.mesh_cells(cells);
            }
            cmd_bench(&cli.guest, config, shape, iterations, json)
        }
    }
}
