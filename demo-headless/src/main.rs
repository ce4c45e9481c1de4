use avalanche_sim_core::{Simulation, SimulationConfig, SimulationError, StartZone, Terrain};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Avalanche simulation demo with configurable parameters
#[derive(Parser, Debug)]
#[command(name = "avalanche-demo")]
#[command(about = "Headless avalanche flow simulation", long_about = None)]
struct Args {
    /// Synthetic terrain (flat, ramp, hill); ignored when --dem is given
    #[arg(short, long, default_value = "hill")]
    terrain: String,

    /// ESRI ASCII elevation grid to load instead of a synthetic terrain
    #[arg(long)]
    dem: Option<PathBuf>,

    /// Synthetic terrain size in cells (square)
    #[arg(long, default_value_t = 256)]
    size: usize,

    /// Synthetic terrain cell size in meters
    #[arg(long, default_value_t = 2.0)]
    cell_size: f32,

    /// Number of particles to release
    #[arg(short, long, default_value_t = 10_000)]
    particles: usize,

    /// Number of timesteps to run
    #[arg(short, long, default_value_t = 600)]
    steps: u64,

    /// Report interval in steps
    #[arg(short, long, default_value_t = 50)]
    report_interval: u64,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Legacy `key value` settings file (used when --config is absent)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Override the random seed
    #[arg(long)]
    seed: Option<u64>,
}

fn build_terrain(args: &Args) -> Result<Terrain, SimulationError> {
    if let Some(path) = &args.dem {
        let text = std::fs::read_to_string(path).map_err(|e| SimulationError::Io(e.to_string()))?;
        return Terrain::from_ascii_grid(&text);
    }

    let n = args.size;
    let cs = args.cell_size;
    let extent = n as f32 * cs;
    match args.terrain.to_lowercase().as_str() {
        "flat" => Terrain::flat(n, n, cs),
        "ramp" => Terrain::ramp_x(n, n, cs, 0.4 * cs),
        "hill" => Terrain::single_hill(n, n, cs, 0.3 * extent, 0.25 * extent),
        other => {
            println!("Unknown terrain '{}', using hill", other);
            Terrain::single_hill(n, n, cs, 0.3 * extent, 0.25 * extent)
        }
    }
}

fn load_config(args: &Args) -> Result<SimulationConfig, SimulationError> {
    let mut config = if let Some(path) = &args.config {
        SimulationConfig::load(path)?
    } else if let Some(path) = &args.settings {
        let text = std::fs::read_to_string(path).map_err(|e| SimulationError::Io(e.to_string()))?;
        SimulationConfig::from_settings_text(&text)?
    } else {
        SimulationConfig::default()
    };

    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    Ok(config)
}

/// Release zone weighted toward high ground
fn elevation_zone(terrain: &Terrain) -> Result<StartZone, SimulationError> {
    const ZONE_SIZE: usize = 32;

    let probe = StartZone::uniform(ZONE_SIZE, ZONE_SIZE)?;
    let mut weights = Vec::with_capacity(ZONE_SIZE * ZONE_SIZE);
    for y in 0..ZONE_SIZE {
        for x in 0..ZONE_SIZE {
            let (col, row) = probe.terrain_cell(terrain, x, y);
            let interior = col > 0 && row > 0 && col < terrain.width() - 1 && row < terrain.depth() - 1;
            let weight = if interior { terrain.height(col, row) } else { 0.0 };
            weights.push(weight * weight);
        }
    }

    if weights.iter().all(|&w| w <= 0.0) {
        return Ok(probe);
    }
    StartZone::new(ZONE_SIZE, ZONE_SIZE, weights)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    println!("=== Avalanche Simulation Demo ===\n");

    let terrain = build_terrain(&args)?;
    let config = load_config(&args)?;
    println!(
        "Terrain: {}x{} cells at {:.1}m, max height {:.1}m",
        terrain.width(),
        terrain.depth(),
        terrain.cell_size(),
        terrain.max_height()
    );
    println!(
        "Config: dt={:.4}s, restitution={:.2}, clumping={:.3}, viscosity={:.3}, grid={}",
        config.timestep, config.restitution, config.clumping, config.viscosity, config.grid_resolution
    );

    let zone = elevation_zone(&terrain)?;
    let mut sim = Simulation::from_startzone(terrain, &zone, args.particles, config)?;
    info!("Released {} particles", sim.particle_count());

    println!("\n{:>6} {:>8} {:>9} {:>9} {:>10}", "step", "free", "collided", "outside", "max speed");
    let interval = args.report_interval.max(1);
    let mut last = None;
    for _ in 0..args.steps {
        let Some(summary) = sim.step() else {
            println!("Step ceiling reached");
            break;
        };
        if summary.step % interval == 0 {
            println!(
                "{:>6} {:>8} {:>9} {:>9} {:>10.2}",
                summary.step, summary.free, summary.collided, summary.out_of_domain, summary.max_speed
            );
        }
        last = Some(summary);
    }

    println!("\n=== Final State ===");
    println!("Steps run: {}", sim.current_step());
    if let Some(summary) = last {
        println!(
            "Active particles: {} of {} ({} left the domain)",
            summary.active(),
            sim.particle_count(),
            summary.out_of_domain
        );
    }
    println!("Peak flow accumulation: {:.1}", sim.flow_map().max_value());

    Ok(())
}
