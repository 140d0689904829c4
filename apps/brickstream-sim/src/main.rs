//! Brickstream frame simulator
//!
//! Builds (or loads) a synthetic volume octree, wraps it in a brick cache
//! and runs frames through the render state machine and the CPU reference
//! traversal, printing what every frame uploaded.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p brickstream-sim -- [OPTIONS]
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod args;

use std::path::Path;
use std::time::Instant;

use anyhow::Context;
use brickstream_cache::{BrickCache, CacheConfig, PoolCapacity, UploadBudget};
use brickstream_octree::{Octree, RamBrickStore, VolumeConfig, VolumeGenerator};
use brickstream_render::{Camera, FrameController, FrameInput, RenderConfig};
use glam::{UVec2, Vec3};
use tracing_subscriber::EnvFilter;

use crate::args::SimArgs;

const VIEWPORT: UVec2 = UVec2::new(256, 192);

fn main() -> anyhow::Result<()> {
    let Some(args) = SimArgs::from_args()? else {
        args::print_help();
        return Ok(());
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let (octree, store) = load_or_generate(&args)?;
    tracing::info!(
        octree = %octree.id(),
        nodes = octree.node_count(),
        bricks = octree.brick_count(),
        levels = octree.num_levels(),
        channels = octree.num_channels(),
        "Volume ready"
    );

    if let Some(path) = &args.save {
        save(&octree, &store, path)?;
    }

    let mut cache = BrickCache::new(&octree, cache_config(&args))
        .context("Failed to allocate brick cache")?;
    let mut controller = FrameController::new(RenderConfig::default());
    let mut input = FrameInput {
        interacting: false,
        viewport: VIEWPORT,
        camera: Camera::default(),
    };

    let start = Instant::now();
    for frame in 0..args.frames {
        input.interacting = frame < args.interact_frames;
        if input.interacting {
            // Orbit while interacting.
            #[allow(clippy::cast_precision_loss)]
            let angle = frame as f32 * 0.05;
            input.camera.position =
                Vec3::new(0.5 + 2.0 * angle.sin(), 0.5, 0.5 + 2.0 * angle.cos());
        }

        let outcome = controller.begin_frame(&mut cache, &octree, &store, &input)?;
        let stats = cache.stats();
        let report = outcome.report.as_ref();
        println!(
            "frame {:>4} {:<16} depth {} keep {:<4} +{:<4} -{:<4} deferred {:<4} failed {:<3} pool {}/{}",
            outcome.frame,
            format!("{:?}", outcome.plan.state),
            outcome.node_depth,
            outcome.keep_level.map_or_else(|| "-".to_string(), |l| l.to_string()),
            outcome.admitted(),
            report.map_or(0, |r| r.evicted),
            report.map_or(0, |r| r.deferred),
            report.map_or(0, |r| r.failures.len()),
            stats.occupied,
            stats.capacity,
        );

        if controller.is_finished() && !input.interacting {
            tracing::info!(
                frames = frame + 1,
                elapsed_ms = start.elapsed().as_millis(),
                refinement_ms = controller.refinement_time().map(|t| t.as_millis()),
                "Finished"
            );
            break;
        }
    }

    cache.validate(&octree).context("Cache invariants broken")?;
    Ok(())
}

fn load_or_generate(args: &SimArgs) -> anyhow::Result<(Octree, RamBrickStore)> {
    if let Some(path) = &args.load {
        let octree = Octree::load(path.join("octree.bin"))
            .with_context(|| format!("Failed to load octree from {}", path.display()))?;
        let store = RamBrickStore::load(path.join("bricks.bin"))
            .with_context(|| format!("Failed to load bricks from {}", path.display()))?;
        return Ok((octree, store));
    }

    let generator = VolumeGenerator::new(VolumeConfig {
        seed: args.seed,
        levels: args.depth,
        channels: args.channels,
        brick_dim: args.brick_dim,
        ..VolumeConfig::default()
    });
    let start = Instant::now();
    let volume = generator.generate().context("Failed to generate volume")?;
    tracing::info!(elapsed_ms = start.elapsed().as_millis(), "Generated volume");
    Ok(volume)
}

fn save(octree: &Octree, store: &RamBrickStore, path: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    octree.save(path.join("octree.bin")).context("Failed to save octree")?;
    store.save(path.join("bricks.bin")).context("Failed to save bricks")?;
    tracing::info!(path = %path.display(), "Saved volume");
    Ok(())
}

fn cache_config(args: &SimArgs) -> CacheConfig {
    let pool = match (args.pool_slots, args.pool_mb) {
        (Some(slots), _) => PoolCapacity::Slots(slots),
        (None, Some(mb)) => PoolCapacity::Bytes(mb << 20),
        (None, None) => CacheConfig::default().pool,
    };
    let defaults = UploadBudget::default();
    CacheConfig {
        pool,
        upload: UploadBudget {
            max_bytes: args.budget_mb.map(|mb| mb << 20).or(defaults.max_bytes),
            time_limit: args
                .time_limit_ms
                .map(std::time::Duration::from_millis)
                .or(defaults.time_limit),
        },
    }
}
