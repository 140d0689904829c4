//! Command-line options.

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context};

#[derive(Debug, Clone)]
pub struct SimArgs {
    pub depth: u8,
    pub channels: u8,
    pub brick_dim: u32,
    pub pool_slots: Option<usize>,
    pub pool_mb: Option<u64>,
    pub budget_mb: Option<u64>,
    pub time_limit_ms: Option<u64>,
    pub frames: u32,
    pub interact_frames: u32,
    pub seed: u32,
    pub save: Option<PathBuf>,
    pub load: Option<PathBuf>,
}

impl Default for SimArgs {
    fn default() -> Self {
        Self {
            depth: 5,
            channels: 1,
            brick_dim: 16,
            pool_slots: None,
            pool_mb: None,
            budget_mb: None,
            time_limit_ms: None,
            frames: 200,
            interact_frames: 0,
            seed: 42,
            save: None,
            load: None,
        }
    }
}

impl SimArgs {
    /// Parse the process arguments. `None` means help was requested.
    pub fn from_args() -> anyhow::Result<Option<Self>> {
        Self::parse(std::env::args().skip(1))
    }

    fn parse(args: impl IntoIterator<Item = String>) -> anyhow::Result<Option<Self>> {
        let mut parsed = Self::default();
        let mut args = args.into_iter();
        while let Some(flag) = args.next() {
            let mut value = || {
                args.next()
                    .ok_or_else(|| anyhow!("Missing value for {flag}"))
            };
            match flag.as_str() {
                "-h" | "--help" => return Ok(None),
                "--depth" => parsed.depth = number(&flag, &value()?)?,
                "--channels" => parsed.channels = number(&flag, &value()?)?,
                "--brick-dim" => parsed.brick_dim = number(&flag, &value()?)?,
                "--pool-slots" => parsed.pool_slots = Some(number(&flag, &value()?)?),
                "--pool-mb" => parsed.pool_mb = Some(number(&flag, &value()?)?),
                "--budget-mb" => parsed.budget_mb = Some(number(&flag, &value()?)?),
                "--time-limit-ms" => parsed.time_limit_ms = Some(number(&flag, &value()?)?),
                "--frames" => parsed.frames = number(&flag, &value()?)?,
                "--interact-frames" => parsed.interact_frames = number(&flag, &value()?)?,
                "--seed" => parsed.seed = number(&flag, &value()?)?,
                "--save" => parsed.save = Some(PathBuf::from(value()?)),
                "--load" => parsed.load = Some(PathBuf::from(value()?)),
                other => bail!("Unknown option {other}, see --help"),
            }
        }
        Ok(Some(parsed))
    }
}

fn number<T>(flag: &str, value: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("Invalid value {value:?} for {flag}"))
}

pub fn print_help() {
    eprintln!(
        "Brickstream frame simulator

USAGE:
    cargo run -p brickstream-sim -- [OPTIONS]

VOLUME OPTIONS:
    --depth <N>             Octree levels, root included (default: 5)
    --channels <N>          Channels per sample, 1-4 (default: 1)
    --brick-dim <N>         Brick edge length in samples (default: 16)
    --seed <N>              Noise seed (default: 42)
    --save <DIR>            Write the generated volume to DIR
    --load <DIR>            Read a volume written by --save instead of generating

CACHE OPTIONS:
    --pool-slots <N>        Brick pool size in slots
    --pool-mb <N>           Brick pool size in MiB (default: 512)
    --budget-mb <N>         Upload budget per frame in MiB (default: 32)
    --time-limit-ms <N>     Upload time limit per frame (default: 250)

FRAME OPTIONS:
    --frames <N>            Frames to run at most (default: 200)
    --interact-frames <N>   Orbit the camera for the first N frames (default: 0)

OTHER:
    -h, --help              Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)"
    );
}
