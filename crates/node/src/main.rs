mod cluster;
mod config;
mod events;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use cluster::Cluster;
use config::NodeConfig;
use framesync::game::{Arena, registry};
use framesync::{ReplayStack, ReplayValidator};

/// Frames a late joiner needs to be admitted before the run ends.
const JOIN_MARGIN: u32 = 60;
const MAX_IDLE_ROUNDS: u32 = 1_000;

#[derive(Parser)]
#[command(name = "framesync-node")]
#[command(about = "Lockstep room runner and replay checker")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a room of loopback peers and check they stay in sync
    Simulate {
        #[arg(short, long, help = "JSON node config, flags override it")]
        config: Option<PathBuf>,

        #[arg(short, long)]
        peers: Option<u32>,

        #[arg(short, long)]
        frames: Option<u32>,

        #[arg(short, long)]
        seed: Option<u32>,

        #[arg(long, num_args = 2, value_names = ["PLAYER", "FRAME"])]
        leave: Option<Vec<u32>>,

        #[arg(long, help = "Pace rounds at the tick rate instead of running flat out")]
        realtime: bool,

        #[arg(short, long, help = "Write the host recording here")]
        out: Option<PathBuf>,
    },
    /// Re-run a recording and compare state hashes
    Validate {
        replay: PathBuf,

        #[arg(long, help = "Start from the snapshot closest to this frame")]
        from: Option<u32>,

        #[arg(long)]
        to: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match args.command {
        Command::Simulate {
            config,
            peers,
            frames,
            seed,
            leave,
            realtime,
            out,
        } => {
            let mut node = match config {
                Some(path) => NodeConfig::load(&path)?,
                None => NodeConfig::default(),
            };
            node.peers = peers.unwrap_or(node.peers);
            node.frames = frames.unwrap_or(node.frames);
            node.seed = seed.unwrap_or(node.seed);
            if let Some([player, frame]) = leave.as_deref() {
                node.leave = Some((*player, *frame));
            }
            simulate(node, realtime, out).await
        }
        Command::Validate { replay, from, to } => validate(replay, from, to),
    }
}

async fn simulate(config: NodeConfig, realtime: bool, out: Option<PathBuf>) -> Result<()> {
    let last_join = config.peers.saturating_sub(1) * config.join_every;
    if config.frames < last_join + JOIN_MARGIN {
        bail!(
            "{} frames is too short for {} peers joining every {} frames",
            config.frames,
            config.peers,
            config.join_every
        );
    }
    let frames = config.frames;
    let tick = Duration::from_secs_f64(1.0 / f64::from(config.session.tick_rate.max(1)));
    let mut cluster = Cluster::new(config, Arc::new(registry()?));
    cluster.start()?;

    let mut interval = tokio::time::interval(tick);
    let mut last_reported = 0;
    let mut idle_rounds = 0;
    while !cluster.settled(frames) {
        if realtime {
            interval.tick().await;
        }
        let before = cluster.frame();
        cluster.tick_once(frames)?;
        for event in cluster.drain_events() {
            event.log();
        }
        let frame = cluster.frame();
        idle_rounds = if frame == before { idle_rounds + 1 } else { 0 };
        if idle_rounds > MAX_IDLE_ROUNDS {
            bail!("peers stuck at frame {frame} short of {frames}");
        }
        if frame >= last_reported + 100 {
            log::info!("frame {frame}");
            last_reported = frame;
        }
    }

    let hashes = cluster.hashes()?;
    for (player, hash) in &hashes {
        log::info!("peer {player} hash at frame {frames}: {hash}");
    }
    let mut distinct: Vec<&String> = hashes.values().collect();
    distinct.dedup();
    if distinct.len() > 1 {
        bail!("peers diverged at frame {frames}");
    }
    log::info!("{} peers agree at frame {frames}", hashes.len());

    if let Some(path) = out {
        let recording = cluster
            .take_recording()
            .context("host did not keep a recording")?;
        recording.save(&path)?;
        log::info!(
            "recording of {} frames written to {}",
            recording.end_frame(),
            path.display()
        );
    }
    Ok(())
}

fn validate(path: PathBuf, from: Option<u32>, to: Option<u32>) -> Result<()> {
    let stack = ReplayStack::load(&path)
        .with_context(|| format!("loading replay {}", path.display()))?;
    let end = to.unwrap_or(stack.end_frame());
    let mut validator = ReplayValidator::new(
        stack,
        Arc::new(registry()?),
        Arc::new(Arena::default()),
    );

    let reached = match from {
        Some(start) => {
            let loaded = validator.load_closest_frame(start)?;
            log::info!("loaded snapshot at frame {loaded}");
            validator.run_to(end)?
        }
        None if to.is_some() => validator.seek(end)?,
        None => validator.validate_all()?,
    };
    log::info!(
        "replay consistent through frame {reached}, {} hashes checked",
        validator.checked()
    );
    Ok(())
}
