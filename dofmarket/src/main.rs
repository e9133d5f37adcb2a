// THEORY:
// A headless runner for the station. It drives the same display loop as the kiosk
// console, but with a still image (or a blank table) as the camera and no window:
// it picks the listed fruits one after another, waiting for the controls to come
// back between picks, logs every status line, and optionally writes the last
// annotated frame to disk. With `--simulate` it runs anywhere.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use image::{Rgb, RgbImage};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use dofmarket::core_modules::perception::{fps_text, FrameSink, FrameSource, PerceptionLoop};
use dofmarket::error::PerceptionError;
use dofmarket::{MarketConfig, Orchestrator, ShutdownPolicy};

#[derive(Parser, Debug)]
#[command(name = "dofmarket", about = "Run the fruit pick station without a display")]
struct Args {
    /// Configuration file (defaults to $DOFMARKET_CONFIG, then ./dofmarket.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Never open the arm; log commands instead
    #[arg(long)]
    simulate: bool,

    /// Still image used as the camera frame
    #[arg(long)]
    frame: Option<PathBuf>,

    /// Write the last annotated frame here
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Check out after the last pick
    #[arg(long)]
    checkout: bool,

    /// Fruits to pick, in order
    fruits: Vec<String>,
}

/// Serves the same image on every grab.
struct StillSource {
    image: RgbImage,
}

impl FrameSource for StillSource {
    type Frame = RgbImage;

    fn grab(&mut self) -> Result<RgbImage, PerceptionError> {
        Ok(self.image.clone())
    }
}

/// Keeps the last presented frame instead of showing it.
#[derive(Default)]
struct SnapshotSink {
    last: Option<RgbImage>,
    fps: f64,
}

impl FrameSink<RgbImage> for SnapshotSink {
    fn present(&mut self, frame: &RgbImage, fps: f64) {
        self.last = Some(frame.clone());
        self.fps = fps;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    // --- 1. Configuration ---
    let mut config = MarketConfig::load(args.config.as_deref()).context("loading configuration")?;
    if args.simulate {
        config.arm.simulate = true;
    }

    // --- 2. Station & Camera ---
    let mut station = Orchestrator::from_config(&config);
    let image = match &args.frame {
        Some(path) => image::open(path)
            .with_context(|| format!("opening frame {}", path.display()))?
            .to_rgb8(),
        None => RgbImage::from_pixel(config.camera.width, config.camera.height, Rgb([32, 32, 32])),
    };
    let mut perception = PerceptionLoop::new(StillSource { image }, None, config.perception);
    let mut sink = SnapshotSink::default();

    // --- 3. Display Loop ---
    let mut queue: VecDeque<String> = args.fruits.into_iter().collect();
    let mut ticker = tokio::time::interval(Duration::from_millis(config.perception.tick_ms.max(1)));
    let mut last_status = String::new();
    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut interrupted => {
                warn!("interrupted");
                break;
            }
        }

        perception.tick(Instant::now(), &mut sink);
        station.pump();

        let panel = station.panel();
        if panel.status != last_status {
            info!(status = %panel.status, cost = %panel.cost_text(), "panel");
            last_status = panel.status.clone();
        }

        if station.is_busy() {
            continue;
        }
        match queue.pop_front() {
            Some(fruit) => {
                if let Err(e) = station.on_pick_requested(&fruit) {
                    warn!(fruit, error = %e, "pick rejected");
                }
            }
            None => break,
        }
    }

    // --- 4. Checkout & Shutdown ---
    info!("{}", fps_text(sink.fps));
    if args.checkout {
        let total = station.checkout();
        info!("Thank you for your purchase! Total Amount: Rs {total}");
    }
    let total = station.shutdown(ShutdownPolicy::Wait).await;
    info!(total, "station stopped");

    if let (Some(path), Some(frame)) = (&args.snapshot, &sink.last) {
        frame
            .save(path)
            .with_context(|| format!("writing snapshot {}", path.display()))?;
        info!(path = %path.display(), "snapshot written");
    }
    Ok(())
}
