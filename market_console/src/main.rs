// THEORY:
// The kiosk front end. It owns the camera, the detector and the window, and runs the
// display loop on the main thread: one perception tick, then the station's pending
// events, then the keyboard. Picks are forwarded to the `Orchestrator`, which runs
// the arm on a worker and never blocks this loop.
//
// Keys: `1`..`9` pick the matching station, `r` resets the cost, `f` finishes the
// session and shows the checkout screen, `q` or Esc exits.

mod camera;
mod detector;
mod display;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use opencv::highgui;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use dofmarket::core_modules::perception::{Detector, PerceptionLoop};
use dofmarket::error::PickError;
use dofmarket::{MarketConfig, Orchestrator, ShutdownPolicy};

use camera::{Camera, CameraFrame};
use detector::YoloDetector;
use display::KioskWindow;

const KEY_ESC: i32 = 27;

#[derive(Parser, Debug)]
#[command(name = "market_console", about = "DofMarket fruit kiosk")]
struct Args {
    /// Configuration file (defaults to $DOFMARKET_CONFIG, then ./dofmarket.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Never open the arm; log commands instead
    #[arg(long)]
    simulate: bool,

    /// Camera index, overriding the configuration
    #[arg(long)]
    camera: Option<i32>,

    /// Run without the detector
    #[arg(long)]
    no_detector: bool,
}

enum Action {
    Pick(usize),
    Reset,
    Finish,
    Exit,
    None,
}

fn action_for(key: i32, keys: &[char]) -> Action {
    let Some(c) = u32::try_from(key).ok().and_then(char::from_u32) else {
        return Action::None;
    };
    if key == KEY_ESC || c == 'q' {
        return Action::Exit;
    }
    match c {
        'r' => Action::Reset,
        'f' => Action::Finish,
        _ => keys
            .iter()
            .position(|k| *k == c)
            .map_or(Action::None, Action::Pick),
    }
}

fn load_detector(config: &MarketConfig, disabled: bool) -> Option<Box<dyn Detector<CameraFrame>>> {
    if disabled {
        return None;
    }
    let path = config.detector.model_path.as_ref()?;
    match YoloDetector::load(path, &config.detector) {
        Ok(detector) => Some(Box::new(detector)),
        Err(e) => {
            warn!(error = %e, "continuing with raw video");
            None
        }
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
    if let Some(index) = args.camera {
        config.camera.index = index;
    }

    // --- 2. Devices ---
    // The camera is the one device the kiosk cannot run without.
    let camera = Camera::open(&config.camera)?;
    let detector = load_detector(&config, args.no_detector);
    let mut perception = PerceptionLoop::new(camera, detector, config.perception);

    let mut station = Orchestrator::from_config(&config);
    if station.is_simulated() {
        info!("arm is simulated");
    }
    let commands = station.commands();
    let keys: Vec<char> = commands.iter().map(|c| c.key).collect();
    let mut window = KioskWindow::open(commands.clone())?;

    // --- 3. Display Loop ---
    let tick = Duration::from_millis(config.perception.tick_ms.max(1));
    let mut finished = false;
    loop {
        let started = Instant::now();
        station.pump();
        window.update(station.panel());
        perception.tick(started, &mut window);

        let wait_ms = tick.saturating_sub(started.elapsed()).as_millis().max(1) as i32;
        match action_for(highgui::wait_key(wait_ms)?, &keys) {
            Action::Pick(i) => match station.dispatch(&commands[i]) {
                Ok(()) => {}
                Err(PickError::BusyRejection) => window.notify(PickError::BusyRejection.to_string()),
                Err(e) => warn!(error = %e, "pick rejected"),
            },
            Action::Reset => station.reset(),
            Action::Finish => {
                finished = true;
                break;
            }
            Action::Exit => break,
            Action::None => {}
        }
    }

    // --- 4. Checkout ---
    // Release the camera before the checkout screen.
    drop(perception);
    if finished {
        let total = station.checkout();
        display::show_checkout(total)?;
        while !matches!(action_for(highgui::wait_key(50)?, &keys), Action::Exit) {
            station.pump();
        }
    }

    // --- 5. Shutdown ---
    let total = station.shutdown(ShutdownPolicy::Wait).await;
    info!(total, "kiosk closed");
    highgui::destroy_all_windows()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_map_to_actions() {
        let keys = ['1', '2', '3'];
        assert!(matches!(action_for('2' as i32, &keys), Action::Pick(1)));
        assert!(matches!(action_for('r' as i32, &keys), Action::Reset));
        assert!(matches!(action_for('f' as i32, &keys), Action::Finish));
        assert!(matches!(action_for(KEY_ESC, &keys), Action::Exit));
        assert!(matches!(action_for('9' as i32, &keys), Action::None));
        assert!(matches!(action_for(-1, &keys), Action::None));
    }
}
