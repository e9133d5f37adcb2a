// THEORY:
// The kiosk window. It is immediate-mode: every tick the display loop hands it a
// fresh copy of the panel state, and `present` paints that state over the annotated
// camera frame before showing it. Nothing here is written by the motion worker.
//
// Layout, top to bottom: status line, running cost, FPS, a transient notice (e.g.
// the busy warning), then the pick captions with their keys and the fixed controls.

use std::time::{Duration, Instant};

use anyhow::Result;
use opencv::{
    core::{Mat, Point, Scalar},
    highgui, imgproc,
    prelude::*,
};
use tracing::warn;

use dofmarket::PanelState;
use dofmarket::core_modules::perception::{fps_text, FrameSink};
use dofmarket::core_modules::station::PickCommand;

use crate::camera::CameraFrame;

pub const WINDOW: &str = "DofMarket";

const NOTICE_TTL: Duration = Duration::from_secs(2);
const LINE_HEIGHT: i32 = 24;

fn white() -> Scalar {
    Scalar::new(255.0, 255.0, 255.0, 0.0)
}

fn amber() -> Scalar {
    Scalar::new(0.0, 191.0, 255.0, 0.0)
}

fn grey() -> Scalar {
    Scalar::new(128.0, 128.0, 128.0, 0.0)
}

pub struct KioskWindow {
    panel: PanelState,
    commands: Vec<PickCommand>,
    notice: Option<(String, Instant)>,
}

impl KioskWindow {
    pub fn open(commands: Vec<PickCommand>) -> Result<Self> {
        highgui::named_window(WINDOW, highgui::WINDOW_AUTOSIZE)?;
        Ok(Self {
            panel: PanelState::default(),
            commands,
            notice: None,
        })
    }

    pub fn update(&mut self, panel: &PanelState) {
        self.panel.clone_from(panel);
    }

    /// Shows `text` for a couple of seconds.
    pub fn notify(&mut self, text: impl Into<String>) {
        self.notice = Some((text.into(), Instant::now()));
    }

    fn paint(&mut self, frame: &mut Mat, fps: f64) -> opencv::Result<()> {
        let mut y = LINE_HEIGHT;
        let mut line = |frame: &mut Mat, text: &str, color: Scalar| -> opencv::Result<()> {
            imgproc::put_text(
                frame,
                text,
                Point::new(10, y),
                imgproc::FONT_HERSHEY_SIMPLEX,
                0.6,
                color,
                2,
                imgproc::LINE_8,
                false,
            )?;
            y += LINE_HEIGHT;
            Ok(())
        };

        line(frame, &format!("Status: {}", self.panel.status), white())?;
        line(frame, &self.panel.cost_text(), white())?;
        line(frame, &fps_text(fps), white())?;

        if let Some((text, since)) = &self.notice {
            if since.elapsed() < NOTICE_TTL {
                line(frame, text, amber())?;
            }
        }
        if self.notice.as_ref().is_some_and(|(_, since)| since.elapsed() >= NOTICE_TTL) {
            self.notice = None;
        }

        let control = if self.panel.controls_enabled { white() } else { grey() };
        for command in &self.commands {
            line(frame, &format!("[{}] {}", command.key, command.caption), control)?;
        }
        line(frame, "[r] Reset Cost  [f] Finish  [q] Exit", white())
    }
}

impl FrameSink<CameraFrame> for KioskWindow {
    fn present(&mut self, frame: &CameraFrame, fps: f64) {
        let mut canvas = frame.0.clone();
        if let Err(e) = self.paint(&mut canvas, fps).and_then(|_| highgui::imshow(WINDOW, &canvas)) {
            warn!(error = %e, "failed to present frame");
        }
    }
}

/// Replaces the camera view once the customer has finished.
pub fn show_checkout(total: u32) -> Result<()> {
    let mut screen = Mat::new_rows_cols_with_default(480, 640, opencv::core::CV_8UC3, Scalar::all(0.0))?;
    for (i, text) in [
        "Thank you for your purchase!".to_string(),
        format!("Total Amount: Rs {total}"),
        "[q] Exit".to_string(),
    ]
    .iter()
    .enumerate()
    {
        imgproc::put_text(
            &mut screen,
            text,
            Point::new(60, 200 + i as i32 * 48),
            imgproc::FONT_HERSHEY_SIMPLEX,
            1.0,
            white(),
            2,
            imgproc::LINE_8,
            false,
        )?;
    }
    highgui::imshow(WINDOW, &screen)?;
    Ok(())
}
