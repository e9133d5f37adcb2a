// THEORY:
// The console's binding of the perception boundary to OpenCV. `CameraFrame` wraps a
// BGR `Mat` so the library's `Canvas` trait can be implemented for it here, and
// `Camera` owns the capture device for as long as the display loop runs. Dropping the
// camera releases the device.

use anyhow::{bail, Context, Result};
use opencv::{
    core::{Mat, Point, Rect, Scalar},
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture},
};
use tracing::{info, warn};

use dofmarket::config::CameraSettings;
use dofmarket::core_modules::perception::{Canvas, DetectionBox, FrameSource};
use dofmarket::error::PerceptionError;

/// One BGR frame from the camera.
pub struct CameraFrame(pub Mat);

impl Canvas for CameraFrame {
    fn draw_detection(&mut self, detection: &DetectionBox) {
        let green = Scalar::new(0.0, 255.0, 0.0, 0.0);
        let b = detection.bbox;
        let rect = Rect::new(b.x1, b.y1, b.width(), b.height());
        let drawn = imgproc::rectangle(&mut self.0, rect, green, 2, imgproc::LINE_8, 0).and_then(|_| {
            imgproc::put_text(
                &mut self.0,
                &detection.caption(),
                Point::new(b.x1, b.y1 - 10),
                imgproc::FONT_HERSHEY_SIMPLEX,
                0.6,
                green,
                2,
                imgproc::LINE_8,
                false,
            )
        });
        if let Err(e) = drawn {
            warn!(error = %e, "failed to draw detection");
        }
    }
}

pub struct Camera {
    capture: VideoCapture,
}

impl Camera {
    /// Opens the capture device. Failing to open it at all is fatal.
    pub fn open(settings: &CameraSettings) -> Result<Self> {
        let mut capture = VideoCapture::new(settings.index, videoio::CAP_ANY)
            .with_context(|| format!("opening camera {}", settings.index))?;
        if !capture.is_opened()? {
            bail!("could not open camera {}", settings.index);
        }

        // Not every driver honours every property; a refusal is not fatal.
        for (prop, value) in [
            (videoio::CAP_PROP_FRAME_WIDTH, f64::from(settings.width)),
            (videoio::CAP_PROP_FRAME_HEIGHT, f64::from(settings.height)),
            (videoio::CAP_PROP_BRIGHTNESS, settings.brightness),
            (videoio::CAP_PROP_EXPOSURE, settings.exposure),
            (videoio::CAP_PROP_CONTRAST, settings.contrast),
        ] {
            if !capture.set(prop, value).unwrap_or(false) {
                warn!(prop, value, "camera ignored property");
            }
        }
        info!(index = settings.index, width = settings.width, height = settings.height, "camera opened");
        Ok(Self { capture })
    }
}

impl FrameSource for Camera {
    type Frame = CameraFrame;

    fn grab(&mut self) -> std::result::Result<CameraFrame, PerceptionError> {
        let mut frame = Mat::default();
        match self.capture.read(&mut frame) {
            Ok(true) if !frame.empty() => Ok(CameraFrame(frame)),
            Ok(_) => Err(PerceptionError::FrameUnavailable("empty frame".into())),
            Err(e) => Err(PerceptionError::FrameUnavailable(e.to_string())),
        }
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        if let Err(e) = self.capture.release() {
            warn!(error = %e, "failed to release camera");
        }
    }
}
