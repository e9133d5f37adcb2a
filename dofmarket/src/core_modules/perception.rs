// THEORY:
// The `PerceptionLoop` keeps the customer's view of the table alive. It runs one small
// step per display tick: grab a frame, occasionally ask the detector what is on the
// table, draw whatever the detector said last time, and hand the frame to the display.
//
// Key architectural principles:
// 1.  **Sparse Inference**: Detection is far more expensive than a tick. It runs on
//     one frame out of every `skip_interval`; the frames in between reuse the last
//     result, so the video stays smooth regardless of detector cost.
// 2.  **Wholesale Replacement**: A new inference result replaces the persisted list
//     entirely. Boxes are never merged across inference passes.
// 3.  **Graceful Degradation**: A failed grab skips the tick. A missing detector, or
//     an inference error, yields an empty list. Nothing here stops the loop.
// 4.  **Backend Agnostic**: Frames, detectors, drawing and the display are traits.
//     The console binds them to OpenCV; the library ships an `image` buffer canvas.

use std::time::Instant;

use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::PerceptionError;

/// Pixel-space rectangle, corners inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }
}

/// One detected object.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionBox {
    pub bbox: BoundingBox,
    pub label: String,
    /// Detector confidence in `[0, 1]`.
    pub confidence: f32,
}

impl DetectionBox {
    pub fn new(bbox: BoundingBox, label: impl Into<String>, confidence: f32) -> Self {
        Self {
            bbox,
            label: label.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// Overlay text, e.g. "apple 0.87".
    pub fn caption(&self) -> String {
        format!("{} {:.2}", self.label, self.confidence)
    }
}

/// Produces one frame per call.
pub trait FrameSource {
    type Frame;
    fn grab(&mut self) -> Result<Self::Frame, PerceptionError>;
}

/// Finds objects in a frame.
pub trait Detector<F> {
    fn detect(&mut self, frame: &F, min_confidence: f32) -> Result<Vec<DetectionBox>, PerceptionError>;
}

/// A frame that overlays can be drawn onto.
pub trait Canvas {
    fn draw_detection(&mut self, detection: &DetectionBox);
}

/// The display boundary for annotated frames.
pub trait FrameSink<F> {
    fn present(&mut self, frame: &F, fps: f64);
}

/// Tunables of the perception loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerceptionSettings {
    /// Run inference on one frame out of this many.
    pub skip_interval: u64,
    /// Minimum detector confidence to keep a box.
    pub confidence: f32,
    /// Period of the display tick, in milliseconds.
    pub tick_ms: u64,
}

impl Default for PerceptionSettings {
    fn default() -> Self {
        Self {
            skip_interval: 30,
            confidence: 0.2,
            tick_ms: 10,
        }
    }
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// No frame was available; nothing was drawn or presented.
    Skipped,
    Rendered {
        /// Index of the frame among all acquired frames, starting at 0.
        frame_index: u64,
        /// Whether inference ran on this frame.
        inferred: bool,
        fps: f64,
    },
}

/// Periodic acquisition, sparse detection, persisted overlay and FPS accounting.
pub struct PerceptionLoop<S: FrameSource> {
    source: S,
    detector: Option<Box<dyn Detector<S::Frame>>>,
    settings: PerceptionSettings,
    frame_count: u64,
    detections: Vec<DetectionBox>,
    last_frame_at: Option<Instant>,
    fps: f64,
}

impl<S> PerceptionLoop<S>
where
    S: FrameSource,
    S::Frame: Canvas,
{
    pub fn new(
        source: S,
        detector: Option<Box<dyn Detector<S::Frame>>>,
        settings: PerceptionSettings,
    ) -> Self {
        if detector.is_none() {
            warn!("no detector bound, showing raw video");
        }
        Self {
            source,
            detector,
            settings: PerceptionSettings {
                skip_interval: settings.skip_interval.max(1),
                ..settings
            },
            frame_count: 0,
            detections: Vec::new(),
            last_frame_at: None,
            fps: 0.0,
        }
    }

    /// One step of the loop, timestamped with `now`.
    pub fn tick(&mut self, now: Instant, sink: &mut impl FrameSink<S::Frame>) -> TickOutcome {
        let mut frame = match self.source.grab() {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "skipping tick");
                return TickOutcome::Skipped;
            }
        };

        let frame_index = self.frame_count;
        let inferred = frame_index % self.settings.skip_interval == 0;
        if inferred {
            self.detections = self.infer(&frame);
        }
        for detection in &self.detections {
            frame.draw_detection(detection);
        }
        self.frame_count += 1;

        self.fps = match self.last_frame_at {
            Some(previous) => {
                let dt = now.saturating_duration_since(previous).as_secs_f64();
                if dt > 0.0 { 1.0 / dt } else { 0.0 }
            }
            None => 0.0,
        };
        self.last_frame_at = Some(now);

        sink.present(&frame, self.fps);
        TickOutcome::Rendered {
            frame_index,
            inferred,
            fps: self.fps,
        }
    }

    fn infer(&mut self, frame: &S::Frame) -> Vec<DetectionBox> {
        let Some(detector) = self.detector.as_mut() else {
            return Vec::new();
        };
        match detector.detect(frame, self.settings.confidence) {
            Ok(found) => found
                .into_iter()
                .filter(|d| d.confidence >= self.settings.confidence)
                .collect(),
            Err(e) => {
                warn!(error = %e, "inference failed, clearing overlay");
                Vec::new()
            }
        }
    }

    /// The overlay currently drawn on every frame.
    pub fn detections(&self) -> &[DetectionBox] {
        &self.detections
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn has_detector(&self) -> bool {
        self.detector.is_some()
    }

    pub fn settings(&self) -> &PerceptionSettings {
        &self.settings
    }

    /// Gives the frame source back, e.g. to release the camera.
    pub fn into_source(self) -> S {
        self.source
    }
}

/// FPS label text, e.g. "FPS: 29".
pub fn fps_text(fps: f64) -> String {
    format!("FPS: {}", fps.max(0.0) as u32)
}

const OVERLAY_GREEN: Rgb<u8> = Rgb([0, 255, 0]);
const STROKE: i32 = 2;
const LABEL_TAB_HEIGHT: i32 = 10;

// Plain RGB buffers carry no font, so the label is marked by a filled tab above the
// box. Backends with text rendering draw the caption instead.
impl Canvas for RgbImage {
    fn draw_detection(&mut self, detection: &DetectionBox) {
        let b = detection.bbox;
        for s in 0..STROKE {
            hline(self, b.x1, b.x2, b.y1 + s);
            hline(self, b.x1, b.x2, b.y2 - s);
            vline(self, b.x1 + s, b.y1, b.y2);
            vline(self, b.x2 - s, b.y1, b.y2);
        }
        for y in (b.y1 - LABEL_TAB_HEIGHT)..b.y1 {
            hline(self, b.x1, b.x1 + b.width() / 2, y);
        }
    }
}

fn put(img: &mut RgbImage, x: i32, y: i32) {
    if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
        img.put_pixel(x as u32, y as u32, OVERLAY_GREEN);
    }
}

fn hline(img: &mut RgbImage, x1: i32, x2: i32, y: i32) {
    for x in x1..=x2 {
        put(img, x, y);
    }
}

fn vline(img: &mut RgbImage, x: i32, y1: i32, y2: i32) {
    for y in y1..=y2 {
        put(img, x, y);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct TestFrame {
        drawn: Vec<DetectionBox>,
    }

    impl Canvas for TestFrame {
        fn draw_detection(&mut self, detection: &DetectionBox) {
            self.drawn.push(detection.clone());
        }
    }

    /// Yields frames forever, except at the scripted failure positions.
    struct ScriptedCamera {
        failures: VecDeque<bool>,
    }

    impl ScriptedCamera {
        fn healthy() -> Self {
            Self { failures: VecDeque::new() }
        }
    }

    impl FrameSource for ScriptedCamera {
        type Frame = TestFrame;

        fn grab(&mut self) -> Result<TestFrame, PerceptionError> {
            match self.failures.pop_front() {
                Some(true) => Err(PerceptionError::FrameUnavailable("usb hiccup".into())),
                _ => Ok(TestFrame::default()),
            }
        }
    }

    /// Returns one box per call, labelled with the call number.
    struct CountingDetector {
        calls: usize,
    }

    impl Detector<TestFrame> for CountingDetector {
        fn detect(&mut self, _frame: &TestFrame, _min: f32) -> Result<Vec<DetectionBox>, PerceptionError> {
            self.calls += 1;
            Ok(vec![DetectionBox::new(
                BoundingBox::new(10, 10, 50, 50),
                format!("pass{}", self.calls),
                0.9,
            )])
        }
    }

    struct FailingDetector;

    impl Detector<TestFrame> for FailingDetector {
        fn detect(&mut self, _frame: &TestFrame, _min: f32) -> Result<Vec<DetectionBox>, PerceptionError> {
            Err(PerceptionError::Inference("tensor shape".into()))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        frames: Vec<Vec<DetectionBox>>,
        fps: Vec<f64>,
    }

    impl FrameSink<TestFrame> for RecordingSink {
        fn present(&mut self, frame: &TestFrame, fps: f64) {
            self.frames.push(frame.drawn.clone());
            self.fps.push(fps);
        }
    }

    fn run_ticks<S>(lp: &mut PerceptionLoop<S>, sink: &mut RecordingSink, n: usize)
    where
        S: FrameSource<Frame = TestFrame>,
    {
        let start = Instant::now();
        for i in 0..n {
            lp.tick(start + Duration::from_millis(10 * i as u64), sink);
        }
    }

    #[test]
    fn detections_persist_between_inference_passes() {
        let mut lp = PerceptionLoop::new(
            ScriptedCamera::healthy(),
            Some(Box::new(CountingDetector { calls: 0 })),
            PerceptionSettings::default(),
        );
        let mut sink = RecordingSink::default();

        run_ticks(&mut lp, &mut sink, 31);

        assert_eq!(sink.frames.len(), 31);
        for frame in &sink.frames[0..30] {
            assert_eq!(frame.len(), 1);
            assert_eq!(frame[0].label, "pass1");
        }
        assert_eq!(sink.frames[30].len(), 1);
        assert_eq!(sink.frames[30][0].label, "pass2");
    }

    #[test]
    fn inference_runs_on_skip_boundaries_only() {
        let mut lp = PerceptionLoop::new(
            ScriptedCamera::healthy(),
            Some(Box::new(CountingDetector { calls: 0 })),
            PerceptionSettings { skip_interval: 5, ..PerceptionSettings::default() },
        );
        let mut sink = RecordingSink::default();
        let start = Instant::now();

        let inferred: Vec<bool> = (0..11)
            .map(|i| match lp.tick(start + Duration::from_millis(i * 10), &mut sink) {
                TickOutcome::Rendered { inferred, .. } => inferred,
                TickOutcome::Skipped => panic!("camera is healthy"),
            })
            .collect();

        let expected: Vec<bool> = (0..11).map(|i| i % 5 == 0).collect();
        assert_eq!(inferred, expected);
    }

    #[test]
    fn failed_grab_skips_without_counting() {
        let camera = ScriptedCamera {
            failures: VecDeque::from(vec![false, true, false]),
        };
        let mut lp = PerceptionLoop::new(camera, None, PerceptionSettings::default());
        let mut sink = RecordingSink::default();
        let start = Instant::now();

        assert!(matches!(lp.tick(start, &mut sink), TickOutcome::Rendered { frame_index: 0, .. }));
        assert_eq!(lp.tick(start + Duration::from_millis(10), &mut sink), TickOutcome::Skipped);
        assert!(matches!(
            lp.tick(start + Duration::from_millis(20), &mut sink),
            TickOutcome::Rendered { frame_index: 1, .. }
        ));
        assert_eq!(sink.frames.len(), 2);
    }

    #[test]
    fn fps_is_zero_for_equal_or_backwards_timestamps() {
        let mut lp = PerceptionLoop::new(ScriptedCamera::healthy(), None, PerceptionSettings::default());
        let mut sink = RecordingSink::default();
        let t = Instant::now() + Duration::from_secs(1);

        lp.tick(t, &mut sink);
        lp.tick(t, &mut sink);
        lp.tick(t - Duration::from_millis(5), &mut sink);
        lp.tick(t + Duration::from_millis(20), &mut sink);

        assert_eq!(sink.fps[0], 0.0);
        assert_eq!(sink.fps[1], 0.0);
        assert_eq!(sink.fps[2], 0.0);
        assert!((sink.fps[3] - 40.0).abs() < 1e-6);
    }

    #[test]
    fn detector_errors_clear_the_overlay() {
        let mut lp = PerceptionLoop::new(
            ScriptedCamera::healthy(),
            Some(Box::new(FailingDetector)),
            PerceptionSettings::default(),
        );
        let mut sink = RecordingSink::default();

        run_ticks(&mut lp, &mut sink, 3);

        assert!(lp.detections().is_empty());
        assert!(sink.frames.iter().all(|f| f.is_empty()));
    }

    #[test]
    fn no_detector_means_raw_video() {
        let mut lp = PerceptionLoop::new(ScriptedCamera::healthy(), None, PerceptionSettings::default());
        let mut sink = RecordingSink::default();
        run_ticks(&mut lp, &mut sink, 2);
        assert!(!lp.has_detector());
        assert_eq!(sink.frames, vec![Vec::new(), Vec::new()]);
    }

    #[test]
    fn low_confidence_boxes_are_dropped() {
        struct Mixed;
        impl Detector<TestFrame> for Mixed {
            fn detect(&mut self, _f: &TestFrame, _m: f32) -> Result<Vec<DetectionBox>, PerceptionError> {
                Ok(vec![
                    DetectionBox::new(BoundingBox::new(0, 0, 5, 5), "kiwi", 0.1),
                    DetectionBox::new(BoundingBox::new(0, 0, 5, 5), "lemon", 0.6),
                ])
            }
        }
        let mut lp = PerceptionLoop::new(
            ScriptedCamera::healthy(),
            Some(Box::new(Mixed)),
            PerceptionSettings { confidence: 0.5, ..PerceptionSettings::default() },
        );
        let mut sink = RecordingSink::default();
        run_ticks(&mut lp, &mut sink, 1);
        assert_eq!(lp.detections().len(), 1);
        assert_eq!(lp.detections()[0].caption(), "lemon 0.60");
    }

    #[test]
    fn rgb_canvas_draws_box_outline() {
        let mut img = RgbImage::new(64, 48);
        img.draw_detection(&DetectionBox::new(BoundingBox::new(10, 20, 30, 40), "apple", 0.8));

        assert_eq!(*img.get_pixel(10, 20), OVERLAY_GREEN);
        assert_eq!(*img.get_pixel(30, 40), OVERLAY_GREEN);
        assert_eq!(*img.get_pixel(20, 30), Rgb([0, 0, 0]));
        // Label tab sits above the box.
        assert_eq!(*img.get_pixel(12, 15), OVERLAY_GREEN);
    }

    #[test]
    fn rgb_canvas_clips_at_the_border() {
        let mut img = RgbImage::new(16, 16);
        img.draw_detection(&DetectionBox::new(BoundingBox::new(-5, -5, 40, 40), "kiwi", 0.5));
        assert_eq!(*img.get_pixel(0, 0), OVERLAY_GREEN);
    }

    #[test]
    fn fps_label_truncates() {
        assert_eq!(fps_text(29.97), "FPS: 29");
        assert_eq!(fps_text(0.0), "FPS: 0");
    }
}
