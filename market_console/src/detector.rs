// THEORY:
// A YOLO object detector exported to ONNX, run through OpenCV's DNN module. The
// network takes a square RGB blob scaled to [0, 1] and returns one tensor of shape
// [1, 4 + classes, anchors]: for every anchor a centre-size box in network input
// pixels followed by one score per class. Decoding keeps the best class per anchor,
// drops anchors under the confidence threshold, and suppresses overlapping boxes.

use std::path::Path;

use opencv::{
    core::{self, Mat, Rect, Scalar, Size, Vector},
    dnn,
    prelude::*,
};
use tracing::info;

use dofmarket::config::DetectorSettings;
use dofmarket::core_modules::perception::{BoundingBox, DetectionBox, Detector};
use dofmarket::error::PerceptionError;

use crate::camera::CameraFrame;

pub struct YoloDetector {
    net: dnn::Net,
    input_size: i32,
    nms_threshold: f32,
    class_names: Vec<String>,
}

impl YoloDetector {
    pub fn load(path: &Path, settings: &DetectorSettings) -> Result<Self, PerceptionError> {
        let path_text = path.to_string_lossy();
        if !path.exists() {
            return Err(PerceptionError::DetectorUnavailable(format!("{path_text} not found")));
        }
        let net = dnn::read_net_from_onnx(&path_text)
            .map_err(|e| PerceptionError::DetectorUnavailable(format!("{path_text}: {e}")))?;
        info!(model = %path_text, classes = settings.class_names.len(), "detector loaded");
        Ok(Self {
            net,
            input_size: settings.input_size as i32,
            nms_threshold: settings.nms_threshold,
            class_names: settings.class_names.clone(),
        })
    }

    fn label(&self, class: usize) -> String {
        self.class_names
            .get(class)
            .cloned()
            .unwrap_or_else(|| format!("class {class}"))
    }

    fn forward(&mut self, frame: &Mat) -> opencv::Result<Mat> {
        let blob = dnn::blob_from_image(
            frame,
            1.0 / 255.0,
            Size::new(self.input_size, self.input_size),
            Scalar::default(),
            true,
            false,
            core::CV_32F,
        )?;
        self.net.set_input(&blob, "", 1.0, Scalar::default())?;
        self.net.forward_single("")
    }
}

impl Detector<CameraFrame> for YoloDetector {
    fn detect(&mut self, frame: &CameraFrame, min_confidence: f32) -> Result<Vec<DetectionBox>, PerceptionError> {
        let inference = |e: opencv::Error| PerceptionError::Inference(e.to_string());

        let output = self.forward(&frame.0).map_err(inference)?;
        let data = output.data_typed::<f32>().map_err(inference)?;
        let attributes = 4 + self.class_names.len();
        let anchors = data.len() / attributes;

        let scale_x = frame.0.cols() as f32 / self.input_size as f32;
        let scale_y = frame.0.rows() as f32 / self.input_size as f32;
        let at = |attr: usize, anchor: usize| data[attr * anchors + anchor];

        let mut boxes = Vector::<Rect>::new();
        let mut scores = Vector::<f32>::new();
        let mut classes = Vec::new();
        for anchor in 0..anchors {
            let Some((class, score)) = (0..self.class_names.len())
                .map(|c| (c, at(4 + c, anchor)))
                .max_by(|a, b| a.1.total_cmp(&b.1))
            else {
                continue;
            };
            if score < min_confidence {
                continue;
            }
            let (cx, cy, w, h) = (at(0, anchor), at(1, anchor), at(2, anchor), at(3, anchor));
            boxes.push(Rect::new(
                ((cx - w / 2.0) * scale_x) as i32,
                ((cy - h / 2.0) * scale_y) as i32,
                (w * scale_x) as i32,
                (h * scale_y) as i32,
            ));
            scores.push(score);
            classes.push(class);
        }

        let mut keep = Vector::<i32>::new();
        dnn::nms_boxes(&boxes, &scores, min_confidence, self.nms_threshold, &mut keep, 1.0, 0)
            .map_err(inference)?;

        let mut found = Vec::with_capacity(keep.len());
        for index in keep {
            let index = index as usize;
            let rect = boxes.get(index).map_err(inference)?;
            let score = scores.get(index).map_err(inference)?;
            found.push(DetectionBox::new(
                BoundingBox::new(rect.x, rect.y, rect.x + rect.width, rect.y + rect.height),
                self.label(classes[index]),
                score,
            ));
        }
        Ok(found)
    }
}
