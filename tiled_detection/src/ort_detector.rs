use crate::{
    config::ModelConfig,
    detector::{Detector, DetectorError, LocalDetection},
    labels::Labels,
    merge::suppress,
};
use image::{imageops::FilterType, RgbImage};
use ndarray::{Array, ArrayD, ArrayView2, Axis, Ix4, IxDyn};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex,
};

/// Overlap between two `(x1, y1, x2, y2)` float boxes.
fn float_iou(box1: &LocalDetection, box2: &LocalDetection) -> f32 {
    let width = (box1.x2.min(box2.x2) - box1.x1.max(box2.x1)).max(0.0);
    let height = (box1.y2.min(box2.y2) - box1.y1.max(box2.y1)).max(0.0);
    let intersection = width * height;
    let union = (box1.x2 - box1.x1) * (box1.y2 - box1.y1) + (box2.x2 - box2.x1) * (box2.y2 - box2.y1)
        - intersection;
    if union <= 0.0 {
        0.0
    } else {
        intersection / union
    }
}

/// Resizes a tile to the square model input and lays it out as NCHW in [0, 1].
fn transform_tile(tile: &RgbImage, input_size: u32) -> Array<f32, Ix4> {
    let side = input_size as usize;
    let resized = image::imageops::resize(tile, input_size, input_size, FilterType::CatmullRom);

    let mut input = Array::zeros((1, 3, side, side));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        let [r, g, b] = pixel.0;
        input[[0, 0, y, x]] = (r as f32) / 255.;
        input[[0, 1, y, x]] = (g as f32) / 255.;
        input[[0, 2, y, x]] = (b as f32) / 255.;
    }

    input
}

/// Decodes a YOLOv8-style `[4 + classes, anchors]` output into tile-local boxes.
///
/// Each anchor column is `(cx, cy, w, h, score_0, .., score_n)` in model-input
/// pixels; boxes are scaled back to the tile's own size.
fn decode_output(
    output: ArrayView2<f32>,
    tile_width: u32,
    tile_height: u32,
    input_size: u32,
    conf_threshold: f32,
    labels: &Labels,
) -> Vec<LocalDetection> {
    let scale_x = tile_width as f32 / input_size as f32;
    let scale_y = tile_height as f32 / input_size as f32;

    output
        .axis_iter(Axis(1))
        .filter_map(|column| {
            let (class_id, prob) = column
                .iter()
                .skip(4)
                .copied()
                .enumerate()
                .reduce(|accum, row| if row.1 > accum.1 { row } else { accum })?;

            if prob < conf_threshold {
                return None;
            }

            let xc = column[0] * scale_x;
            let yc = column[1] * scale_y;
            let w = column[2] * scale_x;
            let h = column[3] * scale_y;
            let class_id = class_id as u32;

            Some(LocalDetection {
                class_id,
                class_name: labels.name(class_id),
                confidence: prob,
                x1: xc - w / 2.,
                y1: yc - h / 2.,
                x2: xc + w / 2.,
                y2: yc + h / 2.,
            })
        })
        .collect()
}

/// YOLO detector running an ONNX model through `ort`.
///
/// Holds `num_instances` sessions and hands calls out round-robin so
/// concurrent frames on different connections do not queue on one session.
pub struct OrtDetector {
    sessions: Vec<Mutex<Session>>,
    counter: AtomicUsize,
    labels: Labels,
    input_size: u32,
    iou_threshold: f32,
}

impl OrtDetector {
    pub fn new(model_config: &ModelConfig, labels: Labels) -> Result<Self, DetectorError> {
        let num_instances = model_config.num_instances.max(1);
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(model_config.get_path())?;
                Ok(Mutex::new(session))
            })
            .collect::<Result<Vec<_>, ort::Error>>()
            .map_err(|e| DetectorError::Load(e.to_string()))?;

        tracing::info!(
            "Created {} ONNX sessions for {:?} ({} classes)",
            num_instances,
            model_config.get_path(),
            labels.len()
        );

        Ok(Self {
            sessions,
            counter: AtomicUsize::new(0),
            labels,
            input_size: model_config.input_size,
            iou_threshold: model_config.iou_threshold,
        })
    }

    fn run_inference(&self, input: &Array<f32, Ix4>) -> Result<ArrayD<f32>, DetectorError> {
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % self.sessions.len();
        let mut session = self.sessions[index]
            .lock()
            .map_err(|e| DetectorError::Poisoned(e.to_string()))?;

        tracing::debug!("Running tile with session {}", index);
        let tensor_ref = TensorRef::from_array_view(input.view())
            .map_err(|e| DetectorError::Tensor(format!("failed to build tensor: {}", e)))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| DetectorError::Inference(e.to_string()))?;

        let (shape, data) = outputs["output0"]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::Tensor(format!("failed to extract tensor: {}", e)))?;

        let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
        ArrayD::from_shape_vec(IxDyn(&dims), data.to_vec())
            .map_err(|e| DetectorError::Tensor(format!("invalid tensor shape: {}", e)))
    }
}

impl Detector for OrtDetector {
    fn detect(
        &self,
        pixels: &RgbImage,
        conf_threshold: f32,
    ) -> Result<Vec<LocalDetection>, DetectorError> {
        let input = transform_tile(pixels, self.input_size);
        let outputs = self.run_inference(&input)?;

        if outputs.ndim() != 3 || outputs.shape()[0] != 1 || outputs.shape()[1] <= 4 {
            return Err(DetectorError::Tensor(format!(
                "expected [1, 4 + classes, anchors], got {:?}",
                outputs.shape()
            )));
        }
        let output = outputs
            .index_axis(Axis(0), 0)
            .into_dimensionality::<ndarray::Ix2>()
            .map_err(|e| DetectorError::Tensor(e.to_string()))?;

        let boxes = decode_output(
            output,
            pixels.width(),
            pixels.height(),
            self.input_size,
            conf_threshold,
            &self.labels,
        );

        Ok(suppress(
            boxes,
            self.iou_threshold,
            |d| d.confidence,
            float_iou,
        ))
    }
}
