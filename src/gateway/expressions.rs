use std::path::Path;

use anyhow::{Result, bail};
use image::RgbImage;
use image::imageops::{self, FilterType};
use ndarray::Array;
use ort::value::Tensor;
use tracing::{Level, span};

use super::model::{Session, initialize_model, io_names, output_values};
use super::onnx::crop;
use crate::face::Expressions;
use crate::shapes::rect::Rect;

const SIZE: u32 = 64;

/// Classifier output order, renamed to the labels the rest of the app uses.
const LABELS: [&str; 8] = [
    "neutral",
    "happy",
    "surprised",
    "sad",
    "angry",
    "disgusted",
    "fearful",
    "contempt",
];

pub struct ExpressionClassifier {
    model: Session,
    input_name: String,
    output_name: String,
}

impl ExpressionClassifier {
    /*
    FER+ emotion classifier.

    Model Input: 1x1x64x64 f32 grayscale, 0..255
    Model Output: 1x8 unnormalized scores
     */
    pub fn new(path: &Path, threads: usize) -> Result<ExpressionClassifier> {
        let model = initialize_model(path, threads)?;
        let (input_name, output_name) = io_names(&model)?;

        Ok(ExpressionClassifier {
            model,
            input_name,
            output_name,
        })
    }

    pub fn run(&self, img: &RgbImage, face: &Rect) -> Result<Expressions> {
        let span = span!(Level::DEBUG, "expression_classifier");
        let _guard = span.enter();

        let face_img = imageops::grayscale(&crop(img, face)?);
        let input_img = imageops::resize(&face_img, SIZE, SIZE, FilterType::Triangle);

        let input_arr = Array::from_shape_fn((1, 1, SIZE as usize, SIZE as usize), |(_, _, y, x)| {
            input_img.get_pixel(x as u32, y as u32)[0] as f32
        });
        let input = Tensor::from_array(input_arr)?;

        let outputs = self
            .model
            .run(ort::inputs![self.input_name.as_str() => input]?)?;
        let logits = output_values(outputs.get(self.output_name.as_str()), &self.output_name)?;

        extract_results(&logits)
    }
}

fn extract_results(logits: &[f32]) -> Result<Expressions> {
    if logits.len() != LABELS.len() {
        bail!("expected {} expression scores, got {}", LABELS.len(), logits.len());
    }

    Ok(LABELS.iter().copied().zip(softmax(logits)).collect())
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|v| v / sum).collect()
}
