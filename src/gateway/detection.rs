use std::path::Path;

use anyhow::{Result, bail};
use image::RgbImage;
use image::imageops::{self, FilterType};
use ndarray::Array;
use ort::value::Tensor;
use tracing::{Level, span, trace};

use super::model::{Session, initialize_model, io_names, output_values};
use crate::shapes::rect::Rect;

const WIDTH: u32 = 320;
const HEIGHT: u32 = 240;
const SCORES: &str = "scores";
const BOXES: &str = "boxes";

#[derive(Debug, Clone, PartialEq)]
pub struct FaceBound {
    pub bounds: Rect,
    pub confidence: f32,
}

pub struct FaceDetector {
    model: Session,
    input_name: String,
    min_confidence: f32,
    max_overlap_pct: f32,
}

impl FaceDetector {
    /*
    Ultra-light RFB-320 detector.

    Model Input: 1x3x240x320 f32 RGB, (px - 127) / 128
    Model Output:
    - scores: 1xNx2, softmaxed [background, face]
    - boxes: 1xNx4, corners (x1, y1, x2, y2) normalized to 0..1
     */
    pub fn new(
        path: &Path,
        threads: usize,
        min_confidence: f32,
        max_overlap_pct: f32,
    ) -> Result<FaceDetector> {
        let model = initialize_model(path, threads)?;
        let (input_name, _) = io_names(&model)?;
        Ok(FaceDetector {
            model,
            input_name,
            min_confidence,
            max_overlap_pct,
        })
    }

    pub fn run(&self, img: &RgbImage) -> Result<Vec<FaceBound>> {
        let span = span!(Level::DEBUG, "face_detector");
        let _guard = span.enter();

        let input_img = imageops::resize(img, WIDTH, HEIGHT, FilterType::Triangle);
        let input_arr =
            Array::from_shape_fn((1, 3, HEIGHT as usize, WIDTH as usize), |(_, c, y, x)| {
                (input_img.get_pixel(x as u32, y as u32)[c] as f32 - 127.) / 128.
            });
        let input = Tensor::from_array(input_arr)?;

        let outputs = self
            .model
            .run(ort::inputs![self.input_name.as_str() => input]?)?;
        let scores = output_values(outputs.get(SCORES), SCORES)?;
        let boxes = output_values(outputs.get(BOXES), BOXES)?;

        extract_results(
            &scores,
            &boxes,
            img.width(),
            img.height(),
            self.min_confidence,
            self.max_overlap_pct,
        )
    }
}

/// Thresholds candidates, then drops any that overlap a more confident face
/// by more than `max_overlap_pct`. Output is ordered by confidence.
fn extract_results(
    scores: &[f32],
    boxes: &[f32],
    img_width: u32,
    img_height: u32,
    min_confidence: f32,
    max_overlap_pct: f32,
) -> Result<Vec<FaceBound>> {
    if scores.len() % 2 != 0 || boxes.len() % 4 != 0 || scores.len() / 2 != boxes.len() / 4 {
        bail!(
            "mismatched detector outputs: {} scores, {} box coords",
            scores.len(),
            boxes.len()
        );
    }

    let w = img_width as f32;
    let h = img_height as f32;
    let mut candidates: Vec<FaceBound> = scores
        .chunks_exact(2)
        .zip(boxes.chunks_exact(4))
        .filter(|(s, _)| s[1] > min_confidence)
        .map(|(s, b)| FaceBound {
            bounds: Rect::from_corners(
                b[0].clamp(0., 1.) * w,
                b[1].clamp(0., 1.) * h,
                b[2].clamp(0., 1.) * w,
                b[3].clamp(0., 1.) * h,
            ),
            confidence: s[1],
        })
        .collect();

    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut results: Vec<FaceBound> = Vec::new();
    for c in candidates {
        if c.bounds.w < 1. || c.bounds.h < 1. {
            continue;
        }
        if results
            .iter()
            .all(|r| r.bounds.overlap_pct(&c.bounds) <= max_overlap_pct)
        {
            results.push(c);
        }
    }

    trace!("Detected {} faces", results.len());

    Ok(results)
}
