use std::path::Path;

use anyhow::{Result, bail};
use image::RgbImage;
use image::imageops::{self, FilterType};
use ndarray::Array;
use ort::value::Tensor;
use tracing::{Level, span};

use super::model::{Session, initialize_model, io_names, output_values};
use super::onnx::crop;
use crate::face::{Landmarks, NUM_LANDMARKS};
use crate::shapes::point::Point;
use crate::shapes::rect::Rect;

const SIZE: u32 = 112;
// pad 10% on each side so the jaw line stays in frame
const CROP_PAD: f32 = 0.1;

pub struct FaceLandmarker {
    model: Session,
    input_name: String,
    output_name: String,
}

impl FaceLandmarker {
    /*
    68-point landmark regressor (PFLD style).

    Model Input: 1x3x112x112 f32 RGB, 0..1
    Model Output: 1x136, (x, y) pairs normalized to the input crop
     */
    pub fn new(path: &Path, threads: usize) -> Result<FaceLandmarker> {
        let model = initialize_model(path, threads)?;
        let (input_name, output_name) = io_names(&model)?;

        Ok(FaceLandmarker {
            model,
            input_name,
            output_name,
        })
    }

    pub fn run(&self, img: &RgbImage, face: &Rect) -> Result<Landmarks> {
        let span = span!(Level::DEBUG, "face_landmarker");
        let _guard = span.enter();

        let bounds = face.square_padded(CROP_PAD, img.width(), img.height());
        let face_img = crop(img, &bounds)?;
        let input_img = imageops::resize(&face_img, SIZE, SIZE, FilterType::Triangle);

        let input_arr =
            Array::from_shape_fn((1, 3, SIZE as usize, SIZE as usize), |(_, c, y, x)| {
                input_img.get_pixel(x as u32, y as u32)[c] as f32 / 255. // 0. - 1. range
            });
        let input = Tensor::from_array(input_arr)?;

        let outputs = self
            .model
            .run(ort::inputs![self.input_name.as_str() => input]?)?;
        let mesh = output_values(outputs.get(self.output_name.as_str()), &self.output_name)?;

        extract_results(&mesh, bounds)
    }
}

fn extract_results(mesh: &[f32], run_bounds: Rect) -> Result<Landmarks> {
    if mesh.len() < NUM_LANDMARKS * 2 {
        bail!("expected {} landmark coords, got {}", NUM_LANDMARKS * 2, mesh.len());
    }

    let points = mesh
        .chunks_exact(2)
        .take(NUM_LANDMARKS)
        .map(|xy| {
            Point::new(
                run_bounds.left() + xy[0] * run_bounds.w,
                run_bounds.top() + xy[1] * run_bounds.h,
            )
        })
        .collect();

    match Landmarks::new(points) {
        Some(l) => Ok(l),
        None => bail!("landmark count mismatch"),
    }
}
