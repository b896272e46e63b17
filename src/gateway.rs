use std::future::Future;

use anyhow::Result;
use image::RgbImage;

use crate::face::{DetectedFace, Dimensions, resize_results};

pub use onnx::{OnnxGateway, OnnxOptions};

mod detection;
mod expressions;
mod landmarks;
mod model;
mod onnx;

/// Seam between the render loop and whatever produces faces.
///
/// `load_models` has to succeed before `detect` is valid. Detection carries
/// no identity between calls: each result is a fresh set of faces in the
/// model's own order, with coordinates in the pixel space of the frame that
/// was passed in.
pub trait ModelGateway {
    fn load_models(&mut self) -> impl Future<Output = Result<()>>;

    fn detect(&self, frame: &RgbImage) -> impl Future<Output = Result<Vec<DetectedFace>>>;

    /// Remaps detections from the frame's pixel space to the display's.
    fn resize_results(
        &self,
        faces: Vec<DetectedFace>,
        frame: Dimensions,
        display: Dimensions,
    ) -> Vec<DetectedFace> {
        resize_results(faces, frame, display)
    }
}
