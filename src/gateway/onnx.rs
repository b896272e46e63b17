use std::path::PathBuf;
use std::sync::{Arc, Once};

use anyhow::{Result, bail};
use image::RgbImage;
use tracing::{Instrument, Level, info, span, trace};

use super::ModelGateway;
use super::detection::FaceDetector;
use super::expressions::ExpressionClassifier;
use super::landmarks::FaceLandmarker;
use super::model::init_runtime;
use crate::error::SmileError;
use crate::face::DetectedFace;
use crate::shapes::rect::Rect;

static RUNTIME: Once = Once::new();

#[derive(Debug, Clone, PartialEq)]
pub struct OnnxOptions {
    pub dir: PathBuf,
    pub detector: String,
    pub landmarks: String,
    pub expressions: String,
    pub min_confidence: f32,
    pub max_overlap_pct: f32,
    pub threads: usize,
}

impl Default for OnnxOptions {
    fn default() -> Self {
        OnnxOptions {
            dir: PathBuf::from("models"),
            detector: "version-RFB-320.onnx".to_string(),
            landmarks: "face_landmark_68.onnx".to_string(),
            expressions: "emotion-ferplus-8.onnx".to_string(),
            min_confidence: 0.7,
            max_overlap_pct: 30.,
            threads: num_cpus::get().max(2) / 2,
        }
    }
}

struct Models {
    detector: FaceDetector,
    landmarker: FaceLandmarker,
    classifier: ExpressionClassifier,
}

impl Models {
    // Blocking; called off the render loop.
    fn run(&self, img: &RgbImage) -> Result<Vec<DetectedFace>> {
        let span = span!(Level::DEBUG, "detect_faces");
        let _guard = span.enter();

        let bounds = self.detector.run(img)?;
        let mut faces = Vec::with_capacity(bounds.len());
        for bound in bounds {
            trace!("Face bound: {bound:?}");

            faces.push(DetectedFace {
                landmarks: self.landmarker.run(img, &bound.bounds)?,
                expressions: self.classifier.run(img, &bound.bounds)?,
                bounding_box: bound.bounds,
            });
        }

        Ok(faces)
    }
}

/// Face detector, 68-point landmarker and expression classifier, run with
/// ONNX Runtime.
pub struct OnnxGateway {
    options: OnnxOptions,
    models: Option<Arc<Models>>,
}

impl OnnxGateway {
    pub fn new(options: OnnxOptions) -> OnnxGateway {
        OnnxGateway {
            options,
            models: None,
        }
    }
}

async fn load<T, F>(name: &str, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(model)) => Ok(model),
        Ok(Err(e)) => Err(SmileError::model_load(name, format!("{e:#}")).into()),
        Err(e) => Err(SmileError::model_load(name, e).into()),
    }
}

impl ModelGateway for OnnxGateway {
    async fn load_models(&mut self) -> Result<()> {
        RUNTIME.call_once(init_runtime);

        let o = &self.options;
        let threads = o.threads;
        let (min_confidence, max_overlap_pct) = (o.min_confidence, o.max_overlap_pct);
        let detector_path = o.dir.join(&o.detector);
        let landmarks_path = o.dir.join(&o.landmarks);
        let expressions_path = o.dir.join(&o.expressions);

        info!("Loading models from {}", o.dir.display());
        let (detector, landmarker, classifier) = tokio::try_join!(
            load(&o.detector, move || FaceDetector::new(
                &detector_path,
                threads,
                min_confidence,
                max_overlap_pct
            )),
            load(&o.landmarks, move || FaceLandmarker::new(&landmarks_path, threads)),
            load(&o.expressions, move || ExpressionClassifier::new(
                &expressions_path,
                threads
            )),
        )?;

        self.models = Some(Arc::new(Models {
            detector,
            landmarker,
            classifier,
        }));
        info!("Models loaded");

        Ok(())
    }

    async fn detect(&self, frame: &RgbImage) -> Result<Vec<DetectedFace>> {
        let Some(models) = self.models.clone() else {
            return Err(SmileError::ModelsNotReady.into());
        };

        let frame = frame.clone();
        tokio::task::spawn_blocking(move || models.run(&frame))
            .instrument(span!(Level::DEBUG, "detect"))
            .await?
    }
}

/// Copies `bounds` out of `img`, rounded to whole pixels and clamped.
pub(super) fn crop(img: &RgbImage, bounds: &Rect) -> Result<RgbImage> {
    let x = (bounds.left().max(0.).round() as u32).min(img.width());
    let y = (bounds.top().max(0.).round() as u32).min(img.height());
    let w = (bounds.w.round() as u32).min(img.width() - x);
    let h = (bounds.h.round() as u32).min(img.height() - y);

    if w == 0 || h == 0 {
        bail!(SmileError::Detection(format!("empty crop for {bounds:?}")));
    }

    Ok(image::imageops::crop_imm(img, x, y, w, h).to_image())
}
