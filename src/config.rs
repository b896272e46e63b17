//! Configuration from an optional TOML file, layered under CLI flags.
//!
//! ```toml
//! [detector]
//! interval_ms = 100
//! policy = "geometric"     # or "probability"
//! history = true
//! all_faces = false
//!
//! [detector.weights]
//! curvature = 0.7
//! width = 0.3
//! scale = 2.0
//! offset = 50.0
//!
//! [overlay]
//! style = "mouth"          # or "landmarks"
//! font = "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf"
//! color = [0, 255, 0]
//!
//! [camera]
//! index = 0
//! user_agent = "Mozilla/5.0 (iPhone; ...)"
//! fps = 30
//! preview = true
//!
//! [models]
//! dir = "models"
//! min_confidence = 0.7
//!
//! [capture]
//! brightness = 100
//! photo = "smile-detector-photo.png"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use image::Rgba;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::detector::DetectorOptions;
use crate::error::SmileError;
use crate::gateway::OnnxOptions;
use crate::overlay::OverlayStyle;
use crate::scoring::{GeometricWeights, Scorer, ScoringPolicy};
use crate::settings::{CaptureSettings, DEFAULT_BRIGHTNESS};
use crate::video::{CameraOptions, CameraProfile};

pub const DEFAULT_INTERVAL_MS: u64 = 100;
pub const DEFAULT_PHOTO: &str = "smile-detector-photo.png";
pub const DEFAULT_FONT: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf";

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub detector: DetectorSection,
    pub overlay: OverlaySection,
    pub camera: CameraSection,
    pub models: ModelsSection,
    pub capture: CaptureSection,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct DetectorSection {
    /// Tick period in milliseconds.
    pub interval_ms: Option<u64>,
    pub policy: Option<ScoringPolicy>,
    pub weights: Option<GeometricWeights>,
    /// Archive the score when detection stops.
    pub history: Option<bool>,
    pub all_faces: Option<bool>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct OverlaySection {
    pub style: Option<OverlayStyle>,
    /// TrueType font used for expression labels.
    pub font: Option<PathBuf>,
    pub color: Option<[u8; 3]>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct CameraSection {
    pub index: Option<u32>,
    /// Explicit profile, wins over `user_agent`.
    pub profile: Option<CameraProfile>,
    /// Picks the mobile profile when it looks like a phone.
    pub user_agent: Option<String>,
    pub fps: Option<u32>,
    pub preview: Option<bool>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct ModelsSection {
    pub dir: Option<PathBuf>,
    pub detector: Option<String>,
    pub landmarks: Option<String>,
    pub expressions: Option<String>,
    pub min_confidence: Option<f32>,
    pub max_overlap_pct: Option<f32>,
    pub threads: Option<usize>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureSection {
    pub brightness: Option<i32>,
    pub photo: Option<PathBuf>,
}

impl FileConfig {
    pub fn from_file(path: &Path) -> Result<FileConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SmileError::Config(format!("{}: {e}", path.display())))?;
        let config = toml::from_str(&content)
            .map_err(|e| SmileError::Config(format!("{}: {e}", path.display())))?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Values set in `other` win.
    pub fn merge(&mut self, other: FileConfig) {
        let d = &mut self.detector;
        d.interval_ms = other.detector.interval_ms.or(d.interval_ms);
        d.policy = other.detector.policy.or(d.policy);
        d.weights = other.detector.weights.or(d.weights);
        d.history = other.detector.history.or(d.history);
        d.all_faces = other.detector.all_faces.or(d.all_faces);

        let o = &mut self.overlay;
        o.style = other.overlay.style.or(o.style);
        o.font = other.overlay.font.or_else(|| o.font.take());
        o.color = other.overlay.color.or(o.color);

        let c = &mut self.camera;
        c.index = other.camera.index.or(c.index);
        c.profile = other.camera.profile.or(c.profile);
        c.user_agent = other.camera.user_agent.or_else(|| c.user_agent.take());
        c.fps = other.camera.fps.or(c.fps);
        c.preview = other.camera.preview.or(c.preview);

        let m = &mut self.models;
        m.dir = other.models.dir.or_else(|| m.dir.take());
        m.detector = other.models.detector.or_else(|| m.detector.take());
        m.landmarks = other.models.landmarks.or_else(|| m.landmarks.take());
        m.expressions = other.models.expressions.or_else(|| m.expressions.take());
        m.min_confidence = other.models.min_confidence.or(m.min_confidence);
        m.max_overlap_pct = other.models.max_overlap_pct.or(m.max_overlap_pct);
        m.threads = other.models.threads.or(m.threads);

        let p = &mut self.capture;
        p.brightness = other.capture.brightness.or(p.brightness);
        p.photo = other.capture.photo.or_else(|| p.photo.take());
    }
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub interval: Duration,
    pub detector: DetectorOptions,
    pub models: OnnxOptions,
    pub camera: CameraOptions,
    pub font: PathBuf,
    pub color: Rgba<u8>,
    pub capture: CaptureSettings,
    pub photo: PathBuf,
}

impl TryFrom<FileConfig> for Config {
    type Error = SmileError;

    fn try_from(file: FileConfig) -> Result<Config, SmileError> {
        let interval_ms = file.detector.interval_ms.unwrap_or(DEFAULT_INTERVAL_MS);
        if interval_ms == 0 {
            return Err(SmileError::Config("detector.interval_ms must be > 0".into()));
        }

        let weights = file.detector.weights.unwrap_or_default();
        if ![weights.curvature, weights.width, weights.scale, weights.offset]
            .iter()
            .all(|w| w.is_finite())
        {
            return Err(SmileError::Config(format!(
                "detector.weights must be finite, got {weights:?}"
            )));
        }

        let defaults = OnnxOptions::default();
        let min_confidence = file.models.min_confidence.unwrap_or(defaults.min_confidence);
        if !(0.0..=1.0).contains(&min_confidence) {
            return Err(SmileError::Config(format!(
                "models.min_confidence must be 0.0-1.0, got {min_confidence}"
            )));
        }
        let max_overlap_pct = file.models.max_overlap_pct.unwrap_or(defaults.max_overlap_pct);
        if !(0.0..=100.0).contains(&max_overlap_pct) {
            return Err(SmileError::Config(format!(
                "models.max_overlap_pct must be 0-100, got {max_overlap_pct}"
            )));
        }
        let threads = file.models.threads.unwrap_or(defaults.threads);
        if threads == 0 {
            return Err(SmileError::Config("models.threads must be > 0".into()));
        }

        let fps = file.camera.fps.unwrap_or(30);
        if fps == 0 {
            return Err(SmileError::Config("camera.fps must be > 0".into()));
        }
        let profile = match (file.camera.profile, &file.camera.user_agent) {
            (Some(p), _) => p,
            (None, Some(ua)) => CameraProfile::from_user_agent(ua),
            (None, None) => CameraProfile::Desktop,
        };

        let brightness = file.capture.brightness.unwrap_or(DEFAULT_BRIGHTNESS);
        let capture = CaptureSettings::with_brightness(brightness);
        if capture.brightness() != brightness {
            warn!(
                "capture.brightness {brightness} out of range, using {}",
                capture.brightness()
            );
        }

        let [r, g, b] = file.overlay.color.unwrap_or([0, 255, 0]);

        Ok(Config {
            interval: Duration::from_millis(interval_ms),
            detector: DetectorOptions {
                scorer: Scorer::new(file.detector.policy.unwrap_or_default(), weights),
                overlay: file.overlay.style.unwrap_or_default(),
                history: file.detector.history.unwrap_or(true),
                all_faces: file.detector.all_faces.unwrap_or(false),
            },
            models: OnnxOptions {
                dir: file.models.dir.unwrap_or(defaults.dir),
                detector: file.models.detector.unwrap_or(defaults.detector),
                landmarks: file.models.landmarks.unwrap_or(defaults.landmarks),
                expressions: file.models.expressions.unwrap_or(defaults.expressions),
                min_confidence,
                max_overlap_pct,
                threads,
            },
            camera: CameraOptions {
                index: file.camera.index,
                profile,
                fps,
                preview: file.camera.preview.unwrap_or(true),
            },
            font: file.overlay.font.unwrap_or_else(|| PathBuf::from(DEFAULT_FONT)),
            color: Rgba([r, g, b, 255]),
            capture,
            photo: file.capture.photo.unwrap_or_else(|| PathBuf::from(DEFAULT_PHOTO)),
        })
    }
}
