use serde::Deserialize;

use crate::face::DetectedFace;
use crate::shapes::point::Point;

pub type SmileScore = u8;

pub const HAPPY: &str = "happy";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ScoringPolicy {
    /// Mouth shape from landmarks
    #[default]
    Geometric,
    /// Classifier "happy" probability
    Probability,
}

/// Tunable constants of the geometric policy. Chosen empirically.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct GeometricWeights {
    pub curvature: f32,
    pub width: f32,
    pub scale: f32,
    pub offset: f32,
}

impl Default for GeometricWeights {
    fn default() -> Self {
        GeometricWeights {
            curvature: 0.7,
            width: 0.3,
            scale: 2.,
            offset: 50.,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Scorer {
    pub policy: ScoringPolicy,
    pub weights: GeometricWeights,
}

impl Scorer {
    pub fn new(policy: ScoringPolicy, weights: GeometricWeights) -> Scorer {
        Scorer { policy, weights }
    }

    /// None when the face can't be scored (degenerate box, short mouth).
    pub fn score(&self, face: &DetectedFace) -> Option<SmileScore> {
        match self.policy {
            ScoringPolicy::Geometric => geometric_score(
                face.landmarks.mouth(),
                face.bounding_box.w,
                &self.weights,
            ),
            ScoringPolicy::Probability => {
                Some(probability_score(face.expressions.probability(HAPPY)))
            }
        }
    }
}

/// Scores the outer lip contour: corners at 0 and 6, top middle at 3.
/// Curvature is the mean corner y minus the top middle y, in image
/// coordinates.
pub fn geometric_score(
    mouth: &[Point],
    face_width: f32,
    weights: &GeometricWeights,
) -> Option<SmileScore> {
    if mouth.len() < 12 || !(face_width > 0.) {
        return None;
    }

    let (l_corner, r_corner, top) = (mouth[0], mouth[6], mouth[3]);
    let mouth_width = (l_corner.x - r_corner.x).abs();
    let curvature = (l_corner.y + r_corner.y) / 2. - top.y;

    let norm_curvature = curvature / face_width * 100.;
    let norm_width = mouth_width / face_width * 100.;

    let raw = (norm_curvature * weights.curvature + norm_width * weights.width) * weights.scale
        + weights.offset;

    Some(clamp_score(raw))
}

pub fn probability_score(happy: Option<f32>) -> SmileScore {
    clamp_score(happy.unwrap_or(0.) * 100.)
}

fn clamp_score(raw: f32) -> SmileScore {
    if raw.is_nan() {
        return 0;
    }
    raw.clamp(0., 100.).round() as SmileScore
}
