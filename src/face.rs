use crate::shapes::point::Point;
use crate::shapes::rect::Rect;

pub const NUM_LANDMARKS: usize = 68;

const JAW: std::ops::Range<usize> = 0..17;
const L_BROW: std::ops::Range<usize> = 17..22;
const R_BROW: std::ops::Range<usize> = 22..27;
const NOSE_BRIDGE: std::ops::Range<usize> = 27..31;
const NOSE_BASE: std::ops::Range<usize> = 30..36;
const L_EYE: std::ops::Range<usize> = 36..42;
const R_EYE: std::ops::Range<usize> = 42..48;
const MOUTH: std::ops::Range<usize> = 48..68;
const OUTER_LIPS: std::ops::Range<usize> = 48..60;
const INNER_LIPS: std::ops::Range<usize> = 60..68;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Dimensions {
        Dimensions { width, height }
    }

    pub fn of<I: image::GenericImageView>(img: &I) -> Dimensions {
        let (width, height) = img.dimensions();
        Dimensions { width, height }
    }
}

/// 68-point landmark set in iBUG 300-W order.
#[derive(Debug, Clone, PartialEq)]
pub struct Landmarks {
    points: Vec<Point>,
}

/// A run of landmarks to be drawn as one line, `closed` joins last to first.
#[derive(Debug, Clone, Copy)]
pub struct Contour<'a> {
    pub points: &'a [Point],
    pub closed: bool,
}

impl Landmarks {
    pub fn new(points: Vec<Point>) -> Option<Landmarks> {
        if points.len() != NUM_LANDMARKS {
            return None;
        }
        Some(Landmarks { points })
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// The 20 mouth points: 12 around the outer lips starting at the left
    /// corner (corners at 0 and 6), then 8 around the inner lips.
    pub fn mouth(&self) -> &[Point] {
        &self.points[MOUTH]
    }

    pub fn contours(&self) -> Vec<Contour<'_>> {
        [
            (JAW, false),
            (L_BROW, false),
            (R_BROW, false),
            (NOSE_BRIDGE, false),
            (NOSE_BASE, false),
            (L_EYE, true),
            (R_EYE, true),
            (OUTER_LIPS, true),
            (INNER_LIPS, true),
        ]
        .into_iter()
        .map(|(range, closed)| Contour {
            points: &self.points[range],
            closed,
        })
        .collect()
    }

    fn scale(&mut self, scale_x: f32, scale_y: f32) {
        for p in self.points.iter_mut() {
            p.scale(scale_x, scale_y);
        }
    }
}

/// Expression label to probability, in the order the classifier reports them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Expressions(Vec<(String, f32)>);

impl Expressions {
    pub fn new(entries: Vec<(String, f32)>) -> Expressions {
        Expressions(entries)
    }

    pub fn probability(&self, label: &str) -> Option<f32> {
        self.0
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, p)| *p)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.0.iter().map(|(l, p)| (l.as_str(), *p))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, f32)> for Expressions {
    fn from_iter<T: IntoIterator<Item = (S, f32)>>(iter: T) -> Self {
        Expressions(iter.into_iter().map(|(l, p)| (l.into(), p)).collect())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFace {
    pub bounding_box: Rect,
    pub landmarks: Landmarks,
    pub expressions: Expressions,
}

impl DetectedFace {
    fn scale(&mut self, scale_x: f32, scale_y: f32) {
        self.bounding_box.scale(scale_x, scale_y);
        self.landmarks.scale(scale_x, scale_y);
    }
}

/// Remaps faces detected on a `from` sized frame into `to` pixel space.
pub fn resize_results(
    mut faces: Vec<DetectedFace>,
    from: Dimensions,
    to: Dimensions,
) -> Vec<DetectedFace> {
    if from == to || from.width == 0 || from.height == 0 {
        return faces;
    }

    let scale_x = to.width as f32 / from.width as f32;
    let scale_y = to.height as f32 / from.height as f32;
    for face in faces.iter_mut() {
        face.scale(scale_x, scale_y);
    }

    faces
}
