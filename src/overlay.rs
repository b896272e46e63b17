//! Overlay drawing. A tick turns a face into a list of [`DrawOp`]s which the
//! [`Canvas`] then rasterises with imageproc.

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use anyhow::Result;
use image::{Rgba, RgbaImage};
use imageproc::drawing;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::SmileError;
use crate::face::{DetectedFace, Dimensions};
use crate::shapes::point::Point;
use crate::shapes::rect::Rect;

pub const OVERLAY_GREEN: Rgba<u8> = Rgba([0, 255, 0, 255]);
const LINE_WIDTH: u32 = 2;
const FONT_SIZE: f32 = 16.;
const LABEL_SPACING: f32 = 20.;
const LABEL_OFFSET: f32 = 10.;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OverlayStyle {
    /// Outline of the lips only
    #[default]
    Mouth,
    /// Every landmark contour
    Landmarks,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    StrokeRect(Rect),
    Polyline { points: Vec<Point>, closed: bool },
    /// `at` is the text baseline origin
    Text { at: Point, text: String },
}

pub fn face_ops(face: &DetectedFace, style: OverlayStyle) -> Vec<DrawOp> {
    let mut ops = vec![DrawOp::StrokeRect(face.bounding_box)];

    match style {
        OverlayStyle::Mouth => {
            let mouth = face.landmarks.mouth();
            // upper lip 0..=6, lower lip 6..=11 and back to the left corner
            ops.push(DrawOp::Polyline {
                points: mouth[0..=6].to_vec(),
                closed: false,
            });
            let mut lower = mouth[6..12].to_vec();
            lower.push(mouth[0]);
            ops.push(DrawOp::Polyline {
                points: lower,
                closed: false,
            });
        }
        OverlayStyle::Landmarks => {
            for contour in face.landmarks.contours() {
                ops.push(DrawOp::Polyline {
                    points: contour.points.to_vec(),
                    closed: contour.closed,
                });
            }
        }
    }

    let bbox = face.bounding_box;
    for (idx, (label, probability)) in face.expressions.iter().enumerate() {
        ops.push(DrawOp::Text {
            at: Point::new(bbox.x, bbox.y - LABEL_OFFSET - idx as f32 * LABEL_SPACING),
            text: format!("{label}: {probability:.2}"),
        });
    }

    ops
}

/// Transparent RGBA surface layered over the video.
pub struct Canvas {
    img: RgbaImage,
    font: Option<FontVec>,
    color: Rgba<u8>,
}

impl Canvas {
    pub fn new(size: Dimensions) -> Canvas {
        Canvas {
            img: RgbaImage::new(size.width, size.height),
            font: None,
            color: OVERLAY_GREEN,
        }
    }

    pub fn with_color(mut self, color: Rgba<u8>) -> Canvas {
        self.color = color;
        self
    }

    /// Labels are skipped when no font could be loaded.
    pub fn with_font_file(mut self, path: &Path) -> Canvas {
        match std::fs::read(path)
            .map_err(anyhow::Error::from)
            .and_then(|bytes| FontVec::try_from_vec(bytes).map_err(anyhow::Error::from))
        {
            Ok(font) => self.font = Some(font),
            Err(e) => warn!("Could not load font {}, labels disabled: {e}", path.display()),
        }
        self
    }

    pub fn dimensions(&self) -> Dimensions {
        Dimensions::of(&self.img)
    }

    pub fn image(&self) -> &RgbaImage {
        &self.img
    }

    pub fn clear(&mut self) {
        for px in self.img.pixels_mut() {
            *px = Rgba([0, 0, 0, 0]);
        }
    }

    pub fn draw(&mut self, ops: &[DrawOp]) {
        for op in ops {
            match op {
                DrawOp::StrokeRect(r) => {
                    for inset in 0..LINE_WIDTH {
                        let i = inset as f32;
                        let r = Rect::new(r.x + i, r.y + i, r.w - 2. * i, r.h - 2. * i);
                        drawing::draw_hollow_rect_mut(&mut self.img, r.into(), self.color);
                    }
                }
                DrawOp::Polyline { points, closed } => {
                    for pair in points.windows(2) {
                        self.thick_line(pair[0], pair[1]);
                    }
                    if let (true, Some(first), Some(last)) = (*closed, points.first(), points.last())
                    {
                        self.thick_line(*last, *first);
                    }
                }
                DrawOp::Text { at, text } => match &self.font {
                    Some(font) => {
                        // imageproc positions text by its top-left corner
                        let y = at.y - FONT_SIZE;
                        drawing::draw_text_mut(
                            &mut self.img,
                            self.color,
                            at.x.round() as i32,
                            y.round() as i32,
                            PxScale::from(FONT_SIZE),
                            font,
                            text,
                        );
                    }
                    None => debug!("No font, skipping label {text:?}"),
                },
            }
        }
    }

    fn thick_line(&mut self, from: Point, to: Point) {
        drawing::draw_line_segment_mut(&mut self.img, from.into(), to.into(), self.color);
        // second pass one pixel down/right gives a 2px stroke
        let shifted = |p: Point| (p.x + 1., p.y + 1.);
        drawing::draw_line_segment_mut(&mut self.img, shifted(from), shifted(to), self.color);
    }

    /// Writes the canvas as PNG.
    pub fn export_png(&self, path: &Path) -> Result<()> {
        self.img
            .save_with_format(path, image::ImageFormat::Png)
            .map_err(|e| SmileError::Export {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    /// The canvas alpha-blended over `frame`, resized to the frame if needed.
    pub fn composite_over(&self, frame: &image::RgbImage) -> RgbaImage {
        let mut out = image::DynamicImage::ImageRgb8(frame.clone()).into_rgba8();
        if Dimensions::of(&out) == self.dimensions() {
            image::imageops::overlay(&mut out, &self.img, 0, 0);
        } else {
            let scaled = image::imageops::resize(
                &self.img,
                out.width(),
                out.height(),
                image::imageops::FilterType::Nearest,
            );
            image::imageops::overlay(&mut out, &scaled, 0, 0);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::Expressions;
    use crate::face::tests::landmarks_with_mouth;

    fn face() -> DetectedFace {
        let outer: Vec<(f32, f32)> = (0..12).map(|i| (100. + i as f32 * 5., 150.)).collect();
        DetectedFace {
            bounding_box: Rect::new(50., 60., 120., 140.),
            landmarks: landmarks_with_mouth(&outer),
            expressions: [("neutral", 0.1), ("happy", 0.82)].into_iter().collect(),
        }
    }

    #[test]
    fn test_mouth_ops() {
        let ops = face_ops(&face(), OverlayStyle::Mouth);

        assert_eq!(ops[0], DrawOp::StrokeRect(Rect::new(50., 60., 120., 140.)));
        match (&ops[1], &ops[2]) {
            (
                DrawOp::Polyline { points: upper, .. },
                DrawOp::Polyline { points: lower, .. },
            ) => {
                assert_eq!(upper.len(), 7);
                assert_eq!(lower.len(), 7);
                assert_eq!(lower.first(), upper.last());
                assert_eq!(lower.last(), upper.first());
            }
            other => panic!("unexpected ops {other:?}"),
        }
        assert_eq!(
            ops[3],
            DrawOp::Text {
                at: Point::new(50., 50.),
                text: "neutral: 0.10".to_string()
            }
        );
        assert_eq!(
            ops[4],
            DrawOp::Text {
                at: Point::new(50., 30.),
                text: "happy: 0.82".to_string()
            }
        );
    }

    #[test]
    fn test_landmark_ops() {
        let mut f = face();
        f.expressions = Expressions::default();
        let ops = face_ops(&f, OverlayStyle::Landmarks);
        // box + 9 contours, no labels
        assert_eq!(ops.len(), 10);
    }

    #[test]
    fn test_draw_and_clear() {
        let mut canvas = Canvas::new(Dimensions::new(320, 240));
        canvas.draw(&face_ops(&face(), OverlayStyle::Mouth));

        assert_eq!(canvas.image().get_pixel(50, 60), &OVERLAY_GREEN);
        assert_eq!(canvas.image().get_pixel(51, 100), &OVERLAY_GREEN);
        assert_eq!(canvas.image().get_pixel(110, 150), &OVERLAY_GREEN);
        assert_eq!(canvas.image().get_pixel(5, 5), &Rgba([0, 0, 0, 0]));

        canvas.clear();
        assert!(canvas.image().pixels().all(|p| p[3] == 0));
    }

    #[test]
    fn test_export_and_composite() {
        let mut canvas = Canvas::new(Dimensions::new(40, 30));
        canvas.draw(&[DrawOp::StrokeRect(Rect::new(0., 0., 40., 30.))]);

        let path = std::env::temp_dir().join("smilecam-overlay-test.png");
        canvas.export_png(&path).unwrap();
        let saved = image::open(&path).unwrap().into_rgba8();
        assert_eq!(saved.dimensions(), (40, 30));
        assert_eq!(saved.get_pixel(0, 0), &OVERLAY_GREEN);
        std::fs::remove_file(&path).unwrap();

        let frame = image::RgbImage::from_pixel(40, 30, image::Rgb([10, 10, 10]));
        let out = canvas.composite_over(&frame);
        assert_eq!(out.get_pixel(0, 0), &OVERLAY_GREEN);
        assert_eq!(out.get_pixel(20, 15), &Rgba([10, 10, 10, 255]));
    }
}
