use super::point::Point;

/// Axis aligned box, anchored at its top-left corner.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Rect {
        Rect { x, y, w, h }
    }

    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Rect {
        Rect {
            x: x1.min(x2),
            y: y1.min(y2),
            w: (x2 - x1).abs(),
            h: (y2 - y1).abs(),
        }
    }

    pub fn left(&self) -> f32 {
        self.x
    }
    pub fn right(&self) -> f32 {
        self.x + self.w
    }
    pub fn top(&self) -> f32 {
        self.y
    }
    pub fn bottom(&self) -> f32 {
        self.y + self.h
    }
    pub fn area(&self) -> f32 {
        self.w * self.h
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.w / 2., self.y + self.h / 2.)
    }

    pub fn overlap_pct(&self, other: &Rect) -> f32 {
        let x_min = self.left().max(other.left());
        let x_max = self.right().min(other.right());
        let y_min = self.top().max(other.top());
        let y_max = self.bottom().min(other.bottom());

        let overlap_area = if x_min < x_max && y_min < y_max {
            (x_max - x_min) * (y_max - y_min)
        } else {
            0.
        };

        let area_delta = self.area() + other.area() - overlap_area;

        if area_delta > 0. {
            overlap_area / area_delta * 100.
        } else {
            0.
        }
    }

    pub fn scale(&mut self, scale_x: f32, scale_y: f32) -> Rect {
        self.x *= scale_x;
        self.y *= scale_y;
        self.w *= scale_x;
        self.h *= scale_y;

        *self
    }

    /// Grows the box around its center into a square padded by `pad` (0.1 =
    /// 10% per side), clamped to a `width`x`height` image.
    pub fn square_padded(&self, pad: f32, width: u32, height: u32) -> Rect {
        let side = self.w.max(self.h) * (1. + 2. * pad);
        let c = self.center();

        let left = (c.x - side / 2.).max(0.);
        let top = (c.y - side / 2.).max(0.);
        let right = (c.x + side / 2.).min(width as f32);
        let bottom = (c.y + side / 2.).min(height as f32);

        Rect::from_corners(left, top, right.max(left), bottom.max(top))
    }
}

impl From<Rect> for imageproc::rect::Rect {
    fn from(r: Rect) -> imageproc::rect::Rect {
        // imageproc panics on empty rects
        imageproc::rect::Rect::at(r.x.round() as i32, r.y.round() as i32)
            .of_size((r.w.round() as u32).max(1), (r.h.round() as u32).max(1))
    }
}
