#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Point {
        Point { x, y }
    }

    pub fn scale(&mut self, scale_x: f32, scale_y: f32) -> Point {
        self.x *= scale_x;
        self.y *= scale_y;

        *self
    }
}

impl From<Point> for (f32, f32) {
    fn from(p: Point) -> (f32, f32) {
        (p.x, p.y)
    }
}

impl From<(f32, f32)> for Point {
    fn from((x, y): (f32, f32)) -> Point {
        Point { x, y }
    }
}
