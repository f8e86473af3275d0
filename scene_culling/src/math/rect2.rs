use glam::Vec2;

/// Axis-aligned 2D rectangle (position + size).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect2 {
    pub position: Vec2,
    pub size: Vec2,
}

impl Rect2 {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            position: Vec2::new(x, y),
            size: Vec2::new(width, height),
        }
    }

    pub fn from_position_size(position: Vec2, size: Vec2) -> Self {
        Self { position, size }
    }

    /// Bottom-right corner.
    pub fn end(&self) -> Vec2 {
        self.position + self.size
    }

    pub fn has_no_area(&self) -> bool {
        self.size.x <= 0.0 || self.size.y <= 0.0
    }

    /// Overlap test; touching edges do not count.
    pub fn intersects(&self, other: &Rect2) -> bool {
        let a_end = self.end();
        let b_end = other.end();
        self.position.x < b_end.x
            && a_end.x > other.position.x
            && self.position.y < b_end.y
            && a_end.y > other.position.y
    }

    /// Grow the rectangle so that it contains `point`.
    pub fn expand_to(&mut self, point: Vec2) {
        let begin = self.position.min(point);
        let end = self.end().max(point);
        self.position = begin;
        self.size = end - begin;
    }

    /// Smallest rectangle containing both.
    pub fn merge(&self, other: &Rect2) -> Rect2 {
        let begin = self.position.min(other.position);
        let end = self.end().max(other.end());
        Rect2::from_position_size(begin, end - begin)
    }
}

#[cfg(test)]
#[path = "rect2_tests.rs"]
mod tests;
