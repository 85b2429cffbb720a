use nalgebra::geometry::Point3;
use nalgebra::Vector2;

use crate::error::ArithmeticError;

/// Most pieces a single move may be cut into.
pub const MAX_SEGMENTS: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineSegment {
    pub start: Point3<f64>,
    pub end: Point3<f64>,
}

impl LineSegment {
    pub fn new(start: Point3<f64>, end: Point3<f64>) -> Self {
        LineSegment { start, end }
    }

    /// Length of the segment projected onto the X-Y plane
    pub fn planar_length(&self) -> f64 {
        Vector2::new(self.end.x - self.start.x, self.end.y - self.start.y).norm()
    }

    /// The point a fraction `t` of the way along the segment.
    /// `t = 0` is `start`, `t = 1` is `end`.
    pub fn point_at(&self, t: f64) -> Point3<f64> {
        self.start + (self.end - self.start) * t
    }

    /// Number of pieces needed so that no piece is longer than `max_len` in the X-Y plane.
    /// Zero-length (and Z-only) segments need exactly one piece. More than [`MAX_SEGMENTS`] is an
    /// error.
    pub fn pieces_for(&self, max_len: f64) -> Result<usize, ArithmeticError> {
        let length = self.planar_length();
        if length == 0.0 {
            return Ok(1);
        }
        let pieces = (length / max_len).ceil();
        if !(pieces.is_finite() && max_len > 0.0) || pieces > MAX_SEGMENTS as f64 {
            return Err(ArithmeticError::TooManySegments {
                length,
                max_segment_length: max_len,
            });
        }
        Ok((pieces as usize).max(1))
    }

    /// Split into `n` contiguous sub-segments of equal length.
    /// The end of piece `k` is exactly `point_at((k + 1) / n)`, so pieces chain without gaps and the
    /// last piece ends on `end`.
    pub fn subdivide(&self, n: usize) -> Vec<LineSegment> {
        let n = n.max(1);
        let mut pieces = Vec::with_capacity(n);
        let mut prev = self.start;
        for k in 0..n {
            let next = if k + 1 == n {
                self.end
            } else {
                self.point_at((k + 1) as f64 / n as f64)
            };
            pieces.push(LineSegment::new(prev, next));
            prev = next;
        }
        pieces
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::geometry::Point3;

    const EPSILON: f64 = 1e-10;

    fn points_equal(p1: Point3<f64>, p2: Point3<f64>) -> bool {
        (p1 - p2).norm() < EPSILON
    }

    #[test]
    fn test_planar_length_ignores_z() {
        let line = LineSegment::new(Point3::new(0.0, 0.0, 0.0), Point3::new(3.0, 4.0, 12.0));
        assert!((line.planar_length() - 5.0).abs() < EPSILON);
    }

    #[test]
    fn test_point_at() {
        let line = LineSegment::new(Point3::new(1.0, 2.0, 3.0), Point3::new(3.0, 6.0, 5.0));
        assert!(points_equal(line.point_at(0.0), line.start));
        assert!(points_equal(line.point_at(1.0), line.end));
        assert!(points_equal(line.point_at(0.5), Point3::new(2.0, 4.0, 4.0)));
    }

    #[test]
    fn test_pieces_for() {
        let line = LineSegment::new(Point3::new(0.0, 0.0, 5.0), Point3::new(20.0, 0.0, 5.0));
        assert_eq!(line.pieces_for(5.0), Ok(4));
        assert_eq!(line.pieces_for(6.0), Ok(4));
        assert_eq!(line.pieces_for(7.0), Ok(3));
        assert_eq!(line.pieces_for(100.0), Ok(1));
    }

    #[test]
    fn test_pieces_for_too_many() {
        let line = LineSegment::new(Point3::new(0.0, 0.0, 5.0), Point3::new(20.0, 0.0, 5.0));
        assert!(matches!(
            line.pieces_for(1e-300),
            Err(ArithmeticError::TooManySegments { .. })
        ));
        let far = LineSegment::new(Point3::new(0.0, 0.0, 5.0), Point3::new(1e18, 0.0, 5.0));
        assert!(far.pieces_for(1.0).is_err());
        let limit = LineSegment::new(
            Point3::new(0.0, 0.0, 5.0),
            Point3::new(MAX_SEGMENTS as f64, 0.0, 5.0),
        );
        assert_eq!(limit.pieces_for(1.0), Ok(MAX_SEGMENTS));
    }

    #[test]
    fn test_pieces_for_zero_length() {
        let line = LineSegment::new(Point3::new(4.0, 4.0, 0.2), Point3::new(4.0, 4.0, 0.4));
        assert_eq!(line.pieces_for(1.0), Ok(1));
        assert_eq!(line.pieces_for(0.0), Ok(1));
    }

    #[test]
    fn test_subdivide_chains() {
        let line = LineSegment::new(Point3::new(-3.0, 1.0, 0.5), Point3::new(7.0, -4.0, 1.5));
        let pieces = line.subdivide(7);
        assert_eq!(pieces.len(), 7);
        assert!(points_equal(pieces[0].start, line.start));
        assert!(points_equal(pieces[6].end, line.end));
        for pair in pieces.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        let total: f64 = pieces.iter().map(|p| p.planar_length()).sum();
        assert!((total - line.planar_length()).abs() < 1e-9);
    }

    #[test]
    fn test_subdivide_zero_is_one_piece() {
        let line = LineSegment::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 0.0, 0.0));
        let pieces = line.subdivide(0);
        assert_eq!(pieces.len(), 1);
        assert!(points_equal(pieces[0].end, line.end));
    }
}
