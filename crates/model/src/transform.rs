#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

// Points closer than this to the projection plane are treated as unmappable.
const MIN_PROJECTIVE_W: f64 = 1e-9;

/// Row-major 3x3 matrix acting on column vectors `(x, y, 1)`.
///
/// The bottom row is `[0, 0, 1]` for affine transforms; anything else is a
/// perspective transform and mapped points are divided by `w`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    m: [f64; 9],
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Self = Self {
        m: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
    };

    pub const fn from_rows(m: [f64; 9]) -> Self {
        Self { m }
    }

    pub const fn translate(delta_x: f64, delta_y: f64) -> Self {
        Self {
            m: [1.0, 0.0, delta_x, 0.0, 1.0, delta_y, 0.0, 0.0, 1.0],
        }
    }

    pub const fn scale(scale_x: f64, scale_y: f64) -> Self {
        Self {
            m: [scale_x, 0.0, 0.0, 0.0, scale_y, 0.0, 0.0, 0.0, 1.0],
        }
    }

    pub fn rotate(radians: f64) -> Self {
        let (sine, cosine) = radians.sin_cos();
        Self {
            m: [cosine, -sine, 0.0, sine, cosine, 0.0, 0.0, 0.0, 1.0],
        }
    }

    pub fn rows(&self) -> [f64; 9] {
        self.m
    }

    /// Returns the transform that applies `self` first and `next` afterwards.
    pub fn then(&self, next: &Transform) -> Transform {
        let a = &next.m;
        let b = &self.m;
        let mut m = [0.0; 9];
        for row in 0..3 {
            for column in 0..3 {
                m[row * 3 + column] = a[row * 3] * b[column]
                    + a[row * 3 + 1] * b[3 + column]
                    + a[row * 3 + 2] * b[6 + column];
            }
        }
        Transform { m }
    }

    pub fn is_affine(&self) -> bool {
        self.m[6] == 0.0 && self.m[7] == 0.0 && self.m[8] == 1.0
    }

    pub fn is_finite(&self) -> bool {
        self.m.iter().all(|value| value.is_finite())
    }

    pub fn map_point(&self, point: Point) -> Option<Point> {
        let m = &self.m;
        let x = m[0] * point.x + m[1] * point.y + m[2];
        let y = m[3] * point.x + m[4] * point.y + m[5];
        let w = m[6] * point.x + m[7] * point.y + m[8];
        if w <= MIN_PROJECTIVE_W {
            return None;
        }
        let mapped = Point::new(x / w, y / w);
        (mapped.x.is_finite() && mapped.y.is_finite()).then_some(mapped)
    }

    /// Bounds of the four mapped corners, or `None` if any corner cannot be mapped.
    pub fn map_bounds(&self, min: Point, max: Point) -> Option<(Point, Point)> {
        let corners = [
            Point::new(min.x, min.y),
            Point::new(max.x, min.y),
            Point::new(max.x, max.y),
            Point::new(min.x, max.y),
        ];
        let mut low = Point::new(f64::INFINITY, f64::INFINITY);
        let mut high = Point::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
        for corner in corners {
            let mapped = self.map_point(corner)?;
            low.x = low.x.min(mapped.x);
            low.y = low.y.min(mapped.y);
            high.x = high.x.max(mapped.x);
            high.y = high.y.max(mapped.y);
        }
        Some((low, high))
    }

    pub fn determinant(&self) -> f64 {
        let m = &self.m;
        m[0] * (m[4] * m[8] - m[5] * m[7]) - m[1] * (m[3] * m[8] - m[5] * m[6])
            + m[2] * (m[3] * m[7] - m[4] * m[6])
    }

    pub fn inverse(&self) -> Option<Transform> {
        let det = self.determinant();
        if !det.is_finite() || det.abs() <= f64::EPSILON {
            return None;
        }
        let m = &self.m;
        let adjugate = [
            m[4] * m[8] - m[5] * m[7],
            m[2] * m[7] - m[1] * m[8],
            m[1] * m[5] - m[2] * m[4],
            m[5] * m[6] - m[3] * m[8],
            m[0] * m[8] - m[2] * m[6],
            m[2] * m[3] - m[0] * m[5],
            m[3] * m[7] - m[4] * m[6],
            m[1] * m[6] - m[0] * m[7],
            m[0] * m[4] - m[1] * m[3],
        ];
        let inverse = Transform {
            m: adjugate.map(|value| value / det),
        };
        inverse.is_finite().then_some(inverse)
    }

    /// Average linear scale of the affine part, used to size stroke widths and blur radii.
    pub fn approximate_scale(&self) -> f64 {
        let linear = (self.m[0] * self.m[4] - self.m[1] * self.m[3]).abs();
        let scale = linear.sqrt();
        if scale.is_finite() { scale } else { 1.0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_point_eq(actual: Point, expected: Point) {
        assert!(
            (actual.x - expected.x).abs() < 1e-9 && (actual.y - expected.y).abs() < 1e-9,
            "expected {expected:?}, got {actual:?}"
        );
    }

    #[test]
    fn then_applies_left_transform_first() {
        let transform = Transform::scale(2.0, 2.0).then(&Transform::translate(10.0, 0.0));
        let mapped = transform.map_point(Point::new(1.0, 1.0)).expect("affine maps");
        assert_point_eq(mapped, Point::new(12.0, 2.0));
    }

    #[test]
    fn inverse_round_trips_a_point() {
        let transform = Transform::rotate(0.3)
            .then(&Transform::scale(3.0, 0.5))
            .then(&Transform::translate(-4.0, 9.0));
        let inverse = transform.inverse().expect("invertible");
        let point = Point::new(7.5, -2.25);
        let mapped = transform.map_point(point).expect("maps");
        assert_point_eq(inverse.map_point(mapped).expect("maps back"), point);
    }

    #[test]
    fn perspective_points_behind_the_plane_are_rejected() {
        let transform = Transform::from_rows([1.0, 0.0, 0.0, 0.0, 1.0, 0.0, -0.01, 0.0, 1.0]);
        assert!(transform.map_point(Point::new(50.0, 0.0)).is_some());
        assert!(transform.map_point(Point::new(200.0, 0.0)).is_none());
        assert!(!transform.is_affine());
    }

    #[test]
    fn singular_transform_has_no_inverse() {
        assert!(Transform::scale(0.0, 1.0).inverse().is_none());
    }
}
