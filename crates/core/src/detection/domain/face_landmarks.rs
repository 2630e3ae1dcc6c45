//! 5-point face landmarks in the order left eye, right eye, nose,
//! left mouth corner, right mouth corner.

pub const LEFT_EYE: usize = 0;
pub const RIGHT_EYE: usize = 1;
pub const NOSE: usize = 2;

#[derive(Clone, Debug, PartialEq)]
pub struct FaceLandmarks {
    /// Points with x <= 0 are treated as invisible.
    points: [(f64, f64); 5],
}

impl FaceLandmarks {
    pub fn new(points: [(f64, f64); 5]) -> Self {
        Self { points }
    }

    pub fn points(&self) -> &[(f64, f64); 5] {
        &self.points
    }

    pub fn has_visible(&self) -> bool {
        self.points.iter().any(|(x, _)| *x > 0.0)
    }

    /// True when every point is visible, which alignment requires.
    pub fn all_visible(&self) -> bool {
        self.points.iter().all(|(x, _)| *x > 0.0)
    }

    /// Multiplies every visible point by `factor`; invisible points stay at the origin.
    pub fn scaled(&self, factor: f64) -> Self {
        let mut points = self.points;
        for p in points.iter_mut() {
            if p.0 > 0.0 {
                *p = (p.0 * factor, p.1 * factor);
            }
        }
        Self { points }
    }

    /// Distance between the eyes, or `None` if either eye is invisible.
    pub fn eye_distance(&self) -> Option<f64> {
        let l = self.points[LEFT_EYE];
        let r = self.points[RIGHT_EYE];
        if l.0 <= 0.0 || r.0 <= 0.0 {
            return None;
        }
        Some(((r.0 - l.0).powi(2) + (r.1 - l.1).powi(2)).sqrt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::rstest;

    fn frontal_landmarks() -> FaceLandmarks {
        FaceLandmarks::new([
            (440.0, 350.0), // left_eye
            (560.0, 350.0), // right_eye
            (500.0, 420.0), // nose
            (460.0, 470.0), // left_mouth
            (540.0, 470.0), // right_mouth
        ])
    }

    #[test]
    fn test_has_visible_none_visible() {
        let lm = FaceLandmarks::new([(0.0, 0.0); 5]);
        assert!(!lm.has_visible());
        assert!(!lm.all_visible());
    }

    #[test]
    fn test_has_visible_one_visible() {
        let mut pts = [(0.0, 0.0); 5];
        pts[NOSE] = (100.0, 200.0);
        let lm = FaceLandmarks::new(pts);
        assert!(lm.has_visible());
        assert!(!lm.all_visible());
    }

    #[test]
    fn test_scaled_doubles_visible_points() {
        let lm = frontal_landmarks().scaled(2.0);
        assert_relative_eq!(lm.points()[NOSE].0, 1000.0);
        assert_relative_eq!(lm.points()[NOSE].1, 840.0);
    }

    #[test]
    fn test_scaled_keeps_invisible_points_at_origin() {
        let mut pts = [(10.0, 10.0); 5];
        pts[RIGHT_EYE] = (0.0, 0.0);
        let lm = FaceLandmarks::new(pts).scaled(2.0);
        assert_eq!(lm.points()[RIGHT_EYE], (0.0, 0.0));
        assert_eq!(lm.points()[LEFT_EYE], (20.0, 20.0));
    }

    #[test]
    fn test_eye_distance_frontal() {
        assert_relative_eq!(frontal_landmarks().eye_distance().unwrap(), 120.0);
    }

    const NOSE_AND_MOUTH: [(f64, f64); 3] = [(150.0, 100.0), (100.0, 100.0), (100.0, 100.0)];

    fn with_eyes(left: (f64, f64), right: (f64, f64)) -> [(f64, f64); 5] {
        let [nose, mouth_l, mouth_r] = NOSE_AND_MOUTH;
        [left, right, nose, mouth_l, mouth_r]
    }

    #[rstest]
    #[case::left_eye_invisible(with_eyes((0.0, 0.0), (200.0, 100.0)))]
    #[case::right_eye_invisible(with_eyes((100.0, 100.0), (0.0, 0.0)))]
    fn test_eye_distance_missing_eye_is_none(#[case] pts: [(f64, f64); 5]) {
        assert!(FaceLandmarks::new(pts).eye_distance().is_none());
    }
}
