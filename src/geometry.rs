//! Landmark geometry
//!
//! Pure functions turning raw landmark coordinates into derived metrics. Missing or
//! partial landmark sets return `None` ("undetermined"); nothing here panics or errors.
//!
//! Landmark positions are addressed through the named index tables below rather than
//! bare numbers, so a change in the upstream landmark model is a change in one place.

use crate::types::{BoundingBox, Point};

/// Face mesh index table (468-point face mesh).
pub mod face_mesh {
    /// Nose tip
    pub const NOSE_TIP: usize = 1;

    /// Six canonical points of one eye, in EAR order.
    ///
    /// `p1`/`p4` are the horizontal corners, `p2`/`p6` and `p3`/`p5` the vertical pairs.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EyeIndices {
        pub p1: usize,
        pub p2: usize,
        pub p3: usize,
        pub p4: usize,
        pub p5: usize,
        pub p6: usize,
    }

    impl EyeIndices {
        pub const fn as_array(&self) -> [usize; 6] {
            [self.p1, self.p2, self.p3, self.p4, self.p5, self.p6]
        }
    }

    /// Subject's left eye: outer corner 33, inner corner 133
    pub const LEFT_EYE: EyeIndices = EyeIndices {
        p1: 33,
        p2: 160,
        p3: 158,
        p4: 133,
        p5: 153,
        p6: 144,
    };

    /// Subject's right eye: inner corner 362, outer corner 263
    pub const RIGHT_EYE: EyeIndices = EyeIndices {
        p1: 362,
        p2: 385,
        p3: 387,
        p4: 263,
        p5: 373,
        p6: 380,
    };
}

/// Pose index table (33-point body pose).
pub mod pose {
    pub const LEFT_SHOULDER: usize = 11;
    pub const RIGHT_SHOULDER: usize = 12;
}

/// Hand index table (21-point hand).
pub mod hand {
    pub const THUMB_TIP: usize = 4;
    pub const INDEX_TIP: usize = 8;
}

/// Coarse "object held near the ear" measurement for one hand
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HandProximity {
    /// Distance between thumb tip and index tip
    pub tip_distance: f64,
    /// Normalized height of the index tip (0 = top of frame)
    pub tip_height: f64,
}

fn landmark(landmarks: &[Point], index: usize) -> Option<Point> {
    landmarks.get(index).copied().filter(Point::is_finite)
}

fn distance(a: Point, b: Point) -> f64 {
    ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt()
}

/// Eye aspect ratio over six canonical eye points.
///
/// Formula: `(|p2 - p6| + |p3 - p5|) / (2 * |p1 - p4|)`
///
/// `eye_indices` lists the points in `p1..p6` order. Returns `None` when fewer than six
/// indices are given, any point is missing, or the eye width is zero.
pub fn eye_aspect_ratio(landmarks: &[Point], eye_indices: &[usize]) -> Option<f64> {
    if eye_indices.len() < 6 {
        return None;
    }
    let p1 = landmark(landmarks, eye_indices[0])?;
    let p2 = landmark(landmarks, eye_indices[1])?;
    let p3 = landmark(landmarks, eye_indices[2])?;
    let p4 = landmark(landmarks, eye_indices[3])?;
    let p5 = landmark(landmarks, eye_indices[4])?;
    let p6 = landmark(landmarks, eye_indices[5])?;

    let width = distance(p1, p4);
    if width <= f64::EPSILON {
        return None;
    }
    Some((distance(p2, p6) + distance(p3, p5)) / (2.0 * width))
}

/// Average EAR of both eyes, or whichever eye is measurable
pub fn mean_eye_aspect_ratio(mesh: &[Point]) -> Option<f64> {
    let left = eye_aspect_ratio(mesh, &face_mesh::LEFT_EYE.as_array());
    let right = eye_aspect_ratio(mesh, &face_mesh::RIGHT_EYE.as_array());
    match (left, right) {
        (Some(l), Some(r)) => Some((l + r) / 2.0),
        (Some(v), None) | (None, Some(v)) => Some(v),
        (None, None) => None,
    }
}

/// Horizontal deviation of the nose tip from the midpoint of both eye centers.
///
/// Signed: positive when the nose sits right of the eye midpoint in image space.
pub fn gaze_offset(mesh: &[Point]) -> Option<f64> {
    let nose = landmark(mesh, face_mesh::NOSE_TIP)?;
    let left = eye_center(mesh, &face_mesh::LEFT_EYE)?;
    let right = eye_center(mesh, &face_mesh::RIGHT_EYE)?;
    let midpoint = (left.x + right.x) / 2.0;
    Some(nose.x - midpoint)
}

fn eye_center(mesh: &[Point], eye: &face_mesh::EyeIndices) -> Option<Point> {
    let a = landmark(mesh, eye.p1)?;
    let b = landmark(mesh, eye.p4)?;
    Some(Point::new((a.x + b.x) / 2.0, (a.y + b.y) / 2.0))
}

/// Normalized face area, a distance-from-camera proxy
pub fn face_area(bounding_box: &BoundingBox) -> Option<f64> {
    let area = bounding_box.width * bounding_box.height;
    if area.is_finite() && bounding_box.width >= 0.0 && bounding_box.height >= 0.0 {
        Some(area)
    } else {
        None
    }
}

/// Euclidean distance between two positions, a head-movement magnitude
pub fn displacement(prev: &Point, curr: &Point) -> Option<f64> {
    if prev.is_finite() && curr.is_finite() {
        Some(distance(*prev, *curr))
    } else {
        None
    }
}

/// Nose tip position used to track head movement
pub fn head_position(mesh: &[Point]) -> Option<Point> {
    landmark(mesh, face_mesh::NOSE_TIP)
}

/// Thumb/index tip distance plus index tip height for one hand
pub fn hand_proximity(hand_landmarks: &[Point]) -> Option<HandProximity> {
    let thumb = landmark(hand_landmarks, hand::THUMB_TIP)?;
    let index = landmark(hand_landmarks, hand::INDEX_TIP)?;
    Some(HandProximity {
        tip_distance: distance(index, thumb),
        tip_height: index.y,
    })
}

/// Vertical offset between the shoulders
pub fn shoulder_tilt(pose_landmarks: &[Point]) -> Option<f64> {
    let left = landmark(pose_landmarks, pose::LEFT_SHOULDER)?;
    let right = landmark(pose_landmarks, pose::RIGHT_SHOULDER)?;
    Some((left.y - right.y).abs())
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_eye_aspect_ratio_formula() {
        let mesh = face_mesh_with(0.0, 0.3);
        let ear = eye_aspect_ratio(&mesh, &face_mesh::LEFT_EYE.as_array()).unwrap();
        assert!((ear - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_eye_aspect_ratio_needs_six_points() {
        let mesh = face_mesh_with(0.0, 0.3);
        assert_eq!(eye_aspect_ratio(&mesh, &[33, 160, 158, 133, 153]), None);
    }

    #[test]
    fn test_eye_aspect_ratio_partial_mesh_is_undetermined() {
        let mesh = vec![Point::new(0.5, 0.5); 100];
        assert_eq!(eye_aspect_ratio(&mesh, &face_mesh::LEFT_EYE.as_array()), None);
        assert_eq!(mean_eye_aspect_ratio(&mesh), None);
    }

    #[test]
    fn test_eye_aspect_ratio_zero_width() {
        let mesh = vec![Point::new(0.5, 0.5); 468];
        assert_eq!(eye_aspect_ratio(&mesh, &face_mesh::LEFT_EYE.as_array()), None);
    }

    #[test]
    fn test_gaze_offset_sign() {
        assert!(gaze_offset(&face_mesh_with(0.0, 0.3)).unwrap().abs() < 1e-9);
        assert!((gaze_offset(&face_mesh_with(0.35, 0.3)).unwrap() - 0.35).abs() < 1e-9);
        assert!((gaze_offset(&face_mesh_with(-0.2, 0.3)).unwrap() + 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_gaze_offset_missing_nose() {
        assert_eq!(gaze_offset(&[]), None);
    }

    #[test]
    fn test_gaze_offset_nan_is_undetermined() {
        let mut mesh = face_mesh_with(0.0, 0.3);
        mesh[face_mesh::NOSE_TIP] = Point::new(f64::NAN, 0.5);
        assert_eq!(gaze_offset(&mesh), None);
    }

    #[test]
    fn test_face_area() {
        let bbox = BoundingBox {
            x: 0.2,
            y: 0.2,
            width: 0.4,
            height: 0.5,
        };
        assert!((face_area(&bbox).unwrap() - 0.2).abs() < 1e-9);

        let negative = BoundingBox {
            width: -0.1,
            ..bbox
        };
        assert_eq!(face_area(&negative), None);
    }

    #[test]
    fn test_displacement() {
        let d = displacement(&Point::new(0.0, 0.0), &Point::new(0.3, 0.4)).unwrap();
        assert!((d - 0.5).abs() < 1e-9);
        assert_eq!(
            displacement(&Point::new(f64::INFINITY, 0.0), &Point::new(0.0, 0.0)),
            None
        );
    }

    #[test]
    fn test_hand_proximity() {
        let hand_points = hand_with(Point::new(0.50, 0.25), Point::new(0.53, 0.21));
        let proximity = hand_proximity(&hand_points).unwrap();
        assert!((proximity.tip_distance - 0.05).abs() < 1e-9);
        assert!((proximity.tip_height - 0.21).abs() < 1e-9);

        assert_eq!(hand_proximity(&hand_points[..5]), None);
    }

    #[test]
    fn test_shoulder_tilt() {
        assert!((shoulder_tilt(&pose_with(0.6, 0.45)).unwrap() - 0.15).abs() < 1e-9);
        assert_eq!(shoulder_tilt(&[]), None);
    }
}
