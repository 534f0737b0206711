//! Per-frame geometric features: eye spheres, head direction, eyelid heights.
//!
//! Every function here is total. Missing landmarks (occlusion, frame edge)
//! produce degenerate values, never errors.

use crate::config::{EyeOffset, PointerTuning};
use crate::landmarks;
use crate::types::{EyeSphere, FaceFeatures, HeadDirection, LandmarkFrame, Point2, Viewport};

fn adjust_position(p: Point2, offset: EyeOffset) -> Point2 {
    let z_scale = 1.0 + offset.z / 1000.0;
    Point2::new(p.x + offset.x * z_scale, p.y + offset.y * z_scale)
}

/// Fit a circle to an eye-socket point set.
///
/// Center is the mean of the offset-corrected points (plus `center_y_bias`),
/// radius the mean distance from the unbiased centroid. An empty set yields
/// [`EyeSphere::EMPTY`].
pub fn eye_sphere(points: &[Point2], offset: EyeOffset, center_y_bias: f32) -> EyeSphere {
    if points.is_empty() {
        return EyeSphere::EMPTY;
    }

    let adjusted: Vec<Point2> = points.iter().map(|&p| adjust_position(p, offset)).collect();
    let n = adjusted.len() as f32;
    let cx = adjusted.iter().map(|p| p.x).sum::<f32>() / n;
    let cy = adjusted.iter().map(|p| p.y).sum::<f32>() / n;
    let centroid = Point2::new(cx, cy);
    let radius = adjusted.iter().map(|p| p.distance(&centroid)).sum::<f32>() / n;

    EyeSphere {
        center_x: cx,
        center_y: cy + center_y_bias,
        radius,
        scaled_radius: radius * 2.0,
        z_scale: 1.0 + offset.z / 1000.0,
    }
}

/// Centroid of `points` shifted down by `y_offset`. Empty input gives the origin.
pub fn weighted_average_point(points: &[Point2], y_offset: f32) -> Point2 {
    if points.is_empty() {
        return Point2::ORIGIN;
    }
    let n = points.len() as f32;
    let sx: f32 = points.iter().map(|p| p.x).sum();
    let sy: f32 = points.iter().map(|p| p.y).sum();
    Point2::new(sx / n, sy / n + y_offset)
}

pub fn head_direction(from: Point2, to: Point2) -> HeadDirection {
    let dx = to.x - from.x;
    let dy = to.y - from.y;
    let magnitude = (dx * dx + dy * dy).sqrt();
    let angle = dy.atan2(dx);
    HeadDirection {
        normalized_x: angle.cos(),
        normalized_y: angle.sin(),
        magnitude,
    }
}

/// Vertical extent of an eyelid contour.
pub fn eye_height(points: &[Point2]) -> f32 {
    if points.is_empty() {
        return 0.0;
    }
    let min = points.iter().map(|p| p.y).fold(f32::INFINITY, f32::min);
    let max = points.iter().map(|p| p.y).fold(f32::NEG_INFINITY, f32::max);
    (max - min).abs()
}

pub fn extract(frame: &LandmarkFrame, tuning: &PointerTuning) -> FaceFeatures {
    let left_sphere = eye_sphere(
        &frame.subset(&landmarks::SPHERE_LEFT_EYE),
        tuning.left_eye_offset,
        tuning.sphere_center_y_bias,
    );
    let right_sphere = eye_sphere(
        &frame.subset(&landmarks::SPHERE_RIGHT_EYE),
        tuning.right_eye_offset,
        tuning.sphere_center_y_bias,
    );

    let contour = frame.subset(&landmarks::HEAD_CONTOUR);
    let (head_origin, head_direction) = match frame.get(landmarks::HEAD_DIRECTION_TARGET) {
        Some(target) if !contour.is_empty() => {
            let origin = weighted_average_point(&contour, tuning.face_weight_y_offset);
            (origin, head_direction(origin, target))
        }
        _ => (Point2::ORIGIN, HeadDirection::default()),
    };

    FaceFeatures {
        left_sphere,
        right_sphere,
        left_pupil: frame.get(landmarks::LEFT_PUPIL),
        right_pupil: frame.get(landmarks::RIGHT_PUPIL),
        head_origin,
        head_direction,
        left_eye_height: eye_height(&frame.subset(&landmarks::LEFT_EYELID)),
        right_eye_height: eye_height(&frame.subset(&landmarks::RIGHT_EYELID)),
    }
}

/// Map detector pixel coordinates onto the viewport. `stretch` widens the
/// horizontal axis and recenters the result.
pub fn project_to_viewport(frame: &LandmarkFrame, viewport: Viewport, stretch: f32) -> LandmarkFrame {
    if frame.width == 0 || frame.height == 0 {
        return frame.clone();
    }
    let fw = frame.width as f32;
    let fh = frame.height as f32;
    let scale_x = viewport.width / fw * stretch;
    let scale_y = viewport.height / fh;
    let offset_x = (fw * scale_x - viewport.width) / 2.0;

    let points = frame
        .points
        .iter()
        .map(|p| Point2::new(p.x * scale_x - offset_x, p.y * scale_y))
        .collect();

    LandmarkFrame {
        timestamp_ms: frame.timestamp_ms,
        width: viewport.width.max(0.0) as u32,
        height: viewport.height.max(0.0) as u32,
        points,
    }
}
