//! Face mesh landmark indices (478-point topology with iris refinement).
//!
//! The detector must keep this numbering exactly; every geometric feature
//! downstream is keyed on it.

/// Minimum landmark count a frame needs for the iris points to exist.
pub const MIN_LANDMARKS: usize = 478;

/// Socket ring used to fit the right eye sphere.
pub const SPHERE_RIGHT_EYE: [usize; 16] = [
    359, 467, 260, 259, 257, 258, 286, 414, 463, 341, 256, 252, 253, 254, 339, 255,
];

/// Socket ring used to fit the left eye sphere.
pub const SPHERE_LEFT_EYE: [usize; 16] = [
    130, 247, 30, 29, 27, 28, 56, 190, 243, 112, 26, 22, 23, 24, 110, 25,
];

/// Eyelid contour, right eye. Its vertical extent is the eye opening height.
pub const RIGHT_EYELID: [usize; 16] = [
    362, 398, 384, 385, 386, 387, 388, 382, 381, 380, 374, 373, 390, 466, 263, 249,
];

/// Eyelid contour, left eye.
pub const LEFT_EYELID: [usize; 16] = [
    246, 161, 160, 159, 158, 157, 7, 163, 144, 145, 153, 154, 33, 155, 173, 133,
];

pub const RIGHT_PUPIL: usize = 473;
pub const LEFT_PUPIL: usize = 468;

/// Forehead and temple contour averaged for the head origin.
pub const HEAD_CONTOUR: [usize; 15] = [
    127, 162, 21, 54, 103, 67, 109, 10, 338, 297, 332, 284, 251, 389, 356,
];

/// Nose bridge; the head direction points from the contour centroid here.
pub const HEAD_DIRECTION_TARGET: usize = 9;
