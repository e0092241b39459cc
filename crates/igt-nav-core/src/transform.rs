//! Helpers for 4×4 homogeneous transforms stored as flat row-major values.

use nalgebra::{Matrix4, Point3, Vector3};

/// Number of values in a flattened 4×4 matrix.
pub const MATRIX_VALUE_COUNT: usize = 16;

/// Build a matrix from 16 row-major values.
///
/// Index layout:
/// ```text
/// [  0,  1,  2,  3,
///    4,  5,  6,  7,
///    8,  9, 10, 11,
///   12, 13, 14, 15 ]
/// ```
///
/// Returns `None` when `values` does not hold exactly 16 entries.
pub fn matrix_from_row_values(values: &[f64]) -> Option<Matrix4<f64>> {
    if values.len() != MATRIX_VALUE_COUNT {
        return None;
    }
    Some(Matrix4::from_row_slice(values))
}

/// Flatten a matrix into 16 row-major values.
pub fn matrix_to_row_values(m: &Matrix4<f64>) -> [f64; MATRIX_VALUE_COUNT] {
    let mut out = [0.0; MATRIX_VALUE_COUNT];
    for r in 0..4 {
        for c in 0..4 {
            out[r * 4 + c] = m[(r, c)];
        }
    }
    out
}

/// Pure translation matrix.
pub fn translation_matrix(t: &Vector3<f64>) -> Matrix4<f64> {
    Matrix4::new_translation(t)
}

/// Rotation about the z axis by `degrees`.
pub fn rotation_z_degrees(degrees: f64) -> Matrix4<f64> {
    Matrix4::from_axis_angle(&Vector3::z_axis(), degrees.to_radians())
}

/// Translation component of a homogeneous transform, i.e. where the
/// transform takes the origin.
#[inline]
pub fn origin_of(m: &Matrix4<f64>) -> Point3<f64> {
    Point3::new(m[(0, 3)], m[(1, 3)], m[(2, 3)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn row_values_follow_row_major_layout() {
        let values: Vec<f64> = (0..16).map(|v| v as f64).collect();
        let m = matrix_from_row_values(&values).expect("16 values");
        assert_eq!(m[(0, 3)], 3.0);
        assert_eq!(m[(1, 0)], 4.0);
        assert_eq!(m[(3, 3)], 15.0);
        assert_eq!(matrix_to_row_values(&m).to_vec(), values);
    }

    #[test]
    fn wrong_value_count_is_rejected() {
        assert!(matrix_from_row_values(&[1.0; 15]).is_none());
        assert!(matrix_from_row_values(&[1.0; 17]).is_none());
    }

    #[test]
    fn rotation_z_quarter_turn_maps_x_to_y() {
        let m = rotation_z_degrees(90.0);
        let p = m.transform_point(&Point3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(p.x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(p.y, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn origin_of_reads_translation_column() {
        let m = translation_matrix(&Vector3::new(1.0, -2.0, 3.5));
        assert_eq!(origin_of(&m), Point3::new(1.0, -2.0, 3.5));
    }
}
