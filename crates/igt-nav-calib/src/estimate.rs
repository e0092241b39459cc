//! Fixed-point calibration from a cloud of pointer-tip samples.

use igt_nav_core::translation_matrix;
use log::{debug, error};
use nalgebra::{Matrix4, Point3, Vector3};

use crate::CalibrationError;

/// RMSE reported when there are no samples to measure against, in millimeters.
pub const NO_DATA_RMSE_MM: f64 = 1000.0;

/// Per-axis mean of `samples`.
///
/// With no samples an error is logged and the origin is returned.
pub fn centroid(samples: &[Point3<f64>]) -> Point3<f64> {
    if samples.is_empty() {
        error!("no samples to average; using the origin");
        return Point3::origin();
    }
    let sum = samples
        .iter()
        .fold(Vector3::zeros(), |acc, p| acc + p.coords);
    Point3::from(sum / samples.len() as f64)
}

/// Root mean squared distance from `point` to `samples`.
///
/// With no samples an error is logged and [`NO_DATA_RMSE_MM`] is returned.
pub fn rmse_to_samples(point: &Point3<f64>, samples: &[Point3<f64>]) -> f64 {
    if samples.is_empty() {
        error!("no samples to measure against; reporting {NO_DATA_RMSE_MM} mm");
        return NO_DATA_RMSE_MM;
    }
    let sum_sq: f64 = samples.iter().map(|s| (point - s).norm_squared()).sum();
    (sum_sq / samples.len() as f64).sqrt()
}

/// Accepted fixed-point calibration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FixedPointResult {
    pub centroid: Point3<f64>,
    pub rmse_mm: f64,
    /// Translation-only matrix moving the tool point to the sensor frame.
    pub matrix: Matrix4<f64>,
}

/// Average the samples and accept them iff their spread is below
/// `threshold_mm`.
#[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(samples)))]
pub fn evaluate_fixed_point(
    samples: &[Point3<f64>],
    threshold_mm: f64,
) -> Result<FixedPointResult, CalibrationError> {
    let c = centroid(samples);
    let rmse_mm = rmse_to_samples(&c, samples);
    debug!(
        "fixed point from {} samples: centroid {:?}, rmse {rmse_mm:.3} mm",
        samples.len(),
        c.coords.as_slice()
    );
    if rmse_mm >= threshold_mm {
        return Err(CalibrationError::Rejected { rmse_mm });
    }
    Ok(FixedPointResult {
        centroid: c,
        rmse_mm,
        matrix: translation_matrix(&c.coords),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn triangle() -> Vec<Point3<f64>> {
        vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
            Point3::new(1.0, 2.0, 0.0),
        ]
    }

    #[test]
    fn centroid_and_rmse_of_three_points() {
        let samples = triangle();
        let c = centroid(&samples);
        assert_relative_eq!(c.x, 1.0, epsilon = 1e-12);
        assert_relative_eq!(c.y, 2.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(c.z, 0.0, epsilon = 1e-12);

        // squared distances 13/9, 13/9, 16/9
        let rmse = rmse_to_samples(&c, &samples);
        assert_relative_eq!(rmse, (42.0_f64 / 27.0).sqrt(), epsilon = 1e-12);
        assert_relative_eq!(rmse, 1.2472, epsilon = 1e-4);
    }

    #[test]
    fn empty_samples_use_sentinels() {
        assert_eq!(centroid(&[]), Point3::origin());
        assert_eq!(rmse_to_samples(&Point3::new(1.0, 2.0, 3.0), &[]), NO_DATA_RMSE_MM);
        assert!(matches!(
            evaluate_fixed_point(&[], 5.0),
            Err(CalibrationError::Rejected { rmse_mm }) if rmse_mm == NO_DATA_RMSE_MM
        ));
    }

    #[test]
    fn tight_cluster_is_accepted_as_translation() {
        let samples = triangle();
        let result = evaluate_fixed_point(&samples, 5.0).unwrap();
        assert_relative_eq!(result.matrix[(0, 3)], 1.0, epsilon = 1e-12);
        assert_relative_eq!(result.matrix[(1, 3)], 2.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(result.matrix[(2, 3)], 0.0, epsilon = 1e-12);
        assert_eq!(
            result.matrix.fixed_view::<3, 3>(0, 0).into_owned(),
            nalgebra::Matrix3::identity()
        );
    }

    #[test]
    fn threshold_is_exclusive() {
        let samples = vec![Point3::new(-1.0, 0.0, 0.0), Point3::new(1.0, 0.0, 0.0)];
        // rmse is exactly 1
        assert!(matches!(
            evaluate_fixed_point(&samples, 1.0),
            Err(CalibrationError::Rejected { rmse_mm }) if rmse_mm == 1.0
        ));
        assert!(evaluate_fixed_point(&samples, 1.0 + 1e-9).is_ok());
    }
}
