//! Pivot calibration: a tool rotated about a fixed tip.
//!
//! Each sample is a tool-to-reference pose `(R_i, t_i)`. The tip offset in
//! the tool frame `p_tip` and the pivot point in the reference frame
//! `p_pivot` satisfy `R_i p_tip + t_i = p_pivot` for every sample.

use log::debug;
use nalgebra::{DMatrix, DVector, Matrix3, Matrix4, Point3, Vector3};

use igt_nav_core::translation_matrix;

use crate::CalibrationError;

/// Fewest poses the least-squares solver accepts.
pub const MIN_PIVOT_SAMPLES: usize = 3;

const RANK_EPS: f64 = 1e-9;

/// Solved pivot calibration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PivotSolution {
    /// Tip-to-tool matrix: identity rotation, translation `p_tip`.
    pub tip_to_tool: Matrix4<f64>,
    /// Pivot point in the reference frame.
    pub pivot_point: Point3<f64>,
    pub rmse_mm: f64,
}

/// Accumulates tool poses and estimates the tip offset.
pub trait PivotSolver {
    /// Record one tool-to-reference pose.
    fn add_sample(&mut self, tool_to_reference: &Matrix4<f64>);
    fn sample_count(&self) -> usize;
    fn solve(&self) -> Result<PivotSolution, CalibrationError>;
    fn clear(&mut self);
}

/// Linear least squares over all poses, solved with an SVD.
#[derive(Clone, Debug, Default)]
pub struct LeastSquaresPivotSolver {
    poses: Vec<Matrix4<f64>>,
}

impl LeastSquaresPivotSolver {
    pub fn new() -> Self {
        Self::default()
    }
}

fn split_pose(m: &Matrix4<f64>) -> (Matrix3<f64>, Vector3<f64>) {
    (
        m.fixed_view::<3, 3>(0, 0).into_owned(),
        m.fixed_view::<3, 1>(0, 3).into_owned(),
    )
}

impl PivotSolver for LeastSquaresPivotSolver {
    fn add_sample(&mut self, tool_to_reference: &Matrix4<f64>) {
        self.poses.push(*tool_to_reference);
    }

    fn sample_count(&self) -> usize {
        self.poses.len()
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(self), fields(samples = self.poses.len())))]
    fn solve(&self) -> Result<PivotSolution, CalibrationError> {
        let n = self.poses.len();
        if n < MIN_PIVOT_SAMPLES {
            return Err(CalibrationError::NotEnoughSamples {
                got: n,
                needed: MIN_PIVOT_SAMPLES,
            });
        }

        // [R_i  -I] [p_tip; p_pivot] = -t_i
        let mut a = DMatrix::<f64>::zeros(3 * n, 6);
        let mut b = DVector::<f64>::zeros(3 * n);
        for (i, pose) in self.poses.iter().enumerate() {
            let (r, t) = split_pose(pose);
            a.view_mut((3 * i, 0), (3, 3)).copy_from(&r);
            a.view_mut((3 * i, 3), (3, 3))
                .copy_from(&(-Matrix3::<f64>::identity()));
            b.rows_mut(3 * i, 3).copy_from(&(-t));
        }

        let svd = a.svd(true, true);
        if svd.rank(RANK_EPS) < 6 {
            return Err(CalibrationError::Degenerate);
        }
        let x = svd
            .solve(&b, RANK_EPS)
            .map_err(|_| CalibrationError::Degenerate)?;
        let tip = Vector3::new(x[0], x[1], x[2]);
        let pivot = Point3::new(x[3], x[4], x[5]);

        let sum_sq: f64 = self
            .poses
            .iter()
            .map(|pose| {
                let (r, t) = split_pose(pose);
                (r * tip + t - pivot.coords).norm_squared()
            })
            .sum();
        let rmse_mm = (sum_sq / n as f64).sqrt();
        debug!("pivot solved from {n} poses: tip {tip:?}, rmse {rmse_mm:.3} mm");

        Ok(PivotSolution {
            tip_to_tool: translation_matrix(&tip),
            pivot_point: pivot,
            rmse_mm,
        })
    }

    fn clear(&mut self) {
        self.poses.clear();
    }
}

/// Solve, then accept iff the RMSE is below `threshold_mm`.
///
/// The solver's samples are cleared whatever the outcome, so a retry starts
/// from scratch.
pub fn gate_pivot<S: PivotSolver + ?Sized>(
    solver: &mut S,
    threshold_mm: f64,
) -> Result<PivotSolution, CalibrationError> {
    let solved = solver.solve();
    solver.clear();
    let solution = solved?;
    if solution.rmse_mm >= threshold_mm {
        return Err(CalibrationError::Rejected {
            rmse_mm: solution.rmse_mm,
        });
    }
    Ok(solution)
}
