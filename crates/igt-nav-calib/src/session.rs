//! Timed calibration workflow over a scene.
//!
//! A session runs at most one calibration at a time. Callers start it, then
//! call [`CalibrationSession::tick`] periodically from the thread that owns
//! the scene; once the window expires the result is gated and, if accepted,
//! written to the result transform and the settings store.

use std::time::{Duration, Instant};

use igt_nav_collect::{CollectorConfig, FiducialCollector, StartOutcome};
use igt_nav_core::{NodeId, PoseSubscription, PoseWatch, Scene, SettingsStore};
use log::{debug, info, warn};
use nalgebra::Matrix4;

use crate::estimate::evaluate_fixed_point;
use crate::params::CalibrationParams;
use crate::pivot::{gate_pivot, LeastSquaresPivotSolver, PivotSolver};
use crate::window::CalibrationWindow;
use crate::CalibrationError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CalibrationKind {
    Pivot,
    FixedPoint,
}

/// Where an accepted calibration is stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CalibrationTarget {
    /// Transform node receiving the matrix.
    pub node: NodeId,
    /// Settings parameter name the matrix is persisted under.
    pub settings_name: String,
}

/// Inputs of a fixed-point calibration: the pointer tip is held against a
/// point fixed on the tool while both move.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixedPointInputs {
    pub pointer_tip: NodeId,
    pub tool_sensor: NodeId,
    /// Point list receiving the pointer tip in the sensor frame.
    pub samples: NodeId,
}

/// Accepted calibration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CalibrationReport {
    pub kind: CalibrationKind,
    pub matrix: Matrix4<f64>,
    pub rmse_mm: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CalibrationStatus {
    Idle,
    Sampling { kind: CalibrationKind, remaining: Duration },
    Completed(CalibrationReport),
}

#[derive(Debug)]
enum Mode {
    Pivot { subscription: PoseSubscription },
    FixedPoint { samples: NodeId },
}

#[derive(Debug)]
struct Running {
    mode: Mode,
    window: CalibrationWindow,
    target: CalibrationTarget,
}

/// Pivot and fixed-point calibration sharing one scene.
#[derive(Debug)]
pub struct CalibrationSession<S = LeastSquaresPivotSolver> {
    params: CalibrationParams,
    configuration: String,
    solver: S,
    collector: FiducialCollector,
    running: Option<Running>,
}

impl CalibrationSession<LeastSquaresPivotSolver> {
    pub fn new(params: CalibrationParams, configuration: &str) -> Self {
        Self::with_solver(params, configuration, LeastSquaresPivotSolver::new())
    }
}

impl<S: PivotSolver> CalibrationSession<S> {
    pub fn with_solver(params: CalibrationParams, configuration: &str, solver: S) -> Self {
        Self {
            params,
            configuration: configuration.to_owned(),
            solver,
            collector: FiducialCollector::default(),
            running: None,
        }
    }

    pub fn params(&self) -> &CalibrationParams {
        &self.params
    }

    pub fn set_params(&mut self, params: CalibrationParams) {
        self.params = params;
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }

    pub fn running_kind(&self) -> Option<CalibrationKind> {
        self.running.as_ref().map(|r| match r.mode {
            Mode::Pivot { .. } => CalibrationKind::Pivot,
            Mode::FixedPoint { .. } => CalibrationKind::FixedPoint,
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Record the matrix of `tool` to its parent (the reference) on every
    /// change of it. Each change contributes the pose it set.
    pub fn start_pivot(
        &mut self,
        scene: &mut Scene,
        tool: NodeId,
        target: CalibrationTarget,
        now: Instant,
    ) -> Result<(), CalibrationError> {
        self.ensure_idle()?;
        scene.matrix_to_parent(tool)?;
        scene.matrix_to_parent(target.node)?;

        self.solver.clear();
        let subscription = scene.subscribe_pose(PoseWatch::Local(tool));
        let window = CalibrationWindow::from_secs_f64(now, self.params.pivot_duration_sec);
        info!(
            "pivot calibration of '{}' started for {} s",
            target.settings_name, self.params.pivot_duration_sec
        );
        self.running = Some(Running {
            mode: Mode::Pivot { subscription },
            window,
            target,
        });
        Ok(())
    }

    /// Collect the pointer tip in the tool sensor frame on every move.
    pub fn start_fixed_point(
        &mut self,
        scene: &mut Scene,
        inputs: FixedPointInputs,
        target: CalibrationTarget,
        now: Instant,
    ) -> Result<(), CalibrationError> {
        self.ensure_idle()?;
        scene.matrix_to_parent(target.node)?;
        scene.clear_points(inputs.samples)?;

        self.collector.set_config(CollectorConfig {
            minimum_add_distance_mm: 0.0,
            allow_point_removals: false,
            force_constant_point_distance: false,
        });
        self.collector.set_source(Some(inputs.pointer_tip));
        self.collector.set_target(Some(inputs.tool_sensor));
        self.collector.set_point_list(Some(inputs.samples));
        match self.collector.start_collection(scene)? {
            StartOutcome::MissingInput(missing) => {
                return Err(CalibrationError::MissingInput(missing));
            }
            StartOutcome::Started | StartOutcome::AlreadyCollecting => {}
        }

        let window = CalibrationWindow::from_secs_f64(now, self.params.fixed_point_duration_sec);
        info!(
            "fixed point calibration of '{}' started for {} s",
            target.settings_name, self.params.fixed_point_duration_sec
        );
        self.running = Some(Running {
            mode: Mode::FixedPoint {
                samples: inputs.samples,
            },
            window,
            target,
        });
        Ok(())
    }

    /// Take in pending samples and finish the calibration once its window
    /// has expired.
    ///
    /// A rejected calibration ends the session with
    /// [`CalibrationError::Rejected`]; the scene transform and settings are
    /// left untouched and the samples are discarded.
    pub fn tick(
        &mut self,
        scene: &mut Scene,
        settings: &mut SettingsStore,
        now: Instant,
    ) -> Result<CalibrationStatus, CalibrationError> {
        let Some(running) = &self.running else {
            return Ok(CalibrationStatus::Idle);
        };
        let kind = match &running.mode {
            Mode::Pivot { subscription } => {
                for sample in subscription.drain() {
                    self.solver.add_sample(&sample.matrix?);
                }
                CalibrationKind::Pivot
            }
            Mode::FixedPoint { .. } => {
                self.collector.process_pending(scene)?;
                CalibrationKind::FixedPoint
            }
        };
        if !running.window.is_expired(now) {
            return Ok(CalibrationStatus::Sampling {
                kind,
                remaining: running.window.remaining(now),
            });
        }

        let Some(running) = self.running.take() else {
            return Ok(CalibrationStatus::Idle);
        };
        let name = &running.target.settings_name;
        let report = match self.finish(scene, &running.mode) {
            Ok(report) => report,
            Err(e) => {
                warn!("calibration of '{name}' failed: {e}; please calibrate again");
                return Err(e);
            }
        };
        scene.set_matrix_to_parent(running.target.node, report.matrix)?;
        settings.write_transform(name, &report.matrix, &self.configuration);
        info!(
            "calibration of '{name}' completed, error = {:.3} mm",
            report.rmse_mm
        );
        Ok(CalibrationStatus::Completed(report))
    }

    /// Abort the running calibration without storing anything.
    pub fn cancel(&mut self, scene: &mut Scene) {
        if let Some(running) = self.running.take() {
            match &running.mode {
                Mode::Pivot { subscription, .. } => {
                    scene.unsubscribe(subscription.id());
                    self.solver.clear();
                }
                Mode::FixedPoint { .. } => self.collector.stop_collection(scene),
            }
            debug!("calibration of '{}' cancelled", running.target.settings_name);
        }
    }

    fn ensure_idle(&self) -> Result<(), CalibrationError> {
        match self.running_kind() {
            Some(kind) => Err(CalibrationError::AlreadyRunning(kind)),
            None => Ok(()),
        }
    }

    /// Stop sampling and gate the result.
    fn finish(&mut self, scene: &mut Scene, mode: &Mode) -> Result<CalibrationReport, CalibrationError> {
        match mode {
            Mode::Pivot { subscription, .. } => {
                scene.unsubscribe(subscription.id());
                let solution = gate_pivot(&mut self.solver, self.params.pivot_error_threshold_mm)?;
                Ok(CalibrationReport {
                    kind: CalibrationKind::Pivot,
                    matrix: solution.tip_to_tool,
                    rmse_mm: solution.rmse_mm,
                })
            }
            Mode::FixedPoint { samples } => {
                self.collector.stop_collection(scene);
                let points = scene.points(*samples)?.to_vec();
                match evaluate_fixed_point(&points, self.params.fixed_point_error_threshold_mm) {
                    Ok(result) => Ok(CalibrationReport {
                        kind: CalibrationKind::FixedPoint,
                        matrix: result.matrix,
                        rmse_mm: result.rmse_mm,
                    }),
                    Err(e) => {
                        scene.clear_points(*samples)?;
                        Err(e)
                    }
                }
            }
        }
    }
}
