//! OCP solver seam
//!
//! The numerical optimizer is an external collaborator: it consumes a
//! compiled problem description once, then per tick accepts stage-wise
//! setters for the primal guess and parameters and returns an integer
//! status plus retrievable stage values and named timings.
//!
//! The native backend lives in `acados_ffi` behind `feature = "acados"`;
//! the default build uses the scripted backend in [`crate::mock`].

use thiserror::Error;

use safempc_core::Vector;

use crate::config::SolverConfig;
use crate::constraints::CompiledConstraints;

/// Solver errors surfaced at construction or reconfiguration.
///
/// Per-tick non-convergence is *not* an error: it is a status value handled
/// by the warm-start fallback.
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("solver initialization failed with code {0}")]
    InitializationFailed(i32),
    #[error("problem dimensions not supported by this backend: {0}")]
    UnsupportedDimensions(String),
    #[error("invalid stage timing: {0}")]
    InvalidTiming(String),
}

/// Status codes returned by a solve call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum SolverStatus {
    Success = 0,
    NanDetected = 1,
    MaxIterations = 2,
    MinStep = 3,
    QpFailure = 4,
    Unknown = -1,
}

impl From<i32> for SolverStatus {
    fn from(code: i32) -> Self {
        match code {
            0 => SolverStatus::Success,
            1 => SolverStatus::NanDetected,
            2 => SolverStatus::MaxIterations,
            3 => SolverStatus::MinStep,
            4 => SolverStatus::QpFailure,
            _ => SolverStatus::Unknown,
        }
    }
}

impl SolverStatus {
    pub fn is_success(self) -> bool {
        self == SolverStatus::Success
    }
}

/// Named per-solve timing scalars [s].
#[derive(Debug, Clone, Copy, Default)]
pub struct SolveTimings {
    /// Total wall-clock time of the solve.
    pub total: f64,
    /// Time in constraint/dynamics linearization.
    pub lin: f64,
    /// Time in integration of the shooting intervals.
    pub sim: f64,
    /// Time in the QP subproblems.
    pub qp: f64,
}

/// Compiled problem description consumed by a backend at construction.
///
/// Bounds and constraint sets are immutable after compilation; only the
/// primal guess, stage parameters, references and stage timing change at
/// runtime.
#[derive(Debug, Clone)]
pub struct ProblemSpec {
    pub nx: usize,
    pub nu: usize,
    /// Horizon length N.
    pub horizon: usize,
    /// Stage durations, length N.
    pub time_steps: Vec<f64>,
    pub x_min: Vector,
    pub x_max: Vector,
    pub u_min: Vector,
    pub u_max: Vector,
    /// Diagonal of the state weight matrix Q.
    pub q_diag: Vec<f64>,
    /// Diagonal of the control weight matrix R.
    pub r_diag: Vec<f64>,
    /// Compiled stage-wise constraint sets.
    pub constraints: CompiledConstraints,
    /// Iteration caps.
    pub solver: SolverConfig,
}

impl ProblemSpec {
    /// Dimension of the stage reference vector `[x_ref, u_ref]`.
    pub fn ny(&self) -> usize {
        self.nx + self.nu
    }
}

/// Black-box stage-wise OCP solver.
///
/// One instance per controller; no internal warm-starting is assumed — the
/// controller re-seeds the primal iterate each tick via the guess setters.
pub trait OcpSolver {
    /// Build a backend for a compiled problem.
    fn from_problem(problem: &ProblemSpec) -> Result<Self, SolverError>
    where
        Self: Sized;

    /// Discard the internal iterate from the previous solve.
    fn reset(&mut self);

    /// Re-derive stage timing (and stage count) after a horizon resize.
    fn set_time_steps(&mut self, steps: &[f64]) -> Result<(), SolverError>;

    /// Pin the stage-0 state equality constraint to `x0`.
    fn constrain_initial_state(&mut self, x0: &Vector);

    /// Seed the primal state iterate at `stage` (0..=N).
    fn set_state_guess(&mut self, stage: usize, x: &Vector);

    /// Seed the primal control iterate at `stage` (0..N).
    fn set_control_guess(&mut self, stage: usize, u: &Vector);

    /// Set the stage parameter vector `[alpha, activation]`.
    fn set_stage_params(&mut self, stage: usize, params: &[f64]);

    /// Set the tracking reference at `stage` (terminal stage takes the
    /// state part only).
    fn set_reference(&mut self, stage: usize, yref: &[f64]);

    /// Run the solver to completion; returns the raw status code.
    fn solve(&mut self) -> i32;

    /// Stage state value from the last solve, valid for any status.
    fn state(&self, stage: usize) -> Vector;

    /// Stage control value from the last solve, valid for any status.
    fn control(&self, stage: usize) -> Vector;

    /// Named timings of the last solve.
    fn timings(&self) -> SolveTimings;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_code() {
        assert_eq!(SolverStatus::from(0), SolverStatus::Success);
        assert_eq!(SolverStatus::from(2), SolverStatus::MaxIterations);
        assert_eq!(SolverStatus::from(4), SolverStatus::QpFailure);
        assert_eq!(SolverStatus::from(99), SolverStatus::Unknown);
        assert!(SolverStatus::from(0).is_success());
        assert!(!SolverStatus::from(3).is_success());
    }
}
