//! Controller configuration

use serde::{Deserialize, Serialize};

/// Configuration for one controller instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Horizon length N (number of stages).
    pub horizon: usize,
    /// Horizon time T [s]; the stage duration is T / N.
    pub horizon_time: f64,
    /// Cost weights.
    pub cost: CostConfig,
    /// Viability conservatism level, in [0, 100].
    pub alpha: f64,
    /// Slack weight on the soft running viability constraint.
    pub zl_running: f64,
    /// Slack weight on the soft terminal viability constraint.
    pub zl_terminal: f64,
    /// Rollout acceptance tolerance, scaled by sqrt(N + 1).
    pub rollout_tol: f64,
    /// Solver iteration caps.
    pub solver: SolverConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            horizon: 20,
            horizon_time: 0.1,
            cost: CostConfig::default(),
            alpha: 2.0,
            zl_running: 1e3,
            zl_terminal: 1e4,
            rollout_tol: 1e-3,
            solver: SolverConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Uniform stage durations for the current horizon settings.
    pub fn time_steps(&self) -> Vec<f64> {
        let dt = self.horizon_time / self.horizon as f64;
        vec![dt; self.horizon]
    }
}

/// Diagonal tracking-cost weights.
///
/// The first joint carries the tracking objective; the remaining weights
/// regularize toward the reference without fighting it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostConfig {
    /// Weight on the tracked (first) position component.
    pub w_tracked: f64,
    /// Weight on the remaining state components.
    pub w_state: f64,
    /// Weight on the control components.
    pub w_control: f64,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            w_tracked: 5e2,
            w_state: 1e-4,
            w_control: 1e-4,
        }
    }
}

impl CostConfig {
    /// Diagonal of the state weight matrix Q.
    pub fn q_diagonal(&self, nx: usize) -> Vec<f64> {
        let mut q = vec![self.w_state; nx];
        q[0] = self.w_tracked;
        q
    }

    /// Diagonal of the control weight matrix R.
    pub fn r_diagonal(&self, nu: usize) -> Vec<f64> {
        vec![self.w_control; nu]
    }
}

/// Iteration caps handed to the solver at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Maximum NLP iterations per solve.
    pub max_iterations: usize,
    /// Maximum QP iterations per NLP step.
    pub max_qp_iterations: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            max_qp_iterations: 100,
        }
    }
}
