//! Independent dynamics rollout check
//!
//! Re-simulates an accepted control sequence through the ground-truth
//! integrator and compares it against the optimizer's reported state
//! trajectory. A consistency check only: it never corrects or mutates the
//! guess, it just renders a verdict for diagnostics and test harnesses.

use safempc_core::{Simulator, Vector};

/// Verdict of one rollout comparison.
#[derive(Debug, Clone, Copy)]
pub struct RolloutReport {
    /// Whether the deviation is below the scaled tolerance.
    pub accepted: bool,
    /// Stacked norm of the deviation over all stages.
    pub deviation: f64,
    /// The threshold actually applied, `tol * sqrt(N + 1)`.
    pub threshold: f64,
}

/// Re-simulates candidate trajectories against the true dynamics.
pub struct RolloutChecker {
    simulator: Simulator,
    tol: f64,
}

impl RolloutChecker {
    pub fn new(simulator: Simulator, tol: f64) -> Self {
        assert!(tol > 0.0, "rollout tolerance must be positive");
        Self { simulator, tol }
    }

    /// Check an optimizer trajectory of `N+1` states against `N` controls.
    ///
    /// Starts from `x_traj[0]`, integrates stage by stage, and accepts iff
    /// the stacked deviation norm stays below `tol * sqrt(N + 1)` — the
    /// per-stage tolerance scaled to the trajectory length.
    pub fn check(&self, x_traj: &[Vector], u_traj: &[Vector]) -> RolloutReport {
        assert_eq!(
            x_traj.len(),
            u_traj.len() + 1,
            "expected N+1 states for N controls"
        );

        let mut deviation_sq = 0.0;
        let mut x_sim = x_traj[0].clone();
        for (x_opt, u) in x_traj[1..].iter().zip(u_traj) {
            x_sim = self.simulator.step(&x_sim, u);
            deviation_sq += (x_opt - &x_sim).norm_squared();
        }

        let deviation = deviation_sq.sqrt();
        let threshold = self.tol * ((x_traj.len()) as f64).sqrt();
        RolloutReport {
            accepted: deviation < threshold,
            deviation,
            threshold,
        }
    }
}
