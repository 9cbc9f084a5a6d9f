//! Fixed-step numerical integration
//!
//! RK4 over runtime-sized state vectors, plus a [`Simulator`] that advances
//! exactly one control interval with zero-order-hold controls. The rollout
//! checker uses this as the ground-truth integrator against which optimizer
//! trajectories are judged.

use std::sync::Arc;

use crate::dynamics::Dynamics;
use crate::Vector;

/// One RK4 step of dx/dt = f(x) with step size `h`.
pub fn rk4_step<F>(x: &Vector, h: f64, f: F) -> Vector
where
    F: Fn(&Vector) -> Vector,
{
    let k1 = f(x);
    let k2 = f(&(x + &k1 * (h / 2.0)));
    let k3 = f(&(x + &k2 * (h / 2.0)));
    let k4 = f(&(x + &k3 * h));

    x + (k1 + k2 * 2.0 + k3 * 2.0 + k4) * (h / 6.0)
}

/// Fixed-step simulator for one control interval.
///
/// Splits the interval `dt` into `substeps` RK4 steps with the control held
/// constant, matching the stage discretization of the trajectory optimizer.
#[derive(Clone)]
pub struct Simulator {
    dynamics: Arc<dyn Dynamics>,
    dt: f64,
    substeps: usize,
}

impl Simulator {
    pub fn new(dynamics: Arc<dyn Dynamics>, dt: f64, substeps: usize) -> Self {
        assert!(dt > 0.0, "timestep must be positive");
        assert!(substeps >= 1, "at least one substep required");
        Self { dynamics, dt, substeps }
    }

    /// Stage duration [s].
    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Advance the state one control interval under constant control `u`.
    pub fn step(&self, x: &Vector, u: &Vector) -> Vector {
        let h = self.dt / self.substeps as f64;
        let mut state = x.clone();
        for _ in 0..self.substeps {
            state = rk4_step(&state, h, |s| self.dynamics.rhs(s, u));
        }
        state
    }
}
