//! Dynamics and kinematics collaborator
//!
//! The controller and the rollout checker only ever see the [`Dynamics`]
//! trait: a continuous-time right-hand side and the world-frame position of
//! the monitored point (the end effector for a serial arm).
//!
//! The provided implementation is an acceleration-controlled planar serial
//! chain: each joint is a double integrator driven directly by its control
//! channel, with analytic chain forward kinematics in the x-z plane.

use nalgebra::Vector3;

use crate::Vector;

/// Pure evaluation functions supplied to the controller.
///
/// Implementations must be side-effect free: the same `(x, u)` always yields
/// the same derivative, and `tip_position` depends only on the position
/// sub-state.
pub trait Dynamics: Send + Sync {
    /// Number of joints.
    fn num_joints(&self) -> usize;

    /// Continuous-time right-hand side ẋ = f(x, u).
    ///
    /// State layout is `[q, dq]` with `nq` positions followed by `nq`
    /// velocities.
    fn rhs(&self, x: &Vector, u: &Vector) -> Vector;

    /// World-frame position of the monitored point for the configuration
    /// part of `x`.
    fn tip_position(&self, x: &Vector) -> Vector3<f64>;
}

/// Acceleration-controlled planar serial chain.
///
/// Joint angles are measured from the downward vertical; the chain lives in
/// the x-z plane with the base at the origin. Joint accelerations equal the
/// control inputs, which keeps the model exact under RK4 and leaves the
/// torque map to an outer loop.
#[derive(Debug, Clone)]
pub struct PlanarArm {
    link_lengths: Vec<f64>,
}

impl PlanarArm {
    pub fn new(link_lengths: Vec<f64>) -> Self {
        assert!(!link_lengths.is_empty(), "planar arm needs at least one link");
        Self { link_lengths }
    }

    pub fn link_lengths(&self) -> &[f64] {
        &self.link_lengths
    }
}

impl Dynamics for PlanarArm {
    fn num_joints(&self) -> usize {
        self.link_lengths.len()
    }

    fn rhs(&self, x: &Vector, u: &Vector) -> Vector {
        let nq = self.num_joints();
        debug_assert_eq!(x.len(), 2 * nq);
        debug_assert_eq!(u.len(), nq);

        let mut dx = Vector::zeros(2 * nq);
        for i in 0..nq {
            dx[i] = x[nq + i];
            dx[nq + i] = u[i];
        }
        dx
    }

    fn tip_position(&self, x: &Vector) -> Vector3<f64> {
        let nq = self.num_joints();
        debug_assert!(x.len() >= nq);

        // Absolute link angle is the running sum of joint angles.
        let mut angle = 0.0;
        let mut px = 0.0;
        let mut pz = 0.0;
        for (i, l) in self.link_lengths.iter().enumerate() {
            angle += x[i];
            px += l * angle.sin();
            pz += -l * angle.cos();
        }
        Vector3::new(px, 0.0, pz)
    }
}
