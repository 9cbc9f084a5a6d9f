//! Model configuration
//!
//! Dimension counts, joint bounds, integration timestep and the location of
//! the offline-trained safety-filter artifact.

use serde::{Deserialize, Serialize};

/// Where the safety-filter network is evaluated.
///
/// Resolved once when the artifact is loaded; the control loop never touches
/// device selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum InferenceDevice {
    /// Plain CPU evaluation through nalgebra.
    #[default]
    Cpu,
}

/// Configuration for a planar manipulator model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Number of joints (nq). State dimension is 2*nq.
    pub num_joints: usize,
    /// Link lengths [m], one per joint.
    pub link_lengths: Vec<f64>,
    /// Lower joint position bound [rad], applied to every joint.
    pub q_min: f64,
    /// Upper joint position bound [rad].
    pub q_max: f64,
    /// Symmetric joint velocity bound [rad/s].
    pub dq_max: f64,
    /// Symmetric control (torque/acceleration) bound.
    pub u_max: f64,
    /// Integration timestep [s] for the ground-truth simulator.
    pub dt: f64,
    /// RK4 substeps per control interval.
    pub substeps: usize,
    /// Tolerance on the box-bound predicates.
    pub state_tol: f64,
    /// Tolerance on the viability margin predicate.
    pub safety_tol: f64,
    /// Path to the safety-filter weight artifact (JSON).
    pub artifact_path: Option<String>,
    /// Device the filter is evaluated on.
    pub device: InferenceDevice,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            num_joints: 3,
            link_lengths: vec![0.3; 3],
            q_min: std::f64::consts::PI / 4.0,
            q_max: std::f64::consts::PI / 4.0 * 5.0,
            dq_max: 10.0,
            u_max: 10.0,
            dt: 5e-3,
            substeps: 4,
            state_tol: 1e-4,
            safety_tol: 1e-3,
            artifact_path: None,
            device: InferenceDevice::Cpu,
        }
    }
}

impl ModelConfig {
    /// State dimension nx = 2 * nq.
    pub fn nx(&self) -> usize {
        2 * self.num_joints
    }

    /// Control dimension nu = nq for the acceleration-controlled arm.
    pub fn nu(&self) -> usize {
        self.num_joints
    }
}
