//! Dynamics/constraint model
//!
//! [`Model`] bundles the dimensions, box bounds, dynamics collaborator and
//! (optionally) the learned viability filter. It is immutable after
//! construction apart from the one-shot filter attachment, and every
//! predicate on it is pure.

use std::sync::Arc;

use nalgebra::Vector3;
use thiserror::Error;

use crate::config::ModelConfig;
use crate::dynamics::{Dynamics, PlanarArm};
use crate::safety::SafetyFilter;
use crate::Vector;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("safety filter queried before attachment")]
    SafetyFilterMissing,
    #[error("safety filter is already attached")]
    SafetyFilterAlreadyAttached,
    #[error("filter trained for {filter} joints, model has {model}")]
    SafetyFilterDimensionMismatch { filter: usize, model: usize },
}

/// Immutable manipulator model.
pub struct Model {
    nx: usize,
    nu: usize,
    nq: usize,
    x_min: Vector,
    x_max: Vector,
    u_min: Vector,
    u_max: Vector,
    state_tol: f64,
    safety_tol: f64,
    dynamics: Arc<dyn Dynamics>,
    safety_filter: Option<SafetyFilter>,
}

impl Model {
    /// Build the planar-arm model described by `config`.
    pub fn new(config: &ModelConfig) -> Self {
        let dynamics: Arc<dyn Dynamics> = Arc::new(PlanarArm::new(config.link_lengths.clone()));
        Self::with_dynamics(config, dynamics)
    }

    /// Build a model around an externally supplied dynamics collaborator.
    pub fn with_dynamics(config: &ModelConfig, dynamics: Arc<dyn Dynamics>) -> Self {
        let nq = config.num_joints;
        let nx = 2 * nq;
        let nu = nq;

        let mut x_min = Vector::zeros(nx);
        let mut x_max = Vector::zeros(nx);
        for i in 0..nq {
            x_min[i] = config.q_min;
            x_max[i] = config.q_max;
            x_min[nq + i] = -config.dq_max;
            x_max[nq + i] = config.dq_max;
        }
        let u_min = Vector::from_element(nu, -config.u_max);
        let u_max = Vector::from_element(nu, config.u_max);

        Self {
            nx,
            nu,
            nq,
            x_min,
            x_max,
            u_min,
            u_max,
            state_tol: config.state_tol,
            safety_tol: config.safety_tol,
            dynamics,
            safety_filter: None,
        }
    }

    /// Attach the trained viability filter. Allowed exactly once.
    pub fn set_safety_filter(&mut self, filter: SafetyFilter) -> Result<(), ModelError> {
        if self.safety_filter.is_some() {
            return Err(ModelError::SafetyFilterAlreadyAttached);
        }
        if filter.num_joints() != self.nq {
            return Err(ModelError::SafetyFilterDimensionMismatch {
                filter: filter.num_joints(),
                model: self.nq,
            });
        }
        self.safety_filter = Some(filter);
        Ok(())
    }

    pub fn nx(&self) -> usize {
        self.nx
    }

    pub fn nu(&self) -> usize {
        self.nu
    }

    pub fn nq(&self) -> usize {
        self.nq
    }

    pub fn x_min(&self) -> &Vector {
        &self.x_min
    }

    pub fn x_max(&self) -> &Vector {
        &self.x_max
    }

    pub fn u_min(&self) -> &Vector {
        &self.u_min
    }

    pub fn u_max(&self) -> &Vector {
        &self.u_max
    }

    pub fn dynamics(&self) -> &Arc<dyn Dynamics> {
        &self.dynamics
    }

    pub fn safety_filter(&self) -> Option<&SafetyFilter> {
        self.safety_filter.as_ref()
    }

    pub fn has_safety_filter(&self) -> bool {
        self.safety_filter.is_some()
    }

    /// World-frame monitored point at state `x`.
    pub fn tip_position(&self, x: &Vector) -> Vector3<f64> {
        self.dynamics.tip_position(x)
    }

    /// True iff every state component lies in `[x_min - tol, x_max + tol]`.
    pub fn check_state_constraints(&self, x: &Vector) -> bool {
        debug_assert_eq!(x.len(), self.nx);
        x.iter().enumerate().all(|(i, xi)| {
            *xi >= self.x_min[i] - self.state_tol && *xi <= self.x_max[i] + self.state_tol
        })
    }

    /// True iff every control component lies within the control bounds.
    pub fn check_control_constraints(&self, u: &Vector) -> bool {
        debug_assert_eq!(u.len(), self.nu);
        u.iter().enumerate().all(|(i, ui)| {
            *ui >= self.u_min[i] - self.state_tol && *ui <= self.u_max[i] + self.state_tol
        })
    }

    /// Conjunction of the state and control box predicates.
    pub fn check_running_constraints(&self, x: &Vector, u: &Vector) -> bool {
        self.check_state_constraints(x) && self.check_control_constraints(u)
    }

    /// Viability predicate `margin(x, alpha) >= -safety_tol`.
    ///
    /// Fails fast when the filter has not been attached; callers must not
    /// silently treat an unconfigured filter as safe.
    pub fn check_safe_constraints(&self, x: &Vector, alpha: f64) -> Result<bool, ModelError> {
        let filter = self
            .safety_filter
            .as_ref()
            .ok_or(ModelError::SafetyFilterMissing)?;
        Ok(filter.margin(x, alpha) >= -self.safety_tol)
    }

    /// Viability margin, failing fast when no filter is attached.
    pub fn safety_margin(&self, x: &Vector, alpha: f64) -> Result<f64, ModelError> {
        let filter = self
            .safety_filter
            .as_ref()
            .ok_or(ModelError::SafetyFilterMissing)?;
        Ok(filter.margin(x, alpha))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::safety::{LayerWeights, SafetyArtifact};
    use crate::config::InferenceDevice;

    fn model() -> Model {
        Model::new(&ModelConfig::default())
    }

    fn tiny_filter(nq: usize) -> SafetyFilter {
        let artifact = SafetyArtifact {
            mean: vec![0.0; nq],
            std: vec![1.0; nq],
            layers: vec![LayerWeights {
                weight: vec![vec![0.1; 2 * nq]],
                bias: vec![1.0],
            }],
        };
        SafetyFilter::from_artifact(&artifact, nq, InferenceDevice::Cpu).unwrap()
    }

    #[test]
    fn test_bounds_have_state_dimension() {
        let m = model();
        assert_eq!(m.x_min().len(), m.nx());
        assert_eq!(m.u_min().len(), m.nu());
        assert_eq!(m.nx() % 2, 0);
    }

    #[test]
    fn test_state_predicate_totality() {
        let m = model();

        // Strictly inside the bounds.
        let mid = (m.x_min() + m.x_max()) * 0.5;
        assert!(m.check_state_constraints(&mid));

        // One component far outside.
        let mut bad = mid.clone();
        bad[0] = m.x_max()[0] + 1.0;
        assert!(!m.check_state_constraints(&bad));

        // Just inside the tolerance band still passes.
        let mut edge = mid.clone();
        edge[0] = m.x_max()[0] + 0.5e-4;
        assert!(m.check_state_constraints(&edge));
    }

    #[test]
    fn test_running_conjunction() {
        let m = model();
        let x = (m.x_min() + m.x_max()) * 0.5;
        let u_ok = Vector::zeros(m.nu());
        let mut u_bad = Vector::zeros(m.nu());
        u_bad[0] = 100.0;

        assert!(m.check_running_constraints(&x, &u_ok));
        assert!(!m.check_running_constraints(&x, &u_bad));
    }

    #[test]
    fn test_safe_predicate_requires_filter() {
        let m = model();
        let x = Vector::zeros(m.nx());
        assert!(matches!(
            m.check_safe_constraints(&x, 10.0),
            Err(ModelError::SafetyFilterMissing)
        ));
    }

    #[test]
    fn test_filter_attaches_once() {
        let mut m = model();
        m.set_safety_filter(tiny_filter(3)).unwrap();
        assert!(m.has_safety_filter());

        let err = m.set_safety_filter(tiny_filter(3));
        assert!(matches!(err, Err(ModelError::SafetyFilterAlreadyAttached)));
    }

    #[test]
    fn test_filter_dimension_checked() {
        let mut m = model();
        let err = m.set_safety_filter(tiny_filter(2));
        assert!(matches!(
            err,
            Err(ModelError::SafetyFilterDimensionMismatch { filter: 2, model: 3 })
        ));
    }

    #[test]
    fn test_safe_predicate_with_filter() {
        let mut m = model();
        m.set_safety_filter(tiny_filter(3)).unwrap();

        // At rest the tiny filter's bias dominates: margin ≈ 1 - eps > 0.
        let x = Vector::zeros(m.nx());
        assert!(m.check_safe_constraints(&x, 0.0).unwrap());

        // At the velocity cap the subtracted ‖v‖ dominates.
        let mut fast = Vector::zeros(m.nx());
        for i in 3..6 {
            fast[i] = 10.0;
        }
        assert!(!m.check_safe_constraints(&fast, 0.0).unwrap());
    }
}
