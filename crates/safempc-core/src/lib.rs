//! # safempc-core
//!
//! Model, dynamics and learned viability filter for a safety-filtered
//! receding-horizon controller on planar manipulators.
//!
//! This crate holds everything the controller queries but never mutates:
//!
//! - [`model`]: state/control dimensions, bounds and pure constraint
//!   predicates
//! - [`dynamics`]: the dynamics/kinematics collaborator (trait + planar arm)
//! - [`integrator`]: fixed-step RK4 simulation of one control interval
//! - [`safety`]: the offline-trained viability filter evaluated as a
//!   differentiable margin
//! - [`config`]: serde-loadable model configuration

pub mod config;
pub mod dynamics;
pub mod integrator;
pub mod model;
pub mod safety;

use nalgebra::DVector;

/// Runtime-sized state/control vector type used throughout the workspace.
pub type Vector = DVector<f64>;

/// Gravity constant [m/s²]
pub const GRAVITY: f64 = 9.81;

pub use config::ModelConfig;
pub use dynamics::{Dynamics, PlanarArm};
pub use integrator::Simulator;
pub use model::{Model, ModelError};
pub use safety::{SafetyArtifact, SafetyError, SafetyFilter};
