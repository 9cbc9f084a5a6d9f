//! # safempc-control
//!
//! Safety-filtered receding-horizon control loop.
//!
//! Every control tick produces a dynamically feasible action in bounded
//! time, even when the trajectory optimizer fails to converge: the solver's
//! output is captured unconditionally, but only adopted on success, and the
//! previous (shifted) trajectory backs the control output otherwise.
//!
//! ```text
//! solve(x0)            status + temp trajectory, every tick
//!   └─ provide_control()   adopt-or-shift, emits u, advances the warm start
//! ```
//!
//! # Modules
//!
//! - [`solver`]: black-box OCP solver seam (status codes, timings, trait)
//! - [`constraints`]: typed obstacle/viability constraint compiler
//! - [`guess`]: warm-start trajectories and the Fresh/Warm/Stale machine
//! - [`controller`]: the per-tick orchestration and horizon resizing
//! - [`rollout`]: independent dynamics consistency check
//! - [`sampling`]: deterministic batch initial-condition generation
//! - [`mock`]: scripted solver backend for tests and solver-less builds

pub mod config;
pub mod constraints;
pub mod controller;
pub mod guess;
pub mod mock;
pub mod rollout;
pub mod sampling;
pub mod solver;

#[cfg(feature = "acados")]
pub mod acados_ffi;

pub use config::ControllerConfig;
pub use constraints::{CompiledConstraints, ConstraintBuilder, Obstacle, ObstacleKind};
pub use controller::{Controller, ControllerError, ControllerKind};
pub use guess::{GuessState, WarmStart};
pub use rollout::{RolloutChecker, RolloutReport};
pub use solver::{OcpSolver, ProblemSpec, SolveTimings, SolverStatus};
