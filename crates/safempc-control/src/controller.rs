//! Receding-horizon controller
//!
//! Orchestrates one control tick: pin the measured state, seed the solver's
//! primal iterate from the warm start, set stage parameters, invoke the
//! solver, capture its raw output, and let the warm-start machine decide
//! whether to adopt it. Solver non-convergence is never an error here — it
//! increments the failure counter and the previous shifted trajectory backs
//! the emitted control.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use safempc_core::{Model, Vector};

use crate::config::ControllerConfig;
use crate::constraints::{CompiledConstraints, ConstraintBuilder, Obstacle};
use crate::guess::{GuessState, WarmStart};
use crate::solver::{OcpSolver, ProblemSpec, SolveTimings, SolverError, SolverStatus};

/// Which constraint composition the controller runs.
///
/// Supplied explicitly at construction; nothing is derived from type names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerKind {
    /// Box constraints and obstacles only.
    Naive,
    /// Soft viability constraint on the terminal stage.
    SoftTerminal,
    /// Soft viability constraint on a receding stage index plus the
    /// terminal stage.
    Receding,
}

impl ControllerKind {
    fn needs_safety_filter(self) -> bool {
        !matches!(self, ControllerKind::Naive)
    }
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("horizon must be at least 1, got {0}")]
    HorizonTooShort(usize),
    #[error("controller kind requires an attached safety filter")]
    SafetyFilterRequired,
    #[error(transparent)]
    Solver(#[from] SolverError),
}

/// Safety-filtered receding-horizon controller.
///
/// Owns exactly one solver instance and one warm-start buffer; shares the
/// model read-only. One instance must never be ticked concurrently.
pub struct Controller<S: OcpSolver> {
    kind: ControllerKind,
    model: Arc<Model>,
    config: ControllerConfig,
    constraints: CompiledConstraints,
    solver: S,
    warm_start: WarmStart,
    /// Current horizon length.
    n: usize,
    /// Stage duration, fixed across horizon resizes.
    stage_dt: f64,
    /// Stage whose viability constraint is active (`Receding` only).
    safe_index: Option<usize>,
    x_ref: Vector,
    last_status: Option<SolverStatus>,
    last_timings: SolveTimings,
    fails: u64,
}

impl<S: OcpSolver> Controller<S> {
    /// Compile the constraint sets for `kind` and build the solver backend.
    pub fn new(
        model: Arc<Model>,
        kind: ControllerKind,
        obstacles: &[Obstacle],
        config: ControllerConfig,
    ) -> Result<Self, ControllerError> {
        if config.horizon < 1 {
            return Err(ControllerError::HorizonTooShort(config.horizon));
        }
        if kind.needs_safety_filter() && !model.has_safety_filter() {
            return Err(ControllerError::SafetyFilterRequired);
        }

        let mut builder = ConstraintBuilder::new(config.alpha).obstacles(obstacles);
        match kind {
            ControllerKind::Naive => {}
            ControllerKind::SoftTerminal => {
                builder = builder.terminal_safety(Some(config.zl_terminal));
            }
            ControllerKind::Receding => {
                builder = builder
                    .running_safety(Some(config.zl_running))
                    .terminal_safety(Some(config.zl_terminal));
            }
        }
        let constraints = builder.compile();

        let n = config.horizon;
        let problem = ProblemSpec {
            nx: model.nx(),
            nu: model.nu(),
            horizon: n,
            time_steps: config.time_steps(),
            x_min: model.x_min().clone(),
            x_max: model.x_max().clone(),
            u_min: model.u_min().clone(),
            u_max: model.u_max().clone(),
            q_diag: config.cost.q_diagonal(model.nx()),
            r_diag: config.cost.r_diagonal(model.nu()),
            constraints: constraints.clone(),
            solver: config.solver.clone(),
        };
        let solver = S::from_problem(&problem)?;

        let warm_start = WarmStart::new(n, model.nx(), model.nu());
        let stage_dt = config.horizon_time / n as f64;
        let safe_index = match kind {
            ControllerKind::Receding => Some(n),
            _ => None,
        };
        let x_ref = Vector::zeros(model.nx());

        Ok(Self {
            kind,
            model,
            config,
            constraints,
            solver,
            warm_start,
            n,
            stage_dt,
            safe_index,
            x_ref,
            last_status: None,
            last_timings: SolveTimings::default(),
            fails: 0,
        })
    }

    pub fn kind(&self) -> ControllerKind {
        self.kind
    }

    pub fn horizon(&self) -> usize {
        self.n
    }

    pub fn fails(&self) -> u64 {
        self.fails
    }

    pub fn guess_state(&self) -> GuessState {
        self.warm_start.state()
    }

    pub fn warm_start(&self) -> &WarmStart {
        &self.warm_start
    }

    pub fn constraints(&self) -> &CompiledConstraints {
        &self.constraints
    }

    pub fn last_timings(&self) -> SolveTimings {
        self.last_timings
    }

    pub fn safe_index(&self) -> Option<usize> {
        self.safe_index
    }

    /// Direct access to the solver backend (diagnostics and tests).
    pub fn solver_mut(&mut self) -> &mut S {
        &mut self.solver
    }

    /// Set the tracked state reference.
    pub fn set_reference(&mut self, x_ref: Vector) {
        assert_eq!(x_ref.len(), self.model.nx());
        self.x_ref = x_ref;
    }

    /// Install an externally computed warm start.
    pub fn set_guess(&mut self, x: Vec<Vector>, u: Vec<Vector>) {
        self.warm_start.seed(x, u);
    }

    /// Geometric collision predicate at a query state.
    pub fn check_collision(&self, x: &Vector) -> bool {
        self.constraints.check_collision(&self.model, x)
    }

    /// Run one solve attempt from the measured state `x0`.
    ///
    /// Always captures the solver's stage values into the temporary buffer;
    /// callers must follow up with [`Controller::provide_control`] to
    /// advance the warm-start machine and obtain the action.
    pub fn solve(&mut self, x0: &Vector) -> SolverStatus {
        // All warm-starting is explicit through the guess: drop whatever
        // iterate the solver kept from the previous tick.
        self.solver.reset();
        self.solver.constrain_initial_state(x0);

        let yref = self.stage_reference();
        for stage in 0..self.n {
            self.solver
                .set_state_guess(stage, &self.warm_start.x_guess()[stage]);
            self.solver
                .set_control_guess(stage, &self.warm_start.u_guess()[stage]);
            self.solver.set_reference(stage, &yref);
            let params = self.stage_params(stage);
            self.solver.set_stage_params(stage, &params);
        }
        self.solver
            .set_state_guess(self.n, &self.warm_start.x_guess()[self.n]);
        self.solver
            .set_reference(self.n, self.x_ref.as_slice());
        let terminal_params = self.stage_params(self.n);
        self.solver.set_stage_params(self.n, &terminal_params);

        let raw = self.solver.solve();
        self.last_timings = self.solver.timings();

        // Capture the raw trajectory whatever the status; the failure
        // branch of the warm-start machine discards it.
        for stage in 0..self.n {
            self.warm_start
                .capture_temp_state(stage, self.solver.state(stage));
            self.warm_start
                .capture_temp_control(stage, self.solver.control(stage));
        }
        self.warm_start
            .capture_temp_state(self.n, self.solver.state(self.n));

        let status = SolverStatus::from(raw);
        self.last_status = Some(status);
        debug!(
            ?status,
            total_s = self.last_timings.total,
            qp_s = self.last_timings.qp,
            "solve finished"
        );
        status
    }

    /// Advance the warm-start machine and emit the control action.
    ///
    /// Defined for every tick: on solver failure the action comes from the
    /// previous dynamically consistent trajectory.
    pub fn provide_control(&mut self) -> Vector {
        let success = self
            .last_status
            .take()
            .map(SolverStatus::is_success)
            .unwrap_or(false);

        if !success {
            self.fails += 1;
            warn!(fails = self.fails, "solver failed, replaying shifted guess");
        }

        // The receding safety stage follows the shifted trajectory on
        // failure and re-arms to the horizon end on success.
        if let Some(index) = self.safe_index.as_mut() {
            *index = if success { self.n } else { index.saturating_sub(1).max(1) };
        }

        self.warm_start.advance(success)
    }

    /// Resize the horizon, keeping the stage duration fixed.
    ///
    /// The only structural mutation permitted at runtime.
    pub fn reset_horizon(&mut self, n_new: usize) -> Result<(), ControllerError> {
        if n_new < 1 {
            return Err(ControllerError::HorizonTooShort(n_new));
        }
        let steps = vec![self.stage_dt; n_new];
        self.solver.set_time_steps(&steps)?;
        self.warm_start.resize(n_new);
        self.n = n_new;
        if let Some(index) = self.safe_index.as_mut() {
            *index = (*index).min(n_new);
        }
        Ok(())
    }

    /// Bootstrap a warm start from scratch at `x0`.
    ///
    /// Seeds a constant guess, runs one solve and, on success, adopts the
    /// solution without shifting. Returns whether the solve converged.
    pub fn initialize(&mut self, x0: &Vector, u0: &Vector) -> bool {
        let x = vec![x0.clone(); self.n + 1];
        let u = vec![u0.clone(); self.n];
        self.warm_start.seed(x, u);

        let status = self.solve(x0);
        self.last_status = None;
        if status.is_success() {
            self.warm_start.adopt_temp();
            true
        } else {
            false
        }
    }

    /// Stage reference `[x_ref, 0]` for the running cost.
    fn stage_reference(&self) -> Vec<f64> {
        let mut yref = Vec::with_capacity(self.model.nx() + self.model.nu());
        yref.extend(self.x_ref.iter());
        yref.extend(std::iter::repeat(0.0).take(self.model.nu()));
        yref
    }

    /// Stage parameter vector `[alpha, activation]`.
    fn stage_params(&self, stage: usize) -> [f64; 2] {
        let active = match self.kind {
            ControllerKind::Naive => false,
            ControllerKind::SoftTerminal => stage == self.n,
            ControllerKind::Receding => {
                stage == self.n || self.safe_index.is_some_and(|i| i == stage)
            }
        };
        [self.config.alpha, if active { 1.0 } else { 0.0 }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{ScriptedOutcome, ScriptedSolver};
    use safempc_core::safety::{LayerWeights, SafetyArtifact, SafetyFilter};
    use safempc_core::{config::InferenceDevice, ModelConfig};

    fn model_with_filter() -> Arc<Model> {
        let config = ModelConfig::default();
        let mut model = Model::new(&config);
        let artifact = SafetyArtifact {
            mean: vec![0.0; 3],
            std: vec![1.0; 3],
            layers: vec![LayerWeights {
                weight: vec![vec![0.1; 6]],
                bias: vec![1.0],
            }],
        };
        let filter = SafetyFilter::from_artifact(&artifact, 3, InferenceDevice::Cpu).unwrap();
        model.set_safety_filter(filter).unwrap();
        Arc::new(model)
    }

    fn controller(kind: ControllerKind) -> Controller<ScriptedSolver> {
        let config = ControllerConfig {
            horizon: 5,
            ..Default::default()
        };
        Controller::new(model_with_filter(), kind, &[], config).unwrap()
    }

    #[test]
    fn test_safety_kinds_require_filter() {
        let model = Arc::new(Model::new(&ModelConfig::default()));
        let err = Controller::<ScriptedSolver>::new(
            model.clone(),
            ControllerKind::SoftTerminal,
            &[],
            ControllerConfig::default(),
        );
        assert!(matches!(err, Err(ControllerError::SafetyFilterRequired)));

        // Naive builds without one.
        let ok = Controller::<ScriptedSolver>::new(
            model,
            ControllerKind::Naive,
            &[],
            ControllerConfig::default(),
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn test_solve_resets_and_pins_initial_state() {
        let mut ctrl = controller(ControllerKind::Naive);
        let x0 = Vector::from_element(6, 0.5);

        let status = ctrl.solve(&x0);
        assert!(status.is_success());
        assert_eq!(ctrl.solver_mut().reset_count(), 1);
        assert_eq!(ctrl.solver_mut().initial_state(), Some(&x0));
    }

    #[test]
    fn test_terminal_activation_soft_terminal() {
        let mut ctrl = controller(ControllerKind::SoftTerminal);
        let x0 = Vector::zeros(6);
        ctrl.solve(&x0);

        let params = ctrl.solver_mut().stage_params().to_vec();
        for (stage, p) in params.iter().enumerate() {
            let expected = if stage == 5 { 1.0 } else { 0.0 };
            assert_eq!(p[1], expected, "activation at stage {stage}");
            assert_eq!(p[0], 2.0, "alpha at stage {stage}");
        }
    }

    #[test]
    fn test_receding_activation_follows_safe_index() {
        let mut ctrl = controller(ControllerKind::Receding);
        assert_eq!(ctrl.safe_index(), Some(5));

        let x0 = Vector::zeros(6);
        ctrl.solver_mut().push_outcome(ScriptedOutcome::failure(2));
        ctrl.solve(&x0);
        ctrl.provide_control();

        // Failure tick: the certified stage recedes with the shift.
        assert_eq!(ctrl.safe_index(), Some(4));

        ctrl.solve(&x0);
        ctrl.provide_control();
        // Success re-arms the index to the horizon end.
        assert_eq!(ctrl.safe_index(), Some(5));
    }

    #[test]
    fn test_failure_increments_fails_and_keeps_control_defined() {
        let mut ctrl = controller(ControllerKind::Naive);
        let x0 = Vector::zeros(6);

        ctrl.solver_mut().push_outcome(ScriptedOutcome::failure(4));
        let status = ctrl.solve(&x0);
        assert!(!status.is_success());

        let u = ctrl.provide_control();
        assert_eq!(u.len(), 3);
        assert_eq!(ctrl.fails(), 1);
        assert_eq!(ctrl.guess_state(), GuessState::Stale);
    }

    #[test]
    fn test_reset_horizon_validates_before_mutation() {
        let mut ctrl = controller(ControllerKind::Naive);
        let err = ctrl.reset_horizon(0);
        assert!(matches!(err, Err(ControllerError::HorizonTooShort(0))));
        assert_eq!(ctrl.horizon(), 5);

        ctrl.reset_horizon(3).unwrap();
        assert_eq!(ctrl.horizon(), 3);
        assert_eq!(ctrl.warm_start().x_guess().len(), 4);
        assert_eq!(ctrl.solver_mut().time_steps().len(), 3);
    }

    #[test]
    fn test_reset_horizon_idempotent() {
        let mut ctrl = controller(ControllerKind::Receding);
        ctrl.reset_horizon(5).unwrap();
        let shape_once = (
            ctrl.warm_start().x_guess().len(),
            ctrl.warm_start().u_guess().len(),
        );
        ctrl.reset_horizon(5).unwrap();
        let shape_twice = (
            ctrl.warm_start().x_guess().len(),
            ctrl.warm_start().u_guess().len(),
        );
        assert_eq!(shape_once, shape_twice);
        assert_eq!(ctrl.safe_index(), Some(5));
    }

    #[test]
    fn test_initialize_adopts_without_shift() {
        let mut ctrl = controller(ControllerKind::Naive);
        let x0 = Vector::from_element(6, 0.7);
        let u0 = Vector::from_element(3, 0.1);

        assert!(ctrl.initialize(&x0, &u0));
        assert_eq!(ctrl.guess_state(), GuessState::Warm);
        // The echoing mock returns the seeded guess, so the warm start is
        // the unshifted constant trajectory.
        assert_eq!(ctrl.warm_start().x_guess()[0], x0);
        assert_eq!(ctrl.warm_start().x_guess()[5], x0);
    }
}
