//! Scripted solver backend
//!
//! An in-memory [`OcpSolver`] used by the test suite and by solver-less
//! builds. Every setter is recorded for inspection; solve outcomes are
//! scripted ahead of time, and with no script the backend echoes the primal
//! guess back as its "solution" with success status.

use std::collections::VecDeque;

use safempc_core::Vector;

use crate::solver::{OcpSolver, ProblemSpec, SolveTimings, SolverError};

/// One pre-programmed solve outcome.
#[derive(Debug, Clone)]
pub struct ScriptedOutcome {
    /// Raw status code to return.
    pub status: i32,
    /// Stage states to report (length N+1); `None` echoes the guess.
    pub states: Option<Vec<Vector>>,
    /// Stage controls to report (length N); `None` echoes the guess.
    pub controls: Option<Vec<Vector>>,
}

impl ScriptedOutcome {
    pub fn success() -> Self {
        Self {
            status: 0,
            states: None,
            controls: None,
        }
    }

    pub fn failure(status: i32) -> Self {
        Self {
            status,
            states: None,
            controls: None,
        }
    }

    pub fn with_trajectory(mut self, states: Vec<Vector>, controls: Vec<Vector>) -> Self {
        self.states = Some(states);
        self.controls = Some(controls);
        self
    }
}

/// Recording, scriptable OCP solver.
pub struct ScriptedSolver {
    nx: usize,
    nu: usize,
    horizon: usize,
    time_steps: Vec<f64>,
    script: VecDeque<ScriptedOutcome>,
    // Recorded per-tick inputs.
    initial_state: Option<Vector>,
    state_guesses: Vec<Vector>,
    control_guesses: Vec<Vector>,
    stage_params: Vec<Vec<f64>>,
    references: Vec<Vec<f64>>,
    // Last reported solution.
    out_states: Vec<Vector>,
    out_controls: Vec<Vector>,
    reset_count: usize,
    solve_count: usize,
}

impl ScriptedSolver {
    /// Queue an outcome for a future solve call.
    pub fn push_outcome(&mut self, outcome: ScriptedOutcome) {
        self.script.push_back(outcome);
    }

    pub fn solve_count(&self) -> usize {
        self.solve_count
    }

    pub fn reset_count(&self) -> usize {
        self.reset_count
    }

    pub fn initial_state(&self) -> Option<&Vector> {
        self.initial_state.as_ref()
    }

    pub fn stage_params(&self) -> &[Vec<f64>] {
        &self.stage_params
    }

    pub fn references(&self) -> &[Vec<f64>] {
        &self.references
    }

    pub fn time_steps(&self) -> &[f64] {
        &self.time_steps
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    fn resize_buffers(&mut self, horizon: usize) {
        self.horizon = horizon;
        self.state_guesses
            .resize(horizon + 1, Vector::zeros(self.nx));
        self.control_guesses.resize(horizon, Vector::zeros(self.nu));
        self.out_states.resize(horizon + 1, Vector::zeros(self.nx));
        self.out_controls.resize(horizon, Vector::zeros(self.nu));
        self.stage_params.resize(horizon + 1, Vec::new());
        self.references.resize(horizon + 1, Vec::new());
    }
}

impl OcpSolver for ScriptedSolver {
    fn from_problem(problem: &ProblemSpec) -> Result<Self, SolverError> {
        if problem.time_steps.len() != problem.horizon {
            return Err(SolverError::InvalidTiming(format!(
                "{} stage durations for horizon {}",
                problem.time_steps.len(),
                problem.horizon
            )));
        }
        let mut solver = Self {
            nx: problem.nx,
            nu: problem.nu,
            horizon: 0,
            time_steps: problem.time_steps.clone(),
            script: VecDeque::new(),
            initial_state: None,
            state_guesses: Vec::new(),
            control_guesses: Vec::new(),
            stage_params: Vec::new(),
            references: Vec::new(),
            out_states: Vec::new(),
            out_controls: Vec::new(),
            reset_count: 0,
            solve_count: 0,
        };
        solver.resize_buffers(problem.horizon);
        Ok(solver)
    }

    fn reset(&mut self) {
        self.reset_count += 1;
        self.initial_state = None;
        for x in &mut self.state_guesses {
            x.fill(0.0);
        }
        for u in &mut self.control_guesses {
            u.fill(0.0);
        }
    }

    fn set_time_steps(&mut self, steps: &[f64]) -> Result<(), SolverError> {
        if steps.is_empty() || steps.iter().any(|dt| *dt <= 0.0) {
            return Err(SolverError::InvalidTiming(
                "stage durations must be positive".into(),
            ));
        }
        self.time_steps = steps.to_vec();
        self.resize_buffers(steps.len());
        Ok(())
    }

    fn constrain_initial_state(&mut self, x0: &Vector) {
        self.initial_state = Some(x0.clone());
    }

    fn set_state_guess(&mut self, stage: usize, x: &Vector) {
        self.state_guesses[stage] = x.clone();
    }

    fn set_control_guess(&mut self, stage: usize, u: &Vector) {
        self.control_guesses[stage] = u.clone();
    }

    fn set_stage_params(&mut self, stage: usize, params: &[f64]) {
        self.stage_params[stage] = params.to_vec();
    }

    fn set_reference(&mut self, stage: usize, yref: &[f64]) {
        self.references[stage] = yref.to_vec();
    }

    fn solve(&mut self) -> i32 {
        self.solve_count += 1;
        let outcome = self
            .script
            .pop_front()
            .unwrap_or_else(ScriptedOutcome::success);

        self.out_states = outcome
            .states
            .unwrap_or_else(|| self.state_guesses.clone());
        self.out_controls = outcome
            .controls
            .unwrap_or_else(|| self.control_guesses.clone());
        outcome.status
    }

    fn state(&self, stage: usize) -> Vector {
        self.out_states[stage].clone()
    }

    fn control(&self, stage: usize) -> Vector {
        self.out_controls[stage].clone()
    }

    fn timings(&self) -> SolveTimings {
        SolveTimings {
            total: 1e-4,
            lin: 4e-5,
            sim: 3e-5,
            qp: 3e-5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SolverConfig;
    use crate::constraints::ConstraintBuilder;

    fn spec(horizon: usize) -> ProblemSpec {
        ProblemSpec {
            nx: 2,
            nu: 1,
            horizon,
            time_steps: vec![0.01; horizon],
            x_min: Vector::from_element(2, -1.0),
            x_max: Vector::from_element(2, 1.0),
            u_min: Vector::from_element(1, -1.0),
            u_max: Vector::from_element(1, 1.0),
            q_diag: vec![1.0, 1.0],
            r_diag: vec![1.0],
            constraints: ConstraintBuilder::new(0.0).compile(),
            solver: SolverConfig::default(),
        }
    }

    #[test]
    fn test_echoes_guess_without_script() {
        let mut solver = ScriptedSolver::from_problem(&spec(3)).unwrap();
        let x = Vector::from_vec(vec![0.5, -0.5]);
        solver.set_state_guess(1, &x);

        let status = solver.solve();
        assert_eq!(status, 0);
        assert_eq!(solver.state(1), x);
    }

    #[test]
    fn test_scripted_failure() {
        let mut solver = ScriptedSolver::from_problem(&spec(3)).unwrap();
        solver.push_outcome(ScriptedOutcome::failure(4));
        assert_eq!(solver.solve(), 4);
        // Script is consumed in order.
        assert_eq!(solver.solve(), 0);
    }

    #[test]
    fn test_resize_via_time_steps() {
        let mut solver = ScriptedSolver::from_problem(&spec(4)).unwrap();
        solver.set_time_steps(&[0.02; 6]).unwrap();
        solver.solve();
        assert_eq!(solver.time_steps().len(), 6);
        // Stage 6 (terminal) is addressable after the resize.
        let _ = solver.state(6);
    }

    #[test]
    fn test_rejects_bad_timing() {
        let mut solver = ScriptedSolver::from_problem(&spec(4)).unwrap();
        assert!(solver.set_time_steps(&[]).is_err());
        assert!(solver.set_time_steps(&[0.01, -0.01]).is_err());
    }
}
