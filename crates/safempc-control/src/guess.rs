//! Warm-start trajectories and the adopt-or-shift state machine
//!
//! [`WarmStart`] owns the predicted state/control trajectories used to seed
//! the solver, plus a temporary mirror pair that captures the raw solver
//! output every tick regardless of status. The transition applied after a
//! solve attempt:
//!
//! - success: adopt the temp pair, shift left one stage, duplicate the last
//!   stage into the freed slot;
//! - failure: shift the *previous* guess the same way and discard the temp
//!   pair entirely.
//!
//! Either way the control handed to the actuators is the first stage of the
//! pre-shift trajectory, so a control action exists every tick.

use safempc_core::Vector;

/// Lifecycle of the warm-start buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuessState {
    /// All-zero or externally seeded, before the first solve.
    Fresh,
    /// Last solve succeeded; the guess is a shifted solver trajectory.
    Warm,
    /// Last solve failed; the guess is a re-shifted previous trajectory.
    Stale,
}

/// Warm-start buffers owned by exactly one controller.
#[derive(Debug, Clone)]
pub struct WarmStart {
    x_guess: Vec<Vector>,
    u_guess: Vec<Vector>,
    x_temp: Vec<Vector>,
    u_temp: Vec<Vector>,
    state: GuessState,
}

impl WarmStart {
    /// Zero-initialized buffers for horizon `n`.
    pub fn new(n: usize, nx: usize, nu: usize) -> Self {
        Self {
            x_guess: vec![Vector::zeros(nx); n + 1],
            u_guess: vec![Vector::zeros(nu); n],
            x_temp: vec![Vector::zeros(nx); n + 1],
            u_temp: vec![Vector::zeros(nu); n],
            state: GuessState::Fresh,
        }
    }

    pub fn horizon(&self) -> usize {
        self.u_guess.len()
    }

    pub fn state(&self) -> GuessState {
        self.state
    }

    pub fn x_guess(&self) -> &[Vector] {
        &self.x_guess
    }

    pub fn u_guess(&self) -> &[Vector] {
        &self.u_guess
    }

    /// Install an externally computed guess (e.g. from offline initial
    /// guess generation). Resets the lifecycle to `Fresh`.
    pub fn seed(&mut self, x: Vec<Vector>, u: Vec<Vector>) {
        assert_eq!(x.len(), self.x_guess.len(), "state guess length mismatch");
        assert_eq!(u.len(), self.u_guess.len(), "control guess length mismatch");
        self.x_guess = x;
        self.u_guess = u;
        self.state = GuessState::Fresh;
    }

    /// Record one stage of the raw solver output into the temp mirror.
    pub fn capture_temp_state(&mut self, stage: usize, x: Vector) {
        self.x_temp[stage] = x;
    }

    pub fn capture_temp_control(&mut self, stage: usize, u: Vector) {
        self.u_temp[stage] = u;
    }

    /// Adopt the temp pair as the guess without shifting.
    ///
    /// Used when bootstrapping a warm start from a standalone solve.
    pub fn adopt_temp(&mut self) {
        self.x_guess.clone_from(&self.x_temp);
        self.u_guess.clone_from(&self.u_temp);
        self.state = GuessState::Warm;
    }

    /// Apply the post-solve transition and return the control action.
    pub fn advance(&mut self, success: bool) -> Vector {
        if success {
            let u = self.u_temp[0].clone();
            self.x_guess.clone_from(&self.x_temp);
            self.u_guess.clone_from(&self.u_temp);
            self.shift_in_place();
            self.state = GuessState::Warm;
            u
        } else {
            let u = self.u_guess[0].clone();
            self.shift_in_place();
            self.state = GuessState::Stale;
            u
        }
    }

    /// Shift both trajectories left one stage, duplicating the last stage.
    fn shift_in_place(&mut self) {
        self.x_guess.rotate_left(1);
        self.u_guess.rotate_left(1);
        let n1 = self.x_guess.len();
        self.x_guess[n1 - 1] = self.x_guess[n1 - 2].clone();
        let n = self.u_guess.len();
        if n >= 2 {
            self.u_guess[n - 1] = self.u_guess[n - 2].clone();
        }
    }

    /// Resize all four buffers to horizon `n`, truncating or padding by
    /// duplication of the final stage.
    pub fn resize(&mut self, n: usize) {
        resize_traj(&mut self.x_guess, n + 1);
        resize_traj(&mut self.u_guess, n);
        resize_traj(&mut self.x_temp, n + 1);
        resize_traj(&mut self.u_temp, n);
    }
}

fn resize_traj(traj: &mut Vec<Vector>, len: usize) {
    if traj.len() > len {
        traj.truncate(len);
    } else if let Some(last) = traj.last().cloned() {
        traj.resize(len, last);
    }
}
