//! ACADOS FFI bindings for the generated planar-arm solver
//!
//! Raw C bindings to the code-generated OCP solver plus a safe wrapper
//! implementing [`OcpSolver`]. Only compiled with `feature = "acados"`;
//! the generated sources and their build are external to this crate.

#![allow(non_camel_case_types)]
#![allow(dead_code)]

use std::ffi::CString;
use std::os::raw::{c_char, c_double, c_int, c_void};

use safempc_core::Vector;

use crate::solver::{OcpSolver, ProblemSpec, SolveTimings, SolverError};

/// Dimension constants from the generated code.
pub const NX: usize = 6; // State dimension: 2 * 3 joints
pub const NU: usize = 3; // Control dimension
pub const NP: usize = 2; // Stage parameters: [alpha, activation]
pub const N: usize = 20; // Generated horizon length

// Opaque types from ACADOS.
#[repr(C)]
pub struct ocp_nlp_in {
    _private: [u8; 0],
}

#[repr(C)]
pub struct ocp_nlp_out {
    _private: [u8; 0],
}

#[repr(C)]
pub struct ocp_nlp_solver {
    _private: [u8; 0],
}

#[repr(C)]
pub struct ocp_nlp_config {
    _private: [u8; 0],
}

#[repr(C)]
pub struct ocp_nlp_dims {
    _private: [u8; 0],
}

/// Opaque handle to the generated solver capsule.
#[repr(C)]
pub struct planar_arm_solver_capsule {
    _private: [u8; 0],
}

extern "C" {
    // Capsule lifecycle.
    pub fn planar_arm_acados_create_capsule() -> *mut planar_arm_solver_capsule;
    pub fn planar_arm_acados_free_capsule(capsule: *mut planar_arm_solver_capsule) -> c_int;
    pub fn planar_arm_acados_create(capsule: *mut planar_arm_solver_capsule) -> c_int;
    pub fn planar_arm_acados_free(capsule: *mut planar_arm_solver_capsule) -> c_int;
    pub fn planar_arm_acados_reset(
        capsule: *mut planar_arm_solver_capsule,
        reset_qp_solver_mem: c_int,
    ) -> c_int;

    // Horizon re-discretization.
    pub fn planar_arm_acados_update_time_steps(
        capsule: *mut planar_arm_solver_capsule,
        n_time_steps: c_int,
        new_time_steps: *const c_double,
    ) -> c_int;

    // Solving and parameters.
    pub fn planar_arm_acados_solve(capsule: *mut planar_arm_solver_capsule) -> c_int;
    pub fn planar_arm_acados_update_params(
        capsule: *mut planar_arm_solver_capsule,
        stage: c_int,
        value: *const c_double,
        np: c_int,
    ) -> c_int;

    // Accessors for the internal structures.
    pub fn planar_arm_acados_get_nlp_in(
        capsule: *mut planar_arm_solver_capsule,
    ) -> *mut ocp_nlp_in;
    pub fn planar_arm_acados_get_nlp_out(
        capsule: *mut planar_arm_solver_capsule,
    ) -> *mut ocp_nlp_out;
    pub fn planar_arm_acados_get_nlp_solver(
        capsule: *mut planar_arm_solver_capsule,
    ) -> *mut ocp_nlp_solver;
    pub fn planar_arm_acados_get_nlp_config(
        capsule: *mut planar_arm_solver_capsule,
    ) -> *mut ocp_nlp_config;
    pub fn planar_arm_acados_get_nlp_dims(
        capsule: *mut planar_arm_solver_capsule,
    ) -> *mut ocp_nlp_dims;

    // ACADOS common setters/getters.
    pub fn ocp_nlp_constraints_model_set(
        config: *mut ocp_nlp_config,
        dims: *mut ocp_nlp_dims,
        in_: *mut ocp_nlp_in,
        out: *mut ocp_nlp_out,
        stage: c_int,
        field: *const c_char,
        value: *mut c_void,
    ) -> c_int;

    pub fn ocp_nlp_cost_model_set(
        config: *mut ocp_nlp_config,
        dims: *mut ocp_nlp_dims,
        in_: *mut ocp_nlp_in,
        stage: c_int,
        field: *const c_char,
        value: *mut c_void,
    ) -> c_int;

    pub fn ocp_nlp_out_set(
        config: *mut ocp_nlp_config,
        dims: *mut ocp_nlp_dims,
        out: *mut ocp_nlp_out,
        in_: *mut ocp_nlp_in,
        stage: c_int,
        field: *const c_char,
        value: *mut c_void,
    );

    pub fn ocp_nlp_out_get(
        config: *mut ocp_nlp_config,
        dims: *mut ocp_nlp_dims,
        out: *mut ocp_nlp_out,
        stage: c_int,
        field: *const c_char,
        value: *mut c_void,
    );

    pub fn ocp_nlp_get(solver: *mut ocp_nlp_solver, field: *const c_char, value: *mut c_void);
}

/// Safe wrapper around the generated solver capsule.
///
/// Owns the capsule for its whole lifetime; all pointers below are borrowed
/// from it and freed together in `Drop`.
pub struct AcadosSolver {
    capsule: *mut planar_arm_solver_capsule,
    config: *mut ocp_nlp_config,
    dims: *mut ocp_nlp_dims,
    nlp_in: *mut ocp_nlp_in,
    nlp_out: *mut ocp_nlp_out,
    nlp_solver: *mut ocp_nlp_solver,
    horizon: usize,
}

// The capsule is confined to the owning controller; no aliasing across
// threads.
unsafe impl Send for AcadosSolver {}

impl AcadosSolver {
    fn field(name: &str) -> CString {
        CString::new(name).expect("field name contains no NUL")
    }

    fn out_set(&mut self, stage: usize, field: &str, value: &[f64]) {
        let cfield = Self::field(field);
        unsafe {
            ocp_nlp_out_set(
                self.config,
                self.dims,
                self.nlp_out,
                self.nlp_in,
                stage as c_int,
                cfield.as_ptr(),
                value.as_ptr() as *mut c_void,
            );
        }
    }

    fn out_get(&self, stage: usize, field: &str, len: usize) -> Vec<f64> {
        let cfield = Self::field(field);
        let mut value = vec![0.0; len];
        unsafe {
            ocp_nlp_out_get(
                self.config,
                self.dims,
                self.nlp_out,
                stage as c_int,
                cfield.as_ptr(),
                value.as_mut_ptr() as *mut c_void,
            );
        }
        value
    }

    fn stat(&self, field: &str) -> f64 {
        let cfield = Self::field(field);
        let mut value: f64 = 0.0;
        unsafe {
            ocp_nlp_get(
                self.nlp_solver,
                cfield.as_ptr(),
                &mut value as *mut f64 as *mut c_void,
            );
        }
        value
    }
}

impl OcpSolver for AcadosSolver {
    fn from_problem(problem: &ProblemSpec) -> Result<Self, SolverError> {
        if problem.nx != NX || problem.nu != NU {
            return Err(SolverError::UnsupportedDimensions(format!(
                "generated solver expects nx={NX}, nu={NU}; got nx={}, nu={}",
                problem.nx, problem.nu
            )));
        }
        if problem.horizon > N {
            return Err(SolverError::UnsupportedDimensions(format!(
                "generated solver horizon cap is {N}, got {}",
                problem.horizon
            )));
        }

        unsafe {
            let capsule = planar_arm_acados_create_capsule();
            if capsule.is_null() {
                return Err(SolverError::InitializationFailed(-1));
            }
            let status = planar_arm_acados_create(capsule);
            if status != 0 {
                planar_arm_acados_free_capsule(capsule);
                return Err(SolverError::InitializationFailed(status));
            }

            let mut solver = Self {
                capsule,
                config: planar_arm_acados_get_nlp_config(capsule),
                dims: planar_arm_acados_get_nlp_dims(capsule),
                nlp_in: planar_arm_acados_get_nlp_in(capsule),
                nlp_out: planar_arm_acados_get_nlp_out(capsule),
                nlp_solver: planar_arm_acados_get_nlp_solver(capsule),
                horizon: problem.horizon,
            };
            solver.set_time_steps(&problem.time_steps)?;
            Ok(solver)
        }
    }

    fn reset(&mut self) {
        unsafe {
            planar_arm_acados_reset(self.capsule, 1);
        }
    }

    fn set_time_steps(&mut self, steps: &[f64]) -> Result<(), SolverError> {
        if steps.is_empty() || steps.len() > N {
            return Err(SolverError::InvalidTiming(format!(
                "{} stage durations, generated cap is {N}",
                steps.len()
            )));
        }
        let status = unsafe {
            planar_arm_acados_update_time_steps(self.capsule, steps.len() as c_int, steps.as_ptr())
        };
        if status != 0 {
            return Err(SolverError::InvalidTiming(format!(
                "time step update rejected with code {status}"
            )));
        }
        self.horizon = steps.len();
        Ok(())
    }

    fn constrain_initial_state(&mut self, x0: &Vector) {
        let lbx = Self::field("lbx");
        let ubx = Self::field("ubx");
        unsafe {
            ocp_nlp_constraints_model_set(
                self.config,
                self.dims,
                self.nlp_in,
                self.nlp_out,
                0,
                lbx.as_ptr(),
                x0.as_slice().as_ptr() as *mut c_void,
            );
            ocp_nlp_constraints_model_set(
                self.config,
                self.dims,
                self.nlp_in,
                self.nlp_out,
                0,
                ubx.as_ptr(),
                x0.as_slice().as_ptr() as *mut c_void,
            );
        }
    }

    fn set_state_guess(&mut self, stage: usize, x: &Vector) {
        self.out_set(stage, "x", x.as_slice());
    }

    fn set_control_guess(&mut self, stage: usize, u: &Vector) {
        self.out_set(stage, "u", u.as_slice());
    }

    fn set_stage_params(&mut self, stage: usize, params: &[f64]) {
        unsafe {
            planar_arm_acados_update_params(
                self.capsule,
                stage as c_int,
                params.as_ptr(),
                params.len() as c_int,
            );
        }
    }

    fn set_reference(&mut self, stage: usize, yref: &[f64]) {
        let cfield = Self::field("yref");
        unsafe {
            ocp_nlp_cost_model_set(
                self.config,
                self.dims,
                self.nlp_in,
                stage as c_int,
                cfield.as_ptr(),
                yref.as_ptr() as *mut c_void,
            );
        }
    }

    fn solve(&mut self) -> i32 {
        unsafe { planar_arm_acados_solve(self.capsule) }
    }

    fn state(&self, stage: usize) -> Vector {
        Vector::from_vec(self.out_get(stage, "x", NX))
    }

    fn control(&self, stage: usize) -> Vector {
        Vector::from_vec(self.out_get(stage, "u", NU))
    }

    fn timings(&self) -> SolveTimings {
        SolveTimings {
            total: self.stat("time_tot"),
            lin: self.stat("time_lin"),
            sim: self.stat("time_sim"),
            qp: self.stat("time_qp"),
        }
    }
}

impl Drop for AcadosSolver {
    fn drop(&mut self) {
        unsafe {
            planar_arm_acados_free(self.capsule);
            planar_arm_acados_free_capsule(self.capsule);
        }
    }
}
