//! Batch initial-condition generation
//!
//! Deterministic sampling of joint configurations strictly inside the
//! position bounds, at rest, filtered through the geometric collision
//! predicate. Used to seed batches of independent controller instances —
//! each batch entry owns its own controller, so the instances can be driven
//! in parallel.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use safempc_core::{Model, Vector};

use crate::constraints::CompiledConstraints;

/// Margin keeping samples strictly inside the position bounds.
const BOUND_MARGIN: f64 = 1e-5;

/// Deterministic sampler over rest states.
pub struct InitialConditionSampler {
    rng: ChaCha8Rng,
}

impl InitialConditionSampler {
    /// All sampling goes through a seeded generator for reproducibility.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Draw one rest state (`v = 0`) strictly inside the position bounds.
    pub fn sample_rest_state(&mut self, model: &Model) -> Vector {
        let nq = model.nq();
        let mut x = Vector::zeros(model.nx());
        for i in 0..nq {
            let lo = model.x_min()[i] + BOUND_MARGIN;
            let hi = model.x_max()[i] - BOUND_MARGIN;
            x[i] = self.rng.gen_range(lo..hi);
        }
        x
    }

    /// Draw `count` collision-free rest states, rejecting colliding draws.
    ///
    /// `max_attempts` bounds the rejection loop so a fully blocked
    /// workspace cannot spin forever.
    pub fn sample_feasible(
        &mut self,
        model: &Model,
        constraints: &CompiledConstraints,
        count: usize,
        max_attempts: usize,
    ) -> Vec<Vector> {
        let mut samples = Vec::with_capacity(count);
        let mut attempts = 0;
        while samples.len() < count && attempts < max_attempts {
            attempts += 1;
            let x = self.sample_rest_state(model);
            if constraints.check_collision(model, &x) {
                samples.push(x);
            }
        }
        samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::{ConstraintBuilder, Obstacle};
    use safempc_core::ModelConfig;

    fn model() -> Model {
        Model::new(&ModelConfig::default())
    }

    #[test]
    fn test_sampling_is_deterministic() {
        let model = model();
        let a = InitialConditionSampler::new(42).sample_rest_state(&model);
        let b = InitialConditionSampler::new(42).sample_rest_state(&model);
        assert_eq!(a, b);
    }

    #[test]
    fn test_samples_inside_bounds_at_rest() {
        let model = model();
        let mut sampler = InitialConditionSampler::new(7);
        for _ in 0..50 {
            let x = sampler.sample_rest_state(&model);
            assert!(model.check_state_constraints(&x));
            for i in model.nq()..model.nx() {
                assert_eq!(x[i], 0.0);
            }
        }
    }

    #[test]
    fn test_feasible_samples_clear_obstacles() {
        let model = model();
        // Floor well above the lowest reachable tip height rejects some
        // configurations.
        let compiled = ConstraintBuilder::new(0.0)
            .obstacles(&[Obstacle::floor(-0.5, 1e6)])
            .compile();

        let mut sampler = InitialConditionSampler::new(3);
        let samples = sampler.sample_feasible(&model, &compiled, 10, 10_000);
        assert!(!samples.is_empty());
        for x in &samples {
            assert!(compiled.check_collision(&model, x));
        }
    }

    #[test]
    fn test_rejection_loop_is_bounded() {
        let model = model();
        // Impossible clearance: every draw is rejected.
        let compiled = ConstraintBuilder::new(0.0)
            .obstacles(&[Obstacle::floor(10.0, 1e6)])
            .compile();

        let mut sampler = InitialConditionSampler::new(3);
        let samples = sampler.sample_feasible(&model, &compiled, 5, 100);
        assert!(samples.is_empty());
    }
}
