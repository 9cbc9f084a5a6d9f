//! Learned viability filter
//!
//! Wraps an offline-trained classifier of the viable set into a scalar
//! margin usable as an optimization constraint:
//!
//! ```text
//! h(x, alpha) = f(normalize(x)) * (100 - alpha) / 100 - ‖v‖
//! ```
//!
//! where `f` is a small ReLU network over the normalized state, `v` is the
//! velocity sub-state and `alpha ∈ [0, 100]` trades conservatism without
//! retraining. The raw velocity norm is subtracted so the margin degrades to
//! infeasible as speed grows regardless of the network's output scale.
//!
//! Position components are normalized by stored per-joint mean/std;
//! velocity components are divided by `max(‖v‖, eps)` so the map stays
//! defined at rest.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::InferenceDevice;
use crate::Vector;

/// Guard on the velocity norm used during normalization.
const VEL_NORM_EPS: f64 = 1e-3;

/// Errors from loading or validating the filter artifact.
#[derive(Debug, Error)]
pub enum SafetyError {
    #[error("failed to read artifact: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse artifact: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("artifact shape mismatch: {0}")]
    ShapeMismatch(String),
}

/// One dense layer of the trained network, row-major.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerWeights {
    pub weight: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
}

/// Serialized form of the trained filter: normalization statistics plus the
/// dense layer stack. The training pipeline that produces this file is an
/// external collaborator; loading is deterministic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyArtifact {
    /// Per-joint position mean.
    pub mean: Vec<f64>,
    /// Per-joint position standard deviation.
    pub std: Vec<f64>,
    /// Dense layers, each followed by a ReLU (the last included, so the raw
    /// network output is non-negative).
    pub layers: Vec<LayerWeights>,
}

impl SafetyArtifact {
    /// Read an artifact from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SafetyError> {
        let file = File::open(path)?;
        let artifact = serde_json::from_reader(BufReader::new(file))?;
        Ok(artifact)
    }
}

/// The viability filter, built once from a [`SafetyArtifact`] and immutable
/// thereafter.
#[derive(Debug, Clone)]
pub struct SafetyFilter {
    mean: DVector<f64>,
    std: DVector<f64>,
    layers: Vec<(DMatrix<f64>, DVector<f64>)>,
    nq: usize,
    device: InferenceDevice,
}

impl SafetyFilter {
    /// Validate an artifact against the model dimensions and build the
    /// filter.
    pub fn from_artifact(
        artifact: &SafetyArtifact,
        nq: usize,
        device: InferenceDevice,
    ) -> Result<Self, SafetyError> {
        if artifact.mean.len() != nq || artifact.std.len() != nq {
            return Err(SafetyError::ShapeMismatch(format!(
                "normalization vectors have length {}/{}, expected {}",
                artifact.mean.len(),
                artifact.std.len(),
                nq
            )));
        }
        if artifact.std.iter().any(|s| *s <= 0.0) {
            return Err(SafetyError::ShapeMismatch(
                "standard deviations must be strictly positive".into(),
            ));
        }
        if artifact.layers.is_empty() {
            return Err(SafetyError::ShapeMismatch("no layers in artifact".into()));
        }

        let mut layers = Vec::with_capacity(artifact.layers.len());
        let mut in_dim = 2 * nq;
        for (i, layer) in artifact.layers.iter().enumerate() {
            let rows = layer.weight.len();
            if rows == 0 || rows != layer.bias.len() {
                return Err(SafetyError::ShapeMismatch(format!(
                    "layer {i}: {} rows vs {} biases",
                    rows,
                    layer.bias.len()
                )));
            }
            let cols = layer.weight[0].len();
            if cols != in_dim || layer.weight.iter().any(|r| r.len() != cols) {
                return Err(SafetyError::ShapeMismatch(format!(
                    "layer {i}: expected {in_dim} inputs"
                )));
            }
            let weight =
                DMatrix::from_row_iterator(rows, cols, layer.weight.iter().flatten().copied());
            let bias = DVector::from_vec(layer.bias.clone());
            layers.push((weight, bias));
            in_dim = rows;
        }
        if in_dim != 1 {
            return Err(SafetyError::ShapeMismatch(format!(
                "final layer produces {in_dim} outputs, expected a scalar"
            )));
        }

        Ok(Self {
            mean: DVector::from_vec(artifact.mean.clone()),
            std: DVector::from_vec(artifact.std.clone()),
            layers,
            nq,
            device,
        })
    }

    /// Load and validate the artifact file in one step.
    pub fn load(
        path: impl AsRef<Path>,
        nq: usize,
        device: InferenceDevice,
    ) -> Result<Self, SafetyError> {
        let artifact = SafetyArtifact::load(path)?;
        let filter = Self::from_artifact(&artifact, nq, device)?;
        tracing::debug!(layers = filter.layers.len(), nq, "loaded safety filter artifact");
        Ok(filter)
    }

    pub fn num_joints(&self) -> usize {
        self.nq
    }

    pub fn device(&self) -> InferenceDevice {
        self.device
    }

    /// Normalized network input for state `x = [q, v]`.
    fn normalize(&self, x: &Vector) -> (Vector, f64) {
        let nq = self.nq;
        let v = x.rows(nq, nq);
        let vel_norm = v.norm().max(VEL_NORM_EPS);

        let mut z = Vector::zeros(2 * nq);
        for i in 0..nq {
            z[i] = (x[i] - self.mean[i]) / self.std[i];
            z[nq + i] = x[nq + i] / vel_norm;
        }
        (z, vel_norm)
    }

    /// Raw network output f(normalize(x)); non-negative by construction.
    fn network(&self, z: &Vector) -> f64 {
        let mut out = z.clone();
        for (w, b) in &self.layers {
            out = w * out + b;
            out.apply(|e| *e = e.max(0.0));
        }
        out[0]
    }

    /// Viability margin `h(x, alpha)`.
    ///
    /// `alpha` is clamped to `[0, 100]`; higher values shrink the admissible
    /// margin.
    pub fn margin(&self, x: &Vector, alpha: f64) -> f64 {
        debug_assert_eq!(x.len(), 2 * self.nq);
        let alpha = alpha.clamp(0.0, 100.0);
        let (z, vel_norm) = self.normalize(x);
        self.network(&z) * (100.0 - alpha) / 100.0 - vel_norm
    }

    /// Analytic gradient of the margin with respect to the state.
    ///
    /// Backpropagates through the ReLU stack and the affine normalization;
    /// this is the gradient handed to the optimizer's constraint linearizer.
    pub fn margin_gradient(&self, x: &Vector, alpha: f64) -> Vector {
        let nq = self.nq;
        let alpha = alpha.clamp(0.0, 100.0);
        let scale = (100.0 - alpha) / 100.0;
        let (z, vel_norm) = self.normalize(x);
        let v = x.rows(nq, nq).clone_owned();

        // Forward pass, keeping pre-activations.
        let mut activation = z.clone();
        let mut pre_activations = Vec::with_capacity(self.layers.len());
        for (w, b) in &self.layers {
            let pre = w * &activation + b;
            activation = pre.map(|e| e.max(0.0));
            pre_activations.push(pre);
        }

        // Backward pass: d f / d z.
        let mut grad = DVector::from_element(1, 1.0);
        for ((w, _), pre) in self.layers.iter().zip(pre_activations.iter()).rev() {
            let masked = DVector::from_iterator(
                grad.len(),
                grad.iter()
                    .zip(pre.iter())
                    .map(|(g, p)| if *p > 0.0 { *g } else { 0.0 }),
            );
            grad = w.transpose() * masked;
        }

        // Chain through the normalization.
        let mut dx = Vector::zeros(2 * nq);
        for i in 0..nq {
            dx[i] = scale * grad[i] / self.std[i];
        }

        // Velocity part: z_v = v / r with r = max(‖v‖, eps), plus the
        // explicit -‖v‖ term.
        let r = vel_norm;
        let v_over_r = &v / r;
        let saturated = v.norm() <= VEL_NORM_EPS;
        for i in 0..nq {
            let mut acc = 0.0;
            for j in 0..nq {
                let mut d = if i == j { 1.0 / r } else { 0.0 };
                if !saturated {
                    d -= v[i] * v[j] / (r * r * r);
                }
                acc += scale * grad[nq + j] * d;
            }
            // d‖v‖/dv_i, guarded at rest.
            acc -= if saturated { 0.0 } else { v_over_r[i] };
            dx[nq + i] = acc;
        }
        dx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Small 2-joint filter with hand-picked weights.
    fn test_filter() -> SafetyFilter {
        let artifact = SafetyArtifact {
            mean: vec![1.0, 1.0],
            std: vec![0.5, 0.5],
            layers: vec![
                LayerWeights {
                    weight: vec![
                        vec![0.3, -0.2, 0.1, 0.4],
                        vec![-0.1, 0.5, 0.2, -0.3],
                        vec![0.2, 0.2, -0.4, 0.1],
                    ],
                    bias: vec![0.1, 0.2, -0.1],
                },
                LayerWeights {
                    weight: vec![vec![0.5, -0.4, 0.3], vec![0.2, 0.1, -0.2]],
                    bias: vec![0.05, 0.1],
                },
                LayerWeights {
                    weight: vec![vec![0.6, 0.8]],
                    bias: vec![0.2],
                },
            ],
        };
        SafetyFilter::from_artifact(&artifact, 2, InferenceDevice::Cpu).unwrap()
    }

    #[test]
    fn test_margin_monotone_in_alpha() {
        let filter = test_filter();
        let x = Vector::from_vec(vec![1.2, 0.8, 0.5, -0.3]);

        let mut last = f64::INFINITY;
        for alpha in [0.0, 10.0, 25.0, 50.0, 90.0, 100.0] {
            let m = filter.margin(&x, alpha);
            assert!(m <= last + 1e-12, "margin increased at alpha={alpha}");
            last = m;
        }
    }

    #[test]
    fn test_margin_at_rest_uses_eps_guard() {
        let filter = test_filter();
        let x = Vector::from_vec(vec![1.0, 1.0, 0.0, 0.0]);

        // At rest the velocity term contributes exactly eps, so the raw
        // network output can be recovered and the alpha scaling checked.
        let m0 = filter.margin(&x, 0.0);
        assert!(m0.is_finite());
        let raw = m0 + 1e-3;
        assert!(raw >= 0.0, "ReLU output must be non-negative");
        assert_relative_eq!(filter.margin(&x, 50.0), raw * 0.5 - 1e-3, epsilon = 1e-12);
    }

    #[test]
    fn test_full_alpha_margin_is_negative_velocity_norm() {
        let filter = test_filter();
        let x = Vector::from_vec(vec![0.9, 1.4, 1.0, 2.0]);

        // alpha = 100 removes the network entirely.
        let m = filter.margin(&x, 100.0);
        let vnorm = (1.0_f64 * 1.0 + 2.0 * 2.0).sqrt();
        assert_relative_eq!(m, -vnorm, epsilon = 1e-12);
    }

    #[test]
    fn test_gradient_matches_finite_differences() {
        let filter = test_filter();
        let x = Vector::from_vec(vec![1.3, 0.7, 0.6, -0.4]);
        let alpha = 20.0;

        let grad = filter.margin_gradient(&x, alpha);
        let h = 1e-6;
        for i in 0..4 {
            let mut xp = x.clone();
            let mut xm = x.clone();
            xp[i] += h;
            xm[i] -= h;
            let fd = (filter.margin(&xp, alpha) - filter.margin(&xm, alpha)) / (2.0 * h);
            assert_relative_eq!(grad[i], fd, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_artifact_roundtrip_through_file() {
        let filter = test_filter();
        let artifact = SafetyArtifact {
            mean: vec![1.0, 1.0],
            std: vec![0.5, 0.5],
            layers: vec![
                LayerWeights {
                    weight: vec![
                        vec![0.3, -0.2, 0.1, 0.4],
                        vec![-0.1, 0.5, 0.2, -0.3],
                        vec![0.2, 0.2, -0.4, 0.1],
                    ],
                    bias: vec![0.1, 0.2, -0.1],
                },
                LayerWeights {
                    weight: vec![vec![0.5, -0.4, 0.3], vec![0.2, 0.1, -0.2]],
                    bias: vec![0.05, 0.1],
                },
                LayerWeights {
                    weight: vec![vec![0.6, 0.8]],
                    bias: vec![0.2],
                },
            ],
        };

        let path = std::env::temp_dir().join("safempc_filter_roundtrip.json");
        let json = serde_json::to_string(&artifact).unwrap();
        std::fs::write(&path, json).unwrap();

        let loaded = SafetyFilter::load(&path, 2, InferenceDevice::Cpu).unwrap();
        std::fs::remove_file(&path).ok();

        let x = Vector::from_vec(vec![1.1, 0.9, 0.2, 0.1]);
        assert_relative_eq!(loaded.margin(&x, 10.0), filter.margin(&x, 10.0), epsilon = 1e-12);
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let artifact = SafetyArtifact {
            mean: vec![1.0],
            std: vec![0.5],
            layers: vec![LayerWeights {
                weight: vec![vec![0.3, -0.2, 0.1]],
                bias: vec![0.1],
            }],
        };
        // nq = 1 means the first layer must take 2 inputs, not 3.
        let err = SafetyFilter::from_artifact(&artifact, 1, InferenceDevice::Cpu);
        assert!(matches!(err, Err(SafetyError::ShapeMismatch(_))));
    }
}
