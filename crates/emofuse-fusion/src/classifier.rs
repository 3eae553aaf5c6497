//! Late-fusion classifier.
//!
//! A small feed-forward network mapping a standardized feature vector to
//! per-class logits over the canonical emotions.
//!
//! # Architecture
//!
//! ```text
//! hidden_size == 0:  Input (d) → Linear(C)
//! hidden_size  > 0:  Input (d) → Linear(h) → ReLU → Dropout(p) → Linear(C)
//! ```
//!
//! Dropout is active only when a mask RNG is passed to
//! [`FusionClassifier::forward_logits`]. There are no normalization layers.
//!
//! Candle's CPU backend cannot be seeded, so parameter initialization and
//! dropout masks are drawn from caller-supplied RNGs instead
//! ([`FusionClassifier::new_seeded`]).

use candle_core::{DType, Device, Tensor};
use candle_nn::{Linear, Module, VarBuilder, VarMap};
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use emofuse_core::{EmoFuseError, Result, NUM_CLASSES};

/// Architecture hyperparameters persisted with the weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Architecture {
    /// Feature vector length.
    pub input_dim: usize,
    /// Hidden width; 0 selects the linear variant.
    pub hidden_size: usize,
    /// Dropout probability after the hidden activation.
    pub dropout: f32,
    /// Number of output logits.
    pub num_classes: usize,
}

impl Architecture {
    /// Architecture over the canonical emotion classes.
    #[must_use]
    pub fn new(input_dim: usize, hidden_size: usize, dropout: f32) -> Self {
        Self {
            input_dim,
            hidden_size,
            dropout,
            num_classes: NUM_CLASSES,
        }
    }

    /// Whether this is the single-affine variant.
    #[must_use]
    pub fn is_linear(&self) -> bool {
        self.hidden_size == 0
    }

    fn validate(&self) -> Result<()> {
        if self.input_dim == 0 || self.num_classes == 0 {
            return Err(EmoFuseError::Config(format!(
                "invalid classifier shape: input_dim={}, num_classes={}",
                self.input_dim, self.num_classes
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(EmoFuseError::Config(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        Ok(())
    }
}

enum Layers {
    Linear {
        fc: Linear,
    },
    Mlp {
        fc1: Linear,
        dropout: f32,
        fc2: Linear,
    },
}

/// Feed-forward fusion classifier.
pub struct FusionClassifier {
    layers: Layers,
    architecture: Architecture,
    device: Device,
}

impl FusionClassifier {
    /// Build the network from a [`VarBuilder`].
    ///
    /// Parameter names are `fc.{weight,bias}` for the linear variant and
    /// `fc1.*` / `fc2.*` for the hidden-layer variant.
    pub fn new(architecture: Architecture, vb: VarBuilder, device: &Device) -> Result<Self> {
        architecture.validate()?;
        let Architecture {
            input_dim,
            hidden_size,
            dropout,
            num_classes,
        } = architecture;

        let layers = if architecture.is_linear() {
            let fc = candle_nn::linear(input_dim, num_classes, vb.pp("fc"))
                .map_err(|e| EmoFuseError::Model(format!("Failed to create fusion fc: {e}")))?;
            Layers::Linear { fc }
        } else {
            let fc1 = candle_nn::linear(input_dim, hidden_size, vb.pp("fc1"))
                .map_err(|e| EmoFuseError::Model(format!("Failed to create fusion fc1: {e}")))?;
            let fc2 = candle_nn::linear(hidden_size, num_classes, vb.pp("fc2"))
                .map_err(|e| EmoFuseError::Model(format!("Failed to create fusion fc2: {e}")))?;
            Layers::Mlp {
                fc1,
                dropout,
                fc2,
            }
        };

        Ok(Self {
            layers,
            architecture,
            device: device.clone(),
        })
    }

    /// Create a classifier whose parameters live in `varmap`, ready for an
    /// optimizer.
    pub fn new_trainable(architecture: Architecture, varmap: &VarMap, device: &Device) -> Result<Self> {
        let vb = VarBuilder::from_varmap(varmap, DType::F32, device);
        Self::new(architecture, vb, device)
    }

    /// Trainable classifier whose parameters are drawn from `seed`.
    ///
    /// Every weight and bias is re-drawn uniformly from
    /// `[-1/sqrt(fan_in), 1/sqrt(fan_in)]`, visiting parameters in name order,
    /// so the same seed and architecture always give the same network.
    pub fn new_seeded(
        architecture: Architecture,
        varmap: &VarMap,
        device: &Device,
        seed: u64,
    ) -> Result<Self> {
        let model = Self::new_trainable(architecture, varmap, device)?;
        reseed_parameters(varmap, seed)?;
        Ok(model)
    }

    /// Logits of shape `[batch, num_classes]` for inputs `[batch, input_dim]`.
    ///
    /// With `dropout_rng` set, hidden activations are masked (inverted
    /// dropout) using masks drawn from it; `None` is the inference path.
    pub fn forward_logits(
        &self,
        xs: &Tensor,
        dropout_rng: Option<&mut dyn RngCore>,
    ) -> candle_core::Result<Tensor> {
        match &self.layers {
            Layers::Linear { fc } => fc.forward(xs),
            Layers::Mlp { fc1, dropout, fc2 } => {
                let mut h = fc1.forward(xs)?.relu()?;
                if let Some(rng) = dropout_rng {
                    if *dropout > 0.0 {
                        h = h.mul(&dropout_mask(&h, *dropout, rng)?)?;
                    }
                }
                fc2.forward(&h)
            }
        }
    }

    /// Logits for a single vector, as `f64`.
    pub fn logits_for(&self, features: &[f32]) -> Result<Vec<f64>> {
        if features.len() != self.architecture.input_dim {
            return Err(EmoFuseError::Schema(format!(
                "classifier expects {} features, got {}",
                self.architecture.input_dim,
                features.len()
            )));
        }
        let input = Tensor::from_slice(features, (1, features.len()), &self.device)
            .map_err(|e| EmoFuseError::Model(format!("Failed to create input tensor: {e}")))?;
        let logits = self
            .forward_logits(&input, None)
            .and_then(|t| t.squeeze(0))
            .and_then(|t| t.to_dtype(DType::F64))
            .and_then(|t| t.to_vec1::<f64>())
            .map_err(|e| EmoFuseError::Model(format!("Fusion forward failed: {e}")))?;
        Ok(logits)
    }

    /// Architecture hyperparameters.
    pub fn architecture(&self) -> &Architecture {
        &self.architecture
    }

    /// Returns a reference to the device this classifier runs on.
    pub fn device(&self) -> &Device {
        &self.device
    }
}

/// Inverted-dropout mask shaped like `h`: kept units are scaled by `1 / (1 - p)`.
fn dropout_mask(h: &Tensor, p: f32, rng: &mut dyn RngCore) -> candle_core::Result<Tensor> {
    let scale = 1.0 / (1.0 - p);
    let mask: Vec<f32> = (0..h.elem_count())
        .map(|_| if rng.gen::<f32>() < p { 0.0 } else { scale })
        .collect();
    Tensor::from_vec(mask, h.dims(), h.device())?.to_dtype(h.dtype())
}

/// Re-draw every variable in `varmap` from a `ChaCha8Rng` seeded with `seed`.
fn reseed_parameters(varmap: &VarMap, seed: u64) -> Result<()> {
    let data = varmap
        .data()
        .lock()
        .map_err(|e| EmoFuseError::Model(format!("VarMap lock poisoned: {e}")))?;
    let mut names: Vec<&String> = data.keys().collect();
    names.sort();

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    for name in names {
        let var = &data[name];
        // weight is [out, in]; a bias shares its layer's fan-in
        let layer = name.rsplit_once('.').map_or(name.as_str(), |(prefix, _)| prefix);
        let fan_in = data
            .get(&format!("{layer}.weight"))
            .and_then(|w| w.dims().get(1).copied())
            .unwrap_or(1)
            .max(1);
        let bound = 1.0 / (fan_in as f32).sqrt();
        let values: Vec<f32> = (0..var.elem_count())
            .map(|_| rng.gen_range(-bound..bound))
            .collect();
        Tensor::from_vec(values, var.dims(), var.device())
            .and_then(|t| t.to_dtype(var.dtype()))
            .and_then(|t| var.set(&t))
            .map_err(|e| EmoFuseError::Model(format!("Failed to initialize {name}: {e}")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_variant_shapes() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let model = FusionClassifier::new_trainable(Architecture::new(5, 0, 0.2), &varmap, &device)
            .unwrap();
        assert!(model.architecture().is_linear());

        let xs = Tensor::zeros((3, 5), DType::F32, &device).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let logits = model.forward_logits(&xs, Some(&mut rng)).unwrap();
        assert_eq!(logits.dims(), &[3, NUM_CLASSES]);

        let names: Vec<String> = varmap.data().lock().unwrap().keys().cloned().collect();
        assert!(names.contains(&"fc.weight".to_string()));
        assert!(names.contains(&"fc.bias".to_string()));
    }

    #[test]
    fn test_mlp_variant_shapes() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let model = FusionClassifier::new_trainable(Architecture::new(11, 16, 0.2), &varmap, &device)
            .unwrap();
        assert!(!model.architecture().is_linear());

        let xs = Tensor::ones((4, 11), DType::F32, &device).unwrap();
        let logits = model.forward_logits(&xs, None).unwrap();
        assert_eq!(logits.dims(), &[4, NUM_CLASSES]);
        assert_eq!(varmap.all_vars().len(), 4);
    }

    #[test]
    fn test_eval_forward_is_deterministic() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let model = FusionClassifier::new_trainable(Architecture::new(6, 8, 0.5), &varmap, &device)
            .unwrap();
        let x = [0.3_f32, -1.0, 0.5, 2.0, 0.0, 1.0];
        let a = model.logits_for(&x).unwrap();
        let b = model.logits_for(&x).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), NUM_CLASSES);
    }

    #[test]
    fn test_logits_for_rejects_wrong_dim() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let model = FusionClassifier::new_trainable(Architecture::new(6, 0, 0.0), &varmap, &device)
            .unwrap();
        assert!(matches!(
            model.logits_for(&[1.0, 2.0]),
            Err(EmoFuseError::Schema(_))
        ));
    }

    #[test]
    fn test_invalid_dropout_rejected() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let result = FusionClassifier::new_trainable(Architecture::new(6, 8, 1.0), &varmap, &device);
        assert!(matches!(result, Err(EmoFuseError::Config(_))));
    }

    fn params(varmap: &VarMap) -> Vec<(String, Vec<f32>)> {
        let data = varmap.data().lock().unwrap();
        let mut out: Vec<(String, Vec<f32>)> = data
            .iter()
            .map(|(k, v)| (k.clone(), v.as_tensor().flatten_all().unwrap().to_vec1().unwrap()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    #[test]
    fn test_same_seed_same_parameters() {
        let device = Device::Cpu;
        let arch = Architecture::new(11, 16, 0.2);
        let a = VarMap::new();
        let b = VarMap::new();
        let c = VarMap::new();
        FusionClassifier::new_seeded(arch, &a, &device, 7).unwrap();
        FusionClassifier::new_seeded(arch, &b, &device, 7).unwrap();
        FusionClassifier::new_seeded(arch, &c, &device, 8).unwrap();
        assert_eq!(params(&a), params(&b));
        assert_ne!(params(&a), params(&c));
    }

    #[test]
    fn test_seeded_parameters_respect_fan_in_bound() {
        let varmap = VarMap::new();
        FusionClassifier::new_seeded(Architecture::new(16, 4, 0.0), &varmap, &Device::Cpu, 3).unwrap();
        for (name, values) in params(&varmap) {
            let bound = if name.starts_with("fc1") { 0.25 } else { 0.5 };
            assert!(values.iter().all(|v| v.abs() <= bound), "{name} out of bound");
            assert!(values.iter().any(|&v| v != 0.0), "{name} left at zero");
        }
    }

    #[test]
    fn test_seeded_dropout_is_reproducible() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let model =
            FusionClassifier::new_seeded(Architecture::new(6, 32, 0.5), &varmap, &device, 1).unwrap();
        let xs = Tensor::ones((2, 6), DType::F32, &device).unwrap();
        let run = |seed: u64| -> Vec<Vec<f32>> {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            model.forward_logits(&xs, Some(&mut rng)).unwrap().to_vec2().unwrap()
        };
        assert_eq!(run(5), run(5));
        assert_ne!(run(5), model.forward_logits(&xs, None).unwrap().to_vec2::<f32>().unwrap());
    }
}
