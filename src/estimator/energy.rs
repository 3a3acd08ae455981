//! Energy-proxy strategies.
//!
//! The normalised energy proxy `E_T` can come from either the closed-form
//! physiological formula or a small learned network distilled from it.
//! Both sit behind [`EnergyModel`]; the estimator owns exactly one,
//! chosen once when the session is built.
//!
//! ```text
//!   Telemetry ──► EnergyInputs ──► dyn EnergyModel ──► E_T ∈ [0, 1]
//!                                   ├── FormulaEnergyModel (default)
//!                                   └── MlpEnergyModel (JSON weights)
//! ```

use std::fs;
use std::path::Path;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::app::events::{AlertEvent, AlertSeverity};
use crate::config::{EnergyModelKind, EstimatorConfig};
use crate::error::{Error, Result};
use crate::math::{clamp, exponential_decay, sigmoid};
use crate::model::Telemetry;

/// Number of normalised features the learned model consumes.
pub const MLP_INPUTS: usize = 5;

/// Raw channels an energy model may draw on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyInputs {
    pub hydration_pct: f64,
    pub heart_rate_bpm: f64,
    pub spo2_pct: f64,
    pub lactate_mmol: f64,
    pub fatigue_idx: f64,
    pub blood_loss_idx: f64,
}

impl EnergyInputs {
    pub fn from_telemetry(t: &Telemetry) -> Self {
        Self {
            hydration_pct: t.hydration_pct,
            heart_rate_bpm: t.heart_rate_bpm,
            spo2_pct: t.spo2_pct,
            lactate_mmol: t.lactate_mmol,
            fatigue_idx: t.fatigue_idx,
            blood_loss_idx: t.blood_loss_idx,
        }
    }

    /// Feature vector in the order the learned model was trained on.
    pub fn normalised(&self) -> [f64; MLP_INPUTS] {
        [
            self.hydration_pct / 100.0,
            self.heart_rate_bpm / 200.0,
            self.spo2_pct / 100.0,
            self.lactate_mmol / 20.0,
            self.fatigue_idx,
        ]
    }
}

/// Strategy producing the normalised energy proxy.
pub trait EnergyModel: Send {
    /// Energy proxy in `[0, 1]`.
    fn estimate_energy(&self, inputs: &EnergyInputs) -> f64;

    fn name(&self) -> &'static str;
}

// ---------------------------------------------------------------------------
// Formula
// ---------------------------------------------------------------------------

/// Weighted sum of five nonlinear terms.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormulaEnergyModel;

impl EnergyModel for FormulaEnergyModel {
    fn estimate_energy(&self, i: &EnergyInputs) -> f64 {
        let hydration = sigmoid(i.hydration_pct, 60.0, 0.1);
        let blood = exponential_decay(i.blood_loss_idx, 3.0);
        // Glycogen cliff above 0.7 fatigue.
        let fatigue = if i.fatigue_idx < 0.7 {
            1.0 - i.fatigue_idx
        } else {
            0.3 * (1.0 - i.fatigue_idx)
        };
        let oxygen = sigmoid(i.spo2_pct, 92.0, 0.3);
        let lactate = exponential_decay((i.lactate_mmol - 2.0).max(0.0), 0.5);

        clamp(
            0.30 * hydration + 0.25 * blood + 0.20 * fatigue + 0.15 * oxygen + 0.10 * lactate,
            0.0,
            1.0,
        )
    }

    fn name(&self) -> &'static str {
        "formula"
    }
}

// ---------------------------------------------------------------------------
// Learned network
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Relu,
    Sigmoid,
    Linear,
}

impl Activation {
    fn apply(self, x: f64) -> f64 {
        match self {
            Self::Relu => x.max(0.0),
            Self::Sigmoid => sigmoid(x, 0.0, 1.0),
            Self::Linear => x,
        }
    }
}

/// One fully-connected layer.  `weights` is row-major `[n_in][n_out]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseLayer {
    pub weights: Vec<Vec<f64>>,
    pub biases: Vec<f64>,
    pub activation: Activation,
}

impl DenseLayer {
    fn inputs(&self) -> usize {
        self.weights.len()
    }

    fn outputs(&self) -> usize {
        self.biases.len()
    }

    fn forward(&self, input: &[f64]) -> Vec<f64> {
        let mut out = self.biases.clone();
        for (x, row) in input.iter().zip(&self.weights) {
            for (o, w) in out.iter_mut().zip(row) {
                *o += x * w;
            }
        }
        for o in &mut out {
            *o = self.activation.apply(*o);
        }
        out
    }
}

/// Feed-forward network loaded from a JSON weights file.
///
/// File shape: `{ "layers": [ { "weights": [[..]], "biases": [..],
/// "activation": "relu" }, .. ] }`.  The default export is
/// 5 → 16 (ReLU) → 8 (ReLU) → 1 (sigmoid).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlpEnergyModel {
    layers: Vec<DenseLayer>,
}

impl MlpEnergyModel {
    pub fn new(layers: Vec<DenseLayer>) -> Result<Self> {
        let model = Self { layers };
        model.check_shape()?;
        Ok(model)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Model(format!("{}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let model: Self =
            serde_json::from_str(text).map_err(|e| Error::Model(format!("weights: {e}")))?;
        model.check_shape()?;
        Ok(model)
    }

    pub fn parameter_count(&self) -> usize {
        self.layers
            .iter()
            .map(|l| l.inputs() * l.outputs() + l.outputs())
            .sum()
    }

    fn check_shape(&self) -> Result<()> {
        let Some(first) = self.layers.first() else {
            return Err(Error::Model("network has no layers".into()));
        };
        if first.inputs() != MLP_INPUTS {
            return Err(Error::Model(format!(
                "first layer expects {} inputs, network is fed {MLP_INPUTS}",
                first.inputs()
            )));
        }
        let mut width = MLP_INPUTS;
        for (idx, layer) in self.layers.iter().enumerate() {
            if layer.inputs() != width {
                return Err(Error::Model(format!(
                    "layer {idx}: {} inputs, previous layer emits {width}",
                    layer.inputs()
                )));
            }
            let n_out = layer.outputs();
            if n_out == 0 || layer.weights.iter().any(|row| row.len() != n_out) {
                return Err(Error::Model(format!("layer {idx}: ragged weight matrix")));
            }
            let finite = layer
                .weights
                .iter()
                .flatten()
                .chain(&layer.biases)
                .all(|v| v.is_finite());
            if !finite {
                return Err(Error::Model(format!("layer {idx}: non-finite weight")));
            }
            width = n_out;
        }
        if width != 1 {
            return Err(Error::Model(format!("network emits {width} outputs, expected 1")));
        }
        Ok(())
    }
}

impl EnergyModel for MlpEnergyModel {
    fn estimate_energy(&self, inputs: &EnergyInputs) -> f64 {
        let mut activations = inputs.normalised().to_vec();
        for layer in &self.layers {
            activations = layer.forward(&activations);
        }
        clamp(activations.first().copied().unwrap_or(0.0), 0.0, 1.0)
    }

    fn name(&self) -> &'static str {
        "mlp"
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Build the configured model.  A learned model that fails to load falls
/// back to the formula, returning the alert to record alongside it.
pub fn select_model(config: &EstimatorConfig) -> (Box<dyn EnergyModel>, Option<AlertEvent>) {
    match (config.energy_model, config.model_path.as_deref()) {
        (EnergyModelKind::Formula, _) => (Box::new(FormulaEnergyModel) as Box<dyn EnergyModel>, None),
        (EnergyModelKind::Learned, path) => {
            let loaded = match path {
                Some(p) => MlpEnergyModel::load(p),
                None => Err(Error::Model("no model_path configured".into())),
            };
            match loaded {
                Ok(model) => {
                    info!(
                        "Estimator: learned energy model loaded ({} parameters)",
                        model.parameter_count()
                    );
                    (Box::new(model) as Box<dyn EnergyModel>, None)
                }
                Err(e) => {
                    warn!("Estimator: {e}; falling back to formula energy model");
                    let alert = AlertEvent::new(
                        0,
                        AlertSeverity::Warn,
                        "estimator",
                        "ESTIMATOR_FALLBACK",
                        format!("learned energy model unavailable: {e}"),
                    );
                    (Box::new(FormulaEnergyModel) as Box<dyn EnergyModel>, Some(alert))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn healthy() -> EnergyInputs {
        EnergyInputs::from_telemetry(&Telemetry::default())
    }

    /// 5 → 1 linear layer followed by a sigmoid with all-zero weights.
    fn flat_network(bias: f64) -> MlpEnergyModel {
        MlpEnergyModel::new(vec![DenseLayer {
            weights: vec![vec![0.0]; MLP_INPUTS],
            biases: vec![bias],
            activation: Activation::Sigmoid,
        }])
        .unwrap()
    }

    #[test]
    fn formula_is_high_for_healthy_inputs() {
        let e = FormulaEnergyModel.estimate_energy(&healthy());
        assert!(e > 0.7 && e <= 1.0, "got {e}");
    }

    #[test]
    fn fatigue_cliff_drops_energy() {
        let mut below = healthy();
        below.fatigue_idx = 0.69;
        let mut above = healthy();
        above.fatigue_idx = 0.71;
        let m = FormulaEnergyModel;
        assert!(m.estimate_energy(&below) - m.estimate_energy(&above) > 0.03);
    }

    #[test]
    fn formula_stays_bounded_on_garbage() {
        let garbage = EnergyInputs {
            hydration_pct: -500.0,
            heart_rate_bpm: f64::NAN,
            spo2_pct: 1e9,
            lactate_mmol: -3.0,
            fatigue_idx: 40.0,
            blood_loss_idx: -10.0,
        };
        let e = FormulaEnergyModel.estimate_energy(&garbage);
        assert!((0.0..=1.0).contains(&e));
    }

    #[test]
    fn mlp_zero_weights_gives_sigmoid_of_bias() {
        let net = flat_network(0.0);
        assert!((net.estimate_energy(&healthy()) - 0.5).abs() < 1e-12);
        assert_eq!(net.parameter_count(), 6);
    }

    #[test]
    fn mlp_hidden_layers_forward() {
        // 5 → 2 relu → 1 linear, summing hydration and spo2 features.
        let mut w1 = vec![vec![0.0, 0.0]; MLP_INPUTS];
        w1[0][0] = 1.0;
        w1[2][1] = 1.0;
        let net = MlpEnergyModel::new(vec![
            DenseLayer {
                weights: w1,
                biases: vec![0.0, 0.0],
                activation: Activation::Relu,
            },
            DenseLayer {
                weights: vec![vec![0.25], vec![0.25]],
                biases: vec![0.0],
                activation: Activation::Linear,
            },
        ])
        .unwrap();
        let e = net.estimate_energy(&healthy());
        assert!((e - 0.25 * (0.8 + 0.98)).abs() < 1e-9);
    }

    #[test]
    fn mlp_rejects_wrong_input_width() {
        let err = MlpEnergyModel::new(vec![DenseLayer {
            weights: vec![vec![0.0]; 4],
            biases: vec![0.0],
            activation: Activation::Sigmoid,
        }])
        .unwrap_err();
        assert!(matches!(err, Error::Model(_)));
    }

    #[test]
    fn mlp_rejects_multiple_outputs() {
        assert!(
            MlpEnergyModel::new(vec![DenseLayer {
                weights: vec![vec![0.0, 0.0]; MLP_INPUTS],
                biases: vec![0.0, 0.0],
                activation: Activation::Sigmoid,
            }])
            .is_err()
        );
    }

    #[test]
    fn mlp_parses_json() {
        let json = serde_json::to_string(&flat_network(2.0)).unwrap();
        let net = MlpEnergyModel::from_json(&json).unwrap();
        assert!(net.estimate_energy(&healthy()) > 0.85);
        assert!(MlpEnergyModel::from_json("{\"layers\": []}").is_err());
    }

    #[test]
    fn missing_weights_fall_back_to_formula() {
        let config = EstimatorConfig {
            energy_model: EnergyModelKind::Learned,
            model_path: Some("/nonexistent/ivctl/weights.json".into()),
        };
        let (model, alert) = select_model(&config);
        assert_eq!(model.name(), "formula");
        let alert = alert.unwrap();
        assert_eq!(alert.code, "ESTIMATOR_FALLBACK");
        assert_eq!(alert.severity, AlertSeverity::Warn);
    }

    #[test]
    fn formula_selected_by_default() {
        let (model, alert) = select_model(&EstimatorConfig::default());
        assert_eq!(model.name(), "formula");
        assert!(alert.is_none());
    }
}
