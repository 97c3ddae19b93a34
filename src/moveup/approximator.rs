use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// Maps a feature vector to one score per output (per station for move-up
/// policies).
pub trait FunctionApproximator: Send + Sync {
    fn input_len(&self) -> usize;

    fn output_len(&self) -> usize;

    fn evaluate(&self, features: &[f64]) -> Result<Vec<f64>>;

    fn clone_box(&self) -> Box<dyn FunctionApproximator>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DenseLayer {
    pub weights: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
}

impl DenseLayer {
    fn validate(&self) -> Result<()> {
        let inputs = self.input_len();
        if self.weights.is_empty() || inputs == 0 {
            return Err(Error::invalid("approximator", "layer has no weights"));
        }
        if self.weights.iter().any(|row| row.len() != inputs) {
            return Err(Error::invalid("approximator", "ragged weight matrix"));
        }
        if self.bias.len() != self.weights.len() {
            return Err(Error::DimensionMismatch {
                component: "approximator bias",
                expected: self.weights.len(),
                actual: self.bias.len(),
            });
        }
        Ok(())
    }

    fn input_len(&self) -> usize {
        self.weights.first().map_or(0, Vec::len)
    }

    fn apply(&self, input: &[f64]) -> Vec<f64> {
        self.weights
            .iter()
            .zip(&self.bias)
            .map(|(row, bias)| row.iter().zip(input).map(|(w, x)| w * x).sum::<f64>() + bias)
            .collect()
    }
}

/// Single affine map: `scores = W x + b`.
#[derive(Clone, Debug, PartialEq)]
pub struct LinearApproximator {
    layer: DenseLayer,
}

impl LinearApproximator {
    pub fn new(weights: Vec<Vec<f64>>, bias: Vec<f64>) -> Result<Self> {
        let layer = DenseLayer { weights, bias };
        layer.validate()?;
        Ok(Self { layer })
    }
}

impl FunctionApproximator for LinearApproximator {
    fn input_len(&self) -> usize {
        self.layer.input_len()
    }

    fn output_len(&self) -> usize {
        self.layer.bias.len()
    }

    fn evaluate(&self, features: &[f64]) -> Result<Vec<f64>> {
        check_input(self.input_len(), features)?;
        Ok(self.layer.apply(features))
    }

    fn clone_box(&self) -> Box<dyn FunctionApproximator> {
        Box::new(self.clone())
    }
}

/// Feed-forward network with ReLU hidden layers and a linear output layer.
#[derive(Clone, Debug, PartialEq)]
pub struct MlpApproximator {
    layers: Vec<DenseLayer>,
}

impl MlpApproximator {
    pub fn new(layers: Vec<DenseLayer>) -> Result<Self> {
        if layers.is_empty() {
            return Err(Error::invalid("approximator", "network has no layers"));
        }
        for layer in &layers {
            layer.validate()?;
        }
        for pair in layers.windows(2) {
            if pair[1].input_len() != pair[0].bias.len() {
                return Err(Error::DimensionMismatch {
                    component: "approximator layer",
                    expected: pair[0].bias.len(),
                    actual: pair[1].input_len(),
                });
            }
        }
        Ok(Self { layers })
    }
}

impl FunctionApproximator for MlpApproximator {
    fn input_len(&self) -> usize {
        self.layers[0].input_len()
    }

    fn output_len(&self) -> usize {
        self.layers.last().map_or(0, |layer| layer.bias.len())
    }

    fn evaluate(&self, features: &[f64]) -> Result<Vec<f64>> {
        check_input(self.input_len(), features)?;
        let last = self.layers.len() - 1;
        let mut activations = features.to_vec();
        for (idx, layer) in self.layers.iter().enumerate() {
            activations = layer.apply(&activations);
            if idx < last {
                for value in &mut activations {
                    *value = value.max(0.0);
                }
            }
        }
        Ok(activations)
    }

    fn clone_box(&self) -> Box<dyn FunctionApproximator> {
        Box::new(self.clone())
    }
}

fn check_input(expected: usize, features: &[f64]) -> Result<()> {
    if features.len() != expected {
        return Err(Error::DimensionMismatch {
            component: "approximator input",
            expected,
            actual: features.len(),
        });
    }
    Ok(())
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
enum ModelFile {
    Linear { weights: Vec<Vec<f64>>, bias: Vec<f64> },
    Mlp { layers: Vec<DenseLayer> },
}

pub fn load_approximator(path: &Path) -> Result<Box<dyn FunctionApproximator>> {
    let contents = fs::read_to_string(path).map_err(|err| {
        Error::ConfigIo(format!(
            "failed to read model '{}': {}",
            path.display(),
            err
        ))
    })?;
    parse_approximator(&contents)
}

pub(crate) fn parse_approximator(contents: &str) -> Result<Box<dyn FunctionApproximator>> {
    let model: ModelFile = serde_json::from_str(contents)
        .map_err(|err| Error::ModelParse(format!("failed to parse model: {}", err)))?;
    Ok(match model {
        ModelFile::Linear { weights, bias } => Box::new(LinearApproximator::new(weights, bias)?),
        ModelFile::Mlp { layers } => Box::new(MlpApproximator::new(layers)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_evaluates_affine_map() {
        let model = LinearApproximator::new(vec![vec![1.0, 2.0], vec![0.0, -1.0]], vec![0.5, 1.0])
            .expect("valid model");
        let scores = model.evaluate(&[3.0, 4.0]).expect("input fits");
        assert_eq!(scores, vec![11.5, -3.0]);
        assert_eq!(model.output_len(), 2);
    }

    #[test]
    fn linear_rejects_wrong_input_length() {
        let model = LinearApproximator::new(vec![vec![1.0, 2.0]], vec![0.0]).expect("valid model");
        let result = model.evaluate(&[1.0]);
        assert!(matches!(
            result,
            Err(Error::DimensionMismatch {
                expected: 2,
                actual: 1,
                ..
            })
        ));
    }

    #[test]
    fn mlp_applies_relu_between_layers() {
        let model = MlpApproximator::new(vec![
            DenseLayer {
                weights: vec![vec![1.0], vec![-1.0]],
                bias: vec![0.0, 0.0],
            },
            DenseLayer {
                weights: vec![vec![1.0, 1.0]],
                bias: vec![0.0],
            },
        ])
        .expect("valid model");
        assert_eq!(model.evaluate(&[2.0]).expect("input fits"), vec![2.0]);
        assert_eq!(model.evaluate(&[-3.0]).expect("input fits"), vec![3.0]);
    }

    #[test]
    fn mlp_rejects_mismatched_layers() {
        let result = MlpApproximator::new(vec![
            DenseLayer {
                weights: vec![vec![1.0]],
                bias: vec![0.0],
            },
            DenseLayer {
                weights: vec![vec![1.0, 1.0]],
                bias: vec![0.0],
            },
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn parses_model_files() {
        let linear = parse_approximator(r#"{"kind":"linear","weights":[[1.0,0.0]],"bias":[0.0]}"#)
            .expect("linear model parses");
        assert_eq!(linear.input_len(), 2);

        let mlp = parse_approximator(
            r#"{"kind":"mlp","layers":[{"weights":[[1.0]],"bias":[0.0]},{"weights":[[2.0],[3.0]],"bias":[0.0,1.0]}]}"#,
        )
        .expect("mlp model parses");
        assert_eq!(mlp.output_len(), 2);

        assert!(parse_approximator(r#"{"kind":"forest"}"#).is_err());
    }
}
