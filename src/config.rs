//! Serializable descriptions of networks and training runs.
//!
//! An [`ExperimentSpec`] is usually read from JSON:
//!
//! ```
//! # use cellgraph::config::ExperimentSpec;
//! let spec = ExperimentSpec::from_json(r#"{
//!     "network": {
//!         "seed": 7,
//!         "cells": [
//!             { "name": "hidden", "inputs": 2, "outputs": 4 },
//!             { "name": "output", "inputs": 4, "outputs": 2, "activator": "TanH" }
//!         ],
//!         "connections": [[0, 1]]
//!     },
//!     "training": { "epochs": 20, "learning_rate": 0.3 }
//! }"#).unwrap();
//!
//! let network = spec.network.build().unwrap();
//! assert_eq!(network.output_len(), 2);
//! ```

use std::io;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::activator::Activator;
use crate::cell::Cell;
use crate::error::{Error, Result};
use crate::network::Network;
use crate::trainer::{LearningMode, Logging, StopCondition, Trainer};

/// One cell of a [`NetworkSpec`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CellSpec {
    /// Defaults to `cell-<index>`.
    #[serde(default)]
    pub name: String,
    pub inputs: usize,
    pub outputs: usize,
    #[serde(default)]
    pub activator: Activator,
    #[serde(default)]
    pub recurrent: bool,
    #[serde(default = "enabled")]
    pub bias: bool,
}

fn enabled() -> bool {
    true
}

impl CellSpec {
    pub fn new(inputs: usize, outputs: usize, activator: Activator) -> Self {
        CellSpec {
            name: String::new(),
            inputs,
            outputs,
            activator,
            recurrent: false,
            bias: true,
        }
    }
}

/// Network topology: cells in insertion order plus the connections between
/// them, given as pairs of cell indices.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSpec {
    /// Seed for weight initialisation. Random when absent.
    pub seed: Option<u64>,
    pub parallel: bool,
    /// Worker pool size; 0 picks one thread per CPU.
    pub threads: usize,
    pub cells: Vec<CellSpec>,
    pub connections: Vec<(usize, usize)>,
}

impl NetworkSpec {
    /// Describes a plain chain of cells, one per consecutive pair of
    /// `sizes`, e.g. `[2, 5, 2]` gives a 2→5 cell feeding a 5→2 cell.
    pub fn chain(sizes: &[usize], activator: Activator) -> Self {
        let cells: Vec<CellSpec> = sizes
            .windows(2)
            .map(|w| CellSpec::new(w[0], w[1], activator))
            .collect();
        let connections = (1..cells.len()).map(|i| (i - 1, i)).collect();
        NetworkSpec {
            cells,
            connections,
            ..NetworkSpec::default()
        }
    }

    /// Builds the described network.
    pub fn build(&self) -> Result<Network> {
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut network = Network::new();
        network.set_parallel_processing(self.parallel);
        network.set_threads(self.threads);

        let mut ids = Vec::with_capacity(self.cells.len());
        for (i, spec) in self.cells.iter().enumerate() {
            let name = if spec.name.is_empty() {
                format!("cell-{}", i)
            } else {
                spec.name.clone()
            };
            let cell = Cell::builder(name, spec.inputs, spec.outputs)
                .activator(spec.activator)
                .recurrent(spec.recurrent)
                .bias(spec.bias)
                .build_with_rng(&mut rng);
            ids.push(network.add(cell)?);
        }

        for &(source, target) in &self.connections {
            let lookup = |index: usize| {
                ids.get(index).copied().ok_or_else(|| {
                    Error::Config(format!(
                        "connection {} -> {} refers to missing cell {}",
                        source, target, index
                    ))
                })
            };
            network.connect(lookup(source)?, lookup(target)?)?;
        }

        debug!(
            "built network with {} cells and {} connections",
            self.cells.len(),
            self.connections.len()
        );
        Ok(network)
    }
}

/// Options of a training run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSpec {
    pub epochs: usize,
    pub learning_rate: f64,
    /// Apply updates every `batch_size` patterns; stochastic when absent.
    pub batch_size: Option<usize>,
    /// Log every `log_every` epochs; only at completion when 0.
    pub log_every: usize,
}

impl Default for TrainingSpec {
    fn default() -> Self {
        TrainingSpec {
            epochs: 1000,
            learning_rate: 0.1,
            batch_size: None,
            log_every: 0,
        }
    }
}

impl TrainingSpec {
    pub fn learning_mode(&self) -> LearningMode {
        match self.batch_size {
            Some(size) => LearningMode::Batch(size),
            None => LearningMode::Stochastic,
        }
    }

    pub fn logging(&self) -> Logging {
        match self.log_every {
            0 => Logging::Completion,
            n => Logging::Epochs(n),
        }
    }

    /// Applies these options to `trainer`.
    pub fn configure(&self, trainer: Trainer) -> Trainer {
        trainer
            .learning_rate(self.learning_rate)
            .learning_mode(self.learning_mode())
            .logging(self.logging())
            .stop_condition(StopCondition::Epochs(self.epochs))
    }
}

/// A network together with the way to train it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentSpec {
    pub network: NetworkSpec,
    pub training: TrainingSpec,
}

impl ExperimentSpec {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_reader<R>(reader: R) -> Result<Self>
    where
        R: io::Read,
    {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Lifecycle;

    #[test]
    fn cell_defaults() {
        let spec: CellSpec = serde_json::from_str(r#"{ "inputs": 3, "outputs": 1 }"#).unwrap();
        assert_eq!(spec, CellSpec::new(3, 1, Activator::Sigmoid));

        let spec: CellSpec = serde_json::from_str(
            r#"{ "inputs": 3, "outputs": 1, "activator": { "LeakyReLU": 0.01 }, "recurrent": true, "bias": false }"#,
        )
        .unwrap();
        assert_eq!(spec.activator, Activator::LeakyReLU(0.01));
        assert!(spec.recurrent);
        assert!(!spec.bias);
    }

    #[test]
    fn builds_a_seeded_network() {
        let spec = NetworkSpec {
            seed: Some(11),
            ..NetworkSpec::chain(&[4, 3, 2], Activator::Sigmoid)
        };
        let a = spec.build().unwrap();
        let b = spec.build().unwrap();

        assert_eq!(a.graph().len(), 2);
        assert_eq!(a.input_len(), 4);
        assert_eq!(a.output_len(), 2);
        assert_eq!(a.graph().cells()[0].name(), "cell-0");
        assert_eq!(a.state(), Lifecycle::Built);
        for (x, y) in a.graph().cells().iter().zip(b.graph().cells()) {
            assert_eq!(x.weights(), y.weights());
        }
    }

    #[test]
    fn bad_connections_are_config_errors() {
        let mut spec = NetworkSpec::chain(&[2, 2], Activator::Sigmoid);
        spec.connections.push((0, 4));
        assert!(matches!(spec.build(), Err(Error::Config(_))));

        let mut spec = NetworkSpec::chain(&[2, 2, 2], Activator::Sigmoid);
        spec.connections.push((1, 0));
        assert!(matches!(spec.build(), Err(Error::Cycle { .. })));
    }

    #[test]
    fn experiment_json_round_trip() {
        let spec = ExperimentSpec {
            network: NetworkSpec::chain(&[2, 3, 1], Activator::TanH),
            training: TrainingSpec {
                batch_size: Some(8),
                log_every: 10,
                ..TrainingSpec::default()
            },
        };
        let json = spec.to_json().unwrap();
        assert_eq!(ExperimentSpec::from_json(&json).unwrap(), spec);
        assert_eq!(spec.training.learning_mode(), LearningMode::Batch(8));
        assert_eq!(spec.training.logging(), Logging::Epochs(10));
    }

    #[test]
    fn empty_json_uses_defaults() {
        let spec = ExperimentSpec::from_json("{}").unwrap();
        assert_eq!(spec, ExperimentSpec::default());
        assert_eq!(spec.training.learning_mode(), LearningMode::Stochastic);
        assert!(matches!(
            ExperimentSpec::from_json("{ not json"),
            Err(Error::Config(_))
        ));
    }
}
