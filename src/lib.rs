//! Neural networks built as directed graphs of cells.
//!
//! Cells are small affine units with an activation function. A [`Graph`]
//! wires them together, a [`Network`] evaluates the graph forwards and
//! backwards (optionally evaluating independent cells in parallel), and a
//! [`Trainer`] runs supervised training over [`PatternSource`]s on a
//! background thread that can be cancelled at any time.

#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;

pub mod activator;
pub mod cell;
pub mod config;
pub mod error;
pub mod graph;
pub mod loss;
pub mod network;
pub mod pattern;
pub mod trainer;

mod matrix;
mod utils;

pub use crate::activator::Activator;
pub use crate::cell::{Cell, CellBuilder, CellKind, FanIn};
pub use crate::error::{Error, Result};
pub use crate::graph::{CellId, Edge, Graph};
pub use crate::loss::{Loss, Metrics, Mse};
pub use crate::network::{Lifecycle, Network, NetworkHandle};
pub use crate::pattern::{MemorySource, Pattern, PatternSource};
pub use crate::trainer::{
    LearningMode, Logging, Observer, Outcome, Progress, Report, StopCondition, Trainer,
    TrainerHandle, TrainerState, TrainerTask,
};
