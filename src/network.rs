//! A graph of cells evaluated as a whole.
//!
//! # Example
//!
//! ```
//! # use cellgraph::{Activator, Cell, Network};
//! let mut network = Network::new();
//! let hidden = network.add(Cell::new("hidden", 2, 3, Activator::Sigmoid)).unwrap();
//! let output = network.add(Cell::new("output", 3, 1, Activator::Sigmoid)).unwrap();
//! network.connect(hidden, output).unwrap();
//!
//! let y = network.forward(&[0.0, 1.0]).unwrap();
//! assert_eq!(y.len(), 1);
//!
//! // Pull the output towards 1.
//! network.backward(&[y[0] - 1.0]).unwrap();
//! ```

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::cell::{Cell, FanIn};
use crate::error::{check_len, Error, Result};
use crate::graph::{CellId, Graph};
use crate::utils::select_mut;

/// Lifecycle of a [`Network`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    /// Cells and edges may still be added.
    Built,
    /// At least one evaluation happened; the topology is frozen.
    Running,
    /// No further evaluation is allowed.
    Terminated,
}

const BUILT: u8 = 0;
const RUNNING: u8 = 1;
const TERMINATED: u8 = 2;

#[derive(Debug, Default)]
struct SharedLifecycle(AtomicU8);

impl SharedLifecycle {
    fn get(&self) -> Lifecycle {
        match self.0.load(Ordering::Acquire) {
            BUILT => Lifecycle::Built,
            RUNNING => Lifecycle::Running,
            _ => Lifecycle::Terminated,
        }
    }

    /// Moves from `Built` to `Running`. Returns true if this call did it.
    fn start(&self) -> Result<bool> {
        match self
            .0
            .compare_exchange(BUILT, RUNNING, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(true),
            Err(RUNNING) => Ok(false),
            Err(_) => Err(terminated()),
        }
    }

    /// Returns true if this call did the transition.
    fn terminate(&self) -> bool {
        self.0.swap(TERMINATED, Ordering::AcqRel) != TERMINATED
    }
}

fn terminated() -> Error {
    Error::State("network has been terminated".to_owned())
}

/// A thread-safe handle to a network's lifecycle.
///
/// Terminating through a handle makes any in-flight evaluation stop at the
/// next layer boundary.
#[derive(Clone, Debug)]
pub struct NetworkHandle {
    lifecycle: Arc<SharedLifecycle>,
}

impl NetworkHandle {
    pub fn terminate(&self) {
        if self.lifecycle.terminate() {
            info!("network terminated through handle");
        }
    }

    pub fn state(&self) -> Lifecycle {
        self.lifecycle.get()
    }
}

/// Owns a graph of cells and evaluates it forwards and backwards.
#[derive(Debug)]
pub struct Network {
    graph: Graph,
    lifecycle: Arc<SharedLifecycle>,
    parallel: bool,
    threads: usize,
    pool: Option<ThreadPool>,
    learning_rate: f64,
}

impl Default for Network {
    fn default() -> Self {
        Network::new()
    }
}

impl Network {
    /// Creates an empty network with a learning rate of 0.1 that evaluates
    /// sequentially.
    pub fn new() -> Self {
        Network {
            graph: Graph::new(),
            lifecycle: Arc::default(),
            parallel: false,
            threads: 0,
            pool: None,
            learning_rate: 0.1,
        }
    }

    /// Adds a cell. Only allowed before the first evaluation.
    pub fn add(&mut self, cell: Cell) -> Result<CellId> {
        self.check_building("add cells to")?;
        if cell.input_len() == 0 || cell.output_len() == 0 {
            return Err(Error::Config(format!(
                "cell `{}` must have at least one input and one output",
                cell.name()
            )));
        }
        Ok(self.graph.add(cell))
    }

    /// Connects two cells. Only allowed before the first evaluation.
    pub fn connect(&mut self, source: CellId, target: CellId) -> Result<()> {
        self.check_building("connect cells in")?;
        self.graph.connect(source, target)
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn cell(&self, id: CellId) -> Result<&Cell> {
        self.graph.cell(id)
    }

    pub fn cell_mut(&mut self, id: CellId) -> Result<&mut Cell> {
        self.graph.cell_mut(id)
    }

    /// Size of the input vector, shared by every source cell.
    pub fn input_len(&self) -> usize {
        self.graph
            .sources()
            .first()
            .and_then(|&id| self.graph.cell(id).ok())
            .map_or(0, Cell::input_len)
    }

    /// Size of the output vector: the sink outputs, concatenated.
    pub fn output_len(&self) -> usize {
        self.graph
            .sinks()
            .into_iter()
            .filter_map(|id| self.graph.cell(id).ok())
            .map(Cell::output_len)
            .sum()
    }

    pub fn state(&self) -> Lifecycle {
        self.lifecycle.get()
    }

    pub fn handle(&self) -> NetworkHandle {
        NetworkHandle {
            lifecycle: Arc::clone(&self.lifecycle),
        }
    }

    /// Evaluates the cells of each layer concurrently when enabled.
    ///
    /// Results are identical either way.
    pub fn set_parallel_processing(&mut self, enabled: bool) {
        self.parallel = enabled;
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    /// Sets the worker pool size. Zero lets rayon pick one per CPU.
    pub fn set_threads(&mut self, threads: usize) {
        if threads != self.threads {
            self.threads = threads;
            self.pool = None;
        }
    }

    pub fn set_learning_rate(&mut self, rate: f64) {
        self.learning_rate = rate;
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Feeds `input` through the network, returning the concatenated
    /// outputs of its sink cells.
    ///
    /// Every source cell receives `input`; every other cell receives the
    /// outputs of its fan-in in edge order.
    pub fn forward(&mut self, input: &[f64]) -> Result<Vec<f64>> {
        self.start()?;
        check_len("network input", input.len(), self.input_len())?;

        let pool = if self.parallel { self.pool.as_ref() } else { None };
        let lifecycle = &self.lifecycle;
        let (topology, cells) = self.graph.parts_mut();
        let mut outputs: Vec<Vec<f64>> = vec![Vec::new(); cells.len()];

        for layer in &topology.layers {
            if lifecycle.get() == Lifecycle::Terminated {
                return Err(terminated());
            }

            let indices: Vec<usize> = layer.iter().map(|id| id.index()).collect();
            let jobs: Vec<(&mut Cell, Vec<&[f64]>)> = select_mut(cells, &indices)
                .into_iter()
                .zip(&indices)
                .map(|(cell, &i)| {
                    let inputs = if topology.incoming[i].is_empty() {
                        vec![input]
                    } else {
                        topology.incoming[i]
                            .iter()
                            .map(|&e| outputs[topology.edges[e].source.index()].as_slice())
                            .collect()
                    };
                    (cell, inputs)
                })
                .collect();

            let results = run_layer(pool, jobs, |(cell, inputs)| cell.forward(&inputs));
            for (&i, result) in indices.iter().zip(results) {
                outputs[i] = result?;
            }
        }

        let mut output = Vec::new();
        for (i, out) in outputs.iter().enumerate() {
            if topology.outgoing[i].is_empty() {
                output.extend_from_slice(out);
            }
        }
        Ok(output)
    }

    /// Backpropagates `error`, the gradient of the loss with respect to the
    /// network output, and applies the resulting update to every cell.
    ///
    /// If backpropagation fails, the gradients it accumulated so far are
    /// dropped and no weight changes.
    pub fn backward(&mut self, error: &[f64]) -> Result<()> {
        if let Err(err) = self.backpropagate(error) {
            self.clear_gradients();
            return Err(err);
        }
        self.apply_update()
    }

    /// Backpropagates `error` through the graph, accumulating gradients in
    /// the cells without updating any parameter.
    ///
    /// A cell with several successors receives the sum of their gradients,
    /// added in edge order.
    pub fn backpropagate(&mut self, error: &[f64]) -> Result<()> {
        self.check_live()?;
        check_len("network output error", error.len(), self.output_len())?;

        let pool = if self.parallel { self.pool.as_ref() } else { None };
        let lifecycle = &self.lifecycle;
        let (topology, cells) = self.graph.parts_mut();

        let mut external: Vec<Option<&[f64]>> = vec![None; cells.len()];
        let mut offset = 0;
        for (i, cell) in cells.iter().enumerate() {
            if topology.outgoing[i].is_empty() {
                let end = offset + cell.output_len();
                external[i] = Some(&error[offset..end]);
                offset = end;
            }
        }

        let mut edge_grads: Vec<Vec<f64>> = vec![Vec::new(); topology.edges.len()];
        for layer in topology.layers.iter().rev() {
            if lifecycle.get() == Lifecycle::Terminated {
                return Err(terminated());
            }

            let indices: Vec<usize> = layer.iter().map(|id| id.index()).collect();
            let grads: Vec<Vec<f64>> = indices
                .iter()
                .map(|&i| {
                    let mut grad = match external[i] {
                        Some(e) => e.to_vec(),
                        None => vec![0.0; cells[i].output_len()],
                    };
                    for &e in &topology.outgoing[i] {
                        for (g, &d) in grad.iter_mut().zip(&edge_grads[e]) {
                            *g += d;
                        }
                    }
                    grad
                })
                .collect();

            let jobs: Vec<(&mut Cell, Vec<f64>)> =
                select_mut(cells, &indices).into_iter().zip(grads).collect();
            let results = run_layer(pool, jobs, |(cell, grad)| cell.backward(&grad));

            for (&i, result) in indices.iter().zip(results) {
                let input_grad = result?;
                let incoming = &topology.incoming[i];
                if incoming.is_empty() {
                    continue;
                }
                let sizes: Vec<usize> = incoming
                    .iter()
                    .map(|&e| cells[topology.edges[e].source.index()].output_len())
                    .collect();
                let rule = FanIn::resolve(&sizes, cells[i].input_len())?;
                for (&e, part) in incoming.iter().zip(rule.split(&input_grad, &sizes)) {
                    edge_grads[e] = part;
                }
            }
        }
        Ok(())
    }

    /// Applies the accumulated gradients of every cell, scaled by the
    /// learning rate.
    ///
    /// Once started this always runs to completion, so a concurrent
    /// termination never leaves some cells updated and others not.
    pub fn apply_update(&mut self) -> Result<()> {
        self.check_live()?;
        let rate = self.learning_rate;
        let pool = if self.parallel { self.pool.as_ref() } else { None };
        let (_, cells) = self.graph.parts_mut();
        match pool {
            Some(pool) => pool.install(|| {
                cells
                    .par_iter_mut()
                    .for_each(|cell| cell.apply_update(rate))
            }),
            None => {
                for cell in cells {
                    cell.apply_update(rate);
                }
            }
        }
        Ok(())
    }

    /// Drops accumulated gradients without applying them.
    pub fn clear_gradients(&mut self) {
        for cell in self.graph.parts_mut().1 {
            cell.clear_gradients();
        }
    }

    /// Starts a new sequence for every recurrent cell.
    pub fn reset_state(&mut self) {
        for cell in self.graph.parts_mut().1 {
            cell.reset_state();
        }
    }

    /// Stops the network for good and releases the worker pool.
    ///
    /// Calling this more than once has no further effect.
    pub fn terminate(&mut self) {
        if self.lifecycle.terminate() {
            info!("network terminated");
        }
        self.pool = None;
    }

    fn start(&mut self) -> Result<()> {
        if self.graph.is_empty() {
            return Err(Error::State("network has no cells".to_owned()));
        }
        self.check_live()?;
        if self.lifecycle.start()? {
            info!(
                "network running: {} cells, {} edges, {} layers",
                self.graph.len(),
                self.graph.edges().len(),
                self.graph.layers().len()
            );
        }
        if self.parallel && self.pool.is_none() {
            let pool = ThreadPoolBuilder::new()
                .num_threads(self.threads)
                .thread_name(|i| format!("cellgraph-worker-{}", i))
                .build()?;
            debug!("worker pool ready with {} threads", pool.current_num_threads());
            self.pool = Some(pool);
        }
        Ok(())
    }

    fn check_live(&mut self) -> Result<()> {
        if self.lifecycle.get() == Lifecycle::Terminated {
            self.pool = None;
            return Err(terminated());
        }
        Ok(())
    }

    fn check_building(&self, action: &str) -> Result<()> {
        match self.lifecycle.get() {
            Lifecycle::Built => Ok(()),
            state => Err(Error::State(format!(
                "cannot {} a network in state {:?}",
                action, state
            ))),
        }
    }
}

/// Runs one job per cell of a layer, on the pool if there is one.
///
/// Collecting the results is the barrier between layers.
fn run_layer<J, F>(pool: Option<&ThreadPool>, jobs: Vec<J>, f: F) -> Vec<Result<Vec<f64>>>
where
    J: Send,
    F: Fn(J) -> Result<Vec<f64>> + Send + Sync,
{
    match pool {
        Some(pool) if jobs.len() > 1 => pool.install(|| jobs.into_par_iter().map(f).collect()),
        _ => jobs.into_iter().map(f).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activator::Activator;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::thread;

    fn cell(rng: &mut StdRng, name: &str, inputs: usize, outputs: usize) -> Cell {
        Cell::builder(name, inputs, outputs)
            .activator(Activator::Sigmoid)
            .build_with_rng(rng)
    }

    /// a -> {b, c} -> d, summed at `d`, plus a concatenating `e` fed by
    /// `a` and `d`.
    fn mixed_network(seed: u64) -> Network {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut network = Network::new();
        let a = network.add(cell(&mut rng, "a", 3, 4)).unwrap();
        let b = network.add(cell(&mut rng, "b", 4, 2)).unwrap();
        let c = network.add(cell(&mut rng, "c", 4, 2)).unwrap();
        let d = network.add(cell(&mut rng, "d", 2, 3)).unwrap();
        let e = network.add(cell(&mut rng, "e", 7, 2)).unwrap();
        network.connect(a, b).unwrap();
        network.connect(a, c).unwrap();
        network.connect(b, d).unwrap();
        network.connect(c, d).unwrap();
        network.connect(a, e).unwrap();
        network.connect(d, e).unwrap();
        network
    }

    fn all_weights(network: &Network) -> Vec<Vec<f64>> {
        network
            .graph()
            .cells()
            .iter()
            .map(|c| c.weights().iter().chain(c.bias().iter()).copied().collect())
            .collect()
    }

    #[test]
    fn forward_is_deterministic() {
        let mut network = mixed_network(1);
        let input = [0.3, -0.7, 1.2];
        let first = network.forward(&input).unwrap();
        let second = network.forward(&input).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
    }

    #[test]
    fn parallel_evaluation_matches_sequential() {
        let mut sequential = mixed_network(42);
        let mut parallel = mixed_network(42);
        parallel.set_parallel_processing(true);
        parallel.set_threads(3);

        let inputs = [[0.1, 0.2, 0.3], [1.0, -1.0, 0.5], [-0.4, 0.0, 2.0]];
        for input in &inputs {
            let a = sequential.forward(input).unwrap();
            let b = parallel.forward(input).unwrap();
            assert_eq!(a, b);

            let error: Vec<f64> = a.iter().map(|y| y - 0.5).collect();
            sequential.backward(&error).unwrap();
            parallel.backward(&error).unwrap();
            assert_eq!(all_weights(&sequential), all_weights(&parallel));
        }
    }

    #[test]
    fn shape_errors() {
        let mut network = mixed_network(3);
        assert!(matches!(
            network.forward(&[1.0, 2.0]),
            Err(Error::Shape { .. })
        ));
        network.forward(&[1.0, 2.0, 3.0]).unwrap();
        assert!(matches!(
            network.backward(&[1.0]),
            Err(Error::Shape { .. })
        ));
    }

    #[test]
    fn backward_before_forward_is_a_sequencing_error() {
        let mut network = mixed_network(3);
        assert!(matches!(
            network.backward(&[0.0, 0.0]),
            Err(Error::Sequencing(_))
        ));
    }

    #[test]
    fn topology_is_frozen_once_running() {
        let mut network = mixed_network(5);
        assert_eq!(network.state(), Lifecycle::Built);
        network.forward(&[0.0, 0.0, 0.0]).unwrap();
        assert_eq!(network.state(), Lifecycle::Running);

        let extra = Cell::new("late", 2, 2, Activator::Sigmoid);
        assert!(matches!(network.add(extra), Err(Error::State(_))));
    }

    #[test]
    fn terminated_network_rejects_evaluation() {
        let mut network = mixed_network(7);
        network.set_parallel_processing(true);
        let y = network.forward(&[0.5, 0.5, 0.5]).unwrap();

        network.terminate();
        network.terminate();
        assert_eq!(network.state(), Lifecycle::Terminated);
        assert!(matches!(
            network.forward(&[0.5, 0.5, 0.5]),
            Err(Error::State(_))
        ));
        assert!(matches!(network.backward(&y), Err(Error::State(_))));
    }

    #[test]
    fn handle_terminates_from_another_thread() {
        let mut network = mixed_network(8);
        let handle = network.handle();
        thread::spawn(move || handle.terminate()).join().unwrap();
        assert!(matches!(
            network.forward(&[0.0, 0.0, 0.0]),
            Err(Error::State(_))
        ));
    }

    #[test]
    fn gradients_match_finite_differences() {
        let mut network = mixed_network(11);
        let input = [0.2, -0.1, 0.4];
        let target = [0.1, 0.9];
        let loss = |network: &mut Network| -> f64 {
            let y = network.forward(&input).unwrap();
            y.iter().zip(&target).map(|(y, t)| 0.5 * (y - t) * (y - t)).sum()
        };

        let y = network.forward(&input).unwrap();
        let error: Vec<f64> = y.iter().zip(&target).map(|(y, t)| y - t).collect();
        network.backpropagate(&error).unwrap();

        let a = network.graph().sources()[0];
        let analytic = network.cell(a).unwrap().weight_gradient()[[1, 2]];

        let h = 1e-6;
        let original = network.cell(a).unwrap().weights().to_owned();
        let bias = network.cell(a).unwrap().bias().to_owned();
        let mut nudged = original.clone();
        nudged[[1, 2]] += h;
        network
            .cell_mut(a)
            .unwrap()
            .set_parameters(nudged.clone(), bias.clone())
            .unwrap();
        let up = loss(&mut network);
        nudged[[1, 2]] -= 2.0 * h;
        network
            .cell_mut(a)
            .unwrap()
            .set_parameters(nudged, bias)
            .unwrap();
        let down = loss(&mut network);

        let numeric = (up - down) / (2.0 * h);
        assert!(
            (numeric - analytic).abs() < 1e-6,
            "numeric {} vs analytic {}",
            numeric,
            analytic
        );
    }

    #[test]
    fn failed_backward_drops_partial_gradients() {
        let mut network = mixed_network(12);
        let before = all_weights(&network);
        let y = network.forward(&[0.1, 0.2, 0.3]).unwrap();

        // `a` loses its cache, so backpropagation fails after the later
        // layers have accumulated gradients.
        let a = network.graph().sources()[0];
        network.cell_mut(a).unwrap().reset_state();
        assert!(matches!(network.backward(&y), Err(Error::Sequencing(_))));

        assert_eq!(all_weights(&network), before);
        for cell in network.graph().cells() {
            assert!(cell.weight_gradient().iter().all(|&g| g == 0.0));
            assert!(cell.bias_gradient().iter().all(|&g| g == 0.0));
        }
    }

    /// a -> {r1, r2} -> o, with `r1` and `r2` recurrent and summed at `o`.
    fn recurrent_network(seed: u64) -> Network {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut network = Network::new();
        let a = network.add(cell(&mut rng, "a", 2, 3)).unwrap();
        let r1 = network
            .add(Cell::builder("r1", 3, 2).recurrent(true).build_with_rng(&mut rng))
            .unwrap();
        let r2 = network
            .add(Cell::builder("r2", 3, 2).recurrent(true).build_with_rng(&mut rng))
            .unwrap();
        let o = network.add(cell(&mut rng, "o", 2, 1)).unwrap();
        network.connect(a, r1).unwrap();
        network.connect(a, r2).unwrap();
        network.connect(r1, o).unwrap();
        network.connect(r2, o).unwrap();
        network.connect(r1, r1).unwrap();
        network
    }

    #[test]
    fn recurrent_state_carries_across_forwards_until_reset() {
        let mut network = recurrent_network(21);
        assert_eq!(network.graph().recurrent_edges().len(), 1);
        let input = [0.4, -0.6];

        let first = network.forward(&input).unwrap();
        let second = network.forward(&input).unwrap();
        assert_ne!(first, second);

        network.reset_state();
        assert_eq!(network.forward(&input).unwrap(), first);
    }

    #[test]
    fn recurrent_parallel_evaluation_matches_sequential() {
        let mut sequential = recurrent_network(22);
        let mut parallel = recurrent_network(22);
        parallel.set_parallel_processing(true);
        parallel.set_threads(2);

        let sequence = [[0.1, 0.9], [-0.5, 0.3], [1.0, 1.0]];
        for _ in 0..2 {
            sequential.reset_state();
            parallel.reset_state();
            for input in &sequence {
                let a = sequential.forward(input).unwrap();
                let b = parallel.forward(input).unwrap();
                assert_eq!(a, b);

                let error = [a[0] - 1.0];
                sequential.backward(&error).unwrap();
                parallel.backward(&error).unwrap();
                assert_eq!(all_weights(&sequential), all_weights(&parallel));
            }
        }
    }

    #[test]
    fn empty_network_cannot_run() {
        let mut network = Network::new();
        assert!(matches!(network.forward(&[]), Err(Error::State(_))));
    }
}
