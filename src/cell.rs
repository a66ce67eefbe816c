//! Cells, the weighted units a computation graph is made of.
//!
//! A cell computes `y = f(W·x + b)` where `x` is the aggregation of
//! everything flowing into it. Recurrent cells additionally append their own
//! previous output to `x`, so their weight matrix has `inputs + outputs`
//! columns.

use itertools::multizip;
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, ArrayViewMut1};
use rand::Rng;

use crate::activator::Activator;
use crate::error::{check_len, Error, Result};
use crate::matrix;
use crate::utils::ZeroOut;

/// Selects how a cell treats its own previous output.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellKind {
    /// Output depends only on the current inputs.
    FeedForward,
    /// The previous output within a sequence is fed back as extra input.
    Recurrent,
}

/// How several incoming vectors are combined into one cell input.
///
/// Every incoming vector as long as the declared input is summed
/// elementwise; any other combination must concatenate to exactly the
/// declared input size.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FanIn {
    Sum,
    Concat,
}

impl FanIn {
    /// Picks the rule for incoming vectors of `sizes` feeding an input of
    /// `input_len`.
    pub fn resolve(sizes: &[usize], input_len: usize) -> Result<FanIn> {
        if sizes.is_empty() {
            return Err(Error::Shape {
                what: "cell fan-in",
                got: 0,
                expected: 1,
            });
        }
        if sizes.iter().all(|&size| size == input_len) {
            return Ok(FanIn::Sum);
        }
        check_len("concatenated cell input", sizes.iter().sum(), input_len)?;
        Ok(FanIn::Concat)
    }

    fn aggregate<V>(self, inputs: &[V], mut dst: ArrayViewMut1<f64>)
    where
        V: AsRef<[f64]>,
    {
        match self {
            FanIn::Sum => {
                for input in inputs {
                    for (d, &x) in dst.iter_mut().zip(input.as_ref()) {
                        *d += x;
                    }
                }
            }
            FanIn::Concat => {
                let mut offset = 0;
                for input in inputs {
                    let input = input.as_ref();
                    let end = offset + input.len();
                    dst.slice_mut(s![offset..end])
                        .assign(&ArrayView1::from(input));
                    offset = end;
                }
            }
        }
    }

    /// Routes an input gradient back to the vectors it was aggregated from.
    pub fn split(self, gradient: &[f64], sizes: &[usize]) -> Vec<Vec<f64>> {
        match self {
            FanIn::Sum => sizes.iter().map(|_| gradient.to_vec()).collect(),
            FanIn::Concat => {
                let mut offset = 0;
                sizes
                    .iter()
                    .map(|&size| {
                        let part = gradient[offset..offset + size].to_vec();
                        offset += size;
                        part
                    })
                    .collect()
            }
        }
    }
}

#[derive(Clone, Debug)]
struct ForwardCache {
    input: Array1<f64>,
    pre_activation: Array1<f64>,
    output: Array1<f64>,
}

/// A single affine transform followed by an activation function.
#[derive(Clone, Debug)]
pub struct Cell {
    name: String,
    kind: CellKind,
    activator: Activator,
    bias_enabled: bool,
    inputs: usize,

    /// `outputs x (inputs + state)`, never resized.
    weights: Array2<f64>,
    bias: Array1<f64>,
    /// Previous output for recurrent cells, empty otherwise.
    state: Array1<f64>,

    cache: Option<ForwardCache>,
    grad_weights: Array2<f64>,
    grad_bias: Array1<f64>,
}

impl Cell {
    /// Creates a feed-forward cell with a bias and randomly initialised
    /// weights.
    pub fn new<S>(name: S, inputs: usize, outputs: usize, activator: Activator) -> Self
    where
        S: Into<String>,
    {
        Cell::builder(name, inputs, outputs)
            .activator(activator)
            .build()
    }

    /// Creates an unnamed cell from the flags used when wiring recurrent
    /// networks by hand.
    pub fn rnn(
        inputs: usize,
        outputs: usize,
        activator: Activator,
        recurrent: bool,
        bias: bool,
    ) -> Self {
        Cell::builder(format!("rnn-{}x{}", inputs, outputs), inputs, outputs)
            .activator(activator)
            .recurrent(recurrent)
            .bias(bias)
            .build()
    }

    /// Starts building a cell with `inputs` external inputs and `outputs`
    /// outputs.
    pub fn builder<S>(name: S, inputs: usize, outputs: usize) -> CellBuilder
    where
        S: Into<String>,
    {
        CellBuilder {
            name: name.into(),
            inputs,
            outputs,
            activator: Activator::Sigmoid,
            kind: CellKind::FeedForward,
            bias: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> CellKind {
        self.kind
    }

    pub fn activator(&self) -> Activator {
        self.activator
    }

    pub fn is_recurrent(&self) -> bool {
        self.kind == CellKind::Recurrent
    }

    /// Returns the number of external inputs, excluding recurrent state.
    pub fn input_len(&self) -> usize {
        self.inputs
    }

    pub fn output_len(&self) -> usize {
        self.weights.nrows()
    }

    pub fn weights(&self) -> ArrayView2<f64> {
        self.weights.view()
    }

    pub fn bias(&self) -> ArrayView1<f64> {
        self.bias.view()
    }

    /// Gradient accumulated for the weights since the last update.
    pub fn weight_gradient(&self) -> ArrayView2<f64> {
        self.grad_weights.view()
    }

    pub fn bias_gradient(&self) -> ArrayView1<f64> {
        self.grad_bias.view()
    }

    /// Pre-activation of the last forward pass that has not been
    /// backpropagated yet.
    pub fn last_pre_activation(&self) -> Option<ArrayView1<f64>> {
        self.cache.as_ref().map(|c| c.pre_activation.view())
    }

    /// Overwrites the parameters, keeping their shapes.
    pub fn set_parameters(&mut self, weights: Array2<f64>, bias: Array1<f64>) -> Result<()> {
        check_len("cell weight rows", weights.nrows(), self.weights.nrows())?;
        check_len("cell weight columns", weights.ncols(), self.weights.ncols())?;
        check_len("cell bias", bias.len(), self.bias.len())?;
        self.weights = weights;
        self.bias = bias;
        Ok(())
    }

    /// Feeds `inputs` forward through the cell.
    ///
    /// The inputs are combined following [`FanIn`], recurrent state is
    /// appended, and the activated output is returned.
    pub fn forward<V>(&mut self, inputs: &[V]) -> Result<Vec<f64>>
    where
        V: AsRef<[f64]>,
    {
        let sizes: Vec<usize> = inputs.iter().map(|v| v.as_ref().len()).collect();
        let rule = FanIn::resolve(&sizes, self.inputs)?;

        let mut x = Array1::zeros(self.weights.ncols());
        rule.aggregate(inputs, x.slice_mut(s![..self.inputs]));
        if self.is_recurrent() {
            x.slice_mut(s![self.inputs..]).assign(&self.state);
        }

        let z = self.weights.dot(&x) + &self.bias;
        let activator = self.activator;
        let y = z.mapv(|v| activator.f(v));
        if self.is_recurrent() {
            self.state.assign(&y);
        }

        let output = y.to_vec();
        self.cache = Some(ForwardCache {
            input: x,
            pre_activation: z,
            output: y,
        });
        Ok(output)
    }

    /// Feeds the provided `gradient` of the output backwards through the
    /// cell, accumulating parameter gradients.
    ///
    /// Returns the gradient with respect to the external inputs. The part
    /// belonging to the recurrent state is dropped.
    pub fn backward(&mut self, gradient: &[f64]) -> Result<Vec<f64>> {
        check_len("cell output gradient", gradient.len(), self.output_len())?;
        let cache = match self.cache.take() {
            Some(cache) => cache,
            None => {
                return Err(Error::Sequencing(format!(
                    "backward on cell `{}` without a matching forward",
                    self.name
                )))
            }
        };

        let activator = self.activator;
        let mut delta = Array1::zeros(self.output_len());
        for (d, &g, &y) in multizip((delta.iter_mut(), gradient.iter(), cache.output.iter())) {
            *d = g * activator.fprime(y);
        }

        matrix::add_outer(&mut self.grad_weights, delta.view(), cache.input.view());
        if self.bias_enabled {
            self.grad_bias += &delta;
        }

        let input_gradient = self.weights.t().dot(&delta);
        Ok(input_gradient.slice(s![..self.inputs]).to_vec())
    }

    /// Applies and resets the accumulated gradients, scaling by the
    /// gradient descent `rate`.
    pub fn apply_update(&mut self, rate: f64) {
        self.weights.scaled_add(-rate, &self.grad_weights);
        if self.bias_enabled {
            self.bias.scaled_add(-rate, &self.grad_bias);
        }
        self.clear_gradients();
    }

    /// Drops the accumulated gradients without touching the parameters.
    pub fn clear_gradients(&mut self) {
        self.grad_weights.zero_out();
        self.grad_bias.zero_out();
    }

    /// Starts a new sequence: zeroes the recurrent state and forgets the
    /// last forward pass.
    pub fn reset_state(&mut self) {
        self.state.zero_out();
        self.cache = None;
    }
}

/// Configures and creates a [`Cell`].
#[derive(Clone, Debug)]
pub struct CellBuilder {
    name: String,
    inputs: usize,
    outputs: usize,
    activator: Activator,
    kind: CellKind,
    bias: bool,
}

impl CellBuilder {
    /// Sets the activation function. Defaults to sigmoid.
    pub fn activator(mut self, activator: Activator) -> Self {
        self.activator = activator;
        self
    }

    /// Marks the cell as recurrent.
    pub fn recurrent(mut self, recurrent: bool) -> Self {
        self.kind = if recurrent {
            CellKind::Recurrent
        } else {
            CellKind::FeedForward
        };
        self
    }

    /// Enables or disables the trainable bias. Enabled by default.
    pub fn bias(mut self, bias: bool) -> Self {
        self.bias = bias;
        self
    }

    /// Builds the cell with weights drawn from the thread-local RNG.
    pub fn build(self) -> Cell {
        self.build_with_rng(&mut rand::thread_rng())
    }

    /// Builds the cell with weights drawn from `rng`.
    pub fn build_with_rng<R>(self, rng: &mut R) -> Cell
    where
        R: Rng + ?Sized,
    {
        let state_len = match self.kind {
            CellKind::Recurrent => self.outputs,
            CellKind::FeedForward => 0,
        };
        let cols = self.inputs + state_len;
        Cell {
            name: self.name,
            kind: self.kind,
            activator: self.activator,
            bias_enabled: self.bias,
            inputs: self.inputs,
            weights: matrix::random(rng, self.outputs, cols),
            bias: Array1::zeros(self.outputs),
            state: Array1::zeros(state_len),
            cache: None,
            grad_weights: Array2::zeros((self.outputs, cols)),
            grad_bias: Array1::zeros(self.outputs),
        }
    }
}
