//! Supervised training of a network over pattern sources.
//!
//! A [`Trainer`] streams its training source through the network once per
//! epoch, updating the weights as it goes, then evaluates the test source
//! forward-only and reports a [`Progress`] to its observers. Runs are
//! cancelled cooperatively through a [`TrainerHandle`]: the request is
//! honoured before the next pattern, never in the middle of a weight update.

use std::io;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::loss::{Loss, Metrics, MetricsAccumulator, Mse};
use crate::network::Network;
use crate::pattern::PatternSource;

/// The learning mode to use for training
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LearningMode {
    /// Apply weight updates after every training pattern
    Stochastic,
    /// Apply weight updates after every `n` patterns and at the end of each
    /// epoch
    Batch(usize),
}

/// Logging frequency to use during training
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Logging {
    /// Nothing is logged
    Silent,
    /// A summary is logged when the run ends
    Completion,
    /// A summary is logged after every `n` epochs and when the run ends
    Epochs(usize),
}

impl Logging {
    fn epoch(&self, progress: &Progress) {
        if let Logging::Epochs(freq) = *self {
            if freq > 0 && progress.epoch % freq == 0 {
                match progress.test {
                    Some(test) => info!(
                        "epoch {}: train {}, test {}",
                        progress.epoch, progress.train, test
                    ),
                    None => info!("epoch {}: train {}", progress.epoch, progress.train),
                }
            }
        }
    }

    fn completion(&self, outcome: &Outcome, history: &[Progress], start_time: Instant) {
        if let Logging::Silent = *self {
            return;
        }
        match outcome {
            Outcome::Completed => info!(
                "ran {} epochs in {:.2?}",
                history.len(),
                start_time.elapsed()
            ),
            Outcome::Cancelled => info!("cancelled after {} epochs", history.len()),
            Outcome::Failed(err) => error!("training failed after {} epochs: {}", history.len(), err),
        }
        if let Some(last) = history.last() {
            info!("final train {}", last.train);
            if let Some(test) = last.test {
                info!("final test {}", test);
            }
        }
    }
}

/// When to stop training
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum StopCondition {
    /// Stops after the provided number of epochs
    Epochs(usize),
    /// Stops when the mean training loss drops below the provided threshold
    ErrorThreshold(f64),
    /// Stops once the provided duration has elapsed, at an epoch boundary
    Duration(Duration),
}

impl From<Duration> for StopCondition {
    fn from(duration: Duration) -> StopCondition {
        StopCondition::Duration(duration)
    }
}

impl StopCondition {
    fn should_stop(&self, epoch: usize, last_loss: Option<f64>, start_time: Instant) -> bool {
        match *self {
            StopCondition::Epochs(epochs) => epoch >= epochs,
            StopCondition::ErrorThreshold(threshold) => {
                last_loss.map_or(false, |loss| loss < threshold)
            }
            StopCondition::Duration(duration) => start_time.elapsed() >= duration,
        }
    }
}

/// The state of a training run.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TrainerState {
    Idle,
    Running,
    /// Cancellation was requested and will be honoured at the next pattern
    /// or epoch boundary.
    CancelRequested,
    Completed,
    Cancelled,
    Failed,
}

impl TrainerState {
    pub fn is_terminal(self) -> bool {
        match self {
            TrainerState::Completed | TrainerState::Cancelled | TrainerState::Failed => true,
            _ => false,
        }
    }
}

#[derive(Debug)]
struct Status {
    state: TrainerState,
    started: bool,
    error: Option<Error>,
}

#[derive(Debug)]
struct Shared(Mutex<Status>);

impl Shared {
    fn new() -> Self {
        Shared(Mutex::new(Status {
            state: TrainerState::Idle,
            started: false,
            error: None,
        }))
    }

    fn begin(&self) {
        let mut status = self.0.lock();
        status.started = true;
        if status.state == TrainerState::Idle {
            status.state = TrainerState::Running;
        }
    }

    fn cancel_requested(&self) -> bool {
        self.0.lock().state == TrainerState::CancelRequested
    }

    fn finish(&self, outcome: &Outcome) {
        let mut status = self.0.lock();
        match outcome {
            Outcome::Completed => status.state = TrainerState::Completed,
            Outcome::Cancelled => status.state = TrainerState::Cancelled,
            Outcome::Failed(err) => {
                status.state = TrainerState::Failed;
                status.error = Some(err.clone());
            }
        }
    }
}

/// A thread-safe handle to observe and cancel a training run.
#[derive(Clone, Debug)]
pub struct TrainerHandle {
    shared: Arc<Shared>,
}

impl TrainerHandle {
    /// Requests cancellation. Has no effect once the run has ended.
    pub fn cancel(&self) {
        let mut status = self.shared.0.lock();
        match status.state {
            TrainerState::Idle | TrainerState::Running => {
                debug!("cancellation requested");
                status.state = TrainerState::CancelRequested;
            }
            _ => {}
        }
    }

    pub fn state(&self) -> TrainerState {
        self.shared.0.lock().state
    }

    /// True between the start of the run and its end. A cancel requested
    /// before the run starts does not count.
    pub fn is_running(&self) -> bool {
        let status = self.shared.0.lock();
        status.started
            && match status.state {
                TrainerState::Running | TrainerState::CancelRequested => true,
                _ => false,
            }
    }

    pub fn has_terminated(&self) -> bool {
        self.state().is_terminal()
    }

    /// The error that made the run fail, if it did.
    pub fn error(&self) -> Option<Error> {
        self.shared.0.lock().error.clone()
    }
}

/// Metrics published after every completed epoch.
#[derive(Clone, Debug, PartialEq)]
pub struct Progress {
    /// One-based index of the epoch.
    pub epoch: usize,
    pub train: Metrics,
    /// `None` when the test source is empty.
    pub test: Option<Metrics>,
    /// Time since the run started.
    pub elapsed: Duration,
}

/// Receives a [`Progress`] after every epoch, on the training thread.
///
/// Implementations must return promptly; the trainer waits for them.
pub trait Observer: Send {
    fn epoch(&mut self, progress: &Progress);
}

impl<F> Observer for F
where
    F: FnMut(&Progress) + Send,
{
    fn epoch(&mut self, progress: &Progress) {
        self(progress)
    }
}

impl Observer for mpsc::Sender<Progress> {
    fn epoch(&mut self, progress: &Progress) {
        // A receiver that went away only stops caring about progress.
        let _ = self.send(progress.clone());
    }
}

/// How a run ended.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Completed,
    Cancelled,
    Failed(Error),
}

/// The result of a run: the network, in whatever state training left it,
/// and what happened to it.
#[derive(Debug)]
pub struct Report {
    pub network: Network,
    pub outcome: Outcome,
    /// Number of fully completed epochs.
    pub epochs: usize,
    pub history: Vec<Progress>,
}

/// A run executing on its own thread.
#[derive(Debug)]
pub struct TrainerTask {
    handle: TrainerHandle,
    thread: JoinHandle<Report>,
}

impl TrainerTask {
    pub fn handle(&self) -> &TrainerHandle {
        &self.handle
    }

    /// Waits for the run to end. Fails only if the training thread
    /// panicked.
    pub fn join(self) -> thread::Result<Report> {
        self.thread.join()
    }
}

enum Interrupt {
    Cancelled,
    Failed(Error),
}

impl From<Error> for Interrupt {
    fn from(err: Error) -> Self {
        Interrupt::Failed(err)
    }
}

/// A builder for training runs.
pub struct Trainer {
    network: Network,
    train: Box<dyn PatternSource>,
    test: Box<dyn PatternSource>,
    learning_mode: LearningMode,
    learning_rate: f64,
    logging: Logging,
    stop_condition: StopCondition,
    loss: Box<dyn Loss>,
    observers: Vec<Box<dyn Observer>>,
    shared: Arc<Shared>,
}

impl Trainer {
    /// Creates a new Trainer bound to `network` and its two sources.
    ///
    /// The trainer is initialized with some default values. These defaults are:
    ///
    /// * A stochastic learning mode.
    /// * The learning rate the network already has.
    /// * Stops after 1000 epochs.
    /// * Logs on training completion.
    /// * Mean squared error loss.
    pub fn new<A, B>(network: Network, train: A, test: B) -> Self
    where
        A: PatternSource + 'static,
        B: PatternSource + 'static,
    {
        let learning_rate = network.learning_rate();
        Trainer {
            network,
            train: Box::new(train),
            test: Box::new(test),
            learning_mode: LearningMode::Stochastic,
            learning_rate,
            logging: Logging::Completion,
            stop_condition: StopCondition::Epochs(1000),
            loss: Box::new(Mse),
            observers: Vec::new(),
            shared: Arc::new(Shared::new()),
        }
    }

    /// Sets the `LearningMode` to use for training.
    pub fn learning_mode(mut self, mode: LearningMode) -> Self {
        self.learning_mode = mode;
        self
    }

    /// Sets the learning rate to use during gradient descent.
    pub fn learning_rate(mut self, rate: f64) -> Self {
        self.learning_rate = rate;
        self
    }

    /// Sets the type of logging to be emitted during training.
    pub fn logging(mut self, logging: Logging) -> Self {
        self.logging = logging;
        self
    }

    /// Sets the condition to finish training.
    pub fn stop_condition<C>(mut self, condition: C) -> Self
    where
        C: Into<StopCondition>,
    {
        self.stop_condition = condition.into();
        self
    }

    /// Replaces the default mean squared error loss.
    pub fn loss<L>(mut self, loss: L) -> Self
    where
        L: Loss + 'static,
    {
        self.loss = Box::new(loss);
        self
    }

    /// Adds an observer notified after every epoch.
    pub fn observer<O>(mut self, observer: O) -> Self
    where
        O: Observer + 'static,
    {
        self.observers.push(Box::new(observer));
        self
    }

    /// Returns a handle that stays valid for the whole run.
    pub fn handle(&self) -> TrainerHandle {
        TrainerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Runs training on the current thread until the stop condition holds,
    /// the run is cancelled, or an error occurs.
    pub fn run(mut self) -> Report {
        self.shared.begin();
        let start_time = Instant::now();
        let mut history = Vec::new();

        let outcome = match self.execute(start_time, &mut history) {
            Ok(()) => Outcome::Completed,
            Err(Interrupt::Cancelled) => Outcome::Cancelled,
            Err(Interrupt::Failed(err)) => {
                self.network.clear_gradients();
                Outcome::Failed(err)
            }
        };
        self.shared.finish(&outcome);
        self.logging.completion(&outcome, &history, start_time);

        Report {
            network: self.network,
            outcome,
            epochs: history.len(),
            history,
        }
    }

    /// Runs training on a dedicated thread.
    pub fn spawn(self) -> io::Result<TrainerTask> {
        let handle = self.handle();
        let thread = thread::Builder::new()
            .name("cellgraph-trainer".to_owned())
            .spawn(move || self.run())?;
        Ok(TrainerTask { handle, thread })
    }

    fn validate(&self) -> Result<()> {
        if let LearningMode::Batch(0) = self.learning_mode {
            return Err(Error::Config("batch size must be at least 1".to_owned()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(Error::Config(format!(
                "learning rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.train.is_empty() {
            return Err(Error::Config("training source is empty".to_owned()));
        }
        Ok(())
    }

    fn execute(
        &mut self,
        start_time: Instant,
        history: &mut Vec<Progress>,
    ) -> std::result::Result<(), Interrupt> {
        self.validate()?;
        self.network.set_learning_rate(self.learning_rate);
        debug!(
            "training on {} patterns, testing on {}, {:?}",
            self.train.len(),
            self.test.len(),
            self.learning_mode
        );

        loop {
            let last_loss = history.last().map(|p: &Progress| p.train.loss);
            if self
                .stop_condition
                .should_stop(history.len(), last_loss, start_time)
            {
                return Ok(());
            }
            if self.shared.cancel_requested() {
                return Err(Interrupt::Cancelled);
            }

            let train = self.train_epoch()?;
            let test = self.evaluate()?;
            let progress = Progress {
                epoch: history.len() + 1,
                train,
                test,
                elapsed: start_time.elapsed(),
            };
            self.logging.epoch(&progress);
            for observer in &mut self.observers {
                observer.epoch(&progress);
            }
            history.push(progress);
        }
    }

    /// One pass over the training source, updating the weights.
    fn train_epoch(&mut self) -> std::result::Result<Metrics, Interrupt> {
        let batch_size = match self.learning_mode {
            LearningMode::Stochastic => 1,
            LearningMode::Batch(size) => size,
        };
        let mut metrics = MetricsAccumulator::default();
        let mut pending = 0;

        self.train.reset();
        while let Some(pattern) = self.train.next() {
            if self.shared.cancel_requested() {
                self.network.clear_gradients();
                return Err(Interrupt::Cancelled);
            }

            self.network.reset_state();
            let output = self.network.forward(pattern.input())?;
            let loss = self.loss.loss(&output, pattern.target())?;
            let gradient = self.loss.gradient(&output, pattern.target())?;
            self.network.backpropagate(&gradient)?;
            metrics.record(loss, &output, pattern.target());

            pending += 1;
            if pending == batch_size {
                self.network.apply_update()?;
                pending = 0;
            }
        }
        if pending > 0 {
            self.network.apply_update()?;
        }
        Ok(metrics.finish())
    }

    /// Forward-only pass over the test source.
    fn evaluate(&mut self) -> std::result::Result<Option<Metrics>, Interrupt> {
        if self.test.is_empty() {
            return Ok(None);
        }
        let mut metrics = MetricsAccumulator::default();

        self.test.reset();
        while let Some(pattern) = self.test.next() {
            if self.shared.cancel_requested() {
                return Err(Interrupt::Cancelled);
            }
            self.network.reset_state();
            let output = self.network.forward(pattern.input())?;
            let loss = self.loss.loss(&output, pattern.target())?;
            metrics.record(loss, &output, pattern.target());
        }
        Ok(Some(metrics.finish()))
    }
}
