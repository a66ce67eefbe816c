//! Trains a small network to classify noisy points on the unit circle by
//! the parity of their quadrant.
//!
//! Usage: `train [experiment.json]`. Without a file, a 2-5-5-2 sigmoid chain
//! is trained for 200 epochs.

use std::env;
use std::error::Error;
use std::f64::consts::PI;
use std::fs::File;
use std::sync::mpsc;

use cellgraph::config::{ExperimentSpec, NetworkSpec, TrainingSpec};
use cellgraph::{Activator, MemorySource, Network, Pattern, Trainer};
use log::info;
use rand::Rng;
use rand_distr::{Distribution, Normal};

fn generate_data(num_samples: usize) -> Result<Vec<Pattern>, Box<dyn Error>> {
    let mut rng = rand::thread_rng();
    let noise = Normal::new(0.0, 0.1)?;

    let mut data = Vec::with_capacity(num_samples);
    for _ in 0..num_samples {
        let theta = rng.gen_range(0.0..2.0 * PI);
        let dx = noise.sample(&mut rng);
        let dy = noise.sample(&mut rng);
        let point = vec![theta.cos() + dx, theta.sin() + dy];
        let class = if point[0] * point[1] > 0.0 { 0 } else { 1 };
        data.push(Pattern::labeled(point, class, 2));
    }
    Ok(data)
}

fn score(set_name: &str, network: &mut Network, data: &[Pattern]) -> cellgraph::Result<()> {
    let mut num_correct = 0;
    for pattern in data {
        network.reset_state();
        let output = network.forward(pattern.input())?;
        if cellgraph::loss::is_correct(&output, pattern.target()) {
            num_correct += 1;
        }
    }
    println!(
        "{} set results: {} of {} correct",
        set_name,
        num_correct,
        data.len()
    );
    Ok(())
}

fn load_experiment() -> Result<ExperimentSpec, Box<dyn Error>> {
    match env::args().nth(1) {
        Some(path) => {
            info!("loading experiment from {}", path);
            Ok(ExperimentSpec::from_reader(File::open(path)?)?)
        }
        None => Ok(ExperimentSpec {
            network: NetworkSpec::chain(&[2, 5, 5, 2], Activator::Sigmoid),
            training: TrainingSpec {
                epochs: 200,
                learning_rate: 0.3,
                log_every: 20,
                ..TrainingSpec::default()
            },
        }),
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let experiment = load_experiment()?;
    let network = experiment.network.build()?;
    let training_data = generate_data(2_000)?;
    let test_data = generate_data(500)?;

    let (tx, rx) = mpsc::channel();
    let trainer = Trainer::new(
        network,
        MemorySource::new(training_data.clone()),
        MemorySource::new(test_data.clone()),
    );
    let task = experiment.training.configure(trainer).observer(tx).spawn()?;

    for progress in rx {
        if let Some(test) = progress.test {
            println!("epoch {}: test {}", progress.epoch, test);
        }
    }

    let report = task
        .join()
        .map_err(|_| "training thread panicked")?;
    println!("outcome: {:?} after {} epochs", report.outcome, report.epochs);

    let mut network = report.network;
    println!();
    score("Training", &mut network, &training_data)?;
    score("Test", &mut network, &test_data)?;
    Ok(())
}
