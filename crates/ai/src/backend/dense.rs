//! Pure-Rust fully connected network backend.
//!
//! Small enough for per-tenant models trained on a few hundred rows: row-major
//! `Vec<f64>` weights, Adam mini-batch gradient descent, seeded initialisation.
//! Training runs on the blocking pool so it never stalls the async runtime.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Activation, BackendError, FitOptions, LayerSpec, Loss, NetworkSpec, NumericBackend};

const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const EPSILON: f64 = 1e-8;

/// Trained feed-forward network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseNetwork {
    input_dim: usize,
    layers: Vec<DenseLayer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DenseLayer {
    /// `weights[out][in]`
    weights: Vec<Vec<f64>>,
    biases: Vec<f64>,
    activation: Activation,
}

impl DenseLayer {
    fn init(inputs: usize, spec: &LayerSpec, rng: &mut StdRng) -> Self {
        // Xavier/Glorot uniform.
        let limit = (6.0 / (inputs + spec.units) as f64).sqrt();
        let weights = (0..spec.units)
            .map(|_| (0..inputs).map(|_| rng.gen_range(-limit..limit)).collect())
            .collect();
        Self {
            weights,
            biases: vec![0.0; spec.units],
            activation: spec.activation,
        }
    }

    fn forward(&self, input: &[f64]) -> Vec<f64> {
        let z = self
            .weights
            .iter()
            .zip(&self.biases)
            .map(|(row, b)| row.iter().zip(input).map(|(w, x)| w * x).sum::<f64>() + b)
            .collect();
        activate(self.activation, z)
    }
}

impl DenseNetwork {
    fn init(spec: &NetworkSpec, rng: &mut StdRng) -> Self {
        let mut inputs = spec.input_dim;
        let mut layers = Vec::with_capacity(spec.layers.len());
        for layer in &spec.layers {
            layers.push(DenseLayer::init(inputs, layer, rng));
            inputs = layer.units;
        }
        Self {
            input_dim: spec.input_dim,
            layers,
        }
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn output_dim(&self) -> usize {
        self.layers
            .last()
            .map(|l| l.biases.len())
            .unwrap_or(self.input_dim)
    }

    pub fn forward(&self, input: &[f64]) -> Vec<f64> {
        self.layers
            .iter()
            .fold(input.to_vec(), |acc, layer| layer.forward(&acc))
    }

    /// Activations of every layer, input first.
    fn forward_trace(&self, input: &[f64]) -> Vec<Vec<f64>> {
        let mut acts = Vec::with_capacity(self.layers.len() + 1);
        acts.push(input.to_vec());
        for layer in &self.layers {
            let next = layer.forward(&acts[acts.len() - 1]);
            acts.push(next);
        }
        acts
    }

    fn is_finite(&self) -> bool {
        self.layers.iter().all(|l| {
            l.biases.iter().all(|b| b.is_finite())
                && l.weights.iter().flatten().all(|w| w.is_finite())
        })
    }

    /// Shape consistency of a decoded network.
    fn check_structure(&self) -> Result<(), BackendError> {
        if self.input_dim == 0 || self.layers.is_empty() {
            return Err(BackendError::Decode("empty network".to_string()));
        }
        let mut inputs = self.input_dim;
        for (i, layer) in self.layers.iter().enumerate() {
            if layer.weights.is_empty() || layer.weights.len() != layer.biases.len() {
                return Err(BackendError::Decode(format!("layer {i}: bias/weight mismatch")));
            }
            if layer.weights.iter().any(|row| row.len() != inputs) {
                return Err(BackendError::Decode(format!("layer {i}: expected {inputs} inputs")));
            }
            inputs = layer.biases.len();
        }
        if !self.is_finite() {
            return Err(BackendError::Decode("non-finite parameters".to_string()));
        }
        Ok(())
    }

    fn backprop(&self, input: &[f64], target: &[f64], loss: Loss, grads: &mut Gradients) {
        let acts = self.forward_trace(input);
        let n = self.layers.len();
        let output = &acts[n];
        let out_activation = self.layers[n - 1].activation;

        let mut delta: Vec<f64> = match loss {
            // Softmax/sigmoid + cross-entropy collapse to (a - t).
            Loss::CrossEntropy => output.iter().zip(target).map(|(a, t)| a - t).collect(),
            Loss::MeanSquaredError => {
                let k = output.len() as f64;
                output
                    .iter()
                    .zip(target)
                    .map(|(a, t)| 2.0 * (a - t) / k * activation_grad(out_activation, *a))
                    .collect()
            }
        };

        for l in (0..n).rev() {
            let layer = &self.layers[l];
            let prev = &acts[l];

            for (j, d) in delta.iter().enumerate() {
                grads.biases[l][j] += d;
                for (i, a) in prev.iter().enumerate() {
                    grads.weights[l][j][i] += d * a;
                }
            }

            if l > 0 {
                let below = self.layers[l - 1].activation;
                let mut next = vec![0.0; prev.len()];
                for (j, d) in delta.iter().enumerate() {
                    for (i, w) in layer.weights[j].iter().enumerate() {
                        next[i] += w * d;
                    }
                }
                for (i, v) in next.iter_mut().enumerate() {
                    *v *= activation_grad(below, prev[i]);
                }
                delta = next;
            }
        }
    }
}

fn activate(activation: Activation, mut z: Vec<f64>) -> Vec<f64> {
    match activation {
        Activation::Linear => z,
        Activation::Relu => {
            z.iter_mut().for_each(|v| *v = v.max(0.0));
            z
        }
        Activation::Sigmoid => {
            z.iter_mut().for_each(|v| *v = 1.0 / (1.0 + (-*v).exp()));
            z
        }
        Activation::Softmax => {
            let max = z.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            z.iter_mut().for_each(|v| *v = (*v - max).exp());
            let sum: f64 = z.iter().sum();
            z.iter_mut().for_each(|v| *v /= sum);
            z
        }
    }
}

/// d(activation)/dz expressed through the activation output `a`.
fn activation_grad(activation: Activation, a: f64) -> f64 {
    match activation {
        Activation::Linear => 1.0,
        Activation::Relu => {
            if a > 0.0 {
                1.0
            } else {
                0.0
            }
        }
        Activation::Sigmoid => a * (1.0 - a),
        // Only reachable through cross-entropy, whose delta is already (a - t).
        Activation::Softmax => 1.0,
    }
}

/// Per-parameter accumulator shaped like a network.
#[derive(Debug, Clone)]
struct Gradients {
    weights: Vec<Vec<Vec<f64>>>,
    biases: Vec<Vec<f64>>,
}

impl Gradients {
    fn zeros_like(net: &DenseNetwork) -> Self {
        Self {
            weights: net
                .layers
                .iter()
                .map(|l| l.weights.iter().map(|row| vec![0.0; row.len()]).collect())
                .collect(),
            biases: net.layers.iter().map(|l| vec![0.0; l.biases.len()]).collect(),
        }
    }

    fn scale(&mut self, factor: f64) {
        self.weights
            .iter_mut()
            .flatten()
            .flatten()
            .for_each(|g| *g *= factor);
        self.biases.iter_mut().flatten().for_each(|g| *g *= factor);
    }
}

struct Adam {
    learning_rate: f64,
    step: i32,
    m: Gradients,
    v: Gradients,
}

impl Adam {
    fn new(net: &DenseNetwork, learning_rate: f64) -> Self {
        Self {
            learning_rate,
            step: 0,
            m: Gradients::zeros_like(net),
            v: Gradients::zeros_like(net),
        }
    }

    fn apply(&mut self, net: &mut DenseNetwork, grads: &Gradients) {
        self.step += 1;
        let bc1 = 1.0 - BETA1.powi(self.step);
        let bc2 = 1.0 - BETA2.powi(self.step);
        let lr = self.learning_rate;

        for (l, layer) in net.layers.iter_mut().enumerate() {
            for (j, row) in layer.weights.iter_mut().enumerate() {
                for (i, w) in row.iter_mut().enumerate() {
                    adam_update(
                        w,
                        &mut self.m.weights[l][j][i],
                        &mut self.v.weights[l][j][i],
                        grads.weights[l][j][i],
                        lr,
                        bc1,
                        bc2,
                    );
                }
            }
            for (j, b) in layer.biases.iter_mut().enumerate() {
                adam_update(
                    b,
                    &mut self.m.biases[l][j],
                    &mut self.v.biases[l][j],
                    grads.biases[l][j],
                    lr,
                    bc1,
                    bc2,
                );
            }
        }
    }
}

fn adam_update(param: &mut f64, m: &mut f64, v: &mut f64, g: f64, lr: f64, bc1: f64, bc2: f64) {
    *m = BETA1 * *m + (1.0 - BETA1) * g;
    *v = BETA2 * *v + (1.0 - BETA2) * g * g;
    let m_hat = *m / bc1;
    let v_hat = *v / bc2;
    *param -= lr * m_hat / (v_hat.sqrt() + EPSILON);
}

fn check_rows(rows: &[Vec<f64>], width: usize, what: &str) -> Result<(), BackendError> {
    for (i, row) in rows.iter().enumerate() {
        if row.len() != width {
            return Err(BackendError::InvalidInput(format!(
                "{what} row {i} has {} columns, expected {width}",
                row.len()
            )));
        }
        if row.iter().any(|v| !v.is_finite()) {
            return Err(BackendError::InvalidInput(format!(
                "{what} row {i} contains non-finite values"
            )));
        }
    }
    Ok(())
}

fn train(
    spec: &NetworkSpec,
    x: &[Vec<f64>],
    y: &[Vec<f64>],
    options: FitOptions,
) -> Result<DenseNetwork, BackendError> {
    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut net = DenseNetwork::init(spec, &mut rng);
    let mut adam = Adam::new(&net, spec.learning_rate);
    let batch_size = options.batch_size.max(1);
    let mut order: Vec<usize> = (0..x.len()).collect();

    for epoch in 0..options.epochs {
        order.shuffle(&mut rng);
        for chunk in order.chunks(batch_size) {
            let mut grads = Gradients::zeros_like(&net);
            for &i in chunk {
                net.backprop(&x[i], &y[i], spec.loss, &mut grads);
            }
            grads.scale(1.0 / chunk.len() as f64);
            adam.apply(&mut net, &grads);
        }

        if !net.is_finite() {
            return Err(BackendError::Diverged(format!(
                "non-finite parameters after epoch {epoch}"
            )));
        }
    }

    Ok(net)
}

/// Default [`NumericBackend`]: CPU dense networks.
#[derive(Debug, Default, Clone, Copy)]
pub struct DenseBackend;

impl DenseBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NumericBackend for DenseBackend {
    type Model = DenseNetwork;

    fn name(&self) -> &'static str {
        "dense"
    }

    async fn warm_up(&self) -> Result<(), BackendError> {
        // Training relies on the blocking pool; make sure it is reachable.
        tokio::task::spawn_blocking(|| {
            let spec = NetworkSpec::new(1).layer(1, Activation::Linear);
            let mut rng = StdRng::seed_from_u64(0);
            DenseNetwork::init(&spec, &mut rng).forward(&[1.0])
        })
        .await
        .map(|_| ())
        .map_err(|e| BackendError::Unavailable(e.to_string()))
    }

    async fn fit(
        &self,
        spec: &NetworkSpec,
        x: Vec<Vec<f64>>,
        y: Vec<Vec<f64>>,
        options: FitOptions,
    ) -> Result<DenseNetwork, BackendError> {
        spec.validate()?;
        if x.is_empty() {
            return Err(BackendError::InvalidInput("empty training set".to_string()));
        }
        if x.len() != y.len() {
            return Err(BackendError::InvalidInput(format!(
                "{} feature rows but {} target rows",
                x.len(),
                y.len()
            )));
        }
        check_rows(&x, spec.input_dim, "feature")?;
        check_rows(&y, spec.output_dim(), "target")?;

        debug!(
            rows = x.len(),
            epochs = options.epochs,
            batch_size = options.batch_size,
            "fitting dense network"
        );

        let spec = spec.clone();
        tokio::task::spawn_blocking(move || train(&spec, &x, &y, options))
            .await
            .map_err(|e| BackendError::Runtime(e.to_string()))?
    }

    async fn predict(
        &self,
        model: &DenseNetwork,
        x: Vec<Vec<f64>>,
    ) -> Result<Vec<Vec<f64>>, BackendError> {
        check_rows(&x, model.input_dim(), "input")?;
        Ok(x.iter().map(|row| model.forward(row)).collect())
    }

    fn encode(&self, model: &DenseNetwork) -> Result<Vec<u8>, BackendError> {
        serde_json::to_vec(model).map_err(|e| BackendError::Runtime(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<DenseNetwork, BackendError> {
        let net: DenseNetwork =
            serde_json::from_slice(bytes).map_err(|e| BackendError::Decode(e.to_string()))?;
        net.check_structure()?;
        Ok(net)
    }

    fn input_dim(&self, model: &DenseNetwork) -> usize {
        model.input_dim()
    }

    fn output_dim(&self, model: &DenseNetwork) -> usize {
        model.output_dim()
    }
}
