//! Stacked GRU regressor
//!
//! Maps a `(seq_len × n_features)` window to `horizon` future target values.
//! Layers are stacked with inverted dropout between them and the final hidden
//! state feeds a dense head. Training is mini-batch Adam with full
//! back-propagation through time and a global gradient-norm clip. Early
//! stopping monitors the validation windows and the best checkpoint is
//! restored when training ends.
//!
//! Inputs and the target are standardized internally with statistics from the
//! training block, so predictions come back in target units.

use ndarray::{Array1, Array2, ArrayView2, Axis, Zip};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::config::SequenceConfig;
use crate::error::{ForecastError, Result};
use crate::timeseries::SequenceDataset;

const ADAM_BETA1: f64 = 0.9;
const ADAM_BETA2: f64 = 0.999;
const ADAM_EPSILON: f64 = 1e-8;

fn sigmoid(v: f64) -> f64 {
    1.0 / (1.0 + (-v).exp())
}

/// Glorot uniform initialization
fn glorot(n_in: usize, n_out: usize, rng: &mut Xoshiro256PlusPlus) -> Array2<f64> {
    let scale = (6.0 / (n_in + n_out) as f64).sqrt();
    Array2::from_shape_fn((n_in, n_out), |_| rng.gen_range(-scale..scale))
}

/// One GRU layer. Biases are `(1 × hidden)` rows so they broadcast over the batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GruLayer {
    w_z: Array2<f64>,
    w_r: Array2<f64>,
    w_n: Array2<f64>,
    u_z: Array2<f64>,
    u_r: Array2<f64>,
    u_n: Array2<f64>,
    b_z: Array2<f64>,
    b_r: Array2<f64>,
    b_n: Array2<f64>,
}

/// Activations of one time step kept for the backward pass
struct StepCache {
    x: Array2<f64>,
    h_prev: Array2<f64>,
    z: Array2<f64>,
    r: Array2<f64>,
    n: Array2<f64>,
}

impl GruLayer {
    fn new(n_in: usize, hidden: usize, rng: &mut Xoshiro256PlusPlus) -> Self {
        Self {
            w_z: glorot(n_in, hidden, rng),
            w_r: glorot(n_in, hidden, rng),
            w_n: glorot(n_in, hidden, rng),
            u_z: glorot(hidden, hidden, rng),
            u_r: glorot(hidden, hidden, rng),
            u_n: glorot(hidden, hidden, rng),
            b_z: Array2::zeros((1, hidden)),
            b_r: Array2::zeros((1, hidden)),
            b_n: Array2::zeros((1, hidden)),
        }
    }

    fn zeros_like(&self) -> Self {
        let z = |a: &Array2<f64>| Array2::zeros(a.raw_dim());
        Self {
            w_z: z(&self.w_z),
            w_r: z(&self.w_r),
            w_n: z(&self.w_n),
            u_z: z(&self.u_z),
            u_r: z(&self.u_r),
            u_n: z(&self.u_n),
            b_z: z(&self.b_z),
            b_r: z(&self.b_r),
            b_n: z(&self.b_n),
        }
    }

    fn tensors(&self) -> [&Array2<f64>; 9] {
        [
            &self.w_z, &self.w_r, &self.w_n, &self.u_z, &self.u_r, &self.u_n, &self.b_z, &self.b_r,
            &self.b_n,
        ]
    }

    fn tensors_mut(&mut self) -> [&mut Array2<f64>; 9] {
        [
            &mut self.w_z,
            &mut self.w_r,
            &mut self.w_n,
            &mut self.u_z,
            &mut self.u_r,
            &mut self.u_n,
            &mut self.b_z,
            &mut self.b_r,
            &mut self.b_n,
        ]
    }

    fn hidden_size(&self) -> usize {
        self.u_z.nrows()
    }

    /// Run the layer over a time-major sequence of `(batch × n_in)` inputs
    fn forward(&self, inputs: &[Array2<f64>]) -> (Vec<Array2<f64>>, Vec<StepCache>) {
        let batch = inputs.first().map_or(0, |x| x.nrows());
        let mut h: Array2<f64> = Array2::zeros((batch, self.hidden_size()));
        let mut outputs = Vec::with_capacity(inputs.len());
        let mut caches = Vec::with_capacity(inputs.len());

        for x in inputs {
            let z = (x.dot(&self.w_z) + h.dot(&self.u_z) + &self.b_z).mapv(sigmoid);
            let r = (x.dot(&self.w_r) + h.dot(&self.u_r) + &self.b_r).mapv(sigmoid);
            let n = (x.dot(&self.w_n) + (&r * &h).dot(&self.u_n) + &self.b_n).mapv(f64::tanh);
            // h_t = (1 - z) * h + z * n
            let h_next = &h + &(&z * &(&n - &h));
            outputs.push(h_next.clone());
            caches.push(StepCache {
                x: x.clone(),
                h_prev: h,
                z,
                r,
                n,
            });
            h = h_next;
        }
        (outputs, caches)
    }

    /// Back-propagate through time. `d_outputs[t]` is the loss gradient with
    /// respect to the layer's output at step t. Parameter gradients are
    /// accumulated into `grads`; the gradient with respect to each input step
    /// is returned.
    fn backward(
        &self,
        caches: &[StepCache],
        d_outputs: &[Array2<f64>],
        grads: &mut GruLayer,
    ) -> Vec<Array2<f64>> {
        let mut d_inputs: Vec<Array2<f64>> = Vec::with_capacity(caches.len());
        let mut dh_next: Option<Array2<f64>> = None;

        for (c, d_out) in caches.iter().zip(d_outputs).rev() {
            let dh = match &dh_next {
                Some(next) => d_out + next,
                None => d_out.clone(),
            };

            let dn = &dh * &c.z;
            let dz = &dh * &(&c.n - &c.h_prev);
            let mut dh_prev = &dh * &c.z.mapv(|v| 1.0 - v);

            let da_n = &dn * &c.n.mapv(|v| 1.0 - v * v);
            let rh = &c.r * &c.h_prev;
            grads.w_n += &c.x.t().dot(&da_n);
            grads.u_n += &rh.t().dot(&da_n);
            grads.b_n += &da_n.sum_axis(Axis(0)).insert_axis(Axis(0));

            let d_rh = da_n.dot(&self.u_n.t());
            let dr = &d_rh * &c.h_prev;
            dh_prev += &(&d_rh * &c.r);

            let da_z = &dz * &c.z.mapv(|v| v * (1.0 - v));
            let da_r = &dr * &c.r.mapv(|v| v * (1.0 - v));
            grads.w_z += &c.x.t().dot(&da_z);
            grads.u_z += &c.h_prev.t().dot(&da_z);
            grads.b_z += &da_z.sum_axis(Axis(0)).insert_axis(Axis(0));
            grads.w_r += &c.x.t().dot(&da_r);
            grads.u_r += &c.h_prev.t().dot(&da_r);
            grads.b_r += &da_r.sum_axis(Axis(0)).insert_axis(Axis(0));

            dh_prev += &da_z.dot(&self.u_z.t());
            dh_prev += &da_r.dot(&self.u_r.t());

            d_inputs.push(da_n.dot(&self.w_n.t()) + da_z.dot(&self.w_z.t()) + da_r.dot(&self.w_r.t()));
            dh_next = Some(dh_prev);
        }

        d_inputs.reverse();
        d_inputs
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GruParams {
    layers: Vec<GruLayer>,
    head_w: Array2<f64>,
    head_b: Array2<f64>,
}

impl GruParams {
    fn init(
        n_features: usize,
        hidden: usize,
        num_layers: usize,
        horizon: usize,
        rng: &mut Xoshiro256PlusPlus,
    ) -> Self {
        let layers = (0..num_layers)
            .map(|l| GruLayer::new(if l == 0 { n_features } else { hidden }, hidden, rng))
            .collect();
        Self {
            layers,
            head_w: glorot(hidden, horizon, rng),
            head_b: Array2::zeros((1, horizon)),
        }
    }

    fn zeros_like(&self) -> Self {
        Self {
            layers: self.layers.iter().map(GruLayer::zeros_like).collect(),
            head_w: Array2::zeros(self.head_w.raw_dim()),
            head_b: Array2::zeros(self.head_b.raw_dim()),
        }
    }

    fn tensors(&self) -> Vec<&Array2<f64>> {
        let mut out: Vec<&Array2<f64>> = self.layers.iter().flat_map(|l| l.tensors()).collect();
        out.push(&self.head_w);
        out.push(&self.head_b);
        out
    }

    fn tensors_mut(&mut self) -> Vec<&mut Array2<f64>> {
        let mut out: Vec<&mut Array2<f64>> =
            self.layers.iter_mut().flat_map(|l| l.tensors_mut()).collect();
        out.push(&mut self.head_w);
        out.push(&mut self.head_b);
        out
    }
}

struct ForwardPass {
    caches: Vec<Vec<StepCache>>,
    /// Dropout masks applied to the outputs of every layer but the last
    masks: Vec<Option<Vec<Array2<f64>>>>,
    last_hidden: Array2<f64>,
    output: Array2<f64>,
}

fn forward(
    params: &GruParams,
    inputs: Vec<Array2<f64>>,
    dropout: f64,
    mut rng: Option<&mut Xoshiro256PlusPlus>,
) -> ForwardPass {
    let n_layers = params.layers.len();
    let mut seq = inputs;
    let mut caches = Vec::with_capacity(n_layers);
    let mut masks = Vec::with_capacity(n_layers.saturating_sub(1));

    for (l, layer) in params.layers.iter().enumerate() {
        let (mut outputs, layer_cache) = layer.forward(&seq);
        caches.push(layer_cache);

        if l + 1 < n_layers {
            let mask = match rng.as_deref_mut() {
                Some(rng) if dropout > 0.0 => {
                    let keep = 1.0 - dropout;
                    let layer_masks: Vec<Array2<f64>> = outputs
                        .iter()
                        .map(|h| {
                            Array2::from_shape_fn(h.raw_dim(), |_| {
                                if rng.gen::<f64>() < keep {
                                    1.0 / keep
                                } else {
                                    0.0
                                }
                            })
                        })
                        .collect();
                    for (h, m) in outputs.iter_mut().zip(&layer_masks) {
                        *h *= m;
                    }
                    Some(layer_masks)
                }
                _ => None,
            };
            masks.push(mask);
        }
        seq = outputs;
    }

    let last_hidden = seq.pop().unwrap_or_else(|| Array2::zeros((0, params.head_w.nrows())));
    let output = last_hidden.dot(&params.head_w) + &params.head_b;
    ForwardPass {
        caches,
        masks,
        last_hidden,
        output,
    }
}

/// Mean squared error of the pass and its parameter gradients
fn backward(params: &GruParams, pass: &ForwardPass, targets: &Array2<f64>) -> (f64, GruParams) {
    let (batch, horizon) = pass.output.dim();
    let diff = &pass.output - targets;
    let loss = diff.mapv(|v| v * v).mean().unwrap_or(0.0);
    let d_out = diff * (2.0 / (batch * horizon).max(1) as f64);

    let mut grads = params.zeros_like();
    grads.head_w = pass.last_hidden.t().dot(&d_out);
    grads.head_b = d_out.sum_axis(Axis(0)).insert_axis(Axis(0));

    let d_last = d_out.dot(&params.head_w.t());
    let seq_len = pass.caches.first().map_or(0, |c| c.len());
    let mut d_outputs: Vec<Array2<f64>> = (0..seq_len).map(|_| Array2::zeros(d_last.raw_dim())).collect();
    if let Some(last) = d_outputs.last_mut() {
        *last = d_last;
    }

    for l in (0..params.layers.len()).rev() {
        let mut d_inputs = params.layers[l].backward(&pass.caches[l], &d_outputs, &mut grads.layers[l]);
        if l > 0 {
            if let Some(masks) = &pass.masks[l - 1] {
                for (d, m) in d_inputs.iter_mut().zip(masks) {
                    *d *= m;
                }
            }
            d_outputs = d_inputs;
        }
    }
    (loss, grads)
}

/// Rescale gradients so their global L2 norm is at most `max_norm`
fn clip_gradients(grads: &mut GruParams, max_norm: f64) {
    if max_norm <= 0.0 {
        return;
    }
    let norm = grads
        .tensors()
        .iter()
        .map(|t| t.iter().map(|v| v * v).sum::<f64>())
        .sum::<f64>()
        .sqrt();
    if norm > max_norm {
        let scale = max_norm / norm;
        for t in grads.tensors_mut() {
            t.mapv_inplace(|v| v * scale);
        }
    }
}

struct Adam {
    m: GruParams,
    v: GruParams,
    step: i32,
    learning_rate: f64,
}

impl Adam {
    fn new(params: &GruParams, learning_rate: f64) -> Self {
        Self {
            m: params.zeros_like(),
            v: params.zeros_like(),
            step: 0,
            learning_rate,
        }
    }

    fn update(&mut self, params: &mut GruParams, grads: &GruParams) {
        self.step += 1;
        let lr = self.learning_rate;
        let bias1 = 1.0 - ADAM_BETA1.powi(self.step);
        let bias2 = 1.0 - ADAM_BETA2.powi(self.step);

        let moments = self.m.tensors_mut().into_iter().zip(self.v.tensors_mut());
        for ((p, g), (m, v)) in params.tensors_mut().into_iter().zip(grads.tensors()).zip(moments) {
            Zip::from(p).and(g).and(m).and(v).for_each(|p, &g, m, v| {
                *m = ADAM_BETA1 * *m + (1.0 - ADAM_BETA1) * g;
                *v = ADAM_BETA2 * *v + (1.0 - ADAM_BETA2) * g * g;
                *p -= lr * (*m / bias1) / ((*v / bias2).sqrt() + ADAM_EPSILON);
            });
        }
    }
}

/// Per-feature and target standardization fitted on the training block
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Standardizer {
    x_mean: Array1<f64>,
    x_std: Array1<f64>,
    y_mean: f64,
    y_std: f64,
}

impl Standardizer {
    fn fit(features: &Array2<f64>, target: &Array1<f64>) -> Self {
        let guard = |s: f64| if s.is_finite() && s > 1e-12 { s } else { 1.0 };
        Self {
            x_mean: features
                .mean_axis(Axis(0))
                .unwrap_or_else(|| Array1::zeros(features.ncols())),
            x_std: features.std_axis(Axis(0), 0.0).mapv(guard),
            y_mean: target.mean().unwrap_or(0.0),
            y_std: guard(target.std(0.0)),
        }
    }

    /// Time-major input tensors and standardized targets for a set of windows
    fn batch(&self, dataset: &SequenceDataset, indices: &[usize]) -> (Vec<Array2<f64>>, Array2<f64>) {
        let (seq_len, horizon, n_features) = (dataset.seq_len(), dataset.horizon(), dataset.n_features());
        let mut inputs: Vec<Array2<f64>> =
            (0..seq_len).map(|_| Array2::zeros((indices.len(), n_features))).collect();
        let mut targets = Array2::zeros((indices.len(), horizon));

        for (row, &i) in indices.iter().enumerate() {
            if let Some((x, y)) = dataset.sample(i) {
                for (t, step) in inputs.iter_mut().enumerate() {
                    for j in 0..n_features {
                        step[[row, j]] = (x[[t, j]] - self.x_mean[j]) / self.x_std[j];
                    }
                }
                for k in 0..horizon {
                    targets[[row, k]] = (y[k] - self.y_mean) / self.y_std;
                }
            }
        }
        (inputs, targets)
    }

    fn window(&self, window: &ArrayView2<f64>) -> Vec<Array2<f64>> {
        window
            .rows()
            .into_iter()
            .map(|row| {
                Array2::from_shape_fn((1, row.len()), |(_, j)| (row[j] - self.x_mean[j]) / self.x_std[j])
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FittedGru {
    params: GruParams,
    scaler: Standardizer,
}

/// Mean standardized MSE over every window, evaluated in chunks
fn evaluate(fitted: &FittedGru, dataset: &SequenceDataset, chunk: usize) -> f64 {
    let all: Vec<usize> = (0..dataset.len()).collect();
    let (mut total, mut count) = (0.0, 0usize);
    for indices in all.chunks(chunk.max(1)) {
        let (inputs, targets) = fitted.scaler.batch(dataset, indices);
        let pass = forward(&fitted.params, inputs, 0.0, None);
        total += (&pass.output - &targets).mapv(|v| v * v).sum();
        count += targets.len();
    }
    if count == 0 {
        f64::INFINITY
    } else {
        total / count as f64
    }
}

/// GRU sequence-to-vector regressor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GruRegressor {
    pub config: SequenceConfig,
    seq_len: usize,
    horizon: usize,
    n_features: usize,
    fitted: Option<FittedGru>,
    best_epoch: Option<usize>,
    #[serde(skip)]
    history: Vec<f64>,
}

impl GruRegressor {
    pub fn new(config: SequenceConfig) -> Self {
        Self {
            config,
            seq_len: 0,
            horizon: 0,
            n_features: 0,
            fitted: None,
            best_epoch: None,
            history: Vec::new(),
        }
    }

    /// Train on the windows of `train`, early-stopping on `validation`.
    ///
    /// When `validation` has no windows the training loss is monitored instead.
    pub fn fit(&mut self, train: &SequenceDataset, validation: &SequenceDataset) -> Result<()> {
        if train.is_empty() {
            return Err(ForecastError::TrainingError(format!(
                "training block of {} rows yields no windows for seq_len {} and horizon {}",
                train.target().len(),
                train.seq_len(),
                train.horizon()
            )));
        }
        if !validation.is_empty()
            && (validation.n_features() != train.n_features()
                || validation.seq_len() != train.seq_len()
                || validation.horizon() != train.horizon())
        {
            return Err(ForecastError::ShapeError {
                expected: format!("{} features", train.n_features()),
                actual: format!("{} features", validation.n_features()),
            });
        }
        if !(0.0..1.0).contains(&self.config.dropout) {
            return Err(ForecastError::InvalidParameter {
                name: "dropout".to_string(),
                value: self.config.dropout.to_string(),
                reason: "must be in [0, 1)".to_string(),
            });
        }

        self.seq_len = train.seq_len();
        self.horizon = train.horizon();
        self.n_features = train.n_features();
        self.history.clear();

        let config = &self.config;
        let batch_size = config.batch_size.max(1);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(config.random_seed);
        let mut current = FittedGru {
            params: GruParams::init(
                self.n_features,
                config.hidden_size.max(1),
                config.num_layers.max(1),
                self.horizon,
                &mut rng,
            ),
            scaler: Standardizer::fit(train.features(), train.target()),
        };
        let mut adam = Adam::new(&current.params, config.learning_rate);
        let monitor = if validation.is_empty() { train } else { validation };

        let mut best = current.clone();
        let mut best_loss = f64::INFINITY;
        let mut best_epoch = None;
        let mut stale = 0usize;
        let mut order: Vec<usize> = (0..train.len()).collect();

        for epoch in 0..config.epochs {
            order.shuffle(&mut rng);
            let mut train_loss = 0.0;
            let mut n_batches = 0usize;

            for indices in order.chunks(batch_size) {
                let (inputs, targets) = current.scaler.batch(train, indices);
                let pass = forward(&current.params, inputs, config.dropout, Some(&mut rng));
                let (loss, mut grads) = backward(&current.params, &pass, &targets);
                if !loss.is_finite() {
                    return Err(ForecastError::TrainingError(format!(
                        "GRU loss diverged at epoch {}",
                        epoch
                    )));
                }
                clip_gradients(&mut grads, config.grad_clip);
                adam.update(&mut current.params, &grads);
                train_loss += loss;
                n_batches += 1;
            }

            let val_loss = evaluate(&current, monitor, batch_size);
            self.history.push(val_loss);
            debug!(
                epoch,
                train_loss = train_loss / n_batches.max(1) as f64,
                val_loss,
                "GRU epoch finished"
            );

            if val_loss < best_loss {
                best_loss = val_loss;
                best = current.clone();
                best_epoch = Some(epoch);
                stale = 0;
            } else {
                stale += 1;
                if stale >= config.patience.max(1) {
                    info!(epoch, best_epoch = ?best_epoch, "Early stopping GRU");
                    break;
                }
            }
        }

        self.best_epoch = best_epoch;
        self.fitted = Some(best);
        Ok(())
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Epoch whose weights were kept
    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    /// Monitored loss per completed epoch of the last fit
    pub fn history(&self) -> &[f64] {
        &self.history
    }

    /// Standardized mean squared error over every window of `dataset`
    pub fn loss(&self, dataset: &SequenceDataset) -> Result<f64> {
        let fitted = self.fitted.as_ref().ok_or(ForecastError::ModelNotFitted)?;
        Ok(evaluate(fitted, dataset, self.config.batch_size))
    }

    /// Forecast `horizon` values from one `(seq_len × n_features)` window
    pub fn predict_window(&self, window: ArrayView2<f64>) -> Result<Array1<f64>> {
        let fitted = self.fitted.as_ref().ok_or(ForecastError::ModelNotFitted)?;
        if window.dim() != (self.seq_len, self.n_features) {
            return Err(ForecastError::ShapeError {
                expected: format!("({} x {})", self.seq_len, self.n_features),
                actual: format!("({} x {})", window.nrows(), window.ncols()),
            });
        }
        let pass = forward(&fitted.params, fitted.scaler.window(&window), 0.0, None);
        let scaler = &fitted.scaler;
        Ok(pass.output.row(0).mapv(|v| v * scaler.y_std + scaler.y_mean))
    }

    /// Forecasts for every window, one row per window
    pub fn predict(&self, dataset: &SequenceDataset) -> Result<Array2<f64>> {
        let fitted = self.fitted.as_ref().ok_or(ForecastError::ModelNotFitted)?;
        if dataset.n_features() != self.n_features || dataset.horizon() != self.horizon {
            return Err(ForecastError::ShapeError {
                expected: format!("{} features, horizon {}", self.n_features, self.horizon),
                actual: format!("{} features, horizon {}", dataset.n_features(), dataset.horizon()),
            });
        }
        let indices: Vec<usize> = (0..dataset.len()).collect();
        let mut out = Array2::zeros((dataset.len(), self.horizon));
        for (chunk_idx, chunk) in indices.chunks(self.config.batch_size.max(1)).enumerate() {
            let (inputs, _) = fitted.scaler.batch(dataset, chunk);
            let pass = forward(&fitted.params, inputs, 0.0, None);
            let start = chunk_idx * self.config.batch_size.max(1);
            for (row, values) in pass.output.rows().into_iter().enumerate() {
                for (k, &v) in values.iter().enumerate() {
                    out[[start + row, k]] = v * fitted.scaler.y_std + fitted.scaler.y_mean;
                }
            }
        }
        Ok(out)
    }
}
