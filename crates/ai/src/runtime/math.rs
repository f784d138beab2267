//! Stateless numeric utilities: scaling, inverse scaling and windowing.
//!
//! Every function here is total: empty input yields an empty (defined) result,
//! and zero range / zero variance substitutes 1 as the divisor.

/// Output of [`normalize_min_max`].
#[derive(Debug, Clone, PartialEq)]
pub struct MinMaxScaled {
    pub values: Vec<f64>,
    pub min: f64,
    pub max: f64,
}

/// Output of [`standardize`].
#[derive(Debug, Clone, PartialEq)]
pub struct Standardized {
    pub values: Vec<f64>,
    pub mean: f64,
    /// Population standard deviation (1 when the data has no variance).
    pub std: f64,
}

/// Map values into \[0, 1\].
pub fn normalize_min_max(data: &[f64]) -> MinMaxScaled {
    if data.is_empty() {
        return MinMaxScaled {
            values: Vec::new(),
            min: 0.0,
            max: 0.0,
        };
    }

    let min = data.iter().copied().fold(f64::INFINITY, f64::min);
    let max = data.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = non_zero(max - min);

    MinMaxScaled {
        values: data.iter().map(|x| (x - min) / range).collect(),
        min,
        max,
    }
}

/// Z-score transform.
pub fn standardize(data: &[f64]) -> Standardized {
    let mean = mean(data);
    let std = non_zero(population_std(data, mean));

    Standardized {
        values: data.iter().map(|x| (x - mean) / std).collect(),
        mean,
        std,
    }
}

/// Inverse of [`normalize_min_max`] for a single value.
pub fn denormalize_value(v: f64, min: f64, max: f64) -> f64 {
    v * non_zero(max - min) + min
}

/// Inverse of [`standardize`] for a single value.
pub fn destandardize_value(v: f64, mean: f64, std: f64) -> f64 {
    v * non_zero(std) + mean
}

/// Sliding-window supervised framing.
///
/// For `N` points and window `W` this yields `N - W` pairs with
/// `x[i] = data[i..i + W]` and `y[i] = data[i + W]`. Empty when `N <= W` or
/// `W == 0`.
pub fn prepare_time_series(data: &[f64], window: usize) -> (Vec<Vec<f64>>, Vec<f64>) {
    if window == 0 || data.len() <= window {
        return (Vec::new(), Vec::new());
    }

    data.windows(window + 1)
        .map(|w| (w[..window].to_vec(), w[window]))
        .unzip()
}

/// Arithmetic mean; 0 for empty input.
pub fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / (xs.len() as f64)
}

/// Population standard deviation (divides by `n`); 0 for empty input.
pub fn population_std(xs: &[f64], mean: f64) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    let var = xs
        .iter()
        .map(|x| {
            let d = x - mean;
            d * d
        })
        .sum::<f64>()
        / (xs.len() as f64);
    var.sqrt()
}

fn non_zero(divisor: f64) -> f64 {
    if divisor == 0.0 { 1.0 } else { divisor }
}
