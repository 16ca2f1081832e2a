//! Order statistics over prices.

/// Median. `None` for an empty slice.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation.
pub fn std_deviation(values: &[f64]) -> Option<f64> {
    let mu = mean(values)?;
    let variance = values.iter().map(|v| (v - mu).powi(2)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}

/// Weighted mean of `(value, weight)` pairs. `None` when the weights sum to zero.
pub fn weighted_mean(pairs: &[(f64, f64)]) -> Option<f64> {
    let total: f64 = pairs.iter().map(|(_, w)| w).sum();
    if total <= 0.0 {
        return None;
    }
    Some(pairs.iter().map(|(v, w)| v * w).sum::<f64>() / total)
}

/// |value - reference| / reference
pub fn relative_deviation(value: f64, reference: f64) -> f64 {
    ((value - reference) / reference).abs()
}
