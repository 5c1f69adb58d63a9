//! Descriptive statistics over engagement scores.
//!
//! Every function returns `None` for an empty input instead of dividing by
//! zero, so callers never see `NaN` from an idle session.

use serde::{Deserialize, Serialize};

/// Mean and population standard deviation of one set of scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub mean: f64,
    pub sd: f64,
}

/// Arithmetic mean.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation (divides by `n`, not `n - 1`).
pub fn population_sd(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let variance = values.iter().map(|x| (x - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}

/// Mean and population SD of the given scores.
pub fn aggregate(values: &[f64]) -> Option<Aggregate> {
    Some(Aggregate {
        mean: mean(values)?,
        sd: population_sd(values)?,
    })
}

/// Collapse a series of aggregates into one: mean of the means and mean of
/// the SDs.
pub fn mean_of_aggregates<I>(aggregates: I) -> Option<Aggregate>
where
    I: IntoIterator<Item = Aggregate>,
{
    let (means, sds): (Vec<f64>, Vec<f64>) =
        aggregates.into_iter().map(|a| (a.mean, a.sd)).unzip();
    Some(Aggregate {
        mean: mean(&means)?,
        sd: mean(&sds)?,
    })
}
