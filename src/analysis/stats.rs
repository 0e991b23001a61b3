//! Small statistics helpers over `f64` slices.

/// Arithmetic mean; `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1 denominator); `None` below two values.
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let sum_sq: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Some((sum_sq / (values.len() - 1) as f64).sqrt())
}

/// Population variance (n denominator); `None` for an empty slice.
pub fn population_variance(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    Some(values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64)
}

/// Simple returns between consecutive values. A zero base yields a zero
/// return rather than infinity.
pub fn pct_returns(values: &[f64]) -> Vec<f64> {
    values
        .windows(2)
        .map(|w| if w[0] == 0.0 { 0.0 } else { w[1] / w[0] - 1.0 })
        .collect()
}

/// Trailing `window` values, or `None` when the slice is shorter.
pub fn tail(values: &[f64], window: usize) -> Option<&[f64]> {
    values.len().checked_sub(window).map(|start| &values[start..])
}

/// Least-squares slope of `y` on `x`. `None` when fewer than two points or
/// `x` has no spread.
pub fn ols_slope(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let mx = mean(x)?;
    let my = mean(y)?;
    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (xi, yi) in x.iter().zip(y) {
        sxy += (xi - mx) * (yi - my);
        sxx += (xi - mx).powi(2);
    }
    if sxx == 0.0 {
        return None;
    }
    Some(sxy / sxx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_std() {
        let std = sample_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!((std - 2.138_089_935).abs() < 1e-9);
        assert!(sample_std(&[1.0]).is_none());
    }

    #[test]
    fn test_population_variance() {
        let var = population_variance(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!((var - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_pct_returns() {
        let returns = pct_returns(&[100.0, 110.0, 99.0]);
        assert!((returns[0] - 0.10).abs() < 1e-12);
        assert!((returns[1] + 0.10).abs() < 1e-12);
        assert_eq!(pct_returns(&[0.0, 5.0]), vec![0.0]);
    }

    #[test]
    fn test_tail() {
        let values = [1.0, 2.0, 3.0];
        assert_eq!(tail(&values, 2), Some(&values[1..]));
        assert!(tail(&values, 4).is_none());
    }

    #[test]
    fn test_ols_slope() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let y = [3.0, 5.0, 7.0, 9.0];
        assert!((ols_slope(&x, &y).unwrap() - 2.0).abs() < 1e-12);
        assert!(ols_slope(&[1.0, 1.0], &[2.0, 3.0]).is_none());
    }
}
