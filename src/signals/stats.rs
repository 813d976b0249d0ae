use ndarray::{Array1, Array2, Axis};

/// Below this a column is treated as constant
pub const STD_EPSILON: f64 = 1e-12;

/// Per-column mean and population standard deviation of a (T, N) matrix
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn column_mean_std(data: &Array2<f64>) -> (Array1<f64>, Array1<f64>) {
    let n = data.nrows();
    if n == 0 {
        return (Array1::zeros(data.ncols()), Array1::zeros(data.ncols()));
    }

    let mean = data.sum_axis(Axis(0)) / n as f64;
    let mut var = Array1::<f64>::zeros(data.ncols());
    for row in data.rows() {
        for ((v, &x), &m) in var.iter_mut().zip(row.iter()).zip(mean.iter()) {
            *v += (x - m).powi(2);
        }
    }
    let std = var.mapv(|v| (v / n as f64).sqrt());
    (mean, std)
}

/// Per-column mean of squared values (variance without mean removal)
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn mean_of_squares(data: &Array2<f64>) -> Array1<f64> {
    let n = data.nrows().max(1) as f64;
    data.map_axis(Axis(0), |col| col.iter().map(|x| x * x).sum::<f64>() / n)
}

/// Calculate percentile using linear interpolation
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
#[must_use]
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }

    let k = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let f = k.floor() as usize;
    let c = k.ceil() as usize;

    if f == c {
        sorted[f]
    } else {
        let d0 = sorted[f] * (c as f64 - k);
        let d1 = sorted[c] * (k - f as f64);
        d0 + d1
    }
}

/// Frobenius norm of the difference of two matrices of equal shape
#[must_use]
pub fn frobenius_distance(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_column_mean_std() {
        let data = array![[1.0, 5.0], [2.0, 5.0], [3.0, 5.0], [4.0, 5.0]];
        let (mean, std) = column_mean_std(&data);

        assert!((mean[0] - 2.5).abs() < 1e-12);
        assert!((std[0] - 1.25_f64.sqrt()).abs() < 1e-12);
        assert!(std[1].abs() < STD_EPSILON);
    }

    #[test]
    fn test_mean_of_squares() {
        let data = array![[1.0, -2.0], [3.0, 2.0]];
        let ms = mean_of_squares(&data);
        assert!((ms[0] - 5.0).abs() < 1e-12);
        assert!((ms[1] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_percentile() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0];
        assert!((percentile(&values, 50.0) - 5.5).abs() < 1e-12);
        assert!((percentile(&values, 100.0) - 10.0).abs() < 1e-12);
        assert!((percentile(&values, 98.0) - 9.82).abs() < 1e-9);
    }

    #[test]
    fn test_frobenius_distance() {
        let a = array![[0.0, 0.0], [0.0, 0.0]];
        let b = array![[3.0, 0.0], [0.0, 4.0]];
        assert!((frobenius_distance(&a, &b) - 5.0).abs() < 1e-12);
    }
}
