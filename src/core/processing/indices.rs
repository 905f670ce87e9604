use ndarray::{par_azip, Array2, ArrayView2};

use crate::error::{Error, Result};

/// Normalized difference: (a - b) / (a + b).
///
/// NaN wherever either input is missing or the sum is zero.
pub fn normalized_difference(a: ArrayView2<'_, f32>, b: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
    if a.dim() != b.dim() {
        return Err(Error::GridMismatch {
            expected: format!("{:?}", a.dim()),
            actual: format!("{:?}", b.dim()),
        });
    }
    let mut result = Array2::<f32>::from_elem(a.dim(), f32::NAN);
    par_azip!((res in &mut result, &a_val in &a, &b_val in &b) {
        let sum = a_val + b_val;
        if !a_val.is_nan() && !b_val.is_nan() && sum != 0.0 {
            *res = (a_val - b_val) / sum;
        }
    });
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn ndvi_values() {
        let nir = array![[0.5, 0.3], [0.2, 0.0]];
        let red = array![[0.1, 0.3], [0.6, 0.0]];
        let nd = normalized_difference(nir.view(), red.view()).unwrap();
        assert!((nd[[0, 0]] - 0.6666667).abs() < 1e-6);
        assert_eq!(nd[[0, 1]], 0.0);
        assert!((nd[[1, 0]] + 0.5).abs() < 1e-6);
        assert!(nd[[1, 1]].is_nan());
    }

    #[test]
    fn missing_input_propagates() {
        let a = array![[f32::NAN, 0.4]];
        let b = array![[0.2, f32::NAN]];
        let nd = normalized_difference(a.view(), b.view()).unwrap();
        assert!(nd.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn bounded_for_non_negative_inputs() {
        let a = array![[0.0, 1.0, 0.25]];
        let b = array![[1.0, 0.0, 0.75]];
        let nd = normalized_difference(a.view(), b.view()).unwrap();
        assert!(nd.iter().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[test]
    fn shape_mismatch_errors() {
        let a = Array2::<f32>::zeros((2, 2));
        let b = Array2::<f32>::zeros((2, 3));
        assert!(normalized_difference(a.view(), b.view()).is_err());
    }
}
