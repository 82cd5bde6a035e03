// talos_core/src/types.rs

use nalgebra::{DMatrix, DVector};

// --- Core Type Aliases ---
pub type State = DVector<f64>;
pub type Covariance = DMatrix<f64>;

/// Standard dimension of every vector-valued quantity in this estimator
/// (positions, velocities, accelerations, rotation vectors, biases).
pub const VECTOR3_SIZE: usize = 3;

/// Builds `std_dev² · I` of the given size.
///
/// Sensor and process noise are usually specified as per-axis standard
/// deviations; this is the conversion every configuration path goes through.
pub fn diagonal_covariance(std_dev: f64, size: usize) -> DMatrix<f64> {
    DMatrix::identity(size, size) * (std_dev * std_dev)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn diagonal_covariance_squares_the_standard_deviation() {
        let cov = diagonal_covariance(0.5, 3);
        assert_eq!(cov.nrows(), 3);
        assert_abs_diff_eq!(cov[(0, 0)], 0.25, epsilon = 1e-12);
        assert_abs_diff_eq!(cov[(1, 0)], 0.0, epsilon = 1e-12);
    }
}
