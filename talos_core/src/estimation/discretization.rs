// talos_core/src/estimation/discretization.rs

use nalgebra::DMatrix;

/// Converts a continuous-time linear system `(A, G, Q)` into its exact
/// discrete-time equivalent over a fixed step, using matrix exponentials.
///
/// The three outputs are computed from separate, smaller exponentials
/// ("split up") instead of one large augmented generator:
///
/// - `F_d = exp(A·dt)`
/// - `G_d` is the top-right block of `exp([[A, G], [0, 0]]·dt)`
/// - `Q_d = M₂₂ᵀ·M₁₂` where `[[·, M₁₂], [0, M₂₂]] = exp([[−A, Q], [0, Aᵀ]]·dt)`
///   (Van Loan), which discretizes the noise jointly with the dynamics —
///   unlike an Euler step, this stays exact for stiff or strongly coupled
///   dynamics.
#[derive(Debug, Clone)]
pub struct SplitUpMatrixExponentialDiscretizer {
    state_size: usize,
    input_size: usize,
    input_generator: DMatrix<f64>,
    noise_generator: DMatrix<f64>,
}

impl SplitUpMatrixExponentialDiscretizer {
    pub fn new(state_size: usize, input_size: usize) -> Self {
        Self {
            state_size,
            input_size,
            input_generator: DMatrix::zeros(state_size + input_size, state_size + input_size),
            noise_generator: DMatrix::zeros(2 * state_size, 2 * state_size),
        }
    }

    /// Replaces `(f, g, q)` in place with their discrete-time equivalents
    /// over `dt`. `f`/`q` must be `state_size` square, `g` must be
    /// `state_size × input_size`.
    pub fn discretize(&mut self, f: &mut DMatrix<f64>, g: &mut DMatrix<f64>, q: &mut DMatrix<f64>, dt: f64) {
        let n = self.state_size;
        let m = self.input_size;
        if n == 0 {
            return;
        }

        let a = f.clone();

        // Input matrix first; it needs the continuous-time A.
        if m > 0 {
            self.input_generator.fill(0.0);
            self.input_generator
                .view_mut((0, 0), (n, n))
                .copy_from(&(&a * dt));
            self.input_generator
                .view_mut((0, n), (n, m))
                .copy_from(&(&*g * dt));
            let exponential = self.input_generator.exp();
            g.copy_from(&exponential.view((0, n), (n, m)));
        }

        // Van Loan block for the noise.
        self.noise_generator.fill(0.0);
        self.noise_generator
            .view_mut((0, 0), (n, n))
            .copy_from(&(-(&a) * dt));
        self.noise_generator
            .view_mut((0, n), (n, n))
            .copy_from(&(&*q * dt));
        self.noise_generator
            .view_mut((n, n), (n, n))
            .copy_from(&(a.transpose() * dt));
        let exponential = self.noise_generator.exp();
        let m12 = exponential.view((0, n), (n, n)).into_owned();
        let m22 = exponential.view((n, n), (n, n)).into_owned();
        *q = m22.transpose() * m12;
        // Clean up the asymmetry the two exponentials leave behind.
        let symmetrized = (&*q + q.transpose()) * 0.5;
        q.copy_from(&symmetrized);

        *f = (a * dt).exp();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// Exact discretization of a scalar system `ẋ = a·x + w`,
    /// `F_d = e^{a·dt}`, `Q_d = ∫₀^{dt} e^{aτ}·q·e^{aτ} dτ = q·(e^{2a·dt}−1)/(2a)`.
    #[test]
    fn scalar_system_matches_the_closed_form() {
        let a = -0.7;
        let q_c = 0.3;
        let dt = 0.05;

        let mut f = DMatrix::from_element(1, 1, a);
        let mut g = DMatrix::zeros(1, 0);
        let mut q = DMatrix::from_element(1, 1, q_c);
        let mut discretizer = SplitUpMatrixExponentialDiscretizer::new(1, 0);
        discretizer.discretize(&mut f, &mut g, &mut q, dt);

        let f_exact = (a * dt).exp();
        let q_exact = q_c * ((2.0 * a * dt).exp() - 1.0) / (2.0 * a);
        assert_abs_diff_eq!(f[(0, 0)], f_exact, epsilon = 1e-12);
        assert_abs_diff_eq!(q[(0, 0)], q_exact, epsilon = 1e-12);
    }

    /// With `A = 0`, the input matrix integrates to `G·dt` and the noise to
    /// `Q·dt`.
    #[test]
    fn zero_dynamics_reduce_to_the_euler_result() {
        let dt = 0.005;
        let mut f = DMatrix::zeros(3, 3);
        let mut g = DMatrix::identity(3, 3);
        let mut q = DMatrix::identity(3, 3) * 0.04;
        let mut discretizer = SplitUpMatrixExponentialDiscretizer::new(3, 3);
        discretizer.discretize(&mut f, &mut g, &mut q, dt);

        for i in 0..3 {
            assert_abs_diff_eq!(f[(i, i)], 1.0, epsilon = 1e-12);
            assert_abs_diff_eq!(g[(i, i)], dt, epsilon = 1e-12);
            assert_abs_diff_eq!(q[(i, i)], 0.04 * dt, epsilon = 1e-12);
        }
    }

    /// A diagonal system is just independent scalar systems.
    #[test]
    fn diagonal_system_discretizes_per_axis() {
        let rates = [-0.2, -1.5, -4.0];
        let noise = [0.1, 0.5, 2.0];
        let dt = 0.01;

        let mut f = DMatrix::from_diagonal(&nalgebra::DVector::from_row_slice(&rates));
        let mut g = DMatrix::zeros(3, 0);
        let mut q = DMatrix::from_diagonal(&nalgebra::DVector::from_row_slice(&noise));
        let mut discretizer = SplitUpMatrixExponentialDiscretizer::new(3, 0);
        discretizer.discretize(&mut f, &mut g, &mut q, dt);

        for i in 0..3 {
            let a = rates[i];
            assert_abs_diff_eq!(f[(i, i)], (a * dt).exp(), epsilon = 1e-12);
            let q_exact = noise[i] * ((2.0 * a * dt).exp() - 1.0) / (2.0 * a);
            assert_abs_diff_eq!(q[(i, i)], q_exact, epsilon = 1e-12);
        }
        // cross terms stay zero
        assert_abs_diff_eq!(q[(0, 1)], 0.0, epsilon = 1e-14);
    }

    /// The double-integrator `ṗ = v`, `v̇ = w` has the classic closed-form
    /// discrete noise with the `dt³/3` position variance.
    #[test]
    fn double_integrator_noise_has_the_cubic_position_term() {
        let q_c = 0.9;
        let dt = 0.1;
        let mut f = DMatrix::from_row_slice(2, 2, &[0.0, 1.0, 0.0, 0.0]);
        let mut g = DMatrix::zeros(2, 0);
        let mut q = DMatrix::from_row_slice(2, 2, &[0.0, 0.0, 0.0, q_c]);
        let mut discretizer = SplitUpMatrixExponentialDiscretizer::new(2, 0);
        discretizer.discretize(&mut f, &mut g, &mut q, dt);

        assert_abs_diff_eq!(f[(0, 1)], dt, epsilon = 1e-12);
        assert_abs_diff_eq!(q[(0, 0)], q_c * dt.powi(3) / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(q[(0, 1)], q_c * dt.powi(2) / 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(q[(1, 1)], q_c * dt, epsilon = 1e-12);
    }
}
