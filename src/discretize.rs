use burn::prelude::*;

use crate::complex::ComplexTensor;

/// Discrete-time coefficients of a diagonal system.
#[derive(Clone, Debug)]
pub struct Discretized<B: Backend> {
    /// Per-state transition dA, `[P]`.
    pub transition: ComplexTensor<B, 1>,
    /// Discrete input matrix dB, `[P, H]`.
    pub input: ComplexTensor<B, 2>,
}

/// Bilinear (Tustin) discretization, applied to every state independently.
///
/// ```text
/// BL = 1 / (1 - Δ/2·Λ)
/// dA = BL · (1 + Δ/2·Λ)
/// dB = (BL · Δ)[:, None] · B̃
/// ```
///
/// `delta` must be positive. A state with `Δ/2·Λ == 1` sits on the pole of the
/// transform and produces non-finite coefficients; they are passed through.
pub fn discretize_bilinear<B: Backend>(
    lambda: ComplexTensor<B, 1>,
    b_tilde: ComplexTensor<B, 2>,
    delta: Tensor<B, 1>,
) -> Discretized<B> {
    let half_step = lambda.scale(delta.clone().mul_scalar(0.5));
    let bl = half_step.clone().neg().add_real_scalar(1.0).recip();
    let transition = bl.clone().mul(half_step.add_real_scalar(1.0));
    let input = b_tilde.mul(bl.scale(delta).unsqueeze_dim(1));

    Discretized { transition, input }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Backend as TestBackend, init_device};
    use num_complex::Complex32;

    #[test]
    fn matches_scalar_formula() {
        let device = init_device();
        let lambda_host = [Complex32::new(-0.5, 2.0), Complex32::new(-0.5, -7.0)];
        let b_host = [
            Complex32::new(0.3, 0.1),
            Complex32::new(-1.0, 0.5),
            Complex32::new(0.0, 2.0),
            Complex32::new(1.5, 0.0),
        ];
        let delta_host = [0.01f32, 0.2];

        let out = discretize_bilinear(
            ComplexTensor::<TestBackend, 1>::from_host(&lambda_host, [2], &device),
            ComplexTensor::<TestBackend, 2>::from_host(&b_host, [2, 2], &device),
            Tensor::from_floats(delta_host, &device),
        );
        let transition = out.transition.to_host().unwrap();
        let input = out.input.to_host().unwrap();

        for state in 0..2 {
            let dt = delta_host[state];
            let bl = Complex32::new(1.0, 0.0) / (Complex32::new(1.0, 0.0) - lambda_host[state] * (dt / 2.0));
            let da = bl * (Complex32::new(1.0, 0.0) + lambda_host[state] * (dt / 2.0));
            assert!((transition[state] - da).norm() < 1e-5);
            for col in 0..2 {
                let db = bl * dt * b_host[state * 2 + col];
                assert!((input[state * 2 + col] - db).norm() < 1e-5);
            }
        }
    }

    #[test]
    fn stable_poles_map_inside_unit_circle() {
        let device = init_device();
        let lambda = ComplexTensor::<TestBackend, 1>::from_host(
            &[Complex32::new(-0.5, 30.0), Complex32::new(-2.0, 0.0)],
            [2],
            &device,
        );
        let b = ComplexTensor::<TestBackend, 2>::zeros([2, 1], &device);
        let out = discretize_bilinear(lambda, b, Tensor::from_floats([0.05, 0.05], &device));
        for z in out.transition.to_host().unwrap() {
            assert!(z.norm() < 1.0);
        }
    }
}
