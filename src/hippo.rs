//! Structured initialization of the diagonal state matrix.
//!
//! The state matrix of every block starts from the eigenvalues of the
//! normal part of the HiPPO-LegS matrix (HiPPO plus its rank-1 correction).
//! Input and output matrices are drawn at random and rotated into the
//! eigenbasis, so that the diagonal system starts out equivalent to the dense
//! structured one. All numerics here run on the host in `f64`; the results are
//! handed to the cell as an [`SsmParameters`] bundle.

use nalgebra::{DMatrix, DVector};
use num_complex::{Complex32, Complex64};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::config::{SsmConfig, SsmDimensions};
use crate::error::{Result, SsmError};

/// HiPPO-LegS matrix of size `n`.
pub fn make_hippo(n: usize) -> DMatrix<f64> {
    DMatrix::from_fn(n, n, |row, col| {
        let lower = if row >= col {
            ((2 * row + 1) as f64).sqrt() * ((2 * col + 1) as f64).sqrt()
        } else {
            0.0
        };
        let diagonal = if row == col { row as f64 } else { 0.0 };
        -(lower - diagonal)
    })
}

/// HiPPO-LegS matrix together with its rank-1 correction `P` and input vector `B`.
pub fn make_nplr_hippo(n: usize) -> (DMatrix<f64>, DVector<f64>, DVector<f64>) {
    let hippo = make_hippo(n);
    let p = DVector::from_fn(n, |i, _| (i as f64 + 0.5).sqrt());
    let b = DVector::from_fn(n, |i, _| (2.0 * i as f64 + 1.0).sqrt());
    (hippo, p, b)
}

/// Eigenstructure of one block.
#[derive(Debug, Clone)]
pub struct DplrBlock {
    /// Eigenvalues, sorted by ascending imaginary part.
    pub lambda: Vec<Complex64>,
    /// Unitary eigenvector basis; column `k` belongs to `lambda[k]`.
    pub basis: DMatrix<Complex64>,
}

/// Diagonalizes the normal matrix `S = A + P Pᵀ` built from HiPPO-LegS.
///
/// `S` is `-1/2·I` plus a skew-symmetric part `K`. The real parts of the
/// eigenvalues are the mean of `diag(S)`; the imaginary parts and the basis
/// come from the Hermitian matrix `-i·K`.
pub fn make_dplr_hippo(n: usize) -> Result<DplrBlock> {
    if n == 0 {
        return Err(SsmError::ZeroDimension("block_size"));
    }
    let (hippo, p, _b) = make_nplr_hippo(n);
    let normal = hippo + &p * p.transpose();

    let lambda_re = normal.diagonal().mean();
    let skew = (&normal - normal.transpose()) * 0.5;
    let hermitian = skew.map(|x| Complex64::new(0.0, -x));

    let eigen = hermitian.symmetric_eigen();
    if eigen.eigenvalues.len() != n || eigen.eigenvectors.ncols() != n {
        return Err(SsmError::Decomposition(format!(
            "expected {n} eigenpairs, got {}",
            eigen.eigenvalues.len()
        )));
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| eigen.eigenvalues[a].total_cmp(&eigen.eigenvalues[b]));

    let lambda = order
        .iter()
        .map(|&k| Complex64::new(lambda_re, eigen.eigenvalues[k]))
        .collect();
    let basis = DMatrix::from_fn(n, n, |row, col| eigen.eigenvectors[(row, order[col])]);

    Ok(DplrBlock { lambda, basis })
}

/// Host-side parameters of one SSM cell.
///
/// Matrices are row-major. The timestep entry is the raw parameter; the cell
/// applies `step_rescale * softplus(inv_dt)` to get the step size.
#[derive(Debug, Clone, PartialEq)]
pub struct SsmParameters {
    /// Continuous eigenvalues Λ, `[state_width]`.
    pub lambda: Vec<Complex32>,
    /// Input matrix B̃, `[state_width, d_inner]`.
    pub b_tilde: Vec<Complex32>,
    /// Output matrix C̃, `[d_inner, state_width]`.
    pub c_tilde: Vec<Complex32>,
    /// Feedthrough D, `[d_inner]`.
    pub d: Vec<f32>,
    /// Raw timestep parameter, `[state_width]`.
    pub inv_dt: Vec<f32>,
}

impl SsmParameters {
    pub fn state_width(&self) -> usize {
        self.lambda.len()
    }

    pub fn d_inner(&self) -> usize {
        self.d.len()
    }

    /// Checks that every buffer matches the given dimensions.
    pub fn validate(&self, dims: &SsmDimensions) -> Result<()> {
        let p = dims.state_width;
        let h = dims.d_inner;
        let checks = [
            ("eigenvalue count", p, self.lambda.len()),
            ("input matrix size", p * h, self.b_tilde.len()),
            ("output matrix size", h * p, self.c_tilde.len()),
            ("feedthrough size", h, self.d.len()),
            ("timestep count", p, self.inv_dt.len()),
        ];
        for (what, expected, actual) in checks {
            if expected != actual {
                return Err(SsmError::ShapeMismatch {
                    what,
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }
}

/// Samples a step size log-uniformly in `[dt_min, dt_max]`, floors it, and
/// returns the softplus pre-image.
fn sample_inv_dt(rng: &mut StdRng, config: &SsmConfig) -> f64 {
    let (log_min, log_max) = (config.dt_min.ln(), config.dt_max.ln());
    let u: f64 = rng.random();
    let dt = (u * (log_max - log_min) + log_min)
        .exp()
        .max(config.dt_init_floor);
    inverse_softplus(dt)
}

/// Inverse of `softplus(x) = ln(1 + eˣ)` for `y > 0`.
pub fn inverse_softplus(y: f64) -> f64 {
    y + (-(-y).exp_m1()).ln()
}

/// Builds the initial parameters of a cell.
///
/// Every block replica shares the same eigenstructure; B̃ and C̃ are drawn
/// once for the full state and rotated block by block, which is the same as
/// rotating with the block-diagonal basis.
pub fn init_parameters(config: &SsmConfig, dims: &SsmDimensions) -> Result<SsmParameters> {
    let block = make_dplr_hippo(dims.block_size)?;
    let n = dims.block_size;
    let keep = dims.effective_block_size;
    let h = dims.d_inner;
    let p = dims.state_width;

    let basis = block.basis.columns(0, keep).into_owned();
    let basis_inv = basis.adjoint();

    let mut rng = StdRng::seed_from_u64(config.seed);

    let b_scale = (1.0 / dims.d_state as f64).sqrt();
    let b_init = DMatrix::from_fn(dims.d_state, h, |_, _| {
        Complex64::new(rng.sample::<f64, _>(StandardNormal) * b_scale, 0.0)
    });

    // Standard complex normal: each component has variance 1/2.
    let c_scale = (1.0 / h as f64).sqrt() * std::f64::consts::FRAC_1_SQRT_2;
    let c_init = DMatrix::from_fn(h, dims.d_state, |_, _| {
        let re: f64 = rng.sample(StandardNormal);
        let im: f64 = rng.sample(StandardNormal);
        Complex64::new(re * c_scale, im * c_scale)
    });

    let d: Vec<f32> = (0..h)
        .map(|_| rng.sample::<f64, _>(StandardNormal) as f32)
        .collect();
    let inv_dt: Vec<f32> = (0..p)
        .map(|_| sample_inv_dt(&mut rng, config) as f32)
        .collect();

    let mut lambda = Vec::with_capacity(p);
    let mut b_tilde = DMatrix::<Complex64>::zeros(p, h);
    let mut c_tilde = DMatrix::<Complex64>::zeros(h, p);
    for replica in 0..dims.blocks {
        lambda.extend(block.lambda[..keep].iter().map(|z| to_c32(*z)));

        let rotated_b = &basis_inv * b_init.rows(replica * n, n);
        b_tilde
            .view_mut((replica * keep, 0), (keep, h))
            .copy_from(&rotated_b);

        let rotated_c = c_init.columns(replica * n, n) * &basis;
        c_tilde
            .view_mut((0, replica * keep), (h, keep))
            .copy_from(&rotated_c);
    }

    let params = SsmParameters {
        lambda,
        b_tilde: row_major(&b_tilde),
        c_tilde: row_major(&c_tilde),
        d,
        inv_dt,
    };
    params.validate(dims)?;
    Ok(params)
}

fn to_c32(z: Complex64) -> Complex32 {
    Complex32::new(z.re as f32, z.im as f32)
}

fn row_major(matrix: &DMatrix<Complex64>) -> Vec<Complex32> {
    let mut out = Vec::with_capacity(matrix.len());
    for row in matrix.row_iter() {
        out.extend(row.iter().map(|z| to_c32(*z)));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hippo_entries() {
        let a = make_hippo(3);
        assert!((a[(0, 0)] + 1.0).abs() < 1e-12);
        assert!((a[(1, 1)] + 2.0).abs() < 1e-12);
        assert!((a[(2, 2)] + 3.0).abs() < 1e-12);
        assert_eq!(a[(0, 1)], 0.0);
        assert!((a[(1, 0)] + 3f64.sqrt()).abs() < 1e-12);
        assert!((a[(2, 0)] + 5f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn dplr_diagonalizes_normal_part() {
        let n = 6;
        let block = make_dplr_hippo(n).unwrap();
        let (hippo, p, _) = make_nplr_hippo(n);
        let normal = (hippo + &p * p.transpose()).map(|x| Complex64::new(x, 0.0));

        for z in &block.lambda {
            assert!((z.re + 0.5).abs() < 1e-12);
        }
        for pair in block.lambda.windows(2) {
            assert!(pair[0].im <= pair[1].im);
        }

        let v = &block.basis;
        let identity = v.adjoint() * v;
        for i in 0..n {
            for j in 0..n {
                let want = if i == j { 1.0 } else { 0.0 };
                assert!((identity[(i, j)] - Complex64::new(want, 0.0)).norm() < 1e-9);
            }
        }

        let diag = DMatrix::from_diagonal(&DVector::from_vec(block.lambda.clone()));
        let rebuilt = v * diag * v.adjoint();
        assert!((rebuilt - normal).norm() < 1e-8);
    }

    #[test]
    fn spectrum_is_conjugate_symmetric() {
        let block = make_dplr_hippo(8).unwrap();
        let ims: Vec<f64> = block.lambda.iter().map(|z| z.im).collect();
        for k in 0..4 {
            assert!(ims[k] < 0.0);
            assert!((ims[k] + ims[7 - k]).abs() < 1e-9);
        }
    }

    #[test]
    fn parameters_have_resolved_shapes() {
        let config = SsmConfig::new(8, 3).with_blocks(2);
        let dims = config.dimensions().unwrap();
        let params = init_parameters(&config, &dims).unwrap();
        assert_eq!(params.state_width(), 8);
        assert_eq!(params.b_tilde.len(), 8 * 3);
        assert_eq!(params.c_tilde.len(), 3 * 8);
        assert_eq!(params.lambda[0], params.lambda[4]);

        let config = config.with_conj_sym(true);
        let dims = config.dimensions().unwrap();
        let params = init_parameters(&config, &dims).unwrap();
        assert_eq!(params.state_width(), 4);
        assert_eq!(params.inv_dt.len(), 4);
        assert!(params.lambda.iter().all(|z| z.im < 0.0));
    }

    #[test]
    fn timesteps_invert_softplus_within_range() {
        let config = SsmConfig::new(16, 4).with_blocks(4);
        let dims = config.dimensions().unwrap();
        let params = init_parameters(&config, &dims).unwrap();
        for raw in params.inv_dt {
            let dt = (raw as f64).exp().ln_1p();
            assert!(dt >= config.dt_min * 0.999 && dt <= config.dt_max * 1.001, "dt={dt}");
        }
    }

    #[test]
    fn floor_applies_to_small_steps() {
        let config = SsmConfig::new(8, 2)
            .with_dt_min(1e-6)
            .with_dt_max(1e-5)
            .with_dt_init_floor(1e-3);
        let dims = config.dimensions().unwrap();
        let params = init_parameters(&config, &dims).unwrap();
        for raw in params.inv_dt {
            let dt = (raw as f64).exp().ln_1p();
            assert!((dt - 1e-3).abs() < 1e-6);
        }
    }

    #[test]
    fn same_seed_same_parameters() {
        let config = SsmConfig::new(8, 4).with_blocks(2).with_seed(11);
        let dims = config.dimensions().unwrap();
        let a = init_parameters(&config, &dims).unwrap();
        let b = init_parameters(&config, &dims).unwrap();
        assert_eq!(a, b);
        let other = init_parameters(&config.clone().with_seed(12), &dims).unwrap();
        assert_ne!(a, other);
    }

    #[test]
    fn inverse_softplus_round_trips() {
        for y in [1e-4, 1e-2, 0.5, 3.0] {
            let x = inverse_softplus(y);
            assert!((x.exp().ln_1p() - y).abs() < 1e-9 * y.max(1.0));
        }
    }
}
