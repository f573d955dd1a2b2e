//! Complex arithmetic over pairs of real burn tensors.
//!
//! Burn has no complex element type, so a complex tensor is carried as its
//! real and imaginary parts with identical shapes. Binary operations follow
//! burn's broadcasting rules (size-1 dimensions expand).

use std::ops::Range;

use burn::prelude::*;
use burn::tensor::ElementConversion;
use num_complex::Complex32;

use crate::error::{Result, SsmError};

#[derive(Clone, Debug)]
pub struct ComplexTensor<B: Backend, const D: usize> {
    pub re: Tensor<B, D>,
    pub im: Tensor<B, D>,
}

impl<B: Backend, const D: usize> ComplexTensor<B, D> {
    pub fn new(re: Tensor<B, D>, im: Tensor<B, D>) -> Self {
        debug_assert_eq!(re.dims(), im.dims());
        Self { re, im }
    }

    pub fn zeros(shape: [usize; D], device: &B::Device) -> Self {
        Self {
            re: Tensor::zeros(shape, device),
            im: Tensor::zeros(shape, device),
        }
    }

    /// Uploads host values laid out row-major in `shape`.
    pub fn from_host(values: &[Complex32], shape: [usize; D], device: &B::Device) -> Self {
        let re: Vec<f32> = values.iter().map(|z| z.re).collect();
        let im: Vec<f32> = values.iter().map(|z| z.im).collect();
        Self {
            re: Tensor::from_data(TensorData::new(re, shape), device),
            im: Tensor::from_data(TensorData::new(im, shape), device),
        }
    }

    /// Reads the values back to the host, row-major.
    pub fn to_host(&self) -> Result<Vec<Complex32>> {
        let re = read_back(&self.re)?;
        let im = read_back(&self.im)?;
        Ok(re
            .into_iter()
            .zip(im)
            .map(|(re, im)| Complex32::new(re, im))
            .collect())
    }

    pub fn dims(&self) -> [usize; D] {
        self.re.dims()
    }

    pub fn add(self, rhs: Self) -> Self {
        Self {
            re: self.re + rhs.re,
            im: self.im + rhs.im,
        }
    }

    pub fn mul(self, rhs: Self) -> Self {
        let re = self.re.clone() * rhs.re.clone() - self.im.clone() * rhs.im.clone();
        let im = self.re * rhs.im + self.im * rhs.re;
        Self { re, im }
    }

    pub fn neg(self) -> Self {
        Self {
            re: self.re.neg(),
            im: self.im.neg(),
        }
    }

    /// Multiplies by a real tensor.
    pub fn scale(self, factor: Tensor<B, D>) -> Self {
        Self {
            re: self.re * factor.clone(),
            im: self.im * factor,
        }
    }

    pub fn mul_scalar(self, factor: f64) -> Self {
        Self {
            re: self.re.mul_scalar(factor),
            im: self.im.mul_scalar(factor),
        }
    }

    /// Adds a real scalar (only the real part moves).
    pub fn add_real_scalar(self, value: f64) -> Self {
        Self {
            re: self.re.add_scalar(value),
            im: self.im,
        }
    }

    /// Elementwise 1/z. Division by an exact zero yields non-finite values.
    pub fn recip(self) -> Self {
        let norm = self.re.clone() * self.re.clone() + self.im.clone() * self.im.clone();
        Self {
            re: self.re / norm.clone(),
            im: self.im.neg() / norm,
        }
    }

    pub fn slice(self, ranges: [Range<usize>; D]) -> Self {
        Self {
            re: self.re.slice(ranges.clone()),
            im: self.im.slice(ranges),
        }
    }

    pub fn cat(items: Vec<Self>, dim: usize) -> Self {
        let (re, im): (Vec<_>, Vec<_>) = items.into_iter().map(|z| (z.re, z.im)).unzip();
        Self {
            re: Tensor::cat(re, dim),
            im: Tensor::cat(im, dim),
        }
    }

    pub fn reshape<const D2: usize>(self, shape: [usize; D2]) -> ComplexTensor<B, D2> {
        ComplexTensor {
            re: self.re.reshape(shape),
            im: self.im.reshape(shape),
        }
    }

    pub fn repeat(self, sizes: &[usize]) -> Self {
        Self {
            re: self.re.repeat(sizes),
            im: self.im.repeat(sizes),
        }
    }

    pub fn unsqueeze<const D2: usize>(self) -> ComplexTensor<B, D2> {
        ComplexTensor {
            re: self.re.unsqueeze(),
            im: self.im.unsqueeze(),
        }
    }

    pub fn unsqueeze_dim<const D2: usize>(self, dim: usize) -> ComplexTensor<B, D2> {
        ComplexTensor {
            re: self.re.unsqueeze_dim(dim),
            im: self.im.unsqueeze_dim(dim),
        }
    }

    /// Swaps the last two dimensions without conjugating.
    pub fn transpose(self) -> Self {
        Self {
            re: self.re.transpose(),
            im: self.im.transpose(),
        }
    }

    pub fn matmul(self, rhs: Self) -> Self {
        let re = self.re.clone().matmul(rhs.re.clone()) - self.im.clone().matmul(rhs.im.clone());
        let im = self.re.matmul(rhs.im) + self.im.matmul(rhs.re);
        Self { re, im }
    }

    /// `lhs @ rhs` for a real left operand.
    pub fn real_matmul(lhs: Tensor<B, D>, rhs: Self) -> Self {
        Self {
            re: lhs.clone().matmul(rhs.re),
            im: lhs.matmul(rhs.im),
        }
    }

    /// Real part of `self @ rhs`, without computing the imaginary part.
    pub fn matmul_real_part(self, rhs: Self) -> Tensor<B, D> {
        self.re.matmul(rhs.re) - self.im.matmul(rhs.im)
    }

    pub fn detach(self) -> Self {
        Self {
            re: self.re.detach(),
            im: self.im.detach(),
        }
    }

    pub fn is_finite(&self) -> bool {
        all_finite(&self.re) && all_finite(&self.im)
    }
}

/// True when no element is NaN or infinite.
pub fn all_finite<B: Backend, const D: usize>(tensor: &Tensor<B, D>) -> bool {
    // x - x is 0 for finite x and NaN otherwise, so the sum cannot overflow.
    let residue: f64 = (tensor.clone() - tensor.clone())
        .sum()
        .into_scalar()
        .elem();
    residue.is_finite()
}

/// Copies a tensor to the host as `f32`, in row-major order.
pub fn read_back<B: Backend, const D: usize>(tensor: &Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .clone()
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|err| SsmError::Readback(format!("{err:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Backend as TestBackend, init_device};

    fn host(z: &ComplexTensor<TestBackend, 1>) -> Vec<Complex32> {
        z.to_host().unwrap()
    }

    #[test]
    fn multiplies_like_complex_numbers() {
        let device = init_device();
        let a = ComplexTensor::<TestBackend, 1>::from_host(
            &[Complex32::new(1.0, 2.0), Complex32::new(0.5, -1.0)],
            [2],
            &device,
        );
        let b = ComplexTensor::<TestBackend, 1>::from_host(
            &[Complex32::new(3.0, -1.0), Complex32::new(2.0, 2.0)],
            [2],
            &device,
        );
        let product = host(&a.mul(b));
        assert_eq!(product[0], Complex32::new(5.0, 5.0));
        assert_eq!(product[1], Complex32::new(3.0, -1.0));
    }

    #[test]
    fn reciprocal_inverts() {
        let device = init_device();
        let z = ComplexTensor::<TestBackend, 1>::from_host(
            &[Complex32::new(3.0, 4.0), Complex32::new(-0.5, 0.25)],
            [2],
            &device,
        );
        let one = host(&z.clone().mul(z.recip()));
        for value in one {
            assert!((value.re - 1.0).abs() < 1e-6);
            assert!(value.im.abs() < 1e-6);
        }
    }

    #[test]
    fn matmul_matches_host_product() {
        let device = init_device();
        let lhs = [Complex32::new(1.0, 1.0), Complex32::new(0.0, -2.0)];
        let rhs = [
            Complex32::new(2.0, 0.0),
            Complex32::new(0.0, 1.0),
            Complex32::new(1.0, 1.0),
            Complex32::new(-1.0, 0.0),
        ];
        let a = ComplexTensor::<TestBackend, 2>::from_host(&lhs, [1, 2], &device);
        let b = ComplexTensor::<TestBackend, 2>::from_host(&rhs, [2, 2], &device);
        let out = a.matmul(b).to_host().unwrap();
        let expected = [
            lhs[0] * rhs[0] + lhs[1] * rhs[2],
            lhs[0] * rhs[1] + lhs[1] * rhs[3],
        ];
        for (got, want) in out.iter().zip(expected) {
            assert!((got - want).norm() < 1e-6);
        }
    }

    #[test]
    fn detects_non_finite_values() {
        let device = init_device();
        let finite = Tensor::<TestBackend, 1>::from_floats([1.0, -2.0, 3.5e30], &device);
        assert!(all_finite(&finite));
        let nan = Tensor::<TestBackend, 1>::from_floats([1.0, f32::NAN], &device);
        assert!(!all_finite(&nan));
        let inf = Tensor::<TestBackend, 1>::from_floats([f32::INFINITY, 0.0], &device);
        assert!(!all_finite(&inf));
    }
}
