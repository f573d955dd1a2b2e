//! Associative scan of the linear recurrence `h_t = a_t·h_{t-1} + b_t`.
//!
//! Each time step is a pair `(a_t, b_t)`. Pairs compose with
//!
//! ```text
//! combine((a1, b1), (a2, b2)) = (a2·a1, a2·b1 + b2)
//! ```
//!
//! which is associative, so the inclusive prefix over the time axis can be
//! evaluated in `ceil(log2 L)` rounds of elementwise tensor ops instead of `L`
//! sequential steps. The cumulative `b` of step `t` is the hidden state `h_t`.

use std::ops::Range;

use burn::prelude::*;

use crate::complex::ComplexTensor;

/// One scan element, or a cumulative run of them.
///
/// Tensors are `[batch, time, state]`; `transition` may have a size-1 batch
/// dimension and broadcasts against `state`.
#[derive(Clone, Debug)]
pub struct ScanPair<B: Backend, const D: usize> {
    pub transition: ComplexTensor<B, D>,
    pub state: ComplexTensor<B, D>,
}

impl<B: Backend, const D: usize> ScanPair<B, D> {
    pub fn new(transition: ComplexTensor<B, D>, state: ComplexTensor<B, D>) -> Self {
        Self { transition, state }
    }

    /// Composes `self` (earlier) with `later`.
    pub fn combine(self, later: Self) -> Self {
        let transition = later.transition.clone().mul(self.transition);
        let state = later.transition.mul(self.state).add(later.state);
        Self { transition, state }
    }
}

impl<B: Backend> ScanPair<B, 3> {
    fn time_slice(self, steps: Range<usize>) -> Self {
        let [batch, _, width] = self.state.dims();
        let [a_batch, _, a_width] = self.transition.dims();
        Self {
            transition: self
                .transition
                .slice([0..a_batch, steps.clone(), 0..a_width]),
            state: self.state.slice([0..batch, steps, 0..width]),
        }
    }

    fn cat_time(parts: Vec<Self>) -> Self {
        let (transitions, states): (Vec<_>, Vec<_>) =
            parts.into_iter().map(|p| (p.transition, p.state)).unzip();
        Self {
            transition: ComplexTensor::cat(transitions, 1),
            state: ComplexTensor::cat(states, 1),
        }
    }

    pub fn len(&self) -> usize {
        self.state.dims()[1]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Number of combine rounds [`associative_scan`] performs for `len` steps.
pub fn scan_depth(len: usize) -> usize {
    let mut rounds = 0;
    let mut offset = 1;
    while offset < len {
        offset *= 2;
        rounds += 1;
    }
    rounds
}

/// Inclusive prefix scan along the time axis by recursive doubling.
///
/// Round `k` combines every step `t >= 2^k` with the cumulative value of step
/// `t - 2^k`, always as `combine(earlier, later)`. The sequence of rounds only
/// depends on the length, so equal inputs give bit-identical outputs.
///
/// Both tensors must share the time length; `transition` must already be
/// expanded along time.
pub fn associative_scan<B: Backend>(elements: ScanPair<B, 3>) -> ScanPair<B, 3> {
    let len = elements.len();
    let mut scanned = elements;
    let mut offset = 1;
    while offset < len {
        let earlier = scanned.clone().time_slice(0..len - offset);
        let later = scanned.clone().time_slice(offset..len);
        let head = scanned.time_slice(0..offset);
        scanned = ScanPair::cat_time(vec![head, earlier.combine(later)]);
        offset *= 2;
    }
    scanned
}

/// Left-to-right fold, one combine per step. Reference for [`associative_scan`].
pub fn sequential_scan<B: Backend>(elements: ScanPair<B, 3>) -> ScanPair<B, 3> {
    let len = elements.len();
    if len == 0 {
        return elements;
    }
    let mut acc = elements.clone().time_slice(0..1);
    let mut steps = Vec::with_capacity(len);
    steps.push(acc.clone());
    for t in 1..len {
        acc = acc.combine(elements.clone().time_slice(t..t + 1));
        steps.push(acc.clone());
    }
    ScanPair::cat_time(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Backend as TestBackend, init_device};
    use num_complex::Complex32;

    fn pair(
        a: &[Complex32],
        b: &[Complex32],
        len: usize,
    ) -> ScanPair<TestBackend, 3> {
        let device = init_device();
        ScanPair::new(
            ComplexTensor::from_host(a, [1, len, 1], &device),
            ComplexTensor::from_host(b, [1, len, 1], &device),
        )
    }

    #[test]
    fn depth_is_logarithmic() {
        assert_eq!(scan_depth(0), 0);
        assert_eq!(scan_depth(1), 0);
        assert_eq!(scan_depth(2), 1);
        assert_eq!(scan_depth(5), 3);
        assert_eq!(scan_depth(64), 6);
        assert_eq!(scan_depth(4096), 12);
    }

    #[test]
    fn scalar_recurrence() {
        // a = 0.5, b = 1 => h = 1, 1.5, 1.75, 1.875, 1.9375
        let a = vec![Complex32::new(0.5, 0.0); 5];
        let b = vec![Complex32::new(1.0, 0.0); 5];
        let out = associative_scan(pair(&a, &b, 5)).state.to_host().unwrap();
        let expected = [1.0, 1.5, 1.75, 1.875, 1.9375];
        for (got, want) in out.iter().zip(expected) {
            assert!((got.re - want).abs() < 1e-6);
            assert!(got.im.abs() < 1e-6);
        }
    }

    #[test]
    fn rotation_accumulates_phase() {
        let i = Complex32::new(0.0, 1.0);
        let a = vec![i; 4];
        let mut b = vec![Complex32::new(0.0, 0.0); 4];
        b[0] = Complex32::new(1.0, 0.0);
        let out = associative_scan(pair(&a, &b, 4)).state.to_host().unwrap();
        let expected = [Complex32::new(1.0, 0.0), i, -Complex32::new(1.0, 0.0), -i];
        for (got, want) in out.iter().zip(expected) {
            assert!((got - want).norm() < 1e-6);
        }
    }

    #[test]
    fn cumulative_transition_is_product() {
        let a: Vec<Complex32> = (1..=6).map(|k| Complex32::new(k as f32 * 0.1, 0.0)).collect();
        let b = vec![Complex32::new(0.0, 0.0); 6];
        let out = associative_scan(pair(&a, &b, 6)).transition.to_host().unwrap();
        let mut product = Complex32::new(1.0, 0.0);
        for (t, value) in out.iter().enumerate() {
            product *= a[t];
            assert!((value - product).norm() < 1e-6);
        }
    }

    #[test]
    fn single_step_is_identity() {
        let a = [Complex32::new(0.9, 0.1)];
        let b = [Complex32::new(0.3, -0.2)];
        let scanned = associative_scan(pair(&a, &b, 1));
        assert_eq!(scanned.state.to_host().unwrap(), b.to_vec());
        let folded = sequential_scan(pair(&a, &b, 1));
        assert_eq!(folded.state.to_host().unwrap(), b.to_vec());
    }
}
