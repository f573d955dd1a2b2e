use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::relu;

use crate::error::{Result, SsmError};
use crate::residual::FilmModulation;

/// Small MLP turning a control vector into a [`FilmModulation`].
///
/// `c_dim → hidden[0] → … → hidden[n-1] → 2·d_model`, ReLU between layers;
/// the last output is split in half into γ and β.
#[derive(Module, Debug)]
pub struct FilmGenerator<B: Backend> {
    layers: Vec<Linear<B>>,
    c_dim: usize,
    d_model: usize,
}

impl<B: Backend> FilmGenerator<B> {
    pub fn new(c_dim: usize, hidden: &[usize], d_model: usize, device: &B::Device) -> Result<Self> {
        if c_dim == 0 {
            return Err(SsmError::ZeroDimension("c_dim"));
        }
        if d_model == 0 {
            return Err(SsmError::ZeroDimension("d_model"));
        }
        if hidden.contains(&0) {
            return Err(SsmError::ZeroDimension("film_hidden"));
        }

        let mut widths = Vec::with_capacity(hidden.len() + 2);
        widths.push(c_dim);
        widths.extend_from_slice(hidden);
        widths.push(2 * d_model);

        let layers = widths
            .windows(2)
            .map(|pair| LinearConfig::new(pair[0], pair[1]).init(device))
            .collect();

        Ok(Self {
            layers,
            c_dim,
            d_model,
        })
    }

    pub fn c_dim(&self) -> usize {
        self.c_dim
    }

    /// # Shapes
    ///   - Input [batch, c_dim]
    ///   - Output γ and β, each [batch, d_model]
    pub fn forward(&self, control: Tensor<B, 2>) -> Result<FilmModulation<B>> {
        let [batch, width] = control.dims();
        if width != self.c_dim {
            return Err(SsmError::ShapeMismatch {
                what: "control width",
                expected: self.c_dim,
                actual: width,
            });
        }

        let last = self.layers.len() - 1;
        let mut x = control;
        for (i, layer) in self.layers.iter().enumerate() {
            x = layer.forward(x);
            if i < last {
                x = relu(x);
            }
        }

        let gamma = x.clone().slice([0..batch, 0..self.d_model]);
        let beta = x.slice([0..batch, self.d_model..2 * self.d_model]);
        FilmModulation::new(gamma, beta)
    }
}
