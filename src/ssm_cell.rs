use burn::module::Param;
use burn::prelude::*;
use burn::tensor::activation::softplus;

use crate::complex::{ComplexTensor, all_finite, read_back};
use crate::config::{SsmConfig, StabilityMode, check_rescale};
use crate::discretize::{Discretized, discretize_bilinear};
use crate::error::{Result, SsmError};
use crate::hippo::{SsmParameters, init_parameters};
use crate::parallel_scan::{ScanPair, associative_scan};
use crate::transform::SequenceTransform;

/// Hidden state carried by an [`SsmCell`] across calls.
///
/// A sequence starts `Cold`; every forward call returns a `Warm` state that
/// must be passed to the call processing the next chunk of the same
/// sequence. Chunks have to arrive in temporal order.
#[derive(Clone, Debug)]
pub enum SsmState<B: Backend> {
    Cold,
    /// Complex hidden state, `[batch, state_width]`.
    Warm(ComplexTensor<B, 2>),
}

impl<B: Backend> SsmState<B> {
    pub fn is_warm(&self) -> bool {
        matches!(self, Self::Warm(_))
    }

    pub fn hidden(&self) -> Option<&ComplexTensor<B, 2>> {
        match self {
            Self::Cold => None,
            Self::Warm(hidden) => Some(hidden),
        }
    }

    /// Forgets the carried history.
    pub fn reset(self) -> Self {
        Self::Cold
    }
}

impl<B: Backend> Default for SsmState<B> {
    fn default() -> Self {
        Self::Cold
    }
}

/// Diagonal complex state-space layer
///
/// ```text
/// h_t = dA·h_{t-1} + dB·x_t
/// y_t = scale·Re(C̃·h_t) + D·x_t
/// ```
///
/// with `(dA, dB)` recomputed on every call from Λ, B̃ and the step sizes
/// `Δ = step_rescale·softplus(inv_dt)`.
#[derive(Module, Debug)]
pub struct SsmCell<B: Backend> {
    /// Re(Λ), or log(-Re(Λ)) when `left_half_plane` is set.
    lambda_re: Param<Tensor<B, 1>>,
    lambda_im: Param<Tensor<B, 1>>,
    /// B̃, `[state_width, d_inner]`.
    b_re: Param<Tensor<B, 2>>,
    b_im: Param<Tensor<B, 2>>,
    /// C̃, `[d_inner, state_width]`.
    c_re: Param<Tensor<B, 2>>,
    c_im: Param<Tensor<B, 2>>,
    d: Param<Tensor<B, 1>>,
    inv_dt: Param<Tensor<B, 1>>,
    step_rescale: f64,
    output_scale: f64,
    left_half_plane: bool,
    check_finite: bool,
}

impl SsmConfig {
    /// Builds a cell with the structured initialization.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<SsmCell<B>> {
        let dims = self.dimensions()?;
        let params = init_parameters(self, &dims)?;
        log::info!(
            "ssm cell: {} states ({} blocks x {}), {} channels, {:?}, {:?}",
            dims.state_width,
            dims.blocks,
            dims.effective_block_size,
            dims.d_inner,
            dims.layout,
            self.stability
        );
        SsmCell::from_parameters(&params, self, device)
    }
}

impl<B: Backend> SsmCell<B> {
    /// Builds a cell from explicit parameter values.
    pub fn from_parameters(
        params: &SsmParameters,
        config: &SsmConfig,
        device: &B::Device,
    ) -> Result<Self> {
        let dims = config.dimensions()?;
        params.validate(&dims)?;
        let p = dims.state_width;
        let h = dims.d_inner;

        let stored_re = match config.stability {
            StabilityMode::Unconstrained => {
                log::debug!("Re(Λ) is stored unconstrained");
                params.lambda.iter().map(|z| z.re).collect::<Vec<_>>()
            }
            StabilityMode::LeftHalfPlane => params
                .lambda
                .iter()
                .enumerate()
                .map(|(index, z)| {
                    if z.re < 0.0 {
                        Ok((-z.re).ln())
                    } else {
                        Err(SsmError::UnstableEigenvalue {
                            index,
                            real: z.re,
                        })
                    }
                })
                .collect::<Result<Vec<_>>>()?,
        };
        let lambda_im: Vec<f32> = params.lambda.iter().map(|z| z.im).collect();
        let b = ComplexTensor::<B, 2>::from_host(&params.b_tilde, [p, h], device);
        let c = ComplexTensor::<B, 2>::from_host(&params.c_tilde, [h, p], device);

        Ok(Self {
            lambda_re: param(Tensor::from_data(TensorData::new(stored_re, [p]), device)),
            lambda_im: param(Tensor::from_data(TensorData::new(lambda_im, [p]), device)),
            b_re: param(b.re),
            b_im: param(b.im),
            c_re: param(c.re),
            c_im: param(c.im),
            d: param(Tensor::from_data(TensorData::new(params.d.clone(), [h]), device)),
            inv_dt: param(Tensor::from_data(
                TensorData::new(params.inv_dt.clone(), [p]),
                device,
            )),
            step_rescale: config.step_rescale,
            output_scale: dims.layout.output_scale(),
            left_half_plane: config.stability == StabilityMode::LeftHalfPlane,
            check_finite: config.check_finite,
        })
    }

    /// Number of complex states carried.
    pub fn state_width(&self) -> usize {
        self.lambda_im.val().dims()[0]
    }

    /// Channel width of inputs and outputs.
    pub fn d_inner(&self) -> usize {
        self.d.val().dims()[0]
    }

    pub fn step_rescale(&self) -> f64 {
        self.step_rescale
    }

    /// Rescales every step size, e.g. to run a model at another sample rate.
    pub fn change_scale(&mut self, step_rescale: f64) -> Result<()> {
        if let Err(err) = check_rescale(step_rescale) {
            log::warn!("rejected step rescale {step_rescale}");
            return Err(err);
        }
        self.step_rescale = step_rescale;
        Ok(())
    }

    /// Continuous eigenvalues Λ.
    pub fn lambda(&self) -> ComplexTensor<B, 1> {
        let re = if self.left_half_plane {
            self.lambda_re.val().exp().neg()
        } else {
            self.lambda_re.val()
        };
        ComplexTensor::new(re, self.lambda_im.val())
    }

    pub fn b_tilde(&self) -> ComplexTensor<B, 2> {
        ComplexTensor::new(self.b_re.val(), self.b_im.val())
    }

    pub fn c_tilde(&self) -> ComplexTensor<B, 2> {
        ComplexTensor::new(self.c_re.val(), self.c_im.val())
    }

    /// Step sizes Δ, one per state.
    pub fn step_sizes(&self) -> Tensor<B, 1> {
        softplus(self.inv_dt.val(), 1.0).mul_scalar(self.step_rescale)
    }

    pub fn discretize(&self) -> Discretized<B> {
        discretize_bilinear(self.lambda(), self.b_tilde(), self.step_sizes())
    }

    /// Reads the current parameter values back to the host.
    pub fn parameters(&self) -> Result<SsmParameters> {
        Ok(SsmParameters {
            lambda: self.lambda().to_host()?,
            b_tilde: self.b_tilde().to_host()?,
            c_tilde: self.c_tilde().to_host()?,
            d: read_back(&self.d.val())?,
            inv_dt: read_back(&self.inv_dt.val())?,
        })
    }

    fn check_hidden(&self, hidden: &ComplexTensor<B, 2>, batch: usize) -> Result<()> {
        let [state_batch, width] = hidden.dims();
        if state_batch != batch {
            return Err(SsmError::BatchMismatch {
                expected: state_batch,
                actual: batch,
            });
        }
        if width != self.state_width() {
            return Err(SsmError::ShapeMismatch {
                what: "carried state width",
                expected: self.state_width(),
                actual: width,
            });
        }
        Ok(())
    }

    fn check_width(&self, width: usize) -> Result<()> {
        if width != self.d_inner() {
            return Err(SsmError::ShapeMismatch {
                what: "input width",
                expected: self.d_inner(),
                actual: width,
            });
        }
        Ok(())
    }

    fn check_outputs(&self, output: &Tensor<B, 3>, hidden: &ComplexTensor<B, 2>) -> Result<()> {
        if !self.check_finite {
            return Ok(());
        }
        if !all_finite(output) {
            return Err(SsmError::NonFinite {
                stage: "ssm output",
            });
        }
        if !hidden.is_finite() {
            return Err(SsmError::NonFinite { stage: "ssm state" });
        }
        Ok(())
    }

    /// `state` is consumed even when the call fails; clone it first to retry.
    ///
    /// # Shapes
    ///   - Input [batch, sequence, d_inner]
    ///   - Output [batch, sequence, d_inner]
    pub fn forward(
        &self,
        input: Tensor<B, 3>,
        state: SsmState<B>,
    ) -> Result<(Tensor<B, 3>, SsmState<B>)> {
        let [batch, len, width] = input.dims();
        self.check_width(width)?;
        if len == 0 {
            return Err(SsmError::EmptySequence);
        }
        let p = self.state_width();
        log::debug!(
            "ssm forward: batch={batch} len={len} warm={}",
            state.is_warm()
        );

        let Discretized {
            transition,
            input: d_b,
        } = self.discretize();
        let transition = transition.reshape([1, 1, p]);

        // Bu_t = dB·x_t for every step: [batch, len, P]
        let bu = ComplexTensor::real_matmul(input.clone(), d_b.transpose().unsqueeze());
        let bu = match state {
            SsmState::Cold => bu,
            SsmState::Warm(hidden) => {
                self.check_hidden(&hidden, batch)?;
                let first = bu
                    .clone()
                    .slice([0..batch, 0..1, 0..p])
                    .add(transition.clone().mul(hidden.reshape([batch, 1, p])));
                if len == 1 {
                    first
                } else {
                    ComplexTensor::cat(vec![first, bu.slice([0..batch, 1..len, 0..p])], 1)
                }
            }
        };

        let scanned = associative_scan(ScanPair::new(transition.repeat(&[1, len, 1]), bu));
        let states = scanned.state;
        let last = states
            .clone()
            .slice([0..batch, len - 1..len, 0..p])
            .reshape([batch, p])
            .detach();

        let projected = states
            .matmul_real_part(self.c_tilde().transpose().unsqueeze())
            .mul_scalar(self.output_scale);
        let feedthrough = input * self.d.val().unsqueeze::<3>();
        let output = projected + feedthrough;

        self.check_outputs(&output, &last)?;
        Ok((output, SsmState::Warm(last)))
    }

    /// Advances the recurrence by one sample without a scan.
    ///
    /// # Shapes
    ///   - Input [batch, d_inner]
    ///   - Output [batch, d_inner]
    pub fn step(
        &self,
        input: Tensor<B, 2>,
        state: SsmState<B>,
    ) -> Result<(Tensor<B, 2>, SsmState<B>)> {
        let [batch, width] = input.dims();
        self.check_width(width)?;

        let Discretized {
            transition,
            input: d_b,
        } = self.discretize();
        let bu = ComplexTensor::real_matmul(input.clone(), d_b.transpose());
        let hidden = match state {
            SsmState::Cold => bu,
            SsmState::Warm(hidden) => {
                self.check_hidden(&hidden, batch)?;
                transition.unsqueeze::<2>().mul(hidden).add(bu)
            }
        };

        let output = hidden
            .clone()
            .matmul_real_part(self.c_tilde().transpose())
            .mul_scalar(self.output_scale)
            + input * self.d.val().unsqueeze::<2>();
        let hidden = hidden.detach();

        self.check_outputs(&output.clone().unsqueeze::<3>(), &hidden)?;
        Ok((output, SsmState::Warm(hidden)))
    }
}

fn param<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Param<Tensor<B, D>> {
    Param::from_tensor(tensor)
}

impl<B: Backend> SequenceTransform<B> for SsmCell<B> {
    type Input = Tensor<B, 3>;
    type State = SsmState<B>;

    fn initial_state(&self) -> SsmState<B> {
        SsmState::Cold
    }

    fn transform(
        &self,
        input: Tensor<B, 3>,
        state: SsmState<B>,
    ) -> Result<(Tensor<B, 3>, SsmState<B>)> {
        self.forward(input, state)
    }

    fn change_scale(&mut self, step_rescale: f64) -> Result<()> {
        SsmCell::change_scale(self, step_rescale)
    }
}
