use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;
use log::info;

use crate::config::AmpModelConfig;
use crate::error::{Result, SsmError};
use crate::film::FilmGenerator;
use crate::stack::{ChunkTag, Stack, StackState};
use crate::transform::{self, SequenceTransform, TimeSplit};

/// Conditioned audio effect: project in, FiLM-modulated stack, project out.
#[derive(Module, Debug)]
pub struct AmpModel<B: Backend> {
    in_proj: Linear<B>,
    film: FilmGenerator<B>,
    stack: Stack<B>,
    out_proj: Linear<B>,
    input_size: usize,
    output_size: usize,
}

/// Audio plus the control vector that stays fixed for its duration.
#[derive(Clone, Debug)]
pub struct AmpInput<B: Backend> {
    /// `[batch, time, input_size]`
    pub audio: Tensor<B, 3>,
    /// `[batch, c_dim]`
    pub control: Tensor<B, 2>,
}

impl<B: Backend> TimeSplit for AmpInput<B> {
    fn time_len(&self) -> usize {
        self.audio.time_len()
    }

    fn time_slice(&self, start: usize, end: usize) -> Self {
        Self {
            audio: self.audio.time_slice(start, end),
            control: self.control.clone(),
        }
    }
}

impl AmpModelConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<AmpModel<B>> {
        if self.input_size == 0 {
            return Err(SsmError::ZeroDimension("input_size"));
        }
        if self.output_size == 0 {
            return Err(SsmError::ZeroDimension("output_size"));
        }
        let d_model = self.stack.d_model;
        let stack = self.stack.init(device)?;
        let film = FilmGenerator::new(self.c_dim, &self.film_hidden, d_model, device)?;

        info!(
            "amp model: {} -> {} channels, {} controls",
            self.input_size, self.output_size, self.c_dim
        );
        Ok(AmpModel {
            in_proj: LinearConfig::new(self.input_size, d_model)
                .with_bias(self.stack.bias)
                .init(device),
            film,
            stack,
            out_proj: LinearConfig::new(d_model, self.output_size)
                .with_bias(self.stack.bias)
                .init(device),
            input_size: self.input_size,
            output_size: self.output_size,
        })
    }
}

impl<B: Backend> AmpModel<B> {
    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn output_size(&self) -> usize {
        self.output_size
    }

    pub fn stack(&self) -> &Stack<B> {
        &self.stack
    }

    pub fn init_state(&self) -> StackState<B> {
        self.stack.init_state()
    }

    /// Adapts every layer to a new sample rate, e.g. `48000.0 / 44100.0`
    /// when running at 44.1 kHz a model trained at 48 kHz.
    pub fn change_scale(&mut self, step_rescale: f64) -> Result<()> {
        self.stack.change_scale(step_rescale)
    }

    fn check_audio(&self, audio: &Tensor<B, 3>) -> Result<()> {
        let width = audio.dims()[2];
        if width != self.input_size {
            return Err(SsmError::ShapeMismatch {
                what: "audio channels",
                expected: self.input_size,
                actual: width,
            });
        }
        Ok(())
    }

    /// # Shapes
    ///   - Audio [batch, sequence, input_size]
    ///   - Control [batch, c_dim]
    ///   - Output [batch, sequence, output_size]
    pub fn forward(
        &self,
        audio: Tensor<B, 3>,
        control: Tensor<B, 2>,
        state: StackState<B>,
    ) -> Result<(Tensor<B, 3>, StackState<B>)> {
        self.check_audio(&audio)?;
        let modulation = self.film.forward(control)?;
        let x = self.in_proj.forward(audio);
        let (y, state) = self.stack.forward(x, &modulation, state)?;
        Ok((self.out_proj.forward(y), state))
    }

    /// [`AmpModel::forward`] guarded by the stack's chunk sequencing; see
    /// [`Stack::forward_tagged`].
    pub fn forward_tagged(
        &self,
        audio: Tensor<B, 3>,
        control: Tensor<B, 2>,
        state: StackState<B>,
        tag: ChunkTag,
    ) -> Result<(Tensor<B, 3>, StackState<B>)> {
        self.check_audio(&audio)?;
        let modulation = self.film.forward(control)?;
        let x = self.in_proj.forward(audio);
        let (y, state) = self.stack.forward_tagged(x, &modulation, state, tag)?;
        Ok((self.out_proj.forward(y), state))
    }

    pub fn forward_chunked(
        &self,
        audio: Tensor<B, 3>,
        control: Tensor<B, 2>,
        state: StackState<B>,
        chunk_len: usize,
    ) -> Result<(Tensor<B, 3>, StackState<B>)> {
        transform::forward_chunked(self, AmpInput { audio, control }, state, chunk_len)
    }

    /// One sample per batch entry: `[batch, input_size]` in, `[batch, output_size]` out.
    pub fn step(
        &self,
        sample: Tensor<B, 2>,
        control: Tensor<B, 2>,
        state: StackState<B>,
    ) -> Result<(Tensor<B, 2>, StackState<B>)> {
        let [batch, _] = sample.dims();
        let (y, state) = self.forward(sample.unsqueeze_dim(1), control, state)?;
        Ok((y.reshape([batch, self.output_size]), state))
    }
}

impl<B: Backend> SequenceTransform<B> for AmpModel<B> {
    type Input = AmpInput<B>;
    type State = StackState<B>;

    fn initial_state(&self) -> StackState<B> {
        self.init_state()
    }

    fn transform(
        &self,
        input: AmpInput<B>,
        state: StackState<B>,
    ) -> Result<(Tensor<B, 3>, StackState<B>)> {
        self.forward(input.audio, input.control, state)
    }

    fn change_scale(&mut self, step_rescale: f64) -> Result<()> {
        AmpModel::change_scale(self, step_rescale)
    }
}
