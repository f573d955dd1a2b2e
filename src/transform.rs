//! The capability shared by every layer of the engine: consume an input and
//! a prior state, produce an output and the next state.

use burn::prelude::*;

use crate::error::{Result, SsmError};

pub trait SequenceTransform<B: Backend> {
    /// What one call consumes, e.g. a `[batch, time, width]` tensor.
    type Input: TimeSplit;
    /// State threaded from one call to the next.
    type State: Clone;

    /// State of a sequence that has not started yet.
    fn initial_state(&self) -> Self::State;

    fn transform(
        &self,
        input: Self::Input,
        state: Self::State,
    ) -> Result<(Tensor<B, 3>, Self::State)>;

    /// Sets the step rescale factor of every SSM cell inside.
    fn change_scale(&mut self, step_rescale: f64) -> Result<()>;
}

/// Inputs that can be cut along their time axis.
pub trait TimeSplit: Sized {
    fn time_len(&self) -> usize;
    fn time_slice(&self, start: usize, end: usize) -> Self;
}

impl<B: Backend> TimeSplit for Tensor<B, 3> {
    fn time_len(&self) -> usize {
        self.dims()[1]
    }

    fn time_slice(&self, start: usize, end: usize) -> Self {
        let [batch, _, width] = self.dims();
        self.clone().slice([0..batch, start..end, 0..width])
    }
}

/// Runs `input` through `layer` in windows of at most `chunk_len` steps,
/// threading the state from window to window in temporal order.
pub fn forward_chunked<B, T>(
    layer: &T,
    input: T::Input,
    state: T::State,
    chunk_len: usize,
) -> Result<(Tensor<B, 3>, T::State)>
where
    B: Backend,
    T: SequenceTransform<B>,
{
    if chunk_len == 0 {
        return Err(SsmError::ZeroDimension("chunk_len"));
    }
    let len = input.time_len();
    if len == 0 {
        return Err(SsmError::EmptySequence);
    }

    let mut state = state;
    let mut outputs = Vec::with_capacity(len.div_ceil(chunk_len));
    let mut start = 0;
    while start < len {
        let end = (start + chunk_len).min(len);
        let (output, next) = layer.transform(input.time_slice(start, end), state)?;
        outputs.push(output);
        state = next;
        start = end;
    }
    log::debug!("processed {len} steps in {} chunks", outputs.len());
    Ok((Tensor::cat(outputs, 1), state))
}
