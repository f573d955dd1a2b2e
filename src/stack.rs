//! A sequence of FiLM-conditioned residual blocks with per-layer state.
//!
//! Streaming callers can tag every chunk with the sequence it belongs to and
//! the sample offset it starts at; [`Stack::forward_tagged`] then refuses
//! chunks that would advance the state out of temporal order.

use burn::prelude::*;
use log::{debug, info, warn};

use crate::config::{StabilityMode, StackConfig};
use crate::error::{Result, SsmError};
use crate::residual::{Conditioned, FilmModulation, ResidualBlock};
use crate::ssm_cell::SsmState;
use crate::transform::{self, SequenceTransform};

/// Identifies a chunk within a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkTag {
    pub sequence_id: u64,
    /// Index of the chunk's first sample within its sequence.
    pub offset: usize,
}

impl ChunkTag {
    pub fn new(sequence_id: u64, offset: usize) -> Self {
        Self {
            sequence_id,
            offset,
        }
    }
}

/// Where the next tagged chunk has to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkCursor {
    pub sequence_id: u64,
    pub next_offset: usize,
}

/// One [`SsmState`] per layer plus the position reached in a tagged stream.
#[derive(Debug, Clone)]
pub struct StackState<B: Backend> {
    layers: Vec<SsmState<B>>,
    cursor: Option<ChunkCursor>,
}

impl<B: Backend> StackState<B> {
    pub fn cold(n_layers: usize) -> Self {
        Self {
            layers: vec![SsmState::Cold; n_layers],
            cursor: None,
        }
    }

    pub fn layers(&self) -> &[SsmState<B>] {
        &self.layers
    }

    pub fn cursor(&self) -> Option<ChunkCursor> {
        self.cursor
    }

    pub fn is_warm(&self) -> bool {
        self.layers.iter().any(SsmState::is_warm)
    }

    /// Drops every hidden state and forgets the stream position.
    pub fn reset(self) -> Self {
        Self::cold(self.layers.len())
    }

    /// Checks that `tag` is the chunk this stream accepts next.
    pub fn check_tag(&self, tag: ChunkTag) -> Result<()> {
        let expected = match self.cursor {
            Some(cursor) if cursor.sequence_id != tag.sequence_id => {
                return Err(SsmError::SequenceMismatch {
                    expected: cursor.sequence_id,
                    actual: tag.sequence_id,
                });
            }
            Some(cursor) => cursor.next_offset,
            None if self.is_warm() => {
                return Err(SsmError::UntaggedState {
                    sequence_id: tag.sequence_id,
                });
            }
            None => 0,
        };
        if tag.offset != expected {
            return Err(SsmError::OutOfOrderChunk {
                sequence_id: tag.sequence_id,
                expected,
                actual: tag.offset,
            });
        }
        Ok(())
    }

    fn advance(&mut self, len: usize) {
        if let Some(cursor) = self.cursor.as_mut() {
            cursor.next_offset += len;
        }
    }
}

#[derive(Module, Debug)]
pub struct Stack<B: Backend> {
    blocks: Vec<ResidualBlock<B>>,
}

impl StackConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Stack<B>> {
        if self.n_layers == 0 {
            return Err(SsmError::ZeroDimension("n_layers"));
        }
        let blocks = (0..self.n_layers)
            .map(|layer| ResidualBlock::new(self, layer, device))
            .collect::<Result<Vec<_>>>()?;
        if self.stability == StabilityMode::Unconstrained {
            warn!("Re(Λ) is unconstrained; the discretized system may become unstable");
        }
        info!(
            "stack: {} layers, d_model={}, d_inner={}, d_state={}",
            self.n_layers,
            self.d_model,
            self.d_inner(),
            self.d_state
        );
        Ok(Stack { blocks })
    }
}

impl<B: Backend> Stack<B> {
    pub fn n_layers(&self) -> usize {
        self.blocks.len()
    }

    pub fn blocks(&self) -> &[ResidualBlock<B>] {
        &self.blocks
    }

    pub fn init_state(&self) -> StackState<B> {
        StackState::cold(self.n_layers())
    }

    /// Sets the step rescale factor of every layer. Validated once up front,
    /// so a rejected factor leaves every layer untouched.
    pub fn change_scale(&mut self, step_rescale: f64) -> Result<()> {
        if let Err(err) = crate::config::check_rescale(step_rescale) {
            warn!("rejected step rescale {step_rescale}");
            return Err(err);
        }
        for block in self.blocks.iter_mut() {
            block.change_scale(step_rescale)?;
        }
        debug!("stack step rescale set to {step_rescale}");
        Ok(())
    }

    /// # Shapes
    ///   - Input [batch, sequence, d_model]
    ///   - Output [batch, sequence, d_model]
    pub fn forward(
        &self,
        x: Tensor<B, 3>,
        modulation: &FilmModulation<B>,
        state: StackState<B>,
    ) -> Result<(Tensor<B, 3>, StackState<B>)> {
        if state.layers.len() != self.blocks.len() {
            return Err(SsmError::ShapeMismatch {
                what: "layer states",
                expected: self.blocks.len(),
                actual: state.layers.len(),
            });
        }
        let len = x.dims()[1];

        let StackState { layers, cursor } = state;
        let mut next = Vec::with_capacity(layers.len());
        let mut x = x;
        for (block, layer_state) in self.blocks.iter().zip(layers) {
            let (y, s) = block.forward(x, modulation, layer_state)?;
            x = y;
            next.push(s);
        }

        let mut state = StackState {
            layers: next,
            cursor,
        };
        state.advance(len);
        Ok((x, state))
    }

    /// Like [`Stack::forward`], but only accepts the chunk that continues the
    /// stream recorded in `state`. A cold or reset stream accepts any
    /// sequence starting at offset 0; a warm stream that was advanced by
    /// untagged calls accepts no tagged chunk until it is reset.
    ///
    /// `state` is consumed even when the chunk is rejected. Call
    /// [`StackState::check_tag`] first to keep the stream on rejection.
    pub fn forward_tagged(
        &self,
        x: Tensor<B, 3>,
        modulation: &FilmModulation<B>,
        state: StackState<B>,
        tag: ChunkTag,
    ) -> Result<(Tensor<B, 3>, StackState<B>)> {
        state.check_tag(tag)?;

        let len = x.dims()[1];
        let (y, mut state) = self.forward(x, modulation, state)?;
        state.cursor = Some(ChunkCursor {
            sequence_id: tag.sequence_id,
            next_offset: tag.offset + len,
        });
        Ok((y, state))
    }

    /// Processes `x` in windows of `chunk_len` steps; the result matches a
    /// single [`Stack::forward`] call up to float rounding.
    pub fn forward_chunked(
        &self,
        x: Tensor<B, 3>,
        modulation: &FilmModulation<B>,
        state: StackState<B>,
        chunk_len: usize,
    ) -> Result<(Tensor<B, 3>, StackState<B>)> {
        let input = Conditioned {
            features: x,
            modulation: modulation.clone(),
        };
        transform::forward_chunked(self, input, state, chunk_len)
    }
}

impl<B: Backend> SequenceTransform<B> for Stack<B> {
    type Input = Conditioned<B>;
    type State = StackState<B>;

    fn initial_state(&self) -> StackState<B> {
        self.init_state()
    }

    fn transform(
        &self,
        input: Conditioned<B>,
        state: StackState<B>,
    ) -> Result<(Tensor<B, 3>, StackState<B>)> {
        self.forward(input.features, &input.modulation, state)
    }

    fn change_scale(&mut self, step_rescale: f64) -> Result<()> {
        Stack::change_scale(self, step_rescale)
    }
}
