//! # Bidirectional Recurrent Encoder
//!
//! Embeds token ids and runs stacked bidirectional recurrent layers over the
//! true length of each row. Rows must arrive sorted by non-increasing length:
//! at every timestep only a prefix of the batch is still active, so the cell
//! steps over that prefix alone.

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::rnn::{GRU, GRUConfig, GRUState, LSTM, LSTMConfig, LSTMState, RNN};
use candle_nn::{Embedding, Linear, VarBuilder};

use crate::config::{EncoderCell, TaggerConfig};
use crate::error::{Result, SlotFillError};

/// Maps padded token ids to contextual hidden vectors.
pub trait SequenceEncoder {
    /// Width of the per-token output.
    fn output_size(&self) -> usize;

    /// Encode `[batch, seq_len]` ids into `[batch, seq_len, output_size]`.
    ///
    /// Positions at or beyond `lengths[row]` are zero in the output.
    fn encode(&self, input_ids: &Tensor, lengths: &[usize]) -> Result<Tensor>;
}

/// Elman recurrence: `h' = tanh(W_ih x + W_hh h + b)`.
#[derive(Debug, Clone)]
struct ElmanCell {
    ih: Linear,
    hh: Linear,
}

/// Hidden state shared by every cell kind; `c` is only used by LSTM.
#[derive(Debug, Clone)]
struct CellState {
    h: Tensor,
    c: Option<Tensor>,
}

impl CellState {
    fn head(&self, rows: usize) -> Result<Self> {
        Ok(Self {
            h: self.h.narrow(0, 0, rows)?,
            c: self.c.as_ref().map(|c| c.narrow(0, 0, rows)).transpose()?,
        })
    }

    /// Replace the first rows with `next`, keeping the rest untouched.
    fn splice(&self, next: &CellState) -> Result<Self> {
        let total = self.h.dim(0)?;
        let rows = next.h.dim(0)?;
        if rows == total {
            return Ok(next.clone());
        }
        let join = |head: &Tensor, all: &Tensor| -> Result<Tensor> {
            Ok(Tensor::cat(&[head, &all.narrow(0, rows, total - rows)?], 0)?)
        };
        let c = match (&next.c, &self.c) {
            (Some(head), Some(all)) => Some(join(head, all)?),
            _ => None,
        };
        Ok(Self {
            h: join(&next.h, &self.h)?,
            c,
        })
    }
}

/// One direction of one layer.
#[derive(Debug, Clone)]
enum RecurrentCell {
    Rnn(ElmanCell),
    Lstm(LSTM),
    Gru(GRU),
}

impl RecurrentCell {
    fn new(kind: EncoderCell, in_dim: usize, hidden: usize, vb: VarBuilder) -> Result<Self> {
        let cell = match kind {
            EncoderCell::Rnn => RecurrentCell::Rnn(ElmanCell {
                ih: candle_nn::linear(in_dim, hidden, vb.pp("ih"))?,
                hh: candle_nn::linear(hidden, hidden, vb.pp("hh"))?,
            }),
            EncoderCell::Lstm => {
                RecurrentCell::Lstm(candle_nn::rnn::lstm(in_dim, hidden, LSTMConfig::default(), vb)?)
            }
            EncoderCell::Gru => {
                RecurrentCell::Gru(candle_nn::rnn::gru(in_dim, hidden, GRUConfig::default(), vb)?)
            }
        };
        Ok(cell)
    }

    fn zero_state(&self, rows: usize, hidden: usize, dtype: DType, device: &Device) -> Result<CellState> {
        let h = Tensor::zeros((rows, hidden), dtype, device)?;
        let c = match self {
            RecurrentCell::Lstm(_) => Some(h.zeros_like()?),
            RecurrentCell::Rnn(_) | RecurrentCell::Gru(_) => None,
        };
        Ok(CellState { h, c })
    }

    fn step(&self, input: &Tensor, state: &CellState) -> Result<CellState> {
        match self {
            RecurrentCell::Rnn(cell) => {
                let h = cell
                    .ih
                    .forward(input)?
                    .add(&cell.hh.forward(&state.h)?)?
                    .tanh()?;
                Ok(CellState { h, c: None })
            }
            RecurrentCell::Lstm(lstm) => {
                let c = match &state.c {
                    Some(c) => c.clone(),
                    None => state.h.zeros_like()?,
                };
                let next = lstm.step(
                    input,
                    &LSTMState {
                        h: state.h.clone(),
                        c,
                    },
                )?;
                Ok(CellState {
                    h: next.h,
                    c: Some(next.c),
                })
            }
            RecurrentCell::Gru(gru) => {
                let next = gru.step(input, &GRUState { h: state.h.clone() })?;
                Ok(CellState { h: next.h, c: None })
            }
        }
    }
}

#[derive(Debug, Clone)]
struct BiLayer {
    forward: RecurrentCell,
    backward: RecurrentCell,
}

/// Embedding layer plus stacked bidirectional recurrent layers.
#[derive(Debug, Clone)]
pub struct BiRecurrentEncoder {
    word_embed: Embedding,
    layers: Vec<BiLayer>,
    cell: EncoderCell,
    pad_idx: u32,
    direction_size: usize,
}

impl BiRecurrentEncoder {
    /// Create or load encoder parameters under `vb`.
    pub fn new(config: &TaggerConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;

        let word_embed =
            candle_nn::embedding(config.vocab_size, config.embed_size, vb.pp("word_embed"))?;
        let direction_size = config.direction_size();

        let rnn = vb.pp("rnn");
        let mut layers = Vec::with_capacity(config.num_layer);
        for layer in 0..config.num_layer {
            let in_dim = if layer == 0 {
                config.embed_size
            } else {
                config.hidden_size
            };
            let lvb = rnn.pp(format!("l{layer}"));
            layers.push(BiLayer {
                forward: RecurrentCell::new(
                    config.encoder_cell,
                    in_dim,
                    direction_size,
                    lvb.pp("forward"),
                )?,
                backward: RecurrentCell::new(
                    config.encoder_cell,
                    in_dim,
                    direction_size,
                    lvb.pp("backward"),
                )?,
            });
        }

        Ok(Self {
            word_embed,
            layers,
            cell: config.encoder_cell,
            pad_idx: config.pad_idx,
            direction_size,
        })
    }

    pub fn cell(&self) -> EncoderCell {
        self.cell
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Embedding lookup with pad positions forced to zero vectors.
    pub fn embed(&self, input_ids: &Tensor) -> Result<Tensor> {
        let embedded = self.word_embed.forward(input_ids)?;
        let keep = input_ids
            .ne(self.pad_idx)?
            .to_dtype(embedded.dtype())?
            .unsqueeze(2)?;
        Ok(embedded.broadcast_mul(&keep)?)
    }

    /// Run one direction over every row, returning `[batch, seq_len, direction_size]`.
    fn run_direction(
        &self,
        cell: &RecurrentCell,
        xs: &Tensor,
        lengths: &[usize],
        reverse: bool,
    ) -> Result<Tensor> {
        let (batch_size, seq_len, _) = xs.dims3()?;
        let device = xs.device();
        let mut state = cell.zero_state(batch_size, self.direction_size, xs.dtype(), device)?;
        let blank = Tensor::zeros((batch_size, self.direction_size), xs.dtype(), device)?;
        let mut outputs = vec![blank; seq_len];

        let positions: Vec<usize> = if reverse {
            (0..seq_len).rev().collect()
        } else {
            (0..seq_len).collect()
        };

        for pos in positions {
            // rows still holding data at `pos` form a prefix
            let active = lengths.partition_point(|&len| len > pos);
            if active == 0 {
                continue;
            }

            let input = xs.narrow(1, pos, 1)?.squeeze(1)?.narrow(0, 0, active)?;
            let next = cell.step(&input, &state.head(active)?)?;

            outputs[pos] = if active == batch_size {
                next.h.clone()
            } else {
                let rest = Tensor::zeros(
                    (batch_size - active, self.direction_size),
                    xs.dtype(),
                    device,
                )?;
                Tensor::cat(&[&next.h, &rest], 0)?
            };
            state = state.splice(&next)?;
        }

        Ok(Tensor::stack(&outputs, 1)?)
    }
}

impl SequenceEncoder for BiRecurrentEncoder {
    fn output_size(&self) -> usize {
        self.direction_size * 2
    }

    fn encode(&self, input_ids: &Tensor, lengths: &[usize]) -> Result<Tensor> {
        let (batch_size, seq_len) = input_ids.dims2()?;
        check_lengths(lengths, batch_size, seq_len)?;

        let mut xs = self.embed(input_ids)?;
        for layer in &self.layers {
            let forward = self.run_direction(&layer.forward, &xs, lengths, false)?;
            let backward = self.run_direction(&layer.backward, &xs, lengths, true)?;
            xs = Tensor::cat(&[&forward, &backward], 2)?;
        }
        Ok(xs)
    }
}

/// Lengths must be positive, fit the padded width, and never increase.
fn check_lengths(lengths: &[usize], batch_size: usize, seq_len: usize) -> Result<()> {
    if lengths.len() != batch_size {
        return Err(SlotFillError::ShapeMismatch(format!(
            "{} lengths for a batch of {batch_size}",
            lengths.len()
        )));
    }
    if batch_size == 0 {
        return Err(SlotFillError::EmptyBatch);
    }
    if let Some(index) = lengths.iter().position(|&len| len == 0) {
        return Err(SlotFillError::EmptySequence { index });
    }
    if let Some(&len) = lengths.iter().find(|&&len| len > seq_len) {
        return Err(SlotFillError::ShapeMismatch(format!(
            "length {len} exceeds padded width {seq_len}"
        )));
    }
    if let Some(position) = lengths.windows(2).position(|w| w[1] > w[0]) {
        return Err(SlotFillError::UnsortedBatch {
            position: position + 1,
            previous: lengths[position],
            current: lengths[position + 1],
        });
    }
    Ok(())
}
