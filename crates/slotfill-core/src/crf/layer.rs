//! # Linear-Chain CRF Layer
//!
//! Scores whole tag sequences from per-token emissions plus learned
//! start, end, and pairwise transition scores. Training uses the forward
//! algorithm on tensors so gradients reach every parameter; inference runs
//! Viterbi on host copies of the scores.

use candle_core::{DType, Tensor};
use candle_nn::{Init, VarBuilder};

use crate::crf::viterbi::ViterbiDecoder;
use crate::error::{Result, SlotFillError};
use crate::tagging::LabelVocab;

const INIT_RANGE: f64 = 0.1;

/// Linear-chain conditional random field over `num_tags` tags.
#[derive(Debug, Clone)]
pub struct Crf {
    num_tags: usize,
    /// `[num_tags]`
    pub start_transitions: Tensor,
    /// `[num_tags]`
    pub end_transitions: Tensor,
    /// `[num_tags, num_tags]`, indexed `[from, to]`.
    pub transitions: Tensor,
    decoder: ViterbiDecoder,
}

impl Crf {
    /// Create or load the CRF parameters under `vb`.
    pub fn new(num_tags: usize, vb: VarBuilder) -> Result<Self> {
        let init = Init::Uniform {
            lo: -INIT_RANGE,
            up: INIT_RANGE,
        };
        let start_transitions = vb.get_with_hints(num_tags, "start_transitions", init)?;
        let end_transitions = vb.get_with_hints(num_tags, "end_transitions", init)?;
        let transitions = vb.get_with_hints((num_tags, num_tags), "transitions", init)?;

        Ok(Self {
            num_tags,
            start_transitions,
            end_transitions,
            transitions,
            decoder: ViterbiDecoder::new(num_tags),
        })
    }

    /// Build a CRF from existing parameter tensors.
    pub fn from_tensors(
        start_transitions: Tensor,
        end_transitions: Tensor,
        transitions: Tensor,
    ) -> Result<Self> {
        let num_tags = start_transitions.dims1()?;
        if end_transitions.dims1()? != num_tags || transitions.dims2()? != (num_tags, num_tags) {
            return Err(SlotFillError::ShapeMismatch(format!(
                "CRF parameters disagree: start {:?}, end {:?}, transitions {:?}",
                start_transitions.shape(),
                end_transitions.shape(),
                transitions.shape()
            )));
        }

        Ok(Self {
            num_tags,
            start_transitions,
            end_transitions,
            transitions,
            decoder: ViterbiDecoder::new(num_tags),
        })
    }

    /// Restrict decoding to the BIO-legal transitions of `vocab`.
    pub fn with_constraints(mut self, vocab: &LabelVocab) -> Result<Self> {
        if vocab.num_tags() != self.num_tags {
            return Err(SlotFillError::ShapeMismatch(format!(
                "label vocabulary has {} tags, CRF has {}",
                vocab.num_tags(),
                self.num_tags
            )));
        }
        self.decoder = ViterbiDecoder::new(self.num_tags)
            .with_constraints(vocab.allowed_transitions(), vocab.allowed_starts())?;
        Ok(self)
    }

    pub fn num_tags(&self) -> usize {
        self.num_tags
    }

    /// Log-probability of each gold path.
    ///
    /// # Arguments
    /// * `emissions` - `[batch, seq_len, num_tags]` scores
    /// * `tags` - `[batch, seq_len]` gold tag ids
    /// * `mask` - `[batch, seq_len]`, a prefix of ones per row
    ///
    /// # Returns
    /// `[batch]` log-likelihoods.
    pub fn log_likelihood(&self, emissions: &Tensor, tags: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let (batch_size, seq_len, lengths) = self.check_shapes(emissions, Some(tags), mask)?;
        let device = emissions.device();
        let emissions = emissions.to_dtype(DType::F32)?;
        let mask = mask.to_dtype(DType::F32)?;

        let gold: Vec<Vec<u32>> = tags.to_dtype(DType::U32)?.to_vec2()?;
        if let Some(&bad) = gold
            .iter()
            .flatten()
            .find(|&&tag| tag as usize >= self.num_tags)
        {
            return Err(SlotFillError::UnknownTagId(bad));
        }

        // Score of the gold path.
        let tags = tags.to_dtype(DType::U32)?;
        let emitted = emissions.gather(&tags.unsqueeze(2)?, 2)?.squeeze(2)?;
        let mut score = emitted.mul(&mask)?.sum(1)?;

        let first: Vec<u32> = gold.iter().map(|row| row[0]).collect();
        let first = Tensor::from_vec(first, batch_size, device)?;
        score = score.add(&self.start_transitions.index_select(&first, 0)?)?;

        let last: Vec<u32> = gold
            .iter()
            .zip(&lengths)
            .map(|(row, &len)| row[len - 1])
            .collect();
        let last = Tensor::from_vec(last, batch_size, device)?;
        score = score.add(&self.end_transitions.index_select(&last, 0)?)?;

        if seq_len > 1 {
            let pairs: Vec<u32> = gold
                .iter()
                .flat_map(|row| {
                    row.windows(2)
                        .map(|pair| pair[0] * self.num_tags as u32 + pair[1])
                })
                .collect();
            let pairs = Tensor::from_vec(pairs, batch_size * (seq_len - 1), device)?;
            let moved = self
                .transitions
                .flatten_all()?
                .index_select(&pairs, 0)?
                .reshape((batch_size, seq_len - 1))?;
            score = score.add(&moved.mul(&mask.narrow(1, 1, seq_len - 1)?)?.sum(1)?)?;
        }

        let log_z = self.log_partition(&emissions, &mask)?;
        Ok(score.sub(&log_z)?)
    }

    /// Mean negative log-likelihood over the batch.
    pub fn loss(&self, emissions: &Tensor, tags: &Tensor, mask: &Tensor) -> Result<Tensor> {
        Ok(self.log_likelihood(emissions, tags, mask)?.neg()?.mean_all()?)
    }

    /// Forward algorithm: log of the summed score over every path.
    fn log_partition(&self, emissions: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let seq_len = emissions.dim(1)?;

        let mut alpha = emissions
            .narrow(1, 0, 1)?
            .squeeze(1)?
            .broadcast_add(&self.start_transitions.unsqueeze(0)?)?;
        let transitions = self.transitions.unsqueeze(0)?;

        for pos in 1..seq_len {
            let emit = emissions.narrow(1, pos, 1)?.squeeze(1)?;
            // [batch, from, to]
            let scores = alpha
                .unsqueeze(2)?
                .broadcast_add(&transitions)?
                .broadcast_add(&emit.unsqueeze(1)?)?;
            let next = log_sum_exp(&scores, 1)?;

            let keep = mask.narrow(1, pos, 1)?;
            let hold = keep.affine(-1.0, 1.0)?;
            alpha = next
                .broadcast_mul(&keep)?
                .add(&alpha.broadcast_mul(&hold)?)?;
        }

        let alpha = alpha.broadcast_add(&self.end_transitions.unsqueeze(0)?)?;
        log_sum_exp(&alpha, 1)
    }

    /// Best tag path per row, truncated to each row's masked length.
    pub fn viterbi_decode(&self, emissions: &Tensor, mask: &Tensor) -> Result<Vec<Vec<u32>>> {
        let (_, _, lengths) = self.check_shapes(emissions, None, mask)?;

        let scores: Vec<Vec<Vec<f32>>> = emissions.to_dtype(DType::F32)?.to_vec3()?;
        let transitions: Vec<Vec<f32>> = self.transitions.to_dtype(DType::F32)?.to_vec2()?;
        let start: Vec<f32> = self.start_transitions.to_dtype(DType::F32)?.to_vec1()?;
        let end: Vec<f32> = self.end_transitions.to_dtype(DType::F32)?.to_vec1()?;

        scores
            .iter()
            .zip(&lengths)
            .map(|(rows, &len)| {
                let path = self
                    .decoder
                    .decode(&rows[..len], &transitions, &start, &end)?;
                Ok(path.into_iter().map(|tag| tag as u32).collect())
            })
            .collect()
    }

    /// Validate shapes and return `(batch, seq_len, lengths)`.
    fn check_shapes(
        &self,
        emissions: &Tensor,
        tags: Option<&Tensor>,
        mask: &Tensor,
    ) -> Result<(usize, usize, Vec<usize>)> {
        let (batch_size, seq_len, num_tags) = emissions.dims3()?;
        if num_tags != self.num_tags {
            return Err(SlotFillError::ShapeMismatch(format!(
                "emissions have {num_tags} tags, CRF expects {}",
                self.num_tags
            )));
        }
        if seq_len == 0 {
            return Err(SlotFillError::ShapeMismatch(
                "emissions have zero timesteps".into(),
            ));
        }
        if mask.dims() != [batch_size, seq_len] {
            return Err(SlotFillError::ShapeMismatch(format!(
                "mask shape {:?} does not match emissions {:?}",
                mask.shape(),
                emissions.shape()
            )));
        }
        if let Some(tags) = tags {
            if tags.dims() != [batch_size, seq_len] {
                return Err(SlotFillError::ShapeMismatch(format!(
                    "tag shape {:?} does not match emissions {:?}",
                    tags.shape(),
                    emissions.shape()
                )));
            }
        }

        let rows: Vec<Vec<f32>> = mask.to_dtype(DType::F32)?.to_vec2()?;
        let mut lengths = Vec::with_capacity(batch_size);
        for (row_idx, row) in rows.iter().enumerate() {
            let len = row.iter().take_while(|&&m| m > 0.0).count();
            if len == 0 || row[len..].iter().any(|&m| m > 0.0) {
                return Err(SlotFillError::ShapeMismatch(format!(
                    "mask row {row_idx} must be a non-empty prefix of ones"
                )));
            }
            lengths.push(len);
        }

        Ok((batch_size, seq_len, lengths))
    }
}

/// Numerically stable `log(sum(exp(xs)))` over `dim`, which is removed.
fn log_sum_exp(xs: &Tensor, dim: usize) -> Result<Tensor> {
    let max = xs.max_keepdim(dim)?;
    let summed = xs.broadcast_sub(&max)?.exp()?.sum_keepdim(dim)?.log()?;
    Ok(summed.add(&max)?.squeeze(dim)?)
}
