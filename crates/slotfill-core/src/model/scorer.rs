//! # Tag Scorer
//!
//! Linear projection from hidden vectors to per-tag scores. Padding positions
//! receive a huge negative offset on every tag before any softmax or CRF step,
//! so they can never win or steer a decoded path.

use candle_core::{D, DType, Module, Tensor};
use candle_nn::{Linear, VarBuilder};

use crate::config::TaggerConfig;
use crate::crf::Crf;
use crate::error::{Result, SlotFillError};
use crate::tagging::LabelVocab;

/// Offset added to every tag score at padding positions.
pub const MASK_PENALTY: f64 = 1e32;

/// Per-token predictions.
#[derive(Debug, Clone)]
pub enum TagPredictions {
    /// `[batch, seq_len, num_tags]` softmax distribution (no CRF).
    Probabilities(Tensor),
    /// Viterbi paths, one per row, truncated to the row's true length (CRF).
    Paths(Vec<Vec<u32>>),
}

impl TagPredictions {
    /// Best tag id per token: arg-max for probabilities, the path for CRF.
    pub fn tag_ids(&self) -> Result<Vec<Vec<u32>>> {
        match self {
            TagPredictions::Probabilities(prob) => Ok(prob.argmax(D::Minus1)?.to_vec2()?),
            TagPredictions::Paths(paths) => Ok(paths.clone()),
        }
    }
}

/// Scorer output: predictions plus the loss when gold tags were supplied.
#[derive(Debug, Clone)]
pub struct TagOutput {
    pub predictions: TagPredictions,
    /// Scalar training loss.
    pub loss: Option<Tensor>,
}

/// Projects hidden states to tag scores and, optionally, owns the CRF.
#[derive(Debug, Clone)]
pub struct TagScorer {
    output_layer: Linear,
    num_tags: usize,
    tag_pad_idx: u32,
    crf: Option<Crf>,
}

impl TagScorer {
    /// Create or load scorer parameters under `vb`.
    pub fn new(config: &TaggerConfig, vb: VarBuilder) -> Result<Self> {
        let output_layer =
            candle_nn::linear(config.hidden_size, config.num_tags, vb.pp("output_layer"))?;
        let crf = if config.crf {
            Some(Crf::new(config.num_tags, vb.pp("crf"))?)
        } else {
            None
        };

        Ok(Self {
            output_layer,
            num_tags: config.num_tags,
            tag_pad_idx: config.tag_pad_idx,
            crf,
        })
    }

    /// Restrict CRF decoding to BIO-legal transitions. No-op without a CRF.
    pub fn with_constraints(mut self, vocab: &LabelVocab) -> Result<Self> {
        if let Some(crf) = self.crf.take() {
            self.crf = Some(crf.with_constraints(vocab)?);
        }
        Ok(self)
    }

    pub fn num_tags(&self) -> usize {
        self.num_tags
    }

    pub fn crf(&self) -> Option<&Crf> {
        self.crf.as_ref()
    }

    pub fn uses_crf(&self) -> bool {
        self.crf.is_some()
    }

    /// Raw tag scores with `MASK_PENALTY` subtracted wherever `mask` is 0.
    ///
    /// `hiddens` is `[batch, seq_len, hidden]`, `mask` is `[batch, seq_len]`.
    pub fn masked_logits(&self, hiddens: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let (batch_size, seq_len, _) = hiddens.dims3()?;
        if mask.dims() != [batch_size, seq_len] {
            return Err(SlotFillError::ShapeMismatch(format!(
                "mask shape {:?} does not match hidden states {:?}",
                mask.shape(),
                hiddens.shape()
            )));
        }

        let logits = self.output_layer.forward(hiddens)?;
        // 0 where mask is 1, -MASK_PENALTY where mask is 0
        let penalty = mask
            .to_dtype(logits.dtype())?
            .affine(MASK_PENALTY, -MASK_PENALTY)?
            .unsqueeze(2)?;
        Ok(logits.broadcast_add(&penalty)?)
    }

    /// Score hidden states and decode; computes the loss when `labels` is set.
    pub fn forward(
        &self,
        hiddens: &Tensor,
        mask: &Tensor,
        labels: Option<&Tensor>,
    ) -> Result<TagOutput> {
        let logits = self.masked_logits(hiddens, mask)?;

        let predictions = match &self.crf {
            Some(crf) => TagPredictions::Paths(crf.viterbi_decode(&logits, mask)?),
            None => TagPredictions::Probabilities(candle_nn::ops::softmax_last_dim(&logits)?),
        };

        let loss = match labels {
            Some(labels) => Some(match &self.crf {
                Some(crf) => crf.loss(&logits, labels, mask)?,
                None => self.cross_entropy(&logits, labels)?,
            }),
            None => None,
        };

        Ok(TagOutput { predictions, loss })
    }

    /// Mean token cross-entropy, skipping positions labelled with the pad tag.
    fn cross_entropy(&self, logits: &Tensor, labels: &Tensor) -> Result<Tensor> {
        let (batch_size, seq_len, _) = logits.dims3()?;
        if labels.dims() != [batch_size, seq_len] {
            return Err(SlotFillError::ShapeMismatch(format!(
                "label shape {:?} does not match scores {:?}",
                labels.shape(),
                logits.shape()
            )));
        }

        let labels = labels.to_dtype(DType::U32)?;
        let log_probs = candle_nn::ops::log_softmax(logits, D::Minus1)?;
        let picked = log_probs.gather(&labels.unsqueeze(2)?, 2)?.squeeze(2)?;
        let keep = labels.ne(self.tag_pad_idx)?.to_dtype(picked.dtype())?;

        let count = keep.sum_all()?.to_scalar::<f32>()?;
        if count == 0.0 {
            return Ok(Tensor::zeros((), picked.dtype(), picked.device())?);
        }
        Ok(picked
            .mul(&keep)?
            .sum_all()?
            .affine(-1.0 / count as f64, 0.0)?)
    }
}
