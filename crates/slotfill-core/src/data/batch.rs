//! # Batch Construction
//!
//! Turns a list of [`Example`]s into padded id tensors sorted by descending
//! length, which is what packed recurrent processing requires.

use candle_core::{Device, Tensor};
use tracing::debug;

use crate::config::TaggerConfig;
use crate::data::example::Example;
use crate::error::{Result, SlotFillError};

/// Padded tensors for one mini-batch.
///
/// Rows are ordered by non-increasing `lengths`. Label-dependent fields are
/// `None` for inference batches.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Examples in row order.
    pub examples: Vec<Example>,
    /// Raw utterance tokens per row.
    pub utt: Vec<Vec<String>>,
    /// `[batch, max_len]` input ids, right-padded with the pad id.
    pub input_ids: Tensor,
    /// True length per row, non-increasing.
    pub lengths: Vec<usize>,
    /// `[batch, max_len]` f32 mask, 1.0 where `position < lengths[row]`.
    pub mask: Tensor,
    /// `[batch, max_len]` denoising ids (training only).
    pub denoise_ids: Option<Tensor>,
    /// Gold `slot-value` strings per row (training only).
    pub labels: Option<Vec<Vec<String>>>,
    /// `[batch, max_len]` gold tag ids, padded with the tag pad id (training only).
    pub tag_ids: Option<Tensor>,
    /// `[batch, max_len]` f32 mask over real gold tags (training only).
    pub tag_mask: Option<Tensor>,
    device: Device,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Example> {
        self.examples.get(idx)
    }

    /// Padded sequence length.
    pub fn max_len(&self) -> usize {
        self.lengths.first().copied().unwrap_or(0)
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Whether the batch carries gold labels.
    pub fn has_labels(&self) -> bool {
        self.tag_ids.is_some()
    }

    /// The mask the scorer should use: the gold tag mask when present,
    /// otherwise the length mask.
    pub fn scoring_mask(&self) -> &Tensor {
        self.tag_mask.as_ref().unwrap_or(&self.mask)
    }
}

/// Builds [`Batch`]es with fixed padding ids on a fixed device.
#[derive(Debug, Clone)]
pub struct BatchBuilder {
    pad_idx: u32,
    tag_pad_idx: u32,
    device: Device,
}

impl BatchBuilder {
    pub fn new(pad_idx: u32, tag_pad_idx: u32, device: Device) -> Self {
        Self {
            pad_idx,
            tag_pad_idx,
            device,
        }
    }

    /// Take padding ids from a tagger configuration.
    pub fn from_config(config: &TaggerConfig, device: Device) -> Self {
        Self::new(config.pad_idx, config.tag_pad_idx, device)
    }

    /// Build a batch. With `train` unset, gold labels are ignored and the
    /// label fields stay `None`.
    pub fn build(&self, examples: Vec<Example>, train: bool) -> Result<Batch> {
        if examples.is_empty() {
            return Err(SlotFillError::EmptyBatch);
        }
        if let Some(index) = examples.iter().position(|ex| ex.input_idx().is_empty()) {
            return Err(SlotFillError::EmptySequence { index });
        }
        if train {
            if let Some(index) = examples.iter().position(|ex| ex.tag_id().is_none()) {
                return Err(SlotFillError::MissingLabels { index });
            }
        }

        let mut examples = examples;
        // stable: equal lengths keep their input order
        examples.sort_by(|a, b| b.effective_len().cmp(&a.effective_len()));

        let lengths: Vec<usize> = examples.iter().map(Example::effective_len).collect();
        let max_len = lengths[0];
        let batch_size = examples.len();

        let input_ids = self.pad_ids(
            examples.iter().map(Example::input_idx),
            self.pad_idx,
            max_len,
        )?;
        let mask = length_mask(lengths.iter().copied(), max_len, &self.device)?;
        let utt = examples.iter().map(|ex| ex.utt().to_vec()).collect();

        let (denoise_ids, labels, tag_ids, tag_mask) = if train {
            let mut gold = Vec::with_capacity(batch_size);
            let mut tag_lens = Vec::with_capacity(batch_size);
            for ex in &examples {
                let tags = ex.tag_id().unwrap_or_default();
                if tags.is_empty() || tags.len() > max_len {
                    return Err(SlotFillError::ShapeMismatch(format!(
                        "gold tag sequence of length {} does not fit padded length {}",
                        tags.len(),
                        max_len
                    )));
                }
                tag_lens.push(tags.len());
                gold.push(tags);
            }

            let denoise = self.pad_ids(
                examples.iter().map(Example::denoise_idx),
                self.pad_idx,
                max_len,
            )?;
            let tag_ids = self.pad_ids(gold.into_iter(), self.tag_pad_idx, max_len)?;
            let tag_mask = length_mask(tag_lens.into_iter(), max_len, &self.device)?;
            let labels = examples
                .iter()
                .map(|ex| ex.slotvalue().map(<[String]>::to_vec).unwrap_or_default())
                .collect();
            (Some(denoise), Some(labels), Some(tag_ids), Some(tag_mask))
        } else {
            (None, None, None, None)
        };

        debug!(batch_size, max_len, train, "built batch");

        Ok(Batch {
            examples,
            utt,
            input_ids,
            lengths,
            mask,
            denoise_ids,
            labels,
            tag_ids,
            tag_mask,
            device: self.device.clone(),
        })
    }

    fn pad_ids<'a>(
        &self,
        rows: impl Iterator<Item = &'a [u32]>,
        pad: u32,
        max_len: usize,
    ) -> Result<Tensor> {
        let mut flat = Vec::new();
        let mut batch_size = 0;
        for row in rows {
            flat.extend_from_slice(row);
            flat.extend(std::iter::repeat_n(pad, max_len - row.len()));
            batch_size += 1;
        }
        Ok(Tensor::from_vec(flat, (batch_size, max_len), &self.device)?)
    }
}

/// `[rows, max_len]` f32 mask with 1.0 before each row's length.
pub(crate) fn length_mask(
    lengths: impl Iterator<Item = usize>,
    max_len: usize,
    device: &Device,
) -> Result<Tensor> {
    let mut flat = Vec::new();
    let mut rows = 0;
    for len in lengths {
        flat.extend((0..max_len).map(|pos| if pos < len { 1f32 } else { 0f32 }));
        rows += 1;
    }
    Ok(Tensor::from_vec(flat, (rows, max_len), device)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    fn builder() -> BatchBuilder {
        BatchBuilder::new(0, 0, Device::Cpu)
    }

    fn sample() -> Vec<Example> {
        vec![
            Example::new(tokens(&["hi"]), vec![5]).with_labels(vec![1], vec![]),
            Example::new(tokens(&["turn", "on", "light"]), vec![6, 7, 8])
                .with_labels(vec![1, 1, 2], vec!["device-light".into()]),
            Example::new(tokens(&["go", "home"]), vec![9, 10]).with_labels(vec![1, 2], vec![]),
        ]
    }

    #[test]
    fn rows_sorted_by_descending_length() {
        let batch = builder().build(sample(), true).unwrap();
        assert_eq!(batch.lengths, vec![3, 2, 1]);
        assert!(batch.lengths.windows(2).all(|w| w[0] >= w[1]));
        assert_eq!(batch.utt[0], tokens(&["turn", "on", "light"]));
        assert_eq!(batch.max_len(), 3);
    }

    #[test]
    fn ids_are_right_padded() {
        let batch = builder().build(sample(), true).unwrap();
        let ids: Vec<Vec<u32>> = batch.input_ids.to_vec2().unwrap();
        assert_eq!(ids, vec![vec![6, 7, 8], vec![9, 10, 0], vec![5, 0, 0]]);

        let tags: Vec<Vec<u32>> = batch.tag_ids.as_ref().unwrap().to_vec2().unwrap();
        assert_eq!(tags, vec![vec![1, 1, 2], vec![1, 2, 0], vec![1, 0, 0]]);
    }

    #[test]
    fn mask_is_zero_exactly_on_padding() {
        let batch = builder().build(sample(), true).unwrap();
        let mask: Vec<Vec<f32>> = batch.mask.to_vec2().unwrap();
        assert_eq!(
            mask,
            vec![
                vec![1.0, 1.0, 1.0],
                vec![1.0, 1.0, 0.0],
                vec![1.0, 0.0, 0.0]
            ]
        );
        let tag_mask: Vec<Vec<f32>> = batch.tag_mask.as_ref().unwrap().to_vec2().unwrap();
        assert_eq!(tag_mask, mask);
    }

    #[test]
    fn denoise_view_extends_the_padded_length() {
        let examples = vec![
            Example::new(tokens(&["a"]), vec![3])
                .with_denoise(vec![3, 4, 5, 6])
                .with_labels(vec![1], vec![]),
            Example::new(tokens(&["b", "c"]), vec![7, 8]).with_labels(vec![1, 1], vec![]),
        ];
        let batch = builder().build(examples, true).unwrap();

        assert_eq!(batch.lengths, vec![4, 2]);
        let denoise: Vec<Vec<u32>> = batch.denoise_ids.as_ref().unwrap().to_vec2().unwrap();
        assert_eq!(denoise, vec![vec![3, 4, 5, 6], vec![0, 0, 0, 0]]);
        // tags only cover the real tokens
        let tag_mask: Vec<Vec<f32>> = batch.tag_mask.as_ref().unwrap().to_vec2().unwrap();
        assert_eq!(tag_mask[0], vec![1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn inference_batch_has_no_labels() {
        let batch = builder().build(sample(), false).unwrap();
        assert!(batch.labels.is_none());
        assert!(batch.tag_ids.is_none());
        assert!(batch.tag_mask.is_none());
        assert!(batch.denoise_ids.is_none());
        assert!(!batch.has_labels());
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn inference_does_not_need_gold_tags() {
        let examples = vec![Example::new(tokens(&["a"]), vec![3])];
        assert!(builder().build(examples.clone(), false).is_ok());
        assert!(matches!(
            builder().build(examples, true),
            Err(SlotFillError::MissingLabels { index: 0 })
        ));
    }

    #[test]
    fn empty_batch_fails_fast() {
        assert!(matches!(
            builder().build(Vec::new(), false),
            Err(SlotFillError::EmptyBatch)
        ));
    }

    #[test]
    fn empty_sequence_fails_fast() {
        let examples = vec![
            Example::new(tokens(&["a"]), vec![3]),
            Example::new(Vec::new(), Vec::new()),
        ];
        assert!(matches!(
            builder().build(examples, false),
            Err(SlotFillError::EmptySequence { index: 1 })
        ));
    }
}
