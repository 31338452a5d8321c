//! # Slot Tagger
//!
//! Wires the encoder, dropout, scorer, and span decoder together. `forward`
//! produces tag predictions (and a loss for labelled batches); `decode` goes
//! all the way to `slot-value` strings.

use std::path::Path;

use candle_core::{DType, Device, Tensor};
use candle_nn::{Dropout, ModuleT, VarBuilder, VarMap};
use tracing::debug;

use crate::config::TaggerConfig;
use crate::data::Batch;
use crate::decode::{Projection, SpanDecoder};
use crate::device::resolve_device;
use crate::error::{Result, SlotFillError};
use crate::model::encoder::{BiRecurrentEncoder, SequenceEncoder};
use crate::model::scorer::{TagOutput, TagScorer};
use crate::tagging::LabelVocab;

/// Result of decoding one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeOutput {
    /// Predicted `slot-value` strings per row, in emission order.
    pub predictions: Vec<Vec<String>>,
    /// Gold `slot-value` strings per row, present for labelled batches.
    pub labels: Option<Vec<Vec<String>>>,
    /// Batch loss, present for labelled batches.
    pub loss: Option<f32>,
}

/// BiRNN tagger with an optional CRF output layer.
pub struct SlotTagger {
    config: TaggerConfig,
    device: Device,
    encoder: BiRecurrentEncoder,
    dropout: Dropout,
    output_layer: TagScorer,
    constrained: bool,
}

impl SlotTagger {
    /// Build the tagger from parameters under `vb`. Tensors live on `vb`'s device.
    pub fn new(config: TaggerConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let device = vb.device().clone();

        let encoder = BiRecurrentEncoder::new(&config, vb.clone())?;
        let output_layer = TagScorer::new(&config, vb)?;
        let dropout = Dropout::new(config.dropout);

        debug!(
            cell = %config.encoder_cell,
            layers = config.num_layer,
            hidden = config.hidden_size,
            tags = config.num_tags,
            crf = config.crf,
            "built slot tagger"
        );

        Ok(Self {
            config,
            device,
            encoder,
            dropout,
            output_layer,
            constrained: false,
        })
    }

    /// Build with trainable parameters registered in `varmap`, on the
    /// device named by the configuration.
    pub fn from_varmap(config: TaggerConfig, varmap: &VarMap) -> Result<Self> {
        let device = resolve_device(&config.device)?;
        let vb = VarBuilder::from_varmap(varmap, DType::F32, &device);
        Self::new(config, vb)
    }

    /// Load weights from a safetensors file.
    pub fn from_safetensors<P: AsRef<Path>>(config: TaggerConfig, path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SlotFillError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("weights not found at {}", path.display()),
            )));
        }
        let device = resolve_device(&config.device)?;
        // SAFETY: the file is only read, and must not be modified while mapped.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[path], DType::F32, &device)? };
        Self::new(config, vb)
    }

    /// Bind the label vocabulary. Enables BIO-constrained Viterbi when the
    /// configuration asks for it.
    pub fn with_label_vocab(mut self, vocab: &LabelVocab) -> Result<Self> {
        check_vocab(vocab, self.config.num_tags)?;
        if self.config.crf && self.config.constrained_decoding {
            self.output_layer = self.output_layer.with_constraints(vocab)?;
            self.constrained = true;
        }
        Ok(self)
    }

    pub fn config(&self) -> &TaggerConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn encoder(&self) -> &BiRecurrentEncoder {
        &self.encoder
    }

    pub fn scorer(&self) -> &TagScorer {
        &self.output_layer
    }

    /// Encode and score a batch. Dropout is active only when `train` is set.
    /// The loss is computed whenever the batch carries gold tags.
    pub fn forward(&self, batch: &Batch, train: bool) -> Result<TagOutput> {
        if !batch.device().same_device(&self.device) {
            return Err(SlotFillError::Device(format!(
                "batch on {:?} but model on {:?}",
                batch.device(),
                self.device
            )));
        }

        let hiddens = self.encoder.encode(&batch.input_ids, &batch.lengths)?;
        let hiddens = self.dropout.forward_t(&hiddens, train)?;
        self.output_layer
            .forward(&hiddens, batch.scoring_mask(), batch.tag_ids.as_ref())
    }

    /// Training loss for a labelled batch.
    pub fn loss(&self, batch: &Batch) -> Result<Tensor> {
        if !batch.has_labels() {
            return Err(SlotFillError::MissingLabels { index: 0 });
        }
        self.forward(batch, true)?
            .loss
            .ok_or(SlotFillError::MissingLabels { index: 0 })
    }

    /// Predict `slot-value` strings for every row of `batch`.
    pub fn decode<P: Projection + ?Sized>(
        &self,
        label_vocab: &LabelVocab,
        batch: &Batch,
        projection: &P,
    ) -> Result<DecodeOutput> {
        check_vocab(label_vocab, self.config.num_tags)?;
        if self.config.crf && self.config.constrained_decoding && !self.constrained {
            return Err(SlotFillError::InvalidConfig(
                "constrained decoding requires with_label_vocab before decode".into(),
            ));
        }

        let output = self.forward(batch, false)?;
        let paths = output.predictions.tag_ids()?;
        let decoder = SpanDecoder::new(projection);

        let predictions = batch
            .utt
            .iter()
            .zip(&paths)
            .map(|(utt, path)| decoder.decode_ids(label_vocab, path, utt))
            .collect::<Result<Vec<_>>>()?;

        let loss = output
            .loss
            .map(|loss| loss.to_scalar::<f32>())
            .transpose()?;

        debug!(
            rows = batch.len(),
            slots = predictions.iter().map(Vec::len).sum::<usize>(),
            "decoded batch"
        );

        Ok(DecodeOutput {
            predictions,
            labels: batch.labels.clone(),
            loss,
        })
    }
}

fn check_vocab(vocab: &LabelVocab, num_tags: usize) -> Result<()> {
    if vocab.num_tags() != num_tags {
        return Err(SlotFillError::ShapeMismatch(format!(
            "label vocabulary has {} tags, model has {num_tags}",
            vocab.num_tags()
        )));
    }
    Ok(())
}
