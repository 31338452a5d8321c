//! A single tagging instance.

/// One utterance with its token ids and, for training, its gold annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Example {
    utt: Vec<String>,
    input_idx: Vec<u32>,
    denoise_idx: Vec<u32>,
    tag_id: Option<Vec<u32>>,
    slotvalue: Option<Vec<String>>,
}

impl Example {
    /// Create an inference example from raw tokens and their input ids.
    pub fn new(utt: Vec<String>, input_idx: Vec<u32>) -> Self {
        Self {
            utt,
            input_idx,
            denoise_idx: Vec::new(),
            tag_id: None,
            slotvalue: None,
        }
    }

    /// Attach an auxiliary denoising id sequence.
    pub fn with_denoise(mut self, denoise_idx: Vec<u32>) -> Self {
        self.denoise_idx = denoise_idx;
        self
    }

    /// Attach gold tag ids and gold `slot-value` strings.
    pub fn with_labels(mut self, tag_id: Vec<u32>, slotvalue: Vec<String>) -> Self {
        self.tag_id = Some(tag_id);
        self.slotvalue = Some(slotvalue);
        self
    }

    /// Raw utterance tokens.
    pub fn utt(&self) -> &[String] {
        &self.utt
    }

    pub fn input_idx(&self) -> &[u32] {
        &self.input_idx
    }

    pub fn denoise_idx(&self) -> &[u32] {
        &self.denoise_idx
    }

    pub fn tag_id(&self) -> Option<&[u32]> {
        self.tag_id.as_deref()
    }

    pub fn slotvalue(&self) -> Option<&[String]> {
        self.slotvalue.as_deref()
    }

    /// Length used for sorting and padding: the longer of the two id views.
    pub fn effective_len(&self) -> usize {
        self.input_idx.len().max(self.denoise_idx.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_len_takes_longer_view() {
        let ex = Example::new(vec!["a".into(), "b".into()], vec![3, 4]);
        assert_eq!(ex.effective_len(), 2);

        let ex = ex.with_denoise(vec![3, 4, 5]);
        assert_eq!(ex.effective_len(), 3);
    }

    #[test]
    fn labels_are_optional() {
        let ex = Example::new(vec!["a".into()], vec![3]);
        assert!(ex.tag_id().is_none());

        let ex = ex.with_labels(vec![1], vec![]);
        assert_eq!(ex.tag_id(), Some(&[1u32][..]));
        assert_eq!(ex.slotvalue().map(<[String]>::len), Some(0));
    }
}
