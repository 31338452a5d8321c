//! # BIO Label Vocabulary
//!
//! Maps tag ids to tag strings and back. Uses the BIO (Begin-Inside-Outside)
//! tagging scheme with a reserved pad tag.

use std::collections::HashMap;
use std::fmt;

use crate::error::{Result, SlotFillError};

/// Tag reserved for padding positions, always id 0.
pub const PAD_TAG: &str = "<pad>";

/// Outside tag, always id 1.
pub const OUTSIDE_TAG: &str = "O";

/// The BIO role of a tag string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BioPrefix {
    Begin,
    Inside,
    Outside,
    /// Anything else, such as the pad tag.
    Other,
}

impl BioPrefix {
    /// Classify a tag by its leading character, the way the span decoder does.
    pub fn of(tag: &str) -> Self {
        if tag == OUTSIDE_TAG {
            BioPrefix::Outside
        } else if tag.starts_with('B') {
            BioPrefix::Begin
        } else if tag.starts_with('I') {
            BioPrefix::Inside
        } else {
            BioPrefix::Other
        }
    }
}

impl fmt::Display for BioPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BioPrefix::Begin => write!(f, "B"),
            BioPrefix::Inside => write!(f, "I"),
            BioPrefix::Outside => write!(f, "O"),
            BioPrefix::Other => write!(f, "?"),
        }
    }
}

/// Slot name carried by a tag: every `-`-separated field after the first.
///
/// `"B-from-city"` yields `"from-city"`, `"O"` yields `""`.
pub fn slot_name(tag: &str) -> String {
    tag.split('-').skip(1).collect::<Vec<_>>().join("-")
}

/// Bidirectional mapping between tag strings and tag ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelVocab {
    tag2idx: HashMap<String, u32>,
    idx2tag: Vec<String>,
}

impl LabelVocab {
    /// Create a vocabulary holding only `<pad>` and `O`.
    pub fn new() -> Self {
        let mut vocab = Self {
            tag2idx: HashMap::new(),
            idx2tag: Vec::new(),
        };
        vocab.add_tag(PAD_TAG);
        vocab.add_tag(OUTSIDE_TAG);
        vocab
    }

    /// Create a vocabulary with `B-` and `I-` tags for every slot, in order.
    pub fn from_slots<I, S>(slots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut vocab = Self::new();
        for slot in slots {
            vocab.add_slot(slot.as_ref());
        }
        vocab
    }

    /// Add `B-<slot>` and `I-<slot>`. Existing tags keep their ids.
    pub fn add_slot(&mut self, slot: &str) {
        self.add_tag(&format!("B-{slot}"));
        self.add_tag(&format!("I-{slot}"));
    }

    fn add_tag(&mut self, tag: &str) {
        if !self.tag2idx.contains_key(tag) {
            self.tag2idx.insert(tag.to_string(), self.idx2tag.len() as u32);
            self.idx2tag.push(tag.to_string());
        }
    }

    /// Total number of tags, including `<pad>`.
    pub fn num_tags(&self) -> usize {
        self.idx2tag.len()
    }

    /// Id of the pad tag.
    pub fn pad_idx(&self) -> u32 {
        0
    }

    pub fn convert_tag_to_idx(&self, tag: &str) -> Result<u32> {
        self.tag2idx
            .get(tag)
            .copied()
            .ok_or_else(|| SlotFillError::UnknownTag(tag.to_string()))
    }

    pub fn convert_idx_to_tag(&self, idx: u32) -> Result<&str> {
        self.idx2tag
            .get(idx as usize)
            .map(String::as_str)
            .ok_or(SlotFillError::UnknownTagId(idx))
    }

    /// Encode a tag string sequence into ids.
    pub fn encode_tags<S: AsRef<str>>(&self, tags: &[S]) -> Result<Vec<u32>> {
        tags.iter()
            .map(|tag| self.convert_tag_to_idx(tag.as_ref()))
            .collect()
    }

    /// All tags in id order.
    pub fn tags(&self) -> &[String] {
        &self.idx2tag
    }

    /// Check if moving from tag `from` to tag `to` is BIO-legal.
    pub fn is_valid_transition(from: &str, to: &str) -> bool {
        match BioPrefix::of(to) {
            // An I-x continues only a B-x or I-x span of the same slot.
            BioPrefix::Inside => {
                matches!(BioPrefix::of(from), BioPrefix::Begin | BioPrefix::Inside)
                    && slot_name(from) == slot_name(to)
            }
            BioPrefix::Other => false,
            BioPrefix::Begin | BioPrefix::Outside => true,
        }
    }

    /// Matrix of BIO-legal transitions, indexed `[from][to]`.
    pub fn allowed_transitions(&self) -> Vec<Vec<bool>> {
        self.idx2tag
            .iter()
            .map(|from| {
                self.idx2tag
                    .iter()
                    .map(|to| Self::is_valid_transition(from, to))
                    .collect()
            })
            .collect()
    }

    /// Tags that may open a sequence: anything but `I-*` and `<pad>`.
    pub fn allowed_starts(&self) -> Vec<bool> {
        self.idx2tag
            .iter()
            .map(|tag| matches!(BioPrefix::of(tag), BioPrefix::Begin | BioPrefix::Outside))
            .collect()
    }
}

impl Default for LabelVocab {
    fn default() -> Self {
        Self::new()
    }
}
