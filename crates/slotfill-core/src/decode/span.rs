//! # BIO Span Decoding
//!
//! Walks a predicted tag sequence, groups contiguous `B-*`/`I-*` tags into
//! spans, and resolves each span to a `slot-value` string through a
//! [`Projection`].

use tracing::trace;

use crate::error::Result;
use crate::tagging::label_vocab::{BioPrefix, LabelVocab, slot_name};

/// Maps a raw span value to a canonical slot value.
///
/// Returning `None` drops the span from the output.
pub trait Projection {
    fn project(&self, slot: &str, value: &str) -> Option<String>;
}

impl<F> Projection for F
where
    F: Fn(&str, &str) -> Option<String>,
{
    fn project(&self, slot: &str, value: &str) -> Option<String> {
        self(slot, value)
    }
}

/// Projection that keeps every raw value as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityProjection;

impl Projection for IdentityProjection {
    fn project(&self, _slot: &str, value: &str) -> Option<String> {
        Some(value.to_string())
    }
}

/// Token indices and tags of the span being built.
#[derive(Debug, Default)]
struct SpanBuffer<'t> {
    indices: Vec<usize>,
    tags: Vec<&'t str>,
}

impl<'t> SpanBuffer<'t> {
    fn is_open(&self) -> bool {
        !self.tags.is_empty()
    }

    fn push(&mut self, idx: usize, tag: &'t str) {
        self.indices.push(idx);
        self.tags.push(tag);
    }

    fn clear(&mut self) {
        self.indices.clear();
        self.tags.clear();
    }
}

/// Turns tag sequences into `slot-value` strings.
pub struct SpanDecoder<'p, P: ?Sized> {
    projection: &'p P,
}

impl<'p, P: Projection + ?Sized> SpanDecoder<'p, P> {
    pub fn new(projection: &'p P) -> Self {
        Self { projection }
    }

    /// Decode tag strings against the utterance tokens.
    ///
    /// Tags past the end of `utt` are ignored. A continuation tag with no
    /// open span starts a span of its own.
    pub fn decode<S: AsRef<str>>(&self, tags: &[S], utt: &[String]) -> Vec<String> {
        let mut output = Vec::new();
        let mut buffer = SpanBuffer::default();

        for (idx, tag) in tags.iter().take(utt.len()).enumerate() {
            let tag = tag.as_ref();
            match BioPrefix::of(tag) {
                prefix @ (BioPrefix::Outside | BioPrefix::Begin) if buffer.is_open() => {
                    self.close(&mut buffer, utt, &mut output);
                    if prefix == BioPrefix::Begin {
                        buffer.push(idx, tag);
                    }
                }
                prefix @ (BioPrefix::Begin | BioPrefix::Inside) => {
                    if prefix == BioPrefix::Inside && !buffer.is_open() {
                        trace!(idx, tag, "continuation tag without an open span");
                    }
                    buffer.push(idx, tag);
                }
                BioPrefix::Outside | BioPrefix::Other => {}
            }
        }

        if buffer.is_open() {
            self.close(&mut buffer, utt, &mut output);
        }
        output
    }

    /// Decode tag ids, looking each one up in `vocab`.
    pub fn decode_ids(&self, vocab: &LabelVocab, tag_ids: &[u32], utt: &[String]) -> Result<Vec<String>> {
        let tags = tag_ids
            .iter()
            .take(utt.len())
            .map(|&id| vocab.convert_idx_to_tag(id))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.decode(&tags, utt))
    }

    fn close(&self, buffer: &mut SpanBuffer<'_>, utt: &[String], output: &mut Vec<String>) {
        let slot = slot_name(buffer.tags[0]);
        let value: String = buffer.indices.iter().map(|&j| utt[j].as_str()).collect();
        buffer.clear();

        // the projection sees only the last field of the slot name
        let key = slot.rsplit('-').next().unwrap_or_default();
        if let Some(projected) = self.projection.project(key, &value) {
            output.push(format!("{slot}-{projected}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    fn decode(tags: &[&str], words: &[&str]) -> Vec<String> {
        SpanDecoder::new(&IdentityProjection).decode(tags, &tokens(words))
    }

    #[test]
    fn joins_span_tokens_without_separator() {
        let out = decode(
            &["O", "O", "B-device", "I-device"],
            &["turn", "on", "the", "light"],
        );
        assert_eq!(out, vec!["device-thelight"]);
    }

    #[test]
    fn flushes_span_open_at_end() {
        let out = decode(&["B-loc", "I-loc"], &["new", "york"]);
        assert_eq!(out, vec!["loc-newyork"]);
    }

    #[test]
    fn all_outside_yields_nothing() {
        assert!(decode(&["O", "O", "O"], &["a", "b", "c"]).is_empty());
    }

    #[test]
    fn begin_closes_previous_span() {
        let out = decode(&["B-a", "B-b", "I-b", "O", "B-a"], &["x", "y", "z", "w", "v"]);
        assert_eq!(out, vec!["a-x", "b-yz", "a-v"]);
    }

    #[test]
    fn stops_at_utterance_length() {
        let out = decode(&["O", "B-loc", "I-loc", "I-loc"], &["to", "paris"]);
        assert_eq!(out, vec!["loc-paris"]);
    }

    #[test]
    fn orphan_continuation_is_accepted() {
        let out = decode(&["O", "I-loc", "I-loc"], &["in", "new", "york"]);
        assert_eq!(out, vec!["loc-newyork"]);
    }

    #[test]
    fn mixed_continuation_uses_first_tag_slot() {
        let out = decode(&["B-loc", "I-device"], &["a", "b"]);
        assert_eq!(out, vec!["loc-ab"]);
    }

    #[test]
    fn pad_tags_are_ignored() {
        let out = decode(&["B-loc", "<pad>", "I-loc"], &["a", "b", "c"]);
        assert_eq!(out, vec!["loc-ac"]);
    }

    #[test]
    fn absent_projection_drops_only_that_span() {
        let projection = |slot: &str, value: &str| {
            if slot == "device" {
                None
            } else {
                Some(value.to_uppercase())
            }
        };
        let out = SpanDecoder::new(&projection).decode(
            &["B-device", "O", "B-loc"],
            &tokens(&["lamp", "in", "paris"]),
        );
        assert_eq!(out, vec!["loc-PARIS"]);
    }

    #[test]
    fn projection_sees_last_slot_field() {
        let projection = |slot: &str, value: &str| Some(format!("{slot}:{value}"));
        let out = SpanDecoder::new(&projection).decode(
            &["B-inform-from-city", "I-inform-from-city"],
            &tokens(&["san", "jose"]),
        );
        assert_eq!(out, vec!["inform-from-city-city:sanjose"]);
    }

    #[test]
    fn repeated_decodes_agree() {
        let tags = ["B-a", "I-a", "O", "B-b"];
        let words = ["p", "q", "r", "s"];
        let first = decode(&tags, &words);
        for _ in 0..5 {
            assert_eq!(decode(&tags, &words), first);
        }
    }

    #[test]
    fn decodes_ids_through_vocab() {
        let vocab = LabelVocab::from_slots(["device"]);
        let ids = vocab.encode_tags(&["O", "B-device", "I-device"]).unwrap();
        let decoder = SpanDecoder::new(&IdentityProjection);

        let out = decoder
            .decode_ids(&vocab, &ids, &tokens(&["the", "fan", "light"]))
            .unwrap();
        assert_eq!(out, vec!["device-fanlight"]);

        assert!(decoder.decode_ids(&vocab, &[42], &tokens(&["x"])).is_err());
        // ids past the utterance are never looked up
        assert!(decoder.decode_ids(&vocab, &[1, 42], &tokens(&["x"])).is_ok());
    }
}
