//! # Viterbi Decoding for CRF
//!
//! Implements the Viterbi algorithm for finding the most likely tag sequence
//! given emission scores, transition scores, and boundary scores.

use crate::error::{Result, SlotFillError};

/// Viterbi decoder for CRF tag sequences.
#[derive(Debug, Clone)]
pub struct ViterbiDecoder {
    num_tags: usize,
    allowed: Option<Vec<Vec<bool>>>,
    allowed_starts: Option<Vec<bool>>,
}

/// Path score and backpointer for Viterbi decoding.
#[derive(Debug, Clone, Copy)]
struct PathState {
    score: f32,
    prev_tag: Option<usize>,
}

impl ViterbiDecoder {
    /// Create a new unconstrained Viterbi decoder.
    ///
    /// # Arguments
    /// * `num_tags` - Number of distinct tags
    pub fn new(num_tags: usize) -> Self {
        Self {
            num_tags,
            allowed: None,
            allowed_starts: None,
        }
    }

    /// Forbid transitions where `allowed[from][to]` is false and starting
    /// tags where `starts[tag]` is false.
    pub fn with_constraints(mut self, allowed: Vec<Vec<bool>>, starts: Vec<bool>) -> Result<Self> {
        if allowed.len() != self.num_tags
            || allowed.iter().any(|row| row.len() != self.num_tags)
            || starts.len() != self.num_tags
        {
            return Err(SlotFillError::ShapeMismatch(format!(
                "transition constraints must be {n}x{n} with {n} start flags",
                n = self.num_tags
            )));
        }
        self.allowed = Some(allowed);
        self.allowed_starts = Some(starts);
        Ok(self)
    }

    pub fn num_tags(&self) -> usize {
        self.num_tags
    }

    pub fn is_constrained(&self) -> bool {
        self.allowed.is_some()
    }

    fn can_start(&self, tag: usize) -> bool {
        self.allowed_starts.as_ref().is_none_or(|starts| starts[tag])
    }

    fn can_follow(&self, prev_tag: usize, curr_tag: usize) -> bool {
        self.allowed
            .as_ref()
            .is_none_or(|allowed| allowed[prev_tag][curr_tag])
    }

    /// Decode the optimal tag sequence.
    ///
    /// # Arguments
    /// * `emission_scores` - `[seq_len][num_tags]` emission scores
    /// * `transition_matrix` - `[num_tags][num_tags]` scores, indexed `[from][to]`
    /// * `start_scores` - score for opening the sequence with each tag
    /// * `end_scores` - score for closing the sequence with each tag
    ///
    /// # Returns
    /// The optimal tag sequence as indices, one per emission row.
    pub fn decode(
        &self,
        emission_scores: &[Vec<f32>],
        transition_matrix: &[Vec<f32>],
        start_scores: &[f32],
        end_scores: &[f32],
    ) -> Result<Vec<usize>> {
        let seq_len = emission_scores.len();
        if seq_len == 0 {
            return Ok(Vec::new());
        }

        self.validate(emission_scores, transition_matrix, start_scores, end_scores)?;

        let mut dp: Vec<Vec<PathState>> = vec![
            vec![
                PathState {
                    score: f32::NEG_INFINITY,
                    prev_tag: None
                };
                self.num_tags
            ];
            seq_len
        ];

        for tag in 0..self.num_tags {
            if self.can_start(tag) {
                dp[0][tag].score = start_scores[tag] + emission_scores[0][tag];
            }
        }

        for pos in 1..seq_len {
            for curr_tag in 0..self.num_tags {
                let mut best_score = f32::NEG_INFINITY;
                let mut best_prev = None;

                for prev_tag in 0..self.num_tags {
                    if !self.can_follow(prev_tag, curr_tag) {
                        continue;
                    }

                    let score = dp[pos - 1][prev_tag].score
                        + transition_matrix[prev_tag][curr_tag]
                        + emission_scores[pos][curr_tag];

                    if best_prev.is_none() || score > best_score {
                        best_score = score;
                        best_prev = Some(prev_tag);
                    }
                }

                dp[pos][curr_tag] = PathState {
                    score: best_score,
                    prev_tag: best_prev,
                };
            }
        }

        let mut best_final_tag = 0;
        let mut best_final_score = f32::NEG_INFINITY;
        for tag in 0..self.num_tags {
            let score = dp[seq_len - 1][tag].score + end_scores[tag];
            if score > best_final_score {
                best_final_score = score;
                best_final_tag = tag;
            }
        }

        let mut path = Vec::with_capacity(seq_len);
        path.push(best_final_tag);
        let mut curr_tag = best_final_tag;

        for pos in (1..seq_len).rev() {
            curr_tag = dp[pos][curr_tag].prev_tag.unwrap_or(0);
            path.push(curr_tag);
        }

        path.reverse();
        Ok(path)
    }

    fn validate(
        &self,
        emission_scores: &[Vec<f32>],
        transition_matrix: &[Vec<f32>],
        start_scores: &[f32],
        end_scores: &[f32],
    ) -> Result<()> {
        if let Some(row) = emission_scores.iter().find(|row| row.len() != self.num_tags) {
            return Err(SlotFillError::ShapeMismatch(format!(
                "emission score dimension mismatch: expected {}, got {}",
                self.num_tags,
                row.len()
            )));
        }
        if transition_matrix.len() != self.num_tags
            || transition_matrix.iter().any(|row| row.len() != self.num_tags)
        {
            return Err(SlotFillError::ShapeMismatch(format!(
                "transition matrix must be {n}x{n}",
                n = self.num_tags
            )));
        }
        if start_scores.len() != self.num_tags || end_scores.len() != self.num_tags {
            return Err(SlotFillError::ShapeMismatch(format!(
                "start/end scores must have {} entries",
                self.num_tags
            )));
        }
        Ok(())
    }
}
