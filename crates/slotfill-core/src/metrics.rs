//! Slot-level evaluation metrics

use std::collections::HashSet;

use crate::error::{Result, SlotFillError};
use crate::model::DecodeOutput;

/// Exact-match accuracy and micro precision/recall/F1 over `slot-value` strings.
///
/// Each utterance is compared as a set, so repeated predictions of the same
/// slot value count once.
#[derive(Clone, Debug, PartialEq)]
pub struct SlotMetrics {
    /// Fraction of utterances whose predicted set equals the gold set
    pub accuracy: f64,
    /// Micro precision
    pub precision: f64,
    /// Micro recall
    pub recall: f64,
    /// Micro F1 score
    pub f1: f64,
    pub true_positives: usize,
    pub predicted: usize,
    pub gold: usize,
    pub utterances: usize,
}

impl SlotMetrics {
    /// Compare per-utterance predictions against gold labels.
    pub fn from_predictions(predictions: &[Vec<String>], labels: &[Vec<String>]) -> Result<Self> {
        if predictions.len() != labels.len() {
            return Err(SlotFillError::ShapeMismatch(format!(
                "{} predicted utterances but {} labelled",
                predictions.len(),
                labels.len()
            )));
        }

        let mut exact = 0usize;
        let (mut tp, mut predicted, mut gold) = (0usize, 0usize, 0usize);

        for (pred, label) in predictions.iter().zip(labels) {
            let pred: HashSet<&str> = pred.iter().map(String::as_str).collect();
            let label: HashSet<&str> = label.iter().map(String::as_str).collect();

            if pred == label {
                exact += 1;
            }
            tp += pred.intersection(&label).count();
            predicted += pred.len();
            gold += label.len();
        }

        let utterances = predictions.len();
        let accuracy = ratio(exact, utterances);
        let precision = ratio(tp, predicted);
        let recall = ratio(tp, gold);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        Ok(Self {
            accuracy,
            precision,
            recall,
            f1,
            true_positives: tp,
            predicted,
            gold,
            utterances,
        })
    }

    /// Metrics for a decoded labelled batch.
    pub fn from_decode(output: &DecodeOutput) -> Result<Self> {
        let labels = output
            .labels
            .as_ref()
            .ok_or(SlotFillError::MissingLabels { index: 0 })?;
        Self::from_predictions(&output.predictions, labels)
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den > 0 { num as f64 / den as f64 } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(rows: &[&[&str]]) -> Vec<Vec<String>> {
        rows.iter()
            .map(|r| r.iter().map(|s| s.to_string()).collect())
            .collect()
    }

    #[test]
    fn perfect_predictions() {
        let gold = rows(&[&["device-light"], &[], &["loc-paris", "time-noon"]]);
        let m = SlotMetrics::from_predictions(&gold, &gold).unwrap();
        assert_eq!(m.accuracy, 1.0);
        assert_eq!(m.precision, 1.0);
        assert_eq!(m.recall, 1.0);
        assert_eq!(m.f1, 1.0);
        assert_eq!(m.utterances, 3);
    }

    #[test]
    fn partial_overlap() {
        let pred = rows(&[&["loc-paris", "time-dusk"], &["device-fan"]]);
        let gold = rows(&[&["time-noon", "loc-paris"], &[]]);
        let m = SlotMetrics::from_predictions(&pred, &gold).unwrap();

        assert_eq!(m.true_positives, 1);
        assert_eq!(m.predicted, 3);
        assert_eq!(m.gold, 2);
        assert_eq!(m.accuracy, 0.0);
        assert!((m.precision - 1.0 / 3.0).abs() < 1e-12);
        assert!((m.recall - 0.5).abs() < 1e-12);
        assert!((m.f1 - 0.4).abs() < 1e-12);
    }

    #[test]
    fn order_and_duplicates_do_not_matter() {
        let pred = rows(&[&["b-2", "a-1", "a-1"]]);
        let gold = rows(&[&["a-1", "b-2"]]);
        let m = SlotMetrics::from_predictions(&pred, &gold).unwrap();
        assert_eq!(m.accuracy, 1.0);
        assert_eq!(m.f1, 1.0);
    }

    #[test]
    fn empty_everything_scores_zero() {
        let m = SlotMetrics::from_predictions(&[], &[]).unwrap();
        assert_eq!(m.accuracy, 0.0);
        assert_eq!(m.f1, 0.0);
    }

    #[test]
    fn length_mismatch_fails() {
        let result = SlotMetrics::from_predictions(&rows(&[&[]]), &[]);
        assert!(matches!(result, Err(SlotFillError::ShapeMismatch(_))));
    }

    #[test]
    fn decode_output_without_labels_fails() {
        let output = DecodeOutput {
            predictions: rows(&[&["loc-paris"]]),
            labels: None,
            loss: None,
        };
        assert!(matches!(
            SlotMetrics::from_decode(&output),
            Err(SlotFillError::MissingLabels { .. })
        ));

        let labelled = DecodeOutput {
            labels: Some(rows(&[&["loc-paris"]])),
            ..output
        };
        assert_eq!(SlotMetrics::from_decode(&labelled).unwrap().accuracy, 1.0);
    }
}
