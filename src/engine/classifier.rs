//! Age and gender classification decoding
//!
//! Both classifiers emit one probability per class. The winning index is
//! looked up in a fixed label table.

use serde::Serialize;
use tracing::debug;

use super::cache::ModelRole;
use crate::error::{PipelineError, Result};

/// Gender labels in classifier output order
pub const GENDER_LABELS: [&str; 2] = ["female", "male"];

/// Age brackets in classifier output order
pub const AGE_LABELS: [&str; 8] = [
    "0-2", "4-6", "8-12", "15-20", "25-32", "38-43", "48-53", "60-100",
];

/// The two classifiers the pipeline runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classifier {
    Age,
    Gender,
}

impl Classifier {
    pub fn role(&self) -> ModelRole {
        match self {
            Classifier::Age => ModelRole::AgeClassifier,
            Classifier::Gender => ModelRole::GenderClassifier,
        }
    }

    pub fn labels(&self) -> &'static [&'static str] {
        match self {
            Classifier::Age => &AGE_LABELS,
            Classifier::Gender => &GENDER_LABELS,
        }
    }
}

/// A labeled prediction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub label: String,
    pub index: usize,
    pub probability: f32,
}

/// Pick the label of the highest probability.
///
/// The scan keeps a running maximum starting from zero and only moves on a
/// strictly greater value, so ties resolve to the lowest index. A vector whose
/// length differs from `labels` is a decoding error.
pub fn decode_classification(
    probabilities: &[f32],
    labels: &[&str],
) -> Result<ClassificationResult> {
    if labels.is_empty() {
        return Err(PipelineError::decoding("label table is empty"));
    }
    if probabilities.len() != labels.len() {
        return Err(PipelineError::decoding(format!(
            "classifier produced {} probabilities for {} labels",
            probabilities.len(),
            labels.len()
        )));
    }

    let mut best_index = 0;
    let mut best_probability = 0f32;
    for (i, &p) in probabilities.iter().enumerate() {
        debug!("class {} -> {}", i, p);
        if p > best_probability {
            best_probability = p;
            best_index = i;
        }
    }

    debug!("best {} -> {}", best_index, best_probability);

    Ok(ClassificationResult {
        label: labels[best_index].to_string(),
        index: best_index,
        probability: best_probability,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argmax_picks_label() {
        let result = decode_classification(&[0.1, 0.7, 0.2], &["0-2", "4-6", "8-12"]).unwrap();
        assert_eq!(result.label, "4-6");
        assert_eq!(result.index, 1);
        assert!((result.probability - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_tie_keeps_lowest_index() {
        let result = decode_classification(&[0.5, 0.5], &GENDER_LABELS).unwrap();
        assert_eq!(result.label, "female");

        let result = decode_classification(&[0.1, 0.3, 0.3, 0.3], &["a", "b", "c", "d"]).unwrap();
        assert_eq!(result.label, "b");
    }

    #[test]
    fn test_age_table() {
        let mut probs = vec![0.0; 8];
        probs[7] = 0.9;
        let result = decode_classification(&probs, Classifier::Age.labels()).unwrap();
        assert_eq!(result.label, "60-100");
    }

    #[test]
    fn test_non_positive_vector_falls_back_to_first() {
        let result = decode_classification(&[0.0, 0.0], &GENDER_LABELS).unwrap();
        assert_eq!(result.index, 0);
        let result = decode_classification(&[f32::NAN, 0.4], &GENDER_LABELS).unwrap();
        assert_eq!(result.label, "male");
    }

    #[test]
    fn test_length_mismatch_is_error() {
        let err = decode_classification(&[0.2, 0.8, 0.0], &GENDER_LABELS).unwrap_err();
        assert!(matches!(err, PipelineError::Decoding(_)));

        let err = decode_classification(&[1.0], &AGE_LABELS).unwrap_err();
        assert!(matches!(err, PipelineError::Decoding(_)));

        assert!(decode_classification(&[], &[]).is_err());
    }

    #[test]
    fn test_classifier_roles() {
        assert_eq!(Classifier::Age.role(), ModelRole::AgeClassifier);
        assert_eq!(Classifier::Gender.labels().len(), 2);
    }
}
