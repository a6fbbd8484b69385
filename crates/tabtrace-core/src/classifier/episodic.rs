//! Stage 3 — episodic adjustment
//!
//! Nudges or overrides Stage 2's classification using prior corrections on
//! semantically similar URLs. Agreement strength is derived from cosine
//! similarity to the matched neighbor, since corrections carry no
//! confidence of their own (see `DESIGN.md`).

use crate::embeddings::cosine_similarity;
use crate::model::{Classification, EpisodicCorrection};

#[derive(Debug, Clone)]
pub struct EpisodicOutcome {
    pub page_type: Classification,
    pub confidence: f32,
    pub overridden: bool,
}

/// Rank `corrections` by similarity to `query_embedding`, keep the nearest
/// `k`, and adjust `(stage2_type, stage2_confidence)` if enough of them
/// agree on a different classification.
pub fn adjust(
    corrections: &[EpisodicCorrection],
    query_embedding: &[f32],
    stage2_type: Classification,
    stage2_confidence: f32,
    k: usize,
    agreement_threshold: usize,
) -> EpisodicOutcome {
    let mut ranked: Vec<(f32, &EpisodicCorrection)> = corrections
        .iter()
        .map(|c| (cosine_similarity(query_embedding, &c.embedding), c))
        .collect();
    ranked.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(k);

    if ranked.is_empty() {
        return EpisodicOutcome {
            page_type: stage2_type,
            confidence: stage2_confidence,
            overridden: false,
        };
    }

    // Group neighbors by the classification they corrected toward, other
    // than the one Stage 2 already picked.
    let mut by_type: Vec<(Classification, Vec<f32>)> = Vec::new();
    for (score, correction) in &ranked {
        if correction.corrected_classification == stage2_type {
            continue;
        }
        match by_type
            .iter_mut()
            .find(|(t, _)| *t == correction.corrected_classification)
        {
            Some((_, scores)) => scores.push(*score),
            None => by_type.push((correction.corrected_classification, vec![*score])),
        }
    }

    if let Some((winner, scores)) = by_type.into_iter().max_by_key(|(_, s)| s.len()) {
        if scores.len() >= agreement_threshold {
            let mean = scores.iter().sum::<f32>() / scores.len() as f32;
            return EpisodicOutcome {
                page_type: winner,
                confidence: (mean + 0.1).min(1.0),
                overridden: true,
            };
        }
    }

    let agreement_signal: f32 = ranked
        .iter()
        .map(|(score, c)| {
            if c.corrected_classification == stage2_type {
                *score
            } else {
                -*score
            }
        })
        .sum::<f32>()
        / ranked.len() as f32;

    EpisodicOutcome {
        page_type: stage2_type,
        confidence: (stage2_confidence + agreement_signal * 0.2).clamp(0.0, 1.0),
        overridden: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn correction(corrected: Classification, embedding: Vec<f32>) -> EpisodicCorrection {
        EpisodicCorrection {
            id: "c1".to_string(),
            page_id: "p1".to_string(),
            url: "https://example.com".to_string(),
            original_classification: Classification::Other,
            corrected_classification: corrected,
            embedding,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn no_corrections_is_a_no_op() {
        let outcome = adjust(&[], &[1.0, 0.0], Classification::Other, 0.4, 5, 3);
        assert_eq!(outcome.page_type, Classification::Other);
        assert!(!outcome.overridden);
    }

    #[test]
    fn three_of_five_agreement_overrides() {
        let query = vec![1.0, 0.0];
        let corrections: Vec<EpisodicCorrection> = (0..5)
            .map(|i| {
                let t = if i < 3 {
                    Classification::Knowledge
                } else {
                    Classification::Leisure
                };
                correction(t, vec![1.0, 0.0])
            })
            .collect();

        let outcome = adjust(&corrections, &query, Classification::Other, 0.3, 5, 3);
        assert!(outcome.overridden);
        assert_eq!(outcome.page_type, Classification::Knowledge);
    }

    #[test]
    fn below_threshold_only_nudges_confidence() {
        let query = vec![1.0, 0.0];
        let corrections: Vec<EpisodicCorrection> =
            (0..2).map(|_| correction(Classification::Knowledge, vec![1.0, 0.0])).collect();

        let outcome = adjust(&corrections, &query, Classification::Other, 0.3, 5, 3);
        assert!(!outcome.overridden);
        assert_eq!(outcome.page_type, Classification::Other);
        assert!(outcome.confidence > 0.3);
    }
}
