use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Additive boosts applied on top of the store's combined score during the
/// rerank step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BoostFactors {
    pub context_boost: f32,
    pub summary_boost: f32,
    pub section_boost: f32,
}

impl Default for BoostFactors {
    fn default() -> Self {
        Self {
            context_boost: 0.05,
            summary_boost: 0.03,
            section_boost: 0.02,
        }
    }
}

/// Signals a candidate carries into reranking.
#[derive(Debug, Clone, Copy, Default)]
pub struct RerankSignals {
    pub has_context: bool,
    pub has_summary: bool,
    pub has_adjacent_context: bool,
    pub has_section: bool,
}

/// `final = combined + boosts`. Boosts are additive; adjacent enrichment is
/// worth half a context boost.
pub fn final_score(combined_score: f32, signals: RerankSignals, boosts: BoostFactors) -> f32 {
    let mut score = combined_score;
    if signals.has_context {
        score += boosts.context_boost;
    }
    if signals.has_summary {
        score += boosts.summary_boost;
    }
    if signals.has_adjacent_context {
        score += boosts.context_boost / 2.0;
    }
    if signals.has_section {
        score += boosts.section_boost;
    }
    score
}

/// Sort candidates by final score descending, ids as the stable tiebreaker.
pub fn sort_by_final_score_desc<T, F>(items: &mut [T], score: F)
where
    F: Fn(&T) -> (f32, &str),
{
    items.sort_by(|a, b| {
        let (score_a, id_a) = score(a);
        let (score_b, id_b) = score(b);
        score_b
            .partial_cmp(&score_a)
            .unwrap_or(Ordering::Equal)
            .then_with(|| id_a.cmp(id_b))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_boosts_are_additive() {
        let boosts = BoostFactors::default();
        let signals = RerankSignals {
            has_context: true,
            has_summary: true,
            has_adjacent_context: true,
            has_section: true,
        };

        let expected = 0.5 + 0.05 + 0.03 + 0.025 + 0.02;
        assert!((final_score(0.5, signals, boosts) - expected).abs() < 1e-6);
    }

    #[test]
    fn test_no_signals_means_no_boost() {
        let boosts = BoostFactors::default();
        let score = final_score(0.42, RerankSignals::default(), boosts);
        assert!((score - 0.42).abs() < f32::EPSILON);
    }

    #[test]
    fn test_context_breaks_tie_between_equal_combined_scores() {
        // The rerank monotonicity property: with identical combined scores,
        // the chunk carrying a context ranks at least as high.
        let boosts = BoostFactors::default();
        let with_context = final_score(
            0.5,
            RerankSignals {
                has_context: true,
                ..RerankSignals::default()
            },
            boosts,
        );
        let without_context = final_score(0.5, RerankSignals::default(), boosts);
        assert!(with_context > without_context);
    }

    #[test]
    fn test_sort_orders_descending_with_stable_ties() {
        let mut items = vec![
            ("b".to_string(), 0.3f32),
            ("a".to_string(), 0.9f32),
            ("d".to_string(), 0.3f32),
            ("c".to_string(), 0.7f32),
        ];

        sort_by_final_score_desc(&mut items, |item| (item.1, item.0.as_str()));

        let ids: Vec<&str> = items.iter().map(|item| item.0.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b", "d"]);
    }
}
