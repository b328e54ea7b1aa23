//! Retrieval coverage: how deep one has to read before a passage contains
//! an accepted answer.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::info;

use prefetch_core::{PrefetchResult, QuestionSource, Retriever};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageReport {
    pub max_k: usize,
    pub total_questions: usize,
    /// 1-based rank of the first answer-bearing passage -> question count.
    pub first_hit: BTreeMap<usize, usize>,
    /// Questions with no answer-bearing passage within `max_k`.
    pub misses: usize,
}

impl CoverageReport {
    pub fn hits(&self) -> usize {
        self.first_hit.values().sum()
    }

    /// Percentage of all questions answered within the first `k` passages.
    pub fn coverage_at(&self, k: usize) -> f64 {
        if self.total_questions == 0 {
            return 0.0;
        }
        let hits: usize = self.first_hit.range(..=k).map(|(_, n)| n).sum();
        hits as f64 * 100.0 / self.total_questions as f64
    }

    /// `(rank, cumulative percentage)` for every rank that saw a first hit.
    pub fn cumulative(&self) -> Vec<(usize, f64)> {
        let mut running = 0usize;
        self.first_hit
            .iter()
            .map(|(&rank, &n)| {
                running += n;
                let pct = if self.total_questions == 0 {
                    0.0
                } else {
                    running as f64 * 100.0 / self.total_questions as f64
                };
                (rank, pct)
            })
            .collect()
    }
}

pub fn analyze<R: Retriever + ?Sized>(
    retriever: &R,
    questions: &dyn QuestionSource,
    max_k: usize,
) -> PrefetchResult<CoverageReport> {
    let mut report = CoverageReport {
        max_k,
        total_questions: 0,
        first_hit: BTreeMap::new(),
        misses: 0,
    };
    for record in questions.questions()? {
        let record = record?;
        report.total_questions += 1;
        let passages = retriever.retrieve(&record.question, max_k)?;
        match passages.iter().position(|p| p.has_answer) {
            Some(i) => *report.first_hit.entry(i + 1).or_insert(0) += 1,
            None => report.misses += 1,
        }
    }
    info!(
        "coverage over {} questions: {} hits, {} misses",
        report.total_questions,
        report.hits(),
        report.misses
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use prefetch_core::{PrefetchResult, QuestionRecord, RetrievedPassage};

    /// Answer sits at the rank encoded in the question ("3?" -> rank 3).
    struct Fixed;

    impl Retriever for Fixed {
        fn retrieve(&self, question: &str, top_k: usize) -> PrefetchResult<Vec<RetrievedPassage>> {
            let hit: usize = question.trim_end_matches('?').parse().unwrap_or(0);
            Ok((1..=top_k)
                .map(|r| RetrievedPassage::new(r.to_string(), r as u32, "", "", 0.0, r == hit))
                .collect())
        }
    }

    #[test]
    fn test_first_hit_counts() {
        let questions: Vec<QuestionRecord> = ["1?", "1?", "3?", "9?", "none?"]
            .iter()
            .map(|q| QuestionRecord::new(*q, vec![]))
            .collect();
        let report = analyze(&Fixed, &questions, 5).unwrap();
        assert_eq!(report.total_questions, 5);
        assert_eq!(report.first_hit.get(&1), Some(&2));
        assert_eq!(report.first_hit.get(&3), Some(&1));
        assert_eq!(report.misses, 2);
        assert_eq!(report.hits(), 3);
        assert_eq!(report.coverage_at(1), 40.0);
        assert_eq!(report.coverage_at(2), 40.0);
        assert_eq!(report.coverage_at(5), 60.0);
        assert_eq!(report.cumulative(), vec![(1, 40.0), (3, 60.0)]);
    }

    #[test]
    fn test_empty_dataset() {
        let report = analyze(&Fixed, &Vec::<QuestionRecord>::new(), 5).unwrap();
        assert_eq!(report.total_questions, 0);
        assert_eq!(report.coverage_at(5), 0.0);
        assert!(report.cumulative().is_empty());
    }
}
