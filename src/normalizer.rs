//! Dense renumbering of validated testcase indices.
//!
//! Authors number their files however they like (`{2, 5, 9}`), but the judge
//! iterates `1..=N`. The plan produced here assigns canonical ids in ascending
//! order of the original index, never in archive order.

use crate::types::{CaseId, CanonicalCase, ValidatedPair};

/// Canonical numbering for one ingestion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CanonicalPlan {
    cases: Vec<CanonicalCase>,
}

impl CanonicalPlan {
    pub fn cases(&self) -> &[CanonicalCase] {
        &self.cases
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    /// `(canonical id, original index)` in canonical order
    pub fn mapping(&self) -> Vec<(CaseId, u64)> {
        self.cases.iter().map(|c| (c.id, c.original)).collect()
    }
}

/// Maps a sparse validated index set onto `1..=N`
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexNormalizer;

impl IndexNormalizer {
    pub fn normalize(&self, mut pairs: Vec<ValidatedPair>) -> CanonicalPlan {
        pairs.sort_unstable_by_key(|p| p.number);
        debug_assert!(
            pairs.windows(2).all(|w| w[0].number < w[1].number),
            "validated indices must be unique"
        );

        let cases = pairs
            .into_iter()
            .enumerate()
            .map(|(position, pair)| CanonicalCase {
                id: CaseId::new(position + 1),
                original: pair.number,
                input_entry: pair.input_entry,
                output_entry: pair.output_entry,
            })
            .collect();

        CanonicalPlan { cases }
    }
}
