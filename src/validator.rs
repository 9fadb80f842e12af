use std::collections::BTreeMap;
use tracing::warn;

use crate::error::StructureViolation;
use crate::types::{ClassifiedEntry, Side, TestcaseIndex, ValidatedPair};

/// Index → position in the classified entry list, for one side
pub type SideIndices = BTreeMap<u64, usize>;

/// Outcome of pair validation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidatedSet {
    pub pairs: Vec<ValidatedPair>,
    /// One-sided indices skipped in lenient mode (always empty when strict)
    pub dropped: Vec<TestcaseIndex>,
}

/// Checks that every testcase index has exactly one input and one output
#[derive(Debug, Clone, Copy, Default)]
pub struct PairValidator {
    lenient: bool,
}

impl PairValidator {
    /// Reject any index present on only one side
    pub fn strict() -> Self {
        Self { lenient: false }
    }

    /// Drop one-sided indices instead of rejecting the archive
    pub fn lenient() -> Self {
        Self { lenient: true }
    }

    pub fn new(lenient: bool) -> Self {
        Self { lenient }
    }

    pub fn is_lenient(&self) -> bool {
        self.lenient
    }

    pub fn validate(
        &self,
        entries: &[ClassifiedEntry],
    ) -> Result<ValidatedSet, StructureViolation> {
        let (inputs, outputs) = index_sides(entries)?;

        let mut pairs = Vec::with_capacity(inputs.len().min(outputs.len()));
        let mut dropped = Vec::new();

        for (&number, &input_entry) in &inputs {
            match outputs.get(&number) {
                Some(&output_entry) => pairs.push(ValidatedPair {
                    number,
                    input_entry,
                    output_entry,
                }),
                None => self.unpaired(number, Side::Input, &mut dropped)?,
            }
        }
        for &number in outputs.keys() {
            if !inputs.contains_key(&number) {
                self.unpaired(number, Side::Output, &mut dropped)?;
            }
        }

        if inputs.is_empty() || outputs.is_empty() || pairs.is_empty() {
            return Err(StructureViolation::Empty);
        }

        dropped.sort();
        Ok(ValidatedSet { pairs, dropped })
    }

    fn unpaired(
        &self,
        number: u64,
        present: Side,
        dropped: &mut Vec<TestcaseIndex>,
    ) -> Result<(), StructureViolation> {
        if !self.lenient {
            return Err(StructureViolation::UnpairedIndex {
                number,
                present,
                missing: present.other(),
            });
        }
        warn!(
            index = number,
            side = %present,
            "dropping testcase with no {} file",
            present.other()
        );
        dropped.push(TestcaseIndex::new(present, number));
        Ok(())
    }
}

/// Split entries into per-side index maps, rejecting same-side duplicates
pub fn index_sides(
    entries: &[ClassifiedEntry],
) -> Result<(SideIndices, SideIndices), StructureViolation> {
    let mut inputs = SideIndices::new();
    let mut outputs = SideIndices::new();

    for (position, entry) in entries.iter().enumerate() {
        let side = entry.index.side;
        let map = match side {
            Side::Input => &mut inputs,
            Side::Output => &mut outputs,
        };
        if map.insert(entry.index.number, position).is_some() {
            return Err(StructureViolation::DuplicateIndex {
                side,
                number: entry.index.number,
            });
        }
    }

    Ok((inputs, outputs))
}
