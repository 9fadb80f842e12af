use lazy_static::lazy_static;
use regex::Regex;

use crate::types::{Side, TestcaseIndex};

/// Directory markers that may appear as empty entries
pub const DIRECTORY_MARKERS: [&str; 2] = ["input/", "output/"];

/// Member name pattern for one side of a testcase pair
pub struct EntryPattern {
    pub side: Side,
    pub regex: Regex,
}

lazy_static! {
    /// Compiled member name patterns; the first capture group is the index
    pub static ref ENTRY_PATTERNS: [EntryPattern; 2] = [
        EntryPattern {
            side: Side::Input,
            regex: Regex::new(r"^input/input([0-9]+)\.([a-zA-Z]+)$").expect("Invalid input pattern"),
        },
        EntryPattern {
            side: Side::Output,
            regex: Regex::new(r"^output/output([0-9]+)\.([a-zA-Z]+)$").expect("Invalid output pattern"),
        },
    ];
}

/// What an archive member name turned out to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryClass {
    /// `input/` or `output/` directory marker, ignored
    Directory,
    Testcase(TestcaseIndex),
    /// Matched a pattern but the index is zero or overflows `u64`
    IndexOutOfRange,
    Unmatched,
}

/// Classify a member name against the testcase patterns
pub fn classify_entry_name(name: &str) -> EntryClass {
    if DIRECTORY_MARKERS.contains(&name) {
        return EntryClass::Directory;
    }

    for pattern in ENTRY_PATTERNS.iter() {
        if let Some(caps) = pattern.regex.captures(name) {
            let digits = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            return match digits.parse::<u64>() {
                Ok(0) | Err(_) => EntryClass::IndexOutOfRange,
                Ok(number) => EntryClass::Testcase(TestcaseIndex::new(pattern.side, number)),
            };
        }
    }

    EntryClass::Unmatched
}

#[cfg(test)]
mod tests {
    use super::*;

    fn testcase(side: Side, number: u64) -> EntryClass {
        EntryClass::Testcase(TestcaseIndex::new(side, number))
    }

    #[test]
    fn test_matching_names() {
        assert_eq!(classify_entry_name("input/input1.txt"), testcase(Side::Input, 1));
        assert_eq!(classify_entry_name("output/output12.in"), testcase(Side::Output, 12));
        assert_eq!(classify_entry_name("input/input007.CSV"), testcase(Side::Input, 7));
        assert_eq!(classify_entry_name("output/output0010.txt"), testcase(Side::Output, 10));
    }

    #[test]
    fn test_directory_markers() {
        assert_eq!(classify_entry_name("input/"), EntryClass::Directory);
        assert_eq!(classify_entry_name("output/"), EntryClass::Directory);
        assert_eq!(classify_entry_name("extra/"), EntryClass::Unmatched);
        assert_eq!(classify_entry_name("input/nested/"), EntryClass::Unmatched);
    }

    #[test]
    fn test_rejected_names() {
        for name in [
            "input/input.txt",
            "input/inputA.txt",
            "input/input1",
            "input/input1.",
            "input/input1.t1",
            "input/input1.txt.bak",
            "output/input1.txt",
            "input/output1.txt",
            "Input/input1.txt",
            "./input/input1.txt",
            "nested/input/input1.txt",
            "__MACOSX/input/._input1.txt",
            "README.md",
            "input/input1.txt\n",
        ] {
            assert_eq!(classify_entry_name(name), EntryClass::Unmatched, "{name}");
        }
    }

    #[test]
    fn test_index_out_of_range() {
        for name in [
            "input/input0.txt",
            "output/output000.ans",
            "input/input99999999999999999999999.txt",
            "output/output18446744073709551616.txt",
        ] {
            assert_eq!(classify_entry_name(name), EntryClass::IndexOutOfRange, "{name}");
        }
        assert_eq!(
            classify_entry_name("output/output18446744073709551615.txt"),
            testcase(Side::Output, u64::MAX)
        );
    }
}
