//! Archive builders shared by the unit tests.

use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Build a zip in memory; names ending in `/` become directory entries
pub(crate) fn zip_bytes<N: AsRef<str>, D: AsRef<[u8]>>(entries: &[(N, D)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    for (name, data) in entries {
        let name = name.as_ref();
        if name.ends_with('/') {
            writer.add_directory(name, options).unwrap();
        } else {
            writer.start_file(name, options).unwrap();
            writer.write_all(data.as_ref()).unwrap();
        }
    }
    writer.finish().unwrap().into_inner()
}

/// `input/input{n}.txt` + `output/output{n}.txt` for every n, with both directory markers
pub(crate) fn paired_entries(numbers: &[u64]) -> Vec<(String, Vec<u8>)> {
    let mut entries = vec![
        ("input/".to_string(), Vec::new()),
        ("output/".to_string(), Vec::new()),
    ];
    for n in numbers {
        entries.push((format!("input/input{n}.txt"), format!("in {n}\n").into_bytes()));
        entries.push((format!("output/output{n}.txt"), format!("out {n}\n").into_bytes()));
    }
    entries
}

pub(crate) fn paired_zip(numbers: &[u64]) -> Vec<u8> {
    zip_bytes(&paired_entries(numbers))
}

/// Rename every occurrence of member `from` to `to` in both the local and the
/// central headers. Names must have equal length; the CRCs stay valid because
/// they cover only the data.
pub(crate) fn repeat_member_name(mut bytes: Vec<u8>, from: &str, to: &str) -> Vec<u8> {
    assert_eq!(from.len(), to.len());
    let (from, to) = (from.as_bytes(), to.as_bytes());
    let mut pos = 0;
    while pos + from.len() <= bytes.len() {
        if &bytes[pos..pos + from.len()] == from {
            bytes[pos..pos + from.len()].copy_from_slice(to);
            pos += from.len();
        } else {
            pos += 1;
        }
    }
    bytes
}
