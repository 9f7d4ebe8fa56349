//! Text encoding detection for CSV sources.
//!
//! Detection samples the first [`SAMPLE_BYTES`] of a file and asks
//! `chardetng` for its best guess. Detection never fails: unreadable files and
//! unusable labels fall back to UTF-8. Because a guess can still be wrong,
//! [`resolve_readable_encoding`] verifies it against the whole file and walks a
//! short, fixed list of alternatives.

use std::{
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

use anyhow::{Context, Result};
use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use log::{debug, warn};

use crate::io_utils;

pub const SAMPLE_BYTES: usize = 10 * 1024;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Guesses the encoding of `path` from its first 10 KB.
pub fn detect_file_encoding(path: &Path) -> &'static Encoding {
    match read_sample(path) {
        Ok((sample, complete)) => {
            let encoding = detect_sample(&sample, complete);
            debug!("Detected encoding {} for {:?}", encoding.name(), path);
            encoding
        }
        Err(err) => {
            warn!("Error detecting encoding for {path:?}: {err:#}; assuming UTF-8");
            UTF_8
        }
    }
}

/// Guesses the encoding of an in-memory sample. `complete` marks a sample that
/// holds the entire input rather than a prefix.
pub fn detect_sample(sample: &[u8], complete: bool) -> &'static Encoding {
    if sample.is_empty() || sample.starts_with(UTF8_BOM) {
        return UTF_8;
    }
    // A truncated prefix may end inside a multi-byte sequence.
    let usable = if complete {
        sample
    } else {
        match sample.iter().rposition(|&byte| byte == b'\n') {
            Some(pos) => &sample[..=pos],
            None => sample,
        }
    };
    let mut detector = EncodingDetector::new();
    detector.feed(usable, true);
    let guess = detector.guess(None, true);
    normalize_label(guess.name()).unwrap_or(UTF_8)
}

/// Maps an encoding label, including MySQL charset aliases, onto an
/// `encoding_rs` encoding.
pub fn normalize_label(label: &str) -> Option<&'static Encoding> {
    let lowered = label.trim().to_ascii_lowercase();
    let canonical = match lowered.as_str() {
        "" => return None,
        "utf8mb4" | "utf8mb3" | "utf8" => "utf-8",
        "latin1" | "latin-1" => "windows-1252",
        other => other,
    };
    Encoding::for_label(canonical.as_bytes())
}

/// The bounded retry list: the detected encoding, then UTF-8, then
/// windows-1252, without duplicates.
pub fn candidate_encodings(detected: &'static Encoding) -> Vec<&'static Encoding> {
    let mut candidates = Vec::with_capacity(3);
    for encoding in [detected, UTF_8, WINDOWS_1252] {
        if !candidates.contains(&encoding) {
            candidates.push(encoding);
        }
    }
    candidates
}

/// Returns the first candidate encoding that decodes every field of `path`.
pub fn resolve_readable_encoding(
    path: &Path,
    detected: &'static Encoding,
) -> Result<Option<&'static Encoding>> {
    for candidate in candidate_encodings(detected) {
        if decodes_cleanly(path, candidate)? {
            debug!("{:?} decodes cleanly as {}", path, candidate.name());
            return Ok(Some(candidate));
        }
        warn!(
            "Failed to read {:?} with {} encoding, trying another",
            path,
            candidate.name()
        );
    }
    Ok(None)
}

pub fn decodes_cleanly(path: &Path, encoding: &'static Encoding) -> Result<bool> {
    let mut reader = io_utils::open_csv_reader_from_path(path)?;
    if io_utils::reader_headers(&mut reader, encoding).is_err() {
        return Ok(false);
    }
    let mut record = csv::ByteRecord::new();
    while reader
        .read_byte_record(&mut record)
        .with_context(|| format!("Scanning {path:?}"))?
    {
        if io_utils::decode_record(&record, encoding).is_err() {
            return Ok(false);
        }
    }
    Ok(true)
}

fn read_sample(path: &Path) -> Result<(Vec<u8>, bool)> {
    let file = File::open(path).with_context(|| format!("Opening {path:?}"))?;
    let mut sample = Vec::with_capacity(SAMPLE_BYTES);
    BufReader::new(file)
        .take(SAMPLE_BYTES as u64 + 1)
        .read_to_end(&mut sample)
        .with_context(|| format!("Reading {path:?}"))?;
    let complete = sample.len() <= SAMPLE_BYTES;
    sample.truncate(SAMPLE_BYTES);
    Ok((sample, complete))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn mysql_aliases_normalize_to_decoder_labels() {
        assert_eq!(normalize_label("utf8mb4"), Some(UTF_8));
        assert_eq!(normalize_label(" UTF8 "), Some(UTF_8));
        assert_eq!(normalize_label("latin1"), Some(WINDOWS_1252));
        assert_eq!(normalize_label("shift_jis").map(|e| e.name()), Some("Shift_JIS"));
        assert_eq!(normalize_label(""), None);
        assert_eq!(normalize_label("not-a-charset"), None);
    }

    #[test]
    fn plain_ascii_and_utf8_detect_as_utf8_compatible() {
        let ascii = detect_sample(b"id,name\n1,Screen A\n", true);
        assert!(ascii == UTF_8 || ascii == WINDOWS_1252);
        assert_eq!(detect_sample("id,name\n1,Caf\u{e9} cr\u{e8}me\n".as_bytes(), true), UTF_8);
        assert_eq!(detect_sample(b"\xEF\xBB\xBFid\n", false), UTF_8);
    }

    #[test]
    fn candidate_list_is_deduplicated_in_order() {
        assert_eq!(candidate_encodings(UTF_8), vec![UTF_8, WINDOWS_1252]);
        let shift_jis = normalize_label("shift_jis").unwrap();
        assert_eq!(
            candidate_encodings(shift_jis),
            vec![shift_jis, UTF_8, WINDOWS_1252]
        );
    }

    #[test]
    fn missing_file_falls_back_to_utf8() {
        assert_eq!(
            detect_file_encoding(Path::new("/definitely/not/here.csv")),
            UTF_8
        );
    }

    #[test]
    fn readable_encoding_skips_candidates_that_fail() {
        let mut file = NamedTempFile::new().expect("temp file");
        let (encoded, _, _) = WINDOWS_1252.encode("id,name\n1,Caf\u{e9}\n");
        file.write_all(&encoded).expect("write");
        let resolved = resolve_readable_encoding(file.path(), UTF_8).expect("scan");
        assert_eq!(resolved, Some(WINDOWS_1252));
    }
}
