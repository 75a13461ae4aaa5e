//! Cue text extraction from WebVTT segments.
//!
//! Handles the narrow dialect live subtitle streams actually use: a timing
//! line containing `-->` followed by text lines, terminated by a blank line.
//! Cue identifiers, styling and NOTE blocks are not interpreted; anything
//! outside an open cue is skipped.

use std::io::{self, BufRead};

/// Cue timing delimiter.
pub const TIMING_DELIMITER: &str = "-->";

/// Parse every blank-line-terminated cue in `reader` into one text block.
///
/// Text lines of a cue are joined with a single space. A cue still open at
/// end of stream is dropped.
pub fn parse_cues<R: BufRead>(reader: R) -> io::Result<Vec<String>> {
    let mut blocks = Vec::new();
    let mut open = false;
    let mut text = String::new();

    for line in reader.lines() {
        let line = line?;

        if line.contains(TIMING_DELIMITER) {
            open = true;
            text.clear();
            continue;
        }
        if !open {
            continue;
        }
        if line.trim().is_empty() {
            blocks.push(text.trim_end().to_string());
            text.clear();
            open = false;
            continue;
        }

        text.push_str(&line);
        text.push(' ');
    }

    Ok(blocks)
}

/// [`parse_cues`] over an in-memory segment body.
pub fn parse_cue_bytes(body: &[u8]) -> io::Result<Vec<String>> {
    parse_cues(body)
}
