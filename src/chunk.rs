//! Recursive character text chunker.
//!
//! Splits extracted text into segments of at most `chunk_size` characters.
//! Splitting tries separators in order (paragraph break, line break,
//! sentence end, space) and falls back to a hard character cut. Small
//! pieces are merged back together up to the size limit, and each new chunk
//! starts with up to `overlap` characters carried over from the previous one.
//!
//! All lengths are counted in `char`s, not bytes. The chunker is a pure
//! function of its input.

use std::collections::VecDeque;

use crate::config::ChunkingConfig;
use crate::extract::Extraction;
use crate::models::{Chunk, UNKNOWN_LABEL};

/// Separators tried in order. The empty separator splits into characters.
pub const SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

/// Split `text` into trimmed, non-empty chunks of at most `chunk_size` chars.
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    if chunk_size == 0 {
        return Vec::new();
    }
    Splitter {
        chunk_size,
        overlap,
    }
    .split(text, &SEPARATORS)
}

/// Resize `labels` to exactly `count` entries.
///
/// Extras are truncated; missing entries repeat the last label, or
/// `"unknown"` when there are no labels at all. This is an approximation:
/// it does not track where chunk boundaries fall relative to pages or
/// paragraphs.
pub fn align_labels(labels: &[String], count: usize) -> Vec<String> {
    let fill = labels
        .last()
        .cloned()
        .unwrap_or_else(|| UNKNOWN_LABEL.to_string());
    labels
        .iter()
        .cloned()
        .chain(std::iter::repeat(fill))
        .take(count)
        .collect()
}

/// Chunk an extraction and attach a provenance label to every chunk.
pub fn chunk_extraction(
    extraction: &Extraction,
    file_path: &str,
    config: &ChunkingConfig,
) -> Vec<Chunk> {
    let texts = split_text(&extraction.joined_text(), config.chunk_size, config.overlap);
    let labels = align_labels(&extraction.labels, texts.len());
    texts
        .into_iter()
        .zip(labels)
        .map(|(text, source_label)| Chunk {
            text,
            source_label,
            file_path: file_path.to_string(),
        })
        .collect()
}

struct Splitter {
    chunk_size: usize,
    overlap: usize,
}

impl Splitter {
    fn split(&self, text: &str, separators: &[&str]) -> Vec<String> {
        // Pick the first separator that occurs in the text; the remaining
        // ones are used for pieces that are still too long.
        let mut separator = separators.last().copied().unwrap_or("");
        let mut remaining: &[&str] = &[];
        for (i, &sep) in separators.iter().enumerate() {
            if sep.is_empty() {
                separator = sep;
                break;
            }
            if text.contains(sep) {
                separator = sep;
                remaining = &separators[i + 1..];
                break;
            }
        }

        let mut chunks = Vec::new();
        let mut small: Vec<String> = Vec::new();
        for piece in split_keeping_separator(text, separator) {
            if char_len(&piece) < self.chunk_size {
                small.push(piece);
                continue;
            }
            if !small.is_empty() {
                chunks.extend(self.merge(&small));
                small.clear();
            }
            if remaining.is_empty() {
                chunks.extend(hard_cut(&piece, self.chunk_size));
            } else {
                chunks.extend(self.split(&piece, remaining));
            }
        }
        if !small.is_empty() {
            chunks.extend(self.merge(&small));
        }
        chunks
    }

    /// Greedily pack pieces into chunks, keeping a tail of at most
    /// `overlap` chars as the head of the next chunk.
    fn merge(&self, pieces: &[String]) -> Vec<String> {
        let mut out = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size && !window.is_empty() {
                push_joined(&mut out, &window);
                while total > self.overlap || (total > 0 && total + len > self.chunk_size) {
                    match window.pop_front() {
                        Some(front) => total -= char_len(front),
                        None => break,
                    }
                }
            }
            window.push_back(piece);
            total += len;
        }
        push_joined(&mut out, &window);
        out
    }
}

/// Split on `separator`, attaching it to the start of each following piece.
fn split_keeping_separator(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(String::from).collect();
    }
    let mut parts = text.split(separator);
    let mut out = Vec::new();
    if let Some(first) = parts.next() {
        if !first.is_empty() {
            out.push(first.to_string());
        }
    }
    out.extend(parts.map(|p| format!("{}{}", separator, p)));
    out
}

fn hard_cut(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(size)
        .map(|c| c.iter().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn push_joined(out: &mut Vec<String>, window: &VecDeque<&str>) {
    let joined: String = window.iter().copied().collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
