//! Pinned tokenizer and text cleaning
//!
//! Token counts are stored on every chunk and feed size-limited prompt
//! construction downstream, so the encoding is fixed and versioned by
//! `TOKENIZER_ID`. Changing the encoding requires a new id.

use std::sync::OnceLock;
use thiserror::Error;
use tiktoken_rs::CoreBPE;

/// Identifier of the encoding below
pub const TOKENIZER_ID: &str = "tiktoken-o200k_base";

/// Model whose encoding is pinned
pub const TOKENIZER_MODEL: &str = "gpt-4o-mini";

/// Extra tokens tried on each side of a chunk window so it decodes on
/// UTF-8 character boundaries
const MAX_BOUNDARY_WIDEN: usize = 3;

#[derive(Debug, Clone, Error)]
#[error("tokenizer tiktoken-o200k_base unavailable: {0}")]
pub struct TokenizerError(String);

fn encoder() -> Result<&'static CoreBPE, TokenizerError> {
    static ENCODER: OnceLock<Result<CoreBPE, String>> = OnceLock::new();
    ENCODER
        .get_or_init(|| tiktoken_rs::o200k_base().map_err(|e| e.to_string()))
        .as_ref()
        .map_err(|e| TokenizerError(e.clone()))
}

/// Normalize extracted or raw text before hashing and counting.
///
/// Trims surrounding whitespace and drops NUL characters.
pub fn clean_text(text: &str) -> String {
    text.trim().chars().filter(|c| *c != '\0').collect()
}

pub fn count_tokens(text: &str) -> Result<usize, TokenizerError> {
    Ok(encoder()?.encode_ordinary(text).len())
}

/// Split text into windows of `max_tokens` tokens, each starting
/// `max_tokens - overlap_tokens` tokens after the previous one.
///
/// Windows are decoded back to text and trimmed; windows that are blank
/// after trimming are dropped. A window whose edge falls inside a multi-byte
/// character is widened until it decodes.
pub fn chunk_by_tokens(
    text: &str,
    max_tokens: usize,
    overlap_tokens: usize,
) -> Result<Vec<String>, TokenizerError> {
    let bpe = encoder()?;
    let tokens = bpe.encode_ordinary(text);
    let max_tokens = max_tokens.max(1);
    let step = max_tokens.saturating_sub(overlap_tokens).max(1);

    let decode = |from: usize, to: usize| bpe.decode(tokens[from..to].to_vec()).ok();

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < tokens.len() {
        let end = (start + max_tokens).min(tokens.len());
        let window = (0..=MAX_BOUNDARY_WIDEN)
            .flat_map(|back| (0..=MAX_BOUNDARY_WIDEN).map(move |ahead| (back, ahead)))
            .find_map(|(back, ahead)| decode(start.saturating_sub(back), (end + ahead).min(tokens.len())));

        if let Some(window) = window {
            let piece = window.trim();
            if !piece.is_empty() {
                chunks.push(piece.to_string());
            }
        }
        start += step;
    }

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(n: usize) -> String {
        vec!["word"; n].join(" ")
    }

    #[test]
    fn counts_o200k_tokens() {
        assert_eq!(count_tokens("").unwrap(), 0);
        assert_eq!(count_tokens("hello world").unwrap(), 2);
        assert_eq!(count_tokens("Hello, world!").unwrap(), 4);
        assert_eq!(count_tokens(&words(10)).unwrap(), 10);
    }

    #[test]
    fn clean_text_trims_and_drops_nul() {
        assert_eq!(clean_text("  a\0b \n"), "ab");
    }

    #[test]
    fn windows_step_by_size_minus_overlap() {
        let chunks = chunk_by_tokens(&words(10), 4, 1).unwrap();
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0], words(4));
        assert_eq!(chunks[1], words(4));
        assert_eq!(chunks[3], "word");
        for c in &chunks {
            assert!(count_tokens(c).unwrap() <= 4);
        }
    }

    #[test]
    fn overlap_not_smaller_than_size_still_advances() {
        let chunks = chunk_by_tokens(&words(3), 2, 5).unwrap();
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn multibyte_text_decodes_in_every_window() {
        let text = "日本語のテキストを分割する。".repeat(3);
        let chunks = chunk_by_tokens(&text, 1, 0).unwrap();
        assert!(!chunks.is_empty());
        let joined = chunks.concat();
        assert!(text.chars().all(|c| joined.contains(c)));
    }

    #[test]
    fn empty_text_has_no_chunks() {
        assert!(chunk_by_tokens("  \n ", 10, 2).unwrap().is_empty());
    }
}
