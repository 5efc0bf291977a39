//! Transcript Assembler (C5) — concatenates per-chunk transcripts into
//! one normalized string, removing the duplicated overlap region a
//! best-quality job's chunker deliberately introduced.
//!
//! No direct counterpart in the sibling crates (they hand a single
//! contiguous recording to one provider call); grounded instead on
//! their `thiserror` layering and pure-function style, with the fuzzy
//! matching itself built on `strsim`'s Levenshtein distance the way
//! the pack's CLI-facing examples reach for a crate over a hand-rolled
//! edit-distance loop.

use crate::config::ProcessingMode;
use crate::error::JobError;
use crate::types::ChunkDescriptor;

/// Assumed words-per-minute used to convert an overlap duration into an
/// estimated word count. Empirical; may need retuning per language.
const WORDS_PER_MINUTE: f64 = 150.0;

const FUZZY_SIMILARITY_THRESHOLD: f64 = 0.7;
const WORD_SIMILARITY_MAX_DISTANCE_RATIO: f64 = 0.2;

/// Assemble `texts` (one per `chunks` entry, same order) into a single
/// normalized transcript.
pub fn assemble(chunks: &[ChunkDescriptor], texts: &[String], mode: ProcessingMode) -> Result<String, JobError> {
    if chunks.len() != texts.len() {
        return Err(JobError::ChunkCountMismatch { descriptors: chunks.len(), texts: texts.len() });
    }
    if texts.is_empty() {
        return Ok(String::new());
    }
    if texts.len() == 1 {
        return Ok(normalize(&texts[0]));
    }

    match mode {
        ProcessingMode::Balanced => Ok(normalize(&texts.join(" "))),
        ProcessingMode::BestQuality => Ok(normalize(&assemble_with_overlap_removal(chunks, texts))),
    }
}

fn assemble_with_overlap_removal(chunks: &[ChunkDescriptor], texts: &[String]) -> String {
    let mut pieces: Vec<String> = vec![texts[0].clone()];

    for i in 1..texts.len() {
        let prev_words: Vec<&str> = texts[i - 1].split_whitespace().collect();
        let cur_words: Vec<&str> = texts[i].split_whitespace().collect();

        if !chunks[i - 1].has_overlap || prev_words.is_empty() || cur_words.is_empty() {
            pieces.push(texts[i].clone());
            continue;
        }

        let overlap_s = chunks[i - 1].end_s - chunks[i - 1].overlap_start_s.unwrap_or(chunks[i - 1].end_s);
        let w1 = ((overlap_s / 60.0) * WORDS_PER_MINUTE).ceil().max(1.0) as usize;
        let w = w1.min(((prev_words.len() as f64) * 0.5).floor() as usize).max(1).min(prev_words.len());

        let overlap_phrase = &prev_words[prev_words.len() - w..];

        let p = find_overlap_position(overlap_phrase, &cur_words, &texts[i]);
        match p {
            Some(p) => pieces.push(cur_words[p.min(cur_words.len())..].join(" ")),
            None => pieces.push(texts[i].clone()),
        }
    }

    pieces.join(" ")
}

/// Locate where `overlap_phrase` (the tail of the previous chunk's
/// transcript) reappears at the start of `cur_words`, trying three
/// strategies of increasing looseness. Returns the word position to drop
/// through (the end of the matched span, not its start).
fn find_overlap_position(overlap_phrase: &[&str], cur_words: &[&str], cur_text: &str) -> Option<usize> {
    let half_len = ((cur_words.len() as f64) * 0.5).ceil() as usize;
    let search_region = &cur_words[..half_len.min(cur_words.len())];

    if let Some(p) = fuzzy_window_search(overlap_phrase, search_region, FUZZY_SIMILARITY_THRESHOLD) {
        return Some(p);
    }
    if let Some(p) = fuzzy_window_search(overlap_phrase, cur_words, FUZZY_SIMILARITY_THRESHOLD) {
        return Some(p);
    }
    substring_fallback_search(overlap_phrase, cur_text)
}

/// Returns the word position just past the matched overlap window (i.e.
/// the drop point), not the window's start, so callers can drop the
/// duplicated span uniformly with the substring fallback.
fn fuzzy_window_search(overlap_phrase: &[&str], haystack: &[&str], threshold: f64) -> Option<usize> {
    let w = overlap_phrase.len();
    if haystack.len() < w {
        return None;
    }
    for start in 0..=(haystack.len() - w) {
        let window = &haystack[start..start + w];
        if word_list_similarity(overlap_phrase, window) >= threshold {
            return Some(start + w);
        }
    }
    None
}

/// `score = (exact_matches + 0.5 * similar_matches) / length` over two
/// equal-length, lowercased word lists.
fn word_list_similarity(a: &[&str], b: &[&str]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    if a.is_empty() {
        return 1.0;
    }
    let mut exact = 0usize;
    let mut similar = 0usize;
    for (wa, wb) in a.iter().zip(b.iter()) {
        let la = wa.to_lowercase();
        let lb = wb.to_lowercase();
        if la == lb {
            exact += 1;
        } else if words_are_similar(&la, &lb) {
            similar += 1;
        }
    }
    (exact as f64 + 0.5 * similar as f64) / a.len() as f64
}

fn words_are_similar(a: &str, b: &str) -> bool {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return true;
    }
    let dist = strsim::levenshtein(a, b);
    (dist as f64 / max_len as f64) <= WORD_SIMILARITY_MAX_DISTANCE_RATIO
}

/// Case-insensitive literal-substring fallback: slide a shortened
/// (`floor(W * 0.6)`-word) window over the overlap phrase itself,
/// trying each as a literal needle against the raw current text.
fn substring_fallback_search(overlap_phrase: &[&str], cur_text: &str) -> Option<usize> {
    let m = ((overlap_phrase.len() as f64) * 0.6).floor() as usize;
    if m == 0 || m > overlap_phrase.len() {
        return None;
    }
    let lower_text = cur_text.to_lowercase();

    for offset in 0..=(overlap_phrase.len() - m) {
        let needle = overlap_phrase[offset..offset + m].join(" ").to_lowercase();
        if needle.is_empty() {
            continue;
        }
        if let Some(byte_pos) = lower_text.find(&needle) {
            let words_before = cur_text[..byte_pos].split_whitespace().count();
            // `needle` is the slice of the overlap phrase starting at
            // `offset`; the full duplicated span therefore runs
            // `overlap_phrase.len() - offset` words past this match.
            return Some(words_before + (overlap_phrase.len() - offset));
        }
    }
    None
}

/// Whitespace/punctuation/capitalization normalization, applied once at
/// the very end of assembly. Idempotent: `normalize(normalize(s)) == normalize(s)`.
pub fn normalize(s: &str) -> String {
    let collapsed = collapse_whitespace(s);
    let tightened = tighten_punctuation(&collapsed);
    let spaced = space_after_period(&tightened);
    let capitalized = capitalize_sentence_starts(&spaced);
    capitalize_first_char(&capitalized)
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

const SENTENCE_PUNCT: [char; 4] = ['!', '?', ';', ':'];

fn tighten_punctuation(s: &str) -> String {
    let mut without_leading_space = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == ' ' {
            if let Some(&next) = chars.peek() {
                if SENTENCE_PUNCT.contains(&next) {
                    continue;
                }
            }
        }
        without_leading_space.push(c);
    }

    let mut out = String::with_capacity(without_leading_space.len());
    let mut chars = without_leading_space.chars().peekable();
    while let Some(c) = chars.next() {
        out.push(c);
        if SENTENCE_PUNCT.contains(&c) {
            if let Some(&next) = chars.peek() {
                if next != ' ' {
                    out.push(' ');
                }
            }
        }
    }
    out
}

fn space_after_period(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        out.push(c);
        if c == '.' {
            if let Some(&next) = chars.peek() {
                if next.is_ascii_alphabetic() {
                    out.push(' ');
                }
            }
        }
    }
    out
}

const SENTENCE_ENDERS: [char; 3] = ['.', '!', '?'];

fn capitalize_sentence_starts(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut expect_upper = false;
    for c in s.chars() {
        if expect_upper {
            if c == ' ' {
                out.push(c);
                continue;
            }
            if c.is_ascii_lowercase() {
                out.extend(c.to_uppercase());
                expect_upper = false;
                continue;
            }
            expect_upper = false;
        }
        out.push(c);
        if SENTENCE_ENDERS.contains(&c) {
            expect_upper = true;
        }
    }
    out
}

fn capitalize_first_char(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(index: usize, end_s: f64, has_overlap: bool, overlap_start_s: Option<f64>) -> ChunkDescriptor {
        ChunkDescriptor {
            index,
            start_s: 0.0,
            end_s,
            duration_s: end_s,
            path: std::path::PathBuf::from("/tmp/x.mp3"),
            content_hash: "h".into(),
            has_overlap,
            overlap_start_s,
        }
    }

    #[test]
    fn mismatched_lengths_fail() {
        let chunks = vec![chunk(0, 10.0, false, None)];
        let texts = vec!["a".to_string(), "b".to_string()];
        let err = assemble(&chunks, &texts, ProcessingMode::Balanced).unwrap_err();
        assert!(matches!(err, JobError::ChunkCountMismatch { descriptors: 1, texts: 2 }));
    }

    #[test]
    fn zero_chunks_is_empty_string() {
        assert_eq!(assemble(&[], &[], ProcessingMode::Balanced).unwrap(), "");
    }

    #[test]
    fn single_chunk_is_normalized_verbatim() {
        let chunks = vec![chunk(0, 10.0, false, None)];
        let texts = vec!["  hello   world  ".to_string()];
        assert_eq!(assemble(&chunks, &texts, ProcessingMode::Balanced).unwrap(), "Hello world");
    }

    #[test]
    fn balanced_mode_just_concatenates_and_normalizes() {
        let chunks = vec![chunk(0, 10.0, false, None), chunk(1, 20.0, false, None)];
        let texts = vec!["hello there".to_string(), "general kenobi".to_string()];
        assert_eq!(assemble(&chunks, &texts, ProcessingMode::Balanced).unwrap(), "Hello there general kenobi");
    }

    #[test]
    fn best_quality_removes_exact_overlap() {
        let chunks = vec![chunk(0, 600.0, true, Some(585.0)), chunk(1, 1200.0, false, None)];
        let texts = vec![
            "the quick brown fox jumps over the lazy dog".to_string(),
            "lazy dog ran away into the woods".to_string(),
        ];
        let out = assemble(&chunks, &texts, ProcessingMode::BestQuality).unwrap();
        assert!(out.to_lowercase().contains("ran away into the woods"));
        // the duplicated "lazy dog" should not appear twice
        assert_eq!(out.to_lowercase().matches("lazy dog").count(), 1);
    }

    #[test]
    fn best_quality_dedups_overlap_matched_via_fuzzy_window_not_just_substring() {
        let chunks = vec![chunk(0, 600.0, true, Some(420.0)), chunk(1, 1200.0, false, None)];
        let texts = vec![
            "We finished discussing deployment pipelines. Now moving on to the next topic of continuous integration.".to_string(),
            "Now moving on to the next topic of continuous integration. CI systems build code.".to_string(),
        ];
        let out = assemble(&chunks, &texts, ProcessingMode::BestQuality).unwrap();
        let lower = out.to_lowercase();
        assert_eq!(lower.matches("to the next topic of continuous integration").count(), 1);
        assert!(lower.contains("ci systems build code"));
    }

    #[test]
    fn no_overlap_flag_keeps_text_verbatim() {
        let chunks = vec![chunk(0, 600.0, false, None), chunk(1, 1200.0, false, None)];
        let texts = vec!["first part".to_string(), "second part".to_string()];
        let out = assemble(&chunks, &texts, ProcessingMode::BestQuality).unwrap();
        assert_eq!(out, "First part second part");
    }

    #[test]
    fn normalize_is_idempotent() {
        let s = "hello   world!is this   ok?yes.Indeed;  quite : so";
        let once = normalize(s);
        let twice = normalize(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn normalize_protects_decimals() {
        assert_eq!(normalize("the value is 1.5 units"), "The value is 1.5 units");
    }

    #[test]
    fn normalize_spaces_after_period_before_letter() {
        assert_eq!(normalize("Hi.World"), "Hi. World");
    }

    #[test]
    fn normalize_uppercases_after_sentence_enders() {
        assert_eq!(normalize("stop! go now. then what? fine"), "Stop! Go now. Then what? Fine");
    }

    #[test]
    fn normalize_tightens_punctuation_spacing() {
        assert_eq!(normalize("wait ; really ? yes : sure !"), "Wait; really? Yes: sure!");
    }
}
