//! Chunking utilities for splitting manuals into overlapping passages.
//!
//! Splitting is hierarchical: when a chunk has to end before the document
//! does, the split point backs up (within a bounded lookback window) to the
//! strongest boundary available, trying in order a section header, a
//! paragraph break, a line break, a sentence end, a clause break and plain
//! whitespace, before falling back to the raw character position.
//!
//! Each chunk after the first is then extended backwards by the configured
//! overlap so that context carries across chunk edges. The overlap counts
//! towards the chunk size: no chunk's text is longer than `chunk_size`
//! characters.

use tracing::debug;

use crate::error::{Error, Result};

/// Default chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1500;

/// Default overlap between consecutive chunks in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 400;

/// How far back (in characters) a split point may move to reach a boundary.
const LOOKBACK_CHARS: usize = 200;

/// Validated chunking configuration.
///
/// # Examples
///
/// ```
/// use manualrag::chunking::ChunkingConfig;
///
/// assert!(ChunkingConfig::new(1500, 400).is_ok());
/// assert!(ChunkingConfig::new(400, 400).is_err());
/// assert!(ChunkingConfig::new(0, 0).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    chunk_size: usize,
    overlap: usize,
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::Config(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if overlap >= chunk_size {
            return Err(Error::Config(format!(
                "chunk_overlap ({overlap}) must be smaller than chunk_size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    /// Maximum chunk length in characters, overlap included.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Characters carried over from the previous chunk.
    pub fn overlap(&self) -> usize {
        self.overlap
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// A contiguous span of a document's text.
///
/// `start_char..end_char` is the chunk's own content region. Content
/// regions of consecutive chunks tile the document with no gaps. `text`
/// additionally starts with the `overlap_chars` characters that precede
/// the content region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Zero-based chunk index within the document.
    pub index: usize,
    /// Character offset where the content region starts.
    pub start_char: usize,
    /// Character offset one past the end of the content region.
    pub end_char: usize,
    /// Number of leading characters of `text` shared with the previous chunk.
    pub overlap_chars: usize,
    /// Section header in effect for this chunk, if one was detected.
    pub section: Option<String>,
    /// Overlap followed by content.
    pub text: String,
}

impl Chunk {
    /// The chunk's text without the overlap prefix.
    pub fn content(&self) -> &str {
        let byte = self
            .text
            .char_indices()
            .nth(self.overlap_chars)
            .map_or(self.text.len(), |(byte, _)| byte);
        &self.text[byte..]
    }

    /// Character offset where `text` starts in the document.
    pub fn text_start_char(&self) -> usize {
        self.start_char - self.overlap_chars
    }
}

/// Split text into overlapping chunks.
///
/// Text no longer than the chunk size yields exactly one chunk without
/// overlap. Empty (or whitespace-only) text yields no chunks.
///
/// # Examples
///
/// ```
/// use manualrag::chunking::{chunk_text, ChunkingConfig};
///
/// let config = ChunkingConfig::new(1500, 400).unwrap();
/// let text = "a".repeat(4000);
/// let chunks = chunk_text(&text, &config);
///
/// assert_eq!(chunks.len(), 4);
/// assert!(chunks[1].text.starts_with(&chunks[0].content()[1100..]));
/// ```
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Vec<Chunk> {
    if text.trim().is_empty() {
        debug!("empty text produces no chunks");
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    let headers = detect_section_headers(&chars);
    let header_starts: Vec<usize> = headers.iter().map(|(pos, _)| *pos).collect();

    let mut chunks: Vec<Chunk> = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let overlap = if chunks.is_empty() {
            0
        } else {
            config.overlap.min(start)
        };
        let limit = config.chunk_size - overlap;

        let end = if chars.len() - start <= limit {
            chars.len()
        } else {
            find_split(&chars, &header_starts, start, start + limit)
        };

        chunks.push(Chunk {
            index: chunks.len(),
            start_char: start,
            end_char: end,
            overlap_chars: overlap,
            section: section_for(&headers, start, end),
            text: chars[start - overlap..end].iter().collect(),
        });

        start = end;
    }

    chunks
}

/// Split boundaries, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Boundary {
    SectionHeader,
    Paragraph,
    Line,
    Sentence,
    Clause,
    Word,
}

impl Boundary {
    const PRIORITY: [Boundary; 6] = [
        Boundary::SectionHeader,
        Boundary::Paragraph,
        Boundary::Line,
        Boundary::Sentence,
        Boundary::Clause,
        Boundary::Word,
    ];

    /// Whether splitting right before `chars[pos]` lands on this boundary.
    fn matches(self, chars: &[char], header_starts: &[usize], pos: usize) -> bool {
        let prev = chars[pos - 1];
        let before_prev = pos.checked_sub(2).map(|i| chars[i]);
        match self {
            Boundary::SectionHeader => header_starts.binary_search(&pos).is_ok(),
            Boundary::Paragraph => prev == '\n' && before_prev == Some('\n'),
            Boundary::Line => prev == '\n',
            Boundary::Sentence => {
                prev.is_whitespace()
                    && matches!(before_prev, Some('.' | '!' | '?'))
            }
            Boundary::Clause => {
                prev.is_whitespace()
                    && matches!(before_prev, Some(';' | ',' | ':'))
            }
            Boundary::Word => prev.is_whitespace(),
        }
    }
}

/// Find where a chunk starting at `start` should end, given that it may not
/// extend past `hard_end`.
fn find_split(
    chars: &[char],
    header_starts: &[usize],
    start: usize,
    hard_end: usize,
) -> usize {
    // Always leave at least one character in the chunk.
    let window = LOOKBACK_CHARS.min(hard_end - start - 1);
    let floor = hard_end - window;

    for boundary in Boundary::PRIORITY {
        if let Some(pos) = (floor..=hard_end)
            .rev()
            .find(|&pos| boundary.matches(chars, header_starts, pos))
        {
            return pos;
        }
    }

    hard_end
}

/// The header in effect at the chunk start, or else the first header
/// inside the chunk.
fn section_for(
    headers: &[(usize, String)],
    start: usize,
    end: usize,
) -> Option<String> {
    headers
        .iter()
        .rev()
        .find(|(pos, _)| *pos <= start)
        .or_else(|| headers.iter().find(|(pos, _)| *pos < end))
        .map(|(_, title)| title.clone())
}

/// Detect section header lines, returning `(line_start_char, title)` pairs
/// sorted by position.
pub fn detect_section_headers(chars: &[char]) -> Vec<(usize, String)> {
    let mut headers = Vec::new();
    let mut line_start = 0;

    for i in 0..=chars.len() {
        if i == chars.len() || chars[i] == '\n' {
            let line: String = chars[line_start..i].iter().collect();
            if let Some(title) = section_header(&line) {
                headers.push((line_start, title));
            }
            line_start = i + 1;
        }
    }

    headers
}

/// Recognize a single line as a section header.
///
/// Accepted forms: markdown headings (`# Title`), numbered headings
/// (`3. Title`, `2.1 Title`), ALL-CAPS lines and short `Title:` lines.
fn section_header(line: &str) -> Option<String> {
    let trimmed = line.trim();

    if let Some(heading) = trimmed.strip_prefix('#') {
        let heading = heading.trim_start_matches('#').trim();
        return (!heading.is_empty()).then(|| heading.to_string());
    }

    let is_header = is_numbered_heading(trimmed)
        || is_caps_heading(trimmed)
        || is_colon_heading(trimmed);
    is_header.then(|| trimmed.to_string())
}

fn is_numbered_heading(line: &str) -> bool {
    let rest = line.trim_start_matches(|c: char| c.is_ascii_digit() || c == '.');
    let numbering = &line[..line.len() - rest.len()];
    if !numbering.starts_with(|c: char| c.is_ascii_digit()) {
        return false;
    }
    let Some(title) = rest.strip_prefix(char::is_whitespace) else {
        return false;
    };
    let mut chars = title.trim_start().chars();
    matches!(chars.next(), Some(c) if c.is_uppercase())
        && (3..=50).contains(&chars.count())
}

fn is_caps_heading(line: &str) -> bool {
    line.starts_with(|c: char| c.is_ascii_uppercase())
        && line.chars().all(|c| c.is_ascii_uppercase() || c == ' ')
        && (6..=51).contains(&line.chars().count())
}

fn is_colon_heading(line: &str) -> bool {
    let Some(body) = line.strip_suffix(':') else {
        return false;
    };
    let mut chars = body.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
        && !body.contains(':')
        && (3..=40).contains(&chars.count())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn config(size: usize, overlap: usize) -> ChunkingConfig {
        ChunkingConfig::new(size, overlap).unwrap()
    }

    fn reconstruct(chunks: &[Chunk]) -> String {
        chunks.iter().map(Chunk::content).collect()
    }

    #[test]
    fn rejects_overlap_not_smaller_than_chunk_size() {
        assert!(matches!(
            ChunkingConfig::new(100, 100),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            ChunkingConfig::new(100, 250),
            Err(Error::Config(_))
        ));
        assert!(matches!(ChunkingConfig::new(0, 0), Err(Error::Config(_))));
    }

    #[test]
    fn default_config_is_valid() {
        let config = ChunkingConfig::default();
        assert_eq!(config.chunk_size(), DEFAULT_CHUNK_SIZE);
        assert_eq!(config.overlap(), DEFAULT_CHUNK_OVERLAP);
        assert!(
            ChunkingConfig::new(config.chunk_size(), config.overlap()).is_ok()
        );
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk_text("", &ChunkingConfig::default()).is_empty());
        assert!(chunk_text("  \n\t ", &ChunkingConfig::default()).is_empty());
    }

    #[test]
    fn short_text_single_chunk_without_overlap() {
        let chunks = chunk_text("Hello, world!", &ChunkingConfig::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].start_char, 0);
        assert_eq!(chunks[0].end_char, 13);
        assert_eq!(chunks[0].overlap_chars, 0);
    }

    #[test]
    fn text_exactly_chunk_size_is_one_chunk() {
        let text = "x".repeat(1500);
        assert_eq!(chunk_text(&text, &config(1500, 400)).len(), 1);
    }

    #[test]
    fn claims_manual_scenario() {
        let text = "a".repeat(4000);
        let chunks = chunk_text(&text, &config(1500, 400));

        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].overlap_chars, 0);

        let first_content = chunks[0].content();
        let tail: String = first_content.chars().skip(1100).collect();
        assert_eq!(tail.chars().count(), 400);
        assert!(chunks[1].text.starts_with(&tail));
        assert_eq!(chunks[1].overlap_chars, 400);

        for chunk in &chunks {
            assert!(chunk.text.chars().count() <= 1500);
        }
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn claims_manual_scenario_with_words() {
        let text = "word ".repeat(800);
        let chunks = chunk_text(&text, &config(1500, 400));

        assert_eq!(chunks.len(), 4);
        assert_eq!(reconstruct(&chunks), text);
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].end_char, pair[1].start_char);
            assert!(pair[1].content().starts_with("word"));
        }
    }

    #[test]
    fn prefers_paragraph_break_over_sentence_end() {
        let first = "First paragraph sentence one. Sentence two.\n\n";
        let second = "Second paragraph. Another sentence here, still going.";
        let text = format!("{first}{second}");
        let chunks = chunk_text(&text, &config(60, 0));

        assert_eq!(chunks[0].content(), first);
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn prefers_sentence_end_over_plain_whitespace() {
        let text = "Submit the claim today. Then wait for the payer response";
        let chunks = chunk_text(text, &config(40, 0));

        assert_eq!(chunks[0].content(), "Submit the claim today. ");
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn falls_back_to_raw_position_without_boundaries() {
        let text = "abcdefghij".repeat(10);
        let chunks = chunk_text(&text, &config(30, 0));

        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].end_char, 30);
        assert_eq!(chunks[3].end_char, 100);
    }

    #[test]
    fn splits_before_section_header() {
        let text = "Intro text about the system overview.\n\
                    CLAIM SUBMISSION\n\
                    Open the claims work center and submit.";
        let chunks = chunk_text(text, &config(70, 0));

        assert!(chunks.len() >= 2);
        assert!(chunks[1].content().starts_with("CLAIM SUBMISSION"));
        assert_eq!(chunks[1].section.as_deref(), Some("CLAIM SUBMISSION"));
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn section_metadata_carries_forward() {
        let body = "Enter the payer details and save. ".repeat(10);
        let text = format!("1. Claim Entry\n{body}");
        let chunks = chunk_text(&text, &config(100, 20));

        assert!(chunks.len() > 2);
        for chunk in &chunks {
            assert_eq!(chunk.section.as_deref(), Some("1. Claim Entry"));
        }
    }

    #[test]
    fn detects_header_forms() {
        assert_eq!(
            section_header("# Remittance Basics"),
            Some("Remittance Basics".to_string())
        );
        assert_eq!(
            section_header("2.1 Working Denials"),
            Some("2.1 Working Denials".to_string())
        );
        assert_eq!(
            section_header("PRINT SERVICES"),
            Some("PRINT SERVICES".to_string())
        );
        assert_eq!(
            section_header("Prerequisites:"),
            Some("Prerequisites:".to_string())
        );
        assert_eq!(section_header("just a sentence."), None);
        assert_eq!(section_header("2. x"), None);
        assert_eq!(section_header("ABC"), None);
    }

    #[test]
    fn handles_multibyte_chars() {
        let text = "café ☕ naïve 日本語 🎉 ".repeat(50);
        let chunks = chunk_text(&text, &config(100, 20));

        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert!(chunk.text.chars().count() <= 100);
        }
        assert_eq!(reconstruct(&chunks), text);
    }

    proptest! {
        #[test]
        fn content_regions_reconstruct_text(
            text in "[a-zA-Zé .,;!?\n]{1,2000}",
            (size, overlap) in (1usize..300).prop_flat_map(|s| (Just(s), 0..s)),
        ) {
            let config = ChunkingConfig::new(size, overlap).unwrap();
            let chunks = chunk_text(&text, &config);

            if text.trim().is_empty() {
                prop_assert!(chunks.is_empty());
            } else {
                prop_assert_eq!(reconstruct(&chunks), text.clone());
            }
        }

        #[test]
        fn overlap_is_bounded_and_matches_source(
            text in "[a-z .\n]{1,1500}",
            (size, overlap) in (2usize..200).prop_flat_map(|s| (Just(s), 0..s)),
        ) {
            let config = ChunkingConfig::new(size, overlap).unwrap();
            let chunks = chunk_text(&text, &config);
            let chars: Vec<char> = text.chars().collect();

            for (i, chunk) in chunks.iter().enumerate() {
                prop_assert_eq!(chunk.index, i);
                prop_assert!(chunk.overlap_chars <= overlap);
                prop_assert!(chunk.text.chars().count() <= size);
                let expected: String =
                    chars[chunk.text_start_char()..chunk.end_char].iter().collect();
                prop_assert_eq!(&chunk.text, &expected);
            }
            if let Some(first) = chunks.first() {
                prop_assert_eq!(first.overlap_chars, 0);
            }
        }
    }
}
