//! Text extraction from manual files.

use std::path::Path;

use crate::{
    error::{Error, Result},
    walker::ManualFormat,
};

/// Plain text of one manual, with page boundaries when the source has them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedText {
    pub text: String,
    /// Character offset at which each page starts, ascending. Empty for
    /// unpaginated sources.
    pub page_starts: Vec<usize>,
}

impl ExtractedText {
    /// Unpaginated text.
    pub fn plain(text: String) -> Self {
        Self {
            text,
            page_starts: Vec::new(),
        }
    }

    /// Text whose pages are separated by form feeds.
    ///
    /// Each form feed is replaced by a newline, so character offsets into
    /// the result match offsets into the input.
    pub fn from_form_feeds(raw: &str) -> Self {
        let mut text = String::with_capacity(raw.len());
        let mut page_starts = vec![0];
        for (offset, c) in raw.chars().enumerate() {
            if c == '\x0C' {
                text.push('\n');
                page_starts.push(offset + 1);
            } else {
                text.push(c);
            }
        }
        // A trailing form feed does not open a page.
        if page_starts.len() > 1 && page_starts.last() == Some(&raw.chars().count()) {
            page_starts.pop();
        }
        Self { text, page_starts }
    }

    pub fn page_count(&self) -> usize {
        self.page_starts.len()
    }

    /// 1-based page containing the character at `char_offset`.
    pub fn page_at(&self, char_offset: usize) -> Option<usize> {
        if self.page_starts.is_empty() {
            return None;
        }
        Some(self.page_starts.partition_point(|&start| start <= char_offset).max(1))
    }
}

/// Extract the text of the manual at `path`.
pub fn extract_text(path: &Path, format: ManualFormat) -> Result<ExtractedText> {
    match format {
        ManualFormat::Text | ManualFormat::Markdown => {
            let bytes = std::fs::read(path)?;
            Ok(ExtractedText::plain(
                String::from_utf8_lossy(&bytes).into_owned(),
            ))
        }
        ManualFormat::Pdf => extract_pdf(path),
    }
}

fn extract_pdf(path: &Path) -> Result<ExtractedText> {
    // pdf-extract panics on some malformed fonts; treat that like any other
    // extraction failure.
    let outcome =
        std::panic::catch_unwind(|| pdf_extract::extract_text(path));
    match outcome {
        Ok(Ok(raw)) => Ok(ExtractedText::from_form_feeds(&raw)),
        Ok(Err(e)) => Err(Error::Extraction {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
        Err(_) => Err(Error::Extraction {
            path: path.to_path_buf(),
            reason: "PDF parser panicked".into(),
        }),
    }
}

/// Title of a manual: the first markdown `# ` heading, else the file stem.
pub fn extract_title(content: &str, file_path: &Path) -> String {
    for line in content.lines() {
        let trimmed = line.trim();
        if let Some(heading) = trimmed.strip_prefix("# ") {
            let title = heading.trim();
            if !title.is_empty() {
                return title.to_string();
            }
        }
    }

    file_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("untitled")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_from_heading() {
        let content = "Some preamble\n# My Title\nBody text";
        assert_eq!(extract_title(content, Path::new("file.md")), "My Title");
    }

    #[test]
    fn title_skips_empty_heading() {
        let content = "# \n# Real Title\nBody";
        assert_eq!(extract_title(content, Path::new("file.md")), "Real Title");
    }

    #[test]
    fn title_falls_back_to_file_stem() {
        let content = "CLAIMS OVERVIEW\nBody";
        assert_eq!(
            extract_title(content, Path::new("manuals/Claims Manual.pdf")),
            "Claims Manual"
        );
    }

    #[test]
    fn form_feeds_split_pages() {
        let extracted = ExtractedText::from_form_feeds("one\x0Ctwo\x0Cthree");
        assert_eq!(extracted.text, "one\ntwo\nthree");
        assert_eq!(extracted.page_starts, vec![0, 4, 8]);
        assert_eq!(extracted.page_count(), 3);

        assert_eq!(extracted.page_at(0), Some(1));
        assert_eq!(extracted.page_at(3), Some(1));
        assert_eq!(extracted.page_at(4), Some(2));
        assert_eq!(extracted.page_at(9), Some(3));
        assert_eq!(extracted.page_at(500), Some(3));
    }

    #[test]
    fn trailing_form_feed_is_not_a_page() {
        let extracted = ExtractedText::from_form_feeds("only page\x0C");
        assert_eq!(extracted.page_count(), 1);
        assert_eq!(extracted.text.chars().count(), "only page\x0C".chars().count());
    }

    #[test]
    fn plain_text_has_no_pages() {
        let extracted = ExtractedText::plain("hello".into());
        assert_eq!(extracted.page_at(2), None);
        assert_eq!(extracted.page_count(), 0);
    }

    #[test]
    fn reads_text_files_lossily() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("notes.txt");
        std::fs::write(&path, b"caf\xC3\xA9 \xFF menu").unwrap();

        let extracted = extract_text(&path, ManualFormat::Text).unwrap();
        assert!(extracted.text.starts_with("café "));
        assert!(extracted.text.ends_with(" menu"));
    }

    #[test]
    fn unreadable_pdf_is_extraction_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("broken.pdf");
        std::fs::write(&path, b"not a pdf at all").unwrap();

        let err = extract_text(&path, ManualFormat::Pdf).unwrap_err();
        assert!(matches!(err, Error::Extraction { .. }));
    }
}
