//! Split a document into an intro block and underline-style sections.
//!
//! A heading is a non-blank line immediately followed by a line made only of `-`
//! characters. The underline does not need to match the heading's width.
//!
//! ```text
//! Intro paragraph.
//!
//! Section One
//! ---
//! Body one.
//! ```

/// One titled section of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Heading text without its underline or line ending.
    pub heading: String,
    /// Raw text from the heading line up to the next heading or end of document,
    /// heading and underline included.
    pub body: String,
    /// Byte offset in `body` where the text after the underline starts.
    content_start: usize,
}

impl Section {
    /// Text after the underline line.
    pub fn content(&self) -> &str {
        &self.body[self.content_start..]
    }

    /// The chunk handed to the editor: the heading, an underline as wide as the
    /// heading, then the section content, with trailing whitespace removed.
    pub fn prompt_text(&self) -> String {
        let underline = "-".repeat(self.heading.chars().count().max(1));
        let mut text = format!("{}\n{}\n{}", self.heading, underline, self.content());
        let trimmed = text.trim_end().len();
        text.truncate(trimmed);
        text
    }
}

/// Result of segmenting a document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Segments {
    /// Everything before the first heading; the whole document when there is none.
    pub intro: String,
    pub sections: Vec<Section>,
}

impl Segments {
    /// Require at least one section, for section-based editing.
    pub fn require_sections(&self) -> Result<&[Section], SegmentError> {
        if self.sections.is_empty() {
            Err(SegmentError::NoSectionsFound)
        } else {
            Ok(&self.sections)
        }
    }

    /// Reassemble the original document.
    pub fn reassemble(&self) -> String {
        let mut out = self.intro.clone();
        for section in &self.sections {
            out.push_str(&section.body);
        }
        out
    }
}

/// Segmentation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SegmentError {
    #[error("no sections found in document")]
    NoSectionsFound,
}

fn strip_eol(line: &str) -> &str {
    line.trim_end_matches(['\n', '\r'])
}

fn is_underline(line: &str) -> bool {
    let text = strip_eol(line);
    !text.is_empty() && text.chars().all(|c| c == '-')
}

fn is_heading_text(line: &str) -> bool {
    let text = strip_eol(line);
    !text.trim().is_empty() && !is_underline(line)
}

/// Split `document` into an intro block and its sections.
pub fn segment(document: &str) -> Segments {
    let lines: Vec<&str> = document.split_inclusive('\n').collect();

    // (byte offset of heading line, heading text, byte length of heading + underline)
    let mut headings: Vec<(usize, String, usize)> = Vec::new();
    let mut offset = 0usize;
    let mut i = 0usize;
    while i < lines.len() {
        let line = lines[i];
        if i + 1 < lines.len() && is_heading_text(line) && is_underline(lines[i + 1]) {
            let heading = strip_eol(line).trim().to_string();
            let marker_len = line.len() + lines[i + 1].len();
            headings.push((offset, heading, marker_len));
            offset += marker_len;
            i += 2;
            continue;
        }
        offset += line.len();
        i += 1;
    }

    let Some(&(first, _, _)) = headings.first() else {
        return Segments {
            intro: document.to_string(),
            sections: Vec::new(),
        };
    };

    let mut sections = Vec::with_capacity(headings.len());
    for (idx, (start, heading, marker_len)) in headings.iter().enumerate() {
        let end = headings
            .get(idx + 1)
            .map_or(document.len(), |(next, _, _)| *next);
        sections.push(Section {
            heading: heading.clone(),
            body: document[*start..end].to_string(),
            content_start: *marker_len,
        });
    }

    Segments {
        intro: document[..first].to_string(),
        sections,
    }
}
