//! Extraction of named file payloads from generated text.
//!
//! The LM is instructed to label each proposed file with a `# FILE: <name>`
//! marker line and wrap content in triple-backtick fences. This module turns
//! that freeform text into an ordered filename -> content map. The parser is
//! a pure text transform: it never consults the allow-list, so policy stays
//! with the guard in `allowlist`.
//!
//! The state machine:
//!
//! | state          | `# FILE:` marker        | fence + lang tag | bare fence        | text     |
//! |----------------|-------------------------|------------------|-------------------|----------|
//! | Outside        | open capture            | -> InFencedBlock | -> InFencedBlock  | ignored  |
//! | InFencedBlock  | open capture            | -> Outside       | -> Outside        | ignored  |
//! | InNamedCapture | flush, open new capture | ignored          | flush, -> Outside | captured |
//!
//! End of input flushes any still-open named buffer. Anonymous fenced blocks
//! (no marker seen) are discarded on close. A repeated marker for the same
//! filename overwrites the earlier entry in place, keeping its position.

/// Marker line prefix recognized on generated output.
pub const FILE_MARKER: &str = "# FILE:";

/// Insertion-ordered filename -> content map built from one response.
///
/// Order is the order of first appearance in the source text; re-inserting a
/// filename replaces the content but keeps the original position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneratedFileSet {
    entries: Vec<(String, String)>,
}

impl GeneratedFileSet {
    pub fn insert(&mut self, filename: String, content: String) {
        if let Some(entry) = self.entries.iter_mut().find(|(name, _)| *name == filename) {
            entry.1 = content;
        } else {
            self.entries.push((filename, content));
        }
    }

    pub fn get(&self, filename: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(name, _)| name == filename)
            .map(|(_, content)| content.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, content)| (name.as_str(), content.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keep only entries whose filename satisfies the predicate, preserving
    /// order. Returns the names that were dropped.
    pub fn retain_filenames<F>(&mut self, mut keep: F) -> Vec<String>
    where
        F: FnMut(&str) -> bool,
    {
        let mut dropped = Vec::new();
        self.entries.retain(|(name, _)| {
            if keep(name) {
                true
            } else {
                dropped.push(name.clone());
                false
            }
        });
        dropped
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ParseState {
    /// Not inside any capture; non-marker text is ignored.
    Outside,
    /// Inside a fenced block with no filename; content is discarded on close.
    InFencedBlock,
    /// Capturing lines for a named file.
    InNamedCapture {
        filename: String,
        buffer: Vec<String>,
    },
}

#[derive(Debug, PartialEq, Eq)]
enum LineKind<'a> {
    Marker(&'a str),
    FenceWithTag,
    BareFence,
    Text,
}

fn classify(line: &str) -> LineKind<'_> {
    let trimmed = line.trim();
    if let Some(rest) = trimmed.strip_prefix(FILE_MARKER) {
        // First whitespace-separated token after the marker is the filename;
        // a marker with no token is treated as plain text.
        if let Some(name) = rest.split_whitespace().next() {
            return LineKind::Marker(name);
        }
        return LineKind::Text;
    }
    if trimmed == "```" {
        return LineKind::BareFence;
    }
    if trimmed.starts_with("```") {
        return LineKind::FenceWithTag;
    }
    LineKind::Text
}

/// Parse generated text into an ordered set of named file payloads.
///
/// Captured lines are kept verbatim (no trimming or reformatting); entries
/// with an empty buffer are not recorded.
pub fn parse_generated_files(text: &str) -> GeneratedFileSet {
    let mut files = GeneratedFileSet::default();
    let mut state = ParseState::Outside;

    for line in text.lines() {
        state = match (state, classify(line)) {
            (ParseState::Outside, LineKind::Marker(name))
            | (ParseState::InFencedBlock, LineKind::Marker(name)) => ParseState::InNamedCapture {
                filename: name.to_string(),
                buffer: Vec::new(),
            },
            (ParseState::Outside, LineKind::FenceWithTag)
            | (ParseState::Outside, LineKind::BareFence) => ParseState::InFencedBlock,
            (ParseState::Outside, LineKind::Text) => ParseState::Outside,

            (ParseState::InFencedBlock, LineKind::FenceWithTag)
            | (ParseState::InFencedBlock, LineKind::BareFence) => ParseState::Outside,
            (ParseState::InFencedBlock, LineKind::Text) => ParseState::InFencedBlock,

            (ParseState::InNamedCapture { filename, buffer }, LineKind::Marker(name)) => {
                flush(&mut files, filename, buffer);
                ParseState::InNamedCapture {
                    filename: name.to_string(),
                    buffer: Vec::new(),
                }
            }
            // Opening fence inside a capture (```yaml right after the
            // marker); the fence line itself is not content.
            (state @ ParseState::InNamedCapture { .. }, LineKind::FenceWithTag) => state,
            (ParseState::InNamedCapture { filename, buffer }, LineKind::BareFence) => {
                flush(&mut files, filename, buffer);
                ParseState::Outside
            }
            (
                ParseState::InNamedCapture {
                    filename,
                    mut buffer,
                },
                LineKind::Text,
            ) => {
                buffer.push(line.to_string());
                ParseState::InNamedCapture { filename, buffer }
            }
        };
    }

    // Implicit close at end of input.
    if let ParseState::InNamedCapture { filename, buffer } = state {
        flush(&mut files, filename, buffer);
    }

    files
}

fn flush(files: &mut GeneratedFileSet, filename: String, buffer: Vec<String>) {
    if buffer.is_empty() {
        return;
    }
    files.insert(filename, buffer.join("\n"));
}
