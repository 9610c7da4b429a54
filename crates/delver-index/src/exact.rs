//! Literal and regex search over raw workspace files.

use std::fmt::Write;
use std::path::Path;

use regex::Regex;

use crate::chunker::{Chunker, chunk_ordinal_at};
use crate::error::RetrievalError;
use crate::workspace::{FileContent, Workspace};

/// Compiled exact-channel pattern.
#[derive(Debug, Clone)]
pub struct ExactMatcher {
    regex: Regex,
    display: String,
}

impl ExactMatcher {
    /// # Errors
    ///
    /// Never fails for a literal; the `Result` mirrors [`Self::regex`].
    pub fn literal(text: &str) -> Result<Self, RetrievalError> {
        Ok(Self {
            regex: Regex::new(&regex::escape(text))?,
            display: text.to_owned(),
        })
    }

    /// # Errors
    ///
    /// Returns [`RetrievalError::InvalidPattern`] if `pattern` does not compile.
    pub fn regex(pattern: &str) -> Result<Self, RetrievalError> {
        Ok(Self {
            regex: Regex::new(pattern)?,
            display: format!("/{pattern}/"),
        })
    }

    /// Derive a matcher from a free-form query.
    ///
    /// `/…/` is taken as a regex. Otherwise the query is reduced to its
    /// code-like identifiers; a single bare token is matched literally.
    /// Returns `None` when nothing in the query looks searchable.
    ///
    /// # Errors
    ///
    /// Returns an error if a `/…/` regex does not compile.
    pub fn from_query(query: &str) -> Result<Option<Self>, RetrievalError> {
        let query = query.trim();
        if query.len() >= 2
            && let Some(inner) = query.strip_prefix('/').and_then(|q| q.strip_suffix('/'))
            && !inner.is_empty()
        {
            return Self::regex(inner).map(Some);
        }

        let idents = extract_identifiers(query);
        if !idents.is_empty() {
            let alternation = idents
                .iter()
                .map(|i| regex::escape(i))
                .collect::<Vec<_>>()
                .join("|");
            return Ok(Some(Self {
                regex: Regex::new(&alternation)?,
                display: idents.join(", "),
            }));
        }

        if !query.is_empty() && !query.contains(char::is_whitespace) {
            return Self::literal(query).map(Some);
        }
        Ok(None)
    }

    #[must_use]
    pub fn is_match(&self, line: &str) -> bool {
        self.regex.is_match(line)
    }

    #[must_use]
    pub fn display(&self) -> &str {
        &self.display
    }
}

/// Tokens that look like code: containing `_`, a digit, an interior capital,
/// or all-caps of length two or more. Deduplicated in first-seen order.
#[must_use]
pub fn extract_identifiers(query: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for token in query.split(|c: char| !(c.is_alphanumeric() || c == '_')) {
        if token.is_empty() || !token.chars().any(char::is_alphabetic) {
            continue;
        }
        let has_underscore = token.contains('_');
        let has_digit = token.chars().any(|c| c.is_ascii_digit());
        let interior_capital = token.chars().skip(1).any(char::is_uppercase)
            && token.chars().any(char::is_lowercase);
        let all_caps = token.chars().count() >= 2
            && token
                .chars()
                .filter(|c| c.is_alphabetic())
                .all(char::is_uppercase);
        if (has_underscore || has_digit || interior_capital || all_caps)
            && !out.iter().any(|t| t == token)
        {
            out.push(token.to_owned());
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExactMatch {
    pub path: String,
    /// 1-based.
    pub line: usize,
    pub text: String,
    /// Ordinal of the chunk containing the match start.
    pub ordinal: usize,
    /// Matching line with surrounding context.
    pub snippet: String,
}

#[derive(Debug, Clone, Default)]
pub struct ExactResults {
    pub matches: Vec<ExactMatch>,
    /// More matches existed beyond the cap.
    pub truncated: bool,
}

impl ExactResults {
    /// `path:line: text` per match plus an overflow notice.
    #[must_use]
    pub fn render(&self) -> String {
        if self.matches.is_empty() {
            return "No matches found.".to_owned();
        }
        let mut out = String::new();
        for m in &self.matches {
            let _ = writeln!(out, "{}:{}: {}", m.path, m.line, m.text.trim());
        }
        if self.truncated {
            let _ = writeln!(
                out,
                "... more matches omitted (showing first {})",
                self.matches.len()
            );
        }
        out
    }
}

/// Line-oriented search over every eligible workspace file.
#[derive(Debug, Clone)]
pub struct ExactSearch {
    workspace: Workspace,
    chunker: Chunker,
    context_lines: usize,
    max_matches: usize,
}

impl ExactSearch {
    #[must_use]
    pub fn new(
        workspace: Workspace,
        chunker: Chunker,
        context_lines: usize,
        max_matches: usize,
    ) -> Self {
        Self {
            workspace,
            chunker,
            context_lines,
            max_matches,
        }
    }

    #[must_use]
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Search all files, or only those under `scope` (a workspace-relative
    /// file or directory).
    pub async fn search(&self, matcher: &ExactMatcher, scope: Option<&Path>) -> ExactResults {
        let files = match scope {
            Some(p) => {
                let abs = self.workspace.root().join(p);
                if abs.is_file() {
                    self.workspace.relative(&abs).into_iter().collect()
                } else {
                    self.workspace.files_under(&abs)
                }
            }
            None => self.workspace.files(),
        };

        let mut results = ExactResults::default();
        for rel in files {
            let text = match self.workspace.read_text(&rel).await {
                Ok(FileContent::Text(t)) => t,
                Ok(FileContent::Skipped(_)) => continue,
                Err(e) => {
                    tracing::warn!(file = %rel, error = %e, "exact search skipped unreadable file");
                    continue;
                }
            };
            if self.search_file(&rel, &text, matcher, &mut results) {
                break;
            }
        }
        tracing::debug!(
            pattern = matcher.display(),
            matches = results.matches.len(),
            truncated = results.truncated,
            "exact search finished"
        );
        results
    }

    /// Returns `true` once the cap is exceeded.
    fn search_file(
        &self,
        rel: &str,
        text: &str,
        matcher: &ExactMatcher,
        results: &mut ExactResults,
    ) -> bool {
        let lines: Vec<&str> = text.lines().collect();
        let mut chunks = None;
        let mut char_offset = 0usize;

        for (idx, line) in lines.iter().enumerate() {
            let line_start = char_offset;
            // +1 for the newline consumed by `lines()`
            char_offset += line.chars().count() + 1;
            if !matcher.is_match(line) {
                continue;
            }
            if results.matches.len() >= self.max_matches {
                results.truncated = true;
                return true;
            }
            let chunks = chunks.get_or_insert_with(|| self.chunker.split_text(rel, text));
            let ordinal = chunk_ordinal_at(chunks, line_start).unwrap_or(0);
            let from = idx.saturating_sub(self.context_lines);
            let to = (idx + self.context_lines + 1).min(lines.len());
            results.matches.push(ExactMatch {
                path: rel.to_owned(),
                line: idx + 1,
                text: (*line).to_owned(),
                ordinal,
                snippet: lines[from..to].join("\n"),
            });
        }
        false
    }
}
