use std::fmt;
use std::sync::LazyLock;

use regex::{Captures, Regex, RegexBuilder};

static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b(?:\[[0-9;?]*[ -/]*[@-~]|[@-Z\\-_])").expect("valid ANSI escape regex")
});

/// Remove ANSI escape sequences from console output.
pub fn strip_ansi(text: &str) -> std::borrow::Cow<'_, str> {
    ANSI_ESCAPE.replace_all(text, "")
}

/// A console line pattern.
///
/// Matching is against the whole line: escape sequences are removed and
/// surrounding whitespace is trimmed before the anchored regex is applied.
#[derive(Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        Self::build(source, false)
    }

    pub fn case_insensitive(source: &str) -> Result<Self, regex::Error> {
        Self::build(source, true)
    }

    fn build(source: &str, case_insensitive: bool) -> Result<Self, regex::Error> {
        let regex = RegexBuilder::new(&format!("^(?:{})$", source))
            .case_insensitive(case_insensitive)
            .build()?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, line: &str) -> bool {
        self.regex.is_match(strip_ansi(line).trim())
    }

    /// Capture groups of a whole-line match, if any.
    pub fn captures(&self, line: &str) -> Option<Vec<(String, String)>> {
        let cleaned = strip_ansi(line);
        let caps: Captures<'_> = self.regex.captures(cleaned.trim())?;
        Some(
            self.regex
                .capture_names()
                .flatten()
                .filter_map(|name| {
                    caps.name(name)
                        .map(|m| (name.to_string(), m.as_str().to_string()))
                })
                .collect(),
        )
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/", self.source)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
