//! Structural checks applied to a candidate template result.
//!
//! A failed check is a [`PipelineError::Expectation`], the one error kind the
//! attempt loop retries. The text counters here are also used for usage
//! accounting.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};

/// Lines per page used by [`count_pages`].
const LINES_PER_PAGE: usize = 44;

/// Inclusive bounds on one counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectationAmount {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<usize>,
}

/// Unit an expectation counts in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectationUnit {
    Characters,
    Words,
    Sentences,
    Lines,
    Paragraphs,
    Pages,
}

impl ExpectationUnit {
    pub fn as_str(self) -> &'static str {
        match self {
            ExpectationUnit::Characters => "characters",
            ExpectationUnit::Words => "words",
            ExpectationUnit::Sentences => "sentences",
            ExpectationUnit::Lines => "lines",
            ExpectationUnit::Paragraphs => "paragraphs",
            ExpectationUnit::Pages => "pages",
        }
    }

    /// Count this unit in `text`.
    pub fn count(self, text: &str) -> usize {
        match self {
            ExpectationUnit::Characters => count_characters(text),
            ExpectationUnit::Words => count_words(text),
            ExpectationUnit::Sentences => count_sentences(text),
            ExpectationUnit::Lines => count_lines(text),
            ExpectationUnit::Paragraphs => count_paragraphs(text),
            ExpectationUnit::Pages => count_pages(text),
        }
    }
}

/// Size bounds on a template result, per unit.
///
/// ```
/// use prompt_pipeline::expectations::{Expectations, ExpectationUnit};
///
/// let expectations = Expectations::default().with_min(ExpectationUnit::Characters, 1);
/// assert!(expectations.check("Hello").is_ok());
/// assert!(expectations.check("").is_err());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expectations {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub characters: Option<ExpectationAmount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub words: Option<ExpectationAmount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentences: Option<ExpectationAmount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lines: Option<ExpectationAmount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paragraphs: Option<ExpectationAmount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<ExpectationAmount>,
}

impl Expectations {
    fn slot(&mut self, unit: ExpectationUnit) -> &mut Option<ExpectationAmount> {
        match unit {
            ExpectationUnit::Characters => &mut self.characters,
            ExpectationUnit::Words => &mut self.words,
            ExpectationUnit::Sentences => &mut self.sentences,
            ExpectationUnit::Lines => &mut self.lines,
            ExpectationUnit::Paragraphs => &mut self.paragraphs,
            ExpectationUnit::Pages => &mut self.pages,
        }
    }

    /// Require at least `min` of `unit`.
    pub fn with_min(mut self, unit: ExpectationUnit, min: usize) -> Self {
        self.slot(unit).get_or_insert_with(Default::default).min = Some(min);
        self
    }

    /// Allow at most `max` of `unit`.
    pub fn with_max(mut self, unit: ExpectationUnit, max: usize) -> Self {
        self.slot(unit).get_or_insert_with(Default::default).max = Some(max);
        self
    }

    /// Configured bounds in a fixed unit order.
    pub fn bounds(&self) -> impl Iterator<Item = (ExpectationUnit, ExpectationAmount)> + '_ {
        [
            (ExpectationUnit::Characters, self.characters),
            (ExpectationUnit::Words, self.words),
            (ExpectationUnit::Sentences, self.sentences),
            (ExpectationUnit::Lines, self.lines),
            (ExpectationUnit::Paragraphs, self.paragraphs),
            (ExpectationUnit::Pages, self.pages),
        ]
        .into_iter()
        .filter_map(|(unit, amount)| amount.map(|a| (unit, a)))
    }

    /// Check `text` against every configured bound.
    pub fn check(&self, text: &str) -> Result<()> {
        for (unit, amount) in self.bounds() {
            let actual = unit.count(text);
            if let Some(min) = amount.min {
                if actual < min {
                    return Err(PipelineError::Expectation(format!(
                        "Expected at least {} {} but got {}",
                        min,
                        unit.as_str(),
                        actual
                    )));
                }
            }
            if let Some(max) = amount.max {
                if actual > max {
                    return Err(PipelineError::Expectation(format!(
                        "Expected at most {} {} but got {}",
                        max,
                        unit.as_str(),
                        actual
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Required format of a template result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExpectFormat {
    Json,
}

impl ExpectFormat {
    pub fn check(self, text: &str) -> Result<()> {
        match self {
            ExpectFormat::Json => serde_json::from_str::<serde_json::Value>(text)
                .map(|_| ())
                .map_err(|e| PipelineError::Expectation(format!("Expected valid JSON string: {}", e))),
        }
    }
}

pub fn count_characters(text: &str) -> usize {
    text.chars().count()
}

pub fn count_words(text: &str) -> usize {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .count()
}

pub fn count_sentences(text: &str) -> usize {
    text.split(['.', '!', '?'])
        .filter(|s| !s.trim().is_empty())
        .count()
}

pub fn count_lines(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.replace("\r\n", "\n").split('\n').count()
}

pub fn count_paragraphs(text: &str) -> usize {
    let normalized = text.replace("\r\n", "\n");
    let mut count = 0;
    let mut in_paragraph = false;
    for line in normalized.split('\n') {
        if line.trim().is_empty() {
            in_paragraph = false;
        } else if !in_paragraph {
            in_paragraph = true;
            count += 1;
        }
    }
    count
}

pub fn count_pages(text: &str) -> usize {
    count_lines(text).div_ceil(LINES_PER_PAGE)
}
