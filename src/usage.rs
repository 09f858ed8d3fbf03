//! Cost and size accounting for model calls.
//!
//! [`Usage`] is the serializable record every provider returns with a result.
//! Each number is an [`UncertainNumber`], so estimated values (e.g. a token
//! count guessed from the text length) stay marked as estimates after any
//! amount of aggregation.

use crate::expectations::{
    count_characters, count_lines, count_pages, count_paragraphs, count_sentences, count_words,
};
use serde::{Deserialize, Serialize};
use std::ops::Add;

/// A number tagged with whether it is exact or estimated.
///
/// Serializes as `{"value": 3}` when exact and
/// `{"value": 3, "isUncertain": true}` when estimated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UncertainNumber {
    pub value: f64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_uncertain: bool,
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

impl UncertainNumber {
    pub const ZERO: Self = Self {
        value: 0.0,
        is_uncertain: false,
    };

    /// An exact value.
    pub fn exact(value: f64) -> Self {
        Self {
            value,
            is_uncertain: false,
        }
    }

    /// An estimated value.
    pub fn uncertain(value: f64) -> Self {
        Self {
            value,
            is_uncertain: true,
        }
    }

    /// Sum the values and OR the uncertainty flags.
    pub fn merge(self, other: Self) -> Self {
        Self {
            value: self.value + other.value,
            is_uncertain: self.is_uncertain || other.is_uncertain,
        }
    }
}

impl Add for UncertainNumber {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        self.merge(rhs)
    }
}

/// Named size counters of a prompt or a result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageCounts {
    #[serde(default)]
    pub tokens_count: UncertainNumber,
    #[serde(default)]
    pub characters_count: UncertainNumber,
    #[serde(default)]
    pub words_count: UncertainNumber,
    #[serde(default)]
    pub sentences_count: UncertainNumber,
    #[serde(default)]
    pub lines_count: UncertainNumber,
    #[serde(default)]
    pub paragraphs_count: UncertainNumber,
    #[serde(default)]
    pub pages_count: UncertainNumber,
}

impl UsageCounts {
    pub const ZERO: Self = Self {
        tokens_count: UncertainNumber::ZERO,
        characters_count: UncertainNumber::ZERO,
        words_count: UncertainNumber::ZERO,
        sentences_count: UncertainNumber::ZERO,
        lines_count: UncertainNumber::ZERO,
        paragraphs_count: UncertainNumber::ZERO,
        pages_count: UncertainNumber::ZERO,
    };

    pub fn merge(self, other: Self) -> Self {
        Self {
            tokens_count: self.tokens_count + other.tokens_count,
            characters_count: self.characters_count + other.characters_count,
            words_count: self.words_count + other.words_count,
            sentences_count: self.sentences_count + other.sentences_count,
            lines_count: self.lines_count + other.lines_count,
            paragraphs_count: self.paragraphs_count + other.paragraphs_count,
            pages_count: self.pages_count + other.pages_count,
        }
    }
}

/// Price, duration and input/output size counters of one or more calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    /// Price in USD.
    pub price: UncertainNumber,
    /// Wall-clock duration in seconds.
    #[serde(default)]
    pub duration: UncertainNumber,
    #[serde(default)]
    pub input: UsageCounts,
    #[serde(default)]
    pub output: UsageCounts,
}

impl Usage {
    /// The neutral element of [`Usage::merge`].
    pub const ZERO: Self = Self {
        price: UncertainNumber::ZERO,
        duration: UncertainNumber::ZERO,
        input: UsageCounts::ZERO,
        output: UsageCounts::ZERO,
    };

    /// Associative, commutative field-wise sum.
    pub fn merge(self, other: Self) -> Self {
        Self {
            price: self.price + other.price,
            duration: self.duration + other.duration,
            input: self.input.merge(other.input),
            output: self.output.merge(other.output),
        }
    }

    /// Estimate usage from the prompt and result texts of a local or free call.
    pub fn from_texts(prompt: &str, result: &str, duration_secs: f64) -> Self {
        Self {
            price: UncertainNumber::exact(0.0),
            duration: UncertainNumber::exact(duration_secs),
            input: compute_usage_counts(prompt),
            output: compute_usage_counts(result),
        }
    }
}

impl Add for Usage {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        self.merge(rhs)
    }
}

impl std::iter::Sum for Usage {
    fn sum<I: Iterator<Item = Usage>>(iter: I) -> Self {
        iter.fold(Usage::ZERO, Usage::merge)
    }
}

/// Merge any number of usages. An empty slice yields [`Usage::ZERO`].
pub fn add_usage(usages: &[Usage]) -> Usage {
    usages.iter().copied().sum()
}

/// Count the size of a text.
///
/// Every counter is exact except `tokens_count`, which is estimated at
/// four characters per token.
pub fn compute_usage_counts(content: &str) -> UsageCounts {
    let characters = count_characters(content) as f64;
    UsageCounts {
        tokens_count: UncertainNumber::uncertain((characters / 4.0).ceil()),
        characters_count: UncertainNumber::exact(characters),
        words_count: UncertainNumber::exact(count_words(content) as f64),
        sentences_count: UncertainNumber::exact(count_sentences(content) as f64),
        lines_count: UncertainNumber::exact(count_lines(content) as f64),
        paragraphs_count: UncertainNumber::exact(count_paragraphs(content) as f64),
        pages_count: UncertainNumber::exact(count_pages(content) as f64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(price: f64, uncertain: bool, tokens: f64) -> Usage {
        Usage {
            price: UncertainNumber {
                value: price,
                is_uncertain: uncertain,
            },
            duration: UncertainNumber::exact(1.0),
            input: UsageCounts {
                tokens_count: UncertainNumber::exact(tokens),
                ..UsageCounts::ZERO
            },
            output: UsageCounts {
                words_count: UncertainNumber::uncertain(tokens / 2.0),
                ..UsageCounts::ZERO
            },
        }
    }

    #[test]
    fn test_merge_is_commutative() {
        let a = sample(0.5, false, 10.0);
        let b = sample(0.25, true, 4.0);
        assert_eq!(a.merge(b), b.merge(a));
    }

    #[test]
    fn test_merge_is_associative() {
        let a = sample(0.5, false, 10.0);
        let b = sample(0.25, true, 4.0);
        let c = sample(1.0, false, 2.0);
        assert_eq!(a.merge(b).merge(c), a.merge(b.merge(c)));
    }

    #[test]
    fn test_empty_add_is_zero() {
        let total = add_usage(&[]);
        assert_eq!(total, Usage::ZERO);
        assert!(!total.price.is_uncertain);
    }

    #[test]
    fn test_uncertainty_propagates() {
        let merged = UncertainNumber::exact(1.0).merge(UncertainNumber::uncertain(2.0));
        assert_eq!(merged.value, 3.0);
        assert!(merged.is_uncertain);
    }

    #[test]
    fn test_serialization_omits_certain_flag() {
        let json = serde_json::to_string(&UncertainNumber::exact(3.0)).unwrap();
        assert_eq!(json, r#"{"value":3.0}"#);
        let json = serde_json::to_string(&UncertainNumber::uncertain(3.0)).unwrap();
        assert_eq!(json, r#"{"value":3.0,"isUncertain":true}"#);
    }

    #[test]
    fn test_usage_json_roundtrip_shape() {
        let usage = sample(0.5, true, 10.0);
        let value = serde_json::to_value(usage).unwrap();
        assert_eq!(value["price"]["isUncertain"], true);
        assert_eq!(value["input"]["tokensCount"]["value"], 10.0);
        let back: Usage = serde_json::from_value(value).unwrap();
        assert_eq!(back, usage);
    }

    #[test]
    fn test_usage_without_counters_deserializes() {
        let usage: Usage = serde_json::from_str(r#"{"price":{"value":0.25}}"#).unwrap();
        assert_eq!(usage.price, UncertainNumber::exact(0.25));
        assert_eq!(usage.duration, UncertainNumber::ZERO);
        assert_eq!(usage.input, UsageCounts::ZERO);
        assert_eq!(usage.output, UsageCounts::ZERO);
    }

    #[test]
    fn test_compute_usage_counts() {
        let counts = compute_usage_counts("Hello world. How are you?");
        assert_eq!(counts.words_count.value, 5.0);
        assert_eq!(counts.sentences_count.value, 2.0);
        assert_eq!(counts.lines_count.value, 1.0);
        assert!(counts.tokens_count.is_uncertain);
        assert!(!counts.characters_count.is_uncertain);
    }
}
