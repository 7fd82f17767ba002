//! Per-platform content adaptation.
//!
//! Pure and table driven: the same input always yields the same output.
//! Content longer than the platform limit is cut to fit, preferring a word
//! boundary as long as that keeps enough of the text, and marked with an
//! ellipsis. Lengths are counted in Unicode scalar values.

use serde::{Deserialize, Serialize};

use super::PipelineError;
use crate::util::Platform;

/// Adaptation rules for one platform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlatformRules {
    /// Platform the rules apply to.
    pub platform: Platform,
    /// Maximum length in characters.
    pub max_chars: usize,
    /// Appended to truncated content; counts toward the limit.
    pub ellipsis: &'static str,
    /// A word-boundary cut must keep at least this share of the hard cut.
    pub min_retention: f64,
    /// Hashtags per word above which a warning is raised.
    pub hashtag_density_warning: f64,
    /// Hashtag count above which a warning is raised.
    pub max_hashtags: usize,
}

const RULES: [PlatformRules; 5] = [
    PlatformRules {
        platform: Platform::LinkedIn,
        max_chars: 3000,
        ellipsis: "…",
        min_retention: 0.8,
        hashtag_density_warning: 0.2,
        max_hashtags: 5,
    },
    PlatformRules {
        platform: Platform::X,
        max_chars: 280,
        ellipsis: "…",
        min_retention: 0.8,
        hashtag_density_warning: 0.3,
        max_hashtags: 3,
    },
    PlatformRules {
        platform: Platform::Threads,
        max_chars: 500,
        ellipsis: "…",
        min_retention: 0.8,
        hashtag_density_warning: 0.3,
        max_hashtags: 5,
    },
    PlatformRules {
        platform: Platform::Instagram,
        max_chars: 2200,
        ellipsis: "…",
        min_retention: 0.8,
        hashtag_density_warning: 0.5,
        max_hashtags: 30,
    },
    PlatformRules {
        platform: Platform::Facebook,
        max_chars: 63206,
        ellipsis: "…",
        min_retention: 0.8,
        hashtag_density_warning: 0.2,
        max_hashtags: 10,
    },
];

impl PlatformRules {
    /// Rules for `platform`.
    #[must_use]
    pub fn for_platform(platform: Platform) -> Self {
        RULES
            .iter()
            .copied()
            .find(|r| r.platform == platform)
            .unwrap_or(RULES[0])
    }
}

/// Content ready to send to one platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdaptedContent {
    /// Target platform.
    pub platform: Platform,
    /// Final text.
    pub text: String,
    /// Whether the input was cut.
    pub truncated: bool,
    /// Non-fatal findings.
    pub warnings: Vec<String>,
}

/// Adapt `content` to the rules of `platform`.
///
/// # Errors
///
/// `Validation` when the content is empty after trimming.
pub fn adapt_content(content: &str, platform: Platform) -> Result<AdaptedContent, PipelineError> {
    adapt_with(content, &PlatformRules::for_platform(platform))
}

/// Adapt `content` with explicit rules.
///
/// # Errors
///
/// `Validation` when the content is empty after trimming.
pub fn adapt_with(content: &str, rules: &PlatformRules) -> Result<AdaptedContent, PipelineError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::validation(format!(
            "content for {} is empty",
            rules.platform
        )));
    }

    let mut warnings = hashtag_warnings(trimmed, rules);
    let len = trimmed.chars().count();
    if len <= rules.max_chars {
        return Ok(AdaptedContent {
            platform: rules.platform,
            text: trimmed.to_string(),
            truncated: false,
            warnings,
        });
    }

    let text = truncate(trimmed, rules);
    warnings.push(format!(
        "content truncated from {len} to {} characters for {}",
        text.chars().count(),
        rules.platform
    ));
    Ok(AdaptedContent {
        platform: rules.platform,
        text,
        truncated: true,
        warnings,
    })
}

fn truncate(text: &str, rules: &PlatformRules) -> String {
    let budget = rules
        .max_chars
        .saturating_sub(rules.ellipsis.chars().count());
    let hard_end = text
        .char_indices()
        .nth(budget)
        .map_or(text.len(), |(idx, _)| idx);
    let hard = &text[..hard_end];

    // Cut at the last whitespace only if that keeps enough of the hard cut.
    let cut = hard
        .char_indices()
        .rev()
        .find(|(_, c)| c.is_whitespace())
        .map(|(idx, _)| &hard[..idx])
        .filter(|candidate| {
            #[allow(clippy::cast_precision_loss)]
            let kept = candidate.chars().count() as f64 / budget.max(1) as f64;
            kept >= rules.min_retention
        })
        .unwrap_or(hard);

    format!("{}{}", cut.trim_end(), rules.ellipsis)
}

fn hashtag_warnings(text: &str, rules: &PlatformRules) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let tags = words
        .iter()
        .filter(|w| w.starts_with('#') && w.len() > 1)
        .count();
    let mut warnings = Vec::new();
    if tags > rules.max_hashtags {
        warnings.push(format!(
            "{tags} hashtags exceed the recommended {} for {}",
            rules.max_hashtags, rules.platform
        ));
    }
    #[allow(clippy::cast_precision_loss)]
    let density = tags as f64 / words.len().max(1) as f64;
    if tags > 0 && density > rules.hashtag_density_warning {
        warnings.push(format!(
            "hashtag density {:.0}% is high for {}",
            density * 100.0,
            rules.platform
        ));
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_content_passes_through() {
        let out = adapt_content("  Ship it.  ", Platform::X).unwrap();
        assert_eq!(out.text, "Ship it.");
        assert!(!out.truncated);
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn empty_content_is_invalid() {
        assert!(matches!(
            adapt_content(" \n ", Platform::LinkedIn),
            Err(PipelineError::Validation(_))
        ));
    }

    #[test]
    fn long_content_is_cut_on_a_word_boundary() {
        let text = "word ".repeat(100);
        let out = adapt_content(&text, Platform::X).unwrap();
        assert!(out.truncated);
        assert!(out.text.chars().count() <= 280);
        assert!(out.text.ends_with("word…"));
    }

    #[test]
    fn one_long_token_falls_back_to_a_hard_cut() {
        let text = "a".repeat(400);
        let out = adapt_content(&text, Platform::X).unwrap();
        assert_eq!(out.text.chars().count(), 280);
        assert!(out.text.ends_with('…'));
    }

    #[test]
    fn multibyte_text_is_counted_in_chars() {
        let text = "é".repeat(600);
        let out = adapt_content(&text, Platform::Threads).unwrap();
        assert_eq!(out.text.chars().count(), 500);
    }

    #[test]
    fn hashtag_heavy_content_warns_but_passes() {
        let out = adapt_content("Launch #a #b #c #d", Platform::X).unwrap();
        assert!(!out.truncated);
        assert_eq!(out.warnings.len(), 2);
    }

    #[test]
    fn every_platform_has_rules() {
        for p in Platform::ALL {
            assert_eq!(PlatformRules::for_platform(p).platform, p);
        }
        assert_eq!(PlatformRules::for_platform(Platform::Facebook).max_chars, 63206);
    }
}
