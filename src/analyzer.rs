//! Title and body classification.
//!
//! Everything in here is pure: a title, a body and an optional taxonomy label
//! go in, a [`PostMetadata`] verdict comes out. Empty input never produces an
//! issue.

use crate::models::ContentItem;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

/// Paragraphs with more words than this are rejected.
pub const MAX_PARAGRAPH_WORDS: usize = 350;

/// Characters treated as word separators when looking for "nsfw" in a title.
const NSFW_REMAP_CHARS: &str = "{}[]()|.!?$*@#";

const NUMBER: &str = r"(?:[1-9][0-9]*|one|two|three|five|ten|eleven|twelve|fifteen|(?:four|six|seven|eight|nine)(?:teen)?)";

lazy_static! {
    /// Non-nested spans inside [], (), {} or ||.
    static ref TAG_SPAN: Regex = Regex::new(r"\[[^\]]*\]|\(.*?\)|\{.*?\}|\|.*?\|").unwrap();
    static ref FINAL_TAG: Regex = Regex::new(r"^finale?$").unwrap();
    static ref SERIES_TAGS: Vec<Regex> = vec![
        // bare number
        Regex::new(&format!(r"^{NUMBER}$")).unwrap(),
        // part / pt / pt. with optional number separator
        Regex::new(&format!(r"^(?:part|pt\.?)\s?{NUMBER}$")).unwrap(),
        // vol / vol. / volume
        Regex::new(&format!(r"^vol(?:\.|ume)?\s{NUMBER}$")).unwrap(),
        // update, update 3, update #3
        Regex::new(&format!(r"^update(?: #?(?:{NUMBER})?)?$")).unwrap(),
    ];
    static ref PARAGRAPH_BREAK: Regex = Regex::new(r"\n\s*\n|[ \t]{2,}\n|\t\n").unwrap();
    static ref WORD: Regex = Regex::new(r"\w+").unwrap();
    static ref INNER_WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// A bracketed title span that is not part of the tag grammar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidTag {
    /// The span exactly as written, delimiters included.
    pub span: String,
    /// Delimiters stripped, whitespace collapsed, lowercased.
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSummary {
    pub is_series: bool,
    pub is_final: bool,
    pub invalid_tags: Vec<InvalidTag>,
}

/// Verdict for one submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PostMetadata {
    pub has_long_paragraphs: bool,
    pub has_codeblocks: bool,
    pub has_nsfw_title: bool,
    pub is_series: bool,
    pub is_final: bool,
    pub invalid_tags: Vec<InvalidTag>,
}

impl PostMetadata {
    pub fn is_invalid(&self) -> bool {
        self.has_long_paragraphs
            || self.has_codeblocks
            || self.has_nsfw_title
            || !self.invalid_tags.is_empty()
    }

    pub fn is_serial(&self) -> bool {
        self.is_series || self.is_final
    }

    /// Problems that can only be fixed by reposting (titles are immutable).
    pub fn has_title_issues(&self) -> bool {
        self.has_nsfw_title || !self.invalid_tags.is_empty()
    }

    pub fn has_formatting_issues(&self) -> bool {
        self.has_long_paragraphs || self.has_codeblocks
    }

    /// Offending spans as the author typed them, comma separated.
    pub fn bad_tags(&self) -> String {
        self.invalid_tags
            .iter()
            .map(|t| t.span.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone)]
pub struct PostAnalyzer {
    series_label: String,
    max_paragraph_words: usize,
}

impl PostAnalyzer {
    pub fn new(series_label: &str) -> Self {
        Self {
            series_label: series_label.to_lowercase(),
            max_paragraph_words: MAX_PARAGRAPH_WORDS,
        }
    }

    /// Parses tags out of the post title.
    ///
    /// Valid tag values are a bare number, `part`/`pt`/`pt.` + number,
    /// `vol`/`vol.`/`volume` + number, `update` with an optional `#number`,
    /// and `final`/`finale`. Numbers are integral or one of a small set of
    /// spelled-out words. Matching is on the whole span, so `part 1 of 2` is
    /// invalid.
    pub fn categorize_tags(&self, title: &str) -> TagSummary {
        let mut summary = TagSummary::default();

        for m in TAG_SPAN.find_iter(title) {
            let span = m.as_str();
            let text = normalize_tag(span);

            if FINAL_TAG.is_match(&text) {
                summary.is_series = true;
                summary.is_final = true;
            } else if SERIES_TAGS.iter().any(|p| p.is_match(&text)) {
                summary.is_series = true;
            } else {
                summary.invalid_tags.push(InvalidTag {
                    span: span.to_string(),
                    text,
                });
            }
        }

        summary
    }

    pub fn contains_long_paragraphs(&self, paragraphs: &[&str]) -> bool {
        paragraphs
            .iter()
            .any(|p| WORD.find_iter(p).count() > self.max_paragraph_words)
    }

    /// Codeblocks are paragraphs starting with at least four spaces or with a
    /// tab after optional spaces. Whitespace-only paragraphs never count.
    pub fn contains_codeblocks(&self, paragraphs: &[&str]) -> bool {
        paragraphs.iter().any(|p| {
            if p.trim().is_empty() {
                return false;
            }
            p.starts_with("    ") || p.trim_start_matches(' ').starts_with('\t')
        })
    }

    pub fn contains_nsfw_title(&self, title: &str) -> bool {
        let remapped: String = title
            .to_lowercase()
            .chars()
            .map(|c| if NSFW_REMAP_CHARS.contains(c) { ' ' } else { c })
            .collect();
        remapped.split_whitespace().any(|w| w == "nsfw")
    }

    /// Splits a body on blank lines, on two or more trailing spaces/tabs before
    /// a newline, or on a lone tab before a newline.
    pub fn split_paragraphs(body: &str) -> Vec<&str> {
        PARAGRAPH_BREAK.split(body).collect()
    }

    pub fn analyze(&self, title: &str, body: &str, label: Option<&str>) -> PostMetadata {
        let paragraphs = Self::split_paragraphs(body);
        let tags = self.categorize_tags(title);

        let mut is_series = tags.is_series;
        if !is_series {
            is_series = label
                .map(|l| l.to_lowercase() == self.series_label)
                .unwrap_or(false);
        }

        PostMetadata {
            has_long_paragraphs: self.contains_long_paragraphs(&paragraphs),
            has_codeblocks: self.contains_codeblocks(&paragraphs),
            has_nsfw_title: self.contains_nsfw_title(title),
            is_series,
            is_final: tags.is_final,
            invalid_tags: tags.invalid_tags,
        }
    }

    pub fn analyze_item(&self, item: &ContentItem) -> PostMetadata {
        self.analyze(&item.title, &item.body, item.taxonomy_label.as_deref())
    }
}

fn normalize_tag(span: &str) -> String {
    // every delimiter is a single ASCII byte
    let inner = &span[1..span.len() - 1];
    INNER_WHITESPACE
        .replace_all(inner.trim(), " ")
        .to_lowercase()
}
