// src/categorize/mod.rs
//! Deterministic auto-categorization of observations.
//!
//! Each category carries a weighted rule bundle of keywords, observation
//! types, and file-path patterns. The category with the strictly greatest
//! positive score wins; ties fall to the earlier rule, and no positive
//! score at all yields `general`. Matching is case-insensitive and total.

use regex::Regex;
use std::sync::LazyLock;
use strum::{Display, EnumString};

/// Closed category set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum Category {
    Security,
    Testing,
    Debugging,
    Architecture,
    Refactoring,
    Config,
    Docs,
    FeatureDev,
    General,
}

/// Inputs to categorization, borrowed from the observation being stored.
#[derive(Debug, Clone, Copy, Default)]
pub struct CategorizeInput<'a> {
    pub obs_type: &'a str,
    pub title: &'a str,
    pub text: Option<&'a str>,
    pub narrative: Option<&'a str>,
    pub concepts: Option<&'a str>,
    pub files_modified: Option<&'a str>,
    pub files_read: Option<&'a str>,
}

struct CategoryRule {
    category: Category,
    keywords: &'static [&'static str],
    types: &'static [&'static str],
    path_patterns: Vec<Regex>,
    weight: i64,
}

#[allow(clippy::expect_used)] // static patterns are compile-time known
static RULES: LazyLock<Vec<CategoryRule>> = LazyLock::new(|| {
    let rx = |p: &str| Regex::new(p).expect("valid regex");
    vec![
        CategoryRule {
            category: Category::Security,
            keywords: &[
                "auth", "token", "password", "secret", "credential", "vulnerab", "cve",
                "encrypt", "permission", "sanitiz", "injection", "xss",
            ],
            types: &["constraint"],
            path_patterns: vec![rx(r"(?i)auth"), rx(r"(?i)security"), rx(r"(?i)crypt")],
            weight: 3,
        },
        CategoryRule {
            category: Category::Testing,
            keywords: &[
                "test", "assert", "coverage", "fixture", "mock", "flaky", "regression suite",
            ],
            types: &[],
            path_patterns: vec![
                rx(r"(?i)(^|/)tests?(/|$)"),
                rx(r"(?i)_test\."),
                rx(r"(?i)\.(test|spec)\."),
            ],
            weight: 3,
        },
        CategoryRule {
            category: Category::Debugging,
            keywords: &[
                "bug", "crash", "panic", "stack trace", "reproduce", "root cause", "regression",
                "error", "fix",
            ],
            types: &[],
            path_patterns: vec![],
            weight: 2,
        },
        CategoryRule {
            category: Category::Architecture,
            keywords: &[
                "architecture", "design", "boundary", "interface", "schema", "data model",
                "dependency", "layering", "module layout",
            ],
            types: &["decision", "rejected"],
            path_patterns: vec![],
            weight: 2,
        },
        CategoryRule {
            category: Category::Refactoring,
            keywords: &[
                "refactor", "rename", "extract", "simplif", "cleanup", "dead code",
                "deduplicate",
            ],
            types: &[],
            path_patterns: vec![],
            weight: 2,
        },
        CategoryRule {
            category: Category::Config,
            keywords: &[
                "config", "environment variable", "env var", "settings", "flag", "toml", "yaml",
            ],
            types: &[],
            path_patterns: vec![
                rx(r"(?i)\.(toml|ya?ml|json|ini|env)$"),
                rx(r"(?i)(^|/)\.?config"),
                rx(r"(?i)dockerfile"),
            ],
            weight: 2,
        },
        CategoryRule {
            category: Category::Docs,
            keywords: &["readme", "documentation", "docstring", "changelog", "docs"],
            types: &[],
            path_patterns: vec![rx(r"(?i)\.(md|rst|adoc)$"), rx(r"(?i)(^|/)docs?(/|$)")],
            weight: 2,
        },
        CategoryRule {
            category: Category::FeatureDev,
            keywords: &["implement", "add support", "new feature", "endpoint", "wire up"],
            types: &["file-write"],
            path_patterns: vec![],
            weight: 1,
        },
    ]
});

/// Categorize an observation. Deterministic and total: always returns a
/// member of the closed set.
pub fn categorize(input: &CategorizeInput) -> Category {
    let haystack = [
        input.title,
        input.text.unwrap_or(""),
        input.narrative.unwrap_or(""),
        input.concepts.unwrap_or(""),
    ]
    .join("\n")
    .to_lowercase();

    let obs_type = input.obs_type.to_lowercase();

    let paths: Vec<&str> = [input.files_modified, input.files_read]
        .iter()
        .flatten()
        .flat_map(|list| list.split(','))
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    let mut best: Option<(Category, i64)> = None;

    for rule in RULES.iter() {
        let mut score = 0i64;

        for keyword in rule.keywords {
            if haystack.contains(keyword) {
                score += rule.weight;
            }
        }

        if rule.types.contains(&obs_type.as_str()) {
            score += 2 * rule.weight;
        }

        for pattern in &rule.path_patterns {
            if paths.iter().any(|p| pattern.is_match(p)) {
                score += rule.weight;
            }
        }

        // Strictly greater keeps the earlier rule on ties
        if score > 0 && best.map(|(_, s)| score > s).unwrap_or(true) {
            best = Some((rule.category, score));
        }
    }

    best.map(|(c, _)| c).unwrap_or(Category::General)
}
