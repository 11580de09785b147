// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 seqflow contributors

//! Filename matching
//!
//! A stage's match rule decides which upstream files it consumes and which
//! fields (sample, lane, ...) those files contribute to output templates.

use regex::Regex;
use std::fmt;

use crate::errors::{SeqflowError, SeqflowResult};
use crate::pipeline::template::FieldMap;

/// Implicit field: directory prefix of the matched path
pub const FIELD_PATH: &str = "path";
/// Implicit field: final path component
pub const FIELD_BASENAME: &str = "basename";
/// Implicit field of suffix rules: path minus the suffix
pub const FIELD_STEM: &str = "stem";

/// Result of a successful match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMatch {
    /// Named capture groups
    pub captures: FieldMap,
    /// Directory prefix (empty when the path has none)
    pub dir: String,
    /// Final path component
    pub basename: String,
    /// Path minus the suffix, for suffix rules
    pub stem: Option<String>,
}

impl PathMatch {
    /// Captures plus the implicit fields, for template rendering.
    ///
    /// A capture group named like an implicit field wins.
    pub fn fields(&self) -> FieldMap {
        let mut fields = self.captures.clone();
        fields
            .entry(FIELD_PATH.to_string())
            .or_insert_with(|| self.dir.clone());
        fields
            .entry(FIELD_BASENAME.to_string())
            .or_insert_with(|| self.basename.clone());
        if let Some(stem) = &self.stem {
            fields
                .entry(FIELD_STEM.to_string())
                .or_insert_with(|| stem.clone());
        }
        fields
    }
}

/// Rule used to match a candidate input path
#[derive(Clone)]
pub enum MatchRule {
    /// Literal suffix; only `{stem}` is captured
    Suffix(String),
    /// Anchored regular expression with named capture groups
    Formatter(Regex),
}

impl MatchRule {
    /// Suffix rule
    pub fn suffix(suffix: impl Into<String>) -> Self {
        Self::Suffix(suffix.into())
    }

    /// Structured rule from a regular expression with `(?P<name>...)` groups.
    ///
    /// The expression is anchored against the whole path.
    pub fn formatter(stage: &str, pattern: &str) -> SeqflowResult<Self> {
        let anchored = format!("^(?:{pattern})$");
        Regex::new(&anchored)
            .map(Self::Formatter)
            .map_err(|e| SeqflowError::invalid_pattern(stage, &e))
    }

    /// Match `path`, returning its captured fields on success
    pub fn matches(&self, path: &str) -> Option<PathMatch> {
        let (dir, base) = split_path(path);

        let (captures, stem) = match self {
            Self::Suffix(suffix) => {
                let stem = path.strip_suffix(suffix.as_str())?;
                (FieldMap::new(), Some(stem.to_string()))
            }
            Self::Formatter(regex) => {
                let caps = regex.captures(path)?;
                let captures = regex
                    .capture_names()
                    .flatten()
                    .filter_map(|name| {
                        caps.name(name)
                            .map(|m| (name.to_string(), m.as_str().to_string()))
                    })
                    .collect();
                (captures, None)
            }
        };

        Some(PathMatch {
            captures,
            dir: dir.to_string(),
            basename: base.to_string(),
            stem,
        })
    }

    /// Every field name a successful match can provide
    pub fn field_names(&self) -> Vec<String> {
        let mut names = match self {
            Self::Suffix(_) => vec![FIELD_STEM.to_string()],
            Self::Formatter(regex) => regex.capture_names().flatten().map(String::from).collect(),
        };
        for implicit in [FIELD_PATH, FIELD_BASENAME] {
            if !names.iter().any(|n| n == implicit) {
                names.push(implicit.to_string());
            }
        }
        names
    }

    /// Whether this is a suffix rule
    pub fn is_suffix(&self) -> bool {
        matches!(self, Self::Suffix(_))
    }
}

impl fmt::Debug for MatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Suffix(s) => f.debug_tuple("Suffix").field(s).finish(),
            Self::Formatter(r) => f.debug_tuple("Formatter").field(&r.as_str()).finish(),
        }
    }
}

impl fmt::Display for MatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Suffix(s) => write!(f, "suffix({s})"),
            Self::Formatter(r) => write!(f, "formatter({})", r.as_str()),
        }
    }
}

/// Split a path into (directory prefix, file name) on the last `/`
fn split_path(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("", path),
    }
}
