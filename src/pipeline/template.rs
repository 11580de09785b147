// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 seqflow contributors

//! Placeholder templates
//!
//! Output paths, companion paths, extra parameters and shell commands are
//! all written as templates such as `alignments/{sample}/{sample}.bam`.
//! A placeholder is `{name}` or `{name[N]}`; `{{` and `}}` produce literal
//! braces. Templates are parsed once and rendered against any [`Fields`]
//! source.

use std::borrow::Cow;
use std::collections::BTreeMap;

use crate::errors::{SeqflowError, SeqflowResult};

/// Captured field values, keyed by placeholder name
pub type FieldMap = BTreeMap<String, String>;

/// Source of placeholder values
pub trait Fields {
    /// Look up `name`, optionally indexed (`{name[1]}`)
    fn lookup(&self, name: &str, index: Option<usize>) -> Option<Cow<'_, str>>;
}

impl Fields for FieldMap {
    fn lookup(&self, name: &str, index: Option<usize>) -> Option<Cow<'_, str>> {
        // Scalar fields accept `[0]` so `{sample[0]}` and `{sample}` agree.
        match index {
            None | Some(0) => self.get(name).map(|v| Cow::Borrowed(v.as_str())),
            Some(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder { name: String, index: Option<usize> },
}

/// A parsed template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Parse a template string
    pub fn parse(source: &str) -> SeqflowResult<Self> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((pos, c)) = chars.next() {
            match c {
                '{' if matches!(chars.peek(), Some((_, '{'))) => {
                    chars.next();
                    literal.push('{');
                }
                '}' if matches!(chars.peek(), Some((_, '}'))) => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let rest = &source[pos + 1..];
                    let end = rest.find('}').ok_or_else(|| {
                        SeqflowError::invalid_template(source, "unterminated placeholder")
                    })?;
                    let body = &rest[..end];
                    let (name, index) = parse_placeholder(source, body)?;

                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder { name, index });

                    // Skip the placeholder body and closing brace
                    for _ in 0..=body.chars().count() {
                        chars.next();
                    }
                }
                '}' => {
                    return Err(SeqflowError::invalid_template(source, "unmatched '}'"));
                }
                _ => literal.push(c),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// The original template text
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the template contains any placeholder
    pub fn has_placeholders(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Placeholder { .. }))
    }

    /// Names referenced by placeholders, in order of first appearance
    pub fn placeholders(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for segment in &self.segments {
            if let Segment::Placeholder { name, .. } = segment {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// Substitute every placeholder from `fields`
    pub fn render(&self, fields: &dyn Fields) -> SeqflowResult<String> {
        let mut out = String::with_capacity(self.source.len());

        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder { name, index } => {
                    let value = fields.lookup(name, *index).ok_or_else(|| {
                        let shown = match index {
                            Some(i) => format!("{name}[{i}]"),
                            None => name.clone(),
                        };
                        SeqflowError::invalid_template(
                            &self.source,
                            format!("no value for placeholder '{shown}'"),
                        )
                    })?;
                    out.push_str(&value);
                }
            }
        }

        Ok(out)
    }
}

fn parse_placeholder(source: &str, body: &str) -> SeqflowResult<(String, Option<usize>)> {
    let (name, index) = match body.find('[') {
        Some(open) => {
            let Some(digits) = body[open + 1..].strip_suffix(']') else {
                return Err(SeqflowError::invalid_template(
                    source,
                    format!("malformed index in '{{{body}}}'"),
                ));
            };
            let index = digits.parse::<usize>().map_err(|_| {
                SeqflowError::invalid_template(source, format!("malformed index in '{{{body}}}'"))
            })?;
            (&body[..open], Some(index))
        }
        None => (body, None),
    };

    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(SeqflowError::invalid_template(
            source,
            format!("invalid placeholder name '{name}'"),
        ));
    }

    Ok((name.to_string(), index))
}

/// Render a template string in one step
pub fn render(template: &str, fields: &dyn Fields) -> SeqflowResult<String> {
    Template::parse(template)?.render(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_render_output_path() {
        let f = fields(&[("sample", "S1"), ("lane", "L1")]);
        assert_eq!(render("out/{sample}_{lane}.bam", &f).unwrap(), "out/S1_L1.bam");
    }

    #[test]
    fn test_indexed_scalar_placeholder() {
        let f = fields(&[("sample", "A"), ("path", "data")]);
        assert_eq!(
            render("{path[0]}/{sample[0]}_R2.fastq", &f).unwrap(),
            "data/A_R2.fastq"
        );
        assert!(render("{sample[1]}", &f).is_err());
    }

    #[test]
    fn test_escaped_braces() {
        let f = fields(&[("x", "1")]);
        assert_eq!(render("awk '{{print}}' {x}", &f).unwrap(), "awk '{print}' 1");
    }

    #[test]
    fn test_unknown_placeholder_fails() {
        let f = fields(&[("sample", "A")]);
        let err = render("{lane}.bam", &f).unwrap_err();
        assert!(err.to_string().contains("lane"));
    }

    #[test]
    fn test_malformed_templates() {
        assert!(Template::parse("{sample").is_err());
        assert!(Template::parse("sample}").is_err());
        assert!(Template::parse("{}").is_err());
        assert!(Template::parse("{a[x]}").is_err());
        assert!(Template::parse("{a b}").is_err());
    }

    #[test]
    fn test_placeholders_listed_once() {
        let t = Template::parse("alignments/{sample}/{sample}_{readid[0]}.bam").unwrap();
        assert_eq!(t.placeholders(), vec!["sample", "readid"]);
        assert!(t.has_placeholders());
        assert!(!Template::parse(".sort.bam").unwrap().has_placeholders());
    }

    #[test]
    fn test_non_ascii_literals_survive() {
        let f = fields(&[("s", "x")]);
        assert_eq!(render("ü/{s}/é", &f).unwrap(), "ü/x/é");
    }
}
