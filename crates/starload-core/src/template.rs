//! Object-key templates
//!
//! Keys such as `log-data/{year}/{month}/{run_date}` are parsed once, checked
//! against the fields a [`RunContext`] exposes, and rendered per run.

use crate::context::RunContext;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{([^{}]*)\}").expect("placeholder pattern is valid"))
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid"))
}

/// Template errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("Unknown placeholder '{{{name}}}' in template '{template}'")]
    UnknownPlaceholder { template: String, name: String },

    #[error("Malformed template '{template}': {reason}")]
    Malformed { template: String, reason: String },

    #[error("Run context has no value for '{{{name}}}' in template '{template}'")]
    MissingField { template: String, name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(String),
}

/// Parsed key template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl KeyTemplate {
    /// Parse a template, rejecting placeholders the run context does not expose
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut cursor = 0;

        for caps in placeholder_pattern().captures_iter(source) {
            let whole = caps.get(0).expect("capture 0 always present");
            let literal = &source[cursor..whole.start()];
            Self::push_literal(source, literal, &mut segments)?;

            let name = caps[1].trim();
            if !identifier_pattern().is_match(name) {
                return Err(TemplateError::Malformed {
                    template: source.to_string(),
                    reason: format!("'{}' is not a valid placeholder name", &caps[1]),
                });
            }
            if !RunContext::is_known_field(name) {
                return Err(TemplateError::UnknownPlaceholder {
                    template: source.to_string(),
                    name: name.to_string(),
                });
            }

            segments.push(Segment::Field(name.to_string()));
            cursor = whole.end();
        }

        Self::push_literal(source, &source[cursor..], &mut segments)?;

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    fn push_literal(
        source: &str,
        literal: &str,
        segments: &mut Vec<Segment>,
    ) -> Result<(), TemplateError> {
        if literal.contains('{') || literal.contains('}') {
            return Err(TemplateError::Malformed {
                template: source.to_string(),
                reason: "unbalanced brace".to_string(),
            });
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal.to_string()));
        }
        Ok(())
    }

    /// Render against a run context
    ///
    /// An unset optional field is an error, never an empty substitution.
    pub fn render(&self, context: &RunContext) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(self.source.len() + 16);

        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(name) => {
                    let value = context.field(name).ok_or_else(|| TemplateError::MissingField {
                        template: self.source.clone(),
                        name: name.clone(),
                    })?;
                    out.push_str(&value);
                }
            }
        }

        Ok(out)
    }

    /// Placeholder names in order of appearance
    pub fn placeholders(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Field(name) => Some(name.as_str()),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    /// True if the template contains no placeholders
    pub fn is_static(&self) -> bool {
        self.placeholders().is_empty()
    }

    /// The template text as written
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for KeyTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl Serialize for KeyTemplate {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for KeyTemplate {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        KeyTemplate::parse(&source).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunContextBuilder;
    use chrono::NaiveDate;

    fn ctx() -> RunContext {
        RunContext::new(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
    }

    #[test]
    fn renders_run_date() {
        let template = KeyTemplate::parse("log-data/{run_date}").unwrap();
        assert_eq!(template.render(&ctx()).unwrap(), "log-data/2024-01-01");
    }

    #[test]
    fn rendering_is_idempotent() {
        let template = KeyTemplate::parse("log-data/{year}/{month}/{ds}-events.json").unwrap();
        let first = template.render(&ctx()).unwrap();
        let second = template.render(&ctx()).unwrap();
        assert_eq!(first, "log-data/2024/01/2024-01-01-events.json");
        assert_eq!(first, second);
    }

    #[test]
    fn static_template() {
        let template = KeyTemplate::parse("song-data").unwrap();
        assert!(template.is_static());
        assert_eq!(template.render(&ctx()).unwrap(), "song-data");
    }

    #[test]
    fn unknown_placeholder_rejected_at_parse() {
        let err = KeyTemplate::parse("log-data/{execution_date}").unwrap_err();
        assert_eq!(
            err,
            TemplateError::UnknownPlaceholder {
                template: "log-data/{execution_date}".to_string(),
                name: "execution_date".to_string(),
            }
        );
    }

    #[test]
    fn missing_field_is_an_error() {
        let template = KeyTemplate::parse("runs/{run_id}/events").unwrap();
        let err = template.render(&ctx()).unwrap_err();
        assert!(matches!(err, TemplateError::MissingField { ref name, .. } if name == "run_id"));

        let with_id = RunContextBuilder::new(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
            .run_id("manual_1")
            .build();
        assert_eq!(template.render(&with_id).unwrap(), "runs/manual_1/events");
    }

    #[test]
    fn malformed_templates() {
        assert!(matches!(
            KeyTemplate::parse("log-data/{run_date"),
            Err(TemplateError::Malformed { .. })
        ));
        assert!(matches!(
            KeyTemplate::parse("log-data/{}"),
            Err(TemplateError::Malformed { .. })
        ));
        assert!(matches!(
            KeyTemplate::parse("log-data/{run date}"),
            Err(TemplateError::Malformed { .. })
        ));
    }

    #[test]
    fn placeholders_in_order() {
        let template = KeyTemplate::parse("{year}/{month}/{day}").unwrap();
        assert_eq!(template.placeholders(), vec!["year", "month", "day"]);
    }

    #[test]
    fn deserializes_and_validates() {
        let ok: KeyTemplate = serde_json::from_str("\"log-data/{ds}\"").unwrap();
        assert_eq!(ok.as_str(), "log-data/{ds}");

        let bad: Result<KeyTemplate, _> = serde_json::from_str("\"log-data/{nope}\"");
        assert!(bad.is_err());
    }
}
