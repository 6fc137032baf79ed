//! Findings of the quality control of a resource's directives.

use std::fmt;

use serde_json::Value;

use super::directive::DirectiveKind;
use crate::graph::field_text;

/// A problem with a directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QcFinding {
    /// The anchor page does not exist
    MissingPoint {
        /// Start or stop
        kind: DirectiveKind,
        /// The anchor
        page_id: u64,
    },
    /// The anchor page exists but has no parent, so it is not in the hierarchy
    /// (or it is the root)
    Parentless {
        /// Start or stop
        kind: DirectiveKind,
        /// The anchor
        page_id: u64,
        /// Name of the page
        canonical: String,
    },
    /// A stop anchor that is not below any start anchor of its trait
    StopNotUnderStart {
        /// The stop anchor
        page_id: u64,
        /// Name of the page
        canonical: String,
        /// `eol_pk` of the trait
        trait_pk: String,
    },
}

impl fmt::Display for QcFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QcFinding::MissingPoint { kind, page_id } => {
                write!(f, "Missing {} point {page_id}", kind.tag())
            }
            QcFinding::Parentless {
                kind,
                page_id,
                canonical,
            } => write!(
                f,
                "{kind} point {page_id} = {canonical} has no parent (is not in DH)"
            ),
            QcFinding::StopNotUnderStart {
                page_id,
                canonical,
                trait_pk,
            } => write!(
                f,
                "Stop page {page_id} = {canonical} not under any start page for {trait_pk}"
            ),
        }
    }
}

/// All findings of one quality control run, in the order they were found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QcReport {
    findings: Vec<QcFinding>,
}

impl QcReport {
    pub(crate) fn push(&mut self, finding: QcFinding) {
        log::warn!("{finding}");
        self.findings.push(finding);
    }

    /// The findings.
    pub fn findings(&self) -> &[QcFinding] {
        &self.findings
    }

    /// Whether nothing was found.
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }
}

/// Interpret a value returned for a page id.
pub(crate) fn page_id(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64(),
        Value::String(string) => string.trim().parse().ok(),
        _ => None,
    }
}

/// Text of a value, treating a missing one as empty.
pub(crate) fn text(value: Option<&Value>) -> String {
    value.map(field_text).unwrap_or_default()
}

#[cfg(test)]
mod test {
    use serde_json::json;
    use test_log::test;

    use super::*;

    #[test]
    fn messages() {
        assert_eq!(
            QcFinding::MissingPoint {
                kind: DirectiveKind::Stop,
                page_id: 12
            }
            .to_string(),
            "Missing stop point 12"
        );
        assert_eq!(
            QcFinding::Parentless {
                kind: DirectiveKind::Start,
                page_id: 1,
                canonical: "Life".to_string()
            }
            .to_string(),
            "Start point 1 = Life has no parent (is not in DH)"
        );
    }

    #[test]
    fn page_ids() {
        assert_eq!(page_id(&json!(7)), Some(7));
        assert_eq!(page_id(&json!("7")), Some(7));
        assert_eq!(page_id(&json!(null)), None);
        assert_eq!(page_id(&json!(-1)), None);
    }
}
