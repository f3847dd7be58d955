//! trigger — auto-capture condition evaluation
//!
//! A [`ConditionSet`] is an ordered list of trigger conditions combined
//! with logical AND; the set is authored and persisted by the external
//! configuration layer and read-only here. Evaluation is stateless and
//! pure, safe to run from any thread over an immutable detection list.
//!
//! COUNT demands *exactly* its threshold; PATTERN, CLASS, and COMBINED
//! demand *at least* theirs. The asymmetry is long-standing observed
//! behaviour and is kept as two distinct explicit rules.

use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::detection::Detection;

// ── Condition model ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    /// Exactly `count` detections in the frame.
    Count,
    /// At least `count` payloads fully matching `pattern`.
    Pattern,
    /// At least `count` detections with `class_code`.
    Class,
    /// At least `count` detections matching both `pattern` and `class_code`.
    Combined,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerCondition {
    pub kind: ConditionKind,
    pub count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_code: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TriggerCondition {
    fn holds_for(&self, detections: &[Detection]) -> bool {
        match self.kind {
            ConditionKind::Count => detections.len() == self.count,
            ConditionKind::Pattern => {
                let matched = match self.compiled_pattern() {
                    Some(re) => detections
                        .iter()
                        .filter(|d| re.is_match(&d.payload))
                        .count(),
                    None => 0,
                };
                matched >= self.count
            }
            ConditionKind::Class => {
                let matched = detections
                    .iter()
                    .filter(|d| Some(d.class_code) == self.class_code)
                    .count();
                matched >= self.count
            }
            ConditionKind::Combined => {
                let matched = match self.compiled_pattern() {
                    Some(re) => detections
                        .iter()
                        .filter(|d| {
                            Some(d.class_code) == self.class_code && re.is_match(&d.payload)
                        })
                        .count(),
                    None => 0,
                };
                matched >= self.count
            }
        }
    }

    /// Compile the pattern anchored to the whole payload (a substring hit
    /// is not a match). A missing or invalid pattern yields `None`, which
    /// evaluation treats as zero matches rather than an error; validity is
    /// the configuration layer's responsibility.
    fn compiled_pattern(&self) -> Option<Regex> {
        let pattern = self.pattern.as_deref()?;
        match Regex::new(&format!("^(?:{pattern})$")) {
            Ok(re) => Some(re),
            Err(err) => {
                debug!(%err, "invalid trigger pattern, treating as zero matches");
                None
            }
        }
    }
}

// ── Condition set ────────────────────────────────────────────────────────────

/// Ordered collection of trigger conditions; logical AND across members.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConditionSet {
    conditions: Vec<TriggerCondition>,
}

impl ConditionSet {
    pub fn new(conditions: Vec<TriggerCondition>) -> Self {
        Self { conditions }
    }

    /// Load a persisted condition set (a JSON array) from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).with_context(|| {
            format!("failed to read condition set: {}", path.as_ref().display())
        })?;
        serde_json::from_str(&raw).context("condition set is not valid JSON")
    }

    pub fn conditions(&self) -> &[TriggerCondition] {
        &self.conditions
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Decide whether this frame's accepted detections warrant a capture.
    /// An empty set or an empty detection list never triggers.
    pub fn evaluate(&self, detections: &[Detection]) -> bool {
        if self.conditions.is_empty() || detections.is_empty() {
            return false;
        }
        self.conditions.iter().all(|c| c.holds_for(detections))
    }

    /// Report configuration problems a set carries: patterns that will
    /// never match and required fields that are missing. Evaluation
    /// silently degrades over these; this is the authoring-side check.
    pub fn lint(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for (idx, condition) in self.conditions.iter().enumerate() {
            let wants_pattern = matches!(
                condition.kind,
                ConditionKind::Pattern | ConditionKind::Combined
            );
            let wants_class = matches!(
                condition.kind,
                ConditionKind::Class | ConditionKind::Combined
            );
            if wants_pattern {
                match condition.pattern.as_deref() {
                    None => problems.push(format!("condition {idx}: missing pattern")),
                    Some(pattern) => {
                        if let Err(err) = Regex::new(pattern) {
                            problems.push(format!("condition {idx}: invalid pattern: {err}"));
                        }
                    }
                }
            }
            if wants_class && condition.class_code.is_none() {
                problems.push(format!("condition {idx}: missing class code"));
            }
        }
        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Rect;

    fn det(payload: &str, class_code: u32) -> Detection {
        Detection {
            rect: Rect::new(0, 0, 10, 10),
            payload: payload.to_string(),
            class_code,
            source_hash: 0,
        }
    }

    fn count(n: usize) -> TriggerCondition {
        TriggerCondition {
            kind: ConditionKind::Count,
            count: n,
            pattern: None,
            class_code: None,
            description: None,
        }
    }

    fn pattern(p: &str, n: usize) -> TriggerCondition {
        TriggerCondition {
            kind: ConditionKind::Pattern,
            count: n,
            pattern: Some(p.to_string()),
            class_code: None,
            description: None,
        }
    }

    fn class(code: u32, n: usize) -> TriggerCondition {
        TriggerCondition {
            kind: ConditionKind::Class,
            count: n,
            pattern: None,
            class_code: Some(code),
            description: None,
        }
    }

    #[test]
    fn count_requires_exact_equality() {
        let set = ConditionSet::new(vec![count(3)]);
        let three = vec![det("a", 0), det("b", 0), det("c", 0)];
        assert!(set.evaluate(&three));

        let four = vec![det("a", 0), det("b", 0), det("c", 0), det("d", 0)];
        assert!(!set.evaluate(&four), "more than the exact count fails");
    }

    #[test]
    fn pattern_counts_full_matches_only() {
        let set = ConditionSet::new(vec![pattern(r"^\d{12}$", 2)]);
        let detections = vec![
            det("123456789012", 0),
            det("abc", 0),
            det("987654321098", 0),
        ];
        assert!(set.evaluate(&detections));
    }

    #[test]
    fn pattern_is_anchored_to_the_whole_payload() {
        // "\d+" matches a substring of the payload but not the whole
        // string, so it contributes nothing.
        let set = ConditionSet::new(vec![pattern(r"\d+", 1)]);
        assert!(!set.evaluate(&[det("order-123", 0)]));
        assert!(set.evaluate(&[det("123", 0)]));
    }

    #[test]
    fn pattern_exceeding_minimum_still_holds() {
        let set = ConditionSet::new(vec![pattern(r"\d{3}", 1)]);
        let detections = vec![det("111", 0), det("222", 0)];
        assert!(set.evaluate(&detections), "minimum count, not exact");
    }

    #[test]
    fn invalid_pattern_degrades_to_zero_matches() {
        let set = ConditionSet::new(vec![pattern("([unclosed", 1)]);
        assert!(!set.evaluate(&[det("anything", 0)]));

        // With a zero threshold the condition is trivially satisfied.
        let set = ConditionSet::new(vec![pattern("([unclosed", 0)]);
        assert!(set.evaluate(&[det("anything", 0)]));
    }

    #[test]
    fn class_counts_matching_type_codes() {
        let set = ConditionSet::new(vec![class(5, 2)]);
        assert!(set.evaluate(&[det("a", 5), det("b", 5), det("c", 1)]));
        assert!(!set.evaluate(&[det("a", 5), det("c", 1)]));
    }

    #[test]
    fn combined_requires_both_class_and_pattern() {
        let condition = TriggerCondition {
            kind: ConditionKind::Combined,
            count: 1,
            pattern: Some(r"\d{3}".to_string()),
            class_code: Some(5),
            description: None,
        };
        let set = ConditionSet::new(vec![condition]);
        assert!(set.evaluate(&[det("123", 5)]));
        assert!(!set.evaluate(&[det("123", 4)]), "wrong class");
        assert!(!set.evaluate(&[det("12x", 5)]), "payload not matching");
    }

    #[test]
    fn all_conditions_must_hold() {
        let set = ConditionSet::new(vec![class(5, 1), pattern(".*", 1)]);
        assert!(set.evaluate(&[det("anything", 5)]));
        assert!(!set.evaluate(&[det("anything", 4)]));
    }

    #[test]
    fn empty_inputs_never_trigger() {
        let set = ConditionSet::new(vec![count(0)]);
        assert!(!set.evaluate(&[]), "empty detection list");

        let empty = ConditionSet::default();
        assert!(!empty.evaluate(&[det("a", 0)]), "empty condition set");
    }

    #[test]
    fn lint_reports_broken_and_incomplete_conditions() {
        let set = ConditionSet::new(vec![
            pattern("([unclosed", 1),
            TriggerCondition {
                kind: ConditionKind::Combined,
                count: 1,
                pattern: None,
                class_code: None,
                description: None,
            },
            count(2),
        ]);
        let problems = set.lint();
        assert_eq!(problems.len(), 3);
        assert!(problems[0].contains("invalid pattern"));
        assert!(problems[1].contains("missing pattern"));
        assert!(problems[2].contains("missing class code"));
    }

    #[test]
    fn condition_set_deserialises_from_a_plain_array() {
        let json = r#"[
            {"kind": "pattern", "count": 2, "pattern": "^\\d{12}$"},
            {"kind": "class", "count": 1, "class_code": 5, "description": "one QR"}
        ]"#;
        let set: ConditionSet = serde_json::from_str(json).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.conditions()[0].kind, ConditionKind::Pattern);
        assert_eq!(set.conditions()[1].class_code, Some(5));
    }
}
