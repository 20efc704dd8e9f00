//! Document validation.
//!
//! A pure check of a decoded candidate document against the schema the rest
//! of the system assumes. Validation short-circuits on the first failure and
//! reports it with a 1-based branch/story position, so the caller can surface
//! a single specific message.
//!
//! Load-time and save-time validation intentionally differ in one respect:
//! an empty top-level list is tolerated when reading (the automation loop may
//! truncate-then-rewrite the file) but rejected when saving.

use serde_json::Value;
use thiserror::Error;

/// A single human-readable validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

/// Whether an empty document is acceptable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strictness {
    /// Reading from disk: an empty list is a transient state, not an error.
    Load,
    /// Writing back: an empty list would clobber the whole dataset.
    Save,
}

fn blank(value: Option<&Value>) -> bool {
    !matches!(value.and_then(Value::as_str), Some(s) if !s.trim().is_empty())
}

/// Validate a candidate document. Returns the first failure, if any.
pub fn validate_document(candidate: &Value, strictness: Strictness) -> Result<(), ValidationError> {
    let branches = candidate
        .as_array()
        .ok_or_else(|| ValidationError("Task document must be a list of branches.".to_string()))?;

    if branches.is_empty() && strictness == Strictness::Save {
        return Err(ValidationError(
            "Task document must contain at least one branch.".to_string(),
        ));
    }

    for (branch_index, branch) in branches.iter().enumerate() {
        let position = branch_index + 1;
        let record = branch.as_object().ok_or_else(|| {
            ValidationError(format!("Branch {} is not a valid record.", position))
        })?;

        if blank(record.get("name")) {
            return Err(ValidationError(format!("Branch {} needs a name.", position)));
        }

        let stories = record
            .get("stories")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                ValidationError(format!("Branch {} needs a list of stories.", position))
            })?;

        for (story_index, story) in stories.iter().enumerate() {
            validate_story(story, position, story_index + 1)?;
        }
    }

    Ok(())
}

fn validate_story(
    story: &Value,
    branch_position: usize,
    story_position: usize,
) -> Result<(), ValidationError> {
    let label = format!("Story {}.{}", branch_position, story_position);

    let record = story
        .as_object()
        .ok_or_else(|| ValidationError(format!("{} is not a valid record.", label)))?;

    if blank(record.get("id")) {
        return Err(ValidationError(format!("{} needs an id.", label)));
    }
    if blank(record.get("title")) {
        return Err(ValidationError(format!("{} needs a title.", label)));
    }

    let criteria = record
        .get("acceptanceCriteria")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            ValidationError(format!("{} needs at least one acceptance criterion.", label))
        })?;
    let has_criterion = criteria
        .iter()
        .any(|entry| matches!(entry.as_str(), Some(s) if !s.trim().is_empty()));
    if !has_criterion {
        return Err(ValidationError(format!(
            "{} needs at least one acceptance criterion.",
            label
        )));
    }

    let priority = record.get("priority").and_then(Value::as_f64);
    match priority {
        Some(p) if p.is_finite() && p > 0.0 => {}
        _ => {
            return Err(ValidationError(format!(
                "{} needs a priority greater than zero.",
                label
            )));
        }
    }

    if !matches!(record.get("passes"), Some(Value::Bool(_))) {
        return Err(ValidationError(format!("{} needs a pass/fail flag.", label)));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!([{
            "name": "main",
            "stories": [{
                "id": "STORY-001",
                "title": "A",
                "acceptanceCriteria": ["x"],
                "priority": 1,
                "passes": false
            }]
        }])
    }

    #[test]
    fn test_valid_document_passes() {
        assert!(validate_document(&sample(), Strictness::Save).is_ok());
    }

    #[test]
    fn test_missing_acceptance_criteria_names_position() {
        let mut doc = sample();
        doc[0]["stories"][0]
            .as_object_mut()
            .unwrap()
            .remove("acceptanceCriteria");
        let err = validate_document(&doc, Strictness::Save).unwrap_err();
        assert!(err.0.contains("Story 1.1"), "message was: {}", err.0);
    }

    #[test]
    fn test_blank_acceptance_criteria_rejected() {
        let mut doc = sample();
        doc[0]["stories"][0]["acceptanceCriteria"] = json!(["   ", ""]);
        let err = validate_document(&doc, Strictness::Save).unwrap_err();
        assert!(err.0.contains("acceptance criterion"));
    }

    #[test]
    fn test_missing_title_reports_exact_position() {
        let mut doc = sample();
        let second = json!({
            "id": "STORY-002",
            "title": "",
            "acceptanceCriteria": ["y"],
            "priority": 2,
            "passes": true
        });
        doc[0]["stories"].as_array_mut().unwrap().push(second);
        let err = validate_document(&doc, Strictness::Save).unwrap_err();
        assert_eq!(err.0, "Story 1.2 needs a title.");
    }

    #[test]
    fn test_priority_must_be_positive_and_finite() {
        let mut doc = sample();
        doc[0]["stories"][0]["priority"] = json!(0);
        assert!(validate_document(&doc, Strictness::Save).is_err());
        doc[0]["stories"][0]["priority"] = json!(-3);
        assert!(validate_document(&doc, Strictness::Save).is_err());
        doc[0]["stories"][0]["priority"] = json!("high");
        assert!(validate_document(&doc, Strictness::Save).is_err());
    }

    #[test]
    fn test_passes_must_be_boolean() {
        let mut doc = sample();
        doc[0]["stories"][0]["passes"] = json!("yes");
        let err = validate_document(&doc, Strictness::Save).unwrap_err();
        assert_eq!(err.0, "Story 1.1 needs a pass/fail flag.");
    }

    #[test]
    fn test_empty_document_tolerated_on_load_rejected_on_save() {
        let doc = json!([]);
        assert!(validate_document(&doc, Strictness::Load).is_ok());
        assert!(validate_document(&doc, Strictness::Save).is_err());
    }

    #[test]
    fn test_non_array_document_rejected() {
        let doc = json!({"name": "main"});
        assert!(validate_document(&doc, Strictness::Load).is_err());
    }

    #[test]
    fn test_branch_without_stories_list() {
        let doc = json!([{"name": "main"}]);
        let err = validate_document(&doc, Strictness::Save).unwrap_err();
        assert_eq!(err.0, "Branch 1 needs a list of stories.");
    }
}
