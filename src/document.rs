//! Task document data model.
//!
//! The document is an ordered list of branches, each holding a list of
//! stories. The automation loop and the dashboard both read and rewrite the
//! same file, so every comparison and every write goes through the canonical
//! serialization defined here: stable field order, 2-space indentation,
//! trailing newline. Two documents that differ only in incidental formatting
//! produce the same snapshot text.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// A story inside a branch. Field names on the wire match the on-disk JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub id: String,
    pub title: String,
    #[serde(rename = "acceptanceCriteria")]
    pub acceptance_criteria: Vec<String>,
    pub priority: f64,
    pub passes: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// A named branch of work. The name doubles as the merge key when edits are
/// written back, so callers should keep branch names unique in practice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    pub stories: Vec<Story>,
}

/// The full task dataset. May be empty transiently (e.g. while the
/// automation loop is rewriting the file); a loaded document has at least
/// one branch.
pub type TaskDocument = Vec<Branch>;

/// Serialize a document to its canonical snapshot text.
///
/// This is the single source of truth for both on-disk writes and snapshot
/// equality comparison in the reconciler.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let mut text = serde_json::to_string_pretty(value)?;
    text.push('\n');
    Ok(text)
}

/// Derive a fresh story id from the ids already present in the document.
///
/// Looks for the dominant `PREFIX-NNN` pattern among existing ids, takes the
/// highest numeric suffix in that group, and returns the next number
/// zero-padded to the widest observed width, skipping past any collisions.
/// An empty document (or one with no recognizable pattern) yields
/// `STORY-001`.
pub fn next_story_id(document: &TaskDocument) -> String {
    let existing: HashSet<&str> = document
        .iter()
        .flat_map(|branch| branch.stories.iter())
        .map(|story| story.id.as_str())
        .collect();

    // prefix -> (occurrences, highest suffix, widest suffix)
    let mut groups: HashMap<&str, (usize, u64, usize)> = HashMap::new();
    for id in &existing {
        if let Some((prefix, digits)) = id.rsplit_once('-') {
            if !prefix.is_empty()
                && !digits.is_empty()
                && digits.chars().all(|c| c.is_ascii_digit())
            {
                if let Ok(number) = digits.parse::<u64>() {
                    let entry = groups.entry(prefix).or_insert((0, 0, 0));
                    entry.0 += 1;
                    entry.1 = entry.1.max(number);
                    entry.2 = entry.2.max(digits.len());
                }
            }
        }
    }

    let (prefix, max_number, width) = groups
        .into_iter()
        // Tie-break on prefix so the result is deterministic.
        .max_by(|(pa, (ca, ..)), (pb, (cb, ..))| ca.cmp(cb).then(pa.cmp(pb)))
        .map(|(prefix, (_, max, width))| (prefix.to_string(), max, width))
        .unwrap_or_else(|| ("STORY".to_string(), 0, 3));

    let mut number = max_number + 1;
    loop {
        let candidate = format!("{}-{:0width$}", prefix, number, width = width);
        if !existing.contains(candidate.as_str()) {
            return candidate;
        }
        number += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn story(id: &str) -> Story {
        Story {
            id: id.to_string(),
            title: "A".to_string(),
            acceptance_criteria: vec!["x".to_string()],
            priority: 1.0,
            passes: false,
            notes: None,
        }
    }

    fn doc_with_ids(ids: &[&str]) -> TaskDocument {
        vec![Branch {
            name: "main".to_string(),
            stories: ids.iter().map(|id| story(id)).collect(),
        }]
    }

    #[test]
    fn test_canonical_json_is_stable_and_newline_terminated() {
        let doc = doc_with_ids(&["STORY-001"]);
        let a = canonical_json(&doc).unwrap();
        let b = canonical_json(&doc.clone()).unwrap();
        assert_eq!(a, b);
        assert!(a.ends_with('\n'));
        assert!(a.contains("  \"name\": \"main\""));
    }

    #[test]
    fn test_canonical_json_omits_absent_notes() {
        let doc = doc_with_ids(&["STORY-001"]);
        let text = canonical_json(&doc).unwrap();
        assert!(!text.contains("notes"));
    }

    #[test]
    fn test_next_story_id_increments_highest_suffix() {
        let doc = doc_with_ids(&["STORY-001", "STORY-007", "STORY-003"]);
        assert_eq!(next_story_id(&doc), "STORY-008");
    }

    #[test]
    fn test_next_story_id_keeps_observed_width() {
        let doc = doc_with_ids(&["TASK-0009"]);
        assert_eq!(next_story_id(&doc), "TASK-0010");
    }

    #[test]
    fn test_next_story_id_unordered_ids() {
        let doc = doc_with_ids(&["STORY-007", "STORY-008", "STORY-006"]);
        assert_eq!(next_story_id(&doc), "STORY-009");
    }

    #[test]
    fn test_next_story_id_picks_dominant_prefix() {
        let doc = doc_with_ids(&["BUG-01", "STORY-001", "STORY-002"]);
        assert_eq!(next_story_id(&doc), "STORY-003");
    }

    #[test]
    fn test_next_story_id_empty_document() {
        assert_eq!(next_story_id(&Vec::new()), "STORY-001");
    }
}
