//! Normalises raw course cards and assignment rows from the session.
//!
//! Pure filter/dedup stage: all navigation and rendering stays inside the
//! [`Session`] collaborator.

use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

use crate::contract::{AssignmentRow, CourseCard, Session};
use crate::error::{ArchiveError, Result};
use crate::state::RawCourse;

/// An assignment eligible for archiving in the current pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentRecord {
    pub name: String,
    pub url: String,
    pub status_text: String,
}

/// List the session's courses, keeping the first card per identifier and
/// dropping any whose display name contains an ignore pattern.
pub async fn discover<S: Session + ?Sized>(
    session: &S,
    ignore_patterns: &[String],
) -> Result<Vec<RawCourse>> {
    info!("Discovering courses");
    let cards = session
        .list_course_cards()
        .await
        .map_err(|e| ArchiveError::Session(format!("listing course cards failed: {e}")))?;
    let courses = normalize_courses(cards, ignore_patterns);
    info!(count = courses.len(), "Found courses after filtering");
    Ok(courses)
}

pub fn normalize_courses(cards: Vec<CourseCard>, ignore_patterns: &[String]) -> Vec<RawCourse> {
    let mut seen = HashSet::new();
    let mut courses = Vec::new();
    for card in cards {
        let id = card.url.trim().to_string();
        if id.is_empty() || !seen.insert(id.clone()) {
            continue;
        }
        let display_name = match card.display_name.trim() {
            "" => "Unknown".to_string(),
            name => name.to_string(),
        };
        if let Some(pattern) = ignore_patterns
            .iter()
            .find(|p| display_name.contains(p.as_str()))
        {
            info!(course = %display_name, pattern = %pattern, "Ignoring course");
            continue;
        }
        let short_name = match card.short_name.trim() {
            "" => display_name.clone(),
            short => short.to_string(),
        };
        courses.push(RawCourse {
            id,
            display_name,
            short_name,
            term: card.term.trim().to_string(),
        });
    }
    courses
}

/// Read the optional ignore-list file: a JSON array of substrings.
pub fn load_ignore_patterns(path: &Path) -> Vec<String> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(_) => {
            debug!(path = %path.display(), "No ignore list present");
            return Vec::new();
        }
    };
    match serde_json::from_str::<Vec<String>>(&content) {
        Ok(patterns) => {
            info!(count = patterns.len(), "Loaded ignore patterns");
            patterns
        }
        Err(e) => {
            warn!(error = %e, path = %path.display(), "Ignore list should be a JSON array of strings, ignoring it");
            Vec::new()
        }
    }
}

fn score_pattern() -> &'static Regex {
    static SCORE: OnceLock<Regex> = OnceLock::new();
    SCORE.get_or_init(|| {
        Regex::new(r"\d+(\.\d+)?\s*/\s*\d+(\.\d+)?").expect("score pattern is a valid regex")
    })
}

/// Graded assignments show either the word "Graded" or a `score / total`.
pub fn is_eligible(status_text: &str) -> bool {
    status_text.contains("Graded") || score_pattern().is_match(status_text)
}

/// Keep eligible rows in listing order, one per URL.
pub fn eligible_assignments(rows: Vec<AssignmentRow>) -> Vec<AssignmentRecord> {
    let mut seen = HashSet::new();
    rows.into_iter()
        .filter(|row| is_eligible(row.status_text.trim()))
        .filter(|row| !row.url.is_empty() && !row.name.trim().is_empty())
        .filter(|row| seen.insert(row.url.clone()))
        .map(|row| AssignmentRecord {
            name: row.name.trim().to_string(),
            url: row.url,
            status_text: row.status_text.trim().to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(url: &str, name: &str) -> CourseCard {
        CourseCard {
            url: url.into(),
            display_name: name.into(),
            short_name: String::new(),
            term: " Fall 2024 ".into(),
        }
    }

    #[test]
    fn keeps_first_card_per_identifier() {
        let courses = normalize_courses(
            vec![card("/courses/1", "First"), card("/courses/1", "Second"), card("/courses/2", "Other")],
            &[],
        );
        assert_eq!(courses.len(), 2);
        assert_eq!(courses[0].display_name, "First");
        assert_eq!(courses[0].short_name, "First");
        assert_eq!(courses[0].term, "Fall 2024");
    }

    #[test]
    fn drops_ignored_display_names() {
        let courses = normalize_courses(
            vec![card("/courses/1", "CS 101 Sandbox"), card("/courses/2", "CS 102")],
            &["Sandbox".to_string()],
        );
        assert_eq!(courses.len(), 1);
        assert_eq!(courses[0].id, "/courses/2");
    }

    #[test]
    fn eligibility_is_case_sensitive_or_scored() {
        assert!(is_eligible("Graded"));
        assert!(is_eligible("8.5 / 10.0"));
        assert!(is_eligible("17/20"));
        assert!(!is_eligible("Ungraded"));
        assert!(!is_eligible("Submitted"));
        assert!(!is_eligible("No Submission"));
    }
}
