//! Drops internal academic-calendar entries (class schedules, grading deadlines,
//! faculty meetings) that law-school feeds mix in with their public events.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::models::RawEvent;

const INTERNAL_KEYWORDS: &[&str] = &[
    "class schedule",
    "class schedules",
    "classes begin",
    "classes end",
    "class start",
    "class stop",
    "class registration",
    "class enrollment",
    "deadline",
    "due date",
    "due",
    "grades due",
    "papers due",
    "forms due",
    "submission deadline",
    "registration deadline",
    "application deadline",
    "payment deadline",
    "fee deadline",
    "independent study",
    "writing requirement",
    "exam conflict",
    "final examination",
    "final exam",
    "examinations",
    "midterm",
    "quiz",
    "assignment",
    "homework",
    "project due",
    "law:",
    "law :",
    "law-",
    "law -",
    "academic:",
    "academic :",
    "student:",
    "student :",
    "faculty:",
    "faculty :",
    "fall semester",
    "spring semester",
    "summer session",
    "academic year",
    "semester",
    "quarter",
    "trimester",
    "winter break",
    "spring break",
    "summer break",
    "student orientation",
    "student meeting",
    "student deadline",
    "student registration",
    "student advising",
    "student services",
    "faculty meeting",
    "staff meeting",
    "department meeting",
    "committee meeting",
    "board meeting",
    "senate meeting",
    "no classes",
    "holiday",
    "break",
    "recess",
    "closed",
    "administrative",
    "internal",
    "faculty only",
    "staff only",
    "student only",
    "by invitation only",
    "private",
    "add/drop period",
    "withdrawal deadline",
    "grade submission",
    "course evaluation",
    "advising period",
    "registration period",
    "enrollment period",
    "billing period",
    "financial aid deadline",
    "course registration",
];

const INTERNAL_PREFIXES: &[&str] = &[
    "law:",
    "law :",
    "law-",
    "law -",
    "academic:",
    "academic :",
    "student:",
    "student :",
    "faculty:",
    "faculty :",
];

const PUBLIC_KEYWORDS: &[&str] = &[
    "lecture",
    "symposium",
    "conference",
    "workshop",
    "seminar",
    "panel",
    "discussion",
    "reception",
    "celebration",
    "ceremony",
    "award",
    "presentation",
    "talk",
    "guest speaker",
    "visiting",
    "public",
    "community",
    "alumni",
    "networking",
    "cle",
    "continuing legal education",
    "professional development",
    "career fair",
    "job fair",
    "recruitment",
    "open house",
    "information session",
    "admissions",
    "prospective students",
    "public interest",
    "pro bono",
    "clinics",
    "externships",
];

static INTERNAL_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"^law:\s*",
        r"^academic:\s*",
        r"^student:\s*",
        r"^faculty:\s*",
        r"\b(class|classes)\b.*\b(schedule|begin|end|start|stop)\b",
        r"\b(deadline|due)\b.*\b(paper|grade|form|submission)\b",
        r"\b(exam|examination|final)\b.*\b(monday|tuesday|wednesday|thursday|friday)\b",
        r"\b(no\s+classes|holiday|break|recess)\b",
        r"\b(faculty|staff|student)\s+(meeting|deadline|only)\b",
        r"\b(add|drop|withdrawal)\s+(deadline|period)\b",
        r"\b(registration|enrollment)\s+(deadline|period)\b",
        r"\b(advising|advice)\s+(period|deadline)\b",
        r"\b(billing|financial|payment)\s+(deadline|period)\b",
        r"\b(grade|grades)\s+(due|submission|deadline)\b",
        r"\b(independent\s+study|writing\s+requirement)\b",
        r"\b(course|courses)\s+(begin|end|start|stop)\b",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("valid academic pattern"))
    .collect()
});

const MIN_PUBLIC_INDICATORS: usize = 2;
const MIN_TITLE_CHARS: usize = 10;

/// True when the entry looks like an internal academic event and should be dropped.
pub fn is_internal_academic_event(title: &str, description: Option<&str>) -> bool {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return true;
    }

    let title_lower = trimmed.to_lowercase();
    let desc_lower = description.unwrap_or_default().trim().to_lowercase();

    if let Some(keyword) = INTERNAL_KEYWORDS
        .iter()
        .find(|k| title_lower.contains(*k) || desc_lower.contains(*k))
    {
        debug!(title, keyword, "filtered internal academic event");
        return true;
    }

    if INTERNAL_PREFIXES.iter().any(|p| title_lower.starts_with(p)) {
        debug!(title, "filtered internal academic event by prefix");
        return true;
    }

    if let Some(pattern) = INTERNAL_PATTERNS.iter().find(|p| p.is_match(&title_lower)) {
        debug!(title, pattern = pattern.as_str(), "filtered internal academic event");
        return true;
    }

    let public_hits = PUBLIC_KEYWORDS
        .iter()
        .filter(|k| title_lower.contains(*k) || desc_lower.contains(*k))
        .count();
    if public_hits >= MIN_PUBLIC_INDICATORS {
        return false;
    }

    if trimmed.chars().count() < MIN_TITLE_CHARS {
        debug!(title, "filtered short or generic event");
        return true;
    }

    false
}

pub fn retain_public_events(events: Vec<RawEvent>) -> Vec<RawEvent> {
    let before = events.len();
    let kept: Vec<RawEvent> = events
        .into_iter()
        .filter(|raw| {
            !is_internal_academic_event(
                raw.name.as_deref().unwrap_or_default(),
                raw.description.as_deref(),
            )
        })
        .collect();
    debug!(before, after = kept.len(), "academic filter applied");
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_calendar_housekeeping() {
        assert!(is_internal_academic_event("LAW: Classes Begin", None));
        assert!(is_internal_academic_event("Grades due for fall term", None));
        assert!(is_internal_academic_event("Course Registration Opens", None));
        assert!(is_internal_academic_event("Thanksgiving Recess", None));
        assert!(is_internal_academic_event("   ", None));
    }

    #[test]
    fn keeps_public_programming() {
        assert!(!is_internal_academic_event(
            "Public Interest Lecture Series",
            Some("Open to the community")
        ));
        assert!(!is_internal_academic_event(
            "Immigration Justice Symposium",
            None
        ));
    }

    #[test]
    fn short_titles_without_public_signal_are_dropped() {
        assert!(is_internal_academic_event("Meetup", None));
        assert!(!is_internal_academic_event("CLE Panel", None));
    }

    #[test]
    fn description_keywords_count() {
        assert!(is_internal_academic_event(
            "Immigration Justice Symposium",
            Some("By invitation only")
        ));
    }

    #[test]
    fn retain_public_events_drops_internal_entries() {
        let events = vec![
            RawEvent {
                name: Some("Faculty Meeting".to_string()),
                ..RawEvent::default()
            },
            RawEvent {
                name: Some("Immigration Justice Symposium".to_string()),
                ..RawEvent::default()
            },
        ];
        let kept = retain_public_events(events);
        assert_eq!(kept.len(), 1);
        assert_eq!(
            kept[0].name.as_deref(),
            Some("Immigration Justice Symposium")
        );
    }
}
