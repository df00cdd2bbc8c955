//! Keyword classifier shared by every source.
//!
//! Matching is a case-insensitive substring test over `"{title} {description}"`. It is
//! not word-boundary aware, so "CLEs" counts as CLE and so does "uncle". Changing that
//! would change classification output for stored events.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::unique_ordered;

pub const CLE: &str = "CLE";
pub const NETWORKING: &str = "Networking";
pub const WEBINAR: &str = "Webinar";
pub const GENERIC_EVENT_TYPE: &str = "Event";

pub const PRACTICE_AREAS: &[&str] = &[
    "criminal law",
    "civil rights",
    "immigration",
    "family law",
    "corporate law",
    "environmental law",
    "health law",
    "tax law",
    "real estate",
    "intellectual property",
    "labor law",
    "constitutional law",
    "international law",
    "bankruptcy",
    "estate planning",
    "employment law",
    "commercial law",
    "litigation",
    "arbitration",
    "mediation",
    "securities law",
    "antitrust",
    "privacy law",
    "cybersecurity",
    "white collar crime",
    "elder law",
    "disability law",
    "education law",
    "energy law",
    "entertainment law",
    "government law",
    "healthcare law",
    "insurance law",
    "maritime law",
    "military law",
    "nonprofit law",
    "patent law",
    "personal injury",
    "public interest",
    "sports law",
    "trademark law",
    "transportation law",
    "veterans law",
    "workers compensation",
];

pub const CLE_INDICATORS: &[&str] = &[
    "cle",
    "continuing legal education",
    "credit",
    "ethics",
    "professional responsibility",
    "mcje",
    "new york",
    "accredited",
    "certification",
    "credit hour",
    "transitional",
    "professional development",
    "mandatory cle",
    "skills training",
];

pub const NETWORKING_INDICATORS: &[&str] = &[
    "networking",
    "reception",
    "mixer",
    "happy hour",
    "social",
    "dinner",
    "lunch",
    "cocktail",
    "meet and greet",
    "annual dinner",
    "gala",
    "celebration",
    "breakfast",
    "coffee",
    "wine tasting",
    "holiday party",
    "awards ceremony",
    "fundraiser",
];

pub const WEBINAR_INDICATORS: &[&str] = &[
    "webinar",
    "webcast",
    "virtual event",
    "online event",
    "virtual seminar",
    "online presentation",
];

static CLE_CREDIT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)(\d+(?:\.\d+)?)\s*CLE\s*credits?",
        r"(?i)CLE\s+credits?:\s*(\d+(?:\.\d+)?)",
        r"(?i)CLE:\s*(\d+(?:\.\d+)?)",
        r"(?i)(\d+(?:\.\d+)?)\s*credits?",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("valid cle credit regex"))
    .collect()
});

fn haystack(title: &str, description: Option<&str>) -> String {
    format!("{} {}", title, description.unwrap_or_default()).to_lowercase()
}

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|keyword| text.contains(keyword))
}

/// Capitalizes the first letter of every alphabetic run, lowercasing the rest.
pub fn title_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut prev_alpha = false;
    for ch in input.chars() {
        if prev_alpha {
            out.extend(ch.to_lowercase());
        } else {
            out.extend(ch.to_uppercase());
        }
        prev_alpha = ch.is_alphabetic();
    }
    out
}

pub fn extract_practice_areas(title: &str, description: Option<&str>) -> Vec<String> {
    let text = haystack(title, description);
    PRACTICE_AREAS
        .iter()
        .filter(|area| text.contains(*area))
        .map(|area| title_case(area))
        .collect()
}

pub fn is_cle_event(title: &str, description: Option<&str>) -> bool {
    contains_any(&haystack(title, description), CLE_INDICATORS)
}

pub fn is_networking_event(title: &str, description: Option<&str>) -> bool {
    contains_any(&haystack(title, description), NETWORKING_INDICATORS)
}

pub fn is_webinar(title: &str, description: Option<&str>) -> bool {
    contains_any(&haystack(title, description), WEBINAR_INDICATORS)
}

/// CLE, then Webinar, then Networking; anything else is a generic event.
pub fn primary_event_type(title: &str, description: Option<&str>) -> &'static str {
    if is_cle_event(title, description) {
        CLE
    } else if is_webinar(title, description) {
        WEBINAR
    } else if is_networking_event(title, description) {
        NETWORKING
    } else {
        GENERIC_EVENT_TYPE
    }
}

/// Coarse flags in fixed order: CLE, Networking, Webinar.
pub fn event_tags(title: &str, description: Option<&str>) -> Vec<String> {
    let mut tags = Vec::new();
    if is_cle_event(title, description) {
        tags.push(CLE.to_string());
    }
    if is_networking_event(title, description) {
        tags.push(NETWORKING.to_string());
    }
    if is_webinar(title, description) {
        tags.push(WEBINAR.to_string());
    }
    tags
}

/// Base categories first, then practice areas, then the CLE and Networking flags,
/// deduplicated on first occurrence.
pub fn categorize<S: AsRef<str>>(
    title: &str,
    description: Option<&str>,
    base_categories: &[S],
) -> Vec<String> {
    let mut categories: Vec<String> = base_categories
        .iter()
        .map(|c| c.as_ref().to_string())
        .collect();
    categories.extend(extract_practice_areas(title, description));
    if is_cle_event(title, description) {
        categories.push(CLE.to_string());
    }
    if is_networking_event(title, description) {
        categories.push(NETWORKING.to_string());
    }
    unique_ordered(categories)
}

pub fn extract_cle_credits(text: &str) -> Option<f64> {
    CLE_CREDIT_PATTERNS.iter().find_map(|pattern| {
        pattern
            .captures(text)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
    })
}
