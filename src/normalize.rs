use serde_json::{json, Value};
use tracing::warn;

use crate::categorize;
use crate::error::NormalizeError;
use crate::identity::{self, IdentityKey};
use crate::models::{unique_ordered, Event, RawEvent, LOCATION_TBD};

/// Per-source settings needed to turn raw items into events.
#[derive(Debug, Clone)]
pub struct SourceContext {
    pub source: String,
    pub id_prefix: String,
    pub community_id: String,
    pub identity_key: IdentityKey,
}

impl SourceContext {
    pub fn new(source: &str, community_id: &str, identity_key: IdentityKey) -> Self {
        Self {
            source: source.to_string(),
            id_prefix: source.to_string(),
            community_id: community_id.to_string(),
            identity_key,
        }
    }
}

/// A raw item that did not make it through normalization.
#[derive(Debug, Clone)]
pub struct SkippedItem {
    pub name: Option<String>,
    pub reason: NormalizeError,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn normalize(raw: RawEvent, ctx: &SourceContext) -> Result<Event, NormalizeError> {
    let name = non_empty(raw.name).ok_or(NormalizeError::MissingName)?;
    let start = raw
        .start
        .ok_or_else(|| NormalizeError::MissingStartDate { name: name.clone() })?;
    let end = match raw.end {
        Some(end) if end >= start => end,
        _ => start,
    };

    let description = raw.description.unwrap_or_default().trim().to_string();
    let url = non_empty(raw.url);
    let external_id = identity::resolve(
        &ctx.id_prefix,
        raw.native_id.as_deref(),
        ctx.identity_key,
        &name,
        &start,
        url.as_deref(),
    )?;

    let text = Some(description.as_str());
    let tags_source = raw.tags;
    let category = categorize::categorize(&name, text, &raw.base_categories);
    let event_type = non_empty(raw.event_type)
        .unwrap_or_else(|| categorize::primary_event_type(&name, text).to_string());
    let cle_credits = raw
        .cle_credits
        .or_else(|| categorize::extract_cle_credits(&format!("{name} {description}")));

    let tags = unique_ordered(tags_source.into_iter().chain(categorize::event_tags(&name, text)));

    let mut metadata = raw.metadata;
    metadata
        .entry("source")
        .or_insert_with(|| json!(ctx.source));

    Ok(Event {
        external_id,
        name,
        description,
        start_date: start,
        end_date: end,
        location_name: non_empty(raw.location_name).unwrap_or_else(|| LOCATION_TBD.to_string()),
        location_id: non_empty(raw.location_id),
        community_id: ctx.community_id.clone(),
        url,
        image: non_empty(raw.image),
        price: raw.price,
        category,
        tags,
        event_type,
        cle_credits,
        metadata: Value::Object(metadata),
    })
}

/// Normalizes a whole adapter result. Invalid items are logged and skipped.
pub fn normalize_batch(raws: Vec<RawEvent>, ctx: &SourceContext) -> (Vec<Event>, Vec<SkippedItem>) {
    let mut events = Vec::with_capacity(raws.len());
    let mut skipped = Vec::new();
    for raw in raws {
        let name = raw.name.clone();
        match normalize(raw, ctx) {
            Ok(event) => events.push(event),
            Err(reason) => {
                warn!(source = %ctx.source, name = ?name, %reason, "skipping raw event");
                skipped.push(SkippedItem { name, reason });
            }
        }
    }
    (events, skipped)
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;
    use serde_json::Map;

    use super::*;

    fn ctx() -> SourceContext {
        SourceContext::new("nycla", "com_nycla", IdentityKey::NameStart)
    }

    fn raw(name: &str, start: Option<&str>) -> RawEvent {
        RawEvent {
            name: Some(name.to_string()),
            start: start.map(|s| DateTime::parse_from_rfc3339(s).expect("start")),
            ..RawEvent::default()
        }
    }

    #[test]
    fn missing_start_is_rejected() {
        let err = normalize(raw("Ethics CLE", None), &ctx()).expect_err("no start");
        assert_eq!(
            err,
            NormalizeError::MissingStartDate {
                name: "Ethics CLE".to_string()
            }
        );
    }

    #[test]
    fn blank_name_is_rejected() {
        let err = normalize(raw("  ", Some("2025-03-01T18:00:00Z")), &ctx()).expect_err("name");
        assert_eq!(err, NormalizeError::MissingName);
    }

    #[test]
    fn fills_defaults_and_classifies() {
        let mut item = raw("Annual Dinner", Some("2025-03-01T18:00:00Z"));
        item.description = Some("Includes 1.5 CLE credits in ethics".to_string());
        item.base_categories = vec!["Bar Association".to_string()];
        item.tags = vec!["dinner".to_string(), "dinner".to_string()];

        let event = normalize(item, &ctx()).expect("event");
        assert_eq!(event.end_date, event.start_date);
        assert_eq!(event.location_name, LOCATION_TBD);
        assert_eq!(event.community_id, "com_nycla");
        assert_eq!(event.category, vec!["Bar Association", "CLE", "Networking"]);
        assert_eq!(event.tags, vec!["dinner", "CLE", "Networking"]);
        assert_eq!(event.event_type, "CLE");
        assert_eq!(event.cle_credits, Some(1.5));
        assert_eq!(event.metadata["source"], "nycla");
        assert!(event.external_id.starts_with("nycla_"));
    }

    #[test]
    fn tags_read_from_both_name_and_description() {
        let mut item = raw("Zoom Webinar on Appeals", Some("2025-03-01T18:00:00Z"));
        item.description = Some("Earn CLE credit from your desk".to_string());
        item.tags = vec!["Webinar".to_string(), "appeals".to_string()];

        let event = normalize(item, &ctx()).expect("event");
        assert_eq!(event.tags, vec!["Webinar", "appeals", "CLE"]);
        assert_eq!(event.name, "Zoom Webinar on Appeals");
        assert_eq!(event.description, "Earn CLE credit from your desk");
    }

    #[test]
    fn end_before_start_collapses_to_start() {
        let mut item = raw("Gala", Some("2025-03-01T18:00:00Z"));
        item.end = Some(DateTime::parse_from_rfc3339("2025-03-01T17:00:00Z").expect("end"));
        let event = normalize(item, &ctx()).expect("event");
        assert_eq!(event.end_date, event.start_date);
    }

    #[test]
    fn adapter_supplied_type_and_metadata_survive() {
        let mut item = raw("Patent Law Forum", Some("2025-03-01T18:00:00Z"));
        item.event_type = Some("Conference".to_string());
        let mut metadata = Map::new();
        metadata.insert("source".to_string(), json!("NYIPLA"));
        item.metadata = metadata;

        let event = normalize(item, &ctx()).expect("event");
        assert_eq!(event.event_type, "Conference");
        assert_eq!(event.metadata["source"], "NYIPLA");
        assert_eq!(event.category, vec!["Patent Law"]);
    }

    #[test]
    fn batch_skips_invalid_items_and_keeps_order() {
        let raws = vec![
            raw("First", Some("2025-03-01T18:00:00Z")),
            raw("No date", None),
            raw("Third", Some("2025-03-02T18:00:00Z")),
        ];
        let (events, skipped) = normalize_batch(raws, &ctx());
        let names: Vec<_> = events.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["First", "Third"]);
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].name.as_deref(), Some("No date"));
    }
}
