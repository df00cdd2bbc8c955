use std::{collections::HashSet, fmt, str::FromStr};

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;

/// Location placeholder used when a source gives no venue.
pub const LOCATION_TBD: &str = "TBD";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub external_id: String, // source tag + native id, or source tag + truncated digest
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub start_date: DateTime<FixedOffset>,
    pub end_date: DateTime<FixedOffset>,
    #[serde(default = "default_location")]
    pub location_name: String,
    #[serde(default)]
    pub location_id: Option<String>,
    pub community_id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub price: Option<Price>,
    #[serde(default)]
    pub category: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub event_type: String,
    #[serde(default)]
    pub cle_credits: Option<f64>,
    #[serde(default)]
    pub metadata: Value,
}

fn default_location() -> String {
    LOCATION_TBD.to_string()
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PriceType {
    Free,
    Paid,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Price {
    pub amount: f64,
    #[serde(rename = "type")]
    pub kind: PriceType,
    pub currency: String,
    #[serde(default)]
    pub details: String,
}

impl Price {
    pub fn free() -> Self {
        Self {
            amount: 0.0,
            kind: PriceType::Free,
            currency: "USD".to_string(),
            details: String::new(),
        }
    }

    pub fn paid(amount: f64, details: impl Into<String>) -> Self {
        Self {
            amount,
            kind: PriceType::Paid,
            currency: "USD".to_string(),
            details: details.into(),
        }
    }
}

/// Moderation lifecycle of a stored event.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Pending,
    Approved,
    Featured,
    Cancelled,
    Denied,
    Archived,
}

impl EventStatus {
    pub const ALL: [EventStatus; 6] = [
        EventStatus::Pending,
        EventStatus::Approved,
        EventStatus::Featured,
        EventStatus::Cancelled,
        EventStatus::Denied,
        EventStatus::Archived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "PENDING",
            EventStatus::Approved => "APPROVED",
            EventStatus::Featured => "FEATURED",
            EventStatus::Cancelled => "CANCELLED",
            EventStatus::Denied => "DENIED",
            EventStatus::Archived => "ARCHIVED",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(EventStatus::Pending),
            "APPROVED" => Ok(EventStatus::Approved),
            "FEATURED" => Ok(EventStatus::Featured),
            "CANCELLED" => Ok(EventStatus::Cancelled),
            "DENIED" => Ok(EventStatus::Denied),
            "ARCHIVED" => Ok(EventStatus::Archived),
            other => Err(StoreError::UnknownStatus(other.to_string())),
        }
    }
}

/// A persisted event row: the normalized event plus moderation and audit columns.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredEvent {
    pub id: String,
    pub event: Event,
    pub status: EventStatus,
    pub submitted_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
    #[serde(default)]
    pub notes: Option<String>,
}

/// What an adapter emits before normalization. Every field is optional so that
/// adapters never have to invent values; `normalize` decides what is fatal.
#[derive(Debug, Clone, Default)]
pub struct RawEvent {
    /// Identifier the source itself exposes (numeric id, ICS UID, ...).
    pub native_id: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub start: Option<DateTime<FixedOffset>>,
    pub end: Option<DateTime<FixedOffset>>,
    pub location_name: Option<String>,
    pub location_id: Option<String>,
    pub url: Option<String>,
    pub image: Option<String>,
    pub price: Option<Price>,
    pub base_categories: Vec<String>,
    pub tags: Vec<String>,
    pub event_type: Option<String>,
    pub cle_credits: Option<f64>,
    pub metadata: Map<String, Value>,
}

/// Deduplicates while keeping the first occurrence of each entry.
pub fn unique_ordered<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for item in items {
        let item = item.into();
        if seen.insert(item.clone()) {
            out.push(item);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_ordered_keeps_first_occurrence() {
        let out = unique_ordered(["CLE", "Tax Law", "CLE", "Networking", "Tax Law"]);
        assert_eq!(out, vec!["CLE", "Tax Law", "Networking"]);
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in EventStatus::ALL {
            assert_eq!(status.as_str().parse::<EventStatus>().expect("status"), status);
        }
        assert!("LIVE".parse::<EventStatus>().is_err());
    }

    #[test]
    fn event_serializes_with_camel_case_keys() {
        let start = DateTime::parse_from_rfc3339("2025-03-01T18:00:00Z").expect("start");
        let event = Event {
            external_id: "src_42".to_string(),
            name: "Ethics CLE".to_string(),
            description: String::new(),
            start_date: start,
            end_date: start,
            location_name: LOCATION_TBD.to_string(),
            location_id: None,
            community_id: "com_src".to_string(),
            url: None,
            image: None,
            price: Some(Price::free()),
            category: vec!["CLE".to_string()],
            tags: Vec::new(),
            event_type: "CLE".to_string(),
            cle_credits: Some(1.5),
            metadata: Value::Null,
        };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["externalId"], "src_42");
        assert_eq!(json["cleCredits"], 1.5);
        assert_eq!(json["price"]["type"], "Free");
    }
}
