use anyhow::Result;
use chrono::{DateTime, FixedOffset};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use super::base::{self, CancelFlag, Fetcher};
use super::SourceAdapter;
use crate::categorize::{self, GENERIC_EVENT_TYPE, NETWORKING, WEBINAR};
use crate::config::HttpConfig;
use crate::identity::IdentityKey;
use crate::models::RawEvent;
use crate::normalize::SourceContext;

const BASE_CATEGORIES: [&str; 3] = ["Professional Organization", "Legal Events", "Technology"];

const QUERY: [(&str, &str); 6] = [
    ("include_network_events", "true"),
    ("query[order]", "asc"),
    ("query[active_during_next_x_days]", "30"),
    ("page", "1"),
    ("per_page", "50"),
    ("query[with_location]", ""),
];

const HEADERS: [(&str, &str); 2] = [
    ("Accept", "application/json, text/plain, */*"),
    ("X-Requested-With", "XMLHttpRequest"),
];

#[derive(Debug, Deserialize, Default)]
pub struct ChipsResponse {
    #[serde(default)]
    pub total_items: Option<u64>,
    #[serde(default)]
    pub events: Vec<ChipsEvent>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ChipsEvent {
    pub id: Option<Value>,
    pub title: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub timezone: Option<String>,
    pub webinar_url: Option<String>,
    pub show_webinar_url: bool,
    pub participation_type: Option<String>,
    pub cancelled: bool,
    pub organizer: Option<Organizer>,
    pub network_categories: Vec<NamedCategory>,
    pub new_cover_picture: Option<CoverPicture>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Organizer {
    pub name: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct NamedCategory {
    pub name: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct CoverPicture {
    pub preview_url: Option<String>,
    pub original_url: Option<String>,
}

impl ChipsEvent {
    fn native_id(&self) -> Option<String> {
        match self.id.as_ref()? {
            Value::Number(n) => Some(n.to_string()),
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => None,
        }
    }

    fn category_names(&self) -> Vec<String> {
        self.network_categories
            .iter()
            .filter_map(|c| c.name.as_deref())
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .collect()
    }

    fn organizer_name(&self) -> Option<&str> {
        self.organizer
            .as_ref()
            .and_then(|o| o.name.as_deref())
            .filter(|n| !n.trim().is_empty())
    }

    fn description(&self) -> String {
        let mut parts = Vec::new();
        if let Some(name) = self.organizer_name() {
            parts.push(format!("Organized by: {name}"));
        }
        if let Some(kind) = self.participation_type.as_deref().filter(|p| !p.is_empty()) {
            parts.push(format!("Participation: {}", categorize::title_case(kind)));
        }
        let categories = self.category_names();
        if !categories.is_empty() {
            parts.push(format!("Categories: {}", categories.join(", ")));
        }
        if self.show_webinar_url {
            if let Some(url) = self.webinar_url.as_deref().filter(|u| !u.is_empty()) {
                parts.push(format!("Webinar URL: {url}"));
            }
        }
        parts.join("\n")
    }
}

fn parse_api_datetime(value: Option<&str>) -> Option<DateTime<FixedOffset>> {
    let value = value?.trim();
    DateTime::parse_from_rfc3339(value).ok()
}

/// Event type from the API's own wording. Falls back to the generic label.
pub fn chips_event_type(title: &str, categories: &[String], participation_type: &str) -> &'static str {
    let text = format!("{title} {} {participation_type}", categories.join(" ")).to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| text.contains(w));
    if has(&["webinar", "virtual", "zoom"]) {
        WEBINAR
    } else if has(&["dinner", "lunch", "reception", "mixer"]) {
        NETWORKING
    } else if has(&["conference", "summit", "symposium"]) {
        "Conference"
    } else if has(&["workshop", "training", "seminar"]) {
        "Workshop"
    } else if has(&["panel", "discussion", "talk"]) {
        "Panel Discussion"
    } else if has(&["check-in", "meeting"]) {
        "Meeting"
    } else {
        GENERIC_EVENT_TYPE
    }
}

pub struct ChipsApiAdapter {
    context: SourceContext,
    url: String,
    base_url: String,
    http: HttpConfig,
}

impl ChipsApiAdapter {
    pub fn new(source: &str, community_id: &str, url: &str, base_url: &str, http: HttpConfig) -> Self {
        Self {
            context: SourceContext::new(source, community_id, IdentityKey::NameStart),
            url: url.to_string(),
            base_url: base_url.to_string(),
            http,
        }
    }

    pub fn to_raw_events(&self, response: ChipsResponse) -> Vec<RawEvent> {
        let mut raws = Vec::with_capacity(response.events.len());
        for item in response.events {
            let title = item.title.clone().unwrap_or_default();
            if item.cancelled {
                info!(source = %self.context.source, event = %title, "skipping cancelled event");
                continue;
            }

            let start = parse_api_datetime(item.start_date.as_deref());
            if start.is_none() {
                warn!(source = %self.context.source, event = %title, raw = ?item.start_date, "unparseable start date");
            }
            let categories = item.category_names();
            let participation = item.participation_type.clone().unwrap_or_default();

            let mut base_categories: Vec<String> = BASE_CATEGORIES.iter().map(|c| c.to_string()).collect();
            base_categories.extend(categories.iter().cloned());

            let image = item.new_cover_picture.as_ref().and_then(|cover| {
                let href = cover.preview_url.clone().or_else(|| cover.original_url.clone());
                base::absolute_url(&self.base_url, href)
            });

            let mut metadata = Map::new();
            metadata.insert("source".to_string(), json!("ChIPs Network"));
            metadata.insert("api_url".to_string(), json!(self.url));
            metadata.insert(
                "organizer".to_string(),
                json!(item.organizer_name().unwrap_or("ChIPs Network")),
            );
            metadata.insert("participation_type".to_string(), json!(participation));
            metadata.insert(
                "timezone".to_string(),
                json!(item.timezone.as_deref().unwrap_or("UTC")),
            );
            if let Some(webinar) = item.webinar_url.as_deref().filter(|u| !u.is_empty()) {
                metadata.insert("webinar_url".to_string(), json!(webinar));
            }

            raws.push(RawEvent {
                native_id: item.native_id(),
                description: Some(item.description()),
                start,
                end: parse_api_datetime(item.end_date.as_deref()),
                image,
                base_categories,
                event_type: Some(chips_event_type(&title, &categories, &participation).to_string()),
                metadata,
                name: item.title,
                ..RawEvent::default()
            });
        }
        raws
    }
}

impl SourceAdapter for ChipsApiAdapter {
    fn context(&self) -> &SourceContext {
        &self.context
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn fetch_raw_events(&self, cancel: &CancelFlag) -> Result<Vec<RawEvent>> {
        let fetcher = Fetcher::new(&self.http, cancel)?;
        let response: ChipsResponse = fetcher.fetch_json(&self.url, &QUERY, &HEADERS)?;
        info!(
            source = %self.context.source,
            total = response.total_items.unwrap_or_default(),
            "fetched api page"
        );
        Ok(self.to_raw_events(response))
    }
}
