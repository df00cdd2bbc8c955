use anyhow::{bail, Context, Result};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use ical::{parser::ical::component::IcalEvent, property::Property, IcalParser};
use serde_json::{json, Map};
use tracing::{debug, info, warn};

use super::base::{self, CancelFlag, Fetcher};
use super::SourceAdapter;
use crate::academic;
use crate::config::HttpConfig;
use crate::identity::IdentityKey;
use crate::models::RawEvent;
use crate::normalize::SourceContext;

/// A VEVENT with the properties this crate reads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IcsEvent {
    pub uid: Option<String>,
    pub recurrence_id: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub url: Option<String>,
    pub status: Option<String>,
    pub categories: Vec<String>,
    pub start: Option<DateTime<FixedOffset>>,
    pub end: Option<DateTime<FixedOffset>>,
    pub all_day: bool,
}

impl IcsEvent {
    pub fn is_cancelled(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("CANCELLED"))
    }
}

fn param<'a>(prop: &'a Property, key: &str) -> Option<&'a str> {
    prop.params
        .as_ref()?
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .and_then(|(_, values)| values.first())
        .map(String::as_str)
}

fn raw_value(prop: &Property) -> Option<&str> {
    prop.value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// TEXT values arrive with their RFC 5545 escapes intact.
fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn text_value(prop: &Property) -> Option<String> {
    prop.value.as_deref().map(unescape)
}

/// Splits a CATEGORIES value on unescaped commas.
fn split_categories(value: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            ',' => out.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    out.push(current);
    out.into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect()
}

/// Interprets a DATE or DATE-TIME value. Floating and all-day values are placed in `fallback`.
fn parse_datetime(prop: &Property, fallback: Tz) -> Option<(DateTime<FixedOffset>, bool)> {
    let value = raw_value(prop)?;
    let is_date = param(prop, "VALUE").is_some_and(|v| v.eq_ignore_ascii_case("DATE"))
        || (value.len() == 8 && value.chars().all(|c| c.is_ascii_digit()));

    if is_date {
        let date = NaiveDate::parse_from_str(value, "%Y%m%d").ok()?;
        let midnight = NaiveTime::from_hms_opt(0, 0, 0)?;
        return base::to_timezone_datetime(date, midnight, fallback).map(|dt| (dt, true));
    }

    if let Some(utc) = value.strip_suffix('Z') {
        let naive = NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S").ok()?;
        return Some((Utc.from_utc_datetime(&naive).fixed_offset(), false));
    }

    let naive = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S").ok()?;
    let tz = match param(prop, "TZID") {
        Some(name) => name.parse::<Tz>().unwrap_or_else(|_| {
            debug!(tzid = name, "unknown TZID, using source timezone");
            fallback
        }),
        None => fallback,
    };
    base::to_timezone_datetime(naive.date(), naive.time(), tz).map(|dt| (dt, false))
}

fn to_ics_event(vevent: &IcalEvent, fallback: Tz) -> IcsEvent {
    let mut event = IcsEvent::default();
    for prop in &vevent.properties {
        match prop.name.to_ascii_uppercase().as_str() {
            "UID" => event.uid = raw_value(prop).map(str::to_string),
            "RECURRENCE-ID" => event.recurrence_id = raw_value(prop).map(str::to_string),
            "SUMMARY" => event.summary = text_value(prop),
            "DESCRIPTION" => event.description = text_value(prop),
            "LOCATION" => event.location = text_value(prop),
            "URL" => event.url = raw_value(prop).map(str::to_string),
            "STATUS" => event.status = raw_value(prop).map(str::to_string),
            "CATEGORIES" => {
                if let Some(value) = prop.value.as_deref() {
                    event.categories.extend(split_categories(value));
                }
            }
            "DTSTART" => {
                if let Some((start, all_day)) = parse_datetime(prop, fallback) {
                    event.start = Some(start);
                    event.all_day = all_day;
                }
            }
            "DTEND" => event.end = parse_datetime(prop, fallback).map(|(end, _)| end),
            _ => {}
        }
    }
    event
}

/// Extracts every VEVENT from an iCalendar document. Alarms and other nested
/// components are left to the parser and ignored here.
pub fn parse_calendar(text: &str, fallback: Tz) -> Result<Vec<IcsEvent>> {
    let mut events = Vec::new();
    for calendar in IcalParser::new(text.as_bytes()) {
        let calendar = calendar.context("malformed iCalendar document")?;
        events.extend(calendar.events.iter().map(|e| to_ics_event(e, fallback)));
    }
    Ok(events)
}

pub struct IcsFeedAdapter {
    context: SourceContext,
    url: String,
    use_uid: bool,
    filter_academic: bool,
    base_categories: Vec<String>,
    timezone: Tz,
    http: HttpConfig,
}

impl IcsFeedAdapter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: &str,
        community_id: &str,
        url: &str,
        use_uid: bool,
        filter_academic: bool,
        base_categories: Vec<String>,
        timezone: &str,
        identity_key: IdentityKey,
        http: HttpConfig,
    ) -> Result<Self> {
        let Ok(timezone) = timezone.parse::<Tz>() else {
            bail!("unknown timezone `{timezone}` for source {source}");
        };
        Ok(Self {
            context: SourceContext::new(source, community_id, identity_key),
            url: url.to_string(),
            use_uid,
            filter_academic,
            base_categories,
            timezone,
            http,
        })
    }

    /// Converts parsed VEVENTs, dropping cancelled and, if configured, internal ones.
    pub fn to_raw_events(&self, events: Vec<IcsEvent>) -> Vec<RawEvent> {
        let mut raws = Vec::with_capacity(events.len());
        for event in events {
            if event.is_cancelled() {
                info!(source = %self.context.source, event = ?event.summary, "skipping cancelled event");
                continue;
            }
            let native_id = if self.use_uid {
                event.uid.as_ref().map(|uid| match &event.recurrence_id {
                    Some(rid) => format!("{uid}_{rid}"),
                    None => uid.clone(),
                })
            } else {
                None
            };

            let mut base_categories = self.base_categories.clone();
            base_categories.extend(event.categories.iter().cloned());

            let mut metadata = Map::new();
            metadata.insert("feed_url".to_string(), json!(self.url));
            if let Some(uid) = &event.uid {
                metadata.insert("uid".to_string(), json!(uid));
            }
            if event.all_day {
                metadata.insert("all_day".to_string(), json!(true));
            }

            let description = event.description.map(|d| base::strip_html(&d));
            let price = description.as_deref().and_then(base::parse_price);

            raws.push(RawEvent {
                native_id,
                name: event.summary.map(|s| base::clean_text(&s)),
                description,
                price,
                start: event.start,
                end: event.end,
                location_name: event.location.map(|l| base::clean_text(&l)),
                url: event.url,
                base_categories,
                metadata,
                ..RawEvent::default()
            });
        }

        if self.filter_academic {
            let before = raws.len();
            raws = academic::retain_public_events(raws);
            info!(
                source = %self.context.source,
                filtered = before - raws.len(),
                kept = raws.len(),
                "filtered internal academic events"
            );
        }
        raws
    }
}

impl SourceAdapter for IcsFeedAdapter {
    fn context(&self) -> &SourceContext {
        &self.context
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn fetch_raw_events(&self, cancel: &CancelFlag) -> Result<Vec<RawEvent>> {
        let fetcher = Fetcher::new(&self.http, cancel)?;
        let body = fetcher.fetch_text(&self.url)?;
        if !body.contains("BEGIN:VCALENDAR") {
            warn!(source = %self.context.source, url = %self.url, "response is not an iCalendar document");
            bail!("response from {} is not an iCalendar document", self.url);
        }
        let events = parse_calendar(&body, self.timezone)?;
        debug!(source = %self.context.source, count = events.len(), "parsed calendar");
        Ok(self.to_raw_events(events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Price;

    const FEED: &str = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
PRODID:-//Law School//Events//EN\r\n\
BEGIN:VEVENT\r\n\
UID:10001-1740852000-1740859200@www.law.cuny.edu\r\n\
DTSTART;TZID=America/New_York:20250301T130000\r\n\
DTEND;TZID=America/New_York:20250301T150000\r\n\
SUMMARY:Annual CLE Networking Reception\r\n\
DESCRIPTION:Join us for 2 CLE credits\\, followed by a reception.\\nRSVP requ\r\n \
ired.\r\n\
LOCATION:Main Auditorium\\, 2 Court Square\r\n\
URL:https://www.law.cuny.edu/event/reception/\r\n\
CATEGORIES:Alumni,Public Interest\r\n\
BEGIN:VALARM\r\n\
ACTION:DISPLAY\r\n\
DESCRIPTION:Reminder\r\n\
END:VALARM\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:10002@www.law.cuny.edu\r\n\
DTSTART:20250305T230000Z\r\n\
SUMMARY:Faculty Meeting\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:10003@www.law.cuny.edu\r\n\
DTSTART;VALUE=DATE:20250310\r\n\
DTEND;VALUE=DATE:20250311\r\n\
SUMMARY:Public Lecture on Immigration Law and the Community\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:10004@www.law.cuny.edu\r\n\
DTSTART:20250312T230000Z\r\n\
SUMMARY:Cancelled Panel Discussion on Tax Law\r\n\
STATUS:CANCELLED\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

    fn tz() -> Tz {
        "America/New_York".parse().expect("tz")
    }

    fn adapter(use_uid: bool, filter_academic: bool) -> IcsFeedAdapter {
        IcsFeedAdapter::new(
            "cuny_law",
            "com_cuny_law",
            "https://www.law.cuny.edu/events/list/?ical=1",
            use_uid,
            filter_academic,
            vec!["Law School".to_string()],
            "America/New_York",
            IdentityKey::NameStart,
            HttpConfig::default(),
        )
        .expect("adapter")
    }

    #[test]
    fn parses_unfolded_events() {
        let events = parse_calendar(FEED, tz()).expect("calendar");
        assert_eq!(events.len(), 4);

        let first = &events[0];
        assert_eq!(first.summary.as_deref(), Some("Annual CLE Networking Reception"));
        assert_eq!(
            first.description.as_deref(),
            Some("Join us for 2 CLE credits, followed by a reception.\nRSVP required.")
        );
        assert_eq!(first.location.as_deref(), Some("Main Auditorium, 2 Court Square"));
        assert_eq!(first.categories, vec!["Alumni", "Public Interest"]);
        assert_eq!(
            first.start.expect("start").to_rfc3339(),
            "2025-03-01T13:00:00-05:00"
        );
        assert_eq!(first.end.expect("end").to_rfc3339(), "2025-03-01T15:00:00-05:00");
        assert!(!first.all_day);
    }

    #[test]
    fn utc_and_all_day_values() {
        let events = parse_calendar(FEED, tz()).expect("calendar");
        assert_eq!(
            events[1].start.expect("start").with_timezone(&Utc).to_rfc3339(),
            "2025-03-05T23:00:00+00:00"
        );
        let all_day = &events[2];
        assert!(all_day.all_day);
        assert_eq!(
            all_day.start.expect("start").to_rfc3339(),
            "2025-03-10T00:00:00-04:00"
        );
        assert!(events[3].is_cancelled());
    }

    #[test]
    fn cancelled_and_internal_events_are_dropped() {
        let raws = adapter(false, true).to_raw_events(parse_calendar(FEED, tz()).expect("calendar"));
        let names: Vec<_> = raws.iter().filter_map(|r| r.name.as_deref()).collect();
        assert_eq!(
            names,
            vec![
                "Annual CLE Networking Reception",
                "Public Lecture on Immigration Law and the Community"
            ]
        );
        assert!(raws.iter().all(|r| r.native_id.is_none()));
        assert_eq!(
            raws[0].base_categories,
            vec!["Law School", "Alumni", "Public Interest"]
        );
        assert_eq!(raws[0].metadata["feed_url"], "https://www.law.cuny.edu/events/list/?ical=1");
    }

    #[test]
    fn uid_becomes_native_id_when_enabled() {
        let raws = adapter(true, false).to_raw_events(parse_calendar(FEED, tz()).expect("calendar"));
        assert_eq!(raws.len(), 3);
        assert_eq!(raws[1].native_id.as_deref(), Some("10002@www.law.cuny.edu"));
    }

    #[test]
    fn recurring_instances_get_distinct_ids() {
        let feed = "BEGIN:VCALENDAR\n\
BEGIN:VEVENT\n\
UID:series@tockify\n\
RECURRENCE-ID:20250401T220000Z\n\
DTSTART:20250401T220000Z\n\
SUMMARY:Monthly Mixer\n\
END:VEVENT\n\
END:VCALENDAR\n";
        let raws = adapter(true, false).to_raw_events(parse_calendar(feed, tz()).expect("calendar"));
        assert_eq!(
            raws[0].native_id.as_deref(),
            Some("series@tockify_20250401T220000Z")
        );
    }

    #[test]
    fn description_prices_are_read() {
        let feed = "BEGIN:VCALENDAR\n\
BEGIN:VEVENT\n\
UID:gala@nycla\n\
DTSTART:20250401T220000Z\n\
SUMMARY:Annual Gala\n\
DESCRIPTION:Tickets $150 per person\n\
END:VEVENT\n\
BEGIN:VEVENT\n\
UID:talk@nycla\n\
DTSTART:20250402T220000Z\n\
SUMMARY:Evening Talk\n\
DESCRIPTION:Free for members\n\
END:VEVENT\n\
END:VCALENDAR\n";
        let raws = adapter(true, false).to_raw_events(parse_calendar(feed, tz()).expect("calendar"));
        assert_eq!(raws[0].price, Some(Price::paid(150.0, "$150")));
        assert_eq!(raws[1].price, Some(Price::free()));
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        let result = IcsFeedAdapter::new(
            "x",
            "com_x",
            "https://example.org/feed.ics",
            false,
            false,
            Vec::new(),
            "Nowhere/Special",
            IdentityKey::NameStart,
            HttpConfig::default(),
        );
        assert!(result.is_err());
    }
}
