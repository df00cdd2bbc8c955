use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, FixedOffset, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::blocking::{Client, RequestBuilder};
use scraper::{ElementRef, Html, Selector};
use serde::de::DeserializeOwned;

use crate::config::HttpConfig;
use crate::models::Price;

static ABBREVIATED_DATETIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)([A-Za-z]{3,9}\.?\s+\d{1,2},\s+\d{4})\s+(\d{1,2}(?::\d{2})?)\s*(am|pm)\s+([A-Z]{2,4})\b")
        .expect("valid abbreviated datetime regex")
});

static DATE_ONLY_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(r"([A-Za-z]+\s+\d{1,2},\s+\d{4})").expect("valid long date regex"),
            "%B %d, %Y",
        ),
        (
            Regex::new(r"([A-Za-z]{3}\s+\d{1,2},\s+\d{4})").expect("valid short date regex"),
            "%b %d, %Y",
        ),
        (
            Regex::new(r"(\d{1,2}/\d{1,2}/\d{4})").expect("valid slash date regex"),
            "%m/%d/%Y",
        ),
        (
            Regex::new(r"(\d{4}-\d{2}-\d{2})").expect("valid iso date regex"),
            "%Y-%m-%d",
        ),
    ]
});

static PRICE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\s?(\d+(?:,\d{3})*(?:\.\d{1,2})?)").expect("valid price regex"));

/// Reads a ticket price out of free text. A dollar amount wins over the word "free";
/// text with neither says nothing about price.
pub fn parse_price(text: &str) -> Option<Price> {
    if let Some(caps) = PRICE_RE.captures(text) {
        let amount = caps[1].replace(',', "").parse::<f64>().ok()?;
        if amount > 0.0 {
            return Some(Price::paid(amount, caps[0].to_string()));
        }
        return Some(Price::free());
    }
    text.to_lowercase().contains("free").then(Price::free)
}

/// Raised by the orchestrator once it has given up on an adapter run. Blocking work
/// cannot be interrupted, so adapters observe it between requests.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            bail!("adapter run cancelled");
        }
        Ok(())
    }
}

/// Blocking HTTP client with the configured timeouts. Build it on the thread that uses it.
pub struct Fetcher {
    client: Client,
    detail_timeout: Duration,
    cancel: CancelFlag,
}

impl Fetcher {
    pub fn new(config: &HttpConfig, cancel: &CancelFlag) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            client,
            detail_timeout: Duration::from_secs(config.detail_timeout_secs),
            cancel: cancel.clone(),
        })
    }

    fn send_text(&self, request: RequestBuilder, url: &str) -> Result<String> {
        self.cancel.check()?;
        let response = request
            .send()
            .with_context(|| format!("request failed for {url}"))?;
        let response = response
            .error_for_status()
            .with_context(|| format!("non-success status for {url}"))?;
        response
            .text()
            .with_context(|| format!("unable to read response body for {url}"))
    }

    pub fn fetch_text(&self, url: &str) -> Result<String> {
        self.send_text(self.client.get(url), url)
    }

    /// Follow-up page fetch with the shorter per-request budget.
    pub fn fetch_detail(&self, url: &str) -> Result<String> {
        self.send_text(self.client.get(url).timeout(self.detail_timeout), url)
    }

    pub fn fetch_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<T> {
        let mut request = self.client.get(url).query(query);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let body = self.send_text(request, url)?;
        serde_json::from_str(&body).with_context(|| format!("unexpected json from {url}"))
    }
}

pub fn clean_text(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn first_text(element: &ElementRef<'_>, selector: &Selector) -> Option<String> {
    element
        .select(selector)
        .next()
        .map(inner_text)
        .filter(|text| !text.is_empty())
}

pub fn inner_text(element: ElementRef<'_>) -> String {
    clean_text(&element.text().collect::<Vec<_>>().join(" "))
}

pub fn first_attr(element: &ElementRef<'_>, selector: &Selector, attr: &str) -> Option<String> {
    element
        .select(selector)
        .next()
        .and_then(|el| el.value().attr(attr))
        .map(str::to_string)
}

pub fn absolute_url(base: &str, href: Option<String>) -> Option<String> {
    let href = href?;
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href);
    }
    let base_url = reqwest::Url::parse(base).ok()?;
    base_url.join(&href).ok().map(|u| u.to_string())
}

/// Flattens an HTML fragment to its visible text.
pub fn strip_html(input: &str) -> String {
    if !input.contains('<') {
        return clean_text(input);
    }
    let fragment = Html::parse_fragment(input);
    clean_text(&fragment.root_element().text().collect::<Vec<_>>().join(" "))
}

/// Local wall-clock time in `tz`. A time skipped by a DST jump has no instant.
pub fn to_timezone_datetime(date: NaiveDate, time: NaiveTime, tz: Tz) -> Option<DateTime<FixedOffset>> {
    let naive = NaiveDateTime::new(date, time);
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt.fixed_offset()),
        LocalResult::Ambiguous(dt, _) => Some(dt.fixed_offset()),
        LocalResult::None => None,
    }
}

/// North American zone abbreviations as printed on event pages.
pub fn offset_for_abbreviation(abbr: &str) -> Option<FixedOffset> {
    let hours = match abbr.to_ascii_uppercase().as_str() {
        "UTC" | "GMT" | "Z" => 0,
        "EDT" => -4,
        "EST" | "CDT" => -5,
        "CST" | "MDT" => -6,
        "MST" | "PDT" => -7,
        "PST" | "AKDT" => -8,
        "AKST" => -9,
        "HST" => -10,
        _ => return None,
    };
    FixedOffset::east_opt(hours * 3600)
}

fn parse_month_day_year(text: &str) -> Option<NaiveDate> {
    let text = text.replace('.', "");
    ["%b %d, %Y", "%B %d, %Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&text, fmt).ok())
}

/// Parses text such as `Jul 10, 2025 6:00pm EDT`.
pub fn parse_abbreviated_datetime(text: &str) -> Option<DateTime<FixedOffset>> {
    let caps = ABBREVIATED_DATETIME_RE.captures(text)?;
    let date = parse_month_day_year(&clean_text(&caps[1]))?;
    let clock = if caps[2].contains(':') {
        caps[2].to_string()
    } else {
        format!("{}:00", &caps[2])
    };
    let time = NaiveTime::parse_from_str(&format!("{clock}{}", caps[3].to_uppercase()), "%I:%M%p").ok()?;
    let offset = offset_for_abbreviation(&caps[4])?;
    match offset.from_local_datetime(&NaiveDateTime::new(date, time)) {
        LocalResult::Single(dt) => Some(dt),
        _ => None,
    }
}

/// Finds the first bare date in `text`.
pub fn parse_loose_date(text: &str) -> Option<NaiveDate> {
    DATE_ONLY_PATTERNS.iter().find_map(|(re, fmt)| {
        let found = re.captures(text)?;
        NaiveDate::parse_from_str(&found[1], fmt).ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abbreviated_datetime_keeps_printed_offset() {
        let dt = parse_abbreviated_datetime("Jul 10, 2025 6:00pm EDT").expect("datetime");
        assert_eq!(dt.to_rfc3339(), "2025-07-10T18:00:00-04:00");

        let dt = parse_abbreviated_datetime("Jul 16, 2025 5:30pm PDT").expect("datetime");
        assert_eq!(dt.to_rfc3339(), "2025-07-16T17:30:00-07:00");

        let dt = parse_abbreviated_datetime("Dec 2, 2025 12pm EST").expect("datetime");
        assert_eq!(dt.to_rfc3339(), "2025-12-02T12:00:00-05:00");
    }

    #[test]
    fn unknown_abbreviation_is_rejected() {
        assert!(parse_abbreviated_datetime("Jul 10, 2025 6:00pm XYZ").is_none());
        assert!(parse_abbreviated_datetime("sometime next week").is_none());
    }

    #[test]
    fn loose_dates() {
        assert_eq!(
            parse_loose_date("Starts January 15, 2025"),
            NaiveDate::from_ymd_opt(2025, 1, 15)
        );
        assert_eq!(parse_loose_date("01/15/2025"), NaiveDate::from_ymd_opt(2025, 1, 15));
        assert_eq!(parse_loose_date("2025-01-15"), NaiveDate::from_ymd_opt(2025, 1, 15));
        assert_eq!(parse_loose_date("TBA"), None);
    }

    #[test]
    fn timezone_datetime_follows_dst() {
        let tz: Tz = "America/New_York".parse().expect("tz");
        let winter = to_timezone_datetime(
            NaiveDate::from_ymd_opt(2025, 1, 15).expect("date"),
            NaiveTime::from_hms_opt(18, 0, 0).expect("time"),
            tz,
        )
        .expect("winter");
        assert_eq!(winter.offset().local_minus_utc(), -5 * 3600);

        let skipped = to_timezone_datetime(
            NaiveDate::from_ymd_opt(2025, 3, 9).expect("date"),
            NaiveTime::from_hms_opt(2, 30, 0).expect("time"),
            tz,
        );
        assert!(skipped.is_none());
    }

    #[test]
    fn prices_from_text() {
        let paid = parse_price("Tickets are $1,250.50 for members").expect("paid");
        assert_eq!(paid, Price::paid(1250.5, "$1,250.50"));
        assert_eq!(parse_price("Free and open to the public"), Some(Price::free()));
        assert_eq!(parse_price("Admission $0"), Some(Price::free()));
        assert_eq!(parse_price("Registration required"), None);
    }

    #[test]
    fn cancelled_fetcher_sends_nothing() {
        let cancel = CancelFlag::new();
        let fetcher = Fetcher::new(&HttpConfig::default(), &cancel).expect("fetcher");
        cancel.cancel();
        let err = fetcher
            .fetch_text("http://127.0.0.1:9/never-contacted")
            .expect_err("cancelled");
        assert!(err.to_string().contains("cancelled"));
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn html_helpers() {
        assert_eq!(strip_html("<p>Room <b>5</b></p>\n<p>Bring ID</p>"), "Room 5 Bring ID");
        assert_eq!(strip_html("plain   text"), "plain text");
        assert_eq!(
            absolute_url("https://www.lsuite.co/events", Some("/events/gala".to_string())),
            Some("https://www.lsuite.co/events/gala".to_string())
        );
    }
}
