use anyhow::Result;
use chrono::NaiveTime;
use chrono_tz::America::New_York;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use serde_json::{json, Map};
use tracing::{debug, info, warn};

use super::base::{self, CancelFlag, Fetcher};
use super::SourceAdapter;
use crate::config::HttpConfig;
use crate::identity::IdentityKey;
use crate::models::RawEvent;
use crate::normalize::SourceContext;

static ARTICLE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("article.event-tease").expect("valid article selector"));
static TITLE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("header.event-tease__info h3").expect("valid title selector"));
static SR_ONLY_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".sr-only").expect("valid sr-only selector"));
static LINK_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("valid link selector"));
static DETAILS_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("p.event-tease__details").expect("valid details selector"));
static SUMMARY_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("p:not(.event-tease__details)").expect("valid summary selector"));
static IMAGE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("img[src]").expect("valid image selector"));
static META_DESCRIPTION_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"meta[name="description"], meta[property="og:description"]"#)
        .expect("valid meta selector")
});

/// Visible heading text, without screen-reader-only spans.
fn visible_title(heading: ElementRef<'_>) -> Option<String> {
    let mut text = base::inner_text(heading);
    for hidden in heading.select(&SR_ONLY_SELECTOR) {
        let hidden_text = base::inner_text(hidden);
        if !hidden_text.is_empty() {
            text = text.replacen(&hidden_text, "", 1);
        }
    }
    let text = base::clean_text(&text);
    (!text.is_empty()).then_some(text)
}

fn parse_when(text: &str) -> Option<chrono::DateTime<chrono::FixedOffset>> {
    if let Some(dt) = base::parse_abbreviated_datetime(text) {
        return Some(dt);
    }
    let date = base::parse_loose_date(text)?;
    base::to_timezone_datetime(date, NaiveTime::from_hms_opt(0, 0, 0)?, New_York)
}

/// Parses the events listing page.
pub fn parse_listing(html: &str, page_url: &str) -> Vec<RawEvent> {
    let document = Html::parse_document(html);
    let mut raws = Vec::new();

    for article in document.select(&ARTICLE_SELECTOR) {
        let Some(name) = article.select(&TITLE_SELECTOR).next().and_then(visible_title) else {
            warn!("event article without a title");
            continue;
        };
        let url = base::absolute_url(page_url, base::first_attr(&article, &LINK_SELECTOR, "href"));
        let when = base::first_text(&article, &DETAILS_SELECTOR).unwrap_or_default();
        let start = parse_when(&when);
        if start.is_none() {
            warn!(event = %name, raw = %when, "could not parse event date");
        }
        let image = base::absolute_url(page_url, base::first_attr(&article, &IMAGE_SELECTOR, "src"));
        let description = base::first_text(&article, &SUMMARY_SELECTOR);

        let mut metadata = Map::new();
        metadata.insert("raw_date".to_string(), json!(when));

        raws.push(RawEvent {
            name: Some(name),
            description,
            start,
            url,
            image,
            metadata,
            ..RawEvent::default()
        });
    }
    raws
}

/// The page's meta description, if any.
pub fn detail_description(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    document
        .select(&META_DESCRIPTION_SELECTOR)
        .filter_map(|meta| meta.value().attr("content"))
        .map(base::clean_text)
        .find(|content| !content.is_empty())
}

pub struct LsuiteHtmlAdapter {
    context: SourceContext,
    url: String,
    http: HttpConfig,
}

impl LsuiteHtmlAdapter {
    pub fn new(source: &str, community_id: &str, url: &str, http: HttpConfig) -> Self {
        Self {
            context: SourceContext::new(source, community_id, IdentityKey::UrlOrNameStart),
            url: url.to_string(),
            http,
        }
    }

    fn fill_description(&self, fetcher: &Fetcher, raw: &mut RawEvent) {
        if raw.description.is_some() {
            return;
        }
        let name = raw.name.clone().unwrap_or_default();
        let fetched = raw.url.as_deref().and_then(|url| match fetcher.fetch_detail(url) {
            Ok(html) => detail_description(&html),
            Err(err) => {
                debug!(source = %self.context.source, event = %name, error = %err, "detail page unavailable");
                None
            }
        });
        raw.description = Some(fetched.unwrap_or_else(|| format!("The L Suite event: {name}")));
    }
}

impl SourceAdapter for LsuiteHtmlAdapter {
    fn context(&self) -> &SourceContext {
        &self.context
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn fetch_raw_events(&self, cancel: &CancelFlag) -> Result<Vec<RawEvent>> {
        let fetcher = Fetcher::new(&self.http, cancel)?;
        let html = fetcher.fetch_text(&self.url)?;
        let mut raws = parse_listing(&html, &self.url);
        info!(source = %self.context.source, count = raws.len(), "parsed listing");
        for raw in &mut raws {
            cancel.check()?;
            self.fill_description(&fetcher, raw);
            if raw.price.is_none() {
                raw.price = raw.description.as_deref().and_then(base::parse_price);
            }
        }
        Ok(raws)
    }
}
