pub mod base;
pub mod chips_api;
pub mod ics_feed;
pub mod lsuite_html;

use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::{AppConfig, HttpConfig, SourceConfig, SourceKind};
use crate::models::{Event, RawEvent};
use crate::normalize::{self, SourceContext};
use crate::reconcile::{self, BatchReport, SourcePolicy};
use crate::store::EventStore;

pub use base::CancelFlag;

/// One upstream source. Implementations do blocking I/O and skip malformed items
/// instead of failing the whole fetch. They stop early once `cancel` is raised.
pub trait SourceAdapter: Send + Sync {
    fn context(&self) -> &SourceContext;
    fn url(&self) -> &str;
    fn fetch_raw_events(&self, cancel: &CancelFlag) -> Result<Vec<RawEvent>>;

    fn name(&self) -> &str {
        &self.context().source
    }
}

pub type SharedStore = Arc<Mutex<Box<dyn EventStore + Send>>>;

#[derive(Clone, Serialize)]
pub struct SourceInfo {
    pub name: String,
    pub community_id: String,
    pub kind: &'static str,
    pub url: String,
    pub enabled: bool,
    pub auto_approve: bool,
}

pub fn list_sources(config: &AppConfig) -> Vec<SourceInfo> {
    config
        .sources
        .iter()
        .map(|source| SourceInfo {
            name: source.name.clone(),
            community_id: source.community_id.clone(),
            kind: source.kind.label(),
            url: source.kind.url().to_string(),
            enabled: source.enabled,
            auto_approve: source.auto_approve,
        })
        .collect()
}

fn build_adapter(source: &SourceConfig, http: &HttpConfig) -> Result<Arc<dyn SourceAdapter>> {
    let adapter: Arc<dyn SourceAdapter> = match &source.kind {
        SourceKind::Ics {
            url,
            use_uid,
            filter_academic,
            base_categories,
            timezone,
            identity_key,
        } => Arc::new(ics_feed::IcsFeedAdapter::new(
            &source.name,
            &source.community_id,
            url,
            *use_uid,
            *filter_academic,
            base_categories.clone(),
            timezone,
            *identity_key,
            http.clone(),
        )?),
        SourceKind::ChipsApi { url, base_url } => Arc::new(chips_api::ChipsApiAdapter::new(
            &source.name,
            &source.community_id,
            url,
            base_url,
            http.clone(),
        )),
        SourceKind::LsuiteHtml { url } => Arc::new(lsuite_html::LsuiteHtmlAdapter::new(
            &source.name,
            &source.community_id,
            url,
            http.clone(),
        )),
    };
    Ok(adapter)
}

#[derive(Clone)]
pub struct RegisteredSource {
    pub adapter: Arc<dyn SourceAdapter>,
    pub policy: SourcePolicy,
}

/// Adapters keyed by source name, in configuration order.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    sources: Vec<RegisteredSource>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>, policy: SourcePolicy) {
        self.sources.push(RegisteredSource { adapter, policy });
    }

    /// Builds every enabled source of the configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let mut registry = Self::new();
        for source in config.sources.iter().filter(|s| s.enabled) {
            let adapter = build_adapter(source, &config.http)?;
            registry.register(adapter, SourcePolicy::new(&source.name, source.auto_approve));
        }
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredSource> {
        self.sources.iter().find(|s| s.adapter.name() == name)
    }

    /// Narrows the registry to the named sources.
    pub fn retain_named(&mut self, names: &[String]) -> Result<()> {
        if let Some(missing) = names.iter().find(|n| self.get(n).is_none()) {
            return Err(anyhow!("unknown or disabled source: {missing}"));
        }
        self.sources
            .retain(|s| names.iter().any(|n| n == s.adapter.name()));
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        self.sources
            .iter()
            .map(|s| s.adapter.name().to_string())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    /// The adapter returned an error.
    Failed,
    Timeout,
    /// The adapter task crashed.
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source: String,
    pub status: RunStatus,
    pub event_count: usize,
    pub skipped: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u128,
    /// A timed-out adapter that ignored cancellation and was left running.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub still_running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persisted: Option<BatchReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub generated_at: DateTime<Utc>,
    pub total_sources: usize,
    pub successful_sources: usize,
    pub total_events: usize,
    pub sources: Vec<SourceReport>,
    pub events: Vec<Event>,
}

impl RunSummary {
    fn from_reports(generated_at: DateTime<Utc>, sources: Vec<SourceReport>, events: Vec<Event>) -> Self {
        Self {
            generated_at,
            total_sources: sources.len(),
            successful_sources: sources
                .iter()
                .filter(|r| r.status == RunStatus::Success)
                .count(),
            total_events: events.len(),
            sources,
            events,
        }
    }

    /// True when sources were attempted and none of them succeeded.
    pub fn all_failed(&self) -> bool {
        self.total_sources > 0 && self.successful_sources == 0
    }
}

/// How long a cancelled adapter gets to wind down before the next source starts.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs adapters one at a time, each under a hard timeout. A timed-out adapter is
/// cancelled and drained before the next one starts.
pub struct Orchestrator {
    registry: AdapterRegistry,
    adapter_timeout: Duration,
    drain_timeout: Duration,
}

impl Orchestrator {
    pub fn new(registry: AdapterRegistry, adapter_timeout: Duration) -> Self {
        Self {
            registry,
            adapter_timeout,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    /// An in-flight request can outlive cancellation by one request timeout.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let drain = Duration::from_secs(config.http.timeout_secs.max(config.http.detail_timeout_secs) + 5);
        Ok(Self::new(
            AdapterRegistry::from_config(config)?,
            Duration::from_secs(config.adapter_timeout_secs),
        )
        .with_drain_timeout(drain))
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut AdapterRegistry {
        &mut self.registry
    }

    /// Fetches and normalizes one source. Never fails; the outcome is in the report.
    pub async fn run_source(&self, source: &RegisteredSource) -> (SourceReport, Vec<Event>) {
        let name = source.adapter.name().to_string();
        let adapter = Arc::clone(&source.adapter);
        let started = Instant::now();
        info!(source = %name, url = %adapter.url(), "running adapter");

        let cancel = CancelFlag::new();
        let task_cancel = cancel.clone();
        let mut task = tokio::task::spawn_blocking(move || {
            let raws = adapter.fetch_raw_events(&task_cancel)?;
            Ok::<_, anyhow::Error>(normalize::normalize_batch(raws, adapter.context()))
        });

        let mut still_running = false;
        let (status, events, skipped, error) = match tokio::time::timeout(self.adapter_timeout, &mut task).await {
            Ok(Ok(Ok((events, skipped)))) => (RunStatus::Success, events, skipped.len(), None),
            Ok(Ok(Err(err))) => {
                error!(source = %name, error = %format!("{err:#}"), "adapter failed");
                (RunStatus::Failed, Vec::new(), 0, Some(format!("{err:#}")))
            }
            Ok(Err(join_err)) => {
                error!(source = %name, error = %join_err, "adapter task crashed");
                (RunStatus::Error, Vec::new(), 0, Some(join_err.to_string()))
            }
            Err(_) => {
                warn!(source = %name, timeout_secs = self.adapter_timeout.as_secs(), "adapter timed out");
                cancel.cancel();
                if tokio::time::timeout(self.drain_timeout, &mut task).await.is_err() {
                    error!(source = %name, "cancelled adapter is still running");
                    still_running = true;
                }
                (
                    RunStatus::Timeout,
                    Vec::new(),
                    0,
                    Some(format!("timed out after {}s", self.adapter_timeout.as_secs())),
                )
            }
        };

        info!(source = %name, ?status, events = events.len(), skipped, "adapter finished");
        let report = SourceReport {
            source: name,
            status,
            event_count: events.len(),
            skipped,
            error,
            duration_ms: started.elapsed().as_millis(),
            still_running,
            persisted: None,
        };
        (report, events)
    }

    /// Scrapes every registered source without touching a store.
    pub async fn run_all(&self) -> RunSummary {
        let mut reports = Vec::new();
        let mut all_events = Vec::new();
        for source in &self.registry.sources {
            let (report, mut events) = self.run_source(source).await;
            reports.push(report);
            all_events.append(&mut events);
        }
        RunSummary::from_reports(Utc::now(), reports, all_events)
    }

    /// Scrapes every source and reconciles each successful batch into `store`
    /// before moving on to the next source.
    pub async fn run_and_reconcile(&self, store: SharedStore, now: DateTime<Utc>) -> RunSummary {
        let mut reports = Vec::new();
        let mut all_events = Vec::new();
        for source in &self.registry.sources {
            let (mut report, events) = self.run_source(source).await;
            if report.status == RunStatus::Success && !events.is_empty() {
                let store = Arc::clone(&store);
                let policy = source.policy.clone();
                let batch = events.clone();
                let persisted = tokio::task::spawn_blocking(move || {
                    let mut guard = store
                        .lock()
                        .map_err(|_| anyhow!("event store lock poisoned"))?;
                    Ok::<_, anyhow::Error>(reconcile::reconcile_batch(&mut **guard, &batch, &policy, now))
                })
                .await;
                match persisted {
                    Ok(Ok(batch_report)) => report.persisted = Some(batch_report),
                    Ok(Err(err)) => {
                        error!(source = %report.source, error = %err, "could not persist batch");
                        report.error = Some(err.to_string());
                    }
                    Err(join_err) => {
                        error!(source = %report.source, error = %join_err, "persist task crashed");
                        report.error = Some(join_err.to_string());
                    }
                }
            }
            reports.push(report);
            all_events.extend(events);
        }
        RunSummary::from_reports(now, reports, all_events)
    }
}
