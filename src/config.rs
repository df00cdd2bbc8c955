use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::identity::IdentityKey;
use crate::utils;

pub const DEFAULT_USER_AGENT: &str = "LegalEvents/0.1 (+https://github.com/legal-events/legal-events)";
pub const DEFAULT_TIMEZONE: &str = "America/New_York";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    #[default]
    Sqlite,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    /// Per-request budget for follow-up detail pages.
    pub detail_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 20,
            detail_timeout_secs: 10,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CleanupConfig {
    pub grace_hours: i64,
    pub denied_retention_days: i64,
    pub actor: String,
    pub note: String,
}

pub const MAX_GRACE_HOURS: i64 = 24 * 365;
pub const MAX_DENIED_RETENTION_DAYS: i64 = 3650;

impl CleanupConfig {
    /// Negative windows would place the cutoff in the future and purge upcoming events.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_window("grace_hours", self.grace_hours, MAX_GRACE_HOURS)?;
        check_window("denied_retention_days", self.denied_retention_days, MAX_DENIED_RETENTION_DAYS)
    }
}

fn check_window(field: &'static str, value: i64, max: i64) -> Result<(), ConfigError> {
    if (0..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidCleanup {
            field,
            reason: format!("{value} is outside 0..={max}"),
        })
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            grace_hours: 24,
            denied_retention_days: 7,
            actor: "system@cleanup".to_string(),
            note: "Auto-archived old denied event".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceKind {
    Ics {
        url: String,
        /// Use the feed's UID as the native id instead of hashing.
        #[serde(default)]
        use_uid: bool,
        #[serde(default)]
        filter_academic: bool,
        #[serde(default)]
        base_categories: Vec<String>,
        /// Zone for floating and all-day times.
        #[serde(default = "default_timezone")]
        timezone: String,
        #[serde(default)]
        identity_key: IdentityKey,
    },
    ChipsApi {
        url: String,
        base_url: String,
    },
    LsuiteHtml {
        url: String,
    },
}

impl SourceKind {
    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::Ics { .. } => "ics",
            SourceKind::ChipsApi { .. } => "chips_api",
            SourceKind::LsuiteHtml { .. } => "lsuite_html",
        }
    }

    pub fn url(&self) -> &str {
        match self {
            SourceKind::Ics { url, .. }
            | SourceKind::ChipsApi { url, .. }
            | SourceKind::LsuiteHtml { url } => url,
        }
    }
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceConfig {
    pub name: String,
    pub community_id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// New rows from this source start APPROVED instead of PENDING.
    #[serde(default = "default_true")]
    pub auto_approve: bool,
    pub kind: SourceKind,
}

impl SourceConfig {
    fn ics(name: &str, url: &str, base_categories: &[&str], filter_academic: bool, use_uid: bool) -> Self {
        Self {
            name: name.to_string(),
            community_id: format!("com_{name}"),
            enabled: true,
            auto_approve: true,
            kind: SourceKind::Ics {
                url: url.to_string(),
                use_uid,
                filter_academic,
                base_categories: base_categories.iter().map(|c| c.to_string()).collect(),
                timezone: default_timezone(),
                identity_key: IdentityKey::NameStart,
            },
        }
    }
}

pub fn default_sources() -> Vec<SourceConfig> {
    vec![
        SourceConfig::ics(
            "cuny_law",
            "https://www.law.cuny.edu/events/list/?ical=1",
            &["Law School", "Legal Events", "Academic"],
            true,
            false,
        ),
        SourceConfig::ics(
            "nycla",
            "https://calendar.google.com/calendar/ical/jpui6hg9pql8e0j0566cekscm77cmcju%40import.calendar.google.com/public/basic.ics",
            &["Bar Association", "Legal Events"],
            false,
            true,
        ),
        SourceConfig::ics(
            "columbia_law",
            "https://calendar.google.com/calendar/ical/vqtgi9vnkl88s2n39moish96f5d9v4kc%40import.calendar.google.com/public/basic.ics",
            &["Law School", "Legal Events", "Academic"],
            true,
            true,
        ),
        SourceConfig::ics(
            "hnba",
            "https://tockify.com/api/feeds/ics/hnbacalendar",
            &["Bar Association", "Legal Events"],
            false,
            true,
        ),
        SourceConfig {
            name: "chips".to_string(),
            community_id: "com_chips_network".to_string(),
            enabled: true,
            auto_approve: true,
            kind: SourceKind::ChipsApi {
                url: "https://network.chipsnetwork.org/events.json".to_string(),
                base_url: "https://network.chipsnetwork.org".to_string(),
            },
        },
        SourceConfig {
            name: "lsuite".to_string(),
            community_id: "com_lsuite".to_string(),
            enabled: true,
            auto_approve: true,
            kind: SourceKind::LsuiteHtml {
                url: "https://www.lsuite.co/events".to_string(),
            },
        },
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub store: StoreKind,
    pub database_path: Option<PathBuf>,
    pub json_path: Option<PathBuf>,
    pub http: HttpConfig,
    /// Hard ceiling on one adapter run.
    pub adapter_timeout_secs: u64,
    pub cleanup: CleanupConfig,
    pub sources: Vec<SourceConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store: StoreKind::default(),
            database_path: None,
            json_path: None,
            http: HttpConfig::default(),
            adapter_timeout_secs: 300,
            cleanup: CleanupConfig::default(),
            sources: default_sources(),
        }
    }
}

impl AppConfig {
    /// Reads the config at `path`, or the default location. A missing file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(utils::config_path);
        let config = read_config(&path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cleanup.validate()?;
        let mut seen = HashSet::new();
        for source in &self.sources {
            if !seen.insert(source.name.as_str()) {
                return Err(ConfigError::DuplicateSource(source.name.clone()));
            }
            let invalid = |reason: &str| ConfigError::InvalidSource {
                name: source.name.clone(),
                reason: reason.to_string(),
            };
            if source.name.trim().is_empty() {
                return Err(invalid("name is empty"));
            }
            if source.community_id.trim().is_empty() {
                return Err(invalid("community_id is empty"));
            }
            if reqwest::Url::parse(source.kind.url()).is_err() {
                return Err(invalid("url is not absolute"));
            }
            if let SourceKind::Ics { timezone, .. } = &source.kind {
                if timezone.parse::<Tz>().is_err() {
                    return Err(invalid("unknown timezone"));
                }
            }
        }
        Ok(())
    }

    pub fn source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.name == name)
    }
}

pub fn read_config(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    Ok(serde_json::from_str(&contents)?)
}

pub fn write_config(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    utils::ensure_parent(path);
    let contents = serde_json::to_string_pretty(config)?;
    fs::write(path, contents).map_err(|source| ConfigError::Write {
        path: path.display().to_string(),
        source,
    })
}
