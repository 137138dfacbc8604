//! Retained usage events and the dashboard overview built from them.
//!
//! Events live in memory, newest last, capped at `max_events`. Every append
//! rewrites the JSON-lines file so a restart picks up where it left off.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// How far back the recent-events list and CSV export reach.
pub const RECENT_RANGE_HOURS: i64 = 24 * 7;

/// Window for the requests-per-second figure.
pub const RPS_WINDOW_SECONDS: i64 = 300;

#[derive(Debug, Error)]
pub enum MetricsStoreError {
    #[error("failed to write metrics file: {0}")]
    Io(#[from] io::Error),

    #[error("failed to serialize metric event: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One client-reported API call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEvent {
    pub interface: String,
    pub status_code: u16,
    pub latency_ms: f64,
    pub request_bytes: u64,
    #[serde(default)]
    pub tokens: Option<u64>,
    #[serde(default)]
    pub retry_count: u32,
    pub source: String,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub error_reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl MetricEvent {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status_code >= 200 && self.status_code < 300
    }

    #[must_use]
    pub fn to_public(&self) -> PublicEvent {
        PublicEvent {
            timestamp: self.timestamp,
            interface: self.interface.clone(),
            status_code: self.status_code,
            latency_ms: round_to(self.latency_ms, 2),
            request_bytes: self.request_bytes,
            tokens: self.tokens,
            retry_count: self.retry_count,
            source: self.source.clone(),
            request_id: self.request_id.clone(),
            error_reason: self.error_reason.clone(),
        }
    }
}

/// Event as shown to the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PublicEvent {
    pub timestamp: DateTime<Utc>,
    pub interface: String,
    pub status_code: u16,
    pub latency_ms: f64,
    pub request_bytes: u64,
    pub tokens: Option<u64>,
    pub retry_count: u32,
    pub source: String,
    pub request_id: Option<String>,
    pub error_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub count: usize,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub total_tokens: u64,
    pub total_bytes: u64,
    #[serde(rename = "last24h")]
    pub last_24h: usize,
    pub rps: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceStats {
    pub name: String,
    pub count: usize,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub errors: usize,
    /// Event count per source
    pub sources: BTreeMap<String, usize>,
    pub last_status: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SourceStats {
    pub name: String,
    pub count: usize,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
}

/// Events in one clock hour of the last day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TimelineBucket {
    pub bucket: DateTime<Utc>,
    pub count: usize,
    pub failures: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OverviewMeta {
    pub retained: usize,
    pub max_retained: usize,
    pub recent_range_hours: i64,
    pub recent_count: usize,
    pub rps_window_seconds: i64,
}

/// Everything the dashboard shows, computed in one pass over the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct MetricsOverview {
    pub totals: Totals,
    pub interfaces: Vec<InterfaceStats>,
    pub sources: Vec<SourceStats>,
    pub timeline: Vec<TimelineBucket>,
    /// Last 7 days, newest first
    pub recent: Vec<PublicEvent>,
    pub meta: OverviewMeta,
}

/// Bounded, file-backed event log.
#[derive(Debug)]
pub struct MetricsStore {
    path: PathBuf,
    max_events: usize,
    events: Mutex<Vec<MetricEvent>>,
}

impl MetricsStore {
    /// Open the store, loading any events already on disk.
    ///
    /// A missing file starts an empty store. So does an unreadable or
    /// corrupted one: the failure is logged and startup carries on.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>, max_events: usize) -> Self {
        let path = path.into();
        let mut events = load_events(&path);
        if events.len() > max_events {
            events.drain(..events.len() - max_events);
        }
        Self {
            path,
            max_events,
            events: Mutex::new(events),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn max_events(&self) -> usize {
        self.max_events
    }

    // Read paths tolerate a poisoned lock; the event list is always left
    // in a consistent state.
    fn events(&self) -> MutexGuard<'_, Vec<MetricEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events().is_empty()
    }

    /// Append an event, drop the oldest past capacity and persist.
    ///
    /// The event stays in memory even if the write fails.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsStoreError`] if the file cannot be written.
    pub fn add(&self, event: MetricEvent) -> Result<(), MetricsStoreError> {
        let mut events = self.events();
        events.push(event);
        if events.len() > self.max_events {
            let excess = events.len() - self.max_events;
            events.drain(..excess);
        }

        if let Err(e) = self.persist(&events) {
            tracing::error!(path = %self.path.display(), "failed to persist metrics: {e}");
            return Err(e);
        }
        tracing::debug!(total = events.len(), "metric event stored");
        Ok(())
    }

    fn persist(&self, events: &[MetricEvent]) -> Result<(), MetricsStoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut content = String::new();
        for event in events {
            content.push_str(&serde_json::to_string(event)?);
            content.push('\n');
        }

        let tmp = self.path.with_extension("jsonl.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// The newest `limit` events, oldest first.
    #[must_use]
    pub fn list_recent(&self, limit: usize) -> Vec<MetricEvent> {
        let events = self.events();
        events[events.len().saturating_sub(limit)..].to_vec()
    }

    /// Events at or after `since`, oldest first.
    #[must_use]
    pub fn list_since(&self, since: DateTime<Utc>) -> Vec<MetricEvent> {
        self.events()
            .iter()
            .filter(|e| e.timestamp >= since)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn overview(&self) -> MetricsOverview {
        self.overview_at(Utc::now())
    }

    pub(crate) fn overview_at(&self, now: DateTime<Utc>) -> MetricsOverview {
        let events = self.events().clone();
        build_overview(&events, self.max_events, now)
    }
}

fn load_events(path: &Path) -> Vec<MetricEvent> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "metrics file not found, starting empty");
            return Vec::new();
        }
        Err(e) => {
            tracing::error!(path = %path.display(), "failed to read metrics: {e}");
            return Vec::new();
        }
    };

    let parsed: Result<Vec<MetricEvent>, _> = raw
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(serde_json::from_str)
        .collect();

    match parsed {
        Ok(events) => {
            tracing::info!(
                path = %path.display(),
                count = events.len(),
                "loaded retained metric events"
            );
            events
        }
        Err(e) => {
            tracing::error!(path = %path.display(), "corrupted metrics file ignored: {e}");
            Vec::new()
        }
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[allow(clippy::cast_precision_loss)]
fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Nearest-rank 95th percentile of sorted values.
fn p95(sorted: &[f64]) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = sorted.len() * 95 / 100;
    let index = rank.checked_sub(1).unwrap_or(sorted.len() - 1);
    sorted[index]
}

/// Group events by key, keeping groups in first-seen order.
fn group_in_order<'a>(
    events: &'a [MetricEvent],
    key: impl Fn(&MetricEvent) -> &str,
) -> Vec<(&'a str, Vec<&'a MetricEvent>)> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<(&str, Vec<&MetricEvent>)> = Vec::new();
    for event in events {
        let name = key(event);
        match index.get(name) {
            Some(&i) => groups[i].1.push(event),
            None => {
                index.insert(name, groups.len());
                groups.push((name, vec![event]));
            }
        }
    }
    groups
}

#[allow(clippy::cast_precision_loss)]
fn build_overview(events: &[MetricEvent], max_events: usize, now: DateTime<Utc>) -> MetricsOverview {
    let total = events.len();
    let successes = events.iter().filter(|e| e.is_success()).count();
    let latencies: Vec<f64> = events.iter().map(|e| e.latency_ms).collect();

    let day_cutoff = now - Duration::hours(24);
    let recent_cutoff = now - Duration::hours(RECENT_RANGE_HOURS);
    let rps_cutoff = now - Duration::seconds(RPS_WINDOW_SECONDS);

    let last_24h: Vec<&MetricEvent> = events.iter().filter(|e| e.timestamp >= day_cutoff).collect();
    let recent: Vec<&MetricEvent> = events
        .iter()
        .filter(|e| e.timestamp >= recent_cutoff)
        .collect();
    let rps_count = events.iter().filter(|e| e.timestamp >= rps_cutoff).count();

    let interfaces = group_in_order(events, |e| e.interface.as_str())
        .into_iter()
        .map(|(name, group)| {
            let mut sorted: Vec<f64> = group.iter().map(|e| e.latency_ms).collect();
            sorted.sort_by(f64::total_cmp);
            let failures = group.iter().filter(|e| !e.is_success()).count();
            let mut sources = BTreeMap::new();
            for event in &group {
                *sources.entry(event.source.clone()).or_insert(0) += 1;
            }
            InterfaceStats {
                name: name.to_string(),
                count: group.len(),
                success_rate: 1.0 - ratio(failures, group.len()),
                avg_latency_ms: mean(&sorted),
                p95_latency_ms: p95(&sorted),
                errors: failures,
                sources,
                last_status: group.last().map_or(0, |e| e.status_code),
            }
        })
        .collect();

    let sources = group_in_order(events, |e| e.source.as_str())
        .into_iter()
        .map(|(name, group)| {
            let latencies: Vec<f64> = group.iter().map(|e| e.latency_ms).collect();
            let failures = group.iter().filter(|e| !e.is_success()).count();
            SourceStats {
                name: name.to_string(),
                count: group.len(),
                success_rate: 1.0 - ratio(failures, group.len()),
                avg_latency_ms: mean(&latencies),
            }
        })
        .collect();

    let mut buckets: BTreeMap<DateTime<Utc>, (usize, usize)> = BTreeMap::new();
    for event in &last_24h {
        let hour = event
            .timestamp
            .duration_trunc(Duration::hours(1))
            .unwrap_or(event.timestamp);
        let entry = buckets.entry(hour).or_default();
        entry.0 += 1;
        if !event.is_success() {
            entry.1 += 1;
        }
    }
    let timeline = buckets
        .into_iter()
        .map(|(bucket, (count, failures))| TimelineBucket {
            bucket,
            count,
            failures,
        })
        .collect();

    MetricsOverview {
        totals: Totals {
            count: total,
            success_rate: ratio(successes, total),
            avg_latency_ms: round_to(mean(&latencies), 2),
            total_tokens: events.iter().filter_map(|e| e.tokens).sum(),
            total_bytes: events.iter().map(|e| e.request_bytes).sum(),
            last_24h: last_24h.len(),
            rps: round_to(rps_count as f64 / RPS_WINDOW_SECONDS as f64, 3),
        },
        interfaces,
        sources,
        timeline,
        recent: recent.iter().rev().map(|e| e.to_public()).collect(),
        meta: OverviewMeta {
            retained: total,
            max_retained: max_events,
            recent_range_hours: RECENT_RANGE_HOURS,
            recent_count: recent.len(),
            rps_window_seconds: RPS_WINDOW_SECONDS,
        },
    }
}
