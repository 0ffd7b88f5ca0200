//! Append-only usage ledger with time-windowed aggregation.
//!
//! Every completed request is recorded as one JSON file in the feedback
//! directory, named by a timestamp with microsecond precision so rapid
//! sequential calls never collide. Records are write-only on the request
//! path: [`record_call`](UsageLedger::record_call) and
//! [`record_rating`](UsageLedger::record_rating) never read existing data
//! and never overwrite. Aggregation ([`summarize`](UsageLedger::summarize))
//! scans the directory, skipping malformed records with a warning.
//!
//! Concurrent writers would need a collision-resistant suffix beyond the
//! sub-second timestamp; requests are handled one at a time, so the current
//! naming is sufficient.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Local};
use serde::{Deserialize, Serialize};
use tracing::warn;

// ── Records ────────────────────────────────────────────────────────

/// One completed request. Immutable once written.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UsageRecord {
    /// ISO-8601 timestamp, set by the ledger at write time.
    pub timestamp: String,
    pub tool_name: String,
    /// Snapshot of the request arguments.
    pub arguments: serde_json::Value,
    /// Response size in characters.
    pub response_size: usize,
    /// Estimated tokens delivered, when known.
    pub tokens_used: Option<usize>,
    /// Request latency in milliseconds, when measured.
    pub response_time_ms: Option<f64>,
    pub success: bool,
    pub error: Option<String>,
    pub metadata: serde_json::Value,
}

impl UsageRecord {
    /// Start a successful record; refine with the builder methods.
    pub fn new(tool_name: impl Into<String>, arguments: serde_json::Value, response_size: usize) -> Self {
        Self {
            timestamp: String::new(),
            tool_name: tool_name.into(),
            arguments,
            response_size,
            tokens_used: None,
            response_time_ms: None,
            success: true,
            error: None,
            metadata: serde_json::json!({}),
        }
    }

    pub fn with_tokens(mut self, tokens: usize) -> Self {
        self.tokens_used = Some(tokens);
        self
    }

    pub fn with_latency_ms(mut self, ms: f64) -> Self {
        self.response_time_ms = Some(ms);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Mark the record as a failed request with an error message.
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }
}

/// One user-submitted quality rating.
///
/// The 1-5 range is expected but not enforced at write time; analysis
/// passes are responsible for discarding out-of-range values if they care.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RatingRecord {
    pub timestamp: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub tool_name: String,
    pub rating: i32,
    pub comment: Option<String>,
    pub helpful: Option<bool>,
    pub metadata: serde_json::Value,
}

/// Aggregated view of recent usage.
#[derive(Serialize, Debug, Clone)]
pub struct UsageSummary {
    pub period_days: u32,
    pub total_calls: u64,
    pub successful_calls: u64,
    /// `0.0` when there are no calls in the window.
    pub success_rate: f64,
    pub total_tokens_used: u64,
    /// `0.0` when there are no calls in the window.
    pub avg_tokens_per_call: f64,
    pub tool_usage: HashMap<String, u64>,
}

// ── Ledger ─────────────────────────────────────────────────────────

/// Writes usage and rating records and aggregates call history.
#[derive(Debug)]
pub struct UsageLedger {
    feedback_dir: PathBuf,
}

impl UsageLedger {
    /// Create a ledger, ensuring the feedback directory exists.
    pub fn new(feedback_dir: impl Into<PathBuf>) -> Result<Self, String> {
        let feedback_dir = feedback_dir.into();
        std::fs::create_dir_all(&feedback_dir)
            .map_err(|e| format!("failed to create feedback dir: {e}"))?;
        Ok(Self { feedback_dir })
    }

    /// The directory records are written to.
    pub fn dir(&self) -> &Path {
        &self.feedback_dir
    }

    /// Persist one call record as `call_<timestamp>.json`.
    ///
    /// Stamps the record with the current time and derives the filename
    /// from the same instant. Never overwrites and never reads back.
    pub fn record_call(&self, mut record: UsageRecord) -> Result<PathBuf, String> {
        let now = Local::now();
        record.timestamp = now.to_rfc3339();
        let path = self
            .feedback_dir
            .join(format!("call_{}.json", now.format("%Y%m%d_%H%M%S_%6f")));
        write_record(&path, &record)?;
        Ok(path)
    }

    /// Persist one rating record as `feedback_<timestamp>.json`.
    pub fn record_rating(
        &self,
        tool_name: impl Into<String>,
        rating: i32,
        comment: Option<String>,
        helpful: Option<bool>,
        metadata: Option<serde_json::Value>,
    ) -> Result<PathBuf, String> {
        let now = Local::now();
        let record = RatingRecord {
            timestamp: now.to_rfc3339(),
            record_type: "user_feedback".to_string(),
            tool_name: tool_name.into(),
            rating,
            comment,
            helpful,
            metadata: metadata.unwrap_or_else(|| serde_json::json!({})),
        };
        let path = self
            .feedback_dir
            .join(format!("feedback_{}.json", now.format("%Y%m%d_%H%M%S_%6f")));
        write_record(&path, &record)?;
        Ok(path)
    }

    /// Aggregate call records from the last `days` days.
    ///
    /// Records older than the window, and files that fail to parse, are
    /// skipped; the latter with a warning.
    pub fn summarize(&self, days: u32) -> Result<UsageSummary, String> {
        let cutoff = Local::now() - Duration::days(i64::from(days));

        let mut total_calls = 0u64;
        let mut successful_calls = 0u64;
        let mut total_tokens = 0u64;
        let mut tool_usage: HashMap<String, u64> = HashMap::new();

        let entries = std::fs::read_dir(&self.feedback_dir)
            .map_err(|e| format!("failed to read feedback dir: {e}"))?;

        for entry in entries {
            let entry = entry.map_err(|e| format!("failed to read entry: {e}"))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with("call_") || !name.ends_with(".json") {
                continue;
            }

            let record = match read_call_record(&entry.path()) {
                Some(r) => r,
                None => continue,
            };

            let Ok(call_time) = DateTime::parse_from_rfc3339(&record.timestamp) else {
                warn!("skipping record with bad timestamp: {}", entry.path().display());
                continue;
            };
            if call_time.with_timezone(&Local) < cutoff {
                continue;
            }

            total_calls += 1;
            if record.success {
                successful_calls += 1;
            }
            if let Some(tokens) = record.tokens_used {
                total_tokens += tokens as u64;
            }
            *tool_usage.entry(record.tool_name).or_insert(0) += 1;
        }

        Ok(UsageSummary {
            period_days: days,
            total_calls,
            successful_calls,
            success_rate: if total_calls > 0 {
                successful_calls as f64 / total_calls as f64
            } else {
                0.0
            },
            total_tokens_used: total_tokens,
            avg_tokens_per_call: if total_calls > 0 {
                total_tokens as f64 / total_calls as f64
            } else {
                0.0
            },
            tool_usage,
        })
    }
}

fn write_record<T: Serialize>(path: &Path, record: &T) -> Result<(), String> {
    let json = serde_json::to_string_pretty(record)
        .map_err(|e| format!("failed to serialize record: {e}"))?;
    std::fs::write(path, json).map_err(|e| format!("failed to write record: {e}"))
}

fn read_call_record(path: &Path) -> Option<UsageRecord> {
    let json = match std::fs::read_to_string(path) {
        Ok(j) => j,
        Err(e) => {
            warn!("skipping unreadable record at {}: {e}", path.display());
            return None;
        }
    };
    match serde_json::from_str(&json) {
        Ok(r) => Some(r),
        Err(e) => {
            warn!("skipping malformed record at {}: {e}", path.display());
            None
        }
    }
}
