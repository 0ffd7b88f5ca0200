//! Batch analytics over feedback history and document token usage.
//!
//! Nothing here runs on the request path. [`analyze_feedback`] folds the
//! full feedback directory into per-tool usage counts and token/latency
//! distributions; [`token_report`] sizes up the document set and attaches
//! advisory optimization suggestions. Both write derived JSON reports that
//! the runtime never reads back.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::Serialize;
use tracing::warn;

use crate::budget::content_stats;
use crate::docs::{DocName, DocSet};

// ── Feedback analysis ──────────────────────────────────────────────

/// Token distribution for one tool.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct TokenStats {
    pub total: u64,
    pub avg: f64,
    pub max: u64,
    pub min: u64,
}

/// Latency distribution for one tool.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct LatencyStats {
    pub avg_ms: f64,
    pub max_ms: f64,
    pub min_ms: f64,
}

/// Full-history aggregation of the feedback directory.
#[derive(Serialize, Debug, Clone)]
pub struct FeedbackAnalysis {
    pub analysis_time: String,
    pub total_calls: u64,
    pub tool_usage: HashMap<String, u64>,
    pub token_stats: HashMap<String, TokenStats>,
    pub response_time_stats: HashMap<String, LatencyStats>,
}

#[derive(Serialize, Debug)]
struct PlaceholderAnalysis {
    message: &'static str,
    recommendations: [&'static str; 4],
}

/// Analyze the collected feedback history and write a derived report.
///
/// Scans every JSON file in `feedback_dir` (call records and ratings alike;
/// anything carrying a `tool_name` counts toward usage). When no feedback
/// exists yet, writes a placeholder analysis with starter recommendations
/// instead. Returns the analysis (when produced) and the report path.
pub fn analyze_feedback(
    feedback_dir: &Path,
    analytics_dir: &Path,
) -> Result<(Option<FeedbackAnalysis>, PathBuf), String> {
    std::fs::create_dir_all(analytics_dir)
        .map_err(|e| format!("failed to create analytics dir: {e}"))?;

    let mut tool_usage: HashMap<String, u64> = HashMap::new();
    let mut tokens_by_tool: HashMap<String, Vec<u64>> = HashMap::new();
    let mut latency_by_tool: HashMap<String, Vec<f64>> = HashMap::new();

    if feedback_dir.exists() {
        let entries = std::fs::read_dir(feedback_dir)
            .map_err(|e| format!("failed to read feedback dir: {e}"))?;
        for entry in entries {
            let entry = entry.map_err(|e| format!("failed to read entry: {e}"))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(data) = read_json(&path) else { continue };
            let Some(tool) = data.get("tool_name").and_then(|v| v.as_str()) else {
                continue;
            };

            *tool_usage.entry(tool.to_string()).or_insert(0) += 1;
            if let Some(tokens) = data.get("tokens_used").and_then(|v| v.as_u64()) {
                tokens_by_tool.entry(tool.to_string()).or_default().push(tokens);
            }
            if let Some(ms) = data.get("response_time_ms").and_then(|v| v.as_f64()) {
                latency_by_tool.entry(tool.to_string()).or_default().push(ms);
            }
        }
    }

    if tool_usage.is_empty() {
        let placeholder = PlaceholderAnalysis {
            message: "No feedback data collected yet",
            recommendations: [
                "Start collecting call metrics",
                "Track tool usage patterns",
                "Monitor token consumption",
                "Collect user ratings and comments",
            ],
        };
        let path = analytics_dir.join("feedback_analysis.json");
        write_report(&path, &placeholder)?;
        return Ok((None, path));
    }

    let analysis = FeedbackAnalysis {
        analysis_time: Local::now().to_rfc3339(),
        total_calls: tool_usage.values().sum(),
        tool_usage,
        token_stats: tokens_by_tool
            .into_iter()
            .map(|(tool, tokens)| {
                let total: u64 = tokens.iter().sum();
                (
                    tool,
                    TokenStats {
                        total,
                        avg: total as f64 / tokens.len() as f64,
                        max: tokens.iter().copied().max().unwrap_or(0),
                        min: tokens.iter().copied().min().unwrap_or(0),
                    },
                )
            })
            .collect(),
        response_time_stats: latency_by_tool
            .into_iter()
            .map(|(tool, times)| {
                let sum: f64 = times.iter().sum();
                (
                    tool,
                    LatencyStats {
                        avg_ms: sum / times.len() as f64,
                        max_ms: times.iter().copied().fold(f64::MIN, f64::max),
                        min_ms: times.iter().copied().fold(f64::MAX, f64::min),
                    },
                )
            })
            .collect(),
    };

    let path = analytics_dir.join(format!(
        "feedback_analysis_{}.json",
        Local::now().format("%Y%m%d_%H%M%S")
    ));
    write_report(&path, &analysis)?;
    Ok((Some(analysis), path))
}

// ── Token usage report ─────────────────────────────────────────────

/// Size and structure breakdown for one document.
#[derive(Serialize, Debug, Clone)]
pub struct DocumentReport {
    pub characters: usize,
    pub estimated_tokens: usize,
    pub lines: usize,
    pub avg_tokens_per_line: f64,
    pub optimization_suggestions: Vec<String>,
}

#[derive(Serialize, Debug, Clone)]
pub struct ReportSummary {
    pub total_estimated_tokens: usize,
    pub total_characters: usize,
    pub compression_potential: &'static str,
    pub caching_recommendation: &'static str,
}

/// Advisory report on document token consumption.
#[derive(Serialize, Debug, Clone)]
pub struct TokenReport {
    pub report_time: String,
    pub version: String,
    pub documents: HashMap<String, DocumentReport>,
    pub summary: ReportSummary,
    pub optimization_recommendations: [&'static str; 5],
}

/// Generate the token usage report for a document set and persist it to
/// `reports_dir/token_usage_<timestamp>.json`.
pub fn token_report(
    docs: &DocSet,
    version: &str,
    reports_dir: &Path,
) -> Result<(TokenReport, PathBuf), String> {
    let mut documents = HashMap::new();
    for name in DocName::ALL {
        let content = docs.get(name);
        let stats = content_stats(content);

        let mut suggestions = Vec::new();
        if stats.estimated_tokens > 3000 {
            suggestions.push("Consider splitting into multiple smaller documents".to_string());
        }
        if stats.characters / stats.lines > 200 {
            suggestions.push("Lines are long - consider breaking into paragraphs".to_string());
        }
        let fence_markers = content.matches("```").count();
        if fence_markers > 10 {
            suggestions.push(format!(
                "Many code examples ({}) - consider external references",
                fence_markers / 2
            ));
        }

        documents.insert(
            name.as_str().to_string(),
            DocumentReport {
                characters: stats.characters,
                estimated_tokens: stats.estimated_tokens,
                lines: stats.lines,
                avg_tokens_per_line: stats.estimated_tokens as f64 / stats.lines as f64,
                optimization_suggestions: suggestions,
            },
        );
    }

    let report = TokenReport {
        report_time: Local::now().to_rfc3339(),
        version: version.to_string(),
        summary: ReportSummary {
            total_estimated_tokens: documents.values().map(|d| d.estimated_tokens).sum(),
            total_characters: documents.values().map(|d| d.characters).sum(),
            compression_potential: "Use gzip compression for ~60-70% reduction",
            caching_recommendation: "Enable client-side caching for frequently requested docs",
        },
        documents,
        optimization_recommendations: [
            "Use compressed cache files (json_gz or bincode_gz) for delivery",
            "Implement chunking for large documents",
            "Cache frequently accessed documentation client-side",
            "Consider summarization for overview requests",
            "Use resource URIs for selective loading",
        ],
    };

    std::fs::create_dir_all(reports_dir)
        .map_err(|e| format!("failed to create reports dir: {e}"))?;
    let path = reports_dir.join(format!(
        "token_usage_{}.json",
        Local::now().format("%Y%m%d_%H%M%S")
    ));
    write_report(&path, &report)?;
    Ok((report, path))
}

// ── Helpers ────────────────────────────────────────────────────────

fn read_json(path: &Path) -> Option<serde_json::Value> {
    let json = match std::fs::read_to_string(path) {
        Ok(j) => j,
        Err(e) => {
            warn!("skipping unreadable feedback file at {}: {e}", path.display());
            return None;
        }
    };
    match serde_json::from_str(&json) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("skipping malformed feedback file at {}: {e}", path.display());
            None
        }
    }
}

fn write_report<T: Serialize>(path: &Path, report: &T) -> Result<(), String> {
    let json = serde_json::to_string_pretty(report)
        .map_err(|e| format!("failed to serialize report: {e}"))?;
    std::fs::write(path, json).map_err(|e| format!("failed to write report: {e}"))
}
