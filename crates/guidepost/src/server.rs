//! Tool dispatch and the response pipeline.
//!
//! [`GuidelinesServer`] owns every piece of per-process state: the config,
//! the memoizing document store, the cache store, the usage ledger, and the
//! optional guidance client. A request flows through one pipeline: resolve
//! content (cache first, raw file fallback), apply the response token
//! ceiling, record the call, return `(text, success)`. Ledger writes are
//! best effort; a failed write degrades to a warning and never fails the
//! request that produced it.

use std::time::Instant;

use serde_json::Value;
use tracing::warn;

use crate::budget::estimate_tokens;
use crate::cache::{CacheInfo, CacheManifest, CacheStore};
use crate::config::Config;
use crate::docs::{DocName, DocumentStore};
use crate::guidance;
use crate::ledger::{UsageLedger, UsageRecord, UsageSummary};
use crate::truncate::optimize_content;
use crate::GuidanceClient;

const GUIDANCE_UNAVAILABLE: &str = "\
AI guidance is not available. Please set the OPENROUTER_KEY environment variable \
to enable AI-powered custom guidance. In the meantime, you can use the other tools \
(get_coding_rules, get_development_skills, get_steering_instructions) to access \
the documentation directly.";

/// What a tool call hands back to the dispatch shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResponse {
    pub text: String,
    pub success: bool,
}

impl ToolResponse {
    fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            success: true,
        }
    }

    fn failure(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            success: false,
        }
    }
}

/// The development guidelines server.
pub struct GuidelinesServer {
    config: Config,
    docs: DocumentStore,
    cache: CacheStore,
    ledger: UsageLedger,
    guidance: Option<GuidanceClient>,
}

impl GuidelinesServer {
    /// Build a server from configuration, without a guidance client.
    pub fn new(config: Config) -> Result<Self, String> {
        let cache = CacheStore::new(&config.storage.cache_dir);
        let ledger = UsageLedger::new(&config.storage.feedback_dir)?;
        Ok(Self {
            config,
            docs: DocumentStore::new(),
            cache,
            ledger,
            guidance: None,
        })
    }

    /// Attach a guidance client.
    pub fn with_guidance(mut self, client: GuidanceClient) -> Self {
        self.guidance = Some(client);
        self
    }

    /// Attach a guidance client from the environment, when a key is set.
    ///
    /// Without a key the server still serves every direct document tool;
    /// only `get_custom_guidance` degrades to an explanatory response.
    pub fn with_guidance_from_env(mut self) -> Result<Self, String> {
        match GuidanceClient::from_env()? {
            Some(client) => self.guidance = Some(client),
            None => warn!("OPENROUTER_KEY not set, get_custom_guidance will be degraded"),
        }
        Ok(self)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ── Dispatch ───────────────────────────────────────────────────

    /// Handle one `(tool_name, arguments)` request.
    pub async fn handle(&mut self, tool_name: &str, arguments: &Value) -> ToolResponse {
        match tool_name {
            "get_coding_rules" => self.serve_document(DocName::Rules, tool_name, arguments),
            "get_development_skills" => {
                self.serve_document(DocName::Skills, tool_name, arguments)
            }
            "get_steering_instructions" => {
                self.serve_document(DocName::Steering, tool_name, arguments)
            }
            "get_custom_guidance" => self.serve_guidance(arguments).await,
            other => {
                let response = ToolResponse::failure(format!("Unknown tool: {other}"));
                self.record(other, arguments, &response, None);
                response
            }
        }
    }

    /// Deliver one document: cache first, raw file fallback, then the
    /// response token ceiling.
    fn serve_document(&mut self, name: DocName, tool_name: &str, arguments: &Value) -> ToolResponse {
        let start = Instant::now();

        let format = self.cache.optimal_format();
        let content = match self.cache.get_document(name, format) {
            Some(cached) => cached,
            None => match self.docs.load_named(name, &self.config) {
                Ok(raw) => raw,
                Err(e) => {
                    let response = ToolResponse::failure(e);
                    self.record(tool_name, arguments, &response, Some(start));
                    return response;
                }
            },
        };

        let text = optimize_content(&content, self.config.optimization.max_response_tokens);
        let response = ToolResponse::ok(text);
        self.record(tool_name, arguments, &response, Some(start));
        response
    }

    async fn serve_guidance(&mut self, arguments: &Value) -> ToolResponse {
        let start = Instant::now();

        let query = arguments.get("query").and_then(Value::as_str).unwrap_or("");
        if query.is_empty() {
            let response = ToolResponse::failure("Error: 'query' parameter is required");
            self.record("get_custom_guidance", arguments, &response, Some(start));
            return response;
        }

        let Some(client) = &self.guidance else {
            // Degraded, not broken: the caller gets an actionable answer.
            let response = ToolResponse::ok(GUIDANCE_UNAVAILABLE);
            self.record("get_custom_guidance", arguments, &response, Some(start));
            return response;
        };

        let docs = match self.docs.load_all(&self.config) {
            Ok(docs) => docs,
            Err(e) => {
                let response = ToolResponse::failure(e);
                self.record("get_custom_guidance", arguments, &response, Some(start));
                return response;
            }
        };

        let context = arguments.get("context").and_then(Value::as_str);
        let response = match guidance::custom_guidance(
            client,
            &self.config.guidance,
            query,
            &docs,
            context,
        )
        .await
        {
            Ok(text) => ToolResponse::ok(text),
            Err(e) => ToolResponse::failure(format!("Error generating custom guidance: {e}")),
        };
        self.record("get_custom_guidance", arguments, &response, Some(start));
        response
    }

    /// Best-effort ledger write. A request never fails because its record
    /// could not be persisted.
    fn record(
        &self,
        tool_name: &str,
        arguments: &Value,
        response: &ToolResponse,
        start: Option<Instant>,
    ) {
        let mut record = UsageRecord::new(tool_name, arguments.clone(), response.text.len())
            .with_tokens(estimate_tokens(&response.text));
        if let Some(start) = start {
            record = record.with_latency_ms(start.elapsed().as_secs_f64() * 1000.0);
        }
        if !response.success {
            record = record.failed(response.text.clone());
        }
        if let Err(e) = self.ledger.record_call(record) {
            warn!("failed to record usage for {tool_name}: {e}");
        }
    }

    // ── Maintenance operations ─────────────────────────────────────

    /// Rebuild the compressed cache from the documents on disk.
    pub fn build_cache(&mut self) -> Result<CacheManifest, String> {
        let docs = self.docs.load_all(&self.config)?;
        let version = self.config.server.version.clone();
        self.cache.build(&docs, &version)
    }

    /// Describe the current cache.
    pub fn cache_info(&mut self) -> CacheInfo {
        self.cache.cache_info()
    }

    /// Aggregate recent usage.
    pub fn usage_summary(&self, days: u32) -> Result<UsageSummary, String> {
        self.ledger.summarize(days)
    }

    /// Record a user rating for a tool.
    pub fn rate(
        &self,
        tool_name: &str,
        rating: i32,
        comment: Option<String>,
        helpful: Option<bool>,
    ) -> Result<(), String> {
        self.ledger.record_rating(tool_name, rating, comment, helpful, None)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::Path;

    fn test_config(root: &Path) -> Config {
        let docs_dir = root.join("docs");
        std::fs::create_dir_all(&docs_dir).unwrap();
        std::fs::write(docs_dir.join("rules.md"), "# Rules\n\n- handle errors\n").unwrap();
        std::fs::write(docs_dir.join("skills.md"), "# Skills\n\n- debug first\n").unwrap();
        std::fs::write(docs_dir.join("steering.md"), "# Steering\n\n- plan ahead\n").unwrap();

        let mut config = Config::default();
        config.documentation.rules_path = docs_dir.join("rules.md");
        config.documentation.skills_path = docs_dir.join("skills.md");
        config.documentation.steering_path = docs_dir.join("steering.md");
        config.storage.cache_dir = root.join("cache");
        config.storage.feedback_dir = root.join("feedback");
        config.storage.analytics_dir = root.join("analytics");
        config.storage.reports_dir = root.join("reports");
        config
    }

    fn call_files(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .starts_with("call_")
            })
            .count()
    }

    #[tokio::test]
    async fn serves_document_from_file_and_records_call() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let feedback_dir = config.storage.feedback_dir.clone();
        let mut server = GuidelinesServer::new(config).unwrap();

        let response = server.handle("get_coding_rules", &json!({})).await;
        assert!(response.success);
        assert!(response.text.contains("# Rules"));
        assert_eq!(call_files(&feedback_dir), 1);
    }

    #[tokio::test]
    async fn missing_document_fails_and_still_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.documentation.skills_path = dir.path().join("nope.md");
        let feedback_dir = config.storage.feedback_dir.clone();
        let mut server = GuidelinesServer::new(config).unwrap();

        let response = server.handle("get_development_skills", &json!({})).await;
        assert!(!response.success);
        assert!(response.text.contains("not found"));

        assert_eq!(call_files(&feedback_dir), 1);
        let summary = server.usage_summary(7).unwrap();
        assert_eq!(summary.total_calls, 1);
        assert_eq!(summary.successful_calls, 0);
    }

    #[tokio::test]
    async fn response_token_ceiling_shrinks_oversized_documents() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        let original = "Hello world. ".repeat(200);
        std::fs::write(&config.documentation.rules_path, &original).unwrap();
        config.optimization.max_response_tokens = Some(50);
        let mut server = GuidelinesServer::new(config).unwrap();

        let response = server.handle("get_coding_rules", &json!({})).await;
        assert!(response.success);
        assert!(estimate_tokens(&response.text) <= 50);
        assert!(response.text.len() < original.len());
        assert!(response
            .text
            .ends_with("... (content truncated for token optimization)"));
    }

    #[tokio::test]
    async fn multiline_documents_shrink_toward_the_ceiling() {
        // The ceiling is applied through a line-count ratio, so whole-line
        // selection plus the truncation notice can overshoot slightly; the
        // guarantee is a large reduction, not an exact bound.
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        let original = "Prose line that repeats over and over again.\n".repeat(100);
        std::fs::write(&config.documentation.rules_path, &original).unwrap();
        config.optimization.max_response_tokens = Some(50);
        let mut server = GuidelinesServer::new(config).unwrap();

        let response = server.handle("get_coding_rules", &json!({})).await;
        assert!(response.success);
        assert!(estimate_tokens(&response.text) < estimate_tokens(&original) / 2);
    }

    #[tokio::test]
    async fn prebuilt_cache_takes_priority_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let rules_path = config.documentation.rules_path.clone();
        let mut server = GuidelinesServer::new(config).unwrap();
        server.build_cache().unwrap();

        // Change the file after the build; the cache copy is served.
        std::fs::write(&rules_path, "# Changed on disk\n").unwrap();
        let response = server.handle("get_coding_rules", &json!({})).await;
        assert!(response.success);
        assert!(response.text.contains("handle errors"));
        assert!(!response.text.contains("Changed on disk"));
    }

    #[tokio::test]
    async fn guidance_degrades_without_a_client() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = GuidelinesServer::new(test_config(dir.path())).unwrap();

        let response = server
            .handle("get_custom_guidance", &json!({"query": "how do I test?"}))
            .await;
        assert!(response.success);
        assert!(response.text.contains("OPENROUTER_KEY"));
        assert!(response.text.contains("get_coding_rules"));
    }

    #[tokio::test]
    async fn guidance_requires_a_query() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = GuidelinesServer::new(test_config(dir.path())).unwrap();

        let response = server.handle("get_custom_guidance", &json!({})).await;
        assert!(!response.success);
        assert_eq!(response.text, "Error: 'query' parameter is required");

        let empty = server.handle("get_custom_guidance", &json!({"query": ""})).await;
        assert!(!empty.success);
    }

    #[tokio::test]
    async fn unknown_tool_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = GuidelinesServer::new(test_config(dir.path())).unwrap();

        let response = server.handle("get_everything", &json!({})).await;
        assert!(!response.success);
        assert_eq!(response.text, "Unknown tool: get_everything");
    }

    #[tokio::test]
    async fn build_cache_then_cache_info() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = GuidelinesServer::new(test_config(dir.path())).unwrap();

        assert!(!server.cache_info().available);
        server.build_cache().unwrap();
        let info = server.cache_info();
        assert!(info.available);
        assert_eq!(info.formats.len(), 4);
    }

    #[tokio::test]
    async fn rate_writes_a_feedback_record() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let feedback_dir = config.storage.feedback_dir.clone();
        let server = GuidelinesServer::new(config).unwrap();

        server
            .rate("get_coding_rules", 5, Some("useful".into()), Some(true))
            .unwrap();
        let ratings = std::fs::read_dir(&feedback_dir)
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .starts_with("feedback_")
            })
            .count();
        assert_eq!(ratings, 1);
    }
}
