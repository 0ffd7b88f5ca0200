//! Guidance prompt assembly and query classification.
//!
//! Free-form guidance hands the full document set plus the agent's query to
//! the chat completions API and returns whatever it says. Classification is
//! a cheap preprocessing call that decides which documents a request needs;
//! it fails open, so any transport or parse failure selects everything.

use serde::Deserialize;
use tracing::warn;

use crate::config::GuidanceConfig;
use crate::docs::DocSet;
use crate::{ChatRequest, GuidanceClient, Message};

const GUIDANCE_SYSTEM_PROMPT: &str = "\
You are an expert software engineering advisor. Your role is to provide \
professional development guidance to AI agents assisting with coding tasks.

You have access to three comprehensive documentation sources:
1. Professional coding rules and standards
2. Development skills and best practices
3. AI agent steering instructions

Based on the agent's query, select the most relevant information from these sources and create
a focused, actionable response. Combine insights from multiple sources when appropriate.

Provide clear, professional guidance that helps the agent write production-quality code.
Be specific and practical. Include code examples when helpful.";

const CLASSIFY_SYSTEM_PROMPT: &str = "\
You are analyzing an AI agent's development request to determine which \
types of documentation would be most helpful. You must respond with ONLY a JSON object containing \
three boolean fields: rules, skills, and steering.

- rules: true if the request involves coding standards, security, testing, or code quality
- skills: true if the request involves problem-solving, debugging, architecture, or methodology
- steering: true if the request involves decision-making, planning, or context awareness

Respond ONLY with valid JSON, nothing else.";

/// Assemble the guidance user prompt: the query, optional situational
/// context, and all three documents in labelled sections.
pub fn build_guidance_prompt(query: &str, docs: &DocSet, context: Option<&str>) -> String {
    let context_section = context
        .map(|c| format!("\n\nAdditional Context: {c}"))
        .unwrap_or_default();

    format!(
        "Agent Query: {query}{context_section}\n\n\
         Available Documentation:\n\n\
         === PROFESSIONAL CODING RULES ===\n{rules}\n\n\
         === DEVELOPMENT SKILLS & PRACTICES ===\n{skills}\n\n\
         === AI STEERING INSTRUCTIONS ===\n{steering}\n\n\
         Based on the agent's query and the documentation above, provide targeted guidance that will help\n\
         the agent accomplish their task professionally and effectively. Focus on the most relevant parts\n\
         of the documentation for this specific situation.",
        rules = docs.rules,
        skills = docs.skills,
        steering = docs.steering,
    )
}

/// Generate guidance tailored to a query, grounded in the document set.
pub async fn custom_guidance(
    client: &GuidanceClient,
    config: &GuidanceConfig,
    query: &str,
    docs: &DocSet,
    context: Option<&str>,
) -> Result<String, String> {
    let body = ChatRequest {
        model: Some(config.model.clone()),
        messages: vec![
            Message::system(GUIDANCE_SYSTEM_PROMPT),
            Message::user(build_guidance_prompt(query, docs, context)),
        ],
        max_tokens: config.max_tokens,
        temperature: config.temperature,
    };

    let completion = client.chat(&body).await?;
    completion
        .content
        .ok_or_else(|| "Empty guidance response".to_string())
}

/// Which documents a request needs. Defaults to everything.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct DocSelection {
    pub rules: bool,
    pub skills: bool,
    pub steering: bool,
}

impl Default for DocSelection {
    fn default() -> Self {
        Self {
            rules: true,
            skills: true,
            steering: true,
        }
    }
}

/// Decide which documents a request description calls for.
///
/// Fails open: any transport failure, empty response, or unparsable JSON
/// yields the full selection. A wrong classification only costs tokens, so
/// over-delivering is always the safe answer.
pub async fn classify_query(
    client: &GuidanceClient,
    config: &GuidanceConfig,
    description: &str,
) -> DocSelection {
    let user_prompt = format!(
        "Analyze this request and determine which documentation types are needed:\n\n\
         Request: {description}\n\n\
         Respond with JSON only: {{\"rules\": true/false, \"skills\": true/false, \"steering\": true/false}}"
    );

    let body = ChatRequest {
        model: Some(config.model.clone()),
        messages: vec![
            Message::system(CLASSIFY_SYSTEM_PROMPT),
            Message::user(user_prompt),
        ],
        max_tokens: 100,
        temperature: 0.0,
    };

    let content = match client.chat(&body).await {
        Ok(completion) => completion.content,
        Err(e) => {
            warn!("classification call failed, selecting all documents: {e}");
            return DocSelection::default();
        }
    };

    content
        .as_deref()
        .and_then(parse_selection)
        .unwrap_or_default()
}

fn parse_selection(text: &str) -> Option<DocSelection> {
    match serde_json::from_str(text.trim()) {
        Ok(selection) => Some(selection),
        Err(e) => {
            warn!("unparsable classification response, selecting all documents: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_docs() -> DocSet {
        DocSet {
            rules: "# Rules\nAlways handle errors.".into(),
            skills: "# Skills\nDebug systematically.".into(),
            steering: "# Steering\nPlan before acting.".into(),
        }
    }

    #[test]
    fn prompt_contains_query_and_all_sections() {
        let prompt = build_guidance_prompt("How do I test async code?", &sample_docs(), None);
        assert!(prompt.starts_with("Agent Query: How do I test async code?"));
        assert!(prompt.contains("=== PROFESSIONAL CODING RULES ==="));
        assert!(prompt.contains("Always handle errors."));
        assert!(prompt.contains("=== DEVELOPMENT SKILLS & PRACTICES ==="));
        assert!(prompt.contains("=== AI STEERING INSTRUCTIONS ==="));
        assert!(!prompt.contains("Additional Context:"));
    }

    #[test]
    fn prompt_includes_context_when_present() {
        let prompt = build_guidance_prompt("q", &sample_docs(), Some("working in a monorepo"));
        assert!(prompt.contains("Additional Context: working in a monorepo"));
    }

    #[test]
    fn selection_parses_explicit_booleans() {
        let sel = parse_selection(r#"{"rules": true, "skills": false, "steering": false}"#).unwrap();
        assert!(sel.rules);
        assert!(!sel.skills);
        assert!(!sel.steering);
    }

    #[test]
    fn selection_missing_fields_default_to_true() {
        let sel = parse_selection(r#"{"skills": false}"#).unwrap();
        assert!(sel.rules);
        assert!(!sel.skills);
        assert!(sel.steering);
    }

    #[test]
    fn selection_tolerates_surrounding_whitespace() {
        let sel = parse_selection("  {\"rules\": false}\n").unwrap();
        assert!(!sel.rules);
    }

    #[test]
    fn garbage_response_yields_no_selection() {
        assert!(parse_selection("I think you need the rules document.").is_none());
        assert!(parse_selection("").is_none());
    }
}
