//! LLM code-generation backend speaking the Gemini `generateContent` wire
//! shape. Produces a filename → content map plus a generated README.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::json;

use crate::gateway::{BackendError, GenerationBackend, GenerationRequest};

pub struct LlmCodegenBackend {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl LlmCodegenBackend {
    pub fn new(api_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    /// One completion round-trip. HTTP 429 and 5xx are transient; other
    /// client errors are rejections.
    async fn complete(&self, prompt: &str) -> Result<String, BackendError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.api_url, self.model, self.api_key
        );
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::transient(format!("model request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let message = format!("model returned HTTP {}: {:.200}", status, text);
            return if status.as_u16() == 429 || status.is_server_error() {
                Err(BackendError::transient(message))
            } else {
                Err(BackendError::rejected(message))
            };
        }

        let payload: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| BackendError::transient(format!("invalid model response body: {}", e)))?;

        extract_text(&payload)
            .ok_or_else(|| BackendError::rejected("model response contained no candidates"))
    }

    fn build_code_prompt(&self, request: &GenerationRequest) -> String {
        let mut prompt = String::from(
            "You are an expert full-stack web developer. Generate a complete, \
             production-ready static web application based on the requirements below.\n\n",
        );
        prompt.push_str("PROJECT REQUIREMENTS:\n");
        prompt.push_str(&request.instruction);
        prompt.push('\n');

        if !request.checks.is_empty() {
            prompt.push_str("\nEVALUATION CRITERIA (ALL must pass):\n");
            for check in &request.checks {
                prompt.push_str("- ");
                prompt.push_str(check);
                prompt.push('\n');
            }
        }

        if request.attachments.is_empty() {
            prompt.push_str("\nATTACHMENTS: None\n");
        } else {
            prompt.push_str("\nATTACHMENTS PROVIDED:\n");
            for attachment in &request.attachments {
                let decoded = attachment.decode();
                prompt.push_str(&format!(
                    "\n--- File: {} (Type: {}) ---\n{}\n--- End of {} ---\n",
                    decoded.name, decoded.mime_type, decoded.content, decoded.name
                ));
            }
        }

        if let Some(prior) = &request.prior_bundle {
            prompt.push_str(
                "\nThis is a REVISION of an existing application. Apply the requirements \
                 above to the current source, preserving behavior that was not asked to \
                 change. CURRENT SOURCE FILES:\n",
            );
            for (name, content) in &prior.files {
                prompt.push_str(&format!("\n--- {} ---\n{}\n", name, content));
            }
        }

        prompt.push_str(
            "\nINSTRUCTIONS:\n\
             1. The main entry point MUST be named 'index.html'.\n\
             2. Static hosting only: no backend code, no build tools; CDN links are allowed.\n\
             3. Generate ALL necessary files (HTML, CSS, JavaScript, JSON, ...).\n\n\
             OUTPUT FORMAT: respond with ONLY a valid JSON object mapping filenames to \
             complete file contents, no additional text.\n",
        );
        prompt
    }

    fn build_readme_prompt(&self, request: &GenerationRequest, files: &BTreeMap<String, String>) -> String {
        let file_list: Vec<&str> = files.keys().map(String::as_str).collect();
        let mut prompt = String::from(
            "Generate a professional README.md for this static web application.\n\n",
        );
        prompt.push_str("PROJECT DESCRIPTION:\n");
        prompt.push_str(&request.instruction);
        prompt.push_str("\n\nFILES IN PROJECT: ");
        prompt.push_str(&file_list.join(", "));
        if !request.checks.is_empty() {
            prompt.push_str("\n\nFEATURES/REQUIREMENTS:\n");
            for check in &request.checks {
                prompt.push_str("- ");
                prompt.push_str(check);
                prompt.push('\n');
            }
        }
        prompt.push_str(
            "\nInclude title, description, features, usage, and technology stack sections. \
             Mention the MIT license. Respond with ONLY the Markdown content.\n",
        );
        prompt
    }
}

#[async_trait]
impl GenerationBackend for LlmCodegenBackend {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<BTreeMap<String, String>, BackendError> {
        let response = self.complete(&self.build_code_prompt(request)).await?;
        let mut files = parse_code_response(&response).map_err(BackendError::rejected)?;
        tracing::info!(files = files.len(), "model produced code files");

        let readme_prompt = self.build_readme_prompt(request, &files);
        let readme = self.complete(&readme_prompt).await?;
        files.insert(
            "README.md".to_string(),
            strip_code_fences(&readme).to_string(),
        );
        Ok(files)
    }
}

/// Pull the concatenated candidate text out of a `generateContent` response.
fn extract_text(payload: &serde_json::Value) -> Option<String> {
    let parts = payload
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();
    if text.is_empty() { None } else { Some(text) }
}

/// Parse the model's code response: a JSON object of filename → content,
/// optionally wrapped in markdown fences. Falls back to extracting a single
/// HTML document when the model ignored the JSON contract.
pub fn parse_code_response(response: &str) -> Result<BTreeMap<String, String>, String> {
    let cleaned = strip_code_fences(response);
    match serde_json::from_str::<BTreeMap<String, String>>(cleaned) {
        Ok(files) => Ok(files),
        Err(json_err) => match extract_html_document(response) {
            Some(html) => {
                let mut files = BTreeMap::new();
                files.insert("index.html".to_string(), html);
                Ok(files)
            }
            None => Err(format!("model response is not a file map: {}", json_err)),
        },
    }
}

/// Strip a leading/trailing markdown code fence, tolerating a language tag.
pub fn strip_code_fences(text: &str) -> &str {
    let mut cleaned = text.trim();
    if let Some(rest) = cleaned.strip_prefix("```") {
        // Drop the language tag line ("json", "markdown", ...) if present.
        cleaned = match rest.split_once('\n') {
            Some((_, body)) => body,
            None => rest,
        };
    }
    if let Some(rest) = cleaned.trim_end().strip_suffix("```") {
        cleaned = rest;
    }
    cleaned.trim()
}

fn extract_html_document(response: &str) -> Option<String> {
    let start = response
        .find("<!DOCTYPE html>")
        .or_else(|| response.find("<html"))?;
    let html = &response[start..];
    let html = match html.rfind("</html>") {
        Some(end) => &html[..end + "</html>".len()],
        None => html,
    };
    Some(html.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json_file_map() {
        let files =
            parse_code_response(r#"{"index.html": "<html></html>", "app.js": "init()"}"#).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files["app.js"], "init()");
    }

    #[test]
    fn parses_fenced_json_with_language_tag() {
        let response = "```json\n{\"index.html\": \"<html></html>\"}\n```";
        let files = parse_code_response(response).unwrap();
        assert_eq!(files["index.html"], "<html></html>");
    }

    #[test]
    fn falls_back_to_single_html_document() {
        let response = "Here is your app:\n<!DOCTYPE html>\n<html><body>hi</body></html>\nEnjoy!";
        let files = parse_code_response(response).unwrap();
        assert_eq!(files.len(), 1);
        let html = &files["index.html"];
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.ends_with("</html>"));
    }

    #[test]
    fn rejects_unparseable_response() {
        assert!(parse_code_response("I cannot help with that.").is_err());
    }

    #[test]
    fn rejects_non_string_file_contents() {
        // A nested object is not a file map; no HTML to fall back to.
        assert!(parse_code_response(r#"{"files": {"index.html": "x"}}"#).is_err());
    }

    #[test]
    fn strips_markdown_fences() {
        assert_eq!(strip_code_fences("```markdown\n# Title\n```"), "# Title");
        assert_eq!(strip_code_fences("```\nplain\n```"), "plain");
        assert_eq!(strip_code_fences("no fences"), "no fences");
    }

    #[test]
    fn extracts_candidate_text() {
        let payload = serde_json::json!({
            "candidates": [{
                "content": { "parts": [{ "text": "hello " }, { "text": "world" }] }
            }]
        });
        assert_eq!(extract_text(&payload).as_deref(), Some("hello world"));
        assert!(extract_text(&serde_json::json!({"candidates": []})).is_none());
    }

    #[test]
    fn code_prompt_includes_revision_context() {
        let backend = LlmCodegenBackend::new("https://api.example.com", "key", "model-1");
        let mut files = BTreeMap::new();
        files.insert("index.html".to_string(), "<html>v1</html>".to_string());
        let request = GenerationRequest {
            instruction: "add dark mode".to_string(),
            checks: vec!["has a toggle".to_string()],
            attachments: vec![],
            prior_bundle: Some(crate::store::Bundle::from_files(files)),
        };
        let prompt = backend.build_code_prompt(&request);
        assert!(prompt.contains("add dark mode"));
        assert!(prompt.contains("has a toggle"));
        assert!(prompt.contains("REVISION"));
        assert!(prompt.contains("<html>v1</html>"));
    }
}
