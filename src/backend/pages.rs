//! GitHub Pages publication backend: ensures the repository exists, pushes
//! the bundle through the contents API, enables Pages, and returns the
//! public site URL. Every step tolerates "already exists", so republishing
//! is safe.

use async_trait::async_trait;
use base64::Engine as _;
use chrono::{Datelike, Utc};
use serde_json::json;

use crate::gateway::{BackendError, PublicationBackend, PublishRequest};

const GITHUB_API: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("pagesmith/", env!("CARGO_PKG_VERSION"));

pub struct GitHubPagesBackend {
    client: reqwest::Client,
    api_base: String,
    token: String,
    owner: String,
}

impl GitHubPagesBackend {
    pub fn new(token: &str, owner: &str) -> Self {
        Self::with_api_base(GITHUB_API, token, owner)
    }

    /// Point the backend at a different API base (tests, GHE).
    pub fn with_api_base(api_base: &str, token: &str, owner: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
            owner: owner.to_string(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.api_base, path))
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .header("User-Agent", USER_AGENT)
    }

    /// Create the repository if it does not exist yet. An existing repo is
    /// reused for revision rounds.
    async fn ensure_repository(&self, repo: &str) -> Result<(), BackendError> {
        let resp = self
            .request(
                reqwest::Method::GET,
                &format!("/repos/{}/{}", self.owner, repo),
            )
            .send()
            .await
            .map_err(transport)?;

        match resp.status().as_u16() {
            200 => return Ok(()),
            404 => {}
            _ => return Err(classify(resp).await),
        }

        tracing::info!(repo, "creating repository");
        let resp = self
            .request(reqwest::Method::POST, "/user/repos")
            .json(&json!({
                "name": repo,
                "description": "Auto-generated static web application",
                "private": false,
                "auto_init": false,
                "has_wiki": false,
            }))
            .send()
            .await
            .map_err(transport)?;

        // 422 here usually means the repo appeared between GET and POST.
        match resp.status().as_u16() {
            201 | 422 => Ok(()),
            _ => Err(classify(resp).await),
        }
    }

    async fn ensure_license(&self, repo: &str) -> Result<(), BackendError> {
        let path = format!("/repos/{}/{}/contents/LICENSE", self.owner, repo);
        let resp = self
            .request(reqwest::Method::GET, &path)
            .send()
            .await
            .map_err(transport)?;
        if resp.status().as_u16() == 200 {
            return Ok(());
        }
        if resp.status().as_u16() != 404 {
            return Err(classify(resp).await);
        }

        let license = mit_license(Utc::now().year(), &self.owner);
        self.put_file(repo, "LICENSE", &license, "Add MIT License")
            .await
    }

    /// Create or update one file through the contents API. Updating requires
    /// the current blob SHA, fetched first.
    async fn put_file(
        &self,
        repo: &str,
        path: &str,
        content: &str,
        message: &str,
    ) -> Result<(), BackendError> {
        let api_path = format!("/repos/{}/{}/contents/{}", self.owner, repo, path);

        let existing_sha = {
            let resp = self
                .request(reqwest::Method::GET, &api_path)
                .send()
                .await
                .map_err(transport)?;
            if resp.status().as_u16() == 200 {
                let body: serde_json::Value = resp.json().await.map_err(transport)?;
                body.get("sha")
                    .and_then(|s| s.as_str())
                    .map(|s| s.to_string())
            } else {
                None
            }
        };

        let mut body = json!({
            "message": message,
            "content": base64::engine::general_purpose::STANDARD.encode(content),
        });
        if let Some(sha) = existing_sha {
            body["sha"] = json!(sha);
        }

        let resp = self
            .request(reqwest::Method::PUT, &api_path)
            .json(&body)
            .send()
            .await
            .map_err(transport)?;

        match resp.status().as_u16() {
            200 | 201 => Ok(()),
            _ => Err(classify(resp).await),
        }
    }

    async fn ensure_pages(&self, repo: &str) -> Result<(), BackendError> {
        let path = format!("/repos/{}/{}/pages", self.owner, repo);
        let resp = self
            .request(reqwest::Method::GET, &path)
            .send()
            .await
            .map_err(transport)?;
        match resp.status().as_u16() {
            200 => return Ok(()),
            404 => {}
            _ => return Err(classify(resp).await),
        }

        tracing::info!(repo, "enabling GitHub Pages");
        let resp = self
            .request(reqwest::Method::POST, &path)
            .json(&json!({ "source": { "branch": "main", "path": "/" } }))
            .send()
            .await
            .map_err(transport)?;
        // 409 means Pages was already enabled.
        match resp.status().as_u16() {
            201 | 409 => Ok(()),
            _ => Err(classify(resp).await),
        }
    }

    fn pages_url(&self, repo: &str) -> String {
        format!("https://{}.github.io/{}/", self.owner, repo)
    }
}

#[async_trait]
impl PublicationBackend for GitHubPagesBackend {
    async fn publish(&self, request: &PublishRequest) -> Result<String, BackendError> {
        let repo = match &request.target {
            Some(target) => repo_name_from_target(target).ok_or_else(|| {
                BackendError::rejected(format!("invalid publish target: {}", target))
            })?,
            None => slugify(&request.slug, 100),
        };
        if repo.is_empty() {
            return Err(BackendError::rejected("publish target resolves to an empty repository name"));
        }

        self.ensure_repository(&repo).await?;
        self.ensure_license(&repo).await?;

        tracing::info!(repo, files = request.bundle.files.len(), "pushing bundle");
        for (path, content) in &request.bundle.files {
            let message = format!("Publish {} ({:.8})", path, request.bundle.reference);
            self.put_file(&repo, path, content, &message).await?;
        }

        self.ensure_pages(&repo).await?;
        Ok(self.pages_url(&repo))
    }
}

fn transport(e: reqwest::Error) -> BackendError {
    BackendError::transient(format!("GitHub request failed: {}", e))
}

/// Map a non-success GitHub response to a failure classification: rate
/// limits and server errors are transient, everything else is a rejection.
async fn classify(resp: reqwest::Response) -> BackendError {
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    let message = format!("GitHub returned HTTP {}: {:.200}", status, text);
    if status.as_u16() == 429 || status.is_server_error() {
        BackendError::transient(message)
    } else {
        BackendError::rejected(message)
    }
}

/// Extract the repository name from a Pages URL such as
/// `https://owner.github.io/repo/`.
pub fn repo_name_from_target(target: &str) -> Option<String> {
    let rest = target.strip_prefix("https://")?;
    let (host, path) = rest.split_once('/')?;
    if !host.ends_with(".github.io") {
        return None;
    }
    let repo = path.trim_matches('/');
    if repo.is_empty() || repo.contains('/') {
        return None;
    }
    Some(repo.to_string())
}

/// Convert free text to a repository-safe slug, limited to `max_len`.
pub fn slugify(text: &str, max_len: usize) -> String {
    let slug: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if slug.len() > max_len {
        slug[..max_len].trim_end_matches('-').to_string()
    } else {
        slug
    }
}

fn mit_license(year: i32, author: &str) -> String {
    format!(
        "MIT License\n\n\
         Copyright (c) {year} {author}\n\n\
         Permission is hereby granted, free of charge, to any person obtaining a copy\n\
         of this software and associated documentation files (the \"Software\"), to deal\n\
         in the Software without restriction, including without limitation the rights\n\
         to use, copy, modify, merge, publish, distribute, sublicense, and/or sell\n\
         copies of the Software, and to permit persons to whom the Software is\n\
         furnished to do so, subject to the following conditions:\n\n\
         The above copyright notice and this permission notice shall be included in all\n\
         copies or substantial portions of the Software.\n\n\
         THE SOFTWARE IS PROVIDED \"AS IS\", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR\n\
         IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,\n\
         FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE\n\
         AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER\n\
         LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,\n\
         OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE\n\
         SOFTWARE.\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_name_parses_pages_urls() {
        assert_eq!(
            repo_name_from_target("https://octocat.github.io/todo-app/").as_deref(),
            Some("todo-app")
        );
        assert_eq!(
            repo_name_from_target("https://octocat.github.io/todo-app").as_deref(),
            Some("todo-app")
        );
    }

    #[test]
    fn repo_name_rejects_foreign_and_nested_urls() {
        assert!(repo_name_from_target("https://example.com/todo/").is_none());
        assert!(repo_name_from_target("https://octocat.github.io/a/b/").is_none());
        assert!(repo_name_from_target("https://octocat.github.io/").is_none());
        assert!(repo_name_from_target("http://octocat.github.io/todo/").is_none());
    }

    #[test]
    fn slugify_produces_repo_safe_names() {
        assert_eq!(slugify("Build a Todo List App!", 100), "build-a-todo-list-app");
        assert_eq!(slugify("  --weird__input--  ", 100), "weird-input");
        assert_eq!(slugify("a very long name here", 6), "a-very");
    }

    #[test]
    fn mit_license_fills_year_and_author() {
        let license = mit_license(2026, "octocat");
        assert!(license.starts_with("MIT License"));
        assert!(license.contains("Copyright (c) 2026 octocat"));
    }

    #[test]
    fn pages_url_is_derived_from_owner_and_repo() {
        let backend = GitHubPagesBackend::new("ghp_test", "octocat");
        assert_eq!(backend.pages_url("todo"), "https://octocat.github.io/todo/");
    }
}
