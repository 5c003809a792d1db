//! Collaboration platform client
//!
//! The collaboration platform is used two ways: pull-request comments are
//! the asynchronous command channel and, through hidden-state markers, the
//! only persistence the pipeline has. The concrete implementation speaks
//! the GitHub REST API; a development dummy prints instead of posting.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;

use crate::error::{ClientError, Result};
use crate::{handle_empty_response, handle_response};

/// External issue/pull-request system.
///
/// Operations are scoped to a single change request (the issue number the
/// client was created with).
#[async_trait]
pub trait CollabPlatform: Send + Sync {
    /// All comment bodies on the change request, oldest first, across
    /// every page.
    async fn list_comments(&self) -> Result<Vec<String>>;

    /// Post a comment on the change request.
    async fn create_comment(&self, body: &str) -> Result<()>;

    /// Add a label to the change request, removing it from every other
    /// item that currently carries it.
    async fn add_label(&self, label: &str) -> Result<()>;

    /// Whether the base branch has moved since this change branched off.
    async fn is_diverged(&self) -> Result<bool>;

    /// Whether the change request can be merged cleanly.
    async fn is_mergeable(&self) -> Result<bool>;

    /// Merge the change request into its base.
    async fn merge(&self) -> Result<()>;

    /// Close the change request.
    async fn close(&self) -> Result<()>;
}

/// GitHub REST implementation, scoped to one pull request.
#[derive(Debug, Clone)]
pub struct GithubCollab {
    base_url: String,
    owner: String,
    repo: String,
    issue_number: u64,
    token: String,
    client: reqwest::Client,
}

impl GithubCollab {
    pub fn new(
        owner: impl Into<String>,
        repo: impl Into<String>,
        issue_number: u64,
        token: impl Into<String>,
    ) -> Self {
        Self::with_base_url("https://api.github.com", owner, repo, issue_number, token)
    }

    /// Point at a GitHub Enterprise (or test) API root.
    pub fn with_base_url(
        base_url: impl Into<String>,
        owner: impl Into<String>,
        repo: impl Into<String>,
        issue_number: u64,
        token: impl Into<String>,
    ) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            owner: owner.into(),
            repo: repo.into(),
            issue_number,
            token: token.into(),
            client: reqwest::Client::new(),
        }
    }

    fn repo_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.base_url, self.owner, self.repo, path
        )
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "canopy")
    }

    async fn get_pull(&self) -> Result<Value> {
        let url = self.repo_url(&format!("pulls/{}", self.issue_number));
        let response = self.request(self.client.get(&url)).send().await?;
        handle_response(response).await
    }

    async fn ensure_label_exists(&self, label: &str) -> Result<()> {
        let url = self.repo_url(&format!("labels/{label}"));
        let response = self.request(self.client.get(&url)).send().await?;

        if response.status().as_u16() == 404 {
            let create_url = self.repo_url("labels");
            let body = json!({ "name": label, "color": "d73a4a" });
            let response = self
                .request(self.client.post(&create_url))
                .json(&body)
                .send()
                .await?;
            return handle_empty_response(response).await;
        }

        handle_empty_response(response).await
    }
}

#[async_trait]
impl CollabPlatform for GithubCollab {
    async fn list_comments(&self) -> Result<Vec<String>> {
        let mut bodies = Vec::new();
        let mut page = 1;

        loop {
            let url = self.repo_url(&format!(
                "issues/{}/comments?per_page=100&page={page}",
                self.issue_number
            ));
            let response = self.request(self.client.get(&url)).send().await?;
            let comments: Vec<Value> = handle_response(response).await?;

            if comments.is_empty() {
                break;
            }

            bodies.extend(
                comments
                    .iter()
                    .filter_map(|c| c.get("body"))
                    .filter_map(Value::as_str)
                    .map(str::to_string),
            );
            page += 1;
        }

        Ok(bodies)
    }

    async fn create_comment(&self, body: &str) -> Result<()> {
        let url = self.repo_url(&format!("issues/{}/comments", self.issue_number));
        let payload = json!({ "body": body });
        let response = self
            .request(self.client.post(&url))
            .json(&payload)
            .send()
            .await?;
        let _: Value = handle_response(response).await?;
        Ok(())
    }

    async fn add_label(&self, label: &str) -> Result<()> {
        self.ensure_label_exists(label).await?;

        // The label marks "currently deployed from", so it must be unique
        // across the repository: strip it from every other holder first.
        let list_url = self.repo_url(&format!("issues?state=all&labels={label}"));
        let response = self.request(self.client.get(&list_url)).send().await?;
        let holders: Vec<Value> = handle_response(response).await?;

        for holder in holders {
            let Some(number) = holder.get("number").and_then(Value::as_u64) else {
                continue;
            };
            if number == self.issue_number {
                continue;
            }
            let remove_url = self.repo_url(&format!("issues/{number}/labels/{label}"));
            let response = self.request(self.client.delete(&remove_url)).send().await?;
            handle_empty_response(response).await?;
        }

        let add_url = self.repo_url(&format!("issues/{}/labels", self.issue_number));
        let payload = json!({ "labels": [label] });
        let response = self
            .request(self.client.post(&add_url))
            .json(&payload)
            .send()
            .await?;
        let _: Value = handle_response(response).await?;
        Ok(())
    }

    async fn is_diverged(&self) -> Result<bool> {
        let pull = self.get_pull().await?;
        let head = pull
            .pointer("/head/ref")
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::ParseError("pull request missing head.ref".to_string()))?;
        let base = pull
            .pointer("/base/ref")
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::ParseError("pull request missing base.ref".to_string()))?;

        let url = self.repo_url(&format!("compare/{head}...{base}"));
        let response = self.request(self.client.get(&url)).send().await?;
        let comparison: Value = handle_response(response).await?;

        Ok(comparison.get("status").and_then(Value::as_str) == Some("diverged"))
    }

    async fn is_mergeable(&self) -> Result<bool> {
        let pull = self.get_pull().await?;
        Ok(pull.get("mergeable").and_then(Value::as_bool).unwrap_or(false))
    }

    async fn merge(&self) -> Result<()> {
        let url = self.repo_url(&format!("pulls/{}/merge", self.issue_number));
        let response = self.request(self.client.put(&url)).json(&json!({})).send().await?;
        let _: Value = handle_response(response).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let url = self.repo_url(&format!("pulls/{}", self.issue_number));
        let payload = json!({ "state": "closed" });
        let response = self
            .request(self.client.patch(&url))
            .json(&payload)
            .send()
            .await?;
        let _: Value = handle_response(response).await?;
        Ok(())
    }
}

/// Development stand-in: no network, comments go to the log, every gate
/// answers permissively.
#[derive(Debug, Default, Clone)]
pub struct DevCollabPlatform;

#[async_trait]
impl CollabPlatform for DevCollabPlatform {
    async fn list_comments(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn create_comment(&self, body: &str) -> Result<()> {
        info!("[dev comment]\n{body}");
        Ok(())
    }

    async fn add_label(&self, label: &str) -> Result<()> {
        info!("[dev label] {label}");
        Ok(())
    }

    async fn is_diverged(&self) -> Result<bool> {
        Ok(false)
    }

    async fn is_mergeable(&self) -> Result<bool> {
        Ok(true)
    }

    async fn merge(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
