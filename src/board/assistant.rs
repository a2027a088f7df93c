use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::models::{Issue, Label, Project};

/// Fixed instruction sent with every assistant request.
pub const SYSTEM_PROMPT: &str = "You are helpful assistant which gives output on the basis of the input and context provided by the user. Give the output in plain text without any markdown.";

/// Abstraction over the text-generation backend.
/// Real implementation: `HttpTextGenerator`. Tests plug in canned doubles.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, system: &str, prompt: &str) -> Result<String>;
}

fn label_or_none(label: Option<Label>) -> &'static str {
    label.map(|l| l.as_str()).unwrap_or("none")
}

/// Build the prompt: every issue and project of the workspace as context,
/// followed by the user's question.
pub fn build_prompt(issues: &[Issue], projects: &[Project], prompt: &str) -> String {
    let issues = issues
        .iter()
        .map(|i| {
            format!(
                "{} with status {}, label {} and created by {}",
                i.title,
                i.status.as_str(),
                label_or_none(i.label),
                i.owner_id
            )
        })
        .collect::<Vec<_>>()
        .join(", ");
    let projects = projects
        .iter()
        .map(|p| {
            format!(
                "{} with status {}, label {}, summary {} and created by {}",
                p.title,
                p.status.as_str(),
                label_or_none(p.label),
                p.summary,
                p.owner_id
            )
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "All the issues in the workspace are: {} and all the projects in the workspace are: {}. \
         Answer the prompt on the basis of the issues and the projects provided. Prompt: {}",
        issues, projects, prompt
    )
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    system: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    text: String,
}

/// Posts `{model, system, prompt}` to a JSON endpoint and reads `{text}`.
pub struct HttpTextGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpTextGenerator {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
            api_key,
        }
    }
}

#[async_trait]
impl TextGenerator for HttpTextGenerator {
    async fn generate(&self, system: &str, prompt: &str) -> Result<String> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("User-Agent", "linboard")
            .json(&GenerateRequest {
                model: &self.model,
                system,
                prompt,
            });
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }
        let resp: GenerateResponse = request
            .send()
            .await
            .context("Failed to send request to assistant endpoint")?
            .error_for_status()
            .context("Assistant endpoint returned error status")?
            .json()
            .await
            .context("Failed to parse assistant response")?;
        Ok(resp.text)
    }
}
