//! Free-text generation provider (Ollama-style /api/generate endpoint).
//! Produces a short description and suggested tags from the book title.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{BookMetadata, MetadataProvider};
use crate::config::ProvidersConfig;
use crate::models::Book;

pub struct GenerativeClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    max_tokens: usize,
    temperature: f64,
}

#[derive(Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f64,
    num_predict: usize,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

impl GenerativeClient {
    pub fn new(cfg: &ProvidersConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: cfg.generator_url.trim_end_matches('/').to_string(),
            model: cfg.generator_model.clone(),
            max_tokens: cfg.generator_max_tokens,
            temperature: cfg.generator_temperature,
        })
    }

    async fn generate(&self, prompt: String) -> anyhow::Result<String> {
        let body = GenerateRequest {
            model: self.model.clone(),
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: self.temperature,
                num_predict: self.max_tokens,
            },
        };

        let resp = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            anyhow::bail!("generator returned status {}", resp.status());
        }

        let result: GenerateResponse = resp.json().await?;
        Ok(result.response.trim().to_string())
    }

    async fn describe(&self, title: &str) -> anyhow::Result<String> {
        let prompt = format!(
            "Write a neutral two-sentence bookstore description for the book titled \"{}\". \
             Reply ONLY with the description.",
            title
        );
        self.generate(prompt).await
    }

    async fn suggest_tags(&self, title: &str) -> anyhow::Result<Vec<String>> {
        let prompt = format!(
            "Suggest up to 5 short topic tags for the book titled \"{}\". \
             Reply ONLY with the tags, comma-separated.",
            title
        );
        let raw = self.generate(prompt).await?;
        Ok(parse_tags(&raw))
    }
}

/// Split a comma/newline-separated tag list, dropping empties.
fn parse_tags(raw: &str) -> Vec<String> {
    raw.split(|c| c == ',' || c == '\n')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

#[async_trait]
impl MetadataProvider for GenerativeClient {
    fn name(&self) -> &'static str {
        "generator"
    }

    fn suggests_tags(&self) -> bool {
        true
    }

    async fn fetch(&self, book: &Book) -> Option<BookMetadata> {
        // Skip the expensive generation call for fields that are already set.
        let description = if book.description.as_deref().unwrap_or("").trim().is_empty() {
            match self.describe(&book.title).await {
                Ok(text) if !text.is_empty() => Some(text),
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!(provider = self.name(), book_id = book.id, error = %e,
                        "description generation failed, treating as no data");
                    None
                }
            }
        } else {
            None
        };

        let tags = match self.suggest_tags(&book.title).await {
            Ok(tags) => tags,
            Err(e) => {
                tracing::warn!(provider = self.name(), book_id = book.id, error = %e,
                    "tag generation failed, treating as no data");
                Vec::new()
            }
        };

        let meta = BookMetadata {
            description,
            tags,
            ..Default::default()
        };

        if meta.is_empty() {
            None
        } else {
            Some(meta)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::parse_tags;

    #[test]
    fn tags_split_on_commas_and_newlines() {
        assert_eq!(
            parse_tags("소설, 한국문학\n베스트셀러, "),
            vec!["소설", "한국문학", "베스트셀러"]
        );
        assert!(parse_tags("  \n").is_empty());
    }
}
