//! Generative-text collaborators
//!
//! A [`TextGenerator`] turns a challenge seed into a batch of candidate texts.
//! The OpenAI-compatible client asks a chat model for paragraphs on a theme
//! derived from the seed; the offline generator returns nothing and leaves the
//! pipeline to fill the wave with fallback texts.

use crate::{CandidateText, Error, Result, Seed};
use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, instrument};
use url::Url;

/// Separator the model is asked to put between paragraphs
pub const PARAGRAPH_SEPARATOR: &str = "|||";

/// Tokens requested per candidate
const TOKENS_PER_CANDIDATE: usize = 300;

const SYSTEM_PROMPT: &str = "You are a creative text generator for a mining puzzle. \
    Generate unique, diverse paragraphs. Each paragraph must be between 150 and 800 characters. \
    Output ONLY the paragraphs, one per line, separated by |||. No numbering or extra formatting.";

const THEMES: [&str; 24] = [
    "quantum computing",
    "deep space exploration",
    "neural networks",
    "ancient civilizations",
    "genetic engineering",
    "dark matter",
    "artificial consciousness",
    "blockchain technology",
    "climate science",
    "mathematical theorems",
    "marine biology",
    "astrophysics",
    "cryptographic protocols",
    "evolutionary biology",
    "nanotechnology",
    "philosophical paradoxes",
    "renewable energy",
    "robotics engineering",
    "string theory",
    "synthetic biology",
    "virtual reality",
    "cybersecurity threats",
    "molecular gastronomy",
    "particle physics",
];

/// Source of remote-wave candidate texts
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Produce up to `count` candidates for a challenge seed.
    ///
    /// May return fewer than requested; callers fill the gap.
    async fn generate(&self, seed: &Seed, count: usize) -> Result<Vec<CandidateText>>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Topic for a seed: first four seed bytes, big-endian, modulo the theme list
pub fn theme_for_seed(seed: &Seed) -> &'static str {
    let bytes = seed.as_bytes();
    let number = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    THEMES[number as usize % THEMES.len()]
}

/// Split a model reply into valid candidates, keeping at most `count`
pub fn split_candidates(content: &str, count: usize) -> Vec<CandidateText> {
    content
        .split(PARAGRAPH_SEPARATOR)
        .map(str::trim)
        .filter(|piece| CandidateText::is_valid_len(piece.len()))
        .filter_map(|piece| CandidateText::new(piece.as_bytes().to_vec()).ok())
        .take(count)
        .collect()
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    total_tokens: u64,
}

/// Chat-completions client for any OpenAI-compatible endpoint
pub struct OpenAiGenerator {
    client: Client,
    base_url: Url,
    api_key: String,
    model: String,
    calls: AtomicU64,
    tokens: AtomicU64,
}

impl OpenAiGenerator {
    /// Create a new generator
    pub fn new(
        base_url: impl AsRef<str>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let mut base = base_url.as_ref().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| Error::config(format!("Invalid AI base URL: {}", e)))?;

        let client = ClientBuilder::new().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url,
            api_key: api_key.into(),
            model: model.into(),
            calls: AtomicU64::new(0),
            tokens: AtomicU64::new(0),
        })
    }

    /// Completed API calls
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Tokens consumed across all calls
    pub fn tokens(&self) -> u64 {
        self.tokens.load(Ordering::Relaxed)
    }

    fn request_body(&self, seed: &Seed, count: usize) -> ChatRequest<'_> {
        let theme = theme_for_seed(seed);
        let user_prompt = format!(
            "Generate {} unique paragraphs about \"{}\". Each paragraph should be creative and diverse. \
             Seed: {}. Separate paragraphs with ||| delimiter.",
            count,
            theme,
            seed.short()
        );

        ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user_prompt,
                },
            ],
            temperature: 1.2,
            max_tokens: count * TOKENS_PER_CANDIDATE,
        }
    }
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    #[instrument(skip(self, seed), fields(model = %self.model))]
    async fn generate(&self, seed: &Seed, count: usize) -> Result<Vec<CandidateText>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let url = self
            .base_url
            .join("chat/completions")
            .map_err(|e| Error::generator(format!("Failed to build completions URL: {}", e)))?;

        debug!("Requesting {} candidates from {}", count, url);

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(seed, count))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::timeout("chat/completions")
                } else {
                    Error::from(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::generator(format!("HTTP {}: {}", status, body)));
        }

        let reply: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::generator(format!("Failed to parse completion: {}", e)))?;

        self.calls.fetch_add(1, Ordering::Relaxed);
        if let Some(usage) = &reply.usage {
            self.tokens.fetch_add(usage.total_tokens, Ordering::Relaxed);
        }

        let content = reply
            .choices
            .first()
            .map(|choice| choice.message.content.as_str())
            .unwrap_or_default();
        let candidates = split_candidates(content, count);

        info!(
            "Generated {}/{} candidates ({} calls, {} tokens so far)",
            candidates.len(),
            count,
            self.calls(),
            self.tokens()
        );
        Ok(candidates)
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

/// Generator for runs without an API key
#[derive(Debug, Clone, Default)]
pub struct OfflineGenerator;

#[async_trait]
impl TextGenerator for OfflineGenerator {
    async fn generate(&self, _seed: &Seed, _count: usize) -> Result<Vec<CandidateText>> {
        Ok(Vec::new())
    }

    fn name(&self) -> &'static str {
        "offline"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paragraph(fill: char, len: usize) -> String {
        std::iter::repeat(fill).take(len).collect()
    }

    #[test]
    fn test_theme_from_seed_prefix() {
        let mut bytes = [0u8; 32];
        assert_eq!(theme_for_seed(&Seed(bytes)), "quantum computing");

        bytes[3] = 25;
        assert_eq!(theme_for_seed(&Seed(bytes)), "deep space exploration");

        bytes[3] = 23;
        assert_eq!(theme_for_seed(&Seed(bytes)), "particle physics");
    }

    #[test]
    fn test_split_filters_by_byte_length() {
        let content = format!(
            " {} |||{}|||  {}  |||{}",
            paragraph('a', 150),
            paragraph('b', 99),
            paragraph('c', 1000),
            paragraph('d', 1001)
        );
        let candidates = split_candidates(&content, 10);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].len(), 150);
        assert_eq!(candidates[1].len(), 1000);
    }

    #[test]
    fn test_split_counts_utf8_bytes() {
        // 40 three-byte characters: 120 bytes but only 40 chars
        let content = paragraph('\u{20ac}', 40);
        assert_eq!(split_candidates(&content, 1).len(), 1);
    }

    #[test]
    fn test_split_truncates_to_count() {
        let content = vec![paragraph('x', 200); 5].join(PARAGRAPH_SEPARATOR);
        assert_eq!(split_candidates(&content, 3).len(), 3);
    }

    #[test]
    fn test_request_body() {
        let generator = OpenAiGenerator::new("http://localhost:9/v1", "key", "gpt-4o-mini", Duration::from_secs(1)).unwrap();
        let body = serde_json::to_value(generator.request_body(&Seed([0; 32]), 4)).unwrap();

        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["max_tokens"], 1200);
        assert_eq!(body["messages"][0]["role"], "system");
        let prompt = body["messages"][1]["content"].as_str().unwrap();
        assert!(prompt.contains("Generate 4 unique paragraphs about \"quantum computing\""));
        assert_eq!(generator.base_url.as_str(), "http://localhost:9/v1/");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_an_error() {
        let generator = OpenAiGenerator::new("http://127.0.0.1:9/v1", "key", "m", Duration::from_millis(200)).unwrap();
        assert!(generator.generate(&Seed([1; 32]), 2).await.is_err());
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_offline_generator_is_empty() {
        let candidates = OfflineGenerator.generate(&Seed([1; 32]), 8).await.unwrap();
        assert!(candidates.is_empty());
    }
}
