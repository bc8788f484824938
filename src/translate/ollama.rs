use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::TranslateConfig;
use crate::error::{Result, SubqueueError};
use super::{Translator, language_code_to_name};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationResponse {
    pub response: String,
    pub done: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationResult {
    pub text: String,
}

/// Ollama-backed translator
pub struct OllamaTranslator {
    client: Client,
    config: TranslateConfig,
}

impl OllamaTranslator {
    pub fn new(config: TranslateConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self { client, config })
    }

    /// Build translation prompt, asking for JSON output
    fn build_prompt(&self, text: &str, source_lang: &str, target_lang: &str) -> String {
        let target_name = language_code_to_name(target_lang);
        let source_hint = if source_lang.is_empty() || source_lang == "auto" {
            String::new()
        } else {
            format!("The source language is {}.\n", language_code_to_name(source_lang))
        };

        format!(
            "You are a professional subtitle translator.\n\
             \n\
             CRITICAL: You must translate the text to {} ONLY. Do not translate to any other language.\n\
             {}\
             The target language is: {} (language code: {})\n\
             \n\
             Return ONLY the translation in JSON format as {{\"text\":\"your {} translation here\"}}.\n\
             Do not include any explanations, alternatives, or text in other languages.\n\
             \n\
             Text to translate: \"{}\"\n",
            target_name, source_hint, target_name, target_lang, target_name, text
        )
    }
}

/// Pull the translated text out of Ollama's `response` field
pub fn extract_translation(raw_response: &str) -> Result<String> {
    let raw = raw_response.trim();
    if raw.is_empty() {
        return Err(SubqueueError::Translation("Empty translation received".to_string()));
    }

    let result: TranslationResult = serde_json::from_str(raw)
        .map_err(|e| SubqueueError::Translation(format!("Malformed translation JSON: {}", e)))?;

    let text = result.text.trim();
    if text.is_empty() {
        return Err(SubqueueError::Translation("Empty translation received".to_string()));
    }
    Ok(text.to_string())
}

#[async_trait]
impl Translator for OllamaTranslator {
    async fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String> {
        let request = TranslationRequest {
            model: self.config.model.clone(),
            prompt: self.build_prompt(text, source_lang, target_lang),
            stream: false,
            format: "json".to_string(),
        };

        let url = format!("{}/api/generate", self.config.endpoint.trim_end_matches('/'));
        debug!("Sending translation request to: {}", url);

        let response = self.client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| SubqueueError::Translation(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SubqueueError::Translation("Rate limit exhausted".to_string()));
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(SubqueueError::Translation(format!(
                "Ollama API error {}: {}", status, error_text
            )));
        }

        let translation_response: TranslationResponse = response.json().await
            .map_err(|e| SubqueueError::Translation(format!("Failed to parse response: {}", e)))?;

        debug!("Raw Ollama response: {}", translation_response.response);
        extract_translation(&translation_response.response)
    }
}
