use async_trait::async_trait;

use crate::textgen::{Persona, TextGenError, TextGenerator};

/// Deterministic generator that needs no network.
///
/// Echoes the persona and the first non-blank prompt line, so runs are
/// reproducible and stage payloads stay inspectable.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineTextGenerator;

#[async_trait]
impl TextGenerator for OfflineTextGenerator {
    fn name(&self) -> &str {
        "offline"
    }

    async fn generate(&self, persona: &Persona, prompt: &str) -> Result<String, TextGenError> {
        let headline = prompt
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .ok_or(TextGenError::EmptyResponse)?;

        Ok(format!(
            "## {}\n\n{}\n\n_Generated offline; no model was consulted._",
            persona.name, headline
        ))
    }
}
