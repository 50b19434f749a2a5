//! Runtime backend selection.
//!
//! [`select`] is a pure function of the agent definition, an optional model
//! override and the runtime configuration. It never fails: unrecognised or
//! missing models fall back to the default family, and every branch records
//! a human-readable reason.

use serde::{Deserialize, Serialize};

use super::{AgentDefinition, RuntimeKind, RuntimePreference};
use crate::config::RuntimeConfig;

/// Backend used when no model resolves or the model is unrecognised.
pub const DEFAULT_RUNTIME: RuntimeKind = RuntimeKind::Claude;

/// Fixed fallback paired with Google-family models.
pub const GOOGLE_FALLBACK: RuntimeKind = RuntimeKind::OpenCode;

const ANTHROPIC_KEYWORDS: &[&str] = &["claude", "opus", "sonnet", "haiku"];
const OPENAI_PREFIXES: &[&str] = &["gpt-", "gpt4", "gpt5", "chatgpt", "o1", "o3", "o4"];
const OPENAI_KEYWORDS: &[&str] = &["openai", "codex"];
const GOOGLE_KEYWORDS: &[&str] = &["gemini"];

/// Model family recognised from a model string.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModelFamily {
    /// Claude models.
    Anthropic,
    /// GPT and reasoning (`o*`) models.
    OpenAi,
    /// Gemini models.
    Google,
}

/// Outcome of runtime selection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RuntimeDecision {
    /// Backend to launch.
    pub runtime: RuntimeKind,
    /// Backend to hand off to if the first one fails.
    pub fallback_runtime: Option<RuntimeKind>,
    /// Why this backend was chosen.
    pub reason: String,
    /// Model that drove the decision, if any.
    pub model: Option<String>,
}

impl RuntimeDecision {
    fn new(
        runtime: RuntimeKind,
        fallback_runtime: Option<RuntimeKind>,
        reason: String,
        model: Option<&str>,
    ) -> Self {
        Self {
            runtime,
            fallback_runtime,
            reason,
            model: model.map(str::to_owned),
        }
    }
}

/// Classify a model string into a family.
#[must_use]
pub fn classify_model(model: &str) -> Option<ModelFamily> {
    let lowered = model.trim().to_ascii_lowercase();
    if ANTHROPIC_KEYWORDS
        .iter()
        .any(|kw| lowered == *kw || lowered.contains(kw))
    {
        return Some(ModelFamily::Anthropic);
    }
    if OPENAI_PREFIXES.iter().any(|p| lowered.starts_with(p))
        || OPENAI_KEYWORDS.iter().any(|kw| lowered.contains(kw))
    {
        return Some(ModelFamily::OpenAi);
    }
    if GOOGLE_KEYWORDS.iter().any(|kw| lowered.contains(kw)) {
        return Some(ModelFamily::Google);
    }
    None
}

/// Choose the backend for a session.
///
/// The model override wins over the definition's model. OpenAI-family
/// models honour the definition's runtime hint first, then the configured
/// preference.
#[must_use]
pub fn select(
    definition: Option<&AgentDefinition>,
    model_override: Option<&str>,
    config: &RuntimeConfig,
) -> RuntimeDecision {
    let model = model_override
        .or_else(|| definition.and_then(|def| def.model.as_deref()))
        .map(str::trim)
        .filter(|m| !m.is_empty());

    let Some(model) = model else {
        return RuntimeDecision::new(
            DEFAULT_RUNTIME,
            None,
            format!("no model specified; defaulting to {DEFAULT_RUNTIME}"),
            None,
        );
    };

    match classify_model(model) {
        Some(ModelFamily::Anthropic) => RuntimeDecision::new(
            RuntimeKind::Claude,
            None,
            format!("model '{model}' is a claude model"),
            Some(model),
        ),
        Some(ModelFamily::OpenAi) => select_openai(definition, model, config),
        Some(ModelFamily::Google) => RuntimeDecision::new(
            RuntimeKind::Gemini,
            Some(GOOGLE_FALLBACK),
            format!("model '{model}' is a gemini model; {GOOGLE_FALLBACK} is the fixed fallback"),
            Some(model),
        ),
        None => RuntimeDecision::new(
            DEFAULT_RUNTIME,
            None,
            format!("model '{model}' not recognised; defaulting to {DEFAULT_RUNTIME}"),
            Some(model),
        ),
    }
}

fn select_openai(
    definition: Option<&AgentDefinition>,
    model: &str,
    config: &RuntimeConfig,
) -> RuntimeDecision {
    let fallback_for = |kind: RuntimeKind| {
        if config.fallback_on_error {
            kind.complement()
        } else {
            None
        }
    };

    if let Some(hint) = definition.and_then(|def| def.runtime) {
        return RuntimeDecision::new(
            hint,
            fallback_for(hint),
            format!("model '{model}' is an openai model; agent definition requests {hint}"),
            Some(model),
        );
    }

    match config.openai_preference {
        RuntimePreference::Auto => RuntimeDecision::new(
            RuntimeKind::Codex,
            Some(RuntimeKind::OpenCode),
            format!(
                "model '{model}' is an openai model; preference auto selects {} with {} fallback",
                RuntimeKind::Codex,
                RuntimeKind::OpenCode
            ),
            Some(model),
        ),
        RuntimePreference::Codex => RuntimeDecision::new(
            RuntimeKind::Codex,
            fallback_for(RuntimeKind::Codex),
            format!("model '{model}' is an openai model; configured preference is codex"),
            Some(model),
        ),
        RuntimePreference::OpenCode => RuntimeDecision::new(
            RuntimeKind::OpenCode,
            fallback_for(RuntimeKind::OpenCode),
            format!("model '{model}' is an openai model; configured preference is opencode"),
            Some(model),
        ),
    }
}
