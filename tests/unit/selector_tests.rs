//! Unit tests for runtime backend selection.

use agent_conductor::config::RuntimeConfig;
use agent_conductor::runtime::selector::{classify_model, DEFAULT_RUNTIME, GOOGLE_FALLBACK};
use agent_conductor::runtime::{
    select, AgentDefinition, ModelFamily, RuntimeKind, RuntimePreference,
};

fn definition(model: Option<&str>, runtime: Option<RuntimeKind>) -> AgentDefinition {
    AgentDefinition {
        name: "build".into(),
        model: model.map(str::to_owned),
        runtime,
    }
}

fn config(preference: RuntimePreference, fallback_on_error: bool) -> RuntimeConfig {
    RuntimeConfig {
        openai_preference: preference,
        fallback_on_error,
        ..RuntimeConfig::default()
    }
}

#[test]
fn no_model_defaults_to_claude() {
    let decision = select(None, None, &RuntimeConfig::default());
    assert_eq!(decision.runtime, DEFAULT_RUNTIME);
    assert_eq!(decision.fallback_runtime, None);
    assert!(decision.model.is_none());
    assert!(decision.reason.contains("no model"));
}

#[test]
fn blank_override_counts_as_no_model() {
    let decision = select(None, Some("   "), &RuntimeConfig::default());
    assert_eq!(decision.runtime, RuntimeKind::Claude);
    assert!(decision.model.is_none());
}

#[test]
fn claude_haiku_selects_claude() {
    let decision = select(None, Some("claude-haiku-4-5"), &RuntimeConfig::default());
    assert_eq!(decision.runtime, RuntimeKind::Claude);
    assert_eq!(decision.fallback_runtime, None);
    assert_eq!(decision.model.as_deref(), Some("claude-haiku-4-5"));
}

#[test]
fn anthropic_keywords_match_case_insensitively() {
    for model in ["Opus", "SONNET", "haiku"] {
        let decision = select(None, Some(model), &RuntimeConfig::default());
        assert_eq!(decision.runtime, RuntimeKind::Claude, "{model}");
    }
}

#[test]
fn gpt4_with_auto_preference_selects_codex_with_opencode_fallback() {
    let decision = select(None, Some("gpt-4"), &config(RuntimePreference::Auto, false));
    assert_eq!(decision.runtime, RuntimeKind::Codex);
    assert_eq!(decision.fallback_runtime, Some(RuntimeKind::OpenCode));
    assert!(decision.reason.contains("auto"));
}

#[test]
fn reasoning_model_prefixes_are_openai() {
    for model in ["o1-preview", "o3-mini", "o4-mini", "chatgpt-4o-latest", "gpt5"] {
        assert_eq!(classify_model(model), Some(ModelFamily::OpenAi), "{model}");
    }
}

#[test]
fn concrete_preference_respects_fallback_flag() {
    let with = select(None, Some("gpt-5"), &config(RuntimePreference::OpenCode, true));
    assert_eq!(with.runtime, RuntimeKind::OpenCode);
    assert_eq!(with.fallback_runtime, Some(RuntimeKind::Codex));

    let without = select(None, Some("gpt-5"), &config(RuntimePreference::Codex, false));
    assert_eq!(without.runtime, RuntimeKind::Codex);
    assert_eq!(without.fallback_runtime, None);
}

#[test]
fn definition_runtime_hint_beats_preference() {
    let def = definition(Some("gpt-5-codex"), Some(RuntimeKind::OpenCode));
    let decision = select(Some(&def), None, &config(RuntimePreference::Codex, true));
    assert_eq!(decision.runtime, RuntimeKind::OpenCode);
    assert_eq!(decision.fallback_runtime, Some(RuntimeKind::Codex));
    assert!(decision.reason.contains("agent definition"));

    let no_fallback = select(Some(&def), None, &config(RuntimePreference::Auto, false));
    assert_eq!(no_fallback.runtime, RuntimeKind::OpenCode);
    assert_eq!(no_fallback.fallback_runtime, None);
}

#[test]
fn model_override_beats_definition_model() {
    let def = definition(Some("gpt-5"), None);
    let decision = select(Some(&def), Some("claude-sonnet-4"), &RuntimeConfig::default());
    assert_eq!(decision.runtime, RuntimeKind::Claude);
    assert_eq!(decision.model.as_deref(), Some("claude-sonnet-4"));
}

#[test]
fn gemini_pairs_with_fixed_fallback() {
    for cfg in [
        config(RuntimePreference::Auto, false),
        config(RuntimePreference::Codex, true),
    ] {
        let decision = select(None, Some("gemini-1.5-pro"), &cfg);
        assert_eq!(decision.runtime, RuntimeKind::Gemini);
        assert_eq!(decision.fallback_runtime, Some(GOOGLE_FALLBACK));
    }
}

#[test]
fn unknown_model_defaults_with_reason() {
    let decision = select(None, Some("llama-3-70b"), &RuntimeConfig::default());
    assert_eq!(decision.runtime, DEFAULT_RUNTIME);
    assert_eq!(decision.fallback_runtime, None);
    assert!(decision.reason.contains("not recognised"));
    assert_eq!(decision.model.as_deref(), Some("llama-3-70b"));
}

#[test]
fn every_decision_carries_a_reason() {
    for model in [None, Some("opus"), Some("gpt-4o"), Some("gemini-2"), Some("mystery")] {
        let decision = select(None, model, &RuntimeConfig::default());
        assert!(!decision.reason.is_empty(), "{model:?}");
    }
}

#[test]
fn runtime_kind_round_trips_through_strings() {
    for kind in [
        RuntimeKind::Claude,
        RuntimeKind::Codex,
        RuntimeKind::OpenCode,
        RuntimeKind::Gemini,
    ] {
        assert_eq!(kind.as_str().parse::<RuntimeKind>().expect("parse"), kind);
    }
    assert!("cobol".parse::<RuntimeKind>().is_err());
}
