//! Config defaults — empty and partial TOML must produce a fully usable
//! configuration.

use cg_domain::config::Config;
use cg_domain::model::ProviderKind;

#[test]
fn empty_toml_gives_full_defaults() {
    let config = Config::from_toml_str("").unwrap();
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 8640);
    assert_eq!(config.llm.default_timeout_ms, 20_000);
    assert_eq!(config.llm.max_retries, 2);
    assert!(config.llm.providers.is_empty());
    assert!(config.llm.courses.is_empty());
    assert_eq!(config.tools.retrieval_token_limit, 8_192);
    assert_eq!(config.storage.state_path.to_str(), Some("./data"));
}

#[test]
fn provider_entries_parse() {
    let raw = r#"
        [[llm.providers]]
        kind = "openai"
        base_url = "https://api.openai.com/v1"
        api_key_env = "OPENAI_API_KEY"

        [[llm.providers]]
        kind = "anthropic"
        base_url = "https://api.anthropic.com"
        api_key = "v1:c2FsdA:Y3Q:dGFn"
        enabled = false
    "#;
    let config = Config::from_toml_str(raw).unwrap();
    assert_eq!(config.llm.providers.len(), 2);
    assert_eq!(config.llm.providers[0].kind, ProviderKind::OpenAi);
    assert!(config.llm.providers[0].enabled);
    assert_eq!(config.llm.providers[1].kind, ProviderKind::Anthropic);
    assert!(!config.llm.providers[1].enabled);
}

#[test]
fn course_override_parses() {
    let raw = r#"
        [llm.courses."ECE120"]
        [[llm.courses."ECE120".models]]
        id = "gpt-4o-mini"
        enabled = false

        [[llm.courses."ECE120".providers]]
        kind = "gemini"
        base_url = "https://generativelanguage.googleapis.com"
    "#;
    let config = Config::from_toml_str(raw).unwrap();
    let course = config.llm.courses.get("ECE120").unwrap();
    assert_eq!(course.models.len(), 1);
    assert_eq!(course.models[0].enabled, Some(false));
    assert_eq!(course.providers[0].kind, ProviderKind::Gemini);
}

#[test]
fn bad_toml_is_a_config_error() {
    let err = Config::from_toml_str("[[llm.providers]]\nkind = 42").unwrap_err();
    assert!(err.to_string().contains("config"));
}
