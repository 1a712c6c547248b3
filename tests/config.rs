//! Configuration merging: defaults, TOML file, then environment.

use std::collections::HashMap;
use std::time::Duration;

use sketchbook::config::{Config, FileConfig, IllustrationBackend, StorageBackend};
use sketchbook::error::SketchbookError;
use sketchbook::storage::Delivery;

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key: &str| map.get(key).cloned()
}

#[test]
fn defaults_without_file_or_env() {
    let config = Config::from_sources(FileConfig::default(), env(&[])).unwrap();

    assert!(config.modelslab_api_key.is_none());
    assert!(config.openai_api_key.is_none());
    assert_eq!(config.poll.interval, Duration::from_secs(10));
    assert_eq!(config.poll.max_polls, 7);
    assert_eq!(config.retry.max_attempts, 3);
    assert_eq!(config.retry.initial_delay, Duration::from_secs(2));
    assert_eq!(config.batch.group_size, 3);
    assert_eq!(config.batch.cooldown, Duration::from_secs(12));
    assert_eq!(config.text.model, "gpt-4o");
    assert_eq!(config.illustration.backend, IllustrationBackend::OpenAi);
    assert_eq!(config.storage.backend, StorageBackend::Fs);
}

#[test]
fn keys_come_from_env_and_blank_is_unset() {
    let config = Config::from_sources(
        FileConfig::default(),
        env(&[("MODELSLAB_API_KEY", "  "), ("OPENAI_API_KEY", "sk-fallback")]),
    )
    .unwrap();
    assert!(config.modelslab_api_key.is_none());
    assert_eq!(config.openai_api_key.as_deref(), Some("sk-fallback"));

    let config = Config::from_sources(
        FileConfig::default(),
        env(&[("CHAT_GPT_API_KEY", "sk-primary"), ("OPENAI_API_KEY", "sk-fallback")]),
    )
    .unwrap();
    assert_eq!(config.openai_api_key.as_deref(), Some("sk-primary"));
}

#[test]
fn file_values_override_defaults() {
    let file = FileConfig::parse(
        r#"
        [providers]
        modelslab_base_url = "http://localhost:9000/api"
        openai_base_url = "http://localhost:9001/v1/"

        [jobs]
        poll_interval_secs = 5
        max_polls = 12
        max_attempts = 2

        [batch]
        group_size = 2
        cooldown_secs = 30

        [storage]
        backend = "memory"
        public_base_url = "https://bucket.test"
        cdn_domain = "cdn.test"
        permanent_delivery = "cdn"

        [server]
        bind_addr = "0.0.0.0:9090"
        serve_media = false
        "#,
    )
    .unwrap();

    let config = Config::from_sources(file, env(&[])).unwrap();

    assert_eq!(config.modelslab_base_url, "http://localhost:9000/api");
    assert_eq!(config.text.url, "http://localhost:9001/v1/chat/completions");
    assert_eq!(config.poll.interval, Duration::from_secs(5));
    assert_eq!(config.poll.max_polls, 12);
    assert_eq!(config.retry.max_attempts, 2);
    assert_eq!(config.batch.group_size, 2);
    assert_eq!(config.batch.cooldown, Duration::from_secs(30));
    assert_eq!(config.storage.backend, StorageBackend::Memory);
    assert_eq!(config.storage.policy.cdn_domain.as_deref(), Some("cdn.test"));
    assert_eq!(config.storage.policy.permanent_delivery, Delivery::Cdn);
    assert_eq!(config.server.bind_addr.port(), 9090);
    assert!(!config.server.serve_media);
}

#[test]
fn env_overrides_file_for_storage_and_bind() {
    let file = FileConfig::parse(
        r#"
        [storage]
        root = "/srv/file-root"
        public_base_url = "https://file.test"

        [server]
        bind_addr = "127.0.0.1:1111"
        "#,
    )
    .unwrap();

    let config = Config::from_sources(
        file,
        env(&[
            ("STORAGE_ROOT", "/srv/env-root"),
            ("STORAGE_PUBLIC_BASE_URL", "https://env.test/media"),
            ("STORAGE_BACKEND", "Memory"),
            ("BIND_ADDR", "127.0.0.1:2222"),
        ]),
    )
    .unwrap();

    assert_eq!(config.storage.root.to_str(), Some("/srv/env-root"));
    assert_eq!(config.storage.policy.public_base_url, "https://env.test/media");
    assert_eq!(config.storage.backend, StorageBackend::Memory);
    assert_eq!(config.server.bind_addr.port(), 2222);
}

#[test]
fn modelslab_illustration_switches_defaults() {
    let file = FileConfig::parse("[illustration]\nbackend = \"modelslab\"\n").unwrap();
    let config = Config::from_sources(file, env(&[])).unwrap();
    assert_eq!(config.illustration.backend, IllustrationBackend::ModelsLab);
    assert_eq!(config.illustration.model, "flux");
    assert_eq!(config.illustration.size, "1024x768");
}

#[test]
fn invalid_values_are_config_errors() {
    let zero_group = FileConfig::parse("[batch]\ngroup_size = 0\n").unwrap();
    assert!(matches!(
        Config::from_sources(zero_group, env(&[])),
        Err(SketchbookError::Config(_))
    ));

    let hot = FileConfig::parse("[text]\ntemperature = 3.5\n").unwrap();
    assert!(Config::from_sources(hot, env(&[])).is_err());

    assert!(Config::from_sources(FileConfig::default(), env(&[("BIND_ADDR", "nope")])).is_err());
    assert!(
        Config::from_sources(FileConfig::default(), env(&[("STORAGE_BACKEND", "s3")])).is_err()
    );
}

#[test]
fn unknown_file_keys_are_rejected() {
    assert!(FileConfig::parse("[jobs]\nmax_poll = 3\n").is_err());
}

#[test]
fn missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let file = FileConfig::read(&dir.path().join("absent.toml")).unwrap();
    assert!(file.jobs.max_polls.is_none());
}

#[test]
fn debug_output_redacts_keys() {
    let config = Config::from_sources(
        FileConfig::default(),
        env(&[("MODELSLAB_API_KEY", "ml-secret"), ("CHAT_GPT_API_KEY", "sk-secret")]),
    )
    .unwrap();
    let debug = format!("{config:?}");
    assert!(!debug.contains("ml-secret"));
    assert!(!debug.contains("sk-secret"));
    assert!(debug.contains("[REDACTED]"));
}
