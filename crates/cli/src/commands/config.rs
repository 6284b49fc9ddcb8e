use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use banko_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

struct Field {
    key: &'static str,
    env_keys: &'static [&'static str],
    value: String,
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }
    lines.join("\n")
}

fn field(key: &'static str, env_keys: &'static [&'static str], value: String) -> Field {
    Field { key, env_keys, value }
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let subscription_key = config
        .nlu
        .subscription_key
        .as_ref()
        .map(|key| redact_key(key.expose_secret()))
        .unwrap_or_else(|| "<unset>".to_string());

    vec![
        field("database.url", &["BANKO_DATABASE_URL"], config.database.url.clone()),
        field(
            "database.max_connections",
            &["BANKO_DATABASE_MAX_CONNECTIONS"],
            config.database.max_connections.to_string(),
        ),
        field(
            "database.timeout_secs",
            &["BANKO_DATABASE_TIMEOUT_SECS"],
            config.database.timeout_secs.to_string(),
        ),
        field("nlu.provider", &["BANKO_NLU_PROVIDER"], format!("{:?}", config.nlu.provider)),
        field("nlu.endpoint", &["BANKO_NLU_ENDPOINT"], config.nlu.endpoint.clone()),
        field(
            "nlu.app_id",
            &["BANKO_NLU_APP_ID"],
            config.nlu.app_id.clone().unwrap_or_else(|| "<unset>".to_string()),
        ),
        field("nlu.subscription_key", &["BANKO_NLU_SUBSCRIPTION_KEY"], subscription_key),
        field("nlu.timeout_secs", &["BANKO_NLU_TIMEOUT_SECS"], config.nlu.timeout_secs.to_string()),
        field(
            "nlu.min_confidence",
            &["BANKO_NLU_MIN_CONFIDENCE"],
            config.nlu.min_confidence.to_string(),
        ),
        field(
            "dialog.max_prompt_retries",
            &["BANKO_DIALOG_MAX_PROMPT_RETRIES"],
            config.dialog.max_prompt_retries.to_string(),
        ),
        field(
            "dialog.store_timeout_secs",
            &["BANKO_DIALOG_STORE_TIMEOUT_SECS"],
            config.dialog.store_timeout_secs.to_string(),
        ),
        field(
            "server.bind_address",
            &["BANKO_SERVER_BIND_ADDRESS"],
            config.server.bind_address.clone(),
        ),
        field("server.port", &["BANKO_SERVER_PORT"], config.server.port.to_string()),
        field(
            "logging.level",
            &["BANKO_LOGGING_LEVEL", "BANKO_LOG_LEVEL"],
            config.logging.level.clone(),
        ),
        field(
            "logging.format",
            &["BANKO_LOGGING_FORMAT", "BANKO_LOG_FORMAT"],
            format!("{:?}", config.logging.format),
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    ["banko.toml", "config/banko.toml"].into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Keeps the last four characters so operators can tell keys apart.
fn redact_key(key: &str) -> String {
    let trimmed = key.trim();
    let count = trimmed.chars().count();
    if count == 0 {
        return "<empty>".to_string();
    }
    if count <= 8 {
        return "<redacted>".to_string();
    }

    let tail: String = trimmed.chars().skip(count - 4).collect();
    format!("***{tail}")
}

#[cfg(test)]
mod tests {
    use toml::Value;

    use super::{contains_path, redact_key};

    #[test]
    fn short_keys_are_fully_hidden() {
        assert_eq!(redact_key(""), "<empty>");
        assert_eq!(redact_key("abcd1234"), "<redacted>");
        assert_eq!(redact_key("0123456789abcdef"), "***cdef");
    }

    #[test]
    fn nested_paths_are_found_in_the_file_document() {
        let doc = "[nlu]\nprovider = \"luis\"\n".parse::<Value>().expect("toml");
        assert!(contains_path(&doc, "nlu.provider"));
        assert!(!contains_path(&doc, "nlu.endpoint"));
        assert!(!contains_path(&doc, "server.port"));
    }
}
