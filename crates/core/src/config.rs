use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub nlu: NluConfig,
    pub dialog: DialogConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct NluConfig {
    pub provider: NluProvider,
    pub endpoint: String,
    pub app_id: Option<String>,
    pub subscription_key: Option<SecretString>,
    pub timeout_secs: u64,
    pub min_confidence: f32,
}

#[derive(Clone, Debug)]
pub struct DialogConfig {
    /// 0 keeps re-prompting forever.
    pub max_prompt_retries: u32,
    pub store_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NluProvider {
    Luis,
    Keyword,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub nlu_provider: Option<NluProvider>,
    pub max_prompt_retries: Option<u32>,
    pub server_port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://banko.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            nlu: NluConfig {
                provider: NluProvider::Keyword,
                endpoint: "https://westus.api.cognitive.microsoft.com".to_string(),
                app_id: None,
                subscription_key: None,
                timeout_secs: 5,
                min_confidence: 0.3,
            },
            dialog: DialogConfig { max_prompt_retries: 3, store_timeout_secs: 5 },
            server: ServerConfig { bind_address: "127.0.0.1".to_string(), port: 3978 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for NluProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "luis" => Ok(Self::Luis),
            "keyword" => Ok(Self::Keyword),
            other => Err(ConfigError::Validation(format!(
                "unsupported nlu provider `{other}` (expected luis|keyword)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("banko.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(nlu) = patch.nlu {
            if let Some(provider) = nlu.provider {
                self.nlu.provider = provider;
            }
            if let Some(endpoint) = nlu.endpoint {
                self.nlu.endpoint = endpoint;
            }
            if let Some(app_id) = nlu.app_id {
                self.nlu.app_id = Some(app_id);
            }
            if let Some(subscription_key) = nlu.subscription_key {
                self.nlu.subscription_key = Some(subscription_key.into());
            }
            if let Some(timeout_secs) = nlu.timeout_secs {
                self.nlu.timeout_secs = timeout_secs;
            }
            if let Some(min_confidence) = nlu.min_confidence {
                self.nlu.min_confidence = min_confidence;
            }
        }

        if let Some(dialog) = patch.dialog {
            if let Some(max_prompt_retries) = dialog.max_prompt_retries {
                self.dialog.max_prompt_retries = max_prompt_retries;
            }
            if let Some(store_timeout_secs) = dialog.store_timeout_secs {
                self.dialog.store_timeout_secs = store_timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("BANKO_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("BANKO_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("BANKO_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("BANKO_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("BANKO_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("BANKO_NLU_PROVIDER") {
            self.nlu.provider = value.parse()?;
        }
        if let Some(value) = read_env("BANKO_NLU_ENDPOINT") {
            self.nlu.endpoint = value;
        }
        if let Some(value) = read_env("BANKO_NLU_APP_ID") {
            self.nlu.app_id = Some(value);
        }
        if let Some(value) = read_env("BANKO_NLU_SUBSCRIPTION_KEY") {
            self.nlu.subscription_key = Some(value.into());
        }
        if let Some(value) = read_env("BANKO_NLU_TIMEOUT_SECS") {
            self.nlu.timeout_secs = parse_u64("BANKO_NLU_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("BANKO_NLU_MIN_CONFIDENCE") {
            self.nlu.min_confidence = parse_f32("BANKO_NLU_MIN_CONFIDENCE", &value)?;
        }

        if let Some(value) = read_env("BANKO_DIALOG_MAX_PROMPT_RETRIES") {
            self.dialog.max_prompt_retries = parse_u32("BANKO_DIALOG_MAX_PROMPT_RETRIES", &value)?;
        }
        if let Some(value) = read_env("BANKO_DIALOG_STORE_TIMEOUT_SECS") {
            self.dialog.store_timeout_secs = parse_u64("BANKO_DIALOG_STORE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("BANKO_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("BANKO_SERVER_PORT") {
            self.server.port = parse_u16("BANKO_SERVER_PORT", &value)?;
        }

        let log_level = read_env("BANKO_LOGGING_LEVEL").or_else(|| read_env("BANKO_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format = read_env("BANKO_LOGGING_FORMAT").or_else(|| read_env("BANKO_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(nlu_provider) = overrides.nlu_provider {
            self.nlu.provider = nlu_provider;
        }
        if let Some(max_prompt_retries) = overrides.max_prompt_retries {
            self.dialog.max_prompt_retries = max_prompt_retries;
        }
        if let Some(server_port) = overrides.server_port {
            self.server.port = server_port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_nlu(&self.nlu)?;
        validate_dialog(&self.dialog)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("banko.toml"), PathBuf::from("config/banko.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_nlu(nlu: &NluConfig) -> Result<(), ConfigError> {
    if nlu.timeout_secs == 0 || nlu.timeout_secs > 60 {
        return Err(ConfigError::Validation("nlu.timeout_secs must be in range 1..=60".to_string()));
    }

    if !(0.0..=1.0).contains(&nlu.min_confidence) {
        return Err(ConfigError::Validation(
            "nlu.min_confidence must be between 0.0 and 1.0".to_string(),
        ));
    }

    if nlu.provider == NluProvider::Luis {
        let app_id_missing = nlu.app_id.as_deref().map(str::trim).unwrap_or_default().is_empty();
        if app_id_missing {
            return Err(ConfigError::Validation(
                "nlu.app_id is required for the luis provider. Find it under Manage > Settings in \
                 the LUIS portal"
                    .to_string(),
            ));
        }

        let key_missing = nlu
            .subscription_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if key_missing {
            return Err(ConfigError::Validation(
                "nlu.subscription_key is required for the luis provider (set \
                 BANKO_NLU_SUBSCRIPTION_KEY)"
                    .to_string(),
            ));
        }

        if !nlu.endpoint.starts_with("http://") && !nlu.endpoint.starts_with("https://") {
            return Err(ConfigError::Validation(
                "nlu.endpoint must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_dialog(dialog: &DialogConfig) -> Result<(), ConfigError> {
    if dialog.store_timeout_secs == 0 || dialog.store_timeout_secs > 60 {
        return Err(ConfigError::Validation(
            "dialog.store_timeout_secs must be in range 1..=60".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.bind_address.trim().is_empty() {
        return Err(ConfigError::Validation("server.bind_address must not be empty".to_string()));
    }

    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_f32(key: &str, value: &str) -> Result<f32, ConfigError> {
    value.parse::<f32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    nlu: Option<NluPatch>,
    dialog: Option<DialogPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct NluPatch {
    provider: Option<NluProvider>,
    endpoint: Option<String>,
    app_id: Option<String>,
    subscription_key: Option<String>,
    timeout_secs: Option<u64>,
    min_confidence: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct DialogPatch {
    max_prompt_retries: Option<u32>,
    store_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
