use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub dialogue: DialogueConfig,
    pub dispatch: DispatchConfig,
    pub answering: AnsweringConfig,
    pub commerce: CommerceConfig,
    pub ticketing: TicketingConfig,
    pub classifier: ClassifierConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

/// Turn-processing policy knobs.
#[derive(Clone, Debug)]
pub struct DialogueConfig {
    /// Classifier confidence (0..=100) below which an intent is treated as
    /// unknown.
    pub confidence_floor: u8,
    /// Confidence at or above which a new actionable intent abandons an
    /// in-progress action instead of being read as a slot answer.
    pub new_intent_override: u8,
    /// Lifetime cap on general-answering calls per session.
    pub fallback_budget_max: u32,
    /// Consecutive unknown-intent turns before a ticket is opened.
    pub escalation_fallback_threshold: u32,
    /// Open a ticket directly on a terminal dispatch failure.
    pub escalate_on_action_failure: bool,
    /// Idle seconds after which a session is closed history.
    pub session_ttl_secs: u64,
    /// How many prior turns accompany a fallback query.
    pub recent_turns_window: u32,
}

/// Retry/timeout policy for resource-API dispatches.
#[derive(Clone, Debug)]
pub struct DispatchConfig {
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

#[derive(Clone, Debug)]
pub struct AnsweringConfig {
    pub base_url: Option<String>,
    pub api_key: Option<SecretString>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct CommerceConfig {
    pub base_url: Option<String>,
    pub api_token: Option<SecretString>,
    /// Whether the commerce API deduplicates on the idempotency key. When
    /// false, mutating actions fail closed instead of retrying.
    pub deduplicates: bool,
}

#[derive(Clone, Debug)]
pub struct TicketingConfig {
    pub base_url: Option<String>,
    pub api_token: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct ClassifierConfig {
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
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
    pub commerce_api_token: Option<String>,
    pub ticketing_api_token: Option<String>,
    pub answering_api_key: Option<String>,
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
                url: "sqlite://patter.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            dialogue: DialogueConfig {
                confidence_floor: 55,
                new_intent_override: 80,
                fallback_budget_max: 5,
                escalation_fallback_threshold: 2,
                escalate_on_action_failure: false,
                session_ttl_secs: 1800,
                recent_turns_window: 5,
            },
            dispatch: DispatchConfig { timeout_secs: 10, max_retries: 2, retry_base_delay_ms: 200 },
            answering: AnsweringConfig { base_url: None, api_key: None, timeout_secs: 15 },
            commerce: CommerceConfig { base_url: None, api_token: None, deduplicates: true },
            ticketing: TicketingConfig { base_url: None, api_token: None },
            classifier: ClassifierConfig { base_url: None, timeout_secs: 5 },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
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

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    dialogue: Option<DialoguePatch>,
    dispatch: Option<DispatchPatch>,
    answering: Option<AnsweringPatch>,
    commerce: Option<CommercePatch>,
    ticketing: Option<TicketingPatch>,
    classifier: Option<ClassifierPatch>,
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
struct DialoguePatch {
    confidence_floor: Option<u8>,
    new_intent_override: Option<u8>,
    fallback_budget_max: Option<u32>,
    escalation_fallback_threshold: Option<u32>,
    escalate_on_action_failure: Option<bool>,
    session_ttl_secs: Option<u64>,
    recent_turns_window: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct DispatchPatch {
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    retry_base_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct AnsweringPatch {
    base_url: Option<String>,
    api_key: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CommercePatch {
    base_url: Option<String>,
    api_token: Option<String>,
    deduplicates: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct TicketingPatch {
    base_url: Option<String>,
    api_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ClassifierPatch {
    base_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("patter.toml"));
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

        if let Some(dialogue) = patch.dialogue {
            if let Some(confidence_floor) = dialogue.confidence_floor {
                self.dialogue.confidence_floor = confidence_floor;
            }
            if let Some(new_intent_override) = dialogue.new_intent_override {
                self.dialogue.new_intent_override = new_intent_override;
            }
            if let Some(fallback_budget_max) = dialogue.fallback_budget_max {
                self.dialogue.fallback_budget_max = fallback_budget_max;
            }
            if let Some(threshold) = dialogue.escalation_fallback_threshold {
                self.dialogue.escalation_fallback_threshold = threshold;
            }
            if let Some(escalate) = dialogue.escalate_on_action_failure {
                self.dialogue.escalate_on_action_failure = escalate;
            }
            if let Some(session_ttl_secs) = dialogue.session_ttl_secs {
                self.dialogue.session_ttl_secs = session_ttl_secs;
            }
            if let Some(recent_turns_window) = dialogue.recent_turns_window {
                self.dialogue.recent_turns_window = recent_turns_window;
            }
        }

        if let Some(dispatch) = patch.dispatch {
            if let Some(timeout_secs) = dispatch.timeout_secs {
                self.dispatch.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = dispatch.max_retries {
                self.dispatch.max_retries = max_retries;
            }
            if let Some(retry_base_delay_ms) = dispatch.retry_base_delay_ms {
                self.dispatch.retry_base_delay_ms = retry_base_delay_ms;
            }
        }

        if let Some(answering) = patch.answering {
            if let Some(base_url) = answering.base_url {
                self.answering.base_url = Some(base_url);
            }
            if let Some(api_key_value) = answering.api_key {
                self.answering.api_key = Some(secret_value(api_key_value));
            }
            if let Some(timeout_secs) = answering.timeout_secs {
                self.answering.timeout_secs = timeout_secs;
            }
        }

        if let Some(commerce) = patch.commerce {
            if let Some(base_url) = commerce.base_url {
                self.commerce.base_url = Some(base_url);
            }
            if let Some(api_token_value) = commerce.api_token {
                self.commerce.api_token = Some(secret_value(api_token_value));
            }
            if let Some(deduplicates) = commerce.deduplicates {
                self.commerce.deduplicates = deduplicates;
            }
        }

        if let Some(ticketing) = patch.ticketing {
            if let Some(base_url) = ticketing.base_url {
                self.ticketing.base_url = Some(base_url);
            }
            if let Some(api_token_value) = ticketing.api_token {
                self.ticketing.api_token = Some(secret_value(api_token_value));
            }
        }

        if let Some(classifier) = patch.classifier {
            if let Some(base_url) = classifier.base_url {
                self.classifier.base_url = Some(base_url);
            }
            if let Some(timeout_secs) = classifier.timeout_secs {
                self.classifier.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
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
        if let Some(value) = read_env("PATTER_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("PATTER_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("PATTER_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("PATTER_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("PATTER_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("PATTER_DIALOGUE_CONFIDENCE_FLOOR") {
            self.dialogue.confidence_floor = parse_u8("PATTER_DIALOGUE_CONFIDENCE_FLOOR", &value)?;
        }
        if let Some(value) = read_env("PATTER_DIALOGUE_NEW_INTENT_OVERRIDE") {
            self.dialogue.new_intent_override =
                parse_u8("PATTER_DIALOGUE_NEW_INTENT_OVERRIDE", &value)?;
        }
        if let Some(value) = read_env("PATTER_DIALOGUE_FALLBACK_BUDGET_MAX") {
            self.dialogue.fallback_budget_max =
                parse_u32("PATTER_DIALOGUE_FALLBACK_BUDGET_MAX", &value)?;
        }
        if let Some(value) = read_env("PATTER_DIALOGUE_SESSION_TTL_SECS") {
            self.dialogue.session_ttl_secs = parse_u64("PATTER_DIALOGUE_SESSION_TTL_SECS", &value)?;
        }

        if let Some(value) = read_env("PATTER_DISPATCH_TIMEOUT_SECS") {
            self.dispatch.timeout_secs = parse_u64("PATTER_DISPATCH_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("PATTER_DISPATCH_MAX_RETRIES") {
            self.dispatch.max_retries = parse_u32("PATTER_DISPATCH_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("PATTER_ANSWERING_BASE_URL") {
            self.answering.base_url = Some(value);
        }
        if let Some(value) = read_env("PATTER_ANSWERING_API_KEY") {
            self.answering.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("PATTER_COMMERCE_BASE_URL") {
            self.commerce.base_url = Some(value);
        }
        if let Some(value) = read_env("PATTER_COMMERCE_API_TOKEN") {
            self.commerce.api_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("PATTER_COMMERCE_DEDUPLICATES") {
            self.commerce.deduplicates = parse_bool("PATTER_COMMERCE_DEDUPLICATES", &value)?;
        }
        if let Some(value) = read_env("PATTER_TICKETING_BASE_URL") {
            self.ticketing.base_url = Some(value);
        }
        if let Some(value) = read_env("PATTER_TICKETING_API_TOKEN") {
            self.ticketing.api_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("PATTER_CLASSIFIER_BASE_URL") {
            self.classifier.base_url = Some(value);
        }

        if let Some(value) = read_env("PATTER_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("PATTER_SERVER_PORT") {
            self.server.port = parse_u16("PATTER_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("PATTER_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("PATTER_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("PATTER_LOGGING_LEVEL").or_else(|| read_env("PATTER_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("PATTER_LOGGING_FORMAT").or_else(|| read_env("PATTER_LOG_FORMAT"));
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
        if let Some(commerce_api_token) = overrides.commerce_api_token {
            self.commerce.api_token = Some(secret_value(commerce_api_token));
        }
        if let Some(ticketing_api_token) = overrides.ticketing_api_token {
            self.ticketing.api_token = Some(secret_value(ticketing_api_token));
        }
        if let Some(answering_api_key) = overrides.answering_api_key {
            self.answering.api_key = Some(secret_value(answering_api_key));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_dialogue(&self.dialogue)?;
        validate_dispatch(&self.dispatch)?;
        validate_timeout("answering.timeout_secs", self.answering.timeout_secs)?;
        validate_timeout("classifier.timeout_secs", self.classifier.timeout_secs)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("patter.toml"), PathBuf::from("config/patter.toml")]
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

fn validate_dialogue(dialogue: &DialogueConfig) -> Result<(), ConfigError> {
    if dialogue.confidence_floor > 100 || dialogue.new_intent_override > 100 {
        return Err(ConfigError::Validation(
            "dialogue confidence thresholds are 0..=100 scores".to_string(),
        ));
    }

    if dialogue.new_intent_override < dialogue.confidence_floor {
        return Err(ConfigError::Validation(
            "dialogue.new_intent_override must be at least dialogue.confidence_floor".to_string(),
        ));
    }

    if dialogue.fallback_budget_max == 0 {
        return Err(ConfigError::Validation(
            "dialogue.fallback_budget_max must be greater than zero".to_string(),
        ));
    }

    if dialogue.escalation_fallback_threshold == 0 {
        return Err(ConfigError::Validation(
            "dialogue.escalation_fallback_threshold must be greater than zero".to_string(),
        ));
    }

    if dialogue.session_ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "dialogue.session_ttl_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_dispatch(dispatch: &DispatchConfig) -> Result<(), ConfigError> {
    validate_timeout("dispatch.timeout_secs", dispatch.timeout_secs)?;

    // Retry ceiling is part of the dispatch contract, not a tunable.
    if dispatch.max_retries > 2 {
        return Err(ConfigError::Validation(
            "dispatch.max_retries must be in range 0..=2".to_string(),
        ));
    }

    if dispatch.retry_base_delay_ms == 0 || dispatch.retry_base_delay_ms > 10_000 {
        return Err(ConfigError::Validation(
            "dispatch.retry_base_delay_ms must be in range 1..=10000".to_string(),
        ));
    }

    Ok(())
}

fn validate_timeout(key: &str, timeout_secs: u64) -> Result<(), ConfigError> {
    if timeout_secs == 0 || timeout_secs > 300 {
        return Err(ConfigError::Validation(format!("{key} must be in range 1..=300")));
    }
    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    const LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
    let level = logging.level.trim().to_ascii_lowercase();
    if !LEVELS.contains(&level.as_str()) {
        return Err(ConfigError::Validation(format!(
            "logging.level must be one of {}",
            LEVELS.join("|")
        )));
    }
    Ok(())
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

fn parse_u8(key: &str, value: &str) -> Result<u8, ConfigError> {
    value
        .parse::<u8>()
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() })
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value
        .parse::<u16>()
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value
        .parse::<u32>()
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnvOverride {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;
    use std::path::PathBuf;

    use secrecy::ExposeSecret;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    fn write_config(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("patter.toml");
        let mut file = std::fs::File::create(&path).expect("create config");
        file.write_all(contents.as_bytes()).expect("write config");
        (dir, path)
    }

    #[test]
    fn defaults_pass_validation() {
        let config = AppConfig::default();
        config.validate().expect("defaults must validate");
        assert_eq!(config.dialogue.fallback_budget_max, 5);
        assert_eq!(config.dispatch.max_retries, 2);
    }

    #[test]
    fn file_patch_overrides_defaults() {
        let (_dir, path) = write_config(
            r#"
[dialogue]
fallback_budget_max = 3
new_intent_override = 90

[dispatch]
max_retries = 1

[commerce]
base_url = "http://commerce.internal"
api_token = "tok-123"

[logging]
level = "debug"
format = "json"
"#,
        );

        let config = AppConfig::load(LoadOptions {
            config_path: Some(path),
            require_file: true,
            overrides: ConfigOverrides::default(),
        })
        .expect("load config");

        assert_eq!(config.dialogue.fallback_budget_max, 3);
        assert_eq!(config.dialogue.new_intent_override, 90);
        assert_eq!(config.dispatch.max_retries, 1);
        assert_eq!(config.commerce.base_url.as_deref(), Some("http://commerce.internal"));
        assert_eq!(
            config.commerce.api_token.as_ref().map(|token| token.expose_secret().to_string()),
            Some("tok-123".to_string())
        );
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn missing_required_file_is_an_error() {
        let error = AppConfig::load(LoadOptions {
            config_path: Some(PathBuf::from("/nonexistent/patter.toml")),
            require_file: true,
            overrides: ConfigOverrides::default(),
        })
        .expect_err("must fail");

        assert!(matches!(error, ConfigError::MissingConfigFile(_)));
    }

    #[test]
    fn retry_ceiling_is_enforced() {
        let (_dir, path) = write_config("[dispatch]\nmax_retries = 7\n");

        let error = AppConfig::load(LoadOptions {
            config_path: Some(path),
            require_file: true,
            overrides: ConfigOverrides::default(),
        })
        .expect_err("must fail validation");

        assert!(matches!(error, ConfigError::Validation(_)));
    }

    #[test]
    fn override_threshold_must_not_undercut_floor() {
        let (_dir, path) = write_config("[dialogue]\nconfidence_floor = 70\nnew_intent_override = 60\n");

        let error = AppConfig::load(LoadOptions {
            config_path: Some(path),
            require_file: true,
            overrides: ConfigOverrides::default(),
        })
        .expect_err("must fail validation");

        assert!(matches!(error, ConfigError::Validation(_)));
    }

    #[test]
    fn explicit_overrides_win_over_file_values() {
        let (_dir, path) = write_config("[database]\nurl = \"sqlite://file-config.db\"\n");

        let config = AppConfig::load(LoadOptions {
            config_path: Some(path),
            require_file: true,
            overrides: ConfigOverrides {
                database_url: Some("sqlite://cli-override.db".to_string()),
                ..ConfigOverrides::default()
            },
        })
        .expect("load config");

        assert_eq!(config.database.url, "sqlite://cli-override.db");
    }

    #[test]
    fn env_interpolation_requires_defined_variables() {
        let (_dir, path) =
            write_config("[commerce]\napi_token = \"${PATTER_TEST_UNSET_TOKEN_VAR}\"\n");

        let error = AppConfig::load(LoadOptions {
            config_path: Some(path),
            require_file: true,
            overrides: ConfigOverrides::default(),
        })
        .expect_err("must fail interpolation");

        assert!(matches!(error, ConfigError::MissingEnvInterpolation { .. }));
    }
}
