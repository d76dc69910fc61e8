//! # Configuration Management
//!
//! Loads application configuration from, lowest to highest priority:
//! 1. Default values (the `Default` impls below)
//! 2. `config.toml` in the working directory, if present
//! 3. `APP_` prefixed environment variables, `__` between section and key
//!    (e.g. `APP_RATE_LIMIT__CALLS=10`)
//! 4. The conventional variable names deployments already use
//!    (`PORT`, `ELEVENLABS_API_KEY`, `TWILIO_AUTH_TOKEN`, ...)
//!
//! `.env` is loaded by `main` before any of this runs.
//!
//! ## Secrets:
//! API keys, auth tokens and the JWT secret never appear in `Debug` output,
//! so the whole config can be logged at startup.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub elevenlabs: ElevenLabsConfig,
    pub twilio: TwilioConfig,
    pub cors: CorsConfig,
    pub rate_limit: RateLimitConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
    pub catalog: CatalogConfig,
    pub speech: SpeechConfig,
}

/// HTTP listener settings.
///
/// ## Fields:
/// - `host`: bind address ("0.0.0.0" in containers)
/// - `port`: TCP port
/// - `public_host`: host name Twilio reaches us on (e.g. an ngrok domain).
///   When unset the request's `Host` header is used.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub public_host: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            public_host: None,
        }
    }
}

/// ElevenLabs Conversational AI settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct ElevenLabsConfig {
    pub api_key: String,
    /// Base agent used when no era-specific agent is configured.
    pub agent_id: String,
    pub api_base: String,
    pub ws_base: String,
    /// Fetch a signed websocket URL instead of connecting to the public one.
    pub requires_auth: bool,
    /// How long to wait for the engine to accept a session configuration.
    pub handshake_timeout_secs: u64,
}

impl Default for ElevenLabsConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            agent_id: String::new(),
            api_base: "https://api.elevenlabs.io".to_string(),
            ws_base: "wss://api.elevenlabs.io".to_string(),
            requires_auth: true,
            handshake_timeout_secs: 10,
        }
    }
}

impl fmt::Debug for ElevenLabsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElevenLabsConfig")
            .field("api_key", &redact(&self.api_key))
            .field("agent_id", &self.agent_id)
            .field("api_base", &self.api_base)
            .field("ws_base", &self.ws_base)
            .field("requires_auth", &self.requires_auth)
            .field("handshake_timeout_secs", &self.handshake_timeout_secs)
            .finish()
    }
}

/// Twilio account used to place calls.
#[derive(Clone, Serialize, Deserialize)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    /// Caller id for outbound calls, E.164.
    pub phone_number: String,
    pub api_base: String,
}

impl Default for TwilioConfig {
    fn default() -> Self {
        Self {
            account_sid: String::new(),
            auth_token: String::new(),
            phone_number: String::new(),
            api_base: "https://api.twilio.com".to_string(),
        }
    }
}

impl fmt::Debug for TwilioConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwilioConfig")
            .field("account_sid", &self.account_sid)
            .field("auth_token", &redact(&self.auth_token))
            .field("phone_number", &self.phone_number)
            .field("api_base", &self.api_base)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
        }
    }
}

/// Sliding-window limit on outbound calls per caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub calls: usize,
    pub window_minutes: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            calls: 5,
            window_minutes: 5,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// When false every route is public and rate limits key on client IP.
    pub enabled: bool,
    /// HS256 secret. A random one is generated per process when unset, which
    /// invalidates all tokens on restart.
    pub jwt_secret: Option<String>,
    pub expiration_hours: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            jwt_secret: None,
            expiration_hours: 1,
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("enabled", &self.enabled)
            .field("jwt_secret", &self.jwt_secret.as_deref().map(redact))
            .field("expiration_hours", &self.expiration_hours)
            .finish()
    }
}

/// Verbosity of the per-stream logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log raw inbound protocol messages and periodic media frame lines.
    pub debug_logs: bool,
    /// With `debug_logs`, log every Nth inbound media frame.
    pub frame_log_interval: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            debug_logs: false,
            frame_log_interval: 50,
        }
    }
}

/// Optional override paths for the persona data files. Unset or unreadable
/// paths fall back to the copies bundled into the binary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    pub agents_file: Option<String>,
    pub voices_file: Option<String>,
    pub first_messages_file: Option<String>,
}

/// Local text-to-speech used for the fallback apology.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    pub command: String,
    pub voice_en: String,
    pub voice_es: String,
    pub words_per_minute: u32,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            command: "espeak-ng".to_string(),
            voice_en: "en-us".to_string(),
            voice_es: "es".to_string(),
            words_per_minute: 150,
        }
    }
}

/// Conventional environment names and the config keys they override.
const STRING_OVERRIDES: [(&str, &str); 10] = [
    ("HOST", "server.host"),
    ("PORT", "server.port"),
    ("PUBLIC_HOST", "server.public_host"),
    ("ELEVENLABS_API_KEY", "elevenlabs.api_key"),
    ("ELEVENLABS_AGENT_ID", "elevenlabs.agent_id"),
    ("TWILIO_ACCOUNT_SID", "twilio.account_sid"),
    ("TWILIO_AUTH_TOKEN", "twilio.auth_token"),
    ("TWILIO_PHONE_NUMBER", "twilio.phone_number"),
    ("JWT_SECRET", "auth.jwt_secret"),
    ("JWT_EXPIRATION_HOURS", "auth.expiration_hours"),
];

const NUMBER_OVERRIDES: [(&str, &str); 2] = [
    ("RATE_LIMIT_CALLS", "rate_limit.calls"),
    ("RATE_LIMIT_WINDOW_MINUTES", "rate_limit.window_minutes"),
];

const BOOL_OVERRIDES: [(&str, &str); 3] = [
    ("AUTH_ENABLED", "auth.enabled"),
    ("DEBUG_LOGS", "logging.debug_logs"),
    ("ELEVENLABS_REQUIRES_AUTH", "elevenlabs.requires_auth"),
];

impl AppConfig {
    pub fn load() -> Result<Self> {
        Self::load_with(&|key| env::var(key).ok())
    }

    /// Load with an explicit lookup for the conventional variable names.
    pub fn load_with(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        for (var, key) in STRING_OVERRIDES {
            if let Some(value) = lookup(var).filter(|v| !v.trim().is_empty()) {
                settings = settings.set_override(key, value.trim().to_string())?;
            }
        }

        for (var, key) in NUMBER_OVERRIDES {
            if let Some(value) = lookup(var) {
                let number: i64 = value
                    .trim()
                    .parse()
                    .map_err(|_| anyhow::anyhow!("{} must be a whole number, got {:?}", var, value))?;
                settings = settings.set_override(key, number)?;
            }
        }

        for (var, key) in BOOL_OVERRIDES {
            if let Some(value) = lookup(var) {
                settings = settings.set_override(key, parse_flag(&value))?;
            }
        }

        if let Some(origins) = lookup("ALLOWED_ORIGINS") {
            let origins: Vec<String> = origins
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_string)
                .collect();
            settings = settings.set_override("cors.allowed_origins", origins)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Check that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.rate_limit.calls == 0 {
            return Err(anyhow::anyhow!("Rate limit must allow at least one call"));
        }

        if self.rate_limit.window_minutes == 0 {
            return Err(anyhow::anyhow!("Rate limit window must be at least one minute"));
        }

        if self.auth.expiration_hours <= 0 {
            return Err(anyhow::anyhow!("Token lifetime must be positive"));
        }

        if self.speech.command.trim().is_empty() {
            return Err(anyhow::anyhow!("Speech command cannot be empty"));
        }

        Ok(())
    }

    /// The server cannot hold a conversation without these.
    pub fn validate_integrations(&self) -> Result<()> {
        if self.elevenlabs.api_key.is_empty() {
            return Err(anyhow::anyhow!("ELEVENLABS_API_KEY is required"));
        }
        if self.elevenlabs.agent_id.is_empty() {
            return Err(anyhow::anyhow!("ELEVENLABS_AGENT_ID is required"));
        }
        Ok(())
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load_from(vars: &[(&str, &str)]) -> AppConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::load_with(&|key| vars.get(key).cloned()).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.rate_limit.calls, 5);
        assert_eq!(config.logging.frame_log_interval, 50);
        assert!(config.validate().is_ok());
        assert!(config.validate_integrations().is_err());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.rate_limit.window_minutes = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.speech.command = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_conventional_env_names() {
        let config = load_from(&[
            ("PORT", "9100"),
            ("ELEVENLABS_API_KEY", "xi-key"),
            ("ELEVENLABS_AGENT_ID", "agent-base"),
            ("TWILIO_PHONE_NUMBER", "+15550001111"),
            ("RATE_LIMIT_CALLS", "10"),
            ("AUTH_ENABLED", "false"),
            ("DEBUG_LOGS", "1"),
            ("ALLOWED_ORIGINS", "https://a.example, https://b.example,"),
        ]);

        assert_eq!(config.server.port, 9100);
        assert_eq!(config.elevenlabs.api_key, "xi-key");
        assert_eq!(config.twilio.phone_number, "+15550001111");
        assert_eq!(config.rate_limit.calls, 10);
        assert!(!config.auth.enabled);
        assert!(config.logging.debug_logs);
        assert_eq!(
            config.cors.allowed_origins,
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
        assert!(config.validate_integrations().is_ok());
    }

    #[test]
    fn test_bad_number_is_reported() {
        let vars: HashMap<&str, &str> = [("RATE_LIMIT_CALLS", "many")].into_iter().collect();
        let err = AppConfig::load_with(&|key| vars.get(key).map(|v| v.to_string())).unwrap_err();
        assert!(err.to_string().contains("RATE_LIMIT_CALLS"));
    }

    #[test]
    fn test_debug_output_hides_secrets() {
        let mut config = AppConfig::default();
        config.elevenlabs.api_key = "xi-secret".to_string();
        config.twilio.auth_token = "tw-secret".to_string();
        config.auth.jwt_secret = Some("jwt-secret".to_string());

        let printed = format!("{:?}", config);
        assert!(!printed.contains("xi-secret"));
        assert!(!printed.contains("tw-secret"));
        assert!(!printed.contains("jwt-secret"));
        assert!(printed.contains("<redacted>"));
    }
}
