use anyhow::{Context, Result};
use governor::Quota;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP service settings
    pub server: ServerConfig,

    /// Where results are written
    pub storage: StorageConfig,

    /// Speech-to-text settings
    pub transcription: TranscriptionConfig,

    /// External tool locations
    pub tools: ToolsConfig,

    /// Log verbosity for this crate (trace, debug, info, warn, error)
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind
    pub host: String,

    /// Port to bind
    pub port: u16,

    /// Per-client limit on pipeline starts, e.g. "5 per minute"
    pub rate_limit: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for downloaded profiles
    pub download_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// Transcribe extracted audio
    pub enabled: bool,

    /// Whisper model id (tiny, base, small, medium, large-v3, ...)
    pub model: String,

    /// Spoken language code, or "auto"
    pub language: String,

    /// Directory holding ggml model files
    pub models_dir: PathBuf,

    /// whisper.cpp executable
    pub binary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub yt_dlp: String,
    pub ffmpeg: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            transcription: TranscriptionConfig::default(),
            tools: ToolsConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            rate_limit: "5 per minute".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("downloads"),
        }
    }
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "base".to_string(),
            language: "en".to_string(),
            models_dir: PathBuf::from("models"),
            binary: "whisper-cli".to_string(),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            yt_dlp: "yt-dlp".to_string(),
            ffmpeg: "ffmpeg".to_string(),
        }
    }
}

/// A parsed `<N> per <second|minute|hour>` limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub count: NonZeroU32,
    pub period: RatePeriod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatePeriod {
    Second,
    Minute,
    Hour,
}

impl RateLimit {
    pub fn parse(value: &str) -> Result<Self> {
        let parts: Vec<&str> = value.split_whitespace().collect();
        let [count, "per", period] = parts.as_slice() else {
            anyhow::bail!("Rate limit must look like \"5 per minute\", got {:?}", value);
        };

        let count: u32 = count
            .parse()
            .with_context(|| format!("Invalid rate limit count in {:?}", value))?;
        let count = NonZeroU32::new(count).context("Rate limit count must be at least 1")?;

        let period = match period.to_lowercase().trim_end_matches('s') {
            "second" => RatePeriod::Second,
            "minute" => RatePeriod::Minute,
            "hour" => RatePeriod::Hour,
            other => anyhow::bail!("Unknown rate limit period: {}", other),
        };

        Ok(Self { count, period })
    }

    pub fn quota(&self) -> Quota {
        match self.period {
            RatePeriod::Second => Quota::per_second(self.count),
            RatePeriod::Minute => Quota::per_minute(self.count),
            RatePeriod::Hour => Quota::per_hour(self.count),
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl Config {
    /// Load configuration from file (if any), then apply environment overrides
    pub async fn load() -> Result<Self> {
        let mut config = match Self::config_path() {
            Some(path) if path.exists() => {
                let content = fs_err::read_to_string(&path)
                    .context("Failed to read config file")?;
                serde_yaml::from_str::<Config>(&content)
                    .context("Failed to parse config file")?
            }
            _ => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the user config directory
    pub async fn save(&self) -> Result<PathBuf> {
        let config_path = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("profile-archiver")
            .join("config.yaml");

        if let Some(parent) = config_path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;
        fs_err::write(&config_path, content).context("Failed to write config file")?;

        Ok(config_path)
    }

    /// Get configuration file path
    fn config_path() -> Option<PathBuf> {
        // First try current directory for easy testing
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Some(local_config);
        }

        dirs::config_dir().map(|dir| dir.join("profile-archiver").join("config.yaml"))
    }

    /// Apply environment-style overrides; `lookup` returns the value for a variable name
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("HOST").or_else(|| lookup("FLASK_HOST")) {
            self.server.host = host;
        }
        if let Some(port) = lookup("PORT")
            .or_else(|| lookup("FLASK_PORT"))
            .and_then(|p| p.trim().parse().ok())
        {
            self.server.port = port;
        }
        if let Some(rate_limit) = lookup("RATE_LIMIT") {
            self.server.rate_limit = rate_limit;
        }
        if let Some(dir) = lookup("DOWNLOAD_DIR") {
            self.storage.download_dir = PathBuf::from(dir);
        }
        if let Some(enabled) = lookup("ENABLE_TRANSCRIPTION").as_deref().and_then(parse_bool) {
            self.transcription.enabled = enabled;
        }
        if let Some(model) = lookup("WHISPER_MODEL") {
            self.transcription.model = model;
        }
        if let Some(language) = lookup("WHISPER_LANGUAGE") {
            self.transcription.language = language;
        }
        if let Some(dir) = lookup("WHISPER_MODELS_DIR") {
            self.transcription.models_dir = PathBuf::from(dir);
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.log_level = level.to_lowercase();
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.storage.download_dir.as_os_str().is_empty() {
            anyhow::bail!("Download directory must be configured");
        }

        if self.transcription.model.trim().is_empty() {
            anyhow::bail!("Whisper model must be configured");
        }

        RateLimit::parse(&self.server.rate_limit)?;

        Ok(())
    }

    /// Parsed per-client rate limit
    pub fn rate_limit(&self) -> Result<RateLimit> {
        RateLimit::parse(&self.server.rate_limit)
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  Listen: {}:{}", self.server.host, self.server.port);
        println!("  Rate Limit: {}", self.server.rate_limit);
        println!("  Download Dir: {}", self.storage.download_dir.display());
        println!("  Transcription: {}", self.transcription.enabled);
        println!("  Whisper Model: {}", self.transcription.model);
        println!("  Whisper Language: {}", self.transcription.language);
        println!("  Models Dir: {}", self.transcription.models_dir.display());
        println!("  Log Level: {}", self.log_level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.storage.download_dir, PathBuf::from("downloads"));
        assert!(config.transcription.enabled);
        assert_eq!(config.transcription.model, "base");
        assert_eq!(config.transcription.language, "en");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config: Config = serde_yaml::from_str(
            "storage:\n  download_dir: /data\ntranscription:\n  enabled: false\n",
        )
        .unwrap();
        assert_eq!(config.storage.download_dir, PathBuf::from("/data"));
        assert!(!config.transcription.enabled);
        assert_eq!(config.transcription.model, "base");
        assert_eq!(config.server.rate_limit, "5 per minute");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("DOWNLOAD_DIR", "/srv/archive"),
            ("ENABLE_TRANSCRIPTION", "FALSE"),
            ("WHISPER_MODEL", "small"),
            ("PORT", "8080"),
            ("LOG_LEVEL", "DEBUG"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.storage.download_dir, PathBuf::from("/srv/archive"));
        assert!(!config.transcription.enabled);
        assert_eq!(config.transcription.model, "small");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_unparsable_overrides_are_ignored() {
        let mut config = Config::default();
        config.apply_overrides(|key| match key {
            "PORT" => Some("not-a-port".to_string()),
            "ENABLE_TRANSCRIPTION" => Some("maybe".to_string()),
            _ => None,
        });
        assert_eq!(config.server.port, 5000);
        assert!(config.transcription.enabled);
    }

    #[test]
    fn test_flask_host_and_port_are_fallbacks() {
        let mut config = Config::default();
        config.apply_overrides(|key| match key {
            "FLASK_HOST" => Some("0.0.0.0".to_string()),
            "FLASK_PORT" => Some("8080".to_string()),
            _ => None,
        });
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);

        let mut config = Config::default();
        config.apply_overrides(|key| match key {
            "PORT" => Some("9000".to_string()),
            "FLASK_PORT" => Some("8080".to_string()),
            _ => None,
        });
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    fn test_rate_limit_parse() {
        let limit = RateLimit::parse("5 per minute").unwrap();
        assert_eq!(limit.count.get(), 5);
        assert_eq!(limit.period, RatePeriod::Minute);

        assert_eq!(RateLimit::parse("10 per Seconds").unwrap().period, RatePeriod::Second);
        assert!(RateLimit::parse("0 per minute").is_err());
        assert!(RateLimit::parse("five per minute").is_err());
        assert!(RateLimit::parse("5 per fortnight").is_err());
        assert!(RateLimit::parse("5/minute").is_err());
    }

    #[test]
    fn test_validate_rejects_bad_rate_limit() {
        let mut config = Config::default();
        config.server.rate_limit = "lots".to_string();
        assert!(config.validate().is_err());
    }
}
