use crate::advisor::DEFAULT_ADVISOR_THRESHOLD;
use crate::breaker::{DEFAULT_COOLDOWN, DEFAULT_FAILURE_THRESHOLD};
use crate::controller::{DEFAULT_DEDUP_WINDOW, DEFAULT_LINE_WIDTH};
use crate::model::DEFAULT_BAUD_RATE;
use crate::monitor::{
    DEFAULT_INITIAL_CHECK_DELAY, DEFAULT_MIN_CHECK_SPACING, DEFAULT_STATUS_INTERVAL,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "config.toml";
const ENV_PREFIX: &str = "POLE_DISPLAY_";

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub display: DisplayConfig,
    pub resilience: ResilienceConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8085".to_string(),
            api_key: None,
            timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Endpoint used by the `connect` command when none is given.
    pub endpoint: Option<String>,
    pub baud_rate: u32,
    pub line_width: usize,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            baud_rate: DEFAULT_BAUD_RATE,
            line_width: DEFAULT_LINE_WIDTH,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
    pub dedup_window_ms: u64,
    pub status_interval_secs: u64,
    pub initial_check_delay_secs: u64,
    pub min_check_spacing_secs: u64,
    pub advisor_threshold: u32,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown_secs: DEFAULT_COOLDOWN.as_secs(),
            dedup_window_ms: DEFAULT_DEDUP_WINDOW.as_millis() as u64,
            status_interval_secs: DEFAULT_STATUS_INTERVAL.as_secs(),
            initial_check_delay_secs: DEFAULT_INITIAL_CHECK_DELAY.as_secs(),
            min_check_spacing_secs: DEFAULT_MIN_CHECK_SPACING.as_secs(),
            advisor_threshold: DEFAULT_ADVISOR_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    pub port: u16,
    pub token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 7072,
            token: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = Self::default();
        let config_path = active_config_path();

        if let Ok(raw) = fs::read_to_string(&config_path) {
            match toml::from_str::<Config>(&raw) {
                Ok(file_config) => config = file_config,
                Err(err) => tracing::warn!(
                    path = %config_path.display(),
                    error = %err,
                    "ignoring unreadable config file"
                ),
            }
        }

        config.apply_env_overrides();

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(format!("{}{}", ENV_PREFIX, key)).ok());
    }

    /// Applies `POLE_DISPLAY_*` overrides; `lookup` receives the key without
    /// the prefix. Unparseable numbers leave the current value in place.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let parse = |key: &str| lookup(key).map(|v| v.trim().to_string());

        // Display service
        if let Some(val) = lookup("BASE_URL") {
            self.service.base_url = val;
        }
        if let Some(val) = lookup("API_KEY") {
            self.service.api_key = Some(val);
        }
        override_parsed(&mut self.service.timeout_secs, parse("TIMEOUT_SECS"));

        // Display
        if let Some(val) = lookup("ENDPOINT") {
            self.display.endpoint = Some(val);
        }
        override_parsed(&mut self.display.baud_rate, parse("BAUD_RATE"));
        override_parsed(&mut self.display.line_width, parse("LINE_WIDTH"));

        // Resilience
        let r = &mut self.resilience;
        override_parsed(&mut r.failure_threshold, parse("FAILURE_THRESHOLD"));
        override_parsed(&mut r.cooldown_secs, parse("COOLDOWN_SECS"));
        override_parsed(&mut r.dedup_window_ms, parse("DEDUP_WINDOW_MS"));
        override_parsed(&mut r.status_interval_secs, parse("STATUS_INTERVAL_SECS"));
        override_parsed(&mut r.initial_check_delay_secs, parse("INITIAL_CHECK_DELAY_SECS"));
        override_parsed(&mut r.min_check_spacing_secs, parse("MIN_CHECK_SPACING_SECS"));
        override_parsed(&mut r.advisor_threshold, parse("ADVISOR_THRESHOLD"));

        // Operator server
        if let Some(val) = lookup("SERVER_ENABLED") {
            self.server.enabled = val.trim().parse().unwrap_or(true);
        }
        override_parsed(&mut self.server.port, parse("SERVER_PORT"));
        if let Some(val) = lookup("SERVER_TOKEN") {
            self.server.token = Some(val);
        }
    }

    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.service.base_url.trim().is_empty() {
            return Err("service.base_url must be set".into());
        }
        if self.service.timeout_secs == 0 {
            return Err("service.timeout_secs must be non-zero".into());
        }
        if self.display.baud_rate == 0 {
            return Err("display.baud_rate must be non-zero".into());
        }
        if self.display.line_width == 0 {
            return Err("display.line_width must be non-zero".into());
        }
        if self.resilience.failure_threshold == 0 {
            return Err("resilience.failure_threshold must be >= 1".into());
        }
        if self.resilience.advisor_threshold == 0 {
            return Err("resilience.advisor_threshold must be >= 1".into());
        }
        if self.resilience.status_interval_secs == 0 {
            return Err("resilience.status_interval_secs must be non-zero".into());
        }
        if self.server.enabled && self.server.port == 0 {
            return Err("server.port must be non-zero".into());
        }
        Ok(())
    }

    pub fn write_default<P: AsRef<Path>>(path: P) -> Result<(), Box<dyn std::error::Error>> {
        if path.as_ref().exists() {
            return Err("config.toml already exists".into());
        }
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let data = toml::to_string_pretty(&Config::default())?;
        fs::write(path, data)?;
        Ok(())
    }

    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        let path = active_config_path();
        self.validate()?;
        let data = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, data)?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        managed_config_path()
    }
}

fn override_parsed<T: std::str::FromStr>(slot: &mut T, raw: Option<String>) {
    if let Some(value) = raw.and_then(|v| v.parse().ok()) {
        *slot = value;
    }
}

fn managed_config_path() -> PathBuf {
    if let Ok(path) = env::var(format!("{}CONFIG_PATH", ENV_PREFIX)) {
        return PathBuf::from(path);
    }
    let appdata = env::var("APPDATA").unwrap_or_else(|_| ".".to_string());
    Path::new(&appdata).join("PoleDisplay").join(CONFIG_FILE)
}

fn active_config_path() -> PathBuf {
    let local = PathBuf::from(CONFIG_FILE);
    if local.exists() {
        local
    } else {
        managed_config_path()
    }
}
