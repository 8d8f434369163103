use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::gateway::{self, RemoteGateway};
use crate::session::SessionStore;
use crate::types::Config;

/// Environment override for the config file location.
pub const CONFIG_ENV: &str = "SITEDESK_CONFIG";

/// Longest lifetime accepted for signed document URLs (7 days).
pub const MAX_SIGNED_URL_SECS: u64 = 7 * 24 * 60 * 60;

/// Process-wide application state: config, the signed-in session and the
/// backend gateway.
pub struct AppState {
    pub config: RwLock<Config>,
    pub session: SessionStore,
    pub gateway: Arc<dyn RemoteGateway>,
}

impl AppState {
    /// Connect to the backend named by `config`.
    pub fn new(config: Config) -> Result<Self, String> {
        let gateway = gateway::connect(&config.backend)
            .map_err(|e| format!("Failed to connect to backend: {}", e))?;
        log::info!("State: connected to {:?} backend", config.backend.kind);
        Ok(Self::with_gateway(config, gateway))
    }

    pub fn with_gateway(config: Config, gateway: Arc<dyn RemoteGateway>) -> Self {
        Self {
            config: RwLock::new(config),
            session: SessionStore::new(),
            gateway,
        }
    }

    pub fn gateway(&self) -> &dyn RemoteGateway {
        self.gateway.as_ref()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.config.read().notifications.poll_interval_secs.max(1))
    }

    pub fn signed_url_ttl(&self) -> Duration {
        Duration::from_secs(self.config.read().notifications.signed_url_secs)
    }
}

/// Get the canonical config file path (`$SITEDESK_CONFIG` or
/// `~/.sitedesk/config.json`)
pub fn config_path() -> Result<PathBuf, String> {
    if let Ok(p) = std::env::var(CONFIG_ENV) {
        if !p.trim().is_empty() {
            return Ok(PathBuf::from(p));
        }
    }
    let home = dirs::home_dir().ok_or("Could not find home directory")?;
    Ok(home.join(".sitedesk").join("config.json"))
}

pub fn load_config() -> Result<Config, String> {
    load_config_from(&config_path()?)
}

/// Read a config file. A missing file yields the defaults (local SQLite
/// backend).
pub fn load_config_from(path: &Path) -> Result<Config, String> {
    if !path.exists() {
        log::info!(
            "Config file not found at {}, using defaults",
            path.display()
        );
        return Ok(Config::default());
    }

    let content =
        fs::read_to_string(path).map_err(|e| format!("Failed to read config: {}", e))?;

    let config: Config =
        serde_json::from_str(&content).map_err(|e| format!("Failed to parse config: {}", e))?;

    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &Config) -> Result<(), String> {
    use crate::types::BackendKind;

    if config.backend.kind == BackendKind::Rest {
        match config.backend.url.as_deref() {
            Some(u) if !u.trim().is_empty() => {}
            _ => return Err("backend.url is required for the rest backend".to_string()),
        }
        if config.backend.api_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
            return Err("backend.apiKey is required for the rest backend".to_string());
        }
    }
    if config.notifications.poll_interval_secs == 0 {
        return Err("notifications.pollIntervalSecs must be at least 1".to_string());
    }
    if !(1..=MAX_SIGNED_URL_SECS).contains(&config.notifications.signed_url_secs) {
        return Err(format!(
            "notifications.signedUrlSecs must be between 1 and {}",
            MAX_SIGNED_URL_SECS
        ));
    }
    Ok(())
}

/// Apply `mutator` to the in-memory config and write it back to `path`.
pub fn update_config(
    state: &AppState,
    path: &Path,
    mutator: impl FnOnce(&mut Config),
) -> Result<Config, String> {
    let mut guard = state.config.write();
    let mut config = guard.clone();
    mutator(&mut config);
    validate_config(&config)?;

    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config dir: {}", e))?;
        }
    }

    let content = serde_json::to_string_pretty(&config)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content).map_err(|e| format!("Failed to write config: {}", e))?;
    fs::rename(&tmp, path).map_err(|e| format!("Failed to replace config: {}", e))?;

    *guard = config.clone();
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::SqliteGateway;
    use crate::types::BackendKind;

    #[test]
    fn test_missing_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config.backend.kind, BackendKind::Sqlite);
        assert_eq!(config.notifications.poll_interval_secs, 30);
    }

    #[test]
    fn test_parse_rest_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"backend": {"kind": "rest", "url": "https://example.supabase.co", "apiKey": "k"},
                "notifications": {"pollIntervalSecs": 10}}"#,
        )
        .unwrap();
        let config = load_config_from(&path).unwrap();
        assert_eq!(config.backend.kind, BackendKind::Rest);
        assert_eq!(config.backend.api_key.as_deref(), Some("k"));
        assert_eq!(config.notifications.poll_interval_secs, 10);
        assert_eq!(config.notifications.signed_url_secs, 3600);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"backend": {"kind": "rest"}}"#).unwrap();
        assert!(load_config_from(&path).unwrap_err().contains("backend.url"));

        fs::write(
            &path,
            r#"{"notifications": {"signedUrlSecs": 18446744073709551615}}"#,
        )
        .unwrap();
        assert!(load_config_from(&path).unwrap_err().contains("signedUrlSecs"));
        fs::write(&path, r#"{"notifications": {"signedUrlSecs": 0}}"#).unwrap();
        assert!(load_config_from(&path).unwrap_err().contains("signedUrlSecs"));

        fs::write(&path, "not json").unwrap();
        assert!(load_config_from(&path).unwrap_err().contains("Failed to parse"));
    }

    #[test]
    fn test_update_config_writes_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let gw: Arc<dyn RemoteGateway> = Arc::new(SqliteGateway::open_in_memory("s").unwrap());
        let state = AppState::with_gateway(Config::default(), gw);

        update_config(&state, &path, |c| c.notifications.poll_interval_secs = 5).unwrap();
        assert_eq!(state.poll_interval(), Duration::from_secs(5));

        let reloaded = load_config_from(&path).unwrap();
        assert_eq!(reloaded.notifications.poll_interval_secs, 5);

        assert!(update_config(&state, &path, |c| c.notifications.poll_interval_secs = 0).is_err());
        assert_eq!(state.poll_interval(), Duration::from_secs(5));
    }
}
