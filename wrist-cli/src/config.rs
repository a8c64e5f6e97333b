//! Configuration discovery for hawrist.
//!
//! Precedence, lowest first: the configuration file, then `HASS_URL` /
//! `HASS_TOKEN`, then `--url` / `--token` (clap folds the last two
//! together).

use anyhow::{Context, Result};
use hawrist_client::{AccessToken, ClientConfig};
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "hawrist.toml";

/// Build the client configuration.
pub fn resolve(
    explicit: Option<&Path>,
    url: Option<&str>,
    token: Option<&str>,
) -> Result<ClientConfig> {
    let default_path = default_config_path().ok();
    resolve_with(explicit, default_path.as_deref(), url, token)
}

fn resolve_with(
    explicit: Option<&Path>,
    default_path: Option<&Path>,
    url: Option<&str>,
    token: Option<&str>,
) -> Result<ClientConfig> {
    let from_file = match (explicit, default_path) {
        (Some(path), _) => Some(
            ClientConfig::from_file(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        ),
        (None, Some(path)) if path.exists() => Some(
            ClientConfig::from_file(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        ),
        _ => None,
    };

    let mut config = match (from_file, url, token) {
        (Some(config), _, _) => config,
        (None, Some(url), Some(token)) => ClientConfig::new(url, token),
        (None, _, _) => {
            let hint = default_path
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| CONFIG_FILE.to_string());
            anyhow::bail!(
                "No configuration found. Pass --url and --token, set HASS_URL and HASS_TOKEN, or create {}",
                hint
            );
        }
    };

    if let Some(url) = url {
        config.server.url = url.to_string();
    }
    if let Some(token) = token {
        config.server.access_token = AccessToken::new(token);
    }
    if config.server.access_token.is_empty() {
        anyhow::bail!("Access token is empty");
    }
    Ok(config)
}

/// Default location of the configuration file.
fn default_config_path() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("io", "hawrist", "hawrist")
        .context("Could not determine home directory")?;
    Ok(dirs.config_dir().join(CONFIG_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join(CONFIG_FILE);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    const FILE_BODY: &str = "[server]\nurl = \"http://file.local:8123\"\naccess_token = \"file-token\"\n\n[session]\nreconnect_interval_ms = 1000\n";

    #[test]
    fn flags_alone_are_enough() {
        let config =
            resolve_with(None, None, Some("http://flag.local:8123"), Some("flag-token")).unwrap();
        assert_eq!(config.server.url, "http://flag.local:8123");
        assert_eq!(config.server.access_token.expose(), "flag-token");
        assert_eq!(config.session.reconnect_interval_ms, 2500);
    }

    #[test]
    fn explicit_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), FILE_BODY);

        let config = resolve_with(Some(&path), None, None, None).unwrap();
        assert_eq!(config.server.url, "http://file.local:8123");
        assert_eq!(config.session.reconnect_interval_ms, 1000);
    }

    #[test]
    fn default_file_is_used_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), FILE_BODY);

        let config = resolve_with(None, Some(&path), None, None).unwrap();
        assert_eq!(config.server.access_token.expose(), "file-token");
    }

    #[test]
    fn flags_override_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), FILE_BODY);

        let config =
            resolve_with(Some(&path), None, Some("https://override.example"), None).unwrap();
        assert_eq!(config.server.url, "https://override.example");
        assert_eq!(config.server.access_token.expose(), "file-token");
        assert_eq!(config.session.reconnect_interval_ms, 1000);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let err = resolve_with(Some(&path), None, Some("http://x"), Some("t")).unwrap_err();
        assert!(err.to_string().contains("absent.toml"));
    }

    #[test]
    fn nothing_configured_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let absent = dir.path().join(CONFIG_FILE);
        let err = resolve_with(None, Some(&absent), Some("http://x"), None).unwrap_err();
        assert!(err.to_string().contains("No configuration found"));
    }

    #[test]
    fn empty_token_is_rejected() {
        assert!(resolve_with(None, None, Some("http://x"), Some("")).is_err());
    }
}
