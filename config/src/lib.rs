//! Load configuration from XDG `config.toml` and project `.env`, then apply
//! to the process environment with priority: **existing env > .env > XDG**.
//!
//! Recognized keys (all optional unless the server says otherwise):
//! `ONEMCP_HANDBOOK`, `ONEMCP_PROVIDER`, `ONEMCP_MODEL`, `ONEMCP_HOST`,
//! `ONEMCP_PORT`, `ONEMCP_PLAN_CACHE_PATH`, `ONEMCP_SANDBOX_TIMEOUT_MS`,
//! `ONEMCP_FANOUT_CONCURRENCY`, plus provider credentials
//! (`OPENAI_API_KEY`, `OPENAI_BASE_URL`, `ANTHROPIC_API_KEY`).

mod dotenv;
mod xdg_toml;

use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("read xdg config: {0}")]
    XdgRead(std::io::Error),
    #[error("parse xdg toml: {0}")]
    XdgParse(#[from] toml::de::Error),
    #[error("read .env: {0}")]
    DotenvRead(std::io::Error),
}

/// Loads config from XDG `config.toml` and optional project `.env`, then
/// sets environment variables only for keys that are **not** already set.
///
/// Order of precedence when a key is missing from the process environment:
/// 1. Value from project `.env` (current directory, or `override_dir`)
/// 2. Value from `$XDG_CONFIG_HOME/<app_name>/config.toml` `[env]` table
///
/// * `app_name`: e.g. `"onemcp"` - XDG path `~/.config/<app_name>/config.toml`.
/// * `override_dir`: when `Some`, `.env` is looked up there instead of the
///   current directory.
pub fn load_and_apply(app_name: &str, override_dir: Option<&Path>) -> Result<(), LoadError> {
    let xdg_map = xdg_toml::load_env_map(app_name)?;
    let dotenv_map = dotenv::load_env_map(override_dir).map_err(LoadError::DotenvRead)?;

    let mut keys: std::collections::BTreeSet<String> = xdg_map.keys().cloned().collect();
    keys.extend(dotenv_map.keys().cloned());

    for key in keys {
        if std::env::var(&key).is_ok() {
            continue; // existing env wins
        }
        if let Some(value) = dotenv_map.get(&key).or_else(|| xdg_map.get(&key)) {
            std::env::set_var(&key, value);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn restore_var(key: &str, prev: Option<String>) {
        match prev {
            Some(v) => env::set_var(key, v),
            None => env::remove_var(key),
        }
    }

    /// **Scenario**: a key already set in the environment is never overwritten.
    #[test]
    fn existing_env_wins() {
        env::set_var("ONEMCP_CONFIG_TEST_EXISTING", "from_env");
        let _ = load_and_apply("onemcp", None);
        assert_eq!(
            env::var("ONEMCP_CONFIG_TEST_EXISTING").as_deref(),
            Ok("from_env")
        );
        env::remove_var("ONEMCP_CONFIG_TEST_EXISTING");
    }

    /// **Scenario**: no config sources at all is fine.
    #[test]
    fn load_and_apply_no_config_ok() {
        let r = load_and_apply("onemcp-nonexistent-app-xyz", None::<&std::path::Path>);
        assert!(r.is_ok());
    }

    /// **Scenario**: `.env` beats the XDG table when both define a key.
    #[test]
    fn dotenv_overrides_xdg() {
        let xdg_dir = tempfile::tempdir().unwrap();
        let app_dir = xdg_dir.path().join("onemcp");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(
            app_dir.join("config.toml"),
            "[env]\nONEMCP_CONFIG_TEST_PRIORITY = \"from_xdg\"\n",
        )
        .unwrap();

        let dotenv_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dotenv_dir.path().join(".env"),
            "ONEMCP_CONFIG_TEST_PRIORITY=from_dotenv\n",
        )
        .unwrap();

        let prev_xdg = env::var("XDG_CONFIG_HOME").ok();
        env::set_var("XDG_CONFIG_HOME", xdg_dir.path());
        env::remove_var("ONEMCP_CONFIG_TEST_PRIORITY");

        let _ = load_and_apply("onemcp", Some(dotenv_dir.path()));
        let val = env::var("ONEMCP_CONFIG_TEST_PRIORITY").unwrap();
        env::remove_var("ONEMCP_CONFIG_TEST_PRIORITY");
        restore_var("XDG_CONFIG_HOME", prev_xdg);

        assert_eq!(val, "from_dotenv");
    }

    /// **Scenario**: the XDG table applies when `.env` is absent.
    #[test]
    fn xdg_applied_when_no_dotenv() {
        let xdg_dir = tempfile::tempdir().unwrap();
        let app_dir = xdg_dir.path().join("onemcp");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(
            app_dir.join("config.toml"),
            "[env]\nONEMCP_CONFIG_TEST_XDG_ONLY = \"from_xdg\"\n",
        )
        .unwrap();

        let empty_dir = tempfile::tempdir().unwrap();

        let prev_xdg = env::var("XDG_CONFIG_HOME").ok();
        env::set_var("XDG_CONFIG_HOME", xdg_dir.path());
        env::remove_var("ONEMCP_CONFIG_TEST_XDG_ONLY");

        let _ = load_and_apply("onemcp", Some(empty_dir.path()));
        let val = env::var("ONEMCP_CONFIG_TEST_XDG_ONLY").unwrap();
        env::remove_var("ONEMCP_CONFIG_TEST_XDG_ONLY");
        restore_var("XDG_CONFIG_HOME", prev_xdg);

        assert_eq!(val, "from_xdg");
    }
}
