//! Load the `[env]` table from `$XDG_CONFIG_HOME/<app>/config.toml`.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::LoadError;

/// Resolves the config dir: `$XDG_CONFIG_HOME` when set, else the platform
/// config directory (`~/.config` on Linux).
fn config_home() -> Option<PathBuf> {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg.is_empty() {
            return Some(PathBuf::from(xdg));
        }
    }
    dirs::config_dir()
}

fn xdg_config_path(app_name: &str) -> Option<PathBuf> {
    let path = config_home()?.join(app_name).join("config.toml");
    if path.is_file() {
        Some(path)
    } else {
        None
    }
}

#[derive(serde::Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    env: HashMap<String, String>,
}

/// Returns env key-value pairs from the `[env]` section. A missing file or
/// empty section yields an empty map.
pub fn load_env_map(app_name: &str) -> Result<HashMap<String, String>, LoadError> {
    let Some(path) = xdg_config_path(app_name) else {
        return Ok(HashMap::new());
    };
    let content = std::fs::read_to_string(&path).map_err(LoadError::XdgRead)?;
    let config: ConfigFile = toml::from_str(&content)?;
    Ok(config.env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn with_xdg_home<T>(dir: &std::path::Path, f: impl FnOnce() -> T) -> T {
        let prev = env::var("XDG_CONFIG_HOME").ok();
        env::set_var("XDG_CONFIG_HOME", dir);
        let out = f();
        match prev {
            Some(p) => env::set_var("XDG_CONFIG_HOME", p),
            None => env::remove_var("XDG_CONFIG_HOME"),
        }
        out
    }

    /// **Scenario**: a missing config file yields an empty map, not an error.
    #[test]
    fn missing_config_returns_empty_map() {
        let map = load_env_map("onemcp-test-nonexistent-12345").unwrap();
        assert!(map.is_empty());
    }

    /// **Scenario**: keys in `[env]` come back verbatim.
    #[test]
    fn reads_env_table() {
        let dir = tempfile::tempdir().unwrap();
        let app_dir = dir.path().join("testapp");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(
            app_dir.join("config.toml"),
            "[env]\nONEMCP_MODEL = \"gpt-4o-mini\"\nONEMCP_PORT = \"8978\"\n",
        )
        .unwrap();

        let map = with_xdg_home(dir.path(), || load_env_map("testapp")).unwrap();
        assert_eq!(map.get("ONEMCP_MODEL"), Some(&"gpt-4o-mini".to_string()));
        assert_eq!(map.get("ONEMCP_PORT"), Some(&"8978".to_string()));
    }

    /// **Scenario**: a config without `[env]` yields an empty map; invalid
    /// TOML is a parse error.
    #[test]
    fn tolerates_missing_section_rejects_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let app_dir = dir.path().join("app");
        std::fs::create_dir_all(&app_dir).unwrap();

        std::fs::write(app_dir.join("config.toml"), "[other]\nkey = \"x\"\n").unwrap();
        let map = with_xdg_home(dir.path(), || load_env_map("app")).unwrap();
        assert!(map.is_empty());

        std::fs::write(app_dir.join("config.toml"), "not toml [[[\n").unwrap();
        let result = with_xdg_home(dir.path(), || load_env_map("app"));
        assert!(matches!(result, Err(LoadError::XdgParse(_))));
    }
}
