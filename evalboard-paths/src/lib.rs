//! XDG Base Directory paths for evalboard.
//!
//! CLI tools should use XDG paths for cross-platform consistency,
//! not platform-native paths. This matches tools like gh, docker, kubectl.

use std::path::PathBuf;

/// Get the evalboard config directory.
///
/// Returns `$XDG_CONFIG_HOME/evalboard` if set, otherwise `~/.config/evalboard`.
///
/// # Examples
///
/// ```
/// use evalboard_paths::config_dir;
///
/// let config = config_dir();
/// let user_config = config.join("config.toml");
/// ```
pub fn config_dir() -> PathBuf {
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config).join("evalboard")
    } else if let Some(home) = dirs::home_dir() {
        home.join(".config/evalboard")
    } else {
        PathBuf::from(".config/evalboard")
    }
}

/// Get the evalboard data directory.
///
/// Returns `$XDG_DATA_HOME/evalboard` if set, otherwise `~/.local/share/evalboard`.
/// The default run database lives here.
pub fn data_dir() -> PathBuf {
    if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
        PathBuf::from(xdg_data).join("evalboard")
    } else if let Some(home) = dirs::home_dir() {
        home.join(".local/share/evalboard")
    } else {
        PathBuf::from(".local/share/evalboard")
    }
}

/// Default location of the libSQL database file.
pub fn default_database_path() -> PathBuf {
    data_dir().join("evalboard.db")
}
