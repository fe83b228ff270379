use quotevault_core::{CONFIG_FILE_NAME, QUOTEVAULT_DATA_DIR_VAR};
use std::env;
use std::path::PathBuf;

/// XDG Base Directory paths for quotevault
pub struct XdgPaths;

impl XdgPaths {
    /// Get XDG_CONFIG_HOME/quotevault or fallback
    pub fn config_dir() -> PathBuf {
        env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .map(|home| home.join(".config"))
                    .unwrap_or_else(|| PathBuf::from(".config"))
            })
            .join("quotevault")
    }

    /// Data directory: `QUOTEVAULT_DATA_DIR`, else XDG_DATA_HOME/quotevault
    pub fn data_dir() -> PathBuf {
        if let Ok(dir) = env::var(QUOTEVAULT_DATA_DIR_VAR) {
            return PathBuf::from(dir);
        }
        env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .map(|home| home.join(".local/share"))
                    .unwrap_or_else(|| PathBuf::from(".local/share"))
            })
            .join("quotevault")
    }

    /// Path of the optional JSON config file
    pub fn config_file() -> PathBuf {
        Self::config_dir().join(CONFIG_FILE_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn data_dir_honours_override() {
        env::set_var(QUOTEVAULT_DATA_DIR_VAR, "/tmp/qv-data");
        assert_eq!(XdgPaths::data_dir(), PathBuf::from("/tmp/qv-data"));
        env::remove_var(QUOTEVAULT_DATA_DIR_VAR);
    }

    #[test]
    #[serial]
    fn config_file_lives_under_xdg_config_home() {
        env::set_var("XDG_CONFIG_HOME", "/tmp/qv-config");
        assert_eq!(
            XdgPaths::config_file(),
            PathBuf::from("/tmp/qv-config/quotevault/config.json")
        );
        env::remove_var("XDG_CONFIG_HOME");
    }
}
