use super::Config;
use super::types::{CONFIG_FILE, HOME_DIR_NAME, HOME_ENV};
use anyhow::{Context, Result};
use directories::UserDirs;
use std::fs;
use std::path::{Path, PathBuf};

/// `REVENANT_HOME` when set, otherwise `~/.revenant`.
pub fn resolve_home() -> Result<PathBuf> {
    if let Ok(raw) = std::env::var(HOME_ENV)
        && !raw.trim().is_empty()
    {
        return Ok(PathBuf::from(shellexpand::tilde(raw.trim()).as_ref()));
    }
    let home = UserDirs::new()
        .map(|u| u.home_dir().to_path_buf())
        .context("Could not find home directory")?;
    Ok(home.join(HOME_DIR_NAME))
}

impl Config {
    pub fn load_or_init() -> Result<Self> {
        Self::load_or_init_in(&resolve_home()?)
    }

    /// Loads `<home>/config.toml`, writing the defaults first when absent.
    /// Environment overrides are applied after the file is read and are
    /// never written back.
    pub fn load_or_init_in(home: &Path) -> Result<Self> {
        let config_path = home.join(CONFIG_FILE);
        if !home.exists() {
            fs::create_dir_all(home).context("Failed to create revenant home directory")?;
        }

        let mut config = if config_path.exists() {
            let contents =
                fs::read_to_string(&config_path).context("Failed to read config file")?;
            let mut config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            config.home_dir = home.to_path_buf();
            config.config_path = config_path;
            config
        } else {
            let config = Self::in_home(home);
            config.save()?;
            config
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&self.config_path, toml_str).context("Failed to write config file")?;
        Ok(())
    }
}
