use super::Config;

impl Config {
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("REVENANT_UPDATE_URL")
            && !url.trim().is_empty()
        {
            self.update.source_url = Some(url.trim().to_string());
        }

        if let Ok(raw) = std::env::var("REVENANT_REQUIRE_SIGNATURE")
            && let Some(required) = parse_bool(&raw)
        {
            self.update.require_signature = required;
        }

        if let Ok(dir) = std::env::var("REVENANT_STATE_DIR")
            && !dir.trim().is_empty()
        {
            self.state.dir = Some(dir);
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::test_env::{EnvVarGuard, lock_env};
    use std::path::PathBuf;

    #[test]
    fn overrides_apply() {
        let _lock = lock_env();
        let _url = EnvVarGuard::set("REVENANT_UPDATE_URL", " https://example.com/a.rev ");
        let _sig = EnvVarGuard::set("REVENANT_REQUIRE_SIGNATURE", "off");
        let _dir = EnvVarGuard::set("REVENANT_STATE_DIR", "/tmp/revenant-state");

        let mut config = Config::in_home("/srv/revenant");
        config.apply_env_overrides();

        assert_eq!(
            config.update.source_url.as_deref(),
            Some("https://example.com/a.rev")
        );
        assert!(!config.update.require_signature);
        assert_eq!(config.state_dir(), PathBuf::from("/tmp/revenant-state"));
    }

    #[test]
    fn unrecognised_bool_is_ignored() {
        let _lock = lock_env();
        let _sig = EnvVarGuard::set("REVENANT_REQUIRE_SIGNATURE", "maybe");
        let mut config = Config::in_home("/srv/revenant");
        config.apply_env_overrides();
        assert!(config.update.require_signature);
    }

    #[test]
    fn empty_values_are_ignored() {
        let _lock = lock_env();
        let _url = EnvVarGuard::set("REVENANT_UPDATE_URL", "");
        let _dir = EnvVarGuard::unset("REVENANT_STATE_DIR");
        let mut config = Config::in_home("/srv/revenant");
        config.apply_env_overrides();
        assert!(config.update.source_url.is_none());
        assert!(config.state.dir.is_none());
    }
}
