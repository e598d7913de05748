//! Credential files read once at startup from `res/*.key`.
//!
//! Mirrors the fail-fast-on-missing-required-file shape of `config::load`,
//! but isolated into its own module since these are plain files rather
//! than the TOML config.

use std::path::Path;

use error_stack::{Report, ResultExt};

use crate::aggregator::MoexCredentials;
use crate::error::ConfigError;

/// Secrets loaded from `res/*.key` files. `telegram` is required; `polygon`
/// and `moex` default to absent when their file is missing.
pub struct Credentials {
    pub telegram: String,
    pub polygon: Option<String>,
    pub moex: Option<MoexCredentials>,
}

impl Credentials {
    /// Load from the conventional `res/` layout rooted at `res_dir`.
    pub fn load(res_dir: &Path) -> Result<Self, Report<ConfigError>> {
        let telegram = read_required(&res_dir.join("telegram.key"))?;
        let polygon = read_optional(&res_dir.join("polygon.key"));
        let moex = read_optional(&res_dir.join("moex.key")).and_then(|contents| {
            let mut parts = contents.split_whitespace();
            let login = parts.next()?.to_string();
            let password = parts.next()?.to_string();
            Some(MoexCredentials { login, password })
        });

        Ok(Self {
            telegram,
            polygon,
            moex,
        })
    }
}

fn read_required(path: &Path) -> Result<String, Report<ConfigError>> {
    std::fs::read_to_string(path)
        .change_context(ConfigError::Credential)
        .attach_printable_lazy(|| format!("required credential file missing: {}", path.display()))
        .map(|s| s.trim().to_string())
}

fn read_optional(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_telegram_key_is_fatal() {
        let dir = std::env::temp_dir().join(format!("athena-creds-test-empty-{:p}", &0));
        std::fs::create_dir_all(&dir).unwrap();
        let err = Credentials::load(&dir).unwrap_err();
        assert!(matches!(err.current_context(), ConfigError::Credential));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn optional_keys_default_to_absent() {
        let dir = std::env::temp_dir().join(format!("athena-creds-test-partial-{:p}", &0));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("telegram.key"), "tok123\n").unwrap();
        let creds = Credentials::load(&dir).unwrap();
        assert_eq!(creds.telegram, "tok123");
        assert!(creds.polygon.is_none());
        assert!(creds.moex.is_none());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn moex_key_parses_login_and_password() {
        let dir = std::env::temp_dir().join(format!("athena-creds-test-moex-{:p}", &0));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("telegram.key"), "tok\n").unwrap();
        std::fs::write(dir.join("moex.key"), "alice s3cret\n").unwrap();
        let creds = Credentials::load(&dir).unwrap();
        let moex = creds.moex.unwrap();
        assert_eq!(moex.login, "alice");
        assert_eq!(moex.password, "s3cret");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
