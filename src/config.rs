use std::path::PathBuf;
use std::time::Duration;

use crate::rate_limit::RateLimitConfig;

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024; // 50 MB
pub const DEFAULT_MAX_UPLOAD_FILES: usize = 5;

/// Per-request upload limits.
#[derive(Debug, Clone, Copy)]
pub struct UploadLimits {
    pub max_file_size: usize,
    pub max_files: usize,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self { max_file_size: DEFAULT_MAX_UPLOAD_BYTES, max_files: DEFAULT_MAX_UPLOAD_FILES }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub uploads_dir: PathBuf,
    pub limits: UploadLimits,
    pub frontend_url: Option<String>,
    pub enable_hsts: bool,
    /// Honour `Forwarded`/`X-Forwarded-For` for client addresses (only behind a reverse proxy).
    pub trust_proxy: bool,
    pub jwt_secret: Option<String>,
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
    pub rate_limit_enabled: bool,
    pub rate_limits: RateLimitConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any key lookup; unparsable numbers fall back to defaults.
    pub fn from_lookup<F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| get(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let number = |name: &str, default: usize| non_empty(name).and_then(|v| v.parse().ok()).unwrap_or(default);
        let flag = |name: &str, default: bool| {
            non_empty(name).map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(default)
        };
        let window = |name: &str, default: u64| Duration::from_secs(number(name, default as usize) as u64);

        Self {
            host: non_empty("HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: non_empty("PORT").and_then(|v| v.parse().ok()).unwrap_or(5000),
            database_url: non_empty("DATABASE_URL").unwrap_or_else(|| "sqlite://data/presentations.db".into()),
            uploads_dir: non_empty("UPLOADS_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("uploads")),
            limits: UploadLimits {
                max_file_size: number("MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES),
                max_files: number("MAX_UPLOAD_FILES", DEFAULT_MAX_UPLOAD_FILES),
            },
            frontend_url: non_empty("FRONTEND_URL"),
            enable_hsts: flag("ENABLE_HSTS", false),
            trust_proxy: flag("TRUST_PROXY", false),
            jwt_secret: non_empty("JWT_SECRET"),
            admin_username: non_empty("ADMIN_USERNAME"),
            admin_password: non_empty("ADMIN_PASSWORD"),
            rate_limit_enabled: flag("RATE_LIMIT_ENABLED", true),
            rate_limits: RateLimitConfig {
                upload_limit: number("RL_UPLOAD_LIMIT", 10),
                upload_window: window("RL_UPLOAD_WINDOW", 3600),
                search_limit: number("RL_SEARCH_LIMIT", 60),
                search_window: window("RL_SEARCH_WINDOW", 60),
                login_limit: number("RL_LOGIN_LIMIT", 5),
                login_window: window("RL_LOGIN_WINDOW", 300),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = AppConfig::from_lookup(lookup(&[]));
        assert_eq!(cfg.port, 5000);
        assert_eq!(cfg.limits.max_files, 5);
        assert_eq!(cfg.limits.max_file_size, 50 * 1024 * 1024);
        assert!(cfg.rate_limit_enabled);
        assert!(cfg.jwt_secret.is_none());
        assert!(!cfg.trust_proxy);
    }

    #[test]
    fn overrides_and_bad_numbers() {
        let cfg = AppConfig::from_lookup(lookup(&[
            ("PORT", "8080"),
            ("MAX_UPLOAD_FILES", "nope"),
            ("ENABLE_HSTS", "TRUE"),
            ("RL_SEARCH_WINDOW", "5"),
            ("ADMIN_USERNAME", "  "),
        ]));
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.limits.max_files, 5);
        assert!(cfg.enable_hsts);
        assert_eq!(cfg.rate_limits.search_window, Duration::from_secs(5));
        assert!(cfg.admin_username.is_none());
    }
}
