//! File-based configuration.
//!
//! ```toml
//! addr = "0.0.0.0:8080"
//!
//! [session]
//! cookie_name = "sid"
//! secure = true
//! same_site = "Strict"
//! max_age_secs = 86400
//! ```
//!
//! Every key is optional.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;

use serde::Deserialize;

use crate::error::Result;
use crate::session::SessionConfig;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listen address.
    pub addr: SocketAddr,
    pub session: SessionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 3000)),
            session: SessionConfig::default(),
        }
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Reads and parses a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::session::SameSite;

    #[test]
    fn empty_file_yields_defaults() {
        let cfg = Config::from_toml_str("").unwrap();
        assert_eq!(cfg.addr.port(), 3000);
        assert_eq!(cfg.session.cookie_name, "spindle-session");
        assert!(cfg.session.http_only);
    }

    #[test]
    fn session_table_overrides_fields() {
        let cfg = Config::from_toml_str(
            r#"
            addr = "127.0.0.1:8080"

            [session]
            cookie_name = "sid"
            secure = true
            same_site = "Strict"
            max_age_secs = 60
            "#,
        )
        .unwrap();
        assert_eq!(cfg.addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(cfg.session.cookie_name, "sid");
        assert_eq!(cfg.session.cookie_path, "/");
        assert!(cfg.session.secure);
        assert_eq!(cfg.session.same_site, SameSite::Strict);
        assert_eq!(cfg.session.max_age_secs, Some(60));
    }

    #[test]
    fn malformed_input_is_a_config_error() {
        let err = Config::from_toml_str("addr = 12").unwrap_err();
        assert!(matches!(err, Error::Config(_)), "{err}");
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = Config::load("/nonexistent/spindle.toml").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
