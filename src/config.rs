//! Configuration file and settings management
//! Modified from nostr-rs-relay
//!
//! The MIT License (MIT)
//! Copyright (c) 2021 Greg Heartsfield
/*
 The MIT License (MIT)
 Copyright (c) 2021 Greg Heartsfield

Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files (the "Software"), to deal
in the Software without restriction, including without limitation the rights
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:

The above copyright notice and this permission notice shall be included in
all copies or substantial portions of the Software.

THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN
THE SOFTWARE.
*/

use std::path::PathBuf;
use std::str::FromStr;

use bitcoin::Network;
use config::{Config, ConfigError, File};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn, Level};

use crate::lnurl::DEFAULT_MAX_DERIVATION_ATTEMPTS;
use crate::sweep::builder::DEFAULT_DUST_LIMIT;
use crate::sweep::DEFAULT_CONF_TARGETS;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Info {
    #[serde(default = "network_default")]
    pub network: Network,
    #[serde(default = "path_default")]
    pub db_path: PathBuf,
    #[serde(default = "log_level_default")]
    pub log_level: String,
}

impl Default for Info {
    fn default() -> Self {
        Self {
            network: network_default(),
            db_path: path_default(),
            log_level: log_level_default(),
        }
    }
}

impl Info {
    pub fn log_level(&self) -> Level {
        Level::from_str(&self.log_level).unwrap_or(Level::INFO)
    }
}

fn network_default() -> Network {
    Network::Bitcoin
}

fn path_default() -> PathBuf {
    PathBuf::from("/tmp/ln-outbound")
}

fn log_level_default() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lnd {
    #[serde(default = "rest_url_default")]
    pub rest_url: String,
    #[serde(default = "macaroon_path_default")]
    pub macaroon_path: PathBuf,
    pub tls_cert_path: Option<PathBuf>,
}

impl Default for Lnd {
    fn default() -> Self {
        Self {
            rest_url: rest_url_default(),
            macaroon_path: macaroon_path_default(),
            tls_cert_path: None,
        }
    }
}

fn rest_url_default() -> String {
    "https://127.0.0.1:8080".to_string()
}

fn macaroon_path_default() -> PathBuf {
    PathBuf::from("~/.lnd/data/chain/bitcoin/mainnet/admin.macaroon")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sweep {
    #[serde(default = "conf_targets_default")]
    pub conf_targets: Vec<u32>,
    #[serde(default = "dust_limit_default")]
    pub dust_limit_sat: u64,
}

impl Default for Sweep {
    fn default() -> Self {
        Self {
            conf_targets: conf_targets_default(),
            dust_limit_sat: dust_limit_default(),
        }
    }
}

fn conf_targets_default() -> Vec<u32> {
    DEFAULT_CONF_TARGETS.to_vec()
}

fn dust_limit_default() -> u64 {
    DEFAULT_DUST_LIMIT
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lnurl {
    #[serde(default = "request_timeout_default")]
    pub request_timeout_secs: u64,
    #[serde(default = "max_derivation_attempts_default")]
    pub max_derivation_attempts: u32,
}

impl Default for Lnurl {
    fn default() -> Self {
        Self {
            request_timeout_secs: request_timeout_default(),
            max_derivation_attempts: max_derivation_attempts_default(),
        }
    }
}

fn request_timeout_default() -> u64 {
    30
}

fn max_derivation_attempts_default() -> u32 {
    DEFAULT_MAX_DERIVATION_ATTEMPTS
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub info: Info,
    #[serde(default)]
    pub lnd: Lnd,
    #[serde(default)]
    pub sweep: Sweep,
    #[serde(default)]
    pub lnurl: Lnurl,
}

impl Settings {
    #[must_use]
    pub fn new(config_file_name: &Option<String>) -> Self {
        let default_settings = Self::default();
        // attempt to construct settings with file
        let from_file = Self::new_from_default(&default_settings, config_file_name);
        match from_file {
            Ok(f) => f,
            Err(e) => {
                warn!("Error reading config file ({:?})", e);
                default_settings
            }
        }
    }

    fn new_from_default(
        default: &Settings,
        config_file_name: &Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut default_config_file_name = dirs::config_dir()
            .ok_or(ConfigError::NotFound("Config Path".to_string()))?
            .join("ln-outbound");

        default_config_file_name.push("config.toml");
        let config: String = match config_file_name {
            Some(value) => value.clone(),
            None => default_config_file_name.to_string_lossy().to_string(),
        };
        let builder = Config::builder();
        let config: Config = builder
            // use defaults
            .add_source(Config::try_from(default)?)
            // override with file contents
            .add_source(File::with_name(&config))
            .build()?;
        let settings: Settings = config.try_deserialize()?;

        debug!("{settings:?}");

        if settings.sweep.conf_targets.is_empty() {
            return Err(ConfigError::Message(
                "sweep.conf_targets must not be empty".to_string(),
            ));
        }

        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[info]
network = "regtest"

[lnd]
rest_url = "https://10.0.0.2:8080"
macaroon_path = "/etc/lnd/admin.macaroon"

[sweep]
conf_targets = [1, 3]
"#
        )
        .unwrap();

        let path = file.path().to_string_lossy().to_string();
        let settings = Settings::new(&Some(path));

        assert_eq!(settings.info.network, Network::Regtest);
        assert_eq!(settings.lnd.rest_url, "https://10.0.0.2:8080");
        assert_eq!(settings.lnd.tls_cert_path, None);
        assert_eq!(settings.sweep.conf_targets, vec![1, 3]);
        assert_eq!(settings.sweep.dust_limit_sat, 573);
        assert_eq!(settings.lnurl.max_derivation_attempts, 16);
        assert_eq!(settings.info.log_level(), Level::INFO);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let settings = Settings::new(&Some("/nonexistent/ln-outbound.toml".to_string()));

        assert_eq!(settings.info.network, Network::Bitcoin);
        assert_eq!(settings.sweep.conf_targets, vec![2, 6, 25]);
        assert_eq!(settings.lnurl.request_timeout_secs, 30);
    }
}
