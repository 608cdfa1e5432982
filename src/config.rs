// SPDX-FileCopyrightText: 2025 Maciej Borzecki <maciek.borzecki@gmail.com>
//
// SPDX-License-Identifier: MIT

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use log;
use serde;
use serde_yml;

use crate::error::Error;

pub const CONFIG_FILE_NAME: &str = "upcloud.yaml";

const ENV_CONFIG: &str = "UPCLOUD_CONFIG";
const ENV_API_USER: &str = "UPCLOUD_API_USER";
const ENV_API_PASSWD: &str = "UPCLOUD_API_PASSWD";
const ENV_API_TIMEOUT: &str = "UPCLOUD_API_TIMEOUT";

fn default_timeout() -> u64 {
    30
}

fn default_state_timeout() -> u64 {
    300
}

fn default_ipv_version() -> String {
    "IPv4".to_string()
}

/// Inventory output preferences.
#[derive(serde::Deserialize, Debug, Clone, PartialEq)]
pub struct InventoryConfig {
    /// List public addresses instead of hostnames.
    #[serde(default)]
    pub return_ip_addresses: bool,
    /// Also list hostnames without the domain part.
    #[serde(default)]
    pub return_non_fqdn_names: bool,
    /// Preferred address family when listing addresses.
    #[serde(default = "default_ipv_version")]
    pub default_ipv_version: String,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        InventoryConfig {
            return_ip_addresses: false,
            return_non_fqdn_names: false,
            default_ipv_version: default_ipv_version(),
        }
    }
}

#[derive(serde::Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    pub api_user: Option<String>,
    pub api_passwd: Option<String>,
    /// API request timeout, in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// How long to wait for a server to start or stop, in seconds.
    #[serde(default = "default_state_timeout")]
    pub state_timeout: u64,
    #[serde(default)]
    pub inventory: InventoryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api_user: None,
            api_passwd: None,
            timeout: default_timeout(),
            state_timeout: default_state_timeout(),
            inventory: InventoryConfig::default(),
        }
    }
}

/// API account credentials.
#[derive(Clone, PartialEq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Config {
    /// Parses configuration from a reader.
    pub fn from_reader<R>(r: R) -> Result<Config, Error>
    where
        R: io::Read,
    {
        serde_yml::from_reader(r)
            .map_err(|e| Error::Configuration(format!("cannot parse configuration: {}", e)))
    }

    /// Loads configuration from a file, or the defaults when there is no
    /// file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Config, Error> {
        let mut conf = match path.map(PathBuf::from).or_else(locate) {
            Some(path) => {
                log::debug!("loading config from {}", path.display());
                let f = fs::File::open(&path).map_err(|e| {
                    Error::Configuration(format!("cannot open {}: {}", path.display(), e))
                })?;
                Config::from_reader(f)?
            }
            None => {
                log::debug!("no config file, using defaults");
                Config::default()
            }
        };
        conf.apply_env(|k| env::var(k).ok())?;
        Ok(conf)
    }

    fn apply_env<F>(&mut self, get: F) -> Result<(), Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let user = get(ENV_API_USER).filter(|v| !v.is_empty());
        let password = get(ENV_API_PASSWD).filter(|v| !v.is_empty());
        if user.is_some() && password.is_some() {
            self.api_user = user;
            self.api_passwd = password;
        }

        if let Some(timeout) = get(ENV_API_TIMEOUT).filter(|v| !v.is_empty()) {
            self.timeout = match timeout.trim().parse::<f64>() {
                Ok(t) if t.is_finite() && t > 0.0 => t.ceil() as u64,
                _ => {
                    return Err(Error::Configuration(format!(
                        "invalid {} value \"{}\"",
                        ENV_API_TIMEOUT, timeout
                    )))
                }
            };
        }
        Ok(())
    }

    /// Returns credentials, preferring the given overrides.
    pub fn credentials(
        &self,
        user: Option<&str>,
        password: Option<&str>,
    ) -> Result<Credentials, Error> {
        let user = user.or(self.api_user.as_deref()).filter(|v| !v.is_empty());
        let password = password
            .or(self.api_passwd.as_deref())
            .filter(|v| !v.is_empty());

        match (user, password) {
            (Some(user), Some(password)) => Ok(Credentials {
                user: user.to_string(),
                password: password.to_string(),
            }),
            _ => Err(Error::Configuration(format!(
                "Please set {} and {} as environment variables, in {} or provide api_user and api_passwd arguments.",
                ENV_API_USER, ENV_API_PASSWD, CONFIG_FILE_NAME
            ))),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn state_timeout(&self) -> Duration {
        Duration::from_secs(self.state_timeout)
    }
}

/// Looks for the configuration file, checking in order $UPCLOUD_CONFIG, the
/// current directory, the directory of the executable and the user
/// configuration directory.
pub fn locate() -> Option<PathBuf> {
    if let Some(p) = env::var_os(ENV_CONFIG) {
        return Some(PathBuf::from(p));
    }

    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Ok(cwd) = env::current_dir() {
        candidates.push(cwd);
    }
    if let Some(exe_dir) = env::current_exe()
        .and_then(fs::canonicalize)
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
    {
        candidates.push(exe_dir);
    }
    if let Some(dirs) = ProjectDirs::from("com", "UpCloud", "upcloud-ansible") {
        candidates.push(dirs.config_dir().to_path_buf());
    }

    for dir in candidates {
        let conf = dir.join(CONFIG_FILE_NAME);
        log::debug!("checking {}", conf.display());
        if conf.exists() {
            return Some(conf);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    const FULL_CONFIG: &str = r##"
api_user: user
api_passwd: secret
timeout: 10
inventory:
  return_ip_addresses: true
  default_ipv_version: IPv6
"##;

    #[test]
    fn test_parse_full() {
        let conf = Config::from_reader(FULL_CONFIG.as_bytes()).expect("valid config");
        assert_eq!(
            conf,
            Config {
                api_user: Some("user".to_string()),
                api_passwd: Some("secret".to_string()),
                timeout: 10,
                state_timeout: 300,
                inventory: InventoryConfig {
                    return_ip_addresses: true,
                    return_non_fqdn_names: false,
                    default_ipv_version: "IPv6".to_string(),
                },
            }
        );
    }

    #[test]
    fn test_parse_empty_sections() {
        let conf = Config::from_reader("timeout: 5\n".as_bytes()).expect("valid config");
        assert_eq!(conf.api_user, None);
        assert_eq!(conf.inventory, InventoryConfig::default());
        assert_eq!(conf.request_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_parse_invalid() {
        let res = Config::from_reader("timeout: soon\n".as_bytes());
        assert!(matches!(res, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_env_overrides() {
        let env = HashMap::from([
            (ENV_API_USER, "envuser"),
            (ENV_API_PASSWD, "envpass"),
            (ENV_API_TIMEOUT, "2.5"),
        ]);
        let mut conf = Config::from_reader(FULL_CONFIG.as_bytes()).expect("valid config");
        conf.apply_env(|k| env.get(k).map(|v| v.to_string()))
            .expect("valid env");
        assert_eq!(conf.api_user.as_deref(), Some("envuser"));
        assert_eq!(conf.api_passwd.as_deref(), Some("envpass"));
        assert_eq!(conf.timeout, 3);
    }

    #[test]
    fn test_env_needs_both_credentials() {
        let env = HashMap::from([(ENV_API_USER, "envuser")]);
        let mut conf = Config::from_reader(FULL_CONFIG.as_bytes()).expect("valid config");
        conf.apply_env(|k| env.get(k).map(|v| v.to_string()))
            .expect("valid env");
        assert_eq!(conf.api_user.as_deref(), Some("user"));

        let env = HashMap::from([(ENV_API_TIMEOUT, "x")]);
        assert!(conf
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .is_err());
    }

    #[test]
    fn test_env_timeout_must_be_positive() {
        for bad in ["0", "-5", "NaN", "inf", "-0.5"] {
            let env = HashMap::from([(ENV_API_TIMEOUT, bad)]);
            let mut conf = Config::default();
            let res = conf.apply_env(|k| env.get(k).map(|v| v.to_string()));
            assert!(matches!(res, Err(Error::Configuration(_))), "{}", bad);
            assert_eq!(conf.timeout, 30);
        }

        let env = HashMap::from([(ENV_API_TIMEOUT, "0.1")]);
        let mut conf = Config::default();
        conf.apply_env(|k| env.get(k).map(|v| v.to_string()))
            .expect("valid env");
        assert_eq!(conf.timeout, 1);
    }

    #[test]
    fn test_credentials() {
        let conf = Config::default();
        assert!(matches!(
            conf.credentials(None, None),
            Err(Error::Configuration(_))
        ));
        assert!(conf.credentials(Some("u"), None).is_err());
        assert_eq!(
            conf.credentials(Some("u"), Some("p")),
            Ok(Credentials {
                user: "u".to_string(),
                password: "p".to_string(),
            })
        );

        let conf = Config::from_reader(FULL_CONFIG.as_bytes()).expect("valid config");
        let creds = conf.credentials(Some("other"), None).expect("credentials");
        assert_eq!(creds.user, "other");
        assert_eq!(creds.password, "secret");
        assert!(!format!("{:?}", creds).contains("secret"));
    }
}
