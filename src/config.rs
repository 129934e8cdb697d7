//! Environment-based configuration for tools built on the client.
//!
//! [`EnvConfig::from_env`] reads the endpoint and bot credentials from
//! `MW_API_ENDPOINT`, `MW_USERNAME` and `MW_PASSWORD` (plus an optional
//! `MW_USER_AGENT`). [`load_dot_env`] fills the environment from a `.env`
//! file first, never overriding variables that are already set.
//!
//! # Examples
//!
//! ```no_run
//! use wikisession::config::{self, EnvConfig};
//! use wikisession::CallContext;
//!
//! # async fn example() -> Result<(), wikisession::Error> {
//! config::load_dot_env(".env")?;
//! let env = EnvConfig::from_env()?;
//!
//! let client = env.client_builder()?.build()?;
//! client
//!     .login(&CallContext::background(), &env.username, &env.password)
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::client::ClientBuilder;
use crate::{Error, Result};
use std::fmt;
use std::path::Path;

/// Variable holding the `api.php` endpoint URL.
pub const ENDPOINT_VAR: &str = "MW_API_ENDPOINT";
/// Variable holding the login name.
pub const USERNAME_VAR: &str = "MW_USERNAME";
/// Variable holding the password or bot password.
pub const PASSWORD_VAR: &str = "MW_PASSWORD";
/// Optional variable overriding the `User-Agent`.
pub const USER_AGENT_VAR: &str = "MW_USER_AGENT";

/// Endpoint and credentials read from the environment.
#[derive(Clone, PartialEq, Eq)]
pub struct EnvConfig {
    /// The `api.php` endpoint URL.
    pub endpoint: String,
    /// The login name.
    pub username: String,
    /// The password or bot password.
    pub password: String,
    /// A `User-Agent` override, if set.
    pub user_agent: Option<String>,
}

impl fmt::Debug for EnvConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvConfig")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl EnvConfig {
    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationError`] naming every required variable
    /// that is missing or blank.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let endpoint = lookup(ENDPOINT_VAR)
            .map(|v| v.trim().to_string())
            .unwrap_or_default();
        let username = lookup(USERNAME_VAR)
            .map(|v| v.trim().to_string())
            .unwrap_or_default();
        // Passwords may legitimately start or end with spaces.
        let password = lookup(PASSWORD_VAR).unwrap_or_default();
        let user_agent = lookup(USER_AGENT_VAR)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let missing: Vec<&str> = [
            (ENDPOINT_VAR, endpoint.is_empty()),
            (USERNAME_VAR, username.is_empty()),
            (PASSWORD_VAR, password.is_empty()),
        ]
        .into_iter()
        .filter_map(|(name, absent)| absent.then_some(name))
        .collect();

        if !missing.is_empty() {
            return Err(Error::ConfigurationError(format!(
                "Missing environment variables: {}",
                missing.join(", ")
            )));
        }

        Ok(Self {
            endpoint,
            username,
            password,
            user_agent,
        })
    }

    /// A [`ClientBuilder`] preset with the endpoint and user agent.
    pub fn client_builder(&self) -> Result<ClientBuilder> {
        let builder = ClientBuilder::new().endpoint(&self.endpoint)?;
        Ok(match &self.user_agent {
            Some(user_agent) => builder.user_agent(user_agent.clone()),
            None => builder,
        })
    }
}

/// Loads `KEY=VALUE` lines from `path` into the process environment.
///
/// Blank lines, `#` comments and lines without `=` are skipped, and one pair
/// of surrounding quotes is stripped from values. Variables that are already
/// set are left alone. A missing file is not an error.
///
/// Returns the number of variables that were set.
pub fn load_dot_env(path: impl AsRef<Path>) -> Result<usize> {
    let path = path.as_ref();
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "No .env file found");
            return Ok(0);
        }
        Err(e) => {
            return Err(Error::ConfigurationError(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            )))
        }
    };

    let mut loaded = 0;
    for (key, value) in parse_dot_env(&contents) {
        if std::env::var_os(&key).is_some() {
            continue;
        }
        std::env::set_var(&key, value);
        loaded += 1;
    }

    tracing::debug!(path = %path.display(), loaded = loaded, "Loaded .env file");
    Ok(loaded)
}

fn parse_dot_env(contents: &str) -> Vec<(String, String)> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim(), unquote(value.trim())))
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn reads_all_variables() {
        let config = EnvConfig::from_lookup(lookup(&[
            (ENDPOINT_VAR, " https://wiki.example.org/w/api.php "),
            (USERNAME_VAR, "Example@bot"),
            (PASSWORD_VAR, " secret "),
            (USER_AGENT_VAR, "my-bot/1.0"),
        ]))
        .unwrap();

        assert_eq!(config.endpoint, "https://wiki.example.org/w/api.php");
        assert_eq!(config.username, "Example@bot");
        assert_eq!(config.password, " secret ");
        assert_eq!(config.user_agent.as_deref(), Some("my-bot/1.0"));
        assert!(config.client_builder().is_ok());
    }

    #[test]
    fn reports_every_missing_variable() {
        let err = EnvConfig::from_lookup(lookup(&[(USERNAME_VAR, "  ")])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Configuration error: Missing environment variables: MW_API_ENDPOINT, MW_USERNAME, MW_PASSWORD"
        );
    }

    #[test]
    fn debug_hides_password() {
        let config = EnvConfig::from_lookup(lookup(&[
            (ENDPOINT_VAR, "https://wiki.example.org/w/api.php"),
            (USERNAME_VAR, "Example"),
            (PASSWORD_VAR, "hunter2"),
        ]))
        .unwrap();
        assert!(!format!("{:?}", config).contains("hunter2"));
    }

    #[test]
    fn parses_dot_env_lines() {
        let pairs = parse_dot_env(
            "# comment\n\
             \n\
             MW_API_ENDPOINT = https://wiki.example.org/w/api.php\n\
             MW_USERNAME=\"Example@bot\"\n\
             MW_PASSWORD='p=ss'\n\
             not a pair\n\
             =orphan\n\
             EMPTY=\n",
        );

        assert_eq!(
            pairs,
            vec![
                (
                    "MW_API_ENDPOINT".to_string(),
                    "https://wiki.example.org/w/api.php".to_string()
                ),
                ("MW_USERNAME".to_string(), "Example@bot".to_string()),
                ("MW_PASSWORD".to_string(), "p=ss".to_string()),
                ("EMPTY".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn unquote_needs_matching_pair() {
        assert_eq!(unquote("\"abc\""), "abc");
        assert_eq!(unquote("'abc'"), "abc");
        assert_eq!(unquote("\"abc'"), "\"abc'");
        assert_eq!(unquote("\""), "\"");
    }

    #[test]
    fn load_dot_env_keeps_existing_variables() {
        let dir = std::env::temp_dir().join(format!("wikisession-dotenv-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(".env");
        std::fs::write(
            &path,
            "WIKISESSION_TEST_PRESET=from-file\nWIKISESSION_TEST_FRESH=from-file\n",
        )
        .unwrap();

        std::env::set_var("WIKISESSION_TEST_PRESET", "from-env");
        std::env::remove_var("WIKISESSION_TEST_FRESH");

        assert_eq!(load_dot_env(&path).unwrap(), 1);
        assert_eq!(std::env::var("WIKISESSION_TEST_PRESET").unwrap(), "from-env");
        assert_eq!(std::env::var("WIKISESSION_TEST_FRESH").unwrap(), "from-file");

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_dot_env_is_not_an_error() {
        assert_eq!(load_dot_env("/nonexistent/wikisession/.env").unwrap(), 0);
    }
}
