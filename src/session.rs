//! Login state, credentials and the keep-login identity assertion.
//!
//! A client starts logged out. [`Client::login`] stores the credentials and
//! the confirmed user name; while keep-login is enabled every request then
//! asserts that identity (`assertuser`), and a server-side assertion failure
//! triggers a relogin with the stored credentials followed by a replay of the
//! request (see [`Client::call`]).

use crate::client::{Client, Dispatch};
use crate::context::CallContext;
use crate::params::{Normalized, ParamSet, Params};
use crate::response::Response;
use crate::retry::TokenOptions;
use crate::tokens::{TokenCache, TokenKind};
use crate::{Error, Result};
use futures::future::BoxFuture;
use serde::Deserialize;
use std::fmt;

/// Request field carrying the identity assertion.
pub(crate) const ASSERT_USER_FIELD: &str = "assertuser";

/// Shared mutable state of one client, guarded by a single lock.
#[derive(Default)]
pub(crate) struct SessionState {
    pub(crate) tokens: TokenCache,
    pub(crate) user: String,
    pub(crate) credentials: Option<Credentials>,
}

impl SessionState {
    fn reset(&mut self) {
        self.tokens.clear();
        self.user.clear();
        self.credentials = None;
    }
}

/// Username and password kept for automatic relogin.
#[derive(Clone)]
pub(crate) struct Credentials {
    username: String,
    password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// The `login` object of a login response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LoginResult {
    /// The result reported by the server, e.g. `Success`.
    #[serde(default)]
    pub result: String,

    /// The user id, on success.
    #[serde(default, rename = "lguserid")]
    pub user_id: Option<u64>,

    /// The confirmed user name, on success.
    #[serde(default, rename = "lgusername")]
    pub username: Option<String>,

    /// Why the login failed, when the server says.
    #[serde(default, deserialize_with = "reason_text")]
    pub reason: Option<String>,
}

/// Accepts `reason` both as plain text and as an error object.
fn reason_text<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Object(map) => ["text", "info", "code"]
            .iter()
            .find_map(|k| map.get(*k).and_then(|v| v.as_str()).map(str::to_string)),
        _ => None,
    }))
}

fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

fn login_result(response: &Response) -> Option<LoginResult> {
    response
        .body
        .get("login")
        .and_then(|login| serde_json::from_value(login.clone()).ok())
}

/// Maps a `NeedToken`/`WrongToken` login result to a stale-token fault.
fn stale_login_token(response: &Response) -> Option<Error> {
    let result = login_result(response)?.result;
    if !(eq_ignore_case(&result, "needtoken") || eq_ignore_case(&result, "wrongtoken")) {
        return None;
    }
    Some(Error::Api {
        code: result.to_ascii_lowercase(),
        message: "login token rejected".to_string(),
        status: response.status,
        errors: Vec::new(),
        response: None,
    })
}

/// Returns `true` for requests that must never carry an identity assertion:
/// the login itself and the fetch of a login token.
pub(crate) fn is_login_request(params: &Normalized) -> bool {
    let action = params.get_lower("action");
    if action == "login" {
        return true;
    }
    action == "query"
        && params.get_lower("meta").contains("tokens")
        && params.get_lower("type").contains("login")
}

impl Client {
    /// Logs in with a username and password (or bot password).
    ///
    /// A fresh login token is always fetched. On success the credentials are
    /// kept for automatic relogin, the confirmed user name becomes the
    /// asserted identity and every cached token is dropped. A stale login
    /// token is retried within the token budget; any other result fails with
    /// [`Error::LoginFailed`] and leaves the login state untouched.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use wikisession::{CallContext, Client};
    ///
    /// # async fn example() -> Result<(), wikisession::Error> {
    /// let client = Client::new("https://wiki.example.org/w/api.php")?;
    /// let ctx = CallContext::background();
    ///
    /// let login = client.login(&ctx, "Example@bot", "secret").await?;
    /// println!("Logged in as {:?} (id {:?})", login.username, login.user_id);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn login(
        &self,
        ctx: &CallContext,
        username: &str,
        password: &str,
    ) -> Result<LoginResult> {
        let params = ParamSet::from(
            Params::new()
                .set("action", "login")
                .set("lgname", username)
                .set("lgpassword", password),
        )
        .normalize()?;

        let options = TokenOptions::new()
            .field_name("lgtoken")
            .bypass_cache(true);
        let dispatch = Dispatch {
            skip_assert: true,
            skip_relogin: true,
        };

        let response = self
            .write_with_token(
                ctx,
                TokenKind::Login,
                params,
                &options,
                dispatch,
                stale_login_token,
            )
            .await?;

        let Some(result) = login_result(&response) else {
            let (result, reason) = match response.api_error() {
                Some(Error::Api { code, message, .. }) => (code, Some(message)),
                _ => (String::new(), Some("missing login result".to_string())),
            };
            return Err(Error::LoginFailed { result, reason });
        };

        if !eq_ignore_case(&result.result, "success") {
            tracing::warn!(result = %result.result, "Login rejected");
            return Err(Error::LoginFailed {
                result: result.result,
                reason: result.reason,
            });
        }

        let user = result
            .username
            .clone()
            .unwrap_or_else(|| username.to_string());
        {
            let mut state = self.inner.state.lock();
            state.credentials = Some(Credentials {
                username: username.to_string(),
                password: password.to_string(),
            });
            state.user = user.clone();
            state.tokens.clear();
        }

        tracing::info!(user = %user, user_id = ?result.user_id, "Logged in");
        Ok(result)
    }

    /// Logs in again with the stored credentials.
    ///
    /// Fails with [`Error::NoStoredCredentials`] if no login has succeeded
    /// since the client was built or last logged out.
    pub async fn relogin(&self, ctx: &CallContext) -> Result<LoginResult> {
        let credentials = self
            .inner
            .state
            .lock()
            .credentials
            .clone()
            .ok_or(Error::NoStoredCredentials)?;

        tracing::info!(user = %credentials.username, "Logging in again");
        self.login(ctx, &credentials.username, &credentials.password)
            .await
    }

    /// Boxed [`Client::relogin`], for use inside the request loop that login
    /// itself goes through.
    pub(crate) fn relogin_boxed<'a>(
        &'a self,
        ctx: &'a CallContext,
    ) -> BoxFuture<'a, Result<LoginResult>> {
        Box::pin(self.relogin(ctx))
    }

    /// Logs out.
    ///
    /// The local session (credentials, user, every cached token) is cleared
    /// even when the remote logout fails; the remote failure, if any, is
    /// still returned.
    pub async fn logout(&self, ctx: &CallContext) -> Result<()> {
        let outcome = self
            .post_with_token(
                ctx,
                TokenKind::Csrf,
                Params::new().set("action", "logout"),
                TokenOptions::default(),
            )
            .await;

        self.inner.state.lock().reset();

        match outcome {
            Ok(response) => match response.api_error() {
                Some(err) => Err(err),
                None => {
                    tracing::info!("Logged out");
                    Ok(())
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "Remote logout failed; local session cleared");
                Err(e)
            }
        }
    }

    /// The name of the logged-in user, if any.
    pub fn logged_in_user(&self) -> Option<String> {
        let state = self.inner.state.lock();
        if state.user.is_empty() {
            None
        } else {
            Some(state.user.clone())
        }
    }

    /// Returns `true` if a login has succeeded and no logout happened since.
    pub fn is_logged_in(&self) -> bool {
        !self.inner.state.lock().user.is_empty()
    }

    /// Whether this request should carry an injected identity assertion.
    /// An empty caller-supplied `assertuser` counts as missing.
    pub(crate) fn should_assert(&self, params: &Normalized, dispatch: Dispatch) -> bool {
        self.inner.keep_login
            && !dispatch.skip_assert
            && params.get(ASSERT_USER_FIELD).map_or(true, str::is_empty)
            && !is_login_request(params)
    }

    /// Sets `assertuser` to the current user, if one is logged in.
    pub(crate) fn inject_assertion(&self, params: &mut Normalized) {
        let user = self.inner.state.lock().user.clone();
        if !user.is_empty() {
            params.insert(ASSERT_USER_FIELD, user);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, StatusCode};

    fn response(body: &str) -> Response {
        Response::from_parts(StatusCode::OK, HeaderMap::new(), body.as_bytes())
    }

    fn normalized(params: Params) -> Normalized {
        ParamSet::from(params).normalize().unwrap()
    }

    #[test]
    fn detects_login_requests() {
        assert!(is_login_request(&normalized(
            Params::new().set("action", "Login")
        )));
        assert!(is_login_request(&normalized(
            Params::new().set("meta", "tokens").set("type", "login")
        )));
        assert!(is_login_request(&normalized(
            Params::new().set("meta", "tokens").set("type", vec!["csrf", "login"])
        )));
        assert!(!is_login_request(&normalized(
            Params::new().set("meta", "tokens").set("type", "csrf")
        )));
        assert!(!is_login_request(&normalized(
            Params::new().set("action", "edit")
        )));
    }

    #[test]
    fn parses_login_results() {
        let r = response(
            r#"{"login":{"result":"Success","lguserid":42,"lgusername":"Example"}}"#,
        );
        let result = login_result(&r).unwrap();
        assert_eq!(result.result, "Success");
        assert_eq!(result.user_id, Some(42));
        assert_eq!(result.username.as_deref(), Some("Example"));
        assert!(stale_login_token(&r).is_none());

        let r = response(
            r#"{"login":{"result":"Failed","reason":{"code":"wrongpassword","text":"Incorrect password entered."}}}"#,
        );
        assert_eq!(
            login_result(&r).unwrap().reason.as_deref(),
            Some("Incorrect password entered.")
        );

        let r = response(r#"{"login":{"result":"Failed","reason":"Bad password"}}"#);
        assert_eq!(login_result(&r).unwrap().reason.as_deref(), Some("Bad password"));
    }

    #[test]
    fn stale_login_token_results_are_token_faults() {
        for result in ["NeedToken", "WrongToken", "wrongtoken"] {
            let r = response(&format!(r#"{{"login":{{"result":"{}"}}}}"#, result));
            let err = stale_login_token(&r).unwrap();
            assert!(err.is_token_error(), "{} should be a token fault", result);
        }
    }

    #[test]
    fn credentials_debug_hides_password() {
        let credentials = Credentials {
            username: "Example".to_string(),
            password: "hunter2".to_string(),
        };
        let debug = format!("{:?}", credentials);
        assert!(debug.contains("Example"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn empty_assertion_is_replaced() {
        let client = Client::new("https://wiki.example.org/w/api.php").unwrap();
        client.inner.state.lock().user = "Example".to_string();

        let mut params = normalized(Params::new().set("meta", "userinfo").set("assertuser", ""));
        assert!(client.should_assert(&params, Dispatch::default()));
        client.inject_assertion(&mut params);
        assert_eq!(params.get("assertuser"), Some("Example"));

        let supplied = normalized(Params::new().set("assertuser", "Other"));
        assert!(!client.should_assert(&supplied, Dispatch::default()));

        let login = normalized(Params::new().set("action", "login"));
        assert!(!client.should_assert(&login, Dispatch::default()));
    }

    #[test]
    fn reset_clears_everything() {
        let mut state = SessionState::default();
        state.user = "Example".to_string();
        state.credentials = Some(Credentials {
            username: "Example".to_string(),
            password: "pw".to_string(),
        });
        state.tokens.insert(TokenKind::Csrf, "abc");

        state.reset();
        assert!(state.user.is_empty());
        assert!(state.credentials.is_none());
        assert_eq!(state.tokens.get(&TokenKind::Csrf), None);
    }
}
