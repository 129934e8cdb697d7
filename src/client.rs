//! The session-aware API client.
//!
//! The [`Client`] type is the main entry point for talking to a wiki API.
//! Use [`ClientBuilder`] to configure and create clients.

use crate::context::CallContext;
use crate::params::{Normalized, ParamSet};
use crate::request::{self, Endpoint, Method};
use crate::response::Response;
use crate::retry::{classify, into_failure, Verdict};
use crate::session::SessionState;
use crate::{Error, Result};
use bytes::{Bytes, BytesMut};
use reqwest::cookie::Jar;
use std::sync::Arc;
use std::time::{Duration, Instant};

const DEFAULT_USER_AGENT: &str = concat!("wikisession/", env!("CARGO_PKG_VERSION"));
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_RELOGIN_RETRY: usize = 3;
const DEFAULT_TOKEN_RETRY: usize = 3;
const DEFAULT_MAX_BODY_SIZE: usize = 32 << 20;

/// A client for one wiki API endpoint.
///
/// The client keeps the HTTP session (cookies), the token cache and the login
/// state. It is cheap to clone; clones share all of it, so one client can be
/// used from many tasks at once.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use wikisession::{CallContext, Client, Params, TokenKind, TokenOptions};
///
/// # async fn example() -> Result<(), wikisession::Error> {
/// let client = Client::builder()
///     .endpoint("https://wiki.example.org/w/api.php")?
///     .user_agent("my-bot/1.0 (https://wiki.example.org/wiki/User:MyBot)")
///     .timeout(Duration::from_secs(20))
///     .build()?;
///
/// let ctx = CallContext::background();
/// client.login(&ctx, "MyBot@tasks", "bot-password").await?;
///
/// // Reads go out as GET requests
/// let info = client
///     .get(&ctx, Params::new().set("meta", "userinfo"))
///     .await?;
/// println!("{}", info.raw_body);
///
/// // Writes fetch, cache and refresh the token on their own
/// client
///     .post_with_token(
///         &ctx,
///         TokenKind::Csrf,
///         Params::new()
///             .set("action", "edit")
///             .set("title", "Sandbox")
///             .set("appendtext", "\nhello"),
///         TokenOptions::default(),
///     )
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    pub(crate) inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    http_client: reqwest::Client,
    endpoint: Endpoint,
    user_agent: String,
    timeout: Option<Duration>,
    throw_on_api_error: bool,
    pub(crate) keep_login: bool,
    relogin_retry: usize,
    pub(crate) token_retry: usize,
    max_body_size: usize,
    pub(crate) state: parking_lot::Mutex<SessionState>,
}

/// Per-call switches for the internal request paths.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Dispatch {
    /// Never inject `assertuser`.
    pub(crate) skip_assert: bool,
    /// Hand assertion failures back instead of logging in again.
    pub(crate) skip_relogin: bool,
}

impl Client {
    /// Creates a new `ClientBuilder` for configuring a client.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use wikisession::Client;
    ///
    /// # fn example() -> Result<(), wikisession::Error> {
    /// let client = Client::builder()
    ///     .endpoint("https://wiki.example.org/w/api.php")?
    ///     .build()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Creates a client with default settings for `endpoint`.
    pub fn new(endpoint: impl AsRef<str>) -> Result<Self> {
        Self::builder().endpoint(endpoint)?.build()
    }

    /// The endpoint this client talks to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    /// Sends a read (GET) request.
    pub async fn get(&self, ctx: &CallContext, params: impl Into<ParamSet>) -> Result<Response> {
        self.request(ctx, Method::Read, params).await
    }

    /// Sends a write (POST) request without a token.
    pub async fn post(&self, ctx: &CallContext, params: impl Into<ParamSet>) -> Result<Response> {
        self.request(ctx, Method::Write, params).await
    }

    /// Sends a request.
    ///
    /// The parameters are normalized and merged with the defaults
    /// (`action=query`, `format=json`, `formatversion=2`,
    /// `errorformat=plaintext`). While logged in with keep-login enabled the
    /// request asserts the current identity, and an assertion failure is
    /// answered by logging in again and replaying the request.
    ///
    /// Envelope errors are returned inside the [`Response`] unless the client
    /// was built with [`ClientBuilder::throw_on_api_error`].
    ///
    /// File attachments are only sent with [`Method::Write`]; a read that
    /// carries one fails with [`Error::UnsupportedParameterKind`].
    pub async fn request(
        &self,
        ctx: &CallContext,
        method: Method,
        params: impl Into<ParamSet>,
    ) -> Result<Response> {
        let params = params.into().normalize()?;
        self.call(ctx, method, params, Dispatch::default()).await
    }

    /// Sends `params`, relogging and replaying on assertion failures.
    pub(crate) async fn call(
        &self,
        ctx: &CallContext,
        method: Method,
        params: Normalized,
        dispatch: Dispatch,
    ) -> Result<Response> {
        let start_time = Instant::now();
        let assert = self.should_assert(&params, dispatch);
        let mut replays = 0;

        loop {
            // Re-read the user every round; a relogin may have changed it.
            let mut outgoing = params.clone();
            if assert {
                self.inject_assertion(&mut outgoing);
            }

            let outcome = self.send_once(ctx, method, &outgoing).await;
            if classify(&outcome) != Verdict::AssertionFailed || dispatch.skip_relogin {
                return outcome.map(|mut response| {
                    response.latency = start_time.elapsed();
                    response.attempts = replays + 1;
                    response
                });
            }

            let failure = into_failure(outcome);
            if replays >= self.inner.relogin_retry {
                return Err(Error::AssertionReplayExhausted {
                    replays,
                    last_error: Box::new(failure),
                });
            }

            tracing::warn!(
                error = %failure,
                replay = replays + 1,
                max_replays = self.inner.relogin_retry,
                "Session lost, logging in again"
            );

            if let Err(relogin) = self.relogin_boxed(ctx).await {
                return Err(Error::ReloginFailed {
                    original: Box::new(failure),
                    relogin: Box::new(relogin),
                });
            }
            replays += 1;
        }
    }

    /// Executes a single request.
    async fn send_once(
        &self,
        ctx: &CallContext,
        method: Method,
        params: &Normalized,
    ) -> Result<Response> {
        let request = request::build(
            &self.inner.http_client,
            &self.inner.endpoint,
            method,
            params,
            &self.inner.user_agent,
            self.inner.timeout,
        )?;

        let action = params.get("action").unwrap_or_default();
        tracing::debug!(method = %method, action = action, "Executing API request");

        let started = Instant::now();
        let http_client = &self.inner.http_client;
        let limit = self.inner.max_body_size;
        let (status, headers, body) = ctx
            .run(async {
                let response = http_client.execute(request).await?;
                let status = response.status();
                let headers = response.headers().clone();
                let body = read_body(response, limit).await?;
                Ok::<_, Error>((status, headers, body))
            })
            .await?;

        let response = Response::from_parts(status, headers, &body);
        tracing::info!(
            method = %method,
            action = action,
            status = status.as_u16(),
            latency_ms = started.elapsed().as_millis() as u64,
            error_code = response.error_code(),
            "Received API response"
        );

        if self.inner.throw_on_api_error {
            if let Some(err) = response.api_error() {
                return Err(err);
            }
        }
        Ok(response)
    }
}

/// Reads the whole body, failing once it grows past `limit` bytes.
async fn read_body(mut response: reqwest::Response, limit: usize) -> Result<Bytes> {
    let too_large = || {
        tracing::warn!(limit = limit, "Response body exceeds size limit");
        Error::ResponseTooLarge { limit }
    };

    if response
        .content_length()
        .is_some_and(|len| len > limit as u64)
    {
        return Err(too_large());
    }

    let mut body = BytesMut::new();
    while let Some(chunk) = response.chunk().await? {
        if body.len() + chunk.len() > limit {
            return Err(too_large());
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body.freeze())
}

/// Builder for configuring and creating a [`Client`].
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use wikisession::ClientBuilder;
///
/// # fn example() -> Result<(), wikisession::Error> {
/// let jar = Arc::new(reqwest::cookie::Jar::default());
/// let client = ClientBuilder::new()
///     .endpoint("https://wiki.example.org/w/api.php")?
///     .timeout(Duration::from_secs(60))
///     .throw_on_api_error(true)
///     .relogin_retry(1)
///     .cookie_jar(jar)
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    endpoint: Option<Endpoint>,
    user_agent: String,
    timeout: Option<Duration>,
    throw_on_api_error: bool,
    keep_login: bool,
    relogin_retry: usize,
    token_retry: usize,
    max_body_size: usize,
    cookie_jar: Option<Arc<Jar>>,
}

impl ClientBuilder {
    /// Creates a new `ClientBuilder` with default settings.
    pub fn new() -> Self {
        Self {
            endpoint: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Some(DEFAULT_TIMEOUT),
            throw_on_api_error: false,
            keep_login: true,
            relogin_retry: DEFAULT_RELOGIN_RETRY,
            token_retry: DEFAULT_TOKEN_RETRY,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            cookie_jar: None,
        }
    }

    /// Sets the `api.php` endpoint URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEndpoint`] if the URL is not absolute or its
    /// path does not end in `api.php`.
    pub fn endpoint(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.endpoint = Some(Endpoint::parse(url.as_ref())?);
        Ok(self)
    }

    /// Sets the `User-Agent` sent with every request.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Sets the per-request timeout. Defaults to 30 seconds.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Removes the per-request timeout; only the caller's context bounds
    /// requests.
    pub fn no_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    /// Returns envelope errors as [`Error::Api`] instead of inside the
    /// response. Off by default.
    pub fn throw_on_api_error(mut self, enabled: bool) -> Self {
        self.throw_on_api_error = enabled;
        self
    }

    /// Asserts the logged-in identity on every request and logs in again
    /// when the server no longer recognizes it. On by default.
    pub fn keep_login(mut self, enabled: bool) -> Self {
        self.keep_login = enabled;
        self
    }

    /// Sets how many relogin-and-replay rounds one request may trigger.
    /// Defaults to 3; 0 disables replays.
    pub fn relogin_retry(mut self, replays: usize) -> Self {
        self.relogin_retry = replays;
        self
    }

    /// Sets how many attempts a token-authenticated write gets by default.
    /// Defaults to 3.
    pub fn token_retry(mut self, attempts: usize) -> Self {
        self.token_retry = attempts;
        self
    }

    /// Sets the largest response body the client accepts, in bytes.
    /// Defaults to 32 MiB; larger bodies fail with [`Error::ResponseTooLarge`].
    pub fn max_body_size(mut self, bytes: usize) -> Self {
        self.max_body_size = bytes;
        self
    }

    /// Uses `jar` for session cookies instead of a fresh one.
    pub fn cookie_jar(mut self, jar: Arc<Jar>) -> Self {
        self.cookie_jar = Some(jar);
        self
    }

    /// Builds the configured `Client`.
    ///
    /// # Errors
    ///
    /// Returns an error if no endpoint was provided or if the HTTP client
    /// cannot be created.
    pub fn build(self) -> Result<Client> {
        let endpoint = self
            .endpoint
            .ok_or_else(|| Error::ConfigurationError("Endpoint is required".to_string()))?;

        let jar = self.cookie_jar.unwrap_or_default();
        let http_client = reqwest::Client::builder()
            .cookie_provider(jar)
            .build()
            .map_err(|e| {
                Error::ConfigurationError(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Client {
            inner: Arc::new(ClientInner {
                http_client,
                endpoint,
                user_agent: self.user_agent,
                timeout: self.timeout,
                throw_on_api_error: self.throw_on_api_error,
                keep_login: self.keep_login,
                relogin_retry: self.relogin_retry,
                token_retry: self.token_retry,
                max_body_size: self.max_body_size,
                state: parking_lot::Mutex::new(SessionState::default()),
            }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_requires_endpoint() {
        match ClientBuilder::new().build() {
            Err(Error::ConfigurationError(_)) => {}
            Err(e) => panic!("Expected ConfigurationError, got {:?}", e),
            Ok(_) => panic!("Expected ConfigurationError, got a client"),
        }
    }

    #[test]
    fn builder_rejects_invalid_endpoint() {
        assert!(matches!(
            ClientBuilder::new().endpoint("https://wiki.example.org/wiki/Main_Page"),
            Err(Error::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn builder_defaults() {
        let client = Client::new("https://wiki.example.org/w/api.php").unwrap();
        assert_eq!(client.inner.user_agent, DEFAULT_USER_AGENT);
        assert!(client.inner.user_agent.starts_with("wikisession/"));
        assert_eq!(client.inner.timeout, Some(Duration::from_secs(30)));
        assert!(client.inner.keep_login);
        assert!(!client.inner.throw_on_api_error);
        assert_eq!(client.inner.relogin_retry, 3);
        assert_eq!(client.inner.token_retry, 3);
        assert_eq!(client.inner.max_body_size, 32 * 1024 * 1024);
        assert!(!client.is_logged_in());
        assert_eq!(
            client.endpoint().url().as_str(),
            "https://wiki.example.org/w/api.php"
        );
    }

    #[test]
    fn clones_share_state() {
        let client = Client::new("https://wiki.example.org/w/api.php").unwrap();
        let clone = client.clone();
        client.inner.state.lock().user = "Example".to_string();
        assert_eq!(clone.logged_in_user().as_deref(), Some("Example"));
    }
}
