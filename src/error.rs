//! Error types for wiki API calls.
//!
//! Every failure the engine can produce is a variant of [`Error`]. Token and
//! assertion faults are retried inside the client and only reach the caller
//! once their budgets are spent, wrapped so the last server-reported code stays
//! inspectable. No variant ever carries a password or a token value.

use crate::response::{ApiErrorInfo, ErrorClass, Response};
use crate::tokens::TokenKind;
use http::StatusCode;
use std::sync::Arc;

/// The main error type for wiki API calls.
///
/// `Error` is `Clone` so that a single coalesced token fetch can hand the same
/// failure to every caller that waited on it.
///
/// # Examples
///
/// ```no_run
/// use wikisession::{CallContext, Client, Error, Params};
///
/// # async fn example() -> Result<(), Error> {
/// let client = Client::builder()
///     .endpoint("https://wiki.example.org/w/api.php")?
///     .build()?;
///
/// let ctx = CallContext::background();
/// match client.get(&ctx, Params::new().set("meta", "siteinfo")).await {
///     Ok(response) => println!("{}", response.raw_body),
///     Err(Error::Api { code, message, .. }) => eprintln!("API error {}: {}", code, message),
///     Err(e) if e.is_transport() => eprintln!("Transport failure: {}", e),
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    /// The endpoint URL is not an absolute `.../api.php` URL.
    ///
    /// Raised once, while building the client.
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// A parameter value (or the whole parameter set) has a shape the
    /// normalizer does not understand.
    #[error("Unsupported parameter kind for `{key}`: {kind}")]
    UnsupportedParameterKind {
        /// The offending key, or an empty string when the whole set was rejected
        key: String,
        /// A short description of the rejected shape
        kind: &'static str,
    },

    /// A network-level error occurred (connection failed, DNS lookup failed, etc.).
    #[error("Network error: {0}")]
    Network(Arc<reqwest::Error>),

    /// The response body was larger than the configured limit.
    #[error("Response body exceeds {limit} bytes")]
    ResponseTooLarge {
        /// The limit, in bytes
        limit: usize,
    },

    /// The request ran past its deadline or the transport timeout.
    #[error("Request timed out")]
    Timeout,

    /// The caller cancelled the call.
    #[error("Request cancelled")]
    Cancelled,

    /// The token request succeeded but the expected token field was absent.
    #[error("Missing {0} token in response")]
    MissingToken(TokenKind),

    /// Every attempt of a token-authenticated write hit a stale token.
    #[error("Token retry exhausted after {attempts} attempts: {last_error}")]
    TokenRetryExhausted {
        /// The number of attempts made
        attempts: usize,
        /// The last token-related failure
        last_error: Box<Error>,
    },

    /// The login request returned a result other than success or a stale token.
    #[error("Login failed: {}", login_failure_text(.result, .reason.as_deref()))]
    LoginFailed {
        /// The `result` value reported by the server (may be empty)
        result: String,
        /// Additional explanation reported by the server
        reason: Option<String>,
    },

    /// A relogin was requested before any successful login.
    #[error("Relogin requested but no credentials are stored")]
    NoStoredCredentials,

    /// An assertion failure triggered a relogin, and the relogin failed too.
    #[error("Relogin after `{original}` failed: {relogin}")]
    ReloginFailed {
        /// The assertion failure that triggered the relogin
        original: Box<Error>,
        /// Why the relogin failed
        relogin: Box<Error>,
    },

    /// The server kept rejecting the identity assertion after every replay.
    #[error("Assertion failure persisted after {replays} relogin replays: {last_error}")]
    AssertionReplayExhausted {
        /// The number of relogin-and-replay rounds performed
        replays: usize,
        /// The last assertion failure
        last_error: Box<Error>,
    },

    /// The response envelope carried an error.
    ///
    /// Produced in strict mode, by [`Response::api_error`], and internally by
    /// the retry loops.
    #[error("API error {code}: {message}")]
    Api {
        /// The first error code in the envelope
        code: String,
        /// Text of the first error
        message: String,
        /// HTTP status of the response
        status: StatusCode,
        /// Every error object found in the envelope
        errors: Vec<ApiErrorInfo>,
        /// The full response, for further inspection
        response: Option<Box<Response>>,
    },

    /// Failed to deserialize the response body into the expected type.
    #[error("Failed to deserialize response (status {status}): {serde_error}")]
    DeserializationFailed {
        /// The raw response body that failed to deserialize
        raw_response: String,
        /// The serde error message
        serde_error: String,
        /// The HTTP status code
        status: StatusCode,
    },

    /// A file attachment could not be read.
    #[error("Failed to read attachment {path}: {message}")]
    Attachment {
        /// Path of the file
        path: String,
        /// The underlying I/O error message
        message: String,
    },

    /// Invalid configuration was provided.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

fn login_failure_text(result: &str, reason: Option<&str>) -> String {
    match reason {
        Some(reason) if !reason.is_empty() => format!("{} ({})", result, reason),
        _ => result.to_string(),
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout
        } else {
            // Request URLs may carry caller-supplied secrets
            Error::Network(Arc::new(err.without_url()))
        }
    }
}

impl Error {
    /// Returns `true` for failures of the HTTP round trip itself: network
    /// errors, oversized bodies, timeouts and cancellations.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Network(_) | Error::ResponseTooLarge { .. } | Error::Timeout | Error::Cancelled
        )
    }

    /// Returns the server error code carried by this error, if any.
    pub fn api_code(&self) -> Option<&str> {
        match self {
            Error::Api { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Returns `true` if the server reported a stale or missing token.
    ///
    /// # Examples
    ///
    /// ```
    /// use wikisession::Error;
    /// use http::StatusCode;
    ///
    /// let err = Error::Api {
    ///     code: "badtoken".to_string(),
    ///     message: "Invalid CSRF token.".to_string(),
    ///     status: StatusCode::OK,
    ///     errors: Vec::new(),
    ///     response: None,
    /// };
    /// assert!(err.is_token_error());
    /// assert!(!Error::Cancelled.is_token_error());
    /// ```
    pub fn is_token_error(&self) -> bool {
        self.api_code()
            .is_some_and(|code| ErrorClass::of(code) == ErrorClass::Token)
    }

    /// Returns `true` if the server no longer recognizes the asserted identity.
    pub fn is_assertion_failure(&self) -> bool {
        self.api_code()
            .is_some_and(|code| ErrorClass::of(code) == ErrorClass::AssertionFailed)
    }

    /// Returns the HTTP status code if this error has one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Api { status, .. } => Some(*status),
            Error::DeserializationFailed { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns the raw response body if this error has one.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            Error::Api {
                response: Some(response),
                ..
            } => Some(&response.raw_body),
            Error::DeserializationFailed { raw_response, .. } => Some(raw_response),
            _ => None,
        }
    }
}

/// A specialized `Result` type for wiki API calls.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    fn api(code: &str) -> Error {
        Error::Api {
            code: code.to_string(),
            message: "boom".to_string(),
            status: StatusCode::OK,
            errors: Vec::new(),
            response: None,
        }
    }

    #[test]
    fn classifies_token_and_assertion_codes() {
        assert!(api("BadToken").is_token_error());
        assert!(api("notoken").is_token_error());
        assert!(!api("badtoken").is_assertion_failure());
        assert!(api("assertnameduserfailed").is_assertion_failure());
        assert!(!api("ratelimited").is_token_error());
        assert!(!api("ratelimited").is_assertion_failure());
    }

    #[test]
    fn transport_failures_are_never_token_or_assertion_errors() {
        for err in [
            Error::Timeout,
            Error::Cancelled,
            Error::ResponseTooLarge { limit: 16 },
        ] {
            assert!(err.is_transport());
            assert!(!err.is_token_error());
            assert!(!err.is_assertion_failure());
        }
    }

    #[test]
    fn login_failure_message_includes_reason() {
        let err = Error::LoginFailed {
            result: "Failed".to_string(),
            reason: Some("Incorrect username or password entered.".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "Login failed: Failed (Incorrect username or password entered.)"
        );

        let err = Error::LoginFailed {
            result: "Aborted".to_string(),
            reason: None,
        };
        assert_eq!(err.to_string(), "Login failed: Aborted");
    }

    #[test]
    fn exhausted_errors_keep_the_last_cause() {
        let err = Error::TokenRetryExhausted {
            attempts: 3,
            last_error: Box::new(api("badtoken")),
        };
        assert_eq!(
            err.to_string(),
            "Token retry exhausted after 3 attempts: API error badtoken: boom"
        );
    }
}
