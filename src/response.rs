//! Response wrapper that preserves the raw body alongside the envelope fields.
//!
//! Every API response shares a small set of optional top-level fields
//! (`error`, `errors`, `warnings`, `continue`). [`Response`] decodes those
//! leniently and keeps the whole body around so callers can decode the
//! operation-specific payload themselves.

use crate::{Error, Result};
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

const TOKEN_ERROR_CODES: &[&str] = &["badtoken", "notoken", "needtoken", "wrongtoken"];
const ASSERTION_ERROR_CODES: &[&str] = &["assertuserfailed", "assertnameduserfailed"];

/// One error object from the `error` or `errors` envelope field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorInfo {
    /// Machine-readable error code.
    #[serde(default)]
    pub code: String,

    /// Human-readable text (legacy error format).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,

    /// Human-readable text (`errorformat=plaintext`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl ApiErrorInfo {
    /// The most specific non-empty text of this error.
    pub fn message(&self) -> Option<&str> {
        [self.info.as_deref(), self.text.as_deref()]
            .into_iter()
            .flatten()
            .find(|s| !s.is_empty())
    }
}

/// The envelope fields understood by the engine.
///
/// Each field is decoded on its own; a missing or differently-shaped field
/// is simply left empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Envelope {
    /// The single `error` object.
    pub error: Option<ApiErrorInfo>,

    /// The `errors` list.
    pub errors: Vec<ApiErrorInfo>,

    /// The `warnings` map.
    pub warnings: Map<String, Value>,

    /// The `continue` map used for query continuation.
    pub continuation: Map<String, Value>,
}

impl Envelope {
    /// Decodes the envelope fields of a JSON body.
    pub fn from_body(body: &Value) -> Self {
        fn field<T: DeserializeOwned>(body: &Value, name: &str) -> Option<T> {
            body.get(name)
                .and_then(|v| serde_json::from_value(v.clone()).ok())
        }

        Self {
            error: field(body, "error"),
            errors: field(body, "errors").unwrap_or_default(),
            warnings: field(body, "warnings").unwrap_or_default(),
            continuation: field(body, "continue").unwrap_or_default(),
        }
    }

    /// The first error code, taken from `error` before `errors`.
    pub fn error_code(&self) -> Option<&str> {
        self.error
            .as_ref()
            .or_else(|| self.errors.first())
            .map(|e| e.code.as_str())
    }

    /// Returns `true` if the envelope carries any error.
    pub fn has_error(&self) -> bool {
        self.error.is_some() || !self.errors.is_empty()
    }
}

/// Semantic category of a server error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The supplied token was stale or missing; a fresh token may succeed.
    Token,
    /// The asserted identity is no longer logged in; a relogin may succeed.
    AssertionFailed,
    /// Any other API error.
    Api,
}

impl ErrorClass {
    /// Classifies an error code, ignoring case.
    ///
    /// # Examples
    ///
    /// ```
    /// use wikisession::ErrorClass;
    ///
    /// assert_eq!(ErrorClass::of("BadToken"), ErrorClass::Token);
    /// assert_eq!(ErrorClass::of("assertuserfailed"), ErrorClass::AssertionFailed);
    /// assert_eq!(ErrorClass::of("missingtitle"), ErrorClass::Api);
    /// ```
    pub fn of(code: &str) -> Self {
        let code = code.to_ascii_lowercase();
        if TOKEN_ERROR_CODES.contains(&code.as_str()) {
            ErrorClass::Token
        } else if ASSERTION_ERROR_CODES.contains(&code.as_str()) {
            ErrorClass::AssertionFailed
        } else {
            ErrorClass::Api
        }
    }
}

/// A wiki API response.
///
/// The raw body is always present; [`Response::body`] holds it decoded as
/// JSON (or `null` when it is not JSON) and [`Response::envelope`] the
/// best-effort envelope fields.
///
/// # Examples
///
/// ```no_run
/// use wikisession::{CallContext, Client, Params};
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct UserInfo {
///     name: String,
/// }
///
/// #[derive(Deserialize)]
/// struct Query {
///     userinfo: UserInfo,
/// }
///
/// #[derive(Deserialize)]
/// struct Body {
///     query: Query,
/// }
///
/// # async fn example() -> Result<(), wikisession::Error> {
/// let client = Client::new("https://wiki.example.org/w/api.php")?;
/// let ctx = CallContext::background();
///
/// let response = client.get(&ctx, Params::new().set("meta", "userinfo")).await?;
/// let body: Body = response.decode()?;
/// println!("Hello {}", body.query.userinfo.name);
/// println!("Request took {:?}", response.latency);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    /// The HTTP status code of the response.
    pub status: StatusCode,

    /// The response headers.
    pub headers: HeaderMap,

    /// The raw response body as a string.
    pub raw_body: String,

    /// The body decoded as JSON, or `Value::Null` if it was not JSON.
    pub body: Value,

    /// The envelope fields.
    pub envelope: Envelope,

    /// The latency of the call, including any relogin replays.
    pub latency: Duration,

    /// The number of times the request was sent (1 + relogin replays).
    pub attempts: usize,
}

impl Response {
    /// Builds a response from the transport's parts. Never fails.
    pub fn from_parts(status: StatusCode, headers: HeaderMap, raw: &[u8]) -> Self {
        let raw_body = String::from_utf8_lossy(raw).into_owned();
        let body = serde_json::from_str(&raw_body).unwrap_or(Value::Null);
        let envelope = Envelope::from_body(&body);
        Self {
            status,
            headers,
            raw_body,
            body,
            envelope,
            latency: Duration::ZERO,
            attempts: 1,
        }
    }

    /// Decodes the raw body into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.raw_body).map_err(|e| Error::DeserializationFailed {
            raw_response: self.raw_body.clone(),
            serde_error: e.to_string(),
            status: self.status,
        })
    }

    /// The first error code in the envelope.
    pub fn error_code(&self) -> Option<&str> {
        self.envelope.error_code()
    }

    /// Returns `true` if the envelope carries any error.
    pub fn has_error(&self) -> bool {
        self.envelope.has_error()
    }

    /// Classifies the first envelope error, if there is one.
    pub fn error_class(&self) -> Option<ErrorClass> {
        self.error_code().map(ErrorClass::of)
    }

    /// The `continue` map, to be merged into the next request of a
    /// continued query.
    pub fn continuation(&self) -> Option<&Map<String, Value>> {
        if self.envelope.continuation.is_empty() {
            None
        } else {
            Some(&self.envelope.continuation)
        }
    }

    /// Turns the envelope errors into an [`Error::Api`], if there are any.
    ///
    /// The code comes from the first error; the message is the most specific
    /// text of the first error that has one.
    pub fn api_error(&self) -> Option<Error> {
        if !self.has_error() {
            return None;
        }

        let errors: Vec<ApiErrorInfo> = self
            .envelope
            .error
            .iter()
            .chain(self.envelope.errors.iter())
            .cloned()
            .collect();

        let code = self.error_code().unwrap_or_default().to_string();
        let message = errors
            .iter()
            .find_map(ApiErrorInfo::message)
            .unwrap_or("API error")
            .to_string();

        Some(Error::Api {
            code,
            message,
            status: self.status,
            errors,
            response: Some(Box::new(self.clone())),
        })
    }

    /// Returns a reference to a header value by name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(body: &str) -> Response {
        Response::from_parts(StatusCode::OK, HeaderMap::new(), body.as_bytes())
    }

    #[test]
    fn decodes_single_error() {
        let r = response(r#"{"error":{"code":"badtoken","info":"Invalid CSRF token."}}"#);
        assert_eq!(r.error_code(), Some("badtoken"));
        assert_eq!(r.error_class(), Some(ErrorClass::Token));
        assert!(r.has_error());
    }

    #[test]
    fn decodes_error_list_and_builds_api_error() {
        let r = response(
            r#"{"errors":[{"code":"assertuserfailed","text":"You are no longer logged in."},{"code":"other"}]}"#,
        );
        assert_eq!(r.error_class(), Some(ErrorClass::AssertionFailed));

        match r.api_error() {
            Some(Error::Api {
                code,
                message,
                errors,
                ..
            }) => {
                assert_eq!(code, "assertuserfailed");
                assert_eq!(message, "You are no longer logged in.");
                assert_eq!(errors.len(), 2);
            }
            other => panic!("Expected Api error, got {:?}", other),
        }
    }

    #[test]
    fn message_falls_back_when_no_text() {
        let r = response(r#"{"error":{"code":"internal_api_error"}}"#);
        match r.api_error() {
            Some(Error::Api { message, .. }) => assert_eq!(message, "API error"),
            other => panic!("Expected Api error, got {:?}", other),
        }
    }

    #[test]
    fn misshaped_fields_are_ignored() {
        let r = response(r#"{"error":"oops","errors":{"a":1},"warnings":[1,2],"continue":{"continue":"-||","rvcontinue":12}}"#);
        assert!(r.envelope.error.is_none());
        assert!(r.envelope.errors.is_empty());
        assert!(r.envelope.warnings.is_empty());
        assert_eq!(r.continuation().map(|c| c.len()), Some(2));
        assert!(r.api_error().is_none());
    }

    #[test]
    fn non_json_body_keeps_raw_text() {
        let r = response("<html>maintenance</html>");
        assert_eq!(r.body, Value::Null);
        assert_eq!(r.raw_body, "<html>maintenance</html>");
        assert!(!r.has_error());
        assert!(r.decode::<Value>().is_err());
    }

    #[test]
    fn classification_ignores_case() {
        assert_eq!(ErrorClass::of("NeedToken"), ErrorClass::Token);
        assert_eq!(ErrorClass::of("ASSERTUSERFAILED"), ErrorClass::AssertionFailed);
        assert_eq!(ErrorClass::of(""), ErrorClass::Api);
    }
}
