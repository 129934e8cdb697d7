//! Token-authenticated writes with bounded refresh-and-retry.
//!
//! The outcome of every attempt goes through [`classify`], the single place
//! that decides which failures the client recovers from: stale tokens are
//! retried here, assertion failures are handled by the relogin loop in
//! [`Client::call`], and everything else goes back to the caller untouched.

use crate::client::{Client, Dispatch};
use crate::context::CallContext;
use crate::params::{Normalized, ParamSet};
use crate::request::Method;
use crate::response::{ErrorClass, Response};
use crate::tokens::TokenKind;
use crate::{Error, Result};

/// Options for [`Client::post_with_token`].
///
/// # Examples
///
/// ```
/// use wikisession::TokenOptions;
///
/// // Watchlist tokens are sent in the regular `token` field; force a fresh
/// // one and allow a single retry.
/// let options = TokenOptions::new().bypass_cache(true).retry_budget(2);
/// assert_eq!(options.field(), "token");
/// ```
#[derive(Debug, Clone)]
pub struct TokenOptions {
    field_name: String,
    retry_budget: Option<usize>,
    bypass_cache: bool,
}

impl Default for TokenOptions {
    fn default() -> Self {
        Self {
            field_name: "token".to_string(),
            retry_budget: None,
            bypass_cache: false,
        }
    }
}

impl TokenOptions {
    /// Default options: field `token`, the client's retry budget, cache allowed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the request field that carries the token.
    pub fn field_name(mut self, name: impl Into<String>) -> Self {
        self.field_name = name.into();
        self
    }

    /// Sets the maximum number of attempts. Values below 1 are treated as 1.
    pub fn retry_budget(mut self, attempts: usize) -> Self {
        self.retry_budget = Some(attempts);
        self
    }

    /// Forces a fresh token fetch on the first attempt.
    pub fn bypass_cache(mut self, bypass: bool) -> Self {
        self.bypass_cache = bypass;
        self
    }

    /// The request field that carries the token.
    pub fn field(&self) -> &str {
        &self.field_name
    }
}

/// What the client should do with the outcome of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verdict {
    /// Hand the outcome to the caller.
    Accept,
    /// Refresh the token and try again.
    StaleToken,
    /// Log in again and replay the request.
    AssertionFailed,
    /// Give up; the failure goes to the caller unchanged.
    Fatal,
}

/// Classifies the outcome of one request attempt.
///
/// Envelope errors are inspected even when strict mode is off; transport
/// failures and cancellations are always fatal.
pub(crate) fn classify(outcome: &Result<Response>) -> Verdict {
    match outcome {
        Ok(response) => match response.error_class() {
            Some(ErrorClass::Token) => Verdict::StaleToken,
            Some(ErrorClass::AssertionFailed) => Verdict::AssertionFailed,
            _ => Verdict::Accept,
        },
        Err(e) if e.is_token_error() => Verdict::StaleToken,
        Err(e) if e.is_assertion_failure() => Verdict::AssertionFailed,
        Err(_) => Verdict::Fatal,
    }
}

/// Turns a faulted outcome into the error that describes it.
pub(crate) fn into_failure(outcome: Result<Response>) -> Error {
    match outcome {
        Ok(response) => response.api_error().unwrap_or_else(|| Error::Api {
            code: response.error_code().unwrap_or_default().to_string(),
            message: "API error".to_string(),
            status: response.status,
            errors: Vec::new(),
            response: None,
        }),
        Err(e) => e,
    }
}

/// Extra check applied to responses that passed classification; returning
/// an error marks the attempt as a stale-token fault.
pub(crate) type TokenCheck = fn(&Response) -> Option<Error>;

fn no_check(_: &Response) -> Option<Error> {
    None
}

impl Client {
    /// Sends a write that needs a token, refreshing the token and retrying
    /// while the server reports it as stale.
    ///
    /// The first attempt uses the cached token (unless `bypass_cache` is set);
    /// every later attempt fetches a fresh one. After the retry budget is
    /// spent the last stale-token failure is returned inside
    /// [`Error::TokenRetryExhausted`]. Any other failure ends the loop at once.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use wikisession::{CallContext, Client, Params, TokenKind, TokenOptions};
    ///
    /// # async fn example(client: Client) -> Result<(), wikisession::Error> {
    /// let ctx = CallContext::background();
    /// let response = client
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
    /// println!("{}", response.raw_body);
    /// # Ok(())
    /// # }
    /// ```
    #[doc(alias = "write_with_token")]
    pub async fn post_with_token(
        &self,
        ctx: &CallContext,
        kind: TokenKind,
        params: impl Into<ParamSet>,
        options: TokenOptions,
    ) -> Result<Response> {
        let params = params.into().normalize()?;
        self.write_with_token(ctx, kind, params, &options, Dispatch::default(), no_check)
            .await
    }

    pub(crate) async fn write_with_token(
        &self,
        ctx: &CallContext,
        kind: TokenKind,
        mut params: Normalized,
        options: &TokenOptions,
        dispatch: Dispatch,
        check: TokenCheck,
    ) -> Result<Response> {
        let budget = options
            .retry_budget
            .unwrap_or(self.inner.token_retry)
            .max(1);
        let mut last_error = None;

        for attempt in 1..=budget {
            if attempt > 1 || options.bypass_cache {
                self.invalidate_token(&kind);
            }

            let token = self.get_token(ctx, kind.clone()).await?;
            params.insert(options.field_name.clone(), token);

            let outcome = self.call(ctx, Method::Write, params.clone(), dispatch).await;
            let stale = match (classify(&outcome), outcome) {
                (Verdict::StaleToken, outcome) => into_failure(outcome),
                (_, Ok(response)) => match check(&response) {
                    Some(stale) => stale,
                    None => return Ok(response),
                },
                (_, Err(e)) => return Err(e),
            };

            tracing::warn!(
                kind = %kind,
                attempt = attempt,
                budget = budget,
                code = stale.api_code().unwrap_or_default(),
                "Token rejected"
            );
            last_error = Some(stale);
        }

        Err(Error::TokenRetryExhausted {
            attempts: budget,
            last_error: Box::new(last_error.unwrap_or(Error::MissingToken(kind))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, StatusCode};

    fn response(body: &str) -> Result<Response> {
        Ok(Response::from_parts(
            StatusCode::OK,
            HeaderMap::new(),
            body.as_bytes(),
        ))
    }

    #[test]
    fn classifies_envelope_codes() {
        assert_eq!(classify(&response(r#"{"edit":{"result":"Success"}}"#)), Verdict::Accept);
        assert_eq!(
            classify(&response(r#"{"error":{"code":"badtoken"}}"#)),
            Verdict::StaleToken
        );
        assert_eq!(
            classify(&response(r#"{"errors":[{"code":"assertuserfailed"}]}"#)),
            Verdict::AssertionFailed
        );
        assert_eq!(
            classify(&response(r#"{"error":{"code":"protectedpage"}}"#)),
            Verdict::Accept
        );
    }

    #[test]
    fn classifies_errors() {
        assert_eq!(classify(&Err(Error::Cancelled)), Verdict::Fatal);
        assert_eq!(classify(&Err(Error::Timeout)), Verdict::Fatal);
        assert_eq!(classify(&Err(Error::NoStoredCredentials)), Verdict::Fatal);

        let stale = into_failure(response(r#"{"error":{"code":"NoToken","info":"x"}}"#));
        assert_eq!(classify(&Err(stale)), Verdict::StaleToken);
    }

    #[test]
    fn failure_keeps_server_code_and_message() {
        let err = into_failure(response(
            r#"{"error":{"code":"badtoken","info":"Invalid CSRF token."}}"#,
        ));
        assert_eq!(err.api_code(), Some("badtoken"));
        assert_eq!(err.to_string(), "API error badtoken: Invalid CSRF token.");
    }

    #[test]
    fn options_defaults() {
        let options = TokenOptions::default();
        assert_eq!(options.field(), "token");
        assert_eq!(options.retry_budget, None);
        assert!(!options.bypass_cache);

        let options = TokenOptions::new().field_name("lgtoken").retry_budget(5);
        assert_eq!(options.field(), "lgtoken");
        assert_eq!(options.retry_budget, Some(5));
    }
}
