//! Token kinds, the per-client token cache and coalesced token fetches.
//!
//! Concurrent callers asking for the same uncached kind share one fetch: the
//! first caller registers a [`Shared`] future under the kind and later callers
//! await a clone of it. The registry only keeps a weak handle, so a fetch
//! that every waiter abandoned is dropped rather than kept alive by the client.

use crate::client::{Client, Dispatch};
use crate::context::CallContext;
use crate::params::{ParamSet, Params};
use crate::request::Method;
use crate::response::Response;
use crate::{Error, Result};
use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

type TokenFuture = Shared<BoxFuture<'static, Result<String>>>;

/// The kind of a session token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// General write authorization.
    Csrf,
    /// Used only to log in.
    Login,
    /// Watchlist changes.
    Watch,
    /// Patrolling changes.
    Patrol,
    /// Rollbacks.
    Rollback,
    /// User group changes.
    UserRights,
    /// Account creation.
    CreateAccount,
    /// Any other kind, by its lowercase wire name.
    Other(String),
}

impl TokenKind {
    /// The wire name of the kind, as sent in `type=`.
    pub fn as_str(&self) -> &str {
        match self {
            TokenKind::Csrf => "csrf",
            TokenKind::Login => "login",
            TokenKind::Watch => "watch",
            TokenKind::Patrol => "patrol",
            TokenKind::Rollback => "rollback",
            TokenKind::UserRights => "userrights",
            TokenKind::CreateAccount => "createaccount",
            TokenKind::Other(name) => name,
        }
    }

    /// The key the token is returned under in `query.tokens`.
    fn response_key(&self) -> String {
        format!("{}token", self.as_str())
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for TokenKind {
    fn from(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "csrf" => TokenKind::Csrf,
            "login" => TokenKind::Login,
            "watch" => TokenKind::Watch,
            "patrol" => TokenKind::Patrol,
            "rollback" => TokenKind::Rollback,
            "userrights" => TokenKind::UserRights,
            "createaccount" => TokenKind::CreateAccount,
            other => TokenKind::Other(other.to_string()),
        }
    }
}

impl FromStr for TokenKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(TokenKind::from(s))
    }
}

struct Flight {
    id: u64,
    future: WeakShared<BoxFuture<'static, Result<String>>>,
}

/// Cached tokens and in-flight fetches, guarded by the client's state lock.
#[derive(Default)]
pub(crate) struct TokenCache {
    values: HashMap<TokenKind, String>,
    in_flight: HashMap<TokenKind, Flight>,
    next_flight: u64,
}

impl TokenCache {
    pub(crate) fn get(&self, kind: &TokenKind) -> Option<String> {
        self.values.get(kind).cloned()
    }

    /// Removes the cached value and detaches any in-flight fetch, so its
    /// result is not cached when it lands.
    pub(crate) fn invalidate(&mut self, kind: &TokenKind) {
        self.values.remove(kind);
        self.in_flight.remove(kind);
    }

    pub(crate) fn clear(&mut self) {
        self.values.clear();
        self.in_flight.clear();
    }

    fn join(&self, kind: &TokenKind) -> Option<TokenFuture> {
        self.in_flight.get(kind)?.future.upgrade()
    }

    fn next_id(&mut self) -> u64 {
        self.next_flight += 1;
        self.next_flight
    }

    fn register(&mut self, kind: TokenKind, id: u64, future: &TokenFuture) {
        if let Some(weak) = future.downgrade() {
            self.in_flight.insert(kind, Flight { id, future: weak });
        }
    }

    /// Unregisters flight `id` and caches its token, unless the flight was
    /// detached in the meantime.
    fn finish(&mut self, kind: &TokenKind, id: u64, result: &Result<String>) {
        if self.in_flight.get(kind).map(|f| f.id) != Some(id) {
            return;
        }
        self.in_flight.remove(kind);
        if let Ok(token) = result {
            self.values.insert(kind.clone(), token.clone());
        }
    }

    #[cfg(test)]
    pub(crate) fn insert(&mut self, kind: TokenKind, token: &str) {
        self.values.insert(kind, token.to_string());
    }
}

fn extract_token(response: &Response, kind: &TokenKind) -> Result<String> {
    if let Some(err) = response.api_error() {
        return Err(err);
    }
    response
        .body
        .get("query")
        .and_then(|q| q.get("tokens"))
        .and_then(|t| t.get(kind.response_key()))
        .and_then(|v| v.as_str())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::MissingToken(kind.clone()))
}

impl Client {
    /// Returns a token of the given kind, fetching it if it is not cached.
    ///
    /// Concurrent callers for the same uncached kind share a single request
    /// and all observe its result. `ctx` bounds only this caller's wait.
    pub async fn get_token(&self, ctx: &CallContext, kind: TokenKind) -> Result<String> {
        let flight = {
            let mut state = self.inner.state.lock();
            if let Some(token) = state.tokens.get(&kind) {
                return Ok(token);
            }
            match state.tokens.join(&kind) {
                Some(flight) => flight,
                None => {
                    let id = state.tokens.next_id();
                    let flight = self.start_fetch(kind.clone(), id);
                    state.tokens.register(kind, id, &flight);
                    flight
                }
            }
        };

        ctx.run(flight).await
    }

    /// Drops the cached token of one kind.
    pub fn invalidate_token(&self, kind: &TokenKind) {
        self.inner.state.lock().tokens.invalidate(kind);
    }

    /// Drops every cached token.
    pub fn invalidate_all_tokens(&self) {
        self.inner.state.lock().tokens.clear();
    }

    fn start_fetch(&self, kind: TokenKind, id: u64) -> TokenFuture {
        let client = self.clone();
        async move {
            let result = client.fetch_token(&kind).await;
            client.inner.state.lock().tokens.finish(&kind, id, &result);
            result
        }
        .boxed()
        .shared()
    }

    async fn fetch_token(&self, kind: &TokenKind) -> Result<String> {
        let params = ParamSet::from(
            Params::new()
                .set("action", "query")
                .set("meta", "tokens")
                .set("type", kind.as_str()),
        )
        .normalize()?;

        tracing::debug!(kind = %kind, "Fetching token");

        // A login token is fetched from inside login; relogging from here
        // would nest logins without bound.
        let dispatch = Dispatch {
            skip_relogin: *kind == TokenKind::Login,
            ..Dispatch::default()
        };
        let response = self
            .call(&CallContext::background(), Method::Read, params, dispatch)
            .await?;
        let token = extract_token(&response, kind);

        match &token {
            Ok(_) => tracing::debug!(kind = %kind, "Fetched token"),
            Err(e) => tracing::warn!(kind = %kind, error = %e, "Token fetch failed"),
        }
        token
    }
}
