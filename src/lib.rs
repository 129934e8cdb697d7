//! # wikisession - a session-aware client for wiki APIs
//!
//! wikisession talks to a wiki's form-based `api.php` endpoint on top of
//! `reqwest`. It keeps the HTTP session (cookies), caches and refreshes
//! per-kind tokens, logs in and keeps the login alive, and hands back the
//! raw response alongside the decoded error envelope.
//!
//! ## Quick Start
//!
//! ```no_run
//! use serde::Deserialize;
//! use wikisession::{CallContext, Client, Params, TokenKind, TokenOptions};
//!
//! #[derive(Deserialize)]
//! struct UserInfo {
//!     name: String,
//! }
//!
//! #[derive(Deserialize)]
//! struct Query {
//!     userinfo: UserInfo,
//! }
//!
//! #[derive(Deserialize)]
//! struct Body {
//!     query: Query,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), wikisession::Error> {
//!     let client = Client::builder()
//!         .endpoint("https://wiki.example.org/w/api.php")?
//!         .user_agent("my-bot/1.0")
//!         .build()?;
//!     let ctx = CallContext::background();
//!
//!     client.login(&ctx, "MyBot@tasks", "bot-password").await?;
//!
//!     // `action=query` and `format=json` are filled in for you
//!     let response = client
//!         .get(&ctx, Params::new().set("meta", "userinfo"))
//!         .await?;
//!     let body: Body = response.decode()?;
//!     println!("Logged in as {}", body.query.userinfo.name);
//!
//!     // The CSRF token is fetched once, cached, and refreshed if rejected
//!     client
//!         .post_with_token(
//!             &ctx,
//!             TokenKind::Csrf,
//!             Params::new()
//!                 .set("action", "edit")
//!                 .set("title", "Sandbox")
//!                 .set("appendtext", "\nhello")
//!                 .set("minor", true),
//!             TokenOptions::default(),
//!         )
//!         .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Flexible parameters** - builder, string pairs, maps or any `Serialize` record, normalized to form fields
//! - **Token handling** - per-kind token cache, one shared fetch for concurrent callers, refresh-and-retry on stale tokens
//! - **Login keep-alive** - identity assertion on every request, automatic relogin and replay when the session is lost
//! - **Uploads** - file attachments switch writes to `multipart/form-data`
//! - **Cancellation** - every call takes a [`CallContext`] with a cancellation token and a deadline
//! - **Rich errors** - server codes, raw responses and the last cause of exhausted retries are all kept
//! - **Automatic logging** - structured `tracing` events that never carry passwords or tokens
//!
//! ## Error Handling
//!
//! Envelope errors stay inside the [`Response`] by default, so the raw body is
//! always available. With [`ClientBuilder::throw_on_api_error`] they become
//! [`Error::Api`]:
//!
//! ```no_run
//! use wikisession::{CallContext, Client, Error, Params};
//!
//! # async fn example() -> Result<(), Error> {
//! let client = Client::builder()
//!     .endpoint("https://wiki.example.org/w/api.php")?
//!     .throw_on_api_error(true)
//!     .build()?;
//!
//! let ctx = CallContext::background();
//! match client.get(&ctx, Params::new().set("list", "nosuchlist")).await {
//!     Ok(response) => println!("{}", response.raw_body),
//!     Err(Error::Api { code, message, .. }) => eprintln!("API error {}: {}", code, message),
//!     Err(Error::TokenRetryExhausted { attempts, last_error }) => {
//!         eprintln!("Token still rejected after {} attempts: {}", attempts, last_error);
//!     }
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! # Ok(())
//! # }
//! ```

mod client;
pub mod config;
mod context;
mod error;
mod params;
mod request;
mod response;
mod retry;
mod session;
mod tokens;

pub use client::{Client, ClientBuilder};
pub use context::CallContext;
pub use error::{Error, Result};
pub use params::{Attachment, FilePart, Normalized, ParamSet, Params, Value};
pub use request::{Endpoint, Method};
pub use response::{ApiErrorInfo, Envelope, ErrorClass, Response};
pub use retry::TokenOptions;
pub use session::LoginResult;
pub use tokens::TokenKind;
