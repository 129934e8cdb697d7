//! Logs in, looks up the current user and edits a sandbox page in their
//! user space.
//!
//! This example shows how to:
//! - Read the endpoint and credentials from the environment (or a `.env` file)
//! - Log in and query `meta=userinfo`
//! - Make a token-authenticated edit with `post_with_token`
//!
//! Set `MW_API_ENDPOINT`, `MW_USERNAME` and `MW_PASSWORD`, then run with:
//! `cargo run --example edit_sandbox`

use serde::Deserialize;
use std::time::{Duration, SystemTime};
use wikisession::config::{self, EnvConfig};
use wikisession::{CallContext, Client, Error, Params, TokenKind, TokenOptions};

#[derive(Debug, Deserialize)]
struct UserInfo {
    id: u64,
    name: String,
    #[serde(default)]
    editcount: u64,
}

#[derive(Debug, Deserialize)]
struct UserInfoQuery {
    userinfo: UserInfo,
}

#[derive(Debug, Deserialize)]
struct UserInfoBody {
    query: UserInfoQuery,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct EditResult {
    result: String,
    title: String,
    #[serde(default)]
    newrevid: Option<u64>,
    #[serde(default)]
    newtimestamp: Option<String>,
    #[serde(default)]
    nochange: bool,
}

#[derive(Debug, Deserialize)]
struct EditBody {
    edit: EditResult,
}

fn sandbox_text(timestamp: &str, endpoint: &str) -> String {
    format!(
        "== wikisession demo ==\n\
         \n\
         Updated at: {}\n\
         \n\
         API endpoint: {}\n\
         \n\
         This page is written by the wikisession edit_sandbox demo for real-world testing.\n",
        timestamp, endpoint
    )
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Initialize tracing for logging
    tracing_subscriber::fmt()
        .with_env_filter("wikisession=debug,edit_sandbox=info")
        .init();

    // Values already in the environment win over the file
    config::load_dot_env(".env")?;
    let env = EnvConfig::from_env()?;

    let client: Client = env.client_builder()?.throw_on_api_error(true).build()?;
    let ctx = CallContext::background().with_timeout(Duration::from_secs(120));

    println!("=== Login ===");
    let login = client.login(&ctx, &env.username, &env.password).await?;
    println!(
        "Logged in as {} (id {})",
        login.username.as_deref().unwrap_or(&env.username),
        login.user_id.unwrap_or_default()
    );

    println!("\n=== User info ===");
    let response = client
        .get(
            &ctx,
            Params::new()
                .set("meta", "userinfo")
                .set("uiprop", vec!["editcount"]),
        )
        .await?;
    let user = response.decode::<UserInfoBody>()?.query.userinfo;
    println!(
        "name={} id={} editcount={}",
        user.name, user.id, user.editcount
    );

    println!("\n=== Edit ===");
    let timestamp = httpdate::fmt_http_date(SystemTime::now());
    let title = format!("User:{}/wikisession", user.name);
    let response = client
        .post_with_token(
            &ctx,
            TokenKind::Csrf,
            Params::new()
                .set("action", "edit")
                .set("title", title.as_str())
                .set("text", sandbox_text(&timestamp, &env.endpoint))
                .set("summary", format!("demo update timestamp: {}", timestamp))
                .set("minor", true),
            TokenOptions::default(),
        )
        .await?;

    let edit = response.decode::<EditBody>()?.edit;
    if !edit.result.eq_ignore_ascii_case("success") {
        eprintln!("Edit failed: {}", edit.result);
        return Ok(());
    }

    println!(
        "Edited {} newrevid={} timestamp={} (took {:?}, {} attempt(s))",
        edit.title,
        edit.newrevid.unwrap_or_default(),
        edit.newtimestamp.as_deref().unwrap_or("-"),
        response.latency,
        response.attempts
    );

    client.logout(&ctx).await?;
    println!("\nLogged out");

    Ok(())
}
