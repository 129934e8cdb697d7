//! Endpoint validation and construction of outbound HTTP requests.

use crate::params::Normalized;
use crate::{Error, Result};
use http::header::{CONTENT_TYPE, USER_AGENT};
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// HTTP method of an API request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// A read, sent as a GET with the fields in the query string.
    Read,
    /// A write, sent as a POST with the fields in the body.
    Write,
}

impl Method {
    fn as_http(self) -> http::Method {
        match self {
            Method::Read => http::Method::GET,
            Method::Write => http::Method::POST,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_http().as_str())
    }
}

/// A validated `api.php` endpoint URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint(Url);

impl Endpoint {
    /// Parses and validates an endpoint URL.
    ///
    /// The URL must be absolute and its path must end in `api.php`.
    ///
    /// # Examples
    ///
    /// ```
    /// use wikisession::Endpoint;
    ///
    /// assert!(Endpoint::parse("https://en.wikipedia.org/w/api.php").is_ok());
    /// assert!(Endpoint::parse("https://en.wikipedia.org/wiki/Main_Page").is_err());
    /// assert!(Endpoint::parse("/w/api.php").is_err());
    /// ```
    pub fn parse(endpoint: &str) -> Result<Self> {
        let url = Url::parse(endpoint).map_err(|e| {
            Error::InvalidEndpoint(format!("expected a full URL ({}): {:?}", e, endpoint))
        })?;
        if url.host_str().unwrap_or_default().is_empty() {
            return Err(Error::InvalidEndpoint(format!(
                "expected a full URL with a host: {:?}",
                endpoint
            )));
        }
        if !url.path().ends_with("api.php") {
            return Err(Error::InvalidEndpoint(format!(
                "expected a path ending in api.php: {:?}",
                url.path()
            )));
        }
        Ok(Self(url))
    }

    /// The endpoint URL.
    pub fn url(&self) -> &Url {
        &self.0
    }

    /// URL for a read: the fields merged into the preset query, outgoing
    /// values winning and each key kept once.
    pub(crate) fn read_url(&self, fields: &BTreeMap<String, String>) -> Url {
        let mut url = self.0.clone();
        let preset: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| !fields.contains_key(k.as_ref()))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        url.query_pairs_mut()
            .clear()
            .extend_pairs(preset)
            .extend_pairs(fields);
        url
    }

    /// URL for a write: preset query keys that also appear in the body are
    /// dropped so the body value is authoritative.
    pub(crate) fn write_url(&self, fields: &BTreeMap<String, String>) -> Url {
        let mut url = self.0.clone();
        let preset: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| !fields.contains_key(k.as_ref()))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        if preset.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(preset);
        }
        url
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Encodes fields as an `application/x-www-form-urlencoded` string.
pub(crate) fn urlencode(fields: &BTreeMap<String, String>) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(fields)
        .finish()
}

/// Builds a multipart form with one text part per field and one file part
/// per attachment.
fn multipart_form(params: &Normalized) -> Result<reqwest::multipart::Form> {
    let mut form = reqwest::multipart::Form::new();
    for (key, value) in params.fields() {
        form = form.text(key.clone(), value.clone());
    }
    for attachment in params.attachments() {
        let mut part = reqwest::multipart::Part::bytes(attachment.data.to_vec())
            .file_name(attachment.filename.clone());
        if let Some(content_type) = &attachment.content_type {
            part = part.mime_str(content_type)?;
        }
        form = form.part(attachment.field.clone(), part);
    }
    Ok(form)
}

/// Builds the outbound request for `params`.
pub(crate) fn build(
    http_client: &reqwest::Client,
    endpoint: &Endpoint,
    method: Method,
    params: &Normalized,
    user_agent: &str,
    timeout: Option<Duration>,
) -> Result<reqwest::Request> {
    if method == Method::Read {
        if let Some(attachment) = params.attachments().first() {
            return Err(Error::UnsupportedParameterKind {
                key: attachment.field.clone(),
                kind: "file on a read request",
            });
        }
    }

    let url = match method {
        Method::Read => endpoint.read_url(params.fields()),
        Method::Write => endpoint.write_url(params.fields()),
    };

    let mut request = http_client
        .request(method.as_http(), url)
        .header(USER_AGENT, user_agent);

    if let Some(timeout) = timeout {
        request = request.timeout(timeout);
    }

    if method == Method::Write {
        request = if params.attachments().is_empty() {
            request
                .header(CONTENT_TYPE, FORM_URLENCODED)
                .body(urlencode(params.fields()))
        } else {
            request.multipart(multipart_form(params)?)
        };
    }

    Ok(request.build()?)
}
