//! HTTP endpoint checks

use super::CheckOutcome;
use crate::error::CheckError;
use crate::models::{HttpCheck, HttpMethod};
use regex::Regex;
use reqwest::{redirect, Client, Method};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;

/// Body bytes kept in the raw result
const RAW_BODY_LIMIT: usize = 2048;

/// What the evaluator needs from a response
#[derive(Debug, Clone, Default)]
pub struct ResponseSnapshot {
    pub status: u16,
    /// Lower-cased header names
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

pub async fn run(check: &HttpCheck) -> Result<CheckOutcome, CheckError> {
    // Patterns are validated before any network traffic
    let matchers = Matchers::compile(check)?;
    let response = fetch(check).await?;
    Ok(evaluate_response(check, &matchers, &response))
}

fn build_client(check: &HttpCheck) -> Result<Client, CheckError> {
    let policy = if check.allow_http_redirects {
        redirect::Policy::limited(10)
    } else {
        redirect::Policy::none()
    };

    Ok(Client::builder()
        .timeout(Duration::from_secs(check.timeout_secs.max(1)))
        .redirect(policy)
        .danger_accept_invalid_certs(!check.verify_ssl_certificate)
        .build()?)
}

fn method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
        HttpMethod::Head => Method::HEAD,
    }
}

async fn fetch(check: &HttpCheck) -> Result<ResponseSnapshot, CheckError> {
    let client = build_client(check)?;
    let mut request = client.request(method(check.http_method), &check.endpoint);

    if let Some(user) = &check.username {
        request = request.basic_auth(user, check.password.as_ref());
    }
    if !check.http_params.is_empty() {
        request = request.query(&check.http_params);
    }
    if let Some(body) = &check.http_body {
        request = request.body(body.clone());
    }

    let response = request.send().await?;
    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_ascii_lowercase(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();
    let body = response.text().await?;

    Ok(ResponseSnapshot {
        status,
        headers,
        body,
    })
}

/// Compiled text and header patterns for a check
pub struct Matchers {
    text: Option<Regex>,
    headers: Vec<(String, Regex)>,
}

impl Matchers {
    pub fn compile(check: &HttpCheck) -> Result<Self, CheckError> {
        let text = check
            .text_match
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(Regex::new)
            .transpose()?;
        let headers = check
            .header_match
            .iter()
            .map(|(name, pattern)| -> Result<(String, Regex), CheckError> {
                Ok((name.to_ascii_lowercase(), Regex::new(pattern)?))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { text, headers })
    }
}

/// Whether `actual` satisfies an expected code ("200") or class ("2xx")
pub fn status_matches(expected: &str, actual: u16) -> bool {
    let expected = expected.trim();
    let actual = actual.to_string();
    expected.len() == actual.len()
        && expected
            .chars()
            .zip(actual.chars())
            .all(|(e, a)| e.eq_ignore_ascii_case(&'x') || e == a)
}

pub fn evaluate_response(
    check: &HttpCheck,
    matchers: &Matchers,
    response: &ResponseSnapshot,
) -> CheckOutcome {
    let mut preview = response.body.clone();
    if preview.len() > RAW_BODY_LIMIT {
        let mut cut = RAW_BODY_LIMIT;
        while !preview.is_char_boundary(cut) {
            cut -= 1;
        }
        preview.truncate(cut);
    }
    let raw = json!({
        "status": response.status,
        "headers": response.headers,
        "body": preview,
    });

    if !status_matches(&check.status_code, response.status) {
        return CheckOutcome::failure(
            format!(
                "Wrong code: got {} (expected {})",
                response.status, check.status_code
            ),
            raw,
        );
    }

    if let Some(text) = &matchers.text {
        if !text.is_match(&response.body) {
            return CheckOutcome::failure(
                format!("Failed to find match regex /{}/ in response body", text.as_str()),
                raw,
            );
        }
    }

    for (name, pattern) in &matchers.headers {
        match response.headers.get(name) {
            Some(value) if pattern.is_match(value) => {}
            Some(value) => {
                return CheckOutcome::failure(
                    format!("Header {name}: {value:?} does not match /{}/", pattern.as_str()),
                    raw,
                )
            }
            None => {
                return CheckOutcome::failure(format!("Header {name} missing from response"), raw)
            }
        }
    }

    CheckOutcome::success(format!("Status {}", response.status), raw)
}
