//! Generic webhook sink with templated bodies

use super::{AlertEvent, NotificationSink};
use crate::error::DispatchError;
use async_trait::async_trait;
use reqwest::{header, Client, Method};
use std::collections::BTreeMap;
use tera::{Context, Tera};

/// Sends events to an HTTP endpoint.
///
/// POST bodies come from a Tera template rendered with the event's
/// fields; without a template the event is sent as JSON. GET requests
/// carry no body.
pub struct WebhookSink {
    name: String,
    url: String,
    method: Method,
    headers: header::HeaderMap,
    body_template: Option<String>,
    client: Client,
}

impl WebhookSink {
    pub fn new(
        name: String,
        url: String,
        method: &str,
        headers: BTreeMap<String, String>,
        body_template: Option<String>,
    ) -> Result<Self, DispatchError> {
        let method = match method.to_uppercase().as_str() {
            "POST" => Method::POST,
            "GET" => Method::GET,
            "PUT" => Method::PUT,
            other => {
                return Err(DispatchError::InvalidConfiguration(format!(
                    "Unsupported HTTP method: {other}"
                )))
            }
        };

        let mut header_map = header::HeaderMap::new();
        for (key, value) in &headers {
            let name = header::HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
                DispatchError::InvalidConfiguration(format!("Invalid header name: {e}"))
            })?;
            let value = header::HeaderValue::from_str(value).map_err(|e| {
                DispatchError::InvalidConfiguration(format!("Invalid header value: {e}"))
            })?;
            header_map.insert(name, value);
        }

        Ok(Self {
            name,
            url,
            method,
            headers: header_map,
            body_template,
            client: Client::new(),
        })
    }

    fn render_body(&self, event: &AlertEvent) -> Result<String, DispatchError> {
        match &self.body_template {
            Some(template) => {
                let mut context = Context::from_serialize(event)?;
                context.insert("summary", &event.summary());
                Ok(Tera::one_off(template, &context, false)?)
            }
            None => serde_json::to_string(event)
                .map_err(|e| DispatchError::Delivery(format!("cannot encode event: {e}"))),
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, event: &AlertEvent) -> Result<(), DispatchError> {
        let mut request = self
            .client
            .request(self.method.clone(), &self.url)
            .headers(self.headers.clone());

        if self.method != Method::GET {
            let body = self.render_body(event)?;
            if !self.headers.contains_key(header::CONTENT_TYPE) {
                request = request.header(header::CONTENT_TYPE, "application/json");
            }
            request = request.body(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            return Err(DispatchError::Delivery(format!(
                "Webhook returned non-success status: {status}. Body: {error_body}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::testing::event;

    #[test]
    fn test_unsupported_method() {
        let result = WebhookSink::new(
            "hook".to_string(),
            "http://localhost".to_string(),
            "TRACE",
            BTreeMap::new(),
            None,
        );
        assert!(matches!(result, Err(DispatchError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_template_renders_event_fields() {
        let sink = WebhookSink::new(
            "hook".to_string(),
            "http://localhost".to_string(),
            "post",
            BTreeMap::new(),
            Some(
                r#"{"text": "{{ summary }}: {% for c in failing_checks %}{{ c.name }}{% endfor %}"}"#
                    .to_string(),
            ),
        )
        .unwrap();

        let body = sink.render_body(&event(&["hook"])).unwrap();
        assert_eq!(
            body,
            r#"{"text": "Service website is CRITICAL (was PASSING): homepage"}"#
        );
    }

    #[test]
    fn test_bad_template_is_template_error() {
        let sink = WebhookSink::new(
            "hook".to_string(),
            "http://localhost".to_string(),
            "POST",
            BTreeMap::new(),
            Some("{{ unclosed".to_string()),
        )
        .unwrap();
        assert!(matches!(
            sink.render_body(&event(&["hook"])),
            Err(DispatchError::Template(_))
        ));
    }

    #[tokio::test]
    async fn test_post_with_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_header("x-token", "abc")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "service_name": "website",
                "new_status": "CRITICAL"
            })))
            .with_status(204)
            .create_async()
            .await;

        let mut headers = BTreeMap::new();
        headers.insert("X-Token".to_string(), "abc".to_string());
        let sink = WebhookSink::new(
            "hook".to_string(),
            format!("{}/hook", server.url()),
            "POST",
            headers,
            None,
        )
        .unwrap();

        sink.send(&event(&["hook"])).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_success_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/hook")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let sink = WebhookSink::new(
            "hook".to_string(),
            format!("{}/hook", server.url()),
            "GET",
            BTreeMap::new(),
            None,
        )
        .unwrap();

        let err = sink.send(&event(&["hook"])).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
