//! Webhook runner: a matched command becomes an outbound HTTP call.
//!
//! The definition's URL, body, and header values may each carry a single
//! `*`, replaced with the wildcard capture at execution time. Responses map
//! onto the process-style exit contract: 2xx bodies go to stdout with exit
//! 0, anything else goes to stderr with exit 1, a deadline maps to 143, and
//! every other transport or request-building failure maps to 127.

use std::sync::Arc;

use async_trait::async_trait;
use bosun_types::CommandSpec;
use reqwest::Method;

use crate::runner::{CommandRunner, RunRequest, EXIT_NOT_FOUND, EXIT_TERMINATED};

pub struct HttpRunner {
    spec: Arc<CommandSpec>,
    client: reqwest::Client,
}

impl HttpRunner {
    pub fn new(spec: Arc<CommandSpec>) -> Self {
        Self {
            spec,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl CommandRunner for HttpRunner {
    async fn run(&self, req: RunRequest<'_>) -> i32 {
        if self.spec.url.trim().is_empty() {
            // Config validation rejects this; re-checked for direct users.
            req.stderr
                .write(b"Error: url is required for http runner")
                .await;
            return EXIT_NOT_FOUND;
        }

        // argv[0] is the template's own first token; everything after it is
        // the wildcard capture.
        let wildcard = (req.argv.len() > 1).then(|| req.argv[1..].join(" "));
        let expand = |value: &str| match &wildcard {
            Some(w) => value.replacen('*', w, 1),
            None => value.to_string(),
        };

        let method_raw = self.spec.method.trim().to_ascii_uppercase();
        let method = if method_raw.is_empty() {
            Method::POST
        } else {
            match Method::from_bytes(method_raw.as_bytes()) {
                Ok(m) => m,
                Err(e) => {
                    req.stderr.write(format!("Error: {e}").as_bytes()).await;
                    return EXIT_NOT_FOUND;
                }
            }
        };

        let mut request = self.client.request(method, expand(&self.spec.url));
        for (key, value) in &self.spec.headers {
            if key.trim().is_empty() {
                continue;
            }
            request = request.header(key.as_str(), expand(value));
        }
        if !self.spec.body.is_empty() {
            request = request.body(expand(&self.spec.body));
        }
        if let Some(timeout) = req.timeout {
            request = request.timeout(timeout);
        }

        let response = tokio::select! {
            response = request.send() => response,
            _ = req.cancel.cancelled() => {
                req.stderr.write(b"Error: request canceled").await;
                return EXIT_NOT_FOUND;
            }
        };

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                if req.timeout.is_some() && e.is_timeout() {
                    let secs = req.timeout.map(|d| d.as_secs()).unwrap_or_default();
                    req.stderr
                        .write(format!("Timeout exceeded ({secs}s)").as_bytes())
                        .await;
                    return EXIT_TERMINATED;
                }
                req.stderr.write(format!("Error: {e}").as_bytes()).await;
                return EXIT_NOT_FOUND;
            }
        };

        let status = response.status();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                req.stderr.write(format!("Error: {e}").as_bytes()).await;
                return EXIT_NOT_FOUND;
            }
        };

        if status.is_success() {
            if !body.is_empty() {
                req.stdout.write(&body).await;
            }
            0
        } else {
            if !body.is_empty() {
                req.stderr.write(&body).await;
            } else {
                let line = format!(
                    "{} {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("")
                );
                req.stderr.write(line.trim_end().as_bytes()).await;
            }
            1
        }
    }
}
