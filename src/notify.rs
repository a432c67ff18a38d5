//! Best-effort chat notification sink.
//!
//! Posting never blocks or fails the caller: delivery runs on a spawned
//! task and HTTP failures are logged at debug level only.

use reqwest::Client;
use serde_json::json;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    fn label(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARN",
            Severity::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Notifier {
    client: Client,
    webhook_url: Option<String>,
}

impl Notifier {
    pub fn new(webhook_url: Option<String>) -> Self {
        Self {
            client: Client::new(),
            webhook_url,
        }
    }

    /// A notifier that drops everything; used where no webhook is configured.
    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn post(&self, severity: Severity, text: impl Into<String>) {
        let Some(url) = self.webhook_url.clone() else {
            return;
        };
        let client = self.client.clone();
        let body = json!({ "text": format!("[{}] {}", severity.label(), text.into()) });
        tokio::spawn(async move {
            if let Err(e) = client.post(&url).json(&body).send().await {
                debug!("notification delivery failed: {}", e);
            }
        });
    }

    pub fn info(&self, text: impl Into<String>) {
        self.post(Severity::Info, text);
    }

    pub fn warn(&self, text: impl Into<String>) {
        self.post(Severity::Warning, text);
    }

    pub fn error(&self, text: impl Into<String>) {
        self.post(Severity::Error, text);
    }
}
