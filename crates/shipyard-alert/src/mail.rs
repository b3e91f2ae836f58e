//! Alert events, rendering, and delivery.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HOST, USER_AGENT};
use http::{Method, Request};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use shipyard_core::UserId;

use crate::classify::AlertLevel;
use crate::error::{AlertError, AlertResult};

/// One alert addressed to one recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub user_id: UserId,
    pub email: String,
    pub pod_name: String,
    pub namespace: String,
    pub level: AlertLevel,
    pub log_message: String,
    pub timestamp: String,
}

/// A message ready for the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedMail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn render_alert(from: &str, event: &AlertEvent) -> RenderedMail {
    let html = format!(
        "<h2>Kubernetes Pod alert</h2>\n\
         <p><strong>Namespace:</strong> {}</p>\n\
         <p><strong>Pod:</strong> {}</p>\n\
         <p><strong>Level:</strong> {}</p>\n\
         <p><strong>Time:</strong> {}</p>\n\
         <p><strong>Message:</strong></p>\n\
         <pre>{}</pre>\n",
        escape(&event.namespace),
        escape(&event.pod_name),
        event.level,
        escape(&event.timestamp),
        escape(&event.log_message),
    );
    RenderedMail {
        from: from.to_string(),
        to: event.email.clone(),
        subject: format!("Kubernetes Pod alert: {}/{}", event.namespace, event.pod_name),
        html,
    }
}

/// Outbound mail delivery.
#[async_trait]
pub trait MailTransport: Send + Sync + 'static {
    async fn send(&self, mail: &RenderedMail) -> AlertResult<()>;
}

/// Writes each message to the log instead of sending it.
pub struct LogTransport;

#[async_trait]
impl MailTransport for LogTransport {
    async fn send(&self, mail: &RenderedMail) -> AlertResult<()> {
        info!(to = %mail.to, subject = %mail.subject, "alert mail");
        debug!(body = %mail.html, "alert mail body");
        Ok(())
    }
}

/// POSTs each message as JSON to a mail relay over plain HTTP.
pub struct WebhookTransport {
    address: String,
    host: String,
    path: String,
    timeout: Duration,
}

impl WebhookTransport {
    pub fn new(url: &str, timeout: Duration) -> AlertResult<Self> {
        let uri: http::Uri = url
            .parse()
            .map_err(|e: http::uri::InvalidUri| AlertError::Transport(e.to_string()))?;
        if uri.scheme_str() != Some("http") {
            return Err(AlertError::Transport(format!(
                "unsupported relay url {url}: only http:// endpoints are supported"
            )));
        }
        let authority = uri
            .authority()
            .ok_or_else(|| AlertError::Transport(format!("relay url {url} has no host")))?;
        Ok(Self {
            address: format!("{}:{}", authority.host(), authority.port_u16().unwrap_or(80)),
            host: authority.as_str().to_string(),
            path: uri
                .path_and_query()
                .map(|p| p.as_str().to_string())
                .unwrap_or_else(|| "/".to_string()),
            timeout,
        })
    }

    async fn post(&self, payload: Vec<u8>) -> AlertResult<()> {
        let stream = TcpStream::connect(&self.address)
            .await
            .map_err(|e| AlertError::Transport(format!("connect {}: {e}", self.address)))?;
        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| AlertError::Transport(format!("handshake: {e}")))?;
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = Request::builder()
            .method(Method::POST)
            .uri(&self.path)
            .header(HOST, &self.host)
            .header(CONTENT_TYPE, "application/json")
            .header(USER_AGENT, "shipyard/0.1")
            .body(Full::new(Bytes::from(payload)))
            .map_err(|e| AlertError::Transport(e.to_string()))?;
        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| AlertError::Transport(e.to_string()))?;
        let status = resp.status();
        // Drain so the connection closes cleanly.
        let _ = resp.into_body().collect().await;
        if !status.is_success() {
            return Err(AlertError::Transport(format!("relay answered {status}")));
        }
        Ok(())
    }
}

#[async_trait]
impl MailTransport for WebhookTransport {
    async fn send(&self, mail: &RenderedMail) -> AlertResult<()> {
        let payload = serde_json::to_vec(mail).map_err(|e| AlertError::Transport(e.to_string()))?;
        tokio::time::timeout(self.timeout, self.post(payload))
            .await
            .map_err(|_| AlertError::Transport(format!("relay timed out after {:?}", self.timeout)))?
    }
}

/// Keeps every message; fails the first `failures` sends.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<RenderedMail>>,
    failures: Mutex<usize>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(failures: usize) -> Self {
        Self {
            sent: Mutex::default(),
            failures: Mutex::new(failures),
        }
    }

    pub fn sent(&self) -> Vec<RenderedMail> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn send(&self, mail: &RenderedMail) -> AlertResult<()> {
        if let Ok(mut failures) = self.failures.lock() {
            if *failures > 0 {
                *failures -= 1;
                return Err(AlertError::Transport("injected failure".into()));
            }
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(mail.clone());
        }
        Ok(())
    }
}

/// Single writer draining the mail queue.
pub struct Mailer {
    transport: Arc<dyn MailTransport>,
    from: String,
    failure_pause: Duration,
}

impl Mailer {
    pub fn new(transport: Arc<dyn MailTransport>, from: impl Into<String>, failure_pause: Duration) -> Self {
        Self {
            transport,
            from: from.into(),
            failure_pause,
        }
    }

    /// Deliver until every sender is dropped. A failed event is logged
    /// and dropped; the next one waits out `failure_pause`.
    pub async fn run(&self, mut events: mpsc::Receiver<AlertEvent>) {
        info!("mailer started");
        while let Some(event) = events.recv().await {
            let mail = render_alert(&self.from, &event);
            match self.transport.send(&mail).await {
                Ok(()) => info!(to = %mail.to, level = %event.level, "alert mail sent"),
                Err(e) => {
                    error!(to = %mail.to, error = %e, "alert mail failed, dropping");
                    tokio::time::sleep(self.failure_pause).await;
                }
            }
        }
        info!("mailer stopped");
    }
}
