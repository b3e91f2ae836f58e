//! SMTP delivery.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::debug;

use shipyard_core::config::MailConfig;

use crate::error::{AlertError, AlertResult};
use crate::mail::{MailTransport, RenderedMail};

/// Port that speaks TLS from the first byte.
const IMPLICIT_TLS_PORT: u16 = 465;

/// Sends each message through an SMTP relay, one connection per message.
pub struct SmtpTransport {
    relay: AsyncSmtpTransport<Tokio1Executor>,
    endpoint: String,
}

impl SmtpTransport {
    pub fn new(config: &MailConfig, timeout: Duration) -> AlertResult<Self> {
        let host = config
            .smtp_host
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| AlertError::Transport("mail.smtp_host is not set".into()))?;
        let tls = TlsParameters::new(host.to_string())
            .map_err(|e| AlertError::Transport(format!("tls parameters for {host}: {e}")))?;
        let tls = if config.smtp_port == IMPLICIT_TLS_PORT {
            Tls::Wrapper(tls)
        } else {
            Tls::Opportunistic(tls)
        };

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
            .port(config.smtp_port)
            .tls(tls)
            .timeout(Some(timeout));
        if let (Some(user), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
        }

        Ok(Self {
            relay: builder.build(),
            endpoint: format!("{host}:{}", config.smtp_port),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn mailbox(address: &str) -> AlertResult<Mailbox> {
    address
        .parse()
        .map_err(|e| AlertError::Transport(format!("bad address {address}: {e}")))
}

fn message(mail: &RenderedMail) -> AlertResult<Message> {
    Message::builder()
        .from(mailbox(&mail.from)?)
        .to(mailbox(&mail.to)?)
        .subject(mail.subject.clone())
        .header(ContentType::TEXT_HTML)
        .body(mail.html.clone())
        .map_err(|e| AlertError::Transport(e.to_string()))
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn send(&self, mail: &RenderedMail) -> AlertResult<()> {
        let message = message(mail)?;
        self.relay
            .send(message)
            .await
            .map_err(|e| AlertError::Transport(format!("smtp {}: {e}", self.endpoint)))?;
        debug!(to = %mail.to, relay = %self.endpoint, "smtp relay accepted message");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    use crate::classify::AlertLevel;
    use crate::mail::{AlertEvent, render_alert};

    fn config(port: u16) -> MailConfig {
        MailConfig {
            smtp_host: Some("127.0.0.1".into()),
            smtp_port: port,
            ..MailConfig::default()
        }
    }

    fn alert() -> RenderedMail {
        render_alert(
            "alerts@shipyard.local",
            &AlertEvent {
                user_id: 7,
                email: "dev@example.com".into(),
                pod_name: "api-1".into(),
                namespace: "team-x".into(),
                level: AlertLevel::Error,
                log_message: "error: connection refused".into(),
                timestamp: "2024-05-01T12:00:00Z".into(),
            },
        )
    }

    /// Minimal relay without STARTTLS or AUTH. Returns every line the
    /// client sent, message content included.
    async fn relay(listener: TcpListener) -> Vec<String> {
        let (stream, _) = listener.accept().await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();
        write.write_all(b"220 relay.test ESMTP\r\n").await.unwrap();

        let mut transcript = Vec::new();
        let mut in_data = false;
        while let Some(line) = lines.next_line().await.unwrap() {
            transcript.push(line.clone());
            if in_data {
                if line == "." {
                    in_data = false;
                    write.write_all(b"250 queued\r\n").await.unwrap();
                }
                continue;
            }
            let verb = line
                .split([' ', ':'])
                .next()
                .unwrap_or_default()
                .to_ascii_uppercase();
            let reply: &[u8] = match verb.as_str() {
                "EHLO" | "HELO" => b"250 relay.test\r\n",
                "MAIL" | "RCPT" | "RSET" | "NOOP" => b"250 ok\r\n",
                "DATA" => {
                    in_data = true;
                    b"354 end with .\r\n"
                }
                "QUIT" => {
                    write.write_all(b"221 bye\r\n").await.unwrap();
                    break;
                }
                _ => b"502 not implemented\r\n",
            };
            write.write_all(reply).await.unwrap();
        }
        transcript
    }

    #[tokio::test]
    async fn delivers_through_relay() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(relay(listener));

        let transport = SmtpTransport::new(&config(port), Duration::from_secs(5)).unwrap();
        assert_eq!(transport.endpoint(), format!("127.0.0.1:{port}"));
        transport.send(&alert()).await.unwrap();

        let transcript = server.await.unwrap();
        assert!(transcript.iter().any(|l| l.starts_with("MAIL FROM:<alerts@shipyard.local>")));
        assert!(transcript.iter().any(|l| l.starts_with("RCPT TO:<dev@example.com>")));
        assert!(
            transcript
                .iter()
                .any(|l| l == "Subject: Kubernetes Pod alert: team-x/api-1")
        );
        assert!(transcript.iter().any(|l| l.starts_with("Content-Type: text/html")));
    }

    #[tokio::test]
    async fn relay_refusal_is_a_transport_error() {
        // Nothing listens on the port once the listener is dropped.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = SmtpTransport::new(&config(port), Duration::from_secs(2)).unwrap();
        let err = transport.send(&alert()).await.unwrap_err();
        assert!(matches!(err, AlertError::Transport(_)));
    }

    #[test]
    fn missing_host_rejected() {
        let err = SmtpTransport::new(&MailConfig::default(), Duration::from_secs(1)).err();
        assert!(matches!(err, Some(AlertError::Transport(_))));
    }

    #[test]
    fn bad_recipient_rejected_before_connecting() {
        let mut mail = alert();
        mail.to = "not an address".into();
        assert!(message(&mail).is_err());
    }
}
