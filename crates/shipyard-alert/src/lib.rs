//! shipyard-alert — turns container log lines into owner alerts.
//!
//! Records arrive as newline-delimited JSON on a TCP listener
//! ([`LogSource`]), pass through a bounded queue to a pool of workers
//! that classify each line and resolve which user deployed the pod, and
//! end up as [`AlertEvent`]s on a second bounded queue drained by a single
//! [`Mailer`].

pub mod classify;
pub mod error;
pub mod mail;
pub mod owner;
pub mod pipeline;
pub mod record;
pub mod smtp;
pub mod source;

pub use classify::{AlertLevel, classify};
pub use error::{AlertError, AlertResult};
pub use mail::{
    AlertEvent, LogTransport, MailTransport, Mailer, RecordingTransport, RenderedMail,
    WebhookTransport, render_alert,
};
pub use owner::{pod_creator, resolve_controller};
pub use pipeline::{AlertPipeline, run};
pub use record::{KubernetesMeta, LogRecord};
pub use smtp::SmtpTransport;
pub use source::LogSource;
