use anyhow::{Context, Result};
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};

use super::{NotificationResult, Sink, SinkOptions};
use crate::config::settings::{resolve_secret, EmailSettings};
use crate::error::SinkError;

const DEFAULT_SUBJECT: &str = "Project Digest";

pub struct EmailSink {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    smtp_host: String,
}

impl EmailSink {
    pub fn from_settings(cfg: &EmailSettings) -> Result<Self> {
        let builder = if cfg.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.smtp_host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.smtp_host)
        }
        .with_context(|| format!("invalid smtp_host {}", cfg.smtp_host))?
        .port(cfg.smtp_port);

        let builder = if cfg.username.is_empty() {
            builder
        } else {
            let pass = resolve_secret(&cfg.password, "SMTP_PASSWORD")?;
            builder.credentials(Credentials::new(cfg.username.clone(), pass))
        };

        let from_addr = if cfg.from.is_empty() { &cfg.username } else { &cfg.from };
        let from = from_addr
            .parse()
            .with_context(|| format!("invalid sender address {from_addr:?}"))?;

        Ok(Self {
            mailer: builder.build(),
            from,
            smtp_host: cfg.smtp_host.clone(),
        })
    }
}

fn mailboxes(addrs: &[String]) -> Result<Vec<Mailbox>, SinkError> {
    addrs
        .iter()
        .map(|a| {
            a.parse::<Mailbox>()
                .map_err(|e| SinkError::InvalidOptions(format!("bad address {a}: {e}")))
        })
        .collect()
}

/// Assemble the message. Callers reject an empty `to_recipients` first.
pub fn build_message(
    from: &Mailbox,
    content: &str,
    options: &SinkOptions,
) -> Result<(Message, usize), SinkError> {
    let to = mailboxes(&options.strings("to_recipients")?)?;
    let cc = mailboxes(&options.strings("cc_recipients")?)?;
    let bcc = mailboxes(&options.strings("bcc_recipients")?)?;
    let total = to.len() + cc.len() + bcc.len();

    let mut b = Message::builder()
        .from(from.clone())
        .subject(options.str("subject").unwrap_or(DEFAULT_SUBJECT));
    for m in to {
        b = b.to(m);
    }
    for m in cc {
        b = b.cc(m);
    }
    for m in bcc {
        b = b.bcc(m);
    }

    let content_type = if options.bool("is_html").unwrap_or(false) {
        header::ContentType::TEXT_HTML
    } else {
        header::ContentType::TEXT_PLAIN
    };
    let msg = b
        .header(content_type)
        .body(content.to_string())
        .map_err(|e| SinkError::InvalidOptions(format!("build email: {e}")))?;
    Ok((msg, total))
}

#[async_trait::async_trait]
impl Sink for EmailSink {
    async fn send(&self, content: &str, options: &SinkOptions) -> Result<NotificationResult, SinkError> {
        let to = options.strings("to_recipients")?;
        if to.is_empty() {
            return Ok(NotificationResult::failed("No recipient emails provided")
                .detail("error", "missing_recipients"));
        }

        let (msg, total) = build_message(&self.from, content, options)?;
        self.mailer.send(msg).await.map_err(|e| {
            tracing::error!(smtp_host = %self.smtp_host, error = %e, "smtp send failed");
            SinkError::Smtp(e.to_string())
        })?;

        Ok(NotificationResult::ok(format!("Email sent to {total} recipients"))
            .detail("to", to)
            .detail("subject", options.str("subject").unwrap_or(DEFAULT_SUBJECT)))
    }

    fn name(&self) -> &str {
        "email"
    }
}
