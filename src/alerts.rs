use std::collections::BTreeMap;

use lettre::{
    Message, SmtpTransport, Transport,
    message::{Mailbox, MultiPart},
    transport::smtp::authentication::Credentials,
};
use log::{debug, info, warn};
use serde_json::Value;

use crate::error::NotificationError;
use crate::settings::{Settings, Webhook, WebhookMethod, WebhookPayload};

/// Outcome of one round of runout notifications.
#[derive(Debug, Default)]
pub struct NotificationReport {
    pub mails_sent: usize,
    pub webhooks_called: usize,
    pub failures: Vec<NotificationError>,
}

/// Notification service for runout mail and webhooks.
///
/// Settings are passed per call so changes saved while the daemon runs are
/// picked up by the next notification.
pub struct AlertService {
    client: reqwest::blocking::Client,
}

impl Default for AlertService {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertService {
    pub fn new() -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
        }
    }

    /// Send every notification the settings enable.
    ///
    /// Failures are collected rather than returned early: a dead mail server
    /// must not keep the webhooks from firing.
    pub fn notify_runout(&self, settings: &Settings) -> NotificationReport {
        let mut report = NotificationReport::default();

        if settings.send_mail {
            let (sent, failures) = self.send_mail(settings);
            report.mails_sent = sent;
            report.failures.extend(failures);
        }

        let (called, failures) = self.call_webhooks(&settings.webhooks);
        report.webhooks_called = called;
        report.failures.extend(failures);
        report
    }

    /// Send the runout mail to every configured receiver.
    ///
    /// The message carries the plain and HTML templates as
    /// multipart/alternative parts and is delivered over SMTP with implicit
    /// TLS, logging in with the configured user. Each receiver is attempted
    /// independently.
    ///
    /// # Returns
    ///
    /// The number of receivers the mail was delivered to and the failures:
    /// - The mail server or user is empty, or the sender cannot be parsed
    ///   (nothing is sent)
    /// - A receiver address cannot be parsed
    /// - The SMTP connection or delivery fails for a receiver
    pub fn send_mail(&self, settings: &Settings) -> (usize, Vec<NotificationError>) {
        let mailer = match Self::mailer(settings) {
            Ok(mailer) => mailer,
            Err(e) => return (0, vec![e]),
        };
        let sender = match parse_mailbox(&settings.mail_user) {
            Ok(sender) => sender,
            Err(e) => return (0, vec![e]),
        };
        if settings.mail_receiver.is_empty() {
            warn!("Mail is enabled but no receivers are configured");
        }

        let mut sent = 0;
        let mut failures = Vec::new();
        for receiver in &settings.mail_receiver {
            let delivered = parse_mailbox(receiver).and_then(|to| {
                let message = Message::builder()
                    .from(sender.clone())
                    .to(to)
                    .subject(settings.mail_subject.clone())
                    .multipart(MultiPart::alternative_plain_html(
                        settings.mail_text_part.clone(),
                        settings.mail_html_part.clone(),
                    ))
                    .map_err(|e| NotificationError::MailFailed {
                        receiver: receiver.clone(),
                        reason: e.to_string(),
                    })?;

                mailer
                    .send(&message)
                    .map(|_| ())
                    .map_err(|e| NotificationError::MailFailed {
                        receiver: receiver.clone(),
                        reason: e.to_string(),
                    })
            });

            match delivered {
                Ok(()) => {
                    info!("Runout mail sent to {}", receiver);
                    sent += 1;
                }
                Err(e) => failures.push(e),
            }
        }

        (sent, failures)
    }

    fn mailer(settings: &Settings) -> Result<SmtpTransport, NotificationError> {
        if settings.mail_server.trim().is_empty() {
            return Err(NotificationError::MailNotConfigured {
                field: "mail_server".to_string(),
            });
        }
        if settings.mail_user.trim().is_empty() {
            return Err(NotificationError::MailNotConfigured {
                field: "mail_user".to_string(),
            });
        }

        let mailer = SmtpTransport::relay(settings.mail_server.trim())
            .map_err(|e| NotificationError::MailFailed {
                receiver: settings.mail_server.clone(),
                reason: e.to_string(),
            })?
            .port(settings.smtp_port())
            .credentials(Credentials::new(
                settings.mail_user.clone(),
                settings.mail_password.clone(),
            ))
            .build();
        Ok(mailer)
    }

    /// Call every enabled webhook.
    ///
    /// Each webhook is attempted independently.
    ///
    /// # Returns
    ///
    /// The number of successful calls and the failures.
    pub fn call_webhooks(&self, webhooks: &[Webhook]) -> (usize, Vec<NotificationError>) {
        let mut called = 0;
        let mut failures = Vec::new();

        for webhook in webhooks {
            if !webhook.enabled {
                debug!("Skipping disabled webhook {}", webhook.url);
                continue;
            }
            match self.call_webhook(webhook) {
                Ok(()) => {
                    info!("Webhook {} called", webhook.url);
                    called += 1;
                }
                Err(e) => failures.push(e),
            }
        }

        (called, failures)
    }

    fn call_webhook(&self, webhook: &Webhook) -> Result<(), NotificationError> {
        let request = match (webhook.method, &webhook.data) {
            (WebhookMethod::Post, WebhookPayload::Fields(fields)) => {
                self.client.post(&webhook.url).form(&stringify_fields(fields))
            }
            (WebhookMethod::Post, WebhookPayload::Raw(body)) => {
                self.client.post(&webhook.url).body(body.clone())
            }
            (WebhookMethod::Get, WebhookPayload::Fields(fields)) => {
                self.client.get(&webhook.url).query(&stringify_fields(fields))
            }
            (WebhookMethod::Get, WebhookPayload::Raw(query)) => {
                self.client.get(with_raw_query(&webhook.url, query))
            }
        };

        let response = request
            .send()
            .map_err(|e| NotificationError::WebhookFailed {
                url: webhook.url.clone(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(NotificationError::WebhookFailed {
                url: webhook.url.clone(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        Ok(())
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, NotificationError> {
    address
        .trim()
        .parse::<Mailbox>()
        .map_err(|e| NotificationError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })
}

/// Form/query values: strings as-is, other scalars in their JSON spelling,
/// null as empty.
fn stringify_fields(fields: &BTreeMap<String, Value>) -> BTreeMap<&str, String> {
    fields
        .iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(text) => text.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            (key.as_str(), value)
        })
        .collect()
}

/// Append a raw query string to `url`, respecting an existing query.
fn with_raw_query(url: &str, query: &str) -> String {
    let query = query.trim_start_matches('?');
    if query.is_empty() {
        url.to_string()
    } else if url.contains('?') {
        format!("{}&{}", url, query)
    } else {
        format!("{}?{}", url, query)
    }
}
