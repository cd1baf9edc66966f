use std::sync;

use rusoto_ses::Ses as _;
use validator::ValidateEmail;

use crate::error::Error;
use crate::report::Composed;
use crate::settings;

const MAX_ADDRESS_LENGTH: usize = 254;
const CHARSET: &str = "UTF-8";

/// Delivers a rendered message; returns the transport's message id.
pub trait Transport {
    fn send(
        &self,
        sender: &str,
        recipients: &[String],
        subject: &str,
        html_body: &str,
        text_body: &str,
    ) -> Result<String, failure::Error>;
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResult {
    pub sent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub recipients: Vec<String>,
}

/// Sends composed reports, unless they were suppressed.
pub struct Dispatcher {
    log: slog::Logger,
    sender: String,
    transport: Box<dyn Transport>,
}

impl Dispatcher {
    pub fn new(log: slog::Logger, sender: &str, transport: Box<dyn Transport>) -> Self {
        Dispatcher {
            log,
            sender: sender.to_owned(),
            transport,
        }
    }

    /// Sends the payload to every recipient at once, or to none of them.
    pub fn dispatch(
        &self,
        composed: Composed,
        recipients: &[String],
    ) -> Result<DispatchResult, Error> {
        let payload = match composed {
            Composed::Suppressed => {
                info!(self.log, "nothing to report, not sending");
                return Ok(DispatchResult {
                    sent: false,
                    reason: Some("no-issues".to_owned()),
                    message_id: None,
                    recipients: Vec::new(),
                });
            }
            Composed::Payload(payload) => payload,
        };

        let recipients = validate_recipients(recipients)?;

        match self.transport.send(
            &self.sender,
            &recipients,
            &payload.subject,
            &payload.html_body,
            &payload.text_body,
        ) {
            Ok(message_id) => {
                info!(self.log, "notification sent";
                      "subject" => &payload.subject,
                      "recipients" => recipients.len(),
                      "message_id" => &message_id);
                Ok(DispatchResult {
                    sent: true,
                    reason: None,
                    message_id: Some(message_id),
                    recipients,
                })
            }
            Err(e) => {
                error!(self.log, "could not send notification";
                       "subject" => &payload.subject,
                       "error" => %e);
                Err(Error::Transport {
                    reason: e.to_string(),
                    payload: Box::new(payload),
                })
            }
        }
    }
}

/// Checks that there is at least one recipient and that every address looks deliverable.
///
/// Returns the addresses trimmed and without duplicates, in their original order.
pub fn validate_recipients(recipients: &[String]) -> Result<Vec<String>, Error> {
    if recipients.is_empty() {
        return Err(Error::InvalidRecipient {
            offending: Vec::new(),
        });
    }

    let offending = recipients
        .iter()
        .filter(|r| !is_plausible_address(r.trim()))
        .cloned()
        .collect::<Vec<_>>();
    if !offending.is_empty() {
        return Err(Error::InvalidRecipient { offending });
    }

    let mut unique: Vec<String> = Vec::with_capacity(recipients.len());
    for r in recipients {
        let r = r.trim();
        if !unique.iter().any(|u| u.eq_ignore_ascii_case(r)) {
            unique.push(r.to_owned());
        }
    }
    Ok(unique)
}

/// An address validator accepts, with a dotted domain so that bare host names are rejected.
fn is_plausible_address(address: &str) -> bool {
    address.len() <= MAX_ADDRESS_LENGTH
        && address.validate_email()
        && address
            .rsplit_once('@')
            .map_or(false, |(_, domain)| domain.contains('.'))
}

/// Amazon SES transport.
pub struct SesTransport {
    log: slog::Logger,
    client: rusoto_ses::SesClient,
    runtime: sync::Arc<tokio::runtime::Runtime>,
}

impl SesTransport {
    pub fn connect(
        log: slog::Logger,
        runtime: sync::Arc<tokio::runtime::Runtime>,
        settings: &settings::Settings,
    ) -> Result<Self, Error> {
        let region = settings
            .region
            .parse::<rusoto_core::Region>()
            .map_err(|e| Error::configuration(format!("region {:?}: {}", settings.region, e)))?;

        Ok(SesTransport {
            log,
            client: rusoto_ses::SesClient::new(region),
            runtime,
        })
    }
}

impl Transport for SesTransport {
    fn send(
        &self,
        sender: &str,
        recipients: &[String],
        subject: &str,
        html_body: &str,
        text_body: &str,
    ) -> Result<String, failure::Error> {
        debug!(self.log, "sending email"; "from" => sender, "recipients" => recipients.len());

        let response = self
            .runtime
            .block_on(self.client.send_email(rusoto_ses::SendEmailRequest {
                source: sender.to_owned(),
                destination: rusoto_ses::Destination {
                    to_addresses: Some(recipients.to_vec()),
                    ..rusoto_ses::Destination::default()
                },
                message: rusoto_ses::Message {
                    subject: content(subject),
                    body: rusoto_ses::Body {
                        html: Some(content(html_body)),
                        text: Some(content(text_body)),
                    },
                },
                ..rusoto_ses::SendEmailRequest::default()
            }))
            .map_err(|e| failure::err_msg(e.to_string()))?;

        Ok(response.message_id)
    }
}

fn content(data: &str) -> rusoto_ses::Content {
    rusoto_ses::Content {
        charset: Some(CHARSET.to_owned()),
        data: data.to_owned(),
    }
}

/// Logs messages instead of sending them; the text body goes to stderr.
pub struct DryRunTransport {
    log: slog::Logger,
}

impl DryRunTransport {
    pub fn new(log: slog::Logger) -> Self {
        DryRunTransport { log }
    }
}

impl Transport for DryRunTransport {
    fn send(
        &self,
        sender: &str,
        recipients: &[String],
        subject: &str,
        _html_body: &str,
        text_body: &str,
    ) -> Result<String, failure::Error> {
        info!(self.log, "dry run, not sending";
              "from" => sender,
              "to" => recipients.join(", "),
              "subject" => subject);
        eprintln!("Subject: {}\n\n{}", subject, text_body);

        Ok("dry-run".to_owned())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingTransport;
    use super::*;
    use crate::report::NotificationPayload;

    fn log() -> slog::Logger {
        slog::Logger::root(slog::Discard, o!())
    }

    fn payload() -> Composed {
        Composed::Payload(NotificationPayload {
            subject: "Offline Site Alert - 1 site".to_owned(),
            html_body: "<p>A</p>".to_owned(),
            text_body: "A".to_owned(),
            recipients: vec!["ops@example.org".to_owned()],
        })
    }

    fn addresses(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|r| (*r).to_owned()).collect()
    }

    #[test]
    fn suppressed_reports_are_not_sent() {
        let transport = RecordingTransport::default();
        let dispatcher = Dispatcher::new(log(), "alerts@example.org", Box::new(transport.clone()));

        let result = dispatcher
            .dispatch(Composed::Suppressed, &addresses(&["ops@example.org"]))
            .unwrap();
        assert!(!result.sent);
        assert_eq!(result.reason.as_ref().map(String::as_str), Some("no-issues"));
        assert_eq!(transport.attempts(), 0);
    }

    #[test]
    fn payload_is_sent_once_to_all_recipients() {
        let transport = RecordingTransport::default();
        let dispatcher = Dispatcher::new(log(), "alerts@example.org", Box::new(transport.clone()));

        let result = dispatcher
            .dispatch(
                payload(),
                &addresses(&["ops@example.org", " field@example.org", "OPS@example.org"]),
            )
            .unwrap();
        assert!(result.sent);
        assert_eq!(result.message_id.as_ref().map(String::as_str), Some("msg-1"));

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].sender, "alerts@example.org");
        assert_eq!(
            sent[0].recipients,
            addresses(&["ops@example.org", "field@example.org"])
        );
    }

    #[test]
    fn one_bad_address_blocks_everyone() {
        let transport = RecordingTransport::default();
        let dispatcher = Dispatcher::new(log(), "alerts@example.org", Box::new(transport.clone()));

        match dispatcher.dispatch(payload(), &addresses(&["ops@example.org", "not-an-address", "x@y"])) {
            Err(Error::InvalidRecipient { offending }) => {
                assert_eq!(offending, addresses(&["not-an-address", "x@y"]))
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(transport.attempts(), 0);

        match dispatcher.dispatch(payload(), &[]) {
            Err(Error::InvalidRecipient { offending }) => assert!(offending.is_empty()),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn transport_failure_keeps_the_payload() {
        let transport = RecordingTransport::failing();
        let dispatcher = Dispatcher::new(log(), "alerts@example.org", Box::new(transport.clone()));

        match dispatcher.dispatch(payload(), &addresses(&["ops@example.org"])) {
            Err(Error::Transport { reason, payload }) => {
                assert!(reason.contains("refused"));
                assert_eq!(payload.subject, "Offline Site Alert - 1 site");
                assert_eq!(payload.text_body, "A");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(transport.attempts(), 1);
    }

    #[test]
    fn plausible_addresses() {
        assert!(is_plausible_address("a@b.co"));
        assert!(is_plausible_address("first.last+tag@sub.example.org"));
        assert!(!is_plausible_address("a@b"));
        assert!(!is_plausible_address("@b.co"));
        assert!(!is_plausible_address("a@@b.co"));
        assert!(!is_plausible_address("a@b..co"));
        assert!(!is_plausible_address("a b@c.co"));
        assert!(!is_plausible_address("a@-b.co"));
        assert!(!is_plausible_address(&format!("{}@example.org", "a".repeat(250))));
    }
}
