use std::fmt;

use failure;
use itertools::Itertools;

use crate::report;

/// The failure modes of a monitoring run.
///
/// Collaborator failures (store, transport) are wrapped with the site or payload they concern so
/// that a single log line or response is enough to act on.
#[derive(Debug)]
pub enum Error {
    /// The static setup is broken (site table, settings file, store schema).
    Configuration { reason: String },
    /// A request parameter is missing or out of range.
    InvalidParameter { name: String, reason: String },
    /// Recipient list is empty or contains addresses that cannot be delivered to.
    InvalidRecipient { offending: Vec<String> },
    /// The record store could not answer a query for one site.
    StoreQuery {
        site: String,
        query: &'static str,
        reason: String,
    },
    /// The notification transport rejected or failed to deliver a payload.
    Transport {
        reason: String,
        payload: Box<report::NotificationPayload>,
    },
}

impl Error {
    pub fn configuration<S>(reason: S) -> Self
    where
        S: Into<String>,
    {
        Error::Configuration {
            reason: reason.into(),
        }
    }

    pub fn invalid_parameter<N, S>(name: N, reason: S) -> Self
    where
        N: Into<String>,
        S: Into<String>,
    {
        Error::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn store_query<S>(site: &str, query: &'static str, reason: S) -> Self
    where
        S: Into<String>,
    {
        Error::StoreQuery {
            site: site.to_owned(),
            query,
            reason: reason.into(),
        }
    }

    /// Name of the error class, as reported to callers.
    pub fn kind(&self) -> &'static str {
        match *self {
            Error::Configuration { .. } => "ConfigurationError",
            Error::InvalidParameter { .. } => "InvalidParameterError",
            Error::InvalidRecipient { .. } => "InvalidRecipientError",
            Error::StoreQuery { .. } => "StoreQueryError",
            Error::Transport { .. } => "TransportError",
        }
    }

    /// Whether the error was caused by the caller's input rather than by the system.
    pub fn is_client_error(&self) -> bool {
        match *self {
            Error::InvalidParameter { .. } | Error::InvalidRecipient { .. } => true,
            _ => false,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Configuration { ref reason } => write!(f, "configuration error: {}", reason),
            Error::InvalidParameter {
                ref name,
                ref reason,
            } => write!(f, "invalid parameter {:?}: {}", name, reason),
            Error::InvalidRecipient { ref offending } if offending.is_empty() => {
                write!(f, "at least one recipient is required")
            }
            Error::InvalidRecipient { ref offending } => write!(
                f,
                "invalid recipient address(es): {}",
                offending.iter().map(|r| format!("{:?}", r)).join(", ")
            ),
            Error::StoreQuery {
                ref site,
                query,
                ref reason,
            } => write!(f, "{} query for site {:?} failed: {}", query, site, reason),
            Error::Transport {
                ref reason,
                ref payload,
            } => write!(
                f,
                "could not send {:?} to {}: {}",
                payload.subject,
                payload.recipients.iter().join(", "),
                reason
            ),
        }
    }
}

impl failure::Fail for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_input() {
        let err = Error::invalid_parameter("siteName", "unknown site \"Nope\"");
        assert_eq!(
            err.to_string(),
            "invalid parameter \"siteName\": unknown site \"Nope\""
        );
        assert!(err.is_client_error());

        let err = Error::InvalidRecipient {
            offending: vec!["bogus".to_owned(), "a@".to_owned()],
        };
        assert_eq!(
            err.to_string(),
            "invalid recipient address(es): \"bogus\", \"a@\""
        );
        assert_eq!(err.kind(), "InvalidRecipientError");

        let err = Error::store_query("Sakti", "telemetry", "throttled");
        assert_eq!(
            err.to_string(),
            "telemetry query for site \"Sakti\" failed: throttled"
        );
        assert!(!err.is_client_error());
    }

    #[test]
    fn empty_recipient_list_has_its_own_message() {
        let err = Error::InvalidRecipient {
            offending: Vec::new(),
        };
        assert_eq!(err.to_string(), "at least one recipient is required");
    }
}
