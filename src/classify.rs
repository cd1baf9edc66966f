//! Decides which sites have stopped reporting.

use std::collections;
use std::fmt;

use crate::db::model::TelemetryRecord;
use crate::error::Error;
use crate::model::SiteDescriptor;
use crate::util;

/// The newest telemetry record of a site, as far as the store could tell.
pub type Latest = Result<Option<TelemetryRecord>, Error>;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    Online,
    Offline,
    /// No record was ever received from the site.
    NoData,
    /// The store could not be asked about the site.
    Unavailable,
}

impl State {
    /// Whether a site in this state is worth telling somebody about.
    pub fn needs_attention(self) -> bool {
        self != State::Online
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match *self {
            State::Online => "ONLINE",
            State::Offline => "OFFLINE",
            State::NoData => "NO_DATA",
            State::Unavailable => "UNAVAILABLE",
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SiteStatus {
    pub site: SiteDescriptor,
    pub state: State,
    pub last_seen: Option<chrono::DateTime<chrono::Utc>>,
    pub age_hours: Option<f64>,
    /// Why the store could not answer, for `State::Unavailable`.
    pub failure: Option<String>,
}

/// Classifies every active site exactly once, in the order given.
///
/// A site is offline when its newest record is strictly older than `max_hours`; a record exactly
/// `max_hours` old still counts as online. Records from the future (clock skew between the
/// controller and us) have age zero.
pub fn classify(
    sites: &[SiteDescriptor],
    latest: &collections::HashMap<String, Latest>,
    max_hours: f64,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<Vec<SiteStatus>, Error> {
    if !max_hours.is_finite() || max_hours < 0.0 {
        return Err(Error::invalid_parameter(
            "maxHours",
            format!("must be a non-negative number of hours, got {}", max_hours),
        ));
    }
    let threshold = util::hours(max_hours);

    let mut seen = collections::HashSet::new();
    let mut statuses = Vec::new();

    for site in sites.iter().filter(|s| s.active) {
        if !seen.insert(site.id.as_str()) {
            continue;
        }

        let status = match latest.get(&site.id) {
            None | Some(Ok(None)) => SiteStatus {
                site: site.clone(),
                state: State::NoData,
                last_seen: None,
                age_hours: None,
                failure: None,
            },
            Some(Err(e)) => SiteStatus {
                site: site.clone(),
                state: State::Unavailable,
                last_seen: None,
                age_hours: None,
                failure: Some(e.to_string()),
            },
            Some(Ok(Some(record))) => {
                let reported = record.readings.category();
                if reported != site.category {
                    return Err(Error::configuration(format!(
                        "site {:?} is configured as {} but reports {} telemetry",
                        site.id, site.category, reported
                    )));
                }

                let age = std::cmp::max(now - record.timestamp, chrono::Duration::zero());
                let state = if age > threshold {
                    State::Offline
                } else {
                    State::Online
                };

                SiteStatus {
                    site: site.clone(),
                    state,
                    last_seen: Some(record.timestamp),
                    age_hours: Some(util::as_hours(age)),
                    failure: None,
                }
            }
        };

        statuses.push(status);
    }

    Ok(statuses)
}
