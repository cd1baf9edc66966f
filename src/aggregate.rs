//! Groups recent controller errors per site.

use std::collections;

use crate::db::model::ErrorRecord;
use crate::error::Error;
use crate::model::SiteDescriptor;
use crate::util;

/// The error records of a site, as far as the store could tell.
pub type Errors = Result<Vec<ErrorRecord>, Error>;

#[derive(Clone, Debug, PartialEq)]
pub struct ErrorGroup {
    pub site: SiteDescriptor,
    /// Newest first, at most `limit_per_site` entries.
    pub errors: Vec<ErrorRecord>,
    /// Number of errors inside the window before truncation.
    pub total_count: usize,
    /// Set when the store could not be asked about the site.
    pub failure: Option<String>,
}

impl ErrorGroup {
    pub fn omitted(&self) -> usize {
        self.total_count - self.errors.len()
    }
}

/// Keeps the errors of the last `hours` for each active site, newest first and cut to
/// `limit_per_site`.
///
/// Sites without errors in the window are left out. Sites whose query failed are kept, with
/// `failure` set, so that they are not mistaken for quiet ones.
pub fn aggregate(
    sites: &[SiteDescriptor],
    errors_by_site: &collections::HashMap<String, Errors>,
    hours: f64,
    limit_per_site: usize,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<Vec<ErrorGroup>, Error> {
    if !hours.is_finite() || hours <= 0.0 {
        return Err(Error::invalid_parameter(
            "hours",
            format!("must be a positive number of hours, got {}", hours),
        ));
    }
    if limit_per_site == 0 {
        return Err(Error::invalid_parameter(
            "limitPerSite",
            "must be at least 1",
        ));
    }
    let since = now
        .checked_sub_signed(util::hours(hours))
        .ok_or_else(|| {
            Error::invalid_parameter("hours", format!("{} hours reaches too far into the past", hours))
        })?;

    let mut seen = collections::HashSet::new();
    let mut groups = Vec::new();

    for site in sites.iter().filter(|s| s.active) {
        if !seen.insert(site.id.as_str()) {
            continue;
        }

        match errors_by_site.get(&site.id) {
            None => {}
            Some(Err(e)) => groups.push(ErrorGroup {
                site: site.clone(),
                errors: Vec::new(),
                total_count: 0,
                failure: Some(e.to_string()),
            }),
            Some(Ok(records)) => {
                let mut recent = records
                    .iter()
                    .filter(|r| r.timestamp >= since)
                    .cloned()
                    .collect::<Vec<_>>();
                if recent.is_empty() {
                    continue;
                }

                // Stable, so errors with the same timestamp keep their retrieval order.
                recent.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
                let total_count = recent.len();
                recent.truncate(limit_per_site);

                groups.push(ErrorGroup {
                    site: site.clone(),
                    errors: recent,
                    total_count,
                    failure: None,
                });
            }
        }
    }

    Ok(groups)
}
