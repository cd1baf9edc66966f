//! Turns monitoring results into notification payloads.
//!
//! Every report is first built as a `Document`, which the `html` and `text` renderers then
//! translate. Both bodies of a payload therefore always carry the same content.

use crate::aggregate::ErrorGroup;
use crate::classify::{SiteStatus, State};
use crate::db::model::{Readings, TelemetryRecord};
use crate::error::Error;
use crate::model::SiteDescriptor;
use crate::util;

pub mod html;
pub mod text;

const NULL_MARKER: &str = "N/A";

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
    pub recipients: Vec<String>,
}

/// Result of composing a report.
#[derive(Clone, Debug, PartialEq)]
pub enum Composed {
    Payload(NotificationPayload),
    /// There is nothing actionable to report; nothing must be sent.
    Suppressed,
}

/// Everything about a report that does not come from the monitoring results themselves.
#[derive(Clone, Copy, Debug)]
pub struct Context<'a> {
    pub now: chrono::DateTime<chrono::Utc>,
    pub display_offset: chrono::FixedOffset,
    pub display_zone: &'a str,
    /// Caller-supplied subject, replacing the generated one.
    pub subject: Option<&'a str>,
    pub recipients: &'a [String],
}

/// Telemetry fetched for one site of a data report.
#[derive(Debug)]
pub struct SiteTelemetry {
    pub site: SiteDescriptor,
    pub records: Result<Vec<TelemetryRecord>, Error>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Tone {
    Info,
    Warning,
    Alert,
}

/// Format-independent structure of a report.
#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    pub title: String,
    pub tone: Tone,
    pub summary: Vec<String>,
    pub sections: Vec<Section>,
    pub closing: Vec<String>,
    pub generated_at: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Section {
    pub heading: Option<String>,
    pub table: Option<Table>,
    pub notes: Vec<Note>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Note {
    pub text: String,
    pub alert: bool,
}

impl Note {
    fn plain<S: Into<String>>(text: S) -> Self {
        Note {
            text: text.into(),
            alert: false,
        }
    }

    fn alert<S: Into<String>>(text: S) -> Self {
        Note {
            text: text.into(),
            alert: true,
        }
    }
}

impl<'a> Context<'a> {
    fn timestamp(&self, t: chrono::DateTime<chrono::Utc>) -> String {
        util::format_for_display(t, self.display_offset, self.display_zone)
    }

    fn finish(&self, default_subject: String, document: &Document) -> NotificationPayload {
        NotificationPayload {
            subject: self
                .subject
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .unwrap_or(default_subject),
            html_body: html::render(document),
            text_body: text::render(document),
            recipients: self.recipients.to_vec(),
        }
    }
}

/// Latest telemetry per site. Always produces a payload.
pub fn data_report(sites: &[SiteTelemetry], ctx: &Context) -> Result<Composed, Error> {
    let mut sections = Vec::with_capacity(sites.len());

    for entry in sites {
        let site = &entry.site;
        let heading = Some(format!("Site: {} [{}]", site.label(), site.category));

        let section = match entry.records {
            Err(ref e) => Section {
                heading,
                table: None,
                notes: vec![Note::alert(format!("Data unavailable: {}", e))],
            },
            Ok(ref records) if records.is_empty() => Section {
                heading,
                table: None,
                notes: vec![Note::plain("No records found.")],
            },
            Ok(ref records) => {
                let mut records = records.iter().collect::<Vec<_>>();
                records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

                let mut columns = vec!["Timestamp".to_owned()];
                columns.extend(
                    Readings::labels(site.category)
                        .iter()
                        .map(|l| (*l).to_owned()),
                );

                let mut rows = Vec::with_capacity(records.len());
                for record in records {
                    if record.readings.category() != site.category {
                        return Err(Error::configuration(format!(
                            "site {:?} is configured as {} but reports {} telemetry",
                            site.id,
                            site.category,
                            record.readings.category()
                        )));
                    }

                    let mut row = vec![ctx.timestamp(record.timestamp)];
                    row.extend(record.readings.values().into_iter().map(format_value));
                    rows.push(row);
                }

                Section {
                    heading,
                    table: Some(Table { columns, rows }),
                    notes: Vec::new(),
                }
            }
        };

        sections.push(section);
    }

    let document = Document {
        title: "Site Data Report".to_owned(),
        tone: Tone::Info,
        summary: vec![format!("Latest telemetry for {}.", plural(sites.len(), "site"))],
        sections,
        closing: Vec::new(),
        generated_at: ctx.timestamp(ctx.now),
    };

    Ok(Composed::Payload(
        ctx.finish("Site Data Report".to_owned(), &document),
    ))
}

/// Alert listing the sites that are offline, never reported, or could not be checked.
///
/// Suppressed when every site is online.
pub fn offline_check(statuses: &[SiteStatus], max_hours: f64, ctx: &Context) -> Composed {
    let issues = statuses
        .iter()
        .filter(|s| s.state.needs_attention())
        .collect::<Vec<_>>();
    if issues.is_empty() {
        return Composed::Suppressed;
    }

    let rows = issues
        .iter()
        .map(|status| {
            let (last_report, hours) = match status.state {
                State::Offline | State::Online => (
                    status
                        .last_seen
                        .map(|t| ctx.timestamp(t))
                        .unwrap_or_else(|| NULL_MARKER.to_owned()),
                    status
                        .age_hours
                        .map(|h| format!("{:.1}", h))
                        .unwrap_or_else(|| NULL_MARKER.to_owned()),
                ),
                State::NoData => ("no record ever received".to_owned(), NULL_MARKER.to_owned()),
                State::Unavailable => (
                    format!(
                        "data unavailable: {}",
                        status.failure.as_ref().map(String::as_str).unwrap_or("unknown")
                    ),
                    NULL_MARKER.to_owned(),
                ),
            };

            vec![
                status.site.label(),
                status.site.category.to_string(),
                status.state.to_string(),
                last_report,
                hours,
            ]
        })
        .collect();

    let document = Document {
        title: "Offline Site Alert".to_owned(),
        tone: Tone::Alert,
        summary: vec![format!(
            "The following {} not reported data in the last {} hours:",
            if issues.len() == 1 { "site has" } else { "sites have" },
            max_hours
        )],
        sections: vec![Section {
            heading: None,
            table: Some(Table {
                columns: vec![
                    "Site".to_owned(),
                    "Category".to_owned(),
                    "State".to_owned(),
                    "Last Report".to_owned(),
                    "Hours Offline".to_owned(),
                ],
                rows,
            }),
            notes: Vec::new(),
        }],
        closing: vec![
            "Please check the site status and ensure data collection systems are functioning properly."
                .to_owned(),
        ],
        generated_at: ctx.timestamp(ctx.now),
    };

    Composed::Payload(ctx.finish(
        format!("Offline Site Alert - {}", plural(issues.len(), "site")),
        &document,
    ))
}

/// Summary of recent controller errors per site. Suppressed when there are none.
pub fn error_summary(groups: &[ErrorGroup], hours: f64, ctx: &Context) -> Composed {
    if groups.is_empty() {
        return Composed::Suppressed;
    }

    let total = groups.iter().map(|g| g.total_count).sum::<usize>();

    let sections = groups
        .iter()
        .map(|group| {
            if let Some(ref failure) = group.failure {
                return Section {
                    heading: Some(group.site.label()),
                    table: None,
                    notes: vec![Note::alert(format!("Data unavailable: {}", failure))],
                };
            }

            let rows = group
                .errors
                .iter()
                .enumerate()
                .map(|(i, e)| {
                    vec![
                        (i + 1).to_string(),
                        ctx.timestamp(e.timestamp),
                        e.version
                            .as_ref()
                            .map(|v| format!("v{}", v))
                            .unwrap_or_else(|| "unknown".to_owned()),
                        e.severity
                            .clone()
                            .unwrap_or_else(|| NULL_MARKER.to_owned()),
                        e.message.clone(),
                    ]
                })
                .collect();

            let mut notes = Vec::new();
            if group.omitted() > 0 {
                notes.push(Note::plain(format!("+{} more not shown", group.omitted())));
            }

            Section {
                heading: Some(format!(
                    "{} - {}",
                    group.site.label(),
                    plural(group.total_count, "error")
                )),
                table: Some(Table {
                    columns: vec![
                        "#".to_owned(),
                        "Time".to_owned(),
                        "Version".to_owned(),
                        "Severity".to_owned(),
                        "Error Message".to_owned(),
                    ],
                    rows,
                }),
                notes,
            }
        })
        .collect();

    let document = Document {
        title: format!("Error Summary (last {} hours)", hours),
        tone: Tone::Warning,
        summary: vec![format!("Total errors across all sites: {}", total)],
        sections,
        closing: Vec::new(),
        generated_at: ctx.timestamp(ctx.now),
    };

    Composed::Payload(ctx.finish(
        format!(
            "Error Summary - {} across {}",
            plural(total, "error"),
            plural(groups.len(), "site")
        ),
        &document,
    ))
}

fn format_value(value: Option<f64>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => NULL_MARKER.to_owned(),
    }
}

fn plural(n: usize, noun: &str) -> String {
    if n == 1 {
        format!("{} {}", n, noun)
    } else {
        format!("{} {}s", n, noun)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::db::model::{AirReadings, DripReadings, ErrorRecord};
    use crate::model::Category;

    fn now() -> chrono::DateTime<chrono::Utc> {
        chrono::Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn recipients() -> Vec<String> {
        vec!["ops@example.org".to_owned()]
    }

    fn context<'a>(recipients: &'a [String], subject: Option<&'a str>) -> Context<'a> {
        Context {
            now: now(),
            display_offset: util::parse_utc_offset("+05:30").unwrap(),
            display_zone: "IST",
            subject,
            recipients,
        }
    }

    fn payload(composed: Composed) -> NotificationPayload {
        match composed {
            Composed::Payload(p) => p,
            Composed::Suppressed => panic!("report was suppressed"),
        }
    }

    fn status(id: &str, state: State, age: Option<f64>) -> SiteStatus {
        SiteStatus {
            site: SiteDescriptor::new(id, &format!("{} Village", id), Category::Air, true),
            state,
            last_seen: age.map(|h| now() - util::hours(h)),
            age_hours: age,
            failure: None,
        }
    }

    fn error(hours_ago: i64, message: &str) -> ErrorRecord {
        ErrorRecord {
            site_id: "A".to_owned(),
            timestamp: now() - chrono::Duration::hours(hours_ago),
            message: message.to_owned(),
            severity: Some("high".to_owned()),
            version: Some("2.1".to_owned()),
        }
    }

    #[test]
    fn offline_check_suppressed_when_all_online() {
        let r = recipients();
        let statuses = vec![status("A", State::Online, Some(0.5))];
        assert_eq!(
            offline_check(&statuses, 2.0, &context(&r, None)),
            Composed::Suppressed
        );
        assert_eq!(
            offline_check(&[], 2.0, &context(&r, None)),
            Composed::Suppressed
        );
    }

    #[test]
    fn offline_check_lists_the_same_sites_in_both_bodies() {
        let r = recipients();
        let statuses = vec![
            status("A", State::Offline, Some(3.0)),
            status("B", State::NoData, None),
            status("C", State::Online, Some(0.1)),
        ];

        let payload = payload(offline_check(&statuses, 2.0, &context(&r, None)));
        assert_eq!(payload.subject, "Offline Site Alert - 2 sites");
        assert_eq!(payload.recipients, r);

        for body in &[&payload.html_body, &payload.text_body] {
            assert!(body.contains("A Village (A)"));
            assert!(body.contains("B Village (B)"));
            assert!(!body.contains("C Village (C)"));
            assert!(body.contains("no record ever received"));
            assert!(body.contains("3.0"));
            assert!(body.contains("2024-03-01 14:30 IST"));
        }
    }

    #[test]
    fn offline_check_reports_unavailable_sites() {
        let r = recipients();
        let mut unavailable = status("A", State::Unavailable, None);
        unavailable.failure = Some("throttled".to_owned());

        let payload = payload(offline_check(&[unavailable], 2.0, &context(&r, None)));
        assert_eq!(payload.subject, "Offline Site Alert - 1 site");
        assert!(payload.text_body.contains("data unavailable: throttled"));
    }

    #[test]
    fn subject_override_wins() {
        let r = recipients();
        let statuses = vec![status("A", State::NoData, None)];
        let overridden = payload(offline_check(&statuses, 2.0, &context(&r, Some("Heads up"))));
        assert_eq!(overridden.subject, "Heads up");

        let blank = payload(offline_check(&statuses, 2.0, &context(&r, Some("   "))));
        assert_eq!(blank.subject, "Offline Site Alert - 1 site");
    }

    #[test]
    fn error_summary_shows_limit_and_remainder() {
        let r = recipients();
        let group = ErrorGroup {
            site: SiteDescriptor::new("A", "A", Category::Air, true),
            errors: vec![error(1, "pump stalled"), error(2, "valve <stuck>")],
            total_count: 3,
            failure: None,
        };

        let payload = payload(error_summary(&[group], 24.0, &context(&r, None)));
        assert_eq!(payload.subject, "Error Summary - 3 errors across 1 site");
        assert!(payload.text_body.contains("+1 more not shown"));
        assert!(payload.html_body.contains("+1 more not shown"));
        assert!(payload.text_body.contains("valve <stuck>"));
        assert!(payload.html_body.contains("valve &lt;stuck&gt;"));
        assert!(payload.text_body.contains("v2.1"));
        assert!(payload.text_body.contains("Total errors across all sites: 3"));
    }

    #[test]
    fn error_summary_suppressed_without_groups() {
        let r = recipients();
        assert_eq!(
            error_summary(&[], 24.0, &context(&r, None)),
            Composed::Suppressed
        );
    }

    #[test]
    fn data_report_renders_category_columns_and_null_markers() {
        let r = recipients();
        let sites = vec![
            SiteTelemetry {
                site: SiteDescriptor::new("Sakti", "Sakti", Category::Air, true),
                records: Ok(vec![TelemetryRecord {
                    site_id: "Sakti".to_owned(),
                    timestamp: now(),
                    readings: Readings::Air(AirReadings {
                        temperature: Some(-2.5),
                        ..AirReadings::default()
                    }),
                }]),
            },
            SiteTelemetry {
                site: SiteDescriptor::new("Skuast", "Skuast", Category::Drip, true),
                records: Ok(Vec::new()),
            },
            SiteTelemetry {
                site: SiteDescriptor::new("Stakmo", "Stakmo", Category::Air, true),
                records: Err(Error::store_query("Stakmo", "telemetry", "timed out")),
            },
        ];

        let payload = payload(data_report(&sites, &context(&r, None)).unwrap());
        assert_eq!(payload.subject, "Site Data Report");
        assert!(payload.text_body.contains("TEMPERATURE\tWATER TEMP"));
        assert!(!payload.text_body.contains("SOIL A"));
        assert!(payload.html_body.contains("<th>Water Temp</th>"));
        assert!(!payload.html_body.contains("Soil A"));
        assert!(payload.text_body.contains("-2.5\tN/A"));
        assert!(payload.text_body.contains("No records found."));
        assert!(payload
            .text_body
            .contains("Data unavailable: telemetry query for site \"Stakmo\" failed: timed out"));
        assert!(payload.html_body.contains("<td>N/A</td>"));
    }

    #[test]
    fn data_report_rejects_category_mismatch() {
        let r = recipients();
        let sites = vec![SiteTelemetry {
            site: SiteDescriptor::new("Sakti", "Sakti", Category::Air, true),
            records: Ok(vec![TelemetryRecord {
                site_id: "Sakti".to_owned(),
                timestamp: now(),
                readings: Readings::Drip(DripReadings::default()),
            }]),
        }];

        assert!(data_report(&sites, &context(&r, None)).is_err());
    }
}
