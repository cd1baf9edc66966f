//! The three monitoring operations, from request to dispatched notification.

use std::collections;
use std::fmt;
use std::str;

use itertools::Itertools;
use validator::Validate;

use crate::aggregate;
use crate::classify;
use crate::db::RecordStore;
use crate::error::Error;
use crate::model::Registry;
use crate::notify;
use crate::report;
use crate::settings::Settings;
use crate::util;

const DEFAULT_COUNT: usize = 5;
const DEFAULT_MAX_HOURS: f64 = 2.0;
const DEFAULT_HOURS: f64 = 24.0;
const DEFAULT_LIMIT_PER_SITE: usize = 5;

/// An inbound request, as received from the scheduler or an operator.
#[derive(Debug, Default, Deserialize)]
pub struct Request {
    pub operation: Option<String>,
    #[serde(default, alias = "recipients")]
    pub email: Option<OneOrMany>,
    #[serde(default, rename = "queryType", alias = "query_type")]
    pub query_type: Option<String>,
    #[serde(default, rename = "siteName", alias = "site_name")]
    pub site_name: Option<String>,
    #[serde(default)]
    pub count: Option<Numeric>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default, rename = "maxHours", alias = "max_hours")]
    pub max_hours: Option<Numeric>,
    #[serde(default)]
    pub hours: Option<Numeric>,
    #[serde(
        default,
        rename = "limitPerSite",
        alias = "limit_per_site",
        alias = "limit"
    )]
    pub limit_per_site: Option<Numeric>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

/// A number that may have been sent as a string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Numeric {
    Number(f64),
    Text(String),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OperationKind {
    DataReport,
    OfflineCheck,
    ErrorSummary,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Query {
    All,
    Single(String),
}

/// A request whose parameters have all been checked.
#[derive(Clone, Debug, PartialEq)]
pub enum Operation {
    DataReport { query: Query, count: usize },
    OfflineCheck { max_hours: f64 },
    ErrorSummary { hours: f64, limit_per_site: usize },
}

/// Numeric parameters as read from a request, before defaults apply.
#[derive(Debug, Default, Validate)]
struct Parameters {
    #[validate(range(min = 1.0, max = 1000.0))]
    count: Option<f64>,
    #[validate(range(exclusive_min = 0.0, max = 8760.0))]
    max_hours: Option<f64>,
    #[validate(range(exclusive_min = 0.0, max = 8760.0))]
    hours: Option<f64>,
    #[validate(range(min = 1.0, max = 1000.0))]
    limit_per_site: Option<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Validated {
    pub operation: Operation,
    pub recipients: Vec<String>,
    pub subject: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub status_code: u16,
    pub message: String,
    pub sent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::DataReport => "data_report",
            OperationKind::OfflineCheck => "offline_check",
            OperationKind::ErrorSummary => "error_summary",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl str::FromStr for OperationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "data_report" => Ok(OperationKind::DataReport),
            "offline_check" => Ok(OperationKind::OfflineCheck),
            "error_summary" => Ok(OperationKind::ErrorSummary),
            _ => Err(Error::invalid_parameter(
                "operation",
                format!(
                    "unknown operation {:?}, must be one of: data_report, offline_check, error_summary",
                    s
                ),
            )),
        }
    }
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match *self {
            Operation::DataReport { .. } => OperationKind::DataReport,
            Operation::OfflineCheck { .. } => OperationKind::OfflineCheck,
            Operation::ErrorSummary { .. } => OperationKind::ErrorSummary,
        }
    }
}

impl Request {
    /// Checks every parameter before anything is queried.
    pub fn validate(&self, registry: &Registry) -> Result<Validated, Error> {
        let kind = self
            .operation
            .as_ref()
            .map(String::as_str)
            .ok_or_else(|| {
                Error::invalid_parameter(
                    "operation",
                    "is required, must be one of: data_report, offline_check, error_summary",
                )
            })?
            .parse::<OperationKind>()?;

        let recipients = match self.email {
            Some(OneOrMany::One(ref r)) => vec![r.clone()],
            Some(OneOrMany::Many(ref rs)) => rs.clone(),
            None => Vec::new(),
        };
        let recipients = notify::validate_recipients(&recipients)?;

        let mut parameters = Parameters::default();
        match kind {
            OperationKind::DataReport => {
                parameters.count = optional_number(&self.count, "count")?;
            }
            OperationKind::OfflineCheck => {
                parameters.max_hours = optional_number(&self.max_hours, "maxHours")?;
            }
            OperationKind::ErrorSummary => {
                parameters.hours = optional_number(&self.hours, "hours")?;
                parameters.limit_per_site =
                    optional_number(&self.limit_per_site, "limitPerSite")?;
            }
        }
        parameters.validate().map_err(out_of_range)?;

        let operation = match kind {
            OperationKind::DataReport => {
                let query = match self.query_type.as_ref().map(String::as_str) {
                    Some("all") => Query::All,
                    None | Some("single") => {
                        let name = self
                            .site_name
                            .as_ref()
                            .map(|s| s.trim())
                            .filter(|s| !s.is_empty())
                            .ok_or_else(|| {
                                Error::invalid_parameter(
                                    "siteName",
                                    "is required for a single site query",
                                )
                            })?;
                        if registry.get(name).is_none() {
                            return Err(Error::invalid_parameter(
                                "siteName",
                                format!(
                                    "unknown site {:?}, must be one of: {}",
                                    name,
                                    registry.active_ids().join(", ")
                                ),
                            ));
                        }
                        Query::Single(name.to_owned())
                    }
                    Some(other) => {
                        return Err(Error::invalid_parameter(
                            "queryType",
                            format!("unknown query type {:?}, must be \"all\" or \"single\"", other),
                        ))
                    }
                };

                Operation::DataReport {
                    query,
                    count: whole_number(parameters.count, "count", DEFAULT_COUNT)?,
                }
            }
            OperationKind::OfflineCheck => Operation::OfflineCheck {
                max_hours: parameters.max_hours.unwrap_or(DEFAULT_MAX_HOURS),
            },
            OperationKind::ErrorSummary => Operation::ErrorSummary {
                hours: parameters.hours.unwrap_or(DEFAULT_HOURS),
                limit_per_site: whole_number(
                    parameters.limit_per_site,
                    "limitPerSite",
                    DEFAULT_LIMIT_PER_SITE,
                )?,
            },
        };

        Ok(Validated {
            operation,
            recipients,
            subject: self.subject.clone(),
        })
    }
}

fn number(value: &Numeric, name: &str) -> Result<f64, Error> {
    let n = match *value {
        Numeric::Number(n) => n,
        Numeric::Text(ref raw) => raw
            .trim()
            .parse::<f64>()
            .map_err(|_| Error::invalid_parameter(name, format!("{:?} is not a number", raw)))?,
    };

    if n.is_finite() {
        Ok(n)
    } else {
        Err(Error::invalid_parameter(name, "must be a finite number"))
    }
}

fn optional_number(value: &Option<Numeric>, name: &str) -> Result<Option<f64>, Error> {
    value.as_ref().map(|v| number(v, name)).transpose()
}

fn out_of_range(errors: validator::ValidationErrors) -> Error {
    let field = errors
        .field_errors()
        .keys()
        .map(|k| k.to_string())
        .min()
        .unwrap_or_default();

    match field.as_str() {
        "count" => Error::invalid_parameter("count", "must be between 1 and 1000"),
        "limit_per_site" => Error::invalid_parameter("limitPerSite", "must be between 1 and 1000"),
        "max_hours" => Error::invalid_parameter(
            "maxHours",
            "must be more than 0 and at most 8760 hours",
        ),
        "hours" => Error::invalid_parameter("hours", "must be more than 0 and at most 8760 hours"),
        _ => Error::invalid_parameter(field.clone(), errors.to_string()),
    }
}

fn whole_number(value: Option<f64>, name: &str, default: usize) -> Result<usize, Error> {
    match value {
        None => Ok(default),
        Some(n) if n.fract() == 0.0 => Ok(n as usize),
        Some(n) => Err(Error::invalid_parameter(
            name,
            format!("must be a whole number, got {}", n),
        )),
    }
}

/// Runs operations against a store and sends their reports.
pub struct Monitor<'a> {
    log: slog::Logger,
    registry: &'a Registry,
    settings: &'a Settings,
    store: &'a dyn RecordStore,
    dispatcher: &'a notify::Dispatcher,
}

struct Outcome {
    dispatch: notify::DispatchResult,
    message: String,
    details: serde_json::Value,
}

impl<'a> Monitor<'a> {
    pub fn new(
        log: slog::Logger,
        registry: &'a Registry,
        settings: &'a Settings,
        store: &'a dyn RecordStore,
        dispatcher: &'a notify::Dispatcher,
    ) -> Self {
        Monitor {
            log,
            registry,
            settings,
            store,
            dispatcher,
        }
    }

    /// Handles a raw JSON request. Never fails: every problem becomes an error response.
    pub fn handle(&self, raw: &str, now: chrono::DateTime<chrono::Utc>) -> Response {
        let request = match serde_json::from_str::<Request>(raw) {
            Ok(request) => request,
            Err(e) => {
                warn!(self.log, "malformed request"; "error" => %e);
                return Response {
                    status_code: 400,
                    message: format!("malformed request: {}", e),
                    sent: false,
                    operation: None,
                    error: Some("InvalidParameterError"),
                    details: None,
                };
            }
        };

        self.respond(&request, now)
    }

    pub fn respond(&self, request: &Request, now: chrono::DateTime<chrono::Utc>) -> Response {
        let validated = match request.validate(self.registry) {
            Ok(validated) => validated,
            Err(e) => {
                warn!(self.log, "rejected request"; "error" => %e);
                return error_response(None, &e);
            }
        };

        let kind = validated.operation.kind();
        let log = self.log.new(o!("operation" => kind.as_str()));
        info!(log, "running"; "now" => %now, "recipients" => validated.recipients.len());

        match self.run(&log, &validated, now) {
            Ok(outcome) => {
                info!(log, "done"; "sent" => outcome.dispatch.sent, "message" => &outcome.message);
                Response {
                    status_code: 200,
                    message: outcome.message,
                    sent: outcome.dispatch.sent,
                    operation: Some(kind.as_str()),
                    error: None,
                    details: Some(outcome.details),
                }
            }
            Err(e) => {
                error!(log, "operation failed"; "error" => %e, "kind" => e.kind());
                error_response(Some(kind), &e)
            }
        }
    }

    fn run(
        &self,
        log: &slog::Logger,
        validated: &Validated,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Outcome, Error> {
        let ctx = report::Context {
            now,
            display_offset: self.settings.display_offset,
            display_zone: &self.settings.display_zone,
            subject: validated.subject.as_ref().map(String::as_str),
            recipients: &validated.recipients,
        };

        match validated.operation {
            Operation::DataReport { ref query, count } => {
                self.data_report(log, query, count, &ctx, &validated.recipients)
            }
            Operation::OfflineCheck { max_hours } => {
                self.offline_check(log, max_hours, &ctx, &validated.recipients)
            }
            Operation::ErrorSummary {
                hours,
                limit_per_site,
            } => self.error_summary(log, hours, limit_per_site, &ctx, &validated.recipients),
        }
    }

    fn data_report(
        &self,
        log: &slog::Logger,
        query: &Query,
        count: usize,
        ctx: &report::Context,
        recipients: &[String],
    ) -> Result<Outcome, Error> {
        let sites = match *query {
            Query::All => self.registry.active().collect::<Vec<_>>(),
            Query::Single(ref id) => self
                .registry
                .get(id)
                .into_iter()
                .collect::<Vec<_>>(),
        };

        let telemetry = sites
            .into_iter()
            .map(|site| {
                let records = self.store.latest(&site.id, site.category, count);
                if let Err(ref e) = records {
                    warn!(log, "telemetry unavailable"; "site" => &site.id, "error" => %e);
                }
                report::SiteTelemetry {
                    site: site.clone(),
                    records,
                }
            })
            .collect::<Vec<_>>();

        let details = serde_json::Value::Object(
            telemetry
                .iter()
                .map(|t| {
                    let value = match t.records {
                        Ok(ref records) => json!({ "records": records.len() }),
                        Err(ref e) => json!({ "unavailable": e.to_string() }),
                    };
                    (t.site.id.clone(), value)
                })
                .collect(),
        );

        let composed = report::data_report(&telemetry, ctx)?;
        let dispatch = self.dispatcher.dispatch(composed, recipients)?;

        Ok(Outcome {
            message: format!(
                "Data report sent for {}",
                telemetry.iter().map(|t| &t.site.id).join(", ")
            ),
            dispatch,
            details: json!({ "sites": details }),
        })
    }

    fn offline_check(
        &self,
        log: &slog::Logger,
        max_hours: f64,
        ctx: &report::Context,
        recipients: &[String],
    ) -> Result<Outcome, Error> {
        let mut latest = collections::HashMap::new();
        for site in self.registry.active() {
            let record = self
                .store
                .latest(&site.id, site.category, 1)
                .map(|records| records.into_iter().next());
            match record {
                Ok(Some(ref r)) => debug!(log, "latest record"; "site" => &site.id, "timestamp" => %r.timestamp),
                Ok(None) => warn!(log, "no records"; "site" => &site.id),
                Err(ref e) => warn!(log, "telemetry unavailable"; "site" => &site.id, "error" => %e),
            }
            latest.insert(site.id.clone(), record);
        }

        let statuses = classify::classify(self.registry.sites(), &latest, max_hours, ctx.now)?;
        let issues = statuses
            .iter()
            .filter(|s| s.state.needs_attention())
            .collect::<Vec<_>>();
        for status in &issues {
            info!(log, "site needs attention";
                  "site" => &status.site.id,
                  "state" => %status.state,
                  "age_hours" => status.age_hours.map(|h| format!("{:.2}", h)));
        }

        let offline_sites = issues
            .iter()
            .map(|s| {
                let last_seen = s.last_seen.map(|t| {
                    util::format_for_display(
                        t,
                        self.settings.display_offset,
                        &self.settings.display_zone,
                    )
                });
                (
                    s.site.id.clone(),
                    json!({
                        "state": s.state,
                        "lastSeen": last_seen,
                        "hoursOffline": s.age_hours,
                    }),
                )
            })
            .collect::<serde_json::Map<String, serde_json::Value>>();
        let details = json!({ "offlineSites": offline_sites });
        let message = if issues.is_empty() {
            format!("All sites active within {} hours", max_hours)
        } else {
            format!(
                "Offline alert sent - {} site(s) need attention",
                issues.len()
            )
        };

        let composed = report::offline_check(&statuses, max_hours, ctx);
        let dispatch = self.dispatcher.dispatch(composed, recipients)?;

        Ok(Outcome {
            dispatch,
            message,
            details,
        })
    }

    fn error_summary(
        &self,
        log: &slog::Logger,
        hours: f64,
        limit_per_site: usize,
        ctx: &report::Context,
        recipients: &[String],
    ) -> Result<Outcome, Error> {
        let since = ctx
            .now
            .checked_sub_signed(util::hours(hours))
            .ok_or_else(|| Error::invalid_parameter("hours", "reaches too far into the past"))?;

        let mut errors = collections::HashMap::new();
        for site in self.registry.active() {
            let records = self.store.errors_since(&site.id, since);
            match records {
                Ok(ref records) => debug!(log, "errors found"; "site" => &site.id, "count" => records.len()),
                Err(ref e) => warn!(log, "errors unavailable"; "site" => &site.id, "error" => %e),
            }
            errors.insert(site.id.clone(), records);
        }

        let groups = aggregate::aggregate(
            self.registry.sites(),
            &errors,
            hours,
            limit_per_site,
            ctx.now,
        )?;
        let total = groups.iter().map(|g| g.total_count).sum::<usize>();

        let counts = groups
            .iter()
            .filter(|g| g.failure.is_none())
            .map(|g| (g.site.id.clone(), json!(g.total_count)))
            .collect::<serde_json::Map<String, serde_json::Value>>();
        let unavailable = groups
            .iter()
            .filter(|g| g.failure.is_some())
            .map(|g| g.site.id.clone())
            .collect::<Vec<_>>();
        let details = json!({
            "totalErrors": total,
            "siteErrorCounts": counts,
            "unavailableSites": unavailable,
        });
        let message = if groups.is_empty() {
            format!("No errors found in last {} hours", hours)
        } else {
            format!("Error summary sent - {} total errors", total)
        };

        let composed = report::error_summary(&groups, hours, ctx);
        let dispatch = self.dispatcher.dispatch(composed, recipients)?;

        Ok(Outcome {
            dispatch,
            message,
            details,
        })
    }
}

fn error_response(kind: Option<OperationKind>, error: &Error) -> Response {
    let status_code = match *error {
        _ if error.is_client_error() => 400,
        Error::Configuration { .. } => 500,
        _ => 502,
    };

    Response {
        status_code,
        message: error.to_string(),
        sent: false,
        operation: kind.map(OperationKind::as_str),
        error: Some(error.kind()),
        details: None,
    }
}
