use std::collections;
use std::sync;

use rusoto_dynamodb::DynamoDb;

use crate::error::Error;
use crate::model::Category;
use crate::settings;
use crate::util;

pub mod memory;
pub mod model;

type Item = collections::HashMap<String, rusoto_dynamodb::AttributeValue>;

/// Read access to the telemetry and error records written by the field controllers.
///
/// Every query concerns a single site; failures are reported per site as `Error::StoreQuery`.
pub trait RecordStore {
    /// The `limit` most recent telemetry records of a site, newest first.
    fn latest(
        &self,
        site_id: &str,
        category: Category,
        limit: usize,
    ) -> Result<Vec<model::TelemetryRecord>, Error>;

    /// Error records of a site raised at or after `since`, in retrieval order.
    fn errors_since(
        &self,
        site_id: &str,
        since: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<model::ErrorRecord>, Error>;
}

/// DynamoDB-backed record store.
pub struct Db {
    log: slog::Logger,
    client: rusoto_dynamodb::DynamoDbClient,
    runtime: sync::Arc<tokio::runtime::Runtime>,
    tables: settings::Tables,
    device_offset: chrono::FixedOffset,
    error_page_size: i64,
}

impl Db {
    pub fn connect(
        log: slog::Logger,
        runtime: sync::Arc<tokio::runtime::Runtime>,
        settings: &settings::Settings,
    ) -> Result<Self, Error> {
        let region = settings
            .region
            .parse::<rusoto_core::Region>()
            .map_err(|e| Error::configuration(format!("region {:?}: {}", settings.region, e)))?;
        let client = rusoto_dynamodb::DynamoDbClient::new(region);

        Ok(Db {
            log,
            client,
            runtime,
            tables: settings.tables.clone(),
            device_offset: settings.device_offset,
            error_page_size: settings.error_scan_page_size,
        })
    }
}

impl RecordStore for Db {
    fn latest(
        &self,
        site_id: &str,
        category: Category,
        limit: usize,
    ) -> Result<Vec<model::TelemetryRecord>, Error> {
        let table = self.tables.telemetry(category);
        debug!(self.log, "querying telemetry"; "table" => table, "site" => site_id, "limit" => limit);

        let output = self
            .runtime
            .block_on(self.client.query(rusoto_dynamodb::QueryInput {
                table_name: table.to_owned(),
                key_condition_expression: Some("site_name = :site".to_owned()),
                expression_attribute_values: Some(site_key(site_id)),
                limit: Some(limit as i64),
                scan_index_forward: Some(false),
                ..rusoto_dynamodb::QueryInput::default()
            }))
            .map_err(|e| Error::store_query(site_id, "telemetry", e.to_string()))?;

        let items = output.items.unwrap_or_default();
        debug!(self.log, "telemetry query done"; "site" => site_id, "items" => items.len());

        items
            .iter()
            .map(|item| parse_telemetry(site_id, category, item, self.device_offset))
            .collect()
    }

    fn errors_since(
        &self,
        site_id: &str,
        since: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<model::ErrorRecord>, Error> {
        let table = &self.tables.errors;
        debug!(self.log, "scanning errors"; "table" => table, "site" => site_id, "since" => %since);

        let mut records = Vec::new();
        let mut start_key = None;
        let mut pages = 0usize;

        loop {
            let output = self
                .runtime
                .block_on(self.client.scan(rusoto_dynamodb::ScanInput {
                    table_name: table.clone(),
                    filter_expression: Some("site_name = :site".to_owned()),
                    expression_attribute_values: Some(site_key(site_id)),
                    exclusive_start_key: start_key.take(),
                    limit: Some(self.error_page_size),
                    ..rusoto_dynamodb::ScanInput::default()
                }))
                .map_err(|e| Error::store_query(site_id, "error", e.to_string()))?;
            pages += 1;

            for item in output.items.unwrap_or_default() {
                let record = parse_error(site_id, &item, self.device_offset)?;
                if record.timestamp >= since {
                    records.push(record);
                }
            }

            match output.last_evaluated_key {
                Some(key) if !key.is_empty() => start_key = Some(key),
                _ => break,
            }
        }

        debug!(self.log, "error scan done"; "site" => site_id, "pages" => pages, "matching" => records.len());
        Ok(records)
    }
}

fn site_key(site_id: &str) -> Item {
    let mut values = collections::HashMap::new();
    values.insert(
        ":site".to_owned(),
        rusoto_dynamodb::AttributeValue {
            s: Some(site_id.to_owned()),
            ..rusoto_dynamodb::AttributeValue::default()
        },
    );
    values
}

fn parse_telemetry(
    site_id: &str,
    category: Category,
    item: &Item,
    device_offset: chrono::FixedOffset,
) -> Result<model::TelemetryRecord, Error> {
    let timestamp = parse_timestamp(site_id, "telemetry", item, device_offset)?;

    let readings = match category {
        Category::Air => model::Readings::Air(model::AirReadings {
            temperature: number(item, "temperature"),
            water_temp: number(item, "water_temp"),
            discharge: number(item, "discharge"),
            pressure: number(item, "pressure"),
            counter: number(item, "counter"),
        }),
        Category::Drip => model::Readings::Drip(model::DripReadings {
            soil_1: number(item, "soil_1"),
            soil_2: number(item, "soil_2"),
            temperature: number(item, "temperature"),
            discharge: number(item, "discharge"),
            pressure: number(item, "pressure"),
            counter: number(item, "counter"),
        }),
    };

    Ok(model::TelemetryRecord {
        site_id: site_id.to_owned(),
        timestamp,
        readings,
    })
}

fn parse_error(
    site_id: &str,
    item: &Item,
    device_offset: chrono::FixedOffset,
) -> Result<model::ErrorRecord, Error> {
    let timestamp = parse_timestamp(site_id, "error", item, device_offset)?;

    Ok(model::ErrorRecord {
        site_id: site_id.to_owned(),
        timestamp,
        message: text(item, "message").unwrap_or("No message").to_owned(),
        severity: text(item, "severity").map(str::to_owned),
        version: text(item, "version")
            .map(str::to_owned)
            .or_else(|| item.get("version").and_then(|v| v.n.clone())),
    })
}

fn parse_timestamp(
    site_id: &str,
    query: &'static str,
    item: &Item,
    device_offset: chrono::FixedOffset,
) -> Result<chrono::DateTime<chrono::Utc>, Error> {
    let raw = text(item, "timestamp")
        .ok_or_else(|| Error::store_query(site_id, query, "record without a timestamp"))?;

    util::parse_device_timestamp(raw, device_offset).ok_or_else(|| {
        Error::store_query(site_id, query, format!("unreadable timestamp {:?}", raw))
    })
}

fn text<'a>(item: &'a Item, name: &str) -> Option<&'a str> {
    item.get(name)
        .and_then(|v| v.s.as_ref())
        .map(String::as_str)
        .filter(|s| !s.is_empty())
}

fn number(item: &Item, name: &str) -> Option<f64> {
    let value = item.get(name)?;
    value
        .n
        .as_ref()
        .or_else(|| value.s.as_ref())
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .filter(|n| n.is_finite())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn ist() -> chrono::FixedOffset {
        util::parse_utc_offset("+05:30").unwrap()
    }

    fn item(fields: &[(&str, &str, bool)]) -> Item {
        fields
            .iter()
            .map(|&(name, value, numeric)| {
                let mut attr = rusoto_dynamodb::AttributeValue::default();
                if numeric {
                    attr.n = Some(value.to_owned());
                } else {
                    attr.s = Some(value.to_owned());
                }
                (name.to_owned(), attr)
            })
            .collect()
    }

    #[test]
    fn air_item_keeps_missing_fields_as_none() {
        let item = item(&[
            ("site_name", "Sakti", false),
            ("timestamp", "2024-03-01 12:00", false),
            ("temperature", "-3.5", true),
            ("pressure", "1.25", false),
            ("counter", "oops", false),
        ]);

        let record = parse_telemetry("Sakti", Category::Air, &item, ist()).unwrap();
        assert_eq!(
            record.timestamp,
            chrono::Utc.with_ymd_and_hms(2024, 3, 1, 6, 30, 0).unwrap()
        );
        assert_eq!(
            record.readings,
            model::Readings::Air(model::AirReadings {
                temperature: Some(-3.5),
                water_temp: None,
                discharge: None,
                pressure: Some(1.25),
                counter: None,
            })
        );
    }

    #[test]
    fn drip_item_reads_soil_channels() {
        let item = item(&[
            ("timestamp", "2024-03-01T06:30:00Z", false),
            ("soil_1", "40", true),
            ("soil_2", "38.5", true),
        ]);

        let record = parse_telemetry("Skuast", Category::Drip, &item, ist()).unwrap();
        match record.readings {
            model::Readings::Drip(ref r) => {
                assert_eq!(r.soil_1, Some(40.0));
                assert_eq!(r.soil_2, Some(38.5));
                assert_eq!(r.counter, None);
            }
            ref other => panic!("unexpected readings: {:?}", other),
        }
    }

    #[test]
    fn unreadable_timestamp_names_the_site() {
        let item = item(&[("timestamp", "soon", false)]);

        match parse_telemetry("Stakmo", Category::Air, &item, ist()) {
            Err(Error::StoreQuery { site, query, reason }) => {
                assert_eq!(site, "Stakmo");
                assert_eq!(query, "telemetry");
                assert!(reason.contains("soon"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn error_item_defaults() {
        let item = item(&[
            ("timestamp", "2024-03-01 12:00", false),
            ("version", "3", true),
        ]);

        let record = parse_error("Sakti", &item, ist()).unwrap();
        assert_eq!(record.message, "No message");
        assert_eq!(record.severity, None);
        assert_eq!(record.version.as_ref().map(String::as_str), Some("3"));
    }
}
