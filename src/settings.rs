use std::path;

use chrono::Offset;

use crate::error::Error;
use crate::model;
use crate::util;

const ENV_PREFIX: &str = "SITEWATCH";
const IST_OFFSET_SECONDS: i32 = 5 * 3600 + 30 * 60;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Address notifications are sent from.
    pub sender: String,
    pub region: String,
    /// Offset applied to device timestamps that carry no zone of their own.
    #[serde(deserialize_with = "deserialize_utc_offset")]
    pub device_offset: chrono::FixedOffset,
    /// Offset timestamps are shown in inside reports.
    #[serde(deserialize_with = "deserialize_utc_offset")]
    pub display_offset: chrono::FixedOffset,
    pub display_zone: String,
    pub tables: Tables,
    pub error_scan_page_size: i64,
    pub replace_default_sites: bool,
    pub sites: Vec<SiteConfig>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Tables {
    pub air: String,
    pub drip: String,
    pub errors: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SiteConfig {
    pub id: String,
    pub name: Option<String>,
    pub category: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

impl Settings {
    /// Reads the optional settings file and the `SITEWATCH_*` environment on top of the defaults.
    pub fn load(file: Option<&path::Path>) -> Result<Self, Error> {
        let mut raw = ::config::Config::default();

        if let Some(file) = file {
            raw.merge(::config::File::from(file).format(::config::FileFormat::Toml))
                .map_err(|e| {
                    Error::configuration(format!("cannot read {}: {}", file.display(), e))
                })?;
        }

        raw.merge(::config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .map_err(|e| Error::configuration(format!("environment: {}", e)))?;

        let settings: Settings = raw
            .try_into()
            .map_err(|e| Error::configuration(format!("invalid settings: {}", e)))?;
        settings.validate()?;

        Ok(settings)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.sender.trim().is_empty() {
            return Err(Error::configuration("sender address is empty"));
        }
        if self.error_scan_page_size <= 0 {
            return Err(Error::configuration(format!(
                "error_scan_page_size must be positive, got {}",
                self.error_scan_page_size
            )));
        }
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        let ist = ist();

        Settings {
            sender: "aws@acresofice.com".to_owned(),
            region: "ap-south-1".to_owned(),
            device_offset: ist,
            display_offset: ist,
            display_zone: "IST".to_owned(),
            tables: Tables::default(),
            error_scan_page_size: 50,
            replace_default_sites: false,
            sites: Vec::new(),
        }
    }
}

impl Tables {
    pub fn telemetry(&self, category: model::Category) -> &str {
        match category {
            model::Category::Air => &self.air,
            model::Category::Drip => &self.drip,
        }
    }
}

impl Default for Tables {
    fn default() -> Self {
        Tables {
            air: "AIRTable".to_owned(),
            drip: "DripTable".to_owned(),
            errors: "AIRErrors".to_owned(),
        }
    }
}

fn ist() -> chrono::FixedOffset {
    chrono::FixedOffset::east_opt(IST_OFFSET_SECONDS).unwrap_or_else(|| chrono::Utc.fix())
}

fn default_active() -> bool {
    true
}

fn deserialize_utc_offset<'de, D>(deserializer: D) -> Result<chrono::FixedOffset, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = <String as serde::Deserialize>::deserialize(deserializer)?;

    util::parse_utc_offset(&raw).ok_or_else(|| {
        serde::de::Error::invalid_value(
            serde::de::Unexpected::Str(&raw),
            &"a UTC offset like \"+05:30\", \"-0300\" or \"Z\"",
        )
    })
}
