use crate::model::Category;

const AIR_LABELS: &'static [&'static str] = &[
    "Temperature",
    "Water Temp",
    "Discharge",
    "Pressure",
    "Counter",
];

const DRIP_LABELS: &'static [&'static str] = &[
    "Soil A",
    "Soil B",
    "Temperature",
    "Discharge",
    "Pressure",
    "Counter",
];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub site_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub readings: Readings,
}

/// Measurements reported by a controller; the set of fields depends on the site category.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "lowercase")]
pub enum Readings {
    Air(AirReadings),
    Drip(DripReadings),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AirReadings {
    pub temperature: Option<f64>,
    pub water_temp: Option<f64>,
    pub discharge: Option<f64>,
    pub pressure: Option<f64>,
    pub counter: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DripReadings {
    pub soil_1: Option<f64>,
    pub soil_2: Option<f64>,
    pub temperature: Option<f64>,
    pub discharge: Option<f64>,
    pub pressure: Option<f64>,
    pub counter: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub site_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub message: String,
    #[serde(default)]
    pub severity: Option<String>,
    /// Firmware version of the controller that raised the error.
    #[serde(default)]
    pub version: Option<String>,
}

impl Readings {
    pub fn category(&self) -> Category {
        match *self {
            Readings::Air(_) => Category::Air,
            Readings::Drip(_) => Category::Drip,
        }
    }

    /// Column labels for a category, in the order `values` returns them.
    pub fn labels(category: Category) -> &'static [&'static str] {
        match category {
            Category::Air => AIR_LABELS,
            Category::Drip => DRIP_LABELS,
        }
    }

    pub fn values(&self) -> Vec<Option<f64>> {
        match *self {
            Readings::Air(ref r) => vec![
                r.temperature,
                r.water_temp,
                r.discharge,
                r.pressure,
                r.counter,
            ],
            Readings::Drip(ref r) => vec![
                r.soil_1,
                r.soil_2,
                r.temperature,
                r.discharge,
                r.pressure,
                r.counter,
            ],
        }
    }
}
