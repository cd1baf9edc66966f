use std::collections;
use std::fmt;
use std::str;

use crate::error::Error;
use crate::settings;

const DEFAULT_SITES: &'static [DefaultSite] = &[
    DefaultSite {
        id: "Sakti",
        name: "Sakti",
        category: Category::Air,
        active: true,
    },
    DefaultSite {
        id: "Stakmo",
        name: "Stakmo",
        category: Category::Air,
        active: true,
    },
    DefaultSite {
        id: "Skuast",
        name: "Skuast",
        category: Category::Drip,
        active: true,
    },
];

struct DefaultSite {
    id: &'static str,
    name: &'static str,
    category: Category,
    active: bool,
}

/// The kind of installation at a site; decides which telemetry schema (and table) applies.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Air,
    Drip,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Air => "air",
            Category::Drip => "drip",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl str::FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "air" => Ok(Category::Air),
            "drip" => Ok(Category::Drip),
            _ => Err(Error::configuration(format!(
                "unknown site category {:?}, expected \"air\" or \"drip\"",
                s
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteDescriptor {
    pub id: String,
    pub display_name: String,
    pub category: Category,
    pub active: bool,
}

impl SiteDescriptor {
    pub fn new(id: &str, display_name: &str, category: Category, active: bool) -> Self {
        SiteDescriptor {
            id: id.to_owned(),
            display_name: display_name.to_owned(),
            category,
            active,
        }
    }

    /// "Name (id)", the way sites are referred to in reports.
    pub fn label(&self) -> String {
        if self.display_name == self.id {
            self.id.clone()
        } else {
            format!("{} ({})", self.display_name, self.id)
        }
    }
}

/// The immutable table of known sites, loaded once per process.
#[derive(Clone, Debug)]
pub struct Registry {
    sites: Vec<SiteDescriptor>,
}

impl Registry {
    pub fn new(sites: Vec<SiteDescriptor>) -> Result<Self, Error> {
        let mut seen = collections::HashSet::new();
        for site in &sites {
            if site.id.trim().is_empty() {
                return Err(Error::configuration("site with an empty id"));
            }
            if !seen.insert(site.id.as_str()) {
                return Err(Error::configuration(format!(
                    "site {:?} is defined more than once",
                    site.id
                )));
            }
        }

        Ok(Registry { sites })
    }

    pub fn builtin() -> Self {
        Registry {
            sites: DEFAULT_SITES
                .iter()
                .map(|d| SiteDescriptor::new(d.id, d.name, d.category, d.active))
                .collect(),
        }
    }

    /// Builds the registry from the built-in table and the operator's overrides.
    ///
    /// An override replaces the built-in entry with the same id wholesale, category included.
    /// Overrides for unknown ids are appended in the order they are listed.
    pub fn load(settings: &settings::Settings) -> Result<Self, Error> {
        let mut sites = if settings.replace_default_sites {
            Vec::new()
        } else {
            Registry::builtin().sites
        };

        let mut overridden = collections::HashSet::new();
        for entry in &settings.sites {
            let category = entry.category.parse::<Category>().map_err(|e| {
                Error::configuration(format!("site {:?}: {}", entry.id, e))
            })?;
            if !overridden.insert(entry.id.as_str()) {
                return Err(Error::configuration(format!(
                    "site {:?} is overridden more than once",
                    entry.id
                )));
            }

            let site = SiteDescriptor::new(
                &entry.id,
                entry.name.as_ref().unwrap_or(&entry.id),
                category,
                entry.active,
            );

            match sites.iter_mut().find(|s| s.id == entry.id) {
                Some(existing) => *existing = site,
                None => sites.push(site),
            }
        }

        Registry::new(sites)
    }

    pub fn get(&self, id: &str) -> Option<&SiteDescriptor> {
        self.sites.iter().find(|s| s.id == id)
    }

    pub fn sites(&self) -> &[SiteDescriptor] {
        &self.sites
    }

    pub fn active(&self) -> impl Iterator<Item = &SiteDescriptor> {
        self.sites.iter().filter(|s| s.active)
    }

    pub fn active_ids(&self) -> Vec<&str> {
        self.active().map(|s| s.id.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn override_entry(id: &str, category: &str, active: bool) -> settings::SiteConfig {
        settings::SiteConfig {
            id: id.to_owned(),
            name: None,
            category: category.to_owned(),
            active,
        }
    }

    #[test]
    fn builtin_table_is_active() {
        let registry = Registry::builtin();
        assert_eq!(registry.active_ids(), vec!["Sakti", "Stakmo", "Skuast"]);
        assert_eq!(registry.get("Skuast").unwrap().category, Category::Drip);
    }

    #[test]
    fn override_replaces_category_and_appends_new_sites() {
        let mut settings = settings::Settings::default();
        settings.sites = vec![
            override_entry("Sakti", "drip", true),
            override_entry("Stakmo", "air", false),
            override_entry("Igoo", "AIR", true),
        ];

        let registry = Registry::load(&settings).unwrap();
        assert_eq!(registry.get("Sakti").unwrap().category, Category::Drip);
        assert_eq!(registry.active_ids(), vec!["Sakti", "Skuast", "Igoo"]);
        assert_eq!(registry.get("Igoo").unwrap().display_name, "Igoo");
    }

    #[test]
    fn replacing_defaults_keeps_only_overrides() {
        let mut settings = settings::Settings::default();
        settings.replace_default_sites = true;
        settings.sites = vec![override_entry("Te", "drip", true)];

        let registry = Registry::load(&settings).unwrap();
        assert_eq!(registry.active_ids(), vec!["Te"]);
    }

    #[test]
    fn unknown_category_is_a_configuration_error() {
        let mut settings = settings::Settings::default();
        settings.sites = vec![override_entry("Shey", "sprinkler", true)];

        match Registry::load(&settings) {
            Err(Error::Configuration { reason }) => assert!(reason.contains("sprinkler")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn duplicate_sites_are_rejected() {
        let site = SiteDescriptor::new("A", "A", Category::Air, true);
        assert!(Registry::new(vec![site.clone(), site]).is_err());
    }

    #[test]
    fn label_omits_redundant_name() {
        assert_eq!(
            SiteDescriptor::new("Li", "Likir", Category::Air, false).label(),
            "Likir (Li)"
        );
        assert_eq!(
            SiteDescriptor::new("Sakti", "Sakti", Category::Air, true).label(),
            "Sakti"
        );
    }
}
