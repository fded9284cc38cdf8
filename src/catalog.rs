use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::model::{Business, Promotion, Service, Staff};

/// Business-management records imported in one go, e.g. when a business is
/// first brought onto the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    pub business: Option<Business>,
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default)]
    pub staff: Vec<Staff>,
    #[serde(default)]
    pub promotions: Vec<Promotion>,
}

impl Catalog {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let catalog = Self::from_json(&contents).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        tracing::debug!(
            "loaded catalog from {}: {} services, {} staff, {} promotions",
            path.display(),
            catalog.services.len(),
            catalog.staff.len(),
            catalog.promotions.len()
        );
        Ok(catalog)
    }
}
