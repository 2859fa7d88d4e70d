//! The canonical output schema and its sentinel values.

use serde::{Deserialize, Serialize};

pub const FIELD_ID: &str = "field_id";
pub const FARM_ID: &str = "farm_id";
pub const CROP_CODE: &str = "crop_code";
pub const CROP_NAME: &str = "crop_name";
pub const CROP_NAME_TRANSLATED: &str = "crop_name_translated";
pub const TAXONOMY_NAME: &str = "taxonomy_name";
pub const TAXONOMY_CODE: &str = "taxonomy_code";
pub const FIELD_SIZE: &str = "field_size";
pub const ORGANIC: &str = "organic";
pub const REGION: &str = "region";
pub const YEAR: &str = "year";
pub const GEOMETRY: &str = "geometry";

/// Attribute columns of a harmonized record, in output order. Geometry is
/// carried separately and always written last.
pub fn default_columns() -> Vec<String> {
    [
        FIELD_ID,
        FARM_ID,
        CROP_CODE,
        CROP_NAME,
        CROP_NAME_TRANSLATED,
        TAXONOMY_NAME,
        TAXONOMY_CODE,
        FIELD_SIZE,
        ORGANIC,
        REGION,
        YEAR,
    ]
    .iter()
    .map(|name| name.to_string())
    .collect()
}

/// Reserved taxonomy values. `unresolved_*` marks crop data that is present
/// but absent from the authority table; `absent_*` marks records that
/// declare no crop at all. The two pairs must differ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sentinels {
    pub unresolved_name: String,
    pub unresolved_code: String,
    pub absent_name: String,
    pub absent_code: String,
}

impl Default for Sentinels {
    fn default() -> Self {
        Self {
            unresolved_name: "missing".to_string(),
            unresolved_code: "9999999999".to_string(),
            absent_name: "not_known_and_other".to_string(),
            absent_code: "3399000000".to_string(),
        }
    }
}

impl Sentinels {
    pub fn is_unresolved(&self, name: &str, code: &str) -> bool {
        name == self.unresolved_name && code == self.unresolved_code
    }

    pub fn is_absent(&self, name: &str, code: &str) -> bool {
        name == self.absent_name && code == self.absent_code
    }
}
