// 🏘️ Property Registry - Fixed property set + export mapping rules
// Every ingest decision (filename -> property, raw column -> unit number)
// goes through this table instead of ad-hoc string literals.

use serde::{Deserialize, Serialize};

// ============================================================================
// PROPERTY
// ============================================================================

/// Property - Identifies which building a unit (and a usage export) belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Property {
    Champion,
    Barnett,
    #[serde(rename = "532 Barnett")]
    Barnett532,
    Cushing,
}

impl Property {
    /// Display name, also the value stored in the `units.property` column
    pub fn name(&self) -> &'static str {
        match self {
            Property::Champion => "Champion",
            Property::Barnett => "Barnett",
            Property::Barnett532 => "532 Barnett",
            Property::Cushing => "Cushing",
        }
    }

    /// Reverse of `name()` for rows read back from the database
    pub fn from_name(name: &str) -> Option<Property> {
        match name {
            "Champion" => Some(Property::Champion),
            "Barnett" => Some(Property::Barnett),
            "532 Barnett" => Some(Property::Barnett532),
            "Cushing" => Some(Property::Cushing),
            _ => None,
        }
    }

    /// All properties, in roster order
    pub fn all() -> &'static [Property] {
        &[
            Property::Champion,
            Property::Barnett,
            Property::Barnett532,
            Property::Cushing,
        ]
    }

    /// Mapping rules for this property's usage exports
    pub fn config(&self) -> &'static PropertyConfig {
        PROPERTY_CONFIGS
            .iter()
            .find(|c| c.property == *self)
            .expect("every property has a config entry")
    }
}

impl std::fmt::Display for Property {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// EXPORT MAPPING CONFIG
// ============================================================================

/// PropertyConfig - How to recognize and normalize one property's export
///
/// `filename_token` is matched case-sensitively against the export filename
/// (the meter portal uppercases property names in its downloads).
/// `allowed_codes` is the closed set of raw column codes the export may
/// carry; anything else in a gallons column is dropped with a warning.
/// `code_prefix` rewrites the raw code into the roster unit number
/// ("A" -> "532A" for the 532 Barnett building).
#[derive(Debug, Clone)]
pub struct PropertyConfig {
    pub property: Property,
    pub filename_token: &'static str,
    pub allowed_codes: &'static [&'static str],
    pub code_prefix: &'static str,
}

impl PropertyConfig {
    /// Rewrite a raw export column code into a roster unit number.
    /// Returns None for codes outside the property's allowed set.
    pub fn map_unit_code(&self, raw_code: &str) -> Option<String> {
        if self.allowed_codes.contains(&raw_code) {
            Some(format!("{}{}", self.code_prefix, raw_code))
        } else {
            None
        }
    }
}

/// Declared in match order: the 532 Barnett token must be tested before the
/// generic BARNETT token or "532_BARNETT_usage.csv" lands on the wrong
/// property.
pub const PROPERTY_CONFIGS: &[PropertyConfig] = &[
    PropertyConfig {
        property: Property::Champion,
        filename_token: "CHAMPION",
        allowed_codes: &["484", "486"],
        code_prefix: "",
    },
    PropertyConfig {
        property: Property::Barnett532,
        filename_token: "532_BARNETT",
        allowed_codes: &["A", "B", "C", "D"],
        code_prefix: "532",
    },
    PropertyConfig {
        property: Property::Barnett,
        filename_token: "BARNETT",
        allowed_codes: &["483", "485", "487", "489"],
        code_prefix: "",
    },
    PropertyConfig {
        property: Property::Cushing,
        filename_token: "CUSHING",
        allowed_codes: &["A", "B", "C", "D"],
        code_prefix: "Cushing",
    },
];

/// Detect which property an export filename belongs to.
///
/// Returns None for filenames matching no token; callers decide whether
/// that is a skip (batch ingest) or an error (on-demand billing).
pub fn detect_property(filename: &str) -> Option<Property> {
    PROPERTY_CONFIGS
        .iter()
        .find(|c| filename.contains(c.filename_token))
        .map(|c| c.property)
}
