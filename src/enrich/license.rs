//! License normalization and categorization.

use serde::Serialize;
use spdx::{Expression, ParseMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LicenseCategory {
    Permissive,
    Copyleft,
    Unknown,
}

#[derive(Debug, Clone, Serialize)]
pub struct NormalizedLicense {
    /// The SPDX expression when the input parses (laxly), otherwise the
    /// raw string as provided by the registry.
    pub expression: String,
    pub category: LicenseCategory,
    pub is_spdx: bool,
}

const COPYLEFT_PREFIXES: &[&str] = &[
    "GPL", "AGPL", "LGPL", "MPL", "EPL", "CDDL", "EUPL", "OSL", "CECILL",
];

const PERMISSIVE_PREFIXES: &[&str] = &[
    "MIT", "Apache", "BSD", "ISC", "Zlib", "Unlicense", "CC0", "0BSD", "BSL", "Python", "PSF",
    "WTFPL",
];

fn categorize_id(name: &str) -> LicenseCategory {
    if COPYLEFT_PREFIXES.iter().any(|p| name.starts_with(p)) {
        LicenseCategory::Copyleft
    } else if PERMISSIVE_PREFIXES.iter().any(|p| name.starts_with(p)) {
        LicenseCategory::Permissive
    } else {
        LicenseCategory::Unknown
    }
}

/// Parse `raw` as a lax SPDX expression. On failure the raw string is
/// recorded unchanged with an `Unknown` category.
pub fn normalize(raw: &str) -> NormalizedLicense {
    let trimmed = raw.trim();
    match Expression::parse_mode(trimmed, ParseMode::LAX) {
        Ok(expression) => {
            let mut category = None;
            for req in expression.requirements() {
                let id_category = match &req.req.license {
                    spdx::LicenseItem::Spdx { id, .. } => categorize_id(id.name),
                    spdx::LicenseItem::Other { .. } => LicenseCategory::Unknown,
                };
                // Any copyleft member marks the whole expression.
                category = Some(match (category, id_category) {
                    (_, LicenseCategory::Copyleft) | (Some(LicenseCategory::Copyleft), _) => {
                        LicenseCategory::Copyleft
                    }
                    (Some(LicenseCategory::Unknown), _) | (_, LicenseCategory::Unknown) => {
                        LicenseCategory::Unknown
                    }
                    _ => LicenseCategory::Permissive,
                });
            }
            NormalizedLicense {
                expression: trimmed.to_string(),
                category: category.unwrap_or(LicenseCategory::Unknown),
                is_spdx: true,
            }
        }
        Err(_) => NormalizedLicense {
            expression: trimmed.to_string(),
            category: LicenseCategory::Unknown,
            is_spdx: false,
        },
    }
}
