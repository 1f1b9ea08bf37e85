//! Recipient records and phone number normalization.
//!
//! Records arrive with the Spanish field names used by the school platform
//! (`telefono_apoderado`, `apoderado`, ...). Phone numbers are turned into
//! WhatsApp chat ids of the form `<country code><digits>@<suffix>`.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Default country calling code (Peru).
pub const DEFAULT_COUNTRY_CODE: &str = "51";

/// Default WhatsApp Web user domain.
pub const DEFAULT_DOMAIN_SUFFIX: &str = "c.us";

/// One student/guardian entry of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientRecord {
    /// Guardian's display name.
    #[serde(rename = "apoderado", default, deserialize_with = "lenient_string")]
    pub guardian_name: String,
    /// Student first name.
    #[serde(rename = "nombre", default, deserialize_with = "lenient_string")]
    pub student_first_name: String,
    /// Student last name.
    #[serde(rename = "apellido", default, deserialize_with = "lenient_string")]
    pub student_last_name: String,
    /// Platform username issued to the student.
    #[serde(rename = "nombre_usuario", default, deserialize_with = "lenient_string")]
    pub username: String,
    /// Initial platform password issued to the student.
    #[serde(rename = "contrasena", default, deserialize_with = "lenient_string")]
    pub password: String,
    /// Guardian's phone number as typed by the operator.
    #[serde(rename = "telefono_apoderado", default, deserialize_with = "lenient_string")]
    pub raw_phone: String,
}

impl RecipientRecord {
    /// Student first and last name joined by a space.
    pub fn student_full_name(&self) -> String {
        format!("{} {}", self.student_first_name, self.student_last_name)
            .trim()
            .to_owned()
    }

    /// Whether the record carries a phone number at all.
    pub fn has_phone(&self) -> bool {
        !self.raw_phone.trim().is_empty()
    }
}

/// Accept strings, numbers and `null` for text fields.
///
/// Spreadsheet exports frequently send phone numbers as JSON numbers.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::Null => Ok(String::new()),
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Bool(b) => Ok(b.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string or number, found {other}"
        ))),
    }
}

/// Canonical WhatsApp chat id derived from a phone number.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormalizedTarget(String);

impl NormalizedTarget {
    /// The full chat id, e.g. `51987654321@c.us`.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The digits before the `@`.
    pub fn digits(&self) -> &str {
        self.0.split_once('@').map_or(self.0.as_str(), |(d, _)| d)
    }
}

impl fmt::Display for NormalizedTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Turns free-form phone strings into [`NormalizedTarget`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhoneNormalizer {
    country_code: String,
    domain_suffix: String,
}

impl Default for PhoneNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_COUNTRY_CODE, DEFAULT_DOMAIN_SUFFIX)
    }
}

impl PhoneNormalizer {
    /// Create a normalizer. Non-digits in `country_code` and a leading `@`
    /// on `domain_suffix` are dropped.
    pub fn new(country_code: &str, domain_suffix: &str) -> Self {
        Self {
            country_code: digits_only(country_code),
            domain_suffix: domain_suffix.trim().trim_start_matches('@').to_owned(),
        }
    }

    /// Configured country code.
    pub fn country_code(&self) -> &str {
        &self.country_code
    }

    /// Strip non-digits, prefix the country code unless already present,
    /// append the domain suffix.
    ///
    /// Input without any digits still yields a target (just the country
    /// code); the bridge rejects it at send time.
    pub fn normalize(&self, raw: &str) -> NormalizedTarget {
        let digits = digits_only(raw);
        let number = if digits.starts_with(&self.country_code) {
            digits
        } else {
            format!("{}{digits}", self.country_code)
        };
        NormalizedTarget(format!("{number}@{}", self.domain_suffix))
    }
}

fn digits_only(s: &str) -> String {
    s.chars().filter(char::is_ascii_digit).collect()
}
