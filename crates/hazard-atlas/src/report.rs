//! Hazard report tables.
//!
//! A [`HazardReport`] is the per-region rating table the overlay colors the
//! terrain with. It arrives as configuration or runtime-injected JSON, is
//! sanitized once at ingestion, and is then immutable: an update replaces
//! the whole table.
//!
//! # JSON schema
//!
//! Either a bare array of records or an object with a `regions` array:
//!
//! ```json
//! [
//!   {
//!     "regionCode": "AT-07-14",
//!     "dangerBorder": 2200,
//!     "ratingHigh": 3,
//!     "ratingLow": 2,
//!     "unfavorableStart": 14,
//!     "unfavorableEnd": 2
//!   }
//! ]
//! ```
//!
//! `dangerBorder` may be `null` or omitted; see [`DEFAULT_DANGER_BORDER`].

use serde::{Deserialize, Serialize};

use crate::codec::{encode_value, MAX_ENCODABLE};
use crate::AtlasError;

/// Elevation border (meters) used when a record has no usable one.
///
/// Roughly the timberline in the Alps: below it the low rating applies.
pub const DEFAULT_DANGER_BORDER: f64 = 1600.0;

/// Largest value a field may hold after ingestion.
const MAX_FIELD_VALUE: f64 = MAX_ENCODABLE - 1.0;

// ---------------------------------------------------------------------------
// HazardRecord
// ---------------------------------------------------------------------------

/// One region's hazard rating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HazardRecord {
    /// Region identifier. Informational only; never encoded.
    #[serde(default)]
    pub region_code: String,
    /// Elevation (meters) separating the low and high rating.
    #[serde(default)]
    pub danger_border: Option<f64>,
    /// Rating (1-5) at or above the danger border.
    pub rating_high: f64,
    /// Rating (1-5) below the danger border.
    pub rating_low: f64,
    /// First unfavorable compass sector (0-15, N = 0, clockwise).
    pub unfavorable_start: f64,
    /// Last unfavorable compass sector, inclusive.
    pub unfavorable_end: f64,
}

impl HazardRecord {
    /// The danger border that actually gets encoded.
    ///
    /// Missing, zero, negative, fractional, and non-finite borders all fall
    /// back to [`DEFAULT_DANGER_BORDER`].
    pub fn effective_danger_border(&self) -> f64 {
        match self.danger_border {
            Some(v) if v.is_finite() && v > 0.0 && v.fract() == 0.0 => v,
            _ => DEFAULT_DANGER_BORDER,
        }
    }

    /// The five magnitude fields in atlas order: danger border, high rating,
    /// low rating, unfavorable start, unfavorable end.
    pub fn magnitudes(&self) -> [f64; 5] {
        [
            self.effective_danger_border(),
            self.rating_high,
            self.rating_low,
            self.unfavorable_start,
            self.unfavorable_end,
        ]
    }

    /// Clamp every numeric field into the encodable range, warning on each
    /// adjustment.
    fn sanitize(mut self, index: usize) -> Self {
        let region = self.region_code.clone();
        let clamp = |field: &'static str, value: &mut f64| {
            let clamped = if !value.is_finite() || *value < 0.0 {
                0.0
            } else if *value > MAX_FIELD_VALUE {
                MAX_FIELD_VALUE
            } else {
                return;
            };
            tracing::warn!(
                record = index,
                region = %region,
                field,
                value = *value,
                clamped,
                "hazard report value outside encodable range -- clamping"
            );
            *value = clamped;
        };

        clamp("ratingHigh", &mut self.rating_high);
        clamp("ratingLow", &mut self.rating_low);
        clamp("unfavorableStart", &mut self.unfavorable_start);
        clamp("unfavorableEnd", &mut self.unfavorable_end);
        if let Some(border) = self.danger_border.as_mut() {
            if border.is_finite() && *border > MAX_FIELD_VALUE {
                clamp("dangerBorder", border);
            }
        }
        self
    }
}

// ---------------------------------------------------------------------------
// HazardReport
// ---------------------------------------------------------------------------

/// Accepted top-level shapes of a report payload.
#[derive(Deserialize)]
#[serde(untagged)]
enum ReportPayload {
    Table(Vec<HazardRecord>),
    Wrapped { regions: Vec<HazardRecord> },
}

/// An immutable, sanitized hazard report table.
///
/// The content fingerprint is computed once at construction so that caches
/// can detect a replaced table without re-encoding it.
#[derive(Debug, Clone)]
pub struct HazardReport {
    records: Vec<HazardRecord>,
    fingerprint: blake3::Hash,
}

impl HazardReport {
    /// Build a report from records, sanitizing each one.
    pub fn from_records(records: Vec<HazardRecord>) -> Self {
        let records: Vec<HazardRecord> = records
            .into_iter()
            .enumerate()
            .map(|(i, record)| record.sanitize(i))
            .collect();
        let fingerprint = fingerprint_records(&records);
        Self {
            records,
            fingerprint,
        }
    }

    /// Parse a report from JSON (bare array or `{"regions": [...]}`).
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::InvalidReport`] if the payload does not match
    /// either shape.
    pub fn from_json(json: &str) -> Result<Self, AtlasError> {
        let records = match serde_json::from_str::<ReportPayload>(json)? {
            ReportPayload::Table(records) => records,
            ReportPayload::Wrapped { regions } => regions,
        };
        Ok(Self::from_records(records))
    }

    /// An empty table.
    pub fn empty() -> Self {
        Self::from_records(Vec::new())
    }

    /// The records, in atlas row order.
    pub fn records(&self) -> &[HazardRecord] {
        &self.records
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the table has no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Content hash over the encoded field values.
    ///
    /// Two reports with the same fingerprint produce byte-identical atlases.
    /// Region codes do not participate since they are never encoded.
    pub fn fingerprint(&self) -> blake3::Hash {
        self.fingerprint
    }
}

impl Default for HazardReport {
    fn default() -> Self {
        Self::empty()
    }
}

fn fingerprint_records(records: &[HazardRecord]) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&(records.len() as u64).to_le_bytes());
    for record in records {
        for value in record.magnitudes() {
            hasher.update(&encode_value(value));
        }
    }
    hasher.finalize()
}
