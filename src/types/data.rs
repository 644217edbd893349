//! Decoded data point types.
//!
//! [`crate::parser`] turns the raw information-object section of an ASDU
//! into a list of [`DataPoint`]s; the dispatcher maps those onto configured
//! term/item bindings and publishes them.

use chrono::NaiveDateTime;

/// A decoded information object.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    /// Information object address
    pub ioa: u32,
    /// Decoded value
    pub value: DataValue,
    /// Quality flags from the element's quality octet
    pub quality: Quality,
    /// Element timestamp (CP56Time2a or CP24Time2a); None when the type
    /// carries no time tag
    pub time: Option<NaiveDateTime>,
}

impl DataPoint {
    /// Good-quality untimestamped point.
    pub const fn new(ioa: u32, value: DataValue) -> Self {
        Self {
            ioa,
            value,
            quality: Quality::GOOD,
            time: None,
        }
    }

    /// True when no quality flag is raised.
    #[inline]
    pub const fn is_good(&self) -> bool {
        self.quality.is_good()
    }
}

/// Decoded element value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DataValue {
    /// Single-point state (M_SP_NA_1, M_SP_TB_1)
    Single(bool),
    /// Double-point state, raw 2-bit encoding (M_DP_NA_1, M_DP_TB_1)
    Double(u8),
    /// Normalized value in [-1.0, 1.0) (M_ME_NA_1, M_ME_TD_1)
    Normalized(f32),
    /// Scaled value (M_ME_NB_1)
    Scaled(i16),
    /// Short floating point (M_ME_NC_1, M_ME_TF_1)
    Float(f32),
    /// Binary counter reading (M_IT_NA_1, M_IT_TB_1)
    Counter(i32),
}

impl DataValue {
    /// Numeric view used for store payloads.
    #[inline]
    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Single(v) => {
                if *v {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Double(v) => *v as f64,
            Self::Normalized(v) => *v as f64,
            Self::Scaled(v) => *v as f64,
            Self::Float(v) => *v as f64,
            Self::Counter(v) => *v as f64,
        }
    }

    /// JSON value: booleans for states, numbers for measurands.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Single(v) => serde_json::Value::Bool(*v),
            Self::Double(v) => serde_json::json!(*v),
            Self::Scaled(v) => serde_json::json!(*v),
            Self::Counter(v) => serde_json::json!(*v),
            Self::Normalized(v) | Self::Float(v) => serde_json::json!(*v),
        }
    }
}

/// Quality flags shared by all element encodings.
///
/// `IV`, `NT`, `SB`, `BL` live in the same bit positions for SIQ, DIQ and
/// QDS octets; `OV` exists only in QDS; counter readings map their IV and
/// CA/CY flags here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Quality {
    /// Overflow (OV)
    pub overflow: bool,
    /// Blocked (BL)
    pub blocked: bool,
    /// Substituted (SB)
    pub substituted: bool,
    /// Not topical (NT)
    pub not_topical: bool,
    /// Invalid (IV)
    pub invalid: bool,
}

impl Quality {
    /// All flags clear.
    pub const GOOD: Self = Self {
        overflow: false,
        blocked: false,
        substituted: false,
        not_topical: false,
        invalid: false,
    };

    /// Parse from an SIQ/DIQ octet (quality in the upper nibble).
    #[inline(always)]
    pub const fn from_siq(octet: u8) -> Self {
        Self {
            overflow: false,
            blocked: (octet & 0x10) != 0,
            substituted: (octet & 0x20) != 0,
            not_topical: (octet & 0x40) != 0,
            invalid: (octet & 0x80) != 0,
        }
    }

    /// Parse from a QDS octet (measured values).
    #[inline(always)]
    pub const fn from_qds(octet: u8) -> Self {
        Self {
            overflow: (octet & 0x01) != 0,
            blocked: (octet & 0x10) != 0,
            substituted: (octet & 0x20) != 0,
            not_topical: (octet & 0x40) != 0,
            invalid: (octet & 0x80) != 0,
        }
    }

    /// Parse from the binary-counter sequence octet (IV in bit 7).
    #[inline(always)]
    pub const fn from_bcr(octet: u8) -> Self {
        Self {
            overflow: (octet & 0x20) != 0, // carry
            blocked: false,
            substituted: false,
            not_topical: false,
            invalid: (octet & 0x80) != 0,
        }
    }

    #[inline(always)]
    pub const fn is_good(&self) -> bool {
        !self.overflow && !self.blocked && !self.substituted && !self.not_topical && !self.invalid
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_good() {
            return f.write_str("Good");
        }
        let mut first = true;
        for (set, tag) in [
            (self.overflow, "OV"),
            (self.blocked, "BL"),
            (self.substituted, "SB"),
            (self.not_topical, "NT"),
            (self.invalid, "IV"),
        ] {
            if set {
                if !first {
                    f.write_str("|")?;
                }
                first = false;
                f.write_str(tag)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_point_creation() {
        let dp = DataPoint::new(1001, DataValue::Float(23.5));
        assert_eq!(dp.ioa, 1001);
        assert!(dp.is_good());
        assert_eq!(dp.value.as_f64(), 23.5);
    }

    #[test]
    fn test_value_as_f64() {
        assert_eq!(DataValue::Single(true).as_f64(), 1.0);
        assert_eq!(DataValue::Single(false).as_f64(), 0.0);
        assert_eq!(DataValue::Double(2).as_f64(), 2.0);
        assert_eq!(DataValue::Scaled(-100).as_f64(), -100.0);
        assert_eq!(DataValue::Counter(123456).as_f64(), 123456.0);
        assert!((DataValue::Normalized(0.5).as_f64() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_value_to_json() {
        assert_eq!(DataValue::Single(true).to_json(), serde_json::json!(true));
        assert_eq!(DataValue::Scaled(7).to_json(), serde_json::json!(7));
        assert_eq!(DataValue::Counter(-1).to_json(), serde_json::json!(-1));
    }

    #[test]
    fn test_quality_from_siq() {
        let q = Quality::from_siq(0x90);
        assert!(q.blocked);
        assert!(q.invalid);
        assert!(!q.substituted);
        assert!(!q.overflow);
        assert!(!q.is_good());
    }

    #[test]
    fn test_quality_from_qds() {
        let q = Quality::from_qds(0x81);
        assert!(q.invalid);
        assert!(q.overflow);

        assert!(Quality::from_qds(0x00).is_good());
    }

    #[test]
    fn test_quality_from_bcr() {
        let q = Quality::from_bcr(0x80);
        assert!(q.invalid);
        let q = Quality::from_bcr(0x20);
        assert!(q.overflow);
        assert!(Quality::from_bcr(0x05).is_good());
    }

    #[test]
    fn test_quality_display() {
        assert_eq!(Quality::GOOD.to_string(), "Good");
        let q = Quality {
            overflow: true,
            invalid: true,
            ..Default::default()
        };
        assert_eq!(q.to_string(), "OV|IV");
    }
}
