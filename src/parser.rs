//! ASDU information-object parsing.
//!
//! Walks the raw object section of an ASDU and decodes each element into a
//! [`DataPoint`]. Addressing follows the VSQ: with SQ=0 every element is
//! prefixed by its own 3-byte IOA, with SQ=1 a single start IOA is followed
//! by contiguous elements.
//!
//! Unknown type identifications are not an error: they come back as
//! [`ParsedAsdu::Unsupported`] so the session can log and move on.

use chrono::NaiveDateTime;

use crate::error::{DatacollError, Result};
use crate::types::{Asdu, Cp24Time2a, Cp56Time2a, DataPoint, DataValue, Ioa, Quality, Typ, IOA_SIZE};

/// Outcome of parsing an ASDU's object section.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedAsdu {
    /// Decoded elements, in object order.
    Points(Vec<DataPoint>),
    /// Type not in the supported set; skip routing, keep the session alive.
    Unsupported(Typ),
}

/// Element payload size (after the IOA) for each supported TYP.
const fn element_size(typ: Typ) -> Option<usize> {
    match typ {
        Typ::M_SP_NA_1 | Typ::M_DP_NA_1 => Some(1),
        Typ::M_SP_TA_1 => Some(4),
        Typ::M_ME_NA_1 | Typ::M_ME_NB_1 => Some(3),
        Typ::M_ME_TA_1 => Some(6),
        Typ::M_ME_NC_1 => Some(5),
        Typ::M_IT_NA_1 => Some(5),
        Typ::M_SP_TB_1 | Typ::M_DP_TB_1 => Some(8),
        Typ::M_ME_TD_1 => Some(10),
        Typ::M_ME_TF_1 | Typ::M_IT_TB_1 => Some(12),
        // Command mirrors, decoded for actcon routing
        Typ::C_SC_NA_1 | Typ::C_DC_NA_1 => Some(1),
        Typ::C_SE_NA_1 | Typ::C_SE_NB_1 => Some(3),
        Typ::C_SE_NC_1 => Some(5),
        _ => None,
    }
}

/// Decode one element payload. `base` supplies the date for CP24 tags and
/// the fallback handled by the caller.
fn decode_element(
    typ: Typ,
    bytes: &[u8],
    base: NaiveDateTime,
) -> Result<(DataValue, Quality, Option<NaiveDateTime>)> {
    let out = match typ {
        Typ::M_SP_NA_1 => (
            DataValue::Single(bytes[0] & 0x01 != 0),
            Quality::from_siq(bytes[0]),
            None,
        ),
        Typ::M_SP_TA_1 => (
            DataValue::Single(bytes[0] & 0x01 != 0),
            Quality::from_siq(bytes[0]),
            Cp24Time2a::from_bytes(&bytes[1..4])?.to_naive(base),
        ),
        Typ::M_DP_NA_1 => (
            DataValue::Double(bytes[0] & 0x03),
            Quality::from_siq(bytes[0]),
            None,
        ),
        Typ::M_ME_NA_1 => (
            DataValue::Normalized(normalized(bytes)),
            Quality::from_qds(bytes[2]),
            None,
        ),
        Typ::M_ME_TA_1 => (
            DataValue::Normalized(normalized(bytes)),
            Quality::from_qds(bytes[2]),
            Cp24Time2a::from_bytes(&bytes[3..6])?.to_naive(base),
        ),
        Typ::M_ME_NB_1 => (
            DataValue::Scaled(i16::from_le_bytes([bytes[0], bytes[1]])),
            Quality::from_qds(bytes[2]),
            None,
        ),
        Typ::M_ME_NC_1 => (
            DataValue::Float(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
            Quality::from_qds(bytes[4]),
            None,
        ),
        Typ::M_IT_NA_1 => (
            DataValue::Counter(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
            Quality::from_bcr(bytes[4]),
            None,
        ),
        Typ::M_SP_TB_1 => (
            DataValue::Single(bytes[0] & 0x01 != 0),
            Quality::from_siq(bytes[0]),
            Cp56Time2a::from_bytes(&bytes[1..8])?.to_naive(),
        ),
        Typ::M_DP_TB_1 => (
            DataValue::Double(bytes[0] & 0x03),
            Quality::from_siq(bytes[0]),
            Cp56Time2a::from_bytes(&bytes[1..8])?.to_naive(),
        ),
        Typ::M_ME_TD_1 => (
            DataValue::Normalized(normalized(bytes)),
            Quality::from_qds(bytes[2]),
            Cp56Time2a::from_bytes(&bytes[3..10])?.to_naive(),
        ),
        Typ::M_ME_TF_1 => (
            DataValue::Float(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
            Quality::from_qds(bytes[4]),
            Cp56Time2a::from_bytes(&bytes[5..12])?.to_naive(),
        ),
        Typ::M_IT_TB_1 => (
            DataValue::Counter(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
            Quality::from_bcr(bytes[4]),
            Cp56Time2a::from_bytes(&bytes[5..12])?.to_naive(),
        ),
        // Command mirrors: value without the S/E bit, no quality octet
        Typ::C_SC_NA_1 => (DataValue::Single(bytes[0] & 0x01 != 0), Quality::GOOD, None),
        Typ::C_DC_NA_1 => (DataValue::Double(bytes[0] & 0x03), Quality::GOOD, None),
        Typ::C_SE_NA_1 => (DataValue::Normalized(normalized(bytes)), Quality::GOOD, None),
        Typ::C_SE_NB_1 => (
            DataValue::Scaled(i16::from_le_bytes([bytes[0], bytes[1]])),
            Quality::GOOD,
            None,
        ),
        Typ::C_SE_NC_1 => (
            DataValue::Float(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
            Quality::GOOD,
            None,
        ),
        _ => return Err(DatacollError::invalid_asdu_static("unsupported TYP")),
    };
    Ok(out)
}

#[inline]
fn normalized(bytes: &[u8]) -> f32 {
    i16::from_le_bytes([bytes[0], bytes[1]]) as f32 / 32768.0
}

/// Parse the object section of `asdu`.
///
/// Types carrying a CP24Time2a tag complete the missing date/hour from
/// `now`; untagged types leave `time` empty for the dispatcher to stamp.
pub fn parse_asdu(asdu: &Asdu, now: NaiveDateTime) -> Result<ParsedAsdu> {
    let typ = asdu.header.typ;
    let Some(size) = element_size(typ) else {
        return Ok(ParsedAsdu::Unsupported(typ));
    };

    let data = asdu.raw_data.as_ref();
    let count = asdu.header.vsq.count as usize;
    let sequence = asdu.header.vsq.sequence;
    let mut points = Vec::with_capacity(count);

    if count == 0 {
        return Ok(ParsedAsdu::Points(points));
    }
    if data.len() < IOA_SIZE {
        return Err(DatacollError::invalid_asdu_static("object section too short"));
    }

    let start_ioa = Ioa::from_bytes(&data[..IOA_SIZE])?.value();
    let mut offset = IOA_SIZE;

    for i in 0..count {
        let ioa = if sequence {
            start_ioa + i as u32
        } else if i == 0 {
            start_ioa
        } else {
            if offset + IOA_SIZE > data.len() {
                return Err(DatacollError::invalid_asdu_static("truncated IOA"));
            }
            let ioa = Ioa::from_bytes(&data[offset..offset + IOA_SIZE])?.value();
            offset += IOA_SIZE;
            ioa
        };

        if offset + size > data.len() {
            return Err(DatacollError::invalid_asdu_static("truncated element"));
        }
        let (value, quality, time) = decode_element(typ, &data[offset..offset + size], now)?;
        offset += size;

        points.push(DataPoint {
            ioa,
            value,
            quality,
            time,
        });
    }

    Ok(ParsedAsdu::Points(points))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AsduHeader, Cause, Vsq};
    use bytes::Bytes;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    fn make_asdu(typ: Typ, count: u8, sequence: bool, data: &[u8]) -> Asdu {
        Asdu {
            header: AsduHeader {
                typ,
                vsq: Vsq::new(count, sequence),
                cause: Cause::Spont,
                test: false,
                negative: false,
                originator: 0,
                common_address: 1,
            },
            raw_data: Bytes::copy_from_slice(data),
        }
    }

    fn points(parsed: ParsedAsdu) -> Vec<DataPoint> {
        match parsed {
            ParsedAsdu::Points(p) => p,
            ParsedAsdu::Unsupported(t) => panic!("unexpected unsupported type {}", t),
        }
    }

    #[test]
    fn test_single_point() {
        // IOA=1001, SIQ=0x01 (ON, good)
        let asdu = make_asdu(Typ::M_SP_NA_1, 1, false, &[0xE9, 0x03, 0x00, 0x01]);
        let pts = points(parse_asdu(&asdu, now()).unwrap());
        assert_eq!(pts.len(), 1);
        assert_eq!(pts[0].ioa, 1001);
        assert_eq!(pts[0].value, DataValue::Single(true));
        assert!(pts[0].is_good());
        assert!(pts[0].time.is_none());
    }

    #[test]
    fn test_single_point_sequence() {
        // SQ=1: start IOA=100, SIQ values OFF, ON, OFF+IV
        let asdu = make_asdu(
            Typ::M_SP_NA_1,
            3,
            true,
            &[0x64, 0x00, 0x00, 0x00, 0x01, 0x80],
        );
        let pts = points(parse_asdu(&asdu, now()).unwrap());
        assert_eq!(pts.len(), 3);
        assert_eq!(pts[0].ioa, 100);
        assert_eq!(pts[1].ioa, 101);
        assert_eq!(pts[2].ioa, 102);
        assert_eq!(pts[1].value, DataValue::Single(true));
        assert!(pts[2].quality.invalid);
    }

    #[test]
    fn test_single_point_cp56() {
        // IOA=100, SIQ=ON, CP56 2024-01-15 10:30:00.000
        let tag = Cp56Time2a {
            millis: 0,
            minutes: 30,
            hours: 10,
            day: 15,
            day_of_week: 1,
            month: 1,
            year: 24,
            invalid: false,
            summer_time: false,
        };
        let mut data = vec![0x64, 0x00, 0x00, 0x01];
        data.extend_from_slice(&tag.to_bytes());
        let asdu = make_asdu(Typ::M_SP_TB_1, 1, false, &data);

        let pts = points(parse_asdu(&asdu, now()).unwrap());
        assert_eq!(pts[0].ioa, 100);
        assert_eq!(pts[0].value, DataValue::Single(true));
        assert_eq!(
            pts[0].time,
            NaiveDate::from_ymd_opt(2024, 1, 15)
                .unwrap()
                .and_hms_opt(10, 30, 0)
        );
    }

    #[test]
    fn test_single_point_cp24_completes_from_now() {
        // SIQ=ON + CP24 (minute 30, 15s into the minute); date/hour from now()
        let tag = Cp24Time2a {
            millis: 15000,
            minutes: 30,
            invalid: false,
        };
        let mut data = vec![0x64, 0x00, 0x00, 0x01];
        data.extend_from_slice(&tag.to_bytes());
        let asdu = make_asdu(Typ::M_SP_TA_1, 1, false, &data);

        let pts = points(parse_asdu(&asdu, now()).unwrap());
        assert_eq!(
            pts[0].time,
            NaiveDate::from_ymd_opt(2024, 1, 15)
                .unwrap()
                .and_hms_opt(10, 30, 15)
        );
    }

    #[test]
    fn test_measured_normalized() {
        // IOA=5000, NVA=16384 (0.5), QDS good
        let asdu = make_asdu(Typ::M_ME_NA_1, 1, false, &[0x88, 0x13, 0x00, 0x00, 0x40, 0x00]);
        let pts = points(parse_asdu(&asdu, now()).unwrap());
        assert_eq!(pts[0].ioa, 5000);
        if let DataValue::Normalized(v) = pts[0].value {
            assert!((v - 0.5).abs() < 0.001);
        } else {
            panic!("expected normalized value");
        }
    }

    #[test]
    fn test_measured_normalized_cp56() {
        let tag = Cp56Time2a::from_naive(now());
        let mut data = vec![0xC8, 0x00, 0x00, 0x00, 0x20, 0x00]; // IOA=200, NVA=8192
        data.extend_from_slice(&tag.to_bytes());
        let asdu = make_asdu(Typ::M_ME_TD_1, 1, false, &data);

        let pts = points(parse_asdu(&asdu, now()).unwrap());
        assert_eq!(pts[0].ioa, 200);
        assert_eq!(pts[0].time, Some(now()));
        if let DataValue::Normalized(v) = pts[0].value {
            assert!((v - 0.25).abs() < 0.001);
        } else {
            panic!("expected normalized value");
        }
    }

    #[test]
    fn test_measured_float() {
        let mut data = vec![0xB8, 0x0B, 0x00]; // IOA=3000
        data.extend_from_slice(&23.5f32.to_le_bytes());
        data.push(0x00);
        let asdu = make_asdu(Typ::M_ME_NC_1, 1, false, &data);

        let pts = points(parse_asdu(&asdu, now()).unwrap());
        assert_eq!(pts[0].ioa, 3000);
        assert_eq!(pts[0].value, DataValue::Float(23.5));
    }

    #[test]
    fn test_integrated_totals() {
        let mut data = vec![0x70, 0x17, 0x00]; // IOA=6000
        data.extend_from_slice(&123456i32.to_le_bytes());
        data.push(0x05); // sequence=5, no flags
        let asdu = make_asdu(Typ::M_IT_NA_1, 1, false, &data);

        let pts = points(parse_asdu(&asdu, now()).unwrap());
        assert_eq!(pts[0].ioa, 6000);
        assert_eq!(pts[0].value, DataValue::Counter(123456));
        assert!(pts[0].is_good());
    }

    #[test]
    fn test_integrated_totals_cp56() {
        let tag = Cp56Time2a::from_naive(now());
        let mut data = vec![0x01, 0x00, 0x00];
        data.extend_from_slice(&(-5i32).to_le_bytes());
        data.push(0x80); // IV
        data.extend_from_slice(&tag.to_bytes());
        let asdu = make_asdu(Typ::M_IT_TB_1, 1, false, &data);

        let pts = points(parse_asdu(&asdu, now()).unwrap());
        assert_eq!(pts[0].value, DataValue::Counter(-5));
        assert!(pts[0].quality.invalid);
        assert_eq!(pts[0].time, Some(now()));
    }

    #[test]
    fn test_command_mirror_single() {
        // actcon echo of a single command: SE bit must not leak into value
        let asdu = make_asdu(Typ::C_SC_NA_1, 1, false, &[0x64, 0x00, 0x00, 0x01]);
        let pts = points(parse_asdu(&asdu, now()).unwrap());
        assert_eq!(pts[0].value, DataValue::Single(true));
        assert!(pts[0].is_good());
    }

    #[test]
    fn test_command_mirror_setpoint_float() {
        let mut data = vec![0xC8, 0x00, 0x00];
        data.extend_from_slice(&42.0f32.to_le_bytes());
        data.push(0x00); // QOS, execute
        let asdu = make_asdu(Typ::C_SE_NC_1, 1, false, &data);
        let pts = points(parse_asdu(&asdu, now()).unwrap());
        assert_eq!(pts[0].ioa, 200);
        assert_eq!(pts[0].value, DataValue::Float(42.0));
    }

    #[test]
    fn test_unsupported_type_is_sentinel() {
        let asdu = make_asdu(Typ(120), 1, false, &[0x01, 0x00, 0x00, 0x00]);
        assert_eq!(
            parse_asdu(&asdu, now()).unwrap(),
            ParsedAsdu::Unsupported(Typ(120))
        );
    }

    #[test]
    fn test_truncated_element_is_error() {
        // claims 2 objects but carries one
        let asdu = make_asdu(Typ::M_SP_NA_1, 2, false, &[0x64, 0x00, 0x00, 0x01]);
        assert!(parse_asdu(&asdu, now()).is_err());
    }

    #[test]
    fn test_empty_count() {
        let asdu = make_asdu(Typ::M_SP_NA_1, 0, false, &[]);
        assert_eq!(
            parse_asdu(&asdu, now()).unwrap(),
            ParsedAsdu::Points(vec![])
        );
    }
}
