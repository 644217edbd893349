//! IEC 60870-5-104 ASDU (Application Service Data Unit).
//!
//! The ASDU carries the type identification, variable structure qualifier,
//! cause of transmission, common address and the information objects. The
//! gateway keeps the object section as raw bytes; element decoding lives in
//! [`crate::parser`].

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

use crate::error::{DatacollError, Result};
use crate::types::{Cause, Typ};

/// Variable Structure Qualifier.
///
/// `count` is the number of information objects; `sequence` (SQ=1) means a
/// single start address followed by contiguous elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vsq {
    /// Number of information objects (0-127)
    pub count: u8,
    /// SQ bit: addresses are sequential from a single start IOA
    pub sequence: bool,
}

impl Vsq {
    #[inline]
    pub const fn new(count: u8, sequence: bool) -> Self {
        Self { count, sequence }
    }

    #[inline]
    pub const fn from_u8(value: u8) -> Self {
        Self {
            count: value & 0x7F,
            sequence: (value & 0x80) != 0,
        }
    }

    #[inline]
    pub const fn as_u8(&self) -> u8 {
        (self.count & 0x7F) | if self.sequence { 0x80 } else { 0 }
    }
}

/// IOA width on the wire.
pub const IOA_SIZE: usize = 3;

/// Information Object Address: 3-byte little-endian data point address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Ioa(pub u32);

impl Ioa {
    /// Create from u32 (lower 24 bits).
    #[inline(always)]
    pub const fn new(value: u32) -> Self {
        Self(value & 0x00FF_FFFF)
    }

    /// Parse from a 3-byte little-endian array.
    #[inline(always)]
    pub const fn from_array(bytes: [u8; IOA_SIZE]) -> Self {
        Self((bytes[0] as u32) | ((bytes[1] as u32) << 8) | ((bytes[2] as u32) << 16))
    }

    /// Parse from a slice, checking length.
    #[inline]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < IOA_SIZE {
            return Err(DatacollError::invalid_asdu_static("IOA too short"));
        }
        Ok(Self::from_array([bytes[0], bytes[1], bytes[2]]))
    }

    /// Encode to 3 bytes (little-endian).
    #[inline(always)]
    pub const fn to_bytes(self) -> [u8; IOA_SIZE] {
        [
            (self.0 & 0xFF) as u8,
            ((self.0 >> 8) & 0xFF) as u8,
            ((self.0 >> 16) & 0xFF) as u8,
        ]
    }

    #[inline(always)]
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for Ioa {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// CP56Time2a timestamp (7 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cp56Time2a {
    /// Milliseconds within the minute (0-59999)
    pub millis: u16,
    /// Minutes (0-59)
    pub minutes: u8,
    /// Hours (0-23)
    pub hours: u8,
    /// Day of month (1-31)
    pub day: u8,
    /// Day of week (1-7, 1 = Monday, 0 = unused)
    pub day_of_week: u8,
    /// Month (1-12)
    pub month: u8,
    /// Years since 2000 (0-99)
    pub year: u8,
    /// IV flag in the minutes octet
    pub invalid: bool,
    /// SU flag in the hours octet
    pub summer_time: bool,
}

impl Cp56Time2a {
    /// Parse from 7 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 7 {
            return Err(DatacollError::invalid_asdu_static("CP56Time2a too short"));
        }
        Ok(Self {
            millis: bytes[0] as u16 | ((bytes[1] as u16) << 8),
            minutes: bytes[2] & 0x3F,
            invalid: (bytes[2] & 0x80) != 0,
            hours: bytes[3] & 0x1F,
            summer_time: (bytes[3] & 0x80) != 0,
            day: bytes[4] & 0x1F,
            day_of_week: (bytes[4] >> 5) & 0x07,
            month: bytes[5] & 0x0F,
            year: bytes[6] & 0x7F,
        })
    }

    /// Encode to 7 bytes.
    pub const fn to_bytes(&self) -> [u8; 7] {
        [
            (self.millis & 0xFF) as u8,
            ((self.millis >> 8) & 0xFF) as u8,
            (self.minutes & 0x3F) | if self.invalid { 0x80 } else { 0 },
            (self.hours & 0x1F) | if self.summer_time { 0x80 } else { 0 },
            (self.day & 0x1F) | ((self.day_of_week & 0x07) << 5),
            self.month & 0x0F,
            self.year & 0x7F,
        ]
    }

    /// Convert to a wallclock timestamp; None for out-of-range fields.
    pub fn to_naive(&self) -> Option<NaiveDateTime> {
        let date = NaiveDate::from_ymd_opt(2000 + self.year as i32, self.month as u32, self.day as u32)?;
        date.and_hms_milli_opt(
            self.hours as u32,
            self.minutes as u32,
            (self.millis / 1000) as u32,
            (self.millis % 1000) as u32,
        )
    }

    /// Build from a wallclock timestamp (used for clock synchronization).
    pub fn from_naive(dt: NaiveDateTime) -> Self {
        Self {
            millis: (dt.second() * 1000 + dt.nanosecond() / 1_000_000) as u16,
            minutes: dt.minute() as u8,
            hours: dt.hour() as u8,
            day: dt.day() as u8,
            day_of_week: dt.weekday().number_from_monday() as u8,
            month: dt.month() as u8,
            year: (dt.year() - 2000).clamp(0, 99) as u8,
            invalid: false,
            summer_time: false,
        }
    }
}

/// CP24Time2a timestamp (3 bytes): milliseconds and minutes only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cp24Time2a {
    /// Milliseconds within the minute (0-59999)
    pub millis: u16,
    /// Minutes (0-59)
    pub minutes: u8,
    /// IV flag
    pub invalid: bool,
}

impl Cp24Time2a {
    /// Parse from 3 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 3 {
            return Err(DatacollError::invalid_asdu_static("CP24Time2a too short"));
        }
        Ok(Self {
            millis: bytes[0] as u16 | ((bytes[1] as u16) << 8),
            minutes: bytes[2] & 0x3F,
            invalid: (bytes[2] & 0x80) != 0,
        })
    }

    /// Encode to 3 bytes.
    pub const fn to_bytes(&self) -> [u8; 3] {
        [
            (self.millis & 0xFF) as u8,
            ((self.millis >> 8) & 0xFF) as u8,
            (self.minutes & 0x3F) | if self.invalid { 0x80 } else { 0 },
        ]
    }

    /// Complete to a full timestamp using `base` for the missing date/hour.
    pub fn to_naive(&self, base: NaiveDateTime) -> Option<NaiveDateTime> {
        base.date().and_hms_milli_opt(
            base.hour(),
            self.minutes as u32,
            (self.millis / 1000) as u32,
            (self.millis % 1000) as u32,
        )
    }
}

/// ASDU header (type, VSQ, cause octet, originator, common address).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsduHeader {
    /// Type identification
    pub typ: Typ,
    /// Variable structure qualifier
    pub vsq: Vsq,
    /// Cause of transmission
    pub cause: Cause,
    /// T flag (test ASDU)
    pub test: bool,
    /// P/N flag (negative confirmation)
    pub negative: bool,
    /// Originator address
    pub originator: u8,
    /// Common address of ASDU (2 bytes on the wire)
    pub common_address: u16,
}

impl AsduHeader {
    #[inline]
    pub const fn new(typ: Typ, count: u8, cause: Cause, common_address: u16) -> Self {
        Self {
            typ,
            vsq: Vsq::new(count, false),
            cause,
            test: false,
            negative: false,
            originator: 0,
            common_address,
        }
    }

    /// Parse the 6-byte header, returning it and the bytes consumed.
    pub fn parse(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < 6 {
            return Err(DatacollError::invalid_asdu_static("ASDU header too short"));
        }
        let typ = Typ(data[0]);
        let vsq = Vsq::from_u8(data[1]);
        let cause = Cause::from_u8(data[2])?;
        let test = (data[2] & 0x80) != 0;
        let negative = (data[2] & 0x40) != 0;
        let originator = data[3];
        let common_address = data[4] as u16 | ((data[5] as u16) << 8);
        Ok((
            Self {
                typ,
                vsq,
                cause,
                test,
                negative,
                originator,
                common_address,
            },
            6,
        ))
    }

    /// Encode the header into `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.typ.as_u8());
        buf.put_u8(self.vsq.as_u8());
        let mut cause_octet = self.cause.as_u8();
        if self.test {
            cause_octet |= 0x80;
        }
        if self.negative {
            cause_octet |= 0x40;
        }
        buf.put_u8(cause_octet);
        buf.put_u8(self.originator);
        buf.put_u16_le(self.common_address);
    }

    #[inline]
    pub const fn encoded_size(&self) -> usize {
        6
    }
}

/// Offset of the qualifier octet (the one carrying the S/E bit) within a
/// command element payload, counted from after the IOA.
const fn qualifier_offset(typ: Typ) -> Option<usize> {
    match typ {
        Typ::C_SC_NA_1 | Typ::C_DC_NA_1 | Typ::C_RC_NA_1 => Some(0),
        Typ::C_SE_NA_1 | Typ::C_SE_NB_1 => Some(2),
        Typ::C_SE_NC_1 | Typ::C_SE_TC_1 => Some(4),
        _ => None,
    }
}

/// Complete ASDU: header plus the raw information-object section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asdu {
    /// ASDU header
    pub header: AsduHeader,
    /// Information objects as received/encoded (IOA + element payloads)
    pub raw_data: Bytes,
}

impl Asdu {
    /// Create an ASDU with no information objects.
    pub fn new(header: AsduHeader) -> Self {
        Self {
            header,
            raw_data: Bytes::new(),
        }
    }

    /// Create an ASDU with a single information object.
    pub fn with_object(header: AsduHeader, ioa: Ioa, payload: &[u8]) -> Self {
        let mut buf = BytesMut::with_capacity(IOA_SIZE + payload.len());
        buf.put_slice(&ioa.to_bytes());
        buf.put_slice(payload);
        Self {
            header,
            raw_data: buf.freeze(),
        }
    }

    /// General (station) interrogation command, QOI = 20.
    pub fn interrogation_command(common_address: u16) -> Self {
        Self::with_object(
            AsduHeader::new(Typ::C_IC_NA_1, 1, Cause::Act, common_address),
            Ioa::new(0),
            &[20],
        )
    }

    /// Counter interrogation command, QCC = request group general.
    pub fn counter_interrogation(common_address: u16) -> Self {
        Self::with_object(
            AsduHeader::new(Typ::C_CI_NA_1, 1, Cause::Act, common_address),
            Ioa::new(0),
            &[0x05],
        )
    }

    /// Clock synchronization command carrying `time`.
    pub fn clock_sync(common_address: u16, time: Cp56Time2a) -> Self {
        Self::with_object(
            AsduHeader::new(Typ::C_CS_NA_1, 1, Cause::Act, common_address),
            Ioa::new(0),
            &time.to_bytes(),
        )
    }

    /// Read command for a single data point.
    pub fn read_command(common_address: u16, ioa: Ioa) -> Self {
        Self::with_object(
            AsduHeader::new(Typ::C_RD_NA_1, 1, Cause::Act, common_address),
            ioa,
            &[],
        )
    }

    /// Single command. SCO bit 0 = state, bit 7 = S/E.
    pub fn single_command(common_address: u16, ioa: Ioa, on: bool, select: bool) -> Self {
        let sco = if on { 0x01 } else { 0x00 } | if select { 0x80 } else { 0x00 };
        Self::with_object(
            AsduHeader::new(Typ::C_SC_NA_1, 1, Cause::Act, common_address),
            ioa,
            &[sco],
        )
    }

    /// Double command. DCO bits 0-1 = state (1 = OFF, 2 = ON), bit 7 = S/E.
    pub fn double_command(common_address: u16, ioa: Ioa, state: u8, select: bool) -> Self {
        let dco = (state & 0x03) | if select { 0x80 } else { 0x00 };
        Self::with_object(
            AsduHeader::new(Typ::C_DC_NA_1, 1, Cause::Act, common_address),
            ioa,
            &[dco],
        )
    }

    /// Set-point command, normalized value in [-1.0, 1.0).
    pub fn setpoint_normalized(common_address: u16, ioa: Ioa, value: f32, select: bool) -> Self {
        let nva = (value.clamp(-1.0, 1.0 - 1.0 / 32768.0) * 32768.0) as i16;
        let qos = if select { 0x80 } else { 0x00 };
        let bytes = nva.to_le_bytes();
        Self::with_object(
            AsduHeader::new(Typ::C_SE_NA_1, 1, Cause::Act, common_address),
            ioa,
            &[bytes[0], bytes[1], qos],
        )
    }

    /// Set-point command, scaled value.
    pub fn setpoint_scaled(common_address: u16, ioa: Ioa, value: i16, select: bool) -> Self {
        let qos = if select { 0x80 } else { 0x00 };
        let bytes = value.to_le_bytes();
        Self::with_object(
            AsduHeader::new(Typ::C_SE_NB_1, 1, Cause::Act, common_address),
            ioa,
            &[bytes[0], bytes[1], qos],
        )
    }

    /// Set-point command, short floating point.
    pub fn setpoint_float(common_address: u16, ioa: Ioa, value: f32, select: bool) -> Self {
        let qos = if select { 0x80 } else { 0x00 };
        let v = value.to_le_bytes();
        Self::with_object(
            AsduHeader::new(Typ::C_SE_NC_1, 1, Cause::Act, common_address),
            ioa,
            &[v[0], v[1], v[2], v[3], qos],
        )
    }

    /// Build a control command of the given TYP from a dynamic value.
    ///
    /// Used for operator `ctrl` requests where the TYP comes from the item's
    /// configured `code_type`.
    pub fn control_command(
        typ: Typ,
        common_address: u16,
        ioa: Ioa,
        value: f64,
        select: bool,
    ) -> Result<Self> {
        match typ {
            Typ::C_SC_NA_1 => Ok(Self::single_command(common_address, ioa, value != 0.0, select)),
            Typ::C_DC_NA_1 => Ok(Self::double_command(common_address, ioa, value as u8, select)),
            Typ::C_SE_NA_1 => Ok(Self::setpoint_normalized(
                common_address,
                ioa,
                value as f32,
                select,
            )),
            Typ::C_SE_NB_1 => Ok(Self::setpoint_scaled(common_address, ioa, value as i16, select)),
            Typ::C_SE_NC_1 => Ok(Self::setpoint_float(common_address, ioa, value as f32, select)),
            other => Err(DatacollError::invalid_asdu(format!(
                "{} is not a supported control type",
                other
            ))),
        }
    }

    /// Parse an ASDU from the bytes following the APCI.
    pub fn parse(data: Bytes) -> Result<Self> {
        let (header, header_len) = AsduHeader::parse(data.as_ref())?;
        Ok(Self {
            header,
            raw_data: data.slice(header_len..),
        })
    }

    /// Encode into `buf`.
    pub fn encode_to(&self, buf: &mut BytesMut) {
        self.header.encode(buf);
        buf.put_slice(&self.raw_data);
    }

    /// Encoded length.
    #[inline]
    pub fn encoded_len(&self) -> usize {
        self.header.encoded_size() + self.raw_data.len()
    }

    /// IOA of the first information object, if present.
    pub fn first_ioa(&self) -> Option<Ioa> {
        if self.raw_data.len() < IOA_SIZE {
            return None;
        }
        Some(Ioa::from_array([
            self.raw_data[0],
            self.raw_data[1],
            self.raw_data[2],
        ]))
    }

    /// S/E bit of the first command element; None for non-command types.
    pub fn select_flag(&self) -> Option<bool> {
        let offset = IOA_SIZE + qualifier_offset(self.header.typ)?;
        self.raw_data.get(offset).map(|octet| octet & 0x80 != 0)
    }

    /// Turn an acknowledged select command into its execute phase: cause
    /// becomes `act`, the S/E bit is cleared. None when this ASDU carries no
    /// select bit.
    pub fn to_execute(&self) -> Option<Asdu> {
        let offset = IOA_SIZE + qualifier_offset(self.header.typ)?;
        if self.raw_data.len() <= offset {
            return None;
        }
        let mut data = BytesMut::from(self.raw_data.as_ref());
        data[offset] &= 0x7F;
        let mut header = self.header;
        header.cause = Cause::Act;
        header.test = false;
        header.negative = false;
        Some(Asdu {
            header,
            raw_data: data.freeze(),
        })
    }
}
