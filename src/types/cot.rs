//! IEC 60870-5-104 Cause of Transmission.

use crate::error::{DatacollError, Result};

/// Cause of Transmission (lower 6 bits of the COT octet).
///
/// Group interrogation/counter causes (21..=36, 38..=41) are accepted on
/// decode but carry their group number instead of getting one variant each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cause {
    /// Periodic, cyclic (1)
    Per,
    /// Background scan (2)
    Back,
    /// Spontaneous (3)
    Spont,
    /// Initialized (4)
    Init,
    /// Request or requested (5)
    Req,
    /// Activation (6)
    Act,
    /// Activation confirmation (7)
    ActCon,
    /// Deactivation (8)
    Deact,
    /// Deactivation confirmation (9)
    DeactCon,
    /// Activation termination (10)
    ActTerm,
    /// Return information caused by a remote command (11)
    RetRem,
    /// Return information caused by a local command (12)
    RetLoc,
    /// File transfer (13)
    File,
    /// Interrogated by station interrogation (20)
    Introgen,
    /// Interrogated by group interrogation 1..=16 (21..=36)
    IntroGroup(u8),
    /// Requested by general counter request (37)
    Reqcogen,
    /// Requested by group counter request 1..=4 (38..=41)
    ReqcoGroup(u8),
    /// Unknown type identification (44)
    UnknownTyp,
    /// Unknown cause of transmission (45)
    UnknownCause,
    /// Unknown common address of ASDU (46)
    UnknownCommonAddr,
    /// Unknown information object address (47)
    UnknownIoa,
}

impl Cause {
    /// Parse from the COT octet (upper two bits are T/PN flags, masked off).
    #[inline]
    pub fn from_u8(value: u8) -> Result<Self> {
        match value & 0x3F {
            1 => Ok(Self::Per),
            2 => Ok(Self::Back),
            3 => Ok(Self::Spont),
            4 => Ok(Self::Init),
            5 => Ok(Self::Req),
            6 => Ok(Self::Act),
            7 => Ok(Self::ActCon),
            8 => Ok(Self::Deact),
            9 => Ok(Self::DeactCon),
            10 => Ok(Self::ActTerm),
            11 => Ok(Self::RetRem),
            12 => Ok(Self::RetLoc),
            13 => Ok(Self::File),
            20 => Ok(Self::Introgen),
            g @ 21..=36 => Ok(Self::IntroGroup(g - 20)),
            37 => Ok(Self::Reqcogen),
            g @ 38..=41 => Ok(Self::ReqcoGroup(g - 37)),
            44 => Ok(Self::UnknownTyp),
            45 => Ok(Self::UnknownCause),
            46 => Ok(Self::UnknownCommonAddr),
            47 => Ok(Self::UnknownIoa),
            _ => Err(DatacollError::invalid_asdu_static("Unknown COT")),
        }
    }

    /// Encode to the raw cause value (without T/PN flags).
    #[inline]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Per => 1,
            Self::Back => 2,
            Self::Spont => 3,
            Self::Init => 4,
            Self::Req => 5,
            Self::Act => 6,
            Self::ActCon => 7,
            Self::Deact => 8,
            Self::DeactCon => 9,
            Self::ActTerm => 10,
            Self::RetRem => 11,
            Self::RetLoc => 12,
            Self::File => 13,
            Self::Introgen => 20,
            Self::IntroGroup(g) => 20 + g,
            Self::Reqcogen => 37,
            Self::ReqcoGroup(g) => 37 + g,
            Self::UnknownTyp => 44,
            Self::UnknownCause => 45,
            Self::UnknownCommonAddr => 46,
            Self::UnknownIoa => 47,
        }
    }

    /// True for the negative-confirmation causes (44..=47).
    #[inline]
    pub const fn is_rejection(self) -> bool {
        matches!(
            self,
            Self::UnknownTyp | Self::UnknownCause | Self::UnknownCommonAddr | Self::UnknownIoa
        )
    }
}

impl std::fmt::Display for Cause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Per => f.write_str("per"),
            Self::Back => f.write_str("back"),
            Self::Spont => f.write_str("spont"),
            Self::Init => f.write_str("init"),
            Self::Req => f.write_str("req"),
            Self::Act => f.write_str("act"),
            Self::ActCon => f.write_str("actcon"),
            Self::Deact => f.write_str("deact"),
            Self::DeactCon => f.write_str("deactcon"),
            Self::ActTerm => f.write_str("actterm"),
            Self::RetRem => f.write_str("retrem"),
            Self::RetLoc => f.write_str("retloc"),
            Self::File => f.write_str("file"),
            Self::Introgen => f.write_str("introgen"),
            Self::IntroGroup(g) => write!(f, "inro{}", g),
            Self::Reqcogen => f.write_str("reqcogen"),
            Self::ReqcoGroup(g) => write!(f, "reqco{}", g),
            Self::UnknownTyp => f.write_str("unknown_type"),
            Self::UnknownCause => f.write_str("unknown_cause"),
            Self::UnknownCommonAddr => f.write_str("unknown_common_address"),
            Self::UnknownIoa => f.write_str("unknown_object_address"),
        }
    }
}
