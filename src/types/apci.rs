//! IEC 60870-5-104 APCI (Application Protocol Control Information).
//!
//! The APCI is the 6-byte header of every frame: start byte, length octet,
//! and four control octets. The low two bits of the first control octet
//! discriminate the frame family (I / S / U).

use crate::error::{DatacollError, Result};

/// Start byte for IEC 104 frames.
pub const START_BYTE: u8 = 0x68;

/// Minimum APDU length (control fields only, no ASDU).
pub const MIN_APDU_LENGTH: usize = 4;

/// Maximum APDU length.
pub const MAX_APDU_LENGTH: usize = 253;

/// Sequence numbers are 15-bit, modulo 32768.
pub const SEQ_MODULO: u16 = 32768;

/// U-frame actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UFrame {
    /// STARTDT act
    StartDtAct,
    /// STARTDT con
    StartDtCon,
    /// STOPDT act
    StopDtAct,
    /// STOPDT con
    StopDtCon,
    /// TESTFR act
    TestFrAct,
    /// TESTFR con
    TestFrCon,
}

impl UFrame {
    /// Control field byte for this action (one bit in the upper six).
    pub const fn control_byte(self) -> u8 {
        match self {
            Self::StartDtAct => 0x07,
            Self::StartDtCon => 0x0B,
            Self::StopDtAct => 0x13,
            Self::StopDtCon => 0x23,
            Self::TestFrAct => 0x43,
            Self::TestFrCon => 0x83,
        }
    }

    /// Parse a U-frame action from the first control byte.
    pub fn from_control_byte(byte: u8) -> Result<Self> {
        match byte {
            0x07 => Ok(Self::StartDtAct),
            0x0B => Ok(Self::StartDtCon),
            0x13 => Ok(Self::StopDtAct),
            0x23 => Ok(Self::StopDtCon),
            0x43 => Ok(Self::TestFrAct),
            0x83 => Ok(Self::TestFrCon),
            _ => Err(DatacollError::invalid_frame(format!(
                "Unknown U-frame action: 0x{:02X}",
                byte
            ))),
        }
    }

    /// True for the activation half of the action pair.
    ///
    /// Acts we originate (STARTDT act, TESTFR act) require a confirmation
    /// and therefore enter the outstanding-command queue and arm T1.
    pub const fn is_act(self) -> bool {
        matches!(self, Self::StartDtAct | Self::StopDtAct | Self::TestFrAct)
    }

    /// The confirmation that answers this act, if this is an act.
    pub const fn confirmation(self) -> Option<UFrame> {
        match self {
            Self::StartDtAct => Some(Self::StartDtCon),
            Self::StopDtAct => Some(Self::StopDtCon),
            Self::TestFrAct => Some(Self::TestFrCon),
            _ => None,
        }
    }
}

/// Decoded control fields of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Apci {
    /// I-frame: numbered information transfer, carries an ASDU.
    I {
        /// Send sequence number (0..32768)
        ssn: u16,
        /// Receive sequence number (0..32768)
        rsn: u16,
    },
    /// S-frame: supervisory acknowledgment.
    S {
        /// Receive sequence number (0..32768)
        rsn: u16,
    },
    /// U-frame: unnumbered control.
    U(UFrame),
}

impl Apci {
    /// Parse the four control octets.
    pub fn parse(control: &[u8]) -> Result<Self> {
        if control.len() < 4 {
            return Err(DatacollError::invalid_frame_static("Control field too short"));
        }

        let cf1 = control[0];
        if cf1 & 0x01 == 0 {
            // I-frame: the two 16-bit LE words hold ssn << 1 and rsn << 1
            let ssn = ((control[1] as u16) << 7) | ((cf1 >> 1) as u16);
            let rsn = ((control[3] as u16) << 7) | ((control[2] >> 1) as u16);
            Ok(Self::I { ssn, rsn })
        } else if cf1 & 0x03 == 0x01 {
            let rsn = ((control[3] as u16) << 7) | ((control[2] >> 1) as u16);
            Ok(Self::S { rsn })
        } else {
            Ok(Self::U(UFrame::from_control_byte(cf1)?))
        }
    }

    /// Encode to four control octets.
    pub fn encode(&self) -> [u8; 4] {
        match self {
            Self::I { ssn, rsn } => [
                ((ssn & 0x7F) << 1) as u8,
                (ssn >> 7) as u8,
                ((rsn & 0x7F) << 1) as u8,
                (rsn >> 7) as u8,
            ],
            Self::S { rsn } => [0x01, 0x00, ((rsn & 0x7F) << 1) as u8, (rsn >> 7) as u8],
            Self::U(action) => [action.control_byte(), 0x00, 0x00, 0x00],
        }
    }

    /// Encode the full 6-byte header (start + length + control fields).
    ///
    /// `asdu_len` is the length of the ASDU that follows (0 for S/U frames).
    pub fn encode_header(&self, asdu_len: usize) -> [u8; 6] {
        let control = self.encode();
        let apdu_len = (4 + asdu_len) as u8;
        [
            START_BYTE,
            apdu_len,
            control[0],
            control[1],
            control[2],
            control[3],
        ]
    }

    /// Receive sequence number carried by I- and S-frames.
    pub fn rsn(&self) -> Option<u16> {
        match self {
            Self::I { rsn, .. } | Self::S { rsn } => Some(*rsn),
            Self::U(_) => None,
        }
    }
}

impl std::fmt::Display for Apci {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::I { ssn, rsn } => write!(f, "I(S={}, R={})", ssn, rsn),
            Self::S { rsn } => write!(f, "S(R={})", rsn),
            Self::U(action) => {
                let name = match action {
                    UFrame::StartDtAct => "STARTDT act",
                    UFrame::StartDtCon => "STARTDT con",
                    UFrame::StopDtAct => "STOPDT act",
                    UFrame::StopDtCon => "STOPDT con",
                    UFrame::TestFrAct => "TESTFR act",
                    UFrame::TestFrCon => "TESTFR con",
                };
                write!(f, "U({})", name)
            }
        }
    }
}
