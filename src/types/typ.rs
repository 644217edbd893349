//! IEC 60870-5-104 Type Identification (TYP).
//!
//! The TYP octet selects the structure and meaning of the information
//! objects in an ASDU. The gateway routes a fixed set of types and passes
//! everything else through as opaque (logged and skipped), so TYP is kept
//! as a transparent newtype with named constants rather than a closed enum.

/// ASDU type identification octet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Typ(pub u8);

impl Typ {
    // Process information, monitoring direction
    /// Single-point information
    pub const M_SP_NA_1: Typ = Typ(1);
    /// Single-point information with CP24Time2a
    pub const M_SP_TA_1: Typ = Typ(2);
    /// Double-point information
    pub const M_DP_NA_1: Typ = Typ(3);
    /// Measured value, normalized
    pub const M_ME_NA_1: Typ = Typ(9);
    /// Measured value, normalized with CP24Time2a
    pub const M_ME_TA_1: Typ = Typ(10);
    /// Measured value, scaled
    pub const M_ME_NB_1: Typ = Typ(11);
    /// Measured value, short floating point
    pub const M_ME_NC_1: Typ = Typ(13);
    /// Integrated totals
    pub const M_IT_NA_1: Typ = Typ(15);
    /// Single-point information with CP56Time2a
    pub const M_SP_TB_1: Typ = Typ(30);
    /// Double-point information with CP56Time2a
    pub const M_DP_TB_1: Typ = Typ(31);
    /// Measured value, normalized with CP56Time2a
    pub const M_ME_TD_1: Typ = Typ(34);
    /// Measured value, short floating point with CP56Time2a
    pub const M_ME_TF_1: Typ = Typ(36);
    /// Integrated totals with CP56Time2a
    pub const M_IT_TB_1: Typ = Typ(37);
    /// Event of protection equipment with CP56Time2a (upper bound of the
    /// monitored-measurement range)
    pub const M_EP_TD_1: Typ = Typ(38);

    // Process information, control direction
    /// Single command
    pub const C_SC_NA_1: Typ = Typ(45);
    /// Double command
    pub const C_DC_NA_1: Typ = Typ(46);
    /// Regulating step command
    pub const C_RC_NA_1: Typ = Typ(47);
    /// Set-point command, normalized
    pub const C_SE_NA_1: Typ = Typ(48);
    /// Set-point command, scaled
    pub const C_SE_NB_1: Typ = Typ(49);
    /// Set-point command, short floating point
    pub const C_SE_NC_1: Typ = Typ(50);
    /// Set-point command, short floating point with CP56Time2a (upper bound
    /// of the command range)
    pub const C_SE_TC_1: Typ = Typ(63);

    // System information, control direction
    /// General (station) interrogation command
    pub const C_IC_NA_1: Typ = Typ(100);
    /// Counter interrogation command
    pub const C_CI_NA_1: Typ = Typ(101);
    /// Read command
    pub const C_RD_NA_1: Typ = Typ(102);
    /// Clock synchronization command
    pub const C_CS_NA_1: Typ = Typ(103);

    /// Raw octet value.
    #[inline(always)]
    pub const fn as_u8(self) -> u8 {
        self.0
    }

    /// Monitored-measurement range `M_SP_NA_1..=M_EP_TD_1`.
    #[inline]
    pub const fn is_monitored(self) -> bool {
        self.0 >= Self::M_SP_NA_1.0 && self.0 <= Self::M_EP_TD_1.0
    }

    /// Process-command range `C_SC_NA_1..=C_SE_TC_1`.
    #[inline]
    pub const fn is_process_command(self) -> bool {
        self.0 >= Self::C_SC_NA_1.0 && self.0 <= Self::C_SE_TC_1.0
    }

    /// True for types carrying a CP56Time2a element suffix.
    #[inline]
    pub const fn has_cp56(self) -> bool {
        matches!(
            self,
            Self::M_SP_TB_1 | Self::M_DP_TB_1 | Self::M_ME_TD_1 | Self::M_ME_TF_1 | Self::M_IT_TB_1
        )
    }

    /// IEC standard mnemonic, or None for types the gateway does not name.
    pub const fn mnemonic(self) -> Option<&'static str> {
        Some(match self {
            Self::M_SP_NA_1 => "M_SP_NA_1",
            Self::M_SP_TA_1 => "M_SP_TA_1",
            Self::M_DP_NA_1 => "M_DP_NA_1",
            Self::M_ME_NA_1 => "M_ME_NA_1",
            Self::M_ME_TA_1 => "M_ME_TA_1",
            Self::M_ME_NB_1 => "M_ME_NB_1",
            Self::M_ME_NC_1 => "M_ME_NC_1",
            Self::M_IT_NA_1 => "M_IT_NA_1",
            Self::M_SP_TB_1 => "M_SP_TB_1",
            Self::M_DP_TB_1 => "M_DP_TB_1",
            Self::M_ME_TD_1 => "M_ME_TD_1",
            Self::M_ME_TF_1 => "M_ME_TF_1",
            Self::M_IT_TB_1 => "M_IT_TB_1",
            Self::C_SC_NA_1 => "C_SC_NA_1",
            Self::C_DC_NA_1 => "C_DC_NA_1",
            Self::C_RC_NA_1 => "C_RC_NA_1",
            Self::C_SE_NA_1 => "C_SE_NA_1",
            Self::C_SE_NB_1 => "C_SE_NB_1",
            Self::C_SE_NC_1 => "C_SE_NC_1",
            Self::C_SE_TC_1 => "C_SE_TC_1",
            Self::C_IC_NA_1 => "C_IC_NA_1",
            Self::C_CI_NA_1 => "C_CI_NA_1",
            Self::C_RD_NA_1 => "C_RD_NA_1",
            Self::C_CS_NA_1 => "C_CS_NA_1",
            _ => return None,
        })
    }
}

impl From<u8> for Typ {
    #[inline]
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for Typ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.mnemonic() {
            Some(name) => f.write_str(name),
            None => write!(f, "TYP({})", self.0),
        }
    }
}
