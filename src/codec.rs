//! Tokio codec for IEC 60870-5-104 framing.
//!
//! Splits the TCP byte stream on `0x68 LEN` boundaries and decodes each
//! frame into a typed [`Frame`]; encodes typed frames back to wire bytes.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::DatacollError;
use crate::types::{Apci, Asdu, MAX_APDU_LENGTH, MIN_APDU_LENGTH, START_BYTE};

/// A decoded IEC 104 frame: control fields plus the ASDU for I-frames.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Control fields
    pub apci: Apci,
    /// ASDU payload, present exactly for I-frames
    pub asdu: Option<Asdu>,
}

impl Frame {
    /// I-frame carrying `asdu`. Sequence numbers are stamped by the send
    /// path, so they start at zero here.
    pub fn i(asdu: Asdu) -> Self {
        Self {
            apci: Apci::I { ssn: 0, rsn: 0 },
            asdu: Some(asdu),
        }
    }

    /// S-frame; `rsn` is stamped by the send path.
    pub fn s() -> Self {
        Self {
            apci: Apci::S { rsn: 0 },
            asdu: None,
        }
    }

    /// U-frame with the given action.
    pub fn u(action: crate::types::UFrame) -> Self {
        Self {
            apci: Apci::U(action),
            asdu: None,
        }
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.apci)?;
        if let Some(asdu) = &self.asdu {
            write!(
                f,
                " [{}] cause={} ca={}",
                asdu.header.typ, asdu.header.cause, asdu.header.common_address
            )?;
        }
        Ok(())
    }
}

/// IEC 60870-5-104 codec.
#[derive(Debug, Clone, Default)]
pub struct Iec104Codec {
    state: DecodeState,
}

#[derive(Debug, Clone, Default)]
enum DecodeState {
    #[default]
    Start,
    Length,
    Body {
        length: usize,
    },
}

impl Iec104Codec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for Iec104Codec {
    type Item = Frame;
    type Error = DatacollError;

    fn decode(&mut self, src: &mut BytesMut) -> std::result::Result<Option<Frame>, DatacollError> {
        loop {
            match &self.state {
                DecodeState::Start => {
                    // Resynchronize on the start byte
                    while !src.is_empty() && src[0] != START_BYTE {
                        src.advance(1);
                    }
                    if src.is_empty() {
                        return Ok(None);
                    }
                    self.state = DecodeState::Length;
                }

                DecodeState::Length => {
                    if src.len() < 2 {
                        return Ok(None);
                    }
                    let length = src[1] as usize;
                    if !(MIN_APDU_LENGTH..=MAX_APDU_LENGTH).contains(&length) {
                        // Corrupt length octet: drop the start byte and resync
                        src.advance(1);
                        self.state = DecodeState::Start;
                        continue;
                    }
                    self.state = DecodeState::Body { length };
                }

                DecodeState::Body { length } => {
                    let total = 2 + length;
                    if src.len() < total {
                        return Ok(None);
                    }

                    let frame = src.split_to(total).freeze();
                    self.state = DecodeState::Start;

                    let apci = Apci::parse(&frame[2..6])?;
                    let body_len = frame.len() - 6;
                    let asdu = match apci {
                        Apci::I { .. } => {
                            if body_len == 0 {
                                return Err(DatacollError::invalid_frame_static(
                                    "I-frame without ASDU",
                                ));
                            }
                            Some(Asdu::parse(frame.slice(6..))?)
                        }
                        Apci::S { .. } | Apci::U(_) => {
                            if body_len != 0 {
                                return Err(DatacollError::invalid_frame_static(
                                    "S/U frame with trailing bytes",
                                ));
                            }
                            None
                        }
                    };

                    return Ok(Some(Frame { apci, asdu }));
                }
            }
        }
    }
}

impl Encoder<Frame> for Iec104Codec {
    type Error = DatacollError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> std::result::Result<(), DatacollError> {
        let asdu_len = item.asdu.as_ref().map(|a| a.encoded_len()).unwrap_or(0);
        if asdu_len > MAX_APDU_LENGTH - 4 {
            return Err(DatacollError::Codec("ASDU too large".into()));
        }

        dst.reserve(6 + asdu_len);
        dst.extend_from_slice(&item.apci.encode_header(asdu_len));
        if let Some(asdu) = &item.asdu {
            asdu.encode_to(dst);
        }
        Ok(())
    }
}
