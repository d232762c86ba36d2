//! Wire framing and payload decoding for the vendor protocol.
//!
//! Response frames look like
//! `[0xDD][type][len/flags][reserved][payload..][checksum:2][0x77]` and
//! arrive arbitrarily fragmented over the notify channel. [`FrameAssembler`]
//! turns the raw chunk stream back into candidate frames; [`decode_frame`]
//! validates a candidate and decodes its payload.

use crate::{
    profile::Profile,
    types::{CellVoltages, PackStatus, Record},
    utils::{checksum, i16be_to_value, u16be_to_count, u16be_to_value},
    Error, Result,
};

/// Frame start marker
pub const FRAME_START: u8 = 0xdd;
/// Frame end marker
pub const FRAME_END: u8 = 0x77;
/// Command byte of a read request
pub const READ_REQUEST: u8 = 0xa5;

/// 4-byte header plus 3-byte footer around an empty payload
pub const MIN_FRAME_LEN: usize = 7;
const HEADER_LEN: usize = 4;
const FOOTER_LEN: usize = 3;

/// Volts per raw millivolt count of a cell-voltage field
const CELL_SCALE: f32 = 1e-3;
/// Temperature bytes are biased by +40 on the wire
const TEMP_BIAS: f32 = 40.0;

/// Frame payload kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Pack-level status record
    PackStatus = 0x03,
    /// Per-cell voltage record
    CellVoltages = 0x04,
}

impl TryFrom<u8> for FrameKind {
    type Error = Error;

    fn try_from(raw: u8) -> Result<Self> {
        Ok(match raw {
            0x03 => Self::PackStatus,
            0x04 => Self::CellVoltages,
            _ => return Err(Error::UnknownFrameKind(raw)),
        })
    }
}

/// Build the read command for one register.
///
/// Reproduces the vendor's literal sequences, e.g. register 0x04 gives
/// `DD A5 04 00 FF FC 77`.
pub fn read_command(kind: FrameKind) -> [u8; MIN_FRAME_LEN] {
    let register = kind as u8;
    let [hi, lo] = checksum([register, 0x00]).to_be_bytes();
    [FRAME_START, READ_REQUEST, register, 0x00, hi, lo, FRAME_END]
}

/// Per-device reassembly buffer for the fragmented notify stream.
///
/// Bytes are appended as they arrive; complete candidate frames are taken out
/// with [`next_frame`](Self::next_frame). The buffer is owned by exactly one
/// session and never shared.
#[derive(Debug)]
pub struct FrameAssembler {
    buffer: Vec<u8>,
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameAssembler {
    pub fn new() -> Self {
        let buffer = Vec::with_capacity(512);
        Self { buffer }
    }

    /// Append one chunk received from the notify channel
    pub fn extend(&mut self, chunk: impl AsRef<[u8]>) {
        self.buffer.extend_from_slice(chunk.as_ref());
    }

    /// Extract the next complete candidate frame, if any.
    ///
    /// Garbage before the start marker is discarded together with the frame.
    /// When no start marker exists the whole buffer is dropped; a started but
    /// unterminated frame stays buffered for the next chunk. Candidates
    /// shorter than [`MIN_FRAME_LEN`] are still yielded; rejecting them is the
    /// decoder's job.
    ///
    /// An end-marker byte inside a payload is indistinguishable from a true
    /// terminator since the wire protocol has no escaping. Such false
    /// terminations surface as decode errors and the stream recovers on the
    /// next poll.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        let start = match self.buffer.iter().position(|byte| *byte == FRAME_START) {
            Some(start) => start,
            None => {
                self.buffer.clear();
                return None;
            }
        };
        let end = start
            + 1
            + self.buffer[start + 1..]
                .iter()
                .position(|byte| *byte == FRAME_END)?;
        let frame = self.buffer[start..=end].to_vec();
        self.buffer.drain(..=end);
        Some(frame)
    }
}

/// Validate a candidate frame and decode its payload.
///
/// The offset/scale table of `profile` selects the firmware revision; see
/// [`crate::Revision`].
pub fn decode_frame(frame: &[u8], profile: &Profile) -> Result<Record> {
    if frame.len() < MIN_FRAME_LEN {
        return Err(Error::ShortFrame(frame.len()));
    }
    if frame[0] != FRAME_START || frame[frame.len() - 1] != FRAME_END {
        return Err(Error::BadMarker);
    }
    let kind = FrameKind::try_from(frame[1])?;

    if profile.verify_checksum {
        let computed = checksum(&frame[2..frame.len() - FOOTER_LEN]);
        let embedded = u16::from_be_bytes([frame[frame.len() - 3], frame[frame.len() - 2]]);
        if embedded != computed {
            return Err(Error::BadChecksum { embedded, computed });
        }
    }

    let payload = &frame[HEADER_LEN..frame.len() - FOOTER_LEN];

    Ok(match kind {
        FrameKind::CellVoltages => Record::CellVoltages(decode_cells(payload)),
        FrameKind::PackStatus => Record::PackStatus(decode_status(payload, profile)?),
    })
}

/// Consecutive big-endian millivolt counters; a trailing odd byte is
/// discarded, not an error.
fn decode_cells(payload: &[u8]) -> CellVoltages {
    let voltages: Vec<f32> = payload
        .chunks_exact(2)
        .map(|raw| u16be_to_value(&[raw[0], raw[1]], CELL_SCALE))
        .collect();
    let total = voltages.iter().sum();
    CellVoltages { voltages, total }
}

fn decode_status(payload: &[u8], profile: &Profile) -> Result<PackStatus> {
    let need = profile.soc_offset + 1;
    if payload.len() < need {
        return Err(Error::TruncatedPayload {
            need,
            have: payload.len(),
        });
    }
    Ok(PackStatus {
        voltage: u16be_to_value(field(payload, 0)?, profile.voltage_scale),
        current: i16be_to_value(field(payload, 2)?, profile.current_scale),
        residual_capacity: u16be_to_value(field(payload, 4)?, profile.capacity_scale),
        nominal_capacity: u16be_to_value(field(payload, 6)?, profile.capacity_scale),
        cycle_count: u16be_to_count(field(payload, 8)?),
        soc: payload[profile.soc_offset],
        temperatures: profile
            .temp_offsets
            .iter()
            .filter_map(|offset| payload.get(*offset))
            .map(|raw| *raw as f32 - TEMP_BIAS)
            .collect(),
    })
}

fn field(payload: &[u8], offset: usize) -> Result<&[u8; 2]> {
    payload
        .get(offset..offset + 2)
        .and_then(|raw| raw.try_into().ok())
        .ok_or(Error::TruncatedPayload {
            need: offset + 2,
            have: payload.len(),
        })
}
