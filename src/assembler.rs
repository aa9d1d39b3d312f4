use heapless::Vec;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{CHUNK_SIZE, FRAME_BUFFER_CAPACITY};

/// Longest display text per row.
pub const MAX_ROW_LENGTH: usize = 10;
/// Fill character for unused row positions.
const TEXT_PLACEHOLDER: u8 = b'.';

const ROW_HEADER_LENGTH: usize = 7;
const ROW_HEADER_START: u8 = 0x57;
const ROW_HEADER_MODE_OVERWRITE: u8 = 0x03;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AssembleError {
    #[error("display frame exceeds the communication buffer")]
    BufferFull,
    #[error("row text of {0} bytes exceeds the display width")]
    RowTooLong(usize),
    #[error("cannot rebuild the buffer while chunks are being streamed")]
    BuildWhileStreaming,
    #[error("lead byte {0:#04x} carries no known chunk marker")]
    InvalidMarker(u8),
}

/// High nibble of every chunk's lead byte. The low nibble carries the
/// 4-bit chunk sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[num_enum(error_type(name = AssembleError, constructor = AssembleError::InvalidMarker))]
#[repr(u8)]
pub enum ChunkMarker {
    /// Final chunk of the display frame.
    EndOfFrame = 0x1,
    /// More chunks follow; the peer must acknowledge before the next one.
    MoreData = 0x2,
    /// Mid-sequence lead byte in the cluster's own multi-segment patterns.
    /// Accepted on decode; the two-row layout here never stamps it.
    WaitForNext = 0x0,
}

impl ChunkMarker {
    /// Combines the marker with a sequence number into a lead byte.
    pub fn encode(self, sequence: u8) -> u8 {
        (u8::from(self) << 4) | (sequence & 0x0F)
    }

    pub fn from_lead_byte(byte: u8) -> Result<Self, AssembleError> {
        Self::try_from(byte >> 4).map_err(|_| AssembleError::InvalidMarker(byte))
    }
}

/// Fixed byte sequences the cluster expects around the row data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TemplateSegment {
    /// Frame opener, includes the audio source tag.
    Start,
    /// Display format selection.
    Format,
    /// Frame closer.
    Stop,
}

/// Source of the fixed template segments. Kept behind a trait so a build
/// can substitute cluster-variant templates without touching the assembler.
pub trait TemplateStore {
    fn read_template(&self, segment: TemplateSegment) -> &[u8];
}

const TEMPLATE_START: [u8; 9] = [0x02, 0x80, 0x39, 0x20, 0x41, 0x55, 0x44, 0x49, 0x4F];
const TEMPLATE_FORMAT: [u8; 8] = [0x09, 0x02, 0x57, 0x0B, 0x03, 0x21, 0x00, 0x00];
const TEMPLATE_STOP: [u8; 1] = [0x08];

/// Templates for the stock cluster firmware.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinTemplates;

impl TemplateStore for BuiltinTemplates {
    fn read_template(&self, segment: TemplateSegment) -> &[u8] {
        match segment {
            TemplateSegment::Start => &TEMPLATE_START,
            TemplateSegment::Format => &TEMPLATE_FORMAT,
            TemplateSegment::Stop => &TEMPLATE_STOP,
        }
    }
}

/// One 8-byte slice of the communication buffer, ready to transmit.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Chunk {
    data: [u8; CHUNK_SIZE],
    len: usize,
}

impl Chunk {
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn marker(&self) -> Result<ChunkMarker, AssembleError> {
        ChunkMarker::from_lead_byte(self.data[0])
    }

    pub fn sequence(&self) -> u8 {
        self.data[0] & 0x0F
    }

    pub fn is_last(&self) -> bool {
        matches!(self.marker(), Ok(ChunkMarker::EndOfFrame))
    }
}

/// Builds complete display frames for the cluster and hands them out again
/// as 8-byte chunks.
///
/// `build` lays out the whole frame up front, reserving the lead byte of
/// every chunk as it crosses each 8-byte boundary; the markers and sequence
/// numbers are stamped once the total length is known. `next_chunk` then
/// walks the buffer under the link protocol's pacing.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buf: Vec<u8, FRAME_BUFFER_CAPACITY>,
    cursor: usize,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lays out a two-row display frame. Fails if a previous frame is still
    /// being streamed, so a half-sent frame is never clobbered.
    pub fn build<S: TemplateStore>(
        &mut self,
        templates: &S,
        row1: &[u8],
        row2: &[u8],
    ) -> Result<(), AssembleError> {
        if self.cursor != 0 {
            return Err(AssembleError::BuildWhileStreaming);
        }

        self.buf.clear();

        self.append(templates.read_template(TemplateSegment::Start))?;
        self.append(templates.read_template(TemplateSegment::Format))?;
        self.append_row(0, row1)?;
        self.append_row(1, row2)?;
        self.append(templates.read_template(TemplateSegment::Stop))?;

        self.stamp_lead_bytes();

        Ok(())
    }

    /// Hands out the next chunk, or `None` once the buffer is drained. The
    /// cursor resets after the last chunk so the same buffer can be
    /// re-streamed on a link restart.
    pub fn next_chunk(&mut self) -> Option<Chunk> {
        let remaining = self.buf.len().checked_sub(self.cursor)?;
        if remaining == 0 {
            return None;
        }

        let last = remaining <= CHUNK_SIZE;
        let len = if last { remaining } else { CHUNK_SIZE };

        let mut data = [0u8; CHUNK_SIZE];
        data[..len].copy_from_slice(&self.buf[self.cursor..self.cursor + len]);

        if last {
            self.cursor = 0;
        } else {
            self.cursor += CHUNK_SIZE;
        }

        Some(Chunk { data, len })
    }

    /// Abandons an in-flight stream; the built frame stays available.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Total chunks the current buffer splits into.
    pub fn chunk_count(&self) -> usize {
        self.buf.len().div_ceil(CHUNK_SIZE)
    }

    fn append(&mut self, bytes: &[u8]) -> Result<(), AssembleError> {
        for byte in bytes {
            self.push(*byte)?;
        }
        Ok(())
    }

    fn append_row(&mut self, row: u8, text: &[u8]) -> Result<(), AssembleError> {
        if text.len() > MAX_ROW_LENGTH {
            return Err(AssembleError::RowTooLong(text.len()));
        }

        let header: [u8; ROW_HEADER_LENGTH] = [
            ROW_HEADER_START,
            MAX_ROW_LENGTH as u8,
            ROW_HEADER_MODE_OVERWRITE,
            0x00,
            0x00,
            row * 0x0A,
            0x00,
        ];
        self.append(&header)?;

        self.append(text)?;
        for _ in text.len()..MAX_ROW_LENGTH {
            self.push(TEXT_PLACEHOLDER)?;
        }

        Ok(())
    }

    /// Pushes a payload byte, reserving a lead-byte slot at every chunk
    /// boundary.
    fn push(&mut self, byte: u8) -> Result<(), AssembleError> {
        if self.buf.len() % CHUNK_SIZE == 0 {
            self.buf.push(0).map_err(|_| AssembleError::BufferFull)?;
        }
        self.buf.push(byte).map_err(|_| AssembleError::BufferFull)
    }

    fn stamp_lead_bytes(&mut self) {
        let chunks = self.chunk_count();

        for index in 0..chunks {
            let marker = if index + 1 == chunks {
                ChunkMarker::EndOfFrame
            } else {
                ChunkMarker::MoreData
            };
            self.buf[index * CHUNK_SIZE] = marker.encode(index as u8);
        }
    }
}
