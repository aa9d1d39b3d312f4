use crate::{
    assembler::{AssembleError, ChunkMarker, FrameAssembler},
    frame::{send_with_retry, BusSide, CanFrame, CanTx, TransmitError},
    ids::{
        std_id, CANID_MASTER_CLUSTER_START, CANID_MASTER_CLUSTER_TO_RADIO,
        CANID_MASTER_RADIO_START, CANID_MASTER_RADIO_TO_CLUSTER,
    },
};

/// Payload of the open request on the radio start channel.
const OPEN_REQUEST: [u8; 3] = [0x08, 0xC0, 0xB9];
/// Preamble the cluster expects before any display data.
const PREAMBLE: [u8; 6] = [0xA0, 0x04, 0x54, 0x54, 0x4A, 0xB2];
/// Cluster's first byte acknowledging the open request.
const START_ACK: u8 = 0x39;
/// Cluster's first byte acknowledging the preamble.
const PREAMBLE_ACK: u8 = 0xA1;
/// High nibble of a chunk acknowledge; the low nibble echoes the expected
/// next sequence number.
const ACK_MARKER: u8 = 0xB0;
/// Our acknowledge for the cluster's closing frame.
const CLOSE_ACK: u8 = 0xA8;

/// Polls spent waiting for a cluster answer before the link resets.
pub const LINK_WAIT_LIMIT: u16 = 200;

/// Handshake and streaming phases of the cluster link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkPhase {
    /// No communication in progress.
    #[default]
    Idle,
    /// Open request sent, waiting for the cluster's start acknowledge.
    Start,
    /// Preamble sent, waiting for its acknowledge.
    Preamble,
    /// Streaming chunks, or awaiting the cluster's closing frame.
    Info,
    /// Chunk sent, waiting for the paced acknowledge.
    WaitForCluster,
    /// Closing frame acknowledged, sending the final acknowledge.
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkError {
    #[error("cluster stopped answering in the {0:?} phase")]
    Timeout(LinkPhase),
    #[error("streaming requested with no display frame built")]
    EmptyBuffer,
    #[error(transparent)]
    Chunk(#[from] AssembleError),
    #[error(transparent)]
    Transmit(#[from] TransmitError),
}

/// Driver for the radio-to-cluster link: a strict request/acknowledge
/// handshake, then ack-paced chunk streaming, then a closing exchange.
///
/// `poll` is called once per cycle with the matching master-bus frame when
/// one arrived. Every waiting phase is bounded; a silent cluster resets the
/// link to idle instead of wedging it.
#[derive(Debug, Default)]
pub struct LinkProtocol {
    phase: LinkPhase,
    sequence: u8,
    wait_polls: u16,
    closing: bool,
}

impl LinkProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> LinkPhase {
        self.phase
    }

    pub fn is_idle(&self) -> bool {
        self.phase == LinkPhase::Idle
    }

    /// Drops any communication in progress and returns the link to idle.
    pub fn reset_for_restart(&mut self) {
        self.phase = LinkPhase::Idle;
        self.sequence = 0;
        self.wait_polls = 0;
        self.closing = false;
    }

    /// Sends the open request. Only valid from idle; a busy link ignores
    /// the call so an in-flight frame is never interleaved with a new one.
    pub fn open<T: CanTx>(&mut self, tx: &mut T) -> Result<(), LinkError> {
        if self.phase != LinkPhase::Idle {
            return Ok(());
        }

        let frame = CanFrame::new(std_id(CANID_MASTER_RADIO_START), &OPEN_REQUEST).unwrap();
        send_with_retry(tx, BusSide::Master, &frame)?;
        self.enter(LinkPhase::Start);

        Ok(())
    }

    /// Advances the state machine by one poll. `frame` carries the cluster
    /// answer received this cycle, if any.
    pub fn poll<T: CanTx>(
        &mut self,
        frame: Option<&CanFrame>,
        assembler: &mut FrameAssembler,
        tx: &mut T,
    ) -> Result<LinkPhase, LinkError> {
        match self.phase {
            LinkPhase::Idle => {}
            LinkPhase::Start => {
                if matches(frame, CANID_MASTER_CLUSTER_START, START_ACK) {
                    self.send(tx, &PREAMBLE)?;
                    self.enter(LinkPhase::Preamble);
                } else {
                    self.await_cluster()?;
                }
            }
            LinkPhase::Preamble => {
                if matches(frame, CANID_MASTER_CLUSTER_TO_RADIO, PREAMBLE_ACK) {
                    self.enter(LinkPhase::Info);
                } else {
                    self.await_cluster()?;
                }
            }
            LinkPhase::Info => {
                self.stream(frame, assembler, tx)?;
            }
            LinkPhase::WaitForCluster => {
                let expected = ACK_MARKER | self.sequence;
                if matches(frame, CANID_MASTER_CLUSTER_TO_RADIO, expected) {
                    self.enter(LinkPhase::Info);
                } else {
                    self.await_cluster()?;
                }
            }
            LinkPhase::Stop => {
                self.sequence = 0;
                self.send(tx, &[CLOSE_ACK])?;
                self.enter(LinkPhase::Idle);
            }
        }

        Ok(self.phase)
    }

    /// Info phase: answer the cluster's closing frame, or send the next
    /// chunk of the display frame.
    fn stream<T: CanTx>(
        &mut self,
        frame: Option<&CanFrame>,
        assembler: &mut FrameAssembler,
        tx: &mut T,
    ) -> Result<(), LinkError> {
        if let Some(close) = frame.filter(|f| is_close_frame(f)) {
            let echo = ACK_MARKER | ((close.data()[0] & 0x0F).wrapping_add(1) & 0x0F);
            self.send(tx, &[echo])?;
            self.closing = false;
            self.enter(LinkPhase::Stop);
            return Ok(());
        }

        if self.closing {
            return self.await_cluster();
        }

        let chunk = assembler.next_chunk().ok_or(LinkError::EmptyBuffer)?;
        self.send(tx, chunk.bytes())?;
        self.sequence = self.sequence.wrapping_add(1) & 0x0F;

        if chunk.is_last() {
            // hold in this phase until the cluster sends its closing frame
            self.closing = true;
            self.wait_polls = 0;
        } else {
            self.enter(LinkPhase::WaitForCluster);
        }

        Ok(())
    }

    fn send<T: CanTx>(&mut self, tx: &mut T, data: &[u8]) -> Result<(), LinkError> {
        // link payloads are at most one chunk
        let frame = CanFrame::new(std_id(CANID_MASTER_RADIO_TO_CLUSTER), data).unwrap();
        send_with_retry(tx, BusSide::Master, &frame)?;
        Ok(())
    }

    fn enter(&mut self, phase: LinkPhase) {
        log::debug!("cluster link {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
        self.wait_polls = 0;
    }

    fn await_cluster(&mut self) -> Result<(), LinkError> {
        self.wait_polls += 1;

        if self.wait_polls > LINK_WAIT_LIMIT {
            let phase = self.phase;
            log::warn!("cluster link timed out in {:?}, resetting", phase);
            self.reset_for_restart();
            return Err(LinkError::Timeout(phase));
        }

        Ok(())
    }
}

fn matches(frame: Option<&CanFrame>, id: u16, byte0: u8) -> bool {
    frame.is_some_and(|f| f.raw_id() == id && f.data().first() == Some(&byte0))
}

fn is_close_frame(frame: &CanFrame) -> bool {
    frame.raw_id() == CANID_MASTER_CLUSTER_TO_RADIO
        && frame
            .data()
            .first()
            .is_some_and(|b| ChunkMarker::from_lead_byte(*b) == Ok(ChunkMarker::EndOfFrame))
}
