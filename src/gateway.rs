use heapless::Vec;
use num_enum::FromPrimitive;

use crate::{
    assembler::{AssembleError, BuiltinTemplates, FrameAssembler, TemplateStore, MAX_ROW_LENGTH},
    frame::{CanFrame, CanTx, TransmitError},
    ids::{
        CANID_MASTER_CLUSTER_START, CANID_MASTER_CLUSTER_TO_RADIO, CANID_MASTER_PDC_STATUS,
        CANID_SLAVE_MEDIA_INFO, CANID_SLAVE_MEDIA_STATUS,
    },
    link::{LinkError, LinkPhase, LinkProtocol},
    matrix::Matrix,
    signals::{Language, SignalStore, VehicleBrand},
};

/// "New text starts here" flag in the media info frames.
const MEDIA_TEXT_START_FLAG: u8 = 0x04;

/// Ticks the distance display holds without fresh data (10 s at 50 ms).
const PDC_DISPLAY_TIMEOUT: u16 = 200;

/* Corner distance offsets in the PDC status frame */

const PDC_FRONT_LEFT: usize = 2;
const PDC_FRONT_RIGHT: usize = 3;
const PDC_REAR_LEFT: usize = 6;
const PDC_REAR_RIGHT: usize = 7;

/// Audio source reported by the head unit, low 5 bits of the media status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum MediaSource {
    RadioAm = 0x00,
    RadioFm = 0x01,
    RadioMw = 0x02,
    RadioLw = 0x03,
    Disc = 0x04,
    Hdd = 0x05,
    Aux = 0x06,
    BluetoothAudio = 0x08,
    Off = 0x1D,
    Locked = 0x1E,
    #[num_enum(default)]
    Unknown = 0x1F,
}

impl MediaSource {
    /// Short display tag for the source row. `Disc` is refined further via
    /// [`disc_label`].
    pub fn label(self) -> &'static [u8] {
        match self {
            Self::RadioAm | Self::RadioMw => b"MW",
            Self::RadioFm => b"FM",
            Self::RadioLw => b"LW",
            Self::Disc => b"CD",
            Self::Hdd => b"HDD",
            Self::Aux => b"AUX",
            Self::BluetoothAudio => b"BT",
            Self::Off | Self::Locked | Self::Unknown => b"",
        }
    }
}

/// Display tag for the disc slot status byte.
fn disc_label(status: u8) -> &'static [u8] {
    match status & 0x1F {
        0x03..=0x07 => b"CD",
        0x08..=0x0C => b"DVD",
        0x0F..=0x12 | 0x1F => b"ERROR!",
        0x00 => b"NO DISC",
        _ => b"CD",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GatewayError {
    #[error(transparent)]
    Transmit(#[from] TransmitError),
    #[error(transparent)]
    Link(#[from] LinkError),
}

/// Top-level bridge node: owns the signal matrix, the cluster link and the
/// display frame assembler, and routes received frames between them.
///
/// The caller drives it with three inputs per cycle: received master-bus
/// frames, received slave-bus frames, and the 50 ms `tick`.
#[derive(Debug)]
pub struct Gateway<S: TemplateStore = BuiltinTemplates> {
    matrix: Matrix,
    link: LinkProtocol,
    assembler: FrameAssembler,
    templates: S,
    row1: Vec<u8, MAX_ROW_LENGTH>,
    row2: Vec<u8, MAX_ROW_LENGTH>,
    text_group: u8,
    text_pending: bool,
    comm_requested: bool,
    pdc_values: [u8; 8],
    pdc_active: bool,
    pdc_timeout: u16,
}

impl Gateway<BuiltinTemplates> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<S: TemplateStore + Default> Default for Gateway<S> {
    fn default() -> Self {
        Self::with_templates(S::default())
    }
}

impl<S: TemplateStore> Gateway<S> {
    pub fn with_templates(templates: S) -> Self {
        Self {
            matrix: Matrix::new(),
            link: LinkProtocol::new(),
            assembler: FrameAssembler::new(),
            templates,
            row1: Vec::new(),
            row2: Vec::new(),
            text_group: 0,
            text_pending: false,
            comm_requested: false,
            // "no obstacle" on every corner
            pdc_values: [0xFF; 8],
            pdc_active: false,
            pdc_timeout: 0,
        }
    }

    pub fn signals(&self) -> &SignalStore {
        self.matrix.store()
    }

    pub fn link_phase(&self) -> LinkPhase {
        self.link.phase()
    }

    /// Whether staged display text is still waiting for its transfer to
    /// start.
    pub fn text_pending(&self) -> bool {
        self.text_pending
    }

    /// Whether the display is currently held by park distance data.
    pub fn pdc_active(&self) -> bool {
        self.pdc_active
    }

    pub fn set_language(&mut self, language: Language) {
        self.matrix.set_language(language);
    }

    pub fn set_metric(&mut self, metric: bool) {
        self.matrix.set_metric(metric);
    }

    pub fn set_brand(&mut self, brand: VehicleBrand) {
        self.matrix.set_brand(brand);
    }

    /// Feeds one raw dim sensor sample into the matrix.
    pub fn sample_dim(&mut self, raw: u16) {
        self.matrix.update_dim(raw);
    }

    /// Handles a frame received on the master bus: cluster link channels go
    /// to the link state machine, everything else to the signal matrix.
    ///
    /// A malformed matrix frame is logged and dropped; it never takes the
    /// bridge down.
    pub fn on_master_frame<T: CanTx>(
        &mut self,
        frame: &CanFrame,
        tx: &mut T,
    ) -> Result<(), GatewayError> {
        match frame.raw_id() {
            CANID_MASTER_CLUSTER_START | CANID_MASTER_CLUSTER_TO_RADIO => {
                self.link.poll(Some(frame), &mut self.assembler, tx)?;
            }
            CANID_MASTER_PDC_STATUS => self.on_pdc_status(frame.data()),
            _ => {
                if let Err(e) = self.matrix.decode(frame) {
                    log::warn!("dropping malformed frame: {}", e);
                }
            }
        }

        Ok(())
    }

    /// Handles a frame received on the slave bus: media status and media
    /// text from the head unit feed the display rows.
    pub fn on_slave_frame(&mut self, frame: &CanFrame) {
        match frame.raw_id() {
            CANID_SLAVE_MEDIA_STATUS => self.on_media_status(frame.data()),
            CANID_SLAVE_MEDIA_INFO => self.on_media_text(frame.data()),
            _ => {}
        }
    }

    /// Stages a display update directly, bypassing the head unit's media
    /// reporting. The cluster transfer starts on the next tick.
    pub fn set_display_text(
        &mut self,
        source: MediaSource,
        text: &[u8],
    ) -> Result<(), AssembleError> {
        if text.len() > MAX_ROW_LENGTH {
            return Err(AssembleError::RowTooLong(text.len()));
        }

        self.row1.clear();
        // source labels are always within the row width
        self.row1.extend_from_slice(source.label()).unwrap();
        self.row2.clear();
        self.row2.extend_from_slice(text).unwrap();

        self.text_pending = true;
        self.comm_requested = true;

        Ok(())
    }

    /// Restarts the cluster transfer from scratch, e.g. after the cluster
    /// power-cycled. The staged rows are kept.
    pub fn reset_for_restart(&mut self) {
        self.link.reset_for_restart();
        self.assembler.reset();
        self.comm_requested = true;
    }

    /// One 50 ms cycle: run the cyclic transmit schedule, then drive the
    /// cluster link forward.
    pub fn tick<T: CanTx>(&mut self, tx: &mut T) -> Result<(), GatewayError> {
        self.matrix.tick(tx)?;

        if self.pdc_active {
            self.pdc_timeout += 1;
            if self.pdc_timeout >= PDC_DISPLAY_TIMEOUT {
                // distance data went stale; fall back to the media display
                self.pdc_active = false;
                self.comm_requested = true;
            }
        }

        if self.link.is_idle() {
            if self.comm_requested {
                if self.pdc_active {
                    let (row1, row2) = pdc_rows(&self.pdc_values);
                    self.assembler.build(&self.templates, &row1, &row2)
                } else {
                    self.assembler.build(&self.templates, &self.row1, &self.row2)
                }
                .map_err(LinkError::Chunk)?;
                self.text_pending = false;
                self.comm_requested = false;
                self.link.open(tx)?;
            }
        } else if let Err(e) = self.link.poll(None, &mut self.assembler, tx) {
            if matches!(e, LinkError::Timeout(_)) {
                // retry the whole transfer from the top; a half-streamed
                // buffer must not block the rebuild
                self.assembler.reset();
                self.comm_requested = true;
            }
            return Err(e.into());
        }

        Ok(())
    }

    /// Fresh corner distances preempt whatever the display shows; the
    /// staged media rows come back once the data stops arriving.
    fn on_pdc_status(&mut self, data: &[u8]) {
        let Ok(values) = data.try_into() else {
            log::warn!("dropping short distance frame ({} bytes)", data.len());
            return;
        };

        self.pdc_values = values;
        self.pdc_timeout = 0;
        self.pdc_active = true;
        self.comm_requested = true;
    }

    fn on_media_status(&mut self, data: &[u8]) {
        let Some(&byte0) = data.first() else {
            return;
        };

        let source = MediaSource::from(byte0 & 0x1F);
        let label = if source == MediaSource::Disc {
            data.get(1).map_or(b"CD" as &[u8], |s| disc_label(*s))
        } else {
            source.label()
        };

        if self.row1.as_slice() != label {
            self.row1.clear();
            self.row1.extend_from_slice(label).unwrap();
            self.text_pending = true;
            self.comm_requested = true;
        }
    }

    fn on_media_text(&mut self, data: &[u8]) {
        let (Some(&flags), Some(&group)) = (data.first(), data.get(1)) else {
            return;
        };

        if flags & MEDIA_TEXT_START_FLAG != 0 {
            self.row2.clear();
            self.text_group = group;
        } else if group != self.text_group {
            // continuation of a text we never saw the start of
            return;
        }

        for byte in &data[2..] {
            if *byte == 0 {
                break;
            }
            // the display row is capped; surplus text is cut off
            if self.row2.push(*byte).is_err() {
                break;
            }
        }

        self.text_pending = true;
        self.comm_requested = true;
    }
}

/// Three zero-padded decimal digits.
fn decimal3(value: u8) -> [u8; 3] {
    [
        b'0' + value / 100,
        b'0' + (value / 10) % 10,
        b'0' + value % 10,
    ]
}

/// Distance display rows: front corners around the "PDC" tag, rear corners
/// below.
fn pdc_rows(values: &[u8; 8]) -> ([u8; MAX_ROW_LENGTH], [u8; MAX_ROW_LENGTH]) {
    let mut row1 = [b'.'; MAX_ROW_LENGTH];
    let mut row2 = [b'.'; MAX_ROW_LENGTH];

    row1[..3].copy_from_slice(&decimal3(values[PDC_FRONT_LEFT]));
    row1[4..7].copy_from_slice(b"PDC");
    row1[7..].copy_from_slice(&decimal3(values[PDC_FRONT_RIGHT]));

    row2[..3].copy_from_slice(&decimal3(values[PDC_REAR_LEFT]));
    row2[7..].copy_from_slice(&decimal3(values[PDC_REAR_RIGHT]));

    (row1, row2)
}

#[cfg(test)]
mod tests {
    use crate::{
        frame::BusSide,
        ids::{
            std_id, CANID_MASTER_IGNITION, CANID_MASTER_RADIO_START,
            CANID_MASTER_RADIO_TO_CLUSTER, CANID_SLAVE_IGNITION,
        },
    };

    use super::*;

    struct MockBus {
        sent: Vec<(BusSide, CanFrame), 64>,
    }

    impl MockBus {
        fn new() -> Self {
            Self { sent: Vec::new() }
        }

        fn last(&self) -> &CanFrame {
            &self.sent.last().unwrap().1
        }
    }

    impl CanTx for MockBus {
        fn transmit(&mut self, bus: BusSide, frame: &CanFrame) -> bool {
            self.sent.push((bus, frame.clone())).unwrap();
            true
        }
    }

    struct SinkBus;

    impl CanTx for SinkBus {
        fn transmit(&mut self, _bus: BusSide, _frame: &CanFrame) -> bool {
            true
        }
    }

    fn frame(id: u16, data: &[u8]) -> CanFrame {
        CanFrame::new(std_id(id), data).unwrap()
    }

    #[test]
    fn master_frames_feed_the_matrix() {
        let mut gateway = Gateway::new();
        let mut bus = MockBus::new();

        gateway
            .on_master_frame(&frame(CANID_MASTER_IGNITION, &[0x03]), &mut bus)
            .unwrap();
        assert_eq!(
            gateway.signals().ignition,
            crate::signals::IgnitionState::IgnitionOn
        );

        // malformed frames are swallowed, not escalated
        gateway
            .on_master_frame(&frame(crate::ids::CANID_MASTER_WHEEL_GEAR, &[0x00]), &mut bus)
            .unwrap();
    }

    #[test]
    fn tick_runs_schedule_and_opens_requested_link() {
        let mut gateway = Gateway::new();
        let mut bus = MockBus::new();

        gateway.set_display_text(MediaSource::RadioFm, b"STATION").unwrap();
        assert!(gateway.text_pending());

        // tick 1: nothing cyclic due yet, but the link opens
        gateway.tick(&mut bus).unwrap();
        assert!(!gateway.text_pending());
        assert_eq!(gateway.link_phase(), LinkPhase::Start);
        assert_eq!(bus.last().raw_id(), CANID_MASTER_RADIO_START);

        // tick 2: the 100 ms group goes out while the link keeps waiting
        gateway.tick(&mut bus).unwrap();
        assert!(bus
            .sent
            .iter()
            .any(|(_, f)| f.raw_id() == CANID_SLAVE_IGNITION));
        assert_eq!(gateway.link_phase(), LinkPhase::Start);
    }

    #[test]
    fn cluster_answers_route_to_the_link() {
        let mut gateway = Gateway::new();
        let mut bus = MockBus::new();

        gateway.set_display_text(MediaSource::RadioFm, b"STATION").unwrap();
        gateway.tick(&mut bus).unwrap();

        gateway
            .on_master_frame(&frame(CANID_MASTER_CLUSTER_START, &[0x39]), &mut bus)
            .unwrap();
        assert_eq!(gateway.link_phase(), LinkPhase::Preamble);
        assert_eq!(bus.last().raw_id(), CANID_MASTER_RADIO_TO_CLUSTER);

        gateway
            .on_master_frame(&frame(CANID_MASTER_CLUSTER_TO_RADIO, &[0xA1]), &mut bus)
            .unwrap();
        assert_eq!(gateway.link_phase(), LinkPhase::Info);
    }

    #[test]
    fn media_status_stages_the_source_row() {
        let mut gateway = Gateway::new();
        let mut bus = MockBus::new();

        gateway.on_slave_frame(&frame(CANID_SLAVE_MEDIA_STATUS, &[0x01, 0x00]));
        assert!(gateway.comm_requested);

        gateway.tick(&mut bus).unwrap();
        assert_eq!(gateway.link_phase(), LinkPhase::Start);

        // the same source again stages nothing new
        gateway.comm_requested = false;
        gateway.on_slave_frame(&frame(CANID_SLAVE_MEDIA_STATUS, &[0x01, 0x00]));
        assert!(!gateway.comm_requested);
    }

    #[test]
    fn disc_status_refines_the_source_label() {
        let mut gateway = Gateway::new();

        gateway.on_slave_frame(&frame(CANID_SLAVE_MEDIA_STATUS, &[0x04, 0x0A]));
        assert_eq!(gateway.row1.as_slice(), b"DVD");

        gateway.on_slave_frame(&frame(CANID_SLAVE_MEDIA_STATUS, &[0x04, 0x00]));
        assert_eq!(gateway.row1.as_slice(), b"NO DISC");

        gateway.on_slave_frame(&frame(CANID_SLAVE_MEDIA_STATUS, &[0x04, 0x10]));
        assert_eq!(gateway.row1.as_slice(), b"ERROR!");
    }

    #[test]
    fn media_text_accumulates_across_frames() {
        let mut gateway = Gateway::new();

        gateway.on_slave_frame(&frame(
            CANID_SLAVE_MEDIA_INFO,
            &[MEDIA_TEXT_START_FLAG, 0x01, b'S', b'T', b'A', b'T', b'I', b'O'],
        ));
        gateway.on_slave_frame(&frame(
            CANID_SLAVE_MEDIA_INFO,
            &[0x00, 0x01, b'N', 0x00, 0x00, 0x00, 0x00, 0x00],
        ));
        assert_eq!(gateway.row2.as_slice(), b"STATION");

        // a frame from another group without a start flag is dropped
        gateway.on_slave_frame(&frame(
            CANID_SLAVE_MEDIA_INFO,
            &[0x00, 0x02, b'X', 0x00, 0x00, 0x00, 0x00, 0x00],
        ));
        assert_eq!(gateway.row2.as_slice(), b"STATION");

        // a new start flag replaces the accumulated text
        gateway.on_slave_frame(&frame(
            CANID_SLAVE_MEDIA_INFO,
            &[MEDIA_TEXT_START_FLAG, 0x02, b'X', b'Y', 0x00, 0x00, 0x00, 0x00],
        ));
        assert_eq!(gateway.row2.as_slice(), b"XY");
    }

    #[test]
    fn over_long_display_text_is_rejected() {
        let mut gateway = Gateway::new();

        assert_eq!(
            gateway.set_display_text(MediaSource::RadioFm, b"ELEVENCHARS"),
            Err(AssembleError::RowTooLong(11))
        );
    }

    #[test]
    fn transfer_recovers_after_midstream_timeout() {
        let mut gateway = Gateway::new();
        let mut bus = SinkBus;

        gateway.set_display_text(MediaSource::RadioFm, b"STATION").unwrap();
        gateway.tick(&mut bus).unwrap();
        gateway
            .on_master_frame(&frame(CANID_MASTER_CLUSTER_START, &[0x39]), &mut bus)
            .unwrap();
        gateway
            .on_master_frame(&frame(CANID_MASTER_CLUSTER_TO_RADIO, &[0xA1]), &mut bus)
            .unwrap();
        gateway.tick(&mut bus).unwrap();
        assert_eq!(gateway.link_phase(), LinkPhase::WaitForCluster);

        // cluster goes silent mid-stream until the link gives up
        let mut timed_out = false;
        for _ in 0..=crate::link::LINK_WAIT_LIMIT {
            if let Err(e) = gateway.tick(&mut bus) {
                assert!(matches!(
                    e,
                    GatewayError::Link(LinkError::Timeout(LinkPhase::WaitForCluster))
                ));
                timed_out = true;
                break;
            }
        }
        assert!(timed_out);
        assert_eq!(gateway.link_phase(), LinkPhase::Idle);

        // the next tick rebuilds the buffer and restarts the transfer
        gateway.tick(&mut bus).unwrap();
        assert_eq!(gateway.link_phase(), LinkPhase::Start);
    }

    #[test]
    fn pdc_rows_format_corner_distances() {
        let values = [0, 0, 23, 145, 0, 0, 7, 230];
        let (row1, row2) = pdc_rows(&values);

        assert_eq!(&row1, b"023.PDC145");
        assert_eq!(&row2, b"007....230");
    }

    #[test]
    fn pdc_status_preempts_media_until_timeout() {
        let mut gateway = Gateway::new();
        let mut bus = SinkBus;

        gateway.set_display_text(MediaSource::RadioFm, b"STATION").unwrap();
        gateway
            .on_master_frame(
                &frame(CANID_MASTER_PDC_STATUS, &[0, 0, 50, 60, 0, 0, 70, 80]),
                &mut bus,
            )
            .unwrap();
        assert!(gateway.pdc_active());

        for _ in 0..150 {
            let _ = gateway.tick(&mut bus);
        }
        assert!(gateway.pdc_active());

        // fresh distance data restarts the hold timer
        gateway
            .on_master_frame(
                &frame(CANID_MASTER_PDC_STATUS, &[0, 0, 40, 60, 0, 0, 70, 80]),
                &mut bus,
            )
            .unwrap();
        for _ in 0..199 {
            let _ = gateway.tick(&mut bus);
        }
        assert!(gateway.pdc_active());

        // one more silent tick and the media display is re-requested
        let _ = gateway.tick(&mut bus);
        assert!(!gateway.pdc_active());
        assert!(gateway.comm_requested);
    }

    #[test]
    fn short_pdc_frame_is_dropped() {
        let mut gateway = Gateway::new();
        let mut bus = SinkBus;

        gateway
            .on_master_frame(&frame(CANID_MASTER_PDC_STATUS, &[0, 0, 50, 60]), &mut bus)
            .unwrap();
        assert!(!gateway.pdc_active());
    }

    #[test]
    fn restart_streams_the_frame_again() {
        let mut gateway = Gateway::new();
        let mut bus = MockBus::new();

        gateway.set_display_text(MediaSource::RadioFm, b"STATION").unwrap();
        gateway.tick(&mut bus).unwrap();
        assert_eq!(gateway.link_phase(), LinkPhase::Start);

        gateway.reset_for_restart();
        assert_eq!(gateway.link_phase(), LinkPhase::Idle);

        gateway.tick(&mut bus).unwrap();
        assert_eq!(gateway.link_phase(), LinkPhase::Start);
    }
}
