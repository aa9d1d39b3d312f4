use embedded_can::StandardId;

/// The two CAN networks being bridged. `Master` carries the vehicle's native
/// signals and the instrument cluster channels, `Slave` carries the signals
/// the retrofitted head unit expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusSide {
    Master,
    Slave,
}

/// A classic CAN 2.0 data frame with an 11-bit identifier.
///
/// Frames are immutable once constructed; the transmit path never rewrites
/// them.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanFrame {
    #[cfg_attr(feature = "defmt", defmt(Debug2Format))]
    id: StandardId,
    dlc: usize,
    data: [u8; 8],
}

impl CanFrame {
    /// Creates a new data frame. `data` must have a length in the range
    /// 0..=8 or else `None` will be returned instead.
    pub fn new(id: StandardId, data: &[u8]) -> Option<Self> {
        if data.len() > 8 {
            return None;
        }

        let mut copy = [0u8; 8];
        copy[..data.len()].copy_from_slice(data);

        Some(Self {
            id,
            dlc: data.len(),
            data: copy,
        })
    }

    /// Gets the message ID of the frame
    pub fn id(&self) -> StandardId {
        self.id
    }

    /// The identifier as its raw 11-bit value
    pub fn raw_id(&self) -> u16 {
        self.id.as_raw()
    }

    /// Gets the DLC (Data Length Code) of the frame
    pub fn dlc(&self) -> usize {
        self.dlc
    }

    /// Slice over the payload of the frame (length matches the DLC)
    pub fn data(&self) -> &[u8] {
        &self.data[..self.dlc]
    }
}

/// Transmit access to the CAN controller driver. Returns whether the frame
/// was accepted into the controller's send buffer; the caller may retry.
pub trait CanTx {
    fn transmit(&mut self, bus: BusSide, frame: &CanFrame) -> bool;
}

/// Busy-retry budget before a frame is dropped for the current cycle.
pub const TRANSMIT_RETRY_LIMIT: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[error("transmit buffer never accepted frame {id:#05x}")]
pub struct TransmitError {
    pub id: u16,
}

/// Retries until the driver accepts the frame or the budget runs out.
///
/// On exhaustion the frame is dropped and the bridge carries on with the
/// next cycle's data instead of halting.
pub fn send_with_retry<T: CanTx>(
    tx: &mut T,
    bus: BusSide,
    frame: &CanFrame,
) -> Result<(), TransmitError> {
    for _ in 0..TRANSMIT_RETRY_LIMIT {
        if tx.transmit(bus, frame) {
            return Ok(());
        }
    }

    log::warn!(
        "dropping frame {:#05x}, transmit buffer stayed busy",
        frame.raw_id()
    );

    Err(TransmitError { id: frame.raw_id() })
}
