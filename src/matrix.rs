use crate::{
    frame::{send_with_retry, BusSide, CanFrame, CanTx, TransmitError},
    ids::*,
    signals::{
        DecodeError, DimFilter, DisplayMode, Gear, IgnitionState, Language, SignalStore,
        VehicleBrand,
    },
};

/// Wheel impulse counters wrap at 11 bits on both buses.
pub const WHEEL_PULSE_MODULUS_MASK: u16 = 0x07FF;

/// "Configuration programmed" flag in the vehicle config message.
const CONFIG_STATUS_PROGRAMMED: u8 = 0x01;

/// Every cyclic message the bridge produces on the slave bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SlaveMessage {
    Ignition,
    WheelData,
    ReverseGear,
    Dimming,
    OdoAndTemp,
    LanguageAndUnit,
    VehicleConfig,
}

impl SlaveMessage {
    pub fn id(self) -> u16 {
        match self {
            Self::Ignition => CANID_SLAVE_IGNITION,
            Self::WheelData => CANID_SLAVE_WHEEL_DATA,
            Self::ReverseGear => CANID_SLAVE_REVERSE_GEAR,
            Self::Dimming => CANID_SLAVE_DIMMING,
            Self::OdoAndTemp => CANID_SLAVE_ODO_AND_TEMP,
            Self::LanguageAndUnit => CANID_SLAVE_LANGUAGE_AND_UNIT,
            Self::VehicleConfig => CANID_SLAVE_VEHICLE_CONFIG,
        }
    }

    /// Fixed wire length the head unit expects for this message.
    pub fn wire_len(self) -> usize {
        match self {
            Self::Ignition => 2,
            Self::WheelData => 8,
            Self::ReverseGear => 7,
            Self::Dimming => 3,
            Self::OdoAndTemp => 7,
            Self::LanguageAndUnit => 4,
            Self::VehicleConfig => 8,
        }
    }
}

/// Per-tick transmit schedule: each row is a tick divisor and the messages
/// due on it. With a 50 ms tick this yields 100 ms, 500 ms, 1 s and 2 s
/// cycles.
const SCHEDULE: &[(u32, &[SlaveMessage])] = &[
    (
        2,
        &[
            SlaveMessage::Ignition,
            SlaveMessage::WheelData,
            SlaveMessage::OdoAndTemp,
        ],
    ),
    (10, &[SlaveMessage::Dimming, SlaveMessage::ReverseGear]),
    (20, &[SlaveMessage::LanguageAndUnit]),
    (40, &[SlaveMessage::VehicleConfig]),
];

/// The signal translation matrix: decodes master-bus frames into the signal
/// store and encodes the store back out as slave-bus frames on a multi-rate
/// schedule.
#[derive(Debug, Default)]
pub struct Matrix {
    store: SignalStore,
    dim: DimFilter,
    brand: VehicleBrand,
    ticks: u32,
}

impl Matrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self) -> &SignalStore {
        &self.store
    }

    pub fn set_language(&mut self, language: Language) {
        self.store.language = language;
    }

    pub fn set_metric(&mut self, metric: bool) {
        self.store.metric = metric;
    }

    pub fn set_brand(&mut self, brand: VehicleBrand) {
        self.brand = brand;
    }

    /// Feeds one raw dim sample through the low pass and publishes the
    /// filtered level and day/night flag to the store.
    pub fn update_dim(&mut self, raw: u16) {
        let (level, night) = self.dim.update(raw);
        self.store.dim_level = level;
        self.store.night_mode = night;
    }

    /// Decodes a master-bus frame into the store. Identifiers outside the
    /// matrix are ignored; too-short frames are rejected without touching
    /// the store.
    pub fn decode(&mut self, frame: &CanFrame) -> Result<(), DecodeError> {
        let data = frame.data();

        match frame.raw_id() {
            CANID_MASTER_IGNITION => {
                require(frame, 1)?;
                self.store.ignition = IgnitionState::from_master_byte(data[0]);
            }
            CANID_MASTER_WHEEL_GEAR => {
                require(frame, 6)?;
                self.store.gear = Gear::from_master_byte(data[0]);
                self.store.speed = u16::from_le_bytes([data[1], data[2]]) << 1;

                let pulse = u16::from_le_bytes([data[3], data[4]]) & WHEEL_PULSE_MODULUS_MASK;
                self.store.wheel_delta =
                    pulse.wrapping_sub(self.store.wheel_pulse) & WHEEL_PULSE_MODULUS_MASK;
                self.store.wheel_pulse = pulse;

                self.store.temperature = data[5];
            }
            CANID_MASTER_RPM => {
                require(frame, 3)?;
                // master resolution is 0.25 rpm
                self.store.rpm = u16::from_le_bytes([data[1], data[2]]) >> 2;
            }
            CANID_MASTER_TIME_AND_ODO => {
                require(frame, 4)?;
                // 1.0 km to 0.1 km: shift the 24-bit value left by one,
                // carrying each MSB into the next byte
                let mut carry = 0;
                for i in 0..3 {
                    self.store.odometer[i] = (data[i + 1] << 1) | carry;
                    carry = data[i + 1] >> 7;
                }
            }
            _ => {}
        }

        Ok(())
    }

    /// Encodes one slave-bus message from the current store. Unused payload
    /// bytes are always zero, so no value ever leaks between identifiers.
    pub fn encode(&self, message: SlaveMessage) -> CanFrame {
        let store = &self.store;
        let mut data = [0u8; 8];

        match message {
            SlaveMessage::Ignition => {
                data[0] = store.ignition.to_byte();
                data[1] = store.ignition.is_starting() as u8;
            }
            SlaveMessage::WheelData => {
                data[0..2].copy_from_slice(&store.rpm.to_be_bytes());
                data[2..4].copy_from_slice(&store.speed.to_be_bytes());
                data[4..6].copy_from_slice(&store.wheel_delta.to_be_bytes());
                data[6..8].copy_from_slice(&store.wheel_delta.to_be_bytes());
            }
            SlaveMessage::ReverseGear => {
                data[2] = store.gear.into();
            }
            SlaveMessage::Dimming => {
                let mode = if store.night_mode {
                    DisplayMode::Night
                } else {
                    DisplayMode::Day
                };
                data[0] = mode.into();
                data[1] = store.dim_level;
                data[2] = store.dim_level;
            }
            SlaveMessage::OdoAndTemp => {
                data[0..3].copy_from_slice(&store.odometer);
                data[4] = store.temperature;
                data[5] = store.temperature;
            }
            SlaveMessage::LanguageAndUnit => {
                data[0] = store.metric as u8 | (u8::from(store.language) << 4);
            }
            SlaveMessage::VehicleConfig => {
                data[0] = CONFIG_STATUS_PROGRAMMED;
                data[2] = u8::from(self.brand) << 3;
            }
        }

        // wire_len() <= 8 for every variant
        CanFrame::new(std_id(message.id()), &data[..message.wire_len()]).unwrap()
    }

    /// Advances the schedule by one tick and transmits every message that is
    /// due. A dropped frame does not stop the rest of the cycle; the first
    /// error is reported after all due messages were attempted.
    pub fn tick<T: CanTx>(&mut self, tx: &mut T) -> Result<(), TransmitError> {
        self.ticks = self.ticks.wrapping_add(1);

        let mut failed = None;

        for (divisor, messages) in SCHEDULE {
            if self.ticks % divisor != 0 {
                continue;
            }

            for message in *messages {
                let frame = self.encode(*message);
                if let Err(e) = send_with_retry(tx, BusSide::Slave, &frame) {
                    failed.get_or_insert(e);
                }
            }
        }

        match failed {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn require(frame: &CanFrame, need: usize) -> Result<(), DecodeError> {
    if frame.dlc() < need {
        return Err(DecodeError {
            id: frame.raw_id(),
            dlc: frame.dlc(),
            need,
        });
    }

    Ok(())
}
