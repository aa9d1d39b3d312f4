use num_enum::{IntoPrimitive, TryFromPrimitive};

/* Master bus bit layout, ignition byte 0 */

/// Terminal "ACC": key in, accessories powered.
const IGN_MASTER_ACC: u8 = 0x01;
/// Terminal 15: ignition on.
const IGN_MASTER_ON: u8 = 0x02;
/// Terminals X + 50: starter engaged, non-essential consumers off.
const IGN_MASTER_START: u8 = 0x0C;

/* Slave bus bit layout, ignition byte 0 */

const IGN_SLAVE_KEY_IN: u8 = 0x01;
const IGN_SLAVE_ACC_ON_IGN_OFF: u8 = 0x60;
const IGN_SLAVE_START: u8 = 0xC0;
const IGN_SLAVE_ON: u8 = 0x80;

/// Key/ignition status, decoded from the master bus and re-encoded for the
/// slave bus. Master bits are tested in priority order: ignition on wins
/// over starting, starting over ACC; no match means key out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IgnitionState {
    #[default]
    Off,
    AccOn,
    Starting,
    IgnitionOn,
}

impl IgnitionState {
    pub fn from_master_byte(byte0: u8) -> Self {
        if byte0 & IGN_MASTER_ON != 0 {
            Self::IgnitionOn
        } else if byte0 & IGN_MASTER_START != 0 {
            Self::Starting
        } else if byte0 & IGN_MASTER_ACC != 0 {
            Self::AccOn
        } else {
            Self::Off
        }
    }

    /// Slave encoding: status bits 5..=7 OR'd with the key-in flag.
    pub fn to_byte(self) -> u8 {
        match self {
            Self::Off => 0,
            Self::AccOn => IGN_SLAVE_ACC_ON_IGN_OFF | IGN_SLAVE_KEY_IN,
            Self::Starting => IGN_SLAVE_START | IGN_SLAVE_KEY_IN,
            Self::IgnitionOn => IGN_SLAVE_ON | IGN_SLAVE_KEY_IN,
        }
    }

    pub fn is_starting(self) -> bool {
        self == Self::Starting
    }
}

/// Gear box indication in the slave encoding. The master bus only reports a
/// reverse flag (byte 0 bit 1); everything else is assumed to be drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Gear {
    Reverse = 0x01,
    #[default]
    Drive = 0x04,
}

impl Gear {
    pub fn from_master_byte(byte0: u8) -> Self {
        if byte0 & 0x02 != 0 {
            Self::Reverse
        } else {
            Self::Drive
        }
    }
}

/// Display language, packed into the high nibble of the language/unit
/// message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Language {
    #[default]
    German = 0,
    EnglishUs = 1,
    French = 2,
    Italian = 3,
    Spanish = 4,
    Portuguese = 6,
    Dutch = 7,
    EnglishUk = 8,
    NoChange = 15,
}

/// Vehicle brand announced in the static configuration message
/// (`brand << 3` in byte 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum VehicleBrand {
    Chrysler = 1,
    Dodge = 2,
    Jeep = 3,
    #[default]
    Volkswagen = 6,
    Unknown = 15,
}

/// Day/night switch bit in the dimming message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum DisplayMode {
    #[default]
    Day = 0x00,
    Night = 0x01,
}

/// Latest translated signal values, the single source for every outbound
/// slave-bus message.
///
/// Written only by the matrix decode paths (and the dim filter); encode
/// only reads.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SignalStore {
    pub ignition: IgnitionState,
    pub gear: Gear,
    /// Vehicle speed, rescaled to the slave resolution.
    pub speed: u16,
    /// Engine RPM in 1.0 rpm steps.
    pub rpm: u16,
    /// Last raw wheel impulse count (11 bits).
    pub wheel_pulse: u16,
    /// Wrapping difference of the impulse count since the previous sample.
    pub wheel_delta: u16,
    /// Little-endian, 0.1 km steps.
    pub odometer: [u8; 3],
    pub temperature: u8,
    /// High byte of the dim filter state.
    pub dim_level: u8,
    pub night_mode: bool,
    pub language: Language,
    pub metric: bool,
}

impl Default for SignalStore {
    fn default() -> Self {
        Self {
            ignition: IgnitionState::Off,
            gear: Gear::Drive,
            speed: 0,
            rpm: 0,
            wheel_pulse: 0,
            wheel_delta: 0,
            odometer: [0; 3],
            temperature: 0,
            dim_level: 0x7F,
            night_mode: false,
            language: Language::default(),
            metric: true,
        }
    }
}

/// Averaging constant of the dimming filter.
pub const DIM_AVERAGING_STEPS: u16 = 16;
/// Below this level the display switches to night mode.
pub const NIGHT_MODE_LOWER_LIMIT: u8 = 0x40;
/// Above this level the display switches back to day mode.
pub const NIGHT_MODE_UPPER_LIMIT: u8 = 0x60;

/// First-order low pass over the raw dim samples plus the day/night
/// hysteresis on its output.
///
/// `average := raw/K + average - average/K` with `K = 16`, so the level
/// never jumps on a single bright or dark sample. Only the high byte of the
/// filter state is exposed downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DimFilter {
    average: u16,
    night: bool,
}

impl Default for DimFilter {
    fn default() -> Self {
        Self {
            average: 0x7F00,
            night: false,
        }
    }
}

impl DimFilter {
    /// Folds one left-aligned ADC sample into the running average and
    /// returns the new level and day/night flag.
    pub fn update(&mut self, raw: u16) -> (u8, bool) {
        self.average =
            raw / DIM_AVERAGING_STEPS + (self.average - self.average / DIM_AVERAGING_STEPS);

        let level = (self.average >> 8) as u8;

        // the band between the two limits is a dead zone
        if self.night {
            if level > NIGHT_MODE_UPPER_LIMIT {
                self.night = false;
            }
        } else if level < NIGHT_MODE_LOWER_LIMIT {
            self.night = true;
        }

        (level, self.night)
    }

    pub fn level(&self) -> u8 {
        (self.average >> 8) as u8
    }

    pub fn is_night(&self) -> bool {
        self.night
    }
}

/// A frame was shorter than the fields mapped from it. The frame is logged
/// and discarded; the previous store values stay in effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[error("frame {id:#05x} carries {dlc} bytes but the mapping needs {need}")]
pub struct DecodeError {
    pub id: u16,
    pub dlc: usize,
    pub need: usize,
}
