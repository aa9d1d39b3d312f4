use embedded_can::StandardId;

/// Builds a const 11-bit identifier; fails to compile when out of range.
pub const fn std_id(raw: u16) -> StandardId {
    match StandardId::new(raw) {
        Some(id) => id,
        None => panic!("identifier out of 11-bit range"),
    }
}

/* Master bus (vehicle) */

/// Ignition/key status, byte 0 bit-coded by terminal.
pub const CANID_MASTER_IGNITION: u16 = 0x271;
/// Reverse gear flag, vehicle speed, wheel impulse count, outside temperature.
pub const CANID_MASTER_WHEEL_GEAR: u16 = 0x351;
/// Engine RPM in 0.25 rpm steps.
pub const CANID_MASTER_RPM: u16 = 0x353;
/// Clock and odometer, odometer in 1.0 km little-endian over bytes 1..=3.
pub const CANID_MASTER_TIME_AND_ODO: u16 = 0x65D;

/// Park distance control: corner distance values, 8 bytes.
pub const CANID_MASTER_PDC_STATUS: u16 = 0x54B;

/// Cluster's answer channel for the link open request.
pub const CANID_MASTER_CLUSTER_START: u16 = 0x2E8;
/// Open request for cluster communication, sent by this node.
pub const CANID_MASTER_RADIO_START: u16 = 0x4D9;
/// Data channel towards the cluster.
pub const CANID_MASTER_RADIO_TO_CLUSTER: u16 = 0x6B9;
/// Acknowledge channel from the cluster.
pub const CANID_MASTER_CLUSTER_TO_RADIO: u16 = 0x699;

/* Slave bus (head unit) */

/// Ignition and key status, 2 bytes.
pub const CANID_SLAVE_IGNITION: u16 = 0x20B;
/// Engine RPM, speed and wheel pulse deltas, 8 bytes.
pub const CANID_SLAVE_WHEEL_DATA: u16 = 0x211;
/// Gear box status for rear view camera and navigation, 7 bytes.
pub const CANID_SLAVE_REVERSE_GEAR: u16 = 0x20E;
/// Odometer in 0.1 km plus ambient temperature, 7 bytes.
pub const CANID_SLAVE_ODO_AND_TEMP: u16 = 0x214;
/// Display language and metric/imperial switch, 4 bytes.
pub const CANID_SLAVE_LANGUAGE_AND_UNIT: u16 = 0x2B0;
/// Static vehicle configuration (brand, programmed status), 8 bytes.
pub const CANID_SLAVE_VEHICLE_CONFIG: u16 = 0x2D3;
/// Day/night switch and display dim levels, 3 bytes.
pub const CANID_SLAVE_DIMMING: u16 = 0x308;

/// Media source and disc status reported by the head unit.
pub const CANID_SLAVE_MEDIA_STATUS: u16 = 0x291;
/// Sequenced free-text frames with current media information.
pub const CANID_SLAVE_MEDIA_INFO: u16 = 0x294;
