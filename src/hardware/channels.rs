//! Sensor-tag channel catalogue.
//!
//! A channel is one hardware sensor on the tag that has to be switched on before it
//! produces data. Reading a channel yields a fixed tuple of values; each position of
//! that tuple is published under its own field name in a [`Reading`](crate::reading::Reading).

use serde::{Deserialize, Serialize};
use std::fmt;

/// A hardware channel on a sensor tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Infrared thermopile (object and die temperature)
    IrTemp,
    /// 3-axis accelerometer
    Accelerometer,
    /// Relative humidity with its own temperature sensor
    Humidity,
    /// 3-axis magnetometer
    Magnetometer,
    /// Barometric pressure with its own temperature sensor
    Barometer,
    /// 3-axis gyroscope
    Gyroscope,
    /// Battery level
    Battery,
    /// Ambient light (lux)
    Light,
}

impl Channel {
    /// Every channel a sensor tag exposes.
    pub const ALL: [Channel; 8] = [
        Channel::IrTemp,
        Channel::Accelerometer,
        Channel::Humidity,
        Channel::Magnetometer,
        Channel::Barometer,
        Channel::Gyroscope,
        Channel::Battery,
        Channel::Light,
    ];

    /// Configuration name of the channel.
    pub fn name(&self) -> &'static str {
        match self {
            Channel::IrTemp => "ir_temp",
            Channel::Accelerometer => "accelerometer",
            Channel::Humidity => "humidity",
            Channel::Magnetometer => "magnetometer",
            Channel::Barometer => "barometer",
            Channel::Gyroscope => "gyroscope",
            Channel::Battery => "battery",
            Channel::Light => "light",
        }
    }

    /// Field names for the values a read of this channel returns, in tuple order.
    pub fn field_names(&self) -> &'static [&'static str] {
        match self {
            Channel::IrTemp => &["ir_temp", "ir"],
            Channel::Accelerometer => &["x_accel", "y_accel", "z_accel"],
            Channel::Humidity => &["humidity_temp", "humidity"],
            Channel::Magnetometer => &["x_magnet", "y_magnet", "z_magnet"],
            Channel::Barometer => &["baro_temp", "pressure"],
            Channel::Gyroscope => &["x_gyro", "y_gyro", "z_gyro"],
            Channel::Battery => &["battery"],
            Channel::Light => &["light"],
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
