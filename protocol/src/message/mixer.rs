//! Mixer configuration and platform type.

use super::Reader;
use crate::{Error, Result};
use strum::{Display, EnumString, FromRepr};

/// Vehicle type selecting the active mixer and control logic.
#[derive(FromRepr, Display, EnumString, PartialEq, Eq, Copy, Clone, Debug)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
#[repr(u8)]
pub enum PlatformType {
    /// Multirotor.
    Multirotor = 0,
    /// Fixed-wing airplane.
    Airplane = 1,
    /// Helicopter.
    Helicopter = 2,
    /// Tricopter.
    Tricopter = 3,
    /// Ground rover.
    Rover = 4,
    /// Boat.
    Boat = 5,
    /// Anything else.
    Other = 6,
}

/// `INAV_MIXER` payload.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct MixerConfig {
    /// Motor direction is inverted.
    pub motor_direction_inverted: bool,
    /// Motors stop when throttle is low.
    pub motor_stop_on_low: bool,
    /// Vehicle type.
    pub platform_type: PlatformType,
    /// Airframe has flaps.
    pub has_flaps: bool,
    /// Applied mixer preset.
    pub applied_preset: i16,
    /// Maximum number of motors supported by the firmware.
    pub max_motors: u8,
    /// Maximum number of servos supported by the firmware.
    pub max_servos: u8,
}

impl MixerConfig {
    /// Decodes the payload.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut rd = Reader::new(payload);
        let motor_direction_inverted = rd.u8()? != 0;
        let _reserved = rd.u8()?;
        let motor_stop_on_low = rd.u8()? != 0;
        let platform_type = PlatformType::from_repr(rd.u8()?).ok_or(Error::ProtocolMismatch)?;

        Ok(Self {
            motor_direction_inverted,
            motor_stop_on_low,
            platform_type,
            has_flaps: rd.u8()? != 0,
            applied_preset: rd.i16()?,
            max_motors: rd.u8()?,
            max_servos: rd.u8()?,
        })
    }

    /// Encodes the `INAV_SET_MIXER` payload.
    ///
    /// The firmware limits are read-only and not written.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![
            u8::from(self.motor_direction_inverted),
            0x00,
            u8::from(self.motor_stop_on_low),
            self.platform_type as u8,
            u8::from(self.has_flaps),
        ];

        buf.extend_from_slice(&self.applied_preset.to_le_bytes());

        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixer_payload() -> Result<()> {
        let payload = [0, 0, 1, 1, 1, 0x03, 0x00, 12, 16];
        let mut mixer = MixerConfig::decode(&payload)?;

        assert_eq!(mixer.platform_type, PlatformType::Airplane);
        assert!(mixer.has_flaps, "flaps should be set");
        assert_eq!(mixer.max_servos, 16);

        mixer.platform_type = PlatformType::Multirotor;

        assert_eq!(mixer.encode(), [0, 0, 1, 0, 1, 0x03, 0x00]);
        assert_eq!(
            MixerConfig::decode(&[0, 0, 0, 9, 0, 0, 0, 0, 0]),
            Err(Error::ProtocolMismatch),
            "unknown platform type should fail"
        );
        assert_eq!("airplane".parse(), Ok(PlatformType::Airplane));

        Ok(())
    }
}
