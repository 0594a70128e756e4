//! MSP command identifiers.
//!
//! Identifiers up to 254 belong to the legacy command space and can be sent
//! in either wire version. Larger identifiers only exist in the extended
//! (MSP v2) command space.

use strum::{Display, FromRepr};

/// Largest command identifier representable in a legacy frame.
pub const LEGACY_MAX_ID: u16 = 254;

/// Command identifiers used by the engine.
#[non_exhaustive]
#[derive(FromRepr, Display, PartialEq, Eq, Hash, Copy, Clone, Debug)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u16)]
pub enum Command {
    /// Protocol and API version.
    ApiVersion = 1,
    /// Four-letter firmware variant code.
    FcVariant = 2,
    /// Firmware semantic version.
    FcVersion = 3,
    /// Board identifier and hardware revision.
    BoardInfo = 4,
    /// Build date and time.
    BuildInfo = 5,
    /// Craft name.
    Name = 10,
    /// Auxiliary mode activation ranges.
    ModeRanges = 34,
    /// Sets a single mode activation range.
    SetModeRange = 35,
    /// Reboots the flight controller.
    Reboot = 68,
    /// Cycle time, sensors and active flight modes.
    Status = 101,
    /// GPS fix, position and velocity.
    RawGps = 106,
    /// Roll, pitch and heading.
    Attitude = 108,
    /// Estimated altitude and vertical speed.
    Altitude = 109,
    /// Battery voltage, current and RSSI.
    Analog = 110,
    /// Rates and expo.
    RcTuning = 111,
    /// PID gains (three bytes per controller).
    Pid = 112,
    /// Servo limits and rates.
    ServoConfigurations = 120,
    /// Writes PID gains (three bytes per controller).
    SetPid = 202,
    /// Writes rates and expo.
    SetRcTuning = 204,
    /// Writes a single servo configuration.
    SetServoConfiguration = 212,
    /// Persists the configuration to nonvolatile storage.
    EepromWrite = 250,
    /// Reads a setting value by name or index.
    CommonSetting = 0x1003,
    /// Writes a setting value by name or index.
    CommonSetSetting = 0x1004,
    /// Describes a setting (type, bounds, lookup table, index).
    CommonSettingInfo = 0x1007,
    /// Extended battery telemetry.
    InavAnalog = 0x2002,
    /// Per-axis rate profile.
    InavRateProfile = 0x2007,
    /// Writes the per-axis rate profile.
    InavSetRateProfile = 0x2008,
    /// Mixer configuration including the platform type.
    InavMixer = 0x2010,
    /// Writes the mixer configuration.
    InavSetMixer = 0x2011,
    /// PID gains (four bytes per controller).
    Pid2 = 0x2030,
    /// Writes PID gains (four bytes per controller).
    SetPid2 = 0x2031,
    /// Servo limits and rates.
    InavServoConfig = 0x2200,
    /// Writes a single servo configuration.
    InavSetServoConfig = 0x2201,
}

impl Command {
    /// Returns the numeric command identifier.
    #[must_use]
    pub const fn id(self) -> u16 {
        self as u16
    }

    /// Returns `true` if the identifier only exists in the extended command space.
    #[must_use]
    pub const fn is_extended(self) -> bool {
        self.id() > LEGACY_MAX_ID
    }
}

impl From<Command> for u16 {
    fn from(cmd: Command) -> Self {
        cmd.id()
    }
}
