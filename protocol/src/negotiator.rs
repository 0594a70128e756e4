//! Firmware identity and the wire-path decisions derived from it.
//!
//! Everything in this module is a pure function of [`ProtocolState`].
//! Firmware-specific behavior changes are recorded as rows of a version
//! threshold table; operations ask for a [`Feature`] or an ordered dispatch
//! plan instead of inspecting variants and versions themselves.

use crate::message::{mixer::PlatformType, pid::PidBlock, servo::ServoLayout};
use core::fmt::{Display, Formatter};
use strum::Display;

/// Firmware family reported by the flight controller.
#[derive(PartialEq, Eq, Clone, Debug)]
pub enum FirmwareVariant {
    /// Betaflight (`BTFL`).
    Betaflight,
    /// INAV (`INAV`).
    Inav,
    /// Cleanflight (`CLFL`).
    Cleanflight,
    /// Emuflight (`EMUF`).
    Emuflight,
    /// Any other four-letter code.
    Other(String),
}

impl FirmwareVariant {
    /// Parses a four-letter variant code.
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        match code {
            "BTFL" => Self::Betaflight,
            "INAV" => Self::Inav,
            "CLFL" => Self::Cleanflight,
            "EMUF" => Self::Emuflight,
            other => Self::Other(other.to_string()),
        }
    }

    /// Returns the four-letter variant code.
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            Self::Betaflight => "BTFL",
            Self::Inav => "INAV",
            Self::Cleanflight => "CLFL",
            Self::Emuflight => "EMUF",
            Self::Other(code) => code,
        }
    }
}

impl Display for FirmwareVariant {
    fn fmt(&self, f: &mut Formatter) -> core::fmt::Result {
        match self {
            Self::Betaflight => write!(f, "Betaflight"),
            Self::Inav => write!(f, "INAV"),
            Self::Cleanflight => write!(f, "Cleanflight"),
            Self::Emuflight => write!(f, "Emuflight"),
            Self::Other(code) => write!(f, "{code}"),
        }
    }
}

/// Semantic firmware version.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Default, Copy, Clone, Debug)]
pub struct Version {
    /// Major version.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
    /// Patch version.
    pub patch: u8,
}

impl Version {
    /// Constructs a new version.
    #[must_use]
    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter) -> core::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// MSP API version, which governs payload layouts of legacy messages.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Default, Copy, Clone, Debug)]
pub struct ApiVersion {
    /// Major version.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
}

impl ApiVersion {
    /// Constructs a new API version.
    #[must_use]
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }
}

impl Display for ApiVersion {
    fn fmt(&self, f: &mut Formatter) -> core::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Identity of the connected firmware, as detected by
/// [`Client::detect_protocol`](crate::Client::detect_protocol).
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct FirmwareInfo {
    /// Firmware family.
    pub variant: FirmwareVariant,
    /// Firmware version.
    pub version: Version,
    /// MSP API version.
    pub api: ApiVersion,
    /// Four-letter board identifier, e.g. `S405`.
    pub board_id: String,
}

/// Capability whose availability depends on firmware family and version.
#[derive(Display, PartialEq, Eq, Copy, Clone, Debug)]
pub enum Feature {
    /// PID gains are exchanged as a 44-byte block of 11 controllers with
    /// four gains each (P, I, D, FF).
    ExtendedPidBlock,
    /// Rates are exchanged as a per-axis rate profile.
    ExtendedRateProfile,
    /// Battery telemetry is read through the extended analog message.
    ExtendedAnalog,
    /// Servo configurations are exchanged through extended messages.
    ExtendedServoConfig,
    /// Named settings are accessible through the generic setting messages.
    SettingsProtocol,
    /// The platform type is exposed through the mixer configuration.
    PlatformType,
    /// The legacy servo layout carries angle-at-min and angle-at-max fields.
    ServoAngleFields,
}

struct Quirk {
    feature: Feature,
    variant: &'static str,
    since: Version,
}

/// Version threshold table.
///
/// A feature is available if a row matches the firmware variant and the
/// firmware version is at least the row's version.
const QUIRKS: &[Quirk] = &[
    Quirk {
        feature: Feature::ExtendedPidBlock,
        variant: "INAV",
        since: Version::new(2, 0, 0),
    },
    Quirk {
        feature: Feature::ExtendedRateProfile,
        variant: "INAV",
        since: Version::new(1, 8, 1),
    },
    Quirk {
        feature: Feature::ExtendedAnalog,
        variant: "INAV",
        since: Version::new(2, 0, 0),
    },
    Quirk {
        feature: Feature::ExtendedServoConfig,
        variant: "INAV",
        since: Version::new(3, 0, 0),
    },
    Quirk {
        feature: Feature::SettingsProtocol,
        variant: "INAV",
        since: Version::new(1, 8, 0),
    },
    Quirk {
        feature: Feature::PlatformType,
        variant: "INAV",
        since: Version::new(1, 8, 0),
    },
    Quirk {
        feature: Feature::ServoAngleFields,
        variant: "INAV",
        since: Version::new(0, 0, 0),
    },
    Quirk {
        feature: Feature::ServoAngleFields,
        variant: "CLFL",
        since: Version::new(0, 0, 0),
    },
];

/// Layout of the legacy rate tuning payload.
#[derive(PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Debug)]
pub enum RcTuningLayout {
    /// Rates, expo, throttle curve and TPA only.
    Base,
    /// Adds yaw expo and yaw rate (API 1.10).
    Yaw,
    /// Adds pitch rate and pitch expo (API 1.37).
    Pitch,
    /// Adds throttle limit type and percentage (API 1.41).
    ThrottleLimit,
}

/// Wire path used for one attempt of a logical operation.
#[derive(Display, PartialEq, Eq, Copy, Clone, Debug)]
pub enum Tier {
    /// Extended (MSP v2) binary message.
    Extended,
    /// Legacy binary message.
    Legacy,
    /// Text console command.
    Cli,
}

/// Logical operations with firmware-dependent wire paths.
#[derive(Display, PartialEq, Eq, Copy, Clone, Debug)]
pub enum Operation {
    /// Read PID gains.
    ReadPid,
    /// Write PID gains.
    WritePid,
    /// Read rates and expo.
    ReadRcTuning,
    /// Write rates and expo.
    WriteRcTuning,
    /// Read mode activation ranges.
    ReadModeRanges,
    /// Write a mode activation range.
    WriteModeRange,
    /// Read servo configurations.
    ReadServoConfigs,
    /// Write a servo configuration.
    WriteServoConfig,
    /// Read a named setting.
    ReadSetting,
    /// Write a named setting.
    WriteSetting,
    /// Persist configuration to nonvolatile storage.
    Save,
}

/// Connection-scoped protocol state.
///
/// Created by protocol detection and fully reset on disconnect.
#[derive(Default, Clone, Debug)]
pub struct ProtocolState {
    /// Detected firmware identity.
    pub firmware: Option<FirmwareInfo>,
    /// Last known platform type.
    pub platform_type: Option<PlatformType>,
    /// Complete PID block, as last read or written.
    pub cached_pid: Option<PidBlock>,
}

impl ProtocolState {
    /// Returns `true` if the firmware offers the feature.
    ///
    /// Undetected firmware offers no optional features.
    #[must_use]
    pub fn supports(&self, feature: Feature) -> bool {
        let Some(fw) = &self.firmware else {
            return false;
        };

        QUIRKS.iter().any(|quirk| {
            quirk.feature == feature
                && quirk.variant == fw.variant.code()
                && fw.version >= quirk.since
        })
    }

    /// Returns `true` if PID gains require the extended 44-byte block.
    #[must_use]
    pub fn uses_extended_pid_block(&self) -> bool {
        self.supports(Feature::ExtendedPidBlock)
    }

    /// Returns `true` if rates use the per-axis extended rate profile.
    #[must_use]
    pub fn uses_extended_rate_profile(&self) -> bool {
        self.supports(Feature::ExtendedRateProfile)
    }

    /// Returns `true` if battery telemetry uses the extended analog message.
    #[must_use]
    pub fn uses_extended_analog(&self) -> bool {
        self.supports(Feature::ExtendedAnalog)
    }

    /// Returns the payload layout used for servo configurations.
    #[must_use]
    pub fn servo_config_path(&self) -> ServoLayout {
        if self.supports(Feature::ExtendedServoConfig) {
            ServoLayout::Extended
        } else if self.supports(Feature::ServoAngleFields) {
            ServoLayout::Legacy14
        } else {
            ServoLayout::Legacy12
        }
    }

    /// Returns `true` if named settings are accessible over binary messages.
    #[must_use]
    pub fn supports_settings_protocol(&self) -> bool {
        self.supports(Feature::SettingsProtocol)
    }

    /// Returns `true` if the platform type can be queried and changed.
    #[must_use]
    pub fn supports_platform_type(&self) -> bool {
        self.supports(Feature::PlatformType)
    }

    /// Returns the legacy rate tuning layout for the detected API version.
    #[must_use]
    pub fn rc_tuning_layout(&self) -> RcTuningLayout {
        match self.api() {
            api if api >= ApiVersion::new(1, 41) => RcTuningLayout::ThrottleLimit,
            api if api >= ApiVersion::new(1, 37) => RcTuningLayout::Pitch,
            api if api >= ApiVersion::new(1, 10) => RcTuningLayout::Yaw,
            _ => RcTuningLayout::Base,
        }
    }

    /// Returns `true` if the legacy analog payload carries a precise voltage.
    #[must_use]
    pub fn analog_has_precise_voltage(&self) -> bool {
        self.api() >= ApiVersion::new(1, 41)
    }

    /// Returns `true` if console commands should use INAV syntax.
    #[must_use]
    pub fn uses_inav_cli(&self) -> bool {
        self.firmware
            .as_ref()
            .is_some_and(|fw| fw.variant == FirmwareVariant::Inav)
    }

    /// Returns the ordered wire paths to try for an operation.
    ///
    /// Each failure that permits fallback advances exactly one entry.
    #[must_use]
    pub fn plan(&self, op: Operation) -> Vec<Tier> {
        let extended = match op {
            Operation::ReadPid | Operation::WritePid => self.uses_extended_pid_block(),
            Operation::ReadRcTuning | Operation::WriteRcTuning => {
                self.uses_extended_rate_profile()
            }
            Operation::ReadServoConfigs | Operation::WriteServoConfig => {
                self.servo_config_path() == ServoLayout::Extended
            }
            Operation::ReadSetting | Operation::WriteSetting => {
                // Settings never had a legacy message
                return if self.supports_settings_protocol() {
                    vec![Tier::Extended, Tier::Cli]
                } else {
                    vec![Tier::Cli]
                };
            }
            Operation::ReadModeRanges | Operation::WriteModeRange | Operation::Save => false,
        };
        let mut tiers = Vec::with_capacity(3);

        if extended {
            tiers.push(Tier::Extended);
        }

        tiers.extend([Tier::Legacy, Tier::Cli]);

        tiers
    }

    fn api(&self) -> ApiVersion {
        self.firmware
            .as_ref()
            .map_or_else(ApiVersion::default, |fw| fw.api)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(variant: &str, version: Version, api: ApiVersion) -> ProtocolState {
        ProtocolState {
            firmware: Some(FirmwareInfo {
                variant: FirmwareVariant::from_code(variant),
                version,
                api,
                board_id: "TEST".into(),
            }),
            ..ProtocolState::default()
        }
    }

    #[test]
    fn variant_codes() {
        assert_eq!(FirmwareVariant::from_code("INAV"), FirmwareVariant::Inav);
        assert_eq!(
            FirmwareVariant::from_code("KISS"),
            FirmwareVariant::Other("KISS".into())
        );
        assert_eq!(FirmwareVariant::Other("KISS".into()).code(), "KISS");
    }

    #[test]
    fn extended_pid_threshold() {
        let old = state("INAV", Version::new(1, 9, 1), ApiVersion::new(2, 1));
        let new = state("INAV", Version::new(2, 0, 0), ApiVersion::new(2, 2));
        let bf = state("BTFL", Version::new(4, 4, 0), ApiVersion::new(1, 45));

        assert!(!old.uses_extended_pid_block());
        assert!(new.uses_extended_pid_block());
        assert!(!bf.uses_extended_pid_block(), "Betaflight uses legacy PID");
        assert_eq!(old.servo_config_path(), ServoLayout::Legacy14);
        assert_eq!(new.servo_config_path(), ServoLayout::Legacy14);
        assert_eq!(bf.servo_config_path(), ServoLayout::Legacy12);
        assert!(
            !ProtocolState::default().uses_extended_pid_block(),
            "undetected firmware uses legacy PID"
        );
    }

    #[test]
    fn rc_tuning_layouts() {
        let layout = |api| state("BTFL", Version::new(4, 0, 0), api).rc_tuning_layout();

        assert_eq!(layout(ApiVersion::new(1, 9)), RcTuningLayout::Base);
        assert_eq!(layout(ApiVersion::new(1, 36)), RcTuningLayout::Yaw);
        assert_eq!(layout(ApiVersion::new(1, 40)), RcTuningLayout::Pitch);
        assert_eq!(layout(ApiVersion::new(1, 46)), RcTuningLayout::ThrottleLimit);
    }

    #[test]
    fn dispatch_plans() {
        let inav = state("INAV", Version::new(6, 1, 0), ApiVersion::new(2, 5));
        let bf = state("BTFL", Version::new(4, 4, 0), ApiVersion::new(1, 45));

        assert_eq!(
            inav.plan(Operation::WriteServoConfig),
            [Tier::Extended, Tier::Legacy, Tier::Cli]
        );
        assert_eq!(
            bf.plan(Operation::WriteServoConfig),
            [Tier::Legacy, Tier::Cli]
        );
        assert_eq!(
            inav.plan(Operation::WritePid),
            [Tier::Extended, Tier::Legacy, Tier::Cli]
        );
        assert_eq!(bf.plan(Operation::ReadRcTuning), [Tier::Legacy, Tier::Cli]);
        assert_eq!(inav.plan(Operation::ReadSetting), [Tier::Extended, Tier::Cli]);
        assert_eq!(
            bf.plan(Operation::WriteSetting),
            [Tier::Cli],
            "Betaflight settings are console-only"
        );
        assert_eq!(bf.plan(Operation::Save), [Tier::Legacy, Tier::Cli]);
    }
}
