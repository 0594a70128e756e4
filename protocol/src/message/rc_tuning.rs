//! Rates and expo.
//!
//! Both payload forms also map field by field onto console settings, in
//! wire order.

use super::Reader;
use crate::{Error, Result, negotiator::RcTuningLayout};

/// Console setting backing one payload field.
#[derive(Copy, Clone, Debug)]
enum CliField {
    U8(&'static str),
    U16(&'static str),
    Lookup(&'static str, &'static [&'static str]),
}

impl CliField {
    fn name(self) -> &'static str {
        match self {
            Self::U8(name) | Self::U16(name) | Self::Lookup(name, _) => name,
        }
    }
}

const THROTTLE_LIMIT_TYPES: &[&str] = &["OFF", "SCALE", "CLIP"];

/// Legacy fields after RC rate and expo.
const LEGACY_FIELDS: [CliField; 13] = [
    CliField::U8("roll_srate"),
    CliField::U8("pitch_srate"),
    CliField::U8("yaw_srate"),
    CliField::U8("tpa_rate"),
    CliField::U8("thr_mid"),
    CliField::U8("thr_expo"),
    CliField::U16("tpa_breakpoint"),
    CliField::U8("yaw_expo"),
    CliField::U8("yaw_rc_rate"),
    CliField::U8("pitch_rc_rate"),
    CliField::U8("pitch_expo"),
    CliField::Lookup("throttle_limit_type", THROTTLE_LIMIT_TYPES),
    CliField::U8("throttle_limit_percent"),
];

const PROFILE_FIELDS: [CliField; 14] = [
    CliField::U8("thr_mid"),
    CliField::U8("thr_expo"),
    CliField::U8("tpa_rate"),
    CliField::U16("tpa_breakpoint"),
    CliField::U8("rc_expo"),
    CliField::U8("rc_yaw_expo"),
    CliField::U8("roll_rate"),
    CliField::U8("pitch_rate"),
    CliField::U8("yaw_rate"),
    CliField::U8("manual_rc_expo"),
    CliField::U8("manual_rc_yaw_expo"),
    CliField::U8("manual_roll_rate"),
    CliField::U8("manual_pitch_rate"),
    CliField::U8("manual_yaw_rate"),
];

fn legacy_fields(layout: RcTuningLayout) -> Vec<CliField> {
    // Roll rate and expo were split per axis together with the throttle limit
    let (rate, expo) = if layout >= RcTuningLayout::ThrottleLimit {
        ("roll_rc_rate", "roll_expo")
    } else {
        ("rc_rate", "rc_expo")
    };
    let count = match layout {
        RcTuningLayout::Base => 9,
        RcTuningLayout::Yaw => 11,
        RcTuningLayout::Pitch => 13,
        RcTuningLayout::ThrottleLimit => 15,
    };

    [CliField::U8(rate), CliField::U8(expo)]
        .into_iter()
        .chain(LEGACY_FIELDS)
        .take(count)
        .collect()
}

fn cli_values(fields: &[CliField], payload: &[u8]) -> Result<Vec<(&'static str, String)>> {
    let mut rd = Reader::new(payload);

    fields
        .iter()
        .map(|&field| {
            let val = match field {
                CliField::U8(_) => rd.u8()?.to_string(),
                CliField::U16(_) => rd.u16()?.to_string(),
                CliField::Lookup(_, table) => {
                    let index = rd.u8()?;

                    table
                        .get(usize::from(index))
                        .map_or_else(|| index.to_string(), |entry| (*entry).to_string())
                }
            };

            Ok((field.name(), val))
        })
        .collect()
}

fn cli_payload(fields: &[CliField], values: &[String]) -> Result<Vec<u8>> {
    if values.len() != fields.len() {
        return Err(Error::ProtocolMismatch);
    }

    let mut buf = Vec::with_capacity(fields.len() + 1);

    for (&field, val) in fields.iter().zip(values) {
        let val = val.trim();

        match field {
            CliField::U8(_) => buf.push(val.parse().map_err(|_| Error::ProtocolMismatch)?),
            CliField::U16(_) => {
                let val: u16 = val.parse().map_err(|_| Error::ProtocolMismatch)?;

                buf.extend_from_slice(&val.to_le_bytes());
            }
            CliField::Lookup(_, table) => {
                let index = table
                    .iter()
                    .position(|entry| entry.eq_ignore_ascii_case(val))
                    .ok_or(Error::ProtocolMismatch)?;

                buf.push(index as u8);
            }
        }
    }

    Ok(buf)
}

/// Legacy `RC_TUNING` payload.
///
/// Fields not present in the negotiated layout decode as `0` and are not
/// written.
#[derive(PartialEq, Eq, Default, Clone, Debug)]
pub struct RcTuning {
    /// RC rate.
    pub rc_rate: u8,
    /// RC expo.
    pub rc_expo: u8,
    /// Roll super rate.
    pub roll_rate: u8,
    /// Pitch super rate.
    pub pitch_rate: u8,
    /// Yaw super rate.
    pub yaw_rate: u8,
    /// Throttle PID attenuation.
    pub tpa: u8,
    /// Throttle curve midpoint.
    pub throttle_mid: u8,
    /// Throttle curve expo.
    pub throttle_expo: u8,
    /// Throttle PID attenuation breakpoint.
    pub tpa_breakpoint: u16,
    /// Yaw expo.
    pub yaw_expo: u8,
    /// Yaw RC rate.
    pub yaw_rc_rate: u8,
    /// Pitch RC rate.
    pub pitch_rc_rate: u8,
    /// Pitch expo.
    pub pitch_expo: u8,
    /// Throttle limit type.
    pub throttle_limit_type: u8,
    /// Throttle limit in percent.
    pub throttle_limit_percent: u8,
}

impl RcTuning {
    /// Decodes a payload in the given layout.
    pub fn decode(payload: &[u8], layout: RcTuningLayout) -> Result<Self> {
        let mut rd = Reader::new(payload);
        let mut tuning = Self {
            rc_rate: rd.u8()?,
            rc_expo: rd.u8()?,
            roll_rate: rd.u8()?,
            pitch_rate: rd.u8()?,
            yaw_rate: rd.u8()?,
            tpa: rd.u8()?,
            throttle_mid: rd.u8()?,
            throttle_expo: rd.u8()?,
            tpa_breakpoint: rd.u16()?,
            ..Self::default()
        };

        if layout >= RcTuningLayout::Yaw {
            tuning.yaw_expo = rd.u8()?;
            tuning.yaw_rc_rate = rd.u8()?;
        }

        if layout >= RcTuningLayout::Pitch {
            tuning.pitch_rc_rate = rd.u8()?;
            tuning.pitch_expo = rd.u8()?;
        }

        if layout >= RcTuningLayout::ThrottleLimit {
            tuning.throttle_limit_type = rd.u8()?;
            tuning.throttle_limit_percent = rd.u8()?;
        }

        Ok(tuning)
    }

    /// Encodes the payload in the given layout.
    #[must_use]
    pub fn encode(&self, layout: RcTuningLayout) -> Vec<u8> {
        let mut buf = vec![
            self.rc_rate,
            self.rc_expo,
            self.roll_rate,
            self.pitch_rate,
            self.yaw_rate,
            self.tpa,
            self.throttle_mid,
            self.throttle_expo,
        ];

        buf.extend_from_slice(&self.tpa_breakpoint.to_le_bytes());

        if layout >= RcTuningLayout::Yaw {
            buf.extend_from_slice(&[self.yaw_expo, self.yaw_rc_rate]);
        }

        if layout >= RcTuningLayout::Pitch {
            buf.extend_from_slice(&[self.pitch_rc_rate, self.pitch_expo]);
        }

        if layout >= RcTuningLayout::ThrottleLimit {
            buf.extend_from_slice(&[self.throttle_limit_type, self.throttle_limit_percent]);
        }

        buf
    }
}

/// Expo and per-axis rates of one flight mode group.
#[derive(PartialEq, Eq, Default, Copy, Clone, Debug)]
pub struct AxisRates {
    /// Roll and pitch expo.
    pub expo: u8,
    /// Yaw expo.
    pub yaw_expo: u8,
    /// Roll, pitch and yaw rates.
    pub rates: [u8; 3],
}

/// Extended `INAV_RATE_PROFILE` payload (15 bytes).
#[derive(PartialEq, Eq, Default, Clone, Debug)]
pub struct RateProfile {
    /// Throttle curve midpoint.
    pub throttle_mid: u8,
    /// Throttle curve expo.
    pub throttle_expo: u8,
    /// Throttle PID attenuation.
    pub tpa: u8,
    /// Throttle PID attenuation breakpoint.
    pub tpa_breakpoint: u16,
    /// Rates used in stabilized modes.
    pub stabilized: AxisRates,
    /// Rates used in manual mode.
    pub manual: AxisRates,
}

impl RateProfile {
    /// Decodes the payload.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut rd = Reader::new(payload);
        let throttle_mid = rd.u8()?;
        let throttle_expo = rd.u8()?;
        let tpa = rd.u8()?;
        let tpa_breakpoint = rd.u16()?;
        let mut axes = [AxisRates::default(); 2];

        for axis in &mut axes {
            axis.expo = rd.u8()?;
            axis.yaw_expo = rd.u8()?;
            axis.rates = [rd.u8()?, rd.u8()?, rd.u8()?];
        }

        let [stabilized, manual] = axes;

        Ok(Self {
            throttle_mid,
            throttle_expo,
            tpa,
            tpa_breakpoint,
            stabilized,
            manual,
        })
    }

    /// Encodes the payload.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![self.throttle_mid, self.throttle_expo, self.tpa];

        buf.extend_from_slice(&self.tpa_breakpoint.to_le_bytes());

        for axis in [&self.stabilized, &self.manual] {
            buf.extend_from_slice(&[axis.expo, axis.yaw_expo]);
            buf.extend_from_slice(&axis.rates);
        }

        buf
    }
}

/// Rate configuration in the form the firmware exchanges it.
#[derive(PartialEq, Eq, Clone, Debug)]
pub enum Rates {
    /// Legacy rate tuning.
    Legacy(RcTuning),
    /// Extended per-axis rate profile.
    Extended(RateProfile),
}

impl Rates {
    /// Returns the console settings holding the rates of the given form.
    #[must_use]
    pub fn cli_names(extended: bool, layout: RcTuningLayout) -> Vec<&'static str> {
        if extended {
            PROFILE_FIELDS.iter().map(|field| field.name()).collect()
        } else {
            legacy_fields(layout).iter().map(|field| field.name()).collect()
        }
    }

    /// Assembles rates from console values given in the order of
    /// [`Rates::cli_names`].
    pub fn from_cli(extended: bool, layout: RcTuningLayout, values: &[String]) -> Result<Self> {
        if extended {
            let payload = cli_payload(&PROFILE_FIELDS, values)?;

            Ok(Self::Extended(RateProfile::decode(&payload)?))
        } else {
            let payload = cli_payload(&legacy_fields(layout), values)?;

            Ok(Self::Legacy(RcTuning::decode(&payload, layout)?))
        }
    }

    /// Returns the console settings and values to write.
    pub fn cli_settings(&self, layout: RcTuningLayout) -> Result<Vec<(&'static str, String)>> {
        match self {
            Self::Legacy(tuning) => cli_values(&legacy_fields(layout), &tuning.encode(layout)),
            Self::Extended(profile) => cli_values(&PROFILE_FIELDS, &profile.encode()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BTFL_4_5: [u8; 16] = [
        100, 0, 70, 70, 70, 65, 50, 0, 0x5e, 0x06, 0, 100, 100, 0, 0, 100,
    ];

    #[test]
    fn legacy_layouts() -> Result<()> {
        let tuning = RcTuning::decode(&BTFL_4_5, RcTuningLayout::ThrottleLimit)?;

        assert_eq!(tuning.rc_rate, 100);
        assert_eq!(tuning.tpa_breakpoint, 1630);
        assert_eq!(tuning.pitch_rc_rate, 100);
        assert_eq!(tuning.throttle_limit_percent, 100);
        assert_eq!(tuning.encode(RcTuningLayout::ThrottleLimit), BTFL_4_5);
        assert_eq!(
            tuning.encode(RcTuningLayout::Base).len(),
            10,
            "base layout should omit optional fields"
        );
        assert_eq!(
            RcTuning::decode(&BTFL_4_5[..12], RcTuningLayout::Pitch),
            Err(Error::ProtocolMismatch),
            "layout longer than payload should fail"
        );

        Ok(())
    }

    #[test]
    fn rate_profile() -> Result<()> {
        let payload = [50, 0, 0, 0xdc, 0x05, 70, 20, 20, 20, 20, 0, 0, 100, 100, 100];
        let profile = RateProfile::decode(&payload)?;

        assert_eq!(profile.tpa_breakpoint, 1500);
        assert_eq!(profile.stabilized.expo, 70);
        assert_eq!(profile.manual.rates, [100, 100, 100]);
        assert_eq!(profile.encode(), payload);

        Ok(())
    }

    #[test]
    fn console_settings() -> Result<()> {
        let tuning = RcTuning::decode(&BTFL_4_5, RcTuningLayout::ThrottleLimit)?;
        let rates = Rates::Legacy(tuning);
        let settings = rates.cli_settings(RcTuningLayout::ThrottleLimit)?;

        assert_eq!(settings.len(), 15);
        assert_eq!(settings[0], ("roll_rc_rate", "100".to_string()));
        assert_eq!(settings[8], ("tpa_breakpoint", "1630".to_string()));
        assert_eq!(settings[13], ("throttle_limit_type", "OFF".to_string()));

        let values: Vec<_> = settings.into_iter().map(|(_, val)| val).collect();

        assert_eq!(
            Rates::from_cli(false, RcTuningLayout::ThrottleLimit, &values)?,
            rates
        );
        assert_eq!(
            Rates::cli_names(false, RcTuningLayout::Base),
            [
                "rc_rate", "rc_expo", "roll_srate", "pitch_srate", "yaw_srate", "tpa_rate",
                "thr_mid", "thr_expo", "tpa_breakpoint"
            ]
        );
        assert_eq!(Rates::cli_names(true, RcTuningLayout::Base)[6], "roll_rate");
        assert_eq!(
            Rates::from_cli(true, RcTuningLayout::Base, &values[..3]),
            Err(Error::ProtocolMismatch),
            "missing values should fail"
        );

        Ok(())
    }
}
