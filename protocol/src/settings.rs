//! Generic access to named firmware settings.
//!
//! Firmware with the settings protocol describes each setting through a
//! metadata message (type, bounds, lookup table, numeric index). The
//! metadata is cached per connection, and values are then read and written
//! through a single generic message keyed by index. On firmware without the
//! settings protocol, `get`/`set` console commands are used instead.

use crate::{
    Client, Error, Result,
    client::lock,
    command::Command,
    message::Reader,
    negotiator::{Operation, Tier},
};
use core::fmt::{Display, Formatter};
use log::{debug, warn};
use strum::{Display, FromRepr};

/// Storage type of a setting value.
#[derive(FromRepr, Display, PartialEq, Eq, Copy, Clone, Debug)]
#[repr(u8)]
pub enum SettingType {
    /// Unsigned 8-bit integer.
    U8 = 0,
    /// Signed 8-bit integer.
    I8 = 1,
    /// Unsigned 16-bit integer.
    U16 = 2,
    /// Signed 16-bit integer.
    I16 = 3,
    /// Unsigned 32-bit integer.
    U32 = 4,
    /// 32-bit float.
    F32 = 5,
    /// Text of at most `max` bytes.
    String = 6,
}

/// Decoded setting value.
#[derive(PartialEq, Clone, Debug)]
pub enum SettingValue {
    /// Integer value.
    Int(i64),
    /// Floating-point value.
    Float(f32),
    /// Text value, or the name of a lookup table entry.
    Text(String),
}

impl SettingValue {
    /// Interprets a value as printed by the console.
    #[must_use]
    pub fn from_cli(text: &str) -> Self {
        let text = text.trim();

        if let Ok(val) = text.parse() {
            Self::Int(val)
        } else if let Ok(val) = text.parse() {
            Self::Float(val)
        } else {
            Self::Text(text.to_string())
        }
    }
}

impl Display for SettingValue {
    fn fmt(&self, f: &mut Formatter) -> core::fmt::Result {
        match self {
            Self::Int(val) => write!(f, "{val}"),
            Self::Float(val) => write!(f, "{val}"),
            Self::Text(val) => write!(f, "{val}"),
        }
    }
}

/// Metadata describing one setting.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct SettingInfo {
    /// Setting name.
    pub name: String,
    /// Parameter group the setting belongs to.
    pub group: u16,
    /// Storage type.
    pub kind: SettingType,
    /// Section (master, profile, battery profile, ...).
    pub section: u8,
    /// Lower bound.
    pub min: i32,
    /// Upper bound (maximum length for text).
    pub max: u32,
    /// Numeric index used by the generic value messages.
    pub index: u16,
    /// Names of the allowed values, if the setting is a lookup table.
    pub lookup: Vec<String>,
}

impl SettingInfo {
    /// Decodes a metadata payload.
    ///
    /// Returns the metadata and the raw bytes of the current value.
    pub fn decode(payload: &[u8]) -> Result<(Self, Vec<u8>)> {
        let mut rd = Reader::new(payload);
        let name = rd.cstr()?;
        let group = rd.u16()?;
        let kind = SettingType::from_repr(rd.u8()?).ok_or(Error::ProtocolMismatch)?;
        let section = rd.u8()?;
        let is_lookup = rd.u8()? != 0;
        let min = rd.i32()?;
        let max = rd.u32()?;
        let index = rd.u16()?;
        let _profile = rd.u8()?;
        let _profile_count = rd.u8()?;
        let mut lookup = Vec::new();

        if is_lookup {
            let count = i64::from(max) - i64::from(min) + 1;

            for _ in 0..count.max(0) {
                lookup.push(rd.cstr()?);
            }
        }

        let value = rd.take(rd.remaining())?.to_vec();

        Ok((
            Self {
                name,
                group,
                kind,
                section,
                min,
                max,
                index,
                lookup,
            },
            value,
        ))
    }

    /// Returns the payload selecting this setting by index.
    #[must_use]
    pub fn selector(&self) -> Vec<u8> {
        let mut buf = vec![0x00];

        buf.extend_from_slice(&self.index.to_le_bytes());

        buf
    }

    /// Decodes raw value bytes.
    pub fn decode_value(&self, bytes: &[u8]) -> Result<SettingValue> {
        let mut rd = Reader::new(bytes);
        let int = match self.kind {
            SettingType::U8 => i64::from(rd.u8()?),
            SettingType::I8 => i64::from(rd.i8()?),
            SettingType::U16 => i64::from(rd.u16()?),
            SettingType::I16 => i64::from(rd.i16()?),
            SettingType::U32 => i64::from(rd.u32()?),
            SettingType::F32 => return Ok(SettingValue::Float(rd.f32()?)),
            SettingType::String => return Ok(SettingValue::Text(rd.rest_str())),
        };

        if self.lookup.is_empty() {
            return Ok(SettingValue::Int(int));
        }

        usize::try_from(int - i64::from(self.min))
            .ok()
            .and_then(|pos| self.lookup.get(pos))
            .map(|name| SettingValue::Text(name.clone()))
            .ok_or(Error::ProtocolMismatch)
    }

    /// Encodes a value, checking it against the bounds.
    pub fn encode_value(&self, val: &SettingValue) -> Result<Vec<u8>> {
        let int = match (val, self.kind) {
            (SettingValue::Text(text), SettingType::String) => {
                if text.len() > self.max as usize {
                    return Err(Error::InvalidArgument);
                }

                let mut buf = text.as_bytes().to_vec();

                buf.push(0x00);

                return Ok(buf);
            }
            (SettingValue::Text(name), _) => {
                let pos = self
                    .lookup
                    .iter()
                    .position(|entry| entry.eq_ignore_ascii_case(name))
                    .ok_or(Error::InvalidArgument)?;

                i64::from(self.min) + pos as i64
            }
            (SettingValue::Float(val), SettingType::F32) => {
                if f64::from(*val) < f64::from(self.min) || f64::from(*val) > f64::from(self.max) {
                    return Err(Error::InvalidArgument);
                }

                return Ok(val.to_le_bytes().to_vec());
            }
            (SettingValue::Int(val), SettingType::F32) => {
                return self.encode_value(&SettingValue::Float(*val as f32));
            }
            (SettingValue::Int(val), _) => *val,
            (SettingValue::Float(_), _) => return Err(Error::InvalidArgument),
        };

        if int < i64::from(self.min) || int > i64::from(self.max) {
            return Err(Error::InvalidArgument);
        }

        let bytes = match self.kind {
            SettingType::U8 | SettingType::I8 => vec![int as u8],
            SettingType::U16 | SettingType::I16 => (int as u16).to_le_bytes().to_vec(),
            SettingType::U32 => (int as u32).to_le_bytes().to_vec(),
            SettingType::F32 | SettingType::String => return Err(Error::InvalidArgument),
        };

        Ok(bytes)
    }
}

impl Client {
    /// Returns the metadata of a setting, querying it on first access.
    pub async fn setting_info(&self, name: &str) -> Result<SettingInfo> {
        if let Some(info) = lock(&self.shared.settings).get(name) {
            return Ok(info.clone());
        }

        let mut query = name.as_bytes().to_vec();

        query.push(0x00);

        let payload = self.request(Command::CommonSettingInfo, &query).await?;
        let (info, _) = SettingInfo::decode(&payload)?;

        if info.name != name {
            warn!("Requested setting {name}, firmware described {}", info.name);

            return Err(Error::ProtocolMismatch);
        }

        debug!("Cached metadata of setting {name}: {info:?}");
        lock(&self.shared.settings).insert(name.to_string(), info.clone());

        Ok(info)
    }

    /// Reads a named setting.
    ///
    /// Reading with `get` on the console leaves the console active, so
    /// telemetry and binary operations stay blocked until
    /// [`exit_cli`](Client::exit_cli) or
    /// [`save_to_nonvolatile`](Client::save_to_nonvolatile).
    pub async fn get_setting(&self, name: &str) -> Option<SettingValue> {
        let _guard = self.config_lock().await;
        let res = self
            .run_plan(Operation::ReadSetting, move |tier| self.read_setting_via(tier, name))
            .await;

        self.settle(Operation::ReadSetting, res)
    }

    async fn read_setting_via(&self, tier: Tier, name: &str) -> Result<SettingValue> {
        if tier == Tier::Cli {
            self.enter_cli().await?;

            return Ok(SettingValue::from_cli(&self.cli_get(name).await?));
        }

        let info = self.setting_info(name).await?;
        let payload = self.request(Command::CommonSetting, &info.selector()).await?;

        info.decode_value(&payload)
    }

    /// Writes a named setting.
    ///
    /// The value is checked against the setting's bounds before anything is
    /// written. Changes only persist after
    /// [`save_to_nonvolatile`](Client::save_to_nonvolatile).
    pub async fn set_setting(&self, name: &str, val: &SettingValue) -> bool {
        let _guard = self.config_lock().await;
        let res = self
            .run_plan(Operation::WriteSetting, move |tier| {
                self.write_setting_via(tier, name, val)
            })
            .await;

        self.settle(Operation::WriteSetting, res).is_some()
    }

    async fn write_setting_via(&self, tier: Tier, name: &str, val: &SettingValue) -> Result<()> {
        if tier == Tier::Cli {
            self.enter_cli().await?;

            return self.cli_apply(&format!("set {name} = {val}")).await;
        }

        let info = self.setting_info(name).await?;
        let mut payload = info.selector();

        payload.extend(info.encode_value(val)?);
        self.request(Command::CommonSetSetting, &payload).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cli::ConnectionMode,
        testing::{MockFirmware, MockTransport, init_logger},
    };

    fn info_payload(
        name: &str,
        kind: u8,
        lookup: &[&str],
        min: i32,
        max: u32,
        value: &[u8],
    ) -> Vec<u8> {
        let mut buf = name.as_bytes().to_vec();

        buf.push(0x00);
        buf.extend_from_slice(&0x0020u16.to_le_bytes());
        buf.extend_from_slice(&[kind, 0x00, u8::from(!lookup.is_empty())]);
        buf.extend_from_slice(&min.to_le_bytes());
        buf.extend_from_slice(&max.to_le_bytes());
        buf.extend_from_slice(&0x0105u16.to_le_bytes());
        buf.extend_from_slice(&[0x00, 0x03]);

        for entry in lookup {
            buf.extend_from_slice(entry.as_bytes());
            buf.push(0x00);
        }

        buf.extend_from_slice(value);

        buf
    }

    #[test]
    fn decode_lookup_setting() -> Result<()> {
        let lookup = ["CURRENT", "EXTRA", "FIXED"];
        let payload = info_payload("nav_rth_alt_mode", 0, &lookup, 0, 2, &[2]);
        let (info, value) = SettingInfo::decode(&payload)?;

        assert_eq!(info.index, 0x0105);
        assert_eq!(info.lookup.len(), 3);
        assert_eq!(info.decode_value(&value)?, SettingValue::Text("FIXED".into()));
        assert_eq!(info.encode_value(&SettingValue::Text("extra".into()))?, [1]);
        assert_eq!(
            info.encode_value(&SettingValue::Text("NONE".into())),
            Err(Error::InvalidArgument),
            "unknown lookup entry should be rejected"
        );

        Ok(())
    }

    #[test]
    fn bounds_are_checked() -> Result<()> {
        let payload = info_payload("roll_rate", 3, &[], -10, 1800, &[0, 0]);
        let (info, _) = SettingInfo::decode(&payload)?;

        assert_eq!(info.encode_value(&SettingValue::Int(-5))?, (-5i16).to_le_bytes());
        assert_eq!(
            info.encode_value(&SettingValue::Int(1801)),
            Err(Error::InvalidArgument),
            "value above max should be rejected"
        );
        assert_eq!(SettingValue::from_cli(" 250 "), SettingValue::Int(250));
        assert_eq!(SettingValue::from_cli("0.5"), SettingValue::Float(0.5));
        assert_eq!(SettingValue::from_cli("OFF"), SettingValue::Text("OFF".into()));

        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn read_by_index_and_cache() {
        init_logger();

        let firmware = MockFirmware::new()
            .identity("INAV", [7, 1, 0], [2, 5])
            .respond(
                Command::CommonSettingInfo,
                &info_payload("nav_rth_altitude", 4, &[], 0, 65000, &[0xe8, 0x03, 0, 0]),
            )
            .respond(Command::CommonSetting, &[0x10, 0x27, 0, 0]);
        let (client, transport) = MockTransport::attach(firmware);

        client.detect_protocol().await;

        assert_eq!(
            client.get_setting("nav_rth_altitude").await,
            Some(SettingValue::Int(10_000))
        );
        assert_eq!(
            client.get_setting("nav_rth_altitude").await,
            Some(SettingValue::Int(10_000))
        );

        let requests = transport.requests();
        let info_queries = requests
            .iter()
            .filter(|f| f.command == Command::CommonSettingInfo.id())
            .count();

        assert_eq!(info_queries, 1, "metadata should be cached per connection");
        assert_eq!(
            requests.last().map(|f| f.payload.clone()),
            Some(vec![0x00, 0x05, 0x01]),
            "value should be read by index"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn console_only_firmware() {
        init_logger();

        let firmware = MockFirmware::new()
            .identity("BTFL", [4, 5, 1], [1, 46])
            .line("set gyro_lpf1_static_hz", "gyro_lpf1_static_hz set to 250")
            .line("set foo", "###ERROR IN set: INVALID NAME: foo###");
        let (client, transport) = MockTransport::attach(firmware);

        client.detect_protocol().await;

        assert!(
            client
                .set_setting("gyro_lpf1_static_hz", &SettingValue::Int(250))
                .await
        );
        assert_eq!(client.mode(), ConnectionMode::Cli);
        assert!(
            transport
                .requests()
                .iter()
                .all(|f| f.command != Command::CommonSetSetting.id()),
            "no binary setting message should be sent"
        );
        assert!(
            !client.set_setting("foo", &SettingValue::Int(1)).await,
            "rejected line should fail"
        );
    }
}
