//! Servo limits and rates.
//!
//! Three payload layouts exist in the wild; which one applies is decided by
//! [`ProtocolState::servo_config_path`](crate::negotiator::ProtocolState::servo_config_path).

use super::Reader;
use crate::{Error, Result};

/// Value of [`ServoConfig::forward_channel`] meaning "not forwarded".
pub const NO_FORWARD: u8 = 0xff;

/// Servo configuration payload layout.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum ServoLayout {
    /// Extended message: min, max, middle, rate (7 bytes per servo).
    Extended,
    /// Legacy message: min, max, middle, rate, forward channel, reversed
    /// sources (12 bytes per servo).
    Legacy12,
    /// Legacy message with angle-at-min and angle-at-max fields
    /// (14 bytes per servo).
    Legacy14,
}

impl ServoLayout {
    /// Returns the size of one servo in a configuration payload.
    #[must_use]
    pub const fn entry_len(self) -> usize {
        match self {
            Self::Extended => 7,
            Self::Legacy12 => 12,
            Self::Legacy14 => 14,
        }
    }
}

/// Configuration of one servo output.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct ServoConfig {
    /// Minimum pulse width in microseconds.
    pub min: i16,
    /// Maximum pulse width in microseconds.
    pub max: i16,
    /// Center pulse width in microseconds.
    pub middle: i16,
    /// Rate in percent, negative to reverse.
    pub rate: i8,
    /// RC channel forwarded to this servo, or [`NO_FORWARD`].
    pub forward_channel: u8,
    /// Bit set of reversed input sources.
    pub reversed_sources: u32,
    /// Angle at minimum throw (14-byte layout only).
    pub angle_min: u8,
    /// Angle at maximum throw (14-byte layout only).
    pub angle_max: u8,
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            min: 1000,
            max: 2000,
            middle: 1500,
            rate: 100,
            forward_channel: NO_FORWARD,
            reversed_sources: 0,
            angle_min: 90,
            angle_max: 90,
        }
    }
}

impl ServoConfig {
    /// Decodes all servos of a configuration payload.
    pub fn decode_all(payload: &[u8], layout: ServoLayout) -> Result<Vec<Self>> {
        let len = layout.entry_len();

        if payload.len() % len != 0 {
            return Err(Error::ProtocolMismatch);
        }

        payload
            .chunks_exact(len)
            .map(|entry| Self::decode(entry, layout))
            .collect()
    }

    fn decode(entry: &[u8], layout: ServoLayout) -> Result<Self> {
        let mut rd = Reader::new(entry);
        let mut cfg = Self {
            min: rd.i16()?,
            max: rd.i16()?,
            middle: rd.i16()?,
            rate: rd.i8()?,
            ..Self::default()
        };

        if layout == ServoLayout::Legacy14 {
            cfg.angle_min = rd.u8()?;
            cfg.angle_max = rd.u8()?;
        }

        if layout != ServoLayout::Extended {
            cfg.forward_channel = rd.u8()?;
            cfg.reversed_sources = rd.u32()?;
        }

        Ok(cfg)
    }

    /// Encodes the payload writing this configuration to the servo at the
    /// given index.
    #[must_use]
    pub fn encode_set(&self, index: u8, layout: ServoLayout) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + layout.entry_len());

        buf.push(index);
        buf.extend_from_slice(&self.min.to_le_bytes());
        buf.extend_from_slice(&self.max.to_le_bytes());
        buf.extend_from_slice(&self.middle.to_le_bytes());
        buf.extend_from_slice(&self.rate.to_le_bytes());

        if layout == ServoLayout::Legacy14 {
            buf.extend_from_slice(&[self.angle_min, self.angle_max]);
        }

        if layout != ServoLayout::Extended {
            buf.push(self.forward_channel);
            buf.extend_from_slice(&self.reversed_sources.to_le_bytes());
        }

        buf
    }

    /// Formats the console command configuring the servo at the given index.
    ///
    /// INAV omits the forward channel; other firmware writes it as `-1`
    /// when unused.
    #[must_use]
    pub fn cli_line(&self, index: u8, inav: bool) -> String {
        let mut line = format!(
            "servo {index} {} {} {} {}",
            self.min, self.max, self.middle, self.rate
        );

        if !inav {
            let forward = if self.forward_channel == NO_FORWARD {
                -1
            } else {
                i16::from(self.forward_channel)
            };

            line.push_str(&format!(" {forward}"));
        }

        line
    }

    /// Parses one `servo` line of console `dump` output.
    ///
    /// Returns the servo index and its configuration.
    #[must_use]
    pub fn parse_cli_line(line: &str) -> Option<(u8, Self)> {
        let mut fields = line.split_whitespace();

        if fields.next()? != "servo" {
            return None;
        }

        let index = fields.next()?.parse().ok()?;
        let mut cfg = Self {
            min: fields.next()?.parse().ok()?,
            max: fields.next()?.parse().ok()?,
            middle: fields.next()?.parse().ok()?,
            rate: fields.next()?.parse().ok()?,
            ..Self::default()
        };

        if let Some(forward) = fields.next() {
            cfg.forward_channel = match forward.parse::<i16>().ok()? {
                -1 => NO_FORWARD,
                channel => u8::try_from(channel).ok()?,
            };
        }

        Some((index, cfg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layouts() -> Result<()> {
        let cfg = ServoConfig {
            rate: -100,
            ..ServoConfig::default()
        };

        for layout in [ServoLayout::Extended, ServoLayout::Legacy12, ServoLayout::Legacy14] {
            let payload = cfg.encode_set(2, layout);

            assert_eq!(payload.len(), 1 + layout.entry_len(), "{layout:?} length");
            assert_eq!(payload[0], 2, "index should come first");
            assert_eq!(
                ServoConfig::decode_all(&payload[1..], layout)?,
                [cfg],
                "{layout:?} should decode its own entries"
            );
        }

        assert_eq!(
            ServoConfig::decode_all(&[0; 13], ServoLayout::Legacy12),
            Err(Error::ProtocolMismatch)
        );

        Ok(())
    }

    #[test]
    fn console_lines() {
        let cfg = ServoConfig {
            min: 1100,
            max: 1900,
            middle: 1500,
            rate: 80,
            ..ServoConfig::default()
        };

        assert_eq!(cfg.cli_line(0, true), "servo 0 1100 1900 1500 80");
        assert_eq!(cfg.cli_line(0, false), "servo 0 1100 1900 1500 80 -1");
        assert_eq!(ServoConfig::parse_cli_line("servo 0 1100 1900 1500 80 -1"), Some((0, cfg)));
        assert_eq!(
            ServoConfig::parse_cli_line("servo 1 1000 2000 1500 100 4")
                .map(|(_, c)| c.forward_channel),
            Some(4)
        );
    }
}
