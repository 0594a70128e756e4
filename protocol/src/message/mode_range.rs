//! Auxiliary mode activation ranges.

use super::Reader;
use crate::{Error, Result};

/// Lowest channel value representable by a range step.
const PWM_BASE: u16 = 900;

/// Channel value covered by one range step.
const PWM_STEP: u16 = 25;

/// Highest representable step (2100 µs).
const MAX_STEP: u8 = 48;

/// Size of one range in a `MODE_RANGES` payload.
const RANGE_LEN: usize = 4;

/// Activates a flight mode while an auxiliary channel is within a range.
#[derive(PartialEq, Eq, Default, Copy, Clone, Debug)]
pub struct ModeRange {
    /// Permanent box identifier of the flight mode.
    pub box_id: u8,
    /// Auxiliary channel index (0 = AUX1).
    pub aux_channel: u8,
    /// Start of the range in steps of 25 µs above 900 µs.
    pub start_step: u8,
    /// End of the range in steps of 25 µs above 900 µs.
    pub end_step: u8,
}

impl ModeRange {
    /// Constructs a range from channel values in microseconds.
    ///
    /// Values are rounded down to the nearest step.
    pub fn from_pwm(box_id: u8, aux_channel: u8, start: u16, end: u16) -> Result<Self> {
        Ok(Self {
            box_id,
            aux_channel,
            start_step: pwm_to_step(start)?,
            end_step: pwm_to_step(end)?,
        })
    }

    /// Returns the start of the range in microseconds.
    #[must_use]
    pub fn start_pwm(&self) -> u16 {
        PWM_BASE + u16::from(self.start_step) * PWM_STEP
    }

    /// Returns the end of the range in microseconds.
    #[must_use]
    pub fn end_pwm(&self) -> u16 {
        PWM_BASE + u16::from(self.end_step) * PWM_STEP
    }

    /// Returns `true` if the range is unused.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start_step >= self.end_step
    }

    /// Decodes all ranges of a `MODE_RANGES` payload.
    pub fn decode_all(payload: &[u8]) -> Result<Vec<Self>> {
        if payload.len() % RANGE_LEN != 0 {
            return Err(Error::ProtocolMismatch);
        }

        let mut rd = Reader::new(payload);
        let mut ranges = Vec::with_capacity(payload.len() / RANGE_LEN);

        while rd.remaining() > 0 {
            ranges.push(Self {
                box_id: rd.u8()?,
                aux_channel: rd.u8()?,
                start_step: rd.u8()?,
                end_step: rd.u8()?,
            });
        }

        Ok(ranges)
    }

    /// Encodes a `SET_MODE_RANGE` payload for the slot at the given index.
    #[must_use]
    pub fn encode_set(&self, index: u8) -> Vec<u8> {
        vec![
            index,
            self.box_id,
            self.aux_channel,
            self.start_step,
            self.end_step,
        ]
    }

    /// Formats the console command setting the slot at the given index.
    #[must_use]
    pub fn cli_line(&self, index: u8) -> String {
        format!(
            "aux {index} {} {} {} {}",
            self.box_id,
            self.aux_channel,
            self.start_pwm(),
            self.end_pwm()
        )
    }

    /// Parses one `aux` line of console `dump` output.
    ///
    /// Returns the slot index and the range.
    #[must_use]
    pub fn parse_cli_line(line: &str) -> Option<(u8, Self)> {
        let mut fields = line.split_whitespace();

        if fields.next()? != "aux" {
            return None;
        }

        let index = fields.next()?.parse().ok()?;
        let box_id = fields.next()?.parse().ok()?;
        let aux_channel = fields.next()?.parse().ok()?;
        let start = fields.next()?.parse().ok()?;
        let end = fields.next()?.parse().ok()?;

        Some((
            index,
            Self::from_pwm(box_id, aux_channel, start, end).ok()?,
        ))
    }
}

fn pwm_to_step(pwm: u16) -> Result<u8> {
    let step = pwm
        .checked_sub(PWM_BASE)
        .map(|offset| offset / PWM_STEP)
        .ok_or(Error::InvalidArgument)?;

    u8::try_from(step)
        .ok()
        .filter(|&step| step <= MAX_STEP)
        .ok_or(Error::InvalidArgument)
}
