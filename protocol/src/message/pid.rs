//! PID gain blocks.
//!
//! Legacy firmware exchanges three bytes (P, I, D) per controller, with the
//! number of controllers implied by the payload length. Extended firmware
//! always exchanges a complete block of [`EXTENDED_CHANNELS`] controllers
//! with four bytes each (P, I, D, FF) and rejects partial blocks, which is
//! why updates are sparse and merged into the last known complete block.

use super::Reader;
use crate::{Error, Result};
use std::collections::BTreeMap;

/// Number of controllers in an extended block.
pub const EXTENDED_CHANNELS: usize = 11;

/// Size of an extended block in bytes.
pub const EXTENDED_BLOCK_LEN: usize = EXTENDED_CHANNELS * 4;

/// Axes whose controllers are exposed as console settings, in block order.
pub const CLI_AXES: [&str; 3] = ["roll", "pitch", "yaw"];

/// Wire layout a block was read with.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum PidLayout {
    /// Three bytes per controller.
    Legacy,
    /// Four bytes per controller, fixed controller count.
    Extended,
    /// Read from console settings, roll, pitch and yaw only.
    Console,
}

/// Gains of a single controller.
#[derive(PartialEq, Eq, Default, Copy, Clone, Debug)]
pub struct PidGains {
    /// Proportional gain.
    pub p: u8,
    /// Integral gain.
    pub i: u8,
    /// Derivative gain.
    pub d: u8,
    /// Feed-forward gain. Always `0` for legacy blocks.
    pub ff: u8,
}

impl PidGains {
    /// Constructs new gains.
    #[must_use]
    pub const fn new(p: u8, i: u8, d: u8, ff: u8) -> Self {
        Self { p, i, d, ff }
    }

    /// Returns the gains in P, I, D, FF order.
    #[must_use]
    pub const fn terms(&self) -> [u8; 4] {
        [self.p, self.i, self.d, self.ff]
    }

    /// Returns the console setting names of P, I, D and FF for an axis.
    #[must_use]
    pub fn cli_names(axis: &str, inav: bool) -> [String; 4] {
        if inav {
            [
                format!("mc_p_{axis}"),
                format!("mc_i_{axis}"),
                format!("mc_d_{axis}"),
                format!("mc_cd_{axis}"),
            ]
        } else {
            [
                format!("p_{axis}"),
                format!("i_{axis}"),
                format!("d_{axis}"),
                format!("f_{axis}"),
            ]
        }
    }
}

/// Complete set of controller gains.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct PidBlock {
    layout: PidLayout,
    channels: Vec<PidGains>,
}

impl PidBlock {
    /// Decodes a legacy `PID` payload.
    pub fn decode_legacy(payload: &[u8]) -> Result<Self> {
        if payload.is_empty() || payload.len() % 3 != 0 {
            return Err(Error::ProtocolMismatch);
        }

        let channels = payload
            .chunks_exact(3)
            .map(|c| PidGains::new(c[0], c[1], c[2], 0))
            .collect();

        Ok(Self {
            layout: PidLayout::Legacy,
            channels,
        })
    }

    /// Decodes an extended `PID` payload, which must be a complete block.
    pub fn decode_extended(payload: &[u8]) -> Result<Self> {
        if payload.len() != EXTENDED_BLOCK_LEN {
            return Err(Error::ProtocolMismatch);
        }

        let mut rd = Reader::new(payload);
        let mut channels = Vec::with_capacity(EXTENDED_CHANNELS);

        for _ in 0..EXTENDED_CHANNELS {
            channels.push(PidGains::new(rd.u8()?, rd.u8()?, rd.u8()?, rd.u8()?));
        }

        Ok(Self {
            layout: PidLayout::Extended,
            channels,
        })
    }

    /// Constructs a block from gains read on the console, one per entry of
    /// [`CLI_AXES`].
    #[must_use]
    pub fn from_console(channels: Vec<PidGains>) -> Self {
        Self {
            layout: PidLayout::Console,
            channels,
        }
    }

    /// Encodes the block in the layout it was read with.
    ///
    /// Console blocks use the four-byte form.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        match self.layout {
            PidLayout::Legacy => self
                .channels
                .iter()
                .flat_map(|g| [g.p, g.i, g.d])
                .collect(),
            PidLayout::Extended | PidLayout::Console => self
                .channels
                .iter()
                .flat_map(|g| [g.p, g.i, g.d, g.ff])
                .collect(),
        }
    }

    /// Returns the wire layout of this block.
    #[must_use]
    pub fn layout(&self) -> PidLayout {
        self.layout
    }

    /// Returns the gains of the controller at the given index.
    #[must_use]
    pub fn channel(&self, index: usize) -> Option<PidGains> {
        self.channels.get(index).copied()
    }

    /// Returns all controllers.
    #[must_use]
    pub fn channels(&self) -> &[PidGains] {
        &self.channels
    }

    /// Merges a sparse update into the block.
    ///
    /// Fails with [`Error::InvalidArgument`] without modifying the block if
    /// the update refers to a controller the block does not have.
    pub fn merge(&mut self, update: &PidUpdate) -> Result<()> {
        if update
            .gains
            .keys()
            .any(|&index| index >= self.channels.len())
        {
            return Err(Error::InvalidArgument);
        }

        for (&index, &gains) in &update.gains {
            self.channels[index] = gains;
        }

        Ok(())
    }
}

/// Sparse set of controller gains to be written.
#[derive(PartialEq, Eq, Default, Clone, Debug)]
pub struct PidUpdate {
    gains: BTreeMap<usize, PidGains>,
}

impl PidUpdate {
    /// Constructs an empty update.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the gains for the controller at the given index.
    #[must_use]
    pub fn with(mut self, index: usize, gains: PidGains) -> Self {
        self.gains.insert(index, gains);
        self
    }

    /// Returns the changed controllers by index.
    pub fn iter(&self) -> impl Iterator<Item = (usize, PidGains)> + '_ {
        self.gains.iter().map(|(&index, &gains)| (index, gains))
    }

    /// Returns `true` if no controller is changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.gains.is_empty()
    }
}

impl From<&PidBlock> for PidUpdate {
    fn from(block: &PidBlock) -> Self {
        Self {
            gains: block.channels.iter().copied().enumerate().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_block() -> Result<()> {
        let block = PidBlock::decode_legacy(&[45, 80, 30, 47, 84, 32])?;

        assert_eq!(block.channels().len(), 2);
        assert_eq!(block.channel(1), Some(PidGains::new(47, 84, 32, 0)));
        assert_eq!(block.encode(), [45, 80, 30, 47, 84, 32]);
        assert_eq!(
            PidBlock::decode_legacy(&[1, 2]),
            Err(Error::ProtocolMismatch),
            "partial controller should fail"
        );

        Ok(())
    }

    #[test]
    fn extended_block_is_complete() -> Result<()> {
        let payload: Vec<u8> = (0..EXTENDED_BLOCK_LEN as u8).collect();
        let mut block = PidBlock::decode_extended(&payload)?;

        assert_eq!(block.channel(10), Some(PidGains::new(40, 41, 42, 43)));

        block.merge(&PidUpdate::new().with(0, PidGains::new(45, 80, 30, 120)))?;

        let encoded = block.encode();

        assert_eq!(encoded.len(), EXTENDED_BLOCK_LEN, "block should stay complete");
        assert_eq!(encoded[..4], [45, 80, 30, 120]);
        assert_eq!(encoded[4..], payload[4..], "other controllers should be kept");
        assert_eq!(
            PidBlock::decode_extended(&payload[..40]),
            Err(Error::ProtocolMismatch)
        );

        Ok(())
    }

    #[test]
    fn merge_out_of_range() -> Result<()> {
        let mut block = PidBlock::decode_legacy(&[1, 2, 3])?;
        let update = PidUpdate::new()
            .with(0, PidGains::new(9, 9, 9, 0))
            .with(3, PidGains::default());

        assert_eq!(block.merge(&update), Err(Error::InvalidArgument));
        assert_eq!(
            block.channel(0),
            Some(PidGains::new(1, 2, 3, 0)),
            "rejected merge should not modify the block"
        );

        Ok(())
    }

    #[test]
    fn console_names() {
        assert_eq!(
            PidGains::cli_names("pitch", false),
            ["p_pitch", "i_pitch", "d_pitch", "f_pitch"]
        );
        assert_eq!(PidGains::cli_names("yaw", true)[3], "mc_cd_yaw");
        assert_eq!(
            PidBlock::from_console(vec![PidGains::new(1, 2, 3, 4)]).encode(),
            [1, 2, 3, 4]
        );
    }
}
