//! Talk to MSP flight controllers over a serial or TCP byte stream.
//!
//! # Overview
//!
//! The `fclink` crate implements the client side of the MultiWii Serial
//! Protocol (MSP) as spoken by Betaflight, INAV, Cleanflight and related
//! flight-controller firmware. Both binary wire versions are supported, and
//! the firmware's textual command-line console (CLI) is used as a fallback
//! for configuration values that have no binary setter on a given firmware.
//!
//! Depending on your needs, you can:
//!
//! - Use the high-level operations on [`Client`] (PID gains, rates, mode
//!   ranges, servos, named settings, telemetry) which pick a wire path based
//!   on the detected firmware and fall back automatically.
//! - Drive the text console directly through [`Client::enter_cli`],
//!   [`Client::send_line`] and [`Client::exit_cli`].
//! - Issue raw requests through [`Client::dispatch`] and the [`codec`] module.
//!
//! # Getting started
//!
//! A [`Client`] is attached to anything implementing [`transport::Transport`].
//! With the `native-serial` feature, a serial port can be opened through
//! `serial::open`. Simulators and wireless bridges are reached over TCP:
//!
//! ```no_run
//! use fclink::transport::{Connector, TcpConnector};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = TcpConnector::new("127.0.0.1:5761").connect().await?;
//! let client = fclink::Client::new(fclink::EngineConfig::default());
//!
//! client.connect(transport);
//!
//! if let Some(info) = client.detect_protocol().await {
//!     println!("{} {} on {}", info.variant, info.version, info.board_id);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Examples
//!
//! ## Reading and changing PID gains
//!
//! ```no_run
//! use fclink::message::pid::{PidGains, PidUpdate};
//!
//! # async fn example(client: fclink::Client) {
//! if let Some(pids) = client.get_pid().await {
//!     println!("Roll: {:?}", pids.channel(0));
//! }
//!
//! // Only roll is changed; all other channels keep their cached values
//! let update = PidUpdate::new().with(0, PidGains::new(45, 80, 30, 120));
//!
//! if client.set_pid(&update).await && client.save_to_nonvolatile().await {
//!     println!("PID gains saved");
//! }
//! # }
//! ```
//!
//! ## Streaming telemetry
//!
//! ```no_run
//! # async fn example(client: fclink::Client) {
//! let mut events = client.subscribe_telemetry();
//!
//! client.start_telemetry(10);
//!
//! while let Ok(event) = events.recv().await {
//!     println!("{}: {event:?}", event.kind());
//! }
//! # }
//! ```
//!
//! # Protocol details
//!
//! The firmware processes one command at a time, so the client serializes
//! complete request/response round trips. Entering the CLI switches the
//! firmware into a text mode in which binary frames are not understood;
//! while the console is active every binary request fails immediately with
//! [`Error::CliModeBlocked`]. Saving from the console, writing the EEPROM or
//! changing the platform type reboots the firmware; the client then waits and
//! reconnects according to its [`reconnect::ReconnectPolicy`].

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod cli;
mod client;
pub mod codec;
pub mod command;
mod config;
pub mod exchange;
pub mod lock;
pub mod message;
pub mod negotiator;
mod operations;
pub mod reconnect;
pub mod scheduler;
pub mod settings;
pub mod telemetry;
pub mod transport;

#[cfg(feature = "native-serial")]
#[cfg_attr(docsrs, doc(cfg(feature = "native-serial")))]
pub mod serial;

#[cfg(test)]
mod testing;

pub use client::{Client, LogEvent};
pub use command::Command;
pub use config::EngineConfig;
pub use negotiator::Tier;

use core::fmt::{Display, Formatter};
use std::io;

/// A specialized [`Result`] type for engine operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Error type for engine operations.
///
/// The high-level operations on [`Client`] never return this type; they
/// report failures as `false` or `None` and publish the detail on the
/// diagnostic log stream. It is returned by the low-level building blocks
/// such as [`Client::dispatch`] and [`Client::send_line`].
///
/// This enum is marked `#[non_exhaustive]` to allow for future variants.
#[non_exhaustive]
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Error {
    /// No transport is attached or the attached transport is closed.
    NotConnected,
    /// A binary request was attempted while the CLI owns the transport.
    CliModeBlocked,
    /// The CLI is not active, so a console line cannot be sent.
    CliInactive,
    /// The firmware answered the command with an explicit error frame.
    CommandUnsupported(u16),
    /// No matching frame arrived before the deadline.
    RequestTimeout(u16),
    /// A newer request for the same command took over the pending slot.
    Superseded(u16),
    /// The decoded payload does not match the negotiated layout.
    ProtocolMismatch,
    /// The console reported an error for the submitted line.
    CliRejected,
    /// The firmware did not come back after a reboot.
    ReconnectTimeout,
    /// The provided argument is invalid.
    InvalidArgument,
    /// A transport-specific input/output error.
    Io(io::ErrorKind),
}

impl Error {
    /// Returns `true` if the failure is consistent with "not implemented by
    /// this firmware", which allows falling back to the next wire path.
    #[must_use]
    pub fn permits_fallback(self) -> bool {
        matches!(self, Self::CommandUnsupported(_) | Self::RequestTimeout(_))
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> core::fmt::Result {
        match self {
            Self::NotConnected => write!(f, "not connected"),
            Self::CliModeBlocked => write!(f, "blocked by active CLI session"),
            Self::CliInactive => write!(f, "CLI session not active"),
            Self::CommandUnsupported(cmd) => write!(f, "command {cmd} unsupported by firmware"),
            Self::RequestTimeout(cmd) => write!(f, "command {cmd} timed out"),
            Self::Superseded(cmd) => write!(f, "command {cmd} superseded by newer request"),
            Self::ProtocolMismatch => write!(f, "payload does not match negotiated protocol"),
            Self::CliRejected => write!(f, "rejected by CLI"),
            Self::ReconnectTimeout => write!(f, "firmware did not come back after reboot"),
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::Io(kind) => write!(f, "input/output error: {kind}"),
        }
    }
}

impl core::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotConnected | io::ErrorKind::BrokenPipe => Self::NotConnected,
            kind => Self::Io(kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_triggers() {
        assert!(Error::CommandUnsupported(212).permits_fallback());
        assert!(Error::RequestTimeout(0x2031).permits_fallback());
        assert!(
            !Error::NotConnected.permits_fallback(),
            "missing transport should never fall back"
        );
        assert!(
            !Error::CliModeBlocked.permits_fallback(),
            "active console should never fall back"
        );
    }

    #[test]
    fn io_errors_map_to_not_connected() {
        let err: Error = io::Error::from(io::ErrorKind::BrokenPipe).into();

        assert_eq!(err, Error::NotConnected, "broken pipe should be not connected");

        let err: Error = io::Error::from(io::ErrorKind::PermissionDenied).into();

        assert_eq!(
            err,
            Error::Io(io::ErrorKind::PermissionDenied),
            "other errors should keep their kind"
        );
    }
}
