use crate::reconnect::ReconnectPolicy;
use std::time::Duration;

/// Timing configuration of a [`Client`](crate::Client).
///
/// The defaults match the behavior of common Betaflight and INAV firmware
/// on USB virtual COM ports and UART bridges.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Deadline for a configuration request/response round trip.
    pub request_timeout: Duration,
    /// Deadline for a single telemetry read.
    pub telemetry_timeout: Duration,
    /// Pause between consecutive telemetry reads within one tick.
    pub telemetry_pacing: Duration,
    /// Telemetry rate used when `0` is passed to
    /// [`Client::start_telemetry`](crate::Client::start_telemetry).
    pub telemetry_rate_hz: u32,
    /// Delay after the outermost config-lock acquisition, letting an
    /// in-flight telemetry exchange finish.
    pub config_lock_settle: Duration,
    /// Delay after writing the CLI entry byte.
    pub cli_settle: Duration,
    /// Maximum time to collect the response to a console line.
    pub cli_line_window: Duration,
    /// Maximum time to collect the output of a console dump.
    pub cli_dump_window: Duration,
    /// Fail entering the CLI if no console banner was received.
    pub cli_verify_banner: bool,
    /// Waiting strategy after reboot-inducing operations.
    pub reconnect: ReconnectPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(1000),
            telemetry_timeout: Duration::from_millis(250),
            telemetry_pacing: Duration::from_millis(10),
            telemetry_rate_hz: 10,
            config_lock_settle: Duration::from_millis(100),
            cli_settle: Duration::from_millis(500),
            cli_line_window: Duration::from_millis(500),
            cli_dump_window: Duration::from_millis(5000),
            cli_verify_banner: false,
            reconnect: ReconnectPolicy::default(),
        }
    }
}
