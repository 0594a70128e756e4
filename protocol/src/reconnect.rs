//! Waiting for the firmware to come back after a reboot.
//!
//! Saving to nonvolatile storage, the reboot command, changing the
//! platform type and leaving the console with `save` all reboot the
//! firmware. Losing the link afterwards is expected; operations wait here
//! for the new session instead of racing a dead transport.

use crate::{Client, Error, Result, negotiator::FirmwareInfo};
use log::{Level, debug};
use std::time::Duration;
use tokio::time;

/// Bounded retry strategy used after reboot-inducing operations.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct ReconnectPolicy {
    /// Time the firmware needs to reboot before the first attempt.
    pub initial_delay: Duration,
    /// Pause between failed attempts.
    pub attempt_delay: Duration,
    /// Number of attempts before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(3000),
            attempt_delay: Duration::from_millis(1000),
            max_attempts: 10,
        }
    }
}

impl Client {
    /// Waits for the firmware to come back and re-detects it.
    ///
    /// Each attempt re-establishes the transport through the configured
    /// [`Connector`](crate::transport::Connector) (or reuses the attached
    /// transport if there is none) and probes it with protocol detection.
    /// Returns the identity reported by the first successful probe, or
    /// [`Error::ReconnectTimeout`] once all attempts failed.
    pub async fn reconnect_with_retry(&self, policy: &ReconnectPolicy) -> Result<FirmwareInfo> {
        time::sleep(policy.initial_delay).await;

        for attempt in 1..=policy.max_attempts {
            if attempt > 1 {
                time::sleep(policy.attempt_delay).await;
            }

            let transport = match self.connector() {
                Some(connector) => match connector.connect().await {
                    Ok(transport) => Some(transport),
                    Err(err) => {
                        debug!("Reconnect attempt {attempt} failed: {err}");
                        None
                    }
                },
                None => self.transport(),
            };
            let Some(transport) = transport.filter(|t| t.is_open()) else {
                debug!("Transport not open on reconnect attempt {attempt}");
                continue;
            };

            self.connect(transport);

            match self.probe().await {
                Ok(info) => {
                    self.report(
                        Level::Info,
                        format!(
                            "Reconnected to {} {} after {attempt} attempts",
                            info.variant, info.version
                        ),
                    );

                    return Ok(info);
                }
                Err(err) => debug!("Probe on reconnect attempt {attempt} failed: {err}"),
            }
        }

        self.report(
            Level::Error,
            format!("Firmware did not come back after {} attempts", policy.max_attempts),
        );

        Err(Error::ReconnectTimeout)
    }

    /// Waits for a reboot using the configured policy.
    pub(crate) async fn await_reboot(&self) -> Result<FirmwareInfo> {
        let policy = self.shared.config.reconnect.clone();

        self.reconnect_with_retry(&policy).await
    }
}
