//! Live flight data.
//!
//! The poller reads attitude, altitude, battery, status and GPS in this
//! order once per period, publishing every decoded reading as soon as it
//! arrives. Each read is best-effort: a failed read is skipped for that
//! tick without affecting the others. Before every read the poller checks
//! that the transport is open, the configuration lock is free and the
//! console is inactive; otherwise it forgoes the rest of the tick.

use crate::{
    Client, Error, Result,
    cli::ConnectionMode,
    client::lock,
    command::Command,
    message::Reader,
    scheduler::{Periodic, TickStats},
};
use bitflags_derive::{FlagsDebug, FlagsDisplay};
use log::{debug, info, trace};
use std::{sync::Arc, time::Duration};
use strum::{Display, FromRepr};
use tokio::{sync::broadcast, time};

bitflags::bitflags! {
    /// Sensors detected by the firmware.
    #[derive(FlagsDisplay, FlagsDebug, PartialEq, Eq, Copy, Clone)]
    pub struct Sensors: u16 {
        /// Accelerometer.
        const Accelerometer = 0x0001;
        /// Barometer.
        const Barometer = 0x0002;
        /// Magnetometer.
        const Magnetometer = 0x0004;
        /// GPS receiver.
        const Gps = 0x0008;
        /// Rangefinder.
        const Rangefinder = 0x0010;
        /// Gyroscope.
        const Gyroscope = 0x0020;
    }
}

/// Kind of a [`TelemetryEvent`].
#[derive(Display, PartialEq, Eq, Copy, Clone, Debug)]
#[strum(serialize_all = "camelCase")]
pub enum TelemetryKind {
    /// Orientation.
    Attitude,
    /// Altitude and vertical speed.
    Altitude,
    /// Battery and link quality.
    Battery,
    /// Arming state, sensors and flight modes.
    FlightStatus,
    /// GPS fix quality.
    GpsFix,
    /// GPS position and velocity.
    Position,
}

/// Orientation of the craft.
#[derive(PartialEq, Copy, Clone, Debug)]
pub struct Attitude {
    /// Roll angle in degrees.
    pub roll: f32,
    /// Pitch angle in degrees.
    pub pitch: f32,
    /// Heading in degrees.
    pub yaw: i16,
}

/// Estimated altitude.
#[derive(PartialEq, Copy, Clone, Debug)]
pub struct Altitude {
    /// Altitude above the arming point in meters.
    pub altitude: f32,
    /// Vertical speed in meters per second.
    pub vario: f32,
}

/// Battery and link quality.
#[derive(PartialEq, Copy, Clone, Debug)]
pub struct Battery {
    /// Battery voltage in volts.
    pub voltage: f32,
    /// Current draw in amperes.
    pub current: f32,
    /// Consumed capacity in milliampere-hours.
    pub drawn: u32,
    /// Received signal strength (0 to 1023).
    pub rssi: u16,
    /// Remaining capacity in percent, if known.
    pub percentage: Option<u8>,
}

/// Arming state, sensors and active flight modes.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct FlightStatus {
    /// Main loop cycle time in microseconds.
    pub cycle_time: u16,
    /// Number of I2C errors.
    pub i2c_errors: u16,
    /// Detected sensors.
    pub sensors: Sensors,
    /// Bit set of active flight modes, indexed by box position.
    pub modes: u32,
    /// Motors are armed.
    pub armed: bool,
    /// Active PID profile.
    pub profile: u8,
}

/// GPS fix type.
#[derive(FromRepr, Display, PartialEq, Eq, Copy, Clone, Debug)]
#[repr(u8)]
pub enum FixType {
    /// No fix.
    None = 0,
    /// Two-dimensional fix.
    Fix2d = 1,
    /// Three-dimensional fix.
    Fix3d = 2,
}

/// GPS fix quality.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct GpsFix {
    /// Fix type.
    pub fix: FixType,
    /// Number of satellites used.
    pub satellites: u8,
}

/// GPS position and velocity.
#[derive(PartialEq, Copy, Clone, Debug)]
pub struct Position {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Altitude above sea level in meters.
    pub altitude: u16,
    /// Ground speed in meters per second.
    pub ground_speed: f32,
    /// Course over ground in degrees.
    pub course: f32,
}

/// Normalized telemetry reading.
#[derive(PartialEq, Clone, Debug)]
pub enum TelemetryEvent {
    /// Orientation.
    Attitude(Attitude),
    /// Altitude and vertical speed.
    Altitude(Altitude),
    /// Battery and link quality.
    Battery(Battery),
    /// Arming state, sensors and flight modes.
    FlightStatus(FlightStatus),
    /// GPS fix quality.
    GpsFix(GpsFix),
    /// GPS position and velocity.
    Position(Position),
}

impl TelemetryEvent {
    /// Returns the kind of the event.
    #[must_use]
    pub fn kind(&self) -> TelemetryKind {
        match self {
            Self::Attitude(_) => TelemetryKind::Attitude,
            Self::Altitude(_) => TelemetryKind::Altitude,
            Self::Battery(_) => TelemetryKind::Battery,
            Self::FlightStatus(_) => TelemetryKind::FlightStatus,
            Self::GpsFix(_) => TelemetryKind::GpsFix,
            Self::Position(_) => TelemetryKind::Position,
        }
    }
}

/// Decodes the payload of a telemetry read into events.
///
/// `precise_voltage` selects the legacy battery layout carrying a voltage
/// with 0.01 V resolution.
pub fn decode(
    command: Command,
    payload: &[u8],
    precise_voltage: bool,
) -> Result<Vec<TelemetryEvent>> {
    let mut rd = Reader::new(payload);
    let event = match command {
        Command::Attitude => TelemetryEvent::Attitude(Attitude {
            roll: f32::from(rd.i16()?) / 10.0,
            pitch: f32::from(rd.i16()?) / 10.0,
            yaw: rd.i16()?,
        }),
        Command::Altitude => TelemetryEvent::Altitude(Altitude {
            altitude: rd.i32()? as f32 / 100.0,
            vario: f32::from(rd.i16()?) / 100.0,
        }),
        Command::Analog => {
            let legacy_voltage = f32::from(rd.u8()?) / 10.0;
            let drawn = u32::from(rd.u16()?);
            let rssi = rd.u16()?;
            let current = f32::from(rd.i16()?) / 100.0;
            let voltage = if precise_voltage {
                f32::from(rd.u16()?) / 100.0
            } else {
                legacy_voltage
            };

            TelemetryEvent::Battery(Battery {
                voltage,
                current,
                drawn,
                rssi,
                percentage: None,
            })
        }
        Command::InavAnalog => {
            let _flags = rd.u8()?;
            let voltage = f32::from(rd.u16()?) / 100.0;
            let current = f32::from(rd.i16()?) / 100.0;
            let _power = rd.i32()?;
            let drawn = rd.i32()?.max(0).unsigned_abs();
            let _energy = rd.i32()?;
            let _remaining = rd.u32()?;
            let percentage = rd.u8()?;
            let rssi = rd.u16()?;

            TelemetryEvent::Battery(Battery {
                voltage,
                current,
                drawn,
                rssi,
                percentage: Some(percentage),
            })
        }
        Command::Status => {
            let cycle_time = rd.u16()?;
            let i2c_errors = rd.u16()?;
            let sensors = Sensors::from_bits_truncate(rd.u16()?);
            let modes = rd.u32()?;

            TelemetryEvent::FlightStatus(FlightStatus {
                cycle_time,
                i2c_errors,
                sensors,
                modes,
                armed: modes & 0x01 != 0,
                profile: rd.u8()?,
            })
        }
        Command::RawGps => {
            let fix = FixType::from_repr(rd.u8()?).ok_or(Error::ProtocolMismatch)?;
            let satellites = rd.u8()?;
            let mut events = vec![TelemetryEvent::GpsFix(GpsFix { fix, satellites })];

            if fix != FixType::None {
                events.push(TelemetryEvent::Position(Position {
                    latitude: f64::from(rd.i32()?) / 1e7,
                    longitude: f64::from(rd.i32()?) / 1e7,
                    altitude: rd.u16()?,
                    ground_speed: f32::from(rd.u16()?) / 100.0,
                    course: f32::from(rd.u16()?) / 10.0,
                }));
            }

            return Ok(events);
        }
        _ => return Err(Error::InvalidArgument),
    };

    Ok(vec![event])
}

impl Client {
    /// Subscribes to the telemetry event stream.
    #[must_use]
    pub fn subscribe_telemetry(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.shared.events.subscribe()
    }

    /// Starts polling telemetry at the given rate, replacing a running
    /// poller. A rate of `0` selects the configured default.
    pub fn start_telemetry(&self, rate_hz: u32) {
        let rate = if rate_hz == 0 {
            self.shared.config.telemetry_rate_hz
        } else {
            rate_hz
        };
        let period = Duration::from_secs(1) / rate.max(1);
        let shared = Arc::downgrade(&self.shared);
        let periodic = Periodic::spawn(period, move || {
            let shared = shared.clone();

            async move {
                if let Some(shared) = shared.upgrade() {
                    Client { shared }.poll_telemetry().await;
                }
            }
        });

        info!("Polling telemetry at {rate} Hz");
        *lock(&self.shared.telemetry) = Some(periodic);
    }

    /// Stops polling telemetry. A read in progress is abandoned.
    pub fn stop_telemetry(&self) {
        if lock(&self.shared.telemetry).take().is_some() {
            info!("Stopped polling telemetry");
        }
    }

    /// Returns the run statistics of the telemetry poller, if running.
    #[must_use]
    pub fn telemetry_stats(&self) -> Option<TickStats> {
        lock(&self.shared.telemetry).as_ref().map(Periodic::stats)
    }

    /// Returns the number of ticks skipped because the previous tick was
    /// still in progress.
    #[must_use]
    pub fn telemetry_skipped_ticks(&self) -> u64 {
        self.telemetry_stats().map_or(0, |stats| stats.skipped)
    }

    fn telemetry_allowed(&self) -> bool {
        self.is_connected()
            && !self.shared.config_lock.is_held()
            && self.mode() == ConnectionMode::Binary
    }

    /// Runs one telemetry tick.
    pub(crate) async fn poll_telemetry(&self) {
        let state = self.protocol_state();
        let battery = if state.uses_extended_analog() {
            Command::InavAnalog
        } else {
            Command::Analog
        };
        let reads = [
            Command::Attitude,
            Command::Altitude,
            battery,
            Command::Status,
            Command::RawGps,
        ];
        let precise_voltage = state.analog_has_precise_voltage();

        for (i, command) in reads.into_iter().enumerate() {
            if i > 0 {
                time::sleep(self.shared.config.telemetry_pacing).await;
            }

            if !self.telemetry_allowed() {
                trace!("Telemetry suspended, forgoing rest of tick");

                return;
            }

            let res = match self
                .dispatch(command, &[], self.shared.config.telemetry_timeout)
                .await
            {
                Ok(payload) => decode(command, &payload, precise_voltage),
                Err(err) => Err(err),
            };

            match res {
                Ok(events) => {
                    for event in events {
                        // No subscribers is not an error
                        let _ = self.shared.events.send(event);
                    }
                }
                Err(err) => debug!("Telemetry read {command} failed: {err}"),
            }
        }
    }
}
