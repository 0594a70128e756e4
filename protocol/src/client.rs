//! Connection-scoped engine context and the binary request path.

use crate::{
    EngineConfig, Error, Result,
    cli::ConnectionMode,
    codec::{Decoder, Frame},
    exchange::PendingTable,
    lock::{ConfigLock, ConfigLockGuard},
    negotiator::{FirmwareInfo, Operation, ProtocolState, Tier},
    scheduler::Periodic,
    settings::SettingInfo,
    telemetry::TelemetryEvent,
    transport::{Chunk, Connector, Transport},
};
use core::fmt::Display;
use log::{Level, debug, log, trace, warn};
use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};
use tokio::{
    sync::{Notify, OwnedMutexGuard, broadcast, watch},
    task::JoinHandle,
    time::{self, Instant},
};

/// Number of events buffered per subscriber before older ones are dropped.
const EVENT_BACKLOG: usize = 64;

/// Diagnostic message intended for the operator.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct LogEvent {
    /// Severity.
    pub level: Level,
    /// Human-readable message.
    pub message: String,
}

/// Locks a mutex, ignoring poisoning.
///
/// None of the guarded state can be left inconsistent by a panic.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Link {
    transport: Arc<dyn Transport>,
    pump: JoinHandle<()>,
}

impl Drop for Link {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

pub(crate) struct Shared {
    pub(crate) config: EngineConfig,
    link: Mutex<Option<Link>>,
    /// Request gate; FIFO across all binary callers.
    pub(crate) gate: Arc<tokio::sync::Mutex<()>>,
    pub(crate) exchanges: Mutex<PendingTable>,
    pub(crate) mode: watch::Sender<ConnectionMode>,
    pub(crate) protocol: Mutex<ProtocolState>,
    pub(crate) config_lock: ConfigLock,
    pub(crate) console: Mutex<String>,
    pub(crate) console_notify: Notify,
    /// Request gate, held for as long as the console owns the transport.
    pub(crate) console_gate: Mutex<Option<OwnedMutexGuard<()>>>,
    pub(crate) console_line: tokio::sync::Mutex<()>,
    pub(crate) settings: Mutex<HashMap<String, SettingInfo>>,
    pub(crate) telemetry: Mutex<Option<Periodic>>,
    pub(crate) events: broadcast::Sender<TelemetryEvent>,
    logs: broadcast::Sender<LogEvent>,
    connector: Mutex<Option<Arc<dyn Connector>>>,
}

/// Engine handle for one flight controller.
///
/// Cloning yields another handle to the same connection. All state is
/// owned by the connection context and reset whenever a transport is
/// attached or detached.
#[derive(Clone)]
pub struct Client {
    pub(crate) shared: Arc<Shared>,
}

impl Client {
    /// Constructs a client without a transport.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let (mode, _) = watch::channel(ConnectionMode::Binary);
        let (events, _) = broadcast::channel(EVENT_BACKLOG);
        let (logs, _) = broadcast::channel(EVENT_BACKLOG);
        let config_lock = ConfigLock::new(config.config_lock_settle);

        Self {
            shared: Arc::new(Shared {
                config,
                link: Mutex::new(None),
                gate: Arc::new(tokio::sync::Mutex::new(())),
                exchanges: Mutex::new(PendingTable::new()),
                mode,
                protocol: Mutex::new(ProtocolState::default()),
                config_lock,
                console: Mutex::new(String::new()),
                console_notify: Notify::new(),
                console_gate: Mutex::new(None),
                console_line: tokio::sync::Mutex::new(()),
                settings: Mutex::new(HashMap::new()),
                telemetry: Mutex::new(None),
                events,
                logs,
                connector: Mutex::new(None),
            }),
        }
    }

    /// Sets the connector used to re-establish the transport after the
    /// firmware rebooted.
    ///
    /// Without a connector, the attached transport is expected to survive
    /// reboots (e.g. a UART bridge) and is simply probed again.
    pub fn set_connector(&self, connector: Arc<dyn Connector>) {
        *lock(&self.shared.connector) = Some(connector);
    }

    pub(crate) fn connector(&self) -> Option<Arc<dyn Connector>> {
        lock(&self.shared.connector).clone()
    }

    /// Returns the engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Attaches a transport, replacing any previous one.
    ///
    /// Starts a fresh connection context: protocol state, settings cache and
    /// console state are reset and outstanding exchanges fail with
    /// [`Error::NotConnected`]. Must be called from within a tokio runtime.
    pub fn connect(&self, transport: Arc<dyn Transport>) {
        let chunks = transport.subscribe();
        let pump = tokio::spawn(pump(Arc::downgrade(&self.shared), chunks));

        self.reset_context();
        *lock(&self.shared.link) = Some(Link { transport, pump });

        debug!("Transport attached");
    }

    /// Detaches the transport and stops telemetry.
    ///
    /// The transport itself is not closed.
    pub fn disconnect(&self) {
        self.stop_telemetry();
        lock(&self.shared.link).take();
        self.reset_context();
        self.shared.config_lock.reset();

        debug!("Transport detached");
    }

    fn reset_context(&self) {
        lock(&self.shared.exchanges).reject_all(Error::NotConnected);
        lock(&self.shared.console_gate).take();
        lock(&self.shared.console).clear();
        *lock(&self.shared.protocol) = ProtocolState::default();
        lock(&self.shared.settings).clear();
        self.shared.mode.send_replace(ConnectionMode::Binary);
    }

    /// Returns `true` if a transport is attached and open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.transport().is_some_and(|t| t.is_open())
    }

    pub(crate) fn transport(&self) -> Option<Arc<dyn Transport>> {
        lock(&self.shared.link)
            .as_ref()
            .map(|link| link.transport.clone())
    }

    /// Returns the transport if it is open.
    pub(crate) fn open_transport(&self) -> Result<Arc<dyn Transport>> {
        self.transport()
            .filter(|t| t.is_open())
            .ok_or(Error::NotConnected)
    }

    /// Returns the current connection mode.
    #[must_use]
    pub fn mode(&self) -> ConnectionMode {
        *self.shared.mode.borrow()
    }

    /// Returns a snapshot of the protocol state.
    #[must_use]
    pub fn protocol_state(&self) -> ProtocolState {
        lock(&self.shared.protocol).clone()
    }

    /// Returns the detected firmware identity.
    #[must_use]
    pub fn firmware(&self) -> Option<FirmwareInfo> {
        lock(&self.shared.protocol).firmware.clone()
    }

    /// Subscribes to the diagnostic log stream.
    #[must_use]
    pub fn subscribe_logs(&self) -> broadcast::Receiver<LogEvent> {
        self.shared.logs.subscribe()
    }

    /// Logs a message and publishes it on the diagnostic log stream.
    pub(crate) fn report(&self, level: Level, message: impl Into<String>) {
        let message = message.into();

        log!(level, "{message}");

        // No subscribers is not an error
        let _ = self.shared.logs.send(LogEvent { level, message });
    }

    /// Acquires the reentrant configuration lock, suspending telemetry
    /// until the guard is dropped.
    pub async fn config_lock(&self) -> ConfigLockGuard {
        self.shared.config_lock.acquire().await
    }

    /// Runs the future while holding the configuration lock.
    pub async fn with_config_lock<T>(&self, fut: impl Future<Output = T>) -> T {
        let _guard = self.config_lock().await;

        fut.await
    }

    /// Sends a binary request and waits for the matching response.
    ///
    /// This is the only way binary frames reach the transport. Complete
    /// round trips are serialized in FIFO order across all callers.
    ///
    /// Fails immediately with [`Error::NotConnected`] if no open transport
    /// is attached and with [`Error::CliModeBlocked`] while the console owns
    /// the transport. An error frame fails with
    /// [`Error::CommandUnsupported`], a missing response with
    /// [`Error::RequestTimeout`].
    pub async fn dispatch(
        &self,
        command: impl Into<u16>,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let command = command.into();
        let transport = self.open_transport()?;
        let mut mode = self.shared.mode.subscribe();

        if *mode.borrow_and_update() != ConnectionMode::Binary {
            return Err(Error::CliModeBlocked);
        }

        let _permit = tokio::select! {
            biased;

            _ = mode.wait_for(|m| *m != ConnectionMode::Binary) => {
                return Err(Error::CliModeBlocked);
            }
            permit = self.shared.gate.lock() => permit,
        };

        let (ticket, reply) = {
            let mut exchanges = lock(&self.shared.exchanges);

            // Console entry rejects under the same lock, so no exchange can
            // be registered after it started
            if self.mode() != ConnectionMode::Binary {
                return Err(Error::CliModeBlocked);
            }

            exchanges.register(command, Instant::now() + timeout)
        };

        trace!("Dispatching command {command} with payload {payload:02x?}");

        if let Err(err) = transport.write(&Frame::request(command, payload).encode()).await {
            lock(&self.shared.exchanges).forget(command, ticket);

            return Err(err.into());
        }

        match time::timeout(timeout, reply).await {
            Ok(Ok(res)) => res,
            // Sender dropped without an answer
            Ok(Err(_)) => Err(Error::NotConnected),
            Err(_) => {
                if lock(&self.shared.exchanges).forget(command, ticket) {
                    debug!("Command {command} timed out after {timeout:?}");
                }

                Err(Error::RequestTimeout(command))
            }
        }
    }

    /// Sends a request with the configured request timeout.
    pub(crate) async fn request(&self, command: impl Into<u16>, payload: &[u8]) -> Result<Vec<u8>> {
        self.dispatch(command, payload, self.shared.config.request_timeout)
            .await
    }

    /// Returns the ordered wire paths for an operation in the current mode.
    ///
    /// While the console owns the transport, only the console path remains.
    pub(crate) fn plan(&self, op: Operation) -> Result<Vec<Tier>> {
        let mut tiers = lock(&self.shared.protocol).plan(op);

        if self.mode() != ConnectionMode::Binary {
            tiers.retain(|&tier| tier == Tier::Cli);
        }

        if tiers.is_empty() {
            return Err(Error::CliModeBlocked);
        }

        Ok(tiers)
    }

    /// Runs an operation along its dispatch plan.
    ///
    /// Advances to the next wire path only if the failure permits fallback;
    /// any other failure is returned immediately.
    pub(crate) async fn run_plan<T, F, Fut>(&self, op: Operation, attempt: F) -> Result<T>
    where
        F: FnMut(Tier) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let tiers = self.plan(op)?;

        self.run_tiers(op, tiers, attempt).await
    }

    /// Runs an operation along an explicit list of wire paths.
    pub(crate) async fn run_tiers<T, F, Fut>(
        &self,
        op: Operation,
        tiers: Vec<Tier>,
        mut attempt: F,
    ) -> Result<T>
    where
        F: FnMut(Tier) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last = Error::InvalidArgument;

        for tier in tiers {
            match attempt(tier).await {
                Ok(val) => return Ok(val),
                Err(err) if err.permits_fallback() => {
                    self.report(Level::Warn, format!("{op} via {tier} path failed: {err}"));
                    last = err;
                }
                Err(err) => return Err(err),
            }
        }

        Err(last)
    }

    /// Maps an operation result to an option, reporting the failure.
    pub(crate) fn settle<T>(&self, what: impl Display, res: Result<T>) -> Option<T> {
        res.map_err(|err| self.report(Level::Error, format!("{what} failed: {err}")))
            .ok()
    }
}

/// Routes received chunks to the frame decoder or the console buffer,
/// depending on the connection mode.
async fn pump(shared: Weak<Shared>, mut chunks: broadcast::Receiver<Chunk>) {
    let mut decoder = Decoder::new();

    loop {
        let chunk = match chunks.recv().await {
            Ok(chunk) => chunk,
            Err(broadcast::error::RecvError::Lagged(count)) => {
                warn!("Receive pump lagged, {count} chunks lost");
                decoder.reset();
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let Some(shared) = shared.upgrade() else {
            break;
        };

        if *shared.mode.borrow() == ConnectionMode::Binary {
            for frame in decoder.push(&chunk) {
                lock(&shared.exchanges).complete(frame);
            }
        } else {
            // Console text must never reach the frame decoder
            decoder.reset();
            lock(&shared.console).push_str(&String::from_utf8_lossy(&chunk));
            shared.console_notify.notify_waiters();
        }
    }

    debug!("Receive pump stopped");
}
