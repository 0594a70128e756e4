//! Text console bridge.
//!
//! The firmware console shares the transport with the binary protocol but
//! is mutually exclusive with it: once the entry byte is written, the
//! firmware neither parses nor answers binary frames until it leaves the
//! console (which usually reboots it). The bridge therefore owns the
//! request gate for the whole session, rejects all outstanding binary
//! exchanges on entry and makes every new binary dispatch fail with
//! [`Error::CliModeBlocked`].
//!
//! Console responses are classified per command family by
//! [`classify`] instead of ad-hoc substring checks at the call sites.

use crate::{Client, Error, Result, client::lock};
use log::{Level, debug, trace};
use std::time::Duration;
use strum::Display;
use tokio::{
    sync::watch,
    time::{self, Instant},
};

/// Byte switching the firmware into console mode.
const ENTRY_BYTE: &[u8] = b"#";

/// Token contained in the console banner.
const BANNER_TOKEN: &str = "CLI";

/// Prompt printed once the console is ready for the next line.
const PROMPT: &str = "\n# ";

/// Tokens by which the firmware reports a rejected line.
const ERROR_TOKENS: &[&str] = &[
    "###ERROR",
    "Invalid name",
    "Invalid value",
    "Parse error",
    "Unknown command",
    "ERROR",
];

/// Connection mode, deciding who may write to the transport.
#[derive(Display, PartialEq, Eq, Copy, Clone, Debug)]
pub enum ConnectionMode {
    /// Binary frames are exchanged.
    Binary,
    /// The console entry sequence is in progress.
    EnteringCli,
    /// The console owns the transport.
    Cli,
    /// The console exit sequence is in progress.
    ExitingCli,
}

/// Console command family, which determines the response grammar.
#[derive(Display, PartialEq, Eq, Copy, Clone, Debug)]
pub enum CommandFamily {
    /// `set <name> = <value>`, answered with `<name> set to <value>`.
    Set,
    /// `get <name>`, answered with `<name> = <value>`.
    Get,
    /// `<verb> <index> <params...>`, silent on success.
    Indexed,
    /// `save`, answered with a saving/rebooting notice.
    Save,
    /// Anything else; the output is returned verbatim.
    Other,
}

impl CommandFamily {
    /// Determines the family of a console line.
    #[must_use]
    pub fn of(line: &str) -> Self {
        let mut tokens = line.split_whitespace();

        match tokens.next() {
            Some("set") => Self::Set,
            Some("get") => Self::Get,
            Some("save") => Self::Save,
            Some(_) if tokens.next().is_some_and(|t| t.parse::<u8>().is_ok()) => Self::Indexed,
            _ => Self::Other,
        }
    }
}

/// Classified console response.
#[derive(PartialEq, Eq, Clone, Debug)]
pub enum CliOutcome {
    /// The line was accepted.
    Accepted,
    /// The firmware reported an error; contains the offending line.
    Rejected(String),
    /// A value was read (`get`) or output was produced (other commands).
    Value(String),
    /// No known pattern matched.
    ///
    /// Callers treat this as accepted and report a warning, since console
    /// wording differs between firmware versions.
    Unrecognized(String),
}

/// Classifies the response to a console line.
#[must_use]
pub fn classify(line: &str, response: &str) -> CliOutcome {
    if let Some(err) = response
        .lines()
        .find(|l| ERROR_TOKENS.iter().any(|token| l.contains(token)))
    {
        return CliOutcome::Rejected(err.trim().to_string());
    }

    let name = line.split_whitespace().nth(1).unwrap_or_default();

    match CommandFamily::of(line) {
        CommandFamily::Set => {
            let confirmed = response.lines().any(|l| {
                let l = l.trim();

                l.starts_with(name) && (l.contains(" set to ") || l.contains(" = "))
            });

            if confirmed {
                CliOutcome::Accepted
            } else {
                CliOutcome::Unrecognized(response.to_string())
            }
        }
        CommandFamily::Get => response
            .lines()
            .filter_map(|l| l.trim().split_once(" = "))
            .find(|(key, _)| key.trim() == name)
            .map_or_else(
                || CliOutcome::Unrecognized(response.to_string()),
                |(_, val)| CliOutcome::Value(val.trim().to_string()),
            ),
        CommandFamily::Indexed if response.trim().is_empty() => CliOutcome::Accepted,
        CommandFamily::Save => {
            let lower = response.to_ascii_lowercase();

            if lower.contains("saving") || lower.contains("rebooting") {
                CliOutcome::Accepted
            } else {
                CliOutcome::Unrecognized(response.to_string())
            }
        }
        CommandFamily::Other => CliOutcome::Value(response.to_string()),
        CommandFamily::Indexed => CliOutcome::Unrecognized(response.to_string()),
    }
}

/// Strips the echoed command and the trailing prompt from console output.
fn clean_response(raw: &str, line: &str) -> String {
    let text = raw.replace('\r', "");
    let mut lines: Vec<&str> = text.lines().collect();

    if lines.first().is_some_and(|l| l.trim_start_matches("# ").trim() == line.trim()) {
        lines.remove(0);
    }

    while lines
        .last()
        .is_some_and(|l| l.trim().is_empty() || l.trim() == "#")
    {
        lines.pop();
    }

    lines.join("\n")
}

/// Restores binary mode unless disarmed, e.g. if console entry is
/// cancelled half-way.
struct ModeRestore<'a> {
    mode: &'a watch::Sender<ConnectionMode>,
    armed: bool,
}

impl Drop for ModeRestore<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.mode.send_replace(ConnectionMode::Binary);
        }
    }
}

impl Client {
    /// Switches the firmware into console mode.
    ///
    /// Binary dispatch is blocked before any byte is written, and every
    /// outstanding exchange fails with [`Error::CliModeBlocked`]. Succeeds
    /// immediately if the console is already active.
    pub async fn enter_cli(&self) -> Result<()> {
        let transport = self.open_transport()?;

        {
            let mut exchanges = lock(&self.shared.exchanges);

            match self.mode() {
                ConnectionMode::Binary => {}
                ConnectionMode::Cli => return Ok(()),
                ConnectionMode::EnteringCli | ConnectionMode::ExitingCli => {
                    return Err(Error::CliModeBlocked);
                }
            }

            self.shared.mode.send_replace(ConnectionMode::EnteringCli);

            let rejected = exchanges.reject_all(Error::CliModeBlocked);

            if rejected > 0 {
                debug!("Rejected {rejected} outstanding exchanges on console entry");
            }
        }

        let mut restore = ModeRestore {
            mode: &self.shared.mode,
            armed: true,
        };
        let permit = self.shared.gate.clone().lock_owned().await;

        lock(&self.shared.console).clear();
        transport.write(ENTRY_BYTE).await?;
        time::sleep(self.shared.config.cli_settle).await;

        if self.shared.config.cli_verify_banner
            && !lock(&self.shared.console).contains(BANNER_TOKEN)
        {
            self.report(Level::Error, "No console banner received");

            return Err(Error::ProtocolMismatch);
        }

        lock(&self.shared.console).clear();
        *lock(&self.shared.console_gate) = Some(permit);
        restore.armed = false;
        self.shared.mode.send_replace(ConnectionMode::Cli);
        self.report(Level::Info, "Entered console mode");

        Ok(())
    }

    /// Sends a console line and returns the response text.
    ///
    /// Collects output until the prompt reappears or the line window
    /// elapses. The echoed command and the prompt are stripped. Lines are
    /// strictly sequential; concurrent callers wait for their turn.
    pub async fn send_line(&self, line: &str) -> Result<String> {
        self.send_line_within(line, self.shared.config.cli_line_window)
            .await
    }

    async fn send_line_within(&self, line: &str, window: Duration) -> Result<String> {
        let _turn = self.shared.console_line.lock().await;

        if self.mode() != ConnectionMode::Cli {
            return Err(Error::CliInactive);
        }

        let transport = self.open_transport()?;
        let deadline = Instant::now() + window;

        lock(&self.shared.console).clear();
        transport.write(format!("{line}\n").as_bytes()).await?;

        loop {
            let notified = self.shared.console_notify.notified();

            tokio::pin!(notified);
            notified.as_mut().enable();

            if lock(&self.shared.console).replace('\r', "").ends_with(PROMPT) {
                break;
            }

            if time::timeout_at(deadline, notified).await.is_err() {
                trace!("Console window elapsed for {line:?}");
                break;
            }
        }

        let raw = std::mem::take(&mut *lock(&self.shared.console));

        Ok(clean_response(&raw, line))
    }

    /// Sends a console line and classifies the response.
    pub async fn cli_command(&self, line: &str) -> Result<CliOutcome> {
        let response = self.send_line(line).await?;

        Ok(classify(line, &response))
    }

    /// Reads a console setting with `get`.
    ///
    /// Fails with [`Error::CliRejected`] if the firmware does not know the
    /// setting.
    pub(crate) async fn cli_get(&self, name: &str) -> Result<String> {
        match self.cli_command(&format!("get {name}")).await? {
            CliOutcome::Value(val) => Ok(val),
            CliOutcome::Rejected(_) => Err(Error::CliRejected),
            CliOutcome::Accepted | CliOutcome::Unrecognized(_) => Err(Error::ProtocolMismatch),
        }
    }

    /// Sends a console line that changes configuration.
    ///
    /// Fails with [`Error::CliRejected`] if the firmware reported an error.
    pub(crate) async fn cli_apply(&self, line: &str) -> Result<()> {
        match self.cli_command(line).await? {
            CliOutcome::Rejected(err) => {
                self.report(Level::Warn, format!("Console rejected {line:?}: {err}"));

                Err(Error::CliRejected)
            }
            CliOutcome::Unrecognized(text) => {
                self.report(
                    Level::Warn,
                    format!("Unrecognized console response to {line:?}: {text:?}"),
                );

                Ok(())
            }
            CliOutcome::Accepted | CliOutcome::Value(_) => Ok(()),
        }
    }

    /// Returns the full output of a console listing command such as
    /// `dump`, `diff all`, `aux` or `servo`.
    pub async fn cli_dump(&self, command: &str) -> Result<String> {
        self.send_line_within(command, self.shared.config.cli_dump_window)
            .await
    }

    /// Leaves console mode with `save` or `exit`.
    ///
    /// Saving reboots the firmware; the client then waits for it to come
    /// back according to its reconnect policy. Exiting without saving only
    /// reconnects if the transport was closed.
    pub async fn exit_cli(&self, save: bool) -> Result<()> {
        let turn = self.shared.console_line.lock().await;

        if self.mode() != ConnectionMode::Cli {
            return Err(Error::CliInactive);
        }

        self.shared.mode.send_replace(ConnectionMode::ExitingCli);

        let line: &[u8] = if save { b"save\n" } else { b"exit\n" };
        let res = match self.open_transport() {
            Ok(transport) => transport.write(line).await.map_err(Error::from),
            Err(err) => Err(err),
        };

        lock(&self.shared.console).clear();
        lock(&self.shared.console_gate).take();
        self.shared.mode.send_replace(ConnectionMode::Binary);
        drop(turn);
        self.report(Level::Info, "Left console mode");

        res?;

        if save {
            self.await_reboot().await?;
        } else {
            time::sleep(self.shared.config.cli_settle).await;

            if !self.is_connected() {
                self.await_reboot().await?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        command::Command,
        testing::{MockFirmware, MockTransport, Reply, init_logger},
    };

    #[test]
    fn command_families() {
        assert_eq!(CommandFamily::of("set gyro_lpf1_static_hz = 250"), CommandFamily::Set);
        assert_eq!(CommandFamily::of("get name"), CommandFamily::Get);
        assert_eq!(CommandFamily::of("servo 0 1000 2000 1500 100"), CommandFamily::Indexed);
        assert_eq!(CommandFamily::of("save"), CommandFamily::Save);
        assert_eq!(CommandFamily::of("diff all"), CommandFamily::Other);
    }

    #[test]
    fn classify_responses() {
        assert_eq!(
            classify("set roll_rate = 70", "roll_rate set to 70"),
            CliOutcome::Accepted
        );
        assert_eq!(
            classify("set roll_rate = 900", "###ERROR IN set: INVALID VALUE###"),
            CliOutcome::Rejected("###ERROR IN set: INVALID VALUE###".into())
        );
        assert_eq!(
            classify("set foo = 1", "Invalid name"),
            CliOutcome::Rejected("Invalid name".into())
        );
        assert_eq!(
            classify("get roll_rate", "roll_rate = 70\nAllowed range: 0 - 255"),
            CliOutcome::Value("70".into())
        );
        assert_eq!(
            classify("servo 0 1000 2000 1500 100", ""),
            CliOutcome::Accepted
        );
        assert_eq!(
            classify("set roll_rate = 70", "ok"),
            CliOutcome::Unrecognized("ok".into()),
            "unknown wording should be unrecognized"
        );
    }

    #[test]
    fn strip_echo_and_prompt() {
        assert_eq!(
            clean_response("get name\r\nname = quad\r\n\r\n# ", "get name"),
            "name = quad"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn console_blocks_binary() -> Result<()> {
        init_logger();

        let firmware = MockFirmware::new()
            .reply(Command::Status, Reply::Silent)
            .line("set roll_rate", "roll_rate set to 70");
        let (client, transport) = MockTransport::attach(firmware);
        let pending = tokio::spawn({
            let client = client.clone();

            async move { client.request(Command::Status, &[]).await }
        });

        tokio::task::yield_now().await;
        client.enter_cli().await?;

        assert_eq!(
            pending.await.ok(),
            Some(Err(Error::CliModeBlocked)),
            "outstanding exchange should be rejected"
        );
        assert_eq!(
            client.request(Command::Attitude, &[]).await,
            Err(Error::CliModeBlocked),
            "binary dispatch should fail while console is active"
        );
        assert_eq!(client.cli_command("set roll_rate = 70").await?, CliOutcome::Accepted);

        let written = transport.written_since_console();

        assert!(
            written.iter().all(|chunk| !chunk.starts_with(b"$")),
            "no binary frame should be written in console mode: {written:?}"
        );

        client.exit_cli(false).await?;

        assert_eq!(client.mode(), ConnectionMode::Binary);
        assert_eq!(
            client.send_line("status").await,
            Err(Error::CliInactive),
            "lines require an active console"
        );

        Ok(())
    }
}
