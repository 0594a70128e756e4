//! Scripted firmware for unit tests.
//!
//! [`MockTransport`] answers binary requests according to a
//! [`MockFirmware`] script, switches to console mode on the entry byte and
//! records every byte written and emitted in order.

use crate::{
    Client, EngineConfig,
    client::lock,
    codec::{Decoder, Direction, Frame},
    command::Command,
    transport::{Chunk, Connector, Transport},
};
use async_trait::async_trait;
use log::LevelFilter;
use std::{
    collections::HashMap,
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    time::Duration,
};
use tokio::sync::broadcast;

const BANNER: &str = "\r\nEntering CLI Mode, type 'exit' to return, or 'help'\r\n\r\n# ";

pub fn init_logger() {
    let _ = env_logger::builder()
        .filter_level(LevelFilter::max())
        .is_test(true)
        .try_init();
}

/// Scripted answer to a binary request.
#[derive(Clone, Debug)]
pub enum Reply {
    Respond(Vec<u8>),
    Error,
    Silent,
    Delay(Duration, Vec<u8>),
}

/// Bytes crossing the mock transport, in order.
#[derive(PartialEq, Eq, Clone, Debug)]
pub enum Wire {
    Out(Vec<u8>),
    In(Vec<u8>),
}

#[derive(Default, Clone, Debug)]
pub struct MockFirmware {
    replies: HashMap<u16, Reply>,
    lines: Vec<(String, String)>,
    reboot_on_save: bool,
}

impl MockFirmware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, command: impl Into<u16>, reply: Reply) -> Self {
        self.replies.insert(command.into(), reply);
        self
    }

    pub fn respond(self, command: impl Into<u16>, payload: &[u8]) -> Self {
        self.reply(command, Reply::Respond(payload.to_vec()))
    }

    /// Answers console lines starting with `prefix`.
    pub fn line(mut self, prefix: &str, response: &str) -> Self {
        self.lines.push((prefix.to_string(), response.to_string()));
        self
    }

    pub fn identity(self, variant: &str, version: [u8; 3], api: [u8; 2]) -> Self {
        self.respond(Command::ApiVersion, &[0, api[0], api[1]])
            .respond(Command::FcVariant, variant.as_bytes())
            .respond(Command::FcVersion, &version)
            .respond(Command::BoardInfo, b"MOCK\x00\x00\x02")
    }

    /// Closes the transport after `save`, `EEPROM_WRITE` or `REBOOT`.
    pub fn reboot_on_save(mut self) -> Self {
        self.reboot_on_save = true;
        self
    }
}

pub struct MockTransport {
    firmware: MockFirmware,
    open: AtomicBool,
    console: AtomicBool,
    chunks: broadcast::Sender<Chunk>,
    trace: Arc<Mutex<Vec<Wire>>>,
    line: Mutex<String>,
    decoder: Mutex<Decoder>,
}

impl MockTransport {
    pub fn new(firmware: MockFirmware) -> Arc<Self> {
        let (chunks, _) = broadcast::channel(64);

        Arc::new(Self {
            firmware,
            open: AtomicBool::new(true),
            console: AtomicBool::new(false),
            chunks,
            trace: Arc::new(Mutex::new(Vec::new())),
            line: Mutex::new(String::new()),
            decoder: Mutex::new(Decoder::new()),
        })
    }

    /// Attaches a new mock to a client with the default configuration.
    pub fn attach(firmware: MockFirmware) -> (Client, Arc<Self>) {
        Self::attach_with(firmware, EngineConfig::default())
    }

    pub fn attach_with(firmware: MockFirmware, config: EngineConfig) -> (Client, Arc<Self>) {
        let client = Client::new(config);
        let transport = Self::new(firmware);

        client.connect(transport.clone());

        (client, transport)
    }

    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    pub fn trace(&self) -> Vec<Wire> {
        lock(&self.trace).clone()
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.trace()
            .into_iter()
            .filter_map(|wire| match wire {
                Wire::Out(bytes) => Some(bytes),
                Wire::In(_) => None,
            })
            .collect()
    }

    /// Returns everything written after the last console entry byte.
    pub fn written_since_console(&self) -> Vec<Vec<u8>> {
        let written = self.written();
        let start = written
            .iter()
            .rposition(|bytes| bytes == b"#")
            .map_or(written.len(), |pos| pos + 1);

        written[start..].to_vec()
    }

    /// Returns all binary requests written so far.
    pub fn requests(&self) -> Vec<Frame> {
        let mut decoder = Decoder::new();

        self.written()
            .iter()
            .filter(|bytes| bytes.starts_with(b"$"))
            .flat_map(|bytes| decoder.push(bytes))
            .collect()
    }

    /// Returns all console lines written so far.
    pub fn lines(&self) -> Vec<String> {
        self.written()
            .iter()
            .filter(|bytes| !bytes.starts_with(b"$") && bytes.ends_with(b"\n"))
            .map(|bytes| String::from_utf8_lossy(bytes).trim_end().to_string())
            .collect()
    }

    fn emit(&self, bytes: Vec<u8>) {
        emit(&self.trace, &self.chunks, bytes);
    }

    fn answer(&self, frame: &Frame) {
        let reply = self.firmware.replies.get(&frame.command).cloned();
        let reboots = matches!(
            Command::from_repr(frame.command),
            Some(Command::EepromWrite | Command::Reboot)
        );
        let reply = match reply {
            Some(reply) => reply,
            None if reboots => Reply::Respond(Vec::new()),
            None => Reply::Error,
        };
        let response = |direction, payload| {
            Frame {
                version: frame.version,
                direction,
                command: frame.command,
                payload,
            }
            .encode()
        };

        match reply {
            Reply::Respond(payload) => self.emit(response(Direction::Response, payload)),
            Reply::Error => self.emit(response(Direction::Error, Vec::new())),
            Reply::Silent => {}
            Reply::Delay(delay, payload) => {
                let bytes = response(Direction::Response, payload);
                let trace = self.trace.clone();
                let chunks = self.chunks.clone();

                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    emit(&trace, &chunks, bytes);
                });
            }
        }

        if reboots && self.firmware.reboot_on_save {
            self.close();
        }
    }

    fn answer_line(&self, line: &str) {
        match line {
            "save" => {
                self.emit(b"save\r\nSaving\r\nRebooting\r\n".to_vec());
                self.console.store(false, Ordering::SeqCst);

                if self.firmware.reboot_on_save {
                    self.close();
                }
            }
            "exit" => {
                self.emit(b"exit\r\n\r\nLeaving CLI mode\r\n".to_vec());
                self.console.store(false, Ordering::SeqCst);
            }
            _ => {
                let response = self
                    .firmware
                    .lines
                    .iter()
                    .find(|(prefix, _)| line.starts_with(prefix.as_str()))
                    .map_or("Unknown command, try 'help'", |(_, response)| response);
                let text = if response.is_empty() {
                    format!("{line}\r\n\r\n# ")
                } else {
                    format!("{line}\r\n{response}\r\n\r\n# ")
                };

                self.emit(text.into_bytes());
            }
        }
    }
}

fn emit(trace: &Mutex<Vec<Wire>>, chunks: &broadcast::Sender<Chunk>, bytes: Vec<u8>) {
    lock(trace).push(Wire::In(bytes.clone()));

    let _ = chunks.send(bytes);
}

#[async_trait]
impl Transport for MockTransport {
    async fn write(&self, bytes: &[u8]) -> io::Result<()> {
        if !self.is_open() {
            return Err(io::ErrorKind::NotConnected.into());
        }

        lock(&self.trace).push(Wire::Out(bytes.to_vec()));

        if self.console.load(Ordering::SeqCst) {
            let mut done = Vec::new();

            {
                let mut line = lock(&self.line);

                line.push_str(&String::from_utf8_lossy(bytes));

                while let Some(pos) = line.find('\n') {
                    done.push(line[..pos].trim().to_string());
                    line.replace_range(..=pos, "");
                }
            }

            for line in done {
                self.answer_line(&line);
            }
        } else if bytes == b"#" {
            self.console.store(true, Ordering::SeqCst);
            self.emit(BANNER.as_bytes().to_vec());
        } else {
            let frames = lock(&self.decoder).push(bytes);

            for frame in frames.iter().filter(|f| f.direction == Direction::Request) {
                self.answer(frame);
            }
        }

        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<Chunk> {
        self.chunks.subscribe()
    }
}

/// Hands out closed transports until the given attempt.
pub struct MockConnector {
    firmware: MockFirmware,
    open_on: u32,
    attempts: AtomicU32,
}

impl MockConnector {
    pub fn new(firmware: MockFirmware, open_on: u32) -> Arc<Self> {
        Arc::new(Self {
            firmware,
            open_on,
            attempts: AtomicU32::new(0),
        })
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> io::Result<Arc<dyn Transport>> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let transport = MockTransport::new(self.firmware.clone());

        if attempt < self.open_on {
            transport.close();
        }

        Ok(transport)
    }
}
