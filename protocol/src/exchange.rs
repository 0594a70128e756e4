//! Pending exchange table.
//!
//! Tracks the single outstanding request per command identifier and routes
//! decoded frames to their waiting caller. The table itself performs no I/O;
//! the request gate and timeouts are driven by
//! [`Client::dispatch`](crate::Client::dispatch).

use crate::{
    Error, Result,
    codec::{Direction, Frame},
};
use log::{debug, trace};
use std::collections::HashMap;
use tokio::{sync::oneshot, time::Instant};

/// Receiving half handed to the dispatching caller.
pub type Reply = oneshot::Receiver<Result<Vec<u8>>>;

/// Identifies one registration, so that a timed-out caller only removes its
/// own entry and never a newer one for the same command.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct Ticket(u64);

#[derive(Debug)]
struct Pending {
    ticket: Ticket,
    deadline: Instant,
    tx: oneshot::Sender<Result<Vec<u8>>>,
}

/// Map from command identifier to the exchange awaiting its response.
#[derive(Default, Debug)]
pub struct PendingTable {
    next_ticket: u64,
    entries: HashMap<u16, Pending>,
}

impl PendingTable {
    /// Constructs an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of outstanding exchanges.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no exchange is outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `true` if an exchange for the command is outstanding.
    #[must_use]
    pub fn contains(&self, command: u16) -> bool {
        self.entries.contains_key(&command)
    }

    /// Registers a new exchange for the command.
    ///
    /// A stale exchange for the same command is replaced and its caller
    /// fails with [`Error::Superseded`], since the firmware only answers
    /// its most recent query for a given command.
    pub fn register(&mut self, command: u16, deadline: Instant) -> (Ticket, Reply) {
        let (tx, rx) = oneshot::channel();
        let ticket = Ticket(self.next_ticket);

        self.next_ticket += 1;

        if let Some(stale) = self.entries.insert(
            command,
            Pending {
                ticket,
                deadline,
                tx,
            },
        ) {
            debug!(
                "Replacing stale exchange for command {command} (deadline in {:?})",
                stale.deadline.saturating_duration_since(Instant::now())
            );

            let _ = stale.tx.send(Err(Error::Superseded(command)));
        }

        (ticket, rx)
    }

    /// Removes the exchange if it still belongs to the given ticket.
    ///
    /// Returns `true` if an entry was removed.
    pub fn forget(&mut self, command: u16, ticket: Ticket) -> bool {
        match self.entries.get(&command) {
            Some(pending) if pending.ticket == ticket => {
                self.entries.remove(&command);

                true
            }
            _ => false,
        }
    }

    /// Completes the exchange matching the frame's command.
    ///
    /// Response frames resolve with their payload, error frames fail with
    /// [`Error::CommandUnsupported`]. Returns `false` for unsolicited frames.
    pub fn complete(&mut self, frame: Frame) -> bool {
        let res = match frame.direction {
            Direction::Response => Ok(frame.payload),
            Direction::Error => Err(Error::CommandUnsupported(frame.command)),
            Direction::Request => {
                trace!("Ignoring echoed request for command {}", frame.command);

                return false;
            }
        };

        match self.entries.remove(&frame.command) {
            Some(pending) => {
                // Receiver may already be gone if the caller was cancelled
                let _ = pending.tx.send(res);

                true
            }
            None => {
                debug!("Dropping unsolicited frame for command {}", frame.command);

                false
            }
        }
    }

    /// Fails every outstanding exchange with the given error.
    ///
    /// Returns the number of rejected exchanges.
    pub fn reject_all(&mut self, err: Error) -> usize {
        let count = self.entries.len();

        for (_, pending) in self.entries.drain() {
            let _ = pending.tx.send(Err(err));
        }

        count
    }
}
