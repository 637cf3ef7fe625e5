//! Operator commands that need an explicit confirmation.
//!
//! A destructive action is never applied from inside a blocking dialog.
//! Instead the caller files a request, the UI answers it whenever the user
//! decides, and the runtime applies confirmed commands on its next period:
//!
//! ```text
//!   request(cmd) ──► Pending ──respond(Confirmed)──► Ready ──runtime──► Applied/Failed
//!        │                  └──respond(Declined)──────────────────────► Declined
//!        └─ CommandTicket (oneshot receiver for the outcome)
//! ```

use fleetview_env::EntityId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tokio::sync::oneshot;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum OperatorCommand {
    /// Delete a bus from the fleet
    RemoveFromFleet { id: EntityId },
    /// End the current driver shift (logout)
    EndShift,
    /// File a free-text issue, optionally about one bus
    ReportIssue {
        entity: Option<EntityId>,
        description: String,
    },
}

/// The user's answer to a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confirmation {
    Confirmed,
    Declined,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandOutcome {
    Applied,
    Declined,
    Failed(String),
}

/// Handed back to the requester; resolves once the command settles.
pub struct CommandTicket {
    pub id: u64,
    pub command: OperatorCommand,
    outcome: oneshot::Receiver<CommandOutcome>,
}

impl CommandTicket {
    /// Non-blocking check, for callers without an async context.
    pub fn try_outcome(&mut self) -> Option<CommandOutcome> {
        match self.outcome.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                Some(CommandOutcome::Failed("command dropped".to_string()))
            }
        }
    }

    pub async fn outcome(self) -> CommandOutcome {
        self.outcome
            .await
            .unwrap_or_else(|_| CommandOutcome::Failed("command dropped".to_string()))
    }
}

/// A confirmed command waiting for the runtime.
pub struct ReadyCommand {
    pub id: u64,
    pub command: OperatorCommand,
    reply: oneshot::Sender<CommandOutcome>,
}

impl ReadyCommand {
    pub fn complete(self, outcome: CommandOutcome) {
        debug!("commands: #{} settled as {:?}", self.id, outcome);
        // Requester may have dropped its ticket; nothing to do then.
        let _ = self.reply.send(outcome);
    }
}

struct PendingCommand {
    command: OperatorCommand,
    reply: oneshot::Sender<CommandOutcome>,
}

#[derive(Default)]
pub struct CommandBus {
    next_id: u64,
    pending: BTreeMap<u64, PendingCommand>,
    ready: VecDeque<ReadyCommand>,
}

impl CommandBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Files a command that waits for the user's confirmation.
    pub fn request(&mut self, command: OperatorCommand) -> CommandTicket {
        self.prune_abandoned();
        self.next_id += 1;
        let id = self.next_id;
        let (reply, outcome) = oneshot::channel();

        debug!("commands: #{} awaiting confirmation ({:?})", id, command);
        self.pending.insert(
            id,
            PendingCommand {
                command: command.clone(),
                reply,
            },
        );
        CommandTicket {
            id,
            command,
            outcome,
        }
    }

    /// Records the user's answer.
    ///
    /// # Returns
    /// `false` if no pending command has that id (already answered or never
    /// filed).
    pub fn respond(&mut self, ticket_id: u64, confirmation: Confirmation) -> bool {
        let Some(pending) = self.pending.remove(&ticket_id) else {
            return false;
        };

        let ready = ReadyCommand {
            id: ticket_id,
            command: pending.command,
            reply: pending.reply,
        };
        match confirmation {
            Confirmation::Confirmed => self.ready.push_back(ready),
            Confirmation::Declined => ready.complete(CommandOutcome::Declined),
        }
        true
    }

    /// Confirmed commands in the order they were confirmed.
    pub fn take_ready(&mut self) -> Vec<ReadyCommand> {
        self.prune_abandoned();
        self.ready.drain(..).collect()
    }

    /// Forgets unanswered commands whose ticket was dropped.
    fn prune_abandoned(&mut self) {
        self.pending.retain(|id, p| {
            let open = !p.reply.is_closed();
            if !open {
                debug!("commands: #{} abandoned before an answer", id);
            }
            open
        });
    }

    /// Commands still waiting for an answer.
    pub fn pending(&self) -> impl Iterator<Item = (u64, &OperatorCommand)> + '_ {
        self.pending.iter().map(|(id, p)| (*id, &p.command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remove(id: &str) -> OperatorCommand {
        OperatorCommand::RemoveFromFleet { id: EntityId::new(id) }
    }

    #[test]
    fn test_request_waits_for_answer() {
        let mut bus = CommandBus::new();
        let mut ticket = bus.request(remove("PB-001"));

        assert!(ticket.try_outcome().is_none());
        assert_eq!(bus.pending().count(), 1);
        assert!(bus.take_ready().is_empty());
    }

    #[test]
    fn test_decline_resolves_immediately() {
        let mut bus = CommandBus::new();
        let mut ticket = bus.request(OperatorCommand::EndShift);

        assert!(bus.respond(ticket.id, Confirmation::Declined));
        assert_eq!(ticket.try_outcome(), Some(CommandOutcome::Declined));
        assert!(bus.take_ready().is_empty());
    }

    #[test]
    fn test_confirm_queues_for_runtime() {
        let mut bus = CommandBus::new();
        let first = bus.request(remove("PB-001"));
        let second = bus.request(remove("PB-045"));

        bus.respond(second.id, Confirmation::Confirmed);
        bus.respond(first.id, Confirmation::Confirmed);
        let ready = bus.take_ready();

        assert_eq!(ready.len(), 2);
        assert_eq!(ready[0].command, remove("PB-045"));
        assert_eq!(ready[1].command, remove("PB-001"));
    }

    #[test]
    fn test_double_answer_is_rejected() {
        let mut bus = CommandBus::new();
        let ticket = bus.request(OperatorCommand::EndShift);

        assert!(bus.respond(ticket.id, Confirmation::Confirmed));
        assert!(!bus.respond(ticket.id, Confirmation::Declined));
        assert!(!bus.respond(999, Confirmation::Confirmed));
    }

    #[tokio::test]
    async fn test_ticket_resolves_after_completion() {
        let mut bus = CommandBus::new();
        let ticket = bus.request(remove("PB-112"));
        bus.respond(ticket.id, Confirmation::Confirmed);

        for ready in bus.take_ready() {
            ready.complete(CommandOutcome::Applied);
        }
        assert_eq!(ticket.outcome().await, CommandOutcome::Applied);
    }

    #[test]
    fn test_dropped_ticket_is_forgotten() {
        let mut bus = CommandBus::new();
        let abandoned = bus.request(remove("PB-001"));
        let kept = bus.request(remove("PB-045"));
        let abandoned_id = abandoned.id;
        drop(abandoned);

        assert!(bus.take_ready().is_empty());
        let pending: Vec<u64> = bus.pending().map(|(id, _)| id).collect();
        assert_eq!(pending, vec![kept.id]);
        assert!(!bus.respond(abandoned_id, Confirmation::Confirmed));

        // Filing another command also sweeps
        drop(kept);
        let _next = bus.request(OperatorCommand::EndShift);
        assert_eq!(bus.pending().count(), 1);
    }

    #[test]
    fn test_dropped_bus_fails_ticket() {
        let mut bus = CommandBus::new();
        let mut ticket = bus.request(OperatorCommand::EndShift);
        drop(bus);

        assert!(matches!(ticket.try_outcome(), Some(CommandOutcome::Failed(_))));
    }
}
