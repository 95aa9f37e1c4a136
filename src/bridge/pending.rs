use std::collections::HashMap;

use crate::error::BridgeError;

/// Completion for an async command. Consumed on first call, so it cannot fire twice.
pub type CommandCompletion = Box<dyn FnOnce(Result<(), BridgeError>) + Send + 'static>;

pub struct PendingCommand {
    /// First argument of the command, for logs.
    pub command: String,
    completion: CommandCompletion,
}

impl PendingCommand {
    pub fn complete(self, result: Result<(), BridgeError>) {
        (self.completion)(result)
    }
}

/// Outstanding async commands by correlation id.
#[derive(Default)]
pub struct PendingCommands {
    entries: HashMap<u64, PendingCommand>,
}

impl PendingCommands {
    pub fn insert(&mut self, reply_id: u64, command: String, completion: CommandCompletion) {
        self.entries.insert(reply_id, PendingCommand { command, completion });
    }

    /// Removes the entry for `reply_id`; whoever gets it owns the completion.
    pub fn take(&mut self, reply_id: u64) -> Option<PendingCommand> {
        self.entries.remove(&reply_id)
    }

    pub fn drain_all(&mut self) -> Vec<(u64, PendingCommand)> {
        self.entries.drain().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
