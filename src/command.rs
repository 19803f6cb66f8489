//! Replicated store commands.
//!
//! Every mutation of a member's data goes through this enum. Commands are
//! serialized into the transaction log and applied deterministically on
//! every member, so identical logs produce identical state.

use serde::{Deserialize, Serialize};

/// Commands replicated through the transaction log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreCommand {
    /// Set a key to a value.
    Put {
        /// Key to set.
        key: String,
        /// Value to store.
        value: String,
    },

    /// Remove a key.
    Delete {
        /// Key to remove.
        key: String,
    },
}

impl StoreCommand {
    /// Human-readable command name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            StoreCommand::Put { .. } => "put",
            StoreCommand::Delete { .. } => "delete",
        }
    }
}
