//! In-memory replicated state derived from the transaction log.

use crate::command::StoreCommand;
use crate::identity::TxId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The key-value state a member serves.
///
/// Rebuilt deterministically by replaying the transaction log, so two
/// members with identical logs hold identical state.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreState {
    entries: BTreeMap<String, String>,
}

impl StoreState {
    /// Apply one command to the state.
    pub fn apply(&mut self, command: &StoreCommand) {
        match command {
            StoreCommand::Put { key, value } => {
                self.entries.insert(key.clone(), value.clone());
            }
            StoreCommand::Delete { key } => {
                self.entries.remove(key);
            }
        }
    }

    /// Look up a key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Number of keys in the state.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the state holds no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Canonical representation for cross-member comparison.
    pub fn representation(&self, last_applied_tx: TxId) -> DbRepresentation {
        DbRepresentation {
            entries: self.entries.clone(),
            last_applied_tx,
        }
    }
}

/// Canonical, ordered view of a store's applied data.
///
/// Two members have converged exactly when their representations compare
/// equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbRepresentation {
    entries: BTreeMap<String, String>,
    last_applied_tx: TxId,
}

impl DbRepresentation {
    /// Highest transaction reflected in this representation.
    pub fn last_applied_tx(&self) -> TxId {
        self.last_applied_tx
    }

    /// Number of keys in the representation.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the representation holds no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_and_delete_round_trip() {
        let mut state = StoreState::default();
        state.apply(&StoreCommand::Put {
            key: "a".into(),
            value: "1".into(),
        });
        state.apply(&StoreCommand::Put {
            key: "b".into(),
            value: "2".into(),
        });
        assert_eq!(state.get("a"), Some("1"));
        assert_eq!(state.len(), 2);

        state.apply(&StoreCommand::Delete { key: "a".into() });
        assert_eq!(state.get("a"), None);
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn identical_histories_produce_equal_representations() {
        let commands = vec![
            StoreCommand::Put {
                key: "x".into(),
                value: "1".into(),
            },
            StoreCommand::Put {
                key: "x".into(),
                value: "2".into(),
            },
            StoreCommand::Delete { key: "y".into() },
        ];

        let mut a = StoreState::default();
        let mut b = StoreState::default();
        for cmd in &commands {
            a.apply(cmd);
            b.apply(cmd);
        }

        assert_eq!(a.representation(3), b.representation(3));
        assert_ne!(a.representation(3), b.representation(2));
    }
}
