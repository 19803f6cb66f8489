//! Shared cluster context: the store identity the cluster has agreed on.
//!
//! Discovery and leader election live outside this crate; the context is the
//! narrow slice of that machinery seeding needs, namely "which store lineage
//! does this cluster carry, if any". The first member to start establishes
//! it; everyone else must match it.

use crate::identity::StoreId;
use parking_lot::RwLock;
use std::sync::Arc;

/// Cloneable handle on the cluster's established store identity.
#[derive(Clone, Default)]
pub struct ClusterContext {
    established: Arc<RwLock<Option<StoreId>>>,
}

impl ClusterContext {
    /// A context with no established identity (a cluster that has never
    /// started a member).
    pub fn new() -> Self {
        Self::default()
    }

    /// The identity the cluster has established, if any.
    pub fn established(&self) -> Option<StoreId> {
        *self.established.read()
    }

    /// Establish `store_id` as the cluster identity if none is set yet.
    ///
    /// Returns the identity that is authoritative afterwards, which is the
    /// previously established one when the race was lost.
    pub fn establish(&self, store_id: StoreId) -> StoreId {
        let mut guard = self.established.write();
        match *guard {
            Some(existing) => existing,
            None => {
                *guard = Some(store_id);
                store_id
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_establish_wins() {
        let ctx = ClusterContext::new();
        assert_eq!(ctx.established(), None);

        let first = StoreId::new();
        let second = StoreId::new();

        assert_eq!(ctx.establish(first), first);
        assert_eq!(ctx.establish(second), first);
        assert_eq!(ctx.established(), Some(first));
    }
}
