//! Startup gate: is the local store compatible with the cluster?
//!
//! Runs exactly once, at member startup, before any catch-up traffic. An
//! incompatible identity is fatal; the member must not start.

use crate::cluster::ClusterContext;
use crate::error::{SeedError, SeedResult};
use crate::identity::StoreIdentity;

/// How the local identity was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verified {
    /// The cluster already carries this store lineage; the member rejoins
    /// or seeds into it.
    Matched,
    /// No identity was established yet; this member's identity is now
    /// authoritative for the cluster.
    Established,
}

/// Check the local store identity against the cluster.
///
/// Accepts when the cluster's established store id matches the local one,
/// or when the cluster has no identity yet (first member to start). Every
/// other combination is [`SeedError::IdentityIncompatible`].
pub fn verify(local: &StoreIdentity, cluster: &ClusterContext) -> SeedResult<Verified> {
    match cluster.established() {
        Some(expected) if expected == local.store_id => Ok(Verified::Matched),
        Some(expected) => Err(SeedError::IdentityIncompatible {
            expected,
            actual: local.store_id,
        }),
        None => {
            let authoritative = cluster.establish(local.store_id);
            if authoritative == local.store_id {
                Ok(Verified::Established)
            } else {
                // Lost the establishment race to a concurrent starter.
                Err(SeedError::IdentityIncompatible {
                    expected: authoritative,
                    actual: local.store_id,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::StoreId;

    #[test]
    fn first_member_establishes_the_identity() {
        let ctx = ClusterContext::new();
        let identity = StoreIdentity::new(StoreId::new());

        let verified = verify(&identity, &ctx).expect("verify");
        assert_eq!(verified, Verified::Established);
        assert_eq!(ctx.established(), Some(identity.store_id));
    }

    #[test]
    fn matching_member_is_accepted() {
        let ctx = ClusterContext::new();
        let store_id = StoreId::new();
        ctx.establish(store_id);

        let identity = StoreIdentity {
            store_id,
            last_applied_tx: 42,
        };
        let verified = verify(&identity, &ctx).expect("verify");
        assert_eq!(verified, Verified::Matched);
    }

    #[test]
    fn mismatched_member_is_rejected() {
        let ctx = ClusterContext::new();
        let established = StoreId::new();
        ctx.establish(established);

        let identity = StoreIdentity::new(StoreId::new());
        let err = verify(&identity, &ctx).expect_err("mismatch must fail");
        assert!(matches!(err, SeedError::IdentityIncompatible { .. }));
    }
}
