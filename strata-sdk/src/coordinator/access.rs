//! Access control and its audit trail.

use chrono::Utc;
use std::collections::VecDeque;
use strata_core::Tier;

use super::types::{AccessDecision, AccessKind};

/// Decisions the audit trail keeps.
pub const AUDIT_TRAIL_CAPACITY: usize = 1000;

/// Static capability table: reads and writes everywhere, deletes only on
/// the fast tier.
pub fn is_granted(access: AccessKind, tier: Tier) -> bool {
    match access {
        AccessKind::Read | AccessKind::Write => true,
        AccessKind::Delete => tier == Tier::Fast,
    }
}

pub fn decide(owner_id: &str, access: AccessKind, tier: Tier, resource_id: &str) -> AccessDecision {
    let granted = is_granted(access, tier);
    let reason = if granted {
        format!("{access} permitted on {tier} tier")
    } else {
        format!("{access} not permitted on {tier} tier")
    };
    AccessDecision {
        owner_id: owner_id.to_string(),
        access,
        tier,
        resource_id: resource_id.to_string(),
        granted,
        reason,
        decided_at: Utc::now(),
    }
}

/// Bounded record of the most recent access decisions.
#[derive(Debug)]
pub struct AuditTrail {
    capacity: usize,
    decisions: VecDeque<AccessDecision>,
}

impl Default for AuditTrail {
    fn default() -> Self {
        Self::new(AUDIT_TRAIL_CAPACITY)
    }
}

impl AuditTrail {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            decisions: VecDeque::with_capacity(capacity.min(64)),
        }
    }

    pub fn record(&mut self, decision: AccessDecision) {
        tracing::info!(
            target: "strata::audit",
            owner_id = %decision.owner_id,
            access = %decision.access,
            tier = %decision.tier,
            resource_id = %decision.resource_id,
            granted = decision.granted,
            "Access decision"
        );
        if self.capacity == 0 {
            return;
        }
        while self.decisions.len() >= self.capacity {
            self.decisions.pop_front();
        }
        self.decisions.push_back(decision);
    }

    /// Up to `limit` decisions, newest first.
    pub fn recent(&self, limit: usize) -> Vec<AccessDecision> {
        self.decisions.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.decisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }
}
