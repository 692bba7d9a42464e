//! Partition registry and capacity accounting.

use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use strata_core::Tier;

use super::types::{CapacityLimits, Partition, PartitionStatus, PartitionStrategy, TierUsage};
use crate::utils::{validate_id, validate_owner};
use crate::{SDKError, SDKResult};

struct Slot {
    partition: Partition,
    /// Sizes of the entries routed through the partition, per tier
    members: BTreeMap<Tier, BTreeMap<String, u64>>,
}

impl Slot {
    fn refresh(&mut self) {
        let mut full = false;
        self.partition.current_usage = self
            .members
            .iter()
            .map(|(tier, items)| {
                let usage = TierUsage {
                    items: items.len(),
                    size_bytes: items.values().sum(),
                };
                full |= at_limit(&self.partition.capacity_limits, &usage);
                (*tier, usage)
            })
            .collect();
        self.partition.status = if full {
            PartitionStatus::Full
        } else {
            PartitionStatus::Active
        };
    }
}

fn at_limit(limits: &CapacityLimits, usage: &TierUsage) -> bool {
    limits.max_items.is_some_and(|max| usage.items >= max)
        || limits.max_size_bytes.is_some_and(|max| usage.size_bytes >= max)
}

#[derive(Default)]
pub struct PartitionRegistry {
    slots: HashMap<String, Slot>,
}

impl PartitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(
        &mut self,
        partition_id: &str,
        owner_id: &str,
        strategy: PartitionStrategy,
        capacity_limits: CapacityLimits,
    ) -> SDKResult<Partition> {
        validate_id(partition_id)?;
        validate_owner(owner_id)?;
        match capacity_limits.max_items {
            None => return Err(SDKError::invalid_input("capacity_limits.max_items is required")),
            Some(0) => return Err(SDKError::invalid_input("capacity_limits.max_items must be greater than 0")),
            Some(_) => {}
        }
        if capacity_limits.max_size_bytes == Some(0) {
            return Err(SDKError::invalid_input(
                "capacity_limits.max_size_bytes must be greater than 0",
            ));
        }
        if self.slots.contains_key(partition_id) {
            return Err(SDKError::invalid_input(format!("partition already exists: {partition_id}")));
        }

        let partition = Partition {
            partition_id: partition_id.to_string(),
            owner_id: owner_id.to_string(),
            strategy,
            capacity_limits,
            current_usage: BTreeMap::new(),
            status: PartitionStatus::Active,
            created_at: Utc::now(),
        };
        self.slots.insert(
            partition_id.to_string(),
            Slot {
                partition: partition.clone(),
                members: BTreeMap::new(),
            },
        );
        tracing::info!(partition_id, owner_id, ?strategy, "Created partition");
        Ok(partition)
    }

    pub fn get(&self, partition_id: &str) -> SDKResult<Partition> {
        self.slots
            .get(partition_id)
            .map(|s| s.partition.clone())
            .ok_or_else(|| SDKError::not_found("partition", partition_id))
    }

    pub fn list(&self) -> Vec<Partition> {
        let mut all: Vec<Partition> = self.slots.values().map(|s| s.partition.clone()).collect();
        all.sort_by(|a, b| a.partition_id.cmp(&b.partition_id));
        all
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Check that `id` may be written to `tier` through the partition.
    ///
    /// Overwriting an id the partition already holds on that tier never
    /// counts against the item limit. A write that would exceed a limit is a
    /// resource error and marks the partition full.
    pub fn check_write(&mut self, partition_id: &str, tier: Tier, id: &str, size: u64) -> SDKResult<()> {
        let slot = self
            .slots
            .get_mut(partition_id)
            .ok_or_else(|| SDKError::not_found("partition", partition_id))?;
        let items = slot.members.get(&tier);
        let existing = items.and_then(|m| m.get(id)).copied();
        let count = items.map_or(0, BTreeMap::len) + usize::from(existing.is_none());
        let bytes = items.map_or(0, |m| m.values().sum::<u64>()) - existing.unwrap_or(0) + size;

        let limits = &slot.partition.capacity_limits;
        let over_items = limits.max_items.is_some_and(|max| count > max);
        let over_bytes = limits.max_size_bytes.is_some_and(|max| bytes > max);
        if over_items || over_bytes {
            slot.partition.status = PartitionStatus::Full;
            tracing::warn!(partition_id, %tier, id, "Partition capacity exceeded");
            return Err(SDKError::resource(
                "partition capacity exceeded",
                [
                    ("partition_id", partition_id.to_string()),
                    ("tier", tier.to_string()),
                    ("max_items", limits.max_items.map_or("none".into(), |m| m.to_string())),
                ],
            ));
        }
        Ok(())
    }

    /// Record a completed write.
    pub fn commit_write(&mut self, partition_id: &str, tier: Tier, id: &str, size: u64) -> SDKResult<Partition> {
        let slot = self
            .slots
            .get_mut(partition_id)
            .ok_or_else(|| SDKError::not_found("partition", partition_id))?;
        slot.members.entry(tier).or_default().insert(id.to_string(), size);
        slot.refresh();
        Ok(slot.partition.clone())
    }

    /// Forget an entry. Returns whether the partition held it.
    pub fn release(&mut self, partition_id: &str, tier: Tier, id: &str) -> SDKResult<bool> {
        let slot = self
            .slots
            .get_mut(partition_id)
            .ok_or_else(|| SDKError::not_found("partition", partition_id))?;
        let removed = slot
            .members
            .get_mut(&tier)
            .is_some_and(|m| m.remove(id).is_some());
        slot.refresh();
        Ok(removed)
    }

    /// Ids each partition counts, grouped by partition and tier, with the
    /// partition owner.
    pub fn tracked(&self) -> Vec<(String, String, Tier, Vec<String>)> {
        let mut tracked = Vec::new();
        for (partition_id, slot) in &self.slots {
            for (tier, items) in &slot.members {
                if !items.is_empty() {
                    tracked.push((
                        partition_id.clone(),
                        slot.partition.owner_id.clone(),
                        *tier,
                        items.keys().cloned().collect(),
                    ));
                }
            }
        }
        tracked
    }

    pub fn owner_of(&self, partition_id: &str) -> SDKResult<String> {
        Ok(self.get(partition_id)?.owner_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(max_items: usize) -> PartitionRegistry {
        let mut registry = PartitionRegistry::new();
        registry
            .create("p1", "alice", PartitionStrategy::Hash, CapacityLimits::items(max_items))
            .unwrap();
        registry
    }

    #[test]
    fn test_create_validation() {
        let mut registry = registry_with(2);
        assert!(registry.create("p1", "alice", PartitionStrategy::Hash, CapacityLimits::items(2)).is_err());
        assert!(registry.create("p2", "alice", PartitionStrategy::Range, CapacityLimits::default()).is_err());
        assert!(registry.create("p3", "alice", PartitionStrategy::List, CapacityLimits::items(0)).is_err());
        assert!(registry.create("Bad Id", "alice", PartitionStrategy::List, CapacityLimits::items(1)).is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_third_write_is_rejected_at_two_items() {
        let mut registry = registry_with(2);
        for id in ["a", "b"] {
            registry.check_write("p1", Tier::Fast, id, 10).unwrap();
            registry.commit_write("p1", Tier::Fast, id, 10).unwrap();
        }
        assert_eq!(registry.get("p1").unwrap().status, PartitionStatus::Full);

        let err = registry.check_write("p1", Tier::Fast, "c", 10).unwrap_err();
        assert_eq!(err.kind(), strata_core::ErrorKind::Resource);
        assert_eq!(err.context()["partition_id"], "p1");

        // Overwrites and other tiers are still allowed.
        registry.check_write("p1", Tier::Fast, "a", 12).unwrap();
        registry.check_write("p1", Tier::Durable, "c", 10).unwrap();
    }

    #[test]
    fn test_release_frees_capacity() {
        let mut registry = registry_with(1);
        registry.commit_write("p1", Tier::Fast, "a", 4).unwrap();
        assert!(registry.check_write("p1", Tier::Fast, "b", 4).is_err());

        assert!(registry.release("p1", Tier::Fast, "a").unwrap());
        assert!(!registry.release("p1", Tier::Fast, "a").unwrap());
        let partition = registry.get("p1").unwrap();
        assert_eq!(partition.status, PartitionStatus::Active);
        assert_eq!(partition.current_usage[&Tier::Fast].items, 0);
        registry.check_write("p1", Tier::Fast, "b", 4).unwrap();
    }

    #[test]
    fn test_tracked_lists_members_per_tier() {
        let mut registry = registry_with(5);
        registry.commit_write("p1", Tier::Fast, "a", 1).unwrap();
        registry.commit_write("p1", Tier::Durable, "b", 1).unwrap();
        registry.release("p1", Tier::Durable, "b").unwrap();

        let tracked = registry.tracked();
        assert_eq!(tracked.len(), 1);
        let (partition_id, owner_id, tier, ids) = &tracked[0];
        assert_eq!((partition_id.as_str(), owner_id.as_str(), *tier), ("p1", "alice", Tier::Fast));
        assert_eq!(ids, &vec!["a".to_string()]);
    }

    #[test]
    fn test_size_limit() {
        let mut registry = PartitionRegistry::new();
        registry
            .create(
                "p1",
                "alice",
                PartitionStrategy::Composite,
                CapacityLimits {
                    max_items: Some(10),
                    max_size_bytes: Some(100),
                },
            )
            .unwrap();
        registry.commit_write("p1", Tier::Durable, "a", 80).unwrap();
        assert!(registry.check_write("p1", Tier::Durable, "b", 30).is_err());
        registry.check_write("p1", Tier::Durable, "a", 95).unwrap();
        assert!(registry.get("missing").unwrap_err().is_not_found());
    }
}
