//! Which agents have already triggered work for which regions.

use std::collections::HashSet;
use std::sync::Arc;

use bevy::prelude::Resource;
use dashmap::DashMap;
use reroll_schema::{AgentId, RegionKey};

/// Concurrent region → agent membership map.
///
/// Cloning yields another handle to the same map, so the session layer can
/// clear agents from its own thread while the main loop keeps marking
/// visits. Every operation locks a single shard at a time; a region's set
/// is only ever observed whole.
#[derive(Resource, Debug, Clone, Default)]
pub struct VisitMembership {
    regions: Arc<DashMap<RegionKey, HashSet<AgentId>>>,
}

impl VisitMembership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `agent` under `region`. Returns `true` only for the call that
    /// inserted it; later calls return `false` until the agent is cleared.
    pub fn try_mark_visited(&self, region: RegionKey, agent: AgentId) -> bool {
        self.regions.entry(region).or_default().insert(agent)
    }

    /// Remove `agent` from every region set.
    pub fn clear_agent(&self, agent: AgentId) -> usize {
        let mut removed = 0;
        for mut entry in self.regions.iter_mut() {
            if entry.value_mut().remove(&agent) {
                removed += 1;
            }
        }
        removed
    }

    pub fn has_visited(&self, region: RegionKey, agent: AgentId) -> bool {
        self.regions
            .get(&region)
            .map_or(false, |agents| agents.contains(&agent))
    }

    /// Number of regions with an entry, including ones emptied by clears.
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    pub fn visitors(&self, region: RegionKey) -> usize {
        self.regions.get(&region).map_or(0, |agents| agents.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn marks_once_per_region_and_agent() {
        let membership = VisitMembership::new();
        let region = RegionKey::new(0, 0);
        let agent = AgentId(7);

        assert!(membership.try_mark_visited(region, agent));
        assert!(!membership.try_mark_visited(region, agent));
        assert!(membership.try_mark_visited(RegionKey::new(1, 0), agent));
        assert!(membership.try_mark_visited(region, AgentId(8)));
        assert_eq!(membership.visitors(region), 2);
    }

    #[test]
    fn clear_agent_allows_marking_again() {
        let membership = VisitMembership::new();
        let agent = AgentId(1);
        let other = AgentId(2);
        for x in 0..4 {
            membership.try_mark_visited(RegionKey::new(x, 0), agent);
        }
        membership.try_mark_visited(RegionKey::new(0, 0), other);

        assert_eq!(membership.clear_agent(agent), 4);
        assert!(!membership.has_visited(RegionKey::new(2, 0), agent));
        assert!(membership.has_visited(RegionKey::new(0, 0), other));
        assert!(membership.try_mark_visited(RegionKey::new(2, 0), agent));
        assert_eq!(membership.clear_agent(AgentId(99)), 0);
    }

    #[test]
    fn concurrent_distinct_agents_each_trigger_once() {
        let membership = VisitMembership::new();
        let region = RegionKey::new(3, -4);
        let triggered = AtomicUsize::new(0);

        thread::scope(|scope| {
            for agent in 0..50u64 {
                let membership = membership.clone();
                let triggered = &triggered;
                scope.spawn(move || {
                    for _ in 0..20 {
                        if membership.try_mark_visited(region, AgentId(agent)) {
                            triggered.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(triggered.load(Ordering::SeqCst), 50);
        assert_eq!(membership.visitors(region), 50);
    }

    #[test]
    fn concurrent_same_agent_triggers_once() {
        let membership = VisitMembership::new();
        let region = RegionKey::new(0, 0);
        let triggered = AtomicUsize::new(0);

        thread::scope(|scope| {
            for _ in 0..16 {
                scope.spawn(|| {
                    if membership.try_mark_visited(region, AgentId(5)) {
                        triggered.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(triggered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clear_while_other_agents_mark_keeps_their_membership() {
        let membership = VisitMembership::new();
        let leaving = AgentId(1000);
        for x in 0..64 {
            membership.try_mark_visited(RegionKey::new(x, 0), leaving);
        }

        thread::scope(|scope| {
            let clearer = membership.clone();
            scope.spawn(move || {
                clearer.clear_agent(leaving);
            });
            for agent in 0..8u64 {
                let membership = membership.clone();
                scope.spawn(move || {
                    for x in 0..64 {
                        assert!(membership.try_mark_visited(RegionKey::new(x, 0), AgentId(agent)));
                    }
                });
            }
        });

        for x in 0..64 {
            let region = RegionKey::new(x, 0);
            assert!(!membership.has_visited(region, leaving));
            assert_eq!(membership.visitors(region), 8);
        }
    }
}
