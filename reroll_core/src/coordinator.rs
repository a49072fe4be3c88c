//! Per-tick orchestration systems.
//!
//! Runs on the main loop only. Detection and draining never block: marking a
//! visit is a sharded map insert, submitting a job is a channel send and
//! draining pops at most one task.

use bevy::prelude::*;
use reroll_schema::{AgentId, ParticipationState, RegionKey};
use tracing::{debug, info};

use crate::apply_queue::ApplyQueue;
use crate::config::PipelineConfigHandle;
use crate::dispatcher::PlanDispatcher;
use crate::membership::VisitMembership;
use crate::metrics::PipelineMetrics;
use crate::mutator::RegionMutator;
use crate::world::WorldStore;

/// An agent whose horizontal position drives visit detection.
#[derive(Component, Debug, Clone)]
pub struct TrackedAgent {
    pub id: AgentId,
    pub x: f64,
    pub z: f64,
    pub participation: ParticipationState,
}

impl TrackedAgent {
    pub fn new(id: AgentId, x: f64, z: f64) -> Self {
        Self {
            id,
            x,
            z,
            participation: ParticipationState::Participating,
        }
    }

    pub fn with_participation(mut self, participation: ParticipationState) -> Self {
        self.participation = participation;
        self
    }

    pub fn move_to(&mut self, x: f64, z: f64) {
        self.x = x;
        self.z = z;
    }
}

/// Raised by the session layer when an agent leaves. Despawning the agent's
/// entity stays with the sender.
#[derive(Event, Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentDisconnected(pub AgentId);

/// Ticks elapsed since startup.
#[derive(Resource, Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionTick(pub u64);

pub fn clear_disconnected_agents(
    mut events: EventReader<AgentDisconnected>,
    membership: Res<VisitMembership>,
) {
    for AgentDisconnected(agent) in events.read() {
        let cleared = membership.clear_agent(*agent);
        info!(
            target: "reroll::coordinator",
            agent = %agent,
            cleared,
            "agent.disconnected"
        );
    }
}

pub fn detect_region_visits(
    config: Res<PipelineConfigHandle>,
    membership: Res<VisitMembership>,
    dispatcher: Res<PlanDispatcher>,
    mut metrics: ResMut<PipelineMetrics>,
    agents: Query<&TrackedAgent>,
) {
    let region_size = config.config().region_size();
    for agent in agents.iter() {
        if !agent.participation.participates() {
            continue;
        }
        let region = RegionKey::containing(agent.x, agent.z, region_size);
        if membership.try_mark_visited(region, agent.id) {
            debug!(
                target: "reroll::coordinator",
                agent = %agent.id,
                %region,
                "visit.first_entry"
            );
            dispatcher.submit(region);
            metrics.regions_triggered += 1;
        }
    }
}

/// Drain and apply at most one task.
pub fn apply_pending_mutation(
    mut queue: ResMut<ApplyQueue>,
    mut world: ResMut<WorldStore>,
    mutator: Res<RegionMutator>,
    mut metrics: ResMut<PipelineMetrics>,
) {
    let Some(task) = queue.drain_one() else {
        return;
    };
    match mutator.apply(task, world.store_mut()) {
        Ok(report) => {
            metrics.tasks_applied += 1;
            metrics.cells_replaced += report.replaced;
            metrics.last_applied = Some(report.region);
        }
        Err(_) => {
            metrics.tasks_failed += 1;
        }
    }
}

pub fn advance_tick(mut tick: ResMut<RegionTick>) {
    tick.0 = tick.0.wrapping_add(1);
}
