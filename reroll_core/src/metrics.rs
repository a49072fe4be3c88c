use bevy::prelude::*;
use reroll_schema::RegionKey;

use crate::apply_queue::ApplyQueue;
use crate::coordinator::RegionTick;
use crate::dispatcher::PlanDispatcher;
use crate::membership::VisitMembership;

/// Pipeline counters, refreshed at the end of every tick.
#[derive(Resource, Default, Debug, Clone, PartialEq, Eq)]
pub struct PipelineMetrics {
    pub tick: u64,
    pub regions_triggered: u64,
    pub tasks_applied: u64,
    pub tasks_failed: u64,
    pub cells_replaced: u64,
    pub last_applied: Option<RegionKey>,
    pub apply_backlog: usize,
    pub visited_regions: usize,
    pub jobs_submitted: u64,
    pub jobs_planned: u64,
    pub jobs_skipped: u64,
    pub jobs_panicked: u64,
    pub jobs_in_flight: usize,
}

pub fn collect_metrics(
    tick: Res<RegionTick>,
    queue: Res<ApplyQueue>,
    dispatcher: Res<PlanDispatcher>,
    membership: Res<VisitMembership>,
    mut metrics: ResMut<PipelineMetrics>,
) {
    let stats = dispatcher.stats();
    metrics.tick = tick.0;
    metrics.apply_backlog = queue.len();
    metrics.visited_regions = membership.region_count();
    metrics.jobs_submitted = stats.submitted;
    metrics.jobs_planned = stats.planned;
    metrics.jobs_skipped = stats.skipped;
    metrics.jobs_panicked = stats.panicked;
    metrics.jobs_in_flight = stats.in_flight;
}
