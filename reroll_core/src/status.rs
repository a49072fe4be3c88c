//! Fire-and-forget informational notices about region processing.

use crossbeam_channel::{unbounded, Receiver, Sender};
use reroll_schema::{CellTypeId, RegionKey};

/// Destination for human-readable status notices. Delivery is best effort.
pub trait StatusSink: Send + Sync {
    fn emit(&self, message: String);
}

/// Writes every notice to the `reroll::status` tracing target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingStatusSink;

impl StatusSink for TracingStatusSink {
    fn emit(&self, message: String) {
        tracing::info!(target: "reroll::status", "{}", message);
    }
}

/// Queues notices on a channel for a consumer elsewhere.
#[derive(Debug, Clone)]
pub struct ChannelStatusSink {
    sender: Sender<String>,
}

impl ChannelStatusSink {
    pub fn new() -> (Self, Receiver<String>) {
        let (sender, receiver) = unbounded();
        (Self { sender }, receiver)
    }
}

impl StatusSink for ChannelStatusSink {
    fn emit(&self, message: String) {
        let _ = self.sender.send(message);
    }
}

pub fn processing_notice(region: RegionKey, cell: &CellTypeId) -> String {
    format!("processing region {region} with {cell}")
}

pub fn completion_notice(region: RegionKey, replaced: u64, cell: &CellTypeId) -> String {
    format!("region {region} done, {replaced} cells replaced, type={cell}")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn notice_formats_are_stable() {
        let cell = CellTypeId::new("base", "mossy_cobblestone");
        insta::assert_snapshot!(
            processing_notice(RegionKey::new(-3, 12), &cell),
            @"processing region [-3, 12] with base:mossy_cobblestone"
        );
        insta::assert_snapshot!(
            completion_notice(RegionKey::new(0, 0), 24576, &cell),
            @"region [0, 0] done, 24576 cells replaced, type=base:mossy_cobblestone"
        );
    }

    #[test]
    fn channel_sink_delivers_in_order() {
        let (sink, receiver) = ChannelStatusSink::new();
        let shared: Arc<dyn StatusSink> = Arc::new(sink);
        shared.emit("first".to_string());
        Arc::clone(&shared).emit("second".to_string());
        assert_eq!(receiver.try_recv().unwrap(), "first");
        assert_eq!(receiver.try_recv().unwrap(), "second");
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn channel_sink_tolerates_dropped_receiver() {
        let (sink, receiver) = ChannelStatusSink::new();
        drop(receiver);
        sink.emit("nobody listening".to_string());
    }
}
