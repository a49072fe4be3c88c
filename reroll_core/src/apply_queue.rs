use bevy::prelude::Resource;
use crossbeam_channel::{unbounded, Receiver, Sender};
use reroll_schema::{CellTypeId, RegionKey};

/// A planned region rewrite waiting to be applied on the main loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationTask {
    pub region: RegionKey,
    pub cell_type: CellTypeId,
}

impl MutationTask {
    pub fn new(region: RegionKey, cell_type: CellTypeId) -> Self {
        Self { region, cell_type }
    }
}

/// Unbounded FIFO of mutation tasks.
///
/// Any number of [`ApplyQueueProducer`]s may push from any thread. Popping
/// needs `&mut self`, so only the owner of the resource (the main loop)
/// consumes.
#[derive(Resource, Debug)]
pub struct ApplyQueue {
    sender: Sender<MutationTask>,
    receiver: Receiver<MutationTask>,
}

/// Push-only handle to an [`ApplyQueue`].
#[derive(Debug, Clone)]
pub struct ApplyQueueProducer {
    sender: Sender<MutationTask>,
}

impl ApplyQueue {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    pub fn producer(&self) -> ApplyQueueProducer {
        ApplyQueueProducer {
            sender: self.sender.clone(),
        }
    }

    pub fn push(&self, task: MutationTask) {
        // The queue holds its own receiver, so this send cannot fail.
        let _ = self.sender.send(task);
    }

    /// Pop the oldest task, if any.
    pub fn drain_one(&mut self) -> Option<MutationTask> {
        self.receiver.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl Default for ApplyQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ApplyQueueProducer {
    /// Returns `false` once the queue itself has been dropped.
    pub fn push(&self, task: MutationTask) -> bool {
        self.sender.send(task).is_ok()
    }
}
