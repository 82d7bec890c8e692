use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::AuditRecord;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub of audit records, one channel per showing, room or request.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<AuditRecord>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to changes on a showing, room or request. Creates the channel if needed.
    pub fn subscribe(&self, resource_id: Ulid) -> broadcast::Receiver<AuditRecord> {
        let sender = self
            .channels
            .entry(resource_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// No-op if nobody is listening. A channel whose receivers are all gone
    /// is dropped.
    pub fn send(&self, resource_id: Ulid, record: &AuditRecord) {
        let delivered = match self.channels.get(&resource_id) {
            Some(sender) => sender.send(record.clone()).is_ok(),
            None => return,
        };
        if !delivered {
            self.prune(&resource_id);
        }
    }

    /// Drop the channel once its last receiver is gone.
    pub fn prune(&self, resource_id: &Ulid) {
        self.channels.remove_if(resource_id, |_, sender| sender.receiver_count() == 0);
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}
