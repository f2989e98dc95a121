use tokio::sync::watch;

use crate::models::DashboardSnapshot;

/// The observable snapshot the UI layer consumes.
///
/// A `watch` channel keeps exactly the latest value: subscribers that fall
/// behind see only the newest snapshot, which is the right semantics for a
/// dashboard. The orchestrator is the sole publisher.
#[derive(Clone)]
pub struct TrackerSession {
    tx: watch::Sender<DashboardSnapshot>,
    rx: watch::Receiver<DashboardSnapshot>,
}

impl TrackerSession {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(DashboardSnapshot::default());
        Self { tx, rx }
    }

    pub fn publish(&self, snapshot: DashboardSnapshot) {
        // send only fails with no receivers; we always hold one.
        let _ = self.tx.send(snapshot);
    }

    pub fn current(&self) -> DashboardSnapshot {
        self.rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DashboardSnapshot> {
        self.tx.subscribe()
    }
}

impl Default for TrackerSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_updates_current_and_subscribers() {
        let session = TrackerSession::new();
        assert_eq!(session.current().generated_at_unix_ms, 0);

        let mut rx = session.subscribe();

        let mut snap = DashboardSnapshot::default();
        snap.generated_at_unix_ms = 99;
        session.publish(snap);

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().generated_at_unix_ms, 99);
        assert_eq!(session.current().generated_at_unix_ms, 99);
    }

    #[tokio::test]
    async fn late_subscribers_see_only_the_latest() {
        let session = TrackerSession::new();
        for i in 1..=3 {
            let mut snap = DashboardSnapshot::default();
            snap.generated_at_unix_ms = i;
            session.publish(snap);
        }
        let rx = session.subscribe();
        assert_eq!(rx.borrow().generated_at_unix_ms, 3);
    }
}
