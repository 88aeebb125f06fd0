//! The incident queue (C3).
//!
//! Two [`BoundedList`]s back this: `priority` for incidents that were
//! requeued after an orphaning drone (a drone that disconnected or was
//! evicted mid-mission), `normal` for freshly discovered survivors.
//! Dispatch always drains `priority` ahead of `normal`.

use std::collections::HashSet;
use std::sync::Arc;

use rescue_core::{BoundedList, BoundedListError, Incident, IncidentStatus};
use tokio::sync::Mutex;

pub struct IncidentQueue {
    normal: BoundedList<Incident>,
    priority: BoundedList<Incident>,
    /// Coordinates of incidents already marked helped, kept so a duplicate
    /// MISSION_COMPLETE for the same target doesn't double count. Entries
    /// are remembered for the lifetime of the run and never evicted.
    helped: Mutex<HashSet<(i32, i32)>>,
}

impl IncidentQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            normal: BoundedList::new(capacity),
            priority: BoundedList::new(capacity),
            helped: Mutex::new(HashSet::new()),
        }
    }

    pub async fn push_normal(&self, incident: Incident) -> Result<(), BoundedListError> {
        self.normal.add(incident).await.map(|_| ())
    }

    /// Put a previously-assigned incident back at the front of the line.
    /// Used when the drone holding it disconnects or is evicted before
    /// completing the mission.
    pub async fn requeue_orphaned(&self, mut incident: Incident) -> Result<(), BoundedListError> {
        incident.status = IncidentStatus::Waiting;
        self.priority.add(incident).await.map(|_| ())
    }

    /// Block until an incident is available, draining `priority` ahead of
    /// `normal`. Cancel-safe: dropping the returned future before it
    /// resolves leaves both queues untouched, since the only mutation
    /// happens atomically inside the winning branch.
    pub async fn pop_for_dispatch(&self) -> Incident {
        tokio::select! {
            biased;
            item = self.priority.pop_tail() => item.expect("incident queue never closes while the server runs"),
            item = self.normal.pop_tail() => item.expect("incident queue never closes while the server runs"),
        }
    }

    /// A non-blocking view of both queues, oldest first, for status /
    /// observer endpoints. Does not consume anything.
    pub async fn peek_for_observer(&self) -> Vec<Incident> {
        let mut all = self.priority.snapshot().await;
        all.extend(self.normal.snapshot().await);
        all
    }

    pub async fn mark_helped(&self, incident: &Incident) -> bool {
        let key = (incident.coord.x, incident.coord.y);
        self.helped.lock().await.insert(key)
    }

    pub async fn is_helped(&self, incident: &Incident) -> bool {
        let key = (incident.coord.x, incident.coord.y);
        self.helped.lock().await.contains(&key)
    }

    pub async fn len(&self) -> usize {
        self.priority.len().await + self.normal.len().await
    }
}

pub type SharedIncidentQueue = Arc<IncidentQueue>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rescue_core::Coord;

    fn incident(x: i32, y: i32) -> Incident {
        Incident::new(Coord::new(x, y), "survivor", Utc::now())
    }

    #[tokio::test]
    async fn priority_drains_before_normal() {
        let queue = IncidentQueue::new(8);
        queue.push_normal(incident(1, 1)).await.unwrap();
        queue.requeue_orphaned(incident(2, 2)).await.unwrap();

        let first = queue.pop_for_dispatch().await;
        assert_eq!(first.coord, Coord::new(2, 2));
        let second = queue.pop_for_dispatch().await;
        assert_eq!(second.coord, Coord::new(1, 1));
    }

    #[tokio::test]
    async fn helped_set_is_idempotent() {
        let queue = IncidentQueue::new(8);
        let inc = incident(3, 3);
        assert!(queue.mark_helped(&inc).await);
        assert!(!queue.mark_helped(&inc).await);
        assert!(queue.is_helped(&inc).await);
    }

    #[tokio::test]
    async fn peek_does_not_consume() {
        let queue = IncidentQueue::new(8);
        queue.push_normal(incident(4, 4)).await.unwrap();
        assert_eq!(queue.peek_for_observer().await.len(), 1);
        assert_eq!(queue.len().await, 1);
    }
}
