// Process-wide log broker (spec.md S4.5/S5): a per-run ring buffer for
// replay plus a fan-out of bounded subscriber queues. Mirrors the teacher's
// actor-free `Arc<RwLock<HashMap<...>>>` sharing style (AppState) rather than
// reaching for a dedicated actor/broadcast crate.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use rocketship_schemas::{LogLine, RunId};
use tokio::sync::{mpsc, RwLock};

struct RunChannel {
    ring: VecDeque<LogLine>,
    subscribers: Vec<mpsc::Sender<LogLine>>,
}

impl RunChannel {
    fn new() -> Self {
        Self {
            ring: VecDeque::new(),
            subscribers: Vec::new(),
        }
    }
}

pub struct LogBroker {
    ring_size: usize,
    queue_bound: usize,
    runs: RwLock<HashMap<RunId, RunChannel>>,
}

impl LogBroker {
    pub fn new(ring_size: usize, queue_bound: usize) -> Self {
        Self {
            ring_size,
            queue_bound,
            runs: RwLock::new(HashMap::new()),
        }
    }

    /// Appends a line to the run's ring and fans it out to every live
    /// subscriber. A subscriber whose bounded queue is full is dropped; its
    /// stream observes the channel close and reports a terminal error.
    pub async fn publish(&self, line: LogLine) {
        let mut runs = self.runs.write().await;
        let channel = runs.entry(line.run_id).or_insert_with(RunChannel::new);

        channel.ring.push_back(line.clone());
        while channel.ring.len() > self.ring_size {
            channel.ring.pop_front();
        }

        channel.subscribers.retain(|tx| match tx.try_send(line.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(run_id = %line.run_id, "subscriber backlog exceeded bound, dropping");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    /// Replays the current ring then registers a new subscriber for future
    /// lines. Callers should drain the replay vec before polling the
    /// receiver, so ordering within `(run_id, workflow_id)` is preserved.
    pub async fn subscribe(&self, run_id: RunId) -> (Vec<LogLine>, mpsc::Receiver<LogLine>) {
        let mut runs = self.runs.write().await;
        let channel = runs.entry(run_id).or_insert_with(RunChannel::new);

        let (tx, rx) = mpsc::channel(self.queue_bound);
        channel.subscribers.push(tx);
        (channel.ring.iter().cloned().collect(), rx)
    }

    /// Drops all subscriber queues for a run once it reaches a terminal
    /// status; the ring itself is kept so a late `StreamLogs` can still
    /// replay history before immediately closing.
    pub async fn close_run(&self, run_id: RunId) {
        if let Some(channel) = self.runs.write().await.get_mut(&run_id) {
            channel.subscribers.clear();
        }
    }
}

pub type SharedBroker = Arc<LogBroker>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_replays_ring_then_receives_new_lines() {
        let broker = LogBroker::new(10, 8);
        let run_id = uuid::Uuid::now_v7();

        broker.publish(LogLine::new(run_id, "t1", "first")).await;
        let (replay, mut rx) = broker.subscribe(run_id).await;
        assert_eq!(replay.len(), 1);

        broker.publish(LogLine::new(run_id, "t1", "second")).await;
        let received = rx.recv().await.unwrap();
        assert_eq!(received.msg, "second");
    }

    #[tokio::test]
    async fn ring_is_bounded() {
        let broker = LogBroker::new(3, 8);
        let run_id = uuid::Uuid::now_v7();
        for i in 0..10 {
            broker.publish(LogLine::new(run_id, "t1", format!("line {i}"))).await;
        }
        let (replay, _rx) = broker.subscribe(run_id).await;
        assert_eq!(replay.len(), 3);
        assert_eq!(replay[0].msg, "line 7");
    }

    #[tokio::test]
    async fn full_subscriber_queue_is_dropped_not_blocked() {
        let broker = LogBroker::new(10, 1);
        let run_id = uuid::Uuid::now_v7();
        let (_replay, rx) = broker.subscribe(run_id).await;

        broker.publish(LogLine::new(run_id, "t1", "a")).await;
        broker.publish(LogLine::new(run_id, "t1", "b")).await;

        drop(rx);
        // second publish should have already evicted the subscriber, but the
        // important property is that publish() never blocks on a full queue.
        broker.publish(LogLine::new(run_id, "t1", "c")).await;
    }
}
