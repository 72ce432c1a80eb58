use std::collections::{BTreeSet, VecDeque};
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// One admitted iteration start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    /// 0-based position in tick order.
    pub seq: u64,
    pub scheduled_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// An idle worker will pick the tick up.
    Queued,
    /// Queued, and the caller must spawn one more worker for it.
    Grow,
    /// All workers busy; the tick waits in the backlog.
    Backlogged,
    /// All workers busy and the backlog is full.
    Dropped,
}

#[derive(Debug)]
struct PoolState {
    queue: VecDeque<Tick>,
    workers: u64,
    /// Seqs of ticks claimed by a worker and not yet finished.
    running: BTreeSet<u64>,
    closed: bool,
}

/// FIFO hand-off between the ticker and the worker pool.
///
/// The ticker calls [`ArrivalPacer::admit`] once per tick in tick order; workers call
/// [`ArrivalPacer::claim_next`] in a loop. The pool only grows, up to `max_workers`.
#[derive(Debug)]
pub(crate) struct ArrivalPacer {
    state: Mutex<PoolState>,
    max_workers: u64,
    max_queue_depth: u64,
    notify: Notify,
}

impl ArrivalPacer {
    pub(crate) fn new(pre_allocated_workers: u64, max_workers: u64, max_queue_depth: u64) -> Self {
        Self {
            state: Mutex::new(PoolState {
                queue: VecDeque::new(),
                workers: pre_allocated_workers,
                running: BTreeSet::new(),
                closed: false,
            }),
            max_workers,
            max_queue_depth,
            notify: Notify::new(),
        }
    }

    pub(crate) fn admit(&self, tick: Tick) -> Admission {
        let mut s = self.state.lock();
        if s.closed {
            return Admission::Dropped;
        }

        let idle = s.workers.saturating_sub(s.running.len() as u64);
        let queued = s.queue.len() as u64;

        let admission = if queued < idle {
            Admission::Queued
        } else if s.workers < self.max_workers {
            s.workers = s.workers.saturating_add(1);
            Admission::Grow
        } else if queued.saturating_sub(idle) < self.max_queue_depth {
            Admission::Backlogged
        } else {
            return Admission::Dropped;
        };

        s.queue.push_back(tick);
        drop(s);
        self.notify.notify_one();
        admission
    }

    /// Next tick for a worker, or `None` once the pacer is closed.
    ///
    /// A returned tick stays running until [`ArrivalPacer::finish`] is called with its seq.
    pub(crate) async fn claim_next(&self) -> Option<Tick> {
        loop {
            // Registered before checking so a concurrent `admit` cannot be missed.
            let notified = self.notify.notified();
            {
                let mut s = self.state.lock();
                if let Some(tick) = s.queue.pop_front() {
                    s.running.insert(tick.seq);
                    return Some(tick);
                }
                if s.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    pub(crate) fn finish(&self, seq: u64) {
        self.state.lock().running.remove(&seq);
    }

    /// Stops admission and wakes idle workers so they exit. Returns the ticks that
    /// were still queued.
    pub(crate) fn close(&self) -> Vec<Tick> {
        let drained: Vec<Tick> = {
            let mut s = self.state.lock();
            s.closed = true;
            s.queue.drain(..).collect()
        };
        self.notify.notify_waiters();
        drained
    }

    pub(crate) fn workers(&self) -> u64 {
        self.state.lock().workers
    }

    /// Seqs still running, in tick order.
    pub(crate) fn running(&self) -> Vec<u64> {
        self.state.lock().running.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(seq: u64) -> Tick {
        Tick {
            seq,
            scheduled_at: Instant::now(),
        }
    }

    #[test]
    fn admission_prefers_idle_then_growth_then_backlog() {
        let p = ArrivalPacer::new(1, 2, 1);
        assert_eq!(p.admit(tick(0)), Admission::Queued);
        assert_eq!(p.admit(tick(1)), Admission::Grow);
        assert_eq!(p.workers(), 2);
        assert_eq!(p.admit(tick(2)), Admission::Backlogged);
        assert_eq!(p.admit(tick(3)), Admission::Dropped);
    }

    #[tokio::test]
    async fn claims_follow_tick_order() {
        let p = ArrivalPacer::new(3, 3, 3);
        for seq in 0..3 {
            p.admit(tick(seq));
        }
        for seq in 0..3 {
            assert_eq!(p.claim_next().await.map(|t| t.seq), Some(seq));
        }
        assert_eq!(p.running(), vec![0, 1, 2]);
        p.finish(1);
        assert_eq!(p.running(), vec![0, 2]);
    }

    #[tokio::test]
    async fn busy_workers_move_ticks_into_backlog() {
        let p = ArrivalPacer::new(1, 1, 2);
        p.admit(tick(0));
        assert!(p.claim_next().await.is_some());
        assert_eq!(p.admit(tick(1)), Admission::Backlogged);
        assert_eq!(p.admit(tick(2)), Admission::Backlogged);
        assert_eq!(p.admit(tick(3)), Admission::Dropped);

        // A freed worker absorbs one backlogged tick.
        p.finish(0);
        assert_eq!(p.admit(tick(4)), Admission::Backlogged);
        assert_eq!(p.admit(tick(5)), Admission::Dropped);
    }

    #[tokio::test]
    async fn close_returns_queued_ticks_and_releases_workers() {
        let p = std::sync::Arc::new(ArrivalPacer::new(1, 1, 4));
        let waiter = {
            let p = p.clone();
            tokio::spawn(async move { p.claim_next().await })
        };
        tokio::task::yield_now().await;

        let drained = p.close();
        assert!(drained.is_empty());
        assert_eq!(p.admit(tick(9)), Admission::Dropped);

        let claimed = waiter.await.unwrap_or_else(|e| panic!("join: {e}"));
        assert!(claimed.is_none());
    }
}
