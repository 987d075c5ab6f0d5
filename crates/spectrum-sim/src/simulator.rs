//! Discrete-event clock
//!
//! Events are boxed closures that receive the simulated world and the
//! scheduler. They fire in non-decreasing time order; events sharing a
//! timestamp fire in submission order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;
use tracing::debug;

/// A deferred action executed by the clock.
pub type Action<W> = Box<dyn FnOnce(&mut W, &mut Scheduler<W>)>;

struct ScheduledEvent<W> {
    time: Duration,
    sequence: u64,
    action: Action<W>,
}

impl<W> PartialEq for ScheduledEvent<W> {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.sequence == other.sequence
    }
}

impl<W> Eq for ScheduledEvent<W> {}

impl<W> PartialOrd for ScheduledEvent<W> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<W> Ord for ScheduledEvent<W> {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max heap: reverse both keys so the earliest
        // time, then the lowest sequence number, is popped first
        match other.time.cmp(&self.time) {
            Ordering::Equal => other.sequence.cmp(&self.sequence),
            ord => ord,
        }
    }
}

/// Event queue and current simulation time.
pub struct Scheduler<W> {
    now: Duration,
    heap: BinaryHeap<ScheduledEvent<W>>,
    next_sequence: u64,
    stopped: bool,
}

impl<W> Scheduler<W> {
    fn new() -> Self {
        Self {
            now: Duration::ZERO,
            heap: BinaryHeap::new(),
            next_sequence: 0,
            stopped: false,
        }
    }

    /// Current simulation time.
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Schedule `action` to run `delay` after the current time.
    pub fn schedule<F>(&mut self, delay: Duration, action: F)
    where
        F: FnOnce(&mut W, &mut Scheduler<W>) + 'static,
    {
        self.schedule_at(self.now + delay, action);
    }

    /// Schedule `action` at an absolute time. Times in the past are
    /// clamped to the current time.
    pub fn schedule_at<F>(&mut self, time: Duration, action: F)
    where
        F: FnOnce(&mut W, &mut Scheduler<W>) + 'static,
    {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(ScheduledEvent {
            time: time.max(self.now),
            sequence,
            action: Box::new(action),
        });
    }

    /// Stop the run after the currently executing event.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    /// Stop the run at an absolute time. Events already queued for the same
    /// instant still fire before the stop takes effect.
    pub fn stop_at(&mut self, time: Duration) {
        self.schedule_at(time, |_, scheduler: &mut Scheduler<W>| scheduler.stop());
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Number of events waiting in the queue.
    pub fn pending(&self) -> usize {
        self.heap.len()
    }
}

/// Summary of a completed run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunStats {
    pub events_executed: u64,
    pub end_time: Duration,
}

/// A world paired with the clock that drives it.
pub struct Simulator<W> {
    world: W,
    scheduler: Scheduler<W>,
}

impl<W> Simulator<W> {
    pub fn new(world: W) -> Self {
        Self {
            world,
            scheduler: Scheduler::new(),
        }
    }

    pub fn now(&self) -> Duration {
        self.scheduler.now()
    }

    pub fn world(&self) -> &W {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut W {
        &mut self.world
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler<W> {
        &mut self.scheduler
    }

    /// Borrow the world and the scheduler at the same time, as event
    /// handlers do.
    pub fn parts_mut(&mut self) -> (&mut W, &mut Scheduler<W>) {
        (&mut self.world, &mut self.scheduler)
    }

    pub fn schedule<F>(&mut self, delay: Duration, action: F)
    where
        F: FnOnce(&mut W, &mut Scheduler<W>) + 'static,
    {
        self.scheduler.schedule(delay, action);
    }

    pub fn schedule_at<F>(&mut self, time: Duration, action: F)
    where
        F: FnOnce(&mut W, &mut Scheduler<W>) + 'static,
    {
        self.scheduler.schedule_at(time, action);
    }

    pub fn stop_at(&mut self, time: Duration) {
        self.scheduler.stop_at(time);
    }

    /// Execute events until the queue drains or a stop is requested.
    pub fn run(&mut self) -> RunStats {
        let mut events_executed = 0u64;
        while !self.scheduler.stopped {
            let Some(event) = self.scheduler.heap.pop() else {
                break;
            };
            self.scheduler.now = event.time;
            (event.action)(&mut self.world, &mut self.scheduler);
            events_executed += 1;
        }

        debug!(
            "Simulation finished at {:?} after {} events ({} still queued)",
            self.scheduler.now,
            events_executed,
            self.scheduler.heap.len()
        );

        RunStats {
            events_executed,
            end_time: self.scheduler.now,
        }
    }

    pub fn into_world(self) -> W {
        self.world
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_fire_in_time_order() {
        let mut sim = Simulator::new(Vec::<u32>::new());
        sim.schedule(Duration::from_millis(30), |log: &mut Vec<u32>, _| log.push(3));
        sim.schedule(Duration::from_millis(10), |log: &mut Vec<u32>, _| log.push(1));
        sim.schedule(Duration::from_millis(20), |log: &mut Vec<u32>, _| log.push(2));

        let stats = sim.run();
        assert_eq!(sim.world(), &vec![1, 2, 3]);
        assert_eq!(stats.events_executed, 3);
        assert_eq!(stats.end_time, Duration::from_millis(30));
    }

    #[test]
    fn test_ties_fire_in_submission_order() {
        let mut sim = Simulator::new(Vec::<u32>::new());
        for i in 0..10 {
            sim.schedule(Duration::from_secs(1), move |log: &mut Vec<u32>, _| log.push(i));
        }
        sim.run();
        assert_eq!(sim.world(), &(0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_events_can_schedule_events() {
        let mut sim = Simulator::new(Vec::<Duration>::new());
        sim.schedule(Duration::from_millis(5), |log: &mut Vec<Duration>, s| {
            log.push(s.now());
            s.schedule(Duration::from_millis(5), |log: &mut Vec<Duration>, s| {
                log.push(s.now())
            });
        });
        sim.run();
        assert_eq!(
            sim.world(),
            &vec![Duration::from_millis(5), Duration::from_millis(10)]
        );
    }

    #[test]
    fn test_stop_at_discards_later_events() {
        let mut sim = Simulator::new(Vec::<u32>::new());
        sim.schedule(Duration::from_secs(1), |log: &mut Vec<u32>, _| log.push(1));
        sim.schedule(Duration::from_secs(3), |log: &mut Vec<u32>, _| log.push(3));
        sim.stop_at(Duration::from_secs(2));

        let stats = sim.run();
        assert_eq!(sim.world(), &vec![1]);
        assert_eq!(stats.end_time, Duration::from_secs(2));
        assert_eq!(sim.scheduler_mut().pending(), 1);
    }

    #[test]
    fn test_past_times_are_clamped() {
        let mut sim = Simulator::new(Vec::<Duration>::new());
        sim.schedule(Duration::from_secs(2), |_: &mut Vec<Duration>, s| {
            s.schedule_at(Duration::from_secs(1), |log: &mut Vec<Duration>, s| {
                log.push(s.now())
            });
        });
        sim.run();
        assert_eq!(sim.world(), &vec![Duration::from_secs(2)]);
    }
}
