//! Recurring file arrivals over a pool of transfer clients
//!
//! Arrivals follow a Poisson process: inter-arrival gaps are drawn from an
//! exponential distribution. Each arrival triggers one file on the next
//! client of the pool, alternating between the first half (operator A) and
//! the second half (operator B) so both operators see the same load.

use crate::errors::{CoexistError, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Exp};
use spectrum_sim::Scheduler;
use std::time::Duration;
use tracing::debug;

/// Pool index following `current`.
///
/// The last index wraps to 0, the first half jumps forward by `N/2`, and the
/// second half jumps back to the successor of its counterpart, giving
/// `0, N/2, 1, N/2 + 1, ...`.
pub fn next_target(current: usize, pool_size: usize) -> usize {
    let half = pool_size / 2;
    if current + 1 >= pool_size {
        0
    } else if current < half {
        current + half
    } else {
        current + 1 - half
    }
}

/// A single file arrival.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Arrival {
    pub at: Duration,
    pub target: usize,
}

#[derive(Debug)]
pub struct ArrivalProcess {
    pool_size: usize,
    target: usize,
    gaps: Exp<f64>,
    rng: StdRng,
    deadline: Duration,
    fired: u64,
}

impl ArrivalProcess {
    /// Build a process over `pool_size` clients with mean inter-arrival
    /// time `mean`; no arrival is scheduled at or after `deadline`.
    pub fn new(pool_size: usize, mean: Duration, deadline: Duration, seed: u64) -> Result<Self> {
        if pool_size == 0 || pool_size % 2 != 0 {
            return Err(CoexistError::InvalidConfig(format!(
                "arrival pool needs an even, non-zero number of clients, got {}",
                pool_size
            )));
        }
        let mean_secs = mean.as_secs_f64();
        if mean_secs <= 0.0 {
            return Err(CoexistError::InvalidConfig(
                "mean inter-arrival time must be positive".to_string(),
            ));
        }
        let gaps = Exp::new(1.0 / mean_secs)
            .map_err(|e| CoexistError::InvalidConfig(format!("exponential rate: {}", e)))?;

        Ok(Self {
            pool_size,
            target: 0,
            gaps,
            rng: StdRng::seed_from_u64(seed),
            deadline,
            fired: 0,
        })
    }

    /// Number of arrivals fired so far
    pub fn fired(&self) -> u64 {
        self.fired
    }

    fn draw_gap(&mut self) -> Duration {
        Duration::try_from_secs_f64(self.gaps.sample(&mut self.rng)).unwrap_or(Duration::MAX)
    }

    /// `from + gap` if it falls strictly before the deadline
    fn next_before_deadline(&mut self, from: Duration) -> Option<Duration> {
        let at = from.checked_add(self.draw_gap())?;
        (at < self.deadline).then_some(at)
    }

    /// Time of the first arrival: `origin` plus one exponential gap.
    pub fn first_arrival(&mut self, origin: Duration) -> Option<Duration> {
        self.next_before_deadline(origin)
    }

    /// Handle an arrival at `now`. Returns the client to trigger and, if it
    /// falls before the deadline, the time of the following arrival.
    pub fn fire(&mut self, now: Duration) -> (usize, Option<Duration>) {
        let target = self.target;
        self.target = next_target(target, self.pool_size);
        self.fired += 1;
        (target, self.next_before_deadline(now))
    }

    /// Unroll the process into the sequence of arrivals it would produce.
    pub fn into_arrivals(mut self, origin: Duration) -> Arrivals {
        let next = self.first_arrival(origin);
        Arrivals {
            process: self,
            next,
        }
    }
}

/// Iterator over the arrivals of a process.
pub struct Arrivals {
    process: ArrivalProcess,
    next: Option<Duration>,
}

impl Iterator for Arrivals {
    type Item = Arrival;

    fn next(&mut self) -> Option<Arrival> {
        let at = self.next?;
        let (target, next) = self.process.fire(at);
        self.next = next;
        Some(Arrival { at, target })
    }
}

/// Drive `process` on a scheduler. Each arrival calls `trigger` with the
/// target index and arms the next arrival from inside the event. Returns the
/// time of the first arrival, if any.
pub fn schedule_arrivals<W, F>(
    scheduler: &mut Scheduler<W>,
    mut process: ArrivalProcess,
    origin: Duration,
    trigger: F,
) -> Option<Duration>
where
    W: 'static,
    F: FnMut(&mut W, &mut Scheduler<W>, usize) + 'static,
{
    let first = process.first_arrival(origin)?;
    arm(scheduler, first, process, trigger);
    Some(first)
}

fn arm<W, F>(scheduler: &mut Scheduler<W>, at: Duration, mut process: ArrivalProcess, mut trigger: F)
where
    W: 'static,
    F: FnMut(&mut W, &mut Scheduler<W>, usize) + 'static,
{
    scheduler.schedule_at(at, move |world: &mut W, s: &mut Scheduler<W>| {
        let (target, next) = process.fire(s.now());
        debug!("File arrival {} at {:?} on client {}", process.fired(), s.now(), target);
        trigger(world, s, target);
        if let Some(next) = next {
            arm(s, next, process, trigger);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use spectrum_sim::Simulator;

    #[test]
    fn test_alternation_order() {
        let mut order = vec![0];
        for _ in 0..10 {
            let last = *order.last().unwrap();
            order.push(next_target(last, 10));
        }
        assert_eq!(order, vec![0, 5, 1, 6, 2, 7, 3, 8, 4, 9, 0]);

        assert_eq!(next_target(0, 2), 1);
        assert_eq!(next_target(1, 2), 0);
    }

    #[test]
    fn test_visits_every_client_once_per_cycle() {
        for n in [2, 4, 8, 20] {
            let mut seen = vec![0usize; n];
            let mut i = 0;
            for _ in 0..n {
                seen[i] += 1;
                i = next_target(i, n);
            }
            assert!(seen.iter().all(|c| *c == 1), "pool size {}", n);
            assert_eq!(i, 0);
        }
    }

    #[test]
    fn test_rejects_bad_pools() {
        let mean = Duration::from_secs(2);
        let deadline = Duration::from_secs(10);
        assert!(ArrivalProcess::new(0, mean, deadline, 1).is_err());
        assert!(ArrivalProcess::new(3, mean, deadline, 1).is_err());
        assert!(ArrivalProcess::new(2, Duration::ZERO, deadline, 1).is_err());
        assert!(ArrivalProcess::new(2, mean, deadline, 1).is_ok());
    }

    #[test]
    fn test_arrivals_respect_deadline() {
        let origin = Duration::from_secs(3);
        let deadline = Duration::from_secs(60);
        let process = ArrivalProcess::new(4, Duration::from_millis(500), deadline, 7).unwrap();
        let arrivals: Vec<Arrival> = process.into_arrivals(origin).collect();

        assert!(arrivals.len() > 10);
        assert!(arrivals.iter().all(|a| a.at > origin && a.at < deadline));
        assert!(arrivals.windows(2).all(|w| w[0].at <= w[1].at));
        let targets: Vec<usize> = arrivals.iter().take(5).map(|a| a.target).collect();
        assert_eq!(targets, vec![0, 2, 1, 3, 0]);

        // Mean gap of roughly 500 ms over a 57 s window
        let mean_gap = (arrivals.last().unwrap().at - arrivals[0].at).as_secs_f64()
            / (arrivals.len() - 1) as f64;
        assert!((0.3..0.8).contains(&mean_gap), "mean gap {}", mean_gap);
    }

    #[test]
    fn test_same_seed_same_sequence() {
        let make = || {
            ArrivalProcess::new(2, Duration::from_secs(1), Duration::from_secs(30), 42)
                .unwrap()
                .into_arrivals(Duration::ZERO)
                .collect::<Vec<_>>()
        };
        assert_eq!(make(), make());
    }

    #[test]
    fn test_scheduled_arrivals_fire_in_order() {
        let mut sim: Simulator<Vec<(Duration, usize)>> = Simulator::new(Vec::new());
        let deadline = Duration::from_secs(20);
        let process = ArrivalProcess::new(6, Duration::from_millis(400), deadline, 3).unwrap();
        let expected: Vec<Arrival> = ArrivalProcess::new(6, Duration::from_millis(400), deadline, 3)
            .unwrap()
            .into_arrivals(Duration::from_secs(1))
            .collect();

        let first = schedule_arrivals(
            sim.scheduler_mut(),
            process,
            Duration::from_secs(1),
            |log: &mut Vec<(Duration, usize)>, s: &mut Scheduler<Vec<(Duration, usize)>>, target| {
                log.push((s.now(), target));
            },
        );
        assert_eq!(first, expected.first().map(|a| a.at));

        sim.run();
        let fired: Vec<Arrival> = sim
            .world()
            .iter()
            .map(|(at, target)| Arrival {
                at: *at,
                target: *target,
            })
            .collect();
        assert_eq!(fired, expected);
        assert!(sim.now() < deadline);
    }

    #[test]
    fn test_first_arrival_past_deadline_schedules_nothing() {
        let mut sim: Simulator<u32> = Simulator::new(0);
        let process =
            ArrivalProcess::new(2, Duration::from_secs(100), Duration::from_millis(1), 9).unwrap();
        let first = schedule_arrivals(sim.scheduler_mut(), process, Duration::from_secs(1), |count: &mut u32, _: &mut Scheduler<u32>, _| {
            *count += 1
        });
        assert_eq!(first, None);
        sim.run();
        assert_eq!(*sim.world(), 0);
    }
}
