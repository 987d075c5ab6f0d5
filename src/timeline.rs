//! Application phase timings

use crate::config::TimingConfig;
use crate::errors::{CoexistError, Result};
use serde::Serialize;
use std::time::Duration;

/// Absolute times of the scenario phases.
///
/// Always satisfies
/// `server_start <= client_start < client_stop <= server_stop < simulation_stop`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PhaseTimeline {
    pub server_start: Duration,
    pub client_start: Duration,
    pub server_stop: Duration,
    pub client_stop: Duration,
    pub simulation_stop: Duration,
    pub duration: Duration,
}

fn offset(name: &str, secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(CoexistError::InvalidTimeline(format!(
            "{} must be a non-negative number of seconds, got {}",
            name, secs
        )));
    }
    Duration::try_from_secs_f64(secs).map_err(|_| {
        CoexistError::InvalidTimeline(format!("{} is out of range: {} s", name, secs))
    })
}

fn after(start: Duration, delay: Duration, what: &str) -> Result<Duration> {
    start
        .checked_add(delay)
        .ok_or_else(|| CoexistError::InvalidTimeline(format!("{} overflows the simulation clock", what)))
}

impl PhaseTimeline {
    pub fn new(duration: Duration, timing: &TimingConfig) -> Result<Self> {
        if duration.is_zero() {
            return Err(CoexistError::InvalidTimeline(
                "duration must be positive".to_string(),
            ));
        }
        let server_start = offset("server_start_secs", timing.server_start_secs)?;
        let client_start = offset("client_start_secs", timing.client_start_secs)?;
        let server_linger = offset("server_linger_secs", timing.server_linger_secs)?;
        let simulation_linger = offset("simulation_linger_secs", timing.simulation_linger_secs)?;

        let server_stop = after(
            after(server_start, duration, "server stop")?,
            server_linger,
            "server stop",
        )?;
        let client_stop = after(client_start, duration, "client stop")?;
        let simulation_stop = after(server_stop, simulation_linger, "simulation stop")?;

        let timeline = Self {
            server_start,
            client_start,
            server_stop,
            client_stop,
            simulation_stop,
            duration,
        };
        timeline.check()?;
        Ok(timeline)
    }

    fn check(&self) -> Result<()> {
        if self.server_start > self.client_start {
            return Err(CoexistError::InvalidTimeline(format!(
                "servers start at {:?}, after clients at {:?}",
                self.server_start, self.client_start
            )));
        }
        if self.client_stop > self.server_stop {
            return Err(CoexistError::InvalidTimeline(format!(
                "clients stop at {:?}, after servers at {:?}",
                self.client_stop, self.server_stop
            )));
        }
        if self.server_stop >= self.simulation_stop {
            return Err(CoexistError::InvalidTimeline(
                "simulation linger must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeline() {
        let t = PhaseTimeline::new(Duration::from_secs(1), &TimingConfig::default()).unwrap();
        assert_eq!(t.server_start, Duration::from_secs(3));
        assert_eq!(t.client_start, Duration::from_secs(3));
        assert_eq!(t.client_stop, Duration::from_secs(4));
        assert_eq!(t.server_stop, Duration::from_secs(9));
        assert_eq!(t.simulation_stop, Duration::from_secs(14));
    }

    #[test]
    fn test_ordering_holds_for_valid_offsets() {
        let timing = TimingConfig {
            server_start_secs: 0.5,
            client_start_secs: 1.0,
            server_linger_secs: 0.5,
            simulation_linger_secs: 0.1,
        };
        for millis in [1, 250, 10_000] {
            let t = PhaseTimeline::new(Duration::from_millis(millis), &timing).unwrap();
            assert!(t.server_start <= t.client_start);
            assert!(t.client_start < t.client_stop);
            assert!(t.client_stop <= t.server_stop);
            assert!(t.server_stop < t.simulation_stop);
        }
    }

    #[test]
    fn test_rejects_invalid_offsets() {
        let d = Duration::from_secs(1);
        assert!(PhaseTimeline::new(Duration::ZERO, &TimingConfig::default()).is_err());

        let negative = TimingConfig {
            server_linger_secs: -1.0,
            ..Default::default()
        };
        assert!(matches!(
            PhaseTimeline::new(d, &negative),
            Err(CoexistError::InvalidTimeline(_))
        ));

        let late_servers = TimingConfig {
            server_start_secs: 4.0,
            ..Default::default()
        };
        assert!(PhaseTimeline::new(d, &late_servers).is_err());

        let no_linger = TimingConfig {
            simulation_linger_secs: 0.0,
            ..Default::default()
        };
        assert!(PhaseTimeline::new(d, &no_linger).is_err());

        let nan = TimingConfig {
            client_start_secs: f64::NAN,
            ..Default::default()
        };
        assert!(PhaseTimeline::new(d, &nan).is_err());

        let too_big = TimingConfig {
            client_start_secs: 1e20,
            ..Default::default()
        };
        assert!(matches!(
            PhaseTimeline::new(d, &too_big),
            Err(CoexistError::InvalidTimeline(_))
        ));
    }

    #[test]
    fn test_overflowing_sums_are_rejected() {
        let huge = TimingConfig {
            server_start_secs: 1e19,
            client_start_secs: 1e19,
            server_linger_secs: 1e19,
            simulation_linger_secs: 1e19,
        };
        assert!(matches!(
            PhaseTimeline::new(Duration::from_secs(1), &huge),
            Err(CoexistError::InvalidTimeline(_))
        ));
        assert!(matches!(
            PhaseTimeline::new(Duration::MAX, &TimingConfig::default()),
            Err(CoexistError::InvalidTimeline(_))
        ));
    }
}
