//! Shared spectrum channel
//!
//! Every transmission on the band is registered here so receivers can
//! compute interference and Wi-Fi devices can sense the medium.

use crate::propagation::{dbm_to_mw, PropagationModel};
use crate::radio::{RadioTechnology, ENERGY_DETECTION_THRESHOLD_DBM, WIFI_CCA_THRESHOLD_DBM};
use crate::topology::{NodeId, Position};
use std::time::Duration;

/// Transmissions are kept this long after they end so late interference
/// queries still see them.
const RETENTION: Duration = Duration::from_millis(50);

#[derive(Clone, Debug)]
pub struct Transmission {
    pub id: u64,
    pub node: NodeId,
    pub position: Position,
    pub technology: RadioTechnology,
    pub eirp_dbm: f64,
    pub start: Duration,
    pub end: Duration,
}

#[derive(Debug)]
pub struct SpectrumChannel {
    model: PropagationModel,
    transmissions: Vec<Transmission>,
    next_id: u64,
}

impl SpectrumChannel {
    pub fn new(model: PropagationModel) -> Self {
        Self {
            model,
            transmissions: Vec::new(),
            next_id: 0,
        }
    }

    pub fn model(&self) -> &PropagationModel {
        &self.model
    }

    pub fn start_transmission(
        &mut self,
        node: NodeId,
        position: Position,
        technology: RadioTechnology,
        eirp_dbm: f64,
        start: Duration,
        end: Duration,
    ) -> u64 {
        self.prune(start);
        let id = self.next_id;
        self.next_id += 1;
        self.transmissions.push(Transmission {
            id,
            node,
            position,
            technology,
            eirp_dbm,
            start,
            end,
        });
        id
    }

    fn rx_power_dbm(&self, tx: &Transmission, position: &Position, rx_gain_db: f64) -> f64 {
        tx.eirp_dbm + rx_gain_db - self.model.loss_db(tx.position.distance_to(position))
    }

    /// Interference power in mW received at `position` during
    /// `[start, end)`, weighting each overlapping transmission by the share
    /// of the window it occupies. The receiver's own node and the wanted
    /// transmission are excluded.
    pub fn interference_mw(
        &self,
        wanted: u64,
        rx_node: NodeId,
        position: &Position,
        rx_gain_db: f64,
        start: Duration,
        end: Duration,
    ) -> f64 {
        let window = end.saturating_sub(start).as_secs_f64();
        if window <= 0.0 {
            return 0.0;
        }
        self.transmissions
            .iter()
            .filter(|tx| tx.id != wanted && tx.node != rx_node)
            .filter_map(|tx| {
                let overlap_start = tx.start.max(start);
                let overlap_end = tx.end.min(end);
                if overlap_end <= overlap_start {
                    return None;
                }
                let share = (overlap_end - overlap_start).as_secs_f64() / window;
                Some(share * dbm_to_mw(self.rx_power_dbm(tx, position, rx_gain_db)))
            })
            .sum()
    }

    /// End of the latest ongoing transmission a Wi-Fi device at `position`
    /// would detect, or `None` if the medium is idle.
    pub fn busy_until(
        &self,
        rx_node: NodeId,
        position: &Position,
        rx_gain_db: f64,
        now: Duration,
    ) -> Option<Duration> {
        self.transmissions
            .iter()
            .filter(|tx| tx.node != rx_node && tx.start <= now && now < tx.end)
            .filter(|tx| {
                let threshold = match tx.technology {
                    RadioTechnology::Wifi => WIFI_CCA_THRESHOLD_DBM,
                    RadioTechnology::Cellular => ENERGY_DETECTION_THRESHOLD_DBM,
                };
                self.rx_power_dbm(tx, position, rx_gain_db) >= threshold
            })
            .map(|tx| tx.end)
            .max()
    }

    pub fn prune(&mut self, now: Duration) {
        self.transmissions
            .retain(|tx| tx.end + RETENTION > now);
    }

    pub fn active_count(&self) -> usize {
        self.transmissions.len()
    }
}
