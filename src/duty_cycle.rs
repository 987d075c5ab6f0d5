//! Cellular duty-cycle pattern synthesis
//!
//! A cellular operator shares the band by blanking some of the 40 subframes
//! of its almost-blank-subframe pattern. Subframes 0 and 35 carry system
//! information and are never blanked. The remaining active subframes are
//! taken from the end of the pattern, slot 39 first, until the active
//! fraction reaches the requested duty cycle.

use crate::errors::{CoexistError, Result};
use serde::{Serialize, Serializer};
use spectrum_sim::BLANKING_PATTERN_LEN;
use std::fmt;

/// Subframes that always stay active
pub const RESERVED_ACTIVE_SLOTS: [usize; 2] = [0, 35];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DutyCyclePattern {
    /// `true` marks a blanked subframe
    blanked: [bool; BLANKING_PATTERN_LEN],
}

impl DutyCyclePattern {
    /// Build the pattern for a duty cycle in `[0, 1]`.
    pub fn generate(duty_cycle: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&duty_cycle) {
            return Err(CoexistError::InvalidDutyCycle(duty_cycle));
        }

        let total = BLANKING_PATTERN_LEN as f64;
        let mut blanked = [true; BLANKING_PATTERN_LEN];
        for slot in RESERVED_ACTIVE_SLOTS {
            blanked[slot] = false;
        }
        let mut active = RESERVED_ACTIVE_SLOTS.len();

        for slot in (0..BLANKING_PATTERN_LEN).rev() {
            if RESERVED_ACTIVE_SLOTS.contains(&slot) {
                continue;
            }
            if active < BLANKING_PATTERN_LEN && (active as f64) / total < duty_cycle {
                blanked[slot] = false;
                active += 1;
            }
        }

        Ok(Self { blanked })
    }

    /// Per-subframe flags in slot order, `true` = blanked
    pub fn blanking(&self) -> [bool; BLANKING_PATTERN_LEN] {
        self.blanked
    }

    pub fn is_blanked(&self, slot: usize) -> bool {
        self.blanked.get(slot).copied().unwrap_or(false)
    }

    pub fn active_slots(&self) -> usize {
        self.blanked.iter().filter(|b| !**b).count()
    }

    /// Fraction of active subframes actually achieved
    pub fn realized(&self) -> f64 {
        self.active_slots() as f64 / BLANKING_PATTERN_LEN as f64
    }

    /// Render as a bit string with slot 39 first, `1` = blanked.
    pub fn to_bit_string(&self) -> String {
        self.blanked
            .iter()
            .rev()
            .map(|b| if *b { '1' } else { '0' })
            .collect()
    }
}

impl fmt::Display for DutyCyclePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_bit_string())
    }
}

/// Serialized as its bit string.
impl Serialize for DutyCyclePattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
