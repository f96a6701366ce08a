//! Simulator configuration.
//!
//! Everything here is fixed for the lifetime of a [`Simulator`](crate::Simulator); the CLI
//! fills it from flags with environment fallbacks.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

mod defaults {
    /// Screen width in pixels.
    pub const SCREEN_WIDTH: usize = 10;
    /// Screen height in pixels.
    pub const SCREEN_HEIGHT: usize = 9;
    /// Instructions executed before the simulator halts on its own.
    pub const MAX_CYCLES: u64 = 1_000_000;
}

/// Largest screen side. The cursor registers only keep 5 bits.
pub const MAX_SCREEN_SIDE: usize = 32;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub screen_width: usize,
    pub screen_height: usize,
    pub max_cycles: u64,
    /// Fixed seed for the RNG device. `None` draws from OS entropy.
    pub rng_seed: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            screen_width: defaults::SCREEN_WIDTH,
            screen_height: defaults::SCREEN_HEIGHT,
            max_cycles: defaults::MAX_CYCLES,
            rng_seed: None,
        }
    }
}

impl SimConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (axis, value) in [("width", self.screen_width), ("height", self.screen_height)] {
            if !(1..=MAX_SCREEN_SIDE).contains(&value) {
                return Err(ConfigError::ScreenSize { axis, value });
            }
        }
        if self.max_cycles == 0 {
            return Err(ConfigError::NoCycles);
        }
        Ok(())
    }
}
