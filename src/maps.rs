use std::collections::BTreeMap;

use log::info;

use crate::grid::{CounterBuf, GridMap};

/// Number of addressable keyboard key codes.
pub const KEY_SLOTS: usize = 256;

/// Number of addressable gamepad buttons per controller.
pub const GAMEPAD_BUTTON_SLOTS: usize = 20;

/// Line-based movement history for one input channel (the mouse cursor, or
/// one gamepad thumbstick/trigger).
///
/// `sequential` holds the move counter at the last visit of each pixel, so
/// it encodes recency rank rather than a hit count. `density` counts visits.
/// `speed` keeps the fastest observed movement through each pixel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MovementMaps {
    pub sequential: GridMap,
    pub density: GridMap,
    pub speed: GridMap,
    pub distance: f64,
    pub counter: u64,
    pub ticks: u64,
}

impl MovementMaps {
    pub fn new() -> Self {
        Self::default()
    }

    /// The counter grows monotonically between decay passes; once it
    /// crosses the threshold the next decay must run before overflow
    /// safety margins erode.
    pub fn requires_decay(&self, threshold: u64) -> bool {
        self.counter > threshold
    }

    /// Scale down the sequential and speed grids and the move counter by
    /// the same factor. Density is a pure hit count and is left alone.
    /// This biases the maps toward recent activity; old history slowly
    /// erodes, which is intentional.
    pub fn apply_decay(&mut self, factor: f64) {
        self.sequential.scale_all(factor);
        self.speed.scale_all(factor);
        self.counter = crate::grid::scaled_down(self.counter, factor);
        info!("decay applied (factor {factor}), counter now {}", self.counter);
    }

    pub fn is_empty(&self) -> bool {
        self.sequential.is_empty() && self.density.is_empty() && self.speed.is_empty()
    }
}

/// Per-pixel click counts for one mouse button.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClickMaps {
    pub single: GridMap,
    pub double: GridMap,
    pub held: GridMap,
}

impl ClickMaps {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Press and held-duration counters indexed by key code or button index.
#[derive(Debug, Clone, PartialEq)]
pub struct PressCounters {
    pub pressed: CounterBuf,
    pub held: CounterBuf,
}

impl PressCounters {
    pub fn new(slots: usize) -> Self {
        Self {
            pressed: CounterBuf::zeroed(slots),
            held: CounterBuf::zeroed(slots),
        }
    }

    pub fn keyboard() -> Self {
        Self::new(KEY_SLOTS)
    }

    pub fn gamepad() -> Self {
        Self::new(GAMEPAD_BUTTON_SLOTS)
    }
}

/// The full owned aggregate for one tracked context: every movement map,
/// click map and key/button array. This is the single unit of persistence
/// and the single unit the tracker mutates.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityData {
    pub cursor: MovementMaps,
    pub thumbstick_l: BTreeMap<u8, MovementMaps>,
    pub thumbstick_r: BTreeMap<u8, MovementMaps>,
    pub trigger: BTreeMap<u8, MovementMaps>,

    pub clicks: BTreeMap<u8, ClickMaps>,

    pub keyboard: PressCounters,
    pub gamepad_buttons: BTreeMap<u8, PressCounters>,
}

impl Default for ActivityData {
    fn default() -> Self {
        Self {
            cursor: MovementMaps::new(),
            thumbstick_l: BTreeMap::new(),
            thumbstick_r: BTreeMap::new(),
            trigger: BTreeMap::new(),
            clicks: BTreeMap::new(),
            keyboard: PressCounters::keyboard(),
            gamepad_buttons: BTreeMap::new(),
        }
    }
}

impl ActivityData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clicks_for(&mut self, button: u8) -> &mut ClickMaps {
        self.clicks.entry(button).or_default()
    }

    pub fn gamepad_buttons_for(&mut self, gamepad: u8) -> &mut PressCounters {
        self.gamepad_buttons
            .entry(gamepad)
            .or_insert_with(PressCounters::gamepad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Resolution;

    #[test]
    fn test_decay_scales_sequential_speed_and_counter() {
        let mut maps = MovementMaps::new();
        let res = Resolution::new(100, 100);
        maps.sequential.get_or_create(res).set(5, 5, 1100);
        maps.speed.get_or_create(res).set(5, 5, 330);
        maps.density.get_or_create(res).set(5, 5, 42);
        maps.counter = 1100;

        maps.apply_decay(1.1);

        assert_eq!(maps.sequential.get(res).unwrap().get(5, 5), 1000);
        assert_eq!(maps.speed.get(res).unwrap().get(5, 5), 300);
        // density is exempt from decay
        assert_eq!(maps.density.get(res).unwrap().get(5, 5), 42);
        assert_eq!(maps.counter, 1000);
    }

    #[test]
    fn test_requires_decay_threshold() {
        let mut maps = MovementMaps::new();
        maps.counter = 425_000;
        assert!(!maps.requires_decay(425_000));
        maps.counter = 425_001;
        assert!(maps.requires_decay(425_000));
    }

    #[test]
    fn test_clicks_for_materializes_button_maps() {
        let mut data = ActivityData::new();
        assert!(data.clicks.is_empty());
        data.clicks_for(1)
            .single
            .get_or_create(Resolution::new(800, 600))
            .increment(1, 2);
        assert_eq!(data.clicks.len(), 1);
    }
}
