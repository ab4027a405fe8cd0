//! The single-writer aggregation worker: consumes events in tick order,
//! rasterizes movement into the counter grids, and serves render requests
//! from its own consistent state between events.

use std::collections::BTreeMap;

use crossbeam_channel::{Receiver, Sender};
use log::{debug, info, warn};

use crate::error::Result;
use crate::geometry::{self, MonitorLayout, Point};
use crate::maps::{ActivityData, GAMEPAD_BUTTON_SLOTS};
use crate::messages::{
    ClickKind, Event, RenderKind, RenderRequest, RenderResponse, Request, TrackingState,
};
use crate::render::{self, Plane, RenderOptions};

/// Decay keeps the move counter below the point where the narrowest grid
/// width plus safety margin could be exceeded before the next pass runs.
pub const DECAY_THRESHOLD: u64 = 425_000;

pub const DECAY_FACTOR: f64 = 1.1;

/// Decay tuning. The defaults match the constants the maps were designed
/// around; they are configurable through [`crate::settings::Settings`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecaySettings {
    pub threshold: u64,
    pub factor: f64,
}

impl Default for DecaySettings {
    fn default() -> Self {
        Self {
            threshold: DECAY_THRESHOLD,
            factor: DECAY_FACTOR,
        }
    }
}

/// Owns the [`ActivityData`] aggregate and mutates it one event at a time.
pub struct Tracker {
    data: ActivityData,
    layout: MonitorLayout,
    state: TrackingState,
    decay: DecaySettings,
    last_position: Option<Point>,
    last_tick: u64,
    /// Move counter captured at the most recent pause, for
    /// `TimeSincePause` renders.
    pause_counter: u64,
}

impl Tracker {
    pub fn new(layout: MonitorLayout) -> Self {
        Self::with_data(ActivityData::new(), layout, DecaySettings::default())
    }

    pub fn with_data(data: ActivityData, layout: MonitorLayout, decay: DecaySettings) -> Self {
        Self {
            data,
            layout,
            state: TrackingState::Active,
            decay,
            last_position: None,
            last_tick: 0,
            pause_counter: 0,
        }
    }

    pub fn data(&self) -> &ActivityData {
        &self.data
    }

    pub fn into_data(self) -> ActivityData {
        self.data
    }

    pub fn state(&self) -> TrackingState {
        self.state
    }

    /// Apply one event. Events must arrive in tick order; the sequential
    /// maps encode recency through last-writer-wins, so ordering matters.
    pub fn handle_event(&mut self, event: Event) -> Result<()> {
        match event {
            Event::Move { tick, position } => {
                if self.state == TrackingState::Active {
                    self.handle_move(tick, position)?;
                }
            }
            Event::Click {
                button,
                position,
                kind,
                held,
            } => {
                if self.state == TrackingState::Active {
                    self.handle_click(button, position, kind, held)?;
                }
            }
            Event::Key { code, held } => {
                if self.state == TrackingState::Active {
                    let counters = &mut self.data.keyboard;
                    if held {
                        counters.held.increment(code as usize);
                    } else {
                        counters.pressed.increment(code as usize);
                    }
                }
            }
            Event::GamepadButton {
                gamepad,
                button,
                held,
            } => {
                if self.state == TrackingState::Active {
                    // Button indices come from an untrusted stream and must
                    // not be able to crash the worker.
                    if (button as usize) >= GAMEPAD_BUTTON_SLOTS {
                        warn!("ignoring gamepad button {button}, only {GAMEPAD_BUTTON_SLOTS} slots");
                        return Ok(());
                    }
                    let counters = self.data.gamepad_buttons_for(gamepad);
                    if held {
                        counters.held.increment(button as usize);
                    } else {
                        counters.pressed.increment(button as usize);
                    }
                }
            }
            Event::MonitorsChanged { rects } => {
                info!("monitor layout changed ({} rects)", rects.len());
                self.layout.replace(rects);
            }
            Event::TrackingState { state } => self.set_state(state),
        }
        Ok(())
    }

    fn set_state(&mut self, state: TrackingState) {
        if state == TrackingState::Paused && self.state != TrackingState::Paused {
            self.pause_counter = self.data.cursor.counter;
            debug!("paused at move counter {}", self.pause_counter);
        }
        self.state = state;
    }

    fn handle_move(&mut self, tick: u64, position: Point) -> Result<()> {
        // A tick that directly follows the previous one is continuous
        // movement; anything else is a jump (programmatic warp, or the
        // first frame after idle). Jumps still paint the sequential and
        // density maps; they get buried over time.
        let continuous = tick == self.last_tick + 1;
        let previous = self.last_position.unwrap_or(position);
        let moved = geometry::distance(previous, position);

        let counter = self.data.cursor.counter;
        for pixel in geometry::line_between(previous, position) {
            let hit = self.layout.locate(pixel)?;
            let (x, y) = (hit.x, hit.y);

            self.data
                .cursor
                .sequential
                .get_or_create(hit.resolution)
                .set(x, y, counter);
            self.data
                .cursor
                .density
                .get_or_create(hit.resolution)
                .increment(x, y);

            if continuous && moved > 0.0 {
                let speed = self.data.cursor.speed.get_or_create(hit.resolution);
                let value = ((moved * 100.0).round() as u64).max(speed.get(x, y));
                speed.set(x, y, value);
            }
        }

        if moved > 0.0 {
            self.data.cursor.distance += moved;
        }
        self.data.cursor.counter += 1;
        self.data.cursor.ticks += 1;
        self.last_position = Some(position);
        self.last_tick = tick;

        if self.data.cursor.requires_decay(self.decay.threshold) {
            info!("move counter passed {}, running decay", self.decay.threshold);
            self.data.cursor.apply_decay(self.decay.factor);
            // Keep the pause marker aligned with the decayed sequential
            // values it will be subtracted from.
            self.pause_counter = crate::grid::scaled_down(self.pause_counter, self.decay.factor);
        }
        Ok(())
    }

    fn handle_click(
        &mut self,
        button: u8,
        position: Point,
        kind: ClickKind,
        held: bool,
    ) -> Result<()> {
        let hit = self.layout.locate(position)?;
        let maps = self.data.clicks_for(button);
        let grid_map = if held {
            &mut maps.held
        } else {
            match kind {
                ClickKind::Single => &mut maps.single,
                ClickKind::Double => &mut maps.double,
            }
        };
        grid_map.get_or_create(hit.resolution).increment(hit.x, hit.y);
        Ok(())
    }

    /// Render a heatmap from the current state. Runs between events on the
    /// owning worker, so it always observes fully applied mutations.
    pub fn render(&self, request: &RenderRequest) -> Result<RenderResponse> {
        let image = render_activity(&self.data, self.pause_counter, request)?;
        Ok(RenderResponse {
            kind: request.kind,
            image,
            sampling: request.sampling,
            tick: self.last_tick,
        })
    }

    /// Blocking worker loop: strict arrival order, renders answered on the
    /// outbox, exits when the state machine reaches `Stopped`. Returns the
    /// owned aggregate for the caller to persist.
    pub fn run(
        mut self,
        inbox: Receiver<Request>,
        outbox: Sender<RenderResponse>,
    ) -> Result<ActivityData> {
        info!("tracker worker started");
        for request in inbox.iter() {
            match request {
                Request::Event(event) => {
                    if let Err(err) = self.handle_event(event) {
                        // A stale monitor layout is recoverable: skip the
                        // event and keep consuming.
                        warn!("event dropped: {err}");
                    }
                }
                Request::Render(render_request) => match self.render(&render_request) {
                    Ok(response) => {
                        if outbox.send(response).is_err() {
                            warn!("render receiver dropped, stopping worker");
                            break;
                        }
                    }
                    Err(err) => warn!("render failed: {err}"),
                },
            }
            if self.state == TrackingState::Stopped {
                break;
            }
        }
        info!("tracker worker stopped");
        Ok(self.data)
    }
}

/// Build the positional planes for a render kind and run the pipeline.
/// Shared by the worker and the offline CLI path.
pub fn render_activity(
    data: &ActivityData,
    pause_counter: u64,
    request: &RenderRequest,
) -> Result<image::RgbaImage> {
    let planes: Vec<Plane> = match request.kind {
        RenderKind::Time => grid_planes(&data.cursor.sequential),
        RenderKind::TimeSincePause => data
            .cursor
            .sequential
            .iter()
            .map(|(_, grid)| Plane::from_grid_offset(grid, pause_counter))
            .collect(),
        RenderKind::Speed => grid_planes(&data.cursor.speed),
        RenderKind::SingleClick => click_planes(data, |maps| &maps.single),
        RenderKind::DoubleClick => click_planes(data, |maps| &maps.double),
        RenderKind::HeldClick => click_planes(data, |maps| &maps.held),
    };

    let mut positional = BTreeMap::new();
    positional.insert((0, 0), planes);

    let mut opts = RenderOptions::for_kind(request.kind);
    opts.width = request.width;
    opts.height = request.height;
    opts.sampling = request.sampling;
    render::render(&request.colour_map, &positional, &opts)
}

fn grid_planes(map: &crate::grid::GridMap) -> Vec<Plane> {
    map.iter().map(|(_, grid)| Plane::from_grid(grid)).collect()
}

fn click_planes(
    data: &ActivityData,
    select: impl Fn(&crate::maps::ClickMaps) -> &crate::grid::GridMap,
) -> Vec<Plane> {
    data.clicks
        .values()
        .flat_map(|maps| select(maps).iter().map(|(_, grid)| Plane::from_grid(grid)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::MonitorRect;
    use crate::grid::Resolution;

    fn tracker() -> Tracker {
        Tracker::new(MonitorLayout::single(100, 100))
    }

    fn move_event(tick: u64, x: i32, y: i32) -> Event {
        Event::Move {
            tick,
            position: (x, y),
        }
    }

    #[test]
    fn test_move_paints_path_with_move_counter() {
        let mut t = tracker();
        t.handle_event(move_event(1, 0, 0)).unwrap();
        t.handle_event(move_event(2, 3, 0)).unwrap();

        let res = Resolution::new(100, 100);
        let seq = t.data().cursor.sequential.get(res).unwrap();
        // Second event wrote counter value 1 across (0,0)..(3,0).
        for x in 0..=3 {
            assert_eq!(seq.get(x, 0), 1);
        }
        assert_eq!(t.data().cursor.counter, 2);
        assert_eq!(t.data().cursor.distance, 3.0);
    }

    #[test]
    fn test_sequential_is_last_writer_wins_not_hit_count() {
        let mut t = tracker();
        t.handle_event(move_event(1, 5, 5)).unwrap();
        t.handle_event(move_event(2, 8, 5)).unwrap();
        t.handle_event(move_event(3, 5, 5)).unwrap();

        let res = Resolution::new(100, 100);
        let seq = t.data().cursor.sequential.get(res).unwrap();
        // (5,5) was repainted by the third event with counter 2.
        assert_eq!(seq.get(5, 5), 2);
        // Density keeps the actual visit counts.
        let density = t.data().cursor.density.get(res).unwrap();
        assert_eq!(density.get(5, 5), 3);
    }

    #[test]
    fn test_speed_records_max_only_when_continuous() {
        let mut t = tracker();
        t.handle_event(move_event(1, 0, 0)).unwrap();
        // tick 5 is a jump: no speed value even though distance is nonzero
        t.handle_event(move_event(5, 10, 0)).unwrap();
        let res = Resolution::new(100, 100);
        assert!(t.data().cursor.speed.get(res).is_none());

        // tick 6 continues tick 5: speed is recorded
        t.handle_event(move_event(6, 14, 3)).unwrap();
        assert_eq!(t.data().cursor.speed.get(res).unwrap().get(14, 3), 500);
        // A later, slower pass never lowers a recorded speed.
        t.handle_event(move_event(7, 15, 3)).unwrap();
        let speed = t.data().cursor.speed.get(res).unwrap();
        assert_eq!(speed.get(14, 3), 500);
        assert_eq!(speed.get(15, 3), 100);
    }

    #[test]
    fn test_out_of_bounds_move_errors_and_leaves_state() {
        let mut t = tracker();
        t.handle_event(move_event(1, 50, 50)).unwrap();
        let result = t.handle_event(move_event(2, 150, 50));
        assert!(result.is_err());
        // The failing pixel's grid cell was never created.
        let res = Resolution::new(100, 100);
        let seq = t.data().cursor.sequential.get(res).unwrap();
        assert_eq!(seq.get(99, 50), 1);
    }

    #[test]
    fn test_decay_triggers_past_threshold() {
        let mut t = Tracker::with_data(
            ActivityData::new(),
            MonitorLayout::single(100, 100),
            DecaySettings {
                threshold: 10,
                factor: 1.1,
            },
        );
        for tick in 1..=12 {
            t.handle_event(move_event(tick, tick as i32, 0)).unwrap();
        }
        // Counter reached 11 > 10 after the 11th event and was decayed.
        assert!(t.data().cursor.counter < 11);
    }

    #[test]
    fn test_click_events_increment_expected_map() {
        let mut t = tracker();
        let click = |kind, held| Event::Click {
            button: 1,
            position: (10, 20),
            kind,
            held,
        };
        t.handle_event(click(ClickKind::Single, false)).unwrap();
        t.handle_event(click(ClickKind::Single, false)).unwrap();
        t.handle_event(click(ClickKind::Double, false)).unwrap();
        t.handle_event(click(ClickKind::Single, true)).unwrap();

        let res = Resolution::new(100, 100);
        let maps = &t.data().clicks[&1];
        assert_eq!(maps.single.get(res).unwrap().get(10, 20), 2);
        assert_eq!(maps.double.get(res).unwrap().get(10, 20), 1);
        assert_eq!(maps.held.get(res).unwrap().get(10, 20), 1);
    }

    #[test]
    fn test_paused_state_stops_recording_but_keeps_data() {
        let mut t = tracker();
        t.handle_event(move_event(1, 0, 0)).unwrap();
        t.handle_event(Event::TrackingState {
            state: TrackingState::Paused,
        })
        .unwrap();
        t.handle_event(move_event(2, 50, 50)).unwrap();
        assert_eq!(t.data().cursor.counter, 1);
        t.handle_event(Event::TrackingState {
            state: TrackingState::Active,
        })
        .unwrap();
        t.handle_event(move_event(3, 10, 0)).unwrap();
        assert_eq!(t.data().cursor.counter, 2);
    }

    #[test]
    fn test_key_and_gamepad_counters() {
        let mut t = tracker();
        t.handle_event(Event::Key {
            code: 65,
            held: false,
        })
        .unwrap();
        t.handle_event(Event::Key {
            code: 65,
            held: true,
        })
        .unwrap();
        t.handle_event(Event::GamepadButton {
            gamepad: 0,
            button: 3,
            held: false,
        })
        .unwrap();
        assert_eq!(t.data().keyboard.pressed.get(65), 1);
        assert_eq!(t.data().keyboard.held.get(65), 1);
        assert_eq!(t.data().gamepad_buttons[&0].pressed.get(3), 1);
    }

    #[test]
    fn test_out_of_range_gamepad_button_is_dropped() {
        let mut t = tracker();
        t.handle_event(Event::GamepadButton {
            gamepad: 0,
            button: 25,
            held: false,
        })
        .unwrap();
        // Nothing recorded, and no gamepad entry materialized.
        assert!(t.data().gamepad_buttons.is_empty());

        // An in-range press on the same event shape still lands.
        t.handle_event(Event::GamepadButton {
            gamepad: 0,
            button: 19,
            held: false,
        })
        .unwrap();
        assert_eq!(t.data().gamepad_buttons[&0].pressed.get(19), 1);
    }

    #[test]
    fn test_worker_loop_stops_and_returns_data() {
        let (req_tx, req_rx) = crossbeam_channel::unbounded();
        let (resp_tx, resp_rx) = crossbeam_channel::unbounded();
        let tracker = tracker();

        let handle = std::thread::spawn(move || tracker.run(req_rx, resp_tx).unwrap());

        req_tx
            .send(Request::Event(move_event(1, 0, 0)))
            .unwrap();
        req_tx
            .send(Request::Event(move_event(2, 5, 5)))
            .unwrap();
        req_tx
            .send(Request::Render(RenderRequest::new(
                RenderKind::Time,
                "ice",
            )))
            .unwrap();
        req_tx
            .send(Request::Event(Event::TrackingState {
                state: TrackingState::Stopped,
            }))
            .unwrap();

        let response = resp_rx.recv().unwrap();
        assert_eq!(response.kind, RenderKind::Time);
        assert_eq!(response.tick, 2);

        let data = handle.join().unwrap();
        assert_eq!(data.cursor.counter, 2);
    }

    #[test]
    fn test_monitor_change_replaces_layout() {
        let mut t = tracker();
        t.handle_event(Event::MonitorsChanged {
            rects: vec![MonitorRect::new(0, 0, 10, 10)],
        })
        .unwrap();
        assert!(t.handle_event(move_event(1, 50, 50)).is_err());
    }

    #[test]
    fn test_render_time_since_pause_subtracts_marker() {
        let mut t = tracker();
        for tick in 1..=5 {
            t.handle_event(move_event(tick, tick as i32 * 2, 0)).unwrap();
        }
        t.handle_event(Event::TrackingState {
            state: TrackingState::Paused,
        })
        .unwrap();
        assert_eq!(t.pause_counter, 5);
        let response = t
            .render(&RenderRequest::new(RenderKind::TimeSincePause, "chalk"))
            .unwrap();
        assert_eq!(response.kind, RenderKind::TimeSincePause);
    }
}
