//! One-way import of the legacy v34 archive layout: a version record, a
//! single flat metadata payload, and separate per-channel numeric map
//! files. Newer archives use the self-describing layout in
//! [`crate::archive`]; legacy files can only be upgraded through here.
//!
//! The import is deliberately lossy: legacy thumbstick history stored X
//! and Y independently and cannot be recombined into 2-D positions, so it
//! is dropped.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use log::{info, warn};
use serde::Deserialize;
use zip::ZipArchive;

use crate::error::{Error, Result};
use crate::grid::CounterGrid;
use crate::maps::ActivityData;

/// The only legacy version this importer accepts. Anything older must be
/// upgraded with the legacy tooling first.
pub const EXPECTED_LEGACY_VERSION: u32 = 34;

/// Legacy mouse button order mapped onto current button indices.
const LEGACY_MOUSE_BUTTONS: [(&str, u8); 3] = [("Left", 1), ("Middle", 2), ("Right", 3)];

#[derive(Debug, Deserialize)]
struct LegacyPayload {
    #[serde(rename = "Distance")]
    distance: LegacyDistance,
    #[serde(rename = "Ticks")]
    ticks: LegacyTicks,
    #[serde(rename = "Resolution", default)]
    resolutions: BTreeMap<String, LegacyResolution>,
    #[serde(rename = "Keys", default)]
    keys: Option<LegacyKeys>,
    #[serde(rename = "Gamepad", default)]
    gamepad: Option<LegacyGamepad>,
}

#[derive(Debug, Deserialize)]
struct LegacyDistance {
    #[serde(rename = "Tracks")]
    tracks: f64,
}

#[derive(Debug, Deserialize)]
struct LegacyTicks {
    #[serde(rename = "Tracks")]
    tracks: u64,
}

#[derive(Debug, Deserialize)]
struct LegacyResolution {
    #[serde(rename = "Tracks")]
    tracks: String,
    #[serde(rename = "Speed")]
    speed: String,
    #[serde(rename = "Clicks")]
    clicks: LegacyClicks,
}

#[derive(Debug, Deserialize)]
struct LegacyClicks {
    #[serde(rename = "Single")]
    single: BTreeMap<String, String>,
    #[serde(rename = "Double")]
    double: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct LegacyKeys {
    #[serde(rename = "All")]
    all: LegacyPressHeld,
}

#[derive(Debug, Deserialize)]
struct LegacyPressHeld {
    #[serde(rename = "Pressed", default)]
    pressed: BTreeMap<String, u64>,
    #[serde(rename = "Held", default)]
    held: BTreeMap<String, u64>,
}

#[derive(Debug, Deserialize)]
struct LegacyGamepad {
    #[serde(rename = "All")]
    all: LegacyGamepadAll,
}

#[derive(Debug, Deserialize)]
struct LegacyGamepadAll {
    #[serde(rename = "Buttons")]
    buttons: LegacyPressHeld,
}

pub fn import_path(path: &Path) -> Result<ActivityData> {
    let file = File::open(path)?;
    let data = import(BufReader::new(file))?;
    info!("imported legacy archive {}", path.display());
    Ok(data)
}

/// Map a legacy archive onto the current aggregate. Only resolutions with
/// at least one nonzero cell are imported.
pub fn import<R: Read + Seek>(reader: R) -> Result<ActivityData> {
    let mut zip = ZipArchive::new(reader)?;

    let mut version_text = String::new();
    zip.by_name("metadata/file.txt")?
        .read_to_string(&mut version_text)?;
    let version: u32 = version_text.trim().parse().map_err(|_| Error::CorruptArchive {
        section: "metadata".into(),
        record: "file.txt".into(),
    })?;
    if version != EXPECTED_LEGACY_VERSION {
        return Err(Error::IncompatibleVersion {
            got: version,
            expected: EXPECTED_LEGACY_VERSION,
        });
    }

    let payload: LegacyPayload = {
        let mut bytes = Vec::new();
        zip.by_name("data.json")?.read_to_end(&mut bytes)?;
        serde_json::from_slice(&bytes).map_err(|err| {
            warn!("legacy payload failed to parse: {err}");
            Error::CorruptArchive {
                section: String::new(),
                record: "data.json".into(),
            }
        })?
    };

    let mut data = ActivityData::new();
    data.cursor.distance = payload.distance.tracks;
    data.cursor.counter = payload.ticks.tracks;

    for (resolution, records) in &payload.resolutions {
        if resolution.parse::<crate::grid::Resolution>().is_err() {
            return Err(Error::CorruptArchive {
                section: "Resolution".into(),
                record: resolution.clone(),
            });
        }

        for (id, target) in [
            (&records.tracks, &mut data.cursor.sequential),
            (&records.speed, &mut data.cursor.speed),
        ] {
            if let Some(grid) = read_map_record(&mut zip, id)? {
                target.insert(grid);
            }
        }

        for (kind, is_single) in [(&records.clicks.single, true), (&records.clicks.double, false)]
        {
            for (name, button) in LEGACY_MOUSE_BUTTONS {
                let Some(id) = kind.get(name) else { continue };
                if let Some(grid) = read_map_record(&mut zip, id)? {
                    let clicks = data.clicks_for(button);
                    let target = if is_single { &mut clicks.single } else { &mut clicks.double };
                    target.insert(grid);
                }
            }
        }
    }

    if let Some(keys) = &payload.keys {
        fill_counts(&keys.all.pressed, crate::maps::KEY_SLOTS, |code, count| {
            data.keyboard.pressed.set(code, count)
        });
        fill_counts(&keys.all.held, crate::maps::KEY_SLOTS, |code, count| {
            data.keyboard.held.set(code, count)
        });
    }

    if let Some(gamepad) = &payload.gamepad {
        let slots = crate::maps::GAMEPAD_BUTTON_SLOTS;
        let counters = data.gamepad_buttons_for(0);
        fill_counts(&gamepad.all.buttons.pressed, slots, |code, count| {
            counters.pressed.set(code, count)
        });
        let counters = data.gamepad_buttons_for(0);
        fill_counts(&gamepad.all.buttons.held, slots, |code, count| {
            counters.held.set(code, count)
        });
    }

    // Thumbstick and trigger history is not recoverable from the legacy
    // split-axis layout and is intentionally left empty.
    Ok(data)
}

/// Read one numeric map file, returning `None` when every cell is zero so
/// empty legacy maps are skipped.
fn read_map_record<R: Read + Seek>(
    zip: &mut ZipArchive<R>,
    id: &str,
) -> Result<Option<CounterGrid>> {
    let mut bytes = Vec::new();
    zip.by_name(&format!("maps/{id}.grid"))?.read_to_end(&mut bytes)?;
    let grid: CounterGrid = bincode::deserialize(&bytes)?;
    if grid.is_all_zero() {
        return Ok(None);
    }
    Ok(Some(grid))
}

fn fill_counts(counts: &BTreeMap<String, u64>, slots: usize, mut set: impl FnMut(usize, u64)) {
    for (code, &count) in counts {
        match code.parse::<usize>() {
            Ok(index) if index < slots => set(index, count),
            Ok(index) => warn!("skipping legacy key code {index}, only {slots} slots"),
            Err(_) => warn!("skipping non-numeric legacy key code '{code}'"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Resolution;
    use std::io::{Cursor, Write};
    use zip::write::FileOptions;
    use zip::ZipWriter;

    fn grid_with(res: Resolution, cells: &[(u32, u32, u64)]) -> CounterGrid {
        let mut grid = CounterGrid::new(res);
        for &(x, y, v) in cells {
            grid.set(x, y, v);
        }
        grid
    }

    fn build_legacy(version: &str) -> Cursor<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut zip = ZipWriter::new(&mut buffer);
            let opts = FileOptions::default();

            zip.start_file("metadata/file.txt", opts).unwrap();
            zip.write_all(version.as_bytes()).unwrap();

            let payload = serde_json::json!({
                "Distance": {"Tracks": 5000.25},
                "Ticks": {"Tracks": 999},
                "Resolution": {
                    "1920x1080": {
                        "Tracks": "map-0",
                        "Speed": "map-1",
                        "Clicks": {
                            "Single": {"Left": "map-2", "Middle": "map-3", "Right": "map-4"},
                            "Double": {"Left": "map-5", "Middle": "map-6", "Right": "map-7"}
                        }
                    }
                },
                "Keys": {"All": {"Pressed": {"30": 12}, "Held": {"30": 400}}},
                "Gamepad": {"All": {"Buttons": {"Pressed": {"2": 9}, "Held": {}}}}
            });
            zip.start_file("data.json", opts).unwrap();
            zip.write_all(payload.to_string().as_bytes()).unwrap();

            let res = Resolution::new(1920, 1080);
            let records: [(&str, CounterGrid); 8] = [
                ("map-0", grid_with(res, &[(10, 10, 40)])),
                ("map-1", grid_with(res, &[(10, 10, 120)])),
                ("map-2", grid_with(res, &[(5, 5, 3)])),
                ("map-3", CounterGrid::new(res)), // empty: skipped
                ("map-4", grid_with(res, &[(6, 6, 1)])),
                ("map-5", grid_with(res, &[(7, 7, 2)])),
                ("map-6", CounterGrid::new(res)),
                ("map-7", CounterGrid::new(res)),
            ];
            for (id, grid) in &records {
                zip.start_file(format!("maps/{id}.grid"), opts).unwrap();
                zip.write_all(&bincode::serialize(grid).unwrap()).unwrap();
            }
            zip.finish().unwrap();
        }
        buffer.set_position(0);
        buffer
    }

    #[test]
    fn test_import_maps_legacy_onto_current_aggregate() {
        let data = import(build_legacy("34")).unwrap();
        let res = Resolution::new(1920, 1080);

        assert_eq!(data.cursor.distance, 5000.25);
        assert_eq!(data.cursor.counter, 999);
        assert_eq!(data.cursor.sequential.get(res).unwrap().get(10, 10), 40);
        assert_eq!(data.cursor.speed.get(res).unwrap().get(10, 10), 120);
        // Legacy has no density data.
        assert!(data.cursor.density.is_empty());

        assert_eq!(data.clicks[&1].single.get(res).unwrap().get(5, 5), 3);
        assert_eq!(data.clicks[&3].single.get(res).unwrap().get(6, 6), 1);
        assert_eq!(data.clicks[&1].double.get(res).unwrap().get(7, 7), 2);
        // Empty legacy maps are skipped entirely.
        assert!(!data.clicks.contains_key(&2));

        assert_eq!(data.keyboard.pressed.get(30), 12);
        assert_eq!(data.keyboard.held.get(30), 400);
        assert_eq!(data.gamepad_buttons[&0].pressed.get(2), 9);

        // Thumbstick history is dropped by design.
        assert!(data.thumbstick_l.is_empty());
        assert!(data.thumbstick_r.is_empty());
    }

    #[test]
    fn test_import_rejects_other_legacy_versions() {
        match import(build_legacy("33")) {
            Err(Error::IncompatibleVersion { got, expected }) => {
                assert_eq!(got, 33);
                assert_eq!(expected, EXPECTED_LEGACY_VERSION);
            }
            other => panic!("expected version error, got {other:?}"),
        }
    }

    #[test]
    fn test_import_rejects_garbage_version_record() {
        assert!(matches!(
            import(build_legacy("not-a-number")),
            Err(Error::CorruptArchive { .. })
        ));
    }
}
