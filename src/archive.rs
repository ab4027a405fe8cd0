//! Persistence codec: the full [`ActivityData`] aggregate round-trips
//! through a zip container of self-describing grid records and plain-text
//! scalars.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;
use std::sync::LazyLock;

use chrono::Utc;
use log::{debug, info};
use regex::Regex;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{Error, Result};
use crate::grid::{CounterBuf, CounterGrid, GridMap, Resolution};
use crate::maps::{ActivityData, ClickMaps, MovementMaps, PressCounters};

/// Bumped on any record-layout change. Loading requires an exact match.
pub const CURRENT_FILE_VERSION: u32 = 1;

static GRID_RECORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)x(\d+)\.grid$").expect("valid grid record pattern"));

fn file_options() -> FileOptions {
    FileOptions::default().compression_method(CompressionMethod::Deflated)
}

pub fn save_path(data: &ActivityData, path: &Path) -> Result<()> {
    let file = File::create(path)?;
    save(data, BufWriter::new(file))?;
    info!("saved activity data to {}", path.display());
    Ok(())
}

pub fn load_path(path: &Path) -> Result<ActivityData> {
    let file = File::open(path)?;
    let data = load(BufReader::new(file))?;
    info!("loaded activity data from {}", path.display());
    Ok(data)
}

/// Write the aggregate as a versioned archive.
pub fn save<W: Write + Seek>(data: &ActivityData, writer: W) -> Result<()> {
    let mut zip = ZipWriter::new(writer);

    write_text(&mut zip, "version", &CURRENT_FILE_VERSION.to_string())?;
    let now = Utc::now().to_rfc3339();
    write_text(&mut zip, "created", &now)?;
    write_text(&mut zip, "modified", &now)?;

    write_movement(&mut zip, "data/mouse/cursor", &data.cursor)?;
    for (&button, clicks) in &data.clicks {
        let prefix = format!("data/mouse/clicks/{button}");
        write_grid_map(&mut zip, &format!("{prefix}/single"), &clicks.single)?;
        write_grid_map(&mut zip, &format!("{prefix}/double"), &clicks.double)?;
        write_grid_map(&mut zip, &format!("{prefix}/held"), &clicks.held)?;
    }

    write_counters(&mut zip, "data/keyboard", &data.keyboard)?;

    let gamepads: BTreeSet<u8> = data
        .gamepad_buttons
        .keys()
        .chain(data.thumbstick_l.keys())
        .chain(data.thumbstick_r.keys())
        .chain(data.trigger.keys())
        .copied()
        .collect();
    for index in gamepads {
        let prefix = format!("data/gamepad/{index}");
        if let Some(counters) = data.gamepad_buttons.get(&index) {
            write_counters(&mut zip, &prefix, counters)?;
        }
        if let Some(maps) = data.thumbstick_l.get(&index) {
            write_movement(&mut zip, &format!("{prefix}/left_stick"), maps)?;
        }
        if let Some(maps) = data.thumbstick_r.get(&index) {
            write_movement(&mut zip, &format!("{prefix}/right_stick"), maps)?;
        }
        if let Some(maps) = data.trigger.get(&index) {
            write_movement(&mut zip, &format!("{prefix}/trigger"), maps)?;
        }
    }

    zip.finish()?;
    Ok(())
}

/// Read an archive written by [`save`]. Fails with `IncompatibleVersion`
/// unless the version record matches exactly; there is no partial or
/// forward compatibility.
pub fn load<R: Read + Seek>(reader: R) -> Result<ActivityData> {
    let mut zip = ZipArchive::new(reader)?;

    let version: u32 = read_text(&mut zip, "version")?
        .trim()
        .parse()
        .map_err(|_| Error::CorruptArchive {
            section: String::new(),
            record: "version".into(),
        })?;
    if version != CURRENT_FILE_VERSION {
        return Err(Error::IncompatibleVersion {
            got: version,
            expected: CURRENT_FILE_VERSION,
        });
    }

    let names: Vec<String> = zip.file_names().map(String::from).collect();
    let mut data = ActivityData::new();

    data.cursor = read_movement(&mut zip, &names, "data/mouse/cursor")?;

    for button in indexes_under(&names, "data/mouse/clicks/", 3) {
        let prefix = format!("data/mouse/clicks/{button}");
        let clicks = ClickMaps {
            single: read_grid_map(&mut zip, &names, &format!("{prefix}/single"))?,
            double: read_grid_map(&mut zip, &names, &format!("{prefix}/double"))?,
            held: read_grid_map(&mut zip, &names, &format!("{prefix}/held"))?,
        };
        data.clicks.insert(button, clicks);
    }

    data.keyboard = read_counters(&mut zip, "data/keyboard")?;

    for index in indexes_under(&names, "data/gamepad/", 2) {
        let prefix = format!("data/gamepad/{index}");
        if names.iter().any(|n| *n == format!("{prefix}/pressed.dat")) {
            data.gamepad_buttons
                .insert(index, read_counters(&mut zip, &prefix)?);
        }
        for (section, target) in [
            ("left_stick", &mut data.thumbstick_l),
            ("right_stick", &mut data.thumbstick_r),
            ("trigger", &mut data.trigger),
        ] {
            let sub = format!("{prefix}/{section}");
            if names.iter().any(|n| n.starts_with(&format!("{sub}/"))) {
                target.insert(index, read_movement(&mut zip, &names, &sub)?);
            }
        }
    }

    Ok(data)
}

/// Numeric path segment at `depth` for every record under `prefix`, e.g.
/// the button index in `data/mouse/clicks/1/single/...`.
fn indexes_under(names: &[String], prefix: &str, depth: usize) -> BTreeSet<u8> {
    names
        .iter()
        .filter(|name| name.starts_with(prefix))
        .filter_map(|name| name.split('/').nth(depth)?.parse().ok())
        .collect()
}

fn write_text<W: Write + Seek>(zip: &mut ZipWriter<W>, name: &str, text: &str) -> Result<()> {
    zip.start_file(name, file_options())?;
    zip.write_all(text.as_bytes())?;
    Ok(())
}

fn read_text<R: Read + Seek>(zip: &mut ZipArchive<R>, name: &str) -> Result<String> {
    let mut text = String::new();
    zip.by_name(name)?.read_to_string(&mut text)?;
    Ok(text)
}

fn write_grid_map<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    prefix: &str,
    map: &GridMap,
) -> Result<()> {
    for (resolution, grid) in map.iter() {
        zip.start_file(format!("{prefix}/{resolution}.grid"), file_options())?;
        zip.write_all(&bincode::serialize(grid)?)?;
    }
    Ok(())
}

fn read_grid_map<R: Read + Seek>(
    zip: &mut ZipArchive<R>,
    names: &[String],
    prefix: &str,
) -> Result<GridMap> {
    let dir = format!("{prefix}/");
    let mut map = GridMap::new();
    for name in names.iter().filter(|n| n.starts_with(&dir)) {
        let record = &name[dir.len()..];
        let captures = GRID_RECORD_RE
            .captures(record)
            .ok_or_else(|| Error::CorruptArchive {
                section: prefix.to_string(),
                record: record.to_string(),
            })?;
        let resolution = Resolution::new(captures[1].parse().unwrap(), captures[2].parse().unwrap());

        let mut bytes = Vec::new();
        zip.by_name(name)?.read_to_end(&mut bytes)?;
        let grid: CounterGrid = bincode::deserialize(&bytes)?;
        if grid.resolution() != resolution {
            return Err(Error::CorruptArchive {
                section: prefix.to_string(),
                record: record.to_string(),
            });
        }
        debug!("loaded grid record {name}");
        map.insert(grid);
    }
    Ok(map)
}

fn write_movement<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    prefix: &str,
    maps: &MovementMaps,
) -> Result<()> {
    write_grid_map(zip, &format!("{prefix}/sequential"), &maps.sequential)?;
    write_grid_map(zip, &format!("{prefix}/density"), &maps.density)?;
    write_grid_map(zip, &format!("{prefix}/speed"), &maps.speed)?;
    write_text(zip, &format!("{prefix}/distance"), &maps.distance.to_string())?;
    write_text(zip, &format!("{prefix}/counter"), &maps.counter.to_string())?;
    write_text(zip, &format!("{prefix}/ticks"), &maps.ticks.to_string())?;
    Ok(())
}

fn read_movement<R: Read + Seek>(
    zip: &mut ZipArchive<R>,
    names: &[String],
    prefix: &str,
) -> Result<MovementMaps> {
    let mut maps = MovementMaps::new();
    maps.sequential = read_grid_map(zip, names, &format!("{prefix}/sequential"))?;
    maps.density = read_grid_map(zip, names, &format!("{prefix}/density"))?;
    maps.speed = read_grid_map(zip, names, &format!("{prefix}/speed"))?;
    maps.distance = read_scalar(zip, names, &format!("{prefix}/distance"))?;
    maps.counter = read_scalar(zip, names, &format!("{prefix}/counter"))?;
    maps.ticks = read_scalar(zip, names, &format!("{prefix}/ticks"))?;
    Ok(maps)
}

fn read_scalar<R: Read + Seek, T: std::str::FromStr + Default>(
    zip: &mut ZipArchive<R>,
    names: &[String],
    name: &str,
) -> Result<T> {
    if !names.iter().any(|n| n == name) {
        return Ok(T::default());
    }
    read_text(zip, name)?
        .trim()
        .parse()
        .map_err(|_| Error::CorruptArchive {
            section: String::new(),
            record: name.to_string(),
        })
}

fn write_counters<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    prefix: &str,
    counters: &PressCounters,
) -> Result<()> {
    zip.start_file(format!("{prefix}/pressed.dat"), file_options())?;
    zip.write_all(&bincode::serialize(&counters.pressed)?)?;
    zip.start_file(format!("{prefix}/held.dat"), file_options())?;
    zip.write_all(&bincode::serialize(&counters.held)?)?;
    Ok(())
}

fn read_counters<R: Read + Seek>(zip: &mut ZipArchive<R>, prefix: &str) -> Result<PressCounters> {
    let mut read_buf = |name: String| -> Result<CounterBuf> {
        let mut bytes = Vec::new();
        zip.by_name(&name)?.read_to_end(&mut bytes)?;
        Ok(bincode::deserialize(&bytes)?)
    };
    Ok(PressCounters {
        pressed: read_buf(format!("{prefix}/pressed.dat"))?,
        held: read_buf(format!("{prefix}/held.dat"))?,
    })
}
