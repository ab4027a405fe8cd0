use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::thread;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossbeam_channel::unbounded;
use log::{error, info, warn};
use simplelog::{Config, LevelFilter, WriteLogger};

use mousemap::geometry::MonitorLayout;
use mousemap::grid::Resolution;
use mousemap::messages::{Event, RenderKind, RenderRequest, Request, TrackingState};
use mousemap::tracker::{render_activity, DecaySettings, Tracker};
use mousemap::{archive, legacy, settings, ActivityData};

#[derive(Parser)]
#[command(name = "mousemap", version, about = "Pointer activity heatmaps")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Consume a stream of input events and save the aggregate
    Track {
        /// JSON-lines event file
        events: PathBuf,
        /// Archive to write
        #[arg(short, long)]
        output: PathBuf,
        /// Existing archive to continue from
        #[arg(long)]
        resume: Option<PathBuf>,
        /// Initial monitor resolution, until a monitors_changed event
        #[arg(long, default_value = "1920x1080")]
        monitor: Resolution,
    },
    /// Render a heatmap image from a saved archive
    Render {
        /// Archive to read
        archive: PathBuf,
        /// PNG file to write
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long, value_enum, default_value_t = RenderKind::Time)]
        kind: RenderKind,
        /// Colour map name or inline hex list; defaults to the configured one
        #[arg(long)]
        colour_map: Option<String>,
        #[arg(long)]
        width: Option<u32>,
        #[arg(long)]
        height: Option<u32>,
        /// Supersampling factor
        #[arg(long)]
        sampling: Option<u32>,
    },
    /// Convert a legacy archive to the current format
    Import {
        /// Legacy archive to read
        legacy: PathBuf,
        /// Archive to write
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Print summary statistics for an archive
    Stats {
        archive: PathBuf,
    },
}

fn main() -> Result<()> {
    WriteLogger::init(
        LevelFilter::Debug,
        Config::default(),
        File::create("mousemap.log")?,
    )?;

    settings::load_settings();

    let cli = Cli::parse();
    match cli.command {
        Command::Track {
            events,
            output,
            resume,
            monitor,
        } => track(&events, &output, resume.as_deref(), monitor),
        Command::Render {
            archive,
            output,
            kind,
            colour_map,
            width,
            height,
            sampling,
        } => render(&archive, &output, kind, colour_map, width, height, sampling),
        Command::Import { legacy, output } => import(&legacy, &output),
        Command::Stats { archive } => stats(&archive),
    }
}

fn track(
    events: &std::path::Path,
    output: &std::path::Path,
    resume: Option<&std::path::Path>,
    monitor: Resolution,
) -> Result<()> {
    let data = match resume {
        Some(path) => archive::load_path(path)
            .with_context(|| format!("failed to load archive {}", path.display()))?,
        None => ActivityData::new(),
    };
    let decay = DecaySettings {
        threshold: settings::get_decay_threshold(),
        factor: settings::get_decay_factor(),
    };
    let layout = MonitorLayout::single(monitor.width, monitor.height);
    let tracker = Tracker::with_data(data, layout, decay);

    let (event_tx, event_rx) = unbounded();
    let (render_tx, _render_rx) = unbounded();
    let worker = thread::spawn(move || tracker.run(event_rx, render_tx));

    let reader = BufReader::new(
        File::open(events).with_context(|| format!("failed to open {}", events.display()))?,
    );
    let mut count = 0u64;
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Event>(&line) {
            Ok(event) => {
                count += 1;
                if event_tx.send(Request::Event(event)).is_err() {
                    break;
                }
            }
            Err(err) => warn!("skipping malformed event on line {}: {err}", line_no + 1),
        }
    }
    // The worker exits on its own if the stream ended with a stop event;
    // otherwise closing the inbox winds it down.
    let _ = event_tx.send(Request::Event(Event::TrackingState {
        state: TrackingState::Stopped,
    }));
    drop(event_tx);

    let data = match worker.join() {
        Ok(result) => result?,
        Err(_) => {
            error!("tracker worker panicked");
            anyhow::bail!("tracker worker panicked");
        }
    };

    archive::save_path(&data, output)
        .with_context(|| format!("failed to save archive {}", output.display()))?;
    info!("processed {count} events into {}", output.display());
    println!("Processed {count} events, saved {}", output.display());
    Ok(())
}

fn render(
    path: &std::path::Path,
    output: &std::path::Path,
    kind: RenderKind,
    colour_map: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    sampling: Option<u32>,
) -> Result<()> {
    let data = archive::load_path(path)
        .with_context(|| format!("failed to load archive {}", path.display()))?;

    let colour_map = match colour_map {
        Some(name) => settings::resolve_custom_colour_map(&name),
        None => settings::get_colour_map(),
    };
    let mut request = RenderRequest::new(kind, colour_map);
    request.width = width;
    request.height = height;
    request.sampling = sampling.unwrap_or_else(settings::get_sampling);

    let image = render_activity(&data, 0, &request)?;
    image
        .save(output)
        .with_context(|| format!("failed to write image {}", output.display()))?;
    info!("rendered {kind:?} heatmap to {}", output.display());
    println!("Saved {}x{} image to {}", image.width(), image.height(), output.display());
    Ok(())
}

fn import(legacy_path: &std::path::Path, output: &std::path::Path) -> Result<()> {
    let data = legacy::import_path(legacy_path)
        .with_context(|| format!("failed to import {}", legacy_path.display()))?;
    archive::save_path(&data, output)
        .with_context(|| format!("failed to save archive {}", output.display()))?;
    println!("Imported {} into {}", legacy_path.display(), output.display());
    Ok(())
}

fn stats(path: &std::path::Path) -> Result<()> {
    let data = archive::load_path(path)
        .with_context(|| format!("failed to load archive {}", path.display()))?;

    println!("Cursor:");
    println!("  distance: {:.1} px", data.cursor.distance);
    println!("  moves:    {}", data.cursor.counter);
    println!("  ticks:    {}", data.cursor.ticks);
    for (resolution, grid) in data.cursor.sequential.iter() {
        println!(
            "  {resolution}: {} visited pixels ({} bit cells)",
            grid.count_nonzero(),
            grid.width_bits()
        );
    }

    let clicks: usize = data
        .clicks
        .values()
        .flat_map(|maps| maps.single.iter().chain(maps.double.iter()))
        .map(|(_, grid)| grid.count_nonzero())
        .sum();
    println!("Click positions: {clicks}");

    println!("Keyboard keys pressed: {}", data.keyboard.pressed.count_nonzero());
    if !data.gamepad_buttons.is_empty() {
        println!("Gamepads seen: {}", data.gamepad_buttons.len());
    }
    Ok(())
}
