//! Pointer activity heatmaps: overflow-safe counter grids fed by mouse,
//! keyboard and gamepad events, persisted as zip archives and rendered
//! into false-colour images.

pub mod archive;
pub mod colours;
pub mod error;
pub mod geometry;
pub mod grid;
pub mod legacy;
pub mod maps;
pub mod messages;
pub mod render;
pub mod settings;
pub mod tracker;

pub use error::{Error, Result};
pub use maps::ActivityData;
pub use tracker::Tracker;
