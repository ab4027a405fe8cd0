use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::{LazyLock, RwLock};

pub const CURRENT_VERSION: u32 = 1;
const SETTINGS_FILENAME: &str = "config.yaml";
const APP_NAME: &str = "mousemap";

/// A user-defined colour map: a name plus a comma-separated list of hex
/// colours, in the same format `resolve_colour_map` accepts inline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomColourMap {
    pub name: String,
    pub colours: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default = "default_colour_map")]
    pub colour_map: String,

    #[serde(default = "default_sampling")]
    pub sampling: u32,

    /// Move count above which the next decay pass runs.
    #[serde(default = "default_decay_threshold")]
    pub decay_threshold: u64,

    /// Divisor applied to the movement maps by a decay pass.
    #[serde(default = "default_decay_factor")]
    pub decay_factor: f64,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_colour_maps: Vec<CustomColourMap>,
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_colour_map() -> String {
    "ice".to_string()
}

fn default_sampling() -> u32 {
    4
}

fn default_decay_threshold() -> u64 {
    425_000
}

fn default_decay_factor() -> f64 {
    1.1
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            colour_map: default_colour_map(),
            sampling: default_sampling(),
            decay_threshold: default_decay_threshold(),
            decay_factor: default_decay_factor(),
            custom_colour_maps: Vec::new(),
        }
    }
}

static SETTINGS: LazyLock<RwLock<Settings>> = LazyLock::new(|| RwLock::new(Settings::default()));

fn preferred_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
}

pub fn load_settings() {
    let Some(path) = preferred_config_path() else {
        warn!("Could not determine config directory, using default settings");
        return;
    };
    if path.exists() {
        load_settings_from_path(&path);
    } else {
        info!("Settings file not found, creating with defaults at {path:?}");
        if let Ok(settings) = SETTINGS.read() {
            save_settings_to_file(&settings, &path);
        }
    }
}

fn load_settings_from_path(path: &PathBuf) {
    match fs::read_to_string(path) {
        Ok(content) => match serde_yaml::from_str::<Settings>(&content) {
            Ok(mut settings) => {
                debug!("Loaded settings from {path:?}");

                if settings.version < CURRENT_VERSION {
                    migrate_settings(&mut settings);
                    save_settings_to_file(&settings, path);
                }

                if let Ok(mut global) = SETTINGS.write() {
                    *global = settings;
                }
            }
            Err(e) => {
                error!("Failed to parse settings file {path:?}: {e}");
            }
        },
        Err(e) => {
            error!("Failed to read settings file {path:?}: {e}");
        }
    }
}

fn migrate_settings(settings: &mut Settings) {
    info!(
        "Migrating settings from v{} to v{}",
        settings.version, CURRENT_VERSION
    );

    settings.version = CURRENT_VERSION;
}

pub fn save_settings() {
    let Some(path) = preferred_config_path() else {
        warn!("Could not determine config directory, cannot save settings");
        return;
    };

    if let Ok(settings) = SETTINGS.read() {
        save_settings_to_file(&settings, &path);
    }
}

fn save_settings_to_file(settings: &Settings, path: &PathBuf) {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            if let Err(e) = fs::create_dir_all(parent) {
                error!("Failed to create config directory {parent:?}: {e}");
                return;
            }
        }
    }

    let content = generate_settings_yaml(settings);

    match fs::write(path, content) {
        Ok(()) => debug!("Saved settings to {path:?}"),
        Err(e) => error!("Failed to save settings to {path:?}: {e}"),
    }
}

fn generate_settings_yaml(settings: &Settings) -> String {
    let mut content = String::new();

    content.push_str(&format!("version: {}\n", settings.version));
    content.push_str(&format!("colour_map: \"{}\"\n", settings.colour_map));
    content.push_str(&format!("sampling: {}\n", settings.sampling));
    content.push_str(&format!("decay_threshold: {}\n", settings.decay_threshold));
    content.push_str(&format!("decay_factor: {}\n", settings.decay_factor));
    content.push('\n');

    content.push_str(CUSTOM_COLOUR_MAPS_TEMPLATE);

    if !settings.custom_colour_maps.is_empty() {
        content.push_str("custom_colour_maps:\n");
        for map in &settings.custom_colour_maps {
            content.push_str(&format!("  - name: \"{}\"\n", map.name));
            content.push_str(&format!("    colours: \"{}\"\n", map.colours));
        }
    } else {
        content.push_str("custom_colour_maps: []\n");
    }

    content
}

const CUSTOM_COLOUR_MAPS_TEMPLATE: &str = r##"# ============================================================================
# Custom Colour Maps
# ============================================================================
# Add your own colour maps below. Colours run from least to most activity,
# as comma-separated #RRGGBB or #RRGGBBAA values.
#
# Example:
#   - name: "ocean"
#     colours: "#000000, #042054, #2479bd, #7ec9e7, #ffffff"

"##;

// Public API for accessing/modifying settings

pub fn get_colour_map() -> String {
    SETTINGS
        .read()
        .map(|s| resolve_named(&s, &s.colour_map))
        .unwrap_or_else(|_| default_colour_map())
}

pub fn set_colour_map(name: &str) {
    if let Ok(mut settings) = SETTINGS.write() {
        settings.colour_map = name.to_string();
    }
    save_settings();
}

/// Expand a custom colour map name to its hex list, so callers only ever
/// deal in built-in names or inline hex specs.
pub fn resolve_custom_colour_map(name: &str) -> String {
    SETTINGS
        .read()
        .map(|s| resolve_named(&s, name))
        .unwrap_or_else(|_| name.to_string())
}

fn resolve_named(settings: &Settings, name: &str) -> String {
    settings
        .custom_colour_maps
        .iter()
        .find(|m| m.name == name)
        .map(|m| m.colours.clone())
        .unwrap_or_else(|| name.to_string())
}

pub fn get_sampling() -> u32 {
    SETTINGS
        .read()
        .map(|s| s.sampling)
        .unwrap_or_else(|_| default_sampling())
}

pub fn get_decay_threshold() -> u64 {
    SETTINGS
        .read()
        .map(|s| s.decay_threshold)
        .unwrap_or_else(|_| default_decay_threshold())
}

pub fn get_decay_factor() -> f64 {
    SETTINGS
        .read()
        .map(|s| s.decay_factor)
        .unwrap_or_else(|_| default_decay_factor())
}
