//! Named colour maps and the 256-entry lookup tables built from them.

use log::warn;

/// One RGBA control colour.
pub type Rgba = [u8; 4];

pub const LOOKUP_STEPS: usize = 256;

/// Resolve a colour map name to its ordered control colours.
///
/// Accepts either a built-in name or a custom comma-separated list of hex
/// colours (`#RRGGBB` or `#RRGGBBAA`). Returns `None` when the name is
/// unknown or the custom list fails to parse.
pub fn resolve_colour_map(name: &str) -> Option<Vec<Rgba>> {
    if name.contains('#') {
        return parse_custom_map(name);
    }
    let controls: &[Rgba] = match name.to_ascii_lowercase().as_str() {
        "ice" => &[
            [0, 0, 0, 255],
            [4, 32, 84, 255],
            [36, 121, 189, 255],
            [126, 201, 231, 255],
            [255, 255, 255, 255],
        ],
        "citrus" => &[
            [0, 0, 0, 255],
            [32, 80, 16, 255],
            [128, 190, 28, 255],
            [245, 230, 60, 255],
            [255, 255, 255, 255],
        ],
        "sunburst" => &[
            [0, 0, 0, 255],
            [80, 8, 8, 255],
            [198, 48, 16, 255],
            [255, 154, 0, 255],
            [255, 236, 170, 255],
        ],
        "demon" => &[
            [0, 0, 0, 255],
            [80, 0, 32, 255],
            [180, 0, 64, 255],
            [255, 72, 72, 255],
            [255, 255, 255, 255],
        ],
        "chalk" => &[[0, 0, 0, 255], [255, 255, 255, 255]],
        "grayscale" | "greyscale" => &[[0, 0, 0, 255], [255, 255, 255, 255]],
        "transparent" => &[[0, 0, 0, 0]],
        _ => return None,
    };
    Some(controls.to_vec())
}

/// Resolve a colour map for rendering. An unknown name degrades to a fully
/// transparent single-colour table rather than failing the render.
pub fn resolve_or_transparent(name: &str) -> Vec<Rgba> {
    match resolve_colour_map(name) {
        Some(controls) => controls,
        None => {
            warn!("unknown colour map '{name}', falling back to transparent");
            vec![[0, 0, 0, 0]]
        }
    }
}

fn parse_custom_map(spec: &str) -> Option<Vec<Rgba>> {
    let mut controls = Vec::new();
    for part in spec.split(',') {
        controls.push(parse_hex_colour(part.trim())?);
    }
    if controls.is_empty() { None } else { Some(controls) }
}

fn parse_hex_colour(s: &str) -> Option<Rgba> {
    let hex = s.strip_prefix('#')?;
    let byte = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
    match hex.len() {
        6 => Some([byte(0)?, byte(2)?, byte(4)?, 255]),
        8 => Some([byte(0)?, byte(2)?, byte(4)?, byte(6)?]),
        _ => None,
    }
}

/// Build a 256-entry lookup table by piecewise-linear interpolation between
/// the control colours. When the step count does not divide evenly, the
/// remainder steps are distributed across the leading segments.
pub fn build_lookup(controls: &[Rgba]) -> Vec<Rgba> {
    let mut controls = controls.to_vec();
    if controls.is_empty() {
        controls.push([0, 0, 0, 0]);
    }
    if controls.len() == 1 {
        let only = controls[0];
        controls.push(only);
    }

    let mut lookup = vec![[0u8; 4]; LOOKUP_STEPS];
    let transitions = controls.len() - 1;
    let steps_per_transition = LOOKUP_STEPS / transitions;
    let remaining = LOOKUP_STEPS % transitions;

    let mut start_index = 0;
    for i in 0..transitions {
        let start = controls[i];
        let end = controls[i + 1];
        let current_steps = steps_per_transition + usize::from(i < remaining);

        for j in 0..current_steps {
            let t = if current_steps > 1 {
                j as f64 / (current_steps - 1) as f64
            } else {
                0.0
            };
            let mut colour = [0u8; 4];
            for c in 0..4 {
                let v = (1.0 - t) * start[c] as f64 + t * end[c] as f64;
                colour[c] = v.round() as u8;
            }
            lookup[start_index + j] = colour;
        }
        start_index += current_steps;
    }

    lookup
}
