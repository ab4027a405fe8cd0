//! The heatmap render pipeline: resolution inference, rescaling,
//! linearization, blur, compositing and colour lookup.

use std::collections::BTreeMap;

use image::RgbaImage;
use log::debug;

use crate::colours::{self, Rgba};
use crate::error::{Error, Result};
use crate::grid::{CounterGrid, Resolution};
use crate::messages::RenderKind;

/// A dense working array of `f64` values, row major. Grids are converted
/// to planes at the start of a render so the pipeline never observes a
/// grid mid-mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct Plane {
    width: usize,
    height: usize,
    data: Vec<f64>,
}

impl Plane {
    pub fn zeros(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width * height],
        }
    }

    pub fn from_grid(grid: &CounterGrid) -> Self {
        Self {
            width: grid.resolution().width as usize,
            height: grid.resolution().height as usize,
            data: grid.iter_values().map(|v| v as f64).collect(),
        }
    }

    /// Like `from_grid`, subtracting `offset` from each cell and clamping
    /// at zero. Used for renders relative to a pause point.
    pub fn from_grid_offset(grid: &CounterGrid, offset: u64) -> Self {
        Self {
            width: grid.resolution().width as usize,
            height: grid.resolution().height as usize,
            data: grid
                .iter_values()
                .map(|v| v.saturating_sub(offset) as f64)
                .collect(),
        }
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width as u32, self.height as u32)
    }

    pub fn max(&self) -> f64 {
        self.data.iter().copied().fold(0.0, f64::max)
    }

    pub fn count_nonzero(&self) -> usize {
        self.data.iter().filter(|&&v| v > 0.0).count()
    }

    fn at(&self, x: usize, y: usize) -> f64 {
        self.data[y * self.width + x]
    }
}

/// How same-position planes are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombineMode {
    /// Element-wise maximum, for time and speed renders.
    Max,
    /// Element-wise sum, for click renders.
    Sum,
}

impl RenderKind {
    pub fn combine_mode(self) -> CombineMode {
        match self {
            RenderKind::Time | RenderKind::TimeSincePause | RenderKind::Speed => CombineMode::Max,
            RenderKind::SingleClick | RenderKind::DoubleClick | RenderKind::HeldClick => {
                CombineMode::Sum
            }
        }
    }

    /// Click heatmaps are linearized and blurred into continuous-looking
    /// density; time and speed maps stay raw.
    pub fn linearize(self) -> bool {
        self.combine_mode() == CombineMode::Sum
    }

    pub fn blur(self) -> bool {
        self.combine_mode() == CombineMode::Sum
    }
}

/// Parameters for one render.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub sampling: u32,
    pub combine: CombineMode,
    pub linear: bool,
    pub blur: bool,
}

impl RenderOptions {
    pub fn for_kind(kind: RenderKind) -> Self {
        Self {
            width: None,
            height: None,
            sampling: 1,
            combine: kind.combine_mode(),
            linear: kind.linearize(),
            blur: kind.blur(),
        }
    }
}

/// Pick the target resolution from the input planes by popularity voting:
/// each distinct resolution is scored by its nonzero cell count, and the
/// winner is the largest resolution among those within 90% of the maximum
/// score. A slightly-less-popular but larger-area resolution beats a
/// smaller, more popular one.
pub fn infer_target_resolution(
    planes: &[&Plane],
    width: Option<u32>,
    height: Option<u32>,
) -> Result<(u32, u32)> {
    if let (Some(w), Some(h)) = (width, height) {
        return Ok((w, h));
    }

    let mut popularity: BTreeMap<Resolution, usize> = BTreeMap::new();
    for plane in planes {
        *popularity.entry(plane.resolution()).or_default() += plane.count_nonzero();
    }
    if popularity.is_empty() {
        return Err(Error::EmptyInput);
    }

    let max_popularity = popularity.values().copied().max().unwrap_or(0);
    let threshold = max_popularity as f64 * 0.9;
    let inferred = popularity
        .iter()
        .filter(|&(_, &count)| count as f64 >= threshold)
        .map(|(&res, _)| res)
        .max()
        .expect("at least one resolution passes its own threshold");

    match (width, height) {
        (None, None) => Ok((inferred.width, inferred.height)),
        (None, Some(h)) => {
            let aspect = inferred.width as f64 / inferred.height as f64;
            Ok(((h as f64 * aspect) as u32, h))
        }
        (Some(w), None) => {
            let aspect = inferred.width as f64 / inferred.height as f64;
            Ok((w, (w as f64 / aspect) as u32))
        }
        (Some(w), Some(h)) => Ok((w, h)),
    }
}

/// Combine positional planes into a single false-colour image.
///
/// Positions hold the draw offset for compositing, e.g. `(0, 0)` and
/// `(1, 0)` render two input channels side by side.
pub fn render(
    colour_map: &str,
    positional: &BTreeMap<(u32, u32), Vec<Plane>>,
    opts: &RenderOptions,
) -> Result<RgbaImage> {
    let all_planes: Vec<&Plane> = positional.values().flatten().collect();
    let (width, height) = if all_planes.is_empty() {
        match (opts.width, opts.height) {
            (Some(w), Some(h)) => (w, h),
            _ => return Err(Error::EmptyInput),
        }
    } else {
        infer_target_resolution(&all_planes, opts.width, opts.height)?
    };

    let sampling = opts.sampling.max(1);
    let scale_width = (width * sampling) as usize;
    let scale_height = (height * sampling) as usize;
    debug!(
        "rendering {} position(s) at {}x{} (sampling {})",
        positional.len(),
        scale_width,
        scale_height,
        sampling
    );

    // Rescale to the target size and merge each position's planes.
    let mut combined: BTreeMap<(u32, u32), Plane> = BTreeMap::new();
    for (&pos, planes) in positional {
        if planes.is_empty() {
            continue;
        }
        let rescaled: Vec<Plane> = planes
            .iter()
            .map(|p| rescale(p, scale_width, scale_height))
            .collect();
        combined.insert(pos, combine_planes(&rescaled, opts.combine));
    }

    if opts.linear {
        for plane in combined.values_mut() {
            linearize(plane);
        }
    }

    if opts.blur {
        let sigma = gaussian_sigma(scale_width, scale_height);
        for plane in combined.values_mut() {
            gaussian_blur(plane, sigma);
        }
    }

    // Equalize the per-position maxima so one region does not dominate
    // purely because it has more samples.
    if combined.len() > 1 {
        let max_value = combined.values().map(Plane::max).fold(0.0, f64::max);
        for plane in combined.values_mut() {
            let own_max = plane.max();
            if own_max > 0.0 && own_max != max_value {
                let factor = max_value / own_max;
                plane.data.iter_mut().for_each(|v| *v *= factor);
            }
        }
    }

    let canvas = composite(&combined, scale_width, scale_height)?;
    let normalized = normalize_u8(&canvas);

    let lookup = colours::build_lookup(&colours::resolve_or_transparent(colour_map));
    Ok(colourize(
        &normalized,
        canvas.width as u32,
        canvas.height as u32,
        &lookup,
    ))
}

/// Rescale with the correct filtering: nearest-neighbour when scaling up
/// (no invented fractional hit counts), max-pool plus evenly spaced index
/// selection when scaling down (no rare high-value cell is lost to
/// averaging).
pub fn rescale(plane: &Plane, target_width: usize, target_height: usize) -> Plane {
    let (input_width, input_height) = (plane.width, plane.height);

    if target_width == input_width && target_height == input_height {
        return plane.clone();
    }

    if target_width > input_width || target_height > input_height {
        let mut out = Plane::zeros(target_width, target_height);
        for y in 0..target_height {
            let src_y = y * input_height / target_height;
            for x in 0..target_width {
                let src_x = x * input_width / target_width;
                out.data[y * target_width + x] = plane.at(src_x, src_y);
            }
        }
        return out;
    }

    let block_width = input_width.div_ceil(target_width);
    let block_height = input_height.div_ceil(target_height);
    let pooled = max_pool(plane, block_width, block_height);

    let xs = linspace_indices(input_width, target_width);
    let ys = linspace_indices(input_height, target_height);
    let mut out = Plane::zeros(target_width, target_height);
    for (oy, &sy) in ys.iter().enumerate() {
        for (ox, &sx) in xs.iter().enumerate() {
            out.data[oy * target_width + ox] = pooled.at(sx, sy);
        }
    }
    out
}

/// Sliding-window maximum filter with a centered window, clamped at the
/// edges.
fn max_pool(plane: &Plane, window_width: usize, window_height: usize) -> Plane {
    let mut out = Plane::zeros(plane.width, plane.height);
    let half_w = window_width / 2;
    let half_h = window_height / 2;
    for y in 0..plane.height {
        let y0 = y.saturating_sub(half_h);
        let y1 = (y0 + window_height).min(plane.height);
        for x in 0..plane.width {
            let x0 = x.saturating_sub(half_w);
            let x1 = (x0 + window_width).min(plane.width);
            let mut best = f64::MIN;
            for sy in y0..y1 {
                for sx in x0..x1 {
                    best = best.max(plane.at(sx, sy));
                }
            }
            out.data[y * plane.width + x] = best;
        }
    }
    out
}

/// `count` evenly spaced indices into `0..len`, including both endpoints.
fn linspace_indices(len: usize, count: usize) -> Vec<usize> {
    if count <= 1 {
        return vec![0];
    }
    (0..count)
        .map(|i| i * (len - 1) / (count - 1))
        .collect()
}

fn combine_planes(planes: &[Plane], mode: CombineMode) -> Plane {
    let mut result = planes[0].clone();
    for plane in &planes[1..] {
        for (dst, &src) in result.data.iter_mut().zip(&plane.data) {
            match mode {
                CombineMode::Max => *dst = dst.max(src),
                CombineMode::Sum => *dst += src,
            }
        }
    }
    result
}

/// Replace each value by its 0-based rank among the distinct values
/// present, so the visual gradient reflects frequency rank rather than raw
/// magnitude.
pub fn linearize(plane: &mut Plane) {
    let mut distinct: Vec<f64> = plane.data.clone();
    distinct.sort_by(f64::total_cmp);
    distinct.dedup();
    for value in plane.data.iter_mut() {
        let rank = distinct
            .binary_search_by(|probe| probe.total_cmp(value))
            .expect("value came from the same array");
        *value = rank as f64;
    }
}

/// Blur amount for a given resolution.
pub fn gaussian_sigma(width: usize, height: usize) -> f64 {
    (width.min(height) as f64 * 0.0125).round()
}

/// Separable Gaussian smoothing with edge clamping. A sigma of zero is a
/// no-op.
pub fn gaussian_blur(plane: &mut Plane, sigma: f64) {
    if sigma <= 0.0 {
        return;
    }
    let radius = (4.0 * sigma + 0.5) as usize;
    let mut kernel = Vec::with_capacity(2 * radius + 1);
    for i in 0..=2 * radius {
        let d = i as f64 - radius as f64;
        kernel.push((-d * d / (2.0 * sigma * sigma)).exp());
    }
    let sum: f64 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= sum);

    let (w, h) = (plane.width, plane.height);
    let clamp = |v: i64, max: usize| v.clamp(0, max as i64 - 1) as usize;

    // Horizontal pass.
    let mut tmp = vec![0.0; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sx = clamp(x as i64 + k as i64 - radius as i64, w);
                acc += plane.at(sx, y) * weight;
            }
            tmp[y * w + x] = acc;
        }
    }
    // Vertical pass.
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sy = clamp(y as i64 + k as i64 - radius as i64, h);
                acc += tmp[sy * w + x] * weight;
            }
            plane.data[y * w + x] = acc;
        }
    }
}

/// Tile each position's plane into one canvas at an offset of
/// `position * scaled-size`.
fn composite(
    positional: &BTreeMap<(u32, u32), Plane>,
    scale_width: usize,
    scale_height: usize,
) -> Result<Plane> {
    if positional.is_empty() {
        return Ok(Plane::zeros(scale_width, scale_height));
    }

    let mut shapes = positional.values().map(|p| (p.width, p.height));
    let first = shapes.next().expect("non-empty");
    for shape in shapes {
        if shape != first {
            return Err(Error::ShapeMismatch(first.0, first.1, shape.0, shape.1));
        }
    }

    let min_col = positional.keys().map(|p| p.0).min().unwrap_or(0);
    let max_col = positional.keys().map(|p| p.0).max().unwrap_or(0);
    let min_row = positional.keys().map(|p| p.1).min().unwrap_or(0);
    let max_row = positional.keys().map(|p| p.1).max().unwrap_or(0);
    let total_width = scale_width * (max_col - min_col + 1) as usize;
    let total_height = scale_height * (max_row - min_row + 1) as usize;

    let mut canvas = Plane::zeros(total_width, total_height);
    for (&(col, row), plane) in positional {
        let x_off = (col - min_col) as usize * scale_width;
        let y_off = (row - min_row) as usize * scale_height;
        for y in 0..plane.height {
            let dst = (y_off + y) * total_width + x_off;
            canvas.data[dst..dst + plane.width]
                .copy_from_slice(&plane.data[y * plane.width..(y + 1) * plane.width]);
        }
    }
    Ok(canvas)
}

/// Linear rescale so the maximum maps to 255. An all-zero plane maps to
/// all-zero output rather than dividing by zero.
fn normalize_u8(plane: &Plane) -> Vec<u8> {
    let max = plane.max();
    if max <= 0.0 {
        return vec![0; plane.data.len()];
    }
    // Divide first: v == max gives exactly 1.0, so the top cell always
    // lands on 255 instead of truncating to 254.
    plane
        .data
        .iter()
        .map(|&v| (v / max * 255.0) as u8)
        .collect()
}

fn colourize(normalized: &[u8], width: u32, height: u32, lookup: &[Rgba]) -> RgbaImage {
    let mut raw = Vec::with_capacity(normalized.len() * 4);
    for &v in normalized {
        raw.extend_from_slice(&lookup[v as usize]);
    }
    RgbaImage::from_raw(width, height, raw).expect("canvas dimensions match raw buffer")
}
