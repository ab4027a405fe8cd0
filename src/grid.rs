use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A (width, height) pair identifying one screen configuration's grid.
///
/// The derived `Ord` compares width first, so the "largest" of a set of
/// resolutions is the lexicographic maximum, which is what the render
/// pipeline's popularity vote relies on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn cells(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once('x')
            .ok_or_else(|| format!("invalid resolution '{s}'"))?;
        let width: u32 = w.parse().map_err(|_| format!("invalid width in '{s}'"))?;
        let height: u32 = h.parse().map_err(|_| format!("invalid height in '{s}'"))?;
        if width == 0 || height == 0 {
            return Err(format!("resolution '{s}' must be positive"));
        }
        Ok(Self { width, height })
    }
}

/// Dense counter storage that widens its integer type as values grow.
///
/// Counts start as `u8` and escalate through `u16`/`u32` to `u64` the
/// moment a write would no longer fit. The width never shrinks, even
/// after a decay pass scales every value down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CounterBuf {
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    U64(Vec<u64>),
}

impl CounterBuf {
    pub fn zeroed(len: usize) -> Self {
        CounterBuf::U8(vec![0; len])
    }

    pub fn len(&self) -> usize {
        match self {
            CounterBuf::U8(v) => v.len(),
            CounterBuf::U16(v) => v.len(),
            CounterBuf::U32(v) => v.len(),
            CounterBuf::U64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current storage width in bits.
    pub fn width_bits(&self) -> u32 {
        match self {
            CounterBuf::U8(_) => 8,
            CounterBuf::U16(_) => 16,
            CounterBuf::U32(_) => 32,
            CounterBuf::U64(_) => 64,
        }
    }

    fn max_representable(&self) -> u64 {
        match self {
            CounterBuf::U8(_) => u8::MAX as u64,
            CounterBuf::U16(_) => u16::MAX as u64,
            CounterBuf::U32(_) => u32::MAX as u64,
            CounterBuf::U64(_) => u64::MAX,
        }
    }

    pub fn get(&self, index: usize) -> u64 {
        match self {
            CounterBuf::U8(v) => v[index] as u64,
            CounterBuf::U16(v) => v[index] as u64,
            CounterBuf::U32(v) => v[index] as u64,
            CounterBuf::U64(v) => v[index],
        }
    }

    /// Write a value, escalating the storage width first if it would not
    /// fit. Existing values are preserved exactly across a widening.
    pub fn set(&mut self, index: usize, value: u64) {
        if value >= self.max_representable() {
            self.widen_for(value);
        }
        match self {
            CounterBuf::U8(v) => v[index] = value as u8,
            CounterBuf::U16(v) => v[index] = value as u16,
            CounterBuf::U32(v) => v[index] = value as u32,
            CounterBuf::U64(v) => v[index] = value,
        }
    }

    pub fn increment(&mut self, index: usize) {
        self.set(index, self.get(index) + 1);
    }

    fn widen_for(&mut self, value: u64) {
        let next = match self {
            // A large value may skip escalation rungs entirely.
            CounterBuf::U8(v) => {
                if value < u16::MAX as u64 {
                    CounterBuf::U16(v.iter().map(|&x| x as u16).collect())
                } else if value < u32::MAX as u64 {
                    CounterBuf::U32(v.iter().map(|&x| x as u32).collect())
                } else {
                    CounterBuf::U64(v.iter().map(|&x| x as u64).collect())
                }
            }
            CounterBuf::U16(v) => {
                if value < u32::MAX as u64 {
                    CounterBuf::U32(v.iter().map(|&x| x as u32).collect())
                } else {
                    CounterBuf::U64(v.iter().map(|&x| x as u64).collect())
                }
            }
            CounterBuf::U32(v) => CounterBuf::U64(v.iter().map(|&x| x as u64).collect()),
            CounterBuf::U64(_) => return,
        };
        *self = next;
    }

    /// Divide every value by `factor`, truncating toward zero. Used by the
    /// decay pass. The storage width is left unchanged.
    pub fn scale(&mut self, factor: f64) {
        match self {
            CounterBuf::U8(v) => v
                .iter_mut()
                .for_each(|x| *x = scaled_down(*x as u64, factor) as u8),
            CounterBuf::U16(v) => v
                .iter_mut()
                .for_each(|x| *x = scaled_down(*x as u64, factor) as u16),
            CounterBuf::U32(v) => v
                .iter_mut()
                .for_each(|x| *x = scaled_down(*x as u64, factor) as u32),
            CounterBuf::U64(v) => v.iter_mut().for_each(|x| *x = scaled_down(*x, factor)),
        }
    }

    pub fn max_value(&self) -> u64 {
        match self {
            CounterBuf::U8(v) => v.iter().copied().max().unwrap_or(0) as u64,
            CounterBuf::U16(v) => v.iter().copied().max().unwrap_or(0) as u64,
            CounterBuf::U32(v) => v.iter().copied().max().unwrap_or(0) as u64,
            CounterBuf::U64(v) => v.iter().copied().max().unwrap_or(0),
        }
    }

    pub fn count_nonzero(&self) -> usize {
        match self {
            CounterBuf::U8(v) => v.iter().filter(|&&x| x != 0).count(),
            CounterBuf::U16(v) => v.iter().filter(|&&x| x != 0).count(),
            CounterBuf::U32(v) => v.iter().filter(|&&x| x != 0).count(),
            CounterBuf::U64(v) => v.iter().filter(|&&x| x != 0).count(),
        }
    }

    pub fn iter_values(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.len()).map(move |i| self.get(i))
    }
}

/// Divide and truncate toward zero, nudged upward by one part in 10^12 so
/// quotients that are exact in rational arithmetic are not lost to float
/// error: 1100 / 1.1 is 1000, not the 999.999... the bare division gives.
pub(crate) fn scaled_down(value: u64, factor: f64) -> u64 {
    (value as f64 / factor * (1.0 + 1e-12)) as u64
}

/// A dense 2-D grid of non-negative counts for one screen resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterGrid {
    resolution: Resolution,
    buf: CounterBuf,
}

impl CounterGrid {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            buf: CounterBuf::zeroed(resolution.cells()),
            resolution,
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn width_bits(&self) -> u32 {
        self.buf.width_bits()
    }

    fn index(&self, x: u32, y: u32) -> usize {
        // Callers are expected to have validated against this grid's own
        // resolution; anything else is a programming error.
        assert!(
            x < self.resolution.width && y < self.resolution.height,
            "grid index ({}, {}) out of bounds for {}",
            x,
            y,
            self.resolution
        );
        y as usize * self.resolution.width as usize + x as usize
    }

    pub fn get(&self, x: u32, y: u32) -> u64 {
        self.buf.get(self.index(x, y))
    }

    pub fn set(&mut self, x: u32, y: u32, value: u64) {
        let i = self.index(x, y);
        self.buf.set(i, value);
    }

    pub fn increment(&mut self, x: u32, y: u32) {
        let i = self.index(x, y);
        self.buf.increment(i);
    }

    pub fn scale(&mut self, factor: f64) {
        self.buf.scale(factor);
    }

    pub fn max_value(&self) -> u64 {
        self.buf.max_value()
    }

    pub fn count_nonzero(&self) -> usize {
        self.buf.count_nonzero()
    }

    /// Row-major values, for the render pipeline.
    pub fn iter_values(&self) -> impl Iterator<Item = u64> + '_ {
        self.buf.iter_values()
    }

    pub fn is_all_zero(&self) -> bool {
        self.buf.count_nonzero() == 0
    }
}

/// Lazily populated mapping from resolution to counter grid.
///
/// Referencing an absent key materializes a zero grid, so lookups never
/// fail. Grids persist for the lifetime of the aggregate; there is no
/// eviction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GridMap {
    grids: BTreeMap<Resolution, CounterGrid>,
}

impl GridMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&mut self, resolution: Resolution) -> &mut CounterGrid {
        self.grids
            .entry(resolution)
            .or_insert_with(|| CounterGrid::new(resolution))
    }

    pub fn get(&self, resolution: Resolution) -> Option<&CounterGrid> {
        self.grids.get(&resolution)
    }

    pub fn insert(&mut self, grid: CounterGrid) {
        self.grids.insert(grid.resolution(), grid);
    }

    pub fn iter(&self) -> impl Iterator<Item = (Resolution, &CounterGrid)> {
        self.grids.iter().map(|(&res, grid)| (res, grid))
    }

    pub fn len(&self) -> usize {
        self.grids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grids.is_empty()
    }

    pub fn scale_all(&mut self, factor: f64) {
        for grid in self.grids.values_mut() {
            grid.scale(factor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_after_set_survives_widening() {
        let mut buf = CounterBuf::zeroed(4);
        buf.set(0, 200);
        assert_eq!(buf.get(0), 200);
        buf.set(1, 70_000);
        assert_eq!(buf.get(0), 200);
        assert_eq!(buf.get(1), 70_000);
        buf.set(2, 5_000_000_000);
        assert_eq!(buf.get(0), 200);
        assert_eq!(buf.get(1), 70_000);
        assert_eq!(buf.get(2), 5_000_000_000);
        assert_eq!(buf.width_bits(), 64);
    }

    #[test]
    fn test_widening_triggers_at_current_max() {
        let mut buf = CounterBuf::zeroed(1);
        buf.set(0, 254);
        assert_eq!(buf.width_bits(), 8);
        // Writing the u8 max itself escalates, so the stored value always
        // stays strictly below the width's ceiling.
        buf.set(0, 255);
        assert_eq!(buf.width_bits(), 16);
        assert_eq!(buf.get(0), 255);
    }

    #[test]
    fn test_three_hundred_increments_widen_without_wraparound() {
        let mut grid = CounterGrid::new(Resolution::new(4, 4));
        assert_eq!(grid.width_bits(), 8);
        for _ in 0..300 {
            grid.increment(2, 3);
        }
        assert_eq!(grid.get(2, 3), 300);
        assert!(grid.width_bits() >= 16);
    }

    #[test]
    fn test_scale_floors_and_never_narrows() {
        let mut buf = CounterBuf::zeroed(3);
        buf.set(0, 1000);
        buf.set(1, 11);
        assert_eq!(buf.width_bits(), 16);
        buf.scale(1.1);
        assert_eq!(buf.get(0), 909); // floor(1000 / 1.1)
        assert_eq!(buf.get(1), 10);
        assert_eq!(buf.get(2), 0);
        assert_eq!(buf.width_bits(), 16);
    }

    #[test]
    fn test_scale_exact_quotients_survive_float_division() {
        // 1100 / 1.1 and 121 / 1.1 are exact; the bare f64 quotient lands
        // a hair under the integer and must not truncate to one less.
        let mut buf = CounterBuf::zeroed(2);
        buf.set(0, 1100);
        buf.set(1, 121);
        buf.scale(1.1);
        assert_eq!(buf.get(0), 1000);
        assert_eq!(buf.get(1), 110);
    }

    #[test]
    fn test_grid_starts_zeroed() {
        let grid = CounterGrid::new(Resolution::new(8, 2));
        assert!(grid.is_all_zero());
        assert_eq!(grid.get(7, 1), 0);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_out_of_bounds_index_panics() {
        let grid = CounterGrid::new(Resolution::new(4, 4));
        grid.get(4, 0);
    }

    #[test]
    fn test_grid_map_read_or_create() {
        let mut map = GridMap::new();
        assert!(map.is_empty());
        let res = Resolution::new(1920, 1080);
        map.get_or_create(res).increment(10, 20);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(res).unwrap().get(10, 20), 1);
        // Second reference reuses the same grid.
        map.get_or_create(res).increment(10, 20);
        assert_eq!(map.get(res).unwrap().get(10, 20), 2);
    }

    #[test]
    fn test_resolution_parse_and_display() {
        let res: Resolution = "2560x1440".parse().unwrap();
        assert_eq!(res, Resolution::new(2560, 1440));
        assert_eq!(res.to_string(), "2560x1440");
        assert!("800x".parse::<Resolution>().is_err());
        assert!("0x600".parse::<Resolution>().is_err());
        assert!("no".parse::<Resolution>().is_err());
    }

    #[test]
    fn test_largest_resolution_is_lexicographic_max() {
        let a = Resolution::new(1920, 1080);
        let b = Resolution::new(800, 600);
        assert!(a > b);
    }
}
