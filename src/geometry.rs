use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::grid::Resolution;

/// A pixel position in global screen coordinates.
pub type Point = (i32, i32);

/// One monitor's rectangle in global screen space. The far edges are
/// exclusive: a pixel `p` is inside when `x1 <= p.0 < x2` and
/// `y1 <= p.1 < y2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorRect {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl MonitorRect {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn contains(&self, pixel: Point) -> bool {
        self.x1 <= pixel.0 && pixel.0 < self.x2 && self.y1 <= pixel.1 && pixel.1 < self.y2
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new((self.x2 - self.x1) as u32, (self.y2 - self.y1) as u32)
    }
}

/// A global pixel resolved against a monitor: which resolution's grid it
/// belongs to, and its local index inside that grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocatedPixel {
    pub resolution: Resolution,
    pub x: u32,
    pub y: u32,
}

/// Ordered, non-overlapping monitor rectangles. Replaced wholesale when
/// the display configuration changes; a stale layout makes `locate` fail
/// for pixels that no longer map to any monitor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorLayout {
    rects: Vec<MonitorRect>,
}

impl MonitorLayout {
    pub fn new(rects: Vec<MonitorRect>) -> Self {
        Self { rects }
    }

    /// A single monitor anchored at the origin.
    pub fn single(width: u32, height: u32) -> Self {
        Self::new(vec![MonitorRect::new(0, 0, width as i32, height as i32)])
    }

    pub fn rects(&self) -> &[MonitorRect] {
        &self.rects
    }

    pub fn replace(&mut self, rects: Vec<MonitorRect>) {
        self.rects = rects;
    }

    pub fn locate(&self, pixel: Point) -> Result<LocatedPixel> {
        for rect in &self.rects {
            if rect.contains(pixel) {
                return Ok(LocatedPixel {
                    resolution: rect.resolution(),
                    x: (pixel.0 - rect.x1) as u32,
                    y: (pixel.1 - rect.y1) as u32,
                });
            }
        }
        Err(Error::OutOfBounds(pixel.0, pixel.1))
    }
}

/// Euclidean distance between two pixel positions.
pub fn distance(a: Point, b: Point) -> f64 {
    let dx = (a.0 - b.0) as f64;
    let dy = (a.1 - b.1) as f64;
    (dx * dx + dy * dy).sqrt()
}

/// Rasterize the straight line from `a` to `b` into pixel coordinates,
/// inclusive of both endpoints and ordered from `a` to `b`. Bresenham over
/// all octants, so a fast movement between two ticks still paints every
/// intermediate pixel.
pub fn line_between(a: Point, b: Point) -> Vec<Point> {
    let (mut x, mut y) = a;
    let dx = (b.0 - a.0).abs();
    let dy = -(b.1 - a.1).abs();
    let sx = if a.0 < b.0 { 1 } else { -1 };
    let sy = if a.1 < b.1 { 1 } else { -1 };
    let mut err = dx + dy;

    let mut pixels = Vec::with_capacity((dx.max(-dy) + 1) as usize);
    loop {
        pixels.push((x, y));
        if (x, y) == b {
            return pixels;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_horizontal_line_visits_every_pixel_in_order() {
        assert_eq!(
            line_between((0, 0), (3, 0)),
            vec![(0, 0), (1, 0), (2, 0), (3, 0)]
        );
    }

    #[test]
    fn test_line_is_inclusive_of_both_ends() {
        assert_eq!(line_between((5, 5), (5, 5)), vec![(5, 5)]);
        let px = line_between((2, 7), (2, 4));
        assert_eq!(px.first(), Some(&(2, 7)));
        assert_eq!(px.last(), Some(&(2, 4)));
        assert_eq!(px.len(), 4);
    }

    #[test]
    fn test_diagonal_line() {
        assert_eq!(
            line_between((0, 0), (3, 3)),
            vec![(0, 0), (1, 1), (2, 2), (3, 3)]
        );
    }

    #[test]
    fn test_shallow_line_paints_intermediate_pixels() {
        let px = line_between((0, 0), (6, 2));
        assert_eq!(px.first(), Some(&(0, 0)));
        assert_eq!(px.last(), Some(&(6, 2)));
        assert_eq!(px.len(), 7);
        // x advances by one each step on a shallow slope
        for (i, p) in px.iter().enumerate() {
            assert_eq!(p.0, i as i32);
        }
    }

    #[test]
    fn test_distance() {
        assert_eq!(distance((0, 0), (3, 4)), 5.0);
        assert_eq!(distance((1, 1), (1, 1)), 0.0);
    }

    #[test]
    fn test_locate_within_offset_monitor() {
        let layout = MonitorLayout::new(vec![
            MonitorRect::new(0, 0, 1920, 1080),
            MonitorRect::new(1920, 0, 2720, 600),
        ]);
        let hit = layout.locate((1930, 10)).unwrap();
        assert_eq!(hit.resolution, Resolution::new(800, 600));
        assert_eq!((hit.x, hit.y), (10, 10));
    }

    #[test]
    fn test_locate_far_edges_are_exclusive() {
        let layout = MonitorLayout::single(100, 100);
        assert!(layout.locate((99, 99)).is_ok());
        assert!(matches!(
            layout.locate((100, 50)),
            Err(Error::OutOfBounds(100, 50))
        ));
    }

    #[test]
    fn test_locate_outside_all_monitors_fails() {
        let layout = MonitorLayout::single(1920, 1080);
        assert!(matches!(
            layout.locate((-5, 20)),
            Err(Error::OutOfBounds(-5, 20))
        ));
    }
}
