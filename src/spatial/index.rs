//! Uniform grid index for nearest-neighbour search in planar metres.

use std::collections::HashMap;

/// A keyed point in EPSG:27700.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub id: String,
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(id: impl Into<String>, x: f64, y: f64) -> Self {
        Self {
            id: id.into(),
            x,
            y,
        }
    }

    pub fn distance_to(&self, x: f64, y: f64) -> f64 {
        (self.x - x).hypot(self.y - y)
    }
}

/// Points bucketed into square cells.
///
/// With the cell size at least the search radius, every candidate within
/// the radius lies in the 3x3 block of cells around the query.
pub struct GridIndex {
    cell_size: f64,
    cells: HashMap<(i64, i64), Vec<usize>>,
    points: Vec<Point>,
}

impl GridIndex {
    pub fn build(points: Vec<Point>, cell_size: f64) -> Self {
        let cell_size = if cell_size.is_finite() && cell_size >= 1.0 {
            cell_size
        } else {
            1.0
        };
        let mut cells: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
        for (i, p) in points.iter().enumerate() {
            cells.entry(cell_of(cell_size, p.x, p.y)).or_default().push(i);
        }
        Self {
            cell_size,
            cells,
            points,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Nearest point within `max_distance` of `(x, y)`. Equal distances
    /// resolve to the lexicographically smallest id.
    ///
    /// `max_distance` must not exceed the cell size the index was built with.
    pub fn nearest(&self, x: f64, y: f64, max_distance: f64) -> Option<(&Point, f64)> {
        debug_assert!(max_distance <= self.cell_size);
        let (cx, cy) = cell_of(self.cell_size, x, y);
        let mut best: Option<(&Point, f64)> = None;

        for dx in -1..=1 {
            for dy in -1..=1 {
                let Some(bucket) = self.cells.get(&(cx + dx, cy + dy)) else {
                    continue;
                };
                for &i in bucket {
                    let candidate = &self.points[i];
                    let d = candidate.distance_to(x, y);
                    if d > max_distance {
                        continue;
                    }
                    best = match best {
                        Some((current, bd))
                            if bd < d || (bd == d && current.id <= candidate.id) =>
                        {
                            Some((current, bd))
                        }
                        _ => Some((candidate, d)),
                    };
                }
            }
        }
        best
    }
}

fn cell_of(cell_size: f64, x: f64, y: f64) -> (i64, i64) {
    ((x / cell_size).floor() as i64, (y / cell_size).floor() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brute_force<'a>(points: &'a [Point], x: f64, y: f64, max: f64) -> Option<(&'a Point, f64)> {
        points
            .iter()
            .map(|p| (p, p.distance_to(x, y)))
            .filter(|(_, d)| *d <= max)
            .min_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.id.cmp(&b.0.id)))
    }

    /// Small deterministic generator so the test needs no extra crates.
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self) -> f64 {
            self.0 = self
                .0
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (self.0 >> 11) as f64 / (1u64 << 53) as f64
        }
    }

    #[test]
    fn test_matches_brute_force() {
        let mut rng = Lcg(42);
        let points: Vec<Point> = (0..500)
            .map(|i| Point::new(format!("P{:04}", i), rng.next() * 20_000.0, rng.next() * 20_000.0))
            .collect();
        let index = GridIndex::build(points.clone(), 1000.0);

        for _ in 0..300 {
            let (x, y) = (rng.next() * 20_000.0, rng.next() * 20_000.0);
            let got = index.nearest(x, y, 1000.0).map(|(p, d)| (p.id.clone(), d));
            let want = brute_force(&points, x, y, 1000.0).map(|(p, d)| (p.id.clone(), d));
            assert_eq!(got, want, "query ({x}, {y})");
        }
    }

    #[test]
    fn test_threshold_and_ties() {
        let index = GridIndex::build(
            vec![
                Point::new("B", 10.0, 0.0),
                Point::new("A", -10.0, 0.0),
                Point::new("far", 500.0, 0.0),
            ],
            100.0,
        );

        let (p, d) = index.nearest(0.0, 0.0, 100.0).unwrap();
        assert_eq!(p.id, "A");
        assert_eq!(d, 10.0);

        assert!(index.nearest(300.0, 0.0, 100.0).is_none());
        // Exactly on the threshold still links.
        assert_eq!(index.nearest(400.0, 0.0, 100.0).unwrap().0.id, "far");
    }

    #[test]
    fn test_negative_coordinates_and_cell_edges() {
        let index = GridIndex::build(vec![Point::new("edge", -0.5, 999.9)], 1000.0);
        assert!(index.nearest(0.4, 1000.1, 1000.0).is_some());
        assert!(GridIndex::build(Vec::new(), 10.0).nearest(0.0, 0.0, 10.0).is_none());
    }
}
