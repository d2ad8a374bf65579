//! Wall geometry
//!
//! Walls are line segments. Agents query distances and outward normals,
//! hazards query line of sight, and the grid engines rasterize the segments
//! into a cell mask.

use crate::field::GridSpec;

pub type Point = [f32; 2];

/// Distance under which a point counts as inside a wall.
pub const WALL_HALF_THICKNESS: f32 = 0.15;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Wall {
    pub start: Point,
    pub end: Point,
}

/// Closest approach of a point to a wall. `normal` is the unit vector from
/// the wall toward the point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WallContact {
    pub distance: f32,
    pub normal: [f32; 2],
}

#[derive(Clone, Debug)]
pub struct Geometry {
    walls: Vec<Wall>,
    pub width: f32,
    pub height: f32,
}

impl Geometry {
    pub fn new(walls: &[[Point; 2]], domain: [f32; 2]) -> Self {
        Self {
            walls: walls
                .iter()
                .map(|[start, end]| Wall { start: *start, end: *end })
                .collect(),
            width: domain[0],
            height: domain[1],
        }
    }

    pub fn walls(&self) -> &[Wall] {
        &self.walls
    }

    pub fn contains(&self, p: Point) -> bool {
        p[0] >= 0.0 && p[0] <= self.width && p[1] >= 0.0 && p[1] <= self.height
    }

    pub fn clamp(&self, p: Point, margin: f32) -> Point {
        [
            p[0].clamp(margin, (self.width - margin).max(margin)),
            p[1].clamp(margin, (self.height - margin).max(margin)),
        ]
    }

    pub fn contact(wall: &Wall, p: Point) -> WallContact {
        let (distance, closest) = point_segment_distance(p, wall.start, wall.end);
        let (dx, dy) = (p[0] - closest[0], p[1] - closest[1]);
        let normal = if distance > 1e-6 {
            [dx / distance, dy / distance]
        } else {
            // On the wall line: use the segment's left-hand perpendicular.
            let (sx, sy) = (wall.end[0] - wall.start[0], wall.end[1] - wall.start[1]);
            let len = (sx * sx + sy * sy).sqrt();
            if len > 1e-6 {
                [-sy / len, sx / len]
            } else {
                [1.0, 0.0]
            }
        };
        WallContact { distance, normal }
    }

    pub fn nearest_wall(&self, p: Point) -> Option<WallContact> {
        self.walls
            .iter()
            .map(|w| Self::contact(w, p))
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
    }

    /// Calls `f` for every wall closer than `cutoff` to `p`.
    pub fn for_each_wall_within<F>(&self, p: Point, cutoff: f32, mut f: F)
    where
        F: FnMut(WallContact),
    {
        for wall in &self.walls {
            let contact = Self::contact(wall, p);
            if contact.distance < cutoff {
                f(contact);
            }
        }
    }

    pub fn blocked(&self, p: Point) -> bool {
        self.walls
            .iter()
            .any(|w| point_segment_distance(p, w.start, w.end).0 < WALL_HALF_THICKNESS)
    }

    pub fn line_of_sight(&self, a: Point, b: Point) -> bool {
        self.first_crossed(a, b).is_none()
    }

    /// First wall (in storage order) whose segment intersects `a → b`.
    pub fn first_crossed(&self, a: Point, b: Point) -> Option<&Wall> {
        self.walls
            .iter()
            .find(|w| segments_intersect(a, b, w.start, w.end))
    }

    /// Wall mask for `spec`, with doorway cells around each exit left open.
    ///
    /// Segments are traced cell to cell with a 4-connected Bresenham walk so
    /// diagonal walls stay closed to 8-neighbour transport.
    pub fn rasterize(&self, spec: &GridSpec, doorways: &[Point], door_radius: f32) -> Vec<bool> {
        let mut mask = vec![false; spec.len()];
        for wall in &self.walls {
            let (x0, y0) = spec.cell_of(wall.start);
            let (x1, y1) = spec.cell_of(wall.end);
            trace_cells(x0 as i64, y0 as i64, x1 as i64, y1 as i64, |x, y| {
                if x >= 0 && y >= 0 && (x as usize) < spec.width && (y as usize) < spec.height {
                    mask[spec.index(x as usize, y as usize)] = true;
                }
            });
        }

        let reach = door_radius.max(0.75 * spec.cell_size);
        for exit in doorways {
            let (ex, ey) = spec.cell_of(*exit);
            mask[spec.index(ex, ey)] = false;
            for y in 0..spec.height {
                for x in 0..spec.width {
                    let c = spec.center(x, y);
                    if distance(c, *exit) <= reach {
                        mask[spec.index(x, y)] = false;
                    }
                }
            }
        }
        mask
    }
}

#[inline]
pub fn distance(a: Point, b: Point) -> f32 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt()
}

/// Distance from `p` to segment `a-b` and the closest point on it.
pub fn point_segment_distance(p: Point, a: Point, b: Point) -> (f32, Point) {
    let (abx, aby) = (b[0] - a[0], b[1] - a[1]);
    let len2 = abx * abx + aby * aby;
    let t = if len2 > 0.0 {
        (((p[0] - a[0]) * abx + (p[1] - a[1]) * aby) / len2).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let closest = [a[0] + t * abx, a[1] + t * aby];
    (distance(p, closest), closest)
}

fn orient(o: Point, a: Point, b: Point) -> f32 {
    let v = (a[0] - o[0]) * (b[1] - o[1]) - (a[1] - o[1]) * (b[0] - o[0]);
    if v.abs() < 1e-9 {
        0.0
    } else {
        v
    }
}

fn on_segment(a: Point, b: Point, p: Point) -> bool {
    p[0] >= a[0].min(b[0]) - 1e-6
        && p[0] <= a[0].max(b[0]) + 1e-6
        && p[1] >= a[1].min(b[1]) - 1e-6
        && p[1] <= a[1].max(b[1]) + 1e-6
}

/// Closed-segment intersection test, touching endpoints included.
pub fn segments_intersect(p1: Point, p2: Point, q1: Point, q2: Point) -> bool {
    let d1 = orient(q1, q2, p1);
    let d2 = orient(q1, q2, p2);
    let d3 = orient(p1, p2, q1);
    let d4 = orient(p1, p2, q2);

    if d1 * d2 < 0.0 && d3 * d4 < 0.0 {
        return true;
    }
    (d1 == 0.0 && on_segment(q1, q2, p1))
        || (d2 == 0.0 && on_segment(q1, q2, p2))
        || (d3 == 0.0 && on_segment(p1, p2, q1))
        || (d4 == 0.0 && on_segment(p1, p2, q2))
}

fn trace_cells<F: FnMut(i64, i64)>(x0: i64, y0: i64, x1: i64, y1: i64, mut mark: F) {
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let (mut x, mut y) = (x0, y0);
    let mut err = dx + dy;
    loop {
        mark(x, y);
        if x == x1 && y == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy && e2 <= dx {
            // Diagonal move: fill the corner cell too.
            err += dy + dx;
            x += sx;
            mark(x, y);
            y += sy;
        } else if e2 >= dy {
            err += dy;
            x += sx;
        } else {
            err += dx;
            y += sy;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corridor() -> Geometry {
        Geometry::new(&[[[10.0, 0.0], [10.0, 15.0]]], [20.0, 20.0])
    }

    #[test]
    fn point_segment_distance_projects_inside_and_clamps_to_ends() {
        let (d, c) = point_segment_distance([5.0, 3.0], [0.0, 0.0], [10.0, 0.0]);
        assert!((d - 3.0).abs() < 1e-6);
        assert_eq!(c, [5.0, 0.0]);
        let (d, _) = point_segment_distance([13.0, 4.0], [0.0, 0.0], [10.0, 0.0]);
        assert!((d - 5.0).abs() < 1e-6);
    }

    #[test]
    fn wall_normal_points_toward_query() {
        let g = corridor();
        let c = g.nearest_wall([8.0, 5.0]).unwrap();
        assert!((c.distance - 2.0).abs() < 1e-6);
        assert!((c.normal[0] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn line_of_sight_blocked_by_wall_but_not_around_it() {
        let g = corridor();
        assert!(!g.line_of_sight([5.0, 5.0], [15.0, 5.0]));
        assert!(g.line_of_sight([5.0, 18.0], [15.0, 18.0]));
        assert!(g.line_of_sight([2.0, 2.0], [8.0, 12.0]));
    }

    #[test]
    fn blocked_only_near_the_segment() {
        let g = corridor();
        assert!(g.blocked([10.05, 7.0]));
        assert!(!g.blocked([10.5, 7.0]));
        assert!(!g.blocked([10.0, 16.0]));
    }

    #[test]
    fn rasterized_wall_is_continuous_and_doorway_is_open() {
        let g = Geometry::new(&[[[0.0, 10.0], [20.0, 10.0]]], [20.0, 20.0]);
        let spec = GridSpec::for_domain([20.0, 20.0], 20).unwrap();
        let mask = g.rasterize(&spec, &[[10.0, 10.0]], 0.5);
        let row = spec.cell_of([0.0, 10.0]).1;
        let open: Vec<usize> = (0..spec.width).filter(|&x| !mask[spec.index(x, row)]).collect();
        assert!(!open.is_empty() && open.len() <= 2, "doorway cells: {open:?}");
        assert!(open.contains(&10));
    }

    #[test]
    fn diagonal_wall_has_no_diagonal_gaps() {
        let g = Geometry::new(&[[[1.0, 1.0], [18.0, 18.0]]], [20.0, 20.0]);
        let spec = GridSpec::for_domain([20.0, 20.0], 20).unwrap();
        let mask = g.rasterize(&spec, &[], 0.0);
        // Every step along the diagonal must be 4-connected.
        for k in 1..17 {
            let here = mask[spec.index(k, k)];
            let side = mask[spec.index(k + 1, k)] || mask[spec.index(k, k + 1)];
            assert!(here && side, "gap at {k}");
        }
    }
}
