//! Robust intersection area of two convex polygons.
//!
//! Both polygons are snapped to a common integer grid (fifteen significant
//! digits below the largest coordinate), the subject is clipped against the
//! clip polygon with exact integer orientation tests and the area of the
//! result is evaluated with the shoelace formula before scaling back.

use glam::DVec2;

/// Decimal digits of the grid below the largest coordinate. Grid coordinates
/// stay below 1e16, so differences and their products fit an `i128`.
const GRID_DIGITS: i32 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IntPoint {
    x: i64,
    y: i64,
}

impl IntPoint {
    fn from_scaled(p: DVec2, scale: f64) -> Self {
        Self {
            x: (p.x * scale).round() as i64,
            y: (p.y * scale).round() as i64,
        }
    }
}

/// Twice the signed area of `o, a, b`, exact.
fn cross(o: IntPoint, a: IntPoint, b: IntPoint) -> i128 {
    let (ax, ay) = (i128::from(a.x - o.x), i128::from(a.y - o.y));
    let (bx, by) = (i128::from(b.x - o.x), i128::from(b.y - o.y));
    ax * by - ay * bx
}

fn double_signed_area(polygon: &[IntPoint]) -> i128 {
    let origin = polygon[0];
    polygon
        .windows(2)
        .skip(1)
        .map(|w| cross(origin, w[0], w[1]))
        .sum()
}

fn make_ccw(polygon: &mut [IntPoint]) {
    if double_signed_area(polygon) < 0 {
        polygon.reverse();
    }
}

/// Intersection of the segment `p q` with the line through `a b`, given the
/// orientations of `p` and `q` with respect to that line, rounded to the
/// nearest grid point.
fn line_crossing(p: IntPoint, q: IntPoint, side_p: i128, side_q: i128) -> IntPoint {
    let t = side_p as f64 / (side_p - side_q) as f64;
    // Step from the end closer to the crossing to keep the rounding error small.
    let (from, to, t) = if t <= 0.5 { (p, q, t) } else { (q, p, 1. - t) };
    IntPoint {
        x: from.x + ((to.x - from.x) as f64 * t).round() as i64,
        y: from.y + ((to.y - from.y) as f64 * t).round() as i64,
    }
}

fn push_distinct(polygon: &mut Vec<IntPoint>, p: IntPoint) {
    if polygon.last() != Some(&p) {
        polygon.push(p);
    }
}

/// Sutherland-Hodgman clipping of `subject` against the convex counter-clockwise `clip`.
fn clip_polygon(subject: Vec<IntPoint>, clip: &[IntPoint]) -> Vec<IntPoint> {
    let mut output = subject;
    for (i, &a) in clip.iter().enumerate() {
        if output.len() < 3 {
            return vec![];
        }
        let b = clip[(i + 1) % clip.len()];
        let input = std::mem::take(&mut output);
        for (j, &p) in input.iter().enumerate() {
            let q = input[(j + 1) % input.len()];
            let side_p = cross(a, b, p);
            let side_q = cross(a, b, q);
            if side_p >= 0 {
                push_distinct(&mut output, p);
                if side_q < 0 && side_p > 0 {
                    push_distinct(&mut output, line_crossing(p, q, side_p, side_q));
                }
            } else if side_q > 0 {
                push_distinct(&mut output, line_crossing(p, q, side_p, side_q));
            }
        }
        if output.len() > 1 && output.first() == output.last() {
            output.pop();
        }
    }
    output
}

/// Area of the intersection of the convex polygons `poly0` and `poly1`.
///
/// Vertex order may be clockwise or counter-clockwise. Results with two or
/// fewer vertices contribute zero.
pub fn area_overlap(poly0: &[DVec2], poly1: &[DVec2]) -> f64 {
    if poly0.len() < 3 || poly1.len() < 3 {
        return 0.;
    }
    let maxi = poly0
        .iter()
        .chain(poly1.iter())
        .map(|p| p.x.abs().max(p.y.abs()))
        .fold(0., f64::max);
    if maxi == 0. || !maxi.is_finite() {
        return 0.;
    }
    let digits = maxi.log10().floor() as i32 + 1;
    let scale = 10f64.powi(GRID_DIGITS - digits);

    let mut subject: Vec<IntPoint> = poly0.iter().map(|p| IntPoint::from_scaled(*p, scale)).collect();
    let mut clip: Vec<IntPoint> = poly1.iter().map(|p| IntPoint::from_scaled(*p, scale)).collect();
    make_ccw(&mut subject);
    make_ccw(&mut clip);

    let intersection = clip_polygon(subject, &clip);
    if intersection.len() <= 2 {
        return 0.;
    }
    0.5 * (double_signed_area(&intersection) as f64).abs() / (scale * scale)
}

#[cfg(test)]
mod test {
    use float_cmp::assert_approx_eq;
    use glam::DVec2;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::area_overlap;
    use crate::geometry::{convex_hull, polygon_area};

    fn hexagon() -> Vec<DVec2> {
        vec![
            DVec2::new(0.25, 0.),
            DVec2::new(0.75, 0.),
            DVec2::new(1., 0.5),
            DVec2::new(0.75, 1.),
            DVec2::new(0.25, 1.),
            DVec2::new(0., 0.5),
        ]
    }

    #[test]
    fn test_fan_split_sums_to_parent() {
        let parent = hexagon();
        let center = DVec2::new(0.5, 0.5);
        let total: f64 = (0..parent.len())
            .map(|i| {
                let triangle = [center, parent[i], parent[(i + 1) % parent.len()]];
                area_overlap(&parent, &triangle)
            })
            .sum();
        assert_approx_eq!(f64, total, polygon_area(&parent), epsilon = 1e-9 * polygon_area(&parent));
        assert_approx_eq!(f64, total, area_overlap(&parent, &parent), epsilon = 1e-12);
    }

    #[test]
    fn test_grid_split_sums_to_parent() {
        let parent = hexagon();
        let mut total = 0.;
        for i in 0..4 {
            for j in 0..4 {
                let lower = DVec2::new(i as f64, j as f64) * 0.25;
                let square = [
                    lower,
                    lower + DVec2::new(0.25, 0.),
                    lower + DVec2::new(0.25, 0.25),
                    lower + DVec2::new(0., 0.25),
                ];
                total += area_overlap(&parent, &square);
            }
        }
        assert_approx_eq!(f64, total, 0.75, epsilon = 1e-9);
    }

    #[test]
    fn test_quadrant_split_of_random_polygons() {
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..200 {
            let points: Vec<DVec2> = (0..12)
                .map(|_| DVec2::new(rng.gen_range(0.0..1.0), rng.gen_range(0.0..1.0)))
                .collect();
            let parent = convex_hull(&points);
            let area = polygon_area(&parent).abs();
            let center = DVec2::new(rng.gen_range(0.2..0.8), rng.gen_range(0.2..0.8));
            let total: f64 = [
                DVec2::new(1., 1.),
                DVec2::new(-1., 1.),
                DVec2::new(-1., -1.),
                DVec2::new(1., -1.),
            ]
            .iter()
            .map(|corner| {
                let far = center + 2. * *corner;
                let quadrant = [center, DVec2::new(far.x, center.y), far, DVec2::new(center.x, far.y)];
                area_overlap(&parent, &quadrant)
            })
            .sum();
            assert_approx_eq!(f64, total, area, epsilon = 1e-9 * area);
        }
    }

    #[test]
    fn test_orientation_and_symmetry() {
        let square = vec![
            DVec2::new(0., 0.),
            DVec2::new(1., 0.),
            DVec2::new(1., 1.),
            DVec2::new(0., 1.),
        ];
        let mut shifted: Vec<DVec2> = square.iter().map(|p| *p + DVec2::new(0.5, 0.25)).collect();
        assert_approx_eq!(f64, area_overlap(&square, &shifted), 0.375, epsilon = 1e-9);
        shifted.reverse();
        assert_approx_eq!(f64, area_overlap(&shifted, &square), 0.375, epsilon = 1e-9);
    }

    #[test]
    fn test_degenerate_overlaps() {
        let square = [
            DVec2::new(0., 0.),
            DVec2::new(1., 0.),
            DVec2::new(1., 1.),
            DVec2::new(0., 1.),
        ];
        let touching = [
            DVec2::new(1., 0.),
            DVec2::new(2., 0.),
            DVec2::new(2., 1.),
            DVec2::new(1., 1.),
        ];
        let far = [DVec2::new(5., 5.), DVec2::new(6., 5.), DVec2::new(5., 6.)];
        assert_eq!(area_overlap(&square, &touching), 0.);
        assert_eq!(area_overlap(&square, &far), 0.);
        assert_eq!(area_overlap(&square, &square[..2]), 0.);
    }
}
