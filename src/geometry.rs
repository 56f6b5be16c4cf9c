//! Planar geometric primitives shared by the triangulation, the Voronoi mesh and the AMR remap.

use glam::DVec2;

/// Twice the signed area of the triangle `a, b, c` (positive when counter-clockwise).
///
/// Coordinates are taken relative to `a` to limit cancellation.
pub fn orient2d(a: DVec2, b: DVec2, c: DVec2) -> f64 {
    (b - a).perp_dot(c - a)
}

/// Positive when `d` lies strictly inside the circumcircle of the counter-clockwise triangle `a, b, c`.
pub fn incircle(a: DVec2, b: DVec2, c: DVec2, d: DVec2) -> f64 {
    let ad = a - d;
    let bd = b - d;
    let cd = c - d;
    let alift = ad.length_squared();
    let blift = bd.length_squared();
    let clift = cd.length_squared();
    alift * bd.perp_dot(cd) + blift * cd.perp_dot(ad) + clift * ad.perp_dot(bd)
}

/// Axis aligned bounding box `(lower_left, upper_right)` of a set of points.
pub fn bounding_box(points: &[DVec2]) -> (DVec2, DVec2) {
    points.iter().fold(
        (DVec2::splat(f64::INFINITY), DVec2::splat(f64::NEG_INFINITY)),
        |(min, max), p| (min.min(*p), max.max(*p)),
    )
}

/// Intersection point of the segments `s1` and `s2`, if any.
///
/// The intersection of the supporting lines is accepted when it lies within
/// `eps` times the length of the shorter segment of both segments. Segments
/// whose bounding boxes are disjoint never intersect.
pub fn segment_intersection(s1: [DVec2; 2], s2: [DVec2; 2], eps: f64) -> Option<DVec2> {
    let (min1, max1) = (s1[0].min(s1[1]), s1[0].max(s1[1]));
    let (min2, max2) = (s2[0].min(s2[1]), s2[0].max(s2[1]));
    if min1.x > max2.x || min2.x > max1.x || min1.y > max2.y || min2.y > max1.y {
        return None;
    }
    let d1 = s1[0] - s1[1];
    let d2 = s2[0] - s2[1];
    let d = d1.perp_dot(d2);
    if d == 0. {
        return None;
    }
    let c1 = s1[0].perp_dot(s1[1]);
    let c2 = s2[0].perp_dot(s2[1]);
    let intersection = DVec2::new(d2.x * c1 - d1.x * c2, d2.y * c1 - d1.y * c2) / d;

    let eps = eps * d1.length().min(d2.length());
    let within = |min: DVec2, max: DVec2| {
        intersection.x + eps >= min.x
            && intersection.x - eps <= max.x
            && intersection.y + eps >= min.y
            && intersection.y - eps <= max.y
    };
    (within(min1, max1) && within(min2, max2)).then_some(intersection)
}

/// Crossing of the lines through `l1` and `l2`, `None` for (nearly) parallel lines.
pub fn line_intersection(l1: [DVec2; 2], l2: [DVec2; 2]) -> Option<DVec2> {
    let d1 = l1[1] - l1[0];
    let d2 = l2[1] - l2[0];
    let d = d1.perp_dot(d2);
    if !(d.abs() > 1e-12 * d1.length() * d2.length()) {
        return None;
    }
    Some(l1[0] + (l2[0] - l1[0]).perp_dot(d2) / d * d1)
}

/// Distance from `point` to the closed segment `segment`.
pub fn distance_to_segment(point: DVec2, segment: [DVec2; 2]) -> f64 {
    let v = segment[1] - segment[0];
    let w = point - segment[0];
    let c1 = v.dot(w);
    if c1 <= 0. {
        return point.distance(segment[0]);
    }
    let c2 = v.length_squared();
    if c2 <= c1 {
        return point.distance(segment[1]);
    }
    point.distance(segment[0] + c1 / c2 * v)
}

/// Convex hull of `points` in counter-clockwise order (Andrew's monotone chain).
///
/// Collinear points on the hull boundary are dropped.
pub fn convex_hull(points: &[DVec2]) -> Vec<DVec2> {
    let mut sorted = points.to_vec();
    sorted.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    sorted.dedup();
    if sorted.len() < 3 {
        return sorted;
    }

    let mut lower: Vec<DVec2> = Vec::with_capacity(sorted.len());
    for &p in sorted.iter() {
        push_hull_point(&mut lower, p);
    }
    let mut upper: Vec<DVec2> = Vec::with_capacity(sorted.len());
    for &p in sorted.iter().rev() {
        push_hull_point(&mut upper, p);
    }
    // The last point of each chain is the first point of the other one.
    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

fn push_hull_point(chain: &mut Vec<DVec2>, p: DVec2) {
    while chain.len() >= 2 && orient2d(chain[chain.len() - 2], chain[chain.len() - 1], p) <= 0. {
        chain.pop();
    }
    chain.push(p);
}

/// Whether `point` lies inside (or on the boundary of) the counter-clockwise convex `polygon`.
pub fn point_in_convex_polygon(polygon: &[DVec2], point: DVec2) -> bool {
    if polygon.len() < 3 {
        return false;
    }
    polygon
        .iter()
        .zip(polygon.iter().cycle().skip(1))
        .all(|(a, b)| orient2d(*a, *b, point) >= 0.)
}

/// Absolute area of a simple polygon (shoelace formula).
pub fn polygon_area(polygon: &[DVec2]) -> f64 {
    if polygon.len() < 3 {
        return 0.;
    }
    let origin = polygon[0];
    0.5 * polygon
        .windows(2)
        .skip(1)
        .map(|w| (w[0] - origin).perp_dot(w[1] - origin))
        .sum::<f64>()
        .abs()
}

/// Sum of the edge lengths of a closed polygon.
pub fn polygon_perimeter(polygon: &[DVec2]) -> f64 {
    polygon
        .iter()
        .zip(polygon.iter().cycle().skip(1))
        .map(|(a, b)| a.distance(*b))
        .sum()
}

/// Distance from `point` to the closest point of a convex polygon (zero inside).
pub fn distance_to_convex_polygon(polygon: &[DVec2], point: DVec2) -> f64 {
    if point_in_convex_polygon(polygon, point) {
        return 0.;
    }
    polygon
        .iter()
        .zip(polygon.iter().cycle().skip(1))
        .map(|(a, b)| distance_to_segment(point, [*a, *b]))
        .fold(f64::INFINITY, f64::min)
}

/// Clips the segment `segment` to the half plane `{x : (x - origin) . normal <= 0}`.
pub fn clip_segment_half_plane(
    segment: [DVec2; 2],
    origin: DVec2,
    normal: DVec2,
) -> Option<[DVec2; 2]> {
    let d0 = (segment[0] - origin).dot(normal);
    let d1 = (segment[1] - origin).dot(normal);
    match (d0 <= 0., d1 <= 0.) {
        (true, true) => Some(segment),
        (false, false) => None,
        (inside0, _) => {
            let t = d0 / (d0 - d1);
            let crossing = segment[0] + t * (segment[1] - segment[0]);
            if inside0 {
                Some([segment[0], crossing])
            } else {
                Some([crossing, segment[1]])
            }
        }
    }
}

/// Clips a segment to the counter-clockwise convex `polygon` grown by `tolerance`.
///
/// Segments running along a side of the polygon are kept whole.
pub fn clip_segment_convex(
    segment: [DVec2; 2],
    polygon: &[DVec2],
    tolerance: f64,
) -> Option<[DVec2; 2]> {
    let mut clipped = segment;
    for (a, b) in polygon.iter().zip(polygon.iter().cycle().skip(1)) {
        // Outward normal of a counter-clockwise edge.
        let edge = *b - *a;
        let normal = DVec2::new(edge.y, -edge.x).normalize_or_zero();
        if normal == DVec2::ZERO {
            continue;
        }
        clipped = clip_segment_half_plane(clipped, *a + tolerance * normal, normal)?;
    }
    Some(clipped)
}

fn hilbert_index(order: u32, mut x: u32, mut y: u32) -> u64 {
    let mut index = 0u64;
    let mut s = 1u32 << (order - 1);
    while s > 0 {
        let rx = u32::from((x & s) > 0);
        let ry = u32::from((y & s) > 0);
        index += u64::from(s) * u64::from(s) * u64::from((3 * rx) ^ ry);
        if ry == 0 {
            if rx == 1 {
                x = s.wrapping_mul(2).wrapping_sub(1).wrapping_sub(x);
                y = s.wrapping_mul(2).wrapping_sub(1).wrapping_sub(y);
            }
            std::mem::swap(&mut x, &mut y);
        }
        s >>= 1;
    }
    index
}

/// Indices of `points` sorted along a Hilbert curve through their bounding box.
pub fn hilbert_order(points: &[DVec2]) -> Vec<usize> {
    const ORDER: u32 = 16;
    if points.is_empty() {
        return vec![];
    }
    let (min, max) = bounding_box(points);
    let extent = (max - min).max(DVec2::splat(f64::MIN_POSITIVE));
    let cells = f64::from((1u32 << ORDER) - 1);
    let keys: Vec<u64> = points
        .iter()
        .map(|p| {
            let scaled = (*p - min) / extent * cells;
            hilbert_index(ORDER, scaled.x as u32, scaled.y as u32)
        })
        .collect();
    let mut order: Vec<usize> = (0..points.len()).collect();
    order.sort_by_key(|&i| keys[i]);
    order
}

#[cfg(test)]
mod test {
    use float_cmp::assert_approx_eq;
    use glam::DVec2;

    use super::*;

    #[test]
    fn test_orientation_and_incircle() {
        let a = DVec2::new(0., 0.);
        let b = DVec2::new(1., 0.);
        let c = DVec2::new(0., 1.);
        assert!(orient2d(a, b, c) > 0.);
        assert!(orient2d(a, c, b) < 0.);
        assert_eq!(orient2d(a, b, DVec2::new(2., 0.)), 0.);
        assert!(incircle(a, b, c, DVec2::new(0.5, 0.5)) > 0.);
        assert!(incircle(a, b, c, DVec2::new(2., 2.)) < 0.);
        assert_eq!(incircle(a, b, c, DVec2::new(1., 1.)), 0.);
    }

    #[test]
    fn test_segment_intersection() {
        let horizontal = [DVec2::new(0., 0.5), DVec2::new(1., 0.5)];
        let vertical = [DVec2::new(0.25, 0.), DVec2::new(0.25, 1.)];
        let intersection = segment_intersection(horizontal, vertical, 1e-7).unwrap();
        assert_approx_eq!(f64, intersection.x, 0.25);
        assert_approx_eq!(f64, intersection.y, 0.5);
        let short = [DVec2::new(0.25, 0.6), DVec2::new(0.25, 1.)];
        assert!(segment_intersection(horizontal, short, 1e-7).is_none());
        let parallel = [DVec2::new(0., 0.6), DVec2::new(1., 0.6)];
        assert!(segment_intersection(horizontal, parallel, 1e-7).is_none());

        // Lines cross beyond the ends of the short segment.
        let crossing = line_intersection(short, horizontal).unwrap();
        assert_approx_eq!(f64, crossing.x, 0.25);
        assert_approx_eq!(f64, crossing.y, 0.5);
        assert!(line_intersection(horizontal, parallel).is_none());
    }

    #[test]
    fn test_distance_to_segment() {
        let segment = [DVec2::new(0., 0.), DVec2::new(1., 0.)];
        assert_approx_eq!(f64, distance_to_segment(DVec2::new(0.5, 2.), segment), 2.);
        assert_approx_eq!(f64, distance_to_segment(DVec2::new(-3., 4.), segment), 5.);
        assert_approx_eq!(f64, distance_to_segment(DVec2::new(4., 4.), segment), 5.);
    }

    #[test]
    fn test_convex_hull() {
        let points = [
            DVec2::new(0., 0.),
            DVec2::new(1., 0.),
            DVec2::new(0.5, 0.5),
            DVec2::new(1., 1.),
            DVec2::new(0., 1.),
            DVec2::new(0.5, 0.),
        ];
        let hull = convex_hull(&points);
        assert_eq!(hull.len(), 4);
        assert_eq!(hull[0], DVec2::new(0., 0.));
        assert_eq!(hull[1], DVec2::new(1., 0.));
        assert_eq!(hull[2], DVec2::new(1., 1.));
        assert_eq!(hull[3], DVec2::new(0., 1.));
        assert_approx_eq!(f64, polygon_area(&hull), 1.);
        assert_approx_eq!(f64, polygon_perimeter(&hull), 4.);
        assert!(point_in_convex_polygon(&hull, DVec2::new(0.3, 0.9)));
        assert!(point_in_convex_polygon(&hull, DVec2::new(1., 0.5)));
        assert!(!point_in_convex_polygon(&hull, DVec2::new(1.1, 0.5)));
        assert_approx_eq!(f64, distance_to_convex_polygon(&hull, DVec2::new(1.5, 0.5)), 0.5);
    }

    #[test]
    fn test_clip_segment() {
        let square = [
            DVec2::new(0., 0.),
            DVec2::new(1., 0.),
            DVec2::new(1., 1.),
            DVec2::new(0., 1.),
        ];
        let clipped =
            clip_segment_convex([DVec2::new(-1., 0.5), DVec2::new(2., 0.5)], &square, 0.).unwrap();
        assert_approx_eq!(f64, clipped[0].x, 0.);
        assert_approx_eq!(f64, clipped[1].x, 1.);
        assert!(clip_segment_convex([DVec2::new(-1., 2.), DVec2::new(2., 2.)], &square, 0.).is_none());
        // Slightly outside the top side, but within the tolerance.
        let along = [DVec2::new(0.5, 1. + 1e-14), DVec2::new(-3., 1. + 2e-14)];
        let clipped = clip_segment_convex(along, &square, 1e-9).unwrap();
        assert_approx_eq!(f64, clipped[0].x, 0.5);
        assert_approx_eq!(f64, clipped[1].x, 0., epsilon = 1e-8);
    }

    #[test]
    fn test_hilbert_order_is_permutation() {
        let points: Vec<DVec2> = (0..64)
            .map(|i| DVec2::new((i % 8) as f64, (i / 8) as f64))
            .collect();
        let mut order = hilbert_order(&points);
        // The curve starts in the lower left corner.
        assert_eq!(order[0], 0);
        order.sort();
        assert_eq!(order, (0..64).collect::<Vec<_>>());
    }
}
