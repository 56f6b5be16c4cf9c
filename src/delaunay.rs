//! Incremental Delaunay triangulation of a bounded point set.
//!
//! Points are stored in one array: the `n` generators first, then the three
//! vertices of the enclosing super-triangle and finally any ghost points
//! appended by the caller. Facets are kept in an arena and refer to each other
//! by index only.

use glam::DVec2;

use crate::{
    config::MeshConfig,
    errors::{TessResult, TessellationError},
    geometry::{bounding_box, hilbert_order, incircle, orient2d},
};

/// Facets whose signed area drops below `-DEGENERACY_EPS * scale^2` are fatal.
const DEGENERACY_EPS: f64 = 1e-12;

/// A triangle of the triangulation.
///
/// Vertices are stored counter-clockwise. `neighbors[j]` is the facet across the
/// edge `(vertices[j], vertices[(j + 1) % 3])`, `None` on the outer hull.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Facet {
    pub vertices: [usize; 3],
    pub neighbors: [Option<usize>; 3],
    pub radius: f64,
}

impl Facet {
    fn new(vertices: [usize; 3], neighbors: [Option<usize>; 3]) -> Self {
        Self {
            vertices,
            neighbors,
            radius: f64::INFINITY,
        }
    }

    fn neighbor_index(&self, facet: usize) -> Option<usize> {
        self.neighbors.iter().position(|n| *n == Some(facet))
    }

    fn replace_neighbor(&mut self, old: usize, new: usize) {
        if let Some(j) = self.neighbor_index(old) {
            self.neighbors[j] = Some(new);
        }
    }
}

enum Location {
    Inside(usize),
    OnEdge(usize, usize),
}

#[derive(Debug, Clone)]
pub struct Delaunay {
    points: Vec<DVec2>,
    facets: Vec<Facet>,
    real_count: usize,
    last_facet: usize,
    length_scale: f64,
    super_triangle_scale: f64,
    insertion_order: Vec<usize>,
}

impl Delaunay {
    fn empty(count: usize, config: &MeshConfig) -> Self {
        Self {
            points: Vec::with_capacity(count + 3),
            facets: Vec::with_capacity(2 * count + 1),
            real_count: count,
            last_facet: 0,
            length_scale: 1.,
            super_triangle_scale: config.super_triangle_scale,
            insertion_order: vec![],
        }
    }

    /// Triangulate `points` inside the convex polygon `bounding`.
    pub fn build(points: &[DVec2], bounding: &[DVec2], config: &MeshConfig) -> TessResult<Self> {
        let mut delaunay = Self::empty(points.len(), config);
        delaunay.triangulate(points, bounding)?;
        Ok(delaunay)
    }

    /// Like [`build`](Self::build), inserting the points in the given order,
    /// which must be a permutation of their indices.
    pub fn build_in_order(
        points: &[DVec2],
        bounding: &[DVec2],
        config: &MeshConfig,
        order: &[usize],
    ) -> TessResult<Self> {
        let mut seen = vec![false; points.len()];
        for &i in order {
            match seen.get_mut(i) {
                Some(slot) if !*slot => *slot = true,
                _ => return Err(TessellationError::topology(i, "insertion order repeats or exceeds the points")),
            }
        }
        if order.len() != points.len() {
            return Err(TessellationError::topology(
                order.len(),
                format!("insertion order covers {} of {} points", order.len(), points.len()),
            ));
        }
        let mut delaunay = Self::empty(points.len(), config);
        delaunay.insertion_order = order.to_vec();
        delaunay.triangulate(points, bounding)?;
        Ok(delaunay)
    }

    /// Rebuild the triangulation for moved (or different) generators.
    ///
    /// Storage is reused and the previous insertion order is kept when the
    /// number of points did not change, which keeps the walks short for small
    /// displacements.
    pub fn update(&mut self, points: &[DVec2], bounding: &[DVec2]) -> TessResult<()> {
        if points.len() != self.real_count {
            self.insertion_order.clear();
        }
        self.real_count = points.len();
        self.triangulate(points, bounding)
    }

    fn triangulate(&mut self, points: &[DVec2], bounding: &[DVec2]) -> TessResult<()> {
        self.points.clear();
        self.facets.clear();
        self.points.extend_from_slice(points);

        let (min, max) = bounding_box(bounding);
        let (min, max) = if points.is_empty() {
            (min, max)
        } else {
            let (pmin, pmax) = bounding_box(points);
            (min.min(pmin), max.max(pmax))
        };
        let mut width = (max - min).max_element();
        if !(width > 0.) || !width.is_finite() {
            width = 1.;
        }
        self.length_scale = width;
        let center = 0.5 * (min + max);
        let radius = self.super_triangle_scale * width;
        for angle in [90f64, 210., 330.] {
            let angle = angle.to_radians();
            self.points
                .push(center + 2. * radius * DVec2::new(angle.cos(), angle.sin()));
        }
        let n = self.real_count;
        let mut facet = Facet::new([n, n + 1, n + 2], [None; 3]);
        facet.radius = self.circumradius(&facet.vertices);
        self.facets.push(facet);
        self.last_facet = 0;

        if self.insertion_order.len() != n {
            self.insertion_order = hilbert_order(points);
        }
        let order = std::mem::take(&mut self.insertion_order);
        let result = order.iter().try_for_each(|&i| self.insert(i));
        self.insertion_order = order;
        result?;
        log::debug!(
            "Triangulated {} points into {} facets",
            self.real_count,
            self.facets.len()
        );
        Ok(())
    }

    /// Append ghost points beyond [`original_length`](Self::original_length) and insert them.
    pub fn add_ghosts(&mut self, ghosts: &[DVec2]) -> TessResult<()> {
        let offset = self.points.len();
        self.points.extend_from_slice(ghosts);
        for i in hilbert_order(ghosts) {
            self.insert(offset + i)?;
        }
        Ok(())
    }

    /// Number of generators.
    pub fn real_count(&self) -> usize {
        self.real_count
    }

    /// Index of the first ghost point (generators plus super-triangle).
    pub fn original_length(&self) -> usize {
        self.real_count + 3
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[DVec2] {
        &self.points
    }

    pub fn point(&self, index: usize) -> DVec2 {
        self.points[index]
    }

    pub fn facets(&self) -> &[Facet] {
        &self.facets
    }

    pub fn facet(&self, index: usize) -> &Facet {
        &self.facets[index]
    }

    pub fn length_scale(&self) -> f64 {
        self.length_scale
    }

    pub(crate) fn is_super_vertex(&self, index: usize) -> bool {
        index >= self.real_count && index < self.original_length()
    }

    /// Replace the stored point set after a local topology edit.
    ///
    /// The facets no longer describe the points afterwards and are dropped;
    /// the next [`update`](Self::update) rebuilds them.
    pub(crate) fn replace_points(&mut self, points: Vec<DVec2>, real_count: usize) {
        self.points = points;
        self.real_count = real_count;
        self.facets.clear();
        self.insertion_order.clear();
        self.last_facet = 0;
    }

    /// Append a point without inserting it. The facets become stale.
    pub(crate) fn push_detached(&mut self, point: DVec2) -> usize {
        self.facets.clear();
        self.points.push(point);
        self.points.len() - 1
    }

    /// Edge orientation evaluated in a canonical vertex order so that both
    /// facets sharing an edge agree on the side of `p`.
    fn edge_orientation(&self, a: usize, b: usize, p: DVec2) -> f64 {
        if a < b {
            orient2d(self.points[a], self.points[b], p)
        } else {
            -orient2d(self.points[b], self.points[a], p)
        }
    }

    fn circumradius(&self, vertices: &[usize; 3]) -> f64 {
        let [a, b, c] = vertices.map(|v| self.points[v]);
        let area2 = orient2d(a, b, c).abs();
        if area2 == 0. {
            return f64::INFINITY;
        }
        a.distance(b) * b.distance(c) * c.distance(a) / (2. * area2)
    }

    fn locate(&self, index: usize) -> TessResult<Location> {
        let p = self.points[index];
        let mut current = self.last_facet.min(self.facets.len() - 1);
        let max_steps = 4 * self.facets.len() + 16;
        for _ in 0..max_steps {
            let facet = &self.facets[current];
            let mut moved = false;
            let mut zeros = [false; 3];
            for j in 0..3 {
                let a = facet.vertices[j];
                let b = facet.vertices[(j + 1) % 3];
                let o = self.edge_orientation(a, b, p);
                if o < 0. {
                    current = facet.neighbors[j].ok_or_else(|| {
                        TessellationError::geometry("point outside of the triangulation", vec![index], vec![p])
                    })?;
                    moved = true;
                    break;
                }
                zeros[j] = o == 0.;
            }
            if moved {
                continue;
            }
            return match zeros.iter().filter(|z| **z).count() {
                0 => Ok(Location::Inside(current)),
                1 => Ok(Location::OnEdge(
                    current,
                    zeros.iter().position(|z| *z).unwrap_or(0),
                )),
                _ => {
                    let vertices = facet.vertices.to_vec();
                    let mut indices = vec![index];
                    indices.extend(vertices.iter().filter(|v| self.points[**v] == p));
                    Err(TessellationError::geometry(
                        "coincident points",
                        indices,
                        vec![p],
                    ))
                }
            };
        }
        Err(TessellationError::topology(
            index,
            "walk through the triangulation did not terminate",
        ))
    }

    fn insert(&mut self, index: usize) -> TessResult<()> {
        let mut stack = match self.locate(index)? {
            Location::Inside(f) => self.split_facet(f, index),
            Location::OnEdge(f, j) => self.split_edge(f, j, index)?,
        };
        while let Some((f, j)) = stack.pop() {
            if let Some(flipped) = self.legalize(f, j)? {
                stack.extend_from_slice(&flipped);
            }
        }
        Ok(())
    }

    fn set_facet(&mut self, slot: usize, vertices: [usize; 3], neighbors: [Option<usize>; 3]) {
        let mut facet = Facet::new(vertices, neighbors);
        facet.radius = self.circumradius(&vertices);
        if slot == self.facets.len() {
            self.facets.push(facet);
        } else {
            self.facets[slot] = facet;
        }
    }

    fn redirect(&mut self, neighbor: Option<usize>, old: usize, new: usize) {
        if let Some(n) = neighbor {
            self.facets[n].replace_neighbor(old, new);
        }
    }

    /// Split facet `f` into three facets around the new point `p`.
    fn split_facet(&mut self, f: usize, p: usize) -> Vec<(usize, usize)> {
        let Facet {
            vertices: [a, b, c],
            neighbors: [n_ab, n_bc, n_ca],
            ..
        } = self.facets[f];
        let f1 = self.facets.len();
        let f2 = f1 + 1;
        self.set_facet(f, [a, b, p], [n_ab, Some(f1), Some(f2)]);
        self.set_facet(f1, [b, c, p], [n_bc, Some(f2), Some(f)]);
        self.set_facet(f2, [c, a, p], [n_ca, Some(f), Some(f1)]);
        self.redirect(n_bc, f, f1);
        self.redirect(n_ca, f, f2);
        self.last_facet = f;
        vec![(f, 0), (f1, 0), (f2, 0)]
    }

    /// Split the edge `j` of facet `f` (and the facet on its other side) at `p`.
    fn split_edge(&mut self, f: usize, j: usize, p: usize) -> TessResult<Vec<(usize, usize)>> {
        let facet = self.facets[f];
        let a = facet.vertices[j];
        let b = facet.vertices[(j + 1) % 3];
        let c = facet.vertices[(j + 2) % 3];
        let n_bc = facet.neighbors[(j + 1) % 3];
        let n_ca = facet.neighbors[(j + 2) % 3];
        let g = facet.neighbors[j].ok_or_else(|| {
            TessellationError::geometry(
                "point on the hull of the triangulation",
                vec![p],
                vec![self.points[p]],
            )
        })?;
        let other = self.facets[g];
        let k = other
            .neighbor_index(f)
            .ok_or_else(|| TessellationError::topology(p, "asymmetric facet adjacency"))?;
        let d = other.vertices[(k + 2) % 3];
        let n_ad = other.neighbors[(k + 1) % 3];
        let n_db = other.neighbors[(k + 2) % 3];

        let f1 = self.facets.len();
        let g1 = f1 + 1;
        self.set_facet(f, [c, a, p], [n_ca, Some(g1), Some(f1)]);
        self.set_facet(f1, [b, c, p], [n_bc, Some(f), Some(g)]);
        self.set_facet(g, [d, b, p], [n_db, Some(f1), Some(g1)]);
        self.set_facet(g1, [a, d, p], [n_ad, Some(g), Some(f)]);
        self.redirect(n_bc, f, f1);
        self.redirect(n_ad, g, g1);
        self.last_facet = f;
        Ok(vec![(f, 0), (f1, 0), (g, 0), (g1, 0)])
    }

    /// Flip edge `j` of facet `f` if the opposite vertex lies in its circumcircle.
    fn legalize(&mut self, f: usize, j: usize) -> TessResult<Option<[(usize, usize); 2]>> {
        let facet = self.facets[f];
        let Some(g) = facet.neighbors[j] else {
            return Ok(None);
        };
        let other = self.facets[g];
        let k = other
            .neighbor_index(f)
            .ok_or_else(|| TessellationError::topology(facet.vertices[0], "asymmetric facet adjacency"))?;
        let a = facet.vertices[j];
        let b = facet.vertices[(j + 1) % 3];
        let c = facet.vertices[(j + 2) % 3];
        let d = other.vertices[(k + 2) % 3];
        let [pa, pb, pc] = [a, b, c].map(|v| self.points[v]);
        if incircle(pa, pb, pc, self.points[d]) <= 0. {
            return Ok(None);
        }

        let eps = -DEGENERACY_EPS * self.length_scale * self.length_scale;
        let pd = self.points[d];
        if orient2d(pc, pa, pd) < eps || orient2d(pc, pd, pb) < eps {
            return Err(TessellationError::geometry(
                "flip would create an inverted facet",
                vec![a, b, c, d],
                vec![pa, pb, pc, pd],
            ));
        }

        let nf_bc = facet.neighbors[(j + 1) % 3];
        let nf_ca = facet.neighbors[(j + 2) % 3];
        let ng_ad = other.neighbors[(k + 1) % 3];
        let ng_db = other.neighbors[(k + 2) % 3];
        self.set_facet(f, [c, a, d], [nf_ca, ng_ad, Some(g)]);
        self.set_facet(g, [c, d, b], [Some(f), ng_db, nf_bc]);
        self.redirect(ng_ad, g, f);
        self.redirect(nf_bc, f, g);
        Ok(Some([(f, 1), (g, 1)]))
    }
}

#[cfg(test)]
mod test {
    use glam::DVec2;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::Delaunay;
    use crate::{config::MeshConfig, geometry::incircle, geometry::orient2d};

    fn unit_square() -> Vec<DVec2> {
        vec![
            DVec2::new(0., 0.),
            DVec2::new(1., 0.),
            DVec2::new(1., 1.),
            DVec2::new(0., 1.),
        ]
    }

    fn random_points(count: usize, seed: u64) -> Vec<DVec2> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..count)
            .map(|_| DVec2::new(rng.gen(), rng.gen()))
            .collect()
    }

    fn assert_valid(delaunay: &Delaunay) {
        let points = delaunay.points();
        for (i, facet) in delaunay.facets().iter().enumerate() {
            let [a, b, c] = facet.vertices.map(|v| points[v]);
            assert!(orient2d(a, b, c) > 0.);
            for (j, neighbor) in facet.neighbors.iter().enumerate() {
                let Some(n) = neighbor else { continue };
                let other = delaunay.facet(*n);
                assert!(other.neighbors.contains(&Some(i)));
                let opposite = other
                    .vertices
                    .iter()
                    .find(|v| **v != facet.vertices[j] && **v != facet.vertices[(j + 1) % 3])
                    .unwrap();
                if delaunay.is_super_vertex(*opposite) {
                    continue;
                }
                assert!(incircle(a, b, c, points[*opposite]) <= 1e-12);
            }
        }
    }

    #[test]
    fn test_single_point() {
        let delaunay = Delaunay::build(&[DVec2::splat(0.5)], &unit_square(), &MeshConfig::default()).unwrap();
        assert_eq!(delaunay.facets().len(), 3);
        assert_eq!(delaunay.original_length(), 4);
        assert_valid(&delaunay);
    }

    #[test]
    fn test_random_points_are_delaunay() {
        let points = random_points(200, 7);
        let delaunay = Delaunay::build(&points, &unit_square(), &MeshConfig::default()).unwrap();
        // Euler: 2 (n + 3) - 2 - 3 facets for n interior points in a triangle.
        assert_eq!(delaunay.facets().len(), 2 * (points.len() + 3) - 5);
        assert_valid(&delaunay);
    }

    #[test]
    fn test_points_on_edges() {
        let points: Vec<DVec2> = (0..25)
            .map(|i| DVec2::new((i % 5) as f64 * 0.25, (i / 5) as f64 * 0.25))
            .collect();
        let delaunay = Delaunay::build(&points, &unit_square(), &MeshConfig::default()).unwrap();
        assert_eq!(delaunay.facets().len(), 2 * (points.len() + 3) - 5);
        assert_valid(&delaunay);
    }

    #[test]
    fn test_update_and_ghosts() {
        let mut points = random_points(50, 3);
        let mut delaunay = Delaunay::build(&points, &unit_square(), &MeshConfig::default()).unwrap();
        for p in points.iter_mut() {
            *p = (*p + DVec2::splat(1e-3)).min(DVec2::splat(0.999));
        }
        delaunay.update(&points, &unit_square()).unwrap();
        delaunay
            .add_ghosts(&[DVec2::new(-0.1, 0.5), DVec2::new(1.1, 0.5)])
            .unwrap();
        assert_eq!(delaunay.len(), 55);
        assert_eq!(delaunay.point(53), DVec2::new(-0.1, 0.5));
        assert_valid(&delaunay);
    }

    #[test]
    fn test_coincident_points() {
        let points = [DVec2::new(0.2, 0.3), DVec2::new(0.7, 0.1), DVec2::new(0.2, 0.3)];
        assert!(Delaunay::build(&points, &unit_square(), &MeshConfig::default()).is_err());
    }
}
