//! Bookkeeping of the ghost points of a tessellation.

use std::collections::HashMap;

use glam::{DVec2, IVec2};

use crate::boundary::{BoxSide, OuterBoundary};

/// How a ghost point is obtained from its origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GhostTransform {
    /// Mirror image in a reflecting side of the domain.
    Reflect(BoxSide),
    /// Translation by an integer number of box periods. Points received from
    /// another rank without periodic wrap use the zero offset.
    Translate(IVec2),
}

impl GhostTransform {
    pub const IDENTITY: GhostTransform = GhostTransform::Translate(IVec2::ZERO);

    pub fn apply(&self, point: DVec2, boundary: &dyn OuterBoundary) -> DVec2 {
        match self {
            GhostTransform::Reflect(side) => boundary.reflect(point, *side),
            GhostTransform::Translate(period) => point + boundary.periodic_shift(*period),
        }
    }

    /// Apply the inverse transform.
    pub fn invert(&self, point: DVec2, boundary: &dyn OuterBoundary) -> DVec2 {
        match self {
            GhostTransform::Reflect(side) => boundary.reflect(point, *side),
            GhostTransform::Translate(period) => point - boundary.periodic_shift(*period),
        }
    }

    pub fn period(&self) -> Option<IVec2> {
        match self {
            GhostTransform::Reflect(_) => None,
            GhostTransform::Translate(period) => Some(*period),
        }
    }

    pub fn is_reflection(&self) -> bool {
        matches!(self, GhostTransform::Reflect(_))
    }
}

/// Where a ghost point comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GhostRecord {
    /// Index of the generating point, on `origin_rank` if set, locally otherwise.
    pub origin: usize,
    pub origin_rank: Option<usize>,
    pub transform: GhostTransform,
}

impl GhostRecord {
    pub fn local(origin: usize, transform: GhostTransform) -> Self {
        Self {
            origin,
            origin_rank: None,
            transform,
        }
    }

    pub fn remote(rank: usize, origin: usize, transform: GhostTransform) -> Self {
        Self {
            origin,
            origin_rank: Some(rank),
            transform,
        }
    }

    pub fn is_local(&self) -> bool {
        self.origin_rank.is_none()
    }

    /// Total order used to add ghosts deterministically.
    pub(crate) fn sort_key(&self) -> (Option<usize>, usize, i32, i32, i32) {
        let (kind, x, y) = match self.transform {
            GhostTransform::Reflect(side) => (0, usize::from(side) as i32, 0),
            GhostTransform::Translate(period) => (1, period.x, period.y),
        };
        (self.origin_rank, self.origin, kind, x, y)
    }
}

/// Ghost records keyed by mesh point index.
///
/// Ghosts occupy the indices `first..first + len()` of the point array. Every
/// record is unique, so a ghost can be looked up from its origin and transform.
#[derive(Debug, Clone, Default)]
pub struct GhostTable {
    first: usize,
    records: Vec<GhostRecord>,
    lookup: HashMap<GhostRecord, usize>,
}

impl GhostTable {
    pub fn new(first: usize) -> Self {
        Self {
            first,
            records: vec![],
            lookup: HashMap::new(),
        }
    }

    pub fn clear(&mut self, first: usize) {
        self.first = first;
        self.records.clear();
        self.lookup.clear();
    }

    pub fn first(&self) -> usize {
        self.first
    }

    /// Move the ghost block after the number of preceding points changed.
    pub fn set_first(&mut self, first: usize) {
        self.first = first;
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, index: usize) -> bool {
        index >= self.first && index < self.first + self.records.len()
    }

    pub fn get(&self, index: usize) -> Option<&GhostRecord> {
        index
            .checked_sub(self.first)
            .and_then(|offset| self.records.get(offset))
    }

    pub fn find(&self, record: &GhostRecord) -> Option<usize> {
        self.lookup.get(record).map(|offset| self.first + offset)
    }

    /// Register a new ghost, returns its index or `None` if it already exists.
    pub fn push(&mut self, record: GhostRecord) -> Option<usize> {
        if self.lookup.contains_key(&record) {
            return None;
        }
        let offset = self.records.len();
        self.lookup.insert(record, offset);
        self.records.push(record);
        Some(self.first + offset)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &GhostRecord)> {
        self.records
            .iter()
            .enumerate()
            .map(move |(offset, record)| (self.first + offset, record))
    }

    /// Keep only the ghosts for which `remap` returns a record, renumbering the
    /// survivors consecutively. Returns the new index of every old ghost.
    pub fn retain_map(
        &mut self,
        first: usize,
        mut remap: impl FnMut(&GhostRecord) -> Option<GhostRecord>,
    ) -> Vec<Option<usize>> {
        let old = std::mem::take(&mut self.records);
        self.clear(first);
        old.iter()
            .map(|record| remap(record).and_then(|record| self.push(record)))
            .collect()
    }
}
