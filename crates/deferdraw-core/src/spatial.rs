use rstar::{RTree, RTreeObject, AABB};

use crate::geometry::BBox;

/// An entry in the footprint index, referencing an operation by its position in a batch.
#[derive(Debug, Clone)]
pub struct FootprintEntry {
    /// Index of the operation within its batch.
    pub op_index: usize,
    /// Screen-space bounds of the operation.
    pub bbox: BBox,
}

impl RTreeObject for FootprintEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [self.bbox.min.x, self.bbox.min.y],
            [self.bbox.max.x, self.bbox.max.y],
        )
    }
}

/// Spatial index over the screen-space footprints of deferred operations.
///
/// rstar envelopes are closed, so candidates are re-checked with the strict
/// [`BBox::intersects`] to keep edge-touching footprints independent.
#[derive(Debug)]
pub struct BoundsIndex {
    tree: RTree<FootprintEntry>,
}

impl BoundsIndex {
    pub fn new() -> Self {
        Self { tree: RTree::new() }
    }

    /// Empty footprints are never stored; they cannot overlap anything.
    pub fn insert(&mut self, op_index: usize, bbox: BBox) {
        if bbox.is_empty() {
            return;
        }
        self.tree.insert(FootprintEntry { op_index, bbox });
    }

    /// First overlapping entry, if any.
    pub fn first_overlapping(&self, rect: &BBox) -> Option<&FootprintEntry> {
        if rect.is_empty() {
            return None;
        }
        let envelope = AABB::from_corners([rect.min.x, rect.min.y], [rect.max.x, rect.max.y]);
        self.tree
            .locate_in_envelope_intersecting(&envelope)
            .find(|entry| entry.bbox.intersects(rect))
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}

impl Default for BoundsIndex {
    fn default() -> Self {
        Self::new()
    }
}
