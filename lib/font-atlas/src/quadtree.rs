//! Quadtree region allocator backing the font atlas texture (spec.md §4.8).
//!
//! Each node covers a square (or rectangular, for non-square atlases) region and
//! carries a per-corner "max free size" hint: the largest rectangle still
//! allocatable somewhere inside that corner's subtree. `alloc` descends picking
//! the first corner with enough room, creating children lazily; `release` walks
//! back down to the matching node by position and clears it. Parent back-links
//! are arena indices into `Atlas::nodes` rather than raw pointers, per the
//! rewrite's design notes on keeping movable trees index-based.

use graphics_types::IRect;

type Size = (i16, i16);
type Point = (i16, i16);

/// Offset (in child-size units) of each corner's origin within its parent,
/// matching the source's `font_vertex_from_corner`.
const CORNER_VERTEX: [Point; 4] = [(0, 0), (0, 1), (1, 0), (1, 1)];

struct Node {
    parent: Option<usize>,
    children: [Option<usize>; 4],
    /// Largest size still allocatable within each corner's subtree.
    max_free_size: [Size; 4],
    /// This node's own footprint (width, height).
    size: Size,
    taken: bool,
    num_allocated_descendants: u64,
}

impl Node {
    fn leaf(parent: Option<usize>, size: Size) -> Self {
        let half = (size.0 / 2, size.1 / 2);
        Self {
            parent,
            children: [None; 4],
            max_free_size: [half; 4],
            size,
            taken: false,
            num_allocated_descendants: 0,
        }
    }
}

/// A packed quadtree over a fixed-size region (the font atlas texture, or any
/// other rectangle needing power-of-two bin-packing with release support).
pub struct Atlas {
    root_dim: Size,
    nodes: Vec<Node>,
}

fn fits(size: Size, needed: Size) -> bool {
    size.0 >= needed.0 && size.1 >= needed.1
}

impl Atlas {
    pub fn new(root_dim: (i16, i16)) -> Self {
        Self {
            root_dim,
            nodes: vec![Node::leaf(None, root_dim)],
        }
    }

    pub const ROOT: usize = 0;

    /// Allocates a region at least `needed` in size, descending to the
    /// tightest-fitting free node. Returns `None` if the atlas has no room.
    pub fn alloc(&mut self, needed: (i16, i16)) -> Option<IRect> {
        let mut cur = Self::ROOT;
        let mut p0: Point = (0, 0);
        let mut size = self.root_dim;
        // (node, p0, size) of the deepest unallocated candidate seen so far.
        let mut best: Option<(usize, Point, Size)> = None;

        loop {
            if self.nodes[cur].taken {
                break;
            }
            // Once a node has been split it stays split: handing out its
            // whole footprint again would orphan whatever structure (even if
            // currently empty) its children represent, so only an
            // never-subdivided node is a whole-region candidate.
            if self.nodes[cur].num_allocated_descendants == 0 && self.nodes[cur].children == [None; 4] {
                best = Some((cur, p0, size));
            }

            let child_size = (size.0 / 2, size.1 / 2);
            if !fits(child_size, needed) {
                break;
            }

            // Among the corners that fit, prefer the one with the most
            // remaining room rather than the first: a first-fit scan would
            // keep digging into the same already-used corner every time
            // (since it still has enough room) instead of spreading fresh
            // allocations across untouched siblings.
            let mut chosen: Option<(usize, usize)> = None;
            let mut chosen_room: Size = (0, 0);
            for corner in 0..4 {
                if self.nodes[cur].children[corner].is_none() {
                    let child = Node::leaf(Some(cur), child_size);
                    let idx = self.nodes.len();
                    self.nodes.push(child);
                    self.nodes[cur].children[corner] = Some(idx);
                }
                let room = self.nodes[cur].max_free_size[corner];
                if fits(room, needed) {
                    let room_area = room.0 as i32 * room.1 as i32;
                    let chosen_area = chosen_room.0 as i32 * chosen_room.1 as i32;
                    if chosen.is_none() || room_area > chosen_area {
                        chosen = Some((corner, self.nodes[cur].children[corner].unwrap()));
                        chosen_room = room;
                    }
                }
            }
            let Some((corner, child_idx)) = chosen else {
                break;
            };
            let vertex = CORNER_VERTEX[corner];
            p0 = (p0.0 + vertex.0 * child_size.0, p0.1 + vertex.1 * child_size.1);
            cur = child_idx;
            size = child_size;
        }

        let (node, p0, size) = best?;
        self.nodes[node].taken = true;
        self.update_ancestors(node, 1);

        Some(IRect {
            min: p0,
            max: (p0.0 + size.0, p0.1 + size.1),
        })
    }

    /// Releases a region previously returned by [`Atlas::alloc`]. A region that
    /// does not correspond to any currently-taken node is silently ignored.
    pub fn release(&mut self, region: IRect) {
        let region_sz = (region.width(), region.height());
        let mut cur = Self::ROOT;
        let mut cur_p0: Point = (0, 0);

        while self.nodes[cur].size != region_sz {
            let child_size = (self.nodes[cur].size.0 / 2, self.nodes[cur].size.1 / 2);
            let mut found = false;
            for (corner, vertex) in CORNER_VERTEX.iter().enumerate() {
                let child_p0 = (
                    cur_p0.0 + vertex.0 * child_size.0,
                    cur_p0.1 + vertex.1 * child_size.1,
                );
                // `region.min` only needs to land inside this corner's
                // footprint, not sit exactly on it — a released region is
                // typically several levels deeper than its grandparent.
                let contains = region.min.0 >= child_p0.0
                    && region.min.0 < child_p0.0 + child_size.0
                    && region.min.1 >= child_p0.1
                    && region.min.1 < child_p0.1 + child_size.1;
                if contains {
                    if let Some(child_idx) = self.nodes[cur].children[corner] {
                        cur = child_idx;
                        cur_p0 = child_p0;
                        found = true;
                    }
                    break;
                }
            }
            if !found {
                return;
            }
        }

        if cur_p0 == region.min && self.nodes[cur].taken {
            self.nodes[cur].taken = false;
            self.update_ancestors(cur, -1);
        }
    }

    fn update_ancestors(&mut self, leaf: usize, delta: i64) {
        let mut p = self.nodes[leaf].parent;
        while let Some(idx) = p {
            if delta > 0 {
                self.nodes[idx].num_allocated_descendants += 1;
            } else {
                self.nodes[idx].num_allocated_descendants =
                    self.nodes[idx].num_allocated_descendants.saturating_sub(1);
            }
            p = self.nodes[idx].parent;
        }

        let mut p = self.nodes[leaf].parent;
        while let Some(idx) = p {
            self.recompute_max_free_size(idx);
            p = self.nodes[idx].parent;
        }
    }

    /// Recomputes `max_free_size` for `node` from its four children: an
    /// absent child contributes half of `node`'s own size (nothing has ever
    /// been allocated there), an untouched never-subdivided child
    /// contributes its own size, a taken child contributes zero, and any
    /// other child (subdivided, whether or not currently empty — splits
    /// never merge back) contributes the max across its own corner hints.
    /// Shared by both `alloc` and `release` so the two operations can never
    /// disagree about what a corner's hint means.
    fn recompute_max_free_size(&mut self, node: usize) {
        let child_size = (self.nodes[node].size.0 / 2, self.nodes[node].size.1 / 2);
        for corner in 0..4 {
            // A corner whose child was never created has had nothing
            // allocated under it yet, so it is fully free — not zero.
            let max_size: Size = match self.nodes[node].children[corner] {
                None => child_size,
                Some(child_idx) => {
                    let child = &self.nodes[child_idx];
                    if child.taken {
                        (0, 0)
                    } else if child.num_allocated_descendants == 0 && child.children == [None; 4] {
                        child.size
                    } else {
                        let mut m: Size = (0, 0);
                        for c in 0..4 {
                            m.0 = m.0.max(child.max_free_size[c].0);
                            m.1 = m.1.max(child.max_free_size[c].1);
                        }
                        m
                    }
                }
            };
            self.nodes[node].max_free_size[corner] = max_size;
        }
    }

    /// Largest size still allocatable anywhere in the atlas, for diagnostics
    /// and the invariant test below (`max_free_size[c] == 0 iff corner c is
    /// fully saturated`).
    pub fn root_max_free_size(&self) -> [(i16, i16); 4] {
        self.nodes[Self::ROOT].max_free_size
    }

    pub fn root_dim(&self) -> (i16, i16) {
        self.root_dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_and_release_scenario() {
        // spec.md §8 scenario 5.
        let mut atlas = Atlas::new((2048, 2048));

        let r1 = atlas.alloc((1024, 1024)).expect("1024x1024 fits");
        let r2 = atlas.alloc((512, 512)).expect("512x512 fits");
        let r3 = atlas.alloc((512, 512)).expect("512x512 fits");
        let r4 = atlas.alloc((512, 512)).expect("512x512 fits");

        for (a, b) in [(&r1, &r2), (&r1, &r3), (&r1, &r4), (&r2, &r3), (&r2, &r4), (&r3, &r4)] {
            assert!(!a.overlaps(b), "{a:?} overlaps {b:?}");
        }

        atlas.release(r2);

        assert!(
            atlas.alloc((1024, 1024)).is_none(),
            "no quadrant has a free 1024x1024 slot after only a 512x512 release"
        );

        let r5 = atlas.alloc((512, 512)).expect("released region is reusable");
        assert_eq!(r5, r2);
    }

    #[test]
    fn allocated_regions_never_overlap() {
        let mut atlas = Atlas::new((256, 256));
        let mut live = Vec::new();
        for _ in 0..16 {
            if let Some(r) = atlas.alloc((16, 16)) {
                for other in &live {
                    assert!(!r.overlaps(other));
                }
                live.push(r);
            }
        }
        assert_eq!(live.len(), 16);
    }

    #[test]
    fn max_free_size_zero_iff_corner_saturated() {
        let mut atlas = Atlas::new((64, 64));
        assert_ne!(atlas.root_max_free_size()[0], (0, 0));
        // Fill the whole atlas with minimum-size allocations.
        let mut allocated = Vec::new();
        while let Some(r) = atlas.alloc((8, 8)) {
            allocated.push(r);
        }
        for hint in atlas.root_max_free_size() {
            assert_eq!(hint, (0, 0));
        }
        // Releasing one region frees exactly its own corner's capacity.
        let freed = allocated.pop().unwrap();
        atlas.release(freed);
        assert!(atlas.root_max_free_size().iter().any(|h| *h != (0, 0)));
    }

    #[test]
    fn release_is_idempotent_for_unknown_regions() {
        let mut atlas = Atlas::new((128, 128));
        let bogus = IRect {
            min: (1, 1),
            max: (9, 9),
        };
        atlas.release(bogus); // must not panic
        let r = atlas.alloc((128, 128)).expect("atlas still fully free");
        assert_eq!(r.min, (0, 0));
    }
}
