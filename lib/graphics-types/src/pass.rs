use rustc_hash::FxHashMap;

use crate::geometry::Rect;
use crate::instance::{Mesh3DInstance, Rect2DInstance, VertexFlags};
use handle::Handle;

/// Minimum size of a transient instance batch before the builder opens a new one
/// in the same group, matching the renderer's own transient-buffer growth floor.
pub const DEFAULT_MAX_BATCH_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleKind {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topology {
    Triangles,
    Lines,
    LineStrip,
    Points,
}

/// A contiguous, arena-backed array of same-type instance records submitted as one
/// draw. The core does not interpret a batch's bytes except at encode time.
#[derive(Debug, Clone, Copy)]
pub struct Batch<'a, T> {
    pub instances: &'a [T],
}

impl<T> Batch<'_, T> {
    pub fn byte_len(&self) -> usize {
        std::mem::size_of_val(self.instances)
    }
}

/// Accumulates instances of type `T` host-side, splitting into fresh batches once
/// `max_batch_bytes` worth of instances have been pushed, then copies every sealed
/// batch into the arena on [`finish`](Self::finish). This is the builder-side half
/// of the batch-capacity contract in spec.md §4.3.
pub struct BatchBuilder<T> {
    max_instances: usize,
    sealed: Vec<Vec<T>>,
    current: Vec<T>,
}

impl<T: Copy> BatchBuilder<T> {
    pub fn new(max_batch_bytes: usize) -> Self {
        let stride = std::mem::size_of::<T>().max(1);
        Self {
            max_instances: (max_batch_bytes / stride).max(1),
            sealed: Vec::new(),
            current: Vec::new(),
        }
    }

    pub fn push(&mut self, instance: T) {
        if self.current.len() >= self.max_instances {
            self.seal_current();
        }
        self.current.push(instance);
    }

    fn seal_current(&mut self) {
        if !self.current.is_empty() {
            self.sealed.push(std::mem::take(&mut self.current));
        }
    }

    pub fn finish<'a>(mut self, arena: &'a arena::Arena) -> Vec<Batch<'a, T>> {
        self.seal_current();
        self.sealed
            .into_iter()
            .map(|v| Batch {
                instances: arena.push_slice_copy(&v),
            })
            .collect()
    }
}

/// A set of 2D batches sharing pipeline state: texture, sampler, clip, and
/// transform.
#[derive(Debug, Clone, Copy)]
pub struct BatchGroup2D<'a> {
    pub texture: Handle,
    pub sample_kind: SampleKind,
    /// 2D affine transform applied to every destination rect in this group.
    pub xform: glam::Affine2,
    pub clip: Rect,
    pub transparency: f32,
    pub batches: &'a [Batch<'a, Rect2DInstance>],
}

#[derive(Debug, Clone, Copy)]
pub struct UiParams<'a> {
    pub groups: &'a [BatchGroup2D<'a>],
}

#[derive(Debug, Clone, Copy)]
pub struct BlurParams {
    pub target: Rect,
    pub clip: Rect,
    pub radius_px: f32,
    pub corner_radii: [f32; 4],
}

#[derive(Debug, Clone, Copy)]
pub struct BatchGroup3D<'a> {
    pub vertex_buffer: Handle,
    pub index_buffer: Handle,
    pub topology: Topology,
    pub vertex_flags: VertexFlags,
    pub albedo_texture: Handle,
    pub sample_kind: SampleKind,
    pub xform: glam::Mat4,
    pub batches: &'a [Batch<'a, Mesh3DInstance>],
}

/// Key used by the open-addressed map of 3D batch groups: groups sharing every
/// field but their instance batches are the same draw bucket and should share one
/// entry rather than issuing redundant binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mesh3DGroupKey {
    pub vertex_buffer: Handle,
    pub index_buffer: Handle,
    pub topology: Topology,
    pub vertex_flags: VertexFlags,
    pub albedo_texture: Handle,
    pub sample_kind: SampleKind,
    xform_bits: [u32; 16],
}

impl Mesh3DGroupKey {
    pub fn new(
        vertex_buffer: Handle,
        index_buffer: Handle,
        topology: Topology,
        vertex_flags: VertexFlags,
        albedo_texture: Handle,
        sample_kind: SampleKind,
        xform: glam::Mat4,
    ) -> Self {
        let cols = xform.to_cols_array();
        let mut xform_bits = [0u32; 16];
        for (dst, src) in xform_bits.iter_mut().zip(cols.iter()) {
            *dst = src.to_bits();
        }
        Self {
            vertex_buffer,
            index_buffer,
            topology,
            vertex_flags,
            albedo_texture,
            sample_kind,
            xform_bits,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Mesh3DParams<'a> {
    pub viewport: Rect,
    pub clip: Rect,
    pub view: glam::Mat4,
    pub projection: glam::Mat4,
    pub groups: &'a FxHashMap<Mesh3DGroupKey, BatchGroup3D<'a>>,
}

#[derive(Debug, Clone, Copy)]
pub enum Pass<'a> {
    Ui(UiParams<'a>),
    Blur(BlurParams),
    Mesh3D(Mesh3DParams<'a>),
}

/// A list of passes in submission order. Built by the application (usually via a
/// drawing convenience layer) and handed to the core one window-submit at a time.
/// Nodes live in a caller-provided arena; the list itself is a growable vector per
/// the rewrite's design notes (the source uses a singly-linked list of arena nodes,
/// which a `Vec` models just as cheaply to append to while preserving order).
pub struct PassList<'a> {
    passes: Vec<Pass<'a>>,
}

impl<'a> PassList<'a> {
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    pub fn push(&mut self, pass: Pass<'a>) {
        self.passes.push(pass);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pass<'a>> {
        self.passes.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }
}

impl<'a> Default for PassList<'a> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_builder_opens_new_batch_at_capacity() {
        let arena = arena::Arena::new("test", 4096);
        let mut builder: BatchBuilder<Rect2DInstance> = BatchBuilder::new(
            2 * std::mem::size_of::<Rect2DInstance>(),
        );
        let inst = Rect2DInstance {
            dst: [0.0; 4],
            src: [0.0; 4],
            colors: [[1.0; 4]; 4],
            corner_radii: [0.0; 4],
            extra: [0.0; 4],
        };
        for _ in 0..5 {
            builder.push(inst);
        }
        let batches = builder.finish(&arena);
        // capacity 2 instances/batch, 5 pushed -> 2 + 2 + 1
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].instances.len(), 2);
        assert_eq!(batches[2].instances.len(), 1);
    }

    #[test]
    fn pass_list_preserves_submission_order() {
        let mut list = PassList::new();
        list.push(Pass::Blur(BlurParams {
            target: Rect::from_xywh(0.0, 0.0, 10.0, 10.0),
            clip: Rect::from_xywh(0.0, 0.0, 10.0, 10.0),
            radius_px: 4.0,
            corner_radii: [0.0; 4],
        }));
        list.push(Pass::Ui(UiParams { groups: &[] }));
        let kinds: Vec<_> = list
            .iter()
            .map(|p| matches!(p, Pass::Ui(_)))
            .collect();
        assert_eq!(kinds, vec![false, true]);
    }
}
