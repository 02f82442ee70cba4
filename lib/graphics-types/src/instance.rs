use bytemuck::{Pod, Zeroable};

/// One UI rectangle, drawn as a 4-vertex triangle strip instance. Wire-compatible
/// with the UI vertex shader's expected instance layout.
///
/// Field-by-field per spec: destination rect, source rect, four per-corner colors
/// (bilinearly shaded across the quad), four per-corner radii, and a trailing
/// `(border_thickness, edge_softness, white_texture_override, is_font_texture)`
/// tuple. Summing `dst + src + colors[4] + corner_radii + extras`, each a `vec4`,
/// gives 128 bytes — the figure this core uses; see `DESIGN.md` for why that
/// differs from the prose total elsewhere in the distilled spec.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Rect2DInstance {
    /// `(x0, y0, x1, y1)` in logical pixels.
    pub dst: [f32; 4],
    /// `(u0, v0, u1, v1)` in normalized texture coordinates.
    pub src: [f32; 4],
    /// Corner colors in top-left, top-right, bottom-right, bottom-left order.
    pub colors: [[f32; 4]; 4],
    /// Per-corner radii, same winding as `colors`.
    pub corner_radii: [f32; 4],
    /// `(border_thickness, edge_softness, white_texture_override, is_font_texture)`.
    /// The last two are boolean flags stored as `0.0`/`1.0` so the whole instance
    /// stays a flat float array for the vertex shader.
    pub extra: [f32; 4],
}

const _: () = assert!(std::mem::size_of::<Rect2DInstance>() == 128);

impl Rect2DInstance {
    pub fn border_thickness(&self) -> f32 {
        self.extra[0]
    }

    pub fn edge_softness(&self) -> f32 {
        self.extra[1]
    }

    pub fn white_texture_override(&self) -> bool {
        self.extra[2] != 0.0
    }

    pub fn is_font_texture(&self) -> bool {
        self.extra[3] != 0.0
    }
}

/// One 3D mesh instance: a single model matrix, applied as
/// `projection * view * model * position` in the vertex shader.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Mesh3DInstance {
    pub model: [[f32; 4]; 4],
}

const _: () = assert!(std::mem::size_of::<Mesh3DInstance>() == 64);

impl From<glam::Mat4> for Mesh3DInstance {
    fn from(model: glam::Mat4) -> Self {
        Self {
            model: model.to_cols_array_2d(),
        }
    }
}

/// Fixed vertex layout for 3D mesh geometry: `position(vec3) + texcoord(vec2) +
/// normal(vec3) + color(vec4)`, 48 bytes. Presence of each attribute is advertised
/// separately via [`VertexFlags`] since some meshes omit normals or vertex color.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Mesh3DVertex {
    pub position: [f32; 3],
    pub texcoord: [f32; 2],
    pub normal: [f32; 3],
    pub color: [f32; 4],
}

const _: () = assert!(std::mem::size_of::<Mesh3DVertex>() == 48);

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct VertexFlags: u32 {
        const POSITION = 0b0001;
        const TEXCOORD = 0b0010;
        const NORMAL   = 0b0100;
        const COLOR    = 0b1000;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect2d_instance_round_trips_through_bytes() {
        let inst = Rect2DInstance {
            dst: [50.0, 50.0, 200.0, 150.0],
            src: [0.0, 0.0, 1.0, 1.0],
            colors: [[1.0, 0.0, 0.0, 1.0]; 4],
            corner_radii: [0.0; 4],
            extra: [0.0, 0.0, 1.0, 0.0],
        };
        let bytes = bytemuck::bytes_of(&inst);
        assert_eq!(bytes.len(), 128);
        let back: Rect2DInstance = *bytemuck::from_bytes(bytes);
        assert_eq!(back, inst);
        assert!(back.white_texture_override());
        assert!(!back.is_font_texture());
    }

    #[test]
    fn mesh3d_instance_is_64_bytes() {
        let m = Mesh3DInstance::from(glam::Mat4::IDENTITY);
        assert_eq!(bytemuck::bytes_of(&m).len(), 64);
    }
}
