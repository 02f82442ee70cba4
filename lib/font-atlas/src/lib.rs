pub mod cache;
pub mod quadtree;

pub use cache::{
    FontCache, FontMetrics, FontTag, GlyphRasterSource, Piece, RasterFlags, RasterResult, Run,
    TextureAllocator,
};
pub use quadtree::Atlas;
