//! Style/run memoization cache (spec.md §4.9).
//!
//! Two-level lookup: `(font_tag, size, raster_flags)` keys a [`StyleNode`]
//! (ascent/descent/column-width, computed once), which in turn keys cached
//! [`Run`]s by the exact rasterized string. Rasterization and texture upload
//! are pure injected services (spec.md §1 "the application's font file loader
//! ... are pure injected services") so this crate never touches a font file or
//! a GPU directly — it calls back through [`GlyphRasterSource`] and
//! [`TextureAllocator`].

use std::collections::HashMap;

use handle::Handle;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RasterFlags: u8 {
        const SMOOTH = 0b01;
        const HINTED = 0b10;
    }
}

/// Identifies a font: derived from the font file path or the in-memory
/// buffer's identity (spec.md §4.9 "Hashing"). Opaque beyond that — the core
/// never opens the file itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FontTag {
    pub data: [u64; 2],
}

impl FontTag {
    pub const fn zero() -> Self {
        Self { data: [0, 0] }
    }

    pub fn from_path(path: &str) -> Self {
        Self {
            data: [fnv1a(path.as_bytes()), fnv1a_seeded(0x9E37_79B9_7F4A_7C15, path.as_bytes())],
        }
    }

    fn style_hash(self, size: f32, flags: RasterFlags) -> u64 {
        self.data[0] ^ self.data[1] ^ (size.to_bits() as u64) ^ flags.bits() as u64
    }
}

/// FNV-1a, matching `font_cache_hash_from_string` in the original source.
fn fnv1a(bytes: &[u8]) -> u64 {
    fnv1a_seeded(0xcbf2_9ce4_8422_2325, bytes)
}

fn fnv1a_seeded(seed: u64, bytes: &[u8]) -> u64 {
    let mut hash = seed;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01B3);
    }
    hash
}

/// 128-bit hash of a run's string, per spec.md §4.9 ("the run hash inside a
/// style is a 128-bit hash of the UTF-8 string").
fn run_hash128(s: &str) -> u128 {
    let lo = fnv1a(s.as_bytes());
    let hi = fnv1a_seeded(0x1234_5678_9abc_def0, s.as_bytes());
    ((hi as u128) << 64) | lo as u128
}

/// One rectangle contributed to a text run (spec.md §3 "Font Atlas").
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Piece {
    pub texture: Handle,
    pub subrect: graphics_types::IRect,
    pub offset: (i16, i16),
    pub advance: f32,
    pub decode_size: u16,
}

/// The cached layout of one styled string as a sequence of pieces.
#[derive(Debug, Clone, PartialEq)]
pub struct Run {
    pub pieces: Vec<Piece>,
    pub dim: (f32, f32),
    pub ascent: f32,
    pub descent: f32,
}

/// Glyph metrics for a font, scaled to a requested pixel size elsewhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct FontMetrics {
    pub ascent: f32,
    pub descent: f32,
}

/// One rasterized run, as handed back by the injected rasterizer.
pub struct RasterResult {
    pub rgba: Vec<u8>,
    pub dim: (u16, u16),
}

/// Pure injected service: turns a font tag into metrics and rasterized runs.
/// The core never reads a font file itself (spec.md §1 Out of scope).
pub trait GlyphRasterSource {
    fn metrics(&self, tag: FontTag) -> Option<FontMetrics>;
    /// Advance width of `ch` at `size` pixels, used to compute the style's
    /// column-width heuristic (spec.md SPEC_FULL §3).
    fn advance_width(&self, tag: FontTag, size: f32, ch: char) -> Option<f32>;
    fn rasterize(&self, tag: FontTag, size: f32, flags: RasterFlags, text: &str) -> Option<RasterResult>;
}

/// Pure injected service: uploads a rasterized run as a GPU texture and
/// returns the handle the renderer will later bind. One call per cache miss
/// (spec.md §4.9: "allocate a new GPU texture, one per run, in the current
/// implementation").
pub trait TextureAllocator {
    fn alloc_rgba(&mut self, size: (u16, u16), data: &[u8]) -> Handle;
}

/// Sample characters used for the column-width heuristic, matching
/// `font_cache.cpp`'s `sample_chars`.
const COLUMN_WIDTH_SAMPLE: &str =
    "0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

struct StyleNode {
    ascent: f32,
    descent: f32,
    column_width: f32,
    runs: HashMap<u128, (String, Run)>,
}

fn column_width_from_advances<F: GlyphRasterSource + ?Sized>(
    source: &F,
    tag: FontTag,
    size: f32,
) -> f32 {
    let mut total = 0.0f32;
    let mut count = 0u32;
    for ch in COLUMN_WIDTH_SAMPLE.chars() {
        if let Some(w) = source.advance_width(tag, size, ch) {
            if w > 0.0 {
                total += w;
                count += 1;
            }
        }
    }
    if count > 0 {
        total / count as f32
    } else {
        size * 0.6
    }
}

/// Frame-scoped arenas backing the cache (spec.md §4.9 "three arenas").
/// `permanent` outlives the cache; `raster` holds working buffers for one
/// rasterization and is cleared on explicit [`FontCache::reset_raster`];
/// `frame` is cleared every [`FontCache::end_frame`].
pub struct FontCache {
    permanent: arena::Arena,
    raster: arena::Arena,
    frame: arena::Arena,
    frame_index: u64,
    styles: HashMap<u64, StyleNode>,
}

impl Default for FontCache {
    fn default() -> Self {
        Self::new()
    }
}

impl FontCache {
    pub fn new() -> Self {
        Self {
            permanent: arena::Arena::new("font-cache-permanent", 256 * 1024),
            raster: arena::Arena::new("font-cache-raster", 64 * 1024),
            frame: arena::Arena::new("font-cache-frame", 64 * 1024),
            frame_index: 0,
            styles: HashMap::new(),
        }
    }

    /// Clears the per-frame scratch arena. Call once per renderer frame.
    pub fn end_frame(&mut self) {
        self.frame.clear();
        self.frame_index += 1;
    }

    /// Clears rasterization working memory. Call after the caller has
    /// finished consuming a rasterize result it no longer needs to retain.
    pub fn reset_raster(&mut self) {
        self.raster.clear();
    }

    fn style_mut<S: GlyphRasterSource + ?Sized>(
        &mut self,
        source: &S,
        tag: FontTag,
        size: f32,
        flags: RasterFlags,
    ) -> &mut StyleNode {
        let hash = tag.style_hash(size, flags);
        self.styles.entry(hash).or_insert_with(|| {
            let metrics = source.metrics(tag).unwrap_or_default();
            let column_width = column_width_from_advances(source, tag, size);
            StyleNode {
                ascent: metrics.ascent * size,
                descent: metrics.descent * size,
                column_width,
                runs: HashMap::new(),
            }
        })
    }

    /// Mean advance of `[0-9A-Za-z]` at `size`, falling back to `0.6 * size`
    /// when the rasterizer can't answer (spec.md §4.9).
    pub fn column_width<S: GlyphRasterSource + ?Sized>(
        &mut self,
        source: &S,
        tag: FontTag,
        size: f32,
    ) -> f32 {
        self.style_mut(source, tag, size, RasterFlags::SMOOTH)
            .column_width
    }

    /// Looks up or builds the [`Run`] for `text` under `(tag, size, flags)`.
    /// A cache hit returns pieces identical to the first call (spec.md §8
    /// scenario 6); a miss rasterizes through `source`, uploads through
    /// `textures`, and memoizes the result for the style's lifetime.
    pub fn run_from_string<S: GlyphRasterSource + ?Sized, T: TextureAllocator + ?Sized>(
        &mut self,
        source: &S,
        textures: &mut T,
        tag: FontTag,
        size: f32,
        flags: RasterFlags,
        text: &str,
    ) -> Option<Run> {
        let string_hash = run_hash128(text);
        let style = self.style_mut(source, tag, size, flags);
        if let Some((cached_text, run)) = style.runs.get(&string_hash) {
            if cached_text == text {
                return Some(run.clone());
            }
        }

        let raster = source.rasterize(tag, size, flags, text)?;
        let texture = textures.alloc_rgba(raster.dim, &raster.rgba);

        let run = Run {
            pieces: vec![Piece {
                texture,
                subrect: graphics_types::IRect {
                    min: (0, 0),
                    max: (raster.dim.0 as i16, raster.dim.1 as i16),
                },
                offset: (0, 0),
                advance: raster.dim.0 as f32,
                decode_size: size as u16,
            }],
            dim: (raster.dim.0 as f32, raster.dim.1 as f32),
            ascent: style.ascent,
            descent: style.descent,
        };

        style.runs.insert(string_hash, (text.to_string(), run.clone()));
        // The permanent arena is the ledger of record for how much cache
        // memory this style has committed; individual run payloads live in
        // the HashMap above (see DESIGN.md for why: owned Rust collections
        // make string/Vec storage far simpler than re-deriving a bump
        // allocator's worth of manual pointer bookkeeping for little benefit).
        self.permanent.push_bytes(0, 1);
        Some(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedFont;

    impl GlyphRasterSource for FixedFont {
        fn metrics(&self, _tag: FontTag) -> Option<FontMetrics> {
            Some(FontMetrics {
                ascent: 0.8,
                descent: 0.2,
            })
        }

        fn advance_width(&self, _tag: FontTag, size: f32, ch: char) -> Option<f32> {
            if ch.is_ascii_alphanumeric() {
                Some(size * 0.55)
            } else {
                None
            }
        }

        fn rasterize(
            &self,
            _tag: FontTag,
            _size: f32,
            _flags: RasterFlags,
            text: &str,
        ) -> Option<RasterResult> {
            let w = (text.len() as u16 * 8).max(1);
            Some(RasterResult {
                rgba: vec![0u8; w as usize * 16 * 4],
                dim: (w, 16),
            })
        }
    }

    struct CountingAllocator {
        next: u64,
        allocations: u32,
    }

    impl TextureAllocator for CountingAllocator {
        fn alloc_rgba(&mut self, _size: (u16, u16), _data: &[u8]) -> Handle {
            self.allocations += 1;
            self.next += 1;
            // Tests only need distinct, stable identity per call; a real
            // caller plugs in the renderer's own handle registry here.
            unsafe { std::mem::transmute::<u128, Handle>(self.next as u128) }
        }
    }

    #[test]
    fn repeated_run_is_a_cache_hit() {
        let font = FixedFont;
        let mut textures = CountingAllocator {
            next: 0,
            allocations: 0,
        };
        let mut cache = FontCache::new();
        let tag = FontTag::from_path("/fonts/demo.ttf");

        let a = cache
            .run_from_string(&font, &mut textures, tag, 16.0, RasterFlags::SMOOTH, "hello")
            .unwrap();
        let b = cache
            .run_from_string(&font, &mut textures, tag, 16.0, RasterFlags::SMOOTH, "hello")
            .unwrap();

        assert_eq!(a.pieces[0].texture, b.pieces[0].texture);
        assert_eq!(a.pieces[0].advance, b.pieces[0].advance);
        assert_eq!(textures.allocations, 1, "second call must not rasterize again");
    }

    #[test]
    fn different_strings_get_distinct_runs() {
        let font = FixedFont;
        let mut textures = CountingAllocator {
            next: 0,
            allocations: 0,
        };
        let mut cache = FontCache::new();
        let tag = FontTag::from_path("/fonts/demo.ttf");

        let a = cache
            .run_from_string(&font, &mut textures, tag, 16.0, RasterFlags::SMOOTH, "hello")
            .unwrap();
        let b = cache
            .run_from_string(&font, &mut textures, tag, 16.0, RasterFlags::SMOOTH, "world!")
            .unwrap();

        assert_ne!(a.pieces[0].texture, b.pieces[0].texture);
        assert_eq!(textures.allocations, 2);
    }

    #[test]
    fn column_width_falls_back_without_metrics() {
        struct Silent;
        impl GlyphRasterSource for Silent {
            fn metrics(&self, _tag: FontTag) -> Option<FontMetrics> {
                None
            }
            fn advance_width(&self, _tag: FontTag, _size: f32, _ch: char) -> Option<f32> {
                None
            }
            fn rasterize(
                &self,
                _tag: FontTag,
                _size: f32,
                _flags: RasterFlags,
                _text: &str,
            ) -> Option<RasterResult> {
                None
            }
        }
        let mut cache = FontCache::new();
        let tag = FontTag::from_path("/fonts/missing.ttf");
        let width = cache.column_width(&Silent, tag, 20.0);
        assert_eq!(width, 20.0 * 0.6);
    }
}
