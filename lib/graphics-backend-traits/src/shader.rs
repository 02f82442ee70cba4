use thiserror::Error;

/// SPIR-V magic number (little-endian), used to detect pre-compiled bytecode
/// without needing a file extension or explicit tag.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Compiled SPIR-V module size cap (spec.md §6).
pub const MAX_COMPILED_SHADER_BYTES: usize = 128 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

/// What the shader toolchain (out of scope, spec.md §1) hands the core: either
/// ready bytecode, or source text the core pipes through an external compiler.
#[derive(Debug, Clone)]
pub enum ShaderSource {
    SpirV(Vec<u8>),
    Source { lang: ShaderLang, text: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderLang {
    Glsl,
    Wgsl,
}

impl ShaderSource {
    /// Detects pre-compiled SPIR-V by its magic word, matching the first four
    /// bytes of the blob against [`SPIRV_MAGIC`].
    pub fn detect(bytes: &[u8]) -> Option<Vec<u8>> {
        if bytes.len() >= 4 {
            let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            if magic == SPIRV_MAGIC {
                return Some(bytes.to_vec());
            }
        }
        None
    }
}

#[derive(Debug, Error)]
pub enum ShaderCompileError {
    #[error("no SPIR-V compiler found on PATH (tried glslc, glslangValidator)")]
    NoCompilerFound,
    #[error("external compiler exited with an error: {0}")]
    CompilerFailed(String),
    #[error("compiled module ({actual} bytes) exceeds the {cap} byte cap")]
    TooLarge { actual: usize, cap: usize },
    #[error("i/o error while compiling: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_spirv_magic() {
        let mut bytes = SPIRV_MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0u8; 16]);
        assert!(ShaderSource::detect(&bytes).is_some());
    }

    #[test]
    fn rejects_non_spirv() {
        assert!(ShaderSource::detect(b"#version 450\n").is_none());
    }
}
