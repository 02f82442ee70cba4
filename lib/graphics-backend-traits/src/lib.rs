pub mod backend;
pub mod shader;

pub use backend::{
    Backend, BackendError, BackendResourceId, FrameBeginResult, ResourceResolver,
    WindowEquipState, WindowSurfaceTarget,
};
pub use shader::{ShaderCompileError, ShaderLang, ShaderSource, ShaderStage, MAX_COMPILED_SHADER_BYTES, SPIRV_MAGIC};
