/// Present-mode preference, exposed as a plain config enum rather than the
/// source's unconditional `IMMEDIATE` preference (design notes, spec.md §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PresentMode {
    VSync,
    #[default]
    Immediate,
    Mailbox,
}

/// GPU vendor/device classification surfaced read-only from `renderer_init`'s
/// device-selection step (spec.md SPEC_FULL §3 "GPU enumeration").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuKind {
    Discrete,
    Integrated,
    Virtual,
    Cpu,
}

#[derive(Debug, Clone)]
pub struct GpuInfo {
    pub name: String,
    pub kind: GpuKind,
}

#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    pub allows_linear_blitting: bool,
    pub optimal_rgba_image_blitting: bool,
    pub linear_rgba_image_blitting: bool,
    pub optimal_swap_chain_image_blitting: bool,
}

/// Renderer-wide configuration. Nothing here is read from the environment, a CLI,
/// or disk by the core itself — the application constructs this and passes it to
/// `renderer_init`.
#[derive(Debug, Clone)]
pub struct RendererConfig {
    pub present_mode: PresentMode,
    /// Pin device selection to a GPU name; `None` selects automatically.
    pub preferred_gpu: Option<String>,
    pub debug_verbose: bool,
    pub staging_buffer_size: u64,
    pub uniform_buffer_size: u64,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            present_mode: PresentMode::default(),
            preferred_gpu: None,
            debug_verbose: false,
            staging_buffer_size: 64 * 1024 * 1024,
            uniform_buffer_size: 16 * 1024 * 1024,
        }
    }
}
