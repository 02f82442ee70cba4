pub mod backend_impl;
pub mod device;
pub mod instance;
pub mod instance_pool;
pub mod phy_device;
pub mod pipelines;
pub mod resources;
pub mod shader;
pub mod shaders;
pub mod swapchain;
pub mod window_equip;

pub use backend_impl::VulkanBackend;
