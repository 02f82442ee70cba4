use std::ffi::{CStr, CString};

use anyhow::{anyhow, Context};
use ash::vk;
use raw_window_handle::HasDisplayHandle;

/// Owns the `VkInstance` and the loader entry point. Every other Vulkan object the
/// backend creates keeps this alive via `Arc`.
pub struct Instance {
    pub entry: ash::Entry,
    pub vk_instance: ash::Instance,
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl Instance {
    pub fn new(display: &dyn HasDisplayHandle, debug_verbose: bool) -> anyhow::Result<Self> {
        let entry = unsafe { ash::Entry::load() }.context("could not load the Vulkan loader")?;

        let app_name = CString::new("renderer-core").unwrap();
        let engine_name = CString::new("renderer-core").unwrap();
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .engine_name(&engine_name)
            .api_version(vk::API_VERSION_1_1);

        let display_handle = display
            .display_handle()
            .map_err(|err| anyhow!("no display handle available: {err}"))?;
        let mut extension_names =
            ash_window::enumerate_required_extensions(display_handle.as_raw())
                .context("could not enumerate required surface extensions")?
                .to_vec();
        if debug_verbose {
            extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        let layer_names = if debug_verbose {
            vec![CString::new("VK_LAYER_KHRONOS_validation").unwrap()]
        } else {
            Vec::new()
        };
        let layer_name_ptrs: Vec<*const i8> = layer_names.iter().map(|n| n.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extension_names)
            .enabled_layer_names(&layer_name_ptrs);

        let vk_instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(|err| anyhow!("vkCreateInstance failed: {err}"))?;

        let debug_utils = if debug_verbose {
            Some(Self::install_debug_messenger(&entry, &vk_instance)?)
        } else {
            None
        };

        Ok(Self {
            entry,
            vk_instance,
            debug_utils,
        })
    }

    fn install_debug_messenger(
        entry: &ash::Entry,
        vk_instance: &ash::Instance,
    ) -> anyhow::Result<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
        let loader = ash::ext::debug_utils::Instance::new(entry, vk_instance);
        let info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));
        let messenger = unsafe { loader.create_debug_utils_messenger(&info, None) }
            .map_err(|err| anyhow!("failed to install debug messenger: {err}"))?;
        Ok((loader, messenger))
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = unsafe { CStr::from_ptr((*data).p_message) }.to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!(target: "vulkan", "{message}");
    } else {
        log::warn!(target: "vulkan", "{message}");
    }
    vk::FALSE
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let Some((loader, messenger)) = self.debug_utils.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.vk_instance.destroy_instance(None);
        }
    }
}
