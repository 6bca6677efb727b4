//! Instance creation.

use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;

use ash::extensions::ext::DebugUtils;
use ash::vk;
use log::{debug, info, warn};

use crate::error::{Error, Result};

const VALIDATION_LAYER: &CStr =
    unsafe { CStr::from_bytes_with_nul_unchecked(b"VK_LAYER_KHRONOS_validation\0") };

/// Debug callback for the vulkan debug utils extension.
unsafe extern "system" fn vulkan_debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        warn!("{:?}", message);
    } else {
        debug!("{:?}", message);
    }
    vk::FALSE
}

/// Wraps the vulkan entry points and instance, plus the debug messenger when
/// validation is enabled.
pub struct Instance {
    entry: ash::Entry,
    pointers: ash::Instance,
    debug_utils: DebugUtils,
    debug_messenger: vk::DebugUtilsMessengerEXT,
}

impl Instance {
    /// Creates the instance. `extra_extensions` carries whatever the host
    /// needs on top of the analysis core (a presenting host passes its
    /// surface extensions here).
    pub fn new(extra_extensions: &[String], validation: bool) -> Result<Instance> {
        let entry = unsafe { ash::Entry::load().map_err(Error::Loader)? };

        let app_name = CStr::from_bytes_with_nul(b"flop\0").unwrap();
        let app_info = vk::ApplicationInfo::builder()
            .application_name(app_name)
            .application_version(0)
            .engine_name(app_name)
            .engine_version(0)
            .api_version(vk::API_VERSION_1_2);

        let extra_names: Vec<CString> = extra_extensions
            .iter()
            .map(|name| CString::new(name.as_str()).unwrap())
            .collect();
        let mut extension_names: Vec<*const c_char> = vec![
            vk::KhrGetPhysicalDeviceProperties2Fn::name().as_ptr(),
            DebugUtils::name().as_ptr(),
        ];
        extension_names.extend(extra_names.iter().map(|name| name.as_ptr()));

        let mut layer_names: Vec<*const c_char> = Vec::new();
        if validation {
            info!("vulkan validation requested");
            layer_names.push(VALIDATION_LAYER.as_ptr());
        }

        let mut debug_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
            )
            .pfn_user_callback(Some(vulkan_debug_callback));

        let mut create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_layer_names(&layer_names)
            .enabled_extension_names(&extension_names);
        if validation {
            create_info = create_info.push_next(&mut debug_info);
        }

        let pointers = unsafe {
            entry
                .create_instance(&create_info, None)
                .map_err(Error::InstanceCreation)?
        };

        let debug_utils = DebugUtils::new(&entry, &pointers);
        let debug_messenger = if validation {
            let messenger_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
                )
                .pfn_user_callback(Some(vulkan_debug_callback));
            unsafe {
                debug_utils
                    .create_debug_utils_messenger(&messenger_info, None)
                    .unwrap_or(vk::DebugUtilsMessengerEXT::null())
            }
        } else {
            vk::DebugUtilsMessengerEXT::null()
        };

        Ok(Instance {
            entry,
            pointers,
            debug_utils,
            debug_messenger,
        })
    }

    pub fn entry_pointers(&self) -> &ash::Entry {
        &self.entry
    }

    pub fn pointers(&self) -> &ash::Instance {
        &self.pointers
    }

    /// Tears the instance down. Called by the context after the device is
    /// gone; not a `Drop` impl so destruction order stays explicit.
    pub(crate) unsafe fn destroy(&mut self) {
        if self.debug_messenger != vk::DebugUtilsMessengerEXT::null() {
            self.debug_utils
                .destroy_debug_utils_messenger(self.debug_messenger, None);
            self.debug_messenger = vk::DebugUtilsMessengerEXT::null();
        }
        self.pointers.destroy_instance(None);
    }
}
