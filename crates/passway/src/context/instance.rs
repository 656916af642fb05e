use std::{
    ffi::{CStr, CString},
    sync::Arc,
};

use ash::vk;
use const_cstr::const_cstr;
use raw_window_handle::HasDisplayHandle;

use crate::error::InstanceError;

const_cstr! {
    UNKNOWNID = "unknown id";
    NOMSG = "no message";
    VALIDATION_LAYER = "VK_LAYER_KHRONOS_validation";
}

///Forwards validation messages into `log`, or stdout if logging is disabled.
pub unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    #[allow(unused)] message_types: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut core::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }

    let (id, idname, msg) = unsafe {
        let data = &*p_callback_data;
        let idname = if data.p_message_id_name.is_null() {
            UNKNOWNID.as_cstr()
        } else {
            CStr::from_ptr(data.p_message_id_name)
        };
        let msg = if data.p_message.is_null() {
            NOMSG.as_cstr()
        } else {
            CStr::from_ptr(data.p_message)
        };
        (data.message_id_number, idname, msg)
    };

    #[cfg(feature = "logging")]
    {
        if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
            log::error!("[{}: {:?}]: {:?}", id, idname, msg);
        } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
            log::warn!("[{}: {:?}]: {:?}", id, idname, msg);
        } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
            log::info!("[{}: {:?}]: {:?}", id, idname, msg);
        } else {
            log::trace!("[{}: {:?}]: {:?}", id, idname, msg);
        }
    }

    #[cfg(not(feature = "logging"))]
    println!(
        "PasswayDebugMsg: Level: {:?}, Type: {:?}, Id[{}: {:?}]: {:?}",
        message_severity, message_types, id, idname, msg
    );

    vk::FALSE
}

///Validation messenger. Destroys itself when dropped.
pub struct Debugger {
    pub loader: ash::ext::debug_utils::Instance,
    pub messenger: vk::DebugUtilsMessengerEXT,
}

impl Drop for Debugger {
    fn drop(&mut self) {
        unsafe {
            self.loader
                .destroy_debug_utils_messenger(self.messenger, None)
        };
    }
}

///Instance configuration as well as the source entry point. Created via [Instance::load].
pub struct InstanceBuilder {
    pub entry: ash::Entry,
    pub validation: bool,
    pub enabled_layers: Vec<CString>,
    pub enabled_extensions: Vec<CString>,
    available_layers: Vec<vk::LayerProperties>,
    available_extensions: Vec<vk::ExtensionProperties>,
}

impl InstanceBuilder {
    fn is_layer_available(&self, name: &CStr) -> bool {
        self.available_layers
            .iter()
            .any(|l| l.layer_name_as_c_str().map(|n| n == name).unwrap_or(false))
    }

    fn is_extension_available(&self, name: &CStr) -> bool {
        self.available_extensions
            .iter()
            .any(|e| e.extension_name_as_c_str().map(|n| n == name).unwrap_or(false))
    }

    ///adds an extensions with the given name, if it was not added yet.
    pub fn with_extension(mut self, name: CString) -> Result<Self, InstanceError> {
        if !self.is_extension_available(&name) {
            return Err(InstanceError::MissingExtension(name));
        }

        if !self.enabled_extensions.contains(&name) {
            #[cfg(feature = "logging")]
            log::info!("Enabling instance-extension: {:?}", name);
            self.enabled_extensions.push(name);
        }

        Ok(self)
    }

    pub fn with_layer(mut self, name: CString) -> Result<Self, InstanceError> {
        if !self.is_layer_available(&name) {
            return Err(InstanceError::MissingLayer(name));
        }
        if !self.enabled_layers.contains(&name) {
            self.enabled_layers.push(name);
        }
        Ok(self)
    }

    ///Enables all extensions that are needed for the surface behind `handle` to work.
    pub fn for_surface(mut self, handle: &dyn HasDisplayHandle) -> Result<Self, InstanceError> {
        let required = ash_window::enumerate_required_extensions(handle.display_handle()?.as_raw())?;
        for r in required {
            let name = unsafe { CStr::from_ptr(*r) }.to_owned();
            self = self.with_extension(name)?;
        }

        Ok(self)
    }

    ///Enables the khronos validation layer and routes its messages into the log.
    pub fn enable_validation(mut self) -> Self {
        self.validation = true;
        self
    }

    pub fn build(mut self, application_name: &CStr) -> Result<Arc<Instance>, InstanceError> {
        if self.validation {
            self = self.with_layer(VALIDATION_LAYER.as_cstr().to_owned())?;
            self = self.with_extension(ash::ext::debug_utils::NAME.to_owned())?;
        }

        let app_desc = vk::ApplicationInfo::default()
            .application_name(application_name)
            .engine_name(c"passway")
            .api_version(vk::make_api_version(
                0,
                Instance::API_VERSION_MAJOR,
                Instance::API_VERSION_MINOR,
                0,
            ));

        #[cfg(feature = "logging")]
        {
            log::info!("Instance creation:");
            log::info!("  Layers:");
            for l in &self.enabled_layers {
                log::info!("    {:?}", l);
            }
            log::info!("  Extensions:");
            for e in &self.enabled_extensions {
                log::info!("    {:?}", e);
            }
        }

        let extensions = self
            .enabled_extensions
            .iter()
            .map(|ext| ext.as_ptr())
            .collect::<Vec<_>>();
        let layers = self
            .enabled_layers
            .iter()
            .map(|l| l.as_ptr())
            .collect::<Vec<_>>();

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_desc)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let inner = unsafe { self.entry.create_instance(&create_info, None)? };

        let debugger = if self.validation {
            let loader = ash::ext::debug_utils::Instance::new(&self.entry, &inner);
            let info = vk::DebugUtilsMessengerCreateInfoEXT::default()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                        | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(vulkan_debug_callback));
            match unsafe { loader.create_debug_utils_messenger(&info, None) } {
                Ok(messenger) => Some(Debugger { loader, messenger }),
                Err(e) => {
                    unsafe { inner.destroy_instance(None) };
                    return Err(e.into());
                }
            }
        } else {
            None
        };

        Ok(Arc::new(Instance {
            entry: self.entry,
            inner,
            debugger,
        }))
    }
}

///Wraps the entry point as well as the created instance into one object.
pub struct Instance {
    pub entry: ash::Entry,
    pub inner: ash::Instance,
    pub debugger: Option<Debugger>,
}

impl Instance {
    pub const API_VERSION_MAJOR: u32 = 1;
    ///Dynamic rendering and synchronization2 are core since 1.3.
    pub const API_VERSION_MINOR: u32 = 3;

    ///Loads the Vulkan library at runtime and queries available layers and extensions.
    pub fn load() -> Result<InstanceBuilder, InstanceError> {
        let entry = unsafe { ash::Entry::load()? };
        let available_layers = unsafe { entry.enumerate_instance_layer_properties()? };
        let available_extensions = unsafe { entry.enumerate_instance_extension_properties(None)? };

        Ok(InstanceBuilder {
            entry,
            validation: false,
            enabled_layers: Vec::new(),
            enabled_extensions: Vec::new(),
            available_layers,
            available_extensions,
        })
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        //messenger must go before the instance
        self.debugger.take();
        unsafe {
            self.inner.destroy_instance(None);
        }
    }
}
