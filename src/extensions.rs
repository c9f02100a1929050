use erupt::cstr;
use std::os::raw::c_char;

const LAYER_KHRONOS_VALIDATION: *const c_char = cstr!("VK_LAYER_KHRONOS_validation");

/// Vulkan layers and extensions wanted locally, on top of whatever the runtime asks for
pub fn extensions_and_layers(
    validation: bool,
    instance_layers: &mut Vec<*const c_char>,
    instance_extensions: &mut Vec<*const c_char>,
    device_layers: &mut Vec<*const c_char>,
) {
    if validation {
        instance_extensions.push(erupt::extensions::ext_debug_utils::EXT_DEBUG_UTILS_EXTENSION_NAME);
        instance_layers.push(LAYER_KHRONOS_VALIDATION);
        device_layers.push(LAYER_KHRONOS_VALIDATION);
    }
}

/// The runtime reports its required Vulkan extensions as one space-separated string
pub fn split_extension_list(list: &str) -> Vec<std::ffi::CString> {
    list.split(' ')
        .filter(|name| !name.is_empty())
        .filter_map(|name| std::ffi::CString::new(name).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_extension_lists() {
        let names = split_extension_list("VK_KHR_external_memory_capabilities  VK_KHR_get_physical_device_properties2 ");
        assert_eq!(names.len(), 2);
        assert_eq!(names[0].to_str().unwrap(), "VK_KHR_external_memory_capabilities");
        assert!(split_extension_list("").is_empty());
    }

    #[test]
    fn validation_is_opt_in() {
        let (mut il, mut ie, mut dl) = (Vec::new(), Vec::new(), Vec::new());
        extensions_and_layers(false, &mut il, &mut ie, &mut dl);
        assert!(il.is_empty() && ie.is_empty() && dl.is_empty());

        extensions_and_layers(true, &mut il, &mut ie, &mut dl);
        assert_eq!((il.len(), ie.len(), dl.len()), (1, 1, 1));
    }
}
