//! Decides once, before the instance exists, which optional runtime features this run uses.
use crate::settings::Settings;
use anyhow::{ensure, Result};
use log::info;

/// Optional features active for the lifetime of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// XR_EXT_hand_tracking, and the system reports support for it
    pub hand_tracking: bool,
    /// XR_KHR_composition_layer_depth, and a usable depth format is offered
    pub depth_layer: bool,
    /// XR_KHR_composition_layer_cylinder
    pub cylinder_layer: bool,
    /// Quad layers are core OpenXR; only the user can turn them off
    pub quad_layer: bool,
}

impl Capabilities {
    /// Inspect the runtime's extension list. Fails only when the graphics interop extension is
    /// missing; every other absence just clears the matching flag.
    pub fn negotiate(available: &xr::ExtensionSet, settings: &Settings) -> Result<Self> {
        ensure!(
            available.khr_vulkan_enable,
            "Runtime does not support XR_KHR_vulkan_enable"
        );

        let caps = Self {
            hand_tracking: available.ext_hand_tracking && !settings.no_hand_tracking,
            depth_layer: available.khr_composition_layer_depth && !settings.no_depth,
            cylinder_layer: available.khr_composition_layer_cylinder && !settings.no_cylinder,
            quad_layer: !settings.no_quad,
        };

        info!("XR_KHR_vulkan_enable: {}", available.khr_vulkan_enable);
        info!("XR_EXT_hand_tracking: {}", available.ext_hand_tracking);
        info!(
            "XR_KHR_composition_layer_depth: {}",
            available.khr_composition_layer_depth
        );
        info!(
            "XR_KHR_composition_layer_cylinder: {}",
            available.khr_composition_layer_cylinder
        );

        Ok(caps)
    }

    /// Extensions to request at instance creation
    pub fn enabled_extensions(&self) -> xr::ExtensionSet {
        let mut enabled = xr::ExtensionSet::default();
        enabled.khr_vulkan_enable = true;
        enabled.ext_hand_tracking = self.hand_tracking;
        enabled.khr_composition_layer_depth = self.depth_layer;
        enabled.khr_composition_layer_cylinder = self.cylinder_layer;
        enabled
    }

    /// Hand tracking stays on only if the system itself can track hands
    pub fn with_system_hand_tracking(mut self, system_supports: bool) -> Self {
        if self.hand_tracking && !system_supports {
            info!("Runtime exposes hand tracking but this system cannot track hands");
        }
        self.hand_tracking &= system_supports;
        self
    }

    /// Depth submission needs a depth swapchain format; without one, fall back to local depth
    pub fn with_depth_format(mut self, format: Option<u32>) -> Self {
        if self.depth_layer && format.is_none() {
            info!("No preferred depth swapchain format offered, not submitting depth");
        }
        self.depth_layer &= format.is_some();
        self
    }
}

/// Pick the first of `preferred` the runtime offers, else the runtime's first offer.
/// Returns `None` only when nothing is offered at all.
pub fn pick_format(offered: &[u32], preferred: &[u32]) -> Option<u32> {
    preferred
        .iter()
        .copied()
        .find(|format| offered.contains(format))
        .or_else(|| offered.first().copied())
}

/// Pick a format only if it is one of `preferred`
pub fn pick_exact_format(offered: &[u32], preferred: &[u32]) -> Option<u32> {
    preferred
        .iter()
        .copied()
        .find(|format| offered.contains(format))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vulkan_only() -> xr::ExtensionSet {
        let mut set = xr::ExtensionSet::default();
        set.khr_vulkan_enable = true;
        set
    }

    #[test]
    fn missing_interop_is_fatal() {
        let mut set = xr::ExtensionSet::default();
        set.ext_hand_tracking = true;
        set.khr_composition_layer_cylinder = true;
        assert!(Capabilities::negotiate(&set, &Settings::default()).is_err());
    }

    #[test]
    fn missing_optional_extensions_clear_flags() {
        let caps = Capabilities::negotiate(&vulkan_only(), &Settings::default()).unwrap();
        assert!(!caps.hand_tracking);
        assert!(!caps.depth_layer);
        assert!(!caps.cylinder_layer);
        assert!(caps.quad_layer);

        let enabled = caps.enabled_extensions();
        assert!(enabled.khr_vulkan_enable);
        assert!(!enabled.ext_hand_tracking);
        assert!(!enabled.khr_composition_layer_cylinder);
    }

    #[test]
    fn everything_supported() {
        let mut set = vulkan_only();
        set.ext_hand_tracking = true;
        set.khr_composition_layer_depth = true;
        set.khr_composition_layer_cylinder = true;
        let caps = Capabilities::negotiate(&set, &Settings::default()).unwrap();
        assert!(caps.hand_tracking && caps.depth_layer && caps.cylinder_layer);

        let enabled = caps.enabled_extensions();
        assert!(enabled.ext_hand_tracking);
        assert!(enabled.khr_composition_layer_depth);
        assert!(enabled.khr_composition_layer_cylinder);
    }

    #[test]
    fn settings_force_features_off() {
        let mut set = vulkan_only();
        set.ext_hand_tracking = true;
        set.khr_composition_layer_cylinder = true;
        let settings = Settings {
            no_hand_tracking: true,
            no_cylinder: true,
            no_quad: true,
            ..Settings::default()
        };
        let caps = Capabilities::negotiate(&set, &settings).unwrap();
        assert_eq!(caps, Capabilities::default());
    }

    #[test]
    fn system_and_format_downgrades() {
        let mut set = vulkan_only();
        set.ext_hand_tracking = true;
        set.khr_composition_layer_depth = true;
        let caps = Capabilities::negotiate(&set, &Settings::default())
            .unwrap()
            .with_system_hand_tracking(false)
            .with_depth_format(None);
        assert!(!caps.hand_tracking);
        assert!(!caps.depth_layer);

        // Never upgrades a flag the extension list cleared
        let caps = Capabilities::negotiate(&vulkan_only(), &Settings::default())
            .unwrap()
            .with_system_hand_tracking(true)
            .with_depth_format(Some(126));
        assert!(!caps.hand_tracking);
        assert!(!caps.depth_layer);
    }

    #[test]
    fn format_fallback() {
        let offered = [44, 50, 43];
        assert_eq!(pick_format(&offered, &[43, 50]), Some(43));
        assert_eq!(pick_format(&offered, &[37]), Some(44));
        assert_eq!(pick_format(&[], &[37]), None);
        assert_eq!(pick_exact_format(&offered, &[126]), None);
        assert_eq!(pick_exact_format(&offered, &[126, 50]), Some(50));
    }
}
