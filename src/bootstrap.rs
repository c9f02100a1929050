//! Brings up the runtime connection, the Vulkan device it wants, the session and every
//! swapchain, then hands the lot to the frame loop as one `Context`.
use crate::capabilities::{pick_exact_format, pick_format, Capabilities};
use crate::core::{VkPrelude, DEPTH_FORMAT};
use crate::input::Actions;
use crate::layers::{layer_pattern, LAYER_IMAGE_HEIGHT, LAYER_IMAGE_WIDTH};
use crate::mirror::DesktopWindow;
use crate::renderer::{LayerUpload, Renderer, ViewTargets};
use crate::runtime::InputSource;
use crate::settings::Settings;
use crate::xr_session::{LayerImage, ViewSwapchains, XrSession, VIEW_TYPE};
use anyhow::{bail, ensure, format_err, Context as _, Result};
use erupt::vk1_0 as vk;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;

const COLOR_FORMATS: [vk::Format; 2] = [vk::Format::R8G8B8A8_SRGB, vk::Format::B8G8R8A8_SRGB];
const LAYER_FORMATS: [vk::Format; 2] = [vk::Format::R8G8B8A8_UNORM, vk::Format::B8G8R8A8_UNORM];

/// How often to re-poll while waiting for the session to become ready
const READY_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Everything a running session needs, owned in one place
pub struct Context {
    pub caps: Capabilities,
    /// Last session state seen during bootstrap
    pub session_state: xr::SessionState,
    pub xr: XrSession,
    pub renderer: Renderer,
    pub window: DesktopWindow,
    prelude: Arc<VkPrelude>,
}

/// Bring up a running session, or fail with the step that went wrong
pub fn bootstrap(settings: &Settings) -> Result<Context> {
    // Load OpenXR runtime
    let entry = unsafe { xr::Entry::load() }.context("Loading the OpenXR loader")?;

    let available_extensions = entry
        .enumerate_extensions()
        .context("Enumerating runtime extensions")?;
    let caps = Capabilities::negotiate(&available_extensions, settings)?;

    let instance = entry
        .create_instance(
            &xr::ApplicationInfo {
                application_name: crate::APP_NAME,
                application_version: 1,
                engine_name: crate::ENGINE_NAME,
                engine_version: 1,
            },
            &caps.enabled_extensions(),
            &[],
        )
        .context("Creating OpenXR instance")?;

    let instance_props = instance.properties().context("Instance properties")?;
    info!(
        "Loaded OpenXR runtime: {} {}",
        instance_props.runtime_name, instance_props.runtime_version
    );

    let system = instance
        .system(xr::FormFactor::HEAD_MOUNTED_DISPLAY)
        .context("Getting head mounted display system")?;
    log_system(&instance, system)?;

    let caps = if caps.hand_tracking {
        caps.with_system_hand_tracking(
            instance
                .supports_hand_tracking(system)
                .context("Querying hand tracking support")?,
        )
    } else {
        caps
    };

    let view_configs = instance
        .enumerate_view_configurations(system)
        .context("Enumerating view configurations")?;
    info!("Supported view configurations: {:?}", view_configs);
    ensure!(
        view_configs.contains(&VIEW_TYPE),
        "System does not support {:?}",
        VIEW_TYPE
    );

    let view_config_views = instance
        .enumerate_view_configuration_views(system, VIEW_TYPE)
        .context("Enumerating view configuration views")?;
    for (index, view) in view_config_views.iter().enumerate() {
        info!(
            "View {}: recommended {}x{} ({} samples), max {}x{} ({} samples)",
            index,
            view.recommended_image_rect_width,
            view.recommended_image_rect_height,
            view.recommended_swapchain_sample_count,
            view.max_image_rect_width,
            view.max_image_rect_height,
            view.max_swapchain_sample_count,
        );
    }
    let first_view = view_config_views
        .first()
        .context("Runtime reported no views")?;

    let blend_mode = pick_blend_mode(
        &instance
            .enumerate_environment_blend_modes(system, VIEW_TYPE)
            .context("Enumerating blend modes")?,
    );
    info!("Environment blend mode {:?}", blend_mode);

    let mut window = DesktopWindow::new(
        first_view.recommended_image_rect_width,
        first_view.recommended_image_rect_height,
    )?;

    let mirror_window = if settings.no_mirror {
        None
    } else {
        Some(&window.window)
    };
    let prelude = Arc::new(VkPrelude::from_openxr(
        &instance,
        system,
        mirror_window,
        settings.validation,
    )?);

    let (session, frame_waiter, frame_stream) = unsafe {
        instance.create_session::<xr::Vulkan>(
            system,
            &xr::vulkan::SessionCreateInfo {
                instance: prelude.instance.handle.0 as _,
                physical_device: prelude.physical_device.0 as _,
                device: prelude.device.handle.0 as _,
                queue_family_index: prelude.queue_family_index,
                queue_index: 0,
            },
        )
    }
    .context("Creating session")?;

    let actions = Actions::new(&instance, &session)?;

    let (caps, hand_trackers) = if caps.hand_tracking {
        let trackers = session
            .create_hand_tracker(xr::Hand::LEFT)
            .and_then(|left| Ok([left, session.create_hand_tracker(xr::Hand::RIGHT)?]));
        match trackers {
            Ok(trackers) => (caps, Some(trackers)),
            Err(e) => {
                warn!("Failed to create hand trackers, hand tracking disabled: {}", e);
                (
                    Capabilities {
                        hand_tracking: false,
                        ..caps
                    },
                    None,
                )
            }
        }
    } else {
        (caps, None)
    };

    let space = create_reference_space(&session, settings.reference_space.to_xr())?;

    let mut event_buffer = xr::EventDataBuffer::new();
    let session_state = wait_until_ready(&instance, &mut event_buffer, &mut window)?;
    session.begin(VIEW_TYPE).context("Beginning session")?;
    info!("Session began");

    // Swapchain formats
    let formats = session
        .enumerate_swapchain_formats()
        .context("Enumerating swapchain formats")?;
    info!(
        "Offered swapchain formats: {:?}",
        formats.iter().map(|&f| vk::Format(f as i32)).collect::<Vec<_>>()
    );

    let color_format = pick_format(&formats, &raw_formats(&COLOR_FORMATS))
        .map(|f| vk::Format(f as i32))
        .context("Runtime offers no swapchain formats")?;
    info!("Color swapchain format {:?}", color_format);

    let caps = caps.with_depth_format(pick_exact_format(
        &formats,
        &[DEPTH_FORMAT.0 as u32],
    ));

    let layer_target = layer_format(&formats).filter(|&(format, upload)| {
        upload != LayerUpload::Blit || prelude.can_blit_to(format)
    });
    let caps = match layer_target {
        Some((format, upload)) => {
            info!("Layer swapchain format {:?} ({:?})", format, upload);
            caps
        }
        None => {
            if caps.quad_layer || caps.cylinder_layer {
                warn!(
                    "No layer swapchain format the pattern can be written to, \
                     quad and cylinder disabled"
                );
            }
            Capabilities {
                quad_layer: false,
                cylinder_layer: false,
                ..caps
            }
        }
    };
    info!("Capabilities in use: {:?}", caps);

    // Per-view swapchains
    let mut views = Vec::with_capacity(view_config_views.len());
    let mut targets = Vec::with_capacity(view_config_views.len());
    for (index, view) in view_config_views.iter().enumerate() {
        let (width, height) = (
            view.recommended_image_rect_width,
            view.recommended_image_rect_height,
        );

        let color = session
            .create_swapchain(&swapchain_info(
                color_format,
                width,
                height,
                xr::SwapchainUsageFlags::COLOR_ATTACHMENT | xr::SwapchainUsageFlags::TRANSFER_SRC,
                xr::SwapchainCreateFlags::EMPTY,
            ))
            .with_context(|| format!("Creating color swapchain for view {}", index))?;
        let color_images = swapchain_images(&color)
            .with_context(|| format!("Color swapchain images for view {}", index))?;

        let (depth, depth_images) = if caps.depth_layer {
            let depth = session
                .create_swapchain(&swapchain_info(
                    DEPTH_FORMAT,
                    width,
                    height,
                    xr::SwapchainUsageFlags::DEPTH_STENCIL_ATTACHMENT
                        | xr::SwapchainUsageFlags::TRANSFER_DST,
                    xr::SwapchainCreateFlags::EMPTY,
                ))
                .with_context(|| format!("Creating depth swapchain for view {}", index))?;
            let images = swapchain_images(&depth)
                .with_context(|| format!("Depth swapchain images for view {}", index))?;
            (Some(depth), images)
        } else {
            (None, Vec::new())
        };

        info!(
            "View {}: {} color images, {} depth images at {}x{}",
            index,
            color_images.len(),
            depth_images.len(),
            width,
            height
        );

        let extent = xr::Extent2Di {
            width: width as i32,
            height: height as i32,
        };
        views.push(ViewSwapchains {
            color,
            depth,
            extent,
        });
        targets.push(ViewTargets {
            extent: vk::Extent2D { width, height },
            color: color_images,
            depth: depth_images,
        });
    }

    let mut renderer = Renderer::new(
        prelude.clone(),
        color_format,
        &settings.shaders,
        targets,
        !settings.no_mirror,
    )?;

    // Static layer images
    let pattern = layer_pattern(LAYER_IMAGE_WIDTH, LAYER_IMAGE_HEIGHT);
    let mut layer_image = |enabled: bool, name: &str| -> Result<Option<LayerImage>> {
        let (format, upload) = match layer_target {
            Some(target) if enabled => target,
            _ => return Ok(None),
        };
        create_layer_image(&session, &mut renderer, format, upload, &pattern)
            .with_context(|| format!("Creating {} layer image", name))
            .map(Some)
    };
    let quad = layer_image(caps.quad_layer, "quad")?;
    let cylinder = layer_image(caps.cylinder_layer, "cylinder")?;

    let xr = XrSession {
        instance,
        session,
        frame_waiter,
        frame_stream,
        space,
        blend_mode,
        views,
        quad,
        cylinder,
        actions,
        hand_trackers,
        event_buffer,
    };

    Ok(Context {
        caps,
        session_state,
        xr,
        renderer,
        window,
        prelude,
    })
}

impl Context {
    /// Tear everything down in dependency order. Failures are logged, never returned.
    pub fn shutdown(self) {
        let Context {
            xr,
            mut renderer,
            window,
            prelude,
            ..
        } = self;

        renderer.free();
        drop(renderer);

        if let Err(e) = xr.session.end() {
            warn!("Failed to end session: {}", e);
        }
        drop(xr);
        drop(window);

        match Arc::try_unwrap(prelude) {
            Ok(mut prelude) => prelude.destroy(),
            Err(_) => error!("Vulkan device still referenced at shutdown, leaking it"),
        }
        info!("Shut down");
    }
}

fn log_system(instance: &xr::Instance, system: xr::SystemId) -> Result<()> {
    let props = instance
        .system_properties(system)
        .context("System properties")?;
    info!(
        "System: {} (vendor {:#x})",
        props.system_name, props.vendor_id
    );
    info!(
        "Max layers {}, max swapchain {}x{}",
        props.graphics_properties.max_layer_count,
        props.graphics_properties.max_swapchain_image_width,
        props.graphics_properties.max_swapchain_image_height,
    );
    info!(
        "Orientation tracking: {}, position tracking: {}",
        props.tracking_properties.orientation_tracking,
        props.tracking_properties.position_tracking,
    );
    Ok(())
}

/// Stage space is not universal; fall back to local space when the runtime lacks it
fn create_reference_space(
    session: &xr::Session<xr::Vulkan>,
    wanted: xr::ReferenceSpaceType,
) -> Result<xr::Space> {
    let supported = session
        .enumerate_reference_spaces()
        .context("Enumerating reference spaces")?;
    info!("Supported reference spaces: {:?}", supported);

    let ty = if supported.contains(&wanted) {
        wanted
    } else {
        warn!(
            "Reference space {:?} unsupported, using {:?}",
            wanted,
            xr::ReferenceSpaceType::LOCAL
        );
        xr::ReferenceSpaceType::LOCAL
    };

    session
        .create_reference_space(ty, xr::Posef::IDENTITY)
        .context("Creating reference space")
}

/// Poll notifications until the runtime says the session may begin
fn wait_until_ready(
    instance: &xr::Instance,
    event_buffer: &mut xr::EventDataBuffer,
    window: &mut DesktopWindow,
) -> Result<xr::SessionState> {
    info!("Waiting for the session to become ready");
    loop {
        while let Some(event) = instance
            .poll_event(event_buffer)
            .context("Polling runtime events")?
        {
            match event {
                xr::Event::SessionStateChanged(e) => {
                    let state = e.state();
                    info!("Session state changed to {:?}", state);
                    match readiness(state) {
                        Readiness::Ready => return Ok(state),
                        Readiness::Waiting => (),
                        Readiness::Ended => {
                            bail!("Session reached {:?} before it became ready", state)
                        }
                    }
                }
                xr::Event::InstanceLossPending(_) => {
                    return Err(format_err!("Instance lost before the session became ready"))
                }
                _ => (),
            }
        }

        if window.poll_exit_requested() {
            bail!("Interrupted before the session became ready");
        }
        std::thread::sleep(READY_POLL_INTERVAL);
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Readiness {
    Waiting,
    Ready,
    Ended,
}

fn readiness(state: xr::SessionState) -> Readiness {
    match state {
        xr::SessionState::READY => Readiness::Ready,
        xr::SessionState::STOPPING
        | xr::SessionState::EXITING
        | xr::SessionState::LOSS_PENDING => Readiness::Ended,
        _ => Readiness::Waiting,
    }
}

/// The runtime lists its preferred blend mode first
fn pick_blend_mode(offered: &[xr::EnvironmentBlendMode]) -> xr::EnvironmentBlendMode {
    match offered.first() {
        Some(&mode) => mode,
        None => {
            warn!("Runtime offers no environment blend modes, assuming OPAQUE");
            xr::EnvironmentBlendMode::OPAQUE
        }
    }
}

fn raw_formats(formats: &[vk::Format]) -> Vec<u32> {
    formats.iter().map(|f| f.0 as u32).collect()
}

/// Layer texture format: a preferred 8-bit one, else the first offered, as long as the
/// pattern can be written into it
fn layer_format(offered: &[u32]) -> Option<(vk::Format, LayerUpload)> {
    let format = vk::Format(pick_format(offered, &raw_formats(&LAYER_FORMATS))? as i32);
    LayerUpload::for_format(format).map(|upload| (format, upload))
}

fn swapchain_info(
    format: vk::Format,
    width: u32,
    height: u32,
    usage_flags: xr::SwapchainUsageFlags,
    create_flags: xr::SwapchainCreateFlags,
) -> xr::SwapchainCreateInfo<xr::Vulkan> {
    xr::SwapchainCreateInfo {
        create_flags,
        usage_flags,
        format: format.0 as u32,
        sample_count: 1,
        width,
        height,
        face_count: 1,
        array_size: 1,
        mip_count: 1,
    }
}

fn swapchain_images(swapchain: &xr::Swapchain<xr::Vulkan>) -> Result<Vec<vk::Image>> {
    Ok(swapchain
        .enumerate_images()?
        .into_iter()
        .map(vk::Image)
        .collect())
}

/// Create a static swapchain and fill its single image with `pattern`
fn create_layer_image(
    session: &xr::Session<xr::Vulkan>,
    renderer: &mut Renderer,
    format: vk::Format,
    upload: LayerUpload,
    pattern: &[[u8; 4]],
) -> Result<LayerImage> {
    let mut swapchain = session.create_swapchain(&swapchain_info(
        format,
        LAYER_IMAGE_WIDTH,
        LAYER_IMAGE_HEIGHT,
        xr::SwapchainUsageFlags::COLOR_ATTACHMENT
            | xr::SwapchainUsageFlags::TRANSFER_DST
            | xr::SwapchainUsageFlags::SAMPLED,
        xr::SwapchainCreateFlags::STATIC_IMAGE,
    ))?;
    let images = swapchain_images(&swapchain)?;

    let index = swapchain.acquire_image().context("Acquire")?;
    swapchain
        .wait_image(xr::Duration::INFINITE)
        .context("Wait")?;
    let image = *images
        .get(index as usize)
        .context("Runtime returned an unknown layer image")?;
    renderer.upload_layer_image(
        image,
        vk::Extent2D {
            width: LAYER_IMAGE_WIDTH,
            height: LAYER_IMAGE_HEIGHT,
        },
        pattern,
        upload,
    )?;
    swapchain.release_image().context("Release")?;

    Ok(LayerImage {
        swapchain,
        extent: xr::Extent2Di {
            width: LAYER_IMAGE_WIDTH as i32,
            height: LAYER_IMAGE_HEIGHT as i32,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_begins_terminal_states_fail() {
        assert_eq!(readiness(xr::SessionState::IDLE), Readiness::Waiting);
        assert_eq!(readiness(xr::SessionState::READY), Readiness::Ready);
        assert_eq!(readiness(xr::SessionState::STOPPING), Readiness::Ended);
        assert_eq!(readiness(xr::SessionState::EXITING), Readiness::Ended);
        assert_eq!(readiness(xr::SessionState::LOSS_PENDING), Readiness::Ended);
    }

    #[test]
    fn format_preferences_in_runtime_terms() {
        // Raw values as they appear in xrEnumerateSwapchainFormats
        assert_eq!(raw_formats(&COLOR_FORMATS), vec![43, 50]);
        assert_eq!(raw_formats(&LAYER_FORMATS), vec![37, 44]);
        assert_eq!(DEPTH_FORMAT.0, 126);
    }

    #[test]
    fn blend_mode_is_runtime_first_choice_or_opaque() {
        assert_eq!(
            pick_blend_mode(&[
                xr::EnvironmentBlendMode::ADDITIVE,
                xr::EnvironmentBlendMode::OPAQUE
            ]),
            xr::EnvironmentBlendMode::ADDITIVE
        );
        assert_eq!(pick_blend_mode(&[]), xr::EnvironmentBlendMode::OPAQUE);
    }

    #[test]
    fn layer_format_prefers_unorm_then_first_offered() {
        let rgba = vk::Format::R8G8B8A8_UNORM.0 as u32;
        let bgra = vk::Format::B8G8R8A8_UNORM.0 as u32;
        let srgb = vk::Format::R8G8B8A8_SRGB.0 as u32;
        let float = vk::Format::R16G16B16A16_SFLOAT.0 as u32;
        let depth = DEPTH_FORMAT.0 as u32;

        assert_eq!(
            layer_format(&[srgb, bgra, rgba]),
            Some((
                vk::Format::R8G8B8A8_UNORM,
                LayerUpload::Copy {
                    swap_red_blue: false
                }
            ))
        );
        assert_eq!(
            layer_format(&[srgb, bgra]),
            Some((
                vk::Format::B8G8R8A8_UNORM,
                LayerUpload::Copy {
                    swap_red_blue: true
                }
            ))
        );
        // No preference offered: the runtime's first format, converted on upload
        assert_eq!(
            layer_format(&[float, srgb]),
            Some((vk::Format::R16G16B16A16_SFLOAT, LayerUpload::Blit))
        );
        assert_eq!(
            layer_format(&[srgb, float]),
            Some((
                vk::Format::R8G8B8A8_SRGB,
                LayerUpload::Copy {
                    swap_red_blue: false
                }
            ))
        );
        assert_eq!(layer_format(&[depth, srgb]), None);
        assert_eq!(layer_format(&[]), None);
    }

    #[test]
    fn missing_interop_fails_before_any_instance_exists() {
        // Negotiation is the first thing bootstrap does with the extension list
        let available = xr::ExtensionSet::default();
        let err = Capabilities::negotiate(&available, &Settings::default()).unwrap_err();
        assert!(err.to_string().contains("XR_KHR_vulkan_enable"));
    }
}
