use crate::core::{cmd_image_barrier, VkPrelude};
use crate::runtime::InputSource;
use crate::swapchain_images::color_subresource_range;
use anyhow::{Context, Result};
use erupt::{
    extensions::{khr_surface, khr_swapchain},
    vk1_0 as vk,
};
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use winit::{
    dpi::PhysicalSize,
    event::{ElementState, Event, KeyboardInput, VirtualKeyCode, WindowEvent},
    event_loop::{ControlFlow, EventLoop},
    platform::run_return::EventLoopExtRunReturn,
    window::{Window, WindowBuilder},
};

/// The desktop window. Closing it, pressing Escape or sending an interrupt asks the session to
/// exit.
pub struct DesktopWindow {
    event_loop: EventLoop<()>,
    pub window: Window,
    interrupted: Arc<AtomicBool>,
}

impl DesktopWindow {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let interrupted = Arc::new(AtomicBool::new(false));
        let flag = interrupted.clone();
        ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
            .context("Installing interrupt handler")?;

        let event_loop = EventLoop::new();
        let window = WindowBuilder::new()
            .with_title(crate::APP_NAME)
            .with_inner_size(PhysicalSize::new(width, height))
            .with_resizable(false)
            .build(&event_loop)
            .context("Creating desktop window")?;

        Ok(Self {
            event_loop,
            window,
            interrupted,
        })
    }
}

impl InputSource for DesktopWindow {
    fn poll_exit_requested(&mut self) -> bool {
        let mut requested = self.interrupted.swap(false, Ordering::SeqCst);
        self.event_loop.run_return(|event, _, control_flow| {
            *control_flow = ControlFlow::Poll;
            match event {
                Event::WindowEvent {
                    event: WindowEvent::CloseRequested,
                    ..
                } => requested = true,
                Event::WindowEvent {
                    event:
                        WindowEvent::KeyboardInput {
                            input:
                                KeyboardInput {
                                    virtual_keycode: Some(VirtualKeyCode::Escape),
                                    state: ElementState::Pressed,
                                    ..
                                },
                            ..
                        },
                    ..
                } => requested = true,
                Event::MainEventsCleared => *control_flow = ControlFlow::Exit,
                _ => (),
            }
        });
        requested
    }
}

/// Copies the first eye into the desktop window. Entirely best-effort: any failure disables it
/// for the rest of the session instead of stopping the XR loop.
pub struct Mirror {
    surface: khr_surface::SurfaceKHR,
    format: khr_surface::SurfaceFormatKHR,
    present_mode: khr_surface::PresentModeKHR,
    swapchain: Option<khr_swapchain::SwapchainKHR>,
    images: Vec<vk::Image>,
    extent: vk::Extent2D,
    image_available: vk::Semaphore,
}

/// A mirror image acquired for this frame
#[derive(Debug, Copy, Clone)]
pub struct MirrorTarget {
    pub index: u32,
    pub image: vk::Image,
    pub extent: vk::Extent2D,
    pub image_available: vk::Semaphore,
}

impl Mirror {
    /// Returns `None` when the device has no usable surface
    pub fn new(prelude: &VkPrelude) -> Result<Option<Self>> {
        let surface = match prelude.surface {
            Some(s) => s,
            None => return Ok(None),
        };

        let (formats, present_modes, caps) = unsafe {
            let instance = &prelude.instance;
            (
                instance
                    .get_physical_device_surface_formats_khr(prelude.physical_device, surface, None)
                    .result()?,
                instance
                    .get_physical_device_surface_present_modes_khr(
                        prelude.physical_device,
                        surface,
                        None,
                    )
                    .result()?,
                instance
                    .get_physical_device_surface_capabilities_khr(
                        prelude.physical_device,
                        surface,
                        None,
                    )
                    .result()?,
            )
        };

        if !caps
            .supported_usage_flags
            .contains(vk::ImageUsageFlags::TRANSFER_DST)
        {
            info!("Window surface cannot be blitted to, desktop mirror disabled");
            return Ok(None);
        }

        let format = match pick_surface_format(&formats) {
            Some(f) => f,
            None => {
                info!("Window surface offers no formats, desktop mirror disabled");
                return Ok(None);
            }
        };
        let present_mode = pick_present_mode(&present_modes);
        info!(
            "Desktop mirror format {:?}, present mode {:?}",
            format.format, present_mode
        );

        let create_info = vk::SemaphoreCreateInfoBuilder::new();
        let image_available =
            unsafe { prelude.device.create_semaphore(&create_info, None, None) }.result()?;

        Ok(Some(Self {
            surface,
            format,
            present_mode,
            swapchain: None,
            images: Vec::new(),
            extent: vk::Extent2D::default(),
            image_available,
        }))
    }

    /// Acquire the next window image, rebuilding the swapchain first if it went stale. `None`
    /// means nothing can be shown this frame.
    pub fn acquire(&mut self, prelude: &VkPrelude) -> Result<Option<MirrorTarget>> {
        if self.swapchain.is_none() {
            self.create_swapchain(prelude)?;
        }
        let swapchain = match self.swapchain {
            Some(s) => s,
            None => return Ok(None),
        };

        let index = unsafe {
            prelude.device.acquire_next_image_khr(
                swapchain,
                u64::MAX,
                Some(self.image_available),
                None,
                None,
            )
        };

        if index.raw == vk::Result::ERROR_OUT_OF_DATE_KHR {
            self.free_swapchain(prelude);
            return Ok(None);
        }
        let index = index.result()?;

        Ok(Some(MirrorTarget {
            index,
            image: self.images[index as usize],
            extent: self.extent,
            image_available: self.image_available,
        }))
    }

    /// Present an image acquired with `acquire`, once `render_finished` is signalled
    pub fn present(
        &mut self,
        prelude: &VkPrelude,
        target: &MirrorTarget,
        render_finished: vk::Semaphore,
    ) -> Result<()> {
        let swapchain = match self.swapchain {
            Some(s) => s,
            None => return Ok(()),
        };

        let wait_semaphores = [render_finished];
        let swapchains = [swapchain];
        let image_indices = [target.index];
        let present_info = khr_swapchain::PresentInfoKHRBuilder::new()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let queue_result = unsafe { prelude.device.queue_present_khr(prelude.queue, &present_info) };

        if queue_result.raw == vk::Result::ERROR_OUT_OF_DATE_KHR
            || queue_result.raw == vk::Result::SUBOPTIMAL_KHR
        {
            unsafe { prelude.device.queue_wait_idle(prelude.queue) }.result()?;
            self.free_swapchain(prelude);
            return Ok(());
        }
        queue_result.result()?;
        Ok(())
    }

    fn create_swapchain(&mut self, prelude: &VkPrelude) -> Result<()> {
        let surface_caps = unsafe {
            prelude.instance.get_physical_device_surface_capabilities_khr(
                prelude.physical_device,
                self.surface,
                None,
            )
        }
        .result()?;

        // Minimized
        if surface_caps.current_extent.width == 0 || surface_caps.current_extent.height == 0 {
            return Ok(());
        }

        let mut image_count = surface_caps.min_image_count + 1;
        if surface_caps.max_image_count > 0 && image_count > surface_caps.max_image_count {
            image_count = surface_caps.max_image_count;
        }

        let create_info = khr_swapchain::SwapchainCreateInfoKHRBuilder::new()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(self.format.format)
            .image_color_space(self.format.color_space)
            .image_extent(surface_caps.current_extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(khr_surface::CompositeAlphaFlagBitsKHR::OPAQUE_KHR)
            .present_mode(self.present_mode)
            .clipped(true)
            .old_swapchain(khr_swapchain::SwapchainKHR::null());

        let swapchain =
            unsafe { prelude.device.create_swapchain_khr(&create_info, None, None) }.result()?;
        let images = unsafe { prelude.device.get_swapchain_images_khr(swapchain, None) }.result();

        let images = match images {
            Ok(images) => images,
            Err(e) => {
                unsafe { prelude.device.destroy_swapchain_khr(Some(swapchain), None) };
                return Err(e).context("Desktop mirror images");
            }
        };

        self.swapchain = Some(swapchain);
        self.images = images.to_vec();
        self.extent = surface_caps.current_extent;
        Ok(())
    }

    fn free_swapchain(&mut self, prelude: &VkPrelude) {
        self.images.clear();
        if let Some(swapchain) = self.swapchain.take() {
            unsafe { prelude.device.destroy_swapchain_khr(Some(swapchain), None) };
        }
    }

    /// Caller guarantees the device is idle
    pub fn free(&mut self, prelude: &VkPrelude) {
        self.free_swapchain(prelude);
        unsafe {
            prelude
                .device
                .destroy_semaphore(Some(self.image_available), None);
        }
    }
}

/// Record a copy of a rendered eye image (left in color attachment layout) into a mirror image,
/// leaving the mirror image ready to present
pub unsafe fn cmd_blit_eye(
    prelude: &VkPrelude,
    command_buffer: vk::CommandBuffer,
    eye: vk::Image,
    eye_extent: vk::Extent2D,
    target: &MirrorTarget,
) {
    let device = &prelude.device;
    let range = color_subresource_range();

    cmd_image_barrier(
        device,
        command_buffer,
        eye,
        range,
        (
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ),
        (
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::AccessFlags::TRANSFER_READ,
        ),
        (
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::PipelineStageFlags::TRANSFER,
        ),
    );
    cmd_image_barrier(
        device,
        command_buffer,
        target.image,
        range,
        (
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ),
        (vk::AccessFlags::empty(), vk::AccessFlags::TRANSFER_WRITE),
        (
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::TRANSFER,
        ),
    );

    let layers = vk::ImageSubresourceLayersBuilder::new()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .mip_level(0)
        .base_array_layer(0)
        .layer_count(1)
        .build();
    let region = vk::ImageBlitBuilder::new()
        .src_subresource(layers)
        .src_offsets([vk::Offset3D::default(), far_corner(eye_extent)])
        .dst_subresource(layers)
        .dst_offsets([vk::Offset3D::default(), far_corner(target.extent)]);

    device.cmd_blit_image(
        command_buffer,
        eye,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        target.image,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        &[region],
        vk::Filter::LINEAR,
    );

    cmd_image_barrier(
        device,
        command_buffer,
        target.image,
        range,
        (
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        ),
        (vk::AccessFlags::TRANSFER_WRITE, vk::AccessFlags::empty()),
        (
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        ),
    );
    // The runtime expects the eye back in the layout the render pass left it in
    cmd_image_barrier(
        device,
        command_buffer,
        eye,
        range,
        (
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ),
        (
            vk::AccessFlags::TRANSFER_READ,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ),
        (
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
    );
}

pub fn far_corner(extent: vk::Extent2D) -> vk::Offset3D {
    vk::Offset3D {
        x: extent.width as i32,
        y: extent.height as i32,
        z: 1,
    }
}

/// Prefer 8-bit sRGB BGRA, otherwise whatever comes first
pub fn pick_surface_format(
    formats: &[khr_surface::SurfaceFormatKHR],
) -> Option<khr_surface::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|surface_format| {
            surface_format.format == vk::Format::B8G8R8A8_SRGB
                && surface_format.color_space == khr_surface::ColorSpaceKHR::SRGB_NONLINEAR_KHR
        })
        .or_else(|| formats.get(0))
        .copied()
}

/// Presenting must never hold up the headset, so vsync is only the last resort
pub fn pick_present_mode(modes: &[khr_surface::PresentModeKHR]) -> khr_surface::PresentModeKHR {
    [
        khr_surface::PresentModeKHR::MAILBOX_KHR,
        khr_surface::PresentModeKHR::IMMEDIATE_KHR,
    ]
    .iter()
    .copied()
    .find(|preferred| modes.contains(preferred))
    .unwrap_or_else(|| {
        warn!("Desktop mirror falls back to FIFO presentation");
        khr_surface::PresentModeKHR::FIFO_KHR
    })
}
