use anyhow::{bail, Context, Result};
use erupt::{
    extensions::{khr_surface, khr_swapchain},
    utils::{self, surface},
    vk1_0 as vk, DeviceLoader, EntryLoader, InstanceLoader,
};
use gpu_alloc::GpuAllocator;
use gpu_alloc_erupt::EruptMemoryDevice;
use log::info;
use std::ffi::CString;
use std::os::raw::c_char;
use winit::window::Window;

pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// The Vulkan objects everything else is created from
pub struct VkPrelude {
    pub queue: vk::Queue,
    pub queue_family_index: u32,
    pub device: DeviceLoader,
    pub physical_device: vk::PhysicalDevice,
    /// Present only when the graphics queue can present to the desktop window
    pub surface: Option<khr_surface::SurfaceKHR>,
    pub instance: InstanceLoader,
    pub entry: utils::loading::DefaultEntryLoader,
}

impl VkPrelude {
    /// Create the Vulkan instance and device the runtime asks for, on the physical device it
    /// names. With a window, also try to set up a surface for the desktop mirror.
    pub fn from_openxr(
        xr_instance: &xr::Instance,
        system: xr::SystemId,
        window: Option<&Window>,
        validation: bool,
    ) -> Result<Self> {
        // Load Vulkan
        let entry = EntryLoader::new().context("Loading Vulkan")?;

        // Check to see if OpenXR and Vulkan are compatible
        let vk_version = unsafe { entry.enumerate_instance_version(None).result()? };
        let vk_version = xr::Version::new(
            vk::version_major(vk_version) as u16,
            vk::version_minor(vk_version) as u16,
            vk::version_patch(vk_version),
        );
        info!("Loaded Vulkan version {}", vk_version);

        let reqs = xr_instance
            .graphics_requirements::<xr::Vulkan>(system)
            .context("Graphics requirements")?;
        info!(
            "Runtime supports Vulkan {} through {}",
            reqs.min_api_version_supported, reqs.max_api_version_supported
        );
        if reqs.min_api_version_supported > vk_version {
            bail!(
                "OpenXR runtime requires Vulkan version >= {}",
                reqs.min_api_version_supported
            );
        }

        // Instance and device layers and extensions
        let runtime_instance_extensions = crate::extensions::split_extension_list(
            &xr_instance
                .vulkan_legacy_instance_extensions(system)
                .context("Runtime's Vulkan instance extensions")?,
        );
        let runtime_device_extensions = crate::extensions::split_extension_list(
            &xr_instance
                .vulkan_legacy_device_extensions(system)
                .context("Runtime's Vulkan device extensions")?,
        );
        info!("Runtime wants Vulkan instance extensions {:?}", runtime_instance_extensions);
        info!("Runtime wants Vulkan device extensions {:?}", runtime_device_extensions);

        let mut instance_layers = Vec::new();
        let mut instance_extensions: Vec<*const c_char> = runtime_instance_extensions
            .iter()
            .map(|name| name.as_ptr())
            .collect();
        let mut device_layers = Vec::new();
        let mut device_extensions: Vec<*const c_char> = runtime_device_extensions
            .iter()
            .map(|name| name.as_ptr())
            .collect();

        let window = match window {
            Some(window) => match surface::enumerate_required_extensions(window).result() {
                Ok(required) => {
                    instance_extensions.extend(required);
                    Some(window)
                }
                Err(e) => {
                    info!("No surface support for the desktop mirror: {}", e);
                    None
                }
            },
            None => None,
        };

        crate::extensions::extensions_and_layers(
            validation,
            &mut instance_layers,
            &mut instance_extensions,
            &mut device_layers,
        );

        // Instance creation
        let application_name = CString::new(crate::APP_NAME)?;
        let engine_name = CString::new(crate::ENGINE_NAME)?;
        let app_info = vk::ApplicationInfoBuilder::new()
            .application_name(&application_name)
            .application_version(vk::make_version(1, 0, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_version(0, 1, 0))
            .api_version(vk::make_version(1, 1, 0));

        let create_info = vk::InstanceCreateInfoBuilder::new()
            .application_info(&app_info)
            .enabled_extension_names(&instance_extensions)
            .enabled_layer_names(&instance_layers);

        let mut instance =
            InstanceLoader::new(&entry, &create_info, None).context("Creating Vulkan instance")?;

        // Obtain the physical device from OpenXR
        let physical_device = vk::PhysicalDevice(unsafe {
            xr_instance
                .vulkan_graphics_device(system, instance.handle.0 as _)
                .context("Runtime's Vulkan physical device")?
        } as _);

        let queue_family_index = unsafe {
            instance
                .get_physical_device_queue_family_properties(physical_device, None)
                .into_iter()
                .position(|info| info.queue_flags.contains(vk::QueueFlags::GRAPHICS))
                .context("Vulkan device has no graphics queue")? as u32
        };

        // Surface, kept only if the graphics queue can present to it
        let surface = match window {
            Some(window) => unsafe {
                match surface::create_surface(&mut instance, window, None).result() {
                    Ok(surface) => {
                        let supported = instance
                            .get_physical_device_surface_support_khr(
                                physical_device,
                                queue_family_index,
                                surface,
                                None,
                            )
                            .result()
                            .unwrap_or(false);
                        if supported {
                            Some(surface)
                        } else {
                            info!("Graphics queue cannot present, desktop mirror disabled");
                            instance.destroy_surface_khr(Some(surface), None);
                            None
                        }
                    }
                    Err(e) => {
                        info!("Failed to create window surface, desktop mirror disabled: {}", e);
                        None
                    }
                }
            },
            None => None,
        };

        if surface.is_some() {
            device_extensions.push(khr_swapchain::KHR_SWAPCHAIN_EXTENSION_NAME);
        }

        // Create logical device and queues
        let priorities = [1.0];
        let queue_create_info = [vk::DeviceQueueCreateInfoBuilder::new()
            .queue_family_index(queue_family_index)
            .queue_priorities(&priorities)];

        let physical_device_features = vk::PhysicalDeviceFeaturesBuilder::new();
        let create_info = vk::DeviceCreateInfoBuilder::new()
            .queue_create_infos(&queue_create_info)
            .enabled_features(&physical_device_features)
            .enabled_extension_names(&device_extensions)
            .enabled_layer_names(&device_layers);

        let device = DeviceLoader::new(&instance, physical_device, &create_info, None)
            .context("Creating Vulkan device")?;
        let queue = unsafe { device.get_device_queue(queue_family_index, 0, None) };

        Ok(Self {
            queue,
            queue_family_index,
            device,
            physical_device,
            surface,
            instance,
            entry,
        })
    }

    pub fn can_blit_to(&self, format: vk::Format) -> bool {
        let properties = unsafe {
            self.instance
                .get_physical_device_format_properties(self.physical_device, format, None)
        };
        properties
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::BLIT_DST)
    }

    /// Destroy the device, surface and instance. Everything created from them must be gone.
    pub fn destroy(&mut self) {
        unsafe {
            self.device.destroy_device(None);
            if let Some(surface) = self.surface.take() {
                self.instance.destroy_surface_khr(Some(surface), None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Device-level objects shared by every view
pub struct Core {
    pub allocator: GpuAllocator<vk::DeviceMemory>,
    pub command_pool: vk::CommandPool,
    pub render_pass: vk::RenderPass,
    pub color_format: vk::Format,
}

impl Core {
    pub fn new(prelude: &VkPrelude, color_format: vk::Format) -> Result<Self> {
        // Command pool
        let create_info = vk::CommandPoolCreateInfoBuilder::new()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(prelude.queue_family_index);
        let command_pool =
            unsafe { prelude.device.create_command_pool(&create_info, None, None) }.result()?;

        // Device memory allocator
        let mut device_props = unsafe {
            gpu_alloc_erupt::device_properties(&prelude.instance, prelude.physical_device)?
        };
        // The device is created without the buffer device address feature
        device_props.buffer_device_address = false;
        let allocator = GpuAllocator::new(gpu_alloc::Config::i_am_prototyping(), device_props);

        let render_pass = create_render_pass(&prelude.device, color_format)?;

        Ok(Self {
            allocator,
            command_pool,
            render_pass,
            color_format,
        })
    }

    /// Record, submit and wait for a batch of commands outside the frame loop
    pub fn one_shot(
        &self,
        prelude: &VkPrelude,
        record: impl FnOnce(vk::CommandBuffer),
    ) -> Result<()> {
        let allocate_info = vk::CommandBufferAllocateInfoBuilder::new()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffers =
            unsafe { prelude.device.allocate_command_buffers(&allocate_info) }.result()?;
        let command_buffer = command_buffers[0];

        let result = unsafe {
            let begin_info = vk::CommandBufferBeginInfoBuilder::new()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            prelude
                .device
                .begin_command_buffer(command_buffer, &begin_info)
                .result()
                .and_then(|_| {
                    record(command_buffer);
                    prelude.device.end_command_buffer(command_buffer).result()
                })
                .and_then(|_| {
                    let submit_info =
                        vk::SubmitInfoBuilder::new().command_buffers(&command_buffers);
                    prelude
                        .device
                        .queue_submit(prelude.queue, &[submit_info], None)
                        .result()
                })
                .and_then(|_| prelude.device.queue_wait_idle(prelude.queue).result())
        };

        unsafe {
            prelude
                .device
                .free_command_buffers(self.command_pool, &command_buffers);
        }
        result?;
        Ok(())
    }

    /// Caller guarantees the device is idle
    pub fn free(&mut self, prelude: &VkPrelude) {
        unsafe {
            prelude
                .device
                .destroy_render_pass(Some(self.render_pass), None);
            prelude
                .device
                .destroy_command_pool(Some(self.command_pool), None);
            self.allocator
                .cleanup(EruptMemoryDevice::wrap(&prelude.device));
        }
    }
}

fn create_render_pass(device: &DeviceLoader, color_format: vk::Format) -> Result<vk::RenderPass> {
    let color_attachment = vk::AttachmentDescriptionBuilder::new()
        .format(color_format)
        .samples(vk::SampleCountFlagBits::_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

    // Stored so it can be handed to the runtime's depth swapchain
    let depth_attachment = vk::AttachmentDescriptionBuilder::new()
        .format(DEPTH_FORMAT)
        .samples(vk::SampleCountFlagBits::_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

    let attachments = [color_attachment, depth_attachment];

    let color_attachment_refs = [vk::AttachmentReferenceBuilder::new()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];

    let depth_attachment_ref = vk::AttachmentReferenceBuilder::new()
        .attachment(1)
        .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

    let subpasses = [vk::SubpassDescriptionBuilder::new()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_attachment_refs)
        .depth_stencil_attachment(&depth_attachment_ref)];

    let dependencies = [vk::SubpassDependencyBuilder::new()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        )
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        )
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        )];

    let create_info = vk::RenderPassCreateInfoBuilder::new()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    Ok(unsafe { device.create_render_pass(&create_info, None, None) }.result()?)
}

/// Record a layout transition for a whole single-layer image
pub unsafe fn cmd_image_barrier(
    device: &DeviceLoader,
    command_buffer: vk::CommandBuffer,
    image: vk::Image,
    subresource_range: vk::ImageSubresourceRange,
    (old_layout, new_layout): (vk::ImageLayout, vk::ImageLayout),
    (src_access, dst_access): (vk::AccessFlags, vk::AccessFlags),
    (src_stage, dst_stage): (vk::PipelineStageFlags, vk::PipelineStageFlags),
) {
    let barrier = vk::ImageMemoryBarrierBuilder::new()
        .image(image)
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .subresource_range(subresource_range)
        .src_access_mask(src_access)
        .dst_access_mask(dst_access);

    device.cmd_pipeline_barrier(
        command_buffer,
        src_stage,
        dst_stage,
        None,
        &[],
        &[],
        &[barrier],
    );
}
