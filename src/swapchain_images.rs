use crate::allocated_buffer::memory_request;
use anyhow::{Context, Result};
use erupt::{vk1_0 as vk, DeviceLoader};
use gpu_alloc::{GpuAllocator, MemoryBlock, UsageFlags};
use gpu_alloc_erupt::EruptMemoryDevice;
use log::error;

/// Local render targets for one view: a framebuffer per runtime swapchain image, all sharing
/// one locally owned depth image.
pub struct SwapchainImages {
    pub extent: vk::Extent2D,
    pub depth_image: vk::Image,
    pub depth_image_mem: Option<MemoryBlock<vk::DeviceMemory>>,
    pub depth_image_view: vk::ImageView,
    /// Runtime-owned depth swapchain images the local depth is copied into
    pub depth_swapchain: Vec<vk::Image>,
    images: Vec<SwapChainImage>,
}

pub struct SwapChainImage {
    pub image: vk::Image,
    pub framebuffer: vk::Framebuffer,
    pub image_view: vk::ImageView,
}

impl SwapchainImages {
    pub fn new(
        device: &DeviceLoader,
        allocator: &mut GpuAllocator<vk::DeviceMemory>,
        extent: vk::Extent2D,
        render_pass: vk::RenderPass,
        color_format: vk::Format,
        swapchain_images: Vec<vk::Image>,
        depth_swapchain: Vec<vk::Image>,
    ) -> Result<Self> {
        // Create depth image
        let create_info = vk::ImageCreateInfoBuilder::new()
            .image_type(vk::ImageType::_2D)
            .extent(
                vk::Extent3DBuilder::new()
                    .width(extent.width)
                    .height(extent.height)
                    .depth(1)
                    .build(),
            )
            .mip_levels(1)
            .array_layers(1)
            .format(crate::core::DEPTH_FORMAT)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
            )
            .samples(vk::SampleCountFlagBits::_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let depth_image = unsafe { device.create_image(&create_info, None, None) }.result()?;

        let requirements = unsafe { device.get_image_memory_requirements(depth_image, None) };
        let request = memory_request(&requirements, UsageFlags::FAST_DEVICE_ACCESS);
        let depth_image_mem = unsafe { allocator.alloc(EruptMemoryDevice::wrap(device), request) }
            .context("Allocating depth image memory")?;
        unsafe {
            device
                .bind_image_memory(depth_image, *depth_image_mem.memory(), depth_image_mem.offset())
                .result()?;
        }

        let create_info = vk::ImageViewCreateInfoBuilder::new()
            .image(depth_image)
            .view_type(vk::ImageViewType::_2D)
            .format(crate::core::DEPTH_FORMAT)
            .subresource_range(depth_subresource_range());
        let depth_image_view =
            unsafe { device.create_image_view(&create_info, None, None) }.result()?;

        // Build swapchain image views and buffers
        let images = swapchain_images
            .iter()
            .map(|&image| {
                SwapChainImage::new(
                    device,
                    render_pass,
                    image,
                    color_format,
                    extent,
                    depth_image_view,
                )
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            extent,
            images,
            depth_image,
            depth_image_mem: Some(depth_image_mem),
            depth_image_view,
            depth_swapchain,
        })
    }

    pub fn image(&self, index: u32) -> Result<&SwapChainImage> {
        self.images
            .get(index as usize)
            .with_context(|| format!("Runtime returned unknown swapchain image {}", index))
    }

    pub fn depth_target(&self, index: u32) -> Result<vk::Image> {
        self.depth_swapchain
            .get(index as usize)
            .copied()
            .with_context(|| format!("Runtime returned unknown depth swapchain image {}", index))
    }

    /// Caller guarantees the device is idle
    pub fn free(&mut self, device: &DeviceLoader, allocator: &mut GpuAllocator<vk::DeviceMemory>) {
        unsafe {
            device.destroy_image_view(Some(self.depth_image_view), None);
            device.destroy_image(Some(self.depth_image), None);
            if let Some(mem) = self.depth_image_mem.take() {
                allocator.dealloc(EruptMemoryDevice::wrap(device), mem);
            }
        }

        for image in self.images.drain(..) {
            image.free(device);
        }
    }
}

impl SwapChainImage {
    pub fn new(
        device: &DeviceLoader,
        render_pass: vk::RenderPass,
        swapchain_image: vk::Image,
        format: vk::Format,
        extent: vk::Extent2D,
        depth_image_view: vk::ImageView,
    ) -> Result<Self> {
        let create_info = vk::ImageViewCreateInfoBuilder::new()
            .image(swapchain_image)
            .view_type(vk::ImageViewType::_2D)
            .format(format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(color_subresource_range());

        let image_view = unsafe { device.create_image_view(&create_info, None, None) }.result()?;

        let attachments = [image_view, depth_image_view];
        let create_info = vk::FramebufferCreateInfoBuilder::new()
            .render_pass(render_pass)
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer =
            unsafe { device.create_framebuffer(&create_info, None, None) }.result()?;

        Ok(Self {
            image: swapchain_image,
            framebuffer,
            image_view,
        })
    }

    fn free(self, device: &DeviceLoader) {
        unsafe {
            device.destroy_framebuffer(Some(self.framebuffer), None);
            device.destroy_image_view(Some(self.image_view), None);
        }
    }
}

impl Drop for SwapchainImages {
    fn drop(&mut self) {
        if self.depth_image_mem.is_some() {
            error!("Swapchain images dropped before they were freed");
        }
    }
}

pub fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRangeBuilder::new()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
        .build()
}

pub fn depth_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRangeBuilder::new()
        .aspect_mask(vk::ImageAspectFlags::DEPTH)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
        .build()
}
