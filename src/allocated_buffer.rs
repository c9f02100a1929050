use anyhow::{Context, Result};
use erupt::{vk1_0 as vk, DeviceLoader};
use gpu_alloc::{GpuAllocator, MemoryBlock, Request, UsageFlags};
use gpu_alloc_erupt::EruptMemoryDevice;
use log::error;
use std::marker::PhantomData;

/// A host-visible buffer and its associated allocation on device.
pub struct AllocatedBuffer<T> {
    pub buffer: vk::Buffer,
    pub allocation: Option<MemoryBlock<vk::DeviceMemory>>,
    pub count: usize,
    _phantom: PhantomData<T>,
}

impl<T: Sized + bytemuck::Pod> AllocatedBuffer<T> {
    /// Create a new buffer able to contain `count` instance of `T`
    pub fn new(
        count: usize,
        create_info: vk::BufferCreateInfoBuilder,
        allocator: &mut GpuAllocator<vk::DeviceMemory>,
        device: &DeviceLoader,
    ) -> Result<Self> {
        anyhow::ensure!(count > 0, "Must allocate at least one object");
        let size = std::mem::size_of::<T>() * count;
        let create_info = create_info.size(size as u64);
        let buffer = unsafe { device.create_buffer(&create_info, None, None) }.result()?;
        let requirements = unsafe { device.get_buffer_memory_requirements(buffer, None) };
        let request = memory_request(&requirements, UsageFlags::HOST_ACCESS | UsageFlags::UPLOAD);
        let allocation = unsafe { allocator.alloc(EruptMemoryDevice::wrap(device), request) }
            .context("Allocating buffer memory")?;
        unsafe {
            device
                .bind_buffer_memory(buffer, *allocation.memory(), allocation.offset())
                .result()?;
        }
        Ok(Self {
            buffer,
            allocation: Some(allocation),
            count,
            _phantom: PhantomData::default(),
        })
    }

    /// Create a buffer holding exactly `data`
    pub fn with_data(
        data: &[T],
        usage: vk::BufferUsageFlags,
        allocator: &mut GpuAllocator<vk::DeviceMemory>,
        device: &DeviceLoader,
    ) -> Result<Self> {
        let create_info = vk::BufferCreateInfoBuilder::new()
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let mut buffer = Self::new(data.len(), create_info, allocator, device)?;
        buffer.write(device, data)?;
        Ok(buffer)
    }

    pub fn write(&mut self, device: &DeviceLoader, data: &[T]) -> Result<()> {
        anyhow::ensure!(
            data.len() <= self.count,
            "Writing {} objects into a buffer of {}",
            data.len(),
            self.count
        );
        let allocation = self
            .allocation
            .as_mut()
            .context("Buffer written after it was freed")?;
        unsafe {
            allocation.write_bytes(EruptMemoryDevice::wrap(device), 0, bytemuck::cast_slice(data))
        }
        .context("Writing buffer memory")?;
        Ok(())
    }

    /// Caller guarantees the device no longer uses the buffer
    pub fn free(&mut self, device: &DeviceLoader, allocator: &mut GpuAllocator<vk::DeviceMemory>) {
        if let Some(allocation) = self.allocation.take() {
            unsafe {
                device.destroy_buffer(Some(self.buffer), None);
                allocator.dealloc(EruptMemoryDevice::wrap(device), allocation);
            }
        }
    }
}

/// Translate Vulkan memory requirements into an allocator request
pub fn memory_request(requirements: &vk::MemoryRequirements, usage: UsageFlags) -> Request {
    Request {
        size: requirements.size,
        align_mask: requirements.alignment.saturating_sub(1),
        usage,
        memory_types: requirements.memory_type_bits,
    }
}

impl<T> Drop for AllocatedBuffer<T> {
    fn drop(&mut self) {
        if self.allocation.is_some() {
            error!(
                "AllocatedBuffer<{}> was dropped before it was freed!",
                std::any::type_name::<T>()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_keeps_size_and_type_mask() {
        let requirements = vk::MemoryRequirements {
            size: 4096,
            alignment: 256,
            memory_type_bits: 0b1010,
        };
        let request = memory_request(&requirements, UsageFlags::FAST_DEVICE_ACCESS);
        assert_eq!(request.size, 4096);
        assert_eq!(request.align_mask, 255);
        assert_eq!(request.memory_types, 0b1010);
        assert_eq!(request.usage, UsageFlags::FAST_DEVICE_ACCESS);
    }

    #[test]
    fn zero_alignment_does_not_underflow() {
        let requirements = vk::MemoryRequirements {
            size: 16,
            alignment: 0,
            memory_type_bits: 1,
        };
        assert_eq!(memory_request(&requirements, UsageFlags::HOST_ACCESS).align_mask, 0);
    }
}
