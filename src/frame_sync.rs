use anyhow::Result;
use erupt::{vk1_0 as vk, DeviceLoader};

/// One command buffer and fence per view. A view's commands from the previous frame must
/// finish before its command buffer is recorded again.
pub struct FrameSync {
    frames: Vec<Frame>,
}

pub struct Frame {
    pub command_buffer: vk::CommandBuffer,
    /// Signalled when the command buffer has finished executing
    pub in_flight_fence: vk::Fence,
    /// Signalled when rendering is done, waited on by the desktop mirror's present
    pub render_finished: vk::Semaphore,
}

impl FrameSync {
    pub fn new(device: &DeviceLoader, command_pool: vk::CommandPool, count: usize) -> Result<Self> {
        let allocate_info = vk::CommandBufferAllocateInfoBuilder::new()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count as u32);

        let command_buffers = unsafe { device.allocate_command_buffers(&allocate_info) }.result()?;

        let frames = command_buffers
            .into_iter()
            .map(|command_buffer| Frame::new(device, command_buffer))
            .collect::<Result<_>>()?;

        Ok(Self { frames })
    }

    /// Wait for the view's previous submission, then hand out its resources for re-use
    pub fn frame(&mut self, device: &DeviceLoader, view: usize) -> Result<&Frame> {
        let frame = &self.frames[view];
        unsafe {
            device
                .wait_for_fences(&[frame.in_flight_fence], true, u64::MAX)
                .result()?;
            device.reset_fences(&[frame.in_flight_fence]).result()?;
        }
        Ok(frame)
    }

    pub fn free(&mut self, device: &DeviceLoader, command_pool: vk::CommandPool) {
        let command_buffers: Vec<_> = self.frames.iter().map(|f| f.command_buffer).collect();
        unsafe {
            device.free_command_buffers(command_pool, &command_buffers);
        }
        for frame in self.frames.drain(..) {
            frame.free(device);
        }
    }
}

impl Frame {
    fn new(device: &DeviceLoader, command_buffer: vk::CommandBuffer) -> Result<Self> {
        unsafe {
            let create_info = vk::SemaphoreCreateInfoBuilder::new();
            let render_finished = device.create_semaphore(&create_info, None, None).result()?;

            let create_info =
                vk::FenceCreateInfoBuilder::new().flags(vk::FenceCreateFlags::SIGNALED);
            let in_flight_fence = device.create_fence(&create_info, None, None).result()?;
            Ok(Self {
                command_buffer,
                in_flight_fence,
                render_finished,
            })
        }
    }

    fn free(self, device: &DeviceLoader) {
        unsafe {
            device.destroy_semaphore(Some(self.render_finished), None);
            device.destroy_fence(Some(self.in_flight_fence), None);
        }
    }
}
