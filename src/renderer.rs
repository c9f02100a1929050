use crate::allocated_buffer::{memory_request, AllocatedBuffer};
use crate::core::{cmd_image_barrier, Core, VkPrelude};
use crate::frame_sync::FrameSync;
use crate::hand_tracking::HandVisual;
use crate::material::{push_constant_stages, Material, PushConstants};
use crate::math::{matrix_from_view, pose_model, rotation_degrees, spinning_cube_model};
use crate::mirror::{cmd_blit_eye, far_corner, Mirror, MirrorTarget};
use crate::runtime::{AcquiredImage, SceneRenderer, SceneView};
use crate::swapchain_images::{color_subresource_range, depth_subresource_range, SwapchainImages};
use crate::vertex::{Vertex, CUBE};
use anyhow::{Context, Result};
use erupt::{vk1_0 as vk, DeviceLoader};
use gpu_alloc::UsageFlags;
use gpu_alloc_erupt::EruptMemoryDevice;
use log::{info, warn};
use nalgebra::{Matrix4, Vector3};
use std::path::Path;
use std::sync::Arc;

pub const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.2, 1.0];

/// Zero alpha tells the fragment shader to use texture coordinates as color
pub const UV_COLOR: [f32; 4] = [0.0; 4];
pub const HAND_COLORS: [[f32; 4]; 2] = [[1.0, 0.5, 0.5, 1.0], [0.5, 1.0, 0.5, 1.0]];

pub const SCENE_CUBE_SCALE: f32 = 0.33;
pub const SCENE_CUBE_POSITIONS: [[f32; 3]; 4] = [
    [0.0, 0.5, -1.5],
    [0.0, 0.5, 1.5],
    [-1.5, 0.5, 0.0],
    [1.5, 0.5, 0.0],
];
pub const CONTROLLER_SCALE: [f32; 3] = [0.05, 0.05, 0.2];

/// One cube to draw
#[derive(Debug, Clone, PartialEq)]
pub struct Draw {
    pub model: Matrix4<f32>,
    pub color: [f32; 4],
}

/// Everything in the scene for one eye: the spinning cubes, then each hand's visual
pub fn scene_draws(scene: &SceneView) -> Vec<Draw> {
    let degrees = rotation_degrees(scene.display_time) as f32;
    let mut draws: Vec<Draw> = SCENE_CUBE_POSITIONS
        .iter()
        .map(|&position| Draw {
            model: spinning_cube_model(Vector3::from(position), SCENE_CUBE_SCALE, degrees),
            color: UV_COLOR,
        })
        .collect();

    for (visual, &color) in scene.hands.iter().zip(HAND_COLORS.iter()) {
        match visual {
            HandVisual::Hidden => (),
            HandVisual::Controller(pose) => draws.push(Draw {
                model: pose_model(pose, Vector3::from(CONTROLLER_SCALE)),
                color,
            }),
            HandVisual::Skeleton(joints) => {
                draws.extend(joints.iter().map(|joint| Draw {
                    model: pose_model(&joint.pose, Vector3::repeat(joint.radius * 2.0)),
                    color,
                }))
            }
        }
    }

    draws
}

/// Runtime-owned images one view renders into
pub struct ViewTargets {
    pub extent: vk::Extent2D,
    pub color: Vec<vk::Image>,
    pub depth: Vec<vk::Image>,
}

/// Local Vulkan renderer: draws each eye into the runtime's swapchain images
pub struct Renderer {
    prelude: Arc<VkPrelude>,
    core: Core,
    material: Material,
    cube: AllocatedBuffer<Vertex>,
    views: Vec<SwapchainImages>,
    frame_sync: FrameSync,
    mirror: Option<Mirror>,
}

impl Renderer {
    pub fn new(
        prelude: Arc<VkPrelude>,
        color_format: vk::Format,
        shader_dir: &Path,
        targets: Vec<ViewTargets>,
        mirror: bool,
    ) -> Result<Self> {
        let mut core = Core::new(&prelude, color_format)?;
        let material = Material::load(&prelude.device, shader_dir, core.render_pass)?;
        let cube = AllocatedBuffer::with_data(
            &CUBE,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            &mut core.allocator,
            &prelude.device,
        )?;

        let views = targets
            .into_iter()
            .map(|target| {
                SwapchainImages::new(
                    &prelude.device,
                    &mut core.allocator,
                    target.extent,
                    core.render_pass,
                    color_format,
                    target.color,
                    target.depth,
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let frame_sync = FrameSync::new(&prelude.device, core.command_pool, views.len())?;

        let mirror = if mirror {
            match Mirror::new(&prelude) {
                Ok(mirror) => mirror,
                Err(e) => {
                    warn!("Desktop mirror unavailable: {:#}", e);
                    None
                }
            }
        } else {
            None
        };
        info!("Desktop mirror enabled: {}", mirror.is_some());

        Ok(Self {
            prelude,
            core,
            material,
            cube,
            views,
            frame_sync,
            mirror,
        })
    }

    /// Fill a runtime-owned static image with RGBA8 pixels, leaving it in color attachment
    /// layout. Must happen between acquiring and releasing the image.
    pub fn upload_layer_image(
        &mut self,
        image: vk::Image,
        extent: vk::Extent2D,
        pixels: &[[u8; 4]],
        upload: LayerUpload,
    ) -> Result<()> {
        anyhow::ensure!(
            pixels.len() == (extent.width * extent.height) as usize,
            "Layer image is {}x{} but {} pixels were given",
            extent.width,
            extent.height,
            pixels.len()
        );

        let staged: Vec<[u8; 4]> = match upload {
            LayerUpload::Copy {
                swap_red_blue: true,
            } => pixels.iter().map(|&[r, g, b, a]| [b, g, r, a]).collect(),
            _ => pixels.to_vec(),
        };

        let mut staging = AllocatedBuffer::with_data(
            &staged,
            vk::BufferUsageFlags::TRANSFER_SRC,
            &mut self.core.allocator,
            &self.prelude.device,
        )?;

        let result = match upload {
            LayerUpload::Copy { .. } => {
                let device = &self.prelude.device;
                self.core.one_shot(&self.prelude, |command_buffer| unsafe {
                    cmd_copy_pixels(device, command_buffer, staging.buffer, image, extent);
                    cmd_ready_layer_image(device, command_buffer, image);
                })
            }
            LayerUpload::Blit => self.blit_layer_image(staging.buffer, image, extent),
        };

        staging.free(&self.prelude.device, &mut self.core.allocator);
        result.context("Uploading layer image")
    }

    /// Go through an RGBA8 image so the blit converts the pattern into the target's format
    fn blit_layer_image(
        &mut self,
        pixels: vk::Buffer,
        image: vk::Image,
        extent: vk::Extent2D,
    ) -> Result<()> {
        let device = &self.prelude.device;
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
            .format(vk::Format::R8G8B8A8_UNORM)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::TRANSFER_SRC)
            .samples(vk::SampleCountFlagBits::_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let source = unsafe { device.create_image(&create_info, None, None) }.result()?;

        let requirements = unsafe { device.get_image_memory_requirements(source, None) };
        let request = memory_request(&requirements, UsageFlags::FAST_DEVICE_ACCESS);
        let memory = match unsafe {
            self.core
                .allocator
                .alloc(EruptMemoryDevice::wrap(device), request)
        } {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_image(Some(source), None) };
                return Err(e).context("Allocating layer staging image");
            }
        };

        let result = unsafe { device.bind_image_memory(source, *memory.memory(), memory.offset()) }
            .result()
            .map_err(anyhow::Error::from)
            .and_then(|_| {
                self.core.one_shot(&self.prelude, |command_buffer| unsafe {
                    cmd_copy_pixels(device, command_buffer, pixels, source, extent);
                    cmd_blit_layer(device, command_buffer, source, image, extent);
                    cmd_ready_layer_image(device, command_buffer, image);
                })
            });

        unsafe {
            device.destroy_image(Some(source), None);
            self.core
                .allocator
                .dealloc(EruptMemoryDevice::wrap(device), memory);
        }
        result
    }

    /// The mirror is best-effort; a broken one is dropped for the rest of the session
    fn acquire_mirror(&mut self) -> Option<MirrorTarget> {
        let result = self.mirror.as_mut()?.acquire(&self.prelude);
        match result {
            Ok(target) => target,
            Err(e) => {
                self.disable_mirror(e);
                None
            }
        }
    }

    fn disable_mirror(&mut self, reason: anyhow::Error) {
        warn!("Desktop mirror disabled: {:#}", reason);
        if let Some(mut mirror) = self.mirror.take() {
            unsafe {
                let _ = self.prelude.device.device_wait_idle().result();
            }
            mirror.free(&self.prelude);
        }
    }

    /// Wait for the device to go idle, then destroy everything this renderer created
    pub fn free(&mut self) {
        let prelude = self.prelude.clone();
        let device = &prelude.device;
        unsafe {
            if let Err(e) = device.device_wait_idle().result() {
                warn!("Waiting for the device before shutdown: {}", e);
            }
        }

        if let Some(mut mirror) = self.mirror.take() {
            mirror.free(&prelude);
        }
        self.frame_sync.free(device, self.core.command_pool);
        for view in &mut self.views {
            view.free(device, &mut self.core.allocator);
        }
        self.cube.free(device, &mut self.core.allocator);
        self.material.free(device);
        self.core.free(&prelude);
    }
}

impl SceneRenderer for Renderer {
    fn render_view(&mut self, view: usize, image: AcquiredImage, scene: &SceneView) -> Result<()> {
        let prelude = self.prelude.clone();
        let device = &prelude.device;

        let frame = self.frame_sync.frame(device, view)?;
        let (command_buffer, in_flight_fence, render_finished) = (
            frame.command_buffer,
            frame.in_flight_fence,
            frame.render_finished,
        );

        let mirror_target = if view == 0 {
            self.acquire_mirror()
        } else {
            None
        };

        let targets = self
            .views
            .get(view)
            .with_context(|| format!("No render targets for view {}", view))?;
        let color = targets.image(image.color)?;
        let depth = image
            .depth
            .map(|index| targets.depth_target(index))
            .transpose()?;

        let view_proj = matrix_from_view(&scene.view);
        let draws = scene_draws(scene);

        unsafe {
            device
                .reset_command_buffer(command_buffer, None)
                .result()?;
            let begin_info = vk::CommandBufferBeginInfoBuilder::new();
            device
                .begin_command_buffer(command_buffer, &begin_info)
                .result()?;

            self.cmd_draw_scene(
                device,
                command_buffer,
                color.framebuffer,
                targets.extent,
                view_proj,
                &draws,
            );

            if let Some(depth_target) = depth {
                cmd_copy_depth(device, command_buffer, targets, depth_target);
            }

            if let Some(target) = &mirror_target {
                cmd_blit_eye(&prelude, command_buffer, color.image, targets.extent, target);
            }

            device.end_command_buffer(command_buffer).result()?;
        }

        // Submit to the queue
        let command_buffers = [command_buffer];
        let wait_semaphores: Vec<vk::Semaphore> =
            mirror_target.iter().map(|t| t.image_available).collect();
        let wait_stages = vec![vk::PipelineStageFlags::TRANSFER; wait_semaphores.len()];
        let signal_semaphores: Vec<vk::Semaphore> =
            mirror_target.iter().map(|_| render_finished).collect();
        let submit_info = vk::SubmitInfoBuilder::new()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);
        unsafe {
            device
                .queue_submit(prelude.queue, &[submit_info], Some(in_flight_fence))
                .result()?;
        }

        if let Some(target) = mirror_target {
            let presented = match self.mirror.as_mut() {
                Some(mirror) => mirror.present(&prelude, &target, render_finished),
                None => Ok(()),
            };
            if let Err(e) = presented {
                self.disable_mirror(e);
            }
        }

        Ok(())
    }
}

impl Renderer {
    unsafe fn cmd_draw_scene(
        &self,
        device: &DeviceLoader,
        command_buffer: vk::CommandBuffer,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        view_proj: Matrix4<f32>,
        draws: &[Draw],
    ) {
        // Set render pass
        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: CLEAR_COLOR,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];

        let begin_info = vk::RenderPassBeginInfoBuilder::new()
            .framebuffer(framebuffer)
            .render_pass(self.core.render_pass)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(&clear_values);

        device.cmd_begin_render_pass(command_buffer, &begin_info, vk::SubpassContents::INLINE);

        let viewports = [vk::ViewportBuilder::new()
            .x(0.0)
            .y(0.0)
            .width(extent.width as f32)
            .height(extent.height as f32)
            .min_depth(0.0)
            .max_depth(1.0)];

        let scissors = [vk::Rect2DBuilder::new()
            .offset(vk::Offset2D { x: 0, y: 0 })
            .extent(extent)];

        device.cmd_bind_pipeline(
            command_buffer,
            vk::PipelineBindPoint::GRAPHICS,
            self.material.pipeline,
        );
        device.cmd_set_viewport(command_buffer, 0, &viewports);
        device.cmd_set_scissor(command_buffer, 0, &scissors);
        device.cmd_bind_vertex_buffers(command_buffer, 0, &[self.cube.buffer], &[0]);

        for draw in draws {
            let constants = push_constants(&view_proj, draw);
            device.cmd_push_constants(
                command_buffer,
                self.material.pipeline_layout,
                push_constant_stages(),
                0,
                std::mem::size_of::<PushConstants>() as u32,
                &constants as *const PushConstants as _,
            );
            device.cmd_draw(command_buffer, self.cube.count as u32, 1, 0, 0);
        }

        device.cmd_end_render_pass(command_buffer);
    }
}

fn push_constants(view_proj: &Matrix4<f32>, draw: &Draw) -> PushConstants {
    let mut mvp = [0.0; 16];
    mvp.copy_from_slice((view_proj * draw.model).as_slice());
    PushConstants {
        mvp,
        color: draw.color,
    }
}

/// Copy the view's local depth into the runtime's depth swapchain image
unsafe fn cmd_copy_depth(
    device: &DeviceLoader,
    command_buffer: vk::CommandBuffer,
    targets: &SwapchainImages,
    depth_target: vk::Image,
) {
    let range = depth_subresource_range();

    cmd_image_barrier(
        device,
        command_buffer,
        targets.depth_image,
        range,
        (
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ),
        (
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::AccessFlags::TRANSFER_READ,
        ),
        (
            vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            vk::PipelineStageFlags::TRANSFER,
        ),
    );
    cmd_image_barrier(
        device,
        command_buffer,
        depth_target,
        range,
        (
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ),
        (vk::AccessFlags::empty(), vk::AccessFlags::TRANSFER_WRITE),
        (
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
        ),
    );

    let layers = vk::ImageSubresourceLayersBuilder::new()
        .aspect_mask(vk::ImageAspectFlags::DEPTH)
        .mip_level(0)
        .base_array_layer(0)
        .layer_count(1)
        .build();
    let region = vk::ImageCopyBuilder::new()
        .src_subresource(layers)
        .src_offset(vk::Offset3D::default())
        .dst_subresource(layers)
        .dst_offset(vk::Offset3D::default())
        .extent(vk::Extent3D {
            width: targets.extent.width,
            height: targets.extent.height,
            depth: 1,
        });
    device.cmd_copy_image(
        command_buffer,
        targets.depth_image,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        depth_target,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        &[region],
    );

    cmd_image_barrier(
        device,
        command_buffer,
        depth_target,
        range,
        (
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ),
        (vk::AccessFlags::TRANSFER_WRITE, vk::AccessFlags::empty()),
        (
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        ),
    );
}

/// How the RGBA8 layer pattern reaches a layer swapchain image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerUpload {
    /// Byte copy; BGRA targets get red and blue swapped first
    Copy { swap_red_blue: bool },
    /// Format conversion through a blit
    Blit,
}

impl LayerUpload {
    /// `None` for depth and stencil formats, a color pattern cannot fill those
    pub fn for_format(format: vk::Format) -> Option<Self> {
        match format {
            vk::Format::R8G8B8A8_UNORM | vk::Format::R8G8B8A8_SRGB => Some(LayerUpload::Copy {
                swap_red_blue: false,
            }),
            vk::Format::B8G8R8A8_UNORM | vk::Format::B8G8R8A8_SRGB => Some(LayerUpload::Copy {
                swap_red_blue: true,
            }),
            vk::Format::D16_UNORM
            | vk::Format::X8_D24_UNORM_PACK32
            | vk::Format::D32_SFLOAT
            | vk::Format::S8_UINT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT => None,
            _ => Some(LayerUpload::Blit),
        }
    }
}

/// Copy tightly packed pixels into a whole image, leaving it in transfer destination layout
unsafe fn cmd_copy_pixels(
    device: &DeviceLoader,
    command_buffer: vk::CommandBuffer,
    pixels: vk::Buffer,
    image: vk::Image,
    extent: vk::Extent2D,
) {
    cmd_image_barrier(
        device,
        command_buffer,
        image,
        color_subresource_range(),
        (
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ),
        (vk::AccessFlags::empty(), vk::AccessFlags::TRANSFER_WRITE),
        (
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
        ),
    );

    let region = vk::BufferImageCopyBuilder::new()
        .buffer_offset(0)
        .buffer_row_length(0)
        .buffer_image_height(0)
        .image_subresource(color_layers())
        .image_offset(vk::Offset3D::default())
        .image_extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        });
    device.cmd_copy_buffer_to_image(
        command_buffer,
        pixels,
        image,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        &[region],
    );
}

/// Blit a same-sized image (in transfer destination layout) into `target`
unsafe fn cmd_blit_layer(
    device: &DeviceLoader,
    command_buffer: vk::CommandBuffer,
    source: vk::Image,
    target: vk::Image,
    extent: vk::Extent2D,
) {
    let range = color_subresource_range();
    cmd_image_barrier(
        device,
        command_buffer,
        source,
        range,
        (
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ),
        (vk::AccessFlags::TRANSFER_WRITE, vk::AccessFlags::TRANSFER_READ),
        (
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::TRANSFER,
        ),
    );
    cmd_image_barrier(
        device,
        command_buffer,
        target,
        range,
        (
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ),
        (vk::AccessFlags::empty(), vk::AccessFlags::TRANSFER_WRITE),
        (
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
        ),
    );

    let corner = far_corner(extent);
    let region = vk::ImageBlitBuilder::new()
        .src_subresource(color_layers())
        .src_offsets([vk::Offset3D::default(), corner])
        .dst_subresource(color_layers())
        .dst_offsets([vk::Offset3D::default(), corner]);
    device.cmd_blit_image(
        command_buffer,
        source,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        target,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        &[region],
        vk::Filter::NEAREST,
    );
}

/// Hand a freshly written layer image over in color attachment layout
unsafe fn cmd_ready_layer_image(
    device: &DeviceLoader,
    command_buffer: vk::CommandBuffer,
    image: vk::Image,
) {
    cmd_image_barrier(
        device,
        command_buffer,
        image,
        color_subresource_range(),
        (
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ),
        (vk::AccessFlags::TRANSFER_WRITE, vk::AccessFlags::empty()),
        (
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        ),
    );
}

fn color_layers() -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayersBuilder::new()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .mip_level(0)
        .base_array_layer(0)
        .layer_count(1)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hand_tracking::JointCube;
    use crate::layers::identity_pose_at;
    use nalgebra::Point3;

    fn scene(hands: &[HandVisual; 2], nanos: i64) -> SceneView {
        SceneView {
            view: xr::View {
                pose: identity_pose_at([0.0; 3]),
                fov: xr::Fovf {
                    angle_left: -0.8,
                    angle_right: 0.8,
                    angle_up: 0.8,
                    angle_down: -0.8,
                },
            },
            display_time: xr::Time::from_nanos(nanos),
            hands,
        }
    }

    #[test]
    fn four_cubes_without_hands() {
        let hands = [HandVisual::Hidden, HandVisual::Hidden];
        let draws = scene_draws(&scene(&hands, 0));
        assert_eq!(draws.len(), 4);
        assert!(draws.iter().all(|d| d.color == UV_COLOR));

        let centers: Vec<_> = draws
            .iter()
            .map(|d| d.model.transform_point(&Point3::origin()))
            .collect();
        for (center, expected) in centers.iter().zip(SCENE_CUBE_POSITIONS.iter()) {
            assert!((center.coords - Vector3::from(*expected)).norm() < 1e-5);
        }
    }

    #[test]
    fn hands_are_tinted() {
        let joint = JointCube {
            pose: identity_pose_at([0.1, 0.2, 0.3]),
            radius: 0.01,
        };
        let hands = [
            HandVisual::Controller(identity_pose_at([-0.2, 1.0, -0.3])),
            HandVisual::Skeleton(vec![joint; 3]),
        ];
        let draws = scene_draws(&scene(&hands, 0));
        assert_eq!(draws.len(), 4 + 1 + 3);
        assert_eq!(draws[4].color, HAND_COLORS[0]);
        assert!(draws[5..].iter().all(|d| d.color == HAND_COLORS[1]));

        // Joint cubes are as wide as the joint
        let edge = draws[5].model.transform_point(&Point3::new(0.5, 0.0, 0.0));
        assert!((edge.x - 0.11).abs() < 1e-5);
    }

    #[test]
    fn empty_skeleton_draws_nothing() {
        let hands = [HandVisual::Skeleton(Vec::new()), HandVisual::Hidden];
        assert_eq!(scene_draws(&scene(&hands, 0)).len(), 4);
    }

    #[test]
    fn cubes_spin_with_display_time() {
        let hands = [HandVisual::Hidden, HandVisual::Hidden];
        let still = scene_draws(&scene(&hands, 0));
        let quarter = scene_draws(&scene(&hands, 1_000_000_000));

        // After a quarter turn about +Y, the cube's local +X faces -Z
        let tip = |d: &Draw| d.model.transform_vector(&Vector3::x());
        assert!((tip(&still[0]) - Vector3::x() * SCENE_CUBE_SCALE).norm() < 1e-5);
        assert!((tip(&quarter[0]) + Vector3::z() * SCENE_CUBE_SCALE).norm() < 1e-5);
    }

    #[test]
    fn push_constants_combine_view_and_model() {
        let draw = Draw {
            model: Matrix4::new_translation(&Vector3::new(1.0, 2.0, 3.0)),
            color: HAND_COLORS[1],
        };
        let constants = push_constants(&Matrix4::identity(), &draw);
        // Column major, translation in the last column
        assert_eq!(&constants.mvp[12..15], &[1.0, 2.0, 3.0]);
        assert_eq!(constants.color, HAND_COLORS[1]);
    }

    #[test]
    fn layer_pattern_reaches_any_color_format() {
        assert_eq!(
            LayerUpload::for_format(vk::Format::R8G8B8A8_SRGB),
            Some(LayerUpload::Copy {
                swap_red_blue: false
            })
        );
        assert_eq!(
            LayerUpload::for_format(vk::Format::B8G8R8A8_UNORM),
            Some(LayerUpload::Copy {
                swap_red_blue: true
            })
        );
        assert_eq!(
            LayerUpload::for_format(vk::Format::R16G16B16A16_SFLOAT),
            Some(LayerUpload::Blit)
        );
        assert_eq!(
            LayerUpload::for_format(vk::Format::A2B10G10R10_UNORM_PACK32),
            Some(LayerUpload::Blit)
        );
        assert_eq!(LayerUpload::for_format(vk::Format::D32_SFLOAT), None);
        assert_eq!(LayerUpload::for_format(vk::Format::D24_UNORM_S8_UINT), None);
    }
}
