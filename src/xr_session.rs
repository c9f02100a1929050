use crate::input::{float_input, grab_pulse, Actions};
use crate::layers::{
    aspect_ratio, identity_pose_at, quad_size, CompositionPlan, CYLINDER_CENTRAL_ANGLE,
    CYLINDER_POSITION, CYLINDER_RADIUS, QUAD_POSITION,
};
use crate::math::{FAR_Z, NEAR_Z};
use crate::runtime::{AcquiredImage, FloatInput, Hand, RuntimeEvent, XrRuntime};
use log::{info, warn};

/// How long to wait for the compositor to hand back a swapchain image
pub const IMAGE_WAIT_TIMEOUT_NANOS: i64 = 1_000_000_000;

pub const VIEW_TYPE: xr::ViewConfigurationType = xr::ViewConfigurationType::PRIMARY_STEREO;

/// Swapchains one view renders into
pub struct ViewSwapchains {
    pub color: xr::Swapchain<xr::Vulkan>,
    /// Only with depth submission enabled
    pub depth: Option<xr::Swapchain<xr::Vulkan>>,
    pub extent: xr::Extent2Di,
}

/// A static image shown as a quad or cylinder layer
pub struct LayerImage {
    pub swapchain: xr::Swapchain<xr::Vulkan>,
    pub extent: xr::Extent2Di,
}

/// The live OpenXR session and everything created from it
pub struct XrSession {
    pub instance: xr::Instance,
    pub session: xr::Session<xr::Vulkan>,
    pub frame_waiter: xr::FrameWaiter,
    pub frame_stream: xr::FrameStream<xr::Vulkan>,
    pub space: xr::Space,
    pub blend_mode: xr::EnvironmentBlendMode,
    pub views: Vec<ViewSwapchains>,
    pub quad: Option<LayerImage>,
    pub cylinder: Option<LayerImage>,
    pub actions: Actions,
    pub hand_trackers: Option<[xr::HandTracker; 2]>,
    pub event_buffer: xr::EventDataBuffer,
}

impl XrSession {
    fn view(&mut self, view: usize) -> xr::Result<&mut ViewSwapchains> {
        self.views
            .get_mut(view)
            .ok_or(xr::sys::Result::ERROR_INDEX_OUT_OF_RANGE)
    }

    fn log_interaction_profiles(&self) {
        for hand in Hand::BOTH.iter().copied() {
            let profile = self
                .session
                .current_interaction_profile(self.actions.hand_path(hand))
                .and_then(|path| {
                    if path == xr::Path::NULL {
                        Ok("none".to_string())
                    } else {
                        self.instance.path_to_string(path)
                    }
                });
            match profile {
                Ok(profile) => info!("{:?} hand interaction profile: {}", hand, profile),
                Err(e) => warn!("Failed to get {:?} interaction profile: {}", hand, e),
            }
        }
    }
}

impl XrRuntime for XrSession {
    fn poll_event(&mut self) -> xr::Result<Option<RuntimeEvent>> {
        let event = match self.instance.poll_event(&mut self.event_buffer)? {
            Some(event) => event,
            None => return Ok(None),
        };

        use xr::Event::*;
        let event = match event {
            SessionStateChanged(e) => RuntimeEvent::SessionStateChanged(e.state()),
            InstanceLossPending(_) => RuntimeEvent::InstanceLossPending,
            EventsLost(e) => RuntimeEvent::EventsLost(e.lost_event_count()),
            ReferenceSpaceChangePending(_) => RuntimeEvent::ReferenceSpaceChangePending,
            InteractionProfileChanged(_) => RuntimeEvent::InteractionProfileChanged,
            _ => RuntimeEvent::Unhandled,
        };

        if event == RuntimeEvent::InteractionProfileChanged {
            self.log_interaction_profiles();
        }
        Ok(Some(event))
    }

    fn request_exit(&mut self) -> xr::Result<()> {
        self.session.request_exit()
    }

    fn view_count(&self) -> usize {
        self.views.len()
    }

    fn wait_frame(&mut self) -> xr::Result<xr::FrameState> {
        self.frame_waiter.wait()
    }

    fn begin_frame(&mut self) -> xr::Result<()> {
        self.frame_stream.begin()
    }

    fn end_frame(
        &mut self,
        display_time: xr::Time,
        views: &[xr::View],
        plan: &CompositionPlan,
    ) -> xr::Result<()> {
        let full_rect = |extent: xr::Extent2Di| xr::Rect2Di {
            offset: xr::Offset2Di { x: 0, y: 0 },
            extent,
        };

        // Depth info is chained onto each projection view, so it has to outlive them
        let depth_infos: Vec<Option<xr::sys::CompositionLayerDepthInfoKHR>> = self
            .views
            .iter()
            .map(|swapchains| {
                let depth = swapchains.depth.as_ref().filter(|_| plan.depth)?;
                Some(xr::sys::CompositionLayerDepthInfoKHR {
                    ty: xr::sys::CompositionLayerDepthInfoKHR::TYPE,
                    next: std::ptr::null(),
                    sub_image: xr::sys::SwapchainSubImage {
                        swapchain: depth.as_raw(),
                        image_rect: full_rect(swapchains.extent),
                        image_array_index: 0,
                    },
                    min_depth: 0.0,
                    max_depth: 1.0,
                    near_z: NEAR_Z,
                    far_z: FAR_Z,
                })
            })
            .collect();

        let projection_views: Vec<xr::CompositionLayerProjectionView<xr::Vulkan>> = views
            .iter()
            .zip(self.views.iter())
            .zip(depth_infos.iter())
            .map(|((view, swapchains), depth_info)| {
                let projection_view = xr::CompositionLayerProjectionView::new()
                    .pose(view.pose)
                    .fov(view.fov)
                    .sub_image(
                        xr::SwapchainSubImage::new()
                            .swapchain(&swapchains.color)
                            .image_array_index(0)
                            .image_rect(full_rect(swapchains.extent)),
                    );
                match depth_info {
                    Some(depth_info) => {
                        let mut raw = projection_view.into_raw();
                        raw.next = depth_info as *const _ as *const std::ffi::c_void;
                        unsafe { xr::CompositionLayerProjectionView::from_raw(raw) }
                    }
                    None => projection_view,
                }
            })
            .collect();

        let space = &self.space;
        let projection = xr::CompositionLayerProjection::new()
            .space(space)
            .views(&projection_views);

        let quad = self.quad.as_ref().filter(|_| plan.quad).map(|image| {
            xr::CompositionLayerQuad::new()
                .layer_flags(xr::CompositionLayerFlags::BLEND_TEXTURE_SOURCE_ALPHA)
                .space(space)
                .eye_visibility(xr::EyeVisibility::BOTH)
                .sub_image(
                    xr::SwapchainSubImage::new()
                        .swapchain(&image.swapchain)
                        .image_array_index(0)
                        .image_rect(full_rect(image.extent)),
                )
                .pose(identity_pose_at(QUAD_POSITION))
                .size(quad_size(
                    image.extent.width as u32,
                    image.extent.height as u32,
                ))
        });

        let cylinder = self.cylinder.as_ref().filter(|_| plan.cylinder).map(|image| {
            xr::CompositionLayerCylinderKHR::new()
                .layer_flags(xr::CompositionLayerFlags::BLEND_TEXTURE_SOURCE_ALPHA)
                .space(space)
                .eye_visibility(xr::EyeVisibility::BOTH)
                .sub_image(
                    xr::SwapchainSubImage::new()
                        .swapchain(&image.swapchain)
                        .image_array_index(0)
                        .image_rect(full_rect(image.extent)),
                )
                .pose(identity_pose_at(CYLINDER_POSITION))
                .radius(CYLINDER_RADIUS)
                .central_angle(CYLINDER_CENTRAL_ANGLE)
                .aspect_ratio(aspect_ratio(
                    image.extent.width as u32,
                    image.extent.height as u32,
                ))
        });

        let mut layers: Vec<&xr::CompositionLayerBase<xr::Vulkan>> = Vec::new();
        if plan.projection && !projection_views.is_empty() {
            layers.push(&projection);
        }
        if let Some(quad) = &quad {
            layers.push(quad);
        }
        if let Some(cylinder) = &cylinder {
            layers.push(cylinder);
        }

        self.frame_stream
            .end(display_time, self.blend_mode, &layers)
    }

    fn locate_views(&mut self, display_time: xr::Time) -> xr::Result<Vec<xr::View>> {
        let (_, views) = self
            .session
            .locate_views(VIEW_TYPE, display_time, &self.space)?;
        Ok(views)
    }

    fn locate_hand_joints(
        &mut self,
        hand: Hand,
        display_time: xr::Time,
    ) -> xr::Result<Option<Vec<xr::HandJointLocation>>> {
        let tracker = match &self.hand_trackers {
            Some(trackers) => &trackers[hand.index()],
            None => return Ok(None),
        };
        let joints = self.space.locate_hand_joints(tracker, display_time)?;
        Ok(joints.map(|joints| joints.to_vec()))
    }

    fn sync_actions(&mut self) -> xr::Result<()> {
        self.session
            .sync_actions(&[xr::ActiveActionSet::new(&self.actions.action_set)])
    }

    fn hand_pose(&mut self, hand: Hand, display_time: xr::Time) -> xr::Result<Option<xr::Posef>> {
        let active = self
            .actions
            .pose
            .is_active(&self.session, self.actions.hand_path(hand))?;
        if !active {
            return Ok(None);
        }

        let location = self
            .actions
            .hand_space(hand)
            .locate(&self.space, display_time)?;
        Ok(location
            .location_flags
            .contains(xr::SpaceLocationFlags::POSITION_VALID)
            .then(|| location.pose))
    }

    fn grab_state(&mut self, hand: Hand) -> xr::Result<FloatInput> {
        let state = self
            .actions
            .grab
            .state(&self.session, self.actions.hand_path(hand))?;
        Ok(float_input(state))
    }

    fn throttle_state(&mut self, hand: Hand) -> xr::Result<FloatInput> {
        let state = self
            .actions
            .throttle
            .state(&self.session, self.actions.hand_path(hand))?;
        Ok(float_input(state))
    }

    fn apply_haptic(&mut self, hand: Hand) -> xr::Result<()> {
        self.actions.haptic.apply_feedback(
            &self.session,
            self.actions.hand_path(hand),
            &grab_pulse(),
        )
    }

    fn acquire_image(&mut self, view: usize) -> xr::Result<AcquiredImage> {
        let swapchains = self.view(view)?;
        let color = swapchains.color.acquire_image()?;
        let depth = match &mut swapchains.depth {
            Some(depth) => Some(depth.acquire_image()?),
            None => None,
        };
        Ok(AcquiredImage { color, depth })
    }

    fn wait_image(&mut self, view: usize) -> xr::Result<()> {
        let instance = self.instance.clone();
        let swapchains = self.view(view)?;
        wait_swapchain_image(&instance, &swapchains.color)?;
        if let Some(depth) = &swapchains.depth {
            wait_swapchain_image(&instance, depth)?;
        }
        Ok(())
    }

    fn release_image(&mut self, view: usize) -> xr::Result<()> {
        let swapchains = self.view(view)?;
        swapchains.color.release_image()?;
        if let Some(depth) = &mut swapchains.depth {
            depth.release_image()?;
        }
        Ok(())
    }
}

/// Wait with a bounded timeout. Running out of time is a success code to the runtime, but
/// the image is not ready and must not be rendered into.
pub fn wait_swapchain_image(
    instance: &xr::Instance,
    swapchain: &xr::Swapchain<xr::Vulkan>,
) -> xr::Result<()> {
    let info = xr::sys::SwapchainImageWaitInfo {
        ty: xr::sys::SwapchainImageWaitInfo::TYPE,
        next: std::ptr::null(),
        timeout: xr::Duration::from_nanos(IMAGE_WAIT_TIMEOUT_NANOS),
    };
    let result = unsafe { (instance.fp().wait_swapchain_image)(swapchain.as_raw(), &info) };
    wait_result(result)
}

fn wait_result(result: xr::sys::Result) -> xr::Result<()> {
    if result.into_raw() < 0 || result == xr::sys::Result::TIMEOUT_EXPIRED {
        Err(result)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_wait_timeout_is_an_error() {
        assert_eq!(
            wait_result(xr::sys::Result::TIMEOUT_EXPIRED),
            Err(xr::sys::Result::TIMEOUT_EXPIRED)
        );
        assert_eq!(wait_result(xr::sys::Result::SUCCESS), Ok(()));
        assert!(wait_result(xr::sys::Result::ERROR_SESSION_NOT_RUNNING).is_err());
    }
}
