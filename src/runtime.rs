//! Seams between the frame loop and the things it drives: the XR runtime, the local renderer
//! and the local window. The real implementations live in `xr_session`, `renderer` and
//! `mirror`.
use crate::hand_tracking::HandVisual;
use crate::layers::CompositionPlan;
use anyhow::Result;

/// Runtime notifications the frame loop reacts to
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    SessionStateChanged(xr::SessionState),
    InstanceLossPending,
    EventsLost(u32),
    ReferenceSpaceChangePending,
    InteractionProfileChanged,
    Unhandled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hand {
    Left,
    Right,
}

impl Hand {
    pub const BOTH: [Hand; 2] = [Hand::Left, Hand::Right];

    pub fn index(self) -> usize {
        match self {
            Hand::Left => 0,
            Hand::Right => 1,
        }
    }

    /// Top level user path, used as the subaction path
    pub fn user_path(self) -> &'static str {
        match self {
            Hand::Left => "/user/hand/left",
            Hand::Right => "/user/hand/right",
        }
    }

    pub fn to_xr(self) -> xr::Hand {
        match self {
            Hand::Left => xr::Hand::LEFT,
            Hand::Right => xr::Hand::RIGHT,
        }
    }
}

/// Current state of a float action for one hand
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FloatInput {
    pub active: bool,
    pub value: f32,
    pub changed: bool,
}

/// Swapchain image indices acquired for one view this frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredImage {
    pub color: u32,
    pub depth: Option<u32>,
}

/// Everything the renderer needs to draw one eye
pub struct SceneView<'a> {
    pub view: xr::View,
    pub display_time: xr::Time,
    pub hands: &'a [HandVisual; 2],
}

/// The XR runtime, as seen by the frame loop. Every method maps to one runtime call (or one
/// call per swapchain) and returns the runtime's own result code, the frame loop decides
/// which failures are fatal.
pub trait XrRuntime {
    /// One pending notification, `None` once the queue is empty
    fn poll_event(&mut self) -> xr::Result<Option<RuntimeEvent>>;
    fn request_exit(&mut self) -> xr::Result<()>;

    fn view_count(&self) -> usize;

    fn wait_frame(&mut self) -> xr::Result<xr::FrameState>;
    fn begin_frame(&mut self) -> xr::Result<()>;
    fn end_frame(
        &mut self,
        display_time: xr::Time,
        views: &[xr::View],
        plan: &CompositionPlan,
    ) -> xr::Result<()>;

    fn locate_views(&mut self, display_time: xr::Time) -> xr::Result<Vec<xr::View>>;
    /// `None` when the runtime reports the hand as untracked
    fn locate_hand_joints(
        &mut self,
        hand: Hand,
        display_time: xr::Time,
    ) -> xr::Result<Option<Vec<xr::HandJointLocation>>>;

    fn sync_actions(&mut self) -> xr::Result<()>;
    /// Grip pose, `None` unless the pose action is active and the position is valid
    fn hand_pose(&mut self, hand: Hand, display_time: xr::Time) -> xr::Result<Option<xr::Posef>>;
    fn grab_state(&mut self, hand: Hand) -> xr::Result<FloatInput>;
    fn throttle_state(&mut self, hand: Hand) -> xr::Result<FloatInput>;
    fn apply_haptic(&mut self, hand: Hand) -> xr::Result<()>;

    fn acquire_image(&mut self, view: usize) -> xr::Result<AcquiredImage>;
    fn wait_image(&mut self, view: usize) -> xr::Result<()>;
    fn release_image(&mut self, view: usize) -> xr::Result<()>;
}

/// Draws the scene into the local framebuffer mapped to an acquired swapchain image
pub trait SceneRenderer {
    fn render_view(&mut self, view: usize, image: AcquiredImage, scene: &SceneView) -> Result<()>;
}

/// Local window and signal input
pub trait InputSource {
    /// True if the user asked to quit since the last poll
    fn poll_exit_requested(&mut self) -> bool;
}
