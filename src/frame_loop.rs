//! Drives the runtime's frame protocol: drain notifications, poll local input, then wait,
//! locate, render and submit while the session is visible.
use crate::capabilities::Capabilities;
use crate::hand_tracking::{joints_or_inactive, HandVisual};
use crate::input::should_vibrate;
use crate::layers::CompositionPlan;
use crate::runtime::{Hand, InputSource, RuntimeEvent, SceneRenderer, SceneView, XrRuntime};
use crate::session_state::{LoopState, SessionTracker};
use anyhow::{ensure, Context, Result};
use log::{debug, info, warn};
use std::time::Duration;

/// How long a suspended pass sleeps before polling again
pub const SUSPENDED_SLEEP: Duration = Duration::from_millis(100);

pub struct FrameLoop<'a, R, S, I> {
    runtime: &'a mut R,
    renderer: &'a mut S,
    input: &'a mut I,
    caps: Capabilities,
    tracker: SessionTracker,
    suspended_sleep: Duration,
    state: LoopState,
}

impl<'a, R: XrRuntime, S: SceneRenderer, I: InputSource> FrameLoop<'a, R, S, I> {
    pub fn new(
        runtime: &'a mut R,
        renderer: &'a mut S,
        input: &'a mut I,
        caps: Capabilities,
        tracker: SessionTracker,
    ) -> Self {
        let state = tracker.loop_state();
        Self {
            runtime,
            renderer,
            input,
            caps,
            tracker,
            suspended_sleep: SUSPENDED_SLEEP,
            state,
        }
    }

    pub fn with_suspended_sleep(mut self, sleep: Duration) -> Self {
        self.suspended_sleep = sleep;
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn session_state(&self) -> xr::SessionState {
        self.tracker.state()
    }

    /// Run until the session stops. Errors from must-succeed calls end the loop.
    pub fn run(&mut self) -> Result<()> {
        let result = loop {
            match self.iterate() {
                Ok(LoopState::Stopping) => break Ok(()),
                Ok(_) => continue,
                Err(e) => break Err(e),
            }
        };
        self.state = LoopState::Exited;
        info!("Frame loop exited in session state {:?}", self.tracker.state());
        result
    }

    /// One pass of the loop
    pub fn iterate(&mut self) -> Result<LoopState> {
        self.drain_events()?;

        if self.input.poll_exit_requested() {
            self.request_exit();
        }

        self.state = self.tracker.loop_state();
        match self.state {
            LoopState::Active => self.frame()?,
            LoopState::Suspended => {
                if !self.suspended_sleep.is_zero() {
                    std::thread::sleep(self.suspended_sleep);
                }
            }
            LoopState::Stopping | LoopState::Exited => (),
        }

        Ok(self.state)
    }

    fn drain_events(&mut self) -> Result<()> {
        while let Some(event) = self.runtime.poll_event().context("Poll runtime events")? {
            match event {
                RuntimeEvent::SessionStateChanged(state) => self.tracker.state_changed(state),
                RuntimeEvent::InstanceLossPending => {
                    warn!("Instance loss pending");
                    self.tracker.instance_loss_pending();
                }
                RuntimeEvent::EventsLost(count) => warn!("Runtime lost {} events", count),
                RuntimeEvent::ReferenceSpaceChangePending => {
                    info!("Reference space change pending")
                }
                RuntimeEvent::InteractionProfileChanged => info!("Interaction profile changed"),
                RuntimeEvent::Unhandled => debug!("Unhandled runtime event"),
            }
        }
        Ok(())
    }

    /// Ask the runtime to wind the session down. It answers with STOPPING on a later pass,
    /// unless the session never ran, in which case nothing will come.
    fn request_exit(&mut self) {
        info!("Requesting exit");
        match self.runtime.request_exit() {
            Ok(()) => (),
            Err(xr::sys::Result::ERROR_SESSION_NOT_RUNNING) => {
                info!("Session not running, stopping without the runtime");
                self.tracker.force_stop();
            }
            Err(e) => warn!("Failed to request exit: {}", e),
        }
    }

    fn frame(&mut self) -> Result<()> {
        let frame_state = self.runtime.wait_frame().context("Wait frame")?;
        let time = frame_state.predicted_display_time;

        if !frame_state.should_render {
            self.runtime.begin_frame().context("Begin frame")?;
            self.runtime
                .end_frame(time, &[], &CompositionPlan::empty())
                .context("End frame")?;
            return Ok(());
        }

        let mut joints = [None, None];
        if self.caps.hand_tracking {
            for hand in Hand::BOTH.iter().copied() {
                joints[hand.index()] =
                    joints_or_inactive(hand, self.runtime.locate_hand_joints(hand, time));
            }
        }

        let views = self.runtime.locate_views(time).context("Locate views")?;
        ensure!(
            views.len() == self.runtime.view_count(),
            "Runtime located {} views, expected {}",
            views.len(),
            self.runtime.view_count()
        );

        if let Err(e) = self.runtime.sync_actions() {
            warn!("Failed to sync actions: {}", e);
        }

        let mut hands: [HandVisual; 2] = Default::default();
        for hand in Hand::BOTH.iter().copied() {
            let grip = self.poll_hand(hand, time);
            hands[hand.index()] = HandVisual::select(joints[hand.index()].as_deref(), grip);
        }

        self.runtime.begin_frame().context("Begin frame")?;

        for (index, view) in views.iter().enumerate() {
            let image = self
                .runtime
                .acquire_image(index)
                .with_context(|| format!("Acquire swapchain image for view {}", index))?;
            self.runtime
                .wait_image(index)
                .with_context(|| format!("Wait swapchain image for view {}", index))?;

            let scene = SceneView {
                view: *view,
                display_time: time,
                hands: &hands,
            };
            self.renderer
                .render_view(index, image, &scene)
                .with_context(|| format!("Render view {}", index))?;

            self.runtime
                .release_image(index)
                .with_context(|| format!("Release swapchain image for view {}", index))?;
        }

        self.runtime
            .end_frame(time, &views, &CompositionPlan::for_frame(&self.caps))
            .context("End frame")?;

        Ok(())
    }

    /// Action queries for one hand. Every failure here is logged and skipped.
    fn poll_hand(&mut self, hand: Hand, time: xr::Time) -> Option<xr::Posef> {
        let grip = match self.runtime.hand_pose(hand, time) {
            Ok(pose) => pose,
            Err(e) => {
                warn!("Failed to locate {:?} hand: {}", hand, e);
                None
            }
        };

        match self.runtime.grab_state(hand) {
            Ok(grab) if should_vibrate(&grab) => {
                if let Err(e) = self.runtime.apply_haptic(hand) {
                    warn!("Failed to apply haptic feedback to {:?} hand: {}", hand, e);
                }
            }
            Ok(_) => (),
            Err(e) => warn!("Failed to get {:?} grab state: {}", hand, e),
        }

        match self.runtime.throttle_state(hand) {
            Ok(throttle) if throttle.active && throttle.value != 0.0 => debug!(
                "{:?} throttle {:.3} (changed: {})",
                hand, throttle.value, throttle.changed
            ),
            Ok(_) => (),
            Err(e) => warn!("Failed to get {:?} throttle state: {}", hand, e),
        }

        grip
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{AcquiredImage, FloatInput};
    use crate::settings::FrameGate;

    /// Stays invisible and counts how often anything frame-related is touched
    #[derive(Default)]
    struct IdleRuntime {
        events: Vec<RuntimeEvent>,
        frame_calls: usize,
        exit_requests: usize,
        exit_result: Option<xr::sys::Result>,
    }

    impl XrRuntime for IdleRuntime {
        fn poll_event(&mut self) -> xr::Result<Option<RuntimeEvent>> {
            Ok(if self.events.is_empty() {
                None
            } else {
                Some(self.events.remove(0))
            })
        }
        fn request_exit(&mut self) -> xr::Result<()> {
            self.exit_requests += 1;
            match self.exit_result {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
        fn view_count(&self) -> usize {
            2
        }
        fn wait_frame(&mut self) -> xr::Result<xr::FrameState> {
            self.frame_calls += 1;
            Err(xr::sys::Result::ERROR_RUNTIME_FAILURE)
        }
        fn begin_frame(&mut self) -> xr::Result<()> {
            self.frame_calls += 1;
            Ok(())
        }
        fn end_frame(&mut self, _: xr::Time, _: &[xr::View], _: &CompositionPlan) -> xr::Result<()> {
            self.frame_calls += 1;
            Ok(())
        }
        fn locate_views(&mut self, _: xr::Time) -> xr::Result<Vec<xr::View>> {
            self.frame_calls += 1;
            Ok(Vec::new())
        }
        fn locate_hand_joints(
            &mut self,
            _: Hand,
            _: xr::Time,
        ) -> xr::Result<Option<Vec<xr::HandJointLocation>>> {
            self.frame_calls += 1;
            Ok(None)
        }
        fn sync_actions(&mut self) -> xr::Result<()> {
            self.frame_calls += 1;
            Ok(())
        }
        fn hand_pose(&mut self, _: Hand, _: xr::Time) -> xr::Result<Option<xr::Posef>> {
            Ok(None)
        }
        fn grab_state(&mut self, _: Hand) -> xr::Result<FloatInput> {
            Ok(FloatInput::default())
        }
        fn throttle_state(&mut self, _: Hand) -> xr::Result<FloatInput> {
            Ok(FloatInput::default())
        }
        fn apply_haptic(&mut self, _: Hand) -> xr::Result<()> {
            Ok(())
        }
        fn acquire_image(&mut self, _: usize) -> xr::Result<AcquiredImage> {
            self.frame_calls += 1;
            Ok(AcquiredImage {
                color: 0,
                depth: None,
            })
        }
        fn wait_image(&mut self, _: usize) -> xr::Result<()> {
            Ok(())
        }
        fn release_image(&mut self, _: usize) -> xr::Result<()> {
            Ok(())
        }
    }

    struct NoRenderer;
    impl SceneRenderer for NoRenderer {
        fn render_view(&mut self, _: usize, _: AcquiredImage, _: &SceneView) -> Result<()> {
            Ok(())
        }
    }

    struct Quit(bool);
    impl InputSource for Quit {
        fn poll_exit_requested(&mut self) -> bool {
            std::mem::replace(&mut self.0, false)
        }
    }

    fn tracker(state: xr::SessionState) -> SessionTracker {
        SessionTracker::new(state, FrameGate::Visible)
    }

    #[test]
    fn suspended_passes_skip_the_frame_cycle() {
        let mut runtime = IdleRuntime::default();
        let mut input = Quit(false);
        let mut renderer = NoRenderer;
        let mut frame_loop = FrameLoop::new(
            &mut runtime,
            &mut renderer,
            &mut input,
            Capabilities::default(),
            tracker(xr::SessionState::SYNCHRONIZED),
        )
        .with_suspended_sleep(Duration::from_millis(0));

        for _ in 0..3 {
            assert_eq!(frame_loop.iterate().unwrap(), LoopState::Suspended);
        }
        drop(frame_loop);
        assert_eq!(runtime.frame_calls, 0);
    }

    #[test]
    fn exit_on_idle_session_stops_locally() {
        let mut runtime = IdleRuntime {
            exit_result: Some(xr::sys::Result::ERROR_SESSION_NOT_RUNNING),
            ..IdleRuntime::default()
        };
        let mut input = Quit(true);
        let mut renderer = NoRenderer;
        let mut frame_loop = FrameLoop::new(
            &mut runtime,
            &mut renderer,
            &mut input,
            Capabilities::default(),
            tracker(xr::SessionState::READY),
        )
        .with_suspended_sleep(Duration::from_millis(0));

        frame_loop.run().unwrap();
        assert_eq!(frame_loop.state(), LoopState::Exited);
        drop(frame_loop);
        assert_eq!(runtime.exit_requests, 1);
    }

    #[test]
    fn exit_request_waits_for_runtime() {
        let mut runtime = IdleRuntime::default();
        let mut input = Quit(true);
        let mut renderer = NoRenderer;
        let mut frame_loop = FrameLoop::new(
            &mut runtime,
            &mut renderer,
            &mut input,
            Capabilities::default(),
            tracker(xr::SessionState::IDLE),
        )
        .with_suspended_sleep(Duration::from_millis(0));

        // Requesting exit alone does not stop the loop
        assert_eq!(frame_loop.iterate().unwrap(), LoopState::Suspended);
        drop(frame_loop);
        runtime
            .events
            .push(RuntimeEvent::SessionStateChanged(xr::SessionState::STOPPING));

        let mut input = Quit(false);
        let mut renderer = NoRenderer;
        let mut frame_loop = FrameLoop::new(
            &mut runtime,
            &mut renderer,
            &mut input,
            Capabilities::default(),
            tracker(xr::SessionState::IDLE),
        );
        assert_eq!(frame_loop.iterate().unwrap(), LoopState::Stopping);
        drop(frame_loop);
        assert_eq!(runtime.exit_requests, 1);
    }

    #[test]
    fn wait_failure_is_fatal() {
        let mut runtime = IdleRuntime::default();
        let mut input = Quit(false);
        let mut renderer = NoRenderer;
        let mut frame_loop = FrameLoop::new(
            &mut runtime,
            &mut renderer,
            &mut input,
            Capabilities::default(),
            tracker(xr::SessionState::FOCUSED),
        );
        let err = frame_loop.run().unwrap_err();
        assert!(format!("{:#}", err).contains("Wait frame"));
        assert_eq!(frame_loop.state(), LoopState::Exited);
    }
}
