//! A minimal OpenXR client: brings up a Vulkan-backed session, then draws a few spinning cubes,
//! the user's hands or controllers, and a quad and cylinder layer until the runtime or the user
//! ends the session.
extern crate openxr as xr;

mod allocated_buffer;
pub mod bootstrap;
pub mod capabilities;
mod core;
mod extensions;
pub mod frame_loop;
mod frame_sync;
pub mod hand_tracking;
pub mod input;
pub mod layers;
mod material;
pub mod math;
mod mirror;
mod renderer;
pub mod runtime;
pub mod session_state;
pub mod settings;
mod swapchain_images;
mod vertex;
mod xr_session;

use anyhow::Result;
use frame_loop::FrameLoop;
use log::{error, info};
use session_state::SessionTracker;
pub use settings::Settings;

pub(crate) const APP_NAME: &str = "xrdemo";
pub(crate) const ENGINE_NAME: &str = "xrdemo";

/// Bootstrap, run the frame loop until the session ends, then clean up
pub fn run(settings: &Settings) -> Result<()> {
    let mut context = bootstrap::bootstrap(settings)?;

    let result = {
        let tracker = SessionTracker::new(context.session_state, settings.frame_gate);
        let mut frame_loop = FrameLoop::new(
            &mut context.xr,
            &mut context.renderer,
            &mut context.window,
            context.caps,
            tracker,
        );
        frame_loop.run()
    };

    info!("Cleaning up");
    context.shutdown();
    result
}

/// Process exit status for a finished run. A failure is reported once, through the log.
pub fn exit_code(result: &Result<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            error!("{:#}", e);
            1
        }
    }
}
