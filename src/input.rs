use crate::runtime::{FloatInput, Hand};
use anyhow::{Context, Result};
use log::{info, warn};

/// Grab values strictly above this fire a haptic pulse
pub const GRAB_THRESHOLD: f32 = 0.75;

/// Haptic policy: only an active grab pressed past the threshold vibrates
pub fn should_vibrate(grab: &FloatInput) -> bool {
    grab.active && grab.value > GRAB_THRESHOLD
}

/// Pulse sent when a grab crosses the threshold
pub fn grab_pulse() -> xr::HapticVibration<'static> {
    xr::HapticVibration::new()
        .amplitude(0.5)
        .duration(xr::Duration::MIN_HAPTIC)
        .frequency(xr::FREQUENCY_UNSPECIFIED)
}

const SIMPLE_CONTROLLER: &str = "/interaction_profiles/khr/simple_controller";
const INDEX_CONTROLLER: &str = "/interaction_profiles/valve/index_controller";

/// The single action set and everything hanging off it
pub struct Actions {
    pub action_set: xr::ActionSet,
    pub grab: xr::Action<f32>,
    pub throttle: xr::Action<f32>,
    pub pose: xr::Action<xr::Posef>,
    pub haptic: xr::Action<xr::Haptic>,
    pub hand_paths: [xr::Path; 2],
    pub hand_spaces: [xr::Space; 2],
}

impl Actions {
    /// Create the actions, suggest bindings, attach them to the session and create one grip
    /// space per hand
    pub fn new<G: xr::Graphics>(instance: &xr::Instance, session: &xr::Session<G>) -> Result<Self> {
        let action_set = instance
            .create_action_set("mainactions", "Main Actions", 0)
            .context("Create action set")?;

        let hand_paths = [
            instance
                .string_to_path(Hand::Left.user_path())
                .context("Left hand path")?,
            instance
                .string_to_path(Hand::Right.user_path())
                .context("Right hand path")?,
        ];

        let grab = action_set
            .create_action::<f32>("grabobjectfloat", "Grab Object", &hand_paths)
            .context("Create grab action")?;
        let throttle = action_set
            .create_action::<f32>("throttle", "Use Throttle forward/backward", &hand_paths)
            .context("Create throttle action")?;
        let pose = action_set
            .create_action::<xr::Posef>("handpose", "Hand Pose", &hand_paths)
            .context("Create pose action")?;
        let haptic = action_set
            .create_action::<xr::Haptic>("haptic", "Haptic Vibration", &hand_paths)
            .context("Create haptic action")?;

        let path = |s: &str| {
            instance
                .string_to_path(s)
                .with_context(|| format!("Binding path {}", s))
        };

        let simple = vec![
            xr::Binding::new(&grab, path("/user/hand/left/input/select/click")?),
            xr::Binding::new(&grab, path("/user/hand/right/input/select/click")?),
            xr::Binding::new(&pose, path("/user/hand/left/input/grip/pose")?),
            xr::Binding::new(&pose, path("/user/hand/right/input/grip/pose")?),
            xr::Binding::new(&haptic, path("/user/hand/left/output/haptic")?),
            xr::Binding::new(&haptic, path("/user/hand/right/output/haptic")?),
        ];
        suggest(instance, SIMPLE_CONTROLLER, &simple)?;

        let index = vec![
            xr::Binding::new(&grab, path("/user/hand/left/input/trigger/value")?),
            xr::Binding::new(&grab, path("/user/hand/right/input/trigger/value")?),
            xr::Binding::new(&throttle, path("/user/hand/left/input/thumbstick/y")?),
            xr::Binding::new(&throttle, path("/user/hand/right/input/thumbstick/y")?),
            xr::Binding::new(&pose, path("/user/hand/left/input/grip/pose")?),
            xr::Binding::new(&pose, path("/user/hand/right/input/grip/pose")?),
            xr::Binding::new(&haptic, path("/user/hand/left/output/haptic")?),
            xr::Binding::new(&haptic, path("/user/hand/right/output/haptic")?),
        ];
        suggest(instance, INDEX_CONTROLLER, &index)?;

        session
            .attach_action_sets(&[&action_set])
            .context("Attach action set")?;

        let hand_spaces = [
            pose.create_space(session.clone(), hand_paths[0], xr::Posef::IDENTITY)
                .context("Left hand space")?,
            pose.create_space(session.clone(), hand_paths[1], xr::Posef::IDENTITY)
                .context("Right hand space")?,
        ];

        Ok(Self {
            action_set,
            grab,
            throttle,
            pose,
            haptic,
            hand_paths,
            hand_spaces,
        })
    }

    pub fn hand_path(&self, hand: Hand) -> xr::Path {
        self.hand_paths[hand.index()]
    }

    pub fn hand_space(&self, hand: Hand) -> &xr::Space {
        &self.hand_spaces[hand.index()]
    }
}

/// A profile the runtime rejects is not fatal, the other one may still bind
fn suggest(instance: &xr::Instance, profile: &str, bindings: &[xr::Binding]) -> Result<()> {
    let profile_path = instance
        .string_to_path(profile)
        .with_context(|| format!("Profile path {}", profile))?;
    match instance.suggest_interaction_profile_bindings(profile_path, bindings) {
        Ok(()) => info!("Suggested bindings for {}", profile),
        Err(e) => warn!("Binding suggestion rejected for {}: {}", profile, e),
    }
    Ok(())
}

/// Float action state as plain data
pub fn float_input(state: xr::ActionState<f32>) -> FloatInput {
    FloatInput {
        active: state.is_active,
        value: state.current_state,
        changed: state.changed_since_last_sync,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn grab(active: bool, value: f32) -> FloatInput {
        FloatInput {
            active,
            value,
            changed: true,
        }
    }

    #[test]
    fn threshold_is_strict() {
        assert!(!should_vibrate(&grab(true, 0.75)));
        assert!(should_vibrate(&grab(true, 0.751)));
        assert!(!should_vibrate(&grab(false, 1.0)));
    }

    #[test]
    fn grab_pulse_is_short_and_half_strength() {
        let pulse = grab_pulse().into_raw();
        assert_eq!(pulse.amplitude, 0.5);
        assert!(pulse.duration == xr::Duration::MIN_HAPTIC);
        assert_eq!(pulse.frequency, xr::FREQUENCY_UNSPECIFIED);
    }

    proptest! {
        #[test]
        fn vibrates_iff_active_and_above(active in any::<bool>(), value in 0.0f32..=1.0) {
            prop_assert_eq!(should_vibrate(&grab(active, value)), active && value > 0.75);
        }
    }
}
