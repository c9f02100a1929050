use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Command line configuration
#[derive(Parser, Debug, Clone)]
#[command(name = "xrdemo", about = "Minimal OpenXR client drawing a few spinning cubes")]
pub struct Settings {
    /// Directory containing scene.vert.spv and scene.frag.spv
    #[arg(long, default_value = "shaders")]
    pub shaders: PathBuf,

    /// Reference space all poses are expressed in
    #[arg(long, value_enum, default_value_t = ReferenceSpace::Local)]
    pub reference_space: ReferenceSpace,

    /// Lowest session state in which frames are waited on, rendered and submitted
    #[arg(long, value_enum, default_value_t = FrameGate::Visible)]
    pub frame_gate: FrameGate,

    /// Never submit the quad layer
    #[arg(long)]
    pub no_quad: bool,

    /// Never submit the cylinder layer, even if the runtime supports it
    #[arg(long)]
    pub no_cylinder: bool,

    /// Never submit depth alongside the projection layer
    #[arg(long)]
    pub no_depth: bool,

    /// Never create hand trackers
    #[arg(long)]
    pub no_hand_tracking: bool,

    /// Do not present the left eye to the desktop window
    #[arg(long)]
    pub no_mirror: bool,

    /// Enable the Khronos validation layer
    #[arg(long)]
    pub validation: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceSpace {
    /// Seated, origin at the initial head position
    Local,
    /// Room scale, origin on the floor
    Stage,
}

impl ReferenceSpace {
    pub fn to_xr(self) -> xr::ReferenceSpaceType {
        match self {
            ReferenceSpace::Local => xr::ReferenceSpaceType::LOCAL,
            ReferenceSpace::Stage => xr::ReferenceSpaceType::STAGE,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameGate {
    /// Only run the frame cycle while the session is VISIBLE or FOCUSED
    Visible,
    /// Also run it while READY or SYNCHRONIZED, for runtimes that wait for a first frame
    Synchronized,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            shaders: PathBuf::from("shaders"),
            reference_space: ReferenceSpace::Local,
            frame_gate: FrameGate::Visible,
            no_quad: false,
            no_cylinder: false,
            no_depth: false,
            no_hand_tracking: false,
            no_mirror: false,
            validation: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_parser() {
        let parsed = Settings::parse_from(["xrdemo"]);
        let default = Settings::default();
        assert_eq!(parsed.shaders, default.shaders);
        assert_eq!(parsed.reference_space, default.reference_space);
        assert_eq!(parsed.frame_gate, default.frame_gate);
        assert!(!parsed.no_quad && !parsed.no_mirror && !parsed.validation);
    }

    #[test]
    fn flags_parse() {
        let parsed = Settings::parse_from([
            "xrdemo",
            "--reference-space",
            "stage",
            "--frame-gate",
            "synchronized",
            "--no-cylinder",
            "--shaders",
            "/tmp/spv",
        ]);
        assert_eq!(parsed.reference_space, ReferenceSpace::Stage);
        assert_eq!(parsed.frame_gate, FrameGate::Synchronized);
        assert!(parsed.no_cylinder);
        assert_eq!(parsed.shaders, PathBuf::from("/tmp/spv"));
        assert_eq!(parsed.reference_space.to_xr(), xr::ReferenceSpaceType::STAGE);
    }
}
