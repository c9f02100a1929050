use log::warn;

/// What to draw for one hand this frame
#[derive(Debug, Clone, PartialEq)]
pub enum HandVisual {
    /// Nothing is tracked
    Hidden,
    /// Rigid controller block at the grip pose
    Controller(xr::Posef),
    /// One cube per joint with a valid position
    Skeleton(Vec<JointCube>),
}

impl Default for HandVisual {
    fn default() -> Self {
        HandVisual::Hidden
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointCube {
    pub pose: xr::Posef,
    pub radius: f32,
}

impl HandVisual {
    /// Joint data that reports itself active replaces the controller pose, even when no
    /// single joint has a valid position
    pub fn select(joints: Option<&[xr::HandJointLocation]>, grip: Option<xr::Posef>) -> Self {
        if let Some(joints) = joints {
            let cubes = joints
                .iter()
                .filter(|joint| {
                    joint
                        .location_flags
                        .contains(xr::SpaceLocationFlags::POSITION_VALID)
                })
                .map(|joint| JointCube {
                    pose: joint.pose,
                    radius: joint.radius,
                })
                .collect();
            return HandVisual::Skeleton(cubes);
        }

        match grip {
            Some(pose) => HandVisual::Controller(pose),
            None => HandVisual::Hidden,
        }
    }
}

/// Best-effort joint lookup: a failure is logged and reads as an untracked hand
pub fn joints_or_inactive(
    hand: crate::runtime::Hand,
    result: xr::Result<Option<Vec<xr::HandJointLocation>>>,
) -> Option<Vec<xr::HandJointLocation>> {
    match result {
        Ok(joints) => joints,
        Err(e) => {
            warn!("Failed to locate {:?} hand joints: {}", hand, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn joint(flags: xr::SpaceLocationFlags, y: f32) -> xr::HandJointLocation {
        xr::HandJointLocation {
            location_flags: flags,
            pose: xr::Posef {
                orientation: xr::Quaternionf {
                    x: 0.0,
                    y: 0.0,
                    z: 0.0,
                    w: 1.0,
                },
                position: xr::Vector3f { x: 0.0, y, z: 0.0 },
            },
            radius: 0.01,
        }
    }

    fn grip() -> xr::Posef {
        joint(xr::SpaceLocationFlags::EMPTY, 1.0).pose
    }

    #[test]
    fn skeleton_keeps_only_positioned_joints() {
        let joints = [
            joint(xr::SpaceLocationFlags::POSITION_VALID, 0.1),
            joint(xr::SpaceLocationFlags::ORIENTATION_VALID, 0.2),
            joint(
                xr::SpaceLocationFlags::POSITION_VALID | xr::SpaceLocationFlags::POSITION_TRACKED,
                0.3,
            ),
        ];
        match HandVisual::select(Some(&joints), Some(grip())) {
            HandVisual::Skeleton(cubes) => {
                assert_eq!(cubes.len(), 2);
                assert_eq!(cubes[1].pose.position.y, 0.3);
            }
            other => panic!("expected skeleton, got {:?}", other),
        }
    }

    #[test]
    fn falls_back_to_controller() {
        assert_eq!(
            HandVisual::select(None, Some(grip())),
            HandVisual::Controller(grip())
        );

        assert_eq!(HandVisual::select(None, None), HandVisual::Hidden);
    }

    #[test]
    fn active_skeleton_hides_controller() {
        let untracked = [joint(xr::SpaceLocationFlags::EMPTY, 0.0)];
        assert_eq!(
            HandVisual::select(Some(&untracked), Some(grip())),
            HandVisual::Skeleton(Vec::new())
        );
    }

    #[test]
    fn joint_failures_read_as_inactive() {
        let result = Err(xr::sys::Result::ERROR_RUNTIME_FAILURE);
        assert!(joints_or_inactive(crate::runtime::Hand::Left, result).is_none());
    }
}
