use nalgebra::{Isometry3, Matrix4, Quaternion, Translation3, UnitQuaternion, Vector3};

/// Near clip plane, also reported in depth submission
pub const NEAR_Z: f32 = 0.01;
/// Far clip plane, also reported in depth submission
pub const FAR_Z: f32 = 100.0;

/// Combined projection and view matrix for one eye
pub fn matrix_from_view(view: &xr::View) -> Matrix4<f32> {
    let proj = projection_from_fov(&view.fov, NEAR_Z, FAR_Z);
    let view = view_from_pose(&view.pose);
    proj * view
}

// Ported from:
// https://gitlab.freedesktop.org/monado/demos/xrgears/-/blob/master/src/main.cpp
pub fn view_from_pose(pose: &xr::Posef) -> Matrix4<f32> {
    isometry_from_pose(pose).inverse().to_homogeneous()
}

/// Vulkan clip space: Y down, depth in [0, 1]
pub fn projection_from_fov(fov: &xr::Fovf, near: f32, far: f32) -> Matrix4<f32> {
    let tan_left = fov.angle_left.tan();
    let tan_right = fov.angle_right.tan();

    let tan_up = fov.angle_up.tan();
    let tan_down = fov.angle_down.tan();

    let tan_width = tan_right - tan_left;
    let tan_height = tan_up - tan_down;

    let a11 = 2.0 / tan_width;
    let a22 = 2.0 / tan_height;

    let a31 = (tan_right + tan_left) / tan_width;
    let a32 = (tan_up + tan_down) / tan_height;
    let a33 = -far / (far - near);

    let a43 = -(far * near) / (far - near);
    Matrix4::new(
        a11, 0.0, a31, 0.0, //
        0.0, -a22, a32, 0.0, //
        0.0, 0.0, a33, a43, //
        0.0, 0.0, -1.0, 0.0, //
    )
}

/// Rigid transform described by a runtime pose. The orientation is renormalized, runtimes
/// hand out quaternions that are only approximately unit length.
pub fn isometry_from_pose(pose: &xr::Posef) -> Isometry3<f32> {
    let q = pose.orientation;
    let rotation = UnitQuaternion::from_quaternion(Quaternion::new(q.w, q.x, q.y, q.z));
    let p = pose.position;
    Isometry3::from_parts(Translation3::new(p.x, p.y, p.z), rotation)
}

/// Model matrix placing a non-uniformly scaled unit cube at a pose
pub fn pose_model(pose: &xr::Posef, scale: Vector3<f32>) -> Matrix4<f32> {
    isometry_from_pose(pose).to_homogeneous() * Matrix4::new_nonuniform_scaling(&scale)
}

/// Model matrix for a uniformly scaled cube at `position`, spun about +Y by `degrees`
pub fn spinning_cube_model(position: Vector3<f32>, scale: f32, degrees: f32) -> Matrix4<f32> {
    let rotation = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), degrees.to_radians());
    Isometry3::from_parts(Translation3::from(position), rotation).to_homogeneous()
        * Matrix4::new_scaling(scale)
}

/// Animation angle in whole degrees: a quarter turn per second of predicted display time
pub fn rotation_degrees(display_time: xr::Time) -> u32 {
    const NANOS_PER_SECOND: i128 = 1_000_000_000;
    let quarter_turns = (display_time.as_nanos() as i128 * 90).div_euclid(NANOS_PER_SECOND);
    quarter_turns.rem_euclid(360) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector4;
    use proptest::prelude::*;

    fn pose(position: [f32; 3]) -> xr::Posef {
        xr::Posef {
            orientation: xr::Quaternionf {
                x: 0.0,
                y: 0.0,
                z: 0.0,
                w: 1.0,
            },
            position: xr::Vector3f {
                x: position[0],
                y: position[1],
                z: position[2],
            },
        }
    }

    fn symmetric_fov(half_angle: f32) -> xr::Fovf {
        xr::Fovf {
            angle_left: -half_angle,
            angle_right: half_angle,
            angle_up: half_angle,
            angle_down: -half_angle,
        }
    }

    #[test]
    fn rotation_examples() {
        assert_eq!(rotation_degrees(xr::Time::from_nanos(1_000_000_000)), 90);
        assert_eq!(rotation_degrees(xr::Time::from_nanos(4_000_000_000)), 0);
        assert_eq!(rotation_degrees(xr::Time::from_nanos(0)), 0);
        assert_eq!(rotation_degrees(xr::Time::from_nanos(2_500_000_000)), 225);
    }

    proptest! {
        #[test]
        fn rotation_is_floor_of_quarter_turns(nanos in 0i64..i64::MAX / 2) {
            let degrees = rotation_degrees(xr::Time::from_nanos(nanos));
            prop_assert!(degrees < 360);
            let expected = ((nanos as i128 * 90) / 1_000_000_000) % 360;
            prop_assert_eq!(degrees as i128, expected);
        }

        #[test]
        fn rotation_repeats_every_four_seconds(nanos in 0i64..1_000_000_000_000) {
            let a = rotation_degrees(xr::Time::from_nanos(nanos));
            let b = rotation_degrees(xr::Time::from_nanos(nanos + 4_000_000_000));
            prop_assert_eq!(a, b);
        }
    }

    #[test]
    fn projection_maps_clip_planes_to_unit_depth() {
        let proj = projection_from_fov(&symmetric_fov(0.7), NEAR_Z, FAR_Z);

        let near = proj * Vector4::new(0.0, 0.0, -NEAR_Z, 1.0);
        assert!((near.z / near.w).abs() < 1e-5);

        let far = proj * Vector4::new(0.0, 0.0, -FAR_Z, 1.0);
        assert!((far.z / far.w - 1.0).abs() < 1e-5);

        // Up in view space is down in Vulkan clip space
        let up = proj * Vector4::new(0.0, 1.0, -1.0, 1.0);
        assert!(up.y < 0.0);
    }

    #[test]
    fn view_undoes_head_translation() {
        let head = pose([1.0, 2.0, 3.0]);
        let view = view_from_pose(&head);
        let eye = view * Vector4::new(1.0, 2.0, 3.0, 1.0);
        assert!(eye.xyz().norm() < 1e-5);
    }

    #[test]
    fn spinning_cube_quarter_turn() {
        let model = spinning_cube_model(Vector3::new(0.0, 0.5, -1.5), 0.33, 90.0);
        let corner = model * Vector4::new(1.0, 0.0, 0.0, 1.0);
        // +X rotates onto -Z about +Y
        assert!((corner.x - 0.0).abs() < 1e-5);
        assert!((corner.y - 0.5).abs() < 1e-5);
        assert!((corner.z - (-1.5 - 0.33)).abs() < 1e-5);
    }

    #[test]
    fn pose_model_scales_before_placing() {
        let model = pose_model(&pose([0.0, 1.0, 0.0]), Vector3::new(0.05, 0.05, 0.2));
        let tip = model * Vector4::new(0.0, 0.0, 1.0, 1.0);
        assert!((tip.y - 1.0).abs() < 1e-5);
        assert!((tip.z - 0.2).abs() < 1e-5);
    }
}
