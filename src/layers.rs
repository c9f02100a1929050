//! Which composition layers a frame submits, and where the extra layers sit in the world.
use crate::capabilities::Capabilities;
use std::f32::consts::PI;

/// Pixel size of the quad and cylinder textures
pub const LAYER_IMAGE_WIDTH: u32 = 800;
pub const LAYER_IMAGE_HEIGHT: u32 = 600;

pub const QUAD_POSITION: [f32; 3] = [1.5, 0.7, -1.5];
pub const QUAD_WIDTH_METERS: f32 = 1.0;

pub const CYLINDER_POSITION: [f32; 3] = [1.5, 0.0, -1.5];
pub const CYLINDER_RADIUS: f32 = 0.5;
/// Just short of a third of a full turn
pub const CYLINDER_CENTRAL_ANGLE: f32 = (2.0 * PI - 0.0001) / 3.0;

/// Layers submitted at frame end, in back to front order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompositionPlan {
    pub projection: bool,
    /// Attach depth info to every projection view
    pub depth: bool,
    pub quad: bool,
    pub cylinder: bool,
}

impl CompositionPlan {
    /// Nothing at all, for frames the runtime told us not to render
    pub fn empty() -> Self {
        Self::default()
    }

    /// The stereo projection, plus whatever the capabilities allow
    pub fn for_frame(caps: &Capabilities) -> Self {
        Self {
            projection: true,
            depth: caps.depth_layer,
            quad: caps.quad_layer,
            cylinder: caps.cylinder_layer,
        }
    }

    pub fn layer_count(&self) -> usize {
        [self.projection, self.quad, self.cylinder]
            .iter()
            .filter(|&&enabled| enabled)
            .count()
    }
}

pub fn identity_pose_at(position: [f32; 3]) -> xr::Posef {
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

pub fn aspect_ratio(pixel_width: u32, pixel_height: u32) -> f32 {
    pixel_width as f32 / pixel_height as f32
}

/// World size of the quad: fixed width, height following the texture's aspect ratio
pub fn quad_size(pixel_width: u32, pixel_height: u32) -> xr::Extent2Df {
    xr::Extent2Df {
        width: QUAD_WIDTH_METERS,
        height: QUAD_WIDTH_METERS / aspect_ratio(pixel_width, pixel_height),
    }
}

/// RGBA8 test pattern: a red gradient down the rows, a white main diagonal and a black
/// anti-diagonal, each 3 pixels wide
pub fn layer_pattern(width: u32, height: u32) -> Vec<[u8; 4]> {
    let (w, h) = (width as i64, height as i64);
    let mut pixels = Vec::with_capacity((width * height) as usize);
    for row in 0..h {
        for col in 0..w {
            let mut pixel = [((row as f32 / h as f32) * 255.0) as u8, 0, 0, 255];
            if (row - col).abs() < 3 {
                pixel = [255, 255, 255, 255];
            }
            if ((w - col) - row).abs() < 3 {
                pixel = [0, 0, 0, 255];
            }
            pixels.push(pixel);
        }
    }
    pixels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quad_height_follows_aspect() {
        let size = quad_size(LAYER_IMAGE_WIDTH, LAYER_IMAGE_HEIGHT);
        assert_eq!(size.width, 1.0);
        assert!((size.height - 0.75).abs() < 1e-6);

        let square = quad_size(512, 512);
        assert_eq!(square.height, square.width);
    }

    #[test]
    fn plan_follows_capabilities() {
        let caps = Capabilities {
            hand_tracking: true,
            depth_layer: false,
            cylinder_layer: true,
            quad_layer: false,
        };
        let plan = CompositionPlan::for_frame(&caps);
        assert!(plan.projection && plan.cylinder);
        assert!(!plan.quad && !plan.depth);
        assert_eq!(plan.layer_count(), 2);

        assert_eq!(CompositionPlan::empty().layer_count(), 0);
    }

    #[test]
    fn pattern_landmarks() {
        let (w, h) = (40, 30);
        let pixels = layer_pattern(w, h);
        let at = |row: u32, col: u32| pixels[(row * w + col) as usize];

        assert_eq!(pixels.len(), (w * h) as usize);
        assert_eq!(at(0, 0), [255, 255, 255, 255]);
        assert_eq!(at(2, 0), [255, 255, 255, 255]);
        assert_eq!(at(0, w - 1), [0, 0, 0, 255]);
        assert_eq!(at(15, 20), [127, 0, 0, 255]);
        assert_eq!(at(0, 20), [0, 0, 0, 255]);
    }

    #[test]
    fn cylinder_angle_is_just_under_a_third() {
        assert!(CYLINDER_CENTRAL_ANGLE < 2.0 * PI / 3.0);
        assert!(CYLINDER_CENTRAL_ANGLE > 2.0 * PI / 3.0 - 0.001);
    }
}
