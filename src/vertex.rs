use bytemuck::offset_of;
use erupt::vk1_0 as vk;

/// Vertex suitable for use from vertex shaders
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub uv: [f32; 2],
}

unsafe impl bytemuck::Zeroable for Vertex {}
unsafe impl bytemuck::Pod for Vertex {}

impl Vertex {
    pub const fn new(pos: [f32; 3], uv: [f32; 2]) -> Self {
        Self { pos, uv }
    }

    pub fn binding_description() -> vk::VertexInputBindingDescriptionBuilder<'static> {
        vk::VertexInputBindingDescriptionBuilder::new()
            .binding(0)
            .stride(std::mem::size_of::<Self>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
    }

    pub fn get_attribute_descriptions() -> [vk::VertexInputAttributeDescriptionBuilder<'static>; 2]
    {
        [
            vk::VertexInputAttributeDescriptionBuilder::new()
                .binding(0)
                .location(0)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(offset_of!(Self, pos) as u32),
            vk::VertexInputAttributeDescriptionBuilder::new()
                .binding(0)
                .location(1)
                .format(vk::Format::R32G32_SFLOAT)
                .offset(offset_of!(Self, uv) as u32),
        ]
    }
}

const fn v(x: f32, y: f32, z: f32, u: f32, w: f32) -> Vertex {
    Vertex::new([x, y, z], [u, w])
}

/// Unit cube centered on the origin, six faces of two triangles each, UVs spanning each face
#[rustfmt::skip]
pub const CUBE: [Vertex; 36] = [
    v(-0.5, -0.5, -0.5, 0.0, 0.0), v( 0.5,  0.5, -0.5, 1.0, 1.0), v( 0.5, -0.5, -0.5, 1.0, 0.0),
    v( 0.5,  0.5, -0.5, 1.0, 1.0), v(-0.5, -0.5, -0.5, 0.0, 0.0), v(-0.5,  0.5, -0.5, 0.0, 1.0),

    v(-0.5, -0.5,  0.5, 0.0, 0.0), v( 0.5, -0.5,  0.5, 1.0, 0.0), v( 0.5,  0.5,  0.5, 1.0, 1.0),
    v( 0.5,  0.5,  0.5, 1.0, 1.0), v(-0.5,  0.5,  0.5, 0.0, 1.0), v(-0.5, -0.5,  0.5, 0.0, 0.0),

    v(-0.5,  0.5,  0.5, 1.0, 0.0), v(-0.5,  0.5, -0.5, 1.0, 1.0), v(-0.5, -0.5, -0.5, 0.0, 1.0),
    v(-0.5, -0.5, -0.5, 0.0, 1.0), v(-0.5, -0.5,  0.5, 0.0, 0.0), v(-0.5,  0.5,  0.5, 1.0, 0.0),

    v( 0.5,  0.5,  0.5, 1.0, 0.0), v( 0.5, -0.5, -0.5, 0.0, 1.0), v( 0.5,  0.5, -0.5, 1.0, 1.0),
    v( 0.5, -0.5, -0.5, 0.0, 1.0), v( 0.5,  0.5,  0.5, 1.0, 0.0), v( 0.5, -0.5,  0.5, 0.0, 0.0),

    v(-0.5, -0.5, -0.5, 0.0, 1.0), v( 0.5, -0.5, -0.5, 1.0, 1.0), v( 0.5, -0.5,  0.5, 1.0, 0.0),
    v( 0.5, -0.5,  0.5, 1.0, 0.0), v(-0.5, -0.5,  0.5, 0.0, 0.0), v(-0.5, -0.5, -0.5, 0.0, 1.0),

    v(-0.5,  0.5, -0.5, 0.0, 1.0), v( 0.5,  0.5,  0.5, 1.0, 0.0), v( 0.5,  0.5, -0.5, 1.0, 1.0),
    v( 0.5,  0.5,  0.5, 1.0, 0.0), v(-0.5,  0.5, -0.5, 0.0, 1.0), v(-0.5,  0.5,  0.5, 0.0, 0.0),
];

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    #[test]
    fn cube_faces_point_outward() {
        for triangle in CUBE.chunks(3) {
            let [a, b, c] = [triangle[0], triangle[1], triangle[2]].map(|v| Vector3::from(v.pos));
            let normal = (b - a).cross(&(c - a));
            let centroid = (a + b + c) / 3.0;
            assert!(normal.dot(&centroid) > 0.0, "inward face at {:?}", centroid);
        }
    }

    #[test]
    fn cube_spans_unit_box() {
        for vertex in CUBE.iter() {
            assert!(vertex.pos.iter().all(|c| c.abs() == 0.5));
            assert!(vertex.uv.iter().all(|c| *c == 0.0 || *c == 1.0));
        }
    }
}
