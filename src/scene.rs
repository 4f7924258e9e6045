use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3};

/// Uniform block rewritten every frame
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, Pod, Zeroable)]
pub struct PerFrameData {
    pub viewproj: Mat4,
    pub near: f32,
    pub far: f32,
    _padding: [f32; 2],
}

impl PerFrameData {
    pub fn new(viewproj: Mat4, near: f32, far: f32) -> Self {
        Self {
            viewproj,
            near,
            far,
            _padding: [0.0; 2],
        }
    }
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, Pod, Zeroable)]
pub struct PerVertexData {
    pub position: Vec3,
    pub texcoord: Vec2,
}

pub fn quad() -> [PerVertexData; 6] {
    let corner = |x: f32, y: f32| PerVertexData {
        position: Vec3::new(x, y, 0.0),
        texcoord: Vec2::new((x + 1.0) * 0.5, (y + 1.0) * 0.5),
    };
    [
        corner(-1.0, -1.0),
        corner(1.0, -1.0),
        corner(1.0, 1.0),
        corner(1.0, 1.0),
        corner(-1.0, 1.0),
        corner(-1.0, -1.0),
    ]
}

/// Tightly packed RGB checkerboard, the kind of texture that needs widening to RGBA
pub fn checkerboard_rgb(size: u32, cell: u32) -> Vec<u8> {
    let cell = cell.max(1);
    (0..size * size)
        .flat_map(|i| {
            let (x, y) = (i % size, i / size);
            if (x / cell + y / cell) % 2 == 0 {
                [0xe0, 0x40, 0x40]
            } else {
                [0x20, 0x20, 0x20]
            }
        })
        .collect()
}
