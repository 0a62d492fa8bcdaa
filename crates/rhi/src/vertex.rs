//! Vertex formats and their input descriptions.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// Mesh vertex: position, normal, and per-vertex color.
///
/// Layout is `#[repr(C)]` and matches the attribute descriptions below:
/// position at offset 0, normal at 12, color at 24, 36 bytes total.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct MeshVertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub color: Vec3,
}

impl MeshVertex {
    #[inline]
    pub const fn new(position: Vec3, normal: Vec3, color: Vec3) -> Self {
        Self {
            position,
            normal,
            color,
        }
    }

    /// Binding description for binding 0, per-vertex rate.
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    /// Attribute descriptions for locations 0..=2.
    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 0,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 1,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 12,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 2,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 24,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mesh_vertex_size() {
        assert_eq!(size_of::<MeshVertex>(), 36);
    }

    #[test]
    fn test_binding_description() {
        let binding = MeshVertex::binding_description();
        assert_eq!(binding.binding, 0);
        assert_eq!(binding.stride, 36);
        assert_eq!(binding.input_rate, vk::VertexInputRate::VERTEX);
    }

    #[test]
    fn test_attribute_offsets_match_layout() {
        use std::mem::offset_of;

        let attrs = MeshVertex::attribute_descriptions();
        assert_eq!(attrs[0].offset as usize, offset_of!(MeshVertex, position));
        assert_eq!(attrs[1].offset as usize, offset_of!(MeshVertex, normal));
        assert_eq!(attrs[2].offset as usize, offset_of!(MeshVertex, color));
        for (location, attr) in attrs.iter().enumerate() {
            assert_eq!(attr.location as usize, location);
            assert_eq!(attr.format, vk::Format::R32G32B32_SFLOAT);
        }
    }

    #[test]
    fn test_mesh_vertex_pod_cast() {
        let vertex = MeshVertex::new(
            Vec3::new(1.0, 2.0, 3.0),
            Vec3::Y,
            Vec3::new(0.5, 0.6, 0.7),
        );
        let bytes: &[u8] = bytemuck::bytes_of(&vertex);
        assert_eq!(bytes.len(), 36);

        let back: &MeshVertex = bytemuck::from_bytes(bytes);
        assert_eq!(back.position, vertex.position);
        assert_eq!(back.color, vertex.color);
    }
}
