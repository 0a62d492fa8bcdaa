//! GPU mesh storage.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use prism_rhi::RhiResult;
use prism_rhi::buffer::{BufferUsage, DynamicBuffer};
use prism_rhi::command::{CommandPool, CommandRecorder};
use prism_rhi::device::Device;
use prism_rhi::queue::Queue;
use prism_rhi::vertex::MeshVertex;

use crate::frame::DrawableMesh;

/// An indexed triangle mesh resident in device-local memory.
///
/// Buffers grow if the mesh is re-uploaded larger; they never shrink.
pub struct GpuMesh {
    vertices: DynamicBuffer<MeshVertex>,
    indices: DynamicBuffer<u32>,
}

impl GpuMesh {
    /// Uploads the mesh through the staging path. Blocks until the copy
    /// retires.
    ///
    /// # Errors
    /// Returns an error if allocation or the upload fails.
    pub fn upload(
        device: Arc<Device>,
        pool: &CommandPool,
        queue: &Queue,
        vertices: &[MeshVertex],
        indices: &[u32],
    ) -> RhiResult<Self> {
        let mut vertex_buffer =
            DynamicBuffer::new(Arc::clone(&device), BufferUsage::Vertex, vertices.len())?;
        let mut index_buffer = DynamicBuffer::new(device, BufferUsage::Index, indices.len())?;

        vertex_buffer.write(vertices, pool, queue)?;
        index_buffer.write(indices, pool, queue)?;

        debug!(
            "Mesh uploaded: {} vertices, {} indices",
            vertices.len(),
            indices.len()
        );

        Ok(Self {
            vertices: vertex_buffer,
            indices: index_buffer,
        })
    }
}

impl DrawableMesh for GpuMesh {
    fn bind(&self, recorder: &CommandRecorder) {
        recorder.bind_vertex_buffers(0, &[self.vertices.device_buffer().handle()], &[0]);
        recorder.bind_index_buffer(
            self.indices.device_buffer().handle(),
            0,
            vk::IndexType::UINT32,
        );
    }

    fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }
}
