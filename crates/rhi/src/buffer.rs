//! GPU buffer management and the host-to-device upload path.
//!
//! - [`BufferUsage`] selects Vulkan usage flags and memory placement
//! - [`Buffer`] wraps VkBuffer with gpu-allocator managed memory
//! - [`upload_to_device`] runs the staging write / device copy / fence wait
//!   protocol through a one-shot recording
//! - [`DynamicBuffer`] is the growable staging + device pair for streaming
//!   data
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use prism_rhi::device::Device;
//! use prism_rhi::buffer::{Buffer, BufferUsage};
//!
//! # fn example(device: Arc<Device>) -> Result<(), prism_rhi::RhiError> {
//! let bytes = [0u8; 256];
//! let staging = Buffer::new_staging(device, bytes.len() as u64, Some(&bytes))?;
//! # Ok(())
//! # }
//! ```

use std::marker::PhantomData;
use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::debug;

use crate::command::{CommandPool, OneShotRecorder};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::queue::Queue;

/// Multiplier applied to the current capacity when a dynamic buffer grows.
const GROWTH_NUMERATOR: usize = 3;
const GROWTH_DENOMINATOR: usize = 2;

/// Buffer usage type.
///
/// Selects Vulkan usage flags and the memory location the allocator places
/// the buffer in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    /// Vertex buffer, device-local, filled through the staging path
    Vertex,
    /// Index buffer, device-local, filled through the staging path
    Index,
    /// Uniform buffer, host-visible for per-frame CPU writes
    Uniform,
    /// Staging buffer, host-visible transfer source
    Staging,
    /// Readback buffer, host-visible transfer destination
    Readback,
}

impl BufferUsage {
    /// Converts to Vulkan buffer usage flags.
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferUsage::Vertex => {
                vk::BufferUsageFlags::VERTEX_BUFFER
                    | vk::BufferUsageFlags::TRANSFER_DST
                    | vk::BufferUsageFlags::TRANSFER_SRC
            }
            BufferUsage::Index => {
                vk::BufferUsageFlags::INDEX_BUFFER
                    | vk::BufferUsageFlags::TRANSFER_DST
                    | vk::BufferUsageFlags::TRANSFER_SRC
            }
            BufferUsage::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
            BufferUsage::Readback => vk::BufferUsageFlags::TRANSFER_DST,
        }
    }

    /// Returns the memory location for this buffer type.
    pub fn memory_location(self) -> MemoryLocation {
        match self {
            BufferUsage::Vertex | BufferUsage::Index => MemoryLocation::GpuOnly,
            BufferUsage::Uniform | BufferUsage::Staging => MemoryLocation::CpuToGpu,
            BufferUsage::Readback => MemoryLocation::GpuToCpu,
        }
    }

    /// Returns a human-readable name for the buffer type.
    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex",
            BufferUsage::Index => "index",
            BufferUsage::Uniform => "uniform",
            BufferUsage::Staging => "staging",
            BufferUsage::Readback => "readback",
        }
    }
}

/// GPU buffer wrapper with managed memory.
///
/// Memory type selection is delegated to gpu-allocator; an allocation
/// request with no compatible memory type fails fatally.
pub struct Buffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
    usage: BufferUsage,
}

impl Buffer {
    /// Creates a new buffer with the specified size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if buffer creation fails or no compatible memory
    /// type exists.
    pub fn new(device: Arc<Device>, usage: BufferUsage, size: vk::DeviceSize) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::InvalidHandle(
                "Buffer size must be greater than 0".to_string(),
            ));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage.to_vk_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.handle().create_buffer(&buffer_info, None)? };

        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };

        let allocation = {
            let mut allocator = device
                .allocator()
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            allocator.allocate(&AllocationCreateDesc {
                name: usage.name(),
                requirements,
                location: usage.memory_location(),
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })?
        };

        unsafe {
            device
                .handle()
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())?;
        }

        debug!("Created {} buffer: {} bytes", usage.name(), size);

        Ok(Self {
            device,
            buffer,
            allocation: Some(allocation),
            size,
            usage,
        })
    }

    /// Creates a host-visible staging buffer, optionally copying `data` into
    /// it immediately through the mapped pointer.
    ///
    /// # Errors
    /// Returns an error if creation or the initial write fails.
    pub fn new_staging(
        device: Arc<Device>,
        size: vk::DeviceSize,
        data: Option<&[u8]>,
    ) -> RhiResult<Self> {
        let buffer = Self::new(device, BufferUsage::Staging, size)?;
        if let Some(data) = data {
            buffer.write_data(0, data)?;
        }
        Ok(buffer)
    }

    /// Writes data into the buffer at the given byte offset.
    ///
    /// The buffer must be host-visible.
    ///
    /// # Errors
    /// Returns an error if the memory is not mapped or the write would
    /// exceed the buffer size.
    pub fn write_data(&self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        let end = offset + data.len() as vk::DeviceSize;
        if end > self.size {
            return Err(RhiError::InvalidHandle(format!(
                "Write exceeds buffer size: offset {} + data {} > buffer {}",
                offset,
                data.len(),
                self.size
            )));
        }

        let mapped_ptr = self.mapped_ptr()?;

        unsafe {
            let dst = mapped_ptr.add(offset as usize);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }

        Ok(())
    }

    /// Reads bytes back from the buffer at the given byte offset.
    ///
    /// The buffer must be host-visible; any GPU writes must have retired
    /// (fence-waited) before calling this.
    ///
    /// # Errors
    /// Returns an error if the memory is not mapped or the read would
    /// exceed the buffer size.
    pub fn read_data(&self, offset: vk::DeviceSize, out: &mut [u8]) -> RhiResult<()> {
        if out.is_empty() {
            return Ok(());
        }

        let end = offset + out.len() as vk::DeviceSize;
        if end > self.size {
            return Err(RhiError::InvalidHandle(format!(
                "Read exceeds buffer size: offset {} + out {} > buffer {}",
                offset,
                out.len(),
                self.size
            )));
        }

        let mapped_ptr = self.mapped_ptr()?;

        unsafe {
            let src = mapped_ptr.add(offset as usize);
            std::ptr::copy_nonoverlapping(src, out.as_mut_ptr(), out.len());
        }

        Ok(())
    }

    fn mapped_ptr(&self) -> RhiResult<*mut u8> {
        let allocation = self.allocation.as_ref().ok_or_else(|| {
            RhiError::InvalidHandle("Buffer allocation is not available".to_string())
        })?;

        let mapped = allocation
            .mapped_ptr()
            .ok_or_else(|| RhiError::InvalidHandle("Buffer memory is not mapped".to_string()))?;

        Ok(mapped.as_ptr() as *mut u8)
    }

    /// Returns the Vulkan buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Returns the buffer size in bytes.
    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Returns the buffer usage type.
    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        // Free allocation first, then destroy buffer
        if let Some(allocation) = self.allocation.take() {
            let mut allocator = self
                .device
                .allocator()
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if let Err(e) = allocator.free(allocation) {
                tracing::error!("Failed to free buffer allocation: {:?}", e);
            }
        }

        unsafe {
            self.device.handle().destroy_buffer(self.buffer, None);
        }
    }
}

/// Copies `size` bytes from a staging buffer into a device buffer through a
/// one-shot recording, blocking until the copy retires.
///
/// The staging memory may be reused or freed as soon as this returns.
///
/// # Errors
/// Returns an error on recording, submission, or fence-wait failure.
pub fn upload_to_device(
    device: Arc<Device>,
    pool: &CommandPool,
    queue: &Queue,
    staging: &Buffer,
    dst: &Buffer,
    size: vk::DeviceSize,
) -> RhiResult<()> {
    let mut one_shot = OneShotRecorder::new(device, pool)?;
    one_shot.begin()?;

    let region = vk::BufferCopy::default().size(size);
    one_shot
        .recorder()
        .copy_buffer(staging.handle(), dst.handle(), std::slice::from_ref(&region));

    one_shot.submit_and_wait(queue)
}

/// New element capacity when a dynamic buffer must hold `requested`
/// elements: the larger of the request and 1.5x the current capacity.
/// Capacity never shrinks.
pub fn grown_capacity(requested: usize, current: usize) -> usize {
    requested.max(current * GROWTH_NUMERATOR / GROWTH_DENOMINATOR)
}

/// Growable staging + device buffer pair for streaming element data.
///
/// Writes that exceed the current capacity destroy and reallocate both
/// buffers at [`grown_capacity`], amortizing reallocation under
/// monotonically growing workloads. Each write runs the full staging ->
/// device copy protocol and blocks until the copy retires.
pub struct DynamicBuffer<T: bytemuck::Pod> {
    device: Arc<Device>,
    usage: BufferUsage,
    staging: Buffer,
    device_buffer: Buffer,
    /// Element capacity of both buffers.
    capacity: usize,
    /// Elements currently written.
    len: usize,
    _marker: PhantomData<T>,
}

impl<T: bytemuck::Pod> DynamicBuffer<T> {
    /// Creates the pair with an initial element capacity.
    ///
    /// `usage` is the device buffer's role (Vertex or Index).
    ///
    /// # Errors
    /// Returns an error if either allocation fails.
    pub fn new(device: Arc<Device>, usage: BufferUsage, capacity: usize) -> RhiResult<Self> {
        let capacity = capacity.max(1);
        let bytes = (capacity * size_of::<T>()) as vk::DeviceSize;

        let staging = Buffer::new_staging(Arc::clone(&device), bytes, None)?;
        let device_buffer = Buffer::new(Arc::clone(&device), usage, bytes)?;

        Ok(Self {
            device,
            usage,
            staging,
            device_buffer,
            capacity,
            len: 0,
            _marker: PhantomData,
        })
    }

    /// Element capacity of the pair.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Elements currently stored.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when nothing has been written yet.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The device-local buffer to bind for drawing.
    #[inline]
    pub fn device_buffer(&self) -> &Buffer {
        &self.device_buffer
    }

    /// Writes `data` through the staging path, growing both buffers first
    /// when the element count exceeds the current capacity.
    ///
    /// Blocks until the device copy retires; the caller may rely on the
    /// data immediately after return.
    ///
    /// # Errors
    /// Returns an error on reallocation, write, or copy failure.
    pub fn write(&mut self, data: &[T], pool: &CommandPool, queue: &Queue) -> RhiResult<()> {
        if data.is_empty() {
            self.len = 0;
            return Ok(());
        }

        if data.len() > self.capacity {
            let new_capacity = grown_capacity(data.len(), self.capacity);
            let bytes = (new_capacity * size_of::<T>()) as vk::DeviceSize;
            debug!(
                "Growing {} dynamic buffer: {} -> {} elements",
                self.usage.name(),
                self.capacity,
                new_capacity
            );

            // Old buffers drop after the new ones exist.
            self.staging = Buffer::new_staging(Arc::clone(&self.device), bytes, None)?;
            self.device_buffer = Buffer::new(Arc::clone(&self.device), self.usage, bytes)?;
            self.capacity = new_capacity;
        }

        let bytes: &[u8] = bytemuck::cast_slice(data);
        self.staging.write_data(0, bytes)?;
        upload_to_device(
            Arc::clone(&self.device),
            pool,
            queue,
            &self.staging,
            &self.device_buffer,
            bytes.len() as vk::DeviceSize,
        )?;

        self.len = data.len();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_usage_to_vk_usage() {
        assert!(
            BufferUsage::Vertex
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST)
        );
        assert!(
            BufferUsage::Index
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST)
        );
        assert!(
            BufferUsage::Uniform
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::UNIFORM_BUFFER)
        );
        assert!(
            BufferUsage::Staging
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::TRANSFER_SRC)
        );
        assert!(
            BufferUsage::Readback
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::TRANSFER_DST)
        );
    }

    #[test]
    fn test_buffer_usage_memory_location() {
        assert_eq!(
            BufferUsage::Vertex.memory_location(),
            MemoryLocation::GpuOnly
        );
        assert_eq!(
            BufferUsage::Uniform.memory_location(),
            MemoryLocation::CpuToGpu
        );
        assert_eq!(
            BufferUsage::Staging.memory_location(),
            MemoryLocation::CpuToGpu
        );
        assert_eq!(
            BufferUsage::Readback.memory_location(),
            MemoryLocation::GpuToCpu
        );
    }

    #[test]
    fn test_grown_capacity_uses_growth_factor() {
        // Small increase over capacity lands on 1.5x, not exact fit.
        assert_eq!(grown_capacity(11, 10), 15);
        assert_eq!(grown_capacity(101, 100), 150);
    }

    #[test]
    fn test_grown_capacity_honors_large_requests() {
        assert_eq!(grown_capacity(1000, 10), 1000);
    }

    #[test]
    fn test_grown_capacity_monotonic() {
        // Increasing requests never shrink the capacity.
        let mut capacity = 4;
        for requested in [5usize, 6, 7, 20, 21, 100] {
            let next = grown_capacity(requested, capacity);
            assert!(next >= capacity);
            assert!(next >= requested);
            capacity = next;
        }
    }
}
