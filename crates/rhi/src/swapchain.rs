//! Swap surface management.
//!
//! A [`SwapSurface`] is one complete presentation generation: the swapchain
//! and its presentable images + views, one depth image per frame slot, and
//! the per-slot synchronization set (image-available semaphore,
//! render-finished semaphore, in-flight fence). A resize or surface-loss
//! event retires the whole generation; the caller constructs a replacement,
//! handing this one in as a reuse hint, and drops the old generation only
//! after the new one exists.
//!
//! Presentable image count M is chosen by the backend (min + 1, clamped)
//! and is independent of the pipelining depth N ([`MAX_FRAMES_IN_FLIGHT`]).
//! Depth images are keyed by frame slot, not presentable image, because
//! depth contents are transient per frame.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::image::{DEFAULT_DEPTH_FORMAT, DepthImage};
use crate::queue::{PresentOutcome, Queue};
use crate::sync::{Fence, GPU_TIMEOUT_NS, Semaphore};

/// Pipelining depth N: how many frames may be in flight at once. Each slot
/// owns its own recording, semaphores, fence, and per-frame buffers, so the
/// CPU can prepare slot K+1 while the GPU still reads slot K.
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

/// Result of an acquire call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireStatus {
    /// An image is ready to record into.
    Ready {
        /// Index into the presentable image set.
        image_index: u32,
        /// The surface still works but no longer matches the window
        /// exactly; recreate after this frame completes.
        suboptimal: bool,
    },
    /// The surface is stale; the caller must recreate before rendering.
    OutOfDate,
}

/// Surface capability snapshot used to configure the swap surface.
struct SurfaceSupport {
    capabilities: vk::SurfaceCapabilitiesKHR,
    formats: Vec<vk::SurfaceFormatKHR>,
    present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };
        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
        };

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    #[inline]
    fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// One presentation generation. See the module docs for the ownership model.
pub struct SwapSurface {
    device: Arc<Device>,
    swapchain_loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    /// Presentable images, owned by the swapchain itself.
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    /// One depth image per frame slot.
    depth_images: Vec<DepthImage>,
    surface_format: vk::SurfaceFormatKHR,
    depth_format: vk::Format,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    /// Per-slot: signaled when the acquired image is ready to render to.
    image_available: Vec<Semaphore>,
    /// Per-slot: signaled when rendering completes, waited on by present.
    render_finished: Vec<Semaphore>,
    /// Per-slot: signaled when the slot's submission retires on the GPU.
    in_flight: Vec<Fence>,
}

impl SwapSurface {
    /// Creates the first generation for a surface.
    ///
    /// # Errors
    /// Returns an error if surface queries, swapchain creation, or any
    /// per-slot resource creation fails.
    pub fn new(
        instance: &ash::Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
        window_extent: vk::Extent2D,
    ) -> RhiResult<Self> {
        Self::create(instance, device, surface, surface_loader, window_extent, None)
    }

    /// Creates a replacement generation, passing `old` to the backend as a
    /// reuse hint.
    ///
    /// The caller must have waited for device idle first, and must keep
    /// `old` alive until this returns.
    ///
    /// # Errors
    /// Returns [`RhiError::FormatChanged`] if the new generation's image or
    /// depth format differs from the old one; downstream pipelines were
    /// built against the old formats, so this is a fatal configuration
    /// error, not a recoverable event.
    pub fn from_previous(
        instance: &ash::Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
        window_extent: vk::Extent2D,
        old: &SwapSurface,
    ) -> RhiResult<Self> {
        let new = Self::create(
            instance,
            device,
            surface,
            surface_loader,
            window_extent,
            Some(old.swapchain),
        )?;

        if !new.formats_match(old) {
            return Err(RhiError::FormatChanged(format!(
                "image {:?} -> {:?}, depth {:?} -> {:?}",
                old.surface_format.format,
                new.surface_format.format,
                old.depth_format,
                new.depth_format
            )));
        }

        Ok(new)
    }

    fn create(
        instance: &ash::Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
        window_extent: vk::Extent2D,
        old_swapchain: Option<vk::SwapchainKHR>,
    ) -> RhiResult<Self> {
        let swapchain_loader = ash::khr::swapchain::Device::new(instance, device.handle());

        let support = SurfaceSupport::query(device.physical_device(), surface, surface_loader)?;
        if !support.is_adequate() {
            return Err(RhiError::SwapchainError(
                "Inadequate surface support (no formats or present modes)".to_string(),
            ));
        }

        let surface_format = choose_surface_format(&support.formats);
        let present_mode = choose_present_mode(&support.present_modes);
        let extent = choose_extent(
            &support.capabilities,
            window_extent.width,
            window_extent.height,
        );
        let image_count = determine_image_count(&support.capabilities);

        info!(
            "Creating swap surface: {}x{}, format {:?}, present mode {:?}, {} images, {} frame slots",
            extent.width,
            extent.height,
            surface_format.format,
            present_mode,
            image_count,
            MAX_FRAMES_IN_FLIGHT
        );

        let queue_families = device.queue_families();
        let graphics_family = queue_families
            .graphics_family
            .ok_or(RhiError::NoSuitableGpu)?;
        let present_family = queue_families
            .present_family
            .ok_or(RhiError::NoSuitableGpu)?;
        let family_indices = [graphics_family, present_family];

        let (sharing_mode, family_indices_slice) = if graphics_family != present_family {
            (vk::SharingMode::CONCURRENT, family_indices.as_slice())
        } else {
            (vk::SharingMode::EXCLUSIVE, &[][..])
        };

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(family_indices_slice)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain.unwrap_or(vk::SwapchainKHR::null()));

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None)? };

        let images = unsafe { swapchain_loader.get_swapchain_images(swapchain)? };
        let image_views = create_image_views(&device, &images, surface_format.format)?;

        let depth_format = DEFAULT_DEPTH_FORMAT;
        let depth_images = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| DepthImage::new(Arc::clone(&device), extent, depth_format))
            .collect::<RhiResult<Vec<_>>>()?;

        let image_available = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| Semaphore::new(Arc::clone(&device)))
            .collect::<RhiResult<Vec<_>>>()?;
        let render_finished = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| Semaphore::new(Arc::clone(&device)))
            .collect::<RhiResult<Vec<_>>>()?;
        // Signaled so the first wait on each slot returns immediately.
        let in_flight = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| Fence::new(Arc::clone(&device), true))
            .collect::<RhiResult<Vec<_>>>()?;

        Ok(Self {
            device,
            swapchain_loader,
            swapchain,
            images,
            image_views,
            depth_images,
            surface_format,
            depth_format,
            present_mode,
            extent,
            image_available,
            render_finished,
            in_flight,
        })
    }

    /// Acquires the next presentable image for frame slot `slot`.
    ///
    /// Slot sequencing is owned by the caller's frame pacer; this type only
    /// owns the per-slot synchronization objects. Blocks on the slot's
    /// in-flight fence first, guaranteeing the GPU has retired the work
    /// submitted N frames ago before the slot's resources are touched
    /// again; this is what bounds in-flight frames to N. The fence is reset
    /// only once an image is actually acquired, so an out-of-date result
    /// leaves the slot immediately reusable.
    ///
    /// # Errors
    /// Fence/acquire timeouts map to fatal [`RhiError::DeviceTimeout`].
    pub fn acquire_next_image(&mut self, slot: usize) -> RhiResult<AcquireStatus> {
        self.in_flight[slot].wait("frame slot fence")?;

        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                GPU_TIMEOUT_NS,
                self.image_available[slot].handle(),
                vk::Fence::null(),
            )
        };

        match result {
            Ok((image_index, suboptimal)) => {
                self.in_flight[slot].reset()?;
                Ok(AcquireStatus::Ready {
                    image_index,
                    suboptimal,
                })
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("Acquire reported out-of-date surface");
                Ok(AcquireStatus::OutOfDate)
            }
            Err(vk::Result::TIMEOUT) => Err(RhiError::DeviceTimeout("image acquire")),
            Err(e) => Err(RhiError::VulkanError(e)),
        }
    }

    /// Submits the recorded work for frame slot `slot` and presents
    /// `image_index`.
    ///
    /// The submission waits on the slot's image-available semaphore at the
    /// color-output stage, signals its render-finished semaphore, and
    /// signals the slot's fence on completion. Presentation waits on
    /// render-finished.
    ///
    /// # Errors
    /// Out-of-date/suboptimal come back as [`PresentOutcome`] values, not
    /// errors; the caller recreates before the next acquire.
    pub fn submit_and_present(
        &mut self,
        slot: usize,
        command_buffer: vk::CommandBuffer,
        image_index: u32,
        graphics_queue: &Queue,
        present_queue: &Queue,
    ) -> RhiResult<PresentOutcome> {
        let wait_semaphores = [self.image_available[slot].handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [self.render_finished[slot].handle()];
        let command_buffers = [command_buffer];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        graphics_queue.submit(
            std::slice::from_ref(&submit_info),
            self.in_flight[slot].handle(),
        )?;

        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&signal_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        present_queue.present(&self.swapchain_loader, &present_info)
    }

    /// True when `other`'s image and depth formats match this generation's.
    pub fn formats_match(&self, other: &SwapSurface) -> bool {
        self.surface_format.format == other.surface_format.format
            && self.depth_format == other.depth_format
    }

    /// Extent of this generation.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Surface color format.
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.surface_format.format
    }

    /// Depth format used by the per-slot depth images.
    #[inline]
    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    /// The present mode in use.
    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    /// Number of presentable images (M, independent of N).
    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Presentable image handle by index.
    #[inline]
    pub fn image(&self, index: usize) -> vk::Image {
        self.images[index]
    }

    /// Presentable image view by index.
    #[inline]
    pub fn image_view(&self, index: usize) -> vk::ImageView {
        self.image_views[index]
    }

    /// Depth image view for a frame slot.
    #[inline]
    pub fn depth_view(&self, slot: usize) -> vk::ImageView {
        self.depth_images[slot].view()
    }

    /// Depth image handle for a frame slot.
    #[inline]
    pub fn depth_image(&self, slot: usize) -> vk::Image {
        self.depth_images[slot].image()
    }
}

impl Drop for SwapSurface {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.handle().destroy_image_view(view, None);
            }
            self.swapchain_loader
                .destroy_swapchain(self.swapchain, None);
        }
        debug!(
            "Swap surface destroyed ({}x{})",
            self.extent.width, self.extent.height
        );
    }
}

/// Chooses the surface format: B8G8R8A8_SRGB with SRGB_NONLINEAR when
/// offered, otherwise the first reported format.
fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    let preferred = formats.iter().find(|f| {
        f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    });

    if let Some(&format) = preferred {
        debug!("Selected preferred surface format: B8G8R8A8_SRGB with SRGB_NONLINEAR");
        return format;
    }

    warn!(
        "Preferred surface format unavailable, using first reported: {:?}",
        formats[0].format
    );
    formats[0]
}

/// Chooses the present mode: MAILBOX (tear-free, low latency) when offered,
/// otherwise IMMEDIATE, otherwise FIFO (the only mode the backend
/// guarantees).
fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        debug!("Selected MAILBOX present mode");
        return vk::PresentModeKHR::MAILBOX;
    }

    if present_modes.contains(&vk::PresentModeKHR::IMMEDIATE) {
        debug!("Selected IMMEDIATE present mode");
        return vk::PresentModeKHR::IMMEDIATE;
    }

    debug!("Selected FIFO present mode");
    vk::PresentModeKHR::FIFO
}

/// Chooses the extent: the surface's current extent when the backend fixes
/// it, otherwise the window extent clamped to the surface min/max.
/// `u32::MAX` in current_extent means "inherit from the window".
fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// Determines the presentable image count: one more than the minimum,
/// clamped to the maximum when the backend reports one (0 = unlimited).
fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;

    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}

/// Creates views for the presentable images.
fn create_image_views(
    device: &Device,
    images: &[vk::Image],
    format: vk::Format,
) -> RhiResult<Vec<vk::ImageView>> {
    let mut image_views = Vec::with_capacity(images.len());

    for &image in images {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            );

        let view = unsafe { device.handle().create_image_view(&create_info, None) };
        match view {
            Ok(view) => image_views.push(view),
            Err(e) => {
                // Unwind the views created so far before failing.
                for &view in &image_views {
                    unsafe { device.handle().destroy_image_view(view, None) };
                }
                return Err(e.into());
            }
        }
    }

    Ok(image_views)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    #[test]
    fn test_choose_surface_format_prefers_bgra_srgb() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = choose_surface_format(&formats);
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn test_choose_surface_format_requires_matching_color_space() {
        // Right format, wrong color space: falls through to first reported.
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
        ];
        let chosen = choose_surface_format(&formats);
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn test_choose_surface_format_falls_back_to_first() {
        let formats = [
            format(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = choose_surface_format(&formats);
        assert_eq!(chosen.format, vk::Format::R16G16B16A16_SFLOAT);
    }

    #[test]
    fn test_choose_present_mode_prefers_mailbox() {
        let modes = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
        ];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn test_choose_present_mode_falls_back_to_immediate() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::IMMEDIATE);
    }

    #[test]
    fn test_choose_present_mode_last_resort_fifo() {
        let modes = [vk::PresentModeKHR::FIFO];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_choose_extent_uses_backend_extent_when_fixed() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            ..Default::default()
        };
        let extent = choose_extent(&capabilities, 1920, 1080);
        assert_eq!(extent.width, 800);
        assert_eq!(extent.height, 600);
    }

    #[test]
    fn test_choose_extent_clamps_when_inherited() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 100,
                height: 100,
            },
            max_image_extent: vk::Extent2D {
                width: 1600,
                height: 900,
            },
            ..Default::default()
        };

        let too_big = choose_extent(&capabilities, 4000, 3000);
        assert_eq!(too_big.width, 1600);
        assert_eq!(too_big.height, 900);

        let too_small = choose_extent(&capabilities, 10, 10);
        assert_eq!(too_small.width, 100);
        assert_eq!(too_small.height, 100);

        let in_range = choose_extent(&capabilities, 800, 600);
        assert_eq!(in_range.width, 800);
        assert_eq!(in_range.height, 600);
    }

    #[test]
    fn test_determine_image_count_min_plus_one() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 8,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capabilities), 3);
    }

    #[test]
    fn test_determine_image_count_clamped_to_max() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 3,
            max_image_count: 3,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capabilities), 3);
    }

    #[test]
    fn test_determine_image_count_unlimited_max() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 4,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capabilities), 5);
    }

    #[test]
    fn test_frame_slot_count() {
        assert_eq!(MAX_FRAMES_IN_FLIGHT, 3);
    }
}
