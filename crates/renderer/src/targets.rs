//! Offscreen render targets for the post-process path.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use prism_rhi::RhiResult;
use prism_rhi::descriptor::{
    DescriptorPool, DescriptorSetLayout, image_info, update_descriptor_sets,
};
use prism_rhi::device::Device;
use prism_rhi::image::RenderTargetImage;
use prism_rhi::sampler::Sampler;
use prism_rhi::swapchain::MAX_FRAMES_IN_FLIGHT;

/// One offscreen color target per frame slot, plus the descriptor sets the
/// post-process pass samples them through.
///
/// Descriptor sets are allocated once; a resize recreates the images and
/// rewrites the existing sets in place rather than reallocating them.
pub struct PostProcessTargets {
    device: Arc<Device>,
    targets: Vec<RenderTargetImage>,
    sampler: Sampler,
    descriptor_sets: Vec<vk::DescriptorSet>,
}

impl PostProcessTargets {
    /// Creates the per-slot targets and their descriptor sets.
    ///
    /// # Errors
    /// Returns an error if image, sampler, or descriptor allocation fails.
    pub fn new(
        device: Arc<Device>,
        extent: vk::Extent2D,
        format: vk::Format,
        pool: &DescriptorPool,
        layout: &DescriptorSetLayout,
    ) -> RhiResult<Self> {
        let targets = Self::create_targets(&device, extent, format)?;
        let sampler = Sampler::nearest(Arc::clone(&device))?;

        let layouts = [layout.handle(); MAX_FRAMES_IN_FLIGHT];
        let descriptor_sets = pool.allocate(&layouts)?;

        let mut this = Self {
            device,
            targets,
            sampler,
            descriptor_sets,
        };
        this.write_descriptor_sets();
        Ok(this)
    }

    /// Recreates the targets at a new extent and rewrites the descriptor
    /// sets to point at them.
    ///
    /// The caller must have waited for device idle first.
    ///
    /// # Errors
    /// Returns an error if image creation fails; the old targets are kept
    /// intact in that case.
    pub fn recreate(&mut self, extent: vk::Extent2D, format: vk::Format) -> RhiResult<()> {
        let new_targets = Self::create_targets(&self.device, extent, format)?;
        self.targets = new_targets;
        self.write_descriptor_sets();

        debug!(
            "Post-process targets recreated at {}x{}",
            extent.width, extent.height
        );
        Ok(())
    }

    fn create_targets(
        device: &Arc<Device>,
        extent: vk::Extent2D,
        format: vk::Format,
    ) -> RhiResult<Vec<RenderTargetImage>> {
        (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| RenderTargetImage::new(Arc::clone(device), extent, format))
            .collect()
    }

    fn write_descriptor_sets(&mut self) {
        let infos: Vec<[vk::DescriptorImageInfo; 1]> = self
            .targets
            .iter()
            .map(|target| {
                [image_info(
                    self.sampler.handle(),
                    target.view(),
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                )]
            })
            .collect();

        let writes: Vec<vk::WriteDescriptorSet> = self
            .descriptor_sets
            .iter()
            .zip(&infos)
            .map(|(&set, info)| {
                vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(0)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(info)
            })
            .collect();

        update_descriptor_sets(&self.device, &writes);
    }

    /// The offscreen target for a frame slot.
    #[inline]
    pub fn target(&self, slot: usize) -> &RenderTargetImage {
        &self.targets[slot]
    }

    /// The descriptor set sampling a frame slot's target.
    #[inline]
    pub fn descriptor_set(&self, slot: usize) -> vk::DescriptorSet {
        self.descriptor_sets[slot]
    }
}
