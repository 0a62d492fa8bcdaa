//! Renderer composition root.
//!
//! Builds the whole GPU stack from a window, owns every per-slot resource,
//! and drives the frame loop through the [`FramePacer`]. All dependencies
//! are constructed here and injected downward; nothing below this module
//! reaches for a global.
//!
//! # Frame structure
//!
//! Each frame renders the scene into the slot's offscreen color target
//! (with depth), then runs the post-process pass that samples the target
//! into the acquired swapchain image with the pixelize push constants.
//!
//! # Teardown
//!
//! Destruction order matters: per-slot resources and pipelines before the
//! swap surface, the swap surface before the window surface, the surface
//! before the device, the instance last. `ManuallyDrop` enforces the
//! order explicitly.

use std::mem::ManuallyDrop;
use std::path::Path;
use std::sync::Arc;

use ash::vk;
use glam::{Mat4, Vec3};
use tracing::{debug, error, info};

use prism_platform::{Surface, Window};
use prism_rhi::buffer::{Buffer, BufferUsage};
use prism_rhi::command::{CommandPool, CommandRecorder};
use prism_rhi::descriptor::{
    DescriptorPool, DescriptorSetLayout, buffer_info, combined_image_sampler_binding,
    uniform_buffer_binding, update_descriptor_sets,
};
use prism_rhi::device::Device;
use prism_rhi::instance::Instance;
use prism_rhi::physical_device::select_physical_device;
use prism_rhi::pipeline::{GraphicsPipelineBuilder, Pipeline, PipelineLayout};
use prism_rhi::queue::Queue;
use prism_rhi::shader::{Shader, ShaderStage};
use prism_rhi::swapchain::{MAX_FRAMES_IN_FLIGHT, SwapSurface};
use prism_rhi::vertex::MeshVertex;
use prism_rhi::{RhiError, RhiResult};

use crate::frame::{DrawableMesh, FrameContext, OverlayHook};
use crate::mesh::GpuMesh;
use crate::pacing::{BeginOutcome, FramePacer};
use crate::targets::PostProcessTargets;
use crate::ubo::{CameraUbo, ObjectUbo, PixelizeParams};

/// Default pixelize block edge in pixels.
pub const DEFAULT_BLOCK_SIZE: f32 = 8.0;

/// Per-slot recording and uniform resources.
struct FrameData {
    recorder: CommandRecorder,
    camera_ubo: Buffer,
    object_ubo: Buffer,
    descriptor_set: vk::DescriptorSet,
}

/// Pixelize pass settings.
struct PixelizeSettings {
    enabled: bool,
    block_size: f32,
}

impl PixelizeSettings {
    /// Sets the block edge, clamped to a one-pixel minimum.
    fn set_block_size(&mut self, block_size: f32) {
        self.block_size = block_size.max(1.0);
    }
}

pub struct Renderer {
    instance: ManuallyDrop<Instance>,
    device: ManuallyDrop<Arc<Device>>,
    surface: ManuallyDrop<Surface>,
    graphics_queue: ManuallyDrop<Arc<Queue>>,
    present_queue: ManuallyDrop<Arc<Queue>>,
    swap_surface: ManuallyDrop<SwapSurface>,

    scene_set_layout: ManuallyDrop<DescriptorSetLayout>,
    post_set_layout: ManuallyDrop<DescriptorSetLayout>,
    descriptor_pool: ManuallyDrop<DescriptorPool>,

    mesh_pipeline: ManuallyDrop<Pipeline>,
    mesh_pipeline_layout: ManuallyDrop<PipelineLayout>,
    post_pipeline: ManuallyDrop<Pipeline>,
    post_pipeline_layout: ManuallyDrop<PipelineLayout>,

    targets: ManuallyDrop<PostProcessTargets>,
    command_pool: ManuallyDrop<CommandPool>,
    frames: Vec<FrameData>,
    meshes: Vec<Box<dyn DrawableMesh>>,
    overlay_hooks: Vec<Box<dyn OverlayHook>>,

    pacer: FramePacer,
    pixelize: PixelizeSettings,

    // Scene state written into the per-slot UBOs each frame.
    camera_view: Mat4,
    camera_projection: Mat4,
    camera_position: Vec3,
    model_transform: Mat4,

    // Latest window size; the swap surface is rebuilt to match lazily.
    width: u32,
    height: u32,
}

impl Renderer {
    /// Builds the full renderer for a window.
    ///
    /// # Errors
    /// Returns an error if any GPU resource creation fails.
    pub fn new(window: &Window) -> RhiResult<Self> {
        let width = window.width();
        let height = window.height();

        info!("Initializing renderer ({}x{})", width, height);

        let enable_validation = cfg!(debug_assertions);
        let instance = Instance::new(enable_validation)?;

        let surface = window
            .create_surface(instance.entry(), instance.handle())
            .map_err(|e| RhiError::SurfaceError(e.to_string()))?;

        let physical_device_info =
            select_physical_device(instance.handle(), surface.handle(), surface.loader())?;
        let device = Device::new(&instance, &physical_device_info)?;

        let graphics_family = device
            .queue_families()
            .graphics_family
            .ok_or(RhiError::NoSuitableGpu)?;
        let present_family = device
            .queue_families()
            .present_family
            .ok_or(RhiError::NoSuitableGpu)?;

        let graphics_queue = Queue::new(
            Arc::clone(&device),
            device.graphics_queue_handle(),
            graphics_family,
        );
        let present_queue = if present_family == graphics_family {
            Arc::clone(&graphics_queue)
        } else {
            Queue::new(
                Arc::clone(&device),
                device.present_queue_handle(),
                present_family,
            )
        };

        let swap_surface = SwapSurface::new(
            instance.handle(),
            Arc::clone(&device),
            surface.handle(),
            surface.loader(),
            window.extent(),
        )?;

        // Set 0 of the mesh pass: camera UBO + object UBO.
        let scene_bindings = [
            uniform_buffer_binding(
                0,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            ),
            uniform_buffer_binding(1, vk::ShaderStageFlags::VERTEX),
        ];
        let scene_set_layout = DescriptorSetLayout::new(Arc::clone(&device), &scene_bindings)?;

        // Set 0 of the post pass: the sampled offscreen target.
        let post_bindings = [combined_image_sampler_binding(
            0,
            vk::ShaderStageFlags::FRAGMENT,
        )];
        let post_set_layout = DescriptorSetLayout::new(Arc::clone(&device), &post_bindings)?;

        // Exact capacity: N scene sets with 2 UBOs each, N post sets with
        // one sampled image each.
        let pool_sizes = [
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count((MAX_FRAMES_IN_FLIGHT * 2) as u32),
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(MAX_FRAMES_IN_FLIGHT as u32),
        ];
        let descriptor_pool = DescriptorPool::new(
            Arc::clone(&device),
            (MAX_FRAMES_IN_FLIGHT * 2) as u32,
            &pool_sizes,
        )?;

        let command_pool = CommandPool::new(Arc::clone(&device), graphics_family)?;
        let frames = Self::create_frame_data(
            &device,
            &command_pool,
            &descriptor_pool,
            &scene_set_layout,
        )?;

        let (mesh_pipeline, mesh_pipeline_layout) = Self::create_mesh_pipeline(
            Arc::clone(&device),
            &scene_set_layout,
            swap_surface.format(),
            swap_surface.depth_format(),
        )?;
        let (post_pipeline, post_pipeline_layout) = Self::create_post_pipeline(
            Arc::clone(&device),
            &post_set_layout,
            swap_surface.format(),
        )?;

        let targets = PostProcessTargets::new(
            Arc::clone(&device),
            swap_surface.extent(),
            swap_surface.format(),
            &descriptor_pool,
            &post_set_layout,
        )?;

        info!(
            "Renderer initialized: {} presentable images, {} frame slots",
            swap_surface.image_count(),
            MAX_FRAMES_IN_FLIGHT
        );

        Ok(Self {
            instance: ManuallyDrop::new(instance),
            device: ManuallyDrop::new(device),
            surface: ManuallyDrop::new(surface),
            graphics_queue: ManuallyDrop::new(graphics_queue),
            present_queue: ManuallyDrop::new(present_queue),
            swap_surface: ManuallyDrop::new(swap_surface),
            scene_set_layout: ManuallyDrop::new(scene_set_layout),
            post_set_layout: ManuallyDrop::new(post_set_layout),
            descriptor_pool: ManuallyDrop::new(descriptor_pool),
            mesh_pipeline: ManuallyDrop::new(mesh_pipeline),
            mesh_pipeline_layout: ManuallyDrop::new(mesh_pipeline_layout),
            post_pipeline: ManuallyDrop::new(post_pipeline),
            post_pipeline_layout: ManuallyDrop::new(post_pipeline_layout),
            targets: ManuallyDrop::new(targets),
            command_pool: ManuallyDrop::new(command_pool),
            frames,
            meshes: Vec::new(),
            overlay_hooks: Vec::new(),
            pacer: FramePacer::new(),
            pixelize: PixelizeSettings {
                enabled: false,
                block_size: DEFAULT_BLOCK_SIZE,
            },
            camera_view: Mat4::IDENTITY,
            camera_projection: Mat4::IDENTITY,
            camera_position: Vec3::ZERO,
            model_transform: Mat4::IDENTITY,
            width,
            height,
        })
    }

    /// Creates the per-slot recorders, uniform buffers, and scene sets.
    fn create_frame_data(
        device: &Arc<Device>,
        command_pool: &CommandPool,
        descriptor_pool: &DescriptorPool,
        scene_set_layout: &DescriptorSetLayout,
    ) -> RhiResult<Vec<FrameData>> {
        let recorders = command_pool.checkout(MAX_FRAMES_IN_FLIGHT as u32)?;

        let layouts = [scene_set_layout.handle(); MAX_FRAMES_IN_FLIGHT];
        let descriptor_sets = descriptor_pool.allocate(&layouts)?;

        let mut frames = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
        for (recorder, &descriptor_set) in recorders.into_iter().zip(&descriptor_sets) {
            let camera_ubo = Buffer::new(
                Arc::clone(device),
                BufferUsage::Uniform,
                CameraUbo::SIZE as u64,
            )?;
            let object_ubo = Buffer::new(
                Arc::clone(device),
                BufferUsage::Uniform,
                ObjectUbo::SIZE as u64,
            )?;

            let camera_infos = [buffer_info(camera_ubo.handle(), 0, CameraUbo::SIZE as u64)];
            let object_infos = [buffer_info(object_ubo.handle(), 0, ObjectUbo::SIZE as u64)];
            let writes = [
                vk::WriteDescriptorSet::default()
                    .dst_set(descriptor_set)
                    .dst_binding(0)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(&camera_infos),
                vk::WriteDescriptorSet::default()
                    .dst_set(descriptor_set)
                    .dst_binding(1)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(&object_infos),
            ];
            update_descriptor_sets(device, &writes);

            frames.push(FrameData {
                recorder,
                camera_ubo,
                object_ubo,
                descriptor_set,
            });
        }

        Ok(frames)
    }

    fn create_mesh_pipeline(
        device: Arc<Device>,
        scene_set_layout: &DescriptorSetLayout,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> RhiResult<(Pipeline, PipelineLayout)> {
        let vertex_shader = Shader::from_spirv_file(
            Arc::clone(&device),
            Path::new("shaders/spirv/mesh.vert.spv"),
            ShaderStage::Vertex,
            "main",
        )?;
        let fragment_shader = Shader::from_spirv_file(
            Arc::clone(&device),
            Path::new("shaders/spirv/mesh.frag.spv"),
            ShaderStage::Fragment,
            "main",
        )?;

        let layout = PipelineLayout::new(
            Arc::clone(&device),
            &[scene_set_layout.handle()],
            &[],
        )?;

        let pipeline = GraphicsPipelineBuilder::new()
            .vertex_shader(&vertex_shader)
            .fragment_shader(&fragment_shader)
            .vertex_binding(MeshVertex::binding_description())
            .vertex_attributes(&MeshVertex::attribute_descriptions())
            .color_attachment_format(color_format)
            .depth_attachment_format(depth_format)
            .build(device, &layout)?;

        Ok((pipeline, layout))
    }

    fn create_post_pipeline(
        device: Arc<Device>,
        post_set_layout: &DescriptorSetLayout,
        color_format: vk::Format,
    ) -> RhiResult<(Pipeline, PipelineLayout)> {
        let vertex_shader = Shader::from_spirv_file(
            Arc::clone(&device),
            Path::new("shaders/spirv/pixelize.vert.spv"),
            ShaderStage::Vertex,
            "main",
        )?;
        let fragment_shader = Shader::from_spirv_file(
            Arc::clone(&device),
            Path::new("shaders/spirv/pixelize.frag.spv"),
            ShaderStage::Fragment,
            "main",
        )?;

        let push_range = vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
            offset: 0,
            size: PixelizeParams::SIZE as u32,
        };
        let layout = PipelineLayout::new(
            Arc::clone(&device),
            &[post_set_layout.handle()],
            &[push_range],
        )?;

        // Fullscreen triangle synthesized in the vertex shader; no vertex
        // input, no depth.
        let pipeline = GraphicsPipelineBuilder::new()
            .vertex_shader(&vertex_shader)
            .fragment_shader(&fragment_shader)
            .cull_mode(vk::CullModeFlags::NONE)
            .depth(false)
            .color_attachment_format(color_format)
            .build(device, &layout)?;

        Ok((pipeline, layout))
    }

    /// Uploads a mesh through the staging path and registers it for
    /// drawing. Blocks until the upload retires.
    ///
    /// # Errors
    /// Returns an error if allocation or the upload fails.
    pub fn upload_mesh(&mut self, vertices: &[MeshVertex], indices: &[u32]) -> RhiResult<()> {
        let mesh = GpuMesh::upload(
            Arc::clone(&self.device),
            &self.command_pool,
            &self.graphics_queue,
            vertices,
            indices,
        )?;
        self.meshes.push(Box::new(mesh));
        Ok(())
    }

    /// Registers an externally owned drawable for the scene pass.
    pub fn add_mesh(&mut self, mesh: Box<dyn DrawableMesh>) {
        self.meshes.push(mesh);
    }

    /// Registers a layer that records into every frame after the
    /// post-process draw.
    pub fn add_overlay_hook(&mut self, hook: Box<dyn OverlayHook>) {
        self.overlay_hooks.push(hook);
    }

    /// Sets the camera matrices used from the next frame on.
    pub fn set_camera(&mut self, view: Mat4, projection: Mat4, position: Vec3) {
        self.camera_view = view;
        self.camera_projection = projection;
        self.camera_position = position;
    }

    /// Sets the model transform used from the next frame on.
    pub fn set_model_transform(&mut self, transform: Mat4) {
        self.model_transform = transform;
    }

    /// Toggles the pixelize pass and returns the new state.
    pub fn toggle_pixelize(&mut self) -> bool {
        self.pixelize.enabled = !self.pixelize.enabled;
        info!(
            "Pixelize {}",
            if self.pixelize.enabled { "on" } else { "off" }
        );
        self.pixelize.enabled
    }

    /// Sets the pixelize block edge in pixels (clamped to >= 1).
    pub fn set_block_size(&mut self, block_size: f32) {
        self.pixelize.set_block_size(block_size);
    }

    /// Notifies the renderer of a window resize. The swap surface is
    /// rebuilt before the next acquire.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == self.width && height == self.height {
            return;
        }

        debug!(
            "Resize: {}x{} -> {}x{}",
            self.width, self.height, width, height
        );
        self.width = width;
        self.height = height;

        if width > 0 && height > 0 {
            self.pacer.request_recreation();
            for hook in &mut self.overlay_hooks {
                hook.resized(width, height);
            }
        }
    }

    /// Renders one frame.
    ///
    /// A zero-sized window skips the frame. A stale surface is rebuilt and
    /// the frame skipped; the next call renders normally.
    ///
    /// # Errors
    /// Returns fatal errors only; out-of-date and suboptimal surfaces are
    /// handled internally.
    pub fn render_frame(&mut self, delta_time: f32) -> RhiResult<()> {
        if self.width == 0 || self.height == 0 {
            return Ok(());
        }

        if self.pacer.needs_recreation() {
            self.recreate_swap_surface()?;
        }

        let slot = self.pacer.slot();
        let acquire = self.swap_surface.acquire_next_image(slot)?;

        let image_index = match self.pacer.begin_frame(acquire) {
            BeginOutcome::Render { image_index } => image_index,
            BeginOutcome::SkipAndRecreate => {
                self.recreate_swap_surface()?;
                return Ok(());
            }
        };

        self.update_uniforms(slot)?;
        self.record_frame(slot, image_index, delta_time)?;

        let command_buffer = self.frames[slot].recorder.handle();
        let outcome = self.swap_surface.submit_and_present(
            slot,
            command_buffer,
            image_index,
            &self.graphics_queue,
            &self.present_queue,
        )?;

        self.pacer.end_frame(outcome);
        Ok(())
    }

    /// Rebuilds the swap surface and dependent targets at the current
    /// window size.
    fn recreate_swap_surface(&mut self) -> RhiResult<()> {
        self.device.wait_idle()?;

        let extent = vk::Extent2D {
            width: self.width,
            height: self.height,
        };

        let new_surface = SwapSurface::from_previous(
            self.instance.handle(),
            Arc::clone(&self.device),
            self.surface.handle(),
            self.surface.loader(),
            extent,
            &self.swap_surface,
        )?;

        // The old generation drops only after the new one exists.
        let old = std::mem::replace(&mut self.swap_surface, ManuallyDrop::new(new_surface));
        drop(ManuallyDrop::into_inner(old));

        self.targets
            .recreate(self.swap_surface.extent(), self.swap_surface.format())?;

        self.pacer.recreated();
        Ok(())
    }

    fn update_uniforms(&self, slot: usize) -> RhiResult<()> {
        let frame = &self.frames[slot];

        let camera = CameraUbo::new(
            self.camera_view,
            self.camera_projection,
            self.camera_position,
        );
        frame.camera_ubo.write_data(0, bytemuck::bytes_of(&camera))?;

        let object = ObjectUbo::new(self.model_transform);
        frame.object_ubo.write_data(0, bytemuck::bytes_of(&object))?;

        Ok(())
    }

    /// Records both passes and the overlay hooks for the frame.
    fn record_frame(&mut self, slot: usize, image_index: u32, delta_time: f32) -> RhiResult<()> {
        let extent = self.swap_surface.extent();
        let target_image = self.targets.target(slot).image();
        let target_view = self.targets.target(slot).view();
        let swap_image = self.swap_surface.image(image_index as usize);
        let swap_view = self.swap_surface.image_view(image_index as usize);
        let depth_view = self.swap_surface.depth_view(slot);
        let depth_image = self.swap_surface.depth_image(slot);
        let post_set = self.targets.descriptor_set(slot);

        let frame = &mut self.frames[slot];
        frame.recorder.begin_recording()?;
        let cmd = &frame.recorder;

        cmd.image_barrier(
            target_image,
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags::empty(),
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        );
        cmd.image_barrier(
            depth_image,
            vk::ImageAspectFlags::DEPTH,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            vk::AccessFlags::empty(),
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        );

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };

        // Scene pass into the offscreen target.
        let color_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(target_view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: [0.05, 0.05, 0.08, 1.0],
                },
            });
        let depth_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(depth_view)
            .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .clear_value(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            });
        let rendering_info = vk::RenderingInfo::default()
            .render_area(scissor)
            .layer_count(1)
            .color_attachments(std::slice::from_ref(&color_attachment))
            .depth_attachment(&depth_attachment);

        cmd.begin_rendering(&rendering_info);
        cmd.set_viewport(&viewport);
        cmd.set_scissor(&scissor);
        cmd.bind_pipeline(vk::PipelineBindPoint::GRAPHICS, self.mesh_pipeline.handle());
        cmd.bind_descriptor_sets(
            vk::PipelineBindPoint::GRAPHICS,
            self.mesh_pipeline_layout.handle(),
            0,
            &[frame.descriptor_set],
        );
        for mesh in &self.meshes {
            mesh.bind(cmd);
            cmd.draw_indexed(mesh.index_count(), 1, 0, 0, 0);
        }
        cmd.end_rendering();

        // Target becomes a shader input; swap image becomes the output.
        cmd.image_barrier(
            target_image,
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::AccessFlags::SHADER_READ,
        );
        cmd.image_barrier(
            swap_image,
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags::empty(),
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        );

        // Post pass into the swap image.
        let post_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(swap_view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::DONT_CARE)
            .store_op(vk::AttachmentStoreOp::STORE);
        let post_rendering_info = vk::RenderingInfo::default()
            .render_area(scissor)
            .layer_count(1)
            .color_attachments(std::slice::from_ref(&post_attachment));

        let params = if self.pixelize.enabled {
            PixelizeParams::new(
                extent.width as f32,
                extent.height as f32,
                self.pixelize.block_size,
            )
        } else {
            PixelizeParams::passthrough(extent.width as f32, extent.height as f32)
        };

        cmd.begin_rendering(&post_rendering_info);
        cmd.set_viewport(&viewport);
        cmd.set_scissor(&scissor);
        cmd.bind_pipeline(vk::PipelineBindPoint::GRAPHICS, self.post_pipeline.handle());
        cmd.bind_descriptor_sets(
            vk::PipelineBindPoint::GRAPHICS,
            self.post_pipeline_layout.handle(),
            0,
            &[post_set],
        );
        cmd.push_constants(
            self.post_pipeline_layout.handle(),
            vk::ShaderStageFlags::FRAGMENT,
            0,
            &params,
        );
        cmd.draw(3, 1, 0, 0);

        // Overlay layers draw on top of the post-processed image, inside
        // the same pass and submission.
        let mut ctx = FrameContext {
            recorder: cmd,
            slot,
            extent,
            delta_time,
        };
        for hook in &mut self.overlay_hooks {
            hook.record(&mut ctx);
        }

        cmd.end_rendering();

        cmd.image_barrier(
            swap_image,
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::AccessFlags::empty(),
        );

        frame.recorder.end_recording()
    }

    /// The current swap surface extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.swap_surface.extent()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            error!("Failed to wait for device idle during teardown: {:?}", e);
        }

        self.meshes.clear();
        self.frames.clear();

        unsafe {
            ManuallyDrop::drop(&mut self.command_pool);
            ManuallyDrop::drop(&mut self.targets);
            ManuallyDrop::drop(&mut self.post_pipeline);
            ManuallyDrop::drop(&mut self.post_pipeline_layout);
            ManuallyDrop::drop(&mut self.mesh_pipeline);
            ManuallyDrop::drop(&mut self.mesh_pipeline_layout);
            ManuallyDrop::drop(&mut self.descriptor_pool);
            ManuallyDrop::drop(&mut self.post_set_layout);
            ManuallyDrop::drop(&mut self.scene_set_layout);
            ManuallyDrop::drop(&mut self.swap_surface);
            ManuallyDrop::drop(&mut self.surface);
            // The queues hold the remaining device references; releasing
            // them here lets the device be destroyed before the instance.
            ManuallyDrop::drop(&mut self.present_queue);
            ManuallyDrop::drop(&mut self.graphics_queue);
            ManuallyDrop::drop(&mut self.device);
            ManuallyDrop::drop(&mut self.instance);
        }

        info!("Renderer destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_size_clamps_to_one_pixel() {
        let mut settings = PixelizeSettings {
            enabled: false,
            block_size: DEFAULT_BLOCK_SIZE,
        };

        settings.set_block_size(0.25);
        assert_eq!(settings.block_size, 1.0);

        settings.set_block_size(32.0);
        assert_eq!(settings.block_size, 32.0);
    }
}
