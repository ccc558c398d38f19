//! Vulkan render backend built on ash.
//!
//! Renderpasses are real `VkRenderPass` objects with one Vulkan subpass per
//! configured subpass; framebuffers bind stage-owned image views and
//! swapchain image views against them in attachment declaration order.
//! Device memory goes through gpu-allocator.

pub(crate) mod conversion;
mod debug;
mod device;
mod instance;
mod swapchain;

pub use swapchain::VulkanSwapchain;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::error::FrameError;
use crate::stage::{AttachmentKind, PipelineBindPoint};
use crate::swapchain::{AcquiredImage, SwapchainDescriptor};
use crate::types::{ClearValue, Extent2d, ImageDescriptor};

use self::conversion::{
    convert_clear_values, convert_image_usage, convert_sample_count, convert_texture_format,
};

use super::{
    FramebufferAttachment, FramebufferDescriptor, GpuCommandBuffer, GpuFence, GpuFramebuffer,
    GpuImage, GpuPipelineCache, GpuRenderpass, GpuSemaphore, GpuSwapchain, RenderBackend,
    RenderpassDescriptor,
};

/// Vulkan implementation of the render backend.
pub struct VulkanBackend {
    entry: ash::Entry,
    instance: ash::Instance,
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    graphics_queue: vk::Queue,
    graphics_queue_family: u32,
    surface: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
    swapchain_loader: ash::khr::swapchain::Device,
    allocator: Arc<Mutex<Allocator>>,
    command_pool: vk::CommandPool,
}

impl VulkanBackend {
    /// Initialize Vulkan against the given window.
    ///
    /// Loads the Vulkan library, creates an instance with the surface
    /// extensions the windowing system needs, picks a GPU that can present
    /// to the surface, and sets up the allocator and command pool.
    pub fn new(
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
    ) -> Result<Self, FrameError> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| {
            FrameError::InitializationFailed(format!("failed to load Vulkan library: {}", e))
        })?;

        let instance::InstanceBundle {
            instance,
            debug_utils,
        } = instance::create_instance(&entry, display_handle, cfg!(debug_assertions))?;

        let surface = unsafe {
            ash_window::create_surface(&entry, &instance, display_handle, window_handle, None)
        }
        .map_err(|e| {
            FrameError::InitializationFailed(format!("failed to create surface: {:?}", e))
        })?;
        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

        let (physical_device, graphics_queue_family) =
            device::select_physical_device(&instance, &surface_loader, surface)?;

        let (device, graphics_queue) =
            device::create_logical_device(&instance, physical_device, graphics_queue_family)?;

        let swapchain_loader = ash::khr::swapchain::Device::new(&instance, &device);

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| {
            FrameError::InitializationFailed(format!("failed to create allocator: {}", e))
        })?;
        let allocator = Arc::new(Mutex::new(allocator));

        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(graphics_queue_family);

        let command_pool = unsafe { device.create_command_pool(&pool_info, None) }.map_err(
            |e| {
                FrameError::InitializationFailed(format!("failed to create command pool: {:?}", e))
            },
        )?;

        log::info!("Vulkan backend initialized");

        Ok(Self {
            entry,
            instance,
            debug_utils,
            physical_device,
            device,
            graphics_queue,
            graphics_queue_family,
            surface,
            surface_loader,
            swapchain_loader,
            allocator,
            command_pool,
        })
    }

    /// Get the Vulkan entry.
    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    /// Get the Vulkan instance.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the physical device.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get the logical device.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the graphics queue.
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Get the graphics queue family index.
    pub fn graphics_queue_family(&self) -> u32 {
        self.graphics_queue_family
    }

    /// Get the window surface.
    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Get the surface loader.
    pub fn surface_loader(&self) -> &ash::khr::surface::Instance {
        &self.surface_loader
    }

    /// Get the swapchain loader.
    pub fn swapchain_loader(&self) -> &ash::khr::swapchain::Device {
        &self.swapchain_loader
    }

    /// Get the command pool.
    pub fn command_pool(&self) -> vk::CommandPool {
        self.command_pool
    }

    /// Get the device memory allocator.
    pub fn allocator(&self) -> &Arc<Mutex<Allocator>> {
        &self.allocator
    }

    /// Query surface capabilities.
    pub fn surface_capabilities(&self) -> Result<vk::SurfaceCapabilitiesKHR, FrameError> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.physical_device, self.surface)
        }
        .map_err(|e| {
            FrameError::ResourceCreationFailed(format!(
                "failed to get surface capabilities: {:?}",
                e
            ))
        })
    }

    /// Query supported surface formats.
    pub fn surface_formats(&self) -> Result<Vec<vk::SurfaceFormatKHR>, FrameError> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(self.physical_device, self.surface)
        }
        .map_err(|e| {
            FrameError::ResourceCreationFailed(format!("failed to get surface formats: {:?}", e))
        })
    }

    /// Query supported present modes.
    pub fn surface_present_modes(&self) -> Result<Vec<vk::PresentModeKHR>, FrameError> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(self.physical_device, self.surface)
        }
        .map_err(|e| {
            FrameError::ResourceCreationFailed(format!("failed to get present modes: {:?}", e))
        })
    }

    /// Record and fence-wait a one-shot copy of a presentable image into a
    /// host-visible staging buffer. Restores the image to its present layout.
    fn copy_image_to_staging(
        &self,
        image: vk::Image,
        extent: vk::Extent2D,
        staging_buffer: vk::Buffer,
    ) -> Result<(), FrameError> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let command_buffers = unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .map_err(|e| {
                FrameError::Internal(format!("failed to allocate command buffer: {:?}", e))
            })?;
        let cmd = command_buffers[0];

        let record = (|| -> Result<(), FrameError> {
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            unsafe { self.device.begin_command_buffer(cmd, &begin_info) }.map_err(|e| {
                FrameError::Internal(format!("failed to begin command buffer: {:?}", e))
            })?;

            let subresource_range = vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            };

            let to_transfer = vk::ImageMemoryBarrier::default()
                .old_layout(vk::ImageLayout::PRESENT_SRC_KHR)
                .new_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(subresource_range)
                .src_access_mask(vk::AccessFlags::MEMORY_READ)
                .dst_access_mask(vk::AccessFlags::TRANSFER_READ);

            unsafe {
                self.device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[to_transfer],
                );
            }

            let region = vk::BufferImageCopy::default()
                .buffer_offset(0)
                .buffer_row_length(0) // 0 means tightly packed
                .buffer_image_height(0)
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
                .image_extent(vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                });

            unsafe {
                self.device.cmd_copy_image_to_buffer(
                    cmd,
                    image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    staging_buffer,
                    &[region],
                );
            }

            let to_present = vk::ImageMemoryBarrier::default()
                .old_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(subresource_range)
                .src_access_mask(vk::AccessFlags::TRANSFER_READ)
                .dst_access_mask(vk::AccessFlags::MEMORY_READ);

            unsafe {
                self.device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[to_present],
                );
            }

            unsafe { self.device.end_command_buffer(cmd) }.map_err(|e| {
                FrameError::Internal(format!("failed to end command buffer: {:?}", e))
            })?;

            Ok(())
        })();

        if let Err(e) = record {
            unsafe {
                self.device
                    .free_command_buffers(self.command_pool, &command_buffers);
            }
            return Err(e);
        }

        let fence_info = vk::FenceCreateInfo::default();
        let fence = match unsafe { self.device.create_fence(&fence_info, None) } {
            Ok(fence) => fence,
            Err(e) => {
                unsafe {
                    self.device
                        .free_command_buffers(self.command_pool, &command_buffers);
                }
                return Err(FrameError::Internal(format!(
                    "failed to create readback fence: {:?}",
                    e
                )));
            }
        };

        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
        let submit_result =
            unsafe { self.device.queue_submit(self.graphics_queue, &[submit_info], fence) };

        let wait_result = match submit_result {
            Ok(()) => unsafe { self.device.wait_for_fences(&[fence], true, u64::MAX) },
            Err(e) => Err(e),
        };

        unsafe {
            self.device.destroy_fence(fence, None);
            self.device
                .free_command_buffers(self.command_pool, &command_buffers);
        }

        wait_result
            .map_err(|e| FrameError::Internal(format!("failed to complete readback: {:?}", e)))
    }

    fn free_staging(&self, buffer: vk::Buffer, allocation: Allocation) {
        {
            let mut allocator = self.allocator.lock();
            if let Err(e) = allocator.free(allocation) {
                log::warn!("failed to free readback allocation: {}", e);
            }
        }
        unsafe { self.device.destroy_buffer(buffer, None) };
    }
}

impl RenderBackend for VulkanBackend {
    fn name(&self) -> &str {
        "vulkan"
    }

    fn create_image(&self, descriptor: &ImageDescriptor) -> Result<GpuImage, FrameError> {
        let format = convert_texture_format(descriptor.format);
        let usage = convert_image_usage(descriptor.usage);

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: descriptor.width,
                height: descriptor.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(convert_sample_count(descriptor.sample_count))
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { self.device.create_image(&image_info, None) }.map_err(|e| {
            FrameError::ResourceCreationFailed(format!("failed to create image: {:?}", e))
        })?;

        let mem_requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let allocation = {
            let mut allocator = self.allocator.lock();
            allocator
                .allocate(&AllocationCreateDesc {
                    name: descriptor.label.as_deref().unwrap_or("attachment"),
                    requirements: mem_requirements,
                    location: MemoryLocation::GpuOnly,
                    linear: false,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(|e| {
                    FrameError::ResourceCreationFailed(format!(
                        "failed to allocate image memory: {}",
                        e
                    ))
                })?
        };

        unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        }
        .map_err(|e| {
            FrameError::ResourceCreationFailed(format!("failed to bind image memory: {:?}", e))
        })?;

        let aspect_mask = if descriptor.format.is_depth_stencil() {
            if descriptor.format.has_stencil() {
                vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
            } else {
                vk::ImageAspectFlags::DEPTH
            }
        } else {
            vk::ImageAspectFlags::COLOR
        };

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping::default())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = unsafe { self.device.create_image_view(&view_info, None) }.map_err(|e| {
            FrameError::ResourceCreationFailed(format!("failed to create image view: {:?}", e))
        })?;

        Ok(GpuImage::Vulkan {
            device: self.device.clone(),
            allocator: Arc::clone(&self.allocator),
            image,
            view,
            allocation: Mutex::new(Some(allocation)),
        })
    }

    fn create_renderpass(
        &self,
        descriptor: &RenderpassDescriptor<'_>,
    ) -> Result<GpuRenderpass, FrameError> {
        // Attachment descriptions in declaration order; that order is the
        // contract framebuffers and clear values follow.
        let mut attachment_descs = Vec::with_capacity(descriptor.attachments.len());
        let mut binding_to_index = HashMap::new();

        for (index, attachment) in descriptor.attachments.iter().enumerate() {
            binding_to_index.insert(attachment.binding, index as u32);

            let format = match attachment.kind {
                AttachmentKind::Presentable => convert_texture_format(descriptor.surface_format),
                _ => convert_texture_format(attachment.format),
            };
            let samples = if attachment.multisampled
                && attachment.kind != AttachmentKind::Presentable
            {
                convert_sample_count(descriptor.sample_count)
            } else {
                vk::SampleCountFlags::TYPE_1
            };
            let final_layout = match attachment.kind {
                AttachmentKind::Color => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                AttachmentKind::Depth => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                AttachmentKind::Presentable => vk::ImageLayout::PRESENT_SRC_KHR,
            };
            let (stencil_load, stencil_store) = if attachment.format.has_stencil()
                && attachment.kind == AttachmentKind::Depth
            {
                (vk::AttachmentLoadOp::CLEAR, vk::AttachmentStoreOp::STORE)
            } else {
                (
                    vk::AttachmentLoadOp::DONT_CARE,
                    vk::AttachmentStoreOp::DONT_CARE,
                )
            };

            attachment_descs.push(
                vk::AttachmentDescription::default()
                    .format(format)
                    .samples(samples)
                    .load_op(vk::AttachmentLoadOp::CLEAR)
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .stencil_load_op(stencil_load)
                    .stencil_store_op(stencil_store)
                    .initial_layout(vk::ImageLayout::UNDEFINED)
                    .final_layout(final_layout),
            );
        }

        struct SubpassRefs {
            color: Vec<vk::AttachmentReference>,
            depth: Option<vk::AttachmentReference>,
            bind_point: vk::PipelineBindPoint,
        }

        // Validation pins subpass bindings to declaration positions, so
        // declaration order is execution order.
        let mut subpass_refs = Vec::with_capacity(descriptor.subpasses.len());
        for subpass in &descriptor.subpasses {
            let mut refs = SubpassRefs {
                color: Vec::new(),
                depth: None,
                bind_point: match subpass.bind_point {
                    PipelineBindPoint::Graphics => vk::PipelineBindPoint::GRAPHICS,
                    PipelineBindPoint::Compute => vk::PipelineBindPoint::COMPUTE,
                },
            };
            for &binding in &subpass.attachment_bindings {
                let index = *binding_to_index.get(&binding).ok_or_else(|| {
                    FrameError::ResourceCreationFailed(format!(
                        "subpass references unknown attachment binding {}",
                        binding
                    ))
                })?;
                match descriptor.attachments[index as usize].kind {
                    AttachmentKind::Depth => {
                        refs.depth = Some(vk::AttachmentReference {
                            attachment: index,
                            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                        });
                    }
                    _ => {
                        refs.color.push(vk::AttachmentReference {
                            attachment: index,
                            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                        });
                    }
                }
            }
            subpass_refs.push(refs);
        }

        let mut subpass_descs = Vec::with_capacity(subpass_refs.len());
        for refs in &subpass_refs {
            let mut desc = vk::SubpassDescription::default()
                .pipeline_bind_point(refs.bind_point)
                .color_attachments(&refs.color);
            if let Some(depth) = &refs.depth {
                desc = desc.depth_stencil_attachment(depth);
            }
            subpass_descs.push(desc);
        }

        let mut dependencies = vec![vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            )
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            )
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            )];

        // Later subpasses consume earlier color output
        for i in 1..subpass_descs.len() as u32 {
            dependencies.push(
                vk::SubpassDependency::default()
                    .src_subpass(i - 1)
                    .dst_subpass(i)
                    .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                    .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
                    .dst_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER)
                    .dst_access_mask(vk::AccessFlags::SHADER_READ)
                    .dependency_flags(vk::DependencyFlags::BY_REGION),
            );
        }

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachment_descs)
            .subpasses(&subpass_descs)
            .dependencies(&dependencies);

        let renderpass = unsafe { self.device.create_render_pass(&create_info, None) }.map_err(
            |e| {
                FrameError::ResourceCreationFailed(format!("failed to create renderpass: {:?}", e))
            },
        )?;

        log::debug!(
            "Created renderpass '{}' with {} attachments and {} subpasses",
            descriptor.label,
            attachment_descs.len(),
            subpass_descs.len()
        );

        Ok(GpuRenderpass::Vulkan {
            device: self.device.clone(),
            renderpass,
        })
    }

    fn create_framebuffer(
        &self,
        descriptor: &FramebufferDescriptor<'_>,
    ) -> Result<GpuFramebuffer, FrameError> {
        let GpuRenderpass::Vulkan { renderpass, .. } = descriptor.renderpass else {
            return Err(FrameError::ResourceCreationFailed(
                "framebuffer requires a vulkan renderpass".to_string(),
            ));
        };

        let mut views = Vec::with_capacity(descriptor.attachments.len());
        for attachment in &descriptor.attachments {
            let view = match attachment {
                FramebufferAttachment::Image(image) => {
                    let GpuImage::Vulkan { view, .. } = image else {
                        return Err(FrameError::ResourceCreationFailed(
                            "framebuffer attachment is not a vulkan image".to_string(),
                        ));
                    };
                    *view
                }
                FramebufferAttachment::SwapchainImage { swapchain, index } => {
                    let GpuSwapchain::Vulkan(chain) = swapchain else {
                        return Err(FrameError::ResourceCreationFailed(
                            "framebuffer attachment is not a vulkan swapchain".to_string(),
                        ));
                    };
                    chain
                        .image_views
                        .get(*index as usize)
                        .copied()
                        .ok_or_else(|| {
                            FrameError::ResourceCreationFailed(format!(
                                "swapchain image index {} out of range",
                                index
                            ))
                        })?
                }
            };
            views.push(view);
        }

        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(*renderpass)
            .attachments(&views)
            .width(descriptor.width)
            .height(descriptor.height)
            .layers(1);

        let framebuffer = unsafe { self.device.create_framebuffer(&create_info, None) }.map_err(
            |e| {
                FrameError::ResourceCreationFailed(format!("failed to create framebuffer: {:?}", e))
            },
        )?;

        Ok(GpuFramebuffer::Vulkan {
            device: self.device.clone(),
            framebuffer,
        })
    }

    fn create_swapchain(
        &self,
        descriptor: &SwapchainDescriptor,
        old: Option<&GpuSwapchain>,
    ) -> Result<GpuSwapchain, FrameError> {
        let old_handle = match old {
            Some(GpuSwapchain::Vulkan(chain)) => chain.swapchain,
            _ => vk::SwapchainKHR::null(),
        };

        let chain = VulkanSwapchain::new(self, descriptor, old_handle)?;
        Ok(GpuSwapchain::Vulkan(chain))
    }

    fn create_fence(&self, signaled: bool) -> Result<GpuFence, FrameError> {
        let mut fence_info = vk::FenceCreateInfo::default();
        if signaled {
            fence_info = fence_info.flags(vk::FenceCreateFlags::SIGNALED);
        }

        let fence = unsafe { self.device.create_fence(&fence_info, None) }.map_err(|e| {
            FrameError::ResourceCreationFailed(format!("failed to create fence: {:?}", e))
        })?;

        Ok(GpuFence::Vulkan {
            device: self.device.clone(),
            fence,
        })
    }

    fn create_semaphore(&self) -> Result<GpuSemaphore, FrameError> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();

        let semaphore = unsafe { self.device.create_semaphore(&semaphore_info, None) }.map_err(
            |e| {
                FrameError::ResourceCreationFailed(format!("failed to create semaphore: {:?}", e))
            },
        )?;

        Ok(GpuSemaphore::Vulkan {
            device: self.device.clone(),
            semaphore,
        })
    }

    fn create_command_buffer(&self) -> Result<GpuCommandBuffer, FrameError> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let command_buffers = unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .map_err(|e| {
                FrameError::ResourceCreationFailed(format!(
                    "failed to allocate command buffer: {:?}",
                    e
                ))
            })?;

        Ok(GpuCommandBuffer::Vulkan {
            device: self.device.clone(),
            command_buffer: command_buffers[0],
        })
    }

    fn create_pipeline_cache(&self) -> Result<GpuPipelineCache, FrameError> {
        let create_info = vk::PipelineCacheCreateInfo::default();

        let cache = unsafe { self.device.create_pipeline_cache(&create_info, None) }.map_err(
            |e| {
                FrameError::ResourceCreationFailed(format!(
                    "failed to create pipeline cache: {:?}",
                    e
                ))
            },
        )?;

        Ok(GpuPipelineCache::Vulkan {
            device: self.device.clone(),
            cache,
        })
    }

    fn wait_fence_timeout(&self, fence: &GpuFence, timeout: Duration) -> bool {
        let GpuFence::Vulkan { fence, .. } = fence else {
            log::error!("foreign fence handle passed to vulkan backend");
            return false;
        };

        let timeout_ns = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        match unsafe { self.device.wait_for_fences(&[*fence], true, timeout_ns) } {
            Ok(()) => true,
            Err(vk::Result::TIMEOUT) => false,
            Err(e) => {
                log::error!("Fence wait failed: {:?}", e);
                false
            }
        }
    }

    fn reset_fence(&self, fence: &GpuFence) {
        let GpuFence::Vulkan { fence, .. } = fence else {
            log::error!("foreign fence handle passed to vulkan backend");
            return;
        };

        if let Err(e) = unsafe { self.device.reset_fences(&[*fence]) } {
            log::error!("failed to reset fence: {:?}", e);
        }
    }

    fn acquire_next_image(
        &self,
        swapchain: &GpuSwapchain,
        timeout: Duration,
        signal: &GpuSemaphore,
    ) -> Result<AcquiredImage, FrameError> {
        let GpuSwapchain::Vulkan(chain) = swapchain else {
            return Err(FrameError::Internal("foreign swapchain handle".to_string()));
        };
        let GpuSemaphore::Vulkan { semaphore, .. } = signal else {
            return Err(FrameError::Internal("foreign semaphore handle".to_string()));
        };

        let timeout_ns = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);

        match unsafe {
            self.swapchain_loader.acquire_next_image(
                chain.swapchain,
                timeout_ns,
                *semaphore,
                vk::Fence::null(),
            )
        } {
            Ok((index, suboptimal)) => {
                // A suboptimal acquire still delivers a usable image and has
                // signaled the semaphore; render the frame and let present
                // report the staleness.
                if suboptimal {
                    log::debug!("Acquired suboptimal swapchain image {}", index);
                }
                Ok(AcquiredImage {
                    index,
                    stale: false,
                })
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquiredImage {
                index: 0,
                stale: true,
            }),
            Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => Err(FrameError::DeviceLost(
                "swapchain image acquire timed out".to_string(),
            )),
            Err(vk::Result::ERROR_DEVICE_LOST) => Err(FrameError::DeviceLost(
                "device lost during swapchain acquire".to_string(),
            )),
            Err(e) => Err(FrameError::Internal(format!(
                "failed to acquire swapchain image: {:?}",
                e
            ))),
        }
    }

    fn present_image(
        &self,
        swapchain: &GpuSwapchain,
        image_index: u32,
        wait: &GpuSemaphore,
    ) -> Result<bool, FrameError> {
        let GpuSwapchain::Vulkan(chain) = swapchain else {
            return Err(FrameError::Internal("foreign swapchain handle".to_string()));
        };
        let GpuSemaphore::Vulkan { semaphore, .. } = wait else {
            return Err(FrameError::Internal("foreign semaphore handle".to_string()));
        };

        let wait_semaphores = [*semaphore];
        let swapchains = [chain.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe {
            self.swapchain_loader
                .queue_present(self.graphics_queue, &present_info)
        } {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(vk::Result::ERROR_DEVICE_LOST) => Err(FrameError::DeviceLost(
                "device lost during present".to_string(),
            )),
            Err(e) => Err(FrameError::Internal(format!(
                "failed to present swapchain image: {:?}",
                e
            ))),
        }
    }

    fn begin_commands(&self, command_buffer: &GpuCommandBuffer) -> Result<(), FrameError> {
        let GpuCommandBuffer::Vulkan { command_buffer, .. } = command_buffer else {
            return Err(FrameError::Internal(
                "foreign command buffer handle".to_string(),
            ));
        };

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        // Begin implicitly resets; the pool allows per-buffer reset
        unsafe { self.device.begin_command_buffer(*command_buffer, &begin_info) }
            .map_err(|e| FrameError::Internal(format!("failed to begin command buffer: {:?}", e)))
    }

    fn end_commands(&self, command_buffer: &GpuCommandBuffer) -> Result<(), FrameError> {
        let GpuCommandBuffer::Vulkan { command_buffer, .. } = command_buffer else {
            return Err(FrameError::Internal(
                "foreign command buffer handle".to_string(),
            ));
        };

        unsafe { self.device.end_command_buffer(*command_buffer) }
            .map_err(|e| FrameError::Internal(format!("failed to end command buffer: {:?}", e)))
    }

    fn begin_renderpass(
        &self,
        command_buffer: &GpuCommandBuffer,
        renderpass: &GpuRenderpass,
        framebuffer: &GpuFramebuffer,
        render_area: Extent2d,
        clear_values: &[ClearValue],
    ) {
        let (
            GpuCommandBuffer::Vulkan { command_buffer, .. },
            GpuRenderpass::Vulkan { renderpass, .. },
            GpuFramebuffer::Vulkan { framebuffer, .. },
        ) = (command_buffer, renderpass, framebuffer)
        else {
            log::error!("foreign handles passed to vulkan begin_renderpass");
            return;
        };

        let clear = convert_clear_values(clear_values);
        let extent = vk::Extent2D {
            width: render_area.width,
            height: render_area.height,
        };

        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(*renderpass)
            .framebuffer(*framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(&clear);

        unsafe {
            self.device.cmd_begin_render_pass(
                *command_buffer,
                &begin_info,
                vk::SubpassContents::INLINE,
            );
        }

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: render_area.width as f32,
            height: render_area.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };

        unsafe {
            self.device.cmd_set_viewport(*command_buffer, 0, &[viewport]);
            self.device.cmd_set_scissor(*command_buffer, 0, &[scissor]);
        }
    }

    fn next_subpass(&self, command_buffer: &GpuCommandBuffer) {
        let GpuCommandBuffer::Vulkan { command_buffer, .. } = command_buffer else {
            log::error!("foreign command buffer handle passed to vulkan backend");
            return;
        };

        unsafe {
            self.device
                .cmd_next_subpass(*command_buffer, vk::SubpassContents::INLINE);
        }
    }

    fn end_renderpass(&self, command_buffer: &GpuCommandBuffer) {
        let GpuCommandBuffer::Vulkan { command_buffer, .. } = command_buffer else {
            log::error!("foreign command buffer handle passed to vulkan backend");
            return;
        };

        unsafe {
            self.device.cmd_end_render_pass(*command_buffer);
        }
    }

    fn submit_commands(
        &self,
        command_buffer: &GpuCommandBuffer,
        wait: &GpuSemaphore,
        signal: &GpuSemaphore,
        fence: &GpuFence,
    ) -> Result<(), FrameError> {
        let GpuCommandBuffer::Vulkan { command_buffer, .. } = command_buffer else {
            return Err(FrameError::Internal(
                "foreign command buffer handle".to_string(),
            ));
        };
        let GpuSemaphore::Vulkan {
            semaphore: wait_semaphore,
            ..
        } = wait
        else {
            return Err(FrameError::Internal("foreign semaphore handle".to_string()));
        };
        let GpuSemaphore::Vulkan {
            semaphore: signal_semaphore,
            ..
        } = signal
        else {
            return Err(FrameError::Internal("foreign semaphore handle".to_string()));
        };
        let GpuFence::Vulkan { fence, .. } = fence else {
            return Err(FrameError::Internal("foreign fence handle".to_string()));
        };

        let command_buffers = [*command_buffer];
        let wait_semaphores = [*wait_semaphore];
        // The acquired image is only touched once color output starts
        let wait_stage_masks = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [*signal_semaphore];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stage_masks)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        match unsafe {
            self.device
                .queue_submit(self.graphics_queue, &[submit_info], *fence)
        } {
            Ok(()) => Ok(()),
            Err(vk::Result::ERROR_DEVICE_LOST) => Err(FrameError::DeviceLost(
                "device lost during submit".to_string(),
            )),
            Err(e) => Err(FrameError::Internal(format!(
                "failed to submit command buffer: {:?}",
                e
            ))),
        }
    }

    fn read_swapchain_image(
        &self,
        swapchain: &GpuSwapchain,
        image_index: u32,
    ) -> Result<Vec<u8>, FrameError> {
        let GpuSwapchain::Vulkan(chain) = swapchain else {
            return Err(FrameError::Internal("foreign swapchain handle".to_string()));
        };

        let image = chain
            .images
            .get(image_index as usize)
            .copied()
            .ok_or_else(|| {
                FrameError::Internal(format!(
                    "swapchain image index {} out of range",
                    image_index
                ))
            })?;
        let extent = chain.vk_extent();
        let size = u64::from(extent.width) * u64::from(extent.height) * 4;

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(vk::BufferUsageFlags::TRANSFER_DST)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let staging_buffer = unsafe { self.device.create_buffer(&buffer_info, None) }.map_err(
            |e| FrameError::Internal(format!("failed to create staging buffer: {:?}", e)),
        )?;

        let mem_requirements =
            unsafe { self.device.get_buffer_memory_requirements(staging_buffer) };

        let allocation_result = {
            let mut allocator = self.allocator.lock();
            allocator.allocate(&AllocationCreateDesc {
                name: "swapchain-readback",
                requirements: mem_requirements,
                location: MemoryLocation::GpuToCpu,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
        };
        let staging_allocation = match allocation_result {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(staging_buffer, None) };
                return Err(FrameError::Internal(format!(
                    "failed to allocate readback memory: {}",
                    e
                )));
            }
        };

        if let Err(e) = unsafe {
            self.device.bind_buffer_memory(
                staging_buffer,
                staging_allocation.memory(),
                staging_allocation.offset(),
            )
        } {
            self.free_staging(staging_buffer, staging_allocation);
            return Err(FrameError::Internal(format!(
                "failed to bind readback memory: {:?}",
                e
            )));
        }

        if let Err(e) = self.copy_image_to_staging(image, extent, staging_buffer) {
            self.free_staging(staging_buffer, staging_allocation);
            return Err(e);
        }

        let bytes = staging_allocation
            .mapped_slice()
            .and_then(|slice| slice.get(..size as usize))
            .map(|slice| slice.to_vec());
        self.free_staging(staging_buffer, staging_allocation);

        let mut bytes = bytes.ok_or_else(|| {
            FrameError::Internal("readback buffer is not host mapped".to_string())
        })?;

        // Swapchains are commonly BGRA; captures are RGBA
        if matches!(
            chain.vk_format,
            vk::Format::B8G8R8A8_UNORM | vk::Format::B8G8R8A8_SRGB
        ) {
            for pixel in bytes.chunks_exact_mut(4) {
                pixel.swap(0, 2);
            }
        }

        Ok(bytes)
    }

    fn wait_idle(&self) {
        if let Err(e) = unsafe { self.device.device_wait_idle() } {
            log::error!("Device wait idle failed: {:?}", e);
        }
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            // Wait for the device to go idle before cleanup
            let _ = self.device.device_wait_idle();

            self.device.destroy_command_pool(self.command_pool, None);

            self.device.destroy_device(None);

            self.surface_loader.destroy_surface(self.surface, None);

            if let Some((debug_utils, messenger)) = &self.debug_utils {
                debug_utils.destroy_debug_utils_messenger(*messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}
