//! GPU Backend
//!
//! An optional hardware path reached by loading the host graphics
//! driver library through its conventional name. Loading failure is
//! silent: the caller keeps its software path.
//!
//! The backend walks a small state machine:
//!
//! ```text
//! Uninitialised -> InstanceCreated -> DeviceReady -> RenderTargetReady
//!                                                          |
//!                                                       ShutDown
//! ```
//!
//! A failed transition releases everything the prior state allocated
//! and parks the machine in `ShutDown`. Command submission is
//! synchronous from the caller's perspective: submit, wait for the
//! queue to idle, copy the pixels back through a host-visible staging
//! buffer, return.

use ash::vk;
use crate::status::HostError;

/// Where the backend is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BackendState {
    Uninitialised,
    InstanceCreated,
    DeviceReady,
    RenderTargetReady,
    ShutDown,
}

/// An offscreen render target plus its readback staging buffer.
struct GpuTarget {
    width: u32,
    height: u32,
    image: vk::Image,
    image_memory: vk::DeviceMemory,
    staging: vk::Buffer,
    staging_memory: vk::DeviceMemory,
    byte_len: usize,
}

/// The loaded driver and whatever the current state owns.
pub struct GpuBackend {
    state: BackendState,
    entry: ash::Entry,
    instance: Option<ash::Instance>,
    physical: vk::PhysicalDevice,
    device: Option<ash::Device>,
    queue: vk::Queue,
    queue_family: u32,
    pool: vk::CommandPool,
    target: Option<GpuTarget>,
}

impl GpuBackend {
    /// Load the driver library. `None` leaves the caller on the
    /// software path.
    pub fn try_new() -> Option<Self> {
        let entry = unsafe { ash::Entry::load() }.ok()?;
        log::info!("[GPU] driver library loaded");
        Some(Self {
            state: BackendState::Uninitialised,
            entry,
            instance: None,
            physical: vk::PhysicalDevice::null(),
            device: None,
            queue: vk::Queue::null(),
            queue_family: 0,
            pool: vk::CommandPool::null(),
            target: None,
        })
    }

    /// Clear an offscreen target on the GPU and read the pixels back as
    /// tightly packed RGBA8.
    pub fn clear_and_read_back(
        &mut self,
        width: u32,
        height: u32,
        color: [f32; 4],
    ) -> Result<Vec<u8>, HostError> {
        self.ensure_target(width, height).inspect_err(|_| self.shutdown())?;
        match self.submit_clear(color) {
            Ok(pixels) => Ok(pixels),
            Err(e) => {
                self.shutdown();
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------
    // State transitions
    // ------------------------------------------------------------------

    fn ensure_instance(&mut self) -> Result<(), HostError> {
        if self.state != BackendState::Uninitialised {
            return Ok(());
        }
        let app_info = vk::ApplicationInfo::default()
            .application_name(c"winhost")
            .api_version(vk::make_api_version(0, 1, 0, 0));
        let create_info = vk::InstanceCreateInfo::default().application_info(&app_info);
        let instance = unsafe { self.entry.create_instance(&create_info, None) }
            .map_err(|e| HostError::Unsupported(format!("instance creation: {e}")))?;
        self.instance = Some(instance);
        self.state = BackendState::InstanceCreated;
        Ok(())
    }

    fn ensure_device(&mut self) -> Result<(), HostError> {
        self.ensure_instance()?;
        if self.state != BackendState::InstanceCreated {
            return Ok(());
        }
        let instance = self.instance.as_ref().expect("instance created");
        let physicals = unsafe { instance.enumerate_physical_devices() }
            .map_err(|e| HostError::Unsupported(format!("device enumeration: {e}")))?;
        let mut chosen = None;
        for physical in physicals {
            let families =
                unsafe { instance.get_physical_device_queue_family_properties(physical) };
            if let Some(index) = families
                .iter()
                .position(|f| f.queue_flags.contains(vk::QueueFlags::GRAPHICS))
            {
                chosen = Some((physical, index as u32));
                break;
            }
        }
        let (physical, queue_family) = chosen
            .ok_or_else(|| HostError::Unsupported("no graphics queue family".into()))?;

        let priorities = [1.0f32];
        let queue_info = vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family)
            .queue_priorities(&priorities);
        let device_info =
            vk::DeviceCreateInfo::default().queue_create_infos(std::slice::from_ref(&queue_info));
        let device = unsafe { instance.create_device(physical, &device_info, None) }
            .map_err(|e| HostError::Unsupported(format!("device creation: {e}")))?;
        let queue = unsafe { device.get_device_queue(queue_family, 0) };

        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family);
        let pool = match unsafe { device.create_command_pool(&pool_info, None) } {
            Ok(p) => p,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(HostError::Unsupported(format!("command pool: {e}")));
            }
        };

        self.physical = physical;
        self.device = Some(device);
        self.queue = queue;
        self.queue_family = queue_family;
        self.pool = pool;
        self.state = BackendState::DeviceReady;
        log::info!("[GPU] device ready (queue family {queue_family})");
        Ok(())
    }

    fn ensure_target(&mut self, width: u32, height: u32) -> Result<(), HostError> {
        if self.state == BackendState::ShutDown {
            return Err(HostError::StateInvalid("backend shut down".into()));
        }
        self.ensure_device()?;
        if let Some(target) = &self.target {
            if target.width == width && target.height == height {
                return Ok(());
            }
            self.release_target();
        }
        let device = self.device.as_ref().expect("device ready");
        let instance = self.instance.as_ref().expect("instance created");
        let memory_props =
            unsafe { instance.get_physical_device_memory_properties(self.physical) };
        let byte_len = width as usize * height as usize * 4;

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(vk::Format::R8G8B8A8_UNORM)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::TRANSFER_SRC)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { device.create_image(&image_info, None) }
            .map_err(|e| HostError::ResourceExhausted(format!("image: {e}")))?;

        let image_req = unsafe { device.get_image_memory_requirements(image) };
        let image_memory = match allocate(
            device,
            &memory_props,
            image_req,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ) {
            Ok(m) => m,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e);
            }
        };
        if let Err(e) = unsafe { device.bind_image_memory(image, image_memory, 0) } {
            unsafe {
                device.destroy_image(image, None);
                device.free_memory(image_memory, None);
            }
            return Err(HostError::ResourceExhausted(format!("image bind: {e}")));
        }

        let staging_info = vk::BufferCreateInfo::default()
            .size(byte_len as u64)
            .usage(vk::BufferUsageFlags::TRANSFER_DST)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let staging = match unsafe { device.create_buffer(&staging_info, None) } {
            Ok(b) => b,
            Err(e) => {
                unsafe {
                    device.destroy_image(image, None);
                    device.free_memory(image_memory, None);
                }
                return Err(HostError::ResourceExhausted(format!("staging: {e}")));
            }
        };
        let staging_req = unsafe { device.get_buffer_memory_requirements(staging) };
        let staging_memory = match allocate(
            device,
            &memory_props,
            staging_req,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ) {
            Ok(m) => m,
            Err(e) => {
                unsafe {
                    device.destroy_buffer(staging, None);
                    device.destroy_image(image, None);
                    device.free_memory(image_memory, None);
                }
                return Err(e);
            }
        };
        if let Err(e) = unsafe { device.bind_buffer_memory(staging, staging_memory, 0) } {
            unsafe {
                device.destroy_buffer(staging, None);
                device.free_memory(staging_memory, None);
                device.destroy_image(image, None);
                device.free_memory(image_memory, None);
            }
            return Err(HostError::ResourceExhausted(format!("staging bind: {e}")));
        }

        self.target = Some(GpuTarget {
            width,
            height,
            image,
            image_memory,
            staging,
            staging_memory,
            byte_len,
        });
        self.state = BackendState::RenderTargetReady;
        log::debug!("[GPU] render target ready ({width}x{height})");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------

    fn submit_clear(&mut self, color: [f32; 4]) -> Result<Vec<u8>, HostError> {
        let device = self.device.as_ref().expect("device ready");
        let target = self.target.as_ref().expect("target ready");

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { device.allocate_command_buffers(&alloc_info) }
            .map_err(|e| HostError::ResourceExhausted(format!("command buffer: {e}")))?;
        let cb = buffers[0];

        let range = vk::ImageSubresourceRange::default()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .base_mip_level(0)
            .level_count(1)
            .base_array_layer(0)
            .layer_count(1);

        let result = (|| -> Result<(), vk::Result> {
            unsafe {
                device.begin_command_buffer(
                    cb,
                    &vk::CommandBufferBeginInfo::default()
                        .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
                )?;

                let to_dst = vk::ImageMemoryBarrier::default()
                    .old_layout(vk::ImageLayout::UNDEFINED)
                    .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(target.image)
                    .subresource_range(range)
                    .src_access_mask(vk::AccessFlags::empty())
                    .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE);
                device.cmd_pipeline_barrier(
                    cb,
                    vk::PipelineStageFlags::TOP_OF_PIPE,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[to_dst],
                );

                device.cmd_clear_color_image(
                    cb,
                    target.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &vk::ClearColorValue { float32: color },
                    &[range],
                );

                let to_src = vk::ImageMemoryBarrier::default()
                    .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .new_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(target.image)
                    .subresource_range(range)
                    .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                    .dst_access_mask(vk::AccessFlags::TRANSFER_READ);
                device.cmd_pipeline_barrier(
                    cb,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[to_src],
                );

                let copy = vk::BufferImageCopy::default()
                    .buffer_offset(0)
                    .image_subresource(
                        vk::ImageSubresourceLayers::default()
                            .aspect_mask(vk::ImageAspectFlags::COLOR)
                            .mip_level(0)
                            .base_array_layer(0)
                            .layer_count(1),
                    )
                    .image_extent(vk::Extent3D {
                        width: target.width,
                        height: target.height,
                        depth: 1,
                    });
                device.cmd_copy_image_to_buffer(
                    cb,
                    target.image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    target.staging,
                    &[copy],
                );

                device.end_command_buffer(cb)?;

                // Synchronous from the caller's perspective: submit and
                // wait for the queue to go idle before reading back.
                let cbs = [cb];
                let submit = vk::SubmitInfo::default().command_buffers(&cbs);
                device.queue_submit(self.queue, &[submit], vk::Fence::null())?;
                device.queue_wait_idle(self.queue)?;
            }
            Ok(())
        })();

        let pixels = match result {
            Ok(()) => unsafe {
                let mapped = device
                    .map_memory(
                        target.staging_memory,
                        0,
                        target.byte_len as u64,
                        vk::MemoryMapFlags::empty(),
                    )
                    .map_err(|e| HostError::IoFailed(format!("staging map: {e}")))?;
                let bytes =
                    std::slice::from_raw_parts(mapped as *const u8, target.byte_len).to_vec();
                device.unmap_memory(target.staging_memory);
                Ok(bytes)
            },
            Err(e) => Err(HostError::IoFailed(format!("submission: {e}"))),
        };

        unsafe {
            device.free_command_buffers(self.pool, &buffers);
        }
        pixels
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    fn release_target(&mut self) {
        if let (Some(device), Some(target)) = (self.device.as_ref(), self.target.take()) {
            unsafe {
                device.destroy_buffer(target.staging, None);
                device.free_memory(target.staging_memory, None);
                device.destroy_image(target.image, None);
                device.free_memory(target.image_memory, None);
            }
        }
        if self.state == BackendState::RenderTargetReady {
            self.state = BackendState::DeviceReady;
        }
    }

    /// Release everything in reverse acquisition order and park the
    /// machine.
    fn shutdown(&mut self) {
        self.release_target();
        if let Some(device) = self.device.take() {
            unsafe {
                device.device_wait_idle().ok();
                if self.pool != vk::CommandPool::null() {
                    device.destroy_command_pool(self.pool, None);
                }
                device.destroy_device(None);
            }
        }
        if let Some(instance) = self.instance.take() {
            unsafe {
                instance.destroy_instance(None);
            }
        }
        self.state = BackendState::ShutDown;
        log::debug!("[GPU] backend shut down");
    }
}

impl Drop for GpuBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn allocate(
    device: &ash::Device,
    props: &vk::PhysicalDeviceMemoryProperties,
    requirements: vk::MemoryRequirements,
    flags: vk::MemoryPropertyFlags,
) -> Result<vk::DeviceMemory, HostError> {
    let index = (0..props.memory_type_count)
        .find(|&i| {
            requirements.memory_type_bits & (1 << i) != 0
                && props.memory_types[i as usize]
                    .property_flags
                    .contains(flags)
        })
        .ok_or_else(|| HostError::Unsupported("no suitable memory type".into()))?;
    let info = vk::MemoryAllocateInfo::default()
        .allocation_size(requirements.size)
        .memory_type_index(index);
    unsafe { device.allocate_memory(&info, None) }
        .map_err(|e| HostError::ResourceExhausted(format!("memory: {e}")))
}
