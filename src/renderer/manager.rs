//! 纹理与缓冲区管理
//!
//! [`ResourceManager`] 是渲染器状态上的一个借用视图，可以从
//! [`Renderer::resources`](super::Renderer::resources) 或帧内的
//! [`Frame::resources`](super::Frame::resources) 取得，所以纹理在帧中间同样可以写入。
//!
//! 所有上传和复制都在复制队列上执行。提交之前复制队列在 GPU 侧等待直接队列上
//! 已经提交的帧，复制不会改写仍在飞行中的帧正在读取的资源；提交之后直接队列
//! 在 GPU 侧等待复制队列的栅栏，之后录制的帧命令一定能看到复制的结果。纹理始终处于 COMMON 状态，
//! 复制和采样都依靠隐式状态提升，不需要显式屏障。

use tracing::{debug, trace, warn};

use crate::core::error::{GraphicsError, Result};
use crate::gfx::{
    DescriptorType, GpuBackend, GpuCommand, HeapKind, PlacedFootprint, QueueKind, RawFence, RawObject, RawResource,
    TextureDesc, TextureDimension, TextureFormat, TextureUsage,
};
use super::command::CommandRecorder;
use super::descriptor::{DescriptorHeap, DescriptorHeapStats, SrvAllocator};
use super::resource::{Buffer, DeferredReleases, GpuResource, ReleaseQueue, ResourceLayout, Retired, Staging, Texture};
use super::sync::{FenceValue, QueueTimeline};

/// 纹理数据的行距对齐（D3D12_TEXTURE_DATA_PITCH_ALIGNMENT）
pub const TEXTURE_PITCH_ALIGNMENT: u32 = 256;

/// 暂存缓冲区的最小尺寸
const MIN_STAGING_SIZE: u64 = 64 * 1024;

/// 按设备要求对齐行距
pub fn aligned_row_pitch(width: u32, format: TextureFormat) -> u32 {
    (width * format.bytes_per_pixel()).next_multiple_of(TEXTURE_PITCH_ALIGNMENT)
}

/// 纹理写入区域
///
/// 坐标和尺寸都以 mip 0 的像素为单位。`layer` 对 2D 数组选择数组层，
/// 对 3D 纹理选择深度切片，普通 2D 纹理必须为 0。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureRegion {
    pub x: u32,
    pub y: u32,
    pub layer: u32,
    pub width: u32,
    pub height: u32,
}

impl TextureRegion {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, layer: 0, width, height }
    }

    pub fn on_layer(mut self, layer: u32) -> Self {
        self.layer = layer;
        self
    }
}

/// 复制队列
pub(crate) struct CopyQueue {
    recorder: CommandRecorder,
    timeline: QueueTimeline,
    submissions: u64,
}

impl CopyQueue {
    fn new(backend: &mut dyn GpuBackend) -> Result<Self> {
        Ok(Self {
            recorder: CommandRecorder::new(backend, QueueKind::Copy, "EG-Overlay Copy")?,
            timeline: QueueTimeline::new(backend, QueueKind::Copy)?,
            submissions: 0,
        })
    }

    pub fn timeline(&self) -> &QueueTimeline {
        &self.timeline
    }

    /// 复制队列只有一个分配器，重新录制前等待上一次提交完成
    fn begin(&mut self, backend: &mut dyn GpuBackend) -> Result<()> {
        self.timeline.flush(backend)?;
        self.recorder.begin(backend)
    }

    fn submit(&mut self, backend: &mut dyn GpuBackend) -> Result<FenceValue> {
        self.recorder.submit(backend)?;
        self.submissions += 1;
        self.timeline.signal(backend)
    }

    fn release(&self, backend: &mut dyn GpuBackend) {
        self.recorder.release(backend);
        self.timeline.release(backend);
    }
}

/// 资源管理器持有的渲染器状态
pub(crate) struct Resources {
    srv_heap: DescriptorHeap,
    srv_slots: SrvAllocator,
    pub copy: CopyQueue,
    pub release: ReleaseQueue,
    pub deferred: DeferredReleases,
    video_memory: u64,
    /// 直接队列的栅栏和最近一次 signal 的值
    direct_fence: RawFence,
    direct_signaled: FenceValue,
    /// 直接队列上有还没被 signal 覆盖的 GPU 侧等待
    pub direct_wait_pending: bool,
}

impl Resources {
    pub fn new(backend: &mut dyn GpuBackend, srv_descriptors: u32, direct_fence: RawFence) -> Result<Self> {
        let srv_heap = DescriptorHeap::create(
            backend,
            DescriptorType::ShaderResourceView,
            srv_descriptors,
            true,
            "EG-Overlay SRV Heap",
        )?;
        let (release, deferred) = DeferredReleases::new();

        Ok(Self {
            srv_heap,
            srv_slots: SrvAllocator::new(srv_descriptors),
            copy: CopyQueue::new(backend)?,
            release,
            deferred,
            video_memory: 0,
            direct_fence,
            direct_signaled: FenceValue::ZERO,
            direct_wait_pending: false,
        })
    }

    /// 直接队列 signal 之后调用，之后的复制会等待到这个值
    pub fn direct_signaled(&mut self, value: FenceValue) {
        self.direct_signaled = self.direct_signaled.max(value);
    }

    pub fn srv_heap(&self) -> &DescriptorHeap {
        &self.srv_heap
    }

    pub fn video_memory(&self) -> u64 {
        self.video_memory
    }

    pub fn srv_stats(&self) -> DescriptorHeapStats {
        self.srv_slots.stats()
    }

    /// 真正销毁一个已经退役的对象
    pub fn destroy(&mut self, backend: &mut dyn GpuBackend, item: Retired) {
        match item {
            Retired::Resource { raw, gpu_bytes, srv_slot } => {
                backend.release(RawObject::Resource(raw));
                self.video_memory = self.video_memory.saturating_sub(gpu_bytes);
                if let Some(slot) = srv_slot {
                    self.srv_slots.free(slot);
                }
                trace!(resource = raw.as_raw(), gpu_bytes, ?srv_slot, "Released resource");
            }
            Retired::Object(object) => {
                backend.release(object);
                trace!(?object, "Released object");
            }
        }
    }

    /// 销毁内部对象，调用方保证 GPU 已空闲
    pub fn release_internal(&mut self, backend: &mut dyn GpuBackend) {
        self.copy.release(backend);
        backend.release(RawObject::DescriptorHeap(self.srv_heap.raw()));
    }
}

/// 资源管理器
pub struct ResourceManager<'a> {
    backend: &'a mut dyn GpuBackend,
    res: &'a mut Resources,
}

impl<'a> ResourceManager<'a> {
    pub(crate) fn new(backend: &'a mut dyn GpuBackend, res: &'a mut Resources) -> Self {
        Self { backend, res }
    }

    // ------------------------------------------------------------ 纹理

    /// 创建 2D 纹理
    ///
    /// # 参数
    ///
    /// * `format` - 像素格式（不能是深度格式）
    /// * `width`, `height` - 尺寸
    /// * `mip_levels` - mip 级别数
    pub fn texture_new_2d(&mut self, format: TextureFormat, width: u32, height: u32, mip_levels: u32) -> Result<Texture> {
        self.create_sampled(TextureDesc::texture_2d(format, width, height, mip_levels))
    }

    /// 创建 2D 纹理数组
    pub fn texture_new_2d_array(
        &mut self,
        format: TextureFormat,
        width: u32,
        height: u32,
        array_size: u32,
        mip_levels: u32,
    ) -> Result<Texture> {
        self.create_sampled(TextureDesc::texture_2d_array(format, width, height, array_size, mip_levels))
    }

    /// 创建 3D 纹理
    pub fn texture_new_3d(
        &mut self,
        format: TextureFormat,
        width: u32,
        height: u32,
        depth: u32,
        mip_levels: u32,
    ) -> Result<Texture> {
        self.create_sampled(TextureDesc::texture_3d(format, width, height, depth, mip_levels))
    }

    fn create_sampled(&mut self, desc: TextureDesc) -> Result<Texture> {
        if desc.format.is_depth() || desc.usage != TextureUsage::Sampled {
            return Err(GraphicsError::InvalidArgument(format!(
                "{} cannot be used for a sampled texture",
                desc.format
            ))
            .into());
        }
        desc.validate().map_err(GraphicsError::InvalidArgument)?;

        // 先取槽位，堆满时不会留下没有视图的纹理
        let slot = self.res.srv_slots.allocate()?;
        let raw = match self.backend.create_texture(&desc) {
            Ok(raw) => raw,
            Err(e) => {
                self.res.srv_slots.free(slot);
                return Err(e);
            }
        };
        let cpu = self.res.srv_heap.cpu_handle(slot)?;
        let gpu = self.res.srv_heap.gpu_handle(slot)?;
        self.backend.create_shader_resource_view(raw, &desc, cpu);
        self.res.video_memory += desc.byte_size();

        debug!(
            resource = raw.as_raw(),
            dimension = ?desc.dimension,
            format = %desc.format,
            width = desc.width,
            height = desc.height,
            depth_or_array_size = desc.depth_or_array_size,
            mips = desc.mip_levels,
            srv_slot = slot,
            "Texture created"
        );
        Ok(Texture::new(raw, desc, Some((slot, gpu)), self.res.release.clone()))
    }

    /// 创建深度缓冲（不占用 SRV 槽位）
    pub(crate) fn create_depth_buffer(&mut self, width: u32, height: u32) -> Result<Texture> {
        let desc = TextureDesc::depth_buffer(width, height);
        desc.validate().map_err(GraphicsError::InvalidArgument)?;
        let raw = self.backend.create_texture(&desc)?;
        self.backend.set_object_name(RawObject::Resource(raw), "EG-Overlay Depth Buffer");
        self.res.video_memory += desc.byte_size();
        Ok(Texture::new(raw, desc, None, self.res.release.clone()))
    }

    /// 释放纹理，等同于 drop
    pub fn texture_free(&mut self, texture: Texture) {
        trace!(resource = texture.raw().as_raw(), "Texture freed");
        drop(texture);
    }

    /// 把一块像素写入纹理
    ///
    /// 像素先按 256 字节行距打包进纹理自己的上传缓冲区，再在复制队列上复制到
    /// 目标子资源。写入 3D 纹理时 `region.layer` 是深度切片，写入数组时是数组层。
    ///
    /// # 参数
    ///
    /// * `texture` - 目标纹理
    /// * `region` - 目标区域（mip 0）
    /// * `format` - 像素数据的格式，必须与纹理格式兼容
    /// * `pixels` - 紧密排列的像素数据，长度必须是 `width * height * bpp`
    pub fn texture_write_pixels(
        &mut self,
        texture: &mut Texture,
        region: TextureRegion,
        format: TextureFormat,
        pixels: &[u8],
    ) -> Result<()> {
        let desc = *texture.desc();
        validate_write(&desc, &region, format, pixels.len())?;

        let bpp = format.bytes_per_pixel();
        let row_bytes = (region.width * bpp) as usize;
        let row_pitch = aligned_row_pitch(region.width, format);
        let needed = row_pitch as u64 * region.height as u64;

        let mut packed = vec![0u8; needed as usize];
        for (row, src) in pixels.chunks_exact(row_bytes).enumerate() {
            let offset = row * row_pitch as usize;
            packed[offset..offset + row_bytes].copy_from_slice(src);
        }

        let staging = self.prepare_staging(texture, needed)?;
        let (subresource, z) = match desc.dimension {
            TextureDimension::Texture3D => (0, region.layer),
            _ => (desc.subresource_index(0, region.layer), 0),
        };
        let footprint = PlacedFootprint {
            offset: 0,
            format,
            width: region.width,
            height: region.height,
            depth: 1,
            row_pitch,
        };
        let dst = texture.raw();

        let value = self.copy_pass("texture upload", |backend, recorder| {
            backend.write_buffer(staging, 0, &packed)?;
            recorder.record(
                backend,
                GpuCommand::CopyBufferToTexture {
                    src: staging,
                    footprint,
                    dst,
                    subresource,
                    x: region.x,
                    y: region.y,
                    z,
                },
            );
            Ok(())
        })?;

        if let Some(staging) = texture.staging.as_mut() {
            staging.last_use = value;
        }
        trace!(
            resource = dst.as_raw(),
            x = region.x,
            y = region.y,
            layer = region.layer,
            width = region.width,
            height = region.height,
            row_pitch,
            "Texture pixels written"
        );
        Ok(())
    }

    /// 取得可以改写的暂存缓冲区，容量不足时换一个更大的
    fn prepare_staging(&mut self, texture: &mut Texture, needed: u64) -> Result<RawResource> {
        if let Some(staging) = texture.staging.as_ref() {
            if staging.size >= needed {
                self.res.copy.timeline.wait(self.backend, staging.last_use)?;
                return Ok(staging.buffer);
            }
        }

        if let Some(old) = texture.staging.take() {
            debug!(resource = texture.raw().as_raw(), old = old.size, needed, "Growing staging buffer");
            self.res.release.retire(Retired::Resource { raw: old.buffer, gpu_bytes: 0, srv_slot: None });
        }
        let size = needed.max(MIN_STAGING_SIZE);
        let buffer = self.backend.create_buffer(size, HeapKind::Upload)?;
        if let Some(name) = self.backend.object_name(RawObject::Resource(texture.raw())) {
            self.backend.set_object_name(RawObject::Resource(buffer), &format!("{name} (staging)"));
        }
        texture.staging = Some(Staging { buffer, size, last_use: FenceValue::ZERO });
        Ok(buffer)
    }

    /// 复制 `mask` 中置位的子资源
    ///
    /// 第 i 位对应子资源 i（`mip + array_slice * mip_levels`）。两张纹理的对应
    /// 子资源尺寸必须相同，格式必须兼容。`mask` 为 0 时什么也不做。
    pub fn texture_copy_subresources(&mut self, from: &Texture, to: &Texture, mask: u32) -> Result<()> {
        if mask == 0 {
            return Ok(());
        }
        let (src, dst) = (from.desc(), to.desc());
        if !src.format.is_copy_compatible(dst.format) {
            return Err(GraphicsError::InvalidArgument(format!(
                "cannot copy {} subresources into a {} texture",
                src.format, dst.format
            ))
            .into());
        }

        let subresources: Vec<u32> = (0..32).filter(|bit| mask & (1 << bit) != 0).collect();
        for &sub in &subresources {
            if sub >= src.subresource_count() || sub >= dst.subresource_count() {
                return Err(GraphicsError::InvalidArgument(format!(
                    "subresource {sub} does not exist in both textures ({} and {})",
                    src.subresource_count(),
                    dst.subresource_count()
                ))
                .into());
            }
            if src.subresource_extent(sub) != dst.subresource_extent(sub) {
                return Err(GraphicsError::InvalidArgument(format!(
                    "subresource {sub} is {:?} in the source but {:?} in the destination",
                    src.subresource_extent(sub),
                    dst.subresource_extent(sub)
                ))
                .into());
            }
        }

        let (src_raw, dst_raw) = (from.raw(), to.raw());
        self.copy_pass("subresource copy", |backend, recorder| {
            for &subresource in &subresources {
                recorder.record(
                    backend,
                    GpuCommand::CopyTextureSubresource { src: src_raw, dst: dst_raw, subresource },
                );
            }
            Ok(())
        })?;
        debug!(from = src_raw.as_raw(), to = dst_raw.as_raw(), mask, "Subresources copied");
        Ok(())
    }

    /// 把一个子资源读回 CPU
    ///
    /// 诊断和测试用，会阻塞等待复制完成。返回紧密排列的行。
    pub fn texture_read_pixels(&mut self, texture: &Texture, subresource: u32) -> Result<Vec<u8>> {
        let desc = texture.desc();
        if subresource >= desc.subresource_count() {
            return Err(GraphicsError::InvalidArgument(format!(
                "subresource {subresource} out of range ({} total)",
                desc.subresource_count()
            ))
            .into());
        }
        let (width, height, depth) = desc.subresource_extent(subresource);
        let row_pitch = aligned_row_pitch(width, desc.format);
        let rows = height as u64 * depth as u64;
        let footprint = PlacedFootprint {
            offset: 0,
            format: desc.format,
            width,
            height,
            depth,
            row_pitch,
        };

        let readback = self.backend.create_buffer(row_pitch as u64 * rows, HeapKind::Readback)?;
        let src = texture.raw();
        let result = self
            .copy_pass("readback", |backend, recorder| {
                recorder.record(
                    backend,
                    GpuCommand::CopyTextureToBuffer { src, subresource, dst: readback, footprint },
                );
                Ok(())
            })
            .and_then(|value| self.res.copy.timeline.wait(self.backend, value))
            .and_then(|_| {
                let row_bytes = (width * desc.format.bytes_per_pixel()) as usize;
                let mut raw = vec![0u8; (row_pitch as u64 * rows) as usize];
                self.backend.read_buffer(readback, 0, &mut raw)?;
                Ok(raw
                    .chunks(row_pitch as usize)
                    .flat_map(|row| &row[..row_bytes])
                    .copied()
                    .collect())
            });

        // 复制已经完成（或从未提交），可以立即销毁
        self.backend.release(RawObject::Resource(readback));
        result
    }

    // ------------------------------------------------------------ 缓冲区

    /// 在 GPU 本地内存上创建顶点缓冲区
    pub fn create_vertex_buffer(&mut self, size: u64) -> Result<Buffer> {
        self.create_buffer(size, HeapKind::Default)
    }

    /// 创建 CPU 可写的上传缓冲区
    pub fn create_upload_buffer(&mut self, size: u64) -> Result<Buffer> {
        self.create_buffer(size, HeapKind::Upload)
    }

    fn create_buffer(&mut self, size: u64, heap: HeapKind) -> Result<Buffer> {
        let raw = self.backend.create_buffer(size, heap)?;
        let address = self.backend.buffer_gpu_address(raw);
        let buffer = Buffer::new(raw, size, heap, address, self.res.release.clone());
        self.res.video_memory += buffer.gpu_bytes();
        debug!(resource = raw.as_raw(), size, ?heap, "Buffer created");
        Ok(buffer)
    }

    /// 释放缓冲区，等同于 drop
    pub fn buffer_free(&mut self, buffer: Buffer) {
        trace!(resource = buffer.raw().as_raw(), "Buffer freed");
        drop(buffer);
    }

    /// 写入上传缓冲区
    ///
    /// 调用方保证 GPU 不在读取被覆盖的区域。
    pub fn upload_buffer_write(&mut self, buffer: &Buffer, offset: u64, data: &[u8]) -> Result<()> {
        if buffer.heap() != HeapKind::Upload {
            return Err(GraphicsError::InvalidArgument(format!(
                "buffer {} is not CPU writable",
                buffer.raw().as_raw()
            ))
            .into());
        }
        self.backend.write_buffer(buffer.raw(), offset, data)
    }

    /// 整个资源复制
    ///
    /// 两个资源必须同为缓冲区（大小相同）或同为纹理（形状相同、格式兼容）。
    /// 目标不能在上传堆上。
    pub fn copy_resource(&mut self, from: &dyn GpuResource, to: &dyn GpuResource) -> Result<()> {
        let compatible = match (from.layout(), to.layout()) {
            (ResourceLayout::Buffer { .. }, ResourceLayout::Buffer { heap: HeapKind::Upload, .. }) => {
                return Err(GraphicsError::InvalidArgument("cannot copy into an upload buffer".to_string()).into());
            }
            (ResourceLayout::Buffer { size: a, .. }, ResourceLayout::Buffer { size: b, .. }) => a == b,
            (ResourceLayout::Texture(a), ResourceLayout::Texture(b)) => {
                a.dimension == b.dimension
                    && a.width == b.width
                    && a.height == b.height
                    && a.depth_or_array_size == b.depth_or_array_size
                    && a.mip_levels == b.mip_levels
                    && a.format.is_copy_compatible(b.format)
            }
            _ => false,
        };
        if !compatible {
            return Err(GraphicsError::InvalidArgument(format!(
                "resources {:?} and {:?} differ in kind or size",
                from.layout(),
                to.layout()
            ))
            .into());
        }

        let (src, dst) = (from.raw_resource(), to.raw_resource());
        self.copy_pass("resource copy", |backend, recorder| {
            recorder.record(backend, GpuCommand::CopyResource { src, dst });
            Ok(())
        })?;
        Ok(())
    }

    // ------------------------------------------------------------ 描述符堆

    /// 创建描述符堆，drop 时延迟销毁
    pub fn create_descriptor_heap(
        &mut self,
        kind: DescriptorType,
        capacity: u32,
        shader_visible: bool,
    ) -> Result<DescriptorHeap> {
        let name = format!("EG-Overlay {} Heap", kind.name());
        Ok(DescriptorHeap::create(self.backend, kind, capacity, shader_visible, &name)?
            .with_release_queue(self.res.release.clone()))
    }

    /// 在自己创建的 SRV 堆的第 `index` 个槽位写入纹理的着色器资源视图
    ///
    /// 槽位由调用方管理，覆盖已有的视图不会做任何检查。纹理销毁后视图失效，
    /// 调用方保证之后不再通过这个槽位绑定它。
    pub fn write_texture_descriptor(&mut self, heap: &DescriptorHeap, index: u32, texture: &Texture) -> Result<()> {
        if heap.kind() != DescriptorType::ShaderResourceView {
            return Err(GraphicsError::InvalidArgument(format!(
                "cannot write a texture view into a {} heap",
                heap.kind().name()
            ))
            .into());
        }
        let cpu = heap.cpu_handle(index)?;
        self.backend.create_shader_resource_view(texture.raw(), texture.desc(), cpu);
        trace!(heap = heap.raw().as_raw(), index, resource = texture.raw().as_raw(), "Texture descriptor written");
        Ok(())
    }

    /// SRV 槽位使用统计
    pub fn srv_stats(&self) -> DescriptorHeapStats {
        self.res.srv_stats()
    }

    // ------------------------------------------------------------ 调试名称

    pub fn texture_set_name(&mut self, texture: &Texture, name: &str) {
        self.object_set_name(RawObject::Resource(texture.raw()), name);
        if let Some(staging) = texture.staging.as_ref() {
            self.backend.set_object_name(RawObject::Resource(staging.buffer), &format!("{name} (staging)"));
        }
    }

    pub fn object_set_name(&mut self, object: RawObject, name: &str) {
        trace!(?object, name, "Naming object");
        self.backend.set_object_name(object, name);
    }

    /// 把 `from` 的名称复制给 `to`，`from` 没有名称时什么也不做
    pub fn texture_copy_name(&mut self, from: &Texture, to: &Texture) {
        if let Some(name) = self.texture_name(from) {
            self.texture_set_name(to, &name);
        }
    }

    pub fn object_copy_name(&mut self, from: RawObject, to: RawObject) {
        if let Some(name) = self.backend.object_name(from) {
            self.backend.set_object_name(to, &name);
        }
    }

    pub fn texture_name(&self, texture: &Texture) -> Option<String> {
        self.backend.object_name(RawObject::Resource(texture.raw()))
    }

    pub fn object_name(&self, object: RawObject) -> Option<String> {
        self.backend.object_name(object)
    }

    // ------------------------------------------------------------ 统计

    /// 通过本管理器分配、尚未销毁的 GPU 本地内存字节数
    pub fn video_memory_used(&self) -> u64 {
        self.res.video_memory()
    }

    /// 驱动报告的显存占用
    pub fn adapter_memory_usage(&self) -> Result<u64> {
        self.backend.adapter_memory_usage()
    }

    // ------------------------------------------------------------ 复制队列

    /// 在复制队列上录制并提交一批命令
    ///
    /// 复制队列先等待直接队列上已提交的帧，提交后直接队列再等待这次复制。
    fn copy_pass<F>(&mut self, label: &'static str, record: F) -> Result<FenceValue>
    where
        F: FnOnce(&mut dyn GpuBackend, &mut CommandRecorder) -> Result<()>,
    {
        let in_flight = self.res.direct_signaled;
        if self.backend.fence_completed_value(self.res.direct_fence) < in_flight.value() {
            self.backend.queue_wait(QueueKind::Copy, self.res.direct_fence, in_flight.value())?;
            trace!(label, fence = in_flight.value(), "Copy queue waits for frames in flight");
        }
        self.res.copy.begin(self.backend)?;
        if let Err(e) = record(self.backend, &mut self.res.copy.recorder) {
            if let Err(discard) = self.res.copy.recorder.discard(self.backend) {
                warn!(error = %discard, "Failed to discard copy command list");
            }
            return Err(e);
        }
        let value = self.res.copy.submit(self.backend)?;
        self.backend.queue_wait(QueueKind::Direct, self.res.copy.timeline.fence(), value.value())?;
        self.res.direct_wait_pending = true;
        trace!(label, fence = value.value(), submissions = self.res.copy.submissions, "Copy submitted");
        Ok(value)
    }
}

fn validate_write(desc: &TextureDesc, region: &TextureRegion, format: TextureFormat, len: usize) -> Result<()> {
    let invalid = |msg: String| -> Result<()> { Err(GraphicsError::InvalidArgument(msg).into()) };

    if !format.is_copy_compatible(desc.format) {
        return invalid(format!("pixel format {format} is not compatible with texture format {}", desc.format));
    }
    if region.width == 0 || region.height == 0 {
        return invalid(format!("empty write region {}x{}", region.width, region.height));
    }
    if region.x as u64 + region.width as u64 > desc.width as u64
        || region.y as u64 + region.height as u64 > desc.height as u64
    {
        return invalid(format!(
            "region {}x{} at ({}, {}) exceeds texture size {}x{}",
            region.width, region.height, region.x, region.y, desc.width, desc.height
        ));
    }
    let layers = match desc.dimension {
        TextureDimension::Texture2D => 1,
        TextureDimension::Texture2DArray | TextureDimension::Texture3D => desc.depth_or_array_size,
    };
    if region.layer >= layers {
        return invalid(format!("layer {} out of range ({layers} available)", region.layer));
    }
    let expected = region.width as usize * region.height as usize * format.bytes_per_pixel() as usize;
    if len != expected {
        return invalid(format!("pixel data is {len} bytes, expected {expected}"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::{HeadlessBackend, HeadlessProbe};

    struct Fixture {
        backend: HeadlessBackend,
        res: Resources,
        probe: HeadlessProbe,
    }

    impl Fixture {
        fn new(latency: usize, srv_descriptors: u32) -> Self {
            let mut backend = HeadlessBackend::new(latency);
            let probe = backend.probe();
            let direct = backend.create_fence(0).unwrap();
            let res = Resources::new(&mut backend, srv_descriptors, direct).unwrap();
            Self { backend, res, probe }
        }

        fn manager(&mut self) -> ResourceManager<'_> {
            ResourceManager::new(&mut self.backend, &mut self.res)
        }

        /// GPU 空闲后销毁所有退役对象
        fn collect(&mut self) {
            self.res.copy.timeline.flush(&mut self.backend).unwrap();
            for item in self.res.deferred.drain_all() {
                self.res.destroy(&mut self.backend, item);
            }
        }
    }

    fn gradient(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    #[test]
    fn test_row_pitch_alignment() {
        assert_eq!(aligned_row_pitch(1, TextureFormat::R8Unorm), 256);
        assert_eq!(aligned_row_pitch(64, TextureFormat::Rgba8Unorm), 256);
        assert_eq!(aligned_row_pitch(65, TextureFormat::Rgba8Unorm), 512);
        assert_eq!(aligned_row_pitch(100, TextureFormat::Rgba32Float), 1792);
    }

    #[test]
    fn test_write_then_read_rgba8() {
        let mut fx = Fixture::new(2, 16);
        let mut mgr = fx.manager();
        let mut tex = mgr.texture_new_2d(TextureFormat::Rgba8Unorm, 70, 5, 1).unwrap();

        let pixels = gradient(70 * 5 * 4);
        mgr.texture_write_pixels(&mut tex, TextureRegion::new(0, 0, 70, 5), TextureFormat::Rgba8Unorm, &pixels)
            .unwrap();
        assert_eq!(mgr.texture_read_pixels(&tex, 0).unwrap(), pixels);
        assert_eq!(fx.probe.validation_errors(), 0);
    }

    #[test]
    fn test_write_then_read_r32_float_region() {
        let mut fx = Fixture::new(1, 16);
        let mut mgr = fx.manager();
        let mut tex = mgr.texture_new_2d(TextureFormat::R32Float, 8, 8, 1).unwrap();

        let values: Vec<f32> = (0..6).map(|i| i as f32 * 0.25).collect();
        let bytes: Vec<u8> = bytemuck::cast_slice(&values).to_vec();
        mgr.texture_write_pixels(&mut tex, TextureRegion::new(2, 3, 3, 2), TextureFormat::R32Float, &bytes)
            .unwrap();

        let read = mgr.texture_read_pixels(&tex, 0).unwrap();
        let texels: &[f32] = bytemuck::cast_slice(&read);
        assert_eq!(&texels[3 * 8 + 2..3 * 8 + 5], &values[0..3]);
        assert_eq!(&texels[4 * 8 + 2..4 * 8 + 5], &values[3..6]);
        assert_eq!(texels[0], 0.0);
    }

    #[test]
    fn test_write_array_layer_and_volume_slice() {
        let mut fx = Fixture::new(0, 16);
        let mut mgr = fx.manager();

        let mut array = mgr.texture_new_2d_array(TextureFormat::R8Unorm, 4, 4, 3, 2).unwrap();
        let layer = gradient(16);
        mgr.texture_write_pixels(&mut array, TextureRegion::new(0, 0, 4, 4).on_layer(2), TextureFormat::R8Unorm, &layer)
            .unwrap();
        let sub = array.desc().subresource_index(0, 2);
        assert_eq!(mgr.texture_read_pixels(&array, sub).unwrap(), layer);
        assert_eq!(mgr.texture_read_pixels(&array, 0).unwrap(), vec![0; 16]);

        let mut volume = mgr.texture_new_3d(TextureFormat::R8Unorm, 2, 2, 4, 1).unwrap();
        mgr.texture_write_pixels(&mut volume, TextureRegion::new(0, 0, 2, 2).on_layer(3), TextureFormat::R8Unorm, &[1, 2, 3, 4])
            .unwrap();
        let read = mgr.texture_read_pixels(&volume, 0).unwrap();
        assert_eq!(&read[12..16], &[1, 2, 3, 4]);
        assert!(read[..12].iter().all(|b| *b == 0));
        assert_eq!(fx.probe.validation_errors(), 0);
    }

    #[test]
    fn test_write_validation() {
        let mut fx = Fixture::new(0, 16);
        let mut mgr = fx.manager();
        let mut tex = mgr.texture_new_2d(TextureFormat::Rgba8Unorm, 4, 4, 1).unwrap();

        let px = vec![0u8; 4 * 4 * 4];
        // 格式不兼容
        assert!(mgr.texture_write_pixels(&mut tex, TextureRegion::new(0, 0, 4, 4), TextureFormat::Bgra8Unorm, &px).is_err());
        // 越界
        assert!(mgr.texture_write_pixels(&mut tex, TextureRegion::new(1, 0, 4, 4), TextureFormat::Rgba8Unorm, &px).is_err());
        // 数据长度不对
        assert!(mgr.texture_write_pixels(&mut tex, TextureRegion::new(0, 0, 2, 2), TextureFormat::Rgba8Unorm, &px).is_err());
        // 普通 2D 纹理只有第 0 层
        assert!(mgr
            .texture_write_pixels(&mut tex, TextureRegion::new(0, 0, 4, 4).on_layer(1), TextureFormat::Rgba8Unorm, &px)
            .is_err());
        assert!(tex.staging.is_none());
    }

    #[test]
    fn test_staging_buffer_is_reused_and_grown() {
        let mut fx = Fixture::new(2, 16);
        let mut mgr = fx.manager();
        let mut tex = mgr.texture_new_2d(TextureFormat::Rgba8Unorm, 512, 512, 1).unwrap();

        mgr.texture_write_pixels(&mut tex, TextureRegion::new(0, 0, 8, 8), TextureFormat::Rgba8Unorm, &[7; 256])
            .unwrap();
        let first = tex.staging.as_ref().map(|s| s.buffer).unwrap();
        mgr.texture_write_pixels(&mut tex, TextureRegion::new(8, 0, 8, 8), TextureFormat::Rgba8Unorm, &[9; 256])
            .unwrap();
        assert_eq!(tex.staging.as_ref().map(|s| s.buffer), Some(first));

        // 512 行 × 2048 字节超过最小暂存尺寸
        let big = vec![1u8; 512 * 512 * 4];
        mgr.texture_write_pixels(&mut tex, TextureRegion::new(0, 0, 512, 512), TextureFormat::Rgba8Unorm, &big)
            .unwrap();
        let grown = tex.staging.as_ref().unwrap();
        assert_ne!(grown.buffer, first);
        assert!(grown.size >= 512 * 2048);

        assert_eq!(mgr.texture_read_pixels(&tex, 0).unwrap(), big);
        assert_eq!(fx.res.deferred.stamp(FenceValue::ZERO, FenceValue::ZERO), 1);
        assert_eq!(fx.probe.validation_errors(), 0);
    }

    #[test]
    fn test_copy_subresources_by_mask() {
        let mut fx = Fixture::new(1, 16);
        let mut mgr = fx.manager();
        let mut from = mgr.texture_new_2d_array(TextureFormat::R8Unorm, 2, 2, 2, 1).unwrap();
        let to = mgr.texture_new_2d_array(TextureFormat::R8Unorm, 2, 2, 2, 1).unwrap();

        mgr.texture_write_pixels(&mut from, TextureRegion::new(0, 0, 2, 2), TextureFormat::R8Unorm, &[1, 2, 3, 4])
            .unwrap();
        mgr.texture_write_pixels(&mut from, TextureRegion::new(0, 0, 2, 2).on_layer(1), TextureFormat::R8Unorm, &[5, 6, 7, 8])
            .unwrap();

        mgr.texture_copy_subresources(&from, &to, 0b10).unwrap();
        assert_eq!(mgr.texture_read_pixels(&to, 0).unwrap(), vec![0; 4]);
        assert_eq!(mgr.texture_read_pixels(&to, 1).unwrap(), vec![5, 6, 7, 8]);

        // 掩码里有不存在的子资源
        assert!(mgr.texture_copy_subresources(&from, &to, 0b100).is_err());
        mgr.texture_copy_subresources(&from, &to, 0).unwrap();

        let other = mgr.texture_new_2d_array(TextureFormat::R8Unorm, 4, 4, 2, 1).unwrap();
        assert!(mgr.texture_copy_subresources(&from, &other, 0b1).is_err());
        assert_eq!(fx.probe.validation_errors(), 0);
    }

    #[test]
    fn test_copy_resource_checks_layout() {
        let mut fx = Fixture::new(0, 16);
        let mut mgr = fx.manager();

        let upload = mgr.create_upload_buffer(64).unwrap();
        let vertices = mgr.create_vertex_buffer(64).unwrap();
        let small = mgr.create_vertex_buffer(32).unwrap();
        mgr.upload_buffer_write(&upload, 0, &[3; 64]).unwrap();

        mgr.copy_resource(&upload, &vertices).unwrap();
        assert!(mgr.copy_resource(&upload, &small).is_err());
        assert!(mgr.copy_resource(&vertices, &upload).is_err());
        assert!(mgr.upload_buffer_write(&vertices, 0, &[0; 4]).is_err());

        let tex_a = mgr.texture_new_2d(TextureFormat::Rgba8Unorm, 4, 4, 1).unwrap();
        let tex_b = mgr.texture_new_2d(TextureFormat::Rgba8Unorm, 4, 4, 1).unwrap();
        mgr.copy_resource(&tex_a, &tex_b).unwrap();
        assert!(mgr.copy_resource(&tex_a, &vertices).is_err());
        assert_eq!(fx.probe.validation_errors(), 0);
    }

    #[test]
    fn test_video_memory_accounting() {
        let mut fx = Fixture::new(0, 16);
        let mut mgr = fx.manager();
        assert_eq!(mgr.video_memory_used(), 0);

        let tex = mgr.texture_new_2d(TextureFormat::Rgba8Unorm, 16, 16, 1).unwrap();
        let vb = mgr.create_vertex_buffer(1024).unwrap();
        let ub = mgr.create_upload_buffer(4096).unwrap();
        assert_eq!(mgr.video_memory_used(), 16 * 16 * 4 + 1024);

        mgr.texture_free(tex);
        mgr.buffer_free(vb);
        drop(ub);
        // 延迟释放之前统计不变
        assert_eq!(mgr.video_memory_used(), 16 * 16 * 4 + 1024);

        fx.collect();
        assert_eq!(fx.manager().video_memory_used(), 0);
        assert_eq!(fx.probe.validation_errors(), 0);
    }

    #[test]
    fn test_srv_exhaustion_and_slot_reuse() {
        let mut fx = Fixture::new(0, 2);
        let probe = fx.probe.clone();
        let live_before = probe.live_resources();

        let mut mgr = fx.manager();
        let a = mgr.texture_new_2d(TextureFormat::R8Unorm, 4, 4, 1).unwrap();
        let b = mgr.texture_new_2d(TextureFormat::R8Unorm, 4, 4, 1).unwrap();
        let err = mgr.texture_new_2d(TextureFormat::R8Unorm, 4, 4, 1).unwrap_err();
        assert!(matches!(err, crate::core::error::OverlayError::Graphics(GraphicsError::DescriptorHeapExhausted { .. })));
        // 失败的创建不会留下资源
        assert_eq!(probe.live_resources(), live_before + 2);

        let freed = a.srv_slot();
        drop(a);
        fx.collect();

        let mut mgr = fx.manager();
        let c = mgr.texture_new_2d(TextureFormat::R8Unorm, 4, 4, 1).unwrap();
        assert_eq!(c.srv_slot(), freed);
        assert_eq!(mgr.srv_stats().reused, 1);
        assert_ne!(c.srv_slot(), b.srv_slot());
    }

    #[test]
    fn test_depth_format_is_rejected_for_sampling() {
        let mut fx = Fixture::new(0, 4);
        let mut mgr = fx.manager();
        assert!(mgr.texture_new_2d(TextureFormat::D32Float, 4, 4, 1).is_err());
        assert_eq!(mgr.srv_stats().used, 0);
    }

    #[test]
    fn test_degenerate_textures_are_rejected() {
        let mut fx = Fixture::new(0, 4);
        let live = fx.probe.live_resources();
        let mut mgr = fx.manager();

        for result in [
            mgr.texture_new_2d(TextureFormat::Rgba8Unorm, 16, 16, 0),
            mgr.texture_new_2d(TextureFormat::Rgba8Unorm, 0, 16, 1),
            mgr.texture_new_2d(TextureFormat::Rgba8Unorm, 16, 16, 6),
            mgr.texture_new_2d_array(TextureFormat::Rgba8Unorm, 16, 16, 0, 1),
            mgr.texture_new_3d(TextureFormat::R8Unorm, 8, 8, 0, 1),
        ] {
            let err = result.unwrap_err();
            assert!(matches!(err, crate::core::error::OverlayError::Graphics(GraphicsError::InvalidArgument(_))));
        }
        assert!(mgr.create_depth_buffer(0, 720).is_err());

        // 没有占用槽位，也没有创建任何资源
        assert_eq!(mgr.srv_stats().used, 0);
        assert_eq!(mgr.video_memory_used(), 0);
        assert_eq!(fx.probe.live_resources(), live);
    }

    #[test]
    fn test_names() {
        let mut fx = Fixture::new(0, 4);
        let mut mgr = fx.manager();
        let mut a = mgr.texture_new_2d(TextureFormat::R8Unorm, 4, 4, 1).unwrap();
        let b = mgr.texture_new_2d(TextureFormat::R8Unorm, 4, 4, 1).unwrap();

        mgr.texture_set_name(&a, "font atlas");
        mgr.texture_copy_name(&a, &b);
        assert_eq!(mgr.texture_name(&b).as_deref(), Some("font atlas"));

        mgr.texture_write_pixels(&mut a, TextureRegion::new(0, 0, 1, 1), TextureFormat::R8Unorm, &[1]).unwrap();
        let staging = RawObject::Resource(a.staging.as_ref().unwrap().buffer);
        assert_eq!(mgr.object_name(staging).as_deref(), Some("font atlas (staging)"));

        mgr.object_copy_name(RawObject::Resource(a.raw()), staging);
        assert_eq!(mgr.object_name(staging).as_deref(), Some("font atlas"));
    }

    #[test]
    fn test_user_descriptor_heap_is_deferred() {
        let mut fx = Fixture::new(0, 4);
        let heap = fx.manager().create_descriptor_heap(DescriptorType::Sampler, 4, true).unwrap();
        assert!(heap.gpu_handle(3).is_ok());
        drop(heap);
        assert_eq!(fx.res.deferred.drain_all().len(), 1);
    }
}
