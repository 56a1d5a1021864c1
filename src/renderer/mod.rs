//! 渲染器模块
//!
//! 覆盖层渲染后端的公共接口，与具体图形 API 无关，所有 GPU 调用都经过
//! [`GpuBackend`](crate::gfx::GpuBackend)。
//!
//! # 架构设计
//!
//! - [`Renderer`]：拥有后端、交换链渲染目标、帧同步器、资源状态和管线缓存
//! - [`Frame`]：一帧的录制接口，`start_frame` 返回，`end` 提交并呈现
//! - [`ResourceManager`]：纹理与缓冲区的创建、上传、复制和命名
//! - `sync` / `command` / `descriptor`：栅栏时间线、命令列表和描述符堆
//! - `clip`：每帧的视口与裁剪栈
//!
//! # 帧生命周期
//!
//! ```text
//! start_frame ─▶ 等待槽位水位线 ─▶ 回收已完成的资源 ─▶ 清屏 ─▶ Frame
//!                                                              │
//! present ◀─ signal ◀─ execute ◀─ 后缓冲 RenderTarget→Present ◀─ end
//! ```

use std::path::Path;

use tracing::{debug, error, info, trace, warn};

use crate::core::config::{Config, GraphicsBackend};
use crate::core::error::{GraphicsError, Result};
use crate::core::math::{ortho_projection, Color, Matrix4};
use crate::gfx::{
    self, AdapterInfo, DescriptorType, GpuBackend, GpuCommand, PipelineStateDesc, RawObject, RawResource,
    ResourceState, SurfaceTarget, SwapchainDesc, TextureDesc, TextureFormat,
};

pub mod clip;
pub mod command;
pub mod descriptor;
pub mod frame;
pub mod manager;
pub mod pipeline;
pub mod resource;
pub mod sync;

pub use clip::{ClipStack, PixelRect};
pub use command::{CommandListState, CommandRecorder};
pub use descriptor::{DescriptorHeap, DescriptorHeapStats};
pub use frame::{Frame, FrameStats, TEXTURE_ROOT_PARAMETER_BASE};
pub use manager::{aligned_row_pitch, ResourceManager, TextureRegion, TEXTURE_PITCH_ALIGNMENT};
pub use pipeline::{CachedPipeline, PipelineCache, PipelineId, RootSignatureId};
pub use resource::{Buffer, GpuResource, ResourceLayout, Texture};
pub use sync::{FenceValue, FrameSynchronizer, QueueTimeline};

use manager::Resources;

/// 交换链后缓冲格式
pub const BACKBUFFER_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

/// 渲染器参数
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// 后缓冲数量，也是帧槽位数量
    pub backbuffers: u32,
    /// 着色器可见 SRV 堆容量
    pub srv_descriptors: u32,
    pub allow_tearing: bool,
    /// 默认根签名的序列化字节
    pub root_signature: Option<Vec<u8>>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            backbuffers: 2,
            srv_descriptors: 2048,
            allow_tearing: true,
            root_signature: None,
        }
    }
}

impl RendererConfig {
    /// 从应用配置构建，同时读取根签名文件
    ///
    /// # 返回值
    ///
    /// dx12 后端读不到根签名时返回致命的 [`GraphicsError::RootSignatureCreation`]；
    /// headless 后端只记录警告，之后没有默认根签名
    pub fn from_config(config: &Config) -> Result<Self> {
        let root_signature = match read_root_signature(&config.shaders.root_signature) {
            Ok(bytes) => Some(bytes),
            Err(e) if config.graphics.backend == GraphicsBackend::Headless => {
                warn!(
                    path = %config.shaders.root_signature.display(),
                    error = %e,
                    "Root signature unavailable, running without a default root signature"
                );
                None
            }
            Err(e) => return Err(e),
        };

        Ok(Self {
            backbuffers: config.graphics.backbuffers,
            srv_descriptors: config.graphics.srv_descriptors,
            allow_tearing: config.graphics.allow_tearing,
            root_signature,
        })
    }

    pub fn with_root_signature(mut self, bytes: Vec<u8>) -> Self {
        self.root_signature = Some(bytes);
        self
    }
}

fn read_root_signature(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| {
        GraphicsError::RootSignatureCreation(format!("couldn't read {}: {e}", path.display())).into()
    })
}

/// 交换链的渲染目标：每个后缓冲一个 RTV，以及共享的深度缓冲
struct RenderTargets {
    rtv_heap: DescriptorHeap,
    dsv_heap: DescriptorHeap,
    depth: Option<Texture>,
    width: u32,
    height: u32,
    projection: Matrix4,
}

impl RenderTargets {
    fn new(
        backend: &mut dyn GpuBackend,
        resources: &mut Resources,
        backbuffers: u32,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let rtv_heap =
            DescriptorHeap::create(backend, DescriptorType::RenderTargetView, backbuffers, false, "EG-Overlay RTV Heap")?;
        let dsv_heap = DescriptorHeap::create(backend, DescriptorType::DepthStencilView, 1, false, "EG-Overlay DSV Heap")?;

        let mut targets = Self {
            rtv_heap,
            dsv_heap,
            depth: None,
            width,
            height,
            projection: ortho_projection(width, height),
        };
        targets.rebuild(backend, resources, width, height)?;
        Ok(targets)
    }

    /// 为当前的后缓冲重建视图，并创建匹配尺寸的深度缓冲
    fn rebuild(&mut self, backend: &mut dyn GpuBackend, resources: &mut Resources, width: u32, height: u32) -> Result<()> {
        for i in 0..self.rtv_heap.capacity() {
            let backbuffer = backend.backbuffer(i)?;
            backend.create_render_target_view(backbuffer, self.rtv_heap.cpu_handle(i)?);
            backend.set_object_name(RawObject::Resource(backbuffer), &format!("EG-Overlay Backbuffer {i}"));
        }

        let depth = ResourceManager::new(backend, resources).create_depth_buffer(width, height)?;
        backend.create_depth_stencil_view(depth.raw(), self.dsv_heap.cpu_handle(0)?);
        self.depth = Some(depth);

        self.width = width;
        self.height = height;
        self.projection = ortho_projection(width, height);
        Ok(())
    }

    fn release(&self, backend: &mut dyn GpuBackend) {
        backend.release(RawObject::DescriptorHeap(self.rtv_heap.raw()));
        backend.release(RawObject::DescriptorHeap(self.dsv_heap.raw()));
    }
}

/// 覆盖层渲染器
pub struct Renderer {
    backend: Box<dyn GpuBackend>,
    config: RendererConfig,
    sync: FrameSynchronizer,
    resources: Resources,
    pipelines: PipelineCache,
    targets: RenderTargets,
    /// 尺寸为 0 时为 false，此期间不开始新帧
    surface_ready: bool,
    frame_number: u64,
}

impl Renderer {
    /// 按应用配置创建后端和渲染器
    pub fn new(config: &Config, target: SurfaceTarget) -> Result<Self> {
        let backend = gfx::create_backend(&config.graphics)?;
        Self::with_backend(backend, RendererConfig::from_config(config)?, target)
    }

    /// 在已有的后端上创建渲染器
    ///
    /// # 参数
    ///
    /// * `backend` - 图形后端
    /// * `config` - 渲染器参数
    /// * `target` - 交换链的呈现目标
    pub fn with_backend(mut backend: Box<dyn GpuBackend>, config: RendererConfig, target: SurfaceTarget) -> Result<Self> {
        let adapter = backend.adapter_info();
        info!(
            backend = backend.name(),
            adapter = %adapter.description,
            video_memory_mb = adapter.dedicated_video_memory / (1024 * 1024),
            feature_level = %adapter.feature_level,
            "Initializing renderer"
        );

        let sync = FrameSynchronizer::new(backend.as_mut(), config.backbuffers)?;
        let mut resources = Resources::new(backend.as_mut(), config.srv_descriptors, sync.timeline().fence())?;

        let mut pipelines = PipelineCache::new();
        if let Some(bytes) = &config.root_signature {
            let id = pipelines.create_root_signature(backend.as_mut(), bytes)?;
            pipelines.set_default_root_signature(id);
        }

        let (width, height) = target.size();
        backend.create_swapchain(
            &target,
            &SwapchainDesc {
                width,
                height,
                buffer_count: config.backbuffers,
                format: BACKBUFFER_FORMAT,
                allow_tearing: config.allow_tearing,
            },
        )?;
        let targets = RenderTargets::new(backend.as_mut(), &mut resources, config.backbuffers, width, height)?;

        info!(width, height, backbuffers = config.backbuffers, "Renderer initialized");
        Ok(Self {
            backend,
            config,
            sync,
            resources,
            pipelines,
            targets,
            surface_ready: width > 0 && height > 0,
            frame_number: 0,
        })
    }

    // ------------------------------------------------------------ 帧

    /// 开始一帧
    ///
    /// 等待当前后缓冲对应槽位的上一次提交，回收已经完成的资源，然后录制
    /// 清屏和默认的视口/裁剪。
    ///
    /// # 返回值
    ///
    /// 渲染目标尺寸为 0 或呈现目标暂时不可用时返回 `Ok(None)`，这一帧应跳过
    pub fn start_frame(&mut self) -> Result<Option<Frame<'_>>> {
        if !self.backbuffer_ready() {
            trace!("Surface not presentable, skipping frame");
            return Ok(None);
        }

        let slot = self.backend.current_backbuffer_index();
        let backbuffer = self.backend.backbuffer(slot)?;
        let rtv = self.targets.rtv_heap.cpu_handle(slot)?;
        let dsv = self.targets.dsv_heap.cpu_handle(0)?;

        self.sync.begin(self.backend.as_mut(), slot)?;
        self.collect_releases();
        self.frame_number += 1;

        let srv_heap = self.resources.srv_heap().raw();
        let root_signature = self.pipelines.default_root_signature();
        let bounds = PixelRect::from_size(self.targets.width, self.targets.height);

        self.record(
            slot,
            GpuCommand::Transition { resource: backbuffer, before: ResourceState::Present, after: ResourceState::RenderTarget },
        );
        self.record(slot, GpuCommand::SetDescriptorHeap(srv_heap));
        let default_signature = root_signature.and_then(|id| self.pipelines.raw_root_signature(id));
        if let Some(raw) = default_signature {
            self.record(slot, GpuCommand::SetRootSignature(raw));
        }
        self.record(slot, GpuCommand::SetRenderTarget { rtv, dsv: Some(dsv) });
        self.record(slot, GpuCommand::ClearRenderTarget { rtv, color: Color::TRANSPARENT.to_array() });
        self.record(slot, GpuCommand::ClearDepth { dsv, depth: 1.0 });
        self.record(slot, GpuCommand::SetViewport(bounds.to_viewport()));
        self.record(slot, GpuCommand::SetScissor(bounds.to_scissor()));

        let number = self.frame_number;
        Ok(Some(Frame::new(self, slot, backbuffer, bounds, root_signature, number)))
    }

    /// 交换链当前是否可以呈现（最小化、尺寸为 0 或帧延迟对象未就绪时为 false）
    pub fn backbuffer_ready(&mut self) -> bool {
        self.surface_ready && self.backend.swapchain_ready()
    }

    fn record(&mut self, slot: u32, command: GpuCommand<'_>) {
        self.sync.slot_mut(slot).recorder.record(self.backend.as_mut(), command);
    }

    /// 关闭并执行槽位的命令列表，然后呈现
    ///
    /// 呈现失败时仍然 signal，保证槽位的水位线覆盖已经执行的命令列表。
    fn submit_frame(&mut self, slot: u32, backbuffer: RawResource) -> Result<()> {
        self.record(
            slot,
            GpuCommand::Transition { resource: backbuffer, before: ResourceState::RenderTarget, after: ResourceState::Present },
        );
        self.sync.slot_mut(slot).recorder.submit(self.backend.as_mut())?;

        let presented = self.backend.present();
        let fence = self.sync.finish(self.backend.as_mut(), slot)?;
        self.resources.direct_signaled(fence);
        self.resources.direct_wait_pending = false;
        self.resources.deferred.stamp(fence, self.resources.copy.timeline().last_signaled());

        presented.inspect_err(|e| error!(error = %e, frame = self.frame_number, "Present failed"))
    }

    fn discard_frame(&mut self, slot: u32) {
        if let Err(e) = self.sync.slot_mut(slot).recorder.discard(self.backend.as_mut()) {
            error!(error = %e, slot, "Couldn't close discarded command list");
        }
    }

    /// 销毁两个队列都已经用完的资源
    fn collect_releases(&mut self) {
        let direct = self.sync.timeline();
        let copy = self.resources.copy.timeline();
        let (direct_signaled, copy_signaled) = (direct.last_signaled(), copy.last_signaled());
        let (direct_done, copy_done) = (direct.completed(self.backend.as_ref()), copy.completed(self.backend.as_ref()));

        self.resources.deferred.stamp(direct_signaled, copy_signaled);
        let ready = self.resources.deferred.collect(direct_done, copy_done);
        if ready.is_empty() {
            return;
        }
        debug!(
            released = ready.len(),
            pending = self.resources.deferred.pending(),
            "Releasing retired GPU objects"
        );
        for item in ready {
            self.resources.destroy(self.backend.as_mut(), item);
        }
    }

    /// 阻塞直到两个队列上已提交的工作全部完成，并回收所有可以回收的资源
    ///
    /// GPU 已经空闲时不会产生阻塞等待。
    pub fn flush_commands(&mut self) -> Result<()> {
        self.resources.copy.timeline().flush(self.backend.as_mut())?;
        if self.resources.direct_wait_pending {
            let fence = self.sync.signal(self.backend.as_mut())?;
            self.resources.direct_signaled(fence);
            self.resources.direct_wait_pending = false;
        }
        if self.sync.flush(self.backend.as_mut())? {
            debug!(fence = self.sync.timeline().last_signaled().value(), "Waited for the GPU to go idle");
        }
        self.collect_releases();
        Ok(())
    }

    /// 调整渲染目标尺寸
    ///
    /// 宽或高为 0（窗口最小化）时只暂停出帧，不重建任何对象。
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            debug!(width, height, "Render target collapsed, suspending frames");
            self.surface_ready = false;
            return Ok(());
        }
        if (width, height) == (self.targets.width, self.targets.height) {
            self.surface_ready = true;
            return Ok(());
        }
        // 不合法的尺寸在销毁任何对象之前拒绝
        TextureDesc::render_target(BACKBUFFER_FORMAT, width, height)
            .validate()
            .map_err(GraphicsError::InvalidArgument)?;

        self.flush_commands()?;
        drop(self.targets.depth.take());
        self.collect_releases();

        let rebuilt = self
            .backend
            .resize_swapchain(width, height)
            .and_then(|_| self.targets.rebuild(self.backend.as_mut(), &mut self.resources, width, height));
        if let Err(e) = rebuilt {
            // 渲染目标已经不完整：暂停出帧，下一次 resize 无论尺寸都完整重建
            error!(error = %e, width, height, "Resize failed, frames suspended until the next resize");
            self.surface_ready = false;
            self.targets.width = 0;
            self.targets.height = 0;
            return Err(e);
        }
        self.surface_ready = true;

        info!(width, height, "Render targets resized");
        Ok(())
    }

    // ------------------------------------------------------------ 资源与管线

    /// 资源管理器
    pub fn resources(&mut self) -> ResourceManager<'_> {
        ResourceManager::new(self.backend.as_mut(), &mut self.resources)
    }

    /// 创建根签名，相同的字节返回同一个 id
    pub fn create_root_signature(&mut self, bytes: &[u8]) -> Result<RootSignatureId> {
        self.pipelines.create_root_signature(self.backend.as_mut(), bytes)
    }

    /// 使用默认根签名编译管线，相同的描述返回同一个 id
    pub fn create_pipeline_state(&mut self, desc: &PipelineStateDesc) -> Result<PipelineId> {
        self.pipelines.create_pipeline_state(self.backend.as_mut(), desc)
    }

    pub fn create_pipeline_state_with_root_signature(
        &mut self,
        desc: &PipelineStateDesc,
        root_signature: RootSignatureId,
    ) -> Result<PipelineId> {
        self.pipelines.create_pipeline_state_with(self.backend.as_mut(), desc, root_signature)
    }

    pub fn default_root_signature(&self) -> Option<RootSignatureId> {
        self.pipelines.default_root_signature()
    }

    pub fn pipelines(&self) -> &PipelineCache {
        &self.pipelines
    }

    // ------------------------------------------------------------ 查询

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn adapter_info(&self) -> AdapterInfo {
        self.backend.adapter_info()
    }

    /// 适配器本地显存的当前占用（字节）
    pub fn adapter_memory_usage(&self) -> Result<u64> {
        self.backend.adapter_memory_usage()
    }

    /// 渲染器创建的纹理和缓冲区占用的显存（字节）
    pub fn video_memory_used(&self) -> u64 {
        self.resources.video_memory()
    }

    pub fn srv_stats(&self) -> DescriptorHeapStats {
        self.resources.srv_stats()
    }

    pub fn render_target_size(&self) -> (u32, u32) {
        (self.targets.width, self.targets.height)
    }

    pub fn backbuffer_count(&self) -> u32 {
        self.config.backbuffers
    }

    /// 下一帧将使用的后缓冲索引
    pub fn backbuffer_index(&self) -> u32 {
        self.backend.current_backbuffer_index()
    }

    /// 当前渲染目标尺寸的像素空间正交投影
    pub fn ortho_projection(&self) -> Matrix4 {
        self.targets.projection
    }

    pub fn frames_submitted(&self) -> u64 {
        self.sync.frames_submitted()
    }

    /// 最近一次 `start_frame` 的帧序号
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// 开始录制时因槽位仍在执行而阻塞的次数
    pub fn frame_waits(&self) -> u64 {
        self.sync.blocking_waits()
    }

    /// 等待 GPU 完成后才能销毁的对象数
    pub fn pending_releases(&self) -> usize {
        self.resources.deferred.pending()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.flush_commands() {
            error!(error = %e, "Couldn't flush GPU work during shutdown");
        }

        drop(self.targets.depth.take());
        for item in self.resources.deferred.drain_all() {
            self.resources.destroy(self.backend.as_mut(), item);
        }
        self.pipelines.release_all(self.backend.as_mut());
        self.targets.release(self.backend.as_mut());
        self.resources.release_internal(self.backend.as_mut());
        self.sync.release(self.backend.as_mut());

        info!(frames = self.sync.frames_submitted(), "Renderer shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::{HeadlessBackend, HeadlessProbe, PrimitiveTopology, QueueKind};

    fn bytecode(tag: &[u8]) -> Vec<u8> {
        let mut bytes = b"DXBC".to_vec();
        bytes.extend_from_slice(tag);
        bytes
    }

    fn renderer(latency: usize, width: u32, height: u32) -> (Renderer, HeadlessProbe) {
        let backend = HeadlessBackend::new(latency);
        let probe = backend.probe();
        let config = RendererConfig::default().with_root_signature(bytecode(b"root"));
        let renderer =
            Renderer::with_backend(Box::new(backend), config, SurfaceTarget::Offscreen { width, height }).unwrap();
        (renderer, probe)
    }

    #[test]
    fn test_empty_frames_present_cleanly() {
        let (mut renderer, probe) = renderer(2, 64, 48);

        for expected in 1..=6u64 {
            let frame = renderer.start_frame().unwrap().unwrap();
            assert_eq!(frame.number(), expected);
            let stats = frame.end().unwrap();
            assert_eq!(stats.draw_calls, 0);
        }
        renderer.flush_commands().unwrap();

        assert_eq!(renderer.frames_submitted(), 6);
        assert_eq!(probe.presents(), 6);
        assert_eq!(probe.validation_errors(), 0, "{:?}", probe.last_validation_error());
    }

    #[test]
    fn test_backbuffer_index_cycles() {
        let (mut renderer, _probe) = renderer(0, 32, 32);
        let mut seen = Vec::new();
        for _ in 0..4 {
            let frame = renderer.start_frame().unwrap().unwrap();
            seen.push(frame.backbuffer_index());
            frame.end().unwrap();
        }
        assert_eq!(seen, vec![0, 1, 0, 1]);
    }

    #[test]
    fn test_resize_updates_targets() {
        let (mut renderer, probe) = renderer(2, 64, 64);
        renderer.start_frame().unwrap().unwrap().end().unwrap();

        renderer.resize(200, 100).unwrap();
        assert_eq!(renderer.render_target_size(), (200, 100));

        let mut frame = renderer.start_frame().unwrap().unwrap();
        assert!(frame.push_viewport(0.0, 0.0, 200.0, 100.0));
        assert_eq!(frame.current_viewport(), PixelRect::from_size(200, 100));
        frame.pop_viewport();
        frame.end().unwrap();

        renderer.flush_commands().unwrap();
        assert_eq!(probe.validation_errors(), 0, "{:?}", probe.last_validation_error());
    }

    #[test]
    fn test_zero_size_suspends_frames() {
        let (mut renderer, probe) = renderer(0, 64, 64);

        renderer.resize(0, 64).unwrap();
        assert!(!renderer.backbuffer_ready());
        assert!(renderer.start_frame().unwrap().is_none());
        // 旧的渲染目标保持不变
        assert_eq!(renderer.render_target_size(), (64, 64));

        renderer.resize(64, 64).unwrap();
        renderer.start_frame().unwrap().unwrap().end().unwrap();
        assert_eq!(probe.presents(), 1);
    }

    #[test]
    fn test_unpresentable_surface_skips_frames() {
        let (mut renderer, probe) = renderer(0, 64, 64);
        probe.set_presentable(false);
        assert!(renderer.start_frame().unwrap().is_none());

        probe.set_presentable(true);
        assert!(renderer.start_frame().unwrap().is_some());
    }

    #[test]
    fn test_second_flush_does_not_block() {
        let (mut renderer, probe) = renderer(3, 64, 64);
        for _ in 0..3 {
            renderer.start_frame().unwrap().unwrap().end().unwrap();
        }

        renderer.flush_commands().unwrap();
        let waits = probe.blocking_waits();
        renderer.flush_commands().unwrap();
        assert_eq!(probe.blocking_waits(), waits);
    }

    #[test]
    fn test_textured_draw() {
        let (mut renderer, probe) = renderer(2, 128, 128);
        let pipeline = renderer
            .create_pipeline_state(&PipelineStateDesc::new(bytecode(b"vs"), bytecode(b"ps")))
            .unwrap();

        let mut texture = renderer.resources().texture_new_2d(TextureFormat::Rgba8Unorm, 4, 4, 1).unwrap();
        renderer
            .resources()
            .texture_write_pixels(&mut texture, TextureRegion::new(0, 0, 4, 4), TextureFormat::Rgba8Unorm, &[0xAB; 64])
            .unwrap();

        let mut frame = renderer.start_frame().unwrap().unwrap();
        frame.set_pipeline_state(pipeline).unwrap();
        frame.set_primitive_topology(PrimitiveTopology::TriangleList);
        frame.set_root_constant_ortho_proj(0, 0).unwrap();
        frame.set_root_constant_color(0, &Color::from_rgba_u32(0xFFFFFFFF), 64).unwrap();
        frame.set_texture(0, &texture).unwrap();
        assert!(frame.push_scissor(10, 10, 50, 50));
        frame.draw_instanced(6, 2, 0, 0);
        frame.pop_scissor();
        let stats = frame.end().unwrap();
        renderer.flush_commands().unwrap();

        assert_eq!(stats.draw_calls, 1);
        assert_eq!(stats.vertices, 12);
        assert_eq!(probe.draws(), 1);
        assert_eq!(probe.vertices(), 12);
        assert_eq!(probe.validation_errors(), 0, "{:?}", probe.last_validation_error());
    }

    #[test]
    fn test_copy_waits_for_frames_in_flight() {
        let (mut renderer, probe) = renderer(2, 64, 64);
        let mut texture = renderer.resources().texture_new_2d(TextureFormat::R8Unorm, 4, 4, 1).unwrap();
        let direct_fence = renderer.sync.timeline().fence().as_raw();

        let mut frame = renderer.start_frame().unwrap().unwrap();
        frame.set_texture(0, &texture).unwrap();
        frame.end().unwrap();
        let in_flight = renderer.sync.timeline().last_signaled();
        assert!(!renderer.sync.timeline().is_complete(renderer.backend.as_ref(), in_flight));

        renderer
            .resources()
            .texture_write_pixels(&mut texture, TextureRegion::new(0, 0, 4, 4), TextureFormat::R8Unorm, &[7; 16])
            .unwrap();
        // 复制队列先等待采样这张纹理的帧
        assert_eq!(probe.gpu_waits(QueueKind::Copy), vec![(direct_fence, in_flight.value())]);

        renderer.flush_commands().unwrap();
        assert_eq!(renderer.resources().texture_read_pixels(&texture, 0).unwrap(), vec![7; 16]);

        // GPU 空闲时不需要等待
        renderer
            .resources()
            .texture_write_pixels(&mut texture, TextureRegion::new(0, 0, 4, 4), TextureFormat::R8Unorm, &[9; 16])
            .unwrap();
        assert_eq!(probe.gpu_waits(QueueKind::Copy).len(), 1);
        renderer.flush_commands().unwrap();
        assert_eq!(probe.validation_errors(), 0, "{:?}", probe.last_validation_error());
    }

    #[test]
    fn test_failed_resize_can_be_retried() {
        let (mut renderer, probe) = renderer(2, 64, 48);
        renderer.start_frame().unwrap().unwrap().end().unwrap();

        // 超出设备限制的尺寸在销毁任何对象之前就被拒绝
        assert!(renderer.resize(100_000, 48).is_err());
        assert_eq!(renderer.render_target_size(), (64, 48));
        renderer.start_frame().unwrap().unwrap().end().unwrap();

        probe.set_fail_resizes(true);
        assert!(renderer.resize(80, 60).is_err());
        assert!(!renderer.backbuffer_ready());
        assert!(renderer.start_frame().unwrap().is_none());

        // 回到原来的尺寸同样完整重建
        probe.set_fail_resizes(false);
        renderer.resize(64, 48).unwrap();
        assert_eq!(renderer.render_target_size(), (64, 48));
        renderer.start_frame().unwrap().unwrap().end().unwrap();
        renderer.flush_commands().unwrap();

        assert_eq!(probe.presents(), 3);
        assert_eq!(probe.validation_errors(), 0, "{:?}", probe.last_validation_error());
    }

    #[test]
    fn test_failed_present_keeps_the_submitted_frame() {
        let (mut renderer, probe) = renderer(0, 64, 64);
        probe.set_fail_presents(true);
        let frame = renderer.start_frame().unwrap().unwrap();
        let err = frame.end().unwrap_err();
        assert!(err.is_fatal());

        // 命令列表已经执行，栅栏照常推进
        assert_eq!(probe.executed_lists(), 1);
        assert_eq!(probe.presents(), 0);
        assert_eq!(renderer.frames_submitted(), 1);

        probe.set_fail_presents(false);
        renderer.start_frame().unwrap().unwrap().end().unwrap();
        renderer.flush_commands().unwrap();
        assert_eq!(probe.presents(), 1);
        assert_eq!(probe.validation_errors(), 0, "{:?}", probe.last_validation_error());
    }

    #[test]
    fn test_user_descriptor_heap_binding() {
        let (mut renderer, probe) = renderer(0, 64, 64);
        let pipeline = renderer
            .create_pipeline_state(&PipelineStateDesc::new(bytecode(b"vs"), bytecode(b"ps")))
            .unwrap();
        let texture = renderer.resources().texture_new_2d(TextureFormat::Rgba8Unorm, 4, 4, 1).unwrap();

        let heap = renderer
            .resources()
            .create_descriptor_heap(DescriptorType::ShaderResourceView, 4, true)
            .unwrap();
        renderer.resources().write_texture_descriptor(&heap, 2, &texture).unwrap();
        assert!(renderer.resources().write_texture_descriptor(&heap, 4, &texture).is_err());
        let samplers = renderer.resources().create_descriptor_heap(DescriptorType::Sampler, 4, true).unwrap();
        assert!(renderer.resources().write_texture_descriptor(&samplers, 0, &texture).is_err());

        let mut frame = renderer.start_frame().unwrap().unwrap();
        frame.set_pipeline_state(pipeline).unwrap();
        frame.set_primitive_topology(PrimitiveTopology::TriangleList);
        assert!(frame.set_descriptor_heap(&samplers).is_err());
        frame.set_descriptor_heap(&heap).unwrap();
        frame.set_descriptor_table(TEXTURE_ROOT_PARAMETER_BASE, heap.gpu_handle(2).unwrap());
        frame.draw_instanced(3, 1, 0, 0);
        // 切回内置的 SRV 堆
        frame.set_texture(0, &texture).unwrap();
        frame.draw_instanced(3, 1, 0, 0);
        frame.end().unwrap();
        renderer.flush_commands().unwrap();

        assert_eq!(probe.draws(), 2);
        assert_eq!(probe.validation_errors(), 0, "{:?}", probe.last_validation_error());
    }

    #[test]
    fn test_unbalanced_stack_still_presents() {
        let (mut renderer, probe) = renderer(0, 64, 64);
        let mut frame = renderer.start_frame().unwrap().unwrap();
        assert!(frame.push_scissor(0, 0, 10, 10));
        assert!(frame.push_viewport(0.0, 0.0, 8.0, 8.0));
        assert!(frame.push_viewport(2.0, 2.0, 4.0, 4.0));

        let err = frame.end().unwrap_err();
        assert!(matches!(
            err,
            crate::core::error::OverlayError::Graphics(GraphicsError::UnbalancedClipStack { scissors: 1, viewports: 2 })
        ));
        assert!(!err.is_fatal());
        assert_eq!(probe.presents(), 1);
        assert_eq!(renderer.frames_submitted(), 1);
    }

    #[test]
    fn test_dropped_frame_is_not_executed() {
        let (mut renderer, probe) = renderer(0, 64, 64);
        {
            let mut frame = renderer.start_frame().unwrap().unwrap();
            frame.draw_instanced(3, 1, 0, 0);
        }
        assert_eq!(probe.executed_lists(), 0);
        assert_eq!(probe.presents(), 0);

        // 同一个槽位可以继续使用
        renderer.start_frame().unwrap().unwrap().end().unwrap();
        assert_eq!(probe.presents(), 1);
        assert_eq!(probe.validation_errors(), 0, "{:?}", probe.last_validation_error());
    }

    #[test]
    fn test_dropped_resources_are_released_after_gpu_use() {
        let (mut renderer, probe) = renderer(2, 64, 64);
        let baseline = probe.live_resources();

        let texture = renderer.resources().texture_new_2d(TextureFormat::R8Unorm, 16, 16, 1).unwrap();
        let buffer = renderer.resources().create_vertex_buffer(1024).unwrap();
        assert_eq!(probe.live_resources(), baseline + 2);
        let used = renderer.video_memory_used();
        assert!(used >= 256 + 1024);

        let mut frame = renderer.start_frame().unwrap().unwrap();
        frame.set_texture(0, &texture).unwrap();
        drop(texture);
        drop(buffer);
        frame.end().unwrap();
        // 帧还在 GPU 上，只打上了栅栏值
        assert_eq!(probe.live_resources(), baseline + 2);
        assert_eq!(renderer.pending_releases(), 2);

        renderer.flush_commands().unwrap();
        assert_eq!(probe.live_resources(), baseline);
        assert_eq!(renderer.pending_releases(), 0);
        assert_eq!(renderer.video_memory_used(), used - 256 - 1024);
        assert_eq!(renderer.srv_stats().used, 0);
    }

    #[test]
    fn test_root_constant_offset_must_be_aligned() {
        let (mut renderer, probe) = renderer(0, 64, 64);
        let mut frame = renderer.start_frame().unwrap().unwrap();
        assert!(frame.set_root_constant_float(0, 1.0, 6).is_err());
        assert!(frame.set_root_constant_uint(0, 7, 8).is_ok());
        assert!(frame.set_root_constant_bool(0, true, 12).is_ok());
        frame.end().unwrap();
        assert_eq!(probe.validation_errors(), 0, "{:?}", probe.last_validation_error());
    }

    #[test]
    fn test_missing_root_signature_without_default() {
        let backend = HeadlessBackend::new(0);
        let mut renderer = Renderer::with_backend(
            Box::new(backend),
            RendererConfig::default(),
            SurfaceTarget::Offscreen { width: 32, height: 32 },
        )
        .unwrap();

        assert!(renderer.default_root_signature().is_none());
        let err = renderer
            .create_pipeline_state(&PipelineStateDesc::new(bytecode(b"vs"), bytecode(b"ps")))
            .unwrap_err();
        assert!(err.is_fatal());
        renderer.start_frame().unwrap().unwrap().end().unwrap();
    }
}
