//! 无头后端
//!
//! 在 CPU 上模拟图形设备：资源保存在内存里，命令列表按提交顺序在两个模拟队列上执行，
//! 栅栏只有在对应提交真正"执行"之后才会前进。每个队列最多积压 `latency` 个命令列表，
//! 超出时才执行最早的一个，所以帧同步的等待路径在测试中同样会被走到。
//!
//! 执行过程中发现的 API 误用（状态不匹配、使用已释放资源、缺少管线等）不会中断执行，
//! 而是计入 [`HeadlessProbe`] 的校验错误计数，相当于调试层的报错。

mod memory;
mod queue;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::core::error::{GraphicsError, Result};
use super::backend::{GpuBackend, SurfaceTarget};
use super::types::*;

use memory::{ResourceMap, SoftResource, Storage};
use queue::{SoftAllocator, SoftCommand, SoftCommandList, SoftQueue, Submission};

/// 编译后着色器和根签名容器的文件头
const CONTAINER_MAGIC: &[u8; 4] = b"DXBC";

/// 每个描述符堆占用的句柄地址空间
const HEAP_STRIDE: usize = 1 << 26;
const GPU_HEAP_BASE: u64 = 0xD000_0000_0000;
const BUFFER_ADDRESS_BASE: u64 = 0x1_0000_0000;
const BUFFER_ADDRESS_ALIGN: u64 = 64 * 1024;

#[derive(Default)]
struct Counters {
    draws: AtomicU64,
    vertices: AtomicU64,
    presents: AtomicU64,
    executed_lists: AtomicU64,
    blocking_waits: AtomicU64,
    validation_errors: AtomicU64,
    live_resources: AtomicU64,
    presentable: AtomicBool,
    fail_resizes: AtomicBool,
    fail_presents: AtomicBool,
    last_error: Mutex<Option<String>>,
    gpu_waits: Mutex<Vec<(QueueKind, u64, u64)>>,
}

/// 无头后端的观察句柄
///
/// 后端交给渲染器之后，测试通过它读取执行统计、控制交换链是否可呈现。
#[derive(Clone)]
pub struct HeadlessProbe {
    counters: Arc<Counters>,
}

impl HeadlessProbe {
    fn new() -> Self {
        let counters = Counters::default();
        counters.presentable.store(true, Ordering::Relaxed);
        Self { counters: Arc::new(counters) }
    }

    /// 已执行的绘制调用数
    pub fn draws(&self) -> u64 {
        self.counters.draws.load(Ordering::Relaxed)
    }

    /// 已执行绘制的顶点总数（含实例）
    pub fn vertices(&self) -> u64 {
        self.counters.vertices.load(Ordering::Relaxed)
    }

    pub fn presents(&self) -> u64 {
        self.counters.presents.load(Ordering::Relaxed)
    }

    pub fn executed_lists(&self) -> u64 {
        self.counters.executed_lists.load(Ordering::Relaxed)
    }

    /// CPU 真正阻塞等待栅栏的次数
    pub fn blocking_waits(&self) -> u64 {
        self.counters.blocking_waits.load(Ordering::Relaxed)
    }

    pub fn validation_errors(&self) -> u64 {
        self.counters.validation_errors.load(Ordering::Relaxed)
    }

    pub fn last_validation_error(&self) -> Option<String> {
        self.counters.last_error.lock().ok().and_then(|e| e.clone())
    }

    /// 存活的资源数（纹理、缓冲区、后缓冲）
    pub fn live_resources(&self) -> u64 {
        self.counters.live_resources.load(Ordering::Relaxed)
    }

    /// 模拟窗口最小化或遮挡
    pub fn set_presentable(&self, presentable: bool) {
        self.counters.presentable.store(presentable, Ordering::Relaxed);
    }

    /// 某个队列上排入的 GPU 侧等待 (栅栏, 值)，按提交顺序
    pub fn gpu_waits(&self, queue: QueueKind) -> Vec<(u64, u64)> {
        self.counters
            .gpu_waits
            .lock()
            .map(|waits| waits.iter().filter(|w| w.0 == queue).map(|w| (w.1, w.2)).collect())
            .unwrap_or_default()
    }

    /// 模拟 ResizeBuffers 失败（例如显存不足），失败时原来的缓冲保持不变
    pub fn set_fail_resizes(&self, fail: bool) {
        self.counters.fail_resizes.store(fail, Ordering::Relaxed);
    }

    /// 模拟 Present 失败（例如设备丢失），失败时不切换后缓冲
    pub fn set_fail_presents(&self, fail: bool) {
        self.counters.fail_presents.store(fail, Ordering::Relaxed);
    }

    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

struct SoftHeap {
    kind: DescriptorType,
    capacity: u32,
    cpu_start: usize,
    gpu_start: Option<u64>,
    increment: u32,
}

impl SoftHeap {
    fn contains_cpu(&self, ptr: usize) -> bool {
        ptr >= self.cpu_start && ptr < self.cpu_start + self.capacity as usize * self.increment as usize
    }

    fn cpu_for_gpu(&self, ptr: u64) -> Option<usize> {
        let start = self.gpu_start?;
        let end = start + self.capacity as u64 * self.increment as u64;
        (ptr >= start && ptr < end).then(|| self.cpu_start + (ptr - start) as usize)
    }
}

struct SoftPipeline {
    root_signature: u64,
    topology: PrimitiveTopologyType,
    render_target_format: TextureFormat,
}

struct SoftSwapchain {
    backbuffers: Vec<u64>,
    index: u32,
    format: TextureFormat,
}

/// 一个命令列表执行期间的绑定状态
#[derive(Default)]
struct BoundState {
    heap: Option<u64>,
    root_signature: Option<u64>,
    pipeline: Option<u64>,
    render_target: Option<u64>,
    topology: Option<PrimitiveTopology>,
    viewport: bool,
    scissor: bool,
}

/// CPU 模拟的图形后端
pub struct HeadlessBackend {
    next_id: u64,
    next_address: u64,
    latency: usize,
    resources: ResourceMap,
    heaps: HashMap<u64, SoftHeap>,
    views: HashMap<usize, u64>,
    fences: HashMap<u64, u64>,
    allocators: HashMap<u64, SoftAllocator>,
    lists: HashMap<u64, SoftCommandList>,
    root_signatures: HashMap<u64, usize>,
    pipelines: HashMap<u64, SoftPipeline>,
    direct: SoftQueue,
    copy: SoftQueue,
    names: HashMap<RawObject, String>,
    swapchain: Option<SoftSwapchain>,
    probe: HeadlessProbe,
}

impl HeadlessBackend {
    /// 创建无头后端
    ///
    /// # 参数
    /// * `latency` - 每个队列允许积压的命令列表数，0 表示提交后立即执行
    pub fn new(latency: usize) -> Self {
        info!(latency, "Initializing headless backend");
        Self {
            next_id: 1,
            next_address: BUFFER_ADDRESS_BASE,
            latency,
            resources: HashMap::new(),
            heaps: HashMap::new(),
            views: HashMap::new(),
            fences: HashMap::new(),
            allocators: HashMap::new(),
            lists: HashMap::new(),
            root_signatures: HashMap::new(),
            pipelines: HashMap::new(),
            direct: SoftQueue::default(),
            copy: SoftQueue::default(),
            names: HashMap::new(),
            swapchain: None,
            probe: HeadlessProbe::new(),
        }
    }

    pub fn probe(&self) -> HeadlessProbe {
        self.probe.clone()
    }

    /// 直接读取纹理子资源（紧密排列），绕过命令队列
    pub fn texture_contents(&self, resource: RawResource, subresource: u32) -> Option<Vec<u8>> {
        match &self.resources.get(&resource.as_raw())?.storage {
            Storage::Texture { subresources, .. } => subresources.get(subresource as usize).cloned(),
            Storage::Buffer { .. } => None,
        }
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn queue(&self, kind: QueueKind) -> &SoftQueue {
        match kind {
            QueueKind::Direct => &self.direct,
            QueueKind::Copy => &self.copy,
        }
    }

    fn queue_mut(&mut self, kind: QueueKind) -> &mut SoftQueue {
        match kind {
            QueueKind::Direct => &mut self.direct,
            QueueKind::Copy => &mut self.copy,
        }
    }

    fn fence_value(&self, fence: u64) -> u64 {
        self.fences.get(&fence).copied().unwrap_or(0)
    }

    fn validation_error(&self, message: String) {
        warn!(error = %message, "Headless validation error");
        HeadlessProbe::bump(&self.probe.counters.validation_errors, 1);
        if let Ok(mut last) = self.probe.counters.last_error.lock() {
            *last = Some(message);
        }
    }

    /// 执行队列头部的一项提交，队列为空或被 GPU 侧等待阻塞时返回 false
    fn step(&mut self, kind: QueueKind) -> bool {
        let blocked = match self.queue(kind).front() {
            None => return false,
            Some(Submission::Wait { fence, value }) => self.fence_value(*fence) < *value,
            Some(_) => false,
        };
        if blocked {
            return false;
        }
        let Some(submission) = self.queue_mut(kind).pop() else {
            return false;
        };

        match submission {
            Submission::Execute { allocator, commands } => {
                self.run(kind, commands);
                if let Some(alloc) = self.allocators.get_mut(&allocator) {
                    alloc.in_flight = alloc.in_flight.saturating_sub(1);
                }
                HeadlessProbe::bump(&self.probe.counters.executed_lists, 1);
            }
            Submission::Signal { fence, value } => match self.fences.get_mut(&fence) {
                Some(current) => *current = value,
                None => self.validation_error(format!("signal on released fence {fence}")),
            },
            Submission::Wait { .. } => {}
            Submission::Present { backbuffer } => self.execute_present(backbuffer),
        }
        true
    }

    /// 让队列积压不超过 `latency`，并完成头部已经可以完成的 signal/present
    fn throttle(&mut self, kind: QueueKind) {
        while self.queue(kind).pending_executes() > self.latency {
            let progressed = self.step(kind) || self.step(other_queue(kind));
            if !progressed {
                break;
            }
        }
        while matches!(
            self.queue(kind).front(),
            Some(Submission::Signal { .. } | Submission::Wait { .. } | Submission::Present { .. })
        ) {
            if !self.step(kind) {
                break;
            }
        }
    }

    fn execute_present(&mut self, backbuffer: u64) {
        match self.resources.get(&backbuffer) {
            Some(res) if same_state(res.state, ResourceState::Present) => {
                HeadlessProbe::bump(&self.probe.counters.presents, 1);
            }
            Some(res) => {
                let state = res.state;
                self.validation_error(format!("presented backbuffer {backbuffer} is in {state:?}, expected Present"));
            }
            None => self.validation_error(format!("presented backbuffer {backbuffer} was released")),
        }
    }

    fn run(&mut self, queue: QueueKind, commands: Vec<SoftCommand>) {
        let mut bound = BoundState::default();
        for command in commands {
            if let Err(message) = self.apply(queue, &mut bound, command) {
                self.validation_error(message);
            }
        }
    }

    fn resource_for_view(&self, ptr: usize) -> std::result::Result<u64, String> {
        let id = *self.views.get(&ptr).ok_or_else(|| format!("no view at descriptor {ptr:#x}"))?;
        if self.resources.contains_key(&id) {
            Ok(id)
        } else {
            Err(format!("view at descriptor {ptr:#x} refers to released resource {id}"))
        }
    }

    fn expect_state(&self, id: u64, expected: ResourceState) -> std::result::Result<(), String> {
        let res = self.resources.get(&id).ok_or_else(|| format!("resource {id} was released"))?;
        if same_state(res.state, expected) {
            Ok(())
        } else {
            Err(format!("resource {id} is in {:?}, expected {expected:?}", res.state))
        }
    }

    fn apply(&mut self, queue: QueueKind, bound: &mut BoundState, command: SoftCommand) -> std::result::Result<(), String> {
        if queue == QueueKind::Copy && !command.is_copy() {
            return Err(format!("{command:?} is not allowed on the copy queue"));
        }

        match command {
            SoftCommand::Transition { resource, before, after } => {
                let res = self
                    .resources
                    .get_mut(&resource)
                    .ok_or_else(|| format!("transition of released resource {resource}"))?;
                if !same_state(res.state, before) {
                    return Err(format!(
                        "transition of resource {resource} from {before:?} but it is in {:?}",
                        res.state
                    ));
                }
                res.state = after;
            }
            SoftCommand::SetDescriptorHeap(heap) => {
                let info = self.heaps.get(&heap).ok_or_else(|| format!("descriptor heap {heap} was released"))?;
                if info.gpu_start.is_none() {
                    return Err(format!("descriptor heap {heap} is not shader visible"));
                }
                bound.heap = Some(heap);
            }
            SoftCommand::SetRootSignature(sig) => {
                if !self.root_signatures.contains_key(&sig) {
                    return Err(format!("root signature {sig} was released"));
                }
                bound.root_signature = Some(sig);
            }
            SoftCommand::SetPipelineState(pso) => {
                if !self.pipelines.contains_key(&pso) {
                    return Err(format!("pipeline {pso} was released"));
                }
                bound.pipeline = Some(pso);
            }
            SoftCommand::SetRenderTarget { rtv, dsv } => {
                let target = self.resource_for_view(rtv)?;
                if let Some(dsv) = dsv {
                    let depth = self.resource_for_view(dsv)?;
                    self.expect_state(depth, ResourceState::DepthWrite)?;
                }
                bound.render_target = Some(target);
            }
            SoftCommand::ClearRenderTarget { rtv, color } => {
                let target = self.resource_for_view(rtv)?;
                self.expect_state(target, ResourceState::RenderTarget)?;
                let format = self.resources[&target]
                    .texture_desc()
                    .map(|d| d.format)
                    .ok_or_else(|| format!("render target {target} is not a texture"))?;
                memory::fill_texture(&mut self.resources, target, &memory::encode_color(format, color))?;
            }
            SoftCommand::ClearDepth { dsv, depth } => {
                let target = self.resource_for_view(dsv)?;
                self.expect_state(target, ResourceState::DepthWrite)?;
                memory::fill_texture(&mut self.resources, target, &depth.to_le_bytes())?;
            }
            SoftCommand::SetViewport(vp) => {
                if vp.width <= 0.0 || vp.height <= 0.0 {
                    return Err(format!("degenerate viewport {vp:?}"));
                }
                bound.viewport = true;
            }
            SoftCommand::SetScissor(rect) => {
                if rect.right < rect.left || rect.bottom < rect.top {
                    return Err(format!("inverted scissor rect {rect:?}"));
                }
                bound.scissor = true;
            }
            SoftCommand::SetRootConstants { index, count, offset } => {
                if bound.root_signature.is_none() {
                    return Err(format!("root constants at parameter {index} set without a root signature"));
                }
                if count == 0 || offset + count > 64 {
                    return Err(format!("root constants {count} at offset {offset} exceed the root signature limit"));
                }
            }
            SoftCommand::SetDescriptorTable { index, base } => {
                let heap = bound.heap.ok_or_else(|| format!("descriptor table {index} set without a heap"))?;
                let cpu = self
                    .heaps
                    .get(&heap)
                    .and_then(|h| h.cpu_for_gpu(base))
                    .ok_or_else(|| format!("descriptor table {index} base {base:#x} is outside the bound heap"))?;
                self.resource_for_view(cpu)?;
            }
            SoftCommand::SetVertexBuffers { slot, views } => {
                for (i, view) in views.iter().enumerate() {
                    if !self.buffer_covers(view.address, view.size as u64) {
                        return Err(format!(
                            "vertex buffer slot {} at {:#x} does not refer to a live buffer",
                            slot as usize + i,
                            view.address
                        ));
                    }
                }
            }
            SoftCommand::SetPrimitiveTopology(topology) => bound.topology = Some(topology),
            SoftCommand::Draw { vertex_count, instance_count } => {
                self.validate_draw(bound)?;
                HeadlessProbe::bump(&self.probe.counters.draws, 1);
                HeadlessProbe::bump(&self.probe.counters.vertices, vertex_count as u64 * instance_count as u64);
            }
            SoftCommand::CopyBufferToTexture { src, footprint, dst, subresource, origin } => {
                memory::copy_buffer_to_texture(&mut self.resources, src, &footprint, dst, subresource, origin)?;
            }
            SoftCommand::CopyTextureToBuffer { src, subresource, dst, footprint } => {
                memory::copy_texture_to_buffer(&mut self.resources, src, subresource, dst, &footprint)?;
            }
            SoftCommand::CopyTextureSubresource { src, dst, subresource } => {
                memory::copy_subresource(&mut self.resources, src, dst, subresource)?;
            }
            SoftCommand::CopyResource { src, dst } => {
                memory::copy_resource(&mut self.resources, src, dst)?;
            }
        }
        Ok(())
    }

    fn validate_draw(&self, bound: &BoundState) -> std::result::Result<(), String> {
        let pso = bound.pipeline.ok_or("draw without a pipeline state")?;
        let sig = bound.root_signature.ok_or("draw without a root signature")?;
        let pipeline = self.pipelines.get(&pso).ok_or("draw with a released pipeline")?;
        if pipeline.root_signature != sig {
            return Err(format!("pipeline {pso} was built for root signature {}, bound {sig}", pipeline.root_signature));
        }
        let topology = bound.topology.ok_or("draw without a primitive topology")?;
        if topology.topology_type() != pipeline.topology {
            return Err(format!("topology {topology:?} does not match pipeline type {:?}", pipeline.topology));
        }
        let target = bound.render_target.ok_or("draw without a render target")?;
        self.expect_state(target, ResourceState::RenderTarget)?;
        if let Some(desc) = self.resources.get(&target).and_then(|r| r.texture_desc()) {
            if desc.format != pipeline.render_target_format {
                return Err(format!(
                    "render target format {} does not match pipeline format {}",
                    desc.format, pipeline.render_target_format
                ));
            }
        }
        if !bound.viewport || !bound.scissor {
            return Err("draw without viewport and scissor".to_string());
        }
        Ok(())
    }

    fn buffer_covers(&self, address: u64, size: u64) -> bool {
        self.resources.values().any(|res| match &res.storage {
            Storage::Buffer { address: start, data, .. } => {
                address >= *start && address + size <= *start + data.len() as u64
            }
            Storage::Texture { .. } => false,
        })
    }

    fn heap_containing(&self, ptr: usize, kind: DescriptorType) -> bool {
        self.heaps.values().any(|h| h.kind == kind && h.contains_cpu(ptr))
    }

    fn create_view(&mut self, kind: DescriptorType, resource: RawResource, handle: CpuDescriptorHandle) {
        if !self.heap_containing(handle.ptr, kind) {
            self.validation_error(format!("{} written outside any {} heap", kind.name(), kind.name()));
            return;
        }
        if !self.resources.contains_key(&resource.as_raw()) {
            self.validation_error(format!("{} created for released resource {}", kind.name(), resource.as_raw()));
            return;
        }
        self.views.insert(handle.ptr, resource.as_raw());
    }

    fn insert_resource(&mut self, resource: SoftResource) -> RawResource {
        let id = self.allocate_id();
        self.resources.insert(id, resource);
        HeadlessProbe::bump(&self.probe.counters.live_resources, 1);
        RawResource::from_raw(id)
    }

    fn remove_resource(&mut self, id: u64) -> bool {
        let removed = self.resources.remove(&id).is_some();
        if removed {
            self.probe.counters.live_resources.fetch_sub(1, Ordering::Relaxed);
        }
        removed
    }

    fn buffer_mut(&mut self, buffer: RawResource, allowed: &[HeapKind]) -> Result<&mut Vec<u8>> {
        match self.resources.get_mut(&buffer.as_raw()).map(|r| &mut r.storage) {
            Some(Storage::Buffer { heap, data, .. }) if allowed.contains(heap) => Ok(data),
            Some(_) => Err(GraphicsError::InvalidArgument(format!(
                "resource {} is not a CPU-mappable buffer",
                buffer.as_raw()
            ))
            .into()),
            None => Err(GraphicsError::InvalidArgument(format!("buffer {} was released", buffer.as_raw())).into()),
        }
    }
}

fn other_queue(kind: QueueKind) -> QueueKind {
    match kind {
        QueueKind::Direct => QueueKind::Copy,
        QueueKind::Copy => QueueKind::Direct,
    }
}

/// COMMON 与 PRESENT 是同一个状态
fn same_state(a: ResourceState, b: ResourceState) -> bool {
    let normalize = |s| match s {
        ResourceState::Present => ResourceState::Common,
        other => other,
    };
    normalize(a) == normalize(b)
}

fn check_bytecode(kind: &str, bytes: &[u8]) -> std::result::Result<(), String> {
    if bytes.len() < CONTAINER_MAGIC.len() || &bytes[..4] != CONTAINER_MAGIC {
        Err(format!("{kind} is not a compiled shader container"))
    } else {
        Ok(())
    }
}

impl GpuBackend for HeadlessBackend {
    fn name(&self) -> &'static str {
        "headless"
    }

    fn adapter_info(&self) -> AdapterInfo {
        AdapterInfo {
            description: "Headless software adapter".to_string(),
            dedicated_video_memory: 0,
            feature_level: "12_0".to_string(),
        }
    }

    fn adapter_memory_usage(&self) -> Result<u64> {
        Ok(self
            .resources
            .values()
            .filter(|r| r.heap() == HeapKind::Default)
            .map(|r| r.byte_len())
            .sum())
    }

    fn create_fence(&mut self, initial: u64) -> Result<RawFence> {
        let id = self.allocate_id();
        self.fences.insert(id, initial);
        Ok(RawFence::from_raw(id))
    }

    fn fence_completed_value(&self, fence: RawFence) -> u64 {
        self.fence_value(fence.as_raw())
    }

    fn signal(&mut self, queue: QueueKind, fence: RawFence, value: u64) -> Result<()> {
        if !self.fences.contains_key(&fence.as_raw()) {
            return Err(GraphicsError::InvalidArgument(format!("fence {} does not exist", fence.as_raw())).into());
        }
        self.queue_mut(queue).push(Submission::Signal { fence: fence.as_raw(), value });
        self.throttle(queue);
        Ok(())
    }

    fn queue_wait(&mut self, queue: QueueKind, fence: RawFence, value: u64) -> Result<()> {
        if !self.fences.contains_key(&fence.as_raw()) {
            return Err(GraphicsError::InvalidArgument(format!("fence {} does not exist", fence.as_raw())).into());
        }
        if let Ok(mut waits) = self.probe.counters.gpu_waits.lock() {
            waits.push((queue, fence.as_raw(), value));
        }
        self.queue_mut(queue).push(Submission::Wait { fence: fence.as_raw(), value });
        self.throttle(queue);
        Ok(())
    }

    fn wait_for_fence(&mut self, fence: RawFence, value: u64) -> Result<()> {
        let id = fence.as_raw();
        if self.fence_value(id) >= value {
            return Ok(());
        }
        HeadlessProbe::bump(&self.probe.counters.blocking_waits, 1);
        while self.fence_value(id) < value {
            let progressed = self.step(QueueKind::Direct) | self.step(QueueKind::Copy);
            if !progressed {
                return Err(GraphicsError::CommandExecution(format!(
                    "fence {id} is at {} and no queued signal will reach {value}",
                    self.fence_value(id)
                ))
                .into());
            }
        }
        Ok(())
    }

    fn create_command_allocator(&mut self, queue: QueueKind) -> Result<RawCommandAllocator> {
        let id = self.allocate_id();
        self.allocators.insert(id, SoftAllocator { queue, in_flight: 0, recording: None });
        Ok(RawCommandAllocator::from_raw(id))
    }

    fn create_command_list(&mut self, queue: QueueKind, allocator: RawCommandAllocator) -> Result<RawCommandList> {
        match self.allocators.get(&allocator.as_raw()) {
            Some(alloc) if alloc.queue == queue => {}
            _ => {
                return Err(GraphicsError::InvalidArgument(format!(
                    "allocator {} cannot back a {} command list",
                    allocator.as_raw(),
                    queue.name()
                ))
                .into())
            }
        }
        let id = self.allocate_id();
        self.lists.insert(
            id,
            SoftCommandList { queue, allocator: allocator.as_raw(), open: false, commands: Vec::new() },
        );
        Ok(RawCommandList::from_raw(id))
    }

    fn reset_command_allocator(&mut self, allocator: RawCommandAllocator) -> Result<()> {
        let alloc = self
            .allocators
            .get(&allocator.as_raw())
            .ok_or_else(|| GraphicsError::InvalidArgument(format!("allocator {} does not exist", allocator.as_raw())))?;
        if alloc.in_flight > 0 {
            return Err(GraphicsError::CommandExecution(format!(
                "allocator {} reset while {} command list(s) are still executing",
                allocator.as_raw(),
                alloc.in_flight
            ))
            .into());
        }
        if let Some(list) = alloc.recording {
            return Err(GraphicsError::CommandExecution(format!(
                "allocator {} reset while command list {list} is recording",
                allocator.as_raw()
            ))
            .into());
        }
        Ok(())
    }

    fn reset_command_list(&mut self, list: RawCommandList, allocator: RawCommandAllocator) -> Result<()> {
        let (list_id, alloc_id) = (list.as_raw(), allocator.as_raw());
        let cmd_list = self
            .lists
            .get(&list_id)
            .ok_or_else(|| GraphicsError::InvalidArgument(format!("command list {list_id} does not exist")))?;
        if cmd_list.open {
            return Err(GraphicsError::CommandExecution(format!("command list {list_id} reset while open")).into());
        }
        let queue = cmd_list.queue;
        let previous = cmd_list.allocator;

        let alloc = self
            .allocators
            .get_mut(&alloc_id)
            .ok_or_else(|| GraphicsError::InvalidArgument(format!("allocator {alloc_id} does not exist")))?;
        if alloc.queue != queue {
            return Err(GraphicsError::InvalidArgument(format!(
                "allocator {alloc_id} belongs to the {} queue",
                alloc.queue.name()
            ))
            .into());
        }
        if let Some(other) = alloc.recording {
            return Err(GraphicsError::CommandExecution(format!(
                "allocator {alloc_id} is already recording command list {other}"
            ))
            .into());
        }
        alloc.recording = Some(list_id);

        if previous != alloc_id {
            if let Some(prev) = self.allocators.get_mut(&previous) {
                if prev.recording == Some(list_id) {
                    prev.recording = None;
                }
            }
        }
        if let Some(cmd_list) = self.lists.get_mut(&list_id) {
            cmd_list.open = true;
            cmd_list.allocator = alloc_id;
            cmd_list.commands.clear();
        }
        Ok(())
    }

    fn record(&mut self, list: RawCommandList, command: GpuCommand<'_>) {
        let command = SoftCommand::from(command);
        let error = match self.lists.get_mut(&list.as_raw()) {
            Some(cmd_list) if cmd_list.open => {
                if cmd_list.queue == QueueKind::Copy && !command.is_copy() {
                    Some(format!("{command:?} recorded on a copy command list"))
                } else {
                    cmd_list.commands.push(command);
                    None
                }
            }
            Some(_) => Some(format!("{command:?} recorded on closed command list {}", list.as_raw())),
            None => Some(format!("{command:?} recorded on released command list {}", list.as_raw())),
        };
        if let Some(message) = error {
            self.validation_error(message);
        }
    }

    fn close_command_list(&mut self, list: RawCommandList) -> Result<()> {
        let cmd_list = self
            .lists
            .get_mut(&list.as_raw())
            .ok_or_else(|| GraphicsError::InvalidArgument(format!("command list {} does not exist", list.as_raw())))?;
        if !cmd_list.open {
            return Err(GraphicsError::CommandExecution(format!("command list {} closed twice", list.as_raw())).into());
        }
        cmd_list.open = false;
        let alloc_id = cmd_list.allocator;
        if let Some(alloc) = self.allocators.get_mut(&alloc_id) {
            alloc.recording = None;
        }
        Ok(())
    }

    fn execute_command_list(&mut self, queue: QueueKind, list: RawCommandList) -> Result<()> {
        let cmd_list = self
            .lists
            .get(&list.as_raw())
            .ok_or_else(|| GraphicsError::InvalidArgument(format!("command list {} does not exist", list.as_raw())))?;
        if cmd_list.open {
            return Err(GraphicsError::CommandExecution(format!(
                "command list {} executed before being closed",
                list.as_raw()
            ))
            .into());
        }
        if cmd_list.queue != queue {
            return Err(GraphicsError::CommandExecution(format!(
                "{} command list submitted to the {} queue",
                cmd_list.queue.name(),
                queue.name()
            ))
            .into());
        }
        let allocator = cmd_list.allocator;
        let commands = cmd_list.commands.clone();
        if let Some(alloc) = self.allocators.get_mut(&allocator) {
            alloc.in_flight += 1;
        }
        self.queue_mut(queue).push(Submission::Execute { allocator, commands });
        self.throttle(queue);
        Ok(())
    }

    fn create_descriptor_heap(
        &mut self,
        kind: DescriptorType,
        capacity: u32,
        shader_visible: bool,
    ) -> Result<DescriptorHeapInfo> {
        if capacity == 0 {
            return Err(GraphicsError::InvalidArgument(format!("{} heap with zero capacity", kind.name())).into());
        }
        if shader_visible && !kind.can_be_shader_visible() {
            return Err(GraphicsError::InvalidArgument(format!("{} heaps cannot be shader visible", kind.name())).into());
        }
        let increment = match kind {
            DescriptorType::DepthStencilView => 8,
            _ => 32,
        };
        if capacity as usize * increment as usize > HEAP_STRIDE {
            return Err(GraphicsError::ResourceCreation(format!(
                "{} heap of {capacity} descriptors is too large",
                kind.name()
            ))
            .into());
        }

        let id = self.allocate_id();
        let cpu_start = id as usize * HEAP_STRIDE;
        let gpu_start = shader_visible.then(|| GPU_HEAP_BASE + id * HEAP_STRIDE as u64);
        self.heaps.insert(id, SoftHeap { kind, capacity, cpu_start, gpu_start, increment });
        debug!(kind = kind.name(), capacity, shader_visible, "Descriptor heap created");

        Ok(DescriptorHeapInfo {
            raw: RawDescriptorHeap::from_raw(id),
            cpu_start: CpuDescriptorHandle { ptr: cpu_start },
            gpu_start: gpu_start.map(|ptr| GpuDescriptorHandle { ptr }),
            increment_size: increment,
        })
    }

    fn create_render_target_view(&mut self, resource: RawResource, handle: CpuDescriptorHandle) {
        self.create_view(DescriptorType::RenderTargetView, resource, handle);
    }

    fn create_depth_stencil_view(&mut self, resource: RawResource, handle: CpuDescriptorHandle) {
        self.create_view(DescriptorType::DepthStencilView, resource, handle);
    }

    fn create_shader_resource_view(&mut self, resource: RawResource, desc: &TextureDesc, handle: CpuDescriptorHandle) {
        let matches = self
            .resources
            .get(&resource.as_raw())
            .and_then(|r| r.texture_desc())
            .is_some_and(|d| d == desc);
        if !matches {
            self.validation_error(format!("SRV description does not match resource {}", resource.as_raw()));
            return;
        }
        self.create_view(DescriptorType::ShaderResourceView, resource, handle);
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<RawResource> {
        desc.validate().map_err(GraphicsError::ResourceCreation)?;
        Ok(self.insert_resource(SoftResource::texture(desc)))
    }

    fn create_buffer(&mut self, size: u64, heap: HeapKind) -> Result<RawResource> {
        if size == 0 {
            return Err(GraphicsError::ResourceCreation("buffer size must be non-zero".to_string()).into());
        }
        let address = self.next_address;
        self.next_address += size.div_ceil(BUFFER_ADDRESS_ALIGN) * BUFFER_ADDRESS_ALIGN;
        Ok(self.insert_resource(SoftResource::buffer(size, heap, address)))
    }

    fn write_buffer(&mut self, buffer: RawResource, offset: u64, data: &[u8]) -> Result<()> {
        let storage = self.buffer_mut(buffer, &[HeapKind::Upload])?;
        let end = offset as usize + data.len();
        if end > storage.len() {
            return Err(GraphicsError::InvalidArgument(format!(
                "write of {} bytes at {offset} exceeds buffer size {}",
                data.len(),
                storage.len()
            ))
            .into());
        }
        storage[offset as usize..end].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&mut self, buffer: RawResource, offset: u64, out: &mut [u8]) -> Result<()> {
        let storage = self.buffer_mut(buffer, &[HeapKind::Readback, HeapKind::Upload])?;
        let end = offset as usize + out.len();
        if end > storage.len() {
            return Err(GraphicsError::InvalidArgument(format!(
                "read of {} bytes at {offset} exceeds buffer size {}",
                out.len(),
                storage.len()
            ))
            .into());
        }
        out.copy_from_slice(&storage[offset as usize..end]);
        Ok(())
    }

    fn buffer_gpu_address(&self, buffer: RawResource) -> u64 {
        match self.resources.get(&buffer.as_raw()).map(|r| &r.storage) {
            Some(Storage::Buffer { address, .. }) => *address,
            _ => 0,
        }
    }

    fn release(&mut self, object: RawObject) {
        let released = match object {
            RawObject::Resource(res) => self.remove_resource(res.as_raw()),
            RawObject::DescriptorHeap(heap) => self.heaps.remove(&heap.as_raw()).is_some(),
            RawObject::RootSignature(sig) => self.root_signatures.remove(&sig.as_raw()).is_some(),
            RawObject::Pipeline(pso) => self.pipelines.remove(&pso.as_raw()).is_some(),
            RawObject::Fence(fence) => self.fences.remove(&fence.as_raw()).is_some(),
            RawObject::CommandAllocator(alloc) => match self.allocators.remove(&alloc.as_raw()) {
                Some(a) if a.in_flight > 0 => {
                    self.validation_error(format!("allocator {} released while executing", alloc.as_raw()));
                    true
                }
                Some(_) => true,
                None => false,
            },
            RawObject::CommandList(list) => self.lists.remove(&list.as_raw()).is_some(),
            RawObject::Queue(_) => true,
        };
        if released {
            self.names.remove(&object);
        } else {
            self.validation_error(format!("{object:?} released twice"));
        }
    }

    fn set_object_name(&mut self, object: RawObject, name: &str) {
        self.names.insert(object, name.to_string());
    }

    fn object_name(&self, object: RawObject) -> Option<String> {
        self.names.get(&object).cloned()
    }

    fn create_root_signature(&mut self, bytes: &[u8]) -> Result<RawRootSignature> {
        check_bytecode("root signature", bytes).map_err(GraphicsError::RootSignatureCreation)?;
        let id = self.allocate_id();
        self.root_signatures.insert(id, bytes.len());
        Ok(RawRootSignature::from_raw(id))
    }

    fn create_pipeline_state(&mut self, desc: &PipelineStateDesc, root_signature: RawRootSignature) -> Result<RawPipeline> {
        check_bytecode("vertex shader", &desc.vertex_shader).map_err(GraphicsError::PipelineCompilation)?;
        check_bytecode("pixel shader", &desc.pixel_shader).map_err(GraphicsError::PipelineCompilation)?;
        if !self.root_signatures.contains_key(&root_signature.as_raw()) {
            return Err(GraphicsError::PipelineCompilation(format!(
                "root signature {} does not exist",
                root_signature.as_raw()
            ))
            .into());
        }
        if desc.input_layout.iter().any(|e| e.semantic.is_empty()) {
            return Err(GraphicsError::PipelineCompilation("input element without a semantic name".to_string()).into());
        }
        if desc.render_target_format.is_depth() || desc.depth_format.is_some_and(|f| !f.is_depth()) {
            return Err(GraphicsError::PipelineCompilation("render target and depth formats are swapped".to_string()).into());
        }

        let id = self.allocate_id();
        self.pipelines.insert(
            id,
            SoftPipeline {
                root_signature: root_signature.as_raw(),
                topology: desc.topology,
                render_target_format: desc.render_target_format,
            },
        );
        Ok(RawPipeline::from_raw(id))
    }

    fn create_swapchain(&mut self, target: &SurfaceTarget, desc: &SwapchainDesc) -> Result<()> {
        if let SurfaceTarget::Window { .. } = target {
            return Err(GraphicsError::Unsupported {
                backend: "headless",
                operation: "presenting to a window".to_string(),
            }
            .into());
        }
        if desc.width == 0 || desc.height == 0 || !(2..=16).contains(&desc.buffer_count) {
            return Err(GraphicsError::Swapchain(format!(
                "invalid swapchain {}x{} with {} buffers",
                desc.width, desc.height, desc.buffer_count
            ))
            .into());
        }
        if let Some(old) = self.swapchain.take() {
            for id in old.backbuffers {
                self.remove_resource(id);
            }
        }

        let backbuffers = self.create_backbuffers(desc.format, desc.width, desc.height, desc.buffer_count)?;
        self.swapchain = Some(SoftSwapchain { backbuffers, index: 0, format: desc.format });
        info!(width = desc.width, height = desc.height, buffers = desc.buffer_count, "Swap chain created");
        Ok(())
    }

    fn swapchain_ready(&mut self) -> bool {
        self.swapchain.is_some() && self.probe.counters.presentable.load(Ordering::Relaxed)
    }

    fn backbuffer(&self, index: u32) -> Result<RawResource> {
        self.swapchain
            .as_ref()
            .and_then(|sc| sc.backbuffers.get(index as usize))
            .map(|id| RawResource::from_raw(*id))
            .ok_or_else(|| GraphicsError::Swapchain(format!("backbuffer {index} does not exist")).into())
    }

    fn current_backbuffer_index(&self) -> u32 {
        self.swapchain.as_ref().map_or(0, |sc| sc.index)
    }

    fn resize_swapchain(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(GraphicsError::InvalidArgument(format!("cannot resize swapchain to {width}x{height}")).into());
        }
        if !self.direct.is_idle() || !self.copy.is_idle() {
            return Err(GraphicsError::Swapchain("buffers resized while GPU work is outstanding".to_string()).into());
        }
        let Some(format) = self.swapchain.as_ref().map(|sc| sc.format) else {
            return Err(GraphicsError::Swapchain("resize without a swapchain".to_string()).into());
        };
        // 与 ResizeBuffers 一样，失败时保留原来的缓冲
        TextureDesc::render_target(format, width, height)
            .validate()
            .map_err(GraphicsError::Swapchain)?;
        if self.probe.counters.fail_resizes.load(Ordering::Relaxed) {
            return Err(GraphicsError::Swapchain(format!("couldn't resize buffers to {width}x{height}")).into());
        }
        let Some(old) = self.swapchain.take() else {
            return Err(GraphicsError::Swapchain("resize without a swapchain".to_string()).into());
        };
        let count = old.backbuffers.len() as u32;
        for id in &old.backbuffers {
            self.remove_resource(*id);
        }
        let backbuffers = self.create_backbuffers(old.format, width, height, count)?;
        self.swapchain = Some(SoftSwapchain { backbuffers, index: 0, format: old.format });
        debug!(width, height, "Swap chain resized");
        Ok(())
    }

    fn present(&mut self) -> Result<()> {
        let Some(sc) = self.swapchain.as_mut() else {
            return Err(GraphicsError::Swapchain("present without a swapchain".to_string()).into());
        };
        if self.probe.counters.fail_presents.load(Ordering::Relaxed) {
            return Err(GraphicsError::Swapchain("present failed".to_string()).into());
        }
        let backbuffer = sc.backbuffers[sc.index as usize];
        sc.index = (sc.index + 1) % sc.backbuffers.len() as u32;
        self.direct.push(Submission::Present { backbuffer });
        self.throttle(QueueKind::Direct);
        Ok(())
    }
}

impl HeadlessBackend {
    fn create_backbuffers(&mut self, format: TextureFormat, width: u32, height: u32, count: u32) -> Result<Vec<u64>> {
        let desc = TextureDesc::render_target(format, width, height);
        desc.validate().map_err(GraphicsError::Swapchain)?;
        Ok((0..count)
            .map(|_| {
                let mut texture = SoftResource::texture(&desc);
                texture.state = ResourceState::Present;
                self.insert_resource(texture).as_raw()
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytecode(tag: &[u8]) -> Vec<u8> {
        let mut bytes = CONTAINER_MAGIC.to_vec();
        bytes.extend_from_slice(tag);
        bytes
    }

    fn record_all(backend: &mut HeadlessBackend, queue: QueueKind, commands: &[GpuCommand<'_>]) -> RawCommandAllocator {
        let alloc = backend.create_command_allocator(queue).unwrap();
        let list = backend.create_command_list(queue, alloc).unwrap();
        backend.reset_command_list(list, alloc).unwrap();
        for command in commands {
            backend.record(list, *command);
        }
        backend.close_command_list(list).unwrap();
        backend.execute_command_list(queue, list).unwrap();
        alloc
    }

    #[test]
    fn test_fence_advances_only_after_execution() {
        let mut backend = HeadlessBackend::new(1);
        let fence = backend.create_fence(0).unwrap();

        record_all(&mut backend, QueueKind::Direct, &[]);
        backend.signal(QueueKind::Direct, fence, 1).unwrap();
        assert_eq!(backend.fence_completed_value(fence), 0);

        backend.wait_for_fence(fence, 1).unwrap();
        assert_eq!(backend.fence_completed_value(fence), 1);
        assert_eq!(backend.probe().blocking_waits(), 1);
    }

    #[test]
    fn test_zero_latency_completes_immediately() {
        let mut backend = HeadlessBackend::new(0);
        let fence = backend.create_fence(0).unwrap();
        record_all(&mut backend, QueueKind::Direct, &[]);
        backend.signal(QueueKind::Direct, fence, 5).unwrap();
        assert_eq!(backend.fence_completed_value(fence), 5);
    }

    #[test]
    fn test_wait_without_signal_is_error() {
        let mut backend = HeadlessBackend::new(2);
        let fence = backend.create_fence(0).unwrap();
        assert!(backend.wait_for_fence(fence, 1).is_err());
    }

    #[test]
    fn test_allocator_reset_while_in_flight() {
        let mut backend = HeadlessBackend::new(2);
        let fence = backend.create_fence(0).unwrap();
        let alloc = record_all(&mut backend, QueueKind::Direct, &[]);
        backend.signal(QueueKind::Direct, fence, 1).unwrap();

        assert!(backend.reset_command_allocator(alloc).is_err());
        backend.wait_for_fence(fence, 1).unwrap();
        assert!(backend.reset_command_allocator(alloc).is_ok());
    }

    #[test]
    fn test_cross_queue_wait_orders_execution() {
        let mut backend = HeadlessBackend::new(4);
        let copy_fence = backend.create_fence(0).unwrap();
        let direct_fence = backend.create_fence(0).unwrap();

        backend.queue_wait(QueueKind::Direct, copy_fence, 1).unwrap();
        backend.signal(QueueKind::Direct, direct_fence, 1).unwrap();
        assert_eq!(backend.fence_completed_value(direct_fence), 0);

        backend.signal(QueueKind::Copy, copy_fence, 1).unwrap();
        backend.wait_for_fence(direct_fence, 1).unwrap();
        assert_eq!(backend.fence_completed_value(copy_fence), 1);
    }

    #[test]
    fn test_draw_without_pipeline_is_validation_error() {
        let mut backend = HeadlessBackend::new(0);
        record_all(
            &mut backend,
            QueueKind::Direct,
            &[GpuCommand::Draw { vertex_count: 3, instance_count: 1, first_vertex: 0, first_instance: 0 }],
        );
        assert_eq!(backend.probe().validation_errors(), 1);
        assert_eq!(backend.probe().draws(), 0);
    }

    #[test]
    fn test_copy_queue_rejects_draws() {
        let mut backend = HeadlessBackend::new(0);
        record_all(
            &mut backend,
            QueueKind::Copy,
            &[GpuCommand::SetPrimitiveTopology(PrimitiveTopology::TriangleList)],
        );
        assert_eq!(backend.probe().validation_errors(), 1);
    }

    #[test]
    fn test_clear_and_present() {
        let mut backend = HeadlessBackend::new(0);
        backend
            .create_swapchain(
                &SurfaceTarget::Offscreen { width: 4, height: 4 },
                &SwapchainDesc {
                    width: 4,
                    height: 4,
                    buffer_count: 2,
                    format: TextureFormat::Rgba8Unorm,
                    allow_tearing: false,
                },
            )
            .unwrap();
        let heap = backend.create_descriptor_heap(DescriptorType::RenderTargetView, 2, false).unwrap();
        let bb = backend.backbuffer(0).unwrap();
        backend.create_render_target_view(bb, heap.cpu_start);

        record_all(
            &mut backend,
            QueueKind::Direct,
            &[
                GpuCommand::Transition { resource: bb, before: ResourceState::Present, after: ResourceState::RenderTarget },
                GpuCommand::ClearRenderTarget { rtv: heap.cpu_start, color: [1.0, 0.0, 0.0, 1.0] },
                GpuCommand::Transition { resource: bb, before: ResourceState::RenderTarget, after: ResourceState::Present },
            ],
        );
        backend.present().unwrap();

        let probe = backend.probe();
        assert_eq!(probe.validation_errors(), 0);
        assert_eq!(probe.presents(), 1);
        assert_eq!(backend.current_backbuffer_index(), 1);
        let pixels = backend.texture_contents(bb, 0).unwrap();
        assert_eq!(&pixels[..4], &[255, 0, 0, 255]);
    }

    #[test]
    fn test_present_in_wrong_state() {
        let mut backend = HeadlessBackend::new(0);
        backend
            .create_swapchain(
                &SurfaceTarget::Offscreen { width: 2, height: 2 },
                &SwapchainDesc {
                    width: 2,
                    height: 2,
                    buffer_count: 2,
                    format: TextureFormat::Rgba8Unorm,
                    allow_tearing: false,
                },
            )
            .unwrap();
        let bb = backend.backbuffer(0).unwrap();
        record_all(
            &mut backend,
            QueueKind::Direct,
            &[GpuCommand::Transition { resource: bb, before: ResourceState::Present, after: ResourceState::RenderTarget }],
        );
        backend.present().unwrap();
        assert_eq!(backend.probe().presents(), 0);
        assert_eq!(backend.probe().validation_errors(), 1);
    }

    #[test]
    fn test_root_signature_requires_container() {
        let mut backend = HeadlessBackend::new(0);
        assert!(backend.create_root_signature(b"junk").is_err());
        let sig = backend.create_root_signature(&bytecode(b"sig")).unwrap();

        let desc = PipelineStateDesc::new(bytecode(b"vs"), b"ps".to_vec());
        assert!(backend.create_pipeline_state(&desc, sig).is_err());
        let desc = PipelineStateDesc::new(bytecode(b"vs"), bytecode(b"ps"));
        assert!(backend.create_pipeline_state(&desc, sig).is_ok());
    }

    #[test]
    fn test_texture_limits() {
        let mut backend = HeadlessBackend::new(0);
        assert!(backend.create_texture(&TextureDesc::texture_2d(TextureFormat::Rgba8Unorm, 0, 4, 1)).is_err());
        assert!(backend.create_texture(&TextureDesc::texture_2d(TextureFormat::Rgba8Unorm, 4, 4, 4)).is_err());
        assert!(backend.create_texture(&TextureDesc::texture_2d(TextureFormat::Rgba8Unorm, 4, 4, 3)).is_ok());
        assert_eq!(backend.probe().live_resources(), 1);
    }

    #[test]
    fn test_double_release_is_reported() {
        let mut backend = HeadlessBackend::new(0);
        let buffer = backend.create_buffer(16, HeapKind::Upload).unwrap();
        backend.release(RawObject::Resource(buffer));
        backend.release(RawObject::Resource(buffer));
        assert_eq!(backend.probe().validation_errors(), 1);
        assert_eq!(backend.probe().live_resources(), 0);
    }
}
