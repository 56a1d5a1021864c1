//! 图形后端抽象
//!
//! [`GpuBackend`] 是渲染器和具体图形 API 之间唯一的接缝。
//! 渲染器只持有 `Box<dyn GpuBackend>`，帧同步、描述符分配、裁剪栈等逻辑
//! 与 API 无关；后端只负责创建对象、录制命令、提交与呈现。
//!
//! 对象以原始句柄（[`RawResource`] 等）的形式在两侧之间传递，
//! 所有权由渲染器层的包装类型负责，后端在 [`GpuBackend::release`] 时销毁对象。

use raw_window_handle::RawWindowHandle;

use crate::core::error::Result;
use super::types::*;

/// 交换链的呈现目标
#[derive(Debug, Clone, Copy)]
pub enum SurfaceTarget {
    /// 原生窗口，交换链通过系统合成器呈现到窗口上
    Window {
        handle: RawWindowHandle,
        width: u32,
        height: u32,
    },
    /// 无窗口，交换链后缓冲只存在于内存中
    Offscreen { width: u32, height: u32 },
}

impl SurfaceTarget {
    /// 客户区尺寸
    pub fn size(&self) -> (u32, u32) {
        match *self {
            SurfaceTarget::Window { width, height, .. } => (width, height),
            SurfaceTarget::Offscreen { width, height } => (width, height),
        }
    }
}

/// 图形后端 trait
///
/// 所有方法都在录制线程上调用，不要求 `Sync`。
pub trait GpuBackend {
    /// 后端名称
    fn name(&self) -> &'static str;

    /// 适配器信息
    fn adapter_info(&self) -> AdapterInfo;

    /// 驱动报告的本地显存占用（字节）
    fn adapter_memory_usage(&self) -> Result<u64>;

    // ---------------------------------------------------------------- 同步

    /// 创建初值为 `initial` 的栅栏
    fn create_fence(&mut self, initial: u64) -> Result<RawFence>;

    /// GPU 已完成的栅栏值
    fn fence_completed_value(&self, fence: RawFence) -> u64;

    /// 在队列尾部插入 signal
    fn signal(&mut self, queue: QueueKind, fence: RawFence, value: u64) -> Result<()>;

    /// 让队列在 GPU 侧等待栅栏到达 `value` 后再执行后续命令
    fn queue_wait(&mut self, queue: QueueKind, fence: RawFence, value: u64) -> Result<()>;

    /// 阻塞调用线程，直到栅栏到达 `value`
    fn wait_for_fence(&mut self, fence: RawFence, value: u64) -> Result<()>;

    // ---------------------------------------------------------------- 命令

    fn create_command_allocator(&mut self, queue: QueueKind) -> Result<RawCommandAllocator>;

    /// 创建命令列表，创建后处于关闭状态
    fn create_command_list(
        &mut self,
        queue: QueueKind,
        allocator: RawCommandAllocator,
    ) -> Result<RawCommandList>;

    /// 重置分配器，调用方保证其上的命令已经执行完毕
    fn reset_command_allocator(&mut self, allocator: RawCommandAllocator) -> Result<()>;

    /// 打开命令列表开始录制
    fn reset_command_list(&mut self, list: RawCommandList, allocator: RawCommandAllocator) -> Result<()>;

    /// 录制一条命令
    fn record(&mut self, list: RawCommandList, command: GpuCommand<'_>);

    fn close_command_list(&mut self, list: RawCommandList) -> Result<()>;

    fn execute_command_list(&mut self, queue: QueueKind, list: RawCommandList) -> Result<()>;

    // ---------------------------------------------------------------- 描述符

    fn create_descriptor_heap(
        &mut self,
        kind: DescriptorType,
        capacity: u32,
        shader_visible: bool,
    ) -> Result<DescriptorHeapInfo>;

    fn create_render_target_view(&mut self, resource: RawResource, handle: CpuDescriptorHandle);

    fn create_depth_stencil_view(&mut self, resource: RawResource, handle: CpuDescriptorHandle);

    fn create_shader_resource_view(
        &mut self,
        resource: RawResource,
        desc: &TextureDesc,
        handle: CpuDescriptorHandle,
    );

    // ---------------------------------------------------------------- 资源

    /// 在默认堆上创建纹理，初始状态为 COMMON（深度缓冲为 DEPTH_WRITE）
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<RawResource>;

    fn create_buffer(&mut self, size: u64, heap: HeapKind) -> Result<RawResource>;

    /// 写入上传堆缓冲区
    fn write_buffer(&mut self, buffer: RawResource, offset: u64, data: &[u8]) -> Result<()>;

    /// 读取回读堆缓冲区
    fn read_buffer(&mut self, buffer: RawResource, offset: u64, out: &mut [u8]) -> Result<()>;

    fn buffer_gpu_address(&self, buffer: RawResource) -> u64;

    /// 销毁对象
    fn release(&mut self, object: RawObject);

    fn set_object_name(&mut self, object: RawObject, name: &str);

    fn object_name(&self, object: RawObject) -> Option<String>;

    // ---------------------------------------------------------------- 管线

    fn create_root_signature(&mut self, bytes: &[u8]) -> Result<RawRootSignature>;

    fn create_pipeline_state(
        &mut self,
        desc: &PipelineStateDesc,
        root_signature: RawRootSignature,
    ) -> Result<RawPipeline>;

    // ---------------------------------------------------------------- 交换链

    /// 创建交换链并接入呈现目标（窗口时经由系统合成器）
    fn create_swapchain(&mut self, target: &SurfaceTarget, desc: &SwapchainDesc) -> Result<()>;

    /// 后缓冲当前能否渲染
    fn swapchain_ready(&mut self) -> bool;

    fn backbuffer(&self, index: u32) -> Result<RawResource>;

    fn current_backbuffer_index(&self) -> u32;

    /// 调整后缓冲尺寸，调用方保证 GPU 空闲
    fn resize_swapchain(&mut self, width: u32, height: u32) -> Result<()>;

    fn present(&mut self) -> Result<()>;
}
