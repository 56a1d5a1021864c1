//! 帧录制
//!
//! [`Frame`] 由 [`Renderer::start_frame`](super::Renderer::start_frame) 返回，持有渲染器的
//! 可变借用，所以同一时间只能有一帧在录制，帧外也无法调用任何录制操作。
//! [`Frame::end`] 提交并呈现；没有调用 `end` 就 drop 的帧会关闭并丢弃命令列表，
//! 不会执行录制了一半的命令。

use tracing::{trace, warn};

use crate::core::error::{GraphicsError, Result};
use crate::core::math::{Color, Matrix4, Vector3, Vector4};
use crate::gfx::{
    DescriptorType, GpuCommand, GpuDescriptorHandle, PrimitiveTopology, RawDescriptorHeap, RawResource, VertexBufferView,
};
use super::descriptor::DescriptorHeap;
use super::clip::{ClipStack, PixelRect};
use super::manager::ResourceManager;
use super::pipeline::{PipelineId, RootSignatureId};
use super::resource::Texture;
use super::Renderer;

/// 纹理描述符表从这个根参数开始，根参数 0 是根常量
pub const TEXTURE_ROOT_PARAMETER_BASE: u32 = 1;

/// 一帧的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// 帧序号，从 1 开始
    pub number: u64,
    pub draw_calls: u32,
    /// 顶点数 × 实例数
    pub vertices: u64,
    pub scissor_pushes: u32,
    /// 因区域为空而被拒绝的 push
    pub rejected_pushes: u32,
}

/// 正在录制的一帧
pub struct Frame<'a> {
    renderer: &'a mut Renderer,
    slot: u32,
    backbuffer: RawResource,
    scissors: ClipStack,
    viewports: ClipStack,
    root_signature: Option<RootSignatureId>,
    /// 当前绑定的着色器可见描述符堆
    descriptor_heap: RawDescriptorHeap,
    stats: FrameStats,
    finished: bool,
}

impl<'a> Frame<'a> {
    pub(super) fn new(
        renderer: &'a mut Renderer,
        slot: u32,
        backbuffer: RawResource,
        bounds: PixelRect,
        root_signature: Option<RootSignatureId>,
        number: u64,
    ) -> Self {
        let descriptor_heap = renderer.resources.srv_heap().raw();
        Self {
            renderer,
            slot,
            backbuffer,
            scissors: ClipStack::new(bounds),
            viewports: ClipStack::new(bounds),
            root_signature,
            descriptor_heap,
            stats: FrameStats { number, ..Default::default() },
            finished: false,
        }
    }

    pub fn number(&self) -> u64 {
        self.stats.number
    }

    /// 本帧使用的后缓冲索引
    pub fn backbuffer_index(&self) -> u32 {
        self.slot
    }

    pub fn render_target_size(&self) -> (u32, u32) {
        self.renderer.render_target_size()
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// 帧内使用的资源管理器，写入的纹理对本帧之后录制的绘制可见
    pub fn resources(&mut self) -> ResourceManager<'_> {
        self.renderer.resources()
    }

    fn record(&mut self, command: GpuCommand<'_>) {
        self.renderer.record(self.slot, command);
    }

    // ------------------------------------------------------------ 状态

    /// 绑定管线；管线的根签名与当前不同时一并切换
    pub fn set_pipeline_state(&mut self, pipeline: PipelineId) -> Result<()> {
        let cached = *self
            .renderer
            .pipelines
            .pipeline(pipeline)
            .ok_or_else(|| GraphicsError::InvalidArgument(format!("unknown pipeline {pipeline:?}")))?;
        if self.root_signature != Some(cached.root_signature) {
            self.set_root_signature(cached.root_signature)?;
        }
        self.record(GpuCommand::SetPipelineState(cached.raw));
        Ok(())
    }

    pub fn set_root_signature(&mut self, root_signature: RootSignatureId) -> Result<()> {
        let raw = self
            .renderer
            .pipelines
            .raw_root_signature(root_signature)
            .ok_or_else(|| GraphicsError::InvalidArgument(format!("unknown root signature {root_signature:?}")))?;
        self.record(GpuCommand::SetRootSignature(raw));
        self.root_signature = Some(root_signature);
        Ok(())
    }

    /// 写入根常量
    ///
    /// # 参数
    ///
    /// * `index` - 根参数索引
    /// * `byte_offset` - 在该根参数内的字节偏移，必须是 4 的倍数
    /// * `values` - 32 位值
    pub fn set_root_constants(&mut self, index: u32, byte_offset: u32, values: &[u32]) -> Result<()> {
        if byte_offset % 4 != 0 {
            return Err(GraphicsError::InvalidArgument(format!(
                "root constant offset {byte_offset} is not a multiple of 4"
            ))
            .into());
        }
        self.record(GpuCommand::SetRootConstants { index, values, offset: byte_offset / 4 });
        Ok(())
    }

    /// 4x4 矩阵，按列主序写入 16 个值
    pub fn set_root_constant_mat4(&mut self, index: u32, matrix: &Matrix4, byte_offset: u32) -> Result<()> {
        self.set_root_constants(index, byte_offset, bytemuck::cast_slice(matrix.as_slice()))
    }

    pub fn set_root_constant_float4(&mut self, index: u32, value: &Vector4, byte_offset: u32) -> Result<()> {
        self.set_root_constants(index, byte_offset, bytemuck::cast_slice(value.as_slice()))
    }

    pub fn set_root_constant_float3(&mut self, index: u32, value: &Vector3, byte_offset: u32) -> Result<()> {
        self.set_root_constants(index, byte_offset, bytemuck::cast_slice(value.as_slice()))
    }

    pub fn set_root_constant_float(&mut self, index: u32, value: f32, byte_offset: u32) -> Result<()> {
        self.set_root_constants(index, byte_offset, &[value.to_bits()])
    }

    pub fn set_root_constant_uint(&mut self, index: u32, value: u32, byte_offset: u32) -> Result<()> {
        self.set_root_constants(index, byte_offset, &[value])
    }

    pub fn set_root_constant_bool(&mut self, index: u32, value: bool, byte_offset: u32) -> Result<()> {
        self.set_root_constants(index, byte_offset, &[value as u32])
    }

    pub fn set_root_constant_color(&mut self, index: u32, color: &Color, byte_offset: u32) -> Result<()> {
        let rgba = color.to_array();
        self.set_root_constants(index, byte_offset, bytemuck::cast_slice(&rgba))
    }

    /// 写入当前渲染目标尺寸的像素空间正交投影
    pub fn set_root_constant_ortho_proj(&mut self, index: u32, byte_offset: u32) -> Result<()> {
        let projection = self.renderer.ortho_projection();
        self.set_root_constant_mat4(index, &projection, byte_offset)
    }

    pub fn set_vertex_buffers(&mut self, start_slot: u32, views: &[VertexBufferView]) {
        self.record(GpuCommand::SetVertexBuffers { slot: start_slot, views });
    }

    /// 绑定描述符表，`base` 必须位于当前绑定的描述符堆内
    pub fn set_descriptor_table(&mut self, index: u32, base: GpuDescriptorHandle) {
        self.record(GpuCommand::SetDescriptorTable { index, base });
    }

    /// 绑定自己创建的着色器可见 SRV 堆
    ///
    /// 之后的 [`set_descriptor_table`](Self::set_descriptor_table) 使用这个堆里的句柄；
    /// [`set_texture`](Self::set_texture) 会自动切回内置的 SRV 堆。
    pub fn set_descriptor_heap(&mut self, heap: &DescriptorHeap) -> Result<()> {
        if heap.kind() != DescriptorType::ShaderResourceView || !heap.is_shader_visible() {
            return Err(GraphicsError::InvalidArgument(format!(
                "only shader visible {} heaps can be bound, got a {} heap",
                DescriptorType::ShaderResourceView.name(),
                heap.kind().name()
            ))
            .into());
        }
        self.bind_heap(heap.raw());
        Ok(())
    }

    fn bind_heap(&mut self, heap: RawDescriptorHeap) {
        if self.descriptor_heap != heap {
            self.record(GpuCommand::SetDescriptorHeap(heap));
            self.descriptor_heap = heap;
        }
    }

    pub fn set_primitive_topology(&mut self, topology: PrimitiveTopology) {
        self.record(GpuCommand::SetPrimitiveTopology(topology));
    }

    /// 把纹理绑定到第 `index` 个纹理表（根参数 `1 + index`）
    pub fn set_texture(&mut self, index: u32, texture: &Texture) -> Result<()> {
        let base = texture.srv_handle().ok_or_else(|| {
            GraphicsError::InvalidArgument(format!("texture {} has no shader resource view", texture.raw().as_raw()))
        })?;
        let srv_heap = self.renderer.resources.srv_heap().raw();
        self.bind_heap(srv_heap);
        self.set_descriptor_table(TEXTURE_ROOT_PARAMETER_BASE + index, base);
        Ok(())
    }

    pub fn draw_instanced(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        self.record(GpuCommand::Draw { vertex_count, instance_count, first_vertex, first_instance });
        self.stats.draw_calls += 1;
        self.stats.vertices += vertex_count as u64 * instance_count as u64;
    }

    // ------------------------------------------------------------ 裁剪与视口

    /// 压入裁剪矩形
    ///
    /// # 返回值
    ///
    /// 与当前裁剪区域的交集为空时返回 false，栈不变，调用方应跳过对应的绘制
    pub fn push_scissor(&mut self, left: i32, top: i32, right: i32, bottom: i32) -> bool {
        self.stats.scissor_pushes += 1;
        match self.scissors.push(PixelRect::new(left, top, right, bottom)) {
            Some(rect) => {
                self.record(GpuCommand::SetScissor(rect.to_scissor()));
                true
            }
            None => {
                self.stats.rejected_pushes += 1;
                false
            }
        }
    }

    /// 弹出裁剪矩形并恢复上一层
    ///
    /// # Panics
    ///
    /// 栈为空时 panic
    pub fn pop_scissor(&mut self) {
        let rect = self.scissors.pop();
        self.record(GpuCommand::SetScissor(rect.to_scissor()));
    }

    /// 压入视口，区域先向外取整到整像素
    pub fn push_viewport(&mut self, left: f32, top: f32, width: f32, height: f32) -> bool {
        match self.viewports.push(PixelRect::snap_outward(left, top, width, height)) {
            Some(rect) => {
                self.record(GpuCommand::SetViewport(rect.to_viewport()));
                true
            }
            None => {
                self.stats.rejected_pushes += 1;
                false
            }
        }
    }

    /// # Panics
    ///
    /// 栈为空时 panic
    pub fn pop_viewport(&mut self) {
        let rect = self.viewports.pop();
        self.record(GpuCommand::SetViewport(rect.to_viewport()));
    }

    pub fn current_scissor(&self) -> PixelRect {
        self.scissors.current()
    }

    pub fn current_viewport(&self) -> PixelRect {
        self.viewports.current()
    }

    pub fn scissor_depth(&self) -> usize {
        self.scissors.depth()
    }

    pub fn viewport_depth(&self) -> usize {
        self.viewports.depth()
    }

    // ------------------------------------------------------------ 提交

    /// 结束录制、提交并呈现
    ///
    /// # 返回值
    ///
    /// 视口或裁剪栈不平衡时帧照常提交，然后返回
    /// [`GraphicsError::UnbalancedClipStack`]
    pub fn end(mut self) -> Result<FrameStats> {
        self.renderer.submit_frame(self.slot, self.backbuffer)?;
        self.finished = true;

        let (scissors, viewports) = (self.scissors.depth(), self.viewports.depth());
        if scissors > 0 || viewports > 0 {
            warn!(frame = self.stats.number, scissors, viewports, "Clip stack not empty at end of frame");
            return Err(GraphicsError::UnbalancedClipStack { scissors, viewports }.into());
        }

        trace!(
            frame = self.stats.number,
            draws = self.stats.draw_calls,
            vertices = self.stats.vertices,
            "Frame submitted"
        );
        Ok(self.stats)
    }
}

impl Drop for Frame<'_> {
    fn drop(&mut self) {
        // 提交失败时命令列表可能已经执行过，这时没有可丢弃的内容
        if !self.finished && self.renderer.sync.slot(self.slot).recorder.is_recording() {
            warn!(frame = self.stats.number, "Frame dropped without being submitted, discarding its commands");
            self.renderer.discard_frame(self.slot);
        }
    }
}
