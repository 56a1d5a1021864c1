//! 队列与命令列表模拟

use std::collections::VecDeque;

use crate::gfx::types::*;

/// 命令列表中保存的命令，借用的切片已经复制出来
#[derive(Debug, Clone)]
pub(super) enum SoftCommand {
    Transition { resource: u64, before: ResourceState, after: ResourceState },
    SetDescriptorHeap(u64),
    SetRootSignature(u64),
    SetPipelineState(u64),
    SetRenderTarget { rtv: usize, dsv: Option<usize> },
    ClearRenderTarget { rtv: usize, color: [f32; 4] },
    ClearDepth { dsv: usize, depth: f32 },
    SetViewport(Viewport),
    SetScissor(ScissorRect),
    SetRootConstants { index: u32, count: u32, offset: u32 },
    SetDescriptorTable { index: u32, base: u64 },
    SetVertexBuffers { slot: u32, views: Vec<VertexBufferView> },
    SetPrimitiveTopology(PrimitiveTopology),
    Draw { vertex_count: u32, instance_count: u32 },
    CopyBufferToTexture { src: u64, footprint: PlacedFootprint, dst: u64, subresource: u32, origin: (u32, u32, u32) },
    CopyTextureToBuffer { src: u64, subresource: u32, dst: u64, footprint: PlacedFootprint },
    CopyTextureSubresource { src: u64, dst: u64, subresource: u32 },
    CopyResource { src: u64, dst: u64 },
}

impl SoftCommand {
    /// 复制命令可以在复制队列上录制，其余只能在图形队列上录制
    pub fn is_copy(&self) -> bool {
        matches!(
            self,
            SoftCommand::Transition { .. }
                | SoftCommand::CopyBufferToTexture { .. }
                | SoftCommand::CopyTextureToBuffer { .. }
                | SoftCommand::CopyTextureSubresource { .. }
                | SoftCommand::CopyResource { .. }
        )
    }
}

impl From<GpuCommand<'_>> for SoftCommand {
    fn from(command: GpuCommand<'_>) -> Self {
        match command {
            GpuCommand::Transition { resource, before, after } => {
                SoftCommand::Transition { resource: resource.as_raw(), before, after }
            }
            GpuCommand::SetDescriptorHeap(heap) => SoftCommand::SetDescriptorHeap(heap.as_raw()),
            GpuCommand::SetRootSignature(sig) => SoftCommand::SetRootSignature(sig.as_raw()),
            GpuCommand::SetPipelineState(pso) => SoftCommand::SetPipelineState(pso.as_raw()),
            GpuCommand::SetRenderTarget { rtv, dsv } => {
                SoftCommand::SetRenderTarget { rtv: rtv.ptr, dsv: dsv.map(|h| h.ptr) }
            }
            GpuCommand::ClearRenderTarget { rtv, color } => SoftCommand::ClearRenderTarget { rtv: rtv.ptr, color },
            GpuCommand::ClearDepth { dsv, depth } => SoftCommand::ClearDepth { dsv: dsv.ptr, depth },
            GpuCommand::SetViewport(vp) => SoftCommand::SetViewport(vp),
            GpuCommand::SetScissor(rect) => SoftCommand::SetScissor(rect),
            GpuCommand::SetRootConstants { index, values, offset } => {
                SoftCommand::SetRootConstants { index, count: values.len() as u32, offset }
            }
            GpuCommand::SetDescriptorTable { index, base } => SoftCommand::SetDescriptorTable { index, base: base.ptr },
            GpuCommand::SetVertexBuffers { slot, views } => SoftCommand::SetVertexBuffers { slot, views: views.to_vec() },
            GpuCommand::SetPrimitiveTopology(topology) => SoftCommand::SetPrimitiveTopology(topology),
            GpuCommand::Draw { vertex_count, instance_count, .. } => SoftCommand::Draw { vertex_count, instance_count },
            GpuCommand::CopyBufferToTexture { src, footprint, dst, subresource, x, y, z } => SoftCommand::CopyBufferToTexture {
                src: src.as_raw(),
                footprint,
                dst: dst.as_raw(),
                subresource,
                origin: (x, y, z),
            },
            GpuCommand::CopyTextureToBuffer { src, subresource, dst, footprint } => SoftCommand::CopyTextureToBuffer {
                src: src.as_raw(),
                subresource,
                dst: dst.as_raw(),
                footprint,
            },
            GpuCommand::CopyTextureSubresource { src, dst, subresource } => {
                SoftCommand::CopyTextureSubresource { src: src.as_raw(), dst: dst.as_raw(), subresource }
            }
            GpuCommand::CopyResource { src, dst } => SoftCommand::CopyResource { src: src.as_raw(), dst: dst.as_raw() },
        }
    }
}

/// 命令列表
pub(super) struct SoftCommandList {
    pub queue: QueueKind,
    pub allocator: u64,
    pub open: bool,
    pub commands: Vec<SoftCommand>,
}

/// 命令分配器
pub(super) struct SoftAllocator {
    pub queue: QueueKind,
    /// 已提交但尚未执行的命令列表数
    pub in_flight: u32,
    /// 正在使用该分配器录制的命令列表
    pub recording: Option<u64>,
}

/// 队列中的一项提交
#[derive(Debug)]
pub(super) enum Submission {
    Execute { allocator: u64, commands: Vec<SoftCommand> },
    Signal { fence: u64, value: u64 },
    Wait { fence: u64, value: u64 },
    Present { backbuffer: u64 },
}

/// 按提交顺序执行的队列
#[derive(Default)]
pub(super) struct SoftQueue {
    pending: VecDeque<Submission>,
}

impl SoftQueue {
    pub fn push(&mut self, submission: Submission) {
        self.pending.push_back(submission);
    }

    pub fn front(&self) -> Option<&Submission> {
        self.pending.front()
    }

    pub fn pop(&mut self) -> Option<Submission> {
        self.pending.pop_front()
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }

    /// 尚未执行的命令列表数
    pub fn pending_executes(&self) -> usize {
        self.pending
            .iter()
            .filter(|s| matches!(s, Submission::Execute { .. }))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_constants_copied_by_count() {
        let values = [1u32, 2, 3];
        let cmd = SoftCommand::from(GpuCommand::SetRootConstants { index: 0, values: &values, offset: 4 });
        match cmd {
            SoftCommand::SetRootConstants { count, offset, .. } => {
                assert_eq!(count, 3);
                assert_eq!(offset, 4);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_pending_executes_ignores_signals() {
        let mut queue = SoftQueue::default();
        queue.push(Submission::Execute { allocator: 1, commands: Vec::new() });
        queue.push(Submission::Signal { fence: 1, value: 1 });
        queue.push(Submission::Execute { allocator: 1, commands: Vec::new() });
        assert_eq!(queue.pending_executes(), 2);
        assert!(!queue.is_idle());
    }
}
