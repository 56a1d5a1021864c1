//! 资源所有权与延迟释放
//!
//! [`Texture`]、[`Buffer`] 和用户创建的 [`DescriptorHeap`](super::DescriptorHeap)
//! 都只能移动，不能复制。drop 时不会立即销毁 GPU 对象，而是通过 [`ReleaseQueue`]
//! 发送一条 [`Retired`] 记录。渲染器收到记录后打上当时直接队列和复制队列的栅栏值，
//! 等两个值都完成之后才真正销毁对象、归还 SRV 槽位并扣减显存统计。

use std::collections::VecDeque;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::warn;

use crate::gfx::{
    GpuDescriptorHandle, HeapKind, RawObject, RawResource, TextureDesc, TextureFormat, VertexBufferView,
};
use super::sync::FenceValue;

/// 等待销毁的对象
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Retired {
    /// 纹理或缓冲区
    Resource {
        raw: RawResource,
        /// 计入显存统计的字节数
        gpu_bytes: u64,
        srv_slot: Option<u32>,
    },
    /// 其它后端对象
    Object(RawObject),
}

/// 延迟释放队列的发送端
#[derive(Debug, Clone)]
pub(crate) struct ReleaseQueue {
    sender: Sender<Retired>,
}

impl ReleaseQueue {
    pub fn retire(&self, item: Retired) {
        if self.sender.send(item).is_err() {
            warn!(?item, "Renderer is gone, leaking GPU object");
        }
    }
}

#[derive(Debug)]
struct PendingRelease {
    direct: FenceValue,
    copy: FenceValue,
    item: Retired,
}

/// 延迟释放队列的接收端
#[derive(Debug)]
pub(crate) struct DeferredReleases {
    receiver: Receiver<Retired>,
    pending: VecDeque<PendingRelease>,
}

impl DeferredReleases {
    pub fn new() -> (ReleaseQueue, Self) {
        let (sender, receiver) = unbounded();
        (
            ReleaseQueue { sender },
            Self {
                receiver,
                pending: VecDeque::new(),
            },
        )
    }

    /// 取出通道里新到的记录，打上两个队列的栅栏值
    ///
    /// 栅栏值只增不减，所以 `pending` 始终按完成顺序排列。
    pub fn stamp(&mut self, direct: FenceValue, copy: FenceValue) -> usize {
        let mut count = 0;
        for item in self.receiver.try_iter() {
            self.pending.push_back(PendingRelease { direct, copy, item });
            count += 1;
        }
        count
    }

    /// 取出两个栅栏值都已完成的记录
    pub fn collect(&mut self, direct_done: FenceValue, copy_done: FenceValue) -> Vec<Retired> {
        let mut ready = Vec::new();
        while let Some(front) = self.pending.front() {
            if front.direct > direct_done || front.copy > copy_done {
                break;
            }
            if let Some(entry) = self.pending.pop_front() {
                ready.push(entry.item);
            }
        }
        ready
    }

    /// 取出全部记录，调用方保证 GPU 已空闲
    pub fn drain_all(&mut self) -> Vec<Retired> {
        let mut items: Vec<Retired> = self.pending.drain(..).map(|entry| entry.item).collect();
        items.extend(self.receiver.try_iter());
        items
    }

    /// 已打上栅栏值、还未销毁的记录数
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// 资源的形状，用于整资源复制前的兼容性检查
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceLayout {
    Buffer { size: u64, heap: HeapKind },
    Texture(TextureDesc),
}

/// 可以参与整资源复制的 GPU 资源
pub trait GpuResource {
    fn raw_resource(&self) -> RawResource;

    fn layout(&self) -> ResourceLayout;
}

/// 纹理写入用的上传缓冲区
#[derive(Debug)]
pub(crate) struct Staging {
    pub buffer: RawResource,
    pub size: u64,
    /// 复制队列上最后一次读取它的栅栏值
    pub last_use: FenceValue,
}

/// 纹理
///
/// 由 [`ResourceManager`](super::ResourceManager) 创建。采样纹理持有一个
/// SRV 槽位；深度缓冲没有。
#[derive(Debug)]
pub struct Texture {
    raw: RawResource,
    desc: TextureDesc,
    srv: Option<(u32, GpuDescriptorHandle)>,
    pub(crate) staging: Option<Staging>,
    release: ReleaseQueue,
}

impl Texture {
    pub(crate) fn new(
        raw: RawResource,
        desc: TextureDesc,
        srv: Option<(u32, GpuDescriptorHandle)>,
        release: ReleaseQueue,
    ) -> Self {
        Self {
            raw,
            desc,
            srv,
            staging: None,
            release,
        }
    }

    pub fn raw(&self) -> RawResource {
        self.raw
    }

    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    pub fn format(&self) -> TextureFormat {
        self.desc.format
    }

    pub fn width(&self) -> u32 {
        self.desc.width
    }

    pub fn height(&self) -> u32 {
        self.desc.height
    }

    /// 3D 纹理的深度或 2D 数组的层数
    pub fn depth_or_array_size(&self) -> u32 {
        self.desc.depth_or_array_size
    }

    pub fn mip_levels(&self) -> u32 {
        self.desc.mip_levels
    }

    /// SRV 槽位索引
    pub fn srv_slot(&self) -> Option<u32> {
        self.srv.map(|(slot, _)| slot)
    }

    /// 绑定为描述符表用的 GPU 句柄
    pub fn srv_handle(&self) -> Option<GpuDescriptorHandle> {
        self.srv.map(|(_, handle)| handle)
    }
}

impl GpuResource for Texture {
    fn raw_resource(&self) -> RawResource {
        self.raw
    }

    fn layout(&self) -> ResourceLayout {
        ResourceLayout::Texture(self.desc)
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        if let Some(staging) = self.staging.take() {
            self.release.retire(Retired::Resource { raw: staging.buffer, gpu_bytes: 0, srv_slot: None });
        }
        self.release.retire(Retired::Resource {
            raw: self.raw,
            gpu_bytes: self.desc.byte_size(),
            srv_slot: self.srv_slot(),
        });
    }
}

/// 缓冲区
#[derive(Debug)]
pub struct Buffer {
    raw: RawResource,
    size: u64,
    heap: HeapKind,
    address: u64,
    release: ReleaseQueue,
}

impl Buffer {
    pub(crate) fn new(raw: RawResource, size: u64, heap: HeapKind, address: u64, release: ReleaseQueue) -> Self {
        Self {
            raw,
            size,
            heap,
            address,
            release,
        }
    }

    pub fn raw(&self) -> RawResource {
        self.raw
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn heap(&self) -> HeapKind {
        self.heap
    }

    pub fn gpu_address(&self) -> u64 {
        self.address
    }

    /// 覆盖整个缓冲区的顶点缓冲视图
    ///
    /// # 参数
    ///
    /// * `stride` - 每个顶点的字节数
    pub fn vertex_buffer_view(&self, stride: u32) -> VertexBufferView {
        VertexBufferView {
            address: self.address,
            size: self.size.min(u32::MAX as u64) as u32,
            stride,
        }
    }

    /// 显存统计里的字节数，只计 GPU 本地内存
    pub(crate) fn gpu_bytes(&self) -> u64 {
        if self.heap == HeapKind::Default {
            self.size
        } else {
            0
        }
    }
}

impl GpuResource for Buffer {
    fn raw_resource(&self) -> RawResource {
        self.raw
    }

    fn layout(&self) -> ResourceLayout {
        ResourceLayout::Buffer { size: self.size, heap: self.heap }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.release.retire(Retired::Resource {
            raw: self.raw,
            gpu_bytes: self.gpu_bytes(),
            srv_slot: None,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(id: u64, release: &ReleaseQueue) -> Buffer {
        Buffer::new(RawResource::from_raw(id), 256, HeapKind::Default, 0x1000, release.clone())
    }

    #[test]
    fn test_drop_sends_retired_record() {
        let (queue, mut deferred) = DeferredReleases::new();
        drop(buffer(7, &queue));

        assert_eq!(deferred.stamp(FenceValue::new(3), FenceValue::ZERO), 1);
        assert_eq!(deferred.pending(), 1);
        let ready = deferred.collect(FenceValue::new(3), FenceValue::ZERO);
        assert_eq!(
            ready,
            vec![Retired::Resource { raw: RawResource::from_raw(7), gpu_bytes: 256, srv_slot: None }]
        );
    }

    #[test]
    fn test_release_waits_for_both_queues() {
        let (queue, mut deferred) = DeferredReleases::new();
        drop(buffer(1, &queue));
        deferred.stamp(FenceValue::new(2), FenceValue::new(5));
        drop(buffer(2, &queue));
        deferred.stamp(FenceValue::new(4), FenceValue::new(5));

        assert!(deferred.collect(FenceValue::new(4), FenceValue::new(4)).is_empty());
        assert_eq!(deferred.collect(FenceValue::new(3), FenceValue::new(5)).len(), 1);
        assert_eq!(deferred.pending(), 1);
        assert_eq!(deferred.collect(FenceValue::new(4), FenceValue::new(5)).len(), 1);
    }

    #[test]
    fn test_drain_all_includes_unstamped() {
        let (queue, mut deferred) = DeferredReleases::new();
        drop(buffer(1, &queue));
        deferred.stamp(FenceValue::new(9), FenceValue::ZERO);
        drop(buffer(2, &queue));
        assert_eq!(deferred.drain_all().len(), 2);
        assert_eq!(deferred.pending(), 0);
    }

    #[test]
    fn test_vertex_buffer_view_covers_buffer() {
        let (queue, _deferred) = DeferredReleases::new();
        let buf = buffer(3, &queue);
        let view = buf.vertex_buffer_view(16);
        assert_eq!(view, VertexBufferView { address: 0x1000, size: 256, stride: 16 });
    }
}
