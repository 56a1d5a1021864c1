//! 描述符管理模块
//!
//! - [`DescriptorHeap`]：描述符堆的包装，按索引计算 CPU/GPU 句柄并做边界检查
//! - [`SrvAllocator`]：着色器可见 SRV 堆的槽位分配器，释放的槽位按先进先出复用
//!
//! SRV 槽位的释放与纹理一起走延迟释放队列，只有在引用它的帧全部完成后
//! 才会回到空闲队列，所以复用的槽位不会被仍在执行的命令读取。

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::core::error::{GraphicsError, Result};
use crate::gfx::{
    CpuDescriptorHandle, DescriptorHeapInfo, DescriptorType, GpuBackend, GpuDescriptorHandle, RawDescriptorHeap,
    RawObject,
};
use super::resource::{ReleaseQueue, Retired};

/// 描述符堆
///
/// 渲染器内部的 RTV/DSV/SRV 堆由渲染器显式销毁；通过
/// [`ResourceManager::create_descriptor_heap`](super::ResourceManager::create_descriptor_heap)
/// 创建的堆在 drop 时进入延迟释放队列。
pub struct DescriptorHeap {
    info: DescriptorHeapInfo,
    kind: DescriptorType,
    capacity: u32,
    release: Option<ReleaseQueue>,
}

impl DescriptorHeap {
    /// 创建描述符堆
    ///
    /// # 参数
    ///
    /// * `backend` - 图形后端
    /// * `kind` - 描述符类型
    /// * `capacity` - 描述符数量
    /// * `shader_visible` - 是否着色器可见，只有 SRV 和采样器堆可以设为可见
    /// * `name` - 调试名称
    pub(crate) fn create(
        backend: &mut dyn GpuBackend,
        kind: DescriptorType,
        capacity: u32,
        shader_visible: bool,
        name: &str,
    ) -> Result<Self> {
        let info = backend.create_descriptor_heap(kind, capacity, shader_visible)?;
        backend.set_object_name(RawObject::DescriptorHeap(info.raw), name);
        debug!(kind = kind.name(), capacity, shader_visible, name, "Descriptor heap ready");

        Ok(Self {
            info,
            kind,
            capacity,
            release: None,
        })
    }

    pub(crate) fn with_release_queue(mut self, release: ReleaseQueue) -> Self {
        self.release = Some(release);
        self
    }

    pub fn raw(&self) -> RawDescriptorHeap {
        self.info.raw
    }

    pub fn kind(&self) -> DescriptorType {
        self.kind
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn is_shader_visible(&self) -> bool {
        self.info.gpu_start.is_some()
    }

    pub fn increment_size(&self) -> u32 {
        self.info.increment_size
    }

    /// 第 `index` 个描述符的 CPU 句柄
    pub fn cpu_handle(&self, index: u32) -> Result<CpuDescriptorHandle> {
        self.check_index(index)?;
        Ok(self.info.cpu_start.offset(index, self.info.increment_size))
    }

    /// 第 `index` 个描述符的 GPU 句柄，堆不是着色器可见时返回错误
    pub fn gpu_handle(&self, index: u32) -> Result<GpuDescriptorHandle> {
        self.check_index(index)?;
        let start = self.info.gpu_start.ok_or_else(|| {
            GraphicsError::InvalidArgument(format!("{} heap is not shader visible", self.kind.name()))
        })?;
        Ok(start.offset(index, self.info.increment_size))
    }

    fn check_index(&self, index: u32) -> Result<()> {
        if index >= self.capacity {
            return Err(GraphicsError::InvalidArgument(format!(
                "descriptor index {index} out of range for {} heap of {}",
                self.kind.name(),
                self.capacity
            ))
            .into());
        }
        Ok(())
    }
}

impl Drop for DescriptorHeap {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release.retire(Retired::Object(RawObject::DescriptorHeap(self.info.raw)));
        }
    }
}

/// 描述符堆使用统计
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DescriptorHeapStats {
    /// 描述符类型
    pub descriptor_type: DescriptorType,
    /// 总容量
    pub capacity: u32,
    /// 已使用数量
    pub used: u32,
    /// 可用数量（含复用队列里的槽位）
    pub available: u32,
    /// 复用过的槽位次数
    pub reused: u64,
    /// 使用率 (0.0 - 1.0)
    pub usage_ratio: f32,
}

impl DescriptorHeapStats {
    pub fn new(descriptor_type: DescriptorType, capacity: u32, used: u32, reused: u64) -> Self {
        let available = capacity.saturating_sub(used);
        let usage_ratio = if capacity > 0 { used as f32 / capacity as f32 } else { 0.0 };

        Self {
            descriptor_type,
            capacity,
            used,
            available,
            reused,
            usage_ratio,
        }
    }
}

/// SRV 槽位分配器
///
/// 优先复用已经释放的槽位（最早释放的先用），没有可复用的槽位时
/// 使用下一个从未分配过的槽位。
#[derive(Debug)]
pub struct SrvAllocator {
    capacity: u32,
    next_unused: u32,
    reuse: VecDeque<u32>,
    live: u32,
    reused: u64,
}

impl SrvAllocator {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            next_unused: 0,
            reuse: VecDeque::new(),
            live: 0,
            reused: 0,
        }
    }

    /// 分配一个槽位
    ///
    /// # 返回值
    ///
    /// 堆已满时返回 [`GraphicsError::DescriptorHeapExhausted`]
    pub fn allocate(&mut self) -> Result<u32> {
        let slot = if let Some(slot) = self.reuse.pop_front() {
            self.reused += 1;
            slot
        } else if self.next_unused < self.capacity {
            let slot = self.next_unused;
            self.next_unused += 1;
            slot
        } else {
            return Err(GraphicsError::DescriptorHeapExhausted {
                heap: "shader-visible SRV".to_string(),
                capacity: self.capacity,
            }
            .into());
        };
        self.live += 1;
        Ok(slot)
    }

    /// 归还槽位，调用方保证 GPU 已不再读取它
    pub fn free(&mut self, slot: u32) {
        if slot >= self.next_unused || self.reuse.contains(&slot) {
            warn!(slot, "Freeing an SRV slot that is not allocated");
            return;
        }
        self.reuse.push_back(slot);
        self.live -= 1;
    }

    pub fn live(&self) -> u32 {
        self.live
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn stats(&self) -> DescriptorHeapStats {
        DescriptorHeapStats::new(DescriptorType::ShaderResourceView, self.capacity, self.live, self.reused)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::HeadlessBackend;

    #[test]
    fn test_handles_are_bounds_checked() {
        let mut backend = HeadlessBackend::new(0);
        let heap = DescriptorHeap::create(&mut backend, DescriptorType::RenderTargetView, 3, false, "RTV").unwrap();

        let first = heap.cpu_handle(0).unwrap();
        let last = heap.cpu_handle(2).unwrap();
        assert_eq!(last.ptr - first.ptr, 2 * heap.increment_size() as usize);
        assert!(heap.cpu_handle(3).is_err());
        // 不可见的堆没有 GPU 句柄
        assert!(heap.gpu_handle(0).is_err());
    }

    #[test]
    fn test_gpu_handles_for_shader_visible_heap() {
        let mut backend = HeadlessBackend::new(0);
        let heap = DescriptorHeap::create(&mut backend, DescriptorType::ShaderResourceView, 8, true, "SRV").unwrap();

        let base = heap.gpu_handle(0).unwrap();
        assert_eq!(heap.gpu_handle(5).unwrap().ptr, base.ptr + 5 * heap.increment_size() as u64);
        assert!(heap.gpu_handle(8).is_err());
    }

    #[test]
    fn test_rtv_heap_cannot_be_shader_visible() {
        let mut backend = HeadlessBackend::new(0);
        assert!(DescriptorHeap::create(&mut backend, DescriptorType::RenderTargetView, 2, true, "RTV").is_err());
    }

    #[test]
    fn test_srv_slots_are_reused_in_release_order() {
        let mut alloc = SrvAllocator::new(4);
        let slots: Vec<u32> = (0..4).map(|_| alloc.allocate().unwrap()).collect();
        assert_eq!(slots, vec![0, 1, 2, 3]);

        let err = alloc.allocate().unwrap_err();
        assert!(err.to_string().contains("exhausted"));

        alloc.free(2);
        alloc.free(0);
        assert_eq!(alloc.allocate().unwrap(), 2);
        assert_eq!(alloc.allocate().unwrap(), 0);

        let stats = alloc.stats();
        assert_eq!(stats.used, 4);
        assert_eq!(stats.reused, 2);
        assert_eq!(stats.usage_ratio, 1.0);
    }

    #[test]
    fn test_double_free_is_ignored() {
        let mut alloc = SrvAllocator::new(2);
        let slot = alloc.allocate().unwrap();
        alloc.free(slot);
        alloc.free(slot);
        alloc.free(1);
        assert_eq!(alloc.live(), 0);
        assert_eq!(alloc.stats().available, 2);
    }
}
