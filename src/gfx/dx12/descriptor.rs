//! DX12 描述符堆
//!
//! 封装 ID3D12DescriptorHeap，创建时一次性取出 CPU/GPU 句柄基址和增量大小，
//! 之后由渲染器层的描述符分配器按索引计算句柄。

use windows::Win32::Graphics::Direct3D12::*;

use crate::core::error::{GraphicsError, Result};
use crate::gfx::types::{
    CpuDescriptorHandle, DescriptorHeapInfo, DescriptorType, GpuDescriptorHandle, RawDescriptorHeap,
};
use super::convert;

/// DX12 描述符堆
pub(super) struct Dx12DescriptorHeap {
    /// 底层 DX12 描述符堆
    heap: ID3D12DescriptorHeap,
    /// 描述符类型
    descriptor_type: DescriptorType,
    /// 描述符增量大小
    increment_size: u32,
    /// CPU 句柄基址
    cpu_start: usize,
    /// GPU 句柄基址（仅对着色器可见的堆）
    gpu_start: Option<u64>,
}

impl Dx12DescriptorHeap {
    /// 创建新的 DX12 描述符堆
    ///
    /// # 参数
    ///
    /// * `device` - DX12 设备
    /// * `descriptor_type` - 描述符类型
    /// * `capacity` - 描述符数量
    /// * `shader_visible` - 是否着色器可见
    pub fn new(
        device: &ID3D12Device,
        descriptor_type: DescriptorType,
        capacity: u32,
        shader_visible: bool,
    ) -> Result<Self> {
        let heap_type = convert::descriptor_heap_type(descriptor_type);
        let flags = if shader_visible {
            D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE
        } else {
            D3D12_DESCRIPTOR_HEAP_FLAG_NONE
        };
        let heap_desc = D3D12_DESCRIPTOR_HEAP_DESC {
            Type: heap_type,
            NumDescriptors: capacity,
            Flags: flags,
            NodeMask: 0,
        };

        unsafe {
            let heap: ID3D12DescriptorHeap = device.CreateDescriptorHeap(&heap_desc).map_err(|e| {
                GraphicsError::ResourceCreation(format!(
                    "Failed to create {} descriptor heap: {:?}",
                    descriptor_type.name(),
                    e
                ))
            })?;

            let increment_size = device.GetDescriptorHandleIncrementSize(heap_type);
            let cpu_start = heap.GetCPUDescriptorHandleForHeapStart().ptr;
            let gpu_start = if shader_visible {
                Some(heap.GetGPUDescriptorHandleForHeapStart().ptr)
            } else {
                None
            };

            Ok(Self {
                heap,
                descriptor_type,
                increment_size,
                cpu_start,
                gpu_start,
            })
        }
    }

    /// 获取底层 DX12 描述符堆
    pub fn heap(&self) -> &ID3D12DescriptorHeap {
        &self.heap
    }

    pub fn descriptor_type(&self) -> DescriptorType {
        self.descriptor_type
    }

    /// 交给渲染器的堆信息
    pub fn info(&self, raw: RawDescriptorHeap) -> DescriptorHeapInfo {
        DescriptorHeapInfo {
            raw,
            cpu_start: CpuDescriptorHandle { ptr: self.cpu_start },
            gpu_start: self.gpu_start.map(|ptr| GpuDescriptorHandle { ptr }),
            increment_size: self.increment_size,
        }
    }
}
