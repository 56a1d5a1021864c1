//! DirectX 12 设备上下文
//!
//! 负责后端初始化中与窗口无关的部分：
//!
//! 1. 启用调试层（可选）
//! 2. 创建 DXGI 工厂并选择高性能适配器
//! 3. 创建 D3D12 设备并检查特性级别
//! 4. 创建图形队列和复制队列
//! 5. 创建栅栏等待用的事件

use tracing::{debug, info, warn};
use windows::core::Interface;
use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::*;
use windows::Win32::System::Threading::CreateEventW;

use crate::core::config::GraphicsConfig;
use crate::core::error::{GraphicsError, Result};
use crate::gfx::types::{AdapterInfo, QueueKind};
use super::convert;

/// DX12 设备上下文
///
/// - `factory`：DXGI 工厂，之后用于创建交换链
/// - `adapter`：选中的适配器，用于查询显存
/// - `device`：D3D12 设备
/// - `direct_queue` / `copy_queue`：图形队列与复制队列
/// - `fence_event`：阻塞等待栅栏时使用的事件
pub(super) struct Dx12Context {
    pub factory: IDXGIFactory6,
    pub adapter: IDXGIAdapter4,
    pub device: ID3D12Device,
    pub direct_queue: ID3D12CommandQueue,
    pub copy_queue: ID3D12CommandQueue,
    pub fence_event: HANDLE,
    pub adapter_info: AdapterInfo,
}

impl Dx12Context {
    /// 创建设备上下文
    ///
    /// # 参数
    ///
    /// * `config` - 图形配置，决定是否启用调试层
    ///
    /// # 返回值
    ///
    /// 任何一步失败都返回 [`GraphicsError::DeviceCreation`]
    pub fn new(config: &GraphicsConfig) -> Result<Self> {
        if config.debug_layer {
            enable_debug_layer();
        }

        unsafe {
            let flags = if config.debug_layer { DXGI_CREATE_FACTORY_DEBUG } else { DXGI_CREATE_FACTORY_FLAGS(0) };
            let factory: IDXGIFactory6 = CreateDXGIFactory2(flags)
                .map_err(|e| GraphicsError::DeviceCreation(format!("Couldn't create DXGI factory: {e}")))?;

            // 首个高性能适配器，通常是独立显卡
            let adapter: IDXGIAdapter4 = factory
                .EnumAdapterByGpuPreference(0, DXGI_GPU_PREFERENCE_HIGH_PERFORMANCE)
                .map_err(|e| GraphicsError::DeviceCreation(format!("Couldn't get GPU adapter: {e}")))?;
            let desc = adapter
                .GetDesc1()
                .map_err(|e| GraphicsError::DeviceCreation(format!("Couldn't get adapter description: {e}")))?;
            let description = String::from_utf16_lossy(&desc.Description)
                .trim_matches(char::from(0))
                .to_string();

            let mut budget = DXGI_QUERY_VIDEO_MEMORY_INFO::default();
            if adapter
                .QueryVideoMemoryInfo(0, DXGI_MEMORY_SEGMENT_GROUP_LOCAL, &mut budget)
                .is_err()
            {
                warn!("Couldn't query adapter memory budget");
            }

            info!(
                vendor = format!("{:04X}", desc.VendorId),
                device = format!("{:04X}", desc.DeviceId),
                revision = desc.Revision,
                "GPU: {}",
                description
            );
            info!("Memory budget: {:.2} MiB", budget.Budget as f64 / 1024.0 / 1024.0);

            let mut device: Option<ID3D12Device> = None;
            D3D12CreateDevice(&adapter, D3D_FEATURE_LEVEL_11_0, &mut device)
                .map_err(|e| GraphicsError::DeviceCreation(format!("Couldn't create D3D12 device: {e}")))?;
            let device = device.ok_or_else(|| GraphicsError::DeviceCreation("D3D12CreateDevice returned no device".to_string()))?;
            super::set_debug_name(&device.cast::<ID3D12Object>()?, "EG-Overlay D3D12 Device");

            let feature_level = max_feature_level(&device);
            info!("Max feature level: {}, 11_0 requested", feature_level);

            let direct_queue = create_command_queue(&device, QueueKind::Direct)?;
            let copy_queue = create_command_queue(&device, QueueKind::Copy)?;

            let fence_event = CreateEventW(None, false, false, None)
                .map_err(|e| GraphicsError::DeviceCreation(format!("Couldn't create fence event: {e}")))?;

            debug!("D3D12 device created successfully");

            Ok(Self {
                factory,
                adapter,
                device,
                direct_queue,
                copy_queue,
                fence_event,
                adapter_info: AdapterInfo {
                    description,
                    dedicated_video_memory: desc.DedicatedVideoMemory as u64,
                    feature_level: feature_level.to_string(),
                },
            })
        }
    }

    pub fn queue(&self, kind: QueueKind) -> &ID3D12CommandQueue {
        match kind {
            QueueKind::Direct => &self.direct_queue,
            QueueKind::Copy => &self.copy_queue,
        }
    }

    /// 驱动报告的本地显存占用
    pub fn local_memory_usage(&self) -> Result<u64> {
        let mut info = DXGI_QUERY_VIDEO_MEMORY_INFO::default();
        unsafe {
            self.adapter
                .QueryVideoMemoryInfo(0, DXGI_MEMORY_SEGMENT_GROUP_LOCAL, &mut info)
                .map_err(|e| GraphicsError::CommandExecution(format!("Couldn't query video memory info: {e}")))?;
        }
        Ok(info.CurrentUsage)
    }
}

impl Drop for Dx12Context {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.fence_event);
        }
    }
}

/// 启用 D3D12 调试层
fn enable_debug_layer() {
    unsafe {
        let mut debug: Option<ID3D12Debug> = None;
        match D3D12GetDebugInterface(&mut debug) {
            Ok(()) => {
                if let Some(debug) = debug {
                    debug.EnableDebugLayer();
                    warn!("D3D12 debug validation layer enabled. This WILL negatively impact performance.");
                }
            }
            Err(e) => warn!("Failed to enable DX12 Debug Layer: {}", e),
        }
    }
}

fn max_feature_level(device: &ID3D12Device) -> &'static str {
    let requested = [
        D3D_FEATURE_LEVEL_11_0,
        D3D_FEATURE_LEVEL_11_1,
        D3D_FEATURE_LEVEL_12_0,
        D3D_FEATURE_LEVEL_12_1,
        D3D_FEATURE_LEVEL_12_2,
    ];
    let mut levels = D3D12_FEATURE_DATA_FEATURE_LEVELS {
        NumFeatureLevels: requested.len() as u32,
        pFeatureLevelsRequested: requested.as_ptr(),
        MaxSupportedFeatureLevel: D3D_FEATURE_LEVEL_11_0,
    };
    let supported = unsafe {
        device.CheckFeatureSupport(
            D3D12_FEATURE_FEATURE_LEVELS,
            &mut levels as *mut _ as *mut std::ffi::c_void,
            std::mem::size_of::<D3D12_FEATURE_DATA_FEATURE_LEVELS>() as u32,
        )
    };
    match supported {
        Ok(()) => convert::feature_level_name(levels.MaxSupportedFeatureLevel),
        Err(_) => "Unknown",
    }
}

fn create_command_queue(device: &ID3D12Device, kind: QueueKind) -> Result<ID3D12CommandQueue> {
    let desc = D3D12_COMMAND_QUEUE_DESC {
        Type: convert::command_list_type(kind),
        Priority: 0,
        Flags: D3D12_COMMAND_QUEUE_FLAG_NONE,
        NodeMask: 0,
    };
    unsafe {
        let queue: ID3D12CommandQueue = device.CreateCommandQueue(&desc).map_err(|e| {
            GraphicsError::DeviceCreation(format!("Couldn't create {} command queue: {e}", kind.name()))
        })?;
        super::set_debug_name(
            &queue.cast::<ID3D12Object>()?,
            &format!("EG-Overlay D3D12 {} Command Queue", kind.name()),
        );
        Ok(queue)
    }
}
