//! 合成交换链
//!
//! 覆盖层窗口是透明的，交换链通过 DirectComposition 而不是直接绑定 HWND 呈现：
//! 交换链作为 visual 的内容挂到窗口的合成 target 上，使用预乘 alpha。
//! 帧延迟由可等待对象控制，后缓冲未就绪时跳过本帧而不是阻塞。

use tracing::{debug, info};
use windows::core::Interface;
use windows::Win32::Foundation::{CloseHandle, HANDLE, HWND, WAIT_OBJECT_0};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::DirectComposition::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;
use windows::Win32::System::Threading::WaitForSingleObjectEx;

use crate::core::error::{GraphicsError, Result};
use crate::gfx::types::SwapchainDesc;
use super::convert;

pub(super) struct CompositionSwapchain {
    swapchain: IDXGISwapChain4,
    // 合成对象必须和交换链一样长寿
    _composition: IDCompositionDevice,
    _target: IDCompositionTarget,
    _visual: IDCompositionVisual,
    latency_handle: HANDLE,
    /// 已经从可等待对象取得、尚未用 Present 归还的令牌
    holding_token: bool,
    flags: DXGI_SWAP_CHAIN_FLAG,
    allow_tearing: bool,
    buffer_count: u32,
}

impl CompositionSwapchain {
    pub fn new(
        factory: &IDXGIFactory6,
        queue: &ID3D12CommandQueue,
        hwnd: HWND,
        desc: &SwapchainDesc,
    ) -> Result<Self> {
        let mut flags = DXGI_SWAP_CHAIN_FLAG_FRAME_LATENCY_WAITABLE_OBJECT;
        if desc.allow_tearing {
            flags |= DXGI_SWAP_CHAIN_FLAG_ALLOW_TEARING;
        }
        let sc_desc = DXGI_SWAP_CHAIN_DESC1 {
            Width: desc.width,
            Height: desc.height,
            Format: convert::dxgi_format(desc.format),
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
            BufferCount: desc.buffer_count,
            Scaling: DXGI_SCALING_STRETCH,
            SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
            AlphaMode: DXGI_ALPHA_MODE_PREMULTIPLIED,
            Flags: flags.0 as u32,
            ..Default::default()
        };

        unsafe {
            let sc1 = factory
                .CreateSwapChainForComposition(queue, &sc_desc, None)
                .map_err(|e| GraphicsError::Swapchain(format!("Couldn't create swap chain: {e}")))?;

            debug!("Setting up DirectComposition...");
            let composition: IDCompositionDevice = DCompositionCreateDevice(None).map_err(|e| {
                GraphicsError::CompositionTarget(format!("Couldn't create DirectComposition device: {e}"))
            })?;
            let target = composition.CreateTargetForHwnd(hwnd, true).map_err(|e| {
                GraphicsError::CompositionTarget(format!("Couldn't create DirectComposition target: {e}"))
            })?;
            let visual = composition.CreateVisual().map_err(|e| {
                GraphicsError::CompositionTarget(format!("Couldn't create DirectComposition visual: {e}"))
            })?;
            visual
                .SetContent(&sc1)
                .and_then(|_| target.SetRoot(&visual))
                .and_then(|_| composition.Commit())
                .map_err(|e| GraphicsError::CompositionTarget(format!("Couldn't attach swap chain to window: {e}")))?;

            let swapchain: IDXGISwapChain4 = sc1
                .cast()
                .map_err(|e| GraphicsError::Swapchain(format!("Couldn't get IDXGISwapChain4: {e}")))?;
            let latency_handle = swapchain.GetFrameLatencyWaitableObject();

            info!(width = desc.width, height = desc.height, buffers = desc.buffer_count, "Swap chain created");

            Ok(Self {
                swapchain,
                _composition: composition,
                _target: target,
                _visual: visual,
                latency_handle,
                holding_token: false,
                flags,
                allow_tearing: desc.allow_tearing,
                buffer_count: desc.buffer_count,
            })
        }
    }

    /// 不阻塞地检查后缓冲是否可用
    ///
    /// 可等待对象每次成功等待会消耗一个令牌，令牌在 Present 时归还。
    /// 同一帧内重复询问时直接复用已经取得的令牌。
    pub fn ready(&mut self) -> bool {
        if self.holding_token {
            return true;
        }
        let signaled = unsafe { WaitForSingleObjectEx(self.latency_handle, 0, false) } == WAIT_OBJECT_0;
        self.holding_token = signaled;
        signaled
    }

    pub fn buffer(&self, index: u32) -> Result<ID3D12Resource> {
        unsafe {
            self.swapchain
                .GetBuffer(index)
                .map_err(|e| GraphicsError::Swapchain(format!("Failed to get back buffer {index}: {e}")).into())
        }
    }

    pub fn buffer_count(&self) -> u32 {
        self.buffer_count
    }

    pub fn current_index(&self) -> u32 {
        unsafe { self.swapchain.GetCurrentBackBufferIndex() }
    }

    /// 调整尺寸，调用方保证已经释放所有后缓冲引用且 GPU 空闲
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        unsafe {
            self.swapchain
                .ResizeBuffers(self.buffer_count, width, height, DXGI_FORMAT_UNKNOWN, self.flags)
                .map_err(|e| GraphicsError::Swapchain(format!("Couldn't resize swapchain buffers: {e}")))?;
        }
        Ok(())
    }

    pub fn present(&mut self) -> Result<()> {
        let flags = if self.allow_tearing { DXGI_PRESENT_ALLOW_TEARING } else { DXGI_PRESENT(0) };
        self.holding_token = false;
        unsafe {
            self.swapchain
                .Present(0, flags)
                .ok()
                .map_err(|e| GraphicsError::Swapchain(format!("Present failed: {e}")))?;
        }
        Ok(())
    }
}

impl Drop for CompositionSwapchain {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.latency_handle);
        }
    }
}
