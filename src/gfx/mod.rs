//! 图形后端模块
//!
//! 本模块封装了具体图形 API 的底层实现：
//! - DirectX 12：Windows 上的实际后端，经由 DirectComposition 呈现透明窗口
//! - Headless：CPU 模拟的设备，用于测试和无窗口运行
//!
//! 两个后端都实现了统一的 [`GpuBackend`] trait，渲染器只依赖这个 trait。

pub mod backend;
pub mod headless;
pub mod types;
#[cfg(windows)]
pub mod dx12;

use tracing::info;

use crate::core::config::{GraphicsBackend, GraphicsConfig};
use crate::core::error::Result;

pub use backend::{GpuBackend, SurfaceTarget};
pub use headless::{HeadlessBackend, HeadlessProbe};
pub use types::*;
#[cfg(windows)]
pub use dx12::Dx12Backend;

/// 按配置创建图形后端
///
/// # 参数
///
/// * `config` - 图形配置
///
/// # 返回值
///
/// 在非 Windows 平台上请求 dx12 后端时返回 [`GraphicsError::Unsupported`](crate::core::error::GraphicsError::Unsupported)
pub fn create_backend(config: &GraphicsConfig) -> Result<Box<dyn GpuBackend>> {
    info!("Creating {} backend", config.backend.name());
    match config.backend {
        GraphicsBackend::Headless => Ok(Box::new(HeadlessBackend::new(config.headless_latency))),
        #[cfg(windows)]
        GraphicsBackend::Dx12 => Ok(Box::new(Dx12Backend::new(config)?)),
        #[cfg(not(windows))]
        GraphicsBackend::Dx12 => Err(crate::core::error::GraphicsError::Unsupported {
            backend: "dx12",
            operation: "running on this platform".to_string(),
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_headless_backend() {
        let config = GraphicsConfig { backend: GraphicsBackend::Headless, ..Default::default() };
        let backend = create_backend(&config).unwrap();
        assert_eq!(backend.name(), "headless");
    }

    #[cfg(not(windows))]
    #[test]
    fn test_dx12_unavailable() {
        let config = GraphicsConfig { backend: GraphicsBackend::Dx12, ..Default::default() };
        let err = create_backend(&config).err().unwrap();
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("dx12"));
    }
}
