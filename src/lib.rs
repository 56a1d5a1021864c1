//! overlay_render - 透明覆盖层的 Direct3D 12 渲染后端
//!
//! 覆盖层窗口通过 DirectComposition 呈现，背景完全透明。本库负责设备与交换链、
//! 帧同步、描述符堆、纹理和缓冲区、根签名与管线缓存、帧录制，以及每帧的
//! 视口/裁剪栈。
//!
//! # 模块结构
//!
//! - `core`: 基础设施（配置、错误、日志、数学）
//! - `gfx`: 图形后端抽象层，包含 DirectX 12 和 headless 两个实现
//! - `renderer`: 与 API 无关的渲染器
//!
//! # 使用示例
//!
//! ```no_run
//! use overlay_render::gfx::{HeadlessBackend, SurfaceTarget};
//! use overlay_render::renderer::{Renderer, RendererConfig};
//!
//! let backend = Box::new(HeadlessBackend::new(2));
//! let target = SurfaceTarget::Offscreen { width: 1280, height: 720 };
//! let mut renderer = Renderer::with_backend(backend, RendererConfig::default(), target)?;
//!
//! if let Some(mut frame) = renderer.start_frame()? {
//!     if frame.push_scissor(10, 10, 200, 120) {
//!         // 在这里绘制面板
//!         frame.pop_scissor();
//!     }
//!     frame.end()?;
//! }
//! # Ok::<(), overlay_render::core::OverlayError>(())
//! ```

pub mod core;
pub mod gfx;
pub mod renderer;

pub use crate::core::{Color, Config, GraphicsError, OverlayError, Result};
pub use crate::renderer::{Frame, Renderer, RendererConfig, ResourceManager, Texture, TextureRegion};
