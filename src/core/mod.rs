//! 核心功能模块
//!
//! 与具体图形 API 无关的基础设施：数学类型、日志系统、配置管理和错误处理。
//!
//! - `math`：根常量使用的向量、矩阵和颜色类型
//! - `log`：结构化日志
//! - `config`：从 TOML 和命令行加载配置
//! - `error`：统一的错误类型与致命错误分级

pub mod math;
pub mod log;
pub mod config;
pub mod error;

// 重新导出常用类型，方便使用
pub use math::{Color, Matrix4, Vector3, Vector4};
pub use error::{ConfigError, GraphicsError, OverlayError, Result};
pub use config::Config;
