//! 错误处理模块
//!
//! 定义了渲染后端中使用的统一错误类型，使用 `thiserror` 提供友好的错误消息。
//!
//! # 错误分级
//!
//! - **致命的初始化错误**：设备、交换链、合成目标、根签名和管线创建失败。
//!   没有这些对象就无法渲染，库本身不会退出进程，而是通过
//!   [`OverlayError::is_fatal`] 交给程序入口决定终止。
//! - **可恢复的错误**：描述符堆耗尽、参数校验失败等，调用方可以处理。

use thiserror::Error;

/// 渲染后端统一的 Result 类型
pub type Result<T> = std::result::Result<T, OverlayError>;

/// 渲染后端的错误类型
#[derive(Debug, Error)]
pub enum OverlayError {
    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// 图形 API 错误
    #[error("Graphics error: {0}")]
    Graphics(#[from] GraphicsError),

    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 日志系统错误
    #[error("Log error: {0}")]
    Log(String),

    /// 初始化错误
    #[error("Initialization error: {0}")]
    Initialization(String),

    /// 运行时错误
    #[error("Runtime error: {0}")]
    Runtime(String),
}

/// 配置相关的错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 配置文件未找到
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    /// 配置文件解析失败
    #[error("Failed to parse config: {0}")]
    ParseError(String),

    /// 配置值无效
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 图形 API 相关的错误
#[derive(Debug, Error)]
pub enum GraphicsError {
    /// 适配器或设备创建失败
    #[error("Device creation failed: {0}")]
    DeviceCreation(String),

    /// 交换链错误
    #[error("Swapchain error: {0}")]
    Swapchain(String),

    /// 合成目标（DirectComposition）创建失败
    #[error("Composition target setup failed: {0}")]
    CompositionTarget(String),

    /// 根签名创建失败
    #[error("Root signature creation failed: {0}")]
    RootSignatureCreation(String),

    /// 管线状态编译失败
    #[error("Pipeline state compilation failed: {0}")]
    PipelineCompilation(String),

    /// 资源创建失败
    #[error("Resource creation failed: {0}")]
    ResourceCreation(String),

    /// 命令录制或提交失败
    #[error("Command execution failed: {0}")]
    CommandExecution(String),

    /// 描述符堆容量耗尽
    #[error("Descriptor heap '{heap}' exhausted ({capacity} descriptors)")]
    DescriptorHeapExhausted { heap: String, capacity: u32 },

    /// 调用参数不合法
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// 帧结束时视口/裁剪栈不平衡
    #[error("Unbalanced push/pop at end of frame: {scissors} scissor(s), {viewports} viewport(s) left on the stack")]
    UnbalancedClipStack { scissors: usize, viewports: usize },

    /// 当前后端不支持该操作
    #[error("Operation not supported by the {backend} backend: {operation}")]
    Unsupported { backend: &'static str, operation: String },
}

impl GraphicsError {
    /// 是否属于无法恢复的初始化错误
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GraphicsError::DeviceCreation(_)
                | GraphicsError::Swapchain(_)
                | GraphicsError::CompositionTarget(_)
                | GraphicsError::RootSignatureCreation(_)
                | GraphicsError::PipelineCompilation(_)
        )
    }
}

impl OverlayError {
    /// 是否属于致命的初始化错误
    ///
    /// 程序入口在遇到致命错误时记录诊断信息并终止进程，库代码只负责返回错误。
    pub fn is_fatal(&self) -> bool {
        match self {
            OverlayError::Graphics(e) => e.is_fatal(),
            OverlayError::Initialization(_) => true,
            _ => false,
        }
    }
}

#[cfg(windows)]
impl From<windows::core::Error> for GraphicsError {
    fn from(err: windows::core::Error) -> Self {
        GraphicsError::CommandExecution(format!("{} (HRESULT {:#010x})", err.message(), err.code().0))
    }
}

#[cfg(windows)]
impl From<windows::core::Error> for OverlayError {
    fn from(err: windows::core::Error) -> Self {
        OverlayError::Graphics(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let fatal: OverlayError = GraphicsError::DeviceCreation("no adapter".into()).into();
        assert!(fatal.is_fatal());

        let fatal: OverlayError = GraphicsError::PipelineCompilation("bad bytecode".into()).into();
        assert!(fatal.is_fatal());

        let recoverable: OverlayError = GraphicsError::DescriptorHeapExhausted {
            heap: "SRV".into(),
            capacity: 4,
        }
        .into();
        assert!(!recoverable.is_fatal());

        let config: OverlayError = ConfigError::ParseError("eof".into()).into();
        assert!(!config.is_fatal());
    }

    #[test]
    fn test_error_messages() {
        let err = GraphicsError::UnbalancedClipStack { scissors: 1, viewports: 0 };
        assert!(err.to_string().contains("1 scissor(s)"));

        let err: OverlayError = ConfigError::InvalidValue {
            field: "graphics.backbuffers".into(),
            reason: "must be 2 or 3".into(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Configuration error: Invalid value for 'graphics.backbuffers': must be 2 or 3"
        );
    }
}
