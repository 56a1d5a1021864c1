//! 配置管理模块
//!
//! 提供渲染后端配置的加载、解析和管理功能。
//! 支持从 TOML 配置文件加载，也支持命令行参数覆盖。
//!
//! # 配置文件格式 (config.toml)
//!
//! ```toml
//! [window]
//! width = 1280
//! height = 720
//! title = "EG-Overlay"
//!
//! [graphics]
//! backend = "dx12"        # 或 "headless"
//! backbuffers = 2
//! srv_descriptors = 2048
//! debug_layer = false
//! allow_tearing = true
//!
//! [shaders]
//! root_signature = "shaders/root-sig.cso"
//!
//! [logging]
//! level = "info"          # trace, debug, info, warn, error
//! file_output = false
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::error::{ConfigError, Result};

/// 渲染后端配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// 窗口配置
    #[serde(default)]
    pub window: WindowConfig,

    /// 图形配置
    #[serde(default)]
    pub graphics: GraphicsConfig,

    /// 着色器与根签名资源
    #[serde(default)]
    pub shaders: ShaderConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,

    /// 无窗口模式下渲染的帧数（仅命令行）
    #[serde(skip)]
    pub frames: Option<u32>,
}

/// 窗口配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// 窗口宽度
    #[serde(default = "default_width")]
    pub width: u32,

    /// 窗口高度
    #[serde(default = "default_height")]
    pub height: u32,

    /// 窗口标题
    #[serde(default = "default_title")]
    pub title: String,
}

/// 图形配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphicsConfig {
    /// 图形后端选择
    #[serde(default = "default_backend")]
    pub backend: GraphicsBackend,

    /// 交换链后缓冲数量（2 或 3）
    #[serde(default = "default_backbuffers")]
    pub backbuffers: u32,

    /// 着色器可见 SRV 堆的容量
    #[serde(default = "default_srv_descriptors")]
    pub srv_descriptors: u32,

    /// 是否启用 D3D12 调试层
    #[serde(default)]
    pub debug_layer: bool,

    /// 呈现时允许撕裂（可变刷新率显示器）
    #[serde(default = "default_allow_tearing")]
    pub allow_tearing: bool,

    /// headless 后端允许挂起的提交数（模拟 GPU 延迟）
    #[serde(default = "default_headless_latency")]
    pub headless_latency: usize,
}

/// 图形后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphicsBackend {
    /// DirectX 12 后端（仅 Windows）
    Dx12,
    /// CPU 模拟的无窗口后端
    Headless,
}

/// 着色器资源配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShaderConfig {
    /// 序列化根签名（.cso）路径
    #[serde(default = "default_root_signature")]
    pub root_signature: PathBuf,

    /// 演示用顶点着色器字节码
    #[serde(default)]
    pub vertex: Option<PathBuf>,

    /// 演示用像素着色器字节码
    #[serde(default)]
    pub pixel: Option<PathBuf>,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// 是否输出到文件
    #[serde(default)]
    pub file_output: bool,

    /// 日志文件路径
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

// 默认值函数
fn default_width() -> u32 { 1280 }
fn default_height() -> u32 { 720 }
fn default_title() -> String { "EG-Overlay".to_string() }
fn default_backend() -> GraphicsBackend {
    if cfg!(windows) { GraphicsBackend::Dx12 } else { GraphicsBackend::Headless }
}
fn default_backbuffers() -> u32 { 2 }
fn default_srv_descriptors() -> u32 { 2048 }
fn default_allow_tearing() -> bool { true }
fn default_headless_latency() -> usize { 2 }
fn default_root_signature() -> PathBuf { PathBuf::from("shaders/root-sig.cso") }
fn default_log_level() -> LogLevel { LogLevel::Info }
fn default_log_file() -> String { "eg-overlay.log".to_string() }

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            title: default_title(),
        }
    }
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            backbuffers: default_backbuffers(),
            srv_descriptors: default_srv_descriptors(),
            debug_layer: false,
            allow_tearing: default_allow_tearing(),
            headless_latency: default_headless_latency(),
        }
    }
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            root_signature: default_root_signature(),
            vertex: None,
            pixel: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: false,
            log_file: default_log_file(),
        }
    }
}

impl Config {
    /// 从配置文件加载
    ///
    /// # 参数
    ///
    /// * `path` - 配置文件路径
    ///
    /// # 返回值
    ///
    /// 成功返回 `Config` 实例，失败返回错误
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let contents = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path_str))?;

        toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(e.to_string()).into())
    }

    /// 从配置文件加载，如果文件不存在或无法解析则使用默认配置
    pub fn from_file_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::from_file(path).unwrap_or_default()
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// 从命令行参数覆盖配置
    ///
    /// 支持的参数：
    /// - `--dx12` / `--headless`: 选择图形后端
    /// - `--width <value>` / `--height <value>`: 设置窗口尺寸
    /// - `--backbuffers <value>`: 后缓冲数量
    /// - `--frames <value>`: 无窗口模式下渲染的帧数
    pub fn apply_args<I>(&mut self, args: I)
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|s| s.as_ref().to_string()).collect();

        if args.iter().any(|a| a == "--dx12") {
            self.graphics.backend = GraphicsBackend::Dx12;
        }

        if args.iter().any(|a| a == "--headless") {
            self.graphics.backend = GraphicsBackend::Headless;
        }

        let value_of = |flag: &str| -> Option<u32> {
            let idx = args.iter().position(|a| a == flag)?;
            args.get(idx + 1)?.parse().ok()
        };

        if let Some(width) = value_of("--width") {
            self.window.width = width;
        }
        if let Some(height) = value_of("--height") {
            self.window.height = height;
        }
        if let Some(count) = value_of("--backbuffers") {
            self.graphics.backbuffers = count;
        }
        if let Some(frames) = value_of("--frames") {
            self.frames = Some(frames);
        }
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::InvalidValue {
                field: "window.width/height".to_string(),
                reason: "Window dimensions must be greater than 0".to_string(),
            }.into());
        }

        if !(2..=3).contains(&self.graphics.backbuffers) {
            return Err(ConfigError::InvalidValue {
                field: "graphics.backbuffers".to_string(),
                reason: "Backbuffer count must be 2 or 3".to_string(),
            }.into());
        }

        if !(1..=1_000_000).contains(&self.graphics.srv_descriptors) {
            return Err(ConfigError::InvalidValue {
                field: "graphics.srv_descriptors".to_string(),
                reason: "SRV heap size must be between 1 and 1000000".to_string(),
            }.into());
        }

        if self.graphics.backend == GraphicsBackend::Dx12 && !cfg!(windows) {
            return Err(ConfigError::InvalidValue {
                field: "graphics.backend".to_string(),
                reason: "The dx12 backend is only available on Windows".to_string(),
            }.into());
        }

        Ok(())
    }
}

impl GraphicsBackend {
    /// 获取后端名称
    pub fn name(&self) -> &'static str {
        match self {
            GraphicsBackend::Dx12 => "DirectX 12",
            GraphicsBackend::Headless => "Headless",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.window.height, 720);
        assert_eq!(config.graphics.backbuffers, 2);
        assert_eq!(config.graphics.srv_descriptors, 2048);
        assert_eq!(config.shaders.root_signature, PathBuf::from("shaders/root-sig.cso"));
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.graphics.backend = GraphicsBackend::Headless;
        assert!(config.validate().is_ok());

        config.window.width = 0;
        assert!(config.validate().is_err());

        config.window.width = 640;
        config.graphics.backbuffers = 4;
        assert!(config.validate().is_err());

        config.graphics.backbuffers = 3;
        config.graphics.srv_descriptors = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_apply_args() {
        let mut config = Config::default();
        config.apply_args(["overlay", "--headless", "--width", "300", "--height", "200", "--frames", "12"]);

        assert_eq!(config.graphics.backend, GraphicsBackend::Headless);
        assert_eq!(config.window.width, 300);
        assert_eq!(config.window.height, 200);
        assert_eq!(config.frames, Some(12));

        // 无法解析的值保持原样
        config.apply_args(["--width", "wide"]);
        assert_eq!(config.window.width, 300);
    }

    #[test]
    fn test_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [graphics]
            backend = "headless"
            backbuffers = 3

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.graphics.backend, GraphicsBackend::Headless);
        assert_eq!(config.graphics.backbuffers, 3);
        assert_eq!(config.graphics.srv_descriptors, 2048);
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.window.title, "EG-Overlay");
    }
}
