//! EG-Overlay 渲染后端演示程序
//!
//! 可以通过配置文件或命令行参数选择使用的图形后端。
//!
//! # 使用方法
//!
//! ```bash
//! # 使用配置文件
//! cargo run
//!
//! # 无窗口运行 300 帧
//! cargo run -- --headless --frames 300
//! ```
//!
//! - dx12：创建透明、置顶的 winit 窗口，经由 DirectComposition 呈现
//! - headless：渲染固定帧数后输出统计信息

use std::time::Instant;

use anyhow::{anyhow, Context};
use raw_window_handle::HasWindowHandle;
use tracing::{debug, error, info, warn};
use winit::dpi::PhysicalSize;
use winit::event::{Event, WindowEvent};
use winit::event_loop::EventLoop;
use winit::window::{Window, WindowBuilder, WindowLevel};

use overlay_render::core::config::GraphicsBackend;
use overlay_render::core::log;
use overlay_render::frame_span;
use overlay_render::gfx::{PipelineStateDesc, PrimitiveTopology, SurfaceTarget, TextureFormat};
use overlay_render::renderer::{PipelineId, Renderer, Texture, TextureRegion};
use overlay_render::{Color, Config, OverlayError};

/// 无窗口模式的默认帧数
const DEFAULT_HEADLESS_FRAMES: u32 = 120;

/// 演示纹理边长
const PANEL_TEXTURE_SIZE: u32 = 64;

/// 应用程序入口点
///
/// # 初始化流程
///
/// 1. 加载配置文件（config.toml）
/// 2. 应用命令行参数覆盖
/// 3. 初始化日志系统
/// 4. 创建渲染器并进入帧循环
///
/// 致命的初始化错误（设备、交换链、合成目标、根签名、管线）记录后以状态 1 退出。
fn main() {
    let mut config = Config::from_file_or_default("config.toml");
    config.apply_args(std::env::args());

    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    let log_file = config.logging.file_output.then_some(config.logging.log_file.as_str());
    if let Err(e) = log::init_logger(config.logging.level, config.logging.file_output, log_file) {
        eprintln!("Couldn't initialize logging: {}", e);
    }
    info!(version = env!("CARGO_PKG_VERSION"), "EG-Overlay renderer starting");
    info!(
        backend = config.graphics.backend.name(),
        width = config.window.width,
        height = config.window.height,
        backbuffers = config.graphics.backbuffers,
        "Graphics configuration"
    );

    let result = match config.graphics.backend {
        GraphicsBackend::Headless => run_headless(&config),
        GraphicsBackend::Dx12 => run_windowed(&config),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
    info!("Shut down cleanly");
}

/// 演示场景：一张棋盘格纹理画在几个嵌套裁剪的面板里
struct Demo {
    texture: Texture,
    pipeline: Option<PipelineId>,
    started: Instant,
    tint: Color,
}

impl Demo {
    fn new(renderer: &mut Renderer, config: &Config) -> anyhow::Result<Self> {
        let mut resources = renderer.resources();
        let mut texture = resources.texture_new_2d(TextureFormat::Rgba8Unorm, PANEL_TEXTURE_SIZE, PANEL_TEXTURE_SIZE, 1)?;
        resources.texture_set_name(&texture, "Demo Panel");
        resources.texture_write_pixels(
            &mut texture,
            TextureRegion::new(0, 0, PANEL_TEXTURE_SIZE, PANEL_TEXTURE_SIZE),
            TextureFormat::Rgba8Unorm,
            &checkerboard(PANEL_TEXTURE_SIZE, 0),
        )?;

        let pipeline = match (&config.shaders.vertex, &config.shaders.pixel) {
            (Some(vs), Some(ps)) if renderer.default_root_signature().is_some() => {
                let vs = std::fs::read(vs).with_context(|| format!("reading {}", vs.display()))?;
                let ps = std::fs::read(ps).with_context(|| format!("reading {}", ps.display()))?;
                Some(renderer.create_pipeline_state(&PipelineStateDesc::new(vs, ps))?)
            }
            _ => {
                warn!("No demo shaders configured, frames will only be cleared");
                None
            }
        };

        Ok(Self {
            texture,
            pipeline,
            started: Instant::now(),
            tint: Color::from_rgba_u32(0xFFFFFFE0),
        })
    }

    /// 渲染一帧，呈现目标不可用时直接返回
    fn render(&mut self, renderer: &mut Renderer) -> overlay_render::Result<()> {
        let Some(mut frame) = renderer.start_frame()? else {
            return Ok(());
        };
        let _span = frame_span!(frame.number()).entered();

        // 每 30 帧在帧中间重写一次纹理
        if frame.number() % 30 == 0 {
            let phase = (frame.number() / 30) as u32;
            frame.resources().texture_write_pixels(
                &mut self.texture,
                TextureRegion::new(0, 0, PANEL_TEXTURE_SIZE, PANEL_TEXTURE_SIZE),
                TextureFormat::Rgba8Unorm,
                &checkerboard(PANEL_TEXTURE_SIZE, phase),
            )?;
        }

        let (width, height) = frame.render_target_size();
        let offset = (self.started.elapsed().as_secs_f32() * 40.0) as i32 % 200;
        let panels = [
            (20 + offset, 20, 320, 200),
            (width as i32 - 260, height as i32 - 180, 240, 160),
        ];

        for (x, y, w, h) in panels {
            if !frame.push_scissor(x, y, x + w, y + h) {
                continue;
            }
            // 内层面板只会比外层更小
            if frame.push_scissor(x + 8, y + 8, x + w - 8, y + h - 8) {
                self.draw_panel(&mut frame, x, y, w, h)?;
                frame.pop_scissor();
            }
            frame.pop_scissor();
        }

        let stats = frame.end()?;
        debug!(frame = stats.number, draws = stats.draw_calls, rejected = stats.rejected_pushes, "Frame done");
        Ok(())
    }

    fn draw_panel(&self, frame: &mut overlay_render::Frame<'_>, x: i32, y: i32, w: i32, h: i32) -> overlay_render::Result<()> {
        let Some(pipeline) = self.pipeline else {
            return Ok(());
        };
        frame.set_pipeline_state(pipeline)?;
        frame.set_primitive_topology(PrimitiveTopology::TriangleList);
        frame.set_root_constant_ortho_proj(0, 0)?;
        frame.set_root_constant_color(0, &self.tint, 64)?;
        frame.set_root_constants(0, 80, &[x as u32, y as u32, w as u32, h as u32])?;
        frame.set_texture(0, &self.texture)?;
        frame.draw_instanced(6, 1, 0, 0);
        Ok(())
    }
}

/// RGBA8 棋盘格，`phase` 改变格子颜色
fn checkerboard(size: u32, phase: u32) -> Vec<u8> {
    let light = [0xF0, 0xF0, 0xF0, 0xC0];
    let dark = match phase % 3 {
        0 => [0x20, 0x60, 0xC0, 0xC0],
        1 => [0xC0, 0x40, 0x20, 0xC0],
        _ => [0x30, 0xA0, 0x40, 0xC0],
    };
    (0..size * size)
        .flat_map(|i| if ((i % size) / 8 + (i / size) / 8) % 2 == 0 { light } else { dark })
        .collect()
}

fn create_renderer(config: &Config, target: SurfaceTarget) -> anyhow::Result<Renderer> {
    Renderer::new(config, target)
        .map_err(|e: OverlayError| {
            if e.is_fatal() {
                error!(error = %e, "Fatal renderer initialization error");
            }
            e
        })
        .context("Failed to initialize renderer")
}

fn run_headless(config: &Config) -> anyhow::Result<()> {
    let target = SurfaceTarget::Offscreen { width: config.window.width, height: config.window.height };
    let mut renderer = create_renderer(config, target)?;
    let mut demo = Demo::new(&mut renderer, config)?;

    let frames = config.frames.unwrap_or(DEFAULT_HEADLESS_FRAMES);
    info!(frames, "Rendering headless frames");
    let started = Instant::now();
    for _ in 0..frames {
        if let Err(e) = demo.render(&mut renderer) {
            if e.is_fatal() {
                return Err(e.into());
            }
            warn!(error = %e, "Frame failed");
        }
    }
    renderer.flush_commands()?;

    let srv = renderer.srv_stats();
    info!(
        frames = renderer.frames_submitted(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        slot_waits = renderer.frame_waits(),
        video_memory = renderer.video_memory_used(),
        srv_used = srv.used,
        srv_capacity = srv.capacity,
        "Headless run finished"
    );
    Ok(())
}

/// 窗口模式的状态，字段按声明顺序 drop，渲染器先于窗口销毁
struct App {
    demo: Demo,
    renderer: Renderer,
    window: Window,
}

fn run_windowed(config: &Config) -> anyhow::Result<()> {
    let event_loop = EventLoop::new().context("Couldn't create event loop")?;
    let window = WindowBuilder::new()
        .with_title(config.window.title.as_str())
        .with_inner_size(PhysicalSize::new(config.window.width, config.window.height))
        .with_transparent(true)
        .with_decorations(false)
        .with_window_level(WindowLevel::AlwaysOnTop)
        .build(&event_loop)
        .context("Couldn't create overlay window")?;

    let size = window.inner_size();
    let handle = window
        .window_handle()
        .map_err(|e| anyhow!("Couldn't get the native window handle: {e}"))?
        .as_raw();
    let target = SurfaceTarget::Window { handle, width: size.width, height: size.height };

    let mut renderer = create_renderer(config, target)?;
    let demo = Demo::new(&mut renderer, config)?;
    let mut app = Some(App { demo, renderer, window });

    info!("Entering main loop");
    event_loop.run(move |event, elwt| {
        let Some(state) = app.as_mut() else {
            return;
        };
        match event {
            Event::WindowEvent { event: WindowEvent::CloseRequested, .. } => {
                info!("Close requested, shutting down");
                app = None;
                elwt.exit();
            }
            Event::WindowEvent { event: WindowEvent::Resized(size), .. } => {
                debug!(width = size.width, height = size.height, "Window resized");
                if let Err(e) = state.renderer.resize(size.width, size.height) {
                    error!(error = %e, "Resize failed");
                    app = None;
                    elwt.exit();
                }
            }
            Event::WindowEvent { event: WindowEvent::RedrawRequested, .. } => {
                if let Err(e) = state.demo.render(&mut state.renderer) {
                    if e.is_fatal() {
                        error!(error = %e, "Fatal rendering error");
                        app = None;
                        elwt.exit();
                    } else {
                        warn!(error = %e, "Frame failed");
                    }
                }
            }
            Event::AboutToWait => state.window.request_redraw(),
            _ => {}
        }
    })?;
    Ok(())
}
