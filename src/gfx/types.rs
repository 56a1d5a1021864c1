//! 后端无关的 GPU 类型
//!
//! 渲染器与各个 [`GpuBackend`](super::GpuBackend) 实现之间传递的全部数据结构：
//! 原始对象句柄、纹理与管线描述、描述符句柄以及录制到命令列表里的
//! [`GpuCommand`]。这些类型只描述"做什么"，由后端翻译成具体 API 调用。

use std::fmt;

macro_rules! raw_handle {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(u64);

            impl $name {
                pub fn from_raw(value: u64) -> Self {
                    Self(value)
                }

                pub fn as_raw(self) -> u64 {
                    self.0
                }
            }
        )*
    };
}

raw_handle!(
    /// 纹理或缓冲区
    RawResource,
    /// 描述符堆
    RawDescriptorHeap,
    /// 根签名
    RawRootSignature,
    /// 图形管线状态
    RawPipeline,
    /// 栅栏
    RawFence,
    /// 命令分配器
    RawCommandAllocator,
    /// 命令列表
    RawCommandList,
);

/// 可以附加调试名称、可以被释放的任意后端对象
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawObject {
    Resource(RawResource),
    DescriptorHeap(RawDescriptorHeap),
    RootSignature(RawRootSignature),
    Pipeline(RawPipeline),
    Fence(RawFence),
    CommandAllocator(RawCommandAllocator),
    CommandList(RawCommandList),
    Queue(QueueKind),
}

/// 命令队列类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    /// 图形队列，录制帧命令
    Direct,
    /// 复制队列，纹理上传与资源复制
    Copy,
}

impl QueueKind {
    pub fn name(&self) -> &'static str {
        match self {
            QueueKind::Direct => "direct",
            QueueKind::Copy => "copy",
        }
    }
}

/// 资源所在的堆
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeapKind {
    /// GPU 本地内存
    Default,
    /// CPU 可写，GPU 可读
    Upload,
    /// GPU 可写，CPU 可读
    Readback,
}

/// 资源状态（屏障转换用）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Common,
    Present,
    RenderTarget,
    DepthWrite,
    CopySource,
    CopyDest,
    PixelShaderResource,
    GenericRead,
}

/// 纹理像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// 8 位 RGBA，后缓冲格式
    Rgba8Unorm,
    /// 8 位 BGRA
    Bgra8Unorm,
    /// 8 位单通道（字形图集）
    R8Unorm,
    /// 32 位浮点单通道
    R32Float,
    /// 32 位浮点 RGBA
    Rgba32Float,
    /// 32 位深度
    D32Float,
}

impl TextureFormat {
    /// 每个像素的字节数
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm
            | TextureFormat::Bgra8Unorm
            | TextureFormat::R32Float
            | TextureFormat::D32Float => 4,
            TextureFormat::R8Unorm => 1,
            TextureFormat::Rgba32Float => 16,
        }
    }

    pub fn is_depth(&self) -> bool {
        matches!(self, TextureFormat::D32Float)
    }

    /// 两种格式之间能否直接进行复制
    ///
    /// 复制命令要求源和目标属于同一格式族，这里的格式各自成族。
    pub fn is_copy_compatible(&self, other: TextureFormat) -> bool {
        *self == other
    }

    pub fn name(&self) -> &'static str {
        match self {
            TextureFormat::Rgba8Unorm => "R8G8B8A8_UNORM",
            TextureFormat::Bgra8Unorm => "B8G8R8A8_UNORM",
            TextureFormat::R8Unorm => "R8_UNORM",
            TextureFormat::R32Float => "R32_FLOAT",
            TextureFormat::Rgba32Float => "R32G32B32A32_FLOAT",
            TextureFormat::D32Float => "D32_FLOAT",
        }
    }
}

impl fmt::Display for TextureFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 2D 纹理（含数组和交换链缓冲）的最大边长
pub const MAX_TEXTURE_DIMENSION_2D: u32 = 16384;
/// 3D 纹理的最大边长和深度
pub const MAX_TEXTURE_DIMENSION_3D: u32 = 2048;
pub const MAX_TEXTURE_ARRAY_SIZE: u32 = 2048;

/// 纹理维度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureDimension {
    Texture2D,
    Texture2DArray,
    Texture3D,
}

/// 纹理用途
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureUsage {
    /// 着色器采样
    Sampled,
    /// 渲染目标（后缓冲）
    RenderTarget,
    /// 深度缓冲
    DepthStencil,
}

/// 纹理描述
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    pub dimension: TextureDimension,
    pub format: TextureFormat,
    pub width: u32,
    pub height: u32,
    /// 3D 纹理的深度，或 2D 数组的层数；普通 2D 纹理为 1
    pub depth_or_array_size: u32,
    pub mip_levels: u32,
    pub usage: TextureUsage,
}

impl TextureDesc {
    pub fn texture_2d(format: TextureFormat, width: u32, height: u32, mip_levels: u32) -> Self {
        Self {
            dimension: TextureDimension::Texture2D,
            format,
            width,
            height,
            depth_or_array_size: 1,
            mip_levels,
            usage: TextureUsage::Sampled,
        }
    }

    pub fn texture_2d_array(
        format: TextureFormat,
        width: u32,
        height: u32,
        array_size: u32,
        mip_levels: u32,
    ) -> Self {
        Self {
            dimension: TextureDimension::Texture2DArray,
            depth_or_array_size: array_size,
            ..Self::texture_2d(format, width, height, mip_levels)
        }
    }

    pub fn texture_3d(format: TextureFormat, width: u32, height: u32, depth: u32, mip_levels: u32) -> Self {
        Self {
            dimension: TextureDimension::Texture3D,
            depth_or_array_size: depth,
            ..Self::texture_2d(format, width, height, mip_levels)
        }
    }

    pub fn depth_buffer(width: u32, height: u32) -> Self {
        Self {
            usage: TextureUsage::DepthStencil,
            ..Self::texture_2d(TextureFormat::D32Float, width, height, 1)
        }
    }

    pub fn render_target(format: TextureFormat, width: u32, height: u32) -> Self {
        Self {
            usage: TextureUsage::RenderTarget,
            ..Self::texture_2d(format, width, height, 1)
        }
    }

    /// 数组层数（3D 纹理只有一层）
    pub fn array_layers(&self) -> u32 {
        match self.dimension {
            TextureDimension::Texture3D => 1,
            _ => self.depth_or_array_size,
        }
    }

    /// 子资源总数：mip 级别数 × 数组层数
    pub fn subresource_count(&self) -> u32 {
        self.mip_levels * self.array_layers()
    }

    /// 子资源索引，与 D3D12CalcSubresource 一致
    pub fn subresource_index(&self, mip: u32, array_slice: u32) -> u32 {
        mip + array_slice * self.mip_levels
    }

    /// 指定 mip 级别的尺寸 (宽, 高, 深)
    pub fn mip_extent(&self, mip: u32) -> (u32, u32, u32) {
        let depth = match self.dimension {
            TextureDimension::Texture3D => (self.depth_or_array_size >> mip).max(1),
            _ => 1,
        };
        ((self.width >> mip).max(1), (self.height >> mip).max(1), depth)
    }

    /// 子资源所在的 mip 级别尺寸
    pub fn subresource_extent(&self, subresource: u32) -> (u32, u32, u32) {
        self.mip_extent(subresource % self.mip_levels)
    }

    /// 按设备限制检查尺寸、层数和 mip 级别数
    ///
    /// 尺寸、层数和 mip 级别数都不能为 0（D3D12 把 0 个 mip 解释为完整 mip 链），
    /// mip 级别数不能超过最大边长决定的完整链长度。
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.width == 0 || self.height == 0 || self.depth_or_array_size == 0 || self.mip_levels == 0 {
            return Err(format!("texture dimensions must be non-zero: {self:?}"));
        }
        let limit = match self.dimension {
            TextureDimension::Texture3D => MAX_TEXTURE_DIMENSION_3D,
            _ => MAX_TEXTURE_DIMENSION_2D,
        };
        if self.width > limit || self.height > limit {
            return Err(format!("texture {}x{} exceeds the {limit} limit", self.width, self.height));
        }
        match self.dimension {
            TextureDimension::Texture3D if self.depth_or_array_size > MAX_TEXTURE_DIMENSION_3D => {
                return Err(format!("texture depth {} exceeds {MAX_TEXTURE_DIMENSION_3D}", self.depth_or_array_size));
            }
            TextureDimension::Texture2DArray | TextureDimension::Texture2D
                if self.depth_or_array_size > MAX_TEXTURE_ARRAY_SIZE =>
            {
                return Err(format!("array size {} exceeds {MAX_TEXTURE_ARRAY_SIZE}", self.depth_or_array_size));
            }
            _ => {}
        }
        let largest = self.width.max(self.height).max(match self.dimension {
            TextureDimension::Texture3D => self.depth_or_array_size,
            _ => 1,
        });
        let max_mips = 32 - largest.leading_zeros();
        if self.mip_levels > max_mips {
            return Err(format!("{} mip levels requested, at most {max_mips} possible", self.mip_levels));
        }
        if self.format.is_depth() != (self.usage == TextureUsage::DepthStencil) {
            return Err(format!("format {} does not match usage {:?}", self.format, self.usage));
        }
        Ok(())
    }

    /// 紧密排列时所有子资源的字节数，用于显存统计
    pub fn byte_size(&self) -> u64 {
        let bpp = self.format.bytes_per_pixel() as u64;
        let per_layer: u64 = (0..self.mip_levels)
            .map(|mip| {
                let (w, h, d) = self.mip_extent(mip);
                w as u64 * h as u64 * d as u64 * bpp
            })
            .sum();
        per_layer * self.array_layers() as u64
    }
}

/// 放置在缓冲区中的纹理数据布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacedFootprint {
    /// 缓冲区内的起始偏移
    pub offset: u64,
    pub format: TextureFormat,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    /// 每行字节数，必须按 256 字节对齐
    pub row_pitch: u32,
}

impl PlacedFootprint {
    /// 覆盖整个布局所需的缓冲区字节数
    pub fn total_bytes(&self) -> u64 {
        let rows = self.height as u64 * self.depth as u64;
        let last_row = (self.width * self.format.bytes_per_pixel()) as u64;
        self.offset + rows.saturating_sub(1) * self.row_pitch as u64 + last_row
    }
}

/// 描述符堆类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorType {
    /// 渲染目标视图 (RTV)
    RenderTargetView,
    /// 深度模板视图 (DSV)
    DepthStencilView,
    /// CBV/SRV/UAV 共用堆
    ShaderResourceView,
    /// 采样器
    Sampler,
}

impl DescriptorType {
    /// 该类型的堆能否设为着色器可见
    pub fn can_be_shader_visible(&self) -> bool {
        matches!(self, DescriptorType::ShaderResourceView | DescriptorType::Sampler)
    }

    pub fn name(&self) -> &'static str {
        match self {
            DescriptorType::RenderTargetView => "RTV",
            DescriptorType::DepthStencilView => "DSV",
            DescriptorType::ShaderResourceView => "CBV/SRV/UAV",
            DescriptorType::Sampler => "Sampler",
        }
    }
}

/// CPU 可见的描述符句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CpuDescriptorHandle {
    pub ptr: usize,
}

impl CpuDescriptorHandle {
    pub fn offset(&self, count: u32, increment_size: u32) -> Self {
        Self { ptr: self.ptr + count as usize * increment_size as usize }
    }
}

/// GPU 可见的描述符句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GpuDescriptorHandle {
    pub ptr: u64,
}

impl GpuDescriptorHandle {
    pub fn offset(&self, count: u32, increment_size: u32) -> Self {
        Self { ptr: self.ptr + count as u64 * increment_size as u64 }
    }
}

/// 后端创建描述符堆后返回的信息
#[derive(Debug, Clone, Copy)]
pub struct DescriptorHeapInfo {
    pub raw: RawDescriptorHeap,
    pub cpu_start: CpuDescriptorHandle,
    pub gpu_start: Option<GpuDescriptorHandle>,
    pub increment_size: u32,
}

/// 顶点缓冲视图
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexBufferView {
    pub address: u64,
    pub size: u32,
    pub stride: u32,
}

/// 视口
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

/// 裁剪矩形（像素，右/下为开区间）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScissorRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

/// 图元拓扑
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    TriangleList,
    TriangleStrip,
}

impl PrimitiveTopology {
    pub fn topology_type(&self) -> PrimitiveTopologyType {
        match self {
            PrimitiveTopology::PointList => PrimitiveTopologyType::Point,
            PrimitiveTopology::LineList | PrimitiveTopology::LineStrip => PrimitiveTopologyType::Line,
            PrimitiveTopology::TriangleList | PrimitiveTopology::TriangleStrip => {
                PrimitiveTopologyType::Triangle
            }
        }
    }
}

/// 管线的图元类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveTopologyType {
    Point,
    Line,
    Triangle,
}

/// 顶点属性格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Float32,
    Float32x2,
    Float32x3,
    Float32x4,
    Uint32,
    Unorm8x4,
}

impl VertexFormat {
    pub fn size(&self) -> u32 {
        match self {
            VertexFormat::Float32 | VertexFormat::Uint32 | VertexFormat::Unorm8x4 => 4,
            VertexFormat::Float32x2 => 8,
            VertexFormat::Float32x3 => 12,
            VertexFormat::Float32x4 => 16,
        }
    }
}

/// 输入布局中的一个元素
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InputElement {
    pub semantic: String,
    pub semantic_index: u32,
    pub format: VertexFormat,
    pub slot: u32,
    pub offset: u32,
    /// 大于 0 时按实例步进
    pub instance_step_rate: u32,
}

/// 混合模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendMode {
    Opaque,
    /// 直通 alpha：src * a + dst * (1 - a)
    Alpha,
    /// 预乘 alpha：src + dst * (1 - a)
    Premultiplied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullMode {
    None,
    Front,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FillMode {
    Solid,
    Wireframe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RasterizerState {
    pub fill: FillMode,
    pub cull: CullMode,
    pub front_counter_clockwise: bool,
    pub depth_clip: bool,
    pub scissor_enable: bool,
}

impl Default for RasterizerState {
    fn default() -> Self {
        Self {
            fill: FillMode::Solid,
            cull: CullMode::None,
            front_counter_clockwise: false,
            depth_clip: true,
            scissor_enable: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareFunc {
    Never,
    Less,
    LessEqual,
    Equal,
    Greater,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStencilState {
    pub depth_test: bool,
    pub depth_write: bool,
    pub compare: CompareFunc,
}

impl Default for DepthStencilState {
    fn default() -> Self {
        Self {
            depth_test: false,
            depth_write: false,
            compare: CompareFunc::Always,
        }
    }
}

/// 图形管线描述
///
/// 根签名不在描述里，由管线缓存在编译时注入。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineStateDesc {
    pub vertex_shader: Vec<u8>,
    pub pixel_shader: Vec<u8>,
    pub input_layout: Vec<InputElement>,
    pub blend: BlendMode,
    pub rasterizer: RasterizerState,
    pub depth_stencil: DepthStencilState,
    pub topology: PrimitiveTopologyType,
    pub render_target_format: TextureFormat,
    pub depth_format: Option<TextureFormat>,
}

impl PipelineStateDesc {
    /// 覆盖层常用配置：预乘 alpha 混合、无剔除、带深度格式但不测试
    pub fn new(vertex_shader: Vec<u8>, pixel_shader: Vec<u8>) -> Self {
        Self {
            vertex_shader,
            pixel_shader,
            input_layout: Vec::new(),
            blend: BlendMode::Premultiplied,
            rasterizer: RasterizerState::default(),
            depth_stencil: DepthStencilState::default(),
            topology: PrimitiveTopologyType::Triangle,
            render_target_format: TextureFormat::Rgba8Unorm,
            depth_format: Some(TextureFormat::D32Float),
        }
    }

    pub fn with_input_layout(mut self, layout: Vec<InputElement>) -> Self {
        self.input_layout = layout;
        self
    }

    pub fn with_blend(mut self, blend: BlendMode) -> Self {
        self.blend = blend;
        self
    }

    pub fn with_depth_stencil(mut self, depth_stencil: DepthStencilState) -> Self {
        self.depth_stencil = depth_stencil;
        self
    }

    pub fn with_topology(mut self, topology: PrimitiveTopologyType) -> Self {
        self.topology = topology;
        self
    }
}

/// 交换链创建参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainDesc {
    pub width: u32,
    pub height: u32,
    pub buffer_count: u32,
    pub format: TextureFormat,
    pub allow_tearing: bool,
}

/// 适配器信息
#[derive(Debug, Clone, Default)]
pub struct AdapterInfo {
    pub description: String,
    pub dedicated_video_memory: u64,
    pub feature_level: String,
}

/// 录制到命令列表中的一条命令
///
/// 借用的切片只在 [`GpuBackend::record`](super::GpuBackend::record) 调用期间有效，
/// 后端需要自行复制。
#[derive(Debug, Clone, Copy)]
pub enum GpuCommand<'a> {
    Transition { resource: RawResource, before: ResourceState, after: ResourceState },
    SetDescriptorHeap(RawDescriptorHeap),
    SetRootSignature(RawRootSignature),
    SetPipelineState(RawPipeline),
    SetRenderTarget { rtv: CpuDescriptorHandle, dsv: Option<CpuDescriptorHandle> },
    ClearRenderTarget { rtv: CpuDescriptorHandle, color: [f32; 4] },
    ClearDepth { dsv: CpuDescriptorHandle, depth: f32 },
    SetViewport(Viewport),
    SetScissor(ScissorRect),
    /// `offset` 以 32 位值为单位
    SetRootConstants { index: u32, values: &'a [u32], offset: u32 },
    SetDescriptorTable { index: u32, base: GpuDescriptorHandle },
    SetVertexBuffers { slot: u32, views: &'a [VertexBufferView] },
    SetPrimitiveTopology(PrimitiveTopology),
    Draw { vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32 },
    CopyBufferToTexture {
        src: RawResource,
        footprint: PlacedFootprint,
        dst: RawResource,
        subresource: u32,
        x: u32,
        y: u32,
        z: u32,
    },
    CopyTextureToBuffer {
        src: RawResource,
        subresource: u32,
        dst: RawResource,
        footprint: PlacedFootprint,
    },
    CopyTextureSubresource { src: RawResource, dst: RawResource, subresource: u32 },
    CopyResource { src: RawResource, dst: RawResource },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subresource_layout() {
        let desc = TextureDesc::texture_2d_array(TextureFormat::Rgba8Unorm, 64, 32, 4, 3);
        assert_eq!(desc.subresource_count(), 12);
        assert_eq!(desc.subresource_index(0, 2), 6);
        assert_eq!(desc.subresource_extent(7), (32, 16, 1));

        let volume = TextureDesc::texture_3d(TextureFormat::R8Unorm, 16, 16, 8, 2);
        assert_eq!(volume.subresource_count(), 2);
        assert_eq!(volume.mip_extent(1), (8, 8, 4));
    }

    #[test]
    fn test_validate_rejects_degenerate_descs() {
        assert!(TextureDesc::texture_2d(TextureFormat::Rgba8Unorm, 64, 64, 7).validate().is_ok());
        assert!(TextureDesc::texture_2d(TextureFormat::Rgba8Unorm, 64, 64, 0).validate().is_err());
        assert!(TextureDesc::texture_2d(TextureFormat::Rgba8Unorm, 64, 64, 8).validate().is_err());
        assert!(TextureDesc::texture_2d(TextureFormat::Rgba8Unorm, 0, 64, 1).validate().is_err());
        assert!(TextureDesc::texture_2d_array(TextureFormat::Rgba8Unorm, 64, 64, 0, 1).validate().is_err());
        assert!(TextureDesc::texture_3d(TextureFormat::R8Unorm, 16, 16, 4096, 1).validate().is_err());
        assert!(TextureDesc::texture_2d(TextureFormat::Rgba8Unorm, MAX_TEXTURE_DIMENSION_2D + 1, 1, 1)
            .validate()
            .is_err());
        assert!(TextureDesc::depth_buffer(1280, 720).validate().is_ok());
        assert!(TextureDesc::texture_2d(TextureFormat::D32Float, 8, 8, 1).validate().is_err());
    }

    #[test]
    fn test_byte_size() {
        let desc = TextureDesc::texture_2d(TextureFormat::Rgba8Unorm, 4, 4, 3);
        // 4x4 + 2x2 + 1x1 像素
        assert_eq!(desc.byte_size(), (16 + 4 + 1) * 4);

        let array = TextureDesc::texture_2d_array(TextureFormat::R32Float, 8, 8, 2, 1);
        assert_eq!(array.byte_size(), 8 * 8 * 4 * 2);
    }

    #[test]
    fn test_footprint_total_bytes() {
        let footprint = PlacedFootprint {
            offset: 0,
            format: TextureFormat::Rgba8Unorm,
            width: 3,
            height: 2,
            depth: 1,
            row_pitch: 256,
        };
        assert_eq!(footprint.total_bytes(), 256 + 12);
    }

    #[test]
    fn test_copy_compatibility() {
        assert!(!TextureFormat::Rgba8Unorm.is_copy_compatible(TextureFormat::Bgra8Unorm));
        assert!(!TextureFormat::Rgba8Unorm.is_copy_compatible(TextureFormat::R32Float));
        assert!(TextureFormat::R8Unorm.is_copy_compatible(TextureFormat::R8Unorm));
    }
}
