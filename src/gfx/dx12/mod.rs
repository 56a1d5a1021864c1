//! DirectX 12 后端
//!
//! - `context`：设备、适配器、图形与复制队列
//! - `swapchain`：经由 DirectComposition 呈现的透明交换链
//! - `descriptor`：描述符堆
//! - `commands`：命令翻译
//! - `convert`：类型转换
//! - `debug`：调试层消息转发到日志
//!
//! 原始句柄通过对象表映射到 COM 接口，释放句柄即从表中移除并释放接口引用。

mod commands;
mod context;
mod convert;
mod debug;
mod descriptor;
mod swapchain;

use std::collections::HashMap;
use std::ffi::{c_void, CString};

use raw_window_handle::RawWindowHandle;
use tracing::{debug, info, warn};
use windows::core::{Interface, HSTRING, PCSTR};
use windows::Win32::Foundation::HWND;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::System::Threading::{WaitForSingleObject, INFINITE};

use crate::core::config::GraphicsConfig;
use crate::core::error::{GraphicsError, Result};
use super::backend::{GpuBackend, SurfaceTarget};
use super::types::*;

use context::Dx12Context;
use debug::DebugMessages;
use descriptor::Dx12DescriptorHeap;
use swapchain::CompositionSwapchain;

/// 原始句柄到 COM 对象的映射
#[derive(Default)]
pub(super) struct ObjectTable {
    pub resources: HashMap<u64, ID3D12Resource>,
    pub heaps: HashMap<u64, Dx12DescriptorHeap>,
    pub root_signatures: HashMap<u64, ID3D12RootSignature>,
    pub pipelines: HashMap<u64, ID3D12PipelineState>,
    pub fences: HashMap<u64, ID3D12Fence>,
    pub allocators: HashMap<u64, ID3D12CommandAllocator>,
    pub lists: HashMap<u64, ID3D12GraphicsCommandList>,
}

/// 给对象设置调试名称，调试层和 PIX 中可见
pub(super) fn set_debug_name(object: &ID3D12Object, name: &str) {
    if let Err(e) = unsafe { object.SetName(&HSTRING::from(name)) } {
        debug!("Couldn't set object name '{}': {}", name, e);
    }
}

/// DirectX 12 图形后端
pub struct Dx12Backend {
    context: Dx12Context,
    objects: ObjectTable,
    names: HashMap<RawObject, String>,
    next_id: u64,
    swapchain: Option<CompositionSwapchain>,
    backbuffers: Vec<u64>,
    allow_tearing: bool,
    /// 仅在启用调试层时存在
    debug_messages: Option<DebugMessages>,
}

impl Dx12Backend {
    /// 初始化设备与队列，交换链稍后通过 [`GpuBackend::create_swapchain`] 创建
    pub fn new(config: &GraphicsConfig) -> Result<Self> {
        info!("Initializing D3D12 backend");
        let context = Dx12Context::new(config)?;
        let debug_messages = if config.debug_layer { DebugMessages::new() } else { None };
        if let Some(messages) = &debug_messages {
            messages.drain();
        }
        Ok(Self {
            context,
            objects: ObjectTable::default(),
            names: HashMap::new(),
            next_id: 1,
            swapchain: None,
            backbuffers: Vec::new(),
            allow_tearing: config.allow_tearing,
            debug_messages,
        })
    }

    /// 把调试层积累的消息写入日志
    fn process_debug_messages(&self) {
        if let Some(messages) = &self.debug_messages {
            messages.drain();
        }
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn resource(&self, raw: RawResource) -> Result<&ID3D12Resource> {
        self.objects
            .resources
            .get(&raw.as_raw())
            .ok_or_else(|| GraphicsError::InvalidArgument(format!("resource {} does not exist", raw.as_raw())).into())
    }

    fn fence(&self, raw: RawFence) -> Result<&ID3D12Fence> {
        self.objects
            .fences
            .get(&raw.as_raw())
            .ok_or_else(|| GraphicsError::InvalidArgument(format!("fence {} does not exist", raw.as_raw())).into())
    }

    fn allocator(&self, raw: RawCommandAllocator) -> Result<&ID3D12CommandAllocator> {
        self.objects
            .allocators
            .get(&raw.as_raw())
            .ok_or_else(|| GraphicsError::InvalidArgument(format!("allocator {} does not exist", raw.as_raw())).into())
    }

    fn list(&self, raw: RawCommandList) -> Result<&ID3D12GraphicsCommandList> {
        self.objects
            .lists
            .get(&raw.as_raw())
            .ok_or_else(|| GraphicsError::InvalidArgument(format!("command list {} does not exist", raw.as_raw())).into())
    }

    fn d3d_object(&self, object: RawObject) -> Option<ID3D12Object> {
        let o = &self.objects;
        match object {
            RawObject::Resource(r) => o.resources.get(&r.as_raw()).and_then(|x| x.cast().ok()),
            RawObject::DescriptorHeap(h) => o.heaps.get(&h.as_raw()).and_then(|x| x.heap().cast().ok()),
            RawObject::RootSignature(s) => o.root_signatures.get(&s.as_raw()).and_then(|x| x.cast().ok()),
            RawObject::Pipeline(p) => o.pipelines.get(&p.as_raw()).and_then(|x| x.cast().ok()),
            RawObject::Fence(f) => o.fences.get(&f.as_raw()).and_then(|x| x.cast().ok()),
            RawObject::CommandAllocator(a) => o.allocators.get(&a.as_raw()).and_then(|x| x.cast().ok()),
            RawObject::CommandList(l) => o.lists.get(&l.as_raw()).and_then(|x| x.cast().ok()),
            RawObject::Queue(kind) => self.context.queue(kind).cast().ok(),
        }
    }

    fn create_committed(
        &mut self,
        heap: HeapKind,
        desc: &D3D12_RESOURCE_DESC,
        state: D3D12_RESOURCE_STATES,
        clear: Option<&D3D12_CLEAR_VALUE>,
    ) -> Result<RawResource> {
        let mut resource: Option<ID3D12Resource> = None;
        unsafe {
            self.context
                .device
                .CreateCommittedResource(
                    &convert::heap_properties(heap),
                    D3D12_HEAP_FLAG_NONE,
                    desc,
                    state,
                    clear.map(|c| c as *const _),
                    &mut resource,
                )
                .map_err(|e| GraphicsError::ResourceCreation(format!("CreateCommittedResource failed: {e}")))?;
        }
        let resource =
            resource.ok_or_else(|| GraphicsError::ResourceCreation("CreateCommittedResource returned nothing".to_string()))?;
        let id = self.allocate_id();
        self.objects.resources.insert(id, resource);
        Ok(RawResource::from_raw(id))
    }

    fn map_buffer(&self, buffer: RawResource, offset: u64, len: usize, read: bool) -> Result<*mut u8> {
        let resource = self.resource(buffer)?;
        let size = unsafe { resource.GetDesc() }.Width;
        if offset + len as u64 > size {
            return Err(GraphicsError::InvalidArgument(format!(
                "access of {len} bytes at {offset} exceeds buffer size {size}"
            ))
            .into());
        }
        let range = if read {
            D3D12_RANGE { Begin: offset as usize, End: offset as usize + len }
        } else {
            D3D12_RANGE { Begin: 0, End: 0 }
        };
        let mut data: *mut c_void = std::ptr::null_mut();
        unsafe {
            resource
                .Map(0, Some(&range), Some(&mut data))
                .map_err(|e| GraphicsError::CommandExecution(format!("Couldn't map buffer {}: {e}", buffer.as_raw())))?;
        }
        Ok(unsafe { data.cast::<u8>().add(offset as usize) })
    }

    fn acquire_backbuffers(&mut self) -> Result<()> {
        for id in self.backbuffers.drain(..) {
            self.objects.resources.remove(&id);
        }
        let Some(swapchain) = self.swapchain.as_ref() else {
            return Ok(());
        };
        let buffers = (0..swapchain.buffer_count())
            .map(|i| swapchain.buffer(i))
            .collect::<Result<Vec<_>>>()?;
        for (i, buffer) in buffers.into_iter().enumerate() {
            if let Ok(object) = buffer.cast::<ID3D12Object>() {
                set_debug_name(&object, &format!("EG-Overlay D3D12 Back Buffer {i}"));
            }
            let id = self.allocate_id();
            self.objects.resources.insert(id, buffer);
            self.backbuffers.push(id);
        }
        Ok(())
    }
}

impl GpuBackend for Dx12Backend {
    fn name(&self) -> &'static str {
        "dx12"
    }

    fn adapter_info(&self) -> AdapterInfo {
        self.context.adapter_info.clone()
    }

    fn adapter_memory_usage(&self) -> Result<u64> {
        self.context.local_memory_usage()
    }

    fn create_fence(&mut self, initial: u64) -> Result<RawFence> {
        let fence: ID3D12Fence = unsafe {
            self.context
                .device
                .CreateFence(initial, D3D12_FENCE_FLAG_NONE)
                .map_err(|e| GraphicsError::DeviceCreation(format!("Couldn't create fence: {e}")))?
        };
        let id = self.allocate_id();
        self.objects.fences.insert(id, fence);
        Ok(RawFence::from_raw(id))
    }

    fn fence_completed_value(&self, fence: RawFence) -> u64 {
        match self.objects.fences.get(&fence.as_raw()) {
            Some(f) => unsafe { f.GetCompletedValue() },
            None => 0,
        }
    }

    fn signal(&mut self, queue: QueueKind, fence: RawFence, value: u64) -> Result<()> {
        let fence = self.fence(fence)?;
        unsafe { self.context.queue(queue).Signal(fence, value)? };
        Ok(())
    }

    fn queue_wait(&mut self, queue: QueueKind, fence: RawFence, value: u64) -> Result<()> {
        let fence = self.fence(fence)?;
        unsafe { self.context.queue(queue).Wait(fence, value)? };
        Ok(())
    }

    fn wait_for_fence(&mut self, fence: RawFence, value: u64) -> Result<()> {
        let fence = self.fence(fence)?;
        unsafe {
            if fence.GetCompletedValue() >= value {
                return Ok(());
            }
            fence.SetEventOnCompletion(value, self.context.fence_event)?;
            WaitForSingleObject(self.context.fence_event, INFINITE);
        }
        Ok(())
    }

    fn create_command_allocator(&mut self, queue: QueueKind) -> Result<RawCommandAllocator> {
        let allocator: ID3D12CommandAllocator = unsafe {
            self.context
                .device
                .CreateCommandAllocator(convert::command_list_type(queue))
                .map_err(|e| GraphicsError::DeviceCreation(format!("Couldn't create command allocator: {e}")))?
        };
        let id = self.allocate_id();
        self.objects.allocators.insert(id, allocator);
        Ok(RawCommandAllocator::from_raw(id))
    }

    fn create_command_list(&mut self, queue: QueueKind, allocator: RawCommandAllocator) -> Result<RawCommandList> {
        let allocator = self.allocator(allocator)?;
        let list: ID3D12GraphicsCommandList = unsafe {
            let list: ID3D12GraphicsCommandList = self
                .context
                .device
                .CreateCommandList(0, convert::command_list_type(queue), allocator, None::<&ID3D12PipelineState>)
                .map_err(|e| GraphicsError::DeviceCreation(format!("Couldn't create command list: {e}")))?;
            list.Close()?;
            list
        };
        let id = self.allocate_id();
        self.objects.lists.insert(id, list);
        Ok(RawCommandList::from_raw(id))
    }

    fn reset_command_allocator(&mut self, allocator: RawCommandAllocator) -> Result<()> {
        unsafe { self.allocator(allocator)?.Reset()? };
        Ok(())
    }

    fn reset_command_list(&mut self, list: RawCommandList, allocator: RawCommandAllocator) -> Result<()> {
        let allocator = self.allocator(allocator)?;
        unsafe { self.list(list)?.Reset(allocator, None::<&ID3D12PipelineState>)? };
        Ok(())
    }

    fn record(&mut self, list: RawCommandList, command: GpuCommand<'_>) {
        match self.objects.lists.get(&list.as_raw()) {
            Some(cmd_list) => commands::record(cmd_list, &self.objects, command),
            None => warn!(list = list.as_raw(), "Recording into a released command list"),
        }
    }

    fn close_command_list(&mut self, list: RawCommandList) -> Result<()> {
        unsafe { self.list(list)?.Close()? };
        Ok(())
    }

    fn execute_command_list(&mut self, queue: QueueKind, list: RawCommandList) -> Result<()> {
        let list: ID3D12CommandList = self.list(list)?.cast()?;
        unsafe { self.context.queue(queue).ExecuteCommandLists(&[Some(list)]) };
        Ok(())
    }

    fn create_descriptor_heap(
        &mut self,
        kind: DescriptorType,
        capacity: u32,
        shader_visible: bool,
    ) -> Result<DescriptorHeapInfo> {
        let heap = Dx12DescriptorHeap::new(&self.context.device, kind, capacity, shader_visible)?;
        let id = self.allocate_id();
        let info = heap.info(RawDescriptorHeap::from_raw(id));
        debug!(kind = heap.descriptor_type().name(), capacity, shader_visible, "Descriptor heap created");
        self.objects.heaps.insert(id, heap);
        Ok(info)
    }

    fn create_render_target_view(&mut self, resource: RawResource, handle: CpuDescriptorHandle) {
        match self.objects.resources.get(&resource.as_raw()) {
            Some(res) => unsafe {
                self.context
                    .device
                    .CreateRenderTargetView(res, None, D3D12_CPU_DESCRIPTOR_HANDLE { ptr: handle.ptr })
            },
            None => warn!(resource = resource.as_raw(), "RTV for a released resource"),
        }
    }

    fn create_depth_stencil_view(&mut self, resource: RawResource, handle: CpuDescriptorHandle) {
        match self.objects.resources.get(&resource.as_raw()) {
            Some(res) => unsafe {
                self.context
                    .device
                    .CreateDepthStencilView(res, None, D3D12_CPU_DESCRIPTOR_HANDLE { ptr: handle.ptr })
            },
            None => warn!(resource = resource.as_raw(), "DSV for a released resource"),
        }
    }

    fn create_shader_resource_view(&mut self, resource: RawResource, _desc: &TextureDesc, handle: CpuDescriptorHandle) {
        // 纹理格式都是完整类型，默认视图覆盖全部 mip 和数组层
        match self.objects.resources.get(&resource.as_raw()) {
            Some(res) => unsafe {
                self.context
                    .device
                    .CreateShaderResourceView(res, None, D3D12_CPU_DESCRIPTOR_HANDLE { ptr: handle.ptr })
            },
            None => warn!(resource = resource.as_raw(), "SRV for a released resource"),
        }
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<RawResource> {
        // 通过校验后层数和 mip 级别数都在 u16 范围内
        desc.validate().map_err(GraphicsError::ResourceCreation)?;
        let resource_desc = convert::texture_resource_desc(desc);
        match desc.usage {
            TextureUsage::DepthStencil => {
                let clear = D3D12_CLEAR_VALUE {
                    Format: convert::dxgi_format(desc.format),
                    Anonymous: D3D12_CLEAR_VALUE_0 {
                        DepthStencil: D3D12_DEPTH_STENCIL_VALUE { Depth: 1.0, Stencil: 0 },
                    },
                };
                self.create_committed(HeapKind::Default, &resource_desc, D3D12_RESOURCE_STATE_DEPTH_WRITE, Some(&clear))
            }
            _ => self.create_committed(HeapKind::Default, &resource_desc, D3D12_RESOURCE_STATE_COMMON, None),
        }
    }

    fn create_buffer(&mut self, size: u64, heap: HeapKind) -> Result<RawResource> {
        let state = match heap {
            HeapKind::Default => D3D12_RESOURCE_STATE_COMMON,
            HeapKind::Upload => D3D12_RESOURCE_STATE_GENERIC_READ,
            HeapKind::Readback => D3D12_RESOURCE_STATE_COPY_DEST,
        };
        self.create_committed(heap, &convert::buffer_resource_desc(size), state, None)
    }

    fn write_buffer(&mut self, buffer: RawResource, offset: u64, data: &[u8]) -> Result<()> {
        let dst = self.map_buffer(buffer, offset, data.len(), false)?;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
            self.resource(buffer)?.Unmap(0, None);
        }
        Ok(())
    }

    fn read_buffer(&mut self, buffer: RawResource, offset: u64, out: &mut [u8]) -> Result<()> {
        let src = self.map_buffer(buffer, offset, out.len(), true)?;
        unsafe {
            std::ptr::copy_nonoverlapping(src, out.as_mut_ptr(), out.len());
            self.resource(buffer)?.Unmap(0, Some(&D3D12_RANGE { Begin: 0, End: 0 }));
        }
        Ok(())
    }

    fn buffer_gpu_address(&self, buffer: RawResource) -> u64 {
        self.objects
            .resources
            .get(&buffer.as_raw())
            .map_or(0, |res| unsafe { res.GetGPUVirtualAddress() })
    }

    fn release(&mut self, object: RawObject) {
        let o = &mut self.objects;
        let released = match object {
            RawObject::Resource(r) => o.resources.remove(&r.as_raw()).is_some(),
            RawObject::DescriptorHeap(h) => o.heaps.remove(&h.as_raw()).is_some(),
            RawObject::RootSignature(s) => o.root_signatures.remove(&s.as_raw()).is_some(),
            RawObject::Pipeline(p) => o.pipelines.remove(&p.as_raw()).is_some(),
            RawObject::Fence(f) => o.fences.remove(&f.as_raw()).is_some(),
            RawObject::CommandAllocator(a) => o.allocators.remove(&a.as_raw()).is_some(),
            RawObject::CommandList(l) => o.lists.remove(&l.as_raw()).is_some(),
            RawObject::Queue(_) => true,
        };
        if !released {
            warn!(?object, "Released an object that does not exist");
        }
        self.names.remove(&object);
    }

    fn set_object_name(&mut self, object: RawObject, name: &str) {
        if let Some(d3d) = self.d3d_object(object) {
            set_debug_name(&d3d, name);
        }
        self.names.insert(object, name.to_string());
    }

    fn object_name(&self, object: RawObject) -> Option<String> {
        self.names.get(&object).cloned()
    }

    fn create_root_signature(&mut self, bytes: &[u8]) -> Result<RawRootSignature> {
        let signature: ID3D12RootSignature = unsafe {
            self.context
                .device
                .CreateRootSignature(0, bytes)
                .map_err(|e| GraphicsError::RootSignatureCreation(format!("Couldn't create root signature: {e}")))?
        };
        let id = self.allocate_id();
        self.objects.root_signatures.insert(id, signature);
        Ok(RawRootSignature::from_raw(id))
    }

    fn create_pipeline_state(&mut self, desc: &PipelineStateDesc, root_signature: RawRootSignature) -> Result<RawPipeline> {
        let signature = self.objects.root_signatures.get(&root_signature.as_raw()).ok_or_else(|| {
            GraphicsError::PipelineCompilation(format!("root signature {} does not exist", root_signature.as_raw()))
        })?;

        let semantics = desc
            .input_layout
            .iter()
            .map(|e| CString::new(e.semantic.as_str()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| GraphicsError::PipelineCompilation(format!("Invalid semantic name: {e}")))?;
        let elements: Vec<D3D12_INPUT_ELEMENT_DESC> = desc
            .input_layout
            .iter()
            .zip(&semantics)
            .map(|(e, name)| D3D12_INPUT_ELEMENT_DESC {
                SemanticName: PCSTR(name.as_ptr().cast()),
                SemanticIndex: e.semantic_index,
                Format: convert::vertex_format(e.format),
                InputSlot: e.slot,
                AlignedByteOffset: e.offset,
                InputSlotClass: if e.instance_step_rate > 0 {
                    D3D12_INPUT_CLASSIFICATION_PER_INSTANCE_DATA
                } else {
                    D3D12_INPUT_CLASSIFICATION_PER_VERTEX_DATA
                },
                InstanceDataStepRate: e.instance_step_rate,
            })
            .collect();

        let mut rtv_formats = [DXGI_FORMAT_UNKNOWN; 8];
        rtv_formats[0] = convert::dxgi_format(desc.render_target_format);

        let pso_desc = D3D12_GRAPHICS_PIPELINE_STATE_DESC {
            // 不增加引用计数，根签名在对象表中存活
            pRootSignature: unsafe { std::mem::transmute_copy(signature) },
            VS: D3D12_SHADER_BYTECODE {
                pShaderBytecode: desc.vertex_shader.as_ptr().cast(),
                BytecodeLength: desc.vertex_shader.len(),
            },
            PS: D3D12_SHADER_BYTECODE {
                pShaderBytecode: desc.pixel_shader.as_ptr().cast(),
                BytecodeLength: desc.pixel_shader.len(),
            },
            BlendState: convert::blend_desc(desc.blend),
            SampleMask: u32::MAX,
            RasterizerState: convert::rasterizer_desc(&desc.rasterizer),
            DepthStencilState: convert::depth_stencil_desc(&desc.depth_stencil),
            InputLayout: D3D12_INPUT_LAYOUT_DESC {
                pInputElementDescs: elements.as_ptr(),
                NumElements: elements.len() as u32,
            },
            PrimitiveTopologyType: convert::topology_type(desc.topology),
            NumRenderTargets: 1,
            RTVFormats: rtv_formats,
            DSVFormat: desc.depth_format.map_or(DXGI_FORMAT_UNKNOWN, convert::dxgi_format),
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            ..Default::default()
        };

        let pipeline: ID3D12PipelineState = unsafe { self.context.device.CreateGraphicsPipelineState(&pso_desc) }
            .map_err(|e| GraphicsError::PipelineCompilation(format!("Couldn't create pipeline state: {e}")))?;

        let id = self.allocate_id();
        self.objects.pipelines.insert(id, pipeline);
        Ok(RawPipeline::from_raw(id))
    }

    fn create_swapchain(&mut self, target: &SurfaceTarget, desc: &SwapchainDesc) -> Result<()> {
        let hwnd = match target {
            SurfaceTarget::Window { handle: RawWindowHandle::Win32(handle), .. } => HWND(handle.hwnd.get() as *mut c_void),
            SurfaceTarget::Window { .. } => {
                return Err(GraphicsError::CompositionTarget("window is not a Win32 window".to_string()).into())
            }
            SurfaceTarget::Offscreen { .. } => {
                return Err(GraphicsError::Unsupported {
                    backend: "dx12",
                    operation: "offscreen swapchains".to_string(),
                }
                .into())
            }
        };
        let desc = SwapchainDesc { allow_tearing: desc.allow_tearing && self.allow_tearing, ..*desc };
        self.swapchain = Some(CompositionSwapchain::new(&self.context.factory, &self.context.direct_queue, hwnd, &desc)?);
        self.acquire_backbuffers()
    }

    fn swapchain_ready(&mut self) -> bool {
        self.swapchain.as_mut().is_some_and(|sc| sc.ready())
    }

    fn backbuffer(&self, index: u32) -> Result<RawResource> {
        self.backbuffers
            .get(index as usize)
            .map(|id| RawResource::from_raw(*id))
            .ok_or_else(|| GraphicsError::Swapchain(format!("backbuffer {index} does not exist")).into())
    }

    fn current_backbuffer_index(&self) -> u32 {
        self.swapchain.as_ref().map_or(0, |sc| sc.current_index())
    }

    fn resize_swapchain(&mut self, width: u32, height: u32) -> Result<()> {
        // ResizeBuffers 要求所有后缓冲引用都已释放
        for id in self.backbuffers.drain(..) {
            self.objects.resources.remove(&id);
        }
        let Some(swapchain) = self.swapchain.as_mut() else {
            return Err(GraphicsError::Swapchain("resize without a swapchain".to_string()).into());
        };
        // 失败时缓冲保持原来的尺寸，同样需要重新取回
        let resized = swapchain.resize(width, height);
        self.acquire_backbuffers()?;
        resized?;
        debug!(width, height, "Swap chain resized");
        Ok(())
    }

    fn present(&mut self) -> Result<()> {
        let presented = match self.swapchain.as_mut() {
            Some(swapchain) => swapchain.present(),
            None => Err(GraphicsError::Swapchain("present without a swapchain".to_string()).into()),
        };
        self.process_debug_messages();
        presented
    }
}

impl Drop for Dx12Backend {
    fn drop(&mut self) {
        // 先释放交换链和所有对象，剩下的才是真正泄漏的
        self.swapchain = None;
        self.backbuffers.clear();
        self.objects = ObjectTable::default();
        if let Some(messages) = &self.debug_messages {
            messages.report_live_objects();
        }
    }
}
