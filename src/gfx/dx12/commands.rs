//! 把 [`GpuCommand`] 翻译成 ID3D12GraphicsCommandList 调用

use std::mem::ManuallyDrop;

use tracing::warn;
use windows::Win32::Graphics::Direct3D12::*;

use crate::gfx::types::{GpuCommand, PlacedFootprint, RawResource, ResourceState};
use super::{convert, ObjectTable};

/// 录制一条命令，引用的对象不存在时跳过并记录警告
pub(super) fn record(list: &ID3D12GraphicsCommandList, objects: &ObjectTable, command: GpuCommand<'_>) {
    let resource = |raw: RawResource| {
        let found = objects.resources.get(&raw.as_raw());
        if found.is_none() {
            warn!(resource = raw.as_raw(), ?command, "Command refers to a released resource");
        }
        found
    };

    unsafe {
        match command {
            GpuCommand::Transition { resource: raw, before, after } => {
                if let Some(res) = resource(raw) {
                    list.ResourceBarrier(&[transition_barrier(res, before, after)]);
                }
            }
            GpuCommand::SetDescriptorHeap(raw) => match objects.heaps.get(&raw.as_raw()) {
                Some(heap) => list.SetDescriptorHeaps(&[Some(heap.heap().clone())]),
                None => warn!(heap = raw.as_raw(), "Binding a released descriptor heap"),
            },
            GpuCommand::SetRootSignature(raw) => match objects.root_signatures.get(&raw.as_raw()) {
                Some(sig) => list.SetGraphicsRootSignature(sig),
                None => warn!(root_signature = raw.as_raw(), "Binding a released root signature"),
            },
            GpuCommand::SetPipelineState(raw) => match objects.pipelines.get(&raw.as_raw()) {
                Some(pso) => list.SetPipelineState(pso),
                None => warn!(pipeline = raw.as_raw(), "Binding a released pipeline state"),
            },
            GpuCommand::SetRenderTarget { rtv, dsv } => {
                let rtv = D3D12_CPU_DESCRIPTOR_HANDLE { ptr: rtv.ptr };
                let dsv = dsv.map(|h| D3D12_CPU_DESCRIPTOR_HANDLE { ptr: h.ptr });
                list.OMSetRenderTargets(1, Some(&rtv), false, dsv.as_ref().map(|h| h as *const _));
            }
            GpuCommand::ClearRenderTarget { rtv, color } => {
                list.ClearRenderTargetView(D3D12_CPU_DESCRIPTOR_HANDLE { ptr: rtv.ptr }, &color, None);
            }
            GpuCommand::ClearDepth { dsv, depth } => {
                list.ClearDepthStencilView(
                    D3D12_CPU_DESCRIPTOR_HANDLE { ptr: dsv.ptr },
                    D3D12_CLEAR_FLAG_DEPTH,
                    depth,
                    0,
                    &[],
                );
            }
            GpuCommand::SetViewport(vp) => list.RSSetViewports(&[convert::viewport(&vp)]),
            GpuCommand::SetScissor(rect) => list.RSSetScissorRects(&[convert::rect(&rect)]),
            GpuCommand::SetRootConstants { index, values, offset } => {
                list.SetGraphicsRoot32BitConstants(index, values.len() as u32, values.as_ptr().cast(), offset);
            }
            GpuCommand::SetDescriptorTable { index, base } => {
                list.SetGraphicsRootDescriptorTable(index, D3D12_GPU_DESCRIPTOR_HANDLE { ptr: base.ptr });
            }
            GpuCommand::SetVertexBuffers { slot, views } => {
                let views: Vec<D3D12_VERTEX_BUFFER_VIEW> = views
                    .iter()
                    .map(|v| D3D12_VERTEX_BUFFER_VIEW {
                        BufferLocation: v.address,
                        SizeInBytes: v.size,
                        StrideInBytes: v.stride,
                    })
                    .collect();
                list.IASetVertexBuffers(slot, Some(&views));
            }
            GpuCommand::SetPrimitiveTopology(topology) => {
                list.IASetPrimitiveTopology(convert::primitive_topology(topology));
            }
            GpuCommand::Draw { vertex_count, instance_count, first_vertex, first_instance } => {
                list.DrawInstanced(vertex_count, instance_count, first_vertex, first_instance);
            }
            GpuCommand::CopyBufferToTexture { src, footprint, dst, subresource, x, y, z } => {
                if let (Some(src), Some(dst)) = (resource(src), resource(dst)) {
                    let src = placed_location(src, &footprint);
                    let dst = subresource_location(dst, subresource);
                    list.CopyTextureRegion(&dst, x, y, z, &src, None);
                }
            }
            GpuCommand::CopyTextureToBuffer { src, subresource, dst, footprint } => {
                if let (Some(src), Some(dst)) = (resource(src), resource(dst)) {
                    let src = subresource_location(src, subresource);
                    let dst = placed_location(dst, &footprint);
                    list.CopyTextureRegion(&dst, 0, 0, 0, &src, None);
                }
            }
            GpuCommand::CopyTextureSubresource { src, dst, subresource } => {
                if let (Some(src), Some(dst)) = (resource(src), resource(dst)) {
                    let src = subresource_location(src, subresource);
                    let dst = subresource_location(dst, subresource);
                    list.CopyTextureRegion(&dst, 0, 0, 0, &src, None);
                }
            }
            GpuCommand::CopyResource { src, dst } => {
                if let (Some(src), Some(dst)) = (resource(src), resource(dst)) {
                    list.CopyResource(dst, src);
                }
            }
        }
    }
}

// 结构体里的接口指针不增加引用计数，命令列表录制期间资源由对象表持有

fn transition_barrier(resource: &ID3D12Resource, before: ResourceState, after: ResourceState) -> D3D12_RESOURCE_BARRIER {
    D3D12_RESOURCE_BARRIER {
        Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
        Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
        Anonymous: D3D12_RESOURCE_BARRIER_0 {
            Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                pResource: unsafe { std::mem::transmute_copy(resource) },
                Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
                StateBefore: convert::resource_state(before),
                StateAfter: convert::resource_state(after),
            }),
        },
    }
}

fn placed_location(buffer: &ID3D12Resource, footprint: &PlacedFootprint) -> D3D12_TEXTURE_COPY_LOCATION {
    D3D12_TEXTURE_COPY_LOCATION {
        pResource: unsafe { std::mem::transmute_copy(buffer) },
        Type: D3D12_TEXTURE_COPY_TYPE_PLACED_FOOTPRINT,
        Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
            PlacedFootprint: D3D12_PLACED_SUBRESOURCE_FOOTPRINT {
                Offset: footprint.offset,
                Footprint: D3D12_SUBRESOURCE_FOOTPRINT {
                    Format: convert::dxgi_format(footprint.format),
                    Width: footprint.width,
                    Height: footprint.height,
                    Depth: footprint.depth,
                    RowPitch: footprint.row_pitch,
                },
            },
        },
    }
}

fn subresource_location(texture: &ID3D12Resource, subresource: u32) -> D3D12_TEXTURE_COPY_LOCATION {
    D3D12_TEXTURE_COPY_LOCATION {
        pResource: unsafe { std::mem::transmute_copy(texture) },
        Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
        Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 { SubresourceIndex: subresource },
    }
}
