//! 资源内存模拟
//!
//! 缓冲区是一段字节数组；纹理按子资源分别保存，每个子资源紧密排列
//! (`width * bpp` 字节一行，`height` 行一片，`depth` 片)。

use std::collections::HashMap;

use crate::gfx::types::{
    HeapKind, PlacedFootprint, ResourceState, TextureDesc, TextureFormat,
};

pub(super) enum Storage {
    Buffer { heap: HeapKind, data: Vec<u8>, address: u64 },
    Texture { desc: TextureDesc, subresources: Vec<Vec<u8>> },
}

pub(super) struct SoftResource {
    pub storage: Storage,
    pub state: ResourceState,
}

pub(super) type ResourceMap = HashMap<u64, SoftResource>;

impl SoftResource {
    pub fn buffer(size: u64, heap: HeapKind, address: u64) -> Self {
        let state = match heap {
            HeapKind::Upload => ResourceState::GenericRead,
            HeapKind::Readback => ResourceState::CopyDest,
            HeapKind::Default => ResourceState::Common,
        };
        Self {
            storage: Storage::Buffer { heap, data: vec![0; size as usize], address },
            state,
        }
    }

    pub fn texture(desc: &TextureDesc) -> Self {
        let subresources = (0..desc.subresource_count())
            .map(|sub| vec![0; subresource_len(desc, sub)])
            .collect();
        let state = if desc.format.is_depth() { ResourceState::DepthWrite } else { ResourceState::Common };
        Self {
            storage: Storage::Texture { desc: *desc, subresources },
            state,
        }
    }

    /// 资源占用的字节数
    pub fn byte_len(&self) -> u64 {
        match &self.storage {
            Storage::Buffer { data, .. } => data.len() as u64,
            Storage::Texture { subresources, .. } => subresources.iter().map(|s| s.len() as u64).sum(),
        }
    }

    pub fn heap(&self) -> HeapKind {
        match &self.storage {
            Storage::Buffer { heap, .. } => *heap,
            Storage::Texture { .. } => HeapKind::Default,
        }
    }

    pub fn texture_desc(&self) -> Option<&TextureDesc> {
        match &self.storage {
            Storage::Texture { desc, .. } => Some(desc),
            Storage::Buffer { .. } => None,
        }
    }
}

fn subresource_len(desc: &TextureDesc, subresource: u32) -> usize {
    let (w, h, d) = desc.subresource_extent(subresource);
    (w * h * d * desc.format.bytes_per_pixel()) as usize
}

/// 把清屏颜色编码成一个像素
pub(super) fn encode_color(format: TextureFormat, color: [f32; 4]) -> Vec<u8> {
    let unorm = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    match format {
        TextureFormat::Rgba8Unorm => color.iter().map(|c| unorm(*c)).collect(),
        TextureFormat::Bgra8Unorm => vec![unorm(color[2]), unorm(color[1]), unorm(color[0]), unorm(color[3])],
        TextureFormat::R8Unorm => vec![unorm(color[0])],
        TextureFormat::R32Float | TextureFormat::D32Float => color[0].to_le_bytes().to_vec(),
        TextureFormat::Rgba32Float => color.iter().flat_map(|c| c.to_le_bytes()).collect(),
    }
}

/// 用同一个像素填满纹理的所有子资源
pub(super) fn fill_texture(resources: &mut ResourceMap, id: u64, pixel: &[u8]) -> Result<(), String> {
    match resources.get_mut(&id).map(|r| &mut r.storage) {
        Some(Storage::Texture { subresources, .. }) => {
            for sub in subresources.iter_mut() {
                for chunk in sub.chunks_exact_mut(pixel.len()) {
                    chunk.copy_from_slice(pixel);
                }
            }
            Ok(())
        }
        _ => Err(format!("resource {id} is not a texture")),
    }
}

fn buffer_data(resources: &ResourceMap, id: u64) -> Result<&Vec<u8>, String> {
    match resources.get(&id).map(|r| &r.storage) {
        Some(Storage::Buffer { data, .. }) => Ok(data),
        Some(_) => Err(format!("resource {id} is not a buffer")),
        None => Err(format!("resource {id} does not exist")),
    }
}

fn texture_parts(resources: &mut ResourceMap, id: u64) -> Result<(TextureDesc, &mut Vec<Vec<u8>>), String> {
    match resources.get_mut(&id).map(|r| &mut r.storage) {
        Some(Storage::Texture { desc, subresources }) => Ok((*desc, subresources)),
        Some(_) => Err(format!("resource {id} is not a texture")),
        None => Err(format!("resource {id} does not exist")),
    }
}

/// 缓冲区 → 纹理子资源的区域复制
pub(super) fn copy_buffer_to_texture(
    resources: &mut ResourceMap,
    src: u64,
    footprint: &PlacedFootprint,
    dst: u64,
    subresource: u32,
    origin: (u32, u32, u32),
) -> Result<(), String> {
    let source = buffer_data(resources, src)?.clone();
    if footprint.total_bytes() > source.len() as u64 {
        return Err(format!(
            "footprint needs {} bytes but the source buffer holds {}",
            footprint.total_bytes(),
            source.len()
        ));
    }

    let (desc, subresources) = texture_parts(resources, dst)?;
    if !footprint.format.is_copy_compatible(desc.format) {
        return Err(format!("footprint format {} does not match texture format {}", footprint.format, desc.format));
    }
    let (w, h, d) = desc.subresource_extent(subresource);
    let (x, y, z) = origin;
    if x + footprint.width > w || y + footprint.height > h || z + footprint.depth > d {
        return Err(format!(
            "copy region {}x{}x{} at ({x}, {y}, {z}) exceeds subresource {subresource} extent {w}x{h}x{d}",
            footprint.width, footprint.height, footprint.depth
        ));
    }
    let target = subresources
        .get_mut(subresource as usize)
        .ok_or_else(|| format!("subresource {subresource} out of range"))?;

    let bpp = desc.format.bytes_per_pixel() as usize;
    let row_bytes = footprint.width as usize * bpp;
    let dst_row = w as usize * bpp;
    for slice in 0..footprint.depth as usize {
        for row in 0..footprint.height as usize {
            let src_off = footprint.offset as usize
                + (slice * footprint.height as usize + row) * footprint.row_pitch as usize;
            let dst_off = ((z as usize + slice) * h as usize + y as usize + row) * dst_row + x as usize * bpp;
            target[dst_off..dst_off + row_bytes].copy_from_slice(&source[src_off..src_off + row_bytes]);
        }
    }
    Ok(())
}

/// 纹理子资源 → 缓冲区（整片复制）
pub(super) fn copy_texture_to_buffer(
    resources: &mut ResourceMap,
    src: u64,
    subresource: u32,
    dst: u64,
    footprint: &PlacedFootprint,
) -> Result<(), String> {
    let (desc, subresources) = texture_parts(resources, src)?;
    let (w, h, d) = desc.subresource_extent(subresource);
    if (footprint.width, footprint.height, footprint.depth) != (w, h, d) {
        return Err(format!("footprint does not cover subresource {subresource} ({w}x{h}x{d})"));
    }
    let source = subresources
        .get(subresource as usize)
        .ok_or_else(|| format!("subresource {subresource} out of range"))?
        .clone();
    let bpp = desc.format.bytes_per_pixel() as usize;

    let target = match resources.get_mut(&dst).map(|r| &mut r.storage) {
        Some(Storage::Buffer { data, .. }) => data,
        _ => return Err(format!("resource {dst} is not a buffer")),
    };
    if footprint.total_bytes() > target.len() as u64 {
        return Err("readback buffer too small for footprint".to_string());
    }

    let row_bytes = w as usize * bpp;
    for row in 0..(h * d) as usize {
        let dst_off = footprint.offset as usize + row * footprint.row_pitch as usize;
        target[dst_off..dst_off + row_bytes].copy_from_slice(&source[row * row_bytes..(row + 1) * row_bytes]);
    }
    Ok(())
}

/// 同形状纹理之间的整片子资源复制
pub(super) fn copy_subresource(resources: &mut ResourceMap, src: u64, dst: u64, subresource: u32) -> Result<(), String> {
    let (src_desc, src_subs) = texture_parts(resources, src)?;
    let data = src_subs
        .get(subresource as usize)
        .ok_or_else(|| format!("subresource {subresource} out of range in source"))?
        .clone();
    let src_extent = src_desc.subresource_extent(subresource);

    let (dst_desc, dst_subs) = texture_parts(resources, dst)?;
    if !src_desc.format.is_copy_compatible(dst_desc.format) || dst_desc.subresource_extent(subresource) != src_extent {
        return Err(format!("subresource {subresource} shapes differ between source and destination"));
    }
    let target = dst_subs
        .get_mut(subresource as usize)
        .ok_or_else(|| format!("subresource {subresource} out of range in destination"))?;
    target.copy_from_slice(&data);
    Ok(())
}

/// 整个资源复制
pub(super) fn copy_resource(resources: &mut ResourceMap, src: u64, dst: u64) -> Result<(), String> {
    let source = match resources.get(&src).map(|r| &r.storage) {
        Some(Storage::Buffer { data, .. }) => Storage::Buffer { heap: HeapKind::Default, data: data.clone(), address: 0 },
        Some(Storage::Texture { desc, subresources }) => Storage::Texture { desc: *desc, subresources: subresources.clone() },
        None => return Err(format!("resource {src} does not exist")),
    };

    match (source, resources.get_mut(&dst).map(|r| &mut r.storage)) {
        (Storage::Buffer { data: from, .. }, Some(Storage::Buffer { data: to, .. })) if from.len() == to.len() => {
            to.copy_from_slice(&from);
            Ok(())
        }
        (Storage::Texture { desc: from_desc, subresources: from }, Some(Storage::Texture { desc: to_desc, subresources: to }))
            if from_desc.width == to_desc.width
                && from_desc.height == to_desc.height
                && from_desc.depth_or_array_size == to_desc.depth_or_array_size
                && from_desc.mip_levels == to_desc.mip_levels
                && from_desc.format.is_copy_compatible(to_desc.format) =>
        {
            *to = from;
            Ok(())
        }
        (_, None) => Err(format!("resource {dst} does not exist")),
        _ => Err(format!("resources {src} and {dst} differ in kind or size")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_with(entries: Vec<(u64, SoftResource)>) -> ResourceMap {
        entries.into_iter().collect()
    }

    #[test]
    fn test_buffer_to_texture_region() {
        let desc = TextureDesc::texture_2d(TextureFormat::R8Unorm, 4, 4, 1);
        let mut upload = SoftResource::buffer(512, HeapKind::Upload, 0);
        if let Storage::Buffer { data, .. } = &mut upload.storage {
            data[0..2].copy_from_slice(&[1, 2]);
            data[256..258].copy_from_slice(&[3, 4]);
        }
        let mut resources = map_with(vec![(1, upload), (2, SoftResource::texture(&desc))]);

        let footprint = PlacedFootprint {
            offset: 0,
            format: TextureFormat::R8Unorm,
            width: 2,
            height: 2,
            depth: 1,
            row_pitch: 256,
        };
        copy_buffer_to_texture(&mut resources, 1, &footprint, 2, 0, (1, 2, 0)).unwrap();

        let Storage::Texture { subresources, .. } = &resources[&2].storage else { panic!("texture expected") };
        let texels = &subresources[0];
        assert_eq!(&texels[9..11], &[1, 2]);
        assert_eq!(&texels[13..15], &[3, 4]);
        assert_eq!(texels.iter().filter(|b| **b != 0).count(), 4);
    }

    #[test]
    fn test_region_out_of_bounds() {
        let desc = TextureDesc::texture_2d(TextureFormat::R8Unorm, 4, 4, 1);
        let mut resources = map_with(vec![
            (1, SoftResource::buffer(1024, HeapKind::Upload, 0)),
            (2, SoftResource::texture(&desc)),
        ]);
        let footprint = PlacedFootprint {
            offset: 0,
            format: TextureFormat::R8Unorm,
            width: 4,
            height: 1,
            depth: 1,
            row_pitch: 256,
        };
        assert!(copy_buffer_to_texture(&mut resources, 1, &footprint, 2, 0, (1, 0, 0)).is_err());
    }

    #[test]
    fn test_encode_color() {
        assert_eq!(encode_color(TextureFormat::Rgba8Unorm, [1.0, 0.0, 0.5, 0.0]), vec![255, 0, 128, 0]);
        assert_eq!(encode_color(TextureFormat::Bgra8Unorm, [1.0, 0.0, 0.0, 1.0]), vec![0, 0, 255, 255]);
        assert_eq!(encode_color(TextureFormat::D32Float, [1.0, 0.0, 0.0, 0.0]), 1.0f32.to_le_bytes().to_vec());
    }

    #[test]
    fn test_copy_resource_size_mismatch() {
        let mut resources = map_with(vec![
            (1, SoftResource::buffer(64, HeapKind::Upload, 0)),
            (2, SoftResource::buffer(32, HeapKind::Default, 0)),
        ]);
        assert!(copy_resource(&mut resources, 1, 2).is_err());
    }
}
