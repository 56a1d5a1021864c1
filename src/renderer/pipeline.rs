//! 根签名与管线缓存
//!
//! 根签名按序列化字节去重，管线按 (描述, 根签名) 去重。同一个描述第二次请求时
//! 直接返回已有的 id，不会重新编译。对象创建后只读，整个渲染器生命周期内有效。

use std::collections::HashMap;

use tracing::{debug, error, info};

use crate::core::error::{GraphicsError, Result};
use crate::gfx::{GpuBackend, PipelineStateDesc, PrimitiveTopologyType, RawObject, RawPipeline, RawRootSignature};

/// 根签名 id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RootSignatureId(u32);

/// 管线 id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineId(u32);

/// 缓存的管线
#[derive(Debug, Clone, Copy)]
pub struct CachedPipeline {
    pub raw: RawPipeline,
    pub root_signature: RootSignatureId,
    pub topology: PrimitiveTopologyType,
}

/// 根签名与管线缓存
#[derive(Default)]
pub struct PipelineCache {
    root_signatures: Vec<RawRootSignature>,
    root_signature_keys: HashMap<Vec<u8>, RootSignatureId>,
    pipelines: Vec<CachedPipeline>,
    pipeline_keys: HashMap<(PipelineStateDesc, RootSignatureId), PipelineId>,
    default_root_signature: Option<RootSignatureId>,
    hits: u64,
}

impl PipelineCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从序列化字节创建根签名
    ///
    /// # 返回值
    ///
    /// 失败时返回 [`GraphicsError::RootSignatureCreation`]，属于致命错误
    pub fn create_root_signature(&mut self, backend: &mut dyn GpuBackend, bytes: &[u8]) -> Result<RootSignatureId> {
        if let Some(id) = self.root_signature_keys.get(bytes) {
            self.hits += 1;
            return Ok(*id);
        }

        let raw = backend.create_root_signature(bytes).inspect_err(|e| {
            error!(error = %e, len = bytes.len(), "Couldn't create root signature");
        })?;
        let id = RootSignatureId(self.root_signatures.len() as u32);
        backend.set_object_name(RawObject::RootSignature(raw), &format!("EG-Overlay Root Signature {}", id.0));
        self.root_signatures.push(raw);
        self.root_signature_keys.insert(bytes.to_vec(), id);

        debug!(id = id.0, len = bytes.len(), "Root signature created");
        Ok(id)
    }

    /// 设置默认根签名，之后不指定根签名的管线都使用它
    pub fn set_default_root_signature(&mut self, id: RootSignatureId) {
        self.default_root_signature = Some(id);
    }

    pub fn default_root_signature(&self) -> Option<RootSignatureId> {
        self.default_root_signature
    }

    /// 使用默认根签名编译管线
    pub fn create_pipeline_state(&mut self, backend: &mut dyn GpuBackend, desc: &PipelineStateDesc) -> Result<PipelineId> {
        let root_signature = self.default_root_signature.ok_or_else(|| {
            GraphicsError::PipelineCompilation("no default root signature has been loaded".to_string())
        })?;
        self.create_pipeline_state_with(backend, desc, root_signature)
    }

    /// 使用指定根签名编译管线
    ///
    /// # 返回值
    ///
    /// 失败时返回 [`GraphicsError::PipelineCompilation`]，属于致命错误
    pub fn create_pipeline_state_with(
        &mut self,
        backend: &mut dyn GpuBackend,
        desc: &PipelineStateDesc,
        root_signature: RootSignatureId,
    ) -> Result<PipelineId> {
        let key = (desc.clone(), root_signature);
        if let Some(id) = self.pipeline_keys.get(&key) {
            self.hits += 1;
            return Ok(*id);
        }

        let raw_sig = self.raw_root_signature(root_signature).ok_or_else(|| {
            GraphicsError::PipelineCompilation(format!("unknown root signature {}", root_signature.0))
        })?;
        let raw = backend.create_pipeline_state(desc, raw_sig).inspect_err(|e| {
            error!(error = %e, "Couldn't create pipeline state");
        })?;
        let id = PipelineId(self.pipelines.len() as u32);
        backend.set_object_name(RawObject::Pipeline(raw), &format!("EG-Overlay Pipeline {}", id.0));
        self.pipelines.push(CachedPipeline { raw, root_signature, topology: desc.topology });
        self.pipeline_keys.insert(key, id);

        info!(
            id = id.0,
            root_signature = root_signature.0,
            inputs = desc.input_layout.len(),
            blend = ?desc.blend,
            "Pipeline state created"
        );
        Ok(id)
    }

    pub fn raw_root_signature(&self, id: RootSignatureId) -> Option<RawRootSignature> {
        self.root_signatures.get(id.0 as usize).copied()
    }

    pub fn pipeline(&self, id: PipelineId) -> Option<&CachedPipeline> {
        self.pipelines.get(id.0 as usize)
    }

    pub fn root_signature_count(&self) -> usize {
        self.root_signatures.len()
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    /// 命中缓存的次数
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// 销毁全部对象，调用方保证 GPU 已空闲
    pub fn release_all(&mut self, backend: &mut dyn GpuBackend) {
        for pipeline in self.pipelines.drain(..) {
            backend.release(RawObject::Pipeline(pipeline.raw));
        }
        for sig in self.root_signatures.drain(..) {
            backend.release(RawObject::RootSignature(sig));
        }
        self.pipeline_keys.clear();
        self.root_signature_keys.clear();
        self.default_root_signature = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::{BlendMode, HeadlessBackend};

    fn bytecode(tag: &[u8]) -> Vec<u8> {
        let mut bytes = b"DXBC".to_vec();
        bytes.extend_from_slice(tag);
        bytes
    }

    #[test]
    fn test_root_signature_dedup() {
        let mut backend = HeadlessBackend::new(0);
        let mut cache = PipelineCache::new();

        let a = cache.create_root_signature(&mut backend, &bytecode(b"sig-a")).unwrap();
        let again = cache.create_root_signature(&mut backend, &bytecode(b"sig-a")).unwrap();
        let b = cache.create_root_signature(&mut backend, &bytecode(b"sig-b")).unwrap();

        assert_eq!(a, again);
        assert_ne!(a, b);
        assert_eq!(cache.root_signature_count(), 2);
        assert_eq!(cache.hits(), 1);
    }

    #[test]
    fn test_pipeline_dedup_and_default_root_signature() {
        let mut backend = HeadlessBackend::new(0);
        let mut cache = PipelineCache::new();
        let desc = PipelineStateDesc::new(bytecode(b"vs"), bytecode(b"ps"));

        // 还没有默认根签名
        assert!(cache.create_pipeline_state(&mut backend, &desc).is_err());

        let sig = cache.create_root_signature(&mut backend, &bytecode(b"sig")).unwrap();
        cache.set_default_root_signature(sig);

        let first = cache.create_pipeline_state(&mut backend, &desc).unwrap();
        let second = cache.create_pipeline_state(&mut backend, &desc.clone()).unwrap();
        let opaque = cache
            .create_pipeline_state(&mut backend, &desc.clone().with_blend(BlendMode::Opaque))
            .unwrap();

        assert_eq!(first, second);
        assert_ne!(first, opaque);
        assert_eq!(cache.pipeline_count(), 2);
        assert_eq!(cache.pipeline(first).map(|p| p.root_signature), Some(sig));
    }

    #[test]
    fn test_compile_failures_are_fatal() {
        let mut backend = HeadlessBackend::new(0);
        let mut cache = PipelineCache::new();

        let err = cache.create_root_signature(&mut backend, b"not a container").unwrap_err();
        assert!(err.is_fatal());

        let sig = cache.create_root_signature(&mut backend, &bytecode(b"sig")).unwrap();
        let bad = PipelineStateDesc::new(b"garbage".to_vec(), bytecode(b"ps"));
        let err = cache.create_pipeline_state_with(&mut backend, &bad, sig).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(cache.pipeline_count(), 0);
    }

    #[test]
    fn test_release_all() {
        let mut backend = HeadlessBackend::new(0);
        let probe = backend.probe();
        let mut cache = PipelineCache::new();
        let sig = cache.create_root_signature(&mut backend, &bytecode(b"sig")).unwrap();
        cache
            .create_pipeline_state_with(&mut backend, &PipelineStateDesc::new(bytecode(b"vs"), bytecode(b"ps")), sig)
            .unwrap();

        cache.release_all(&mut backend);
        assert_eq!(cache.pipeline_count(), 0);
        assert!(cache.default_root_signature().is_none());
        assert_eq!(probe.validation_errors(), 0);
    }
}
