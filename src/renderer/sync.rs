//! 帧同步
//!
//! 每个队列一条单调递增的栅栏时间线（[`QueueTimeline`]）。直接队列上为每个后缓冲
//! 保留一个 [`FrameSlot`]：独立的命令分配器/命令列表，以及该槽位最后一次提交时
//! signal 的栅栏值（水位线）。重新使用槽位之前只需等待它自己的水位线，
//! 其余帧可以继续在 GPU 上执行。

use tracing::{debug, trace};

use crate::core::error::Result;
use crate::gfx::{GpuBackend, QueueKind, RawFence, RawObject};
use super::command::CommandRecorder;

/// 栅栏值
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FenceValue(u64);

impl FenceValue {
    pub const ZERO: FenceValue = FenceValue(0);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// 下一个值
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

/// 一个队列上的栅栏时间线
pub struct QueueTimeline {
    queue: QueueKind,
    fence: RawFence,
    last_signaled: FenceValue,
}

impl QueueTimeline {
    pub fn new(backend: &mut dyn GpuBackend, queue: QueueKind) -> Result<Self> {
        let fence = backend.create_fence(0)?;
        backend.set_object_name(RawObject::Fence(fence), &format!("EG-Overlay {} fence", queue.name()));
        Ok(Self {
            queue,
            fence,
            last_signaled: FenceValue::ZERO,
        })
    }

    pub fn queue(&self) -> QueueKind {
        self.queue
    }

    pub fn fence(&self) -> RawFence {
        self.fence
    }

    /// 最近一次 signal 的值
    pub fn last_signaled(&self) -> FenceValue {
        self.last_signaled
    }

    /// GPU 已完成的值
    pub fn completed(&self, backend: &dyn GpuBackend) -> FenceValue {
        FenceValue(backend.fence_completed_value(self.fence))
    }

    pub fn is_complete(&self, backend: &dyn GpuBackend, value: FenceValue) -> bool {
        self.completed(backend) >= value
    }

    /// 在队列尾部 signal 下一个值
    pub fn signal(&mut self, backend: &mut dyn GpuBackend) -> Result<FenceValue> {
        let value = self.last_signaled.next();
        backend.signal(self.queue, self.fence, value.value())?;
        self.last_signaled = value;
        trace!(queue = self.queue.name(), fence = value.value(), "Signaled");
        Ok(value)
    }

    /// 阻塞直到 `value` 完成
    ///
    /// # 返回值
    ///
    /// 是否真的发生了阻塞等待
    pub fn wait(&self, backend: &mut dyn GpuBackend, value: FenceValue) -> Result<bool> {
        if self.is_complete(backend, value) {
            return Ok(false);
        }
        trace!(queue = self.queue.name(), fence = value.value(), "Waiting for fence");
        backend.wait_for_fence(self.fence, value.value())?;
        Ok(true)
    }

    /// 等待所有已经 signal 的工作完成，不会 signal 新值
    pub fn flush(&self, backend: &mut dyn GpuBackend) -> Result<bool> {
        self.wait(backend, self.last_signaled)
    }

    pub fn release(&self, backend: &mut dyn GpuBackend) {
        backend.release(RawObject::Fence(self.fence));
    }
}

/// 一个后缓冲对应的录制槽位
pub struct FrameSlot {
    pub recorder: CommandRecorder,
    /// 该槽位上一次提交完成时的栅栏值
    pub watermark: FenceValue,
}

/// 直接队列的帧同步器
pub struct FrameSynchronizer {
    timeline: QueueTimeline,
    slots: Vec<FrameSlot>,
    frames_submitted: u64,
    blocking_waits: u64,
}

impl FrameSynchronizer {
    /// 创建同步器
    ///
    /// # 参数
    ///
    /// * `backend` - 图形后端
    /// * `slot_count` - 槽位数，与后缓冲数量相同
    pub fn new(backend: &mut dyn GpuBackend, slot_count: u32) -> Result<Self> {
        let timeline = QueueTimeline::new(backend, QueueKind::Direct)?;
        let slots = (0..slot_count)
            .map(|i| {
                Ok(FrameSlot {
                    recorder: CommandRecorder::new(backend, QueueKind::Direct, &format!("EG-Overlay Frame {i}"))?,
                    watermark: FenceValue::ZERO,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(slots = slot_count, "Frame synchronizer created");
        Ok(Self {
            timeline,
            slots,
            frames_submitted: 0,
            blocking_waits: 0,
        })
    }

    pub fn timeline(&self) -> &QueueTimeline {
        &self.timeline
    }

    pub fn slot_count(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn slot(&self, index: u32) -> &FrameSlot {
        &self.slots[index as usize]
    }

    pub fn slot_mut(&mut self, index: u32) -> &mut FrameSlot {
        &mut self.slots[index as usize]
    }

    /// 已提交的帧数
    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted
    }

    /// 开始录制时因槽位仍在执行而阻塞的次数
    pub fn blocking_waits(&self) -> u64 {
        self.blocking_waits
    }

    /// 等待槽位上一次的提交完成，然后打开它的命令列表
    pub fn begin(&mut self, backend: &mut dyn GpuBackend, index: u32) -> Result<()> {
        let watermark = self.slots[index as usize].watermark;
        if self.timeline.wait(backend, watermark)? {
            self.blocking_waits += 1;
            debug!(slot = index, fence = watermark.value(), "Waited for frame slot to retire");
        }
        self.slots[index as usize].recorder.begin(backend)
    }

    /// 提交槽位的命令列表之后调用：signal 并记录水位线
    pub fn finish(&mut self, backend: &mut dyn GpuBackend, index: u32) -> Result<FenceValue> {
        let value = self.timeline.signal(backend)?;
        self.slots[index as usize].watermark = value;
        self.frames_submitted += 1;
        Ok(value)
    }

    /// 在直接队列上 signal 一个不属于任何槽位的值
    pub fn signal(&mut self, backend: &mut dyn GpuBackend) -> Result<FenceValue> {
        self.timeline.signal(backend)
    }

    /// 等待直接队列上所有已提交的工作
    pub fn flush(&self, backend: &mut dyn GpuBackend) -> Result<bool> {
        self.timeline.flush(backend)
    }

    pub fn release(&self, backend: &mut dyn GpuBackend) {
        for slot in &self.slots {
            slot.recorder.release(backend);
        }
        self.timeline.release(backend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::HeadlessBackend;

    #[test]
    fn test_fence_value_ordering() {
        let a = FenceValue::new(3);
        assert_eq!(a.next().value(), 4);
        assert!(a < a.next());
        assert_eq!(FenceValue::default(), FenceValue::ZERO);
    }

    #[test]
    fn test_timeline_signal_and_wait() {
        let mut backend = HeadlessBackend::new(2);
        let mut timeline = QueueTimeline::new(&mut backend, QueueKind::Direct).unwrap();

        let first = timeline.signal(&mut backend).unwrap();
        let second = timeline.signal(&mut backend).unwrap();
        assert_eq!(second, first.next());
        // 队列里只有 signal，不会积压
        assert!(timeline.is_complete(&backend, second));
        assert!(!timeline.wait(&mut backend, second).unwrap());
    }

    #[test]
    fn test_slot_reuse_waits_for_its_watermark() {
        let mut backend = HeadlessBackend::new(4);
        let probe = backend.probe();
        let mut sync = FrameSynchronizer::new(&mut backend, 2).unwrap();

        for frame in 0..6u32 {
            let slot = frame % 2;
            sync.begin(&mut backend, slot).unwrap();
            sync.slot_mut(slot).recorder.submit(&mut backend).unwrap();
            let value = sync.finish(&mut backend, slot).unwrap();
            assert_eq!(value.value(), frame as u64 + 1);
        }

        assert_eq!(sync.frames_submitted(), 6);
        assert!(sync.blocking_waits() > 0);
        assert_eq!(probe.validation_errors(), 0);

        sync.flush(&mut backend).unwrap();
        assert!(!sync.flush(&mut backend).unwrap());
    }
}
