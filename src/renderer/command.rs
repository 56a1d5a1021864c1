//! 命令列表录制
//!
//! [`CommandRecorder`] 把一个命令分配器和一个命令列表绑在一起，并跟踪列表的状态：
//!
//! ```text
//! Closed --begin--> Recording --submit--> Submitted --begin--> Recording ...
//!                       |
//!                       +--discard--> Closed
//! ```
//!
//! 分配器能否重置（即上一次提交是否执行完毕）由调用方通过栅栏保证。

use tracing::trace;

use crate::core::error::{GraphicsError, Result};
use crate::gfx::{GpuBackend, GpuCommand, QueueKind, RawCommandAllocator, RawCommandList, RawObject};

/// 命令列表状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandListState {
    /// 已关闭，可以重新开始录制
    Closed,
    /// 正在录制
    Recording,
    /// 已提交到队列
    Submitted,
}

/// 命令分配器 + 命令列表
pub struct CommandRecorder {
    queue: QueueKind,
    allocator: RawCommandAllocator,
    list: RawCommandList,
    state: CommandListState,
    recorded: u32,
}

impl CommandRecorder {
    /// 创建分配器和命令列表
    ///
    /// # 参数
    ///
    /// * `backend` - 图形后端
    /// * `queue` - 命令列表提交到的队列
    /// * `name` - 调试名称前缀
    pub fn new(backend: &mut dyn GpuBackend, queue: QueueKind, name: &str) -> Result<Self> {
        let allocator = backend.create_command_allocator(queue)?;
        let list = backend.create_command_list(queue, allocator)?;
        backend.set_object_name(RawObject::CommandAllocator(allocator), &format!("{name} Command Allocator"));
        backend.set_object_name(RawObject::CommandList(list), &format!("{name} Command List"));

        Ok(Self {
            queue,
            allocator,
            list,
            state: CommandListState::Closed,
            recorded: 0,
        })
    }

    pub fn queue(&self) -> QueueKind {
        self.queue
    }

    pub fn state(&self) -> CommandListState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == CommandListState::Recording
    }

    /// 本次录制的命令数
    pub fn recorded(&self) -> u32 {
        self.recorded
    }

    /// 重置分配器并打开命令列表
    pub fn begin(&mut self, backend: &mut dyn GpuBackend) -> Result<()> {
        if self.is_recording() {
            return Err(GraphicsError::CommandExecution(format!(
                "{} command list is already recording",
                self.queue.name()
            ))
            .into());
        }
        backend.reset_command_allocator(self.allocator)?;
        backend.reset_command_list(self.list, self.allocator)?;
        self.state = CommandListState::Recording;
        self.recorded = 0;
        Ok(())
    }

    /// 录制一条命令，列表未打开时忽略
    pub fn record(&mut self, backend: &mut dyn GpuBackend, command: GpuCommand<'_>) {
        if !self.is_recording() {
            trace!(?command, "Dropping command recorded outside of a begin/submit pair");
            return;
        }
        backend.record(self.list, command);
        self.recorded += 1;
    }

    /// 关闭并提交到队列
    pub fn submit(&mut self, backend: &mut dyn GpuBackend) -> Result<()> {
        self.close(backend)?;
        backend.execute_command_list(self.queue, self.list)?;
        self.state = CommandListState::Submitted;
        Ok(())
    }

    /// 关闭但不提交，丢弃已录制的命令
    pub fn discard(&mut self, backend: &mut dyn GpuBackend) -> Result<()> {
        if self.is_recording() {
            self.close(backend)?;
            trace!(queue = self.queue.name(), commands = self.recorded, "Command list discarded");
        }
        Ok(())
    }

    fn close(&mut self, backend: &mut dyn GpuBackend) -> Result<()> {
        if !self.is_recording() {
            return Err(GraphicsError::CommandExecution(format!(
                "{} command list closed without being opened",
                self.queue.name()
            ))
            .into());
        }
        // 关闭失败时列表同样不可再用，按已关闭处理
        self.state = CommandListState::Closed;
        backend.close_command_list(self.list)
    }

    /// 销毁分配器和命令列表，调用方保证 GPU 已空闲
    pub fn release(&self, backend: &mut dyn GpuBackend) {
        backend.release(RawObject::CommandList(self.list));
        backend.release(RawObject::CommandAllocator(self.allocator));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::HeadlessBackend;

    #[test]
    fn test_state_transitions() {
        let mut backend = HeadlessBackend::new(0);
        let mut recorder = CommandRecorder::new(&mut backend, QueueKind::Copy, "Test").unwrap();
        assert_eq!(recorder.state(), CommandListState::Closed);

        recorder.begin(&mut backend).unwrap();
        assert!(recorder.is_recording());
        assert!(recorder.begin(&mut backend).is_err());

        recorder.submit(&mut backend).unwrap();
        assert_eq!(recorder.state(), CommandListState::Submitted);
        assert!(recorder.submit(&mut backend).is_err());

        // 零延迟：提交后立即执行完毕，可以再次开始
        recorder.begin(&mut backend).unwrap();
        recorder.discard(&mut backend).unwrap();
        assert_eq!(recorder.state(), CommandListState::Closed);
        assert_eq!(backend.probe().validation_errors(), 0);
    }

    #[test]
    fn test_commands_outside_recording_are_ignored() {
        let mut backend = HeadlessBackend::new(0);
        let mut recorder = CommandRecorder::new(&mut backend, QueueKind::Direct, "Test").unwrap();

        recorder.record(&mut backend, GpuCommand::SetPrimitiveTopology(crate::gfx::PrimitiveTopology::TriangleList));
        assert_eq!(recorder.recorded(), 0);
        assert_eq!(backend.probe().validation_errors(), 0);

        recorder.begin(&mut backend).unwrap();
        recorder.record(&mut backend, GpuCommand::SetPrimitiveTopology(crate::gfx::PrimitiveTopology::TriangleList));
        assert_eq!(recorder.recorded(), 1);
    }
}
