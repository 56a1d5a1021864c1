//! 调试层消息
//!
//! 启用调试层时从 DXGI 信息队列取出 DXGI 和 D3D12 的校验消息，按严重程度转发到
//! tracing。输出到调试器的副本被静音，消息只出现在日志里。

use tracing::{debug, error, warn, Level};
use windows::Win32::Graphics::Dxgi::*;

/// DXGI 信息队列
pub(super) struct DebugMessages {
    queue: IDXGIInfoQueue,
}

impl DebugMessages {
    /// 获取信息队列，调试层不可用时返回 None
    pub fn new() -> Option<Self> {
        match unsafe { DXGIGetDebugInterface1::<IDXGIInfoQueue>(0) } {
            Ok(queue) => {
                unsafe { queue.SetMuteDebugOutput(DXGI_DEBUG_ALL, true) };
                Some(Self { queue })
            }
            Err(e) => {
                warn!("Couldn't get DXGI info queue, debug messages won't be logged: {}", e);
                None
            }
        }
    }

    /// 把积累的消息写入日志并清空队列
    pub fn drain(&self) {
        unsafe {
            let count = self.queue.GetNumStoredMessagesAllowedByRetrievalFilters(DXGI_DEBUG_ALL);
            for index in 0..count {
                let mut len = 0usize;
                if self.queue.GetMessage(DXGI_DEBUG_ALL, index, None, &mut len).is_err() || len == 0 {
                    continue;
                }
                // 消息头之后紧跟描述文本，按 8 字节对齐分配
                let mut buffer = vec![0u64; len.div_ceil(8)];
                let message = buffer.as_mut_ptr().cast::<DXGI_INFO_QUEUE_MESSAGE>();
                if let Err(e) = self.queue.GetMessage(DXGI_DEBUG_ALL, index, Some(message), &mut len) {
                    error!("Couldn't get debug message {}: {}", index, e);
                    continue;
                }
                log_message(&*message);
            }
            self.queue.ClearStoredMessages(DXGI_DEBUG_ALL);
        }
    }

    /// 报告仍然存活的 DXGI/D3D12 对象，设备销毁前调用
    pub fn report_live_objects(&self) {
        match unsafe { DXGIGetDebugInterface1::<IDXGIDebug>(0) } {
            Ok(dxgi_debug) => {
                debug!("D3D12 Live Objects:");
                let reported = unsafe {
                    dxgi_debug.ReportLiveObjects(DXGI_DEBUG_ALL, DXGI_DEBUG_RLO_IGNORE_INTERNAL | DXGI_DEBUG_RLO_DETAIL)
                };
                if let Err(e) = reported {
                    debug!("Couldn't report live objects: {}", e);
                }
                self.drain();
            }
            Err(e) => debug!("Couldn't get DXGI debug interface: {}", e),
        }
    }
}

fn log_message(message: &DXGI_INFO_QUEUE_MESSAGE) {
    let text = if message.pDescription.is_null() {
        String::new()
    } else {
        let bytes = unsafe { std::slice::from_raw_parts(message.pDescription, message.DescriptionByteLength) };
        String::from_utf8_lossy(bytes).trim_end_matches('\0').to_string()
    };
    let category = category_name(message.Category);
    let (level, severity) = severity_level(message.Severity);
    if level == Level::ERROR {
        error!(category, severity, id = message.ID, "{}", text);
    } else if level == Level::WARN {
        warn!(category, severity, id = message.ID, "{}", text);
    } else {
        debug!(category, severity, id = message.ID, "{}", text);
    }
}

fn category_name(category: DXGI_INFO_QUEUE_MESSAGE_CATEGORY) -> &'static str {
    match category {
        DXGI_INFO_QUEUE_MESSAGE_CATEGORY_MISCELLANEOUS => "Miscellaneous",
        DXGI_INFO_QUEUE_MESSAGE_CATEGORY_INITIALIZATION => "Initialization",
        DXGI_INFO_QUEUE_MESSAGE_CATEGORY_CLEANUP => "Cleanup",
        DXGI_INFO_QUEUE_MESSAGE_CATEGORY_COMPILATION => "Compilation",
        DXGI_INFO_QUEUE_MESSAGE_CATEGORY_STATE_CREATION => "State Creation",
        DXGI_INFO_QUEUE_MESSAGE_CATEGORY_STATE_SETTING => "State Setting",
        DXGI_INFO_QUEUE_MESSAGE_CATEGORY_STATE_GETTING => "State Getting",
        DXGI_INFO_QUEUE_MESSAGE_CATEGORY_RESOURCE_MANIPULATION => "Resource Manipulation",
        DXGI_INFO_QUEUE_MESSAGE_CATEGORY_EXECUTION => "Execution",
        DXGI_INFO_QUEUE_MESSAGE_CATEGORY_SHADER => "Shader",
        _ => "Unknown",
    }
}

/// CORRUPTION/ERROR 记为 error，WARNING 记为 warn，其余记为 debug
fn severity_level(severity: DXGI_INFO_QUEUE_MESSAGE_SEVERITY) -> (Level, &'static str) {
    match severity {
        DXGI_INFO_QUEUE_MESSAGE_SEVERITY_CORRUPTION => (Level::ERROR, "CORRUPTION"),
        DXGI_INFO_QUEUE_MESSAGE_SEVERITY_ERROR => (Level::ERROR, "ERROR"),
        DXGI_INFO_QUEUE_MESSAGE_SEVERITY_WARNING => (Level::WARN, "WARNING"),
        DXGI_INFO_QUEUE_MESSAGE_SEVERITY_INFO => (Level::DEBUG, "INFO"),
        _ => (Level::DEBUG, "MESSAGE"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_mapping() {
        assert_eq!(severity_level(DXGI_INFO_QUEUE_MESSAGE_SEVERITY_CORRUPTION).0, Level::ERROR);
        assert_eq!(severity_level(DXGI_INFO_QUEUE_MESSAGE_SEVERITY_ERROR).0, Level::ERROR);
        assert_eq!(severity_level(DXGI_INFO_QUEUE_MESSAGE_SEVERITY_WARNING).0, Level::WARN);
        assert_eq!(severity_level(DXGI_INFO_QUEUE_MESSAGE_SEVERITY_INFO), (Level::DEBUG, "INFO"));
        assert_eq!(severity_level(DXGI_INFO_QUEUE_MESSAGE_SEVERITY_MESSAGE), (Level::DEBUG, "MESSAGE"));
    }

    #[test]
    fn test_category_names() {
        assert_eq!(category_name(DXGI_INFO_QUEUE_MESSAGE_CATEGORY_STATE_CREATION), "State Creation");
        assert_eq!(category_name(DXGI_INFO_QUEUE_MESSAGE_CATEGORY_EXECUTION), "Execution");
        assert_eq!(category_name(DXGI_INFO_QUEUE_MESSAGE_CATEGORY_UNKNOWN), "Unknown");
    }
}
