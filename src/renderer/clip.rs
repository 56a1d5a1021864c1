//! 视口与裁剪栈
//!
//! 每帧一对后进先出的栈。压栈时把请求的区域与当前栈顶（栈为空时是整个渲染目标）
//! 求交，交集为空时返回 `None` 且栈不变，调用方可以据此跳过后续绘制。

use crate::gfx::{ScissorRect, Viewport};

/// 整数像素矩形，右/下为开区间
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PixelRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl PixelRect {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self { left, top, right, bottom }
    }

    /// 从原点开始、覆盖整个渲染目标的矩形
    pub fn from_size(width: u32, height: u32) -> Self {
        Self::new(0, 0, width.min(i32::MAX as u32) as i32, height.min(i32::MAX as u32) as i32)
    }

    /// 把浮点区域向外取整到整像素（左/上向下取整，右/下向上取整）
    pub fn snap_outward(left: f32, top: f32, width: f32, height: f32) -> Self {
        Self::new(
            left.floor() as i32,
            top.floor() as i32,
            (left + width).ceil() as i32,
            (top + height).ceil() as i32,
        )
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }

    /// 交集，为空时返回 `None`
    pub fn intersect(&self, other: &PixelRect) -> Option<PixelRect> {
        let rect = PixelRect::new(
            self.left.max(other.left),
            self.top.max(other.top),
            self.right.min(other.right),
            self.bottom.min(other.bottom),
        );
        (!rect.is_empty()).then_some(rect)
    }

    pub fn contains(&self, other: &PixelRect) -> bool {
        other.left >= self.left && other.top >= self.top && other.right <= self.right && other.bottom <= self.bottom
    }

    pub fn to_scissor(&self) -> ScissorRect {
        ScissorRect {
            left: self.left,
            top: self.top,
            right: self.right,
            bottom: self.bottom,
        }
    }

    pub fn to_viewport(&self) -> Viewport {
        Viewport {
            x: self.left as f32,
            y: self.top as f32,
            width: self.width() as f32,
            height: self.height() as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// 裁剪区域栈
#[derive(Debug, Clone)]
pub struct ClipStack {
    base: PixelRect,
    stack: Vec<PixelRect>,
}

impl ClipStack {
    /// # 参数
    ///
    /// * `base` - 栈为空时的有效区域，通常是整个渲染目标
    pub fn new(base: PixelRect) -> Self {
        Self { base, stack: Vec::new() }
    }

    pub fn base(&self) -> PixelRect {
        self.base
    }

    /// 当前有效区域
    pub fn current(&self) -> PixelRect {
        self.stack.last().copied().unwrap_or(self.base)
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// 压入与当前区域的交集
    ///
    /// # 返回值
    ///
    /// 交集非空时返回压入的区域；为空时返回 `None`，栈保持不变
    pub fn push(&mut self, requested: PixelRect) -> Option<PixelRect> {
        let clipped = self.current().intersect(&requested)?;
        self.stack.push(clipped);
        Some(clipped)
    }

    /// 弹出栈顶，返回恢复后的有效区域
    ///
    /// # Panics
    ///
    /// 栈为空时 panic，每个成功的 push 必须对应一个 pop
    pub fn pop(&mut self) -> PixelRect {
        if self.stack.pop().is_none() {
            panic!("pop on an empty clip stack");
        }
        self.current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_intersects_with_parent() {
        let mut stack = ClipStack::new(PixelRect::from_size(100, 80));

        assert_eq!(stack.push(PixelRect::new(-10, 10, 50, 200)), Some(PixelRect::new(0, 10, 50, 80)));
        assert_eq!(stack.push(PixelRect::new(20, 0, 90, 40)), Some(PixelRect::new(20, 10, 50, 40)));
        assert_eq!(stack.depth(), 2);

        assert_eq!(stack.pop(), PixelRect::new(0, 10, 50, 80));
        assert_eq!(stack.pop(), PixelRect::from_size(100, 80));
        assert!(stack.is_empty());
    }

    #[test]
    fn test_degenerate_push_leaves_stack_untouched() {
        let mut stack = ClipStack::new(PixelRect::from_size(100, 100));
        stack.push(PixelRect::new(10, 10, 60, 60));
        let before = stack.current();

        // 右 < 左
        assert_eq!(stack.push(PixelRect::new(10, 10, 5, 5)), None);
        // 完全在当前区域之外
        assert_eq!(stack.push(PixelRect::new(70, 70, 90, 90)), None);
        // 零宽
        assert_eq!(stack.push(PixelRect::new(20, 20, 20, 40)), None);

        assert_eq!(stack.depth(), 1);
        assert_eq!(stack.current(), before);
    }

    #[test]
    fn test_pushes_always_shrink() {
        let requests = [
            PixelRect::new(5, 5, 95, 95),
            PixelRect::new(-50, 30, 40, 300),
            PixelRect::new(10, -3, 12, 45),
            PixelRect::new(0, 0, 1000, 1000),
            PixelRect::new(11, 40, 12, 41),
        ];
        let mut stack = ClipStack::new(PixelRect::from_size(100, 100));
        for request in requests {
            let parent = stack.current();
            if let Some(rect) = stack.push(request) {
                assert!(parent.contains(&rect));
                assert!(rect.left >= 0 && rect.top >= 0);
            }
        }
        let depth = stack.depth();
        for _ in 0..depth {
            stack.pop();
        }
        assert_eq!(stack.current(), stack.base());
    }

    #[test]
    fn test_snap_outward() {
        assert_eq!(PixelRect::snap_outward(1.5, 2.2, 3.0, 0.5), PixelRect::new(1, 2, 5, 3));
        assert_eq!(PixelRect::snap_outward(-0.5, 0.0, 1.0, 1.0), PixelRect::new(-1, 0, 1, 1));
    }

    #[test]
    #[should_panic(expected = "empty clip stack")]
    fn test_pop_empty_panics() {
        ClipStack::new(PixelRect::from_size(10, 10)).pop();
    }
}
