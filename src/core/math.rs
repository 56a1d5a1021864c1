//! 数学类型
//!
//! 基于 `nalgebra`，只保留渲染后端需要的部分：根常量使用的向量和矩阵，
//! 以及像素空间的正交投影。

pub use nalgebra::{Matrix4 as Mat4, Vector3 as Vec3, Vector4 as Vec4};

pub type Vector3 = Vec3<f32>;
pub type Vector4 = Vec4<f32>;
pub type Matrix4 = Mat4<f32>;

/// 颜色类型（RGBA，范围 0.0-1.0）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    /// 完全透明，后缓冲的清屏颜色
    pub const TRANSPARENT: Color = Color { r: 0.0, g: 0.0, b: 0.0, a: 0.0 };

    pub fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// 从 0xRRGGBBAA 创建颜色
    pub fn from_rgba_u32(rgba: u32) -> Self {
        let [r, g, b, a] = rgba.to_be_bytes();
        Self::new(r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0, a as f32 / 255.0)
    }

    pub fn to_array(&self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

/// 像素空间正交投影
///
/// 原点在左上角，y 轴向下，`(0, 0)` 映射到 NDC `(-1, 1)`，
/// `(width, height)` 映射到 `(1, -1)`。
pub fn ortho_projection(width: u32, height: u32) -> Matrix4 {
    let w = width.max(1) as f32;
    let h = height.max(1) as f32;
    Matrix4::new_orthographic(0.0, w, h, 0.0, 0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;

    #[test]
    fn test_ortho_maps_pixel_corners() {
        let proj = ortho_projection(800, 600);

        let top_left = proj.transform_point(&Point3::new(0.0, 0.0, 0.0));
        assert!((top_left.x + 1.0).abs() < 1e-6);
        assert!((top_left.y - 1.0).abs() < 1e-6);

        let bottom_right = proj.transform_point(&Point3::new(800.0, 600.0, 0.0));
        assert!((bottom_right.x - 1.0).abs() < 1e-6);
        assert!((bottom_right.y + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_color_from_u32() {
        let c = Color::from_rgba_u32(0xFF0080FF);
        assert_eq!(c.r, 1.0);
        assert_eq!(c.g, 0.0);
        assert!((c.b - 128.0 / 255.0).abs() < 1e-6);
        assert_eq!(c.a, 1.0);
    }
}
