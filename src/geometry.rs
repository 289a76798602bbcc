// 该文件是 Kanjian （看见） 项目的一部分。
// src/geometry.rs - 边界框与坐标映射
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

/// 边界框，左上角坐标与宽高
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BBox {
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
}

impl BBox {
  pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
    Self {
      x,
      y,
      width,
      height,
    }
  }

  /// 由 [x_min, y_min, x_max, y_max] 构造
  pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
    Self::new(x1, y1, x2 - x1, y2 - y1)
  }

  pub fn right(&self) -> f32 {
    self.x + self.width
  }

  pub fn bottom(&self) -> f32 {
    self.y + self.height
  }

  pub fn area(&self) -> f32 {
    self.width.max(0.0) * self.height.max(0.0)
  }

  /// 计算两个边界框的 IoU
  pub fn iou(&self, other: &BBox) -> f32 {
    let x1 = self.x.max(other.x);
    let y1 = self.y.max(other.y);
    let x2 = self.right().min(other.right());
    let y2 = self.bottom().min(other.bottom());

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = self.area() + other.area() - intersection;

    if union > 0.0 {
      intersection / union
    } else {
      0.0
    }
  }
}

/// 预处理实际采用的几何变换：先缩放，再在左上方偏移填充
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryInfo {
  pub original_width: u32,
  pub original_height: u32,
  pub resized_width: u32,
  pub resized_height: u32,
  pub scale_x: f32,
  pub scale_y: f32,
  pub pad_left: u32,
  pub pad_top: u32,
}

impl GeometryInfo {
  pub fn new(original: (u32, u32), resized: (u32, u32), pad_left: u32, pad_top: u32) -> Self {
    Self {
      original_width: original.0,
      original_height: original.1,
      resized_width: resized.0,
      resized_height: resized.1,
      scale_x: resized.0 as f32 / original.0 as f32,
      scale_y: resized.1 as f32 / original.1 as f32,
      pad_left,
      pad_top,
    }
  }

  /// 模型输入空间 -> 原图像素空间：先去掉填充偏移，再除以缩放比例
  pub fn to_original(&self, bbox: &BBox) -> BBox {
    BBox {
      x: (bbox.x - self.pad_left as f32) / self.scale_x,
      y: (bbox.y - self.pad_top as f32) / self.scale_y,
      width: bbox.width / self.scale_x,
      height: bbox.height / self.scale_y,
    }
  }

  /// 原图像素空间 -> 模型输入空间
  pub fn to_tensor(&self, bbox: &BBox) -> BBox {
    BBox {
      x: bbox.x * self.scale_x + self.pad_left as f32,
      y: bbox.y * self.scale_y + self.pad_top as f32,
      width: bbox.width * self.scale_x,
      height: bbox.height * self.scale_y,
    }
  }
}
