// 该文件是 Kanjian （看见） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut},
  rect::Rect,
};

use crate::{detector::Detection, output::Canvas};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_TEXT_HEIGHT: i32 = 20;
const LABEL_CHAR_WIDTH: f32 = 9.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const BOX_THICKNESS: i32 = 2;
const PALETTE_SIZE: usize = 80;
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// 基于 `RgbImage` 的画布
pub struct ImageCanvas<'a> {
  image: &'a mut RgbImage,
  font: &'a FontArc,
  scale: PxScale,
}

impl<'a> ImageCanvas<'a> {
  pub fn new(image: &'a mut RgbImage, font: &'a FontArc, font_size: f32) -> Self {
    Self {
      image,
      font,
      scale: PxScale::from(font_size),
    }
  }
}

impl Canvas for ImageCanvas<'_> {
  fn width(&self) -> u32 {
    self.image.width()
  }

  fn height(&self) -> u32 {
    self.image.height()
  }

  fn draw_rect_outline(&mut self, x: i32, y: i32, width: u32, height: u32, color: Rgb<u8>) {
    if width == 0 || height == 0 {
      return;
    }
    draw_hollow_rect_mut(&mut *self.image, Rect::at(x, y).of_size(width, height), color);
  }

  fn fill_rect(&mut self, x: i32, y: i32, width: u32, height: u32, color: Rgb<u8>) {
    if width == 0 || height == 0 {
      return;
    }
    draw_filled_rect_mut(&mut *self.image, Rect::at(x, y).of_size(width, height), color);
  }

  fn draw_text(&mut self, x: i32, y: i32, text: &str, color: Rgb<u8>) {
    draw_text_mut(&mut *self.image, color, x, y, self.scale, self.font, text);
  }
}

/// 在原图上绘制检测框与 "标签 置信度" 文本
#[derive(Debug)]
pub struct Painter {
  font: FontArc,
  font_size: f32,
  label_text_height: i32,
  label_char_width: f32,
  label_text_vertical_padding: i32,
  colors: Vec<Rgb<u8>>,
}

impl Default for Painter {
  fn default() -> Self {
    let font_data = include_bytes!("../../assets/DejaVuSans.ttf");
    let font = FontArc::try_from_slice(font_data).expect("无法加载嵌入的字体文件");

    // 每个类别一种颜色
    let colors = (0..PALETTE_SIZE)
      .map(|i| {
        let hue = (i as f32 / PALETTE_SIZE as f32) * 360.0;
        hsv_to_rgb(hue, 0.8, 0.9)
      })
      .collect();

    Self {
      font,
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
      colors,
    }
  }
}

/// HSV 转 RGB
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = if h < 60.0 {
    (c, x, 0.0)
  } else if h < 120.0 {
    (x, c, 0.0)
  } else if h < 180.0 {
    (0.0, c, x)
  } else if h < 240.0 {
    (0.0, x, c)
  } else if h < 300.0 {
    (x, 0.0, c)
  } else {
    (c, 0.0, x)
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}

impl Painter {
  pub fn color_for(&self, class_id: usize) -> Rgb<u8> {
    self.colors[class_id % self.colors.len()]
  }

  /// 以嵌入字体包装一张图像
  pub fn canvas<'a>(&'a self, image: &'a mut RgbImage) -> ImageCanvas<'a> {
    ImageCanvas::new(image, &self.font, self.font_size)
  }

  /// 绘制单个检测结果
  pub fn paint<C: Canvas>(&self, canvas: &mut C, detection: &Detection) {
    if detection.width <= 0 || detection.height <= 0 {
      return;
    }
    // 裁剪到画布外扩一个边框宽度的范围，超出部分本就不可见
    let margin = BOX_THICKNESS as i64;
    let (max_x, max_y) = (canvas.width() as i64 + margin, canvas.height() as i64 + margin);
    let left = (detection.x as i64).clamp(-margin, max_x);
    let top = (detection.y as i64).clamp(-margin, max_y);
    let right = (detection.x as i64 + detection.width as i64).clamp(-margin, max_x);
    let bottom = (detection.y as i64 + detection.height as i64).clamp(-margin, max_y);
    if right <= left || bottom <= top {
      return;
    }

    let color = self.color_for(detection.class_id);
    let (x, y) = (left as i32, top as i32);
    let (w, h) = ((right - left) as u32, (bottom - top) as u32);

    // 边框加粗
    for t in 0..BOX_THICKNESS {
      let shrink = 2 * t as u32;
      if w <= shrink || h <= shrink {
        break;
      }
      canvas.draw_rect_outline(x + t, y + t, w - shrink, h - shrink, color);
    }

    // 标签背景位于边框上方，贴着图像上沿时压在框内
    let label = format!("{} {:.2}", detection.label, detection.score);
    let text_width = (label.chars().count() as f32 * self.label_char_width) as u32;
    let label_x = x.max(0);
    let label_y = (y - self.label_text_height).max(0);

    let max_width = (canvas.width() as i64 - label_x as i64).max(0) as u32;
    let label_width = text_width.min(max_width);
    if label_width == 0 || label_y >= canvas.height() as i32 {
      return;
    }

    canvas.fill_rect(
      label_x,
      label_y,
      label_width,
      self.label_text_height as u32,
      color,
    );
    canvas.draw_text(
      label_x,
      label_y + self.label_text_vertical_padding,
      &label,
      TEXT_COLOR,
    );
  }

  /// 绘制全部检测结果
  pub fn paint_all(&self, image: &mut RgbImage, detections: &[Detection]) {
    let mut canvas = self.canvas(image);
    for detection in detections {
      self.paint(&mut canvas, detection);
    }
  }
}
