// 该文件是 Kanjian （看见） 项目的一部分。
// src/output.rs - 输出定义
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

use image::Rgb;

/// 绘图原语，超出画布的部分静默裁剪
pub trait Canvas {
  fn width(&self) -> u32;
  fn height(&self) -> u32;
  fn draw_rect_outline(&mut self, x: i32, y: i32, width: u32, height: u32, color: Rgb<u8>);
  fn fill_rect(&mut self, x: i32, y: i32, width: u32, height: u32, color: Rgb<u8>);
  fn draw_text(&mut self, x: i32, y: i32, text: &str, color: Rgb<u8>);
}

pub mod draw;

pub use self::draw::{ImageCanvas, Painter};
