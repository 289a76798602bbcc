// 该文件是 Kanjian （看见） 项目的一部分。
// src/preprocess.rs - 图像预处理
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

use image::{
  ImageBuffer, Rgb, RgbImage,
  imageops::{self, FilterType},
};
use ndarray::Array4;
use thiserror::Error;
use tracing::debug;

use crate::{
  config::{DetectorConfig, PaddingMode},
  geometry::GeometryInfo,
};

const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug)]
pub enum PreprocessError {
  #[error("输入图像为空: {width}x{height}")]
  EmptyImage { width: u32, height: u32 },
  #[error("几何尺寸不匹配: {0}")]
  GeometryMismatch(String),
}

/// 模型期望的输入通道顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelOrder {
  #[default]
  Rgb,
  Bgr,
}

impl ChannelOrder {
  /// 张量第 `channel` 个通道对应的 RGB 源通道
  fn source_channel(self, channel: usize) -> usize {
    match self {
      ChannelOrder::Rgb => channel,
      ChannelOrder::Bgr => RGB_CHANNELS - 1 - channel,
    }
  }
}

/// 预处理结果，NCHW 张量与逆变换所需的几何信息
#[derive(Debug, Clone)]
pub struct Preprocessed {
  pub tensor: Array4<f32>,
  pub geometry: GeometryInfo,
}

fn resized_dimensions(
  (src_w, src_h): (u32, u32),
  (dst_w, dst_h): (u32, u32),
  preserve_aspect_ratio: bool,
) -> (u32, u32) {
  if !preserve_aspect_ratio {
    return (dst_w, dst_h);
  }
  let scale = (dst_w as f64 / src_w as f64).min(dst_h as f64 / src_h as f64);
  let width = ((src_w as f64 * scale).round() as u32).max(1);
  let height = ((src_h as f64 * scale).round() as u32).max(1);
  (width, height)
}

fn resize(image: &RgbImage, width: u32, height: u32) -> RgbImage {
  if image.dimensions() == (width, height) {
    return image.clone();
  }
  imageops::resize(image, width, height, FilterType::Triangle)
}

fn remaining(target: u32, resized: u32, axis: &str) -> Result<u32, PreprocessError> {
  target.checked_sub(resized).ok_or_else(|| {
    PreprocessError::GeometryMismatch(format!(
      "{} 方向填充量为负: 目标 {}, 缩放后 {}",
      axis, target, resized
    ))
  })
}

/// 填充到模型输入尺寸，返回画布与左、上偏移
fn pad(
  resized: RgbImage,
  (dst_w, dst_h): (u32, u32),
  mode: PaddingMode,
) -> Result<(RgbImage, u32, u32), PreprocessError> {
  let (width, height) = resized.dimensions();
  let (value, center) = match mode {
    PaddingMode::None => {
      if (width, height) != (dst_w, dst_h) {
        return Err(PreprocessError::GeometryMismatch(format!(
          "未配置填充, 缩放后尺寸 {}x{} 与模型输入 {}x{} 不一致",
          width, height, dst_w, dst_h
        )));
      }
      return Ok((resized, 0, 0));
    }
    PaddingMode::BottomRight(value) => (value, false),
    PaddingMode::Center(value) => (value, true),
  };

  let pad_w = remaining(dst_w, width, "水平")?;
  let pad_h = remaining(dst_h, height, "垂直")?;
  let (left, top) = if center {
    (pad_w / 2, pad_h / 2)
  } else {
    (0, 0)
  };

  let mut canvas: RgbImage = ImageBuffer::from_pixel(dst_w, dst_h, Rgb([value; RGB_CHANNELS]));
  imageops::replace(&mut canvas, &resized, left as i64, top as i64);
  Ok((canvas, left, top))
}

/// 将任意尺寸的图像转换为模型输入张量
///
/// 步骤依次为：缩放、填充、归一化、标准化、打包为 NCHW。
pub fn preprocess(
  image: &RgbImage,
  config: &DetectorConfig,
  order: ChannelOrder,
) -> Result<Preprocessed, PreprocessError> {
  let (src_w, src_h) = image.dimensions();
  if src_w == 0 || src_h == 0 {
    return Err(PreprocessError::EmptyImage {
      width: src_w,
      height: src_h,
    });
  }
  let target = (config.input_width, config.input_height);

  let (resized_w, resized_h) =
    resized_dimensions((src_w, src_h), target, config.preserve_aspect_ratio);
  let resized = resize(image, resized_w, resized_h);
  let (canvas, pad_left, pad_top) = pad(resized, target, config.padding_mode())?;

  debug!(
    "预处理: {}x{} -> {}x{}, 填充偏移 ({}, {})",
    src_w, src_h, resized_w, resized_h, pad_left, pad_top
  );

  let normalization = config.normalization;
  let divisor = config.standardize_divisor;
  let (width, height) = (target.0 as usize, target.1 as usize);
  let tensor = Array4::from_shape_fn((1, RGB_CHANNELS, height, width), |(_, c, y, x)| {
    let channel = order.source_channel(c);
    let mut value = canvas.get_pixel(x as u32, y as u32)[channel] as f32;
    if let Some(norm) = &normalization {
      value = norm.apply(channel, value);
    }
    if let Some(divisor) = divisor {
      value /= divisor;
    }
    value
  });

  Ok(Preprocessed {
    tensor,
    geometry: GeometryInfo::new((src_w, src_h), (resized_w, resized_h), pad_left, pad_top),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::Normalization;

  fn config(descriptor: &str) -> DetectorConfig {
    descriptor.parse().unwrap()
  }

  fn solid(width: u32, height: u32, rgb: [u8; 3]) -> RgbImage {
    ImageBuffer::from_pixel(width, height, Rgb(rgb))
  }

  #[test]
  fn letterbox_centers_resized_image() {
    let cfg = config("0.45\n0.5\n640\n640\nn\nt\nn\n114\nn");
    let out = preprocess(&solid(1280, 720, [10, 20, 30]), &cfg, ChannelOrder::Rgb).unwrap();

    assert_eq!(out.tensor.shape(), &[1, 3, 640, 640]);
    assert_eq!((out.geometry.resized_width, out.geometry.resized_height), (640, 360));
    assert_eq!((out.geometry.pad_left, out.geometry.pad_top), (0, 140));
    assert_eq!(out.geometry.scale_x, 0.5);
    assert_eq!(out.geometry.scale_y, 0.5);

    // 填充区域
    assert_eq!(out.tensor[[0, 0, 0, 0]], 114.0);
    assert_eq!(out.tensor[[0, 2, 139, 320]], 114.0);
    assert_eq!(out.tensor[[0, 1, 500, 320]], 114.0);
    // 图像区域
    assert_eq!(out.tensor[[0, 0, 140, 0]], 10.0);
    assert_eq!(out.tensor[[0, 1, 320, 320]], 20.0);
    assert_eq!(out.tensor[[0, 2, 499, 639]], 30.0);
  }

  #[test]
  fn center_padding_puts_odd_remainder_right_and_bottom() {
    let cfg = config("0.45\n0.5\n8\n8\nn\nt\nn\n0\nn");
    let out = preprocess(&solid(8, 3, [200, 200, 200]), &cfg, ChannelOrder::Rgb).unwrap();
    assert_eq!((out.geometry.pad_left, out.geometry.pad_top), (0, 2));
    assert_eq!(out.tensor[[0, 0, 1, 0]], 0.0);
    assert_eq!(out.tensor[[0, 0, 2, 0]], 200.0);
    assert_eq!(out.tensor[[0, 0, 4, 0]], 200.0);
    assert_eq!(out.tensor[[0, 0, 5, 0]], 0.0);
  }

  #[test]
  fn border_padding_fills_bottom_right() {
    let cfg = config("0.45\n0.5\n64\n64\nn\nt\n7\nn\nn");
    let out = preprocess(&solid(32, 64, [50, 60, 70]), &cfg, ChannelOrder::Rgb).unwrap();
    assert_eq!((out.geometry.pad_left, out.geometry.pad_top), (0, 0));
    assert_eq!(out.tensor[[0, 0, 10, 31]], 50.0);
    assert_eq!(out.tensor[[0, 0, 10, 32]], 7.0);
    assert_eq!(out.tensor[[0, 2, 63, 63]], 7.0);
  }

  #[test]
  fn stretch_ignores_aspect_and_padding() {
    let cfg = config("0.45\n0.5\n64\n64\nn\nn\n7\n9\nn");
    let out = preprocess(&solid(128, 32, [1, 2, 3]), &cfg, ChannelOrder::Rgb).unwrap();
    assert_eq!((out.geometry.resized_width, out.geometry.resized_height), (64, 64));
    assert_eq!((out.geometry.pad_left, out.geometry.pad_top), (0, 0));
    assert_eq!(out.geometry.scale_x, 0.5);
    assert_eq!(out.geometry.scale_y, 2.0);
    assert!(out.tensor.iter().all(|v| [1.0, 2.0, 3.0].contains(v)));
  }

  #[test]
  fn identity_when_everything_disabled() {
    let cfg = config("0.45\n0.5\n4\n4\nn\nt\nn\nn\nn");
    let image = ImageBuffer::from_fn(4, 4, |x, y| Rgb([(x * 10) as u8, (y * 10) as u8, 255]));
    let out = preprocess(&image, &cfg, ChannelOrder::Rgb).unwrap();
    for y in 0..4 {
      for x in 0..4 {
        let pixel = image.get_pixel(x, y);
        for c in 0..3 {
          assert_eq!(out.tensor[[0, c, y as usize, x as usize]], pixel[c] as f32);
        }
      }
    }
  }

  #[test]
  fn normalization_runs_before_standardization() {
    let mut cfg = config("0.45\n0.5\n2\n2\n5\nn\nn\nn\nn");
    cfg.normalization = Some(Normalization {
      scale: [2.0, 4.0, 1.0],
      mean: [10.0, 20.0, 30.0],
    });
    let out = preprocess(&solid(2, 2, [110, 100, 80]), &cfg, ChannelOrder::Rgb).unwrap();
    assert_eq!(out.tensor[[0, 0, 0, 0]], 10.0);
    assert_eq!(out.tensor[[0, 1, 0, 0]], 4.0);
    assert_eq!(out.tensor[[0, 2, 0, 0]], 10.0);
  }

  #[test]
  fn bgr_order_swaps_channels() {
    let cfg = config("0.45\n0.5\n2\n2\nn\nn\nn\nn\nn");
    let out = preprocess(&solid(2, 2, [1, 2, 3]), &cfg, ChannelOrder::Bgr).unwrap();
    assert_eq!(out.tensor[[0, 0, 0, 0]], 3.0);
    assert_eq!(out.tensor[[0, 1, 0, 0]], 2.0);
    assert_eq!(out.tensor[[0, 2, 0, 0]], 1.0);
  }

  #[test]
  fn missing_padding_for_letterbox_is_geometry_mismatch() {
    let cfg = config("0.45\n0.5\n64\n64\nn\nt\nn\nn\nn");
    let err = preprocess(&solid(128, 32, [0, 0, 0]), &cfg, ChannelOrder::Rgb).unwrap_err();
    assert!(matches!(err, PreprocessError::GeometryMismatch(_)));
  }

  #[test]
  fn negative_padding_is_geometry_mismatch() {
    let err = pad(solid(70, 60, [0, 0, 0]), (64, 64), PaddingMode::Center(114)).unwrap_err();
    assert!(matches!(err, PreprocessError::GeometryMismatch(_)));
    let err = pad(solid(60, 70, [0, 0, 0]), (64, 64), PaddingMode::BottomRight(0)).unwrap_err();
    assert!(matches!(err, PreprocessError::GeometryMismatch(_)));
  }

  #[test]
  fn empty_image_is_rejected() {
    let cfg = config("0.45\n0.5\n4\n4\nn\nn\nn\nn\nn");
    let err = preprocess(&RgbImage::new(0, 3), &cfg, ChannelOrder::Rgb).unwrap_err();
    assert!(matches!(err, PreprocessError::EmptyImage { .. }));
  }
}
