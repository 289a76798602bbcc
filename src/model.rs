// 该文件是 Kanjian （看见） 项目的一部分。
// src/model.rs - 推理引擎接口
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

use std::path::Path;

use ndarray::{Array4, ArrayD};

/// 推理引擎
///
/// 输入为 NCHW 的 `[1, 3, H, W]` 张量；输出中第 0 个为分类分数 `[1, N, C]`，
/// 第 1 个为边界框 `[1, N, 4]`（输入像素坐标系下的 x1, y1, x2, y2）。
pub trait Model {
  type Error;

  fn infer(&self, input: &Array4<f32>) -> Result<Vec<ArrayD<f32>>, Self::Error>;
}

/// 可从模型文件加载的推理引擎
pub trait LoadModel: Model + Sized {
  fn load(path: &Path, options: &LoadOptions) -> Result<Self, Self::Error>;
}

/// 后端偏好
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
  #[default]
  Cpu,
  Accelerated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
  pub backend: Backend,
  pub input_width: u32,
  pub input_height: u32,
}

#[cfg(feature = "backend-tract")]
mod tract;
#[cfg(feature = "backend-tract")]
pub use self::tract::{TractModel, TractModelError};
