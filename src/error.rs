// 该文件是 Kanjian （看见） 项目的一部分。
// src/error.rs - 检测器错误定义
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

use thiserror::Error;

use crate::{config::ConfigError, postprocess::PostprocessError, preprocess::PreprocessError};

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// 构造与推理过程中的全部错误，均同步返回给调用方，不做自动重试
#[derive(Error, Debug)]
pub enum DetectorError {
  #[error("模型加载错误: {0}")]
  ModelLoad(#[source] BoxError),
  #[error("配置错误: {0}")]
  Config(#[from] ConfigError),
  #[error("预处理错误: {0}")]
  Preprocess(#[from] PreprocessError),
  #[error("后处理错误: {0}")]
  Postprocess(#[from] PostprocessError),
  #[error("推理错误: {0}")]
  Inference(#[source] BoxError),
}

impl DetectorError {
  pub fn model_load<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
    DetectorError::ModelLoad(Box::new(err))
  }

  pub fn inference<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
    DetectorError::Inference(Box::new(err))
  }
}
