// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/tract.rs - 基于 tract 的 ONNX 推理后端
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

use ndarray::{Array4, ArrayD, IxDyn};
use thiserror::Error;
use tracing::{debug, info, warn};
use tract_onnx::prelude::*;

use crate::model::{Backend, LoadModel, LoadOptions, Model};

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, TypedModel>;

#[derive(Error, Debug)]
pub enum TractModelError {
  #[error("模型加载错误: {0}")]
  Load(TractError),
  #[error("推理错误: {0}")]
  Run(TractError),
  #[error("输出张量无效: {0}")]
  Output(String),
}

/// tract 只在 CPU 上执行
pub struct TractModel {
  plan: Plan,
}

impl LoadModel for TractModel {
  fn load(path: &Path, options: &LoadOptions) -> Result<Self, Self::Error> {
    if options.backend == Backend::Accelerated {
      warn!("tract 后端不支持加速设备, 回退到 CPU 推理");
    }

    info!("加载模型文件: {}", path.display());
    let plan = tract_onnx::onnx()
      .model_for_path(path)
      .map_err(TractModelError::Load)?
      .with_input_fact(
        0,
        InferenceFact::dt_shape(
          f32::datum_type(),
          tvec!(
            1,
            3,
            options.input_height as usize,
            options.input_width as usize
          ),
        ),
      )
      .map_err(TractModelError::Load)?
      .into_optimized()
      .map_err(TractModelError::Load)?
      .into_runnable()
      .map_err(TractModelError::Load)?;
    info!("模型加载完成");

    Ok(TractModel { plan })
  }
}

impl Model for TractModel {
  type Error = TractModelError;

  fn infer(&self, input: &Array4<f32>) -> Result<Vec<ArrayD<f32>>, Self::Error> {
    debug!("设置模型输入: {:?}", input.shape());
    let data: Vec<f32> = input.iter().copied().collect();
    let tensor = Tensor::from_shape(input.shape(), &data).map_err(TractModelError::Run)?;

    debug!("执行模型推理");
    let outputs = self
      .plan
      .run(tvec!(tensor.into()))
      .map_err(TractModelError::Run)?;

    outputs
      .iter()
      .enumerate()
      .map(|(idx, output)| {
        let shape = output.shape().to_vec();
        let values = output
          .as_slice::<f32>()
          .map_err(|e| TractModelError::Output(format!("第 {} 个输出不是 f32: {}", idx, e)))?;
        debug!("第 {} 个输出形状: {:?}", idx, shape);
        ArrayD::from_shape_vec(IxDyn(&shape), values.to_vec())
          .map_err(|e| TractModelError::Output(format!("第 {} 个输出: {}", idx, e)))
      })
      .collect()
  }
}
