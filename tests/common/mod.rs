// 该文件是 Kanjian （看见） 项目的一部分。
// tests/common/mod.rs - 测试用推理引擎
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

#![allow(dead_code)]

use std::{io::Write, path::Path, sync::Mutex};

use kanjian::{LoadModel, LoadOptions, Model};
use ndarray::{Array4, ArrayD, IxDyn};
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScriptedError {
  #[error("模型文件不存在: {0}")]
  Missing(String),
  #[error("推理失败")]
  Failed,
}

/// 按脚本返回原始输出的推理引擎，记录最后一次输入
#[derive(Debug)]
pub struct ScriptedModel {
  outputs: Option<Vec<ArrayD<f32>>>,
  last_input: Mutex<Option<Array4<f32>>>,
}

impl ScriptedModel {
  /// 每个锚点一行分数与一个 [x1, y1, x2, y2] 边界框
  pub fn anchors(scores: &[&[f32]], boxes: &[[f32; 4]]) -> Self {
    let classes = scores.first().map_or(1, |row| row.len());
    let flat: Vec<f32> = scores.iter().flat_map(|row| row.iter().copied()).collect();
    let scores = ArrayD::from_shape_vec(IxDyn(&[1, scores.len(), classes]), flat).unwrap();
    let flat: Vec<f32> = boxes.iter().flat_map(|b| b.iter().copied()).collect();
    let boxes = ArrayD::from_shape_vec(IxDyn(&[1, boxes.len(), 4]), flat).unwrap();
    Self::raw(vec![scores, boxes])
  }

  pub fn raw(outputs: Vec<ArrayD<f32>>) -> Self {
    Self {
      outputs: Some(outputs),
      last_input: Mutex::new(None),
    }
  }

  pub fn failing() -> Self {
    Self {
      outputs: None,
      last_input: Mutex::new(None),
    }
  }

  pub fn last_input(&self) -> Option<Array4<f32>> {
    self.last_input.lock().unwrap().clone()
  }
}

impl Model for ScriptedModel {
  type Error = ScriptedError;

  fn infer(&self, input: &Array4<f32>) -> Result<Vec<ArrayD<f32>>, Self::Error> {
    *self.last_input.lock().unwrap() = Some(input.clone());
    self.outputs.clone().ok_or(ScriptedError::Failed)
  }
}

impl LoadModel for ScriptedModel {
  fn load(path: &Path, _: &LoadOptions) -> Result<Self, Self::Error> {
    if !path.exists() {
      return Err(ScriptedError::Missing(path.display().to_string()));
    }
    Ok(Self::anchors(&[], &[]))
  }
}

/// 将描述文件写入临时文件
pub fn descriptor_file(lines: &[&str]) -> NamedTempFile {
  let mut file = NamedTempFile::new().unwrap();
  for line in lines {
    writeln!(file, "{}", line).unwrap();
  }
  file.flush().unwrap();
  file
}
