// 该文件是 Kanjian （看见） 项目的一部分。
// src/postprocess.rs - 模型输出后处理与非极大值抑制
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

use ndarray::{ArrayD, ArrayView1, ArrayView2, Axis, Ix2};
use thiserror::Error;
use tracing::{debug, error};

use crate::geometry::BBox;

const BOX_VALUES: usize = 4;

#[derive(Error, Debug)]
pub enum PostprocessError {
  #[error("推理输出不匹配: {0}")]
  InferenceOutputMismatch(String),
}

impl PostprocessError {
  fn mismatch(msg: String) -> Self {
    error!("{}", msg);
    PostprocessError::InferenceOutputMismatch(msg)
  }
}

/// NMS 的类别策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NmsPolicy {
  /// 所有候选框一起抑制，不区分类别
  #[default]
  ClassAgnostic,
  /// 仅抑制同类别的候选框
  PerClass,
}

/// 通过置信度筛选的候选框，三个数组按锚点顺序对齐
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Candidates {
  pub boxes: Vec<BBox>,
  pub class_ids: Vec<usize>,
  pub scores: Vec<f32>,
}

impl Candidates {
  pub fn len(&self) -> usize {
    self.scores.len()
  }

  pub fn is_empty(&self) -> bool {
    self.scores.is_empty()
  }

  fn push(&mut self, bbox: BBox, class_id: usize, score: f32) {
    self.boxes.push(bbox);
    self.class_ids.push(class_id);
    self.scores.push(score);
  }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostprocessOutput {
  pub candidates: Candidates,
  /// NMS 保留的候选下标，按置信度降序
  pub keep: Vec<usize>,
  /// 分类张量的类别数
  pub num_classes: usize,
}

impl PostprocessOutput {
  /// 依次返回保留的 (边界框, 类别, 置信度)
  pub fn kept(&self) -> impl Iterator<Item = (BBox, usize, f32)> + '_ {
    self.keep.iter().map(|&i| {
      (
        self.candidates.boxes[i],
        self.candidates.class_ids[i],
        self.candidates.scores[i],
      )
    })
  }
}

fn as_rows<'a>(tensor: &'a ArrayD<f32>, name: &str) -> Result<ArrayView2<'a, f32>, PostprocessError> {
  let view = match tensor.ndim() {
    2 => tensor.view(),
    3 if tensor.shape()[0] == 1 => tensor.index_axis(Axis(0), 0),
    _ => {
      return Err(PostprocessError::mismatch(format!(
        "{} 张量形状不受支持: {:?}",
        name,
        tensor.shape()
      )));
    }
  };
  view
    .into_dimensionality::<Ix2>()
    .map_err(|e| PostprocessError::mismatch(format!("{} 张量: {}", name, e)))
}

/// 取出分类分数 `[N, C]` 与边界框 `[N, 4]`，首维为 1 的批次维会被去掉
pub fn split_outputs(
  outputs: &[ArrayD<f32>],
) -> Result<(ArrayView2<'_, f32>, ArrayView2<'_, f32>), PostprocessError> {
  let [scores, boxes, ..] = outputs else {
    return Err(PostprocessError::mismatch(format!(
      "期望至少 2 个输出张量, 实际 {}",
      outputs.len()
    )));
  };
  let scores = as_rows(scores, "分类")?;
  let boxes = as_rows(boxes, "回归")?;

  if boxes.ncols() != BOX_VALUES {
    return Err(PostprocessError::mismatch(format!(
      "边界框每行应有 {} 个值, 实际 {}",
      BOX_VALUES,
      boxes.ncols()
    )));
  }
  if scores.nrows() != boxes.nrows() {
    return Err(PostprocessError::mismatch(format!(
      "锚点数量不一致: 分类 {}, 回归 {}",
      scores.nrows(),
      boxes.nrows()
    )));
  }
  if scores.ncols() == 0 {
    return Err(PostprocessError::mismatch("分类张量没有类别".to_string()));
  }
  Ok((scores, boxes))
}

/// 返回 (最大分数, 类别)，并列时取下标最小者，NaN 被忽略
fn argmax(row: ArrayView1<'_, f32>) -> Option<(f32, usize)> {
  let mut best: Option<(f32, usize)> = None;
  for (class_id, &score) in row.iter().enumerate() {
    if score.is_nan() {
      continue;
    }
    if best.is_none_or(|(max, _)| score > max) {
      best = Some((score, class_id));
    }
  }
  best
}

/// 逐锚点取最大类别分数并按阈值筛选，分数等于阈值时保留
pub fn collect_candidates(
  scores: ArrayView2<'_, f32>,
  boxes: ArrayView2<'_, f32>,
  score_threshold: f32,
) -> Candidates {
  let mut candidates = Candidates::default();
  for (row_scores, row_box) in scores.rows().into_iter().zip(boxes.rows()) {
    let Some((score, class_id)) = argmax(row_scores) else {
      continue;
    };
    if score < score_threshold {
      continue;
    }
    let bbox = BBox::from_corners(row_box[0], row_box[1], row_box[2], row_box[3]);
    candidates.push(bbox, class_id, score);
  }
  candidates
}

/// 贪心非极大值抑制
///
/// 按置信度稳定降序排列（同分保持锚点顺序），依次保留当前最高分的候选，
/// 并丢弃与已保留框 IoU 大于 `iou_threshold` 的候选。
pub fn nms(candidates: &Candidates, iou_threshold: f32, policy: NmsPolicy) -> Vec<usize> {
  let mut order: Vec<usize> = (0..candidates.len()).collect();
  order.sort_by(|&a, &b| candidates.scores[b].total_cmp(&candidates.scores[a]));

  let mut keep: Vec<usize> = Vec::new();
  for idx in order {
    let suppressed = keep.iter().any(|&kept| {
      let comparable = match policy {
        NmsPolicy::ClassAgnostic => true,
        NmsPolicy::PerClass => candidates.class_ids[kept] == candidates.class_ids[idx],
      };
      comparable && candidates.boxes[kept].iou(&candidates.boxes[idx]) > iou_threshold
    });
    if !suppressed {
      keep.push(idx);
    }
  }
  keep
}

/// 将模型原始输出转换为经过抑制的检测集合
pub fn postprocess(
  outputs: &[ArrayD<f32>],
  score_threshold: f32,
  iou_threshold: f32,
  policy: NmsPolicy,
) -> Result<PostprocessOutput, PostprocessError> {
  debug!("后处理模型输出");
  let (scores, boxes) = split_outputs(outputs)?;
  let num_classes = scores.ncols();
  let candidates = collect_candidates(scores, boxes, score_threshold);
  let keep = nms(&candidates, iou_threshold, policy);
  debug!(
    "锚点 {} 个, 候选 {} 个, 抑制后保留 {} 个",
    scores.nrows(),
    candidates.len(),
    keep.len()
  );
  Ok(PostprocessOutput {
    candidates,
    keep,
    num_classes,
  })
}
