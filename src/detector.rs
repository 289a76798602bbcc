// 该文件是 Kanjian （看见） 项目的一部分。
// src/detector.rs - 目标检测器
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

use std::path::PathBuf;

use image::RgbImage;
use ndarray::Array4;
use tracing::{debug, info, warn};

use crate::{
  config::{DetectorConfig, validate_score_threshold},
  error::DetectorError,
  model::{Backend, LoadModel, LoadOptions, Model},
  output::Painter,
  postprocess::{NmsPolicy, PostprocessError, postprocess},
  preprocess::{ChannelOrder, preprocess},
};

/// COCO 数据集类别名称
pub const COCO_LABELS: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

/// 检测结果，坐标位于原图像素空间，可能超出图像边界
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
  /// 边界框左上角 x 坐标
  pub x: i32,
  /// 边界框左上角 y 坐标
  pub y: i32,
  /// 边界框宽度
  pub width: i32,
  /// 边界框高度
  pub height: i32,
  /// 置信度
  pub score: f32,
  /// 类别索引
  pub class_id: usize,
  /// 类别名称
  pub label: String,
}

/// 检测器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
  /// 模型与配置已加载，尚未推理
  Constructed,
  /// 已完成预热推理
  Ready,
}

/// 目标检测器
///
/// 构造完成后模型、配置与类别表均只读，`detect` 只使用调用内的临时缓冲，
/// 因此同一实例可以在多个线程中并发调用。
#[derive(Debug)]
pub struct Detector<M> {
  model: M,
  config: DetectorConfig,
  labels: Box<[String]>,
  nms_policy: NmsPolicy,
  channel_order: ChannelOrder,
  painter: Painter,
  state: DetectorState,
}

impl<M> Detector<M>
where
  M: Model,
  M::Error: std::error::Error + Send + Sync + 'static,
{
  /// 由已加载的推理引擎直接组装
  pub fn from_parts<S: Into<String>>(
    model: M,
    config: DetectorConfig,
    labels: impl IntoIterator<Item = S>,
  ) -> Self {
    let labels: Box<[String]> = labels.into_iter().map(Into::into).collect();
    debug!("检测器类别数: {}", labels.len());
    Self {
      model,
      config,
      labels,
      nms_policy: NmsPolicy::default(),
      channel_order: ChannelOrder::default(),
      painter: Painter::default(),
      state: DetectorState::Constructed,
    }
  }

  pub fn with_nms_policy(mut self, policy: NmsPolicy) -> Self {
    self.nms_policy = policy;
    self
  }

  pub fn with_channel_order(mut self, order: ChannelOrder) -> Self {
    self.channel_order = order;
    self
  }

  pub fn model(&self) -> &M {
    &self.model
  }

  pub fn config(&self) -> &DetectorConfig {
    &self.config
  }

  pub fn labels(&self) -> &[String] {
    &self.labels
  }

  pub fn state(&self) -> DetectorState {
    self.state
  }

  /// 以全零张量执行一次推理
  pub fn warm_up(&mut self) -> Result<(), DetectorError> {
    info!("模型预热");
    let input = Array4::<f32>::zeros((
      1,
      3,
      self.config.input_height as usize,
      self.config.input_width as usize,
    ));
    self.model.infer(&input).map_err(DetectorError::inference)?;
    self.state = DetectorState::Ready;
    info!("模型预热完成");
    Ok(())
  }

  /// 检测图像中的目标，不修改图像
  ///
  /// `score_threshold` 仅对本次调用生效，为 `None` 时使用配置中的默认值，
  /// 超出 [0, 1] 时返回配置错误。
  pub fn detect(
    &self,
    image: &RgbImage,
    score_threshold: Option<f32>,
  ) -> Result<Vec<Detection>, DetectorError> {
    let score_threshold = match score_threshold {
      Some(score_threshold) => validate_score_threshold(score_threshold)?,
      None => self.config.score_threshold,
    };

    let input = preprocess(image, &self.config, self.channel_order)?;
    debug!(
      "预处理完成: {}x{} -> {}x{}",
      input.geometry.original_width,
      input.geometry.original_height,
      input.geometry.resized_width,
      input.geometry.resized_height
    );

    let outputs = self
      .model
      .infer(&input.tensor)
      .map_err(DetectorError::inference)?;
    debug!("推理完成, 输出张量 {} 个", outputs.len());

    let output = postprocess(
      &outputs,
      score_threshold,
      self.config.iou_threshold,
      self.nms_policy,
    )?;
    if output.num_classes > self.labels.len() {
      return Err(
        PostprocessError::InferenceOutputMismatch(format!(
          "模型输出 {} 个类别, 类别表只有 {} 项",
          output.num_classes,
          self.labels.len()
        ))
        .into(),
      );
    }

    let detections: Vec<Detection> = output
      .kept()
      .map(|(bbox, class_id, score)| {
        let bbox = input.geometry.to_original(&bbox);
        Detection {
          x: bbox.x.round() as i32,
          y: bbox.y.round() as i32,
          width: bbox.width.round() as i32,
          height: bbox.height.round() as i32,
          score,
          class_id,
          label: self.labels[class_id].clone(),
        }
      })
      .collect();

    debug!("检测到 {} 个目标", detections.len());
    Ok(detections)
  }

  /// 检测并按需在原图上绘制结果
  pub fn predict(
    &self,
    image: &mut RgbImage,
    overlay: bool,
  ) -> Result<Vec<Detection>, DetectorError> {
    self.predict_with_threshold(image, overlay, None)
  }

  pub fn predict_with_threshold(
    &self,
    image: &mut RgbImage,
    overlay: bool,
    score_threshold: Option<f32>,
  ) -> Result<Vec<Detection>, DetectorError> {
    let detections = self.detect(image, score_threshold)?;
    if overlay {
      self.painter.paint_all(image, &detections);
    }
    Ok(detections)
  }
}

/// 检测器构造器，依次加载描述文件与模型文件
pub struct DetectorBuilder {
  model_path: PathBuf,
  descriptor_path: PathBuf,
  labels: Vec<String>,
  backend: Backend,
  score_threshold: Option<f32>,
  nms_policy: NmsPolicy,
  channel_order: ChannelOrder,
}

impl DetectorBuilder {
  /// 默认使用 COCO 类别表与 CPU 后端
  pub fn new(model_path: impl Into<PathBuf>, descriptor_path: impl Into<PathBuf>) -> Self {
    Self {
      model_path: model_path.into(),
      descriptor_path: descriptor_path.into(),
      labels: COCO_LABELS.iter().map(|s| s.to_string()).collect(),
      backend: Backend::Cpu,
      score_threshold: None,
      nms_policy: NmsPolicy::default(),
      channel_order: ChannelOrder::default(),
    }
  }

  pub fn labels<S: Into<String>>(mut self, labels: impl IntoIterator<Item = S>) -> Self {
    self.labels = labels.into_iter().map(Into::into).collect();
    self
  }

  pub fn accelerated(mut self, accelerated: bool) -> Self {
    self.backend = if accelerated {
      Backend::Accelerated
    } else {
      Backend::Cpu
    };
    self
  }

  /// 覆盖描述文件中的默认置信度阈值
  pub fn score_threshold(mut self, score_threshold: Option<f32>) -> Self {
    self.score_threshold = score_threshold;
    self
  }

  pub fn nms_policy(mut self, policy: NmsPolicy) -> Self {
    self.nms_policy = policy;
    self
  }

  pub fn channel_order(mut self, order: ChannelOrder) -> Self {
    self.channel_order = order;
    self
  }

  pub fn build<M>(self) -> Result<Detector<M>, DetectorError>
  where
    M: LoadModel,
    M::Error: std::error::Error + Send + Sync + 'static,
  {
    let mut config = DetectorConfig::load(&self.descriptor_path)?;
    if let Some(score_threshold) = self.score_threshold {
      info!(
        "置信度阈值覆盖: {} -> {}",
        config.score_threshold, score_threshold
      );
      config = config.with_score_threshold(score_threshold)?;
    }
    if self.labels.is_empty() {
      warn!("类别表为空");
    }

    info!("加载模型文件: {}", self.model_path.display());
    let options = LoadOptions {
      backend: self.backend,
      input_width: config.input_width,
      input_height: config.input_height,
    };
    let model = M::load(&self.model_path, &options).map_err(DetectorError::model_load)?;
    info!("模型加载完成");

    Ok(
      Detector::from_parts(model, config, self.labels)
        .with_nms_policy(self.nms_policy)
        .with_channel_order(self.channel_order),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::ConfigError;
  use ndarray::{ArrayD, IxDyn};
  use std::convert::Infallible;

  /// 固定返回一组输出的推理引擎
  struct Fixed(Vec<ArrayD<f32>>);

  impl Model for Fixed {
    type Error = Infallible;

    fn infer(&self, _: &Array4<f32>) -> Result<Vec<ArrayD<f32>>, Self::Error> {
      Ok(self.0.clone())
    }
  }

  fn letterbox_config() -> DetectorConfig {
    "0.45\n0.5\n640\n640\nn\nt\nn\n114\nn\n".parse().unwrap()
  }

  fn single_anchor(scores: &[f32], bbox: [f32; 4]) -> Fixed {
    let scores = ArrayD::from_shape_vec(IxDyn(&[1, 1, scores.len()]), scores.to_vec()).unwrap();
    let boxes = ArrayD::from_shape_vec(IxDyn(&[1, 1, 4]), bbox.to_vec()).unwrap();
    Fixed(vec![scores, boxes])
  }

  #[test]
  fn maps_detection_back_to_original_image() {
    let model = single_anchor(&[0.9], [100.0, 100.0, 300.0, 300.0]);
    let detector = Detector::from_parts(model, letterbox_config(), COCO_LABELS);
    let detections = detector.detect(&RgbImage::new(1280, 720), None).unwrap();
    assert_eq!(detections.len(), 1);
    let d = &detections[0];
    assert_eq!((d.x, d.y, d.width, d.height), (200, -80, 400, 400));
    assert_eq!(d.label, "person");
    assert_eq!(d.class_id, 0);
    assert!((d.score - 0.9).abs() < 1e-6);
  }

  #[test]
  fn per_call_threshold_does_not_touch_config() {
    let model = single_anchor(&[0.6], [0.0, 0.0, 10.0, 10.0]);
    let detector = Detector::from_parts(model, letterbox_config(), COCO_LABELS);
    let image = RgbImage::new(640, 640);
    assert_eq!(detector.detect(&image, Some(0.7)).unwrap().len(), 0);
    assert_eq!(detector.config().score_threshold, 0.5);
    assert_eq!(detector.detect(&image, None).unwrap().len(), 1);
  }

  #[test]
  fn invalid_per_call_threshold_is_rejected() {
    let model = single_anchor(&[0.0], [0.0, 0.0, 10.0, 10.0]);
    let detector = Detector::from_parts(model, letterbox_config(), COCO_LABELS);
    let image = RgbImage::new(640, 640);
    for bad in [f32::NAN, -3.0, 1.5] {
      let err = detector.detect(&image, Some(bad)).unwrap_err();
      assert!(matches!(
        err,
        DetectorError::Config(ConfigError::InvalidScoreThreshold(_))
      ));
    }
    assert!(detector.detect(&image, None).unwrap().is_empty());
  }

  #[test]
  fn class_count_beyond_labels_is_rejected() {
    let model = single_anchor(&[0.1, 0.9, 0.2], [0.0, 0.0, 10.0, 10.0]);
    let detector = Detector::from_parts(model, letterbox_config(), ["a", "b"]);
    let err = detector.detect(&RgbImage::new(64, 64), None).unwrap_err();
    assert!(matches!(
      err,
      DetectorError::Postprocess(PostprocessError::InferenceOutputMismatch(_))
    ));
  }

  #[test]
  fn warm_up_marks_detector_ready() {
    let model = single_anchor(&[0.9], [0.0, 0.0, 10.0, 10.0]);
    let mut detector = Detector::from_parts(model, letterbox_config(), COCO_LABELS);
    assert_eq!(detector.state(), DetectorState::Constructed);
    detector.warm_up().unwrap();
    assert_eq!(detector.state(), DetectorState::Ready);
  }
}
