// 该文件是 Kanjian （看见） 项目的一部分。
// src/bin/simple_oneshot.rs - 单张图像推理
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

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use tracing::info;

use kanjian::{DetectorBuilder, model::TractModel};

/// Kanjian 单张图像推理参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 模型文件路径
  #[arg(long, value_name = "MODEL")]
  pub model: PathBuf,
  /// 模型描述文件路径
  #[arg(long, value_name = "METADATA")]
  pub metadata: PathBuf,
  /// 输入图像
  #[arg(long, value_name = "IMAGE")]
  pub image: PathBuf,
  /// 绘制结果后的输出图像
  #[arg(long, value_name = "OUTPUT")]
  pub output: PathBuf,
  /// 类别表文件，每行一个类别，缺省为 COCO 类别
  #[arg(long, value_name = "LABELS")]
  pub labels: Option<PathBuf>,
  /// 置信度阈值，缺省使用描述文件中的值
  #[arg(long, value_name = "CONFIDENCE")]
  pub confidence: Option<f32>,
  /// 优先使用加速后端
  #[arg(long)]
  pub accelerated: bool,
}

fn read_labels(path: &Path) -> Result<Vec<String>> {
  let text = std::fs::read_to_string(path)
    .with_context(|| format!("无法读取类别表: {}", path.display()))?;
  Ok(
    text
      .lines()
      .map(str::trim)
      .filter(|line| !line.is_empty())
      .map(str::to_string)
      .collect(),
  )
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model.display());
  info!("描述文件路径: {}", args.metadata.display());
  info!("输入图像: {}", args.image.display());
  info!("输出路径: {}", args.output.display());

  let mut builder = DetectorBuilder::new(&args.model, &args.metadata)
    .accelerated(args.accelerated)
    .score_threshold(args.confidence);
  if let Some(path) = &args.labels {
    builder = builder.labels(read_labels(path)?);
  }
  let mut detector = builder.build::<TractModel>()?;
  detector.warm_up()?;

  let mut image = image::open(&args.image)
    .with_context(|| format!("无法打开图像: {}", args.image.display()))?
    .to_rgb8();

  info!("开始推理...");
  let now = std::time::Instant::now();
  let detections = detector.predict(&mut image, true)?;
  info!("推理完成，耗时: {:.2?}", now.elapsed());

  image
    .save(&args.output)
    .with_context(|| format!("无法保存图像: {}", args.output.display()))?;

  let result: Vec<_> = detections
    .iter()
    .map(|d| {
      json!({
        "x": d.x,
        "y": d.y,
        "w": d.width,
        "h": d.height,
        "score": d.score,
        "label": d.label,
      })
    })
    .collect();
  println!("{}", serde_json::to_string_pretty(&result)?);

  Ok(())
}
