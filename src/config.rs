// 该文件是 Kanjian （看见） 项目的一部分。
// src/config.rs - 模型描述文件解析
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

//! 描述文件为纯文本，每行一个值，顺序固定：
//!
//! ```text
//! iou 阈值
//! 置信度阈值
//! 模型输入宽度
//! 模型输入高度
//! 标准化除数（n 表示禁用）
//! 保持宽高比（t 表示启用）
//! 右下填充值（n 表示禁用）
//! 居中填充值（n 表示禁用）
//! 归一化标记（n 表示禁用，否则后跟 6 行: scaleR scaleG scaleB meanR meanG meanB）
//! ```

use std::{
  fmt,
  path::{Path, PathBuf},
  str::FromStr,
};

use thiserror::Error;
use tracing::{debug, info, warn};

const DISABLED: &str = "n";
const ENABLED: &str = "t";

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("无法读取模型描述文件 {}: {source}", .path.display())]
  NotFound {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("描述文件第 {line} 行 ({field}) 解析失败: {reason}")]
  Parse {
    line: usize,
    field: &'static str,
    reason: String,
  },
  #[error("置信度阈值 {0} 无效, 必须在 [0, 1] 内")]
  InvalidScoreThreshold(f32),
}

/// 检查调用方给出的置信度阈值，NaN 与区间外的值均被拒绝
pub fn validate_score_threshold(score_threshold: f32) -> Result<f32, ConfigError> {
  if (0.0..=1.0).contains(&score_threshold) {
    Ok(score_threshold)
  } else {
    Err(ConfigError::InvalidScoreThreshold(score_threshold))
  }
}

/// 按通道的归一化参数，`(pixel - mean) / scale`，通道顺序为 R、G、B
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
  pub scale: [f32; 3],
  pub mean: [f32; 3],
}

impl Normalization {
  pub fn apply(&self, channel: usize, value: f32) -> f32 {
    (value - self.mean[channel]) / self.scale[channel]
  }
}

/// 一次推理实际采用的填充方式，两种填充互斥
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaddingMode {
  None,
  BottomRight(u8),
  Center(u8),
}

/// 模型的几何与像素预处理约定，构造后只读
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
  pub iou_threshold: f32,
  pub score_threshold: f32,
  pub input_width: u32,
  pub input_height: u32,
  pub standardize_divisor: Option<f32>,
  pub preserve_aspect_ratio: bool,
  pub border_pad_value: Option<u8>,
  pub center_pad_value: Option<u8>,
  pub normalization: Option<Normalization>,
}

impl DetectorConfig {
  /// 从文件读取描述文件
  pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    info!("加载模型描述文件: {}", path.display());
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::NotFound {
      path: path.to_path_buf(),
      source,
    })?;
    let config = text.parse::<DetectorConfig>()?;
    debug!("模型描述: {:?}", config);
    Ok(config)
  }

  /// 替换默认置信度阈值，返回新的配置
  pub fn with_score_threshold(mut self, score_threshold: f32) -> Result<Self, ConfigError> {
    self.score_threshold = validate_score_threshold(score_threshold)?;
    Ok(self)
  }

  /// 不保持宽高比时直接拉伸，不做任何填充；右下填充优先于居中填充
  pub fn padding_mode(&self) -> PaddingMode {
    if !self.preserve_aspect_ratio {
      return PaddingMode::None;
    }
    match (self.border_pad_value, self.center_pad_value) {
      (Some(value), _) => PaddingMode::BottomRight(value),
      (None, Some(value)) => PaddingMode::Center(value),
      (None, None) => PaddingMode::None,
    }
  }

  /// 序列化为描述文件格式
  pub fn to_descriptor(&self) -> String {
    self.to_string()
  }
}

struct DescriptorLines<'a> {
  lines: std::str::Lines<'a>,
  consumed: usize,
}

impl<'a> DescriptorLines<'a> {
  fn new(text: &'a str) -> Self {
    Self {
      lines: text.lines(),
      consumed: 0,
    }
  }

  fn next_optional(&mut self) -> Option<(usize, &'a str)> {
    let line = self.lines.next()?;
    self.consumed += 1;
    let value = line.trim();
    (!value.is_empty()).then_some((self.consumed, value))
  }

  fn next_required(&mut self, field: &'static str) -> Result<(usize, &'a str), ConfigError> {
    let Some(line) = self.lines.next() else {
      return Err(ConfigError::Parse {
        line: self.consumed + 1,
        field,
        reason: "缺少该字段".to_string(),
      });
    };
    self.consumed += 1;
    let value = line.trim();
    ensure(!value.is_empty(), self.consumed, field, "值为空")?;
    Ok((self.consumed, value))
  }

  fn number<T>(&mut self, field: &'static str) -> Result<(usize, T), ConfigError>
  where
    T: FromStr,
    T::Err: fmt::Display,
  {
    let (line, value) = self.next_required(field)?;
    Ok((line, parse_value(line, field, value)?))
  }

  fn optional_number<T>(&mut self, field: &'static str) -> Result<(usize, Option<T>), ConfigError>
  where
    T: FromStr,
    T::Err: fmt::Display,
  {
    let (line, value) = self.next_required(field)?;
    if value == DISABLED {
      return Ok((line, None));
    }
    Ok((line, Some(parse_value(line, field, value)?)))
  }

  fn remaining(&mut self) -> usize {
    self.lines.by_ref().filter(|l| !l.trim().is_empty()).count()
  }
}

fn parse_value<T>(line: usize, field: &'static str, value: &str) -> Result<T, ConfigError>
where
  T: FromStr,
  T::Err: fmt::Display,
{
  value.parse::<T>().map_err(|e| ConfigError::Parse {
    line,
    field,
    reason: format!("无法解析 '{}': {}", value, e),
  })
}

fn ensure(ok: bool, line: usize, field: &'static str, reason: &str) -> Result<(), ConfigError> {
  if ok {
    Ok(())
  } else {
    Err(ConfigError::Parse {
      line,
      field,
      reason: reason.to_string(),
    })
  }
}

fn pad_value(line: usize, field: &'static str, value: Option<i32>) -> Result<Option<u8>, ConfigError> {
  value
    .map(|v| {
      u8::try_from(v).map_err(|_| ConfigError::Parse {
        line,
        field,
        reason: format!("填充值 {} 超出 0..=255", v),
      })
    })
    .transpose()
}

impl FromStr for DetectorConfig {
  type Err = ConfigError;

  fn from_str(text: &str) -> Result<Self, Self::Err> {
    let mut lines = DescriptorLines::new(text);

    let (line, iou_threshold) = lines.number::<f32>("iou")?;
    ensure(
      iou_threshold > 0.0 && iou_threshold <= 1.0,
      line,
      "iou",
      "iou 阈值必须在 (0, 1] 内",
    )?;

    let (line, score_threshold) = lines.number::<f32>("score")?;
    ensure(
      (0.0..=1.0).contains(&score_threshold),
      line,
      "score",
      "置信度阈值必须在 [0, 1] 内",
    )?;

    let (line, input_width) = lines.number::<u32>("width")?;
    ensure(input_width > 0, line, "width", "输入宽度必须大于 0")?;
    let (line, input_height) = lines.number::<u32>("height")?;
    ensure(input_height > 0, line, "height", "输入高度必须大于 0")?;

    // 除数为 0 时视为未启用
    let (line, standardize_divisor) = lines.optional_number::<f32>("std")?;
    ensure(
      standardize_divisor.is_none_or(f32::is_finite),
      line,
      "std",
      "标准化除数必须为有限值",
    )?;
    let standardize_divisor = standardize_divisor.filter(|d| *d != 0.0);

    let (_, preserve_aspect_ratio) = lines.next_required("preserve_aspect_ratio")?;
    let preserve_aspect_ratio = preserve_aspect_ratio == ENABLED;

    let (line, border) = lines.optional_number::<i32>("border_pad")?;
    let border_pad_value = pad_value(line, "border_pad", border)?;
    let (line, center) = lines.optional_number::<i32>("center_pad")?;
    let center_pad_value = pad_value(line, "center_pad", center)?;

    let normalization = match lines.next_optional() {
      None => None,
      Some((_, DISABLED)) => None,
      Some(_) => {
        let mut values = [0.0f32; 6];
        const FIELDS: [&str; 6] = ["scale_r", "scale_g", "scale_b", "mean_r", "mean_g", "mean_b"];
        for (slot, field) in values.iter_mut().zip(FIELDS) {
          let (line, value) = lines.number::<f32>(field)?;
          ensure(value.is_finite(), line, field, "归一化参数必须为有限值")?;
          *slot = value;
        }
        let scale = [values[0], values[1], values[2]];
        ensure(
          scale.iter().all(|s| *s != 0.0),
          lines.consumed,
          "scale",
          "归一化缩放不能为 0",
        )?;
        Some(Normalization {
          scale,
          mean: [values[3], values[4], values[5]],
        })
      }
    };

    let extra = lines.remaining();
    if extra > 0 {
      warn!("描述文件末尾有 {} 行多余内容，已忽略", extra);
    }

    Ok(DetectorConfig {
      iou_threshold,
      score_threshold,
      input_width,
      input_height,
      standardize_divisor,
      preserve_aspect_ratio,
      border_pad_value,
      center_pad_value,
      normalization,
    })
  }
}

struct Sentinel<T>(Option<T>);

impl<T: fmt::Display> fmt::Display for Sentinel<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.0 {
      Some(value) => write!(f, "{}", value),
      None => f.write_str(DISABLED),
    }
  }
}

impl fmt::Display for DetectorConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "{}", self.iou_threshold)?;
    writeln!(f, "{}", self.score_threshold)?;
    writeln!(f, "{}", self.input_width)?;
    writeln!(f, "{}", self.input_height)?;
    writeln!(f, "{}", Sentinel(self.standardize_divisor))?;
    writeln!(
      f,
      "{}",
      if self.preserve_aspect_ratio {
        ENABLED
      } else {
        DISABLED
      }
    )?;
    writeln!(f, "{}", Sentinel(self.border_pad_value))?;
    writeln!(f, "{}", Sentinel(self.center_pad_value))?;
    match &self.normalization {
      None => write!(f, "{}", DISABLED),
      Some(norm) => {
        write!(f, "{}", ENABLED)?;
        for value in norm.scale.iter().chain(norm.mean.iter()) {
          write!(f, "\n{}", value)?;
        }
        Ok(())
      }
    }
  }
}
