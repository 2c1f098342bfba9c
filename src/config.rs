// 该文件是 Kanjian （看见） 项目的一部分。
// src/config.rs - 运行时常量与渲染配置
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

use clap::ValueEnum;
use thiserror::Error;

/// 置信度阈值，分数严格大于该值才绘制
pub const CONFIDENCE_THRESHOLD: f32 = 0.5;
/// 模型输入分辨率（正方形边长）
pub const MODEL_INPUT_SIZE: u32 = 300;
/// 每个检测框的坐标数量 (top, left, bottom, right)
pub const NUM_COORDINATES: usize = 4;
/// 模型固定输出的候选数量
pub const MAX_DETECTIONS: usize = 10;

/// 检测框颜色的选取方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorPolicy {
  /// 按候选槽位循环调色板，同一类别在不同帧可能颜色不同
  #[default]
  Slot,
  /// 按类别循环调色板，颜色是类别的稳定函数
  Class,
}

/// 类别索引超出标签表时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum UnknownClassPolicy {
  /// 本帧渲染失败并报告数据完整性错误
  #[default]
  Reject,
  /// 使用 `class#<索引>` 占位标签继续绘制，并记录警告
  Placeholder,
}

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
  #[error("置信度阈值必须在 [0, 1] 区间内: {0}")]
  InvalidThreshold(f32),
}

/// 后处理与叠加渲染配置
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderConfig {
  pub confidence_threshold: f32,
  pub color_policy: ColorPolicy,
  pub unknown_class: UnknownClassPolicy,
}

impl Default for RenderConfig {
  fn default() -> Self {
    Self {
      confidence_threshold: CONFIDENCE_THRESHOLD,
      color_policy: ColorPolicy::default(),
      unknown_class: UnknownClassPolicy::default(),
    }
  }
}

impl RenderConfig {
  pub fn with_threshold(mut self, threshold: f32) -> Self {
    self.confidence_threshold = threshold;
    self
  }

  pub fn with_color_policy(mut self, policy: ColorPolicy) -> Self {
    self.color_policy = policy;
    self
  }

  pub fn with_unknown_class(mut self, policy: UnknownClassPolicy) -> Self {
    self.unknown_class = policy;
    self
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&self.confidence_threshold) {
      return Err(ConfigError::InvalidThreshold(self.confidence_threshold));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_runtime_constants() {
    let config = RenderConfig::default();
    assert_eq!(config.confidence_threshold, 0.5);
    assert_eq!(config.color_policy, ColorPolicy::Slot);
    assert_eq!(config.unknown_class, UnknownClassPolicy::Reject);
    assert!(config.validate().is_ok());
  }

  #[test]
  fn threshold_out_of_range_is_rejected() {
    let config = RenderConfig::default().with_threshold(1.5);
    assert_eq!(config.validate(), Err(ConfigError::InvalidThreshold(1.5)));
    assert!(RenderConfig::default().with_threshold(f32::NAN).validate().is_err());
  }
}
