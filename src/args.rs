// 该文件是 Kanjian （看见） 项目的一部分。
// src/args.rs - 命令行参数
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

use std::{path::PathBuf, time::Duration};

use clap::Parser;
use url::Url;

use kanjian::{
  config::{CONFIDENCE_THRESHOLD, ColorPolicy, RenderConfig, UnknownClassPolicy},
  input::RetryPolicy,
};

/// Kanjian 实时目标检测叠加
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 检测模型
  /// - rknn:///model/ssd.rknn
  /// - onnx:///model/ssd.onnx?dtype=f32&layout=nchw
  /// - replay:///fixtures/detections.json
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 标签文件，第 N 行为类别 N 的名称
  #[arg(long, value_name = "FILE")]
  pub labels: PathBuf,

  /// 输入来源
  /// - v4l2:///dev/video0?width=640&height=480
  /// - gst://camera/dev/video0
  /// - image:///data/street.jpg
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 输出
  /// - gstdisplay://auto
  /// - image:///tmp/overlay.png
  /// - folder:///var/record?record=name
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,

  /// 置信度阈值 (0.0 - 1.0)，分数严格大于该值才绘制
  #[arg(long, default_value_t = CONFIDENCE_THRESHOLD, value_name = "THRESHOLD")]
  pub confidence: f32,

  /// 检测框颜色按槽位还是按类别选取
  #[arg(long, value_enum, default_value_t = ColorPolicy::Slot)]
  pub color_by: ColorPolicy,

  /// 类别索引超出标签表时的处理方式
  #[arg(long, value_enum, default_value_t = UnknownClassPolicy::Reject)]
  pub unknown_class: UnknownClassPolicy,

  /// 处理指定帧数后退出
  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,

  /// 打开相机的最多尝试次数
  #[arg(long, default_value_t = 5, value_name = "COUNT")]
  pub open_retries: u32,

  /// 第一次重试前的等待时间（毫秒），之后逐次翻倍
  #[arg(long, default_value_t = 200, value_name = "MILLIS")]
  pub retry_backoff_ms: u64,

  /// 只处理第一帧
  #[arg(long)]
  pub oneshot: bool,
}

impl Args {
  pub fn render_config(&self) -> RenderConfig {
    RenderConfig::default()
      .with_threshold(self.confidence)
      .with_color_policy(self.color_by)
      .with_unknown_class(self.unknown_class)
  }

  pub fn retry_policy(&self) -> RetryPolicy {
    RetryPolicy::new(self.open_retries, Duration::from_millis(self.retry_backoff_ms))
  }
}
