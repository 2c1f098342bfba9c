// 该文件是 Kanjian （看见） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use kanjian::{
  FromUrl,
  input::InputWrapper,
  labels::LabelTable,
  model::ModelWrapper,
  output::OutputWrapper,
  task::{ContinuousTask, OneShotTask, Task},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();
  let config = args.render_config();
  config.validate()?;

  info!("模型: {}", args.model);
  info!("标签文件: {}", args.labels.display());
  info!("输入来源: {}", args.input);
  info!("输出: {}", args.output);

  // 启动阶段的任何错误都是致命的
  let labels = Arc::new(LabelTable::load(&args.labels)?);
  let model = ModelWrapper::from_url(&args.model)?;
  let input = InputWrapper::open(&args.input, &args.retry_policy())?;
  let output = OutputWrapper::from_url(&args.output)?;

  let stats = if args.oneshot {
    OneShotTask::new(labels, config).run_task(input, model, output)?
  } else {
    ContinuousTask::new(labels, config)
      .with_frame_number(args.frame_number)
      .run_task(input, model, output)?
  };

  info!(
    "显示 {} 帧, 失败 {} 帧, 共绘制 {} 个检测框",
    stats.frames_presented, stats.frames_failed, stats.boxes_drawn
  );
  Ok(())
}
