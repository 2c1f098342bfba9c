// 该文件是 Kanjian （看见） 项目的一部分。
// src/task.rs - 运行任务
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

use std::{sync::Arc, thread, time::Duration};

use tracing::{info, warn};

use crate::{
  config::RenderConfig,
  input::{FrameSource, SurfaceEvent},
  labels::LabelTable,
  model::Model,
  output::DisplaySink,
  pipeline::{EventOutcome, Pipeline, PipelineStats},
};

/// 收到中断信号后等待正常退出的最长时间
const FORCED_EXIT_GRACE: Duration = Duration::from_secs(30);

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<PipelineStats, Self::Error>;
}

/// 只处理第一帧，任何错误都直接返回
pub struct OneShotTask {
  labels: Arc<LabelTable>,
  config: RenderConfig,
}

impl OneShotTask {
  pub fn new(labels: Arc<LabelTable>, config: RenderConfig) -> Self {
    Self { labels, config }
  }
}

impl<I, M, O> Task<I, M, O> for OneShotTask
where
  I: FrameSource,
  M: Model,
  O: DisplaySink,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, mut output: O) -> Result<PipelineStats, Self::Error> {
    info!("开始任务...");
    let mut pipeline = Pipeline::new(model, self.labels, self.config)?;

    loop {
      let event = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
      let is_frame = event == SurfaceEvent::FrameUpdated;
      let now = std::time::Instant::now();
      match pipeline.handle_event(event, &mut input, &mut output)? {
        EventOutcome::Presented(boxes) => {
          info!("处理完成，检测到 {} 个目标，耗时: {:.2?}", boxes, now.elapsed());
          break;
        }
        EventOutcome::Finished => anyhow::bail!("帧源在给出任何帧之前已关闭"),
        _ if is_frame => anyhow::bail!("第一帧未被处理"),
        _ => {}
      }
    }

    pipeline.shutdown();
    Ok(*pipeline.stats())
  }
}

/// 持续处理帧，直到帧源结束、达到指定帧数或收到 Ctrl-C
#[derive(Debug)]
pub struct ContinuousTask {
  labels: Arc<LabelTable>,
  config: RenderConfig,
  frame_number: Option<usize>,
}

impl ContinuousTask {
  pub fn new(labels: Arc<LabelTable>, config: RenderConfig) -> Self {
    Self {
      labels,
      config,
      frame_number: None,
    }
  }

  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }
}

impl<I, M, O> Task<I, M, O> for ContinuousTask
where
  I: FrameSource,
  M: Model,
  O: DisplaySink,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, mut output: O) -> Result<PipelineStats, Self::Error> {
    info!("开始任务...");
    let mut pipeline = Pipeline::new(model, self.labels, self.config)?;
    let handle = pipeline.shutdown_handle();

    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      handle.shutdown();
      thread::spawn(|| {
        thread::sleep(FORCED_EXIT_GRACE);
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })?;

    let stats = pipeline.run_limited(
      &mut input,
      &mut output,
      self.frame_number.map(|n| n as u64),
    );
    info!("任务完成，退出");
    Ok(stats)
  }
}
