// 该文件是 Kanjian （看见） 项目的一部分。
// src/pipeline.rs - 帧到叠加图像的处理流水线
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

use std::{
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  time::Instant,
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  config::{ConfigError, RenderConfig},
  frame::Frame,
  input::{FrameSource, InputError, SurfaceEvent},
  labels::LabelTable,
  model::{Model, ModelError},
  output::{DisplaySink, Overlay, OverlayRenderer, RenderError},
  preprocess::{PreprocessError, Preprocessor},
};

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("流水线已停止")]
  Inactive,
  #[error("配置错误: {0}")]
  Config(#[from] ConfigError),
  #[error("输入错误: {0}")]
  Input(#[from] InputError),
  #[error("预处理错误: {0}")]
  Preprocess(#[from] PreprocessError),
  #[error("模型错误: {0}")]
  Model(#[from] ModelError),
  #[error("渲染错误: {0}")]
  Render(#[from] RenderError),
  #[error("显示错误: {0}")]
  Display(Box<dyn std::error::Error + Send + Sync>),
}

/// 活动标志；可以克隆后交给信号处理函数或其他线程
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
  active: Arc<AtomicBool>,
}

impl Default for ShutdownHandle {
  fn default() -> Self {
    Self {
      active: Arc::new(AtomicBool::new(true)),
    }
  }
}

impl ShutdownHandle {
  pub fn is_active(&self) -> bool {
    self.active.load(Ordering::SeqCst)
  }

  /// 请求停止；模型由持有流水线的线程在下一次检查时释放
  pub fn shutdown(&self) {
    if self.active.swap(false, Ordering::SeqCst) {
      info!("收到停止请求");
    }
  }
}

/// 一次事件处理的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
  /// 叠加图像已送到显示输出，附带绘制的检测框数量
  Presented(usize),
  /// 表面尺寸已更新
  SurfaceChanged { width: u32, height: u32 },
  /// 表面尚未就绪，本帧未处理
  Skipped,
  /// 流水线已停止，事件被忽略
  Ignored,
  /// 表面已销毁
  Finished,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
  pub frames_presented: u64,
  pub frames_failed: u64,
  pub frames_skipped: u64,
  pub boxes_drawn: u64,
}

/// 流水线上下文：预处理器、检测器、渲染器与标签表
///
/// 所有阶段在调用 [`Pipeline::run`] 的线程上同步执行，
/// 一个周期结束之前不会开始下一个周期。
pub struct Pipeline<M: Model> {
  preprocessor: Preprocessor,
  model: Option<M>,
  renderer: OverlayRenderer,
  labels: Arc<LabelTable>,
  handle: ShutdownHandle,
  surface: Option<(u32, u32)>,
  stats: PipelineStats,
}

impl<M: Model> Pipeline<M> {
  pub fn new(model: M, labels: Arc<LabelTable>, config: RenderConfig) -> Result<Self, PipelineError> {
    config.validate()?;
    let spec = model.input_spec();
    info!(
      "创建流水线: 模型输入 {}, 标签 {} 个, 置信度阈值 {}",
      spec,
      labels.len(),
      config.confidence_threshold
    );

    Ok(Self {
      preprocessor: Preprocessor::new(spec),
      model: Some(model),
      renderer: OverlayRenderer::new(config),
      labels,
      handle: ShutdownHandle::default(),
      surface: None,
      stats: PipelineStats::default(),
    })
  }

  pub fn shutdown_handle(&self) -> ShutdownHandle {
    self.handle.clone()
  }

  pub fn is_active(&self) -> bool {
    self.handle.is_active() && self.model.is_some()
  }

  pub fn surface(&self) -> Option<(u32, u32)> {
    self.surface
  }

  pub fn stats(&self) -> &PipelineStats {
    &self.stats
  }

  /// 对一帧执行 预处理 → 推理 → 渲染
  pub fn process_frame(&mut self, frame: &Frame) -> Result<Overlay, PipelineError> {
    if !self.handle.is_active() {
      return Err(PipelineError::Inactive);
    }
    let model = self.model.as_mut().ok_or(PipelineError::Inactive)?;

    let now = Instant::now();
    let tensor = self.preprocessor.process(frame)?;
    let detections = model.infer(tensor)?;
    let inferred = now.elapsed();
    let overlay = self.renderer.render(frame, &detections, &self.labels)?;
    debug!(
      "帧 {}: 推理 {:.2?}, 合计 {:.2?}",
      frame.index(),
      inferred,
      now.elapsed()
    );
    Ok(overlay)
  }

  /// 处理一个表面事件
  pub fn handle_event<S, D>(
    &mut self,
    event: SurfaceEvent,
    source: &mut S,
    sink: &mut D,
  ) -> Result<EventOutcome, PipelineError>
  where
    S: FrameSource + ?Sized,
    D: DisplaySink + ?Sized,
    D::Error: std::error::Error + Send + Sync + 'static,
  {
    if !self.is_active() {
      debug!("流水线已停止，忽略事件 {:?}", event);
      return Ok(EventOutcome::Ignored);
    }

    match event {
      SurfaceEvent::Ready { width, height } | SurfaceEvent::Resized { width, height } => {
        info!("表面尺寸: {}x{}", width, height);
        self.surface = Some((width, height));
        Ok(EventOutcome::SurfaceChanged { width, height })
      }
      SurfaceEvent::FrameUpdated if self.surface.is_none() => {
        warn!("表面尚未就绪，跳过本帧");
        self.stats.frames_skipped += 1;
        Ok(EventOutcome::Skipped)
      }
      SurfaceEvent::FrameUpdated => {
        let frame = source.snapshot()?;
        let overlay = self.process_frame(&frame)?;
        sink
          .present(&overlay)
          .map_err(|e| PipelineError::Display(Box::new(e)))?;
        self.stats.frames_presented += 1;
        self.stats.boxes_drawn += overlay.boxes.len() as u64;
        Ok(EventOutcome::Presented(overlay.boxes.len()))
      }
      SurfaceEvent::Destroyed => {
        info!("表面已销毁");
        self.surface = None;
        self.shutdown();
        Ok(EventOutcome::Finished)
      }
    }
  }

  /// 消费帧源直到表面销毁、帧源结束或收到停止请求
  ///
  /// 单个周期的错误只记录并计数，不会中断流水线。
  pub fn run<S, D>(&mut self, source: &mut S, sink: &mut D) -> PipelineStats
  where
    S: FrameSource + ?Sized,
    D: DisplaySink + ?Sized,
    D::Error: std::error::Error + Send + Sync + 'static,
  {
    self.run_limited(source, sink, None)
  }

  /// 同 [`Pipeline::run`]，显示 `max_frames` 帧之后停止
  pub fn run_limited<S, D>(
    &mut self,
    source: &mut S,
    sink: &mut D,
    max_frames: Option<u64>,
  ) -> PipelineStats
  where
    S: FrameSource + ?Sized,
    D: DisplaySink + ?Sized,
    D::Error: std::error::Error + Send + Sync + 'static,
  {
    info!("开始处理帧...");
    while self.is_active() {
      let Some(event) = source.next() else {
        info!("帧源结束");
        break;
      };
      match self.handle_event(event, source, sink) {
        Ok(EventOutcome::Finished) => break,
        Ok(EventOutcome::Presented(boxes)) => {
          info!("第 {} 帧显示完成, {} 个检测框", self.stats.frames_presented, boxes);
          if max_frames.is_some_and(|n| self.stats.frames_presented >= n) {
            info!("达到指定帧数 {}, 退出处理循环", self.stats.frames_presented);
            break;
          }
        }
        Ok(_) => {}
        Err(e) => {
          self.stats.frames_failed += 1;
          error!("处理帧失败: {}", e);
        }
      }
    }

    self.shutdown();
    info!(
      "流水线结束: 显示 {} 帧, 失败 {} 帧, 跳过 {} 帧, 共绘制 {} 个检测框",
      self.stats.frames_presented,
      self.stats.frames_failed,
      self.stats.frames_skipped,
      self.stats.boxes_drawn
    );
    self.stats
  }

  /// 清除活动标志并释放模型，重复调用无效果
  pub fn shutdown(&mut self) {
    self.handle.shutdown();
    if let Some(mut model) = self.model.take() {
      model.release();
      info!("模型已释放");
    }
  }
}

impl<M: Model> Drop for Pipeline<M> {
  fn drop(&mut self) {
    self.shutdown();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    model::RawDetections,
    tensor::{Tensor, TensorLayout, TensorSpec, TensorType},
  };
  use image::RgbImage;
  use std::sync::atomic::AtomicUsize;

  struct Fixed {
    output: RawDetections,
    released: Arc<AtomicUsize>,
  }

  impl Model for Fixed {
    fn input_spec(&self) -> TensorSpec {
      TensorSpec::square(4, TensorLayout::Nhwc, TensorType::UInt8)
    }

    fn infer(&mut self, tensor: Tensor) -> Result<RawDetections, ModelError> {
      tensor.ensure_spec(&self.input_spec())?;
      Ok(self.output.clone())
    }

    fn release(&mut self) {
      self.released.fetch_add(1, Ordering::SeqCst);
    }
  }

  fn pipeline(released: Arc<AtomicUsize>) -> Pipeline<Fixed> {
    let output = RawDetections::new(vec![0.1, 0.1, 0.9, 0.9], vec![1.0], vec![0.8]).unwrap();
    let labels = Arc::new(LabelTable::from_labels(["???", "person"]));
    Pipeline::new(Fixed { output, released }, labels, RenderConfig::default()).unwrap()
  }

  #[test]
  fn invalid_threshold_is_rejected() {
    let labels = Arc::new(LabelTable::from_labels(["a"]));
    let model = Fixed {
      output: RawDetections::default(),
      released: Arc::default(),
    };
    let result = Pipeline::new(model, labels, RenderConfig::default().with_threshold(1.5));
    assert!(matches!(result, Err(PipelineError::Config(_))));
  }

  #[test]
  fn process_frame_draws_confident_boxes() {
    let mut pipeline = pipeline(Arc::default());
    let overlay = pipeline
      .process_frame(&Frame::new(RgbImage::new(40, 30), 0, 0))
      .unwrap();
    assert_eq!(overlay.boxes.len(), 1);
    assert_eq!(overlay.boxes[0].label, "person");
  }

  #[test]
  fn shutdown_releases_once_and_blocks_cycles() {
    let released = Arc::new(AtomicUsize::new(0));
    let mut pipeline = pipeline(released.clone());
    pipeline.shutdown();
    pipeline.shutdown();
    assert!(!pipeline.is_active());
    assert!(matches!(
      pipeline.process_frame(&Frame::new(RgbImage::new(40, 30), 0, 0)),
      Err(PipelineError::Inactive)
    ));
    drop(pipeline);
    assert_eq!(released.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn handle_from_another_thread_stops_cycles() {
    let released = Arc::new(AtomicUsize::new(0));
    let mut pipeline = pipeline(released.clone());
    let handle = pipeline.shutdown_handle();
    std::thread::spawn(move || handle.shutdown()).join().unwrap();
    assert!(matches!(
      pipeline.process_frame(&Frame::new(RgbImage::new(40, 30), 0, 0)),
      Err(PipelineError::Inactive)
    ));
    // 标志已清除，但模型只在持有流水线的线程上释放
    assert_eq!(released.load(Ordering::SeqCst), 0);
    pipeline.shutdown();
    assert_eq!(released.load(Ordering::SeqCst), 1);
  }
}
