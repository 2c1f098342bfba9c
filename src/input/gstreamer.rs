// 该文件是 Kanjian （看见） 项目的一部分。
// src/input/gstreamer.rs - GStreamer 输入
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

//! # GStreamer 视频输入
//!
//! ## URL Scheme
//!
//! - `gst://camera/dev/video0?width=640&height=480&fps=30&rotate=90`
//! - `gst://file/path/to/video.mp4?aspect=4:3`
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! 管道末端统一转换为 RGB，由 appsink 取帧；appsink 只保留最新的两帧，
//! 处理跟不上时旧帧被丢弃。

use std::collections::VecDeque;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  input::{FrameSource, InputError, OpenFailure, RetryPolicy, SurfaceEvent, retry_open},
  url_query,
};

#[derive(Error, Debug)]
pub enum GStreamerInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("GStreamer 错误: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer 布尔操作错误: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("无法获取 appsink 元素")]
  AppSinkNotFound,
  #[error("无法转换元素为 appsink")]
  AppSinkConversionFailed,
  #[error("无法从 caps 获取视频信息")]
  VideoInfoError,
  #[error("不支持的视频格式")]
  UnsupportedFormat,
  #[error("管道错误: {0}")]
  PipelineError(String),
  #[error("缓冲区大小不匹配: 期望 {expected} 字节, 实际 {actual} 字节")]
  BufferSizeMismatch { expected: usize, actual: usize },
  #[error("状态改变错误: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FPS: u32 = 15;

#[derive(Debug, Clone, PartialEq)]
enum PipelineItem {
  FileSource(String),
  CameraSource {
    camera: String,
    io_mode: Option<u32>,
    format: Option<String>,
    width: u32,
    height: u32,
    fps: u32,
  },
  AspectRatio {
    ratio: (u32, u32),
  },
  VideoFlip {
    method: u32,
  },
  TargetFormat {
    format: String,
  },
}

impl PipelineItem {
  fn to_pipeline(&self) -> String {
    match self {
      PipelineItem::FileSource(path) => format!("filesrc location={} ! decodebin", path),
      PipelineItem::CameraSource {
        camera,
        io_mode,
        format,
        width,
        height,
        fps,
      } => {
        let io_mode = io_mode
          .map(|mode| format!(" io-mode={}", mode))
          .unwrap_or_default();
        let format = format
          .as_ref()
          .map(|f| format!("format={},", f))
          .unwrap_or_default();
        format!(
          "v4l2src device={}{} ! video/x-raw,{}width={},height={},framerate={}/1",
          camera, io_mode, format, width, height, fps
        )
      }
      PipelineItem::AspectRatio { ratio } => {
        format!("aspectratiocrop aspect-ratio={}/{}", ratio.0, ratio.1)
      }
      PipelineItem::VideoFlip { method } => format!("videoflip method={}", method),
      PipelineItem::TargetFormat { format } => {
        format!("videoconvert ! video/x-raw,format={}", format)
      }
    }
  }
}

/// GStreamer 输入管道构建器
pub struct GStreamerInputPipelineBuilder {
  items: Vec<PipelineItem>,
  retry: RetryPolicy,
  is_camera: bool,
}

impl FromUrlWithScheme for GStreamerInputPipelineBuilder {
  const SCHEME: &'static str = "gst";
}

impl FromUrl for GStreamerInputPipelineBuilder {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(GStreamerInputError::SchemeMismatch);
    }

    let mut builder = match url.host_str() {
      Some("camera") => Self::camera(
        url.path(),
        url_query(url, "io-mode"),
        url_query(url, "format"),
        url_query(url, "width").unwrap_or(DEFAULT_WIDTH),
        url_query(url, "height").unwrap_or(DEFAULT_HEIGHT),
        url_query(url, "fps").unwrap_or(DEFAULT_FPS),
      ),
      Some("file") => Self::file(url.path()),
      _ => return Err(GStreamerInputError::SchemeMismatch),
    };

    if let Some(ratio) = url_query::<String>(url, "aspect").as_deref().and_then(parse_ratio) {
      builder.items.push(PipelineItem::AspectRatio { ratio });
    }
    if let Some(method) = url_query::<String>(url, "rotate").as_deref().and_then(video_flip) {
      builder.items.push(PipelineItem::VideoFlip { method });
    }
    Ok(builder)
  }
}

fn parse_ratio(ratio: &str) -> Option<(u32, u32)> {
  let (w, h) = ratio.split_once(':')?;
  let ratio = (w.parse().ok()?, h.parse().ok()?);
  (ratio.0 > 0 && ratio.1 > 0).then_some(ratio)
}

fn video_flip(rotate: &str) -> Option<u32> {
  match rotate {
    "0" => None,
    "90" => Some(1),
    "180" => Some(2),
    "270" => Some(3),
    other => {
      warn!("忽略不支持的旋转角度: {}", other);
      None
    }
  }
}

impl GStreamerInputPipelineBuilder {
  pub fn camera(
    device: &str,
    io_mode: Option<u32>,
    format: Option<String>,
    width: u32,
    height: u32,
    fps: u32,
  ) -> Self {
    Self {
      items: vec![PipelineItem::CameraSource {
        camera: device.to_string(),
        io_mode,
        format,
        width,
        height,
        fps,
      }],
      retry: RetryPolicy::default(),
      is_camera: true,
    }
  }

  pub fn file(path: &str) -> Self {
    Self {
      items: vec![PipelineItem::FileSource(path.to_string())],
      retry: RetryPolicy::default(),
      is_camera: false,
    }
  }

  pub fn retry(mut self, policy: RetryPolicy) -> Self {
    self.retry = policy;
    self
  }

  pub fn description(&self) -> String {
    let basic = self
      .items
      .iter()
      .chain(std::iter::once(&PipelineItem::TargetFormat {
        format: "RGB".to_string(),
      }))
      .map(PipelineItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");
    format!("{} ! appsink max-buffers=2 drop=true name=sink", basic)
  }

  fn launch(description: &str) -> Result<(gst::Pipeline, gst_app::AppSink), GStreamerInputError> {
    let pipeline = gst::parse::launch(description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("无法创建管道".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    if let Err(e) = pipeline.set_state(gst::State::Playing) {
      let _ = pipeline.set_state(gst::State::Null);
      return Err(e.into());
    }
    Ok((pipeline, appsink))
  }

  pub fn build(self) -> Result<GStreamerInput, InputError> {
    gst::init().map_err(GStreamerInputError::from)?;

    let description = self.description();
    info!("GStreamer 管道描述: {}", description);

    // 文件源不存在时重试没有意义
    let policy = if self.is_camera {
      self.retry
    } else {
      RetryPolicy::new(1, self.retry.initial_delay)
    };
    let (pipeline, appsink) = retry_open(&policy, "GStreamer 管道", |_| {
      Self::launch(&description).map_err(|e| match e {
        GStreamerInputError::GStreamerError(_) => OpenFailure::Fatal(e),
        other => OpenFailure::Transient(other),
      })
    })?;

    Ok(GStreamerInput {
      pipeline,
      appsink,
      pending: VecDeque::new(),
      latest: None,
      dimensions: None,
      finished: false,
      frame_index: 0,
    })
  }
}

/// GStreamer 视频帧源
///
/// 第一帧到达时才知道帧尺寸，所以“表面可用”在第一帧之前发出。
pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  pending: VecDeque<SurfaceEvent>,
  latest: Option<gst::Sample>,
  dimensions: Option<(u32, u32)>,
  finished: bool,
  frame_index: u64,
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("停止 GStreamer 管道失败: {}", e);
    }
  }
}

fn sample_dimensions(sample: &gst::Sample) -> Option<(u32, u32)> {
  let info = gst_video::VideoInfo::from_caps(sample.caps()?).ok()?;
  Some((info.width(), info.height()))
}

impl Iterator for GStreamerInput {
  type Item = SurfaceEvent;

  fn next(&mut self) -> Option<Self::Item> {
    if let Some(event) = self.pending.pop_front() {
      return Some(event);
    }
    if self.finished {
      return None;
    }

    let sample = match self.appsink.pull_sample() {
      Ok(sample) => sample,
      Err(e) => {
        info!("GStreamer 输入结束: {}", e);
        self.finished = true;
        self.latest = None;
        return Some(SurfaceEvent::Destroyed);
      }
    };

    if let Some((width, height)) = sample_dimensions(&sample) {
      match self.dimensions {
        None => self.pending.push_back(SurfaceEvent::Ready { width, height }),
        Some(previous) if previous != (width, height) => {
          debug!("帧尺寸变化: {:?} -> {}x{}", previous, width, height);
          self.pending.push_back(SurfaceEvent::Resized { width, height });
        }
        Some(_) => {}
      }
      self.dimensions = Some((width, height));
    }

    self.latest = Some(sample);
    self.pending.push_back(SurfaceEvent::FrameUpdated);
    self.pending.pop_front()
  }
}

impl FrameSource for GStreamerInput {
  fn snapshot(&mut self) -> Result<Frame, InputError> {
    let sample = self.latest.take().ok_or(InputError::NoFrame)?;
    let image = convert_sample(&sample)?;
    let frame = Frame::capture(image, self.frame_index);
    self.frame_index += 1;
    Ok(frame)
  }
}

fn convert_sample(sample: &gst::Sample) -> Result<RgbImage, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有缓冲区".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有 caps".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;
  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;

  let map = buffer
    .map_readable()
    .map_err(|e| GStreamerInputError::PipelineError(format!("无法映射缓冲区: {}", e)))?;
  let data = map.as_slice();

  let expected = stride * (height.saturating_sub(1)) + width * 3;
  if data.len() < expected {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected,
      actual: data.len(),
    });
  }

  let swap = match video_info.format() {
    gst_video::VideoFormat::Rgb => false,
    gst_video::VideoFormat::Bgr => true,
    _ => return Err(GStreamerInputError::UnsupportedFormat),
  };

  // 行尾可能有对齐填充，逐行拷贝
  let mut rgb = Vec::with_capacity(width * height * 3);
  for row in 0..height {
    let line = &data[row * stride..row * stride + width * 3];
    if swap {
      for px in line.chunks_exact(3) {
        rgb.extend_from_slice(&[px[2], px[1], px[0]]);
      }
    } else {
      rgb.extend_from_slice(line);
    }
  }

  RgbImage::from_raw(width as u32, height as u32, rgb).ok_or(
    GStreamerInputError::BufferSizeMismatch {
      expected: width * height * 3,
      actual: data.len(),
    },
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn camera_url_builds_v4l2src_pipeline() {
    let url = Url::parse("gst://camera/dev/video1?width=320&height=240&fps=30&rotate=180").unwrap();
    let desc = GStreamerInputPipelineBuilder::from_url(&url).unwrap().description();
    assert!(desc.starts_with(
      "v4l2src device=/dev/video1 ! video/x-raw,width=320,height=240,framerate=30/1"
    ));
    assert!(desc.contains("videoflip method=2"));
    assert!(desc.ends_with("videoconvert ! video/x-raw,format=RGB ! appsink max-buffers=2 drop=true name=sink"));
  }

  #[test]
  fn file_url_builds_decodebin_pipeline() {
    let url = Url::parse("gst://file/tmp/clip.mp4?aspect=4:3").unwrap();
    let desc = GStreamerInputPipelineBuilder::from_url(&url).unwrap().description();
    assert!(desc.starts_with("filesrc location=/tmp/clip.mp4 ! decodebin"));
    assert!(desc.contains("aspectratiocrop aspect-ratio=4/3"));
  }

  #[test]
  fn unknown_host_is_rejected() {
    let url = Url::parse("gst://network/stream").unwrap();
    assert!(matches!(
      GStreamerInputPipelineBuilder::from_url(&url),
      Err(GStreamerInputError::SchemeMismatch)
    ));
  }

  #[test]
  fn ratio_and_rotation_parsing() {
    assert_eq!(parse_ratio("16:9"), Some((16, 9)));
    assert_eq!(parse_ratio("0:9"), None);
    assert_eq!(parse_ratio("wide"), None);
    assert_eq!(video_flip("90"), Some(1));
    assert_eq!(video_flip("0"), None);
    assert_eq!(video_flip("45"), None);
  }
}
