// 该文件是 Kanjian （看见） 项目的一部分。
// src/output/gstreamer_output.rs - GStreamer 屏幕显示与视频文件输出
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

//! # GStreamer 显示输出
//!
//! ## URL Scheme
//!
//! - `gstdisplay://auto`：在窗口中实时显示（`autovideosink`）
//! - `gstdisplay:///path/out.mp4?fps=30`：编码保存为视频文件，按扩展名选择
//!   MP4 / MKV / AVI / WebM
//!
//! appsrc 的 caps 在第一帧到达时按帧尺寸设置，之后尺寸变化时重新设置。

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{DisplaySink, Overlay},
  url_path, url_query,
};

#[derive(Error, Debug)]
pub enum GStreamerDisplayOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("GStreamer 错误: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer 布尔操作错误: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("无法获取 appsrc 元素")]
  AppSrcNotFound,
  #[error("无法转换元素为 appsrc")]
  AppSrcConversionFailed,
  #[error("管道错误: {0}")]
  PipelineError(String),
  #[error("状态改变错误: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("路径错误: {0}")]
  PathError(#[from] std::string::FromUtf8Error),
}

const DEFAULT_FPS: i32 = 30;

fn pipeline_description(url: &Url) -> Result<String, GStreamerDisplayOutputError> {
  if url.host_str() == Some("auto") && (url.path().is_empty() || url.path() == "/") {
    return Ok("appsrc name=src is-live=true ! videoconvert ! autovideosink sync=false".to_string());
  }

  let path = url_path(url)?;
  let location = path.display();
  let ext = path
    .extension()
    .and_then(|e| e.to_str())
    .unwrap_or_default()
    .to_ascii_lowercase();
  let desc = match ext.as_str() {
    "mkv" => format!(
      "appsrc name=src ! videoconvert ! video/x-raw,format=I420 ! x264enc speed-preset=fast ! h264parse ! matroskamux ! filesink location={}",
      location
    ),
    "avi" => format!(
      "appsrc name=src ! videoconvert ! video/x-raw,format=I420 ! x264enc ! avimux ! filesink location={}",
      location
    ),
    "webm" => format!(
      "appsrc name=src ! videoconvert ! vp8enc ! webmmux ! filesink location={}",
      location
    ),
    _ => format!(
      "appsrc name=src ! videoconvert ! video/x-raw,format=I420 ! x264enc speed-preset=fast tune=zerolatency ! h264parse ! mp4mux ! filesink location={}",
      location
    ),
  };
  Ok(desc)
}

pub struct GStreamerDisplayOutput {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  fps: i32,
  frame_count: u64,
  dimensions: Option<(u32, u32)>,
}

impl FromUrlWithScheme for GStreamerDisplayOutput {
  const SCHEME: &'static str = "gstdisplay";
}

impl FromUrl for GStreamerDisplayOutput {
  type Error = GStreamerDisplayOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(GStreamerDisplayOutputError::SchemeMismatch);
    }

    gst::init()?;

    let fps = url_query(url, "fps").unwrap_or(DEFAULT_FPS).max(1);
    let pipeline_desc = pipeline_description(url)?;
    info!("创建显示输出管道: {}", pipeline_desc);

    let pipeline = gst::parse::launch(&pipeline_desc)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerDisplayOutputError::PipelineError("无法创建管道".to_string()))?;

    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerDisplayOutputError::AppSrcNotFound)?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerDisplayOutputError::AppSrcConversionFailed)?;
    appsrc.set_format(gst::Format::Time);

    pipeline.set_state(gst::State::Playing)?;

    Ok(GStreamerDisplayOutput {
      pipeline,
      appsrc,
      fps,
      frame_count: 0,
      dimensions: None,
    })
  }
}

impl GStreamerDisplayOutput {
  fn ensure_caps(&mut self, width: u32, height: u32) {
    if self.dimensions == Some((width, height)) {
      return;
    }
    let caps = gst::Caps::builder("video/x-raw")
      .field("format", "RGB")
      .field("width", width as i32)
      .field("height", height as i32)
      .field("framerate", gst::Fraction::new(self.fps, 1))
      .build();
    self.appsrc.set_caps(Some(&caps));
    info!("显示输出尺寸: {}x{} @ {} fps", width, height, self.fps);
    self.dimensions = Some((width, height));
  }
}

impl DisplaySink for GStreamerDisplayOutput {
  type Error = GStreamerDisplayOutputError;

  fn present(&mut self, overlay: &Overlay) -> Result<(), Self::Error> {
    self.ensure_caps(overlay.image.width(), overlay.image.height());

    let frame_duration = 1_000_000_000 / self.fps as u64;
    let mut buffer = gst::Buffer::from_mut_slice(overlay.image.as_raw().clone());
    {
      let buffer_ref = buffer
        .get_mut()
        .ok_or_else(|| GStreamerDisplayOutputError::PipelineError("缓冲区不可写".to_string()))?;
      buffer_ref.set_pts(gst::ClockTime::from_nseconds(self.frame_count * frame_duration));
      buffer_ref.set_duration(gst::ClockTime::from_nseconds(frame_duration));
    }
    self.frame_count += 1;

    self
      .appsrc
      .push_buffer(buffer)
      .map_err(|e| GStreamerDisplayOutputError::PipelineError(format!("推送缓冲区失败: {:?}", e)))?;
    Ok(())
  }
}

impl Drop for GStreamerDisplayOutput {
  fn drop(&mut self) {
    let _ = self.appsrc.end_of_stream();

    // 等待 EOS 传递到 muxer，文件才能正确收尾
    if let Some(bus) = self.pipeline.bus() {
      let _ = bus.timed_pop_filtered(
        gst::ClockTime::from_seconds(2),
        &[gst::MessageType::Eos, gst::MessageType::Error],
      );
    }

    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("停止 GStreamer 显示输出管道失败: {}", e);
    }
    info!("显示输出关闭，共输出 {} 帧", self.frame_count);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn auto_uses_window_sink() {
    let url = Url::parse("gstdisplay://auto").unwrap();
    assert!(pipeline_description(&url).unwrap().contains("autovideosink"));
  }

  #[test]
  fn extension_selects_muxer() {
    let url = Url::parse("gstdisplay:///tmp/out.webm").unwrap();
    assert!(pipeline_description(&url).unwrap().contains("webmmux"));
    let url = Url::parse("gstdisplay:///tmp/out.mp4").unwrap();
    assert!(pipeline_description(&url).unwrap().contains("mp4mux"));
  }
}
