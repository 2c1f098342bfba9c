// 该文件是 Kanjian （看见） 项目的一部分。
// src/input.rs - 帧源
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

use thiserror::Error;

use crate::{FromUrl, frame::Frame};

/// 显示表面/帧源的通知
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceEvent {
  /// 表面可用，帧源已打开
  Ready { width: u32, height: u32 },
  /// 帧尺寸变化
  Resized { width: u32, height: u32 },
  /// 有新帧可以读取
  FrameUpdated,
  /// 表面销毁，之后不会再有帧
  Destroyed,
}

/// 帧源：按顺序产生表面通知，并在“帧已更新”之后给出当前帧的快照
pub trait FrameSource: Iterator<Item = SurfaceEvent> {
  fn snapshot(&mut self) -> Result<Frame, InputError>;
}

mod retry;
pub use self::retry::{OpenFailure, RetryPolicy, retry_open, retry_open_with};

#[cfg(feature = "read_image_file")]
mod image_file;
#[cfg(feature = "read_image_file")]
pub use self::image_file::{ImageFileInput, ImageFileInputError};

#[cfg(feature = "v4l2_input")]
mod v4l2;
#[cfg(feature = "v4l2_input")]
pub use self::v4l2::{V4l2Input, V4l2InputBuilder, V4l2InputError};

#[cfg(feature = "gstreamer_input")]
mod gstreamer;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer::{GStreamerInput, GStreamerInputError, GStreamerInputPipelineBuilder};

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "read_image_file")]
  #[error("图像文件输入错误: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[cfg(feature = "v4l2_input")]
  #[error("V4L2 输入错误: {0}")]
  V4l2InputError(#[from] V4l2InputError),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer 输入错误: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
  #[error("相机权限被拒绝: {0}")]
  PermissionDenied(String),
  #[error("相机打开失败，不可重试: {0}")]
  OpenFatal(String),
  #[error("相机打开失败，已尝试 {attempts} 次: {last_error}")]
  OpenExhausted { attempts: u32, last_error: String },
  #[error("当前没有可读取的帧")]
  NoFrame,
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum InputWrapper {
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileInput),
  #[cfg(feature = "v4l2_input")]
  V4l2(V4l2Input),
  #[cfg(feature = "gstreamer_input")]
  GStreamerInput(GStreamerInput),
}

impl InputWrapper {
  /// 按 URL 方案打开帧源，相机类帧源按 `policy` 重试
  pub fn open(url: &url::Url, policy: &RetryPolicy) -> Result<Self, InputError> {
    #[cfg(feature = "v4l2_input")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == V4l2InputBuilder::SCHEME {
        let input = V4l2InputBuilder::from_url(url)?.retry(*policy).build()?;
        return Ok(InputWrapper::V4l2(input));
      }
    }
    #[cfg(feature = "gstreamer_input")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == GStreamerInputPipelineBuilder::SCHEME {
        let input = GStreamerInputPipelineBuilder::from_url(url)?
          .retry(*policy)
          .build()?;
        return Ok(InputWrapper::GStreamerInput(input));
      }
    }
    #[cfg(feature = "read_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ImageFileInput::SCHEME {
        let input = ImageFileInput::from_url(url)?;
        return Ok(InputWrapper::ReadImageFile(input));
      }
    }
    let _ = (url, policy);
    Err(InputError::SchemeMismatch)
  }
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    Self::open(url, &RetryPolicy::default())
  }
}

impl Iterator for InputWrapper {
  type Item = SurfaceEvent;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.next(),
      #[cfg(feature = "v4l2_input")]
      InputWrapper::V4l2(input) => input.next(),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input.next(),
      #[cfg(not(any(
        feature = "read_image_file",
        feature = "v4l2_input",
        feature = "gstreamer_input"
      )))]
      _ => None,
    }
  }
}

impl FrameSource for InputWrapper {
  fn snapshot(&mut self) -> Result<Frame, InputError> {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.snapshot(),
      #[cfg(feature = "v4l2_input")]
      InputWrapper::V4l2(input) => input.snapshot(),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input.snapshot(),
      #[cfg(not(any(
        feature = "read_image_file",
        feature = "v4l2_input",
        feature = "gstreamer_input"
      )))]
      _ => Err(InputError::NoFrame),
    }
  }
}
