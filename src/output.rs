// 该文件是 Kanjian （看见） 项目的一部分。
// src/output.rs - 叠加结果与显示输出
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

use image::{Rgb, RgbImage};
use thiserror::Error;
use url::Url;

use crate::FromUrl;
#[cfg(any(
  feature = "save_image_file",
  feature = "directory_record",
  feature = "gstreamer_output"
))]
use crate::FromUrlWithScheme;

pub mod draw;
pub mod render;

pub use self::draw::PixelBox;
pub use self::render::{OverlayRenderer, RenderError};

/// 一个已绘制的检测框
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayBox {
  pub slot: usize,
  pub class_index: Option<usize>,
  pub label: String,
  pub score: f32,
  pub rect: PixelBox,
  pub color: Rgb<u8>,
}

impl OverlayBox {
  /// 标签文字："<标签> <分数>"，分数保留两位小数
  pub fn text(&self) -> String {
    format!("{} {:.2}", self.label, self.score)
  }
}

/// 标注后的帧，每个周期整体替换上一次的结果
#[derive(Debug, Clone)]
pub struct Overlay {
  pub image: RgbImage,
  pub boxes: Vec<OverlayBox>,
  pub frame_index: u64,
  /// 占位标签等非致命问题
  pub warnings: Vec<String>,
}

impl Overlay {
  pub fn is_empty(&self) -> bool {
    self.boxes.is_empty()
  }
}

/// 显示输出：每个周期接收一个 Overlay 并替换之前的显示内容
pub trait DisplaySink {
  type Error;
  fn present(&mut self, overlay: &Overlay) -> Result<(), Self::Error>;
}

#[cfg(feature = "save_image_file")]
mod save_image_file;
#[cfg(feature = "save_image_file")]
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{DetectionRecord, DirectoryRecordOutput, DirectoryRecordOutputError};

#[cfg(feature = "gstreamer_output")]
mod gstreamer_output;
#[cfg(feature = "gstreamer_output")]
pub use self::gstreamer_output::{GStreamerDisplayOutput, GStreamerDisplayOutputError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "save_image_file")]
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[cfg(feature = "directory_record")]
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordOutputError(#[from] DirectoryRecordOutputError),
  #[cfg(feature = "gstreamer_output")]
  #[error("GStreamer 显示输出错误: {0}")]
  GStreamerDisplayOutputError(#[from] GStreamerDisplayOutputError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum OutputWrapper {
  #[cfg(feature = "save_image_file")]
  SaveImageFileOutput(SaveImageFileOutput),
  #[cfg(feature = "directory_record")]
  DirectoryRecordOutput(DirectoryRecordOutput),
  #[cfg(feature = "gstreamer_output")]
  GStreamerDisplayOutput(GStreamerDisplayOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      #[cfg(feature = "save_image_file")]
      SaveImageFileOutput::SCHEME => {
        let output = SaveImageFileOutput::from_url(url)?;
        Ok(OutputWrapper::SaveImageFileOutput(output))
      }
      #[cfg(feature = "directory_record")]
      DirectoryRecordOutput::SCHEME => {
        let output = DirectoryRecordOutput::from_url(url)?;
        Ok(OutputWrapper::DirectoryRecordOutput(output))
      }
      #[cfg(feature = "gstreamer_output")]
      GStreamerDisplayOutput::SCHEME => {
        let output = GStreamerDisplayOutput::from_url(url)?;
        Ok(OutputWrapper::GStreamerDisplayOutput(output))
      }
      _ => Err(OutputError::SchemeMismatch),
    }
  }
}

impl DisplaySink for OutputWrapper {
  type Error = OutputError;

  fn present(&mut self, overlay: &Overlay) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFileOutput(output) => output.present(overlay).map_err(OutputError::from),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => {
        output.present(overlay).map_err(OutputError::from)
      }
      #[cfg(feature = "gstreamer_output")]
      OutputWrapper::GStreamerDisplayOutput(output) => {
        output.present(overlay).map_err(OutputError::from)
      }
      #[cfg(not(any(
        feature = "save_image_file",
        feature = "directory_record",
        feature = "gstreamer_output"
      )))]
      _ => {
        let _ = overlay;
        Err(OutputError::SchemeMismatch)
      }
    }
  }
}
