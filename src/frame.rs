// 该文件是 Kanjian （看见） 项目的一部分。
// src/frame.rs - 相机帧定义
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

use std::time::{SystemTime, UNIX_EPOCH};

use image::RgbImage;

/// 帧数据
///
/// 帧源在每次“帧已更新”通知之后给出的像素快照。
/// 流水线只在一个处理周期内借用它，不跨周期保留。
#[derive(Debug, Clone)]
pub struct Frame {
  image: RgbImage,
  index: u64,
  timestamp_ms: u64,
}

impl Frame {
  pub fn new(image: RgbImage, index: u64, timestamp_ms: u64) -> Self {
    Self {
      image,
      index,
      timestamp_ms,
    }
  }

  /// 用当前时间戳包装一张图像
  pub fn capture(image: RgbImage, index: u64) -> Self {
    Self::new(image, index, now_ms())
  }

  /// 从紧密排列的 RGB24 数据构造，长度不符时返回 `None`
  pub fn from_rgb_bytes(width: u32, height: u32, data: Vec<u8>, index: u64) -> Option<Self> {
    RgbImage::from_raw(width, height, data).map(|image| Self::capture(image, index))
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn image(&self) -> &RgbImage {
    &self.image
  }

  pub fn index(&self) -> u64 {
    self.index
  }

  pub fn timestamp_ms(&self) -> u64 {
    self.timestamp_ms
  }

  pub fn into_image(self) -> RgbImage {
    self.image
  }
}

pub(crate) fn now_ms() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_millis() as u64)
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rgb_bytes_must_match_dimensions() {
    assert!(Frame::from_rgb_bytes(2, 2, vec![0; 12], 0).is_some());
    assert!(Frame::from_rgb_bytes(2, 2, vec![0; 11], 0).is_none());
  }

  #[test]
  fn accessors_report_shape_and_index() {
    let frame = Frame::new(RgbImage::new(640, 480), 7, 1234);
    assert_eq!((frame.width(), frame.height()), (640, 480));
    assert_eq!(frame.index(), 7);
    assert_eq!(frame.timestamp_ms(), 1234);
  }
}
