// 该文件是 Kanjian （看见） 项目的一部分。
// src/preprocess.rs - 帧预处理
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

use std::borrow::Cow;

use image::imageops::{self, FilterType};
use thiserror::Error;
use tracing::debug;

use crate::{
  frame::Frame,
  tensor::{Tensor, TensorError, TensorSpec},
};

#[derive(Error, Debug, PartialEq)]
pub enum PreprocessError {
  #[error("帧尺寸 {width}x{height} 小于模型输入 {min_width}x{min_height}")]
  FrameTooSmall {
    width: u32,
    height: u32,
    min_width: u32,
    min_height: u32,
  },
  #[error("张量错误: {0}")]
  Tensor(#[from] TensorError),
}

/// 帧 → 模型输入张量
///
/// 双线性缩放到模型输入分辨率，再按约定的布局和元素类型排列，
/// 不做其他色彩校正。
#[derive(Debug, Clone, Copy)]
pub struct Preprocessor {
  spec: TensorSpec,
}

impl Preprocessor {
  pub fn new(spec: TensorSpec) -> Self {
    Self { spec }
  }

  pub fn spec(&self) -> &TensorSpec {
    &self.spec
  }

  pub fn process(&self, frame: &Frame) -> Result<Tensor, PreprocessError> {
    let (width, height) = (frame.width(), frame.height());
    if width < self.spec.width || height < self.spec.height {
      return Err(PreprocessError::FrameTooSmall {
        width,
        height,
        min_width: self.spec.width,
        min_height: self.spec.height,
      });
    }

    let resized = if (width, height) == (self.spec.width, self.spec.height) {
      Cow::Borrowed(frame.image())
    } else {
      debug!(
        "缩放帧 {}: {}x{} -> {}x{}",
        frame.index(),
        width,
        height,
        self.spec.width,
        self.spec.height
      );
      Cow::Owned(imageops::resize(
        frame.image(),
        self.spec.width,
        self.spec.height,
        FilterType::Triangle,
      ))
    };

    let tensor = Tensor::from_rgb_image(&resized, self.spec.layout, self.spec.dtype);
    tensor.ensure_spec(&self.spec)?;
    Ok(tensor)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tensor::{TensorLayout, TensorType};
  use image::{Rgb, RgbImage};

  fn frame(width: u32, height: u32, color: [u8; 3]) -> Frame {
    Frame::new(RgbImage::from_pixel(width, height, Rgb(color)), 0, 0)
  }

  #[test]
  fn output_matches_declared_spec() {
    let spec = TensorSpec::square(300, TensorLayout::Nhwc, TensorType::UInt8);
    let tensor = Preprocessor::new(spec).process(&frame(640, 480, [10, 20, 30])).unwrap();
    assert_eq!(tensor.spec(), &spec);
    assert_eq!(tensor.as_u8().unwrap().len(), 300 * 300 * 3);
  }

  #[test]
  fn uniform_color_survives_resize() {
    let spec = TensorSpec::square(4, TensorLayout::Nchw, TensorType::UInt8);
    let tensor = Preprocessor::new(spec).process(&frame(8, 6, [10, 20, 30])).unwrap();
    let data = tensor.as_u8().unwrap();
    assert!(data[..16].iter().all(|&v| v == 10));
    assert!(data[16..32].iter().all(|&v| v == 20));
    assert!(data[32..].iter().all(|&v| v == 30));
  }

  #[test]
  fn float_spec_is_normalized() {
    let spec = TensorSpec::square(2, TensorLayout::Nhwc, TensorType::Float32);
    let tensor = Preprocessor::new(spec).process(&frame(2, 2, [255, 0, 255])).unwrap();
    assert_eq!(&tensor.as_f32().unwrap()[..3], &[1.0, 0.0, 1.0]);
  }

  #[test]
  fn small_frame_is_rejected() {
    let spec = TensorSpec::square(300, TensorLayout::Nhwc, TensorType::UInt8);
    let err = Preprocessor::new(spec).process(&frame(320, 240, [0; 3])).unwrap_err();
    assert_eq!(
      err,
      PreprocessError::FrameTooSmall {
        width: 320,
        height: 240,
        min_width: 300,
        min_height: 300
      }
    );
  }
}
