// 该文件是 Kanjian （看见） 项目的一部分。
// src/tensor.rs - 模型输入张量定义
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

use std::fmt;

use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const RGB_CHANNELS: usize = 3;

/// 张量内存布局，通道顺序固定为 RGB
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
  #[default]
  Nhwc,
  Nchw,
}

/// 张量元素类型
///
/// - `UInt8`: 0..=255 原始像素值
/// - `Float32`: 归一化到 0.0..=1.0
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorType {
  #[default]
  #[serde(alias = "u8")]
  UInt8,
  #[serde(alias = "f32")]
  Float32,
}

/// 预处理器与检测器之间约定的张量格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorSpec {
  pub width: u32,
  pub height: u32,
  pub layout: TensorLayout,
  pub dtype: TensorType,
}

impl TensorSpec {
  pub fn square(size: u32, layout: TensorLayout, dtype: TensorType) -> Self {
    Self {
      width: size,
      height: size,
      layout,
      dtype,
    }
  }

  /// 元素个数（单批次）
  pub fn len(&self) -> usize {
    RGB_CHANNELS * self.width as usize * self.height as usize
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl fmt::Display for TensorSpec {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let layout = match self.layout {
      TensorLayout::Nhwc => "NHWC",
      TensorLayout::Nchw => "NCHW",
    };
    let dtype = match self.dtype {
      TensorType::UInt8 => "u8[0,255]",
      TensorType::Float32 => "f32[0,1]",
    };
    write!(f, "{}x{} {} {}", self.width, self.height, layout, dtype)
  }
}

#[derive(Error, Debug, PartialEq)]
pub enum TensorError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
  #[error("数据类型不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  TypeMismatch {
    expected: TensorType,
    actual: TensorType,
  },
  #[error("张量格式不匹配: 期望 {expected}, 实际 {actual}")]
  SpecMismatch {
    expected: TensorSpec,
    actual: TensorSpec,
  },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
  UInt8(Box<[u8]>),
  Float32(Box<[f32]>),
}

impl TensorData {
  fn dtype(&self) -> TensorType {
    match self {
      TensorData::UInt8(_) => TensorType::UInt8,
      TensorData::Float32(_) => TensorType::Float32,
    }
  }

  fn len(&self) -> usize {
    match self {
      TensorData::UInt8(data) => data.len(),
      TensorData::Float32(data) => data.len(),
    }
  }
}

/// 单帧模型输入，交给检测器后即被消耗
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
  spec: TensorSpec,
  data: TensorData,
}

impl Tensor {
  pub fn new(spec: TensorSpec, data: TensorData) -> Result<Self, TensorError> {
    if data.dtype() != spec.dtype {
      return Err(TensorError::TypeMismatch {
        expected: spec.dtype,
        actual: data.dtype(),
      });
    }
    if data.len() != spec.len() {
      return Err(TensorError::LengthMismatch {
        expected: spec.len(),
        actual: data.len(),
      });
    }
    Ok(Self { spec, data })
  }

  /// 按给定布局与类型从 RGB 图像构造，尺寸取图像本身
  pub fn from_rgb_image(image: &RgbImage, layout: TensorLayout, dtype: TensorType) -> Self {
    let (width, height) = image.dimensions();
    let spec = TensorSpec {
      width,
      height,
      layout,
      dtype,
    };

    let hwc = image.as_raw();
    let ordered: Vec<u8> = match layout {
      TensorLayout::Nhwc => hwc.clone(),
      TensorLayout::Nchw => {
        let plane = (width * height) as usize;
        let mut data = vec![0u8; plane * RGB_CHANNELS];
        for (idx, pixel) in hwc.chunks_exact(RGB_CHANNELS).enumerate() {
          data[idx] = pixel[0];
          data[plane + idx] = pixel[1];
          data[2 * plane + idx] = pixel[2];
        }
        data
      }
    };

    let data = match dtype {
      TensorType::UInt8 => TensorData::UInt8(ordered.into_boxed_slice()),
      TensorType::Float32 => TensorData::Float32(
        ordered
          .into_iter()
          .map(|v| v as f32 / 255.0)
          .collect::<Vec<_>>()
          .into_boxed_slice(),
      ),
    };

    Self { spec, data }
  }

  pub fn spec(&self) -> &TensorSpec {
    &self.spec
  }

  pub fn as_u8(&self) -> Option<&[u8]> {
    match &self.data {
      TensorData::UInt8(data) => Some(data),
      TensorData::Float32(_) => None,
    }
  }

  pub fn as_f32(&self) -> Option<&[f32]> {
    match &self.data {
      TensorData::Float32(data) => Some(data),
      TensorData::UInt8(_) => None,
    }
  }

  pub fn data(&self) -> &TensorData {
    &self.data
  }

  /// 检查张量是否符合检测器声明的输入格式
  pub fn ensure_spec(&self, expected: &TensorSpec) -> Result<(), TensorError> {
    if self.spec != *expected {
      return Err(TensorError::SpecMismatch {
        expected: *expected,
        actual: self.spec,
      });
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  fn two_by_one() -> RgbImage {
    let mut image = RgbImage::new(2, 1);
    image.put_pixel(0, 0, Rgb([1, 2, 3]));
    image.put_pixel(1, 0, Rgb([4, 5, 255]));
    image
  }

  #[test]
  fn nhwc_keeps_interleaved_order() {
    let tensor = Tensor::from_rgb_image(&two_by_one(), TensorLayout::Nhwc, TensorType::UInt8);
    assert_eq!(tensor.as_u8().unwrap(), &[1, 2, 3, 4, 5, 255]);
  }

  #[test]
  fn nchw_splits_planes() {
    let tensor = Tensor::from_rgb_image(&two_by_one(), TensorLayout::Nchw, TensorType::UInt8);
    assert_eq!(tensor.as_u8().unwrap(), &[1, 4, 2, 5, 3, 255]);
  }

  #[test]
  fn float_tensor_is_normalized() {
    let tensor = Tensor::from_rgb_image(&two_by_one(), TensorLayout::Nhwc, TensorType::Float32);
    let data = tensor.as_f32().unwrap();
    assert_eq!(data[5], 1.0);
    assert!(data.iter().all(|v| (0.0..=1.0).contains(v)));
    assert!(tensor.as_u8().is_none());
  }

  #[test]
  fn new_checks_type_and_length() {
    let spec = TensorSpec::square(2, TensorLayout::Nhwc, TensorType::UInt8);
    assert!(Tensor::new(spec, TensorData::UInt8(vec![0; 12].into())).is_ok());
    assert_eq!(
      Tensor::new(spec, TensorData::UInt8(vec![0; 11].into())),
      Err(TensorError::LengthMismatch {
        expected: 12,
        actual: 11
      })
    );
    assert!(matches!(
      Tensor::new(spec, TensorData::Float32(vec![0.0; 12].into())),
      Err(TensorError::TypeMismatch { .. })
    ));
  }

  #[test]
  fn spec_mismatch_is_reported() {
    let tensor = Tensor::from_rgb_image(&two_by_one(), TensorLayout::Nhwc, TensorType::UInt8);
    let expected = TensorSpec::square(300, TensorLayout::Nhwc, TensorType::UInt8);
    assert!(matches!(
      tensor.ensure_spec(&expected),
      Err(TensorError::SpecMismatch { .. })
    ));
    assert!(tensor.ensure_spec(tensor.spec()).is_ok());
  }
}
