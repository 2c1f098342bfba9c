// 该文件是 Kanjian （看见） 项目的一部分。
// src/model.rs - 检测模型
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

use crate::{
  FromUrl,
  config::NUM_COORDINATES,
  tensor::{Tensor, TensorError, TensorSpec},
};

/// 检测器：包装外部推理引擎
///
/// 实现者只负责三件事：一次性加载（由各自的 Builder 完成）、单次推理调用、
/// 关闭时释放资源。`infer` 需要 `&mut self`，同一个已加载的模型实例不能被
/// 并发调用；多线程场景请使用 [`SharedModel`]。
pub trait Model {
  /// 模型期望的输入张量格式
  fn input_spec(&self) -> TensorSpec;

  /// 执行一次推理，输出固定长度的候选数组
  fn infer(&mut self, tensor: Tensor) -> Result<RawDetections, ModelError>;

  /// 释放推理引擎资源；重复调用无副作用
  fn release(&mut self);
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型加载错误: {0}")]
  ModelLoad(#[from] std::io::Error),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("模型路径错误: {0}")]
  ModelPath(String),
  #[error("输入张量与模型约定不符: {0}")]
  TensorMismatch(#[from] TensorError),
  #[error("模型输出格式错误: {0}")]
  MalformedOutput(String),
  #[error("模型资源已释放")]
  Released,
  #[error("回放文件解析错误: {0}")]
  Replay(#[from] serde_json::Error),
  #[cfg(feature = "rknpu_backend")]
  #[error("RKNN 错误: {0}")]
  Rknn(rknpu::Error),
  #[cfg(feature = "onnx_backend")]
  #[error("ONNX Runtime 错误: {0}")]
  Ort(#[from] ort::Error),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

#[cfg(feature = "rknpu_backend")]
impl From<rknpu::Error> for ModelError {
  fn from(err: rknpu::Error) -> Self {
    ModelError::Rknn(err)
  }
}

/// 归一化检测框，模型输出顺序为 (top, left, bottom, right)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedBox {
  pub top: f32,
  pub left: f32,
  pub bottom: f32,
  pub right: f32,
}

impl NormalizedBox {
  pub fn from_locations(loc: &[f32]) -> Self {
    Self {
      top: loc[0],
      left: loc[1],
      bottom: loc[2],
      right: loc[3],
    }
  }
}

/// 单个候选检测：槽位、框、类别、分数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
  pub slot: usize,
  pub bbox: NormalizedBox,
  /// 模型给出的原始类别值（浮点）
  pub class_value: f32,
  pub score: f32,
}

impl Candidate {
  /// 类别索引；负数、带小数部分或非有限值没有对应索引
  pub fn class_index(&self) -> Option<usize> {
    if self.class_value.is_finite() && self.class_value >= 0.0 && self.class_value.fract() == 0.0 {
      Some(self.class_value as usize)
    } else {
      None
    }
  }
}

/// 模型原始输出：locations ×4N, classes ×N, scores ×N
///
/// 顺序即模型输出顺序，不按分数排序；每个槽位都存在，由调用方按阈值过滤。
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawDetections {
  locations: Vec<f32>,
  classes: Vec<f32>,
  scores: Vec<f32>,
}

impl RawDetections {
  pub fn new(locations: Vec<f32>, classes: Vec<f32>, scores: Vec<f32>) -> Result<Self, ModelError> {
    if locations.len() != NUM_COORDINATES * scores.len() {
      return Err(ModelError::MalformedOutput(format!(
        "坐标数量 {} 与分数数量 {} 不匹配",
        locations.len(),
        scores.len()
      )));
    }
    if classes.len() != scores.len() {
      return Err(ModelError::MalformedOutput(format!(
        "类别数量 {} 与分数数量 {} 不匹配",
        classes.len(),
        scores.len()
      )));
    }
    Ok(Self {
      locations,
      classes,
      scores,
    })
  }

  pub fn len(&self) -> usize {
    self.scores.len()
  }

  pub fn is_empty(&self) -> bool {
    self.scores.is_empty()
  }

  pub fn locations(&self) -> &[f32] {
    &self.locations
  }

  pub fn classes(&self) -> &[f32] {
    &self.classes
  }

  pub fn scores(&self) -> &[f32] {
    &self.scores
  }

  pub fn candidate(&self, slot: usize) -> Option<Candidate> {
    let score = *self.scores.get(slot)?;
    let x = slot * NUM_COORDINATES;
    Some(Candidate {
      slot,
      bbox: NormalizedBox::from_locations(&self.locations[x..x + NUM_COORDINATES]),
      class_value: self.classes[slot],
      score,
    })
  }

  pub fn candidates(&self) -> impl Iterator<Item = Candidate> + '_ {
    (0..self.len()).filter_map(|slot| self.candidate(slot))
  }
}

mod replay;
pub use self::replay::{ReplayModel, ReplayModelBuilder};

mod shared;
pub use self::shared::SharedModel;

#[cfg(feature = "rknpu_backend")]
mod ssd_rknn;
#[cfg(feature = "rknpu_backend")]
pub use self::ssd_rknn::{SsdRknn, SsdRknnBuilder};

#[cfg(feature = "onnx_backend")]
mod ssd_onnx;
#[cfg(feature = "onnx_backend")]
pub use self::ssd_onnx::{SsdOnnx, SsdOnnxBuilder};

/// 根据 URL 方案选择的检测后端
pub enum ModelWrapper {
  Replay(ReplayModel),
  #[cfg(feature = "rknpu_backend")]
  Rknn(SsdRknn),
  #[cfg(feature = "onnx_backend")]
  Onnx(SsdOnnx),
}

impl FromUrl for ModelWrapper {
  type Error = ModelError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    use crate::FromUrlWithScheme;

    if url.scheme() == ReplayModelBuilder::SCHEME {
      let model = ReplayModelBuilder::from_url(url)?.build()?;
      return Ok(ModelWrapper::Replay(model));
    }
    #[cfg(feature = "rknpu_backend")]
    {
      if url.scheme() == SsdRknnBuilder::SCHEME {
        let model = SsdRknnBuilder::from_url(url)?.build()?;
        return Ok(ModelWrapper::Rknn(model));
      }
    }
    #[cfg(feature = "onnx_backend")]
    {
      if url.scheme() == SsdOnnxBuilder::SCHEME {
        let model = SsdOnnxBuilder::from_url(url)?.build()?;
        return Ok(ModelWrapper::Onnx(model));
      }
    }
    Err(ModelError::SchemeMismatch)
  }
}

impl Model for ModelWrapper {
  fn input_spec(&self) -> TensorSpec {
    match self {
      ModelWrapper::Replay(model) => model.input_spec(),
      #[cfg(feature = "rknpu_backend")]
      ModelWrapper::Rknn(model) => model.input_spec(),
      #[cfg(feature = "onnx_backend")]
      ModelWrapper::Onnx(model) => model.input_spec(),
    }
  }

  fn infer(&mut self, tensor: Tensor) -> Result<RawDetections, ModelError> {
    match self {
      ModelWrapper::Replay(model) => model.infer(tensor),
      #[cfg(feature = "rknpu_backend")]
      ModelWrapper::Rknn(model) => model.infer(tensor),
      #[cfg(feature = "onnx_backend")]
      ModelWrapper::Onnx(model) => model.infer(tensor),
    }
  }

  fn release(&mut self) {
    match self {
      ModelWrapper::Replay(model) => model.release(),
      #[cfg(feature = "rknpu_backend")]
      ModelWrapper::Rknn(model) => model.release(),
      #[cfg(feature = "onnx_backend")]
      ModelWrapper::Onnx(model) => model.release(),
    }
  }
}
