// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/replay.rs - 回放检测器
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

use std::path::PathBuf;

use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  config::MODEL_INPUT_SIZE,
  model::{Model, ModelError, RawDetections},
  tensor::{Tensor, TensorLayout, TensorSpec, TensorType},
  url_path,
};

/// 回放文件中的一帧模型输出
#[derive(Debug, Clone, Deserialize)]
pub struct ReplayFrame {
  pub locations: Vec<f32>,
  pub classes: Vec<f32>,
  pub scores: Vec<f32>,
}

/// 回放文件格式
///
/// ```json
/// {
///   "input_size": 300,
///   "layout": "nhwc",
///   "dtype": "u8",
///   "frames": [{ "locations": [0.1, 0.1, 0.5, 0.5], "classes": [1], "scores": [0.9] }]
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ReplayFile {
  #[serde(default = "default_input_size")]
  pub input_size: u32,
  #[serde(default)]
  pub layout: TensorLayout,
  #[serde(default)]
  pub dtype: TensorType,
  pub frames: Vec<ReplayFrame>,
}

fn default_input_size() -> u32 {
  MODEL_INPUT_SIZE
}

/// 按顺序循环回放预先录制的模型输出，不做真正的推理
pub struct ReplayModel {
  spec: TensorSpec,
  frames: Vec<RawDetections>,
  cursor: usize,
  released: bool,
}

impl ReplayModel {
  pub fn new(spec: TensorSpec, frames: Vec<RawDetections>) -> Result<Self, ModelError> {
    if frames.is_empty() {
      return Err(ModelError::ModelInvalid("回放文件中没有任何帧".to_string()));
    }
    Ok(Self {
      spec,
      frames,
      cursor: 0,
      released: false,
    })
  }

  pub fn from_file(file: ReplayFile) -> Result<Self, ModelError> {
    let spec = TensorSpec::square(file.input_size, file.layout, file.dtype);
    let frames = file
      .frames
      .into_iter()
      .map(|f| RawDetections::new(f.locations, f.classes, f.scores))
      .collect::<Result<Vec<_>, _>>()?;
    Self::new(spec, frames)
  }

  pub fn is_released(&self) -> bool {
    self.released
  }
}

impl Model for ReplayModel {
  fn input_spec(&self) -> TensorSpec {
    self.spec
  }

  fn infer(&mut self, tensor: Tensor) -> Result<RawDetections, ModelError> {
    if self.released {
      return Err(ModelError::Released);
    }
    tensor.ensure_spec(&self.spec)?;

    let output = self.frames[self.cursor].clone();
    self.cursor = (self.cursor + 1) % self.frames.len();
    Ok(output)
  }

  fn release(&mut self) {
    if !self.released {
      debug!("释放回放检测器");
      self.released = true;
    }
  }
}

pub struct ReplayModelBuilder {
  path: PathBuf,
}

impl FromUrlWithScheme for ReplayModelBuilder {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayModelBuilder {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::ModelPath(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }
    let path = url_path(url).map_err(|e| ModelError::ModelPath(e.to_string()))?;
    Ok(Self { path })
  }
}

impl ReplayModelBuilder {
  pub fn build(self) -> Result<ReplayModel, ModelError> {
    info!("加载回放文件: {}", self.path.display());
    let data = std::fs::read(&self.path)?;
    let file: ReplayFile = serde_json::from_slice(&data)?;
    debug!("回放帧数量: {}", file.frames.len());
    ReplayModel::from_file(file)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  fn spec() -> TensorSpec {
    TensorSpec::square(2, TensorLayout::Nhwc, TensorType::UInt8)
  }

  fn tensor() -> Tensor {
    Tensor::from_rgb_image(&image::RgbImage::new(2, 2), TensorLayout::Nhwc, TensorType::UInt8)
  }

  #[test]
  fn frames_are_replayed_in_a_cycle() {
    let a = RawDetections::new(vec![0.0; 4], vec![1.0], vec![0.9]).unwrap();
    let b = RawDetections::default();
    let mut model = ReplayModel::new(spec(), vec![a.clone(), b.clone()]).unwrap();
    assert_eq!(model.infer(tensor()).unwrap(), a);
    assert_eq!(model.infer(tensor()).unwrap(), b);
    assert_eq!(model.infer(tensor()).unwrap(), a);
  }

  #[test]
  fn mismatched_tensor_is_rejected() {
    let mut model = ReplayModel::new(spec(), vec![RawDetections::default()]).unwrap();
    let wrong = Tensor::from_rgb_image(&image::RgbImage::new(3, 3), TensorLayout::Nhwc, TensorType::UInt8);
    assert!(matches!(model.infer(wrong), Err(ModelError::TensorMismatch(_))));
  }

  #[test]
  fn released_model_refuses_inference() {
    let mut model = ReplayModel::new(spec(), vec![RawDetections::default()]).unwrap();
    model.release();
    model.release();
    assert!(model.is_released());
    assert!(matches!(model.infer(tensor()), Err(ModelError::Released)));
  }

  #[test]
  fn builder_loads_json_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
      file,
      r#"{{"input_size": 2, "dtype": "u8", "frames": [{{"locations": [0.1, 0.2, 0.3, 0.4], "classes": [2], "scores": [0.8]}}]}}"#
    )
    .unwrap();

    let url = Url::parse(&format!("replay://{}", file.path().display())).unwrap();
    let mut model = ReplayModelBuilder::from_url(&url).unwrap().build().unwrap();
    assert_eq!(model.input_spec(), spec());
    let output = model.infer(tensor()).unwrap();
    assert_eq!(output.scores(), &[0.8]);
  }

  #[test]
  fn malformed_frame_is_rejected() {
    let file: ReplayFile = serde_json::from_str(
      r#"{"frames": [{"locations": [0.1, 0.2, 0.3], "classes": [2], "scores": [0.8]}]}"#,
    )
    .unwrap();
    assert_eq!(file.input_size, MODEL_INPUT_SIZE);
    assert!(matches!(
      ReplayModel::from_file(file),
      Err(ModelError::MalformedOutput(_))
    ));
  }

  #[test]
  fn empty_replay_is_invalid() {
    assert!(matches!(
      ReplayModel::new(spec(), Vec::new()),
      Err(ModelError::ModelInvalid(_))
    ));
  }
}
