// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/ssd_onnx.rs - ONNX Runtime 上的 SSD 检测器
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

use ort::{
  inputs,
  session::Session,
  value::TensorRef,
};
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  config::MODEL_INPUT_SIZE,
  model::{Model, ModelError, RawDetections},
  tensor::{RGB_CHANNELS, Tensor, TensorData, TensorLayout, TensorSpec, TensorType},
  url_path, url_query,
};

/// 输出张量的位置，默认按 (boxes, classes, scores) 排列
#[derive(Debug, Clone, Copy)]
struct OutputIndices {
  boxes: usize,
  classes: usize,
  scores: usize,
}

impl Default for OutputIndices {
  fn default() -> Self {
    Self {
      boxes: 0,
      classes: 1,
      scores: 2,
    }
  }
}

/// ONNX 导出的 SSD 模型
pub struct SsdOnnx {
  session: Option<Session>,
  spec: TensorSpec,
  outputs: OutputIndices,
}

pub struct SsdOnnxBuilder {
  model_path: PathBuf,
  spec: TensorSpec,
  outputs: OutputIndices,
}

impl FromUrlWithScheme for SsdOnnxBuilder {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for SsdOnnxBuilder {
  type Error = ModelError;

  /// `onnx:///models/ssd.onnx?size=300&dtype=f32&layout=nchw&boxes=0&classes=1&scores=2`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::ModelPath(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let size = url_query(url, "size").unwrap_or(MODEL_INPUT_SIZE);
    let dtype = match url_query::<String>(url, "dtype").as_deref() {
      None | Some("u8") => TensorType::UInt8,
      Some("f32") => TensorType::Float32,
      Some(other) => {
        return Err(ModelError::ModelPath(format!("不支持的输入类型: {}", other)));
      }
    };
    let layout = match url_query::<String>(url, "layout").as_deref() {
      None | Some("nhwc") => TensorLayout::Nhwc,
      Some("nchw") => TensorLayout::Nchw,
      Some(other) => {
        return Err(ModelError::ModelPath(format!("不支持的输入布局: {}", other)));
      }
    };

    let defaults = OutputIndices::default();
    Ok(SsdOnnxBuilder {
      model_path: url_path(url).map_err(|e| ModelError::ModelPath(e.to_string()))?,
      spec: TensorSpec::square(size, layout, dtype),
      outputs: OutputIndices {
        boxes: url_query(url, "boxes").unwrap_or(defaults.boxes),
        classes: url_query(url, "classes").unwrap_or(defaults.classes),
        scores: url_query(url, "scores").unwrap_or(defaults.scores),
      },
    })
  }
}

impl SsdOnnxBuilder {
  pub fn build(self) -> Result<SsdOnnx, ModelError> {
    info!("加载 ONNX 模型文件: {}", self.model_path.display());
    if !self.model_path.is_file() {
      return Err(ModelError::ModelLoad(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("找不到模型文件: {}", self.model_path.display()),
      )));
    }

    let session = Session::builder()?.commit_from_file(&self.model_path)?;
    debug!("模型输入格式: {}", self.spec);
    debug!("模型输出索引: {:?}", self.outputs);
    info!("模型加载完成");

    Ok(SsdOnnx {
      session: Some(session),
      spec: self.spec,
      outputs: self.outputs,
    })
  }
}

impl Model for SsdOnnx {
  fn input_spec(&self) -> TensorSpec {
    self.spec
  }

  fn infer(&mut self, tensor: Tensor) -> Result<RawDetections, ModelError> {
    let session = self.session.as_mut().ok_or(ModelError::Released)?;
    tensor.ensure_spec(&self.spec)?;

    let (w, h) = (self.spec.width as usize, self.spec.height as usize);
    let shape = match self.spec.layout {
      TensorLayout::Nhwc => [1usize, h, w, RGB_CHANNELS],
      TensorLayout::Nchw => [1usize, RGB_CHANNELS, h, w],
    };

    debug!("执行模型推理");
    let outputs = match tensor.data() {
      TensorData::UInt8(data) => {
        session.run(inputs![TensorRef::from_array_view((shape, &data[..]))?])?
      }
      TensorData::Float32(data) => {
        session.run(inputs![TensorRef::from_array_view((shape, &data[..]))?])?
      }
    };

    let extract = |idx: usize| -> Result<Vec<f32>, ModelError> {
      if idx >= outputs.len() {
        return Err(ModelError::MalformedOutput(format!(
          "模型只有 {} 个输出, 无法读取第 {} 个",
          outputs.len(),
          idx
        )));
      }
      let (_, data) = outputs[idx].try_extract_tensor::<f32>()?;
      Ok(data.to_vec())
    };

    let locations = extract(self.outputs.boxes)?;
    let classes = extract(self.outputs.classes)?;
    let scores = extract(self.outputs.scores)?;
    RawDetections::new(locations, classes, scores)
  }

  fn release(&mut self) {
    if self.session.take().is_some() {
      info!("释放 ONNX Runtime 会话");
    }
  }
}
