// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/ssd_rknn.rs - RKNPU 上的 SSD 检测器
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

use rknpu::{Context, InitFlags, TensorFormat, TensorType as RknnTensorType};
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  config::MODEL_INPUT_SIZE,
  model::{Model, ModelError, RawDetections},
  tensor::{Tensor, TensorLayout, TensorSpec, TensorType},
  url_path, url_query,
};

const SSD_NUM_INPUTS: u32 = 1;
/// locations, classes, scores；部分导出还带有第四个输出 num_detections
const SSD_MIN_OUTPUTS: u32 = 3;
const SSD_LOCATIONS_OUTPUT: usize = 0;
const SSD_CLASSES_OUTPUT: usize = 1;
const SSD_SCORES_OUTPUT: usize = 2;

/// 已在 NPU 上加载的 SSD 模型，输入为 u8 NHWC
pub struct SsdRknn {
  context: Option<Context>,
  spec: TensorSpec,
}

pub struct SsdRknnBuilder {
  model_path: PathBuf,
  input_size: u32,
  flags: InitFlags,
}

impl FromUrlWithScheme for SsdRknnBuilder {
  const SCHEME: &'static str = "rknn";
}

impl FromUrl for SsdRknnBuilder {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::ModelPath(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    Ok(SsdRknnBuilder {
      model_path: url_path(url).map_err(|e| ModelError::ModelPath(e.to_string()))?,
      input_size: url_query(url, "size").unwrap_or(MODEL_INPUT_SIZE),
      flags: InitFlags::default(),
    })
  }
}

impl SsdRknnBuilder {
  pub fn flags(mut self, flags: InitFlags) -> Self {
    self.flags = flags;
    self
  }

  pub fn build(self) -> Result<SsdRknn, ModelError> {
    info!("加载模型文件: {}", self.model_path.display());
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&model_data, self.flags)?;

    match context.sdk_version() {
      Ok(version) => {
        if let Ok(api_ver) = version.api_version() {
          debug!("模型 API 版本: {}", api_ver);
        }
        if let Ok(drv_ver) = version.driver_version() {
          debug!("模型驱动版本: {}", drv_ver);
        }
      }
      Err(e) => {
        error!("查询 SDK 版本失败: {}", e);
        return Err(ModelError::ModelInvalid(format!("无法查询 SDK 版本: {}", e)));
      }
    }

    let num_inputs = context
      .num_inputs()
      .map_err(|e| ModelError::ModelInvalid(format!("无法获取输入数量: {}", e)))?;
    let num_outputs = context
      .num_outputs()
      .map_err(|e| ModelError::ModelInvalid(format!("无法获取输出数量: {}", e)))?;
    debug!("模型输入数量: {}", num_inputs);
    debug!("模型输出数量: {}", num_outputs);

    if num_inputs != SSD_NUM_INPUTS {
      error!("预期模型输入数量为 {}, 实际为 {}", SSD_NUM_INPUTS, num_inputs);
      return Err(ModelError::ModelInvalid(format!(
        "预期模型输入数量为 {}, 实际为 {}",
        SSD_NUM_INPUTS, num_inputs
      )));
    }

    if num_outputs < SSD_MIN_OUTPUTS {
      error!("预期模型输出数量至少为 {}, 实际为 {}", SSD_MIN_OUTPUTS, num_outputs);
      return Err(ModelError::ModelInvalid(format!(
        "预期模型输出数量至少为 {}, 实际为 {}",
        SSD_MIN_OUTPUTS, num_outputs
      )));
    }

    info!("模型加载完成");
    Ok(SsdRknn {
      context: Some(context),
      spec: TensorSpec::square(self.input_size, TensorLayout::Nhwc, TensorType::UInt8),
    })
  }
}

impl Model for SsdRknn {
  fn input_spec(&self) -> TensorSpec {
    self.spec
  }

  fn infer(&mut self, tensor: Tensor) -> Result<RawDetections, ModelError> {
    let context = self.context.as_ref().ok_or(ModelError::Released)?;
    tensor.ensure_spec(&self.spec)?;
    let data = tensor
      .as_u8()
      .ok_or_else(|| ModelError::ModelInvalid("RKNN 后端只接受 u8 输入".to_string()))?;

    debug!("设置模型输入");
    context.set_input(0, data, TensorFormat::NHWC, RknnTensorType::UInt8)?;

    debug!("执行模型推理");
    context.run()?;

    debug!("获取模型输出");
    let output = context.get_outputs()?;
    let locations = output.get_f32(SSD_LOCATIONS_OUTPUT)?.to_vec();
    let classes = output.get_f32(SSD_CLASSES_OUTPUT)?.to_vec();
    let scores = output.get_f32(SSD_SCORES_OUTPUT)?.to_vec();

    RawDetections::new(locations, classes, scores)
  }

  fn release(&mut self) {
    if self.context.take().is_some() {
      info!("释放 RKNN 推理上下文");
    }
  }
}
