// 该文件是 Kanjian （看见） 项目的一部分。
// src/output/render.rs - 后处理与叠加渲染
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

use image::Rgb;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
  config::{ColorPolicy, RenderConfig, UnknownClassPolicy},
  frame::Frame,
  labels::LabelTable,
  model::{Candidate, NormalizedBox, RawDetections},
  output::{
    Overlay, OverlayBox,
    draw::{Draw, PixelBox, stroke_width, text_scale},
  },
};

/// 调色板：蓝、绿、红、青、灰、黑、深灰、品红、黄
pub const PALETTE: [Rgb<u8>; 9] = [
  Rgb([0x00, 0x00, 0xFF]),
  Rgb([0x00, 0xFF, 0x00]),
  Rgb([0xFF, 0x00, 0x00]),
  Rgb([0x00, 0xFF, 0xFF]),
  Rgb([0x88, 0x88, 0x88]),
  Rgb([0x00, 0x00, 0x00]),
  Rgb([0x44, 0x44, 0x44]),
  Rgb([0xFF, 0x00, 0xFF]),
  Rgb([0xFF, 0xFF, 0x00]),
];

#[derive(Error, Debug, PartialEq)]
pub enum RenderError {
  #[error("槽位 {slot} 的类别值 {class_value} 超出标签表范围 (共 {label_count} 个标签)")]
  UnknownClass {
    slot: usize,
    class_value: f32,
    label_count: usize,
  },
}

/// 分数严格大于阈值才绘制
pub fn passes_threshold(score: f32, threshold: f32) -> bool {
  score > threshold
}

/// 归一化 (top, left, bottom, right) → 像素 (left*w, top*h, right*w, bottom*h)
pub fn denormalize(bbox: &NormalizedBox, width: u32, height: u32) -> PixelBox {
  let (w, h) = (width as f32, height as f32);
  PixelBox {
    left: bbox.left * w,
    top: bbox.top * h,
    right: bbox.right * w,
    bottom: bbox.bottom * h,
  }
}

/// 叠加渲染器
///
/// 不做非极大值抑制：调用方需保证模型输出的是少量已去重的候选，
/// 重叠的候选会各自绘制。渲染器不保存任何跨帧状态，相同输入得到
/// 逐像素相同的结果。
pub struct OverlayRenderer {
  config: RenderConfig,
  draw: Draw,
}

impl OverlayRenderer {
  pub fn new(config: RenderConfig) -> Self {
    Self {
      config,
      draw: Draw::default(),
    }
  }

  pub fn config(&self) -> &RenderConfig {
    &self.config
  }

  fn color(&self, candidate: &Candidate, class_index: Option<usize>) -> Rgb<u8> {
    let key = match self.config.color_policy {
      ColorPolicy::Slot => candidate.slot,
      ColorPolicy::Class => class_index.unwrap_or(candidate.slot),
    };
    PALETTE[key % PALETTE.len()]
  }

  /// 查找标签；超出范围时按配置返回错误或占位标签（第二项为警告）
  fn label(
    &self,
    candidate: &Candidate,
    labels: &LabelTable,
  ) -> Result<(String, Option<String>), RenderError> {
    if let Some(label) = candidate.class_index().and_then(|idx| labels.get(idx)) {
      return Ok((label.to_string(), None));
    }

    match self.config.unknown_class {
      UnknownClassPolicy::Reject => Err(RenderError::UnknownClass {
        slot: candidate.slot,
        class_value: candidate.class_value,
        label_count: labels.len(),
      }),
      UnknownClassPolicy::Placeholder => {
        let placeholder = match candidate.class_index() {
          Some(idx) => format!("class#{}", idx),
          None => format!("class#{}", candidate.class_value),
        };
        let message = format!(
          "槽位 {} 的类别值 {} 超出标签表范围 (共 {} 个标签)，使用占位标签",
          candidate.slot,
          candidate.class_value,
          labels.len()
        );
        warn!("{}", message);
        Ok((placeholder, Some(message)))
      }
    }
  }

  pub fn render(
    &self,
    frame: &Frame,
    detections: &RawDetections,
    labels: &LabelTable,
  ) -> Result<Overlay, RenderError> {
    let (width, height) = (frame.width(), frame.height());
    let stroke = stroke_width(height);
    let size = text_scale(height);

    let mut image = frame.image().clone();
    let mut boxes = Vec::new();
    let mut warnings = Vec::new();

    for candidate in detections.candidates() {
      if !passes_threshold(candidate.score, self.config.confidence_threshold) {
        continue;
      }

      let (label, warning) = self.label(&candidate, labels)?;
      warnings.extend(warning);

      let class_index = candidate.class_index();
      let rect = denormalize(&candidate.bbox, width, height);
      let color = self.color(&candidate, class_index);
      let overlay_box = OverlayBox {
        slot: candidate.slot,
        class_index,
        label,
        score: candidate.score,
        rect,
        color,
      };

      self.draw.draw_box(&mut image, &rect, color, stroke);
      self
        .draw
        .draw_label(&mut image, rect.left, rect.top, &overlay_box.text(), color, size);
      boxes.push(overlay_box);
    }

    debug!("帧 {}: 绘制 {} 个检测框", frame.index(), boxes.len());
    Ok(Overlay {
      image,
      boxes,
      frame_index: frame.index(),
      warnings,
    })
  }
}
