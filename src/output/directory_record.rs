// 该文件是 Kanjian （看见） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{DisplaySink, Overlay, OverlayBox},
  url_path,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("记录序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("路径错误: {0}")]
  PathError(#[from] std::string::FromUtf8Error),
}

/// 记录中类别的写法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
  /// 只保存叠加图像
  Draw,
  /// 叠加图像 + 以标签名记录的 JSON
  Name,
  /// 叠加图像 + 以类别索引记录的 JSON
  Id,
}

impl RecordKind {
  fn with(kind: Option<&str>) -> Self {
    match kind {
      None => RecordKind::Draw,
      Some("id") => RecordKind::Id,
      Some(_) => RecordKind::Name,
    }
  }
}

/// JSON 检测记录中的一项
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DetectionRecord {
  pub slot: usize,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub label: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub class_index: Option<usize>,
  pub score: f32,
  /// 像素坐标 [left, top, right, bottom]
  pub bbox: [f32; 4],
}

#[derive(Debug, Serialize)]
struct FrameRecord {
  frame_index: u64,
  width: u32,
  height: u32,
  detections: Vec<DetectionRecord>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  warnings: Vec<String>,
}

impl DetectionRecord {
  fn from_box(item: &OverlayBox, kind: RecordKind) -> Self {
    let (label, class_index) = match kind {
      RecordKind::Id => (None, item.class_index),
      _ => (Some(item.label.clone()), None),
    };
    Self {
      slot: item.slot,
      label,
      class_index,
      score: item.score,
      bbox: [item.rect.left, item.rect.top, item.rect.right, item.rect.bottom],
    }
  }
}

/// 按 年/月/日 目录保存叠加图像；默认只保存有检测结果的帧
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  kind: RecordKind,
  frame_counter: u16,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  /// `folder:///var/record?record=name&always`
  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let record = uri
      .query_pairs()
      .find(|(k, _)| k == "record")
      .map(|(_, v)| v.into_owned());
    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Ok(DirectoryRecordOutput {
      directory: url_path(uri)?,
      kind: RecordKind::with(record.as_deref()),
      frame_counter: 0,
      always,
    })
  }
}

impl DirectoryRecordOutput {
  fn frame_id(&mut self) -> u16 {
    self.frame_counter = self.frame_counter.wrapping_add(1);
    self.frame_counter
  }

  fn frame_path(&mut self, now: DateTime<Utc>) -> Result<PathBuf, std::io::Error> {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }

  fn record(&self, overlay: &Overlay, path: &Path) -> Result<(), DirectoryRecordOutputError> {
    let record = FrameRecord {
      frame_index: overlay.frame_index,
      width: overlay.image.width(),
      height: overlay.image.height(),
      detections: overlay
        .boxes
        .iter()
        .map(|b| DetectionRecord::from_box(b, self.kind))
        .collect(),
      warnings: overlay.warnings.clone(),
    };
    let file = std::fs::File::create(path.with_extension("json"))?;
    serde_json::to_writer_pretty(file, &record)?;
    Ok(())
  }
}

impl DisplaySink for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn present(&mut self, overlay: &Overlay) -> Result<(), Self::Error> {
    if !self.always && overlay.is_empty() {
      return Ok(());
    }

    let path = self.frame_path(Utc::now())?;
    overlay.image.save(&path)?;
    if self.kind != RecordKind::Draw {
      self.record(overlay, &path)?;
    }
    debug!("记录第 {} 帧到: {}", overlay.frame_index, path.display());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::output::PixelBox;
  use image::{Rgb, RgbImage};

  fn overlay(boxes: Vec<OverlayBox>) -> Overlay {
    Overlay {
      image: RgbImage::new(8, 8),
      boxes,
      frame_index: 3,
      warnings: Vec::new(),
    }
  }

  fn person() -> OverlayBox {
    OverlayBox {
      slot: 1,
      class_index: Some(1),
      label: "person".to_string(),
      score: 0.75,
      rect: PixelBox {
        left: 1.0,
        top: 2.0,
        right: 5.0,
        bottom: 6.0,
      },
      color: Rgb([0, 255, 0]),
    }
  }

  fn files(dir: &Path, ext: &str) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(d) = stack.pop() {
      for entry in std::fs::read_dir(d).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
          stack.push(path);
        } else if path.extension().is_some_and(|e| e == ext) {
          found.push(path);
        }
      }
    }
    found
  }

  #[test]
  fn empty_frames_are_skipped_unless_always() {
    let dir = tempfile::tempdir().unwrap();
    let url = url::Url::parse(&format!("folder://{}", dir.path().display())).unwrap();
    let mut output = DirectoryRecordOutput::from_url(&url).unwrap();
    output.present(&overlay(Vec::new())).unwrap();
    assert!(files(dir.path(), "png").is_empty());

    let url = url::Url::parse(&format!("folder://{}?always", dir.path().display())).unwrap();
    let mut output = DirectoryRecordOutput::from_url(&url).unwrap();
    output.present(&overlay(Vec::new())).unwrap();
    assert_eq!(files(dir.path(), "png").len(), 1);
  }

  #[test]
  fn record_by_name_writes_json() {
    let dir = tempfile::tempdir().unwrap();
    let url = url::Url::parse(&format!("folder://{}?record=name", dir.path().display())).unwrap();
    let mut output = DirectoryRecordOutput::from_url(&url).unwrap();
    output.present(&overlay(vec![person()])).unwrap();

    let json = files(dir.path(), "json");
    assert_eq!(json.len(), 1);
    let value: serde_json::Value =
      serde_json::from_str(&std::fs::read_to_string(&json[0]).unwrap()).unwrap();
    assert_eq!(value["frame_index"], 3);
    assert_eq!(value["detections"][0]["label"], "person");
    assert!(value["detections"][0].get("class_index").is_none());
    assert_eq!(value["detections"][0]["bbox"][2], 5.0);
  }

  #[test]
  fn record_by_id_writes_class_index() {
    let record = DetectionRecord::from_box(&person(), RecordKind::with(Some("id")));
    assert_eq!(record.class_index, Some(1));
    assert_eq!(record.label, None);
  }
}
