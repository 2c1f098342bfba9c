// 该文件是 Kanjian （看见） 项目的一部分。
// src/labels.rs - 类别标签表
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

use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("无法读取标签文件 {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("标签文件为空: {0}")]
  Empty(PathBuf),
}

/// 类别标签表：第 N 行即类别 N 的名称。
///
/// 启动时加载一次，之后只读，可以通过 `Arc` 在线程间共享。
/// 行号必须与类别索引对齐，所以中间的空行也会保留。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTable {
  labels: Box<[String]>,
}

impl LabelTable {
  pub fn load(path: impl AsRef<Path>) -> Result<Self, LabelError> {
    let path = path.as_ref();
    info!("加载标签文件: {}", path.display());
    let text = std::fs::read_to_string(path).map_err(|source| LabelError::Io {
      path: path.to_path_buf(),
      source,
    })?;

    let table = Self::parse(&text).ok_or_else(|| LabelError::Empty(path.to_path_buf()))?;
    debug!("标签数量: {}", table.len());
    Ok(table)
  }

  /// 解析标签文本，没有任何非空标签时返回 `None`
  pub fn parse(text: &str) -> Option<Self> {
    let mut labels: Vec<String> = text
      .lines()
      .map(|line| line.trim_end().to_string())
      .collect();

    while labels.last().is_some_and(|l| l.is_empty()) {
      labels.pop();
    }

    if labels.is_empty() {
      return None;
    }

    Some(Self {
      labels: labels.into_boxed_slice(),
    })
  }

  pub fn from_labels<I, S>(labels: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      labels: labels.into_iter().map(Into::into).collect(),
    }
  }

  pub fn len(&self) -> usize {
    self.labels.len()
  }

  pub fn is_empty(&self) -> bool {
    self.labels.is_empty()
  }

  pub fn get(&self, class_index: usize) -> Option<&str> {
    self.labels.get(class_index).map(String::as_str)
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.labels.iter().map(String::as_str)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn line_index_is_class_index() {
    let table = LabelTable::parse("???\nperson\r\nbicycle\n").unwrap();
    assert_eq!(table.len(), 3);
    assert_eq!(table.get(0), Some("???"));
    assert_eq!(table.get(1), Some("person"));
    assert_eq!(table.get(2), Some("bicycle"));
    assert_eq!(table.get(3), None);
  }

  #[test]
  fn inner_blank_lines_keep_alignment() {
    let table = LabelTable::parse("a\n\nc\n\n\n").unwrap();
    assert_eq!(table.len(), 3);
    assert_eq!(table.get(1), Some(""));
    assert_eq!(table.get(2), Some("c"));
  }

  #[test]
  fn empty_text_is_rejected() {
    assert!(LabelTable::parse("").is_none());
    assert!(LabelTable::parse("\n \n").is_none());
  }

  #[test]
  fn load_reads_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "background").unwrap();
    writeln!(file, "cat").unwrap();
    let table = LabelTable::load(file.path()).unwrap();
    assert_eq!(table.iter().collect::<Vec<_>>(), vec!["background", "cat"]);
  }

  #[test]
  fn missing_file_is_io_error() {
    let err = LabelTable::load("/nonexistent/labels.txt").unwrap_err();
    assert!(matches!(err, LabelError::Io { .. }));
  }

  #[test]
  fn empty_file_is_rejected() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let err = LabelTable::load(file.path()).unwrap_err();
    assert!(matches!(err, LabelError::Empty(_)));
  }
}
