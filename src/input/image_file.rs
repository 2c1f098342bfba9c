// 该文件是 Kanjian （看见） 项目的一部分。
// src/input/image_file.rs - 图像文件输入
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

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  input::{FrameSource, InputError, SurfaceEvent},
  url_path, url_query,
};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("路径错误: {0}")]
  PathError(#[from] std::string::FromUtf8Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
  Closed,
  Open,
  Finished,
}

/// 把一张静态图片当作相机：打开后给出 `repeat` 次“帧已更新”，然后销毁表面
pub struct ImageFileInput {
  image: RgbImage,
  repeat: u64,
  emitted: u64,
  state: State,
  frame_index: u64,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  /// `image:///data/street.jpg?repeat=10`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemeMismatch);
    }

    let path = url_path(url)?;
    info!("读取图像文件: {}", path.display());
    let image = ImageReader::open(&path)?.with_guessed_format()?.decode()?;

    Ok(Self::new(image.to_rgb8(), url_query(url, "repeat").unwrap_or(1)))
  }
}

impl ImageFileInput {
  pub fn new(image: RgbImage, repeat: u64) -> Self {
    Self {
      image,
      repeat,
      emitted: 0,
      state: State::Closed,
      frame_index: 0,
    }
  }
}

impl Iterator for ImageFileInput {
  type Item = SurfaceEvent;

  fn next(&mut self) -> Option<Self::Item> {
    match self.state {
      State::Closed => {
        self.state = State::Open;
        Some(SurfaceEvent::Ready {
          width: self.image.width(),
          height: self.image.height(),
        })
      }
      State::Open if self.emitted < self.repeat => {
        self.emitted += 1;
        Some(SurfaceEvent::FrameUpdated)
      }
      State::Open => {
        self.state = State::Finished;
        Some(SurfaceEvent::Destroyed)
      }
      State::Finished => None,
    }
  }
}

impl FrameSource for ImageFileInput {
  fn snapshot(&mut self) -> Result<Frame, InputError> {
    if self.state != State::Open {
      return Err(InputError::NoFrame);
    }
    let frame = Frame::capture(self.image.clone(), self.frame_index);
    self.frame_index += 1;
    Ok(frame)
  }
}
