// 该文件是 Kanjian （看见） 项目的一部分。
// src/input/v4l2.rs - V4L2 摄像头输入
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

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;
use v4l::{
  Device, FourCC,
  buffer::Type,
  io::{mmap::Stream, traits::CaptureStream},
  video::Capture,
};

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  input::{FrameSource, InputError, OpenFailure, RetryPolicy, SurfaceEvent, retry_open},
  url_path, url_query,
};

const DEFAULT_DEVICE: &str = "/dev/video0";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const BUFFER_COUNT: u32 = 4;
/// 连续采集失败超过该次数即认为设备已断开
const MAX_CAPTURE_FAILURES: u32 = 5;

#[derive(Error, Debug)]
pub enum V4l2InputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("不支持的像素格式: {0}")]
  UnsupportedPixelFormat(String),
  #[error("帧数据长度不符: 期望 {expected}, 实际 {actual}")]
  BufferSizeMismatch { expected: usize, actual: usize },
  #[error("MJPEG 解码错误: {0}")]
  DecodeError(#[from] image::ImageError),
  #[error("路径错误: {0}")]
  PathError(#[from] std::string::FromUtf8Error),
}

/// 设备支持的像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelFormat {
  Mjpeg,
  Yuyv,
  Rgb24,
}

impl PixelFormat {
  fn from_fourcc(fourcc: FourCC) -> Result<Self, V4l2InputError> {
    match &fourcc.repr {
      b"MJPG" => Ok(PixelFormat::Mjpeg),
      b"YUYV" => Ok(PixelFormat::Yuyv),
      b"RGB3" => Ok(PixelFormat::Rgb24),
      _ => Err(V4l2InputError::UnsupportedPixelFormat(
        fourcc.str().unwrap_or("????").to_string(),
      )),
    }
  }

  fn fourcc(&self) -> FourCC {
    match self {
      PixelFormat::Mjpeg => FourCC::new(b"MJPG"),
      PixelFormat::Yuyv => FourCC::new(b"YUYV"),
      PixelFormat::Rgb24 => FourCC::new(b"RGB3"),
    }
  }
}

/// YUYV 4:2:2 → RGB24
fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, V4l2InputError> {
  let expected = (width * height * 2) as usize;
  if yuyv.len() < expected {
    return Err(V4l2InputError::BufferSizeMismatch {
      expected,
      actual: yuyv.len(),
    });
  }

  let mut rgb = Vec::with_capacity((width * height * 3) as usize);
  for chunk in yuyv[..expected].chunks_exact(4) {
    let u = chunk[1] as f32 - 128.0;
    let v = chunk[3] as f32 - 128.0;
    for y in [chunk[0] as f32, chunk[2] as f32] {
      let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
      let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
      let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
      rgb.extend_from_slice(&[r, g, b]);
    }
  }
  Ok(rgb)
}

fn decode(
  format: PixelFormat,
  data: &[u8],
  width: u32,
  height: u32,
) -> Result<RgbImage, V4l2InputError> {
  let rgb = match format {
    PixelFormat::Mjpeg => {
      return Ok(image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)?.to_rgb8());
    }
    PixelFormat::Yuyv => yuyv_to_rgb(data, width, height)?,
    PixelFormat::Rgb24 => data.to_vec(),
  };
  let actual = rgb.len();
  RgbImage::from_raw(width, height, rgb).ok_or(V4l2InputError::BufferSizeMismatch {
    expected: (width * height * 3) as usize,
    actual,
  })
}

pub struct V4l2InputBuilder {
  device_path: PathBuf,
  width: u32,
  height: u32,
  format: Option<PixelFormat>,
  retry: RetryPolicy,
}

impl FromUrlWithScheme for V4l2InputBuilder {
  const SCHEME: &'static str = "v4l2";
}

impl FromUrl for V4l2InputBuilder {
  type Error = V4l2InputError;

  /// `v4l2:///dev/video0?width=640&height=480&format=YUYV`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(V4l2InputError::SchemeMismatch);
    }

    let path = url_path(url)?;
    let device_path = if path.as_os_str().is_empty() || path.as_os_str() == "/" {
      PathBuf::from(DEFAULT_DEVICE)
    } else {
      path
    };

    let format = match url_query::<String>(url, "format") {
      Some(fourcc) => {
        let bytes: [u8; 4] = fourcc
          .as_bytes()
          .try_into()
          .map_err(|_| V4l2InputError::UnsupportedPixelFormat(fourcc.clone()))?;
        Some(PixelFormat::from_fourcc(FourCC::new(&bytes))?)
      }
      None => None,
    };

    Ok(V4l2InputBuilder {
      device_path,
      width: url_query(url, "width").unwrap_or(DEFAULT_WIDTH),
      height: url_query(url, "height").unwrap_or(DEFAULT_HEIGHT),
      format,
      retry: RetryPolicy::default(),
    })
  }
}

impl V4l2InputBuilder {
  pub fn retry(mut self, policy: RetryPolicy) -> Self {
    self.retry = policy;
    self
  }

  fn open_once(&self) -> Result<(Device, PixelFormat, u32, u32), OpenFailure<V4l2InputError>> {
    let device = Device::with_path(&self.device_path)
      .map_err(|e| OpenFailure::classify(e).map(V4l2InputError::from))?;

    let configure = || -> Result<(PixelFormat, u32, u32), V4l2InputError> {
      let mut format = device.format()?;
      format.width = self.width;
      format.height = self.height;
      if let Some(pixel) = self.format {
        format.fourcc = pixel.fourcc();
      }
      let format = device.set_format(&format)?;
      let pixel = PixelFormat::from_fourcc(format.fourcc)?;
      Ok((pixel, format.width, format.height))
    };

    // 格式不受支持属于配置错误，不会因为重试而改变
    let (pixel, width, height) = configure().map_err(|e| match e {
      V4l2InputError::UnsupportedPixelFormat(_) => OpenFailure::Fatal(e),
      other => OpenFailure::Transient(other),
    })?;
    Ok((device, pixel, width, height))
  }

  pub fn build(self) -> Result<V4l2Input, InputError> {
    let what = format!("V4L2 设备 {}", self.device_path.display());
    let (device, format, width, height) = retry_open(&self.retry, &what, |_| self.open_once())?;
    info!("打开 {}: {}x{} {:?}", what, width, height, format);

    let stream = Stream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)
      .map_err(V4l2InputError::from)?;

    Ok(V4l2Input {
      stream: Some(stream),
      _device: device,
      format,
      width,
      height,
      ready: false,
      latest: None,
      frame_index: 0,
      failures: 0,
    })
  }
}

/// V4L2 摄像头帧源；内核环形缓冲区满时由驱动丢弃旧帧
pub struct V4l2Input {
  stream: Option<Stream<'static>>,
  _device: Device,
  format: PixelFormat,
  width: u32,
  height: u32,
  ready: bool,
  latest: Option<Result<Vec<u8>, String>>,
  frame_index: u64,
  failures: u32,
}

impl Drop for V4l2Input {
  fn drop(&mut self) {
    // 先停止采集流，再关闭设备
    self.stream.take();
  }
}

impl Iterator for V4l2Input {
  type Item = SurfaceEvent;

  fn next(&mut self) -> Option<Self::Item> {
    if !self.ready {
      self.ready = true;
      return Some(SurfaceEvent::Ready {
        width: self.width,
        height: self.height,
      });
    }

    let stream = self.stream.as_mut()?;
    match CaptureStream::next(stream) {
      Ok((buffer, meta)) => {
        debug!("采集到第 {} 帧, {} 字节", meta.sequence, meta.bytesused);
        let used = (meta.bytesused as usize).min(buffer.len());
        let used = if used == 0 { buffer.len() } else { used };
        self.latest = Some(Ok(buffer[..used].to_vec()));
        self.failures = 0;
        Some(SurfaceEvent::FrameUpdated)
      }
      Err(e) => {
        self.failures += 1;
        warn!("采集帧失败 ({}/{}): {}", self.failures, MAX_CAPTURE_FAILURES, e);
        if self.failures >= MAX_CAPTURE_FAILURES {
          error!("V4L2 设备连续采集失败，停止输入");
          self.stream.take();
          return Some(SurfaceEvent::Destroyed);
        }
        self.latest = Some(Err(e.to_string()));
        Some(SurfaceEvent::FrameUpdated)
      }
    }
  }
}

impl FrameSource for V4l2Input {
  fn snapshot(&mut self) -> Result<Frame, InputError> {
    let data = match self.latest.take() {
      Some(Ok(data)) => data,
      Some(Err(e)) => {
        return Err(V4l2InputError::IoError(std::io::Error::other(e)).into());
      }
      None => return Err(InputError::NoFrame),
    };
    let image = decode(self.format, &data, self.width, self.height)?;
    let frame = Frame::capture(image, self.frame_index);
    self.frame_index += 1;
    Ok(frame)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn yuyv_gray_converts_to_gray() {
    // Y=128, U=V=128 → 中性灰
    let rgb = yuyv_to_rgb(&[128, 128, 128, 128], 2, 1).unwrap();
    assert_eq!(rgb, vec![128; 6]);
  }

  #[test]
  fn short_yuyv_buffer_is_rejected() {
    assert!(matches!(
      yuyv_to_rgb(&[0; 6], 2, 2),
      Err(V4l2InputError::BufferSizeMismatch { expected: 8, actual: 6 })
    ));
  }

  #[test]
  fn rgb24_is_passed_through() {
    let image = decode(PixelFormat::Rgb24, &[1, 2, 3, 4, 5, 6], 2, 1).unwrap();
    assert_eq!(image.as_raw(), &vec![1, 2, 3, 4, 5, 6]);
  }

  #[test]
  fn url_defaults_to_first_camera() {
    let builder = V4l2InputBuilder::from_url(&Url::parse("v4l2:///").unwrap()).unwrap();
    assert_eq!(builder.device_path, PathBuf::from(DEFAULT_DEVICE));
    assert_eq!((builder.width, builder.height), (DEFAULT_WIDTH, DEFAULT_HEIGHT));

    let builder =
      V4l2InputBuilder::from_url(&Url::parse("v4l2:///dev/video2?width=1280&height=720&format=MJPG").unwrap())
        .unwrap();
    assert_eq!(builder.device_path, PathBuf::from("/dev/video2"));
    assert_eq!(builder.format, Some(PixelFormat::Mjpeg));
  }

  #[test]
  fn unknown_fourcc_is_rejected() {
    let url = Url::parse("v4l2:///dev/video0?format=NV12").unwrap();
    assert!(matches!(
      V4l2InputBuilder::from_url(&url),
      Err(V4l2InputError::UnsupportedPixelFormat(_))
    ));
  }
}
