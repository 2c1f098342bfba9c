// 该文件是 Kanjian （看见） 项目的一部分。
// src/output/draw.rs - 检测框与标签的绘制
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

use ab_glyph::{FontRef, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};

/// 线宽与帧高的比例
const STROKE_DIVISOR: f32 = 85.0;
/// 文字大小与帧高的比例
const TEXT_SIZE_DIVISOR: f32 = 15.0;

/// 像素坐标下的检测框 (left, top, right, bottom)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelBox {
  pub left: f32,
  pub top: f32,
  pub right: f32,
  pub bottom: f32,
}

impl PixelBox {
  pub fn width(&self) -> f32 {
    self.right - self.left
  }

  pub fn height(&self) -> f32 {
    self.bottom - self.top
  }
}

/// 线宽随帧高缩放，至少 1 像素
pub fn stroke_width(frame_height: u32) -> u32 {
  ((frame_height as f32 / STROKE_DIVISOR).round() as u32).max(1)
}

/// 文字像素高度随帧高缩放
pub fn text_scale(frame_height: u32) -> f32 {
  (frame_height as f32 / TEXT_SIZE_DIVISOR).max(1.0)
}

pub struct Draw {
  font: FontRef<'static>,
}

impl Default for Draw {
  fn default() -> Self {
    let font_data: &'static [u8] = include_bytes!("../../assets/DejaVuSans.ttf");
    let font = FontRef::try_from_slice(font_data).expect("无法加载嵌入的字体文件");
    Self { font }
  }
}

impl Draw {
  /// 不填充的矩形框，线条向框内加粗
  ///
  /// 超出图像的边先收到图像外一个线宽处，模型给出的极端坐标不会让整数运算溢出。
  pub fn draw_box(&self, image: &mut RgbImage, bbox: &PixelBox, color: Rgb<u8>, stroke: u32) {
    let margin = stroke as f32;
    let (width, height) = (image.width() as f32, image.height() as f32);
    let clamp_x = |v: f32| v.clamp(-margin, width + margin).round() as i32;
    let clamp_y = |v: f32| v.clamp(-margin, height + margin).round() as i32;
    let left = clamp_x(bbox.left);
    let top = clamp_y(bbox.top);
    let right = clamp_x(bbox.right);
    let bottom = clamp_y(bbox.bottom);

    for inset in 0..stroke as i32 {
      let w = right - left - 2 * inset;
      let h = bottom - top - 2 * inset;
      if w <= 0 || h <= 0 {
        break;
      }
      let rect = Rect::at(left + inset, top + inset).of_size(w as u32, h as u32);
      draw_hollow_rect_mut(image, rect, color);
    }
  }

  /// 在 (x, y) 上方绘制文字，文字底边贴住 y；超出顶部时下移到图像内
  pub fn draw_label(&self, image: &mut RgbImage, x: f32, y: f32, text: &str, color: Rgb<u8>, size: f32) {
    let scale = PxScale::from(size);
    let (_, text_height) = text_size(scale, &self.font, text);
    let x = x.clamp(0.0, image.width() as f32).round() as i32;
    let y = (y.clamp(0.0, image.height() as f32).round() as i32 - text_height as i32).max(0);
    draw_text_mut(image, color, x, y, scale, &self.font, text);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn stroke_scales_with_height() {
    assert_eq!(stroke_width(480), 6);
    assert_eq!(stroke_width(85), 1);
    assert_eq!(stroke_width(10), 1);
    assert_eq!(stroke_width(1080), 13);
  }

  #[test]
  fn text_scale_is_fifteenth_of_height() {
    assert_eq!(text_scale(480), 32.0);
    assert_eq!(text_scale(0), 1.0);
  }

  #[test]
  fn box_outline_is_drawn_inside_rect() {
    let mut image = RgbImage::new(20, 20);
    let red = Rgb([255, 0, 0]);
    let bbox = PixelBox {
      left: 2.0,
      top: 3.0,
      right: 12.0,
      bottom: 15.0,
    };
    Draw::default().draw_box(&mut image, &bbox, red, 2);

    assert_eq!(*image.get_pixel(2, 3), red);
    assert_eq!(*image.get_pixel(3, 4), red);
    assert_eq!(*image.get_pixel(11, 14), red);
    // 框内部保持原样
    assert_eq!(*image.get_pixel(7, 9), Rgb([0, 0, 0]));
    assert_eq!(*image.get_pixel(0, 0), Rgb([0, 0, 0]));
  }

  #[test]
  fn degenerate_box_is_skipped() {
    let mut image = RgbImage::new(10, 10);
    let bbox = PixelBox {
      left: 5.0,
      top: 5.0,
      right: 5.0,
      bottom: 8.0,
    };
    Draw::default().draw_box(&mut image, &bbox, Rgb([255, 255, 255]), 3);
    assert!(image.pixels().all(|p| *p == Rgb([0, 0, 0])));
  }

  #[test]
  fn extreme_coordinates_are_clamped() {
    let mut image = RgbImage::new(64, 48);
    let green = Rgb([0, 255, 0]);
    let bbox = PixelBox {
      left: -6.4e9,
      top: 0.0,
      right: f32::INFINITY,
      bottom: 48.0,
    };
    Draw::default().draw_box(&mut image, &bbox, green, 2);
    // 左右两边在图像外，只剩上下两条边
    assert_eq!(*image.get_pixel(30, 0), green);
    assert_eq!(*image.get_pixel(30, 47), green);
    assert_eq!(*image.get_pixel(0, 24), Rgb([0, 0, 0]));

    let nan = PixelBox {
      left: f32::NAN,
      top: f32::NEG_INFINITY,
      right: f32::NAN,
      bottom: f32::INFINITY,
    };
    Draw::default().draw_box(&mut image, &nan, green, 2);
    Draw::default().draw_label(&mut image, f32::NEG_INFINITY, f32::MAX, "x", green, 10.0);
  }

  #[test]
  fn label_near_top_stays_inside() {
    let mut image = RgbImage::new(200, 60);
    let white = Rgb([255, 255, 255]);
    Draw::default().draw_label(&mut image, 5.0, 0.0, "person 0.80", white, 20.0);
    assert!(image.pixels().any(|p| *p != Rgb([0, 0, 0])));
  }
}
