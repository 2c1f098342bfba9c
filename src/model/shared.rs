// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/shared.rs - 跨线程共享的检测器
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

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::warn;

use crate::{
  model::{Model, ModelError, RawDetections},
  tensor::{Tensor, TensorSpec},
};

/// 多个工作线程共用一个已加载模型时的包装，推理调用互斥执行
pub struct SharedModel<M> {
  inner: Arc<Mutex<M>>,
}

impl<M> Clone for SharedModel<M> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<M: Model> SharedModel<M> {
  pub fn new(model: M) -> Self {
    Self {
      inner: Arc::new(Mutex::new(model)),
    }
  }

  fn lock(&self) -> MutexGuard<'_, M> {
    // 推理线程 panic 后模型状态仍然可用，继续使用
    self.inner.lock().unwrap_or_else(|poisoned| {
      warn!("模型锁已中毒，继续使用");
      poisoned.into_inner()
    })
  }
}

impl<M: Model> Model for SharedModel<M> {
  fn input_spec(&self) -> TensorSpec {
    self.lock().input_spec()
  }

  fn infer(&mut self, tensor: Tensor) -> Result<RawDetections, ModelError> {
    self.lock().infer(tensor)
  }

  fn release(&mut self) {
    self.lock().release()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tensor::{TensorLayout, TensorType};
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::thread;

  struct Counting {
    busy: Arc<AtomicUsize>,
    overlaps: Arc<AtomicUsize>,
  }

  impl Model for Counting {
    fn input_spec(&self) -> TensorSpec {
      TensorSpec::square(1, TensorLayout::Nhwc, TensorType::UInt8)
    }

    fn infer(&mut self, _tensor: Tensor) -> Result<RawDetections, ModelError> {
      if self.busy.fetch_add(1, Ordering::SeqCst) != 0 {
        self.overlaps.fetch_add(1, Ordering::SeqCst);
      }
      thread::sleep(std::time::Duration::from_millis(1));
      self.busy.fetch_sub(1, Ordering::SeqCst);
      Ok(RawDetections::default())
    }

    fn release(&mut self) {}
  }

  #[test]
  fn inference_is_serialized_across_threads() {
    let overlaps = Arc::new(AtomicUsize::new(0));
    let shared = SharedModel::new(Counting {
      busy: Arc::new(AtomicUsize::new(0)),
      overlaps: Arc::clone(&overlaps),
    });

    let handles: Vec<_> = (0..4)
      .map(|_| {
        let mut model = shared.clone();
        thread::spawn(move || {
          for _ in 0..5 {
            let image = image::RgbImage::new(1, 1);
            let tensor = Tensor::from_rgb_image(&image, TensorLayout::Nhwc, TensorType::UInt8);
            model.infer(tensor).unwrap();
          }
        })
      })
      .collect();

    for handle in handles {
      handle.join().unwrap();
    }
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
  }
}
