// 该文件是 Kanjian （看见） 项目的一部分。
// src/input/retry.rs - 相机打开重试
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

use std::{fmt::Display, thread, time::Duration};

use tracing::{error, info, warn};

use crate::input::InputError;

/// 相机打开的有界指数退避策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  /// 总尝试次数（含第一次）
  pub max_attempts: u32,
  pub initial_delay: Duration,
  pub max_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 5,
      initial_delay: Duration::from_millis(200),
      max_delay: Duration::from_secs(5),
    }
  }
}

impl RetryPolicy {
  pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
    Self {
      max_attempts: max_attempts.max(1),
      initial_delay,
      ..Self::default()
    }
  }

  /// 第 `attempt` 次失败（从 1 开始）之后的等待时间，逐次翻倍并封顶
  pub fn delay_for(&self, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(31);
    self
      .initial_delay
      .saturating_mul(1u32 << shift)
      .min(self.max_delay)
  }
}

/// 一次打开失败的性质
#[derive(Debug)]
pub enum OpenFailure<E> {
  /// 设备忙、暂时不存在等，可以重试
  Transient(E),
  /// 权限被拒绝
  Denied(E),
  /// 格式不支持、管道描述有误等，重试没有意义
  Fatal(E),
}

impl<E> OpenFailure<E> {
  pub fn map<F>(self, f: impl FnOnce(E) -> F) -> OpenFailure<F> {
    match self {
      OpenFailure::Transient(e) => OpenFailure::Transient(f(e)),
      OpenFailure::Denied(e) => OpenFailure::Denied(f(e)),
      OpenFailure::Fatal(e) => OpenFailure::Fatal(f(e)),
    }
  }
}

impl OpenFailure<std::io::Error> {
  /// 按 I/O 错误类型分类：权限错误不重试，其余视为暂时性错误
  pub fn classify(err: std::io::Error) -> Self {
    if err.kind() == std::io::ErrorKind::PermissionDenied {
      OpenFailure::Denied(err)
    } else {
      OpenFailure::Transient(err)
    }
  }
}

/// 按策略重复调用 `open`，返回第一次成功的结果
///
/// `sleep` 单独传入，测试时可以替换成不真正等待的实现。
pub fn retry_open_with<T, E, F, S>(
  policy: &RetryPolicy,
  what: &str,
  mut open: F,
  mut sleep: S,
) -> Result<T, InputError>
where
  E: Display,
  F: FnMut(u32) -> Result<T, OpenFailure<E>>,
  S: FnMut(Duration),
{
  let attempts = policy.max_attempts.max(1);
  let mut last_error = String::new();

  for attempt in 1..=attempts {
    match open(attempt) {
      Ok(value) => {
        if attempt > 1 {
          info!("第 {} 次尝试打开 {} 成功", attempt, what);
        }
        return Ok(value);
      }
      Err(OpenFailure::Denied(e)) => {
        error!("打开 {} 时权限被拒绝: {}", what, e);
        return Err(InputError::PermissionDenied(format!("{}: {}", what, e)));
      }
      Err(OpenFailure::Fatal(e)) => {
        error!("打开 {} 失败，不再重试: {}", what, e);
        return Err(InputError::OpenFatal(format!("{}: {}", what, e)));
      }
      Err(OpenFailure::Transient(e)) => {
        last_error = e.to_string();
        if attempt < attempts {
          let delay = policy.delay_for(attempt);
          warn!(
            "第 {}/{} 次打开 {} 失败: {}，{:.2?} 后重试",
            attempt, attempts, what, e, delay
          );
          sleep(delay);
        }
      }
    }
  }

  error!("打开 {} 失败，已尝试 {} 次", what, attempts);
  Err(InputError::OpenExhausted {
    attempts,
    last_error,
  })
}

pub fn retry_open<T, E, F>(policy: &RetryPolicy, what: &str, open: F) -> Result<T, InputError>
where
  E: Display,
  F: FnMut(u32) -> Result<T, OpenFailure<E>>,
{
  retry_open_with(policy, what, open, thread::sleep)
}
