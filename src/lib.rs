// 该文件是 Kanjian （看见） 项目的一部分。
// src/lib.rs - 库主文件
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

pub mod config;
pub mod frame;
pub mod input;
pub mod labels;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod preprocess;
pub mod task;
pub mod tensor;

use std::path::PathBuf;

pub trait FromUrl {
  type Error;
  fn from_url(url: &url::Url) -> Result<Self, Self::Error>
  where
    Self: Sized;
}

pub trait FromUrlWithScheme: FromUrl {
  const SCHEME: &'static str;
}

/// 从 URL 中取出本地文件路径。
///
/// `image:///data/a.png` 给出绝对路径 `/data/a.png`，
/// `image://a.png` 这种把路径写进主机部分的形式给出相对路径 `a.png`。
pub fn url_path(url: &url::Url) -> Result<PathBuf, std::string::FromUtf8Error> {
  let path = urlencoding::decode(url.path())?;
  match url.host_str() {
    Some(host) if !host.is_empty() => {
      let host = urlencoding::decode(host)?;
      Ok(PathBuf::from(format!("{}{}", host, path)))
    }
    _ => Ok(PathBuf::from(path.into_owned())),
  }
}

/// 读取 URL 查询参数并解析，缺省或解析失败时返回 `None`
pub fn url_query<T: std::str::FromStr>(url: &url::Url, key: &str) -> Option<T> {
  url
    .query_pairs()
    .find(|(k, _)| k == key)
    .and_then(|(_, v)| v.parse().ok())
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  #[test]
  fn absolute_path_from_empty_host() {
    let url = Url::parse("image:///tmp/camera%20shot.png").unwrap();
    assert_eq!(url_path(&url).unwrap(), PathBuf::from("/tmp/camera shot.png"));
  }

  #[test]
  fn relative_path_from_host() {
    let url = Url::parse("replay://fixtures/one.json").unwrap();
    assert_eq!(url_path(&url).unwrap(), PathBuf::from("fixtures/one.json"));
  }

  #[test]
  fn query_values_are_parsed() {
    let url = Url::parse("image:///a.png?repeat=3&name=x").unwrap();
    assert_eq!(url_query::<u32>(&url, "repeat"), Some(3));
    assert_eq!(url_query::<u32>(&url, "name"), None);
    assert_eq!(url_query::<u32>(&url, "missing"), None);
  }
}
