// 该文件是 Qianshen （浅深） 项目的一部分。
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

//! # Qianshen （浅深）
//!
//! 为实时视频流做目标检测，并以异步方式为每个物体附加深度估计。
//! 检测在视频线程上同步完成；深度模型在独立线程上按自己的节奏运行，
//! 视频线程只做非阻塞的交接，从不等待深度推理。

pub mod config;
pub mod depth;
pub mod detector;
pub mod dispatch;
pub mod frame;
pub mod geometry;
pub mod input;
pub mod model;
pub mod output;
pub mod task;

pub trait FromUrl {
  type Error;
  fn from_url(url: &url::Url) -> Result<Self, Self::Error>
  where
    Self: Sized;
}

pub trait FromUrlWithScheme: FromUrl {
  const SCHEME: &'static str;
}

/// URL 路径的百分号解码，解码失败时保留原样
pub(crate) fn decoded_path(url: &url::Url) -> String {
  urlencoding::decode(url.path())
    .map(|path| path.into_owned())
    .unwrap_or_else(|_| url.path().to_string())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn path_is_percent_decoded() {
    let url = url::Url::parse("image:///data/front%20camera/000.png").unwrap();
    assert_eq!(decoded_path(&url), "/data/front camera/000.png");
  }
}
