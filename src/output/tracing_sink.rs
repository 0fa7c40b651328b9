// 该文件是 Qianshen （浅深） 项目的一部分。
// src/output/tracing_sink.rs - 日志输出
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

use std::convert::Infallible;

use tracing::{debug, info};

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{HostSink, PublishedArrays},
};

/// 把每帧结果写进日志，没有宿主时使用
#[derive(Debug, Default)]
pub struct TracingSink {
  frames: u64,
}

impl FromUrlWithScheme for TracingSink {
  const SCHEME: &'static str = "log";
}

impl FromUrl for TracingSink {
  type Error = Infallible;

  fn from_url(_url: &url::Url) -> Result<Self, Self::Error> {
    Ok(Self::default())
  }
}

impl HostSink for TracingSink {
  type Error = Infallible;

  fn on_objects(&mut self, arrays: &PublishedArrays) -> Result<(), Self::Error> {
    self.frames += 1;
    info!(
      "第 {} 帧: {} 个物体, 深度 {}",
      self.frames,
      arrays.len(),
      if arrays.depth.is_empty() { "无" } else { "有" }
    );
    for i in 0..arrays.len() {
      debug!(
        "  [{}] 类别 {} 置信度 {:.2} 位置 ({}, {}, {}, {}) 深度 {:?}",
        i,
        arrays.labels[i],
        arrays.scores[i],
        arrays.x[i],
        arrays.y[i],
        arrays.width[i],
        arrays.height[i],
        arrays.depth.get(i)
      );
    }
    Ok(())
  }

  fn on_status(&mut self, status: &str) -> Result<(), Self::Error> {
    info!("状态: {}", status);
    Ok(())
  }
}
