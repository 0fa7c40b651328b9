// 该文件是 Qianshen （浅深） 项目的一部分。
// src/model/rknn_depth.rs - RKNN 深度估计后端
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

use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use tracing::debug;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  config::DEFAULT_DEPTH_GRID,
  decoded_path,
  frame::RgbNhwcFrame,
  model::{
    DepthMap, Model,
    rknn_yolo::{RknnModelError, check_input, load_context},
  },
};

/// 单目深度模型，输出 `grid`x`grid` 的逆深度
pub struct RknnDepth {
  context: Context,
  grid: usize,
}

pub struct RknnDepthBuilder {
  model_path: String,
  grid: usize,
  flags: InitFlags,
}

impl FromUrlWithScheme for RknnDepthBuilder {
  const SCHEME: &'static str = "rknn";
}

impl FromUrl for RknnDepthBuilder {
  type Error = RknnModelError;

  /// `rknn:///path/depth.rknn?grid=256`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(RknnModelError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }
    let grid = url
      .query_pairs()
      .find(|(k, _)| k == "grid")
      .and_then(|(_, v)| v.parse::<usize>().ok())
      .unwrap_or(DEFAULT_DEPTH_GRID);

    Ok(Self {
      model_path: decoded_path(url),
      grid,
      flags: InitFlags::default(),
    })
  }
}

impl RknnDepthBuilder {
  pub fn grid(&self) -> usize {
    self.grid
  }

  pub fn build(self) -> Result<RknnDepth, RknnModelError> {
    let context = load_context(&self.model_path, self.flags, 1, 1)?;
    Ok(RknnDepth {
      context,
      grid: self.grid,
    })
  }
}

impl Model for RknnDepth {
  type Input = RgbNhwcFrame;
  type Output = DepthMap;
  type Error = RknnModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    check_input(input, self.grid)?;

    self
      .context
      .set_input(0, input.as_nhwc(), TensorFormat::NHWC, TensorType::UInt8)?;
    self.context.run()?;
    let output = self.context.get_outputs()?;
    let values = output.get_f32(0)?;
    debug!("深度输出长度: {}", values.len());

    DepthMap::from_vec(self.grid, values.to_vec()).ok_or(RknnModelError::OutputShape {
      expected: self.grid * self.grid,
      actual: values.len(),
    })
  }
}
