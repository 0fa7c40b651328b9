// 该文件是 Qianshen （浅深） 项目的一部分。
// src/input.rs - 视频/图像输入
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

use thiserror::Error;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{Frame, FrameAccess, FrameAccessError},
};

mod image_files;
pub use self::image_files::{ImageFilesInput, ImageFilesInputError};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{
  GStreamerInput, GStreamerInputError, GStreamerInputPipelineBuilder, SampleFrame,
};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("图像文件输入错误: {0}")]
  ImageFilesInputError(#[from] ImageFilesInputError),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer 输入错误: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 按 URL 选择的帧来源
pub enum InputWrapper {
  ImageFiles(ImageFilesInput),
  #[cfg(feature = "gstreamer_input")]
  GStreamer(GStreamerInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      ImageFilesInput::SCHEME => Ok(InputWrapper::ImageFiles(ImageFilesInput::from_url(url)?)),
      #[cfg(feature = "gstreamer_input")]
      GStreamerInputPipelineBuilder::SCHEME => {
        let input = GStreamerInputPipelineBuilder::from_url(url)?.build()?;
        Ok(InputWrapper::GStreamer(input))
      }
      other => Err(InputError::SchemeMismatch(other.to_string())),
    }
  }
}

/// 来源各异的一帧，映射推迟到分发时进行
pub enum InputFrame {
  Decoded(Frame),
  #[cfg(feature = "gstreamer_input")]
  Sample(SampleFrame),
}

impl FrameAccess for InputFrame {
  fn access(self) -> Result<Frame, FrameAccessError> {
    match self {
      InputFrame::Decoded(frame) => Ok(frame),
      #[cfg(feature = "gstreamer_input")]
      InputFrame::Sample(sample) => sample.access(),
    }
  }
}

impl Iterator for InputWrapper {
  type Item = InputFrame;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      InputWrapper::ImageFiles(input) => input.next().map(InputFrame::Decoded),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamer(input) => input.next().map(InputFrame::Sample),
    }
  }
}
