// 该文件是 Qianshen （浅深） 项目的一部分。
// src/frame.rs - 帧定义与模型输入张量
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

use chrono::{DateTime, Utc};
use image::{RgbImage, imageops};
use thiserror::Error;

use crate::geometry::RegionOfInterest;

const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug)]
pub enum FrameAccessError {
  #[error("缓冲区大小不匹配: 期望 {expected} 字节, 实际 {actual} 字节")]
  BufferSizeMismatch { expected: usize, actual: usize },
  #[error("帧尺寸无效: {width}x{height}")]
  InvalidDimensions { width: u32, height: u32 },
  #[error("行跨度 {stride} 小于一行像素 {row} 字节")]
  InvalidStride { stride: usize, row: usize },
  #[error("不支持的像素格式: {0}")]
  UnsupportedFormat(String),
  #[error("无法映射帧缓冲区: {0}")]
  MapFailed(String),
}

/// 解码帧的紧凑三通道像素排列
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelFormat {
  Rgb,
  #[default]
  Bgr,
}

/// 一帧解码后的图像，统一存为 RGB
///
/// 在一次分发调用期间由分发循环独占，检测器不会在调用之外持有它。
#[derive(Debug, Clone)]
pub struct Frame {
  image: RgbImage,
  timestamp: DateTime<Utc>,
}

impl Frame {
  pub fn new(image: RgbImage, timestamp: DateTime<Utc>) -> Self {
    Self { image, timestamp }
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn image(&self) -> &RgbImage {
    &self.image
  }

  pub fn timestamp(&self) -> DateTime<Utc> {
    self.timestamp
  }

  /// `region` 在本帧上实际覆盖的区域
  ///
  /// 超出帧的部分被裁掉；与帧不相交时退化为整帧；空帧返回 `None`。
  pub fn effective_region(&self, region: RegionOfInterest) -> Option<RegionOfInterest> {
    region
      .clip_to(self.width(), self.height())
      .or_else(|| RegionOfInterest::full_frame(self.width(), self.height()).ok())
  }

  /// 截取 `region` 并缩放到 `target` 尺寸的 NHWC 张量，返回实际采样的区域
  pub fn resize_region_into(
    &self,
    region: RegionOfInterest,
    target: &mut RgbNhwcFrame,
  ) -> Option<RegionOfInterest> {
    let Some(region) = self.effective_region(region) else {
      target.as_mut().fill(0);
      return None;
    };
    let cropped = imageops::crop_imm(
      &self.image,
      region.x(),
      region.y(),
      region.width(),
      region.height(),
    )
    .to_image();
    let resized = imageops::resize(
      &cropped,
      target.width() as u32,
      target.height() as u32,
      imageops::FilterType::Triangle,
    );
    target.as_mut().copy_from_slice(resized.as_raw());
    Some(region)
  }
}

/// 获取一帧像素数据
///
/// 映射失败即一次 FrameAccessFailure，分发循环据此丢弃该帧。
pub trait FrameAccess {
  fn access(self) -> Result<Frame, FrameAccessError>;
}

impl FrameAccess for Frame {
  fn access(self) -> Result<Frame, FrameAccessError> {
    Ok(self)
  }
}

/// 来自视频管道的紧凑三通道缓冲区（借用）
#[derive(Debug, Clone, Copy)]
pub struct PackedFrame<'a> {
  pub data: &'a [u8],
  pub width: u32,
  pub height: u32,
  pub format: PixelFormat,
  pub timestamp: DateTime<Utc>,
}

impl<'a> PackedFrame<'a> {
  pub fn new(data: &'a [u8], width: u32, height: u32, format: PixelFormat) -> Self {
    Self {
      data,
      width,
      height,
      format,
      timestamp: Utc::now(),
    }
  }

  pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
    self.timestamp = timestamp;
    self
  }
}

impl FrameAccess for PackedFrame<'_> {
  fn access(self) -> Result<Frame, FrameAccessError> {
    let image = packed_to_rgb(self.data, self.width, self.height, self.format)?;
    Ok(Frame::new(image, self.timestamp))
  }
}

/// 紧凑 RGB/BGR 缓冲区 → `RgbImage`
pub fn packed_to_rgb(
  data: &[u8],
  width: u32,
  height: u32,
  format: PixelFormat,
) -> Result<RgbImage, FrameAccessError> {
  strided_to_rgb(data, width, height, RGB_CHANNELS * width as usize, format)
}

/// 行尾带填充的 RGB/BGR 缓冲区 → `RgbImage`
///
/// `stride` 是相邻两行起点的字节距离，视频缓冲区通常按 4 字节对齐。
pub fn strided_to_rgb(
  data: &[u8],
  width: u32,
  height: u32,
  stride: usize,
  format: PixelFormat,
) -> Result<RgbImage, FrameAccessError> {
  if width == 0 || height == 0 {
    return Err(FrameAccessError::InvalidDimensions { width, height });
  }
  let row = RGB_CHANNELS * width as usize;
  if stride < row {
    return Err(FrameAccessError::InvalidStride { stride, row });
  }
  let expected = stride * (height as usize - 1) + row;
  if data.len() < expected {
    return Err(FrameAccessError::BufferSizeMismatch {
      expected,
      actual: data.len(),
    });
  }

  let mut pixels = Vec::with_capacity(row * height as usize);
  for line in data.chunks(stride).take(height as usize) {
    let line = &line[..row];
    match format {
      PixelFormat::Rgb => pixels.extend_from_slice(line),
      PixelFormat::Bgr => pixels.extend(
        line
          .chunks_exact(RGB_CHANNELS)
          .flat_map(|px| [px[2], px[1], px[0]]),
      ),
    }
  }

  RgbImage::from_raw(width, height, pixels)
    .ok_or(FrameAccessError::InvalidDimensions { width, height })
}

/// 模型输入张量，NHWC 排列的 RGB u8
#[derive(Debug, Clone)]
pub struct RgbNhwcFrame {
  data: Box<[u8]>,
  width: usize,
  height: usize,
}

impl RgbNhwcFrame {
  pub fn with_shape(height: usize, width: usize) -> Self {
    let size = RGB_CHANNELS * width * height;
    Self {
      data: vec![0u8; size].into_boxed_slice(),
      width,
      height,
    }
  }

  /// 方形输入，检测与深度模型都使用
  pub fn square(size: usize) -> Self {
    Self::with_shape(size, size)
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn as_nhwc(&self) -> &[u8] {
    &self.data
  }

  pub fn try_from_vec(data: Vec<u8>, height: usize, width: usize) -> Result<Self, FrameAccessError> {
    let expected = RGB_CHANNELS * width * height;
    if data.len() != expected {
      return Err(FrameAccessError::BufferSizeMismatch {
        expected,
        actual: data.len(),
      });
    }
    Ok(Self {
      data: data.into_boxed_slice(),
      width,
      height,
    })
  }
}

impl AsMut<[u8]> for RgbNhwcFrame {
  fn as_mut(&mut self) -> &mut [u8] {
    &mut self.data
  }
}
