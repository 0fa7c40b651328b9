// 该文件是 Qianshen （浅深） 项目的一部分。
// src/geometry.rs - 坐标映射
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

//! # 坐标映射
//!
//! 三种像素空间之间的纯函数变换：
//! - 整帧像素空间（解码帧的原始分辨率）
//! - 归一化空间 [0, 1]（发布给宿主、检测模型输出）
//! - 深度模型的 ROI 网格空间（固定边长 `grid` 的方格）

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GeometryError {
  #[error("ROI 尺寸无效: {width}x{height}")]
  EmptyRegion { width: u32, height: u32 },
}

/// 整帧像素空间中的一个点
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
  pub x: f32,
  pub y: f32,
}

impl Point {
  pub fn new(x: f32, y: f32) -> Self {
    Self { x, y }
  }
}

/// 整帧像素空间中的矩形（左上角 + 宽高）
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PixelRect {
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
}

impl PixelRect {
  pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
    Self {
      x,
      y,
      width,
      height,
    }
  }
}

/// 归一化到 [0, 1] 的矩形
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NormRect {
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
}

/// 深度网格中的单元格索引
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridCell {
  pub col: usize,
  pub row: usize,
}

/// 整帧像素空间中的固定感兴趣区域，加载时配置，之后不可变
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionOfInterest {
  x: u32,
  y: u32,
  width: u32,
  height: u32,
}

impl RegionOfInterest {
  pub fn new(x: u32, y: u32, width: u32, height: u32) -> Result<Self, GeometryError> {
    if width == 0 || height == 0 {
      return Err(GeometryError::EmptyRegion { width, height });
    }
    Ok(Self {
      x,
      y,
      width,
      height,
    })
  }

  /// 覆盖整帧的区域
  pub fn full_frame(width: u32, height: u32) -> Result<Self, GeometryError> {
    Self::new(0, 0, width, height)
  }

  pub fn x(&self) -> u32 {
    self.x
  }

  pub fn y(&self) -> u32 {
    self.y
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  /// 与 `width`x`height` 的帧求交；完全落在帧外时返回 `None`
  pub fn clip_to(&self, width: u32, height: u32) -> Option<Self> {
    let x_end = (self.x.saturating_add(self.width)).min(width);
    let y_end = (self.y.saturating_add(self.height)).min(height);
    if self.x >= x_end || self.y >= y_end {
      return None;
    }
    Some(Self {
      x: self.x,
      y: self.y,
      width: x_end - self.x,
      height: y_end - self.y,
    })
  }

  /// 右、下边界为闭区间，落在边界上的点映射到最后一个网格
  pub fn contains(&self, point: Point) -> bool {
    let (x0, y0) = (self.x as f32, self.y as f32);
    let (x1, y1) = (x0 + self.width as f32, y0 + self.height as f32);
    point.x >= x0 && point.x <= x1 && point.y >= y0 && point.y <= y1
  }

  /// 整帧像素坐标 → ROI 网格坐标
  ///
  /// `gx = (px − roi.x) / roi.width × grid`，`gy` 同理。
  /// ROI 外的点被拒绝，返回 `None`；ROI 内的点截断到 `[0, grid − 1]`。
  pub fn grid_cell(&self, point: Point, grid: usize) -> Option<GridCell> {
    if grid == 0 || !point.x.is_finite() || !point.y.is_finite() || !self.contains(point) {
      return None;
    }
    let gx = (point.x - self.x as f32) / self.width as f32 * grid as f32;
    let gy = (point.y - self.y as f32) / self.height as f32 * grid as f32;
    let last = (grid - 1) as f32;
    Some(GridCell {
      col: gx.floor().clamp(0.0, last) as usize,
      row: gy.floor().clamp(0.0, last) as usize,
    })
  }
}

/// 整帧像素 → 归一化
pub fn normalize(rect: PixelRect, frame_width: u32, frame_height: u32) -> NormRect {
  let (w, h) = (frame_width as f32, frame_height as f32);
  NormRect {
    x: rect.x / w,
    y: rect.y / h,
    width: rect.width / w,
    height: rect.height / h,
  }
}

/// 归一化 → 整帧像素（或任意显示尺寸）
pub fn denormalize(rect: NormRect, frame_width: u32, frame_height: u32) -> PixelRect {
  let (w, h) = (frame_width as f32, frame_height as f32);
  PixelRect {
    x: rect.x * w,
    y: rect.y * h,
    width: rect.width * w,
    height: rect.height * h,
  }
}

pub fn centroid(rect: PixelRect) -> Point {
  Point {
    x: rect.x + rect.width / 2.0,
    y: rect.y + rect.height / 2.0,
  }
}

/// 检测模型输出空间 → 整帧像素
///
/// `bbox` 是相对于模型输入区域归一化的 `[x_min, y_min, x_max, y_max]`，
/// `region` 是送入模型的那块整帧子区域。
pub fn region_to_frame(bbox: [f32; 4], region: RegionOfInterest) -> PixelRect {
  let [x_min, y_min, x_max, y_max] = bbox.map(|v| v.clamp(0.0, 1.0));
  let (rw, rh) = (region.width as f32, region.height as f32);
  PixelRect {
    x: region.x as f32 + x_min * rw,
    y: region.y as f32 + y_min * rh,
    width: (x_max - x_min).max(0.0) * rw,
    height: (y_max - y_min).max(0.0) * rh,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;

  #[test]
  fn grid_cell_matches_linear_scaling() {
    let roi = RegionOfInterest::new(0, 0, 640, 360).unwrap();
    let cell = roi.grid_cell(Point::new(320.0, 180.0), 256).unwrap();
    assert_eq!(cell, GridCell { col: 128, row: 128 });
  }

  #[test]
  fn grid_cell_is_relative_to_roi_origin() {
    let roi = RegionOfInterest::new(180, 180, 640, 320).unwrap();
    let cell = roi.grid_cell(Point::new(180.0 + 160.0, 180.0 + 80.0), 256).unwrap();
    assert_eq!(cell, GridCell { col: 64, row: 64 });
  }

  #[test]
  fn grid_cell_rejects_points_outside_roi() {
    let roi = RegionOfInterest::new(180, 180, 640, 320).unwrap();
    assert_eq!(roi.grid_cell(Point::new(10.0, 200.0), 256), None);
    assert_eq!(roi.grid_cell(Point::new(200.0, 600.0), 256), None);
    assert_eq!(roi.grid_cell(Point::new(f32::NAN, 200.0), 256), None);
  }

  #[test]
  fn grid_cell_clamps_far_edge() {
    let roi = RegionOfInterest::new(0, 0, 640, 360).unwrap();
    let cell = roi.grid_cell(Point::new(640.0, 360.0), 256).unwrap();
    assert_eq!(cell, GridCell { col: 255, row: 255 });
  }

  #[test]
  fn empty_roi_is_rejected() {
    assert!(RegionOfInterest::new(0, 0, 0, 10).is_err());
  }

  #[test]
  fn clip_to_frame() {
    let roi = RegionOfInterest::new(180, 180, 640, 320).unwrap();
    let clipped = roi.clip_to(640, 360).unwrap();
    assert_eq!((clipped.width(), clipped.height()), (460, 180));
    assert!(roi.clip_to(100, 100).is_none());
  }

  #[test]
  fn centroid_of_rect() {
    let c = centroid(PixelRect::new(10.0, 20.0, 30.0, 40.0));
    assert_eq!(c, Point::new(25.0, 40.0));
  }

  #[test]
  fn region_to_frame_offsets_by_region() {
    let region = RegionOfInterest::new(100, 50, 200, 100).unwrap();
    let rect = region_to_frame([0.5, 0.5, 1.0, 1.0], region);
    assert_eq!(rect, PixelRect::new(200.0, 100.0, 100.0, 50.0));
  }

  proptest! {
    #[test]
    fn normalize_round_trip_within_one_pixel(
      w in 1u32..4096,
      h in 1u32..4096,
      fx in 0.0f32..1.0,
      fy in 0.0f32..1.0,
      fw in 0.0f32..1.0,
      fh in 0.0f32..1.0,
    ) {
      let rect = PixelRect::new(fx * w as f32, fy * h as f32, fw * w as f32, fh * h as f32);
      let back = denormalize(normalize(rect, w, h), w, h);
      prop_assert!((back.x - rect.x).abs() <= 1.0);
      prop_assert!((back.y - rect.y).abs() <= 1.0);
      prop_assert!((back.width - rect.width).abs() <= 1.0);
      prop_assert!((back.height - rect.height).abs() <= 1.0);
    }
  }
}
