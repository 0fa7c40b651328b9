// 该文件是 Qianshen （浅深） 项目的一部分。
// src/model.rs - 模型
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

use crate::geometry::GridCell;

/// 不透明的推理引擎
///
/// 检测器与深度估计器都以此契约接入，网络结构不在本 crate 范围内。
pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，相对模型输入归一化
}

#[derive(Debug, Clone, Default)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }
}

impl From<Vec<DetectItem>> for DetectResult {
  fn from(items: Vec<DetectItem>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

/// 一次深度推理输出的 `size`x`size` （逆）深度网格
#[derive(Debug, Clone, PartialEq)]
pub struct DepthMap {
  size: usize,
  values: Box<[f32]>,
}

impl DepthMap {
  /// `values` 长度必须为 `size * size`
  pub fn from_vec(size: usize, values: Vec<f32>) -> Option<Self> {
    if size == 0 || values.len() != size * size {
      return None;
    }
    Some(Self {
      size,
      values: values.into_boxed_slice(),
    })
  }

  pub fn size(&self) -> usize {
    self.size
  }

  pub fn values(&self) -> &[f32] {
    &self.values
  }

  pub fn get(&self, cell: GridCell) -> Option<f32> {
    if cell.col >= self.size || cell.row >= self.size {
      return None;
    }
    self.values.get(cell.row * self.size + cell.col).copied()
  }

  /// 最小/最大值扫描，忽略 NaN
  pub fn min_max(&self) -> (f32, f32) {
    self
      .values
      .iter()
      .filter(|v| !v.is_nan())
      .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
        (lo.min(v), hi.max(v))
      })
  }
}

#[cfg(feature = "rknn")]
mod rknn_depth;
#[cfg(feature = "rknn")]
mod rknn_yolo;

#[cfg(feature = "rknn")]
pub use self::rknn_depth::{RknnDepth, RknnDepthBuilder};
#[cfg(feature = "rknn")]
pub use self::rknn_yolo::{RknnModelError, RknnYolo, RknnYoloBuilder};

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn depth_map_requires_square_buffer() {
    assert!(DepthMap::from_vec(2, vec![0.0; 4]).is_some());
    assert!(DepthMap::from_vec(2, vec![0.0; 3]).is_none());
    assert!(DepthMap::from_vec(0, vec![]).is_none());
  }

  #[test]
  fn depth_map_lookup_is_row_major() {
    let map = DepthMap::from_vec(2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
    assert_eq!(map.get(GridCell { col: 1, row: 0 }), Some(2.0));
    assert_eq!(map.get(GridCell { col: 0, row: 1 }), Some(3.0));
    assert_eq!(map.get(GridCell { col: 2, row: 0 }), None);
  }

  #[test]
  fn min_max_scan() {
    let map = DepthMap::from_vec(2, vec![0.5, f32::NAN, -1.0, 8.0]).unwrap();
    assert_eq!(map.min_max(), (-1.0, 8.0));
  }
}
