// 该文件是 Qianshen （浅深） 项目的一部分。
// src/detector.rs - 目标检测适配
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

use tracing::debug;

use crate::{
  frame::{Frame, RgbNhwcFrame},
  geometry::{self, NormRect, PixelRect, Point, RegionOfInterest},
  model::{DetectResult, Model},
};

/// 一个检测到的物体，矩形位于整帧像素空间
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedObject {
  pub label: u32,
  pub score: f32,
  pub rect: PixelRect,
}

impl DetectedObject {
  /// 深度查询点
  pub fn centroid(&self) -> Point {
    geometry::centroid(self.rect)
  }

  pub fn normalized(&self, frame_width: u32, frame_height: u32) -> NormalizedObject {
    NormalizedObject {
      label: self.label,
      score: self.score,
      rect: geometry::normalize(self.rect, frame_width, frame_height),
    }
  }
}

/// 发布用的物体，矩形归一化到 [0, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedObject {
  pub label: u32,
  pub score: f32,
  pub rect: NormRect,
}

/// 同步目标检测器
///
/// 把帧（或远距离模式下的 ROI 子图）缩放到模型输入尺寸，推理后把
/// 框从模型输出空间映射回整帧像素。检测器不在调用之外持有帧。
pub struct ObjectDetector<D> {
  model: D,
  input_size: usize,
  confidence: f32,
  far_roi: Option<RegionOfInterest>,
}

impl<D> ObjectDetector<D>
where
  D: Model<Input = RgbNhwcFrame, Output = DetectResult>,
{
  pub fn new(model: D, input_size: usize) -> Self {
    Self {
      model,
      input_size,
      confidence: 0.0,
      far_roi: None,
    }
  }

  pub fn with_confidence(mut self, confidence: f32) -> Self {
    self.confidence = confidence;
    self
  }

  pub fn with_far_roi(mut self, far_roi: Option<RegionOfInterest>) -> Self {
    self.far_roi = far_roi;
    self
  }

  /// 远距离模式随配置切换，不按单次调用切换
  pub fn set_far_roi(&mut self, far_roi: Option<RegionOfInterest>) {
    self.far_roi = far_roi;
  }

  pub fn detect(&self, frame: &Frame) -> Result<Vec<DetectedObject>, D::Error> {
    let region = self
      .far_roi
      .and_then(|roi| roi.clip_to(frame.width(), frame.height()))
      .or_else(|| RegionOfInterest::full_frame(frame.width(), frame.height()).ok());
    let Some(region) = region else {
      return Ok(Vec::new());
    };

    let mut input = RgbNhwcFrame::square(self.input_size);
    frame.resize_region_into(region, &mut input);

    let result = self.model.infer(&input)?;
    let objects: Vec<DetectedObject> = result
      .items
      .iter()
      .filter(|item| item.score >= self.confidence)
      .map(|item| DetectedObject {
        label: item.class_id,
        score: item.score,
        rect: geometry::region_to_frame(item.bbox, region),
      })
      .collect();

    debug!(
      "检测到 {} 个物体 (原始 {}), 区域 {}x{}+{}+{}",
      objects.len(),
      result.len(),
      region.width(),
      region.height(),
      region.x(),
      region.y()
    );
    Ok(objects)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::DetectItem;
  use chrono::Utc;
  use image::RgbImage;
  use std::{cell::Cell, convert::Infallible};

  struct FixedModel {
    items: Vec<DetectItem>,
    seen: Cell<usize>,
  }

  impl Model for FixedModel {
    type Input = RgbNhwcFrame;
    type Output = DetectResult;
    type Error = Infallible;

    fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
      self.seen.set(input.width());
      Ok(DetectResult::from(self.items.clone()))
    }
  }

  fn model() -> FixedModel {
    FixedModel {
      items: vec![
        DetectItem {
          class_id: 2,
          score: 0.9,
          bbox: [0.25, 0.5, 0.75, 1.0],
        },
        DetectItem {
          class_id: 0,
          score: 0.3,
          bbox: [0.0, 0.0, 0.1, 0.1],
        },
      ],
      seen: Cell::new(0),
    }
  }

  fn frame() -> Frame {
    Frame::new(RgbImage::new(960, 540), Utc::now())
  }

  #[test]
  fn boxes_are_mapped_to_full_frame() {
    let detector = ObjectDetector::new(model(), 320).with_confidence(0.5);
    let objects = detector.detect(&frame()).unwrap();
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].label, 2);
    assert_eq!(objects[0].rect, PixelRect::new(240.0, 270.0, 480.0, 270.0));
    assert_eq!(detector.model.seen.get(), 320);
  }

  #[test]
  fn far_roi_restricts_to_region() {
    let roi = RegionOfInterest::new(180, 180, 640, 320).unwrap();
    let detector = ObjectDetector::new(model(), 320)
      .with_confidence(0.5)
      .with_far_roi(Some(roi));
    let objects = detector.detect(&frame()).unwrap();
    assert_eq!(objects[0].rect, PixelRect::new(340.0, 340.0, 320.0, 160.0));
  }

  #[test]
  fn centroid_is_query_point() {
    let object = DetectedObject {
      label: 1,
      score: 0.8,
      rect: PixelRect::new(300.0, 160.0, 40.0, 40.0),
    };
    assert_eq!(object.centroid(), Point::new(320.0, 180.0));
    let norm = object.normalized(640, 360);
    assert_eq!(norm.rect.x, 300.0 / 640.0);
  }
}
