// 该文件是 Qianshen （浅深） 项目的一部分。
// src/dispatch.rs - 帧分发
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

//! # 帧分发
//!
//! [`Coordinator`] 持有检测器与深度工作线程，两者放在同一把推理锁后面。
//! 这把锁在一次分发中覆盖检测与深度提交，同时也是重新加载模型、切换
//! 开关时的配置锁，所以分发与重配置不会交错。

use std::{
  fmt::Display,
  sync::{Mutex, MutexGuard, PoisonError},
  time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  config::{Accelerator, ConfigError, CoordinatorConfig, DetectorVariant},
  depth::{DepthError, DepthWorker, WorkerStats},
  detector::{DetectedObject, NormalizedObject, ObjectDetector},
  frame::{FrameAccess, FrameAccessError, RgbNhwcFrame},
  geometry::Point,
  model::{DepthMap, DetectResult, Model},
};

#[derive(Error, Debug)]
pub enum DispatchError {
  #[error("帧数据不可用: {0}")]
  FrameAccess(#[from] FrameAccessError),
}

#[derive(Error, Debug)]
pub enum LoadError {
  #[error("检测模型 {variant} 加载失败: {reason}")]
  Detector {
    variant: DetectorVariant,
    reason: String,
  },
  #[error("深度模型加载失败: {0}")]
  Depth(String),
  #[error("深度推理线程启动失败: {0}")]
  Worker(#[from] DepthError),
}

/// 一个物体及其（可能缺失的）深度分数
#[derive(Debug, Clone, PartialEq)]
pub struct FusedObject {
  pub object: NormalizedObject,
  pub depth: Option<f32>,
}

/// 一帧的融合结果
///
/// 深度分数按下标与物体配对。由于深度有一个周期的滞后，分数来自上一次
/// 被接受的提交，物体数变化时多出的物体没有分数。
#[derive(Debug, Clone, PartialEq)]
pub struct FusedResult {
  pub objects: Vec<FusedObject>,
  pub depth_enabled: bool,
  /// 本帧的深度提交是否被接受
  pub depth_available: bool,
  /// 检测开启且已加载检测模型
  pub detector_active: bool,
  pub timestamp: DateTime<Utc>,
}

struct Engines<D> {
  detector: Option<ObjectDetector<D>>,
  depth: Option<DepthWorker>,
  config: CoordinatorConfig,
}

/// 推理上下文，由调用方创建并管理生命周期
pub struct Coordinator<D> {
  engines: Mutex<Engines<D>>,
}

impl<D> Coordinator<D>
where
  D: Model<Input = RgbNhwcFrame, Output = DetectResult>,
  D::Error: Display,
{
  /// 创建空上下文，模型随后通过 `replace_*` 加载
  pub fn new(config: CoordinatorConfig) -> Result<Self, ConfigError> {
    config.validate()?;
    Ok(Self {
      engines: Mutex::new(Engines {
        detector: None,
        depth: None,
        config,
      }),
    })
  }

  fn lock(&self) -> MutexGuard<'_, Engines<D>> {
    self.engines.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// 处理一帧
  ///
  /// 帧映射失败时直接返回错误，不触碰任何共享状态。检测在锁内同步完成后
  /// 才进行深度提交；深度提交从不阻塞。
  pub fn dispatch<F: FrameAccess>(&self, frame: F) -> Result<FusedResult, DispatchError> {
    let frame = frame.access()?;
    let (width, height) = (frame.width(), frame.height());

    let engines = self.lock();
    let depth_enabled = engines.config.depth_estimation && engines.depth.is_some();
    let mut result = FusedResult {
      objects: Vec::new(),
      depth_enabled,
      depth_available: false,
      detector_active: false,
      timestamp: frame.timestamp(),
    };

    let detector = match engines.detector.as_ref() {
      Some(detector) if engines.config.object_detection => detector,
      _ => return Ok(result),
    };
    result.detector_active = true;

    let now = Instant::now();
    let objects = detector.detect(&frame).unwrap_or_else(|e| {
      warn!("目标检测失败, 本帧无检测结果: {}", e);
      Vec::new()
    });
    let detect_elapsed = now.elapsed();

    let scores = match engines.depth.as_ref() {
      Some(worker) if depth_enabled => {
        let points: Vec<Point> = objects.iter().map(DetectedObject::centroid).collect();
        worker.submit(&frame, &points)
      }
      _ => None,
    };
    drop(engines);

    result.depth_available = scores.is_some();
    result.objects = objects
      .iter()
      .enumerate()
      .map(|(index, object)| FusedObject {
        object: object.normalized(width, height),
        depth: scores.as_ref().and_then(|s| s.get(index)),
      })
      .collect();

    debug!(
      "分发完成: {} 个物体, 深度 {}, 检测耗时: {:.2?}",
      result.objects.len(),
      if result.depth_available { "可用" } else { "不可用" },
      detect_elapsed
    );
    Ok(result)
  }

  /// 重新加载检测模型
  ///
  /// 旧模型先被释放；构建失败时检测器保持为空，后续帧不再产生检测结果。
  pub fn replace_detector<E, B>(&self, variant: DetectorVariant, build: B) -> Result<(), LoadError>
  where
    B: FnOnce(DetectorVariant, Accelerator) -> Result<D, E>,
    E: Display,
  {
    let mut engines = self.lock();
    engines.detector = None;

    let model = build(variant, engines.config.accelerator).map_err(|e| {
      error!("检测模型 {} 加载失败: {}", variant, e);
      LoadError::Detector {
        variant,
        reason: e.to_string(),
      }
    })?;

    let far_roi = engines.config.far_roi.then_some(engines.config.roi);
    engines.detector = Some(
      ObjectDetector::new(model, variant.target_size())
        .with_confidence(engines.config.confidence)
        .with_far_roi(far_roi),
    );
    info!("检测模型 {} 已加载", variant);
    Ok(())
  }

  /// 重新加载深度模型
  ///
  /// 先关闭旧的工作线程（等待其正在进行的推理结束），再在新线程内构建模型。
  /// 构建失败时深度估计保持为空。
  pub fn replace_depth<M, E, B>(&self, build: B) -> Result<(), LoadError>
  where
    M: Model<Input = RgbNhwcFrame, Output = DepthMap>,
    M::Error: Display,
    B: FnOnce(Accelerator) -> Result<M, E> + Send + 'static,
    E: Display,
  {
    let mut engines = self.lock();
    if let Some(worker) = engines.depth.take() {
      worker.shutdown();
    }

    let accelerator = engines.config.accelerator;
    let worker = DepthWorker::spawn_with(
      move || build(accelerator),
      engines.config.roi,
      engines.config.depth_grid,
    )
    .map_err(|e| match e {
      DepthError::Load(reason) => LoadError::Depth(reason),
      other => LoadError::Worker(other),
    })?;
    engines.depth = Some(worker);
    Ok(())
  }

  pub fn set_object_detection(&self, enabled: bool) {
    self.lock().config.object_detection = enabled;
    info!("目标检测已{}", if enabled { "开启" } else { "关闭" });
  }

  pub fn set_depth_estimation(&self, enabled: bool) {
    self.lock().config.depth_estimation = enabled;
    info!("深度估计已{}", if enabled { "开启" } else { "关闭" });
  }

  /// 切换远距离检测模式，对已加载的检测器立即生效
  pub fn set_far_roi(&self, enabled: bool) {
    let mut engines = self.lock();
    engines.config.far_roi = enabled;
    let far_roi = enabled.then_some(engines.config.roi);
    if let Some(detector) = engines.detector.as_mut() {
      detector.set_far_roi(far_roi);
    }
    info!("远距离检测已{}", if enabled { "开启" } else { "关闭" });
  }

  /// 只记录偏好，下一次 `replace_*` 时生效
  pub fn set_accelerator(&self, accelerator: Accelerator) {
    self.lock().config.accelerator = accelerator;
  }

  pub fn config(&self) -> CoordinatorConfig {
    self.lock().config.clone()
  }

  pub fn has_detector(&self) -> bool {
    self.lock().detector.is_some()
  }

  pub fn has_depth(&self) -> bool {
    self.lock().depth.is_some()
  }

  pub fn depth_stats(&self) -> Option<WorkerStats> {
    self.lock().depth.as_ref().map(DepthWorker::stats)
  }

  /// 等待深度工作线程空闲，没有工作线程时立即返回 `true`
  pub fn wait_depth_idle(&self, timeout: Duration) -> bool {
    self
      .lock()
      .depth
      .as_ref()
      .map(|worker| worker.wait_idle(timeout))
      .unwrap_or(true)
  }

  /// 停止深度工作线程并释放两个模型
  pub fn shutdown(&self) {
    let mut engines = self.lock();
    if let Some(worker) = engines.depth.take() {
      worker.shutdown();
    }
    engines.detector = None;
    info!("推理上下文已关闭");
  }
}
