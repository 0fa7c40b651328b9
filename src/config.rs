// 该文件是 Qianshen （浅深） 项目的一部分。
// src/config.rs - 推理协调配置
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

use std::{fmt, str::FromStr};

use thiserror::Error;

use crate::geometry::{GeometryError, RegionOfInterest};

/// 深度模型的默认网格边长
pub const DEFAULT_DEPTH_GRID: usize = 256;
/// 宿主显示尺寸
pub const DEFAULT_DISPLAY_SIZE: (u32, u32) = (1920, 1080);
pub const DEFAULT_CONFIDENCE: f32 = 0.6;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
  #[error("未知的检测模型: {0}")]
  UnknownVariant(String),
  #[error("未知的加速器: {0}")]
  UnknownAccelerator(String),
  #[error("ROI 无效: {0}")]
  Roi(#[from] GeometryError),
  #[error("深度网格大小必须大于 0")]
  EmptyGrid,
  #[error("置信度阈值超出 [0, 1]: {0}")]
  Confidence(f32),
  #[error("显示尺寸无效: {0}x{1}")]
  Display(u32, u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Accelerator {
  #[default]
  Cpu,
  Gpu,
}

impl FromStr for Accelerator {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "cpu" | "0" => Ok(Accelerator::Cpu),
      "gpu" | "1" => Ok(Accelerator::Gpu),
      other => Err(ConfigError::UnknownAccelerator(other.to_string())),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scene {
  Generic,
  Marine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelScale {
  Nano,
  Small,
}

/// 检测模型变体，以名称而非下标选择
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorVariant {
  pub scene: Scene,
  pub scale: ModelScale,
}

impl DetectorVariant {
  pub const GENERIC_NANO: Self = Self {
    scene: Scene::Generic,
    scale: ModelScale::Nano,
  };

  /// 模型的方形输入边长
  pub fn target_size(&self) -> usize {
    match self.scale {
      ModelScale::Nano | ModelScale::Small => 320,
    }
  }

  /// 模型文件名（不含扩展名）
  pub fn file_stem(&self) -> String {
    format!("yolo-{}", self)
  }
}

impl Default for DetectorVariant {
  fn default() -> Self {
    Self::GENERIC_NANO
  }
}

impl fmt::Display for DetectorVariant {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let scene = match self.scene {
      Scene::Generic => "generic",
      Scene::Marine => "marine",
    };
    let scale = match self.scale {
      ModelScale::Nano => "n",
      ModelScale::Small => "s",
    };
    write!(f, "{}-{}", scene, scale)
  }
}

impl FromStr for DetectorVariant {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (scene, scale) = s
      .split_once('-')
      .ok_or_else(|| ConfigError::UnknownVariant(s.to_string()))?;
    let scene = match scene {
      "generic" => Scene::Generic,
      "marine" => Scene::Marine,
      _ => return Err(ConfigError::UnknownVariant(s.to_string())),
    };
    let scale = match scale {
      "n" => ModelScale::Nano,
      "s" => ModelScale::Small,
      _ => return Err(ConfigError::UnknownVariant(s.to_string())),
    };
    Ok(Self { scene, scale })
  }
}

/// 分发循环与深度工作线程的运行配置
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
  /// 深度模型处理的整帧子区域，同时也是远距离检测的偏置区域
  pub roi: RegionOfInterest,
  pub depth_grid: usize,
  pub accelerator: Accelerator,
  pub far_roi: bool,
  pub object_detection: bool,
  pub depth_estimation: bool,
  pub confidence: f32,
  pub display_size: (u32, u32),
}

impl CoordinatorConfig {
  pub fn new(roi: RegionOfInterest) -> Self {
    Self {
      roi,
      depth_grid: DEFAULT_DEPTH_GRID,
      accelerator: Accelerator::default(),
      far_roi: false,
      object_detection: true,
      depth_estimation: true,
      confidence: DEFAULT_CONFIDENCE,
      display_size: DEFAULT_DISPLAY_SIZE,
    }
  }

  pub fn with_depth_grid(mut self, depth_grid: usize) -> Self {
    self.depth_grid = depth_grid;
    self
  }

  pub fn with_accelerator(mut self, accelerator: Accelerator) -> Self {
    self.accelerator = accelerator;
    self
  }

  pub fn with_far_roi(mut self, far_roi: bool) -> Self {
    self.far_roi = far_roi;
    self
  }

  pub fn with_object_detection(mut self, enabled: bool) -> Self {
    self.object_detection = enabled;
    self
  }

  pub fn with_depth_estimation(mut self, enabled: bool) -> Self {
    self.depth_estimation = enabled;
    self
  }

  pub fn with_confidence(mut self, confidence: f32) -> Self {
    self.confidence = confidence;
    self
  }

  pub fn with_display_size(mut self, width: u32, height: u32) -> Self {
    self.display_size = (width, height);
    self
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.depth_grid == 0 {
      return Err(ConfigError::EmptyGrid);
    }
    if !(0.0..=1.0).contains(&self.confidence) {
      return Err(ConfigError::Confidence(self.confidence));
    }
    let (w, h) = self.display_size;
    if w == 0 || h == 0 {
      return Err(ConfigError::Display(w, h));
    }
    Ok(())
  }
}

/// 解析 `x,y,w,h` 形式的 ROI
pub fn parse_roi(s: &str) -> Result<RegionOfInterest, String> {
  let parts = s
    .split(',')
    .map(|p| p.trim().parse::<u32>())
    .collect::<Result<Vec<_>, _>>()
    .map_err(|e| format!("ROI 格式应为 x,y,w,h: {}", e))?;
  match parts.as_slice() {
    &[x, y, w, h] => RegionOfInterest::new(x, y, w, h).map_err(|e| e.to_string()),
    _ => Err(format!("ROI 需要 4 个分量, 实际 {}", parts.len())),
  }
}
