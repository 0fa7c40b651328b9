// 该文件是 Qianshen （浅深） 项目的一部分。
// src/model/rknn_yolo.rs - RKNN 目标检测后端
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
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  config::{ConfigError, DetectorVariant},
  decoded_path,
  frame::RgbNhwcFrame,
  model::{DetectItem, DetectResult, Model},
};

const YOLO_NUM_INPUTS: u32 = 1;
const YOLO_NUM_OUTPUTS: u32 = 6;
const YOLO_STRIDES: [usize; 3] = [8, 16, 32];
/// 粗筛阈值，最终阈值由检测器配置
const YOLO_OBJECT_THRESH: f32 = 0.25;

#[derive(Error, Debug)]
pub enum RknnModelError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型无效: {0}, 错误: {1}")]
  ModelInvalid(String, rknpu::Error),
  #[error("RKNN 错误: {0}")]
  RknnError(#[from] rknpu::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("模型配置错误: {0}")]
  Config(#[from] ConfigError),
  #[error("输入尺寸不符: 期望 {expected}, 实际 {actual}")]
  InputShape { expected: usize, actual: usize },
  #[error("输出尺寸不符: 期望 {expected}, 实际 {actual}")]
  OutputShape { expected: usize, actual: usize },
}

impl RknnModelError {
  pub fn invalid(msg: &str, e: rknpu::Error) -> Self {
    RknnModelError::ModelInvalid(msg.to_string(), e)
  }
}

/// 读取模型文件、创建上下文并检查输入输出数量
pub(crate) fn load_context(
  model_path: &str,
  flags: InitFlags,
  num_inputs: u32,
  num_outputs: u32,
) -> Result<Context, RknnModelError> {
  info!("加载模型文件: {}", model_path);
  let model_data = std::fs::read(model_path)?;
  debug!(
    "模型文件大小: {:.2} MB",
    model_data.len() as f64 / (1024.0 * 1024.0)
  );

  let context = Context::new(&model_data, flags)?;
  match context.sdk_version() {
    Ok(version) => {
      if let Ok(api_ver) = version.api_version() {
        debug!("模型 API 版本: {}", api_ver);
      }
      if let Ok(drv_ver) = version.driver_version() {
        debug!("模型驱动版本: {}", drv_ver);
      }
    }
    Err(e) => {
      error!("查询 SDK 版本失败: {}", e);
      return Err(RknnModelError::invalid("无法查询 SDK 版本", e));
    }
  }

  let actual_inputs = context
    .num_inputs()
    .map_err(|e| RknnModelError::invalid("无法获取输入数量", e))?;
  let actual_outputs = context
    .num_outputs()
    .map_err(|e| RknnModelError::invalid("无法获取输出数量", e))?;
  if actual_inputs != num_inputs || actual_outputs != num_outputs {
    let msg = format!(
      "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
      num_inputs, num_outputs, actual_inputs, actual_outputs
    );
    error!("{}", msg);
    return Err(RknnModelError::invalid(&msg, rknpu::Error::InvalidModel));
  }

  info!("模型加载完成: {}", model_path);
  Ok(context)
}

pub(crate) fn check_input(input: &RgbNhwcFrame, size: usize) -> Result<(), RknnModelError> {
  if input.width() != size || input.height() != size {
    return Err(RknnModelError::InputShape {
      expected: size,
      actual: input.width(),
    });
  }
  Ok(())
}

/// NPU 上运行的 YOLO 检测器，输出按检测头分为回归与分类两组张量
pub struct RknnYolo {
  context: Context,
  variant: DetectorVariant,
}

pub struct RknnYoloBuilder {
  model_path: String,
  variant: DetectorVariant,
  flags: InitFlags,
}

impl FromUrlWithScheme for RknnYoloBuilder {
  const SCHEME: &'static str = "rknn";
}

impl FromUrl for RknnYoloBuilder {
  type Error = RknnModelError;

  /// `rknn:///path/yolo-generic-n.rknn?variant=generic-n`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(RknnModelError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let variant = match url.query_pairs().find(|(k, _)| k == "variant") {
      Some((_, v)) => v.parse::<DetectorVariant>()?,
      None => DetectorVariant::default(),
    };

    Ok(Self {
      model_path: decoded_path(url),
      variant,
      flags: InitFlags::default(),
    })
  }
}

impl RknnYoloBuilder {
  pub fn variant(&self) -> DetectorVariant {
    self.variant
  }

  pub fn build(self) -> Result<RknnYolo, RknnModelError> {
    let context = load_context(&self.model_path, self.flags, YOLO_NUM_INPUTS, YOLO_NUM_OUTPUTS)?;
    info!("检测模型变体: {}", self.variant);
    Ok(RknnYolo {
      context,
      variant: self.variant,
    })
  }
}

impl Model for RknnYolo {
  type Input = RgbNhwcFrame;
  type Output = DetectResult;
  type Error = RknnModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let size = self.variant.target_size();
    check_input(input, size)?;

    self
      .context
      .set_input(0, input.as_nhwc(), TensorFormat::NHWC, TensorType::UInt8)?;
    self.context.run()?;
    let output = self.context.get_outputs()?;

    Ok(decode_heads(&output, size))
  }
}

/// 按大小区分同一检测头的回归张量与分类张量，返回 (reg, cls, 类别数)
fn split_reg_cls<'a>(
  tensor1: &'a [f32],
  tensor2: &'a [f32],
  spatial: usize,
) -> Option<(&'a [f32], &'a [f32], usize)> {
  let reg_expected = 4 * spatial;
  let (reg, cls) = if tensor1.len() == reg_expected {
    (tensor1, tensor2)
  } else if tensor2.len() == reg_expected {
    (tensor2, tensor1)
  } else {
    return None;
  };
  if cls.is_empty() || cls.len() % spatial != 0 {
    return None;
  }
  Some((reg, cls, cls.len() / spatial))
}

fn decode_heads(output: &rknpu::Output, input_size: usize) -> DetectResult {
  let extent = input_size as f32;
  let mut items = Vec::new();

  for (head_idx, stride) in YOLO_STRIDES.iter().copied().enumerate() {
    let (map_h, map_w) = (input_size / stride, input_size / stride);
    let spatial = map_h * map_w;

    let (tensor1, tensor2) = match (output.get_f32(head_idx * 2), output.get_f32(head_idx * 2 + 1)) {
      (Ok(t1), Ok(t2)) => (t1, t2),
      (Err(e), _) | (_, Err(e)) => {
        error!("获取检测头 {} 的输出失败: {}", head_idx, e);
        continue;
      }
    };
    let Some((reg, cls, class_num)) = split_reg_cls(tensor1, tensor2, spatial) else {
      error!(
        "检测头 {}: 输出大小不匹配 - {} / {}, 空间大小 {}",
        head_idx,
        tensor1.len(),
        tensor2.len(),
        spatial
      );
      continue;
    };

    for h in 0..map_h {
      for w in 0..map_w {
        let idx = h * map_w + w;
        let (max_logit, class_id) = (0..class_num)
          .map(|c| (cls[c * spatial + idx], c))
          .fold((f32::MIN, 0), |best, cur| if cur.0 > best.0 { cur } else { best });
        let score = sigmoid(max_logit);
        if score <= YOLO_OBJECT_THRESH {
          continue;
        }

        let grid_x = w as f32 + 0.5;
        let grid_y = h as f32 + 0.5;
        let stride = stride as f32;
        let xmin = ((grid_x - reg[idx]) * stride).clamp(0.0, extent);
        let ymin = ((grid_y - reg[spatial + idx]) * stride).clamp(0.0, extent);
        let xmax = ((grid_x + reg[2 * spatial + idx]) * stride).clamp(0.0, extent);
        let ymax = ((grid_y + reg[3 * spatial + idx]) * stride).clamp(0.0, extent);
        if xmax <= xmin || ymax <= ymin {
          continue;
        }

        items.push(DetectItem {
          class_id: class_id as u32,
          score,
          bbox: [xmin / extent, ymin / extent, xmax / extent, ymax / extent],
        });
      }
    }
  }

  debug!("解码得到 {} 个候选框", items.len());
  DetectResult::from(items)
}

fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn reg_and_cls_are_told_apart_by_size() {
    let reg = vec![0.0; 16];
    let cls = vec![0.0; 12];
    let (r, c, classes) = split_reg_cls(&cls, &reg, 4).unwrap();
    assert_eq!((r.len(), c.len(), classes), (16, 12, 3));
    assert!(split_reg_cls(&[0.0; 5], &[0.0; 7], 4).is_none());
  }

  #[test]
  fn variant_comes_from_query() {
    let url = Url::parse("rknn:///opt/models/yolo-marine-s.rknn?variant=marine-s").unwrap();
    let builder = RknnYoloBuilder::from_url(&url).unwrap();
    assert_eq!(builder.variant().to_string(), "marine-s");
    let url = Url::parse("rknn:///opt/models/yolo.rknn?variant=marine-x").unwrap();
    assert!(matches!(
      RknnYoloBuilder::from_url(&url),
      Err(RknnModelError::Config(_))
    ));
  }
}
