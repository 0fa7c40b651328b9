// 该文件是 Qianshen （浅深） 项目的一部分。
// src/output.rs - 结果发布
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
use thiserror::Error;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  config::DEFAULT_DISPLAY_SIZE,
  dispatch::FusedResult,
  geometry,
};

mod json_lines;
mod tracing_sink;

pub use self::json_lines::{JsonLinesFileSink, JsonLinesSink, JsonLinesSinkError};
pub use self::tracing_sink::TracingSink;

/// 宿主回调边界
pub trait HostSink {
  type Error;
  fn on_objects(&mut self, arrays: &PublishedArrays) -> Result<(), Self::Error>;
  fn on_status(&mut self, status: &str) -> Result<(), Self::Error>;
}

/// 一帧结果打包成的平铺数组，各数组等长（深度数组可为空）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishedArrays {
  pub labels: Vec<i32>,
  pub scores: Vec<f32>,
  pub x: Vec<i32>,
  pub y: Vec<i32>,
  pub width: Vec<i32>,
  pub height: Vec<i32>,
  /// 深度关闭或本帧不可用时为空；否则与物体等长，缺失分数记为 0
  pub depth: Vec<f32>,
  pub timestamp: DateTime<Utc>,
}

impl PublishedArrays {
  pub fn len(&self) -> usize {
    self.labels.len()
  }

  pub fn is_empty(&self) -> bool {
    self.labels.is_empty()
  }

  /// 按显示尺寸把归一化结果打包
  pub fn pack(result: &FusedResult, display_width: u32, display_height: u32) -> Self {
    let mut arrays = PublishedArrays {
      timestamp: result.timestamp,
      ..Default::default()
    };
    for fused in &result.objects {
      let rect = geometry::denormalize(fused.object.rect, display_width, display_height);
      arrays.labels.push(fused.object.label as i32);
      arrays.scores.push(fused.object.score);
      arrays.x.push(rect.x.round() as i32);
      arrays.y.push(rect.y.round() as i32);
      arrays.width.push(rect.width.round() as i32);
      arrays.height.push(rect.height.round() as i32);
    }
    if result.depth_enabled && result.depth_available {
      arrays.depth = result
        .objects
        .iter()
        .map(|fused| fused.depth.unwrap_or(0.0))
        .collect();
    }
    arrays
  }
}

/// 把融合结果送往宿主
pub struct Publisher<S> {
  sink: S,
  display_size: (u32, u32),
}

impl<S: HostSink> Publisher<S> {
  pub fn new(sink: S) -> Self {
    Self {
      sink,
      display_size: DEFAULT_DISPLAY_SIZE,
    }
  }

  pub fn with_display_size(mut self, width: u32, height: u32) -> Self {
    self.display_size = (width, height);
    self
  }

  pub fn publish(&mut self, result: &FusedResult) -> Result<PublishedArrays, S::Error> {
    let (width, height) = self.display_size;
    let arrays = PublishedArrays::pack(result, width, height);
    self.sink.on_objects(&arrays)?;
    Ok(arrays)
  }

  pub fn publish_status(&mut self, status: &str) -> Result<(), S::Error> {
    self.sink.on_status(status)
  }

  pub fn sink(&self) -> &S {
    &self.sink
  }

  pub fn into_sink(self) -> S {
    self.sink
  }
}

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("JSON 输出错误: {0}")]
  JsonLines(#[from] JsonLinesSinkError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 按 URL 选择的输出
///
/// - `log://`：通过 `tracing` 记录
/// - `jsonl:///path/out.jsonl`：写 JSON Lines 文件
/// - `stdout://`：向标准输出写 JSON Lines
pub enum SinkWrapper {
  Tracing(TracingSink),
  File(JsonLinesFileSink),
  Stdout(JsonLinesSink<std::io::Stdout>),
}

const STDOUT_SCHEME: &str = "stdout";

impl FromUrl for SinkWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      TracingSink::SCHEME => Ok(SinkWrapper::Tracing(TracingSink::default())),
      JsonLinesFileSink::SCHEME => Ok(SinkWrapper::File(JsonLinesFileSink::from_url(url)?)),
      STDOUT_SCHEME => Ok(SinkWrapper::Stdout(JsonLinesSink::new(std::io::stdout()))),
      other => Err(OutputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl HostSink for SinkWrapper {
  type Error = OutputError;

  fn on_objects(&mut self, arrays: &PublishedArrays) -> Result<(), Self::Error> {
    match self {
      SinkWrapper::Tracing(sink) => match sink.on_objects(arrays) {
        Ok(()) => Ok(()),
        Err(never) => match never {},
      },
      SinkWrapper::File(sink) => sink.on_objects(arrays).map_err(OutputError::from),
      SinkWrapper::Stdout(sink) => sink.on_objects(arrays).map_err(OutputError::from),
    }
  }

  fn on_status(&mut self, status: &str) -> Result<(), Self::Error> {
    match self {
      SinkWrapper::Tracing(sink) => match sink.on_status(status) {
        Ok(()) => Ok(()),
        Err(never) => match never {},
      },
      SinkWrapper::File(sink) => sink.on_status(status).map_err(OutputError::from),
      SinkWrapper::Stdout(sink) => sink.on_status(status).map_err(OutputError::from),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    detector::NormalizedObject,
    dispatch::FusedObject,
    geometry::NormRect,
  };

  #[derive(Default)]
  struct Recorder {
    frames: Vec<PublishedArrays>,
    status: Vec<String>,
  }

  impl HostSink for Recorder {
    type Error = std::convert::Infallible;

    fn on_objects(&mut self, arrays: &PublishedArrays) -> Result<(), Self::Error> {
      self.frames.push(arrays.clone());
      Ok(())
    }

    fn on_status(&mut self, status: &str) -> Result<(), Self::Error> {
      self.status.push(status.to_string());
      Ok(())
    }
  }

  fn result(depth_enabled: bool, depth_available: bool) -> FusedResult {
    let object = |label, x| NormalizedObject {
      label,
      score: 0.75,
      rect: NormRect {
        x,
        y: 0.5,
        width: 0.25,
        height: 0.5,
      },
    };
    FusedResult {
      objects: vec![
        FusedObject {
          object: object(1, 0.0),
          depth: Some(0.4),
        },
        FusedObject {
          object: object(2, 0.5),
          depth: None,
        },
      ],
      depth_enabled,
      depth_available,
      detector_active: true,
      timestamp: Utc::now(),
    }
  }

  #[test]
  fn arrays_are_scaled_to_display() {
    let mut publisher = Publisher::new(Recorder::default());
    let arrays = publisher.publish(&result(true, true)).unwrap();
    assert_eq!(arrays.labels, vec![1, 2]);
    assert_eq!(arrays.x, vec![0, 960]);
    assert_eq!(arrays.y, vec![540, 540]);
    assert_eq!(arrays.width, vec![480, 480]);
    assert_eq!(arrays.height, vec![540, 540]);
    assert_eq!(arrays.depth, vec![0.4, 0.0]);
    assert_eq!(publisher.sink().frames.len(), 1);
  }

  #[test]
  fn depth_array_is_empty_when_unavailable() {
    let mut publisher = Publisher::new(Recorder::default()).with_display_size(640, 360);
    assert!(publisher.publish(&result(false, false)).unwrap().depth.is_empty());
    let arrays = publisher.publish(&result(true, false)).unwrap();
    assert!(arrays.depth.is_empty());
    assert_eq!(arrays.x, vec![0, 320]);
  }

  #[test]
  fn status_is_forwarded() {
    let mut publisher = Publisher::new(Recorder::default());
    publisher.publish_status("管道已启动").unwrap();
    assert_eq!(publisher.into_sink().status, vec!["管道已启动".to_string()]);
  }

  #[test]
  fn unknown_sink_scheme_is_rejected() {
    let url = Url::parse("rtsp://127.0.0.1/live").unwrap();
    assert!(matches!(
      SinkWrapper::from_url(&url),
      Err(OutputError::SchemeMismatch(_))
    ));
    let url = Url::parse("log://").unwrap();
    assert!(matches!(SinkWrapper::from_url(&url), Ok(SinkWrapper::Tracing(_))));
  }
}
