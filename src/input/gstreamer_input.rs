// 该文件是 Qianshen （浅深） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 输入
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

//! # GStreamer appsink 输入
//!
//! 管道的尾部固定为
//! `queue leaky=2 max-size-buffers=2 ! videoscale ! videoconvert ! video/x-raw,format=BGR,... ! appsink max-buffers=2 drop=true`，
//! 上游在背压时丢帧，分发循环拿到的永远是较新的帧，不会无界排队。
//!
//! 支持的 URL：
//! - `gst://rtsp/192.168.1.10:8554/live?latency=100`
//! - `gst://file/path/to/video.mp4`
//! - `gst://camera/dev/video0?fps=15`
//!
//! 共用参数 `width`、`height`（默认 960x540）。
//!
//! 使用前需要安装 GStreamer 开发库，例如 Ubuntu/Debian 上：
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```

use std::collections::HashMap;

use chrono::Utc;
use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme, decoded_path,
  frame::{Frame, FrameAccess, FrameAccessError, PixelFormat, strided_to_rgb},
};

const DEFAULT_WIDTH: u32 = 960;
const DEFAULT_HEIGHT: u32 = 540;
const DEFAULT_FPS: u32 = 15;
const DEFAULT_LATENCY_MS: u32 = 100;

#[derive(Error, Debug)]
pub enum GStreamerInputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("未知的视频源: {0}")]
  UnknownSource(String),
  #[error("GStreamer 错误: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer 操作失败: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("找不到 appsink 元素")]
  AppSinkNotFound,
  #[error("管道错误: {0}")]
  PipelineError(String),
  #[error("状态切换失败: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

enum Source {
  Rtsp { location: String, latency: u32 },
  File(String),
  Camera { device: String, fps: u32 },
}

impl Source {
  fn to_pipeline(&self) -> String {
    match self {
      Source::Rtsp { location, latency } => format!(
        "rtspsrc location={} latency={} drop-on-latency=true ! decodebin",
        location, latency
      ),
      Source::File(path) => format!("filesrc location={} ! decodebin", path),
      Source::Camera { device, fps } => format!(
        "v4l2src device={} ! video/x-raw,framerate={}/1",
        device, fps
      ),
    }
  }
}

/// 构建带丢帧尾部的 appsink 管道
pub struct GStreamerInputPipelineBuilder {
  source: Source,
  width: u32,
  height: u32,
}

impl GStreamerInputPipelineBuilder {
  pub fn rtsp(location: &str) -> Self {
    Self::with_source(Source::Rtsp {
      location: location.to_string(),
      latency: DEFAULT_LATENCY_MS,
    })
  }

  pub fn file(path: &str) -> Self {
    Self::with_source(Source::File(path.to_string()))
  }

  pub fn camera(device: &str, fps: u32) -> Self {
    Self::with_source(Source::Camera {
      device: device.to_string(),
      fps,
    })
  }

  fn with_source(source: Source) -> Self {
    Self {
      source,
      width: DEFAULT_WIDTH,
      height: DEFAULT_HEIGHT,
    }
  }

  pub fn resolution(mut self, width: u32, height: u32) -> Self {
    self.width = width;
    self.height = height;
    self
  }

  pub fn description(&self) -> String {
    format!(
      "{} ! queue leaky=2 max-size-buffers=2 ! videoscale ! videoconvert ! \
       video/x-raw,format=BGR,width={},height={} ! \
       appsink max-buffers=2 drop=true name=sink",
      self.source.to_pipeline(),
      self.width,
      self.height
    )
  }

  pub fn build(self) -> Result<GStreamerInput, GStreamerInputError> {
    gst::init()?;

    let description = self.description();
    info!("GStreamer 管道: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("无法创建管道".to_string()))?;
    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkNotFound)?;

    pipeline.set_state(gst::State::Playing)?;

    Ok(GStreamerInput { pipeline, appsink })
  }
}

impl FromUrlWithScheme for GStreamerInputPipelineBuilder {
  const SCHEME: &'static str = "gst";
}

impl FromUrl for GStreamerInputPipelineBuilder {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(GStreamerInputError::SchemeMismatch(url.scheme().to_string()));
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();
    let number = |key: &str, default: u32| {
      query
        .get(key)
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
    };

    let builder = match url.host_str() {
      Some("rtsp") => {
        let location = format!("rtsp:/{}", url.path());
        Self::with_source(Source::Rtsp {
          location,
          latency: number("latency", DEFAULT_LATENCY_MS),
        })
      }
      Some("file") => Self::file(&decoded_path(url)),
      Some("camera") => Self::camera(url.path(), number("fps", DEFAULT_FPS)),
      other => {
        return Err(GStreamerInputError::UnknownSource(
          other.unwrap_or_default().to_string(),
        ));
      }
    };

    Ok(builder.resolution(
      number("width", DEFAULT_WIDTH),
      number("height", DEFAULT_HEIGHT),
    ))
  }
}

/// 运行中的管道，迭代产出未映射的样本
pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("无法停止 GStreamer 管道: {}", e);
    }
  }
}

impl Iterator for GStreamerInput {
  type Item = SampleFrame;

  fn next(&mut self) -> Option<Self::Item> {
    match self.appsink.pull_sample() {
      Ok(sample) => Some(SampleFrame { sample }),
      Err(e) => {
        error!("无法获取样本: {}", e);
        None
      }
    }
  }
}

/// appsink 交出的一帧，映射在分发时才进行
pub struct SampleFrame {
  sample: gst::Sample,
}

impl FrameAccess for SampleFrame {
  fn access(self) -> Result<Frame, FrameAccessError> {
    let buffer = self
      .sample
      .buffer()
      .ok_or_else(|| FrameAccessError::MapFailed("样本中没有缓冲区".to_string()))?;
    let caps = self
      .sample
      .caps()
      .ok_or_else(|| FrameAccessError::MapFailed("样本中没有 caps".to_string()))?;
    let info = gst_video::VideoInfo::from_caps(caps)
      .map_err(|e| FrameAccessError::MapFailed(e.to_string()))?;

    let format = match info.format() {
      gst_video::VideoFormat::Rgb => PixelFormat::Rgb,
      gst_video::VideoFormat::Bgr => PixelFormat::Bgr,
      other => return Err(FrameAccessError::UnsupportedFormat(format!("{:?}", other))),
    };

    let stride = info
      .stride()
      .first()
      .and_then(|&s| usize::try_from(s).ok())
      .ok_or_else(|| FrameAccessError::MapFailed("无效的行跨度".to_string()))?;

    let map = buffer
      .map_readable()
      .map_err(|e| FrameAccessError::MapFailed(e.to_string()))?;
    // BGR 行按 4 字节对齐，宽度不是 4 的倍数时行尾有填充
    let image = strided_to_rgb(map.as_slice(), info.width(), info.height(), stride, format)?;
    Ok(Frame::new(image, Utc::now()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rtsp_url_builds_leaky_tail() {
    let url = Url::parse("gst://rtsp/10.0.0.2:8554/live?width=640&height=360").unwrap();
    let description = GStreamerInputPipelineBuilder::from_url(&url)
      .unwrap()
      .description();
    assert!(description.starts_with("rtspsrc location=rtsp://10.0.0.2:8554/live latency=100"));
    assert!(description.contains("queue leaky=2 max-size-buffers=2"));
    assert!(description.contains("format=BGR,width=640,height=360"));
    assert!(description.ends_with("appsink max-buffers=2 drop=true name=sink"));
  }

  #[test]
  fn unknown_source_is_rejected() {
    let url = Url::parse("gst://screen/0").unwrap();
    assert!(matches!(
      GStreamerInputPipelineBuilder::from_url(&url),
      Err(GStreamerInputError::UnknownSource(_))
    ));
  }
}
