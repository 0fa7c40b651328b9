// 该文件是 Qianshen （浅深） 项目的一部分。
// src/output/json_lines.rs - JSON Lines 输出
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

use std::{
  fs::File,
  io::{BufWriter, Write},
  path::Path,
};

use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme, decoded_path,
  output::{HostSink, PublishedArrays},
};

#[derive(Error, Debug)]
pub enum JsonLinesSinkError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("序列化错误: {0}")]
  Serialize(#[from] serde_json::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 写文件的 JSON Lines 输出
pub type JsonLinesFileSink = JsonLinesSink<BufWriter<File>>;

/// 每帧一行 JSON，状态消息同样一行
pub struct JsonLinesSink<W: Write> {
  writer: W,
}

impl<W: Write> JsonLinesSink<W> {
  pub fn new(writer: W) -> Self {
    Self { writer }
  }

  pub fn into_inner(self) -> W {
    self.writer
  }

  fn write_line(&mut self, value: &serde_json::Value) -> Result<(), JsonLinesSinkError> {
    serde_json::to_writer(&mut self.writer, value)?;
    self.writer.write_all(b"\n")?;
    self.writer.flush()?;
    Ok(())
  }
}

impl FromUrlWithScheme for JsonLinesFileSink {
  const SCHEME: &'static str = "jsonl";
}

impl FromUrl for JsonLinesFileSink {
  type Error = JsonLinesSinkError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(JsonLinesSinkError::SchemeMismatch(format!(
        "期望输出方式 '{}', 实际输出方式 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    let path = decoded_path(url);
    let path = Path::new(&path);
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    info!("结果写入: {}", path.display());
    Ok(Self::new(BufWriter::new(file)))
  }
}

impl<W: Write> HostSink for JsonLinesSink<W> {
  type Error = JsonLinesSinkError;

  fn on_objects(&mut self, arrays: &PublishedArrays) -> Result<(), Self::Error> {
    let value = json!({
      "timestamp": arrays.timestamp.to_rfc3339(),
      "labels": arrays.labels,
      "scores": arrays.scores,
      "x": arrays.x,
      "y": arrays.y,
      "width": arrays.width,
      "height": arrays.height,
      "depth": arrays.depth,
    });
    self.write_line(&value)
  }

  fn on_status(&mut self, status: &str) -> Result<(), Self::Error> {
    if status.is_empty() {
      warn!("忽略空状态消息");
      return Ok(());
    }
    self.write_line(&json!({ "status": status }))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Utc;
  use std::io::{BufRead, BufReader};

  #[test]
  fn writes_one_object_per_line() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out").join("result.jsonl");
    let url = Url::parse(&format!("jsonl://{}", path.display())).unwrap();

    let mut sink = JsonLinesFileSink::from_url(&url).unwrap();
    let arrays = PublishedArrays {
      labels: vec![3],
      scores: vec![0.5],
      x: vec![10],
      y: vec![20],
      width: vec![30],
      height: vec![40],
      depth: vec![0.25],
      timestamp: Utc::now(),
    };
    sink.on_objects(&arrays).unwrap();
    sink.on_status("停止").unwrap();
    drop(sink);

    let lines: Vec<String> = BufReader::new(File::open(&path).unwrap())
      .lines()
      .map(|l| l.unwrap())
      .collect();
    assert_eq!(lines.len(), 2);
    let first: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
    assert_eq!(first["labels"], json!([3]));
    assert_eq!(first["depth"], json!([0.25]));
    let second: serde_json::Value = serde_json::from_str(&lines[1]).unwrap();
    assert_eq!(second["status"], "停止");
  }

  #[test]
  fn scheme_is_checked() {
    let url = Url::parse("file:///tmp/out.jsonl").unwrap();
    assert!(matches!(
      JsonLinesFileSink::from_url(&url),
      Err(JsonLinesSinkError::SchemeMismatch(_))
    ));
  }

  #[test]
  fn in_memory_writer() {
    let mut sink = JsonLinesSink::new(Vec::new());
    sink.on_objects(&PublishedArrays::default()).unwrap();
    let text = String::from_utf8(sink.into_inner()).unwrap();
    assert!(text.ends_with('\n'));
    assert!(text.contains("\"labels\":[]"));
  }
}
