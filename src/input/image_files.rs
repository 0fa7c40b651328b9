// 该文件是 Qianshen （浅深） 项目的一部分。
// src/input/image_files.rs - 图像文件输入
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
  collections::VecDeque,
  path::{Path, PathBuf},
};

use chrono::Utc;
use image::ImageReader;
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, decoded_path, frame::Frame};

#[derive(Error, Debug)]
pub enum ImageFilesInputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("目录中没有图像: {0}")]
  Empty(String),
}

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// 逐个解码图像文件作为帧序列
///
/// `image:///path/a.jpg` 读取单张图像，`image:///path/dir` 按文件名顺序读取目录
/// 中的图像，`?repeat=N` 把整个序列重复 N 次。
pub struct ImageFilesInput {
  queue: VecDeque<PathBuf>,
}

impl ImageFilesInput {
  pub fn from_paths(paths: Vec<PathBuf>, repeat: usize) -> Self {
    let queue = (0..repeat.max(1))
      .flat_map(|_| paths.iter().cloned())
      .collect();
    Self { queue }
  }

  pub fn remaining(&self) -> usize {
    self.queue.len()
  }

  fn collect_dir(dir: &Path) -> Result<Vec<PathBuf>, ImageFilesInputError> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
      .filter_map(|entry| entry.ok().map(|e| e.path()))
      .filter(|path| {
        path
          .extension()
          .and_then(|ext| ext.to_str())
          .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
          .unwrap_or(false)
      })
      .collect();
    paths.sort();
    Ok(paths)
  }
}

impl FromUrlWithScheme for ImageFilesInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFilesInput {
  type Error = ImageFilesInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFilesInputError::SchemeMismatch(url.scheme().to_string()));
    }

    let path = PathBuf::from(decoded_path(url));
    let paths = if path.is_dir() {
      Self::collect_dir(&path)?
    } else {
      vec![path.clone()]
    };
    if paths.is_empty() {
      return Err(ImageFilesInputError::Empty(path.display().to_string()));
    }

    let repeat = url
      .query_pairs()
      .find(|(k, _)| k == "repeat")
      .and_then(|(_, v)| v.parse::<usize>().ok())
      .unwrap_or(1);

    info!("图像输入: {} 个文件, 重复 {} 次", paths.len(), repeat);
    Ok(Self::from_paths(paths, repeat))
  }
}

impl Iterator for ImageFilesInput {
  type Item = Frame;

  /// 解码失败的文件被跳过
  fn next(&mut self) -> Option<Self::Item> {
    while let Some(path) = self.queue.pop_front() {
      let decoded = ImageReader::open(&path)
        .map_err(image::ImageError::IoError)
        .and_then(|reader| reader.decode());
      match decoded {
        Ok(image) => return Some(Frame::new(image.into_rgb8(), Utc::now())),
        Err(e) => error!("无法读取图像 {}: {}", path.display(), e),
      }
    }
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{Rgb, RgbImage};

  #[test]
  fn directory_is_read_in_order() {
    let dir = tempfile::tempdir().unwrap();
    for (name, value) in [("b.png", 20u8), ("a.png", 10u8)] {
      RgbImage::from_pixel(4, 2, Rgb([value, 0, 0]))
        .save(dir.path().join(name))
        .unwrap();
    }
    std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

    let url = Url::parse(&format!("image://{}?repeat=2", dir.path().display())).unwrap();
    let input = ImageFilesInput::from_url(&url).unwrap();
    assert_eq!(input.remaining(), 4);
    let reds: Vec<u8> = input.map(|f| f.image().get_pixel(0, 0)[0]).collect();
    assert_eq!(reds, vec![10, 20, 10, 20]);
  }

  #[test]
  fn unreadable_files_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let bad = dir.path().join("bad.png");
    std::fs::write(&bad, "not an image").unwrap();
    let mut input = ImageFilesInput::from_paths(vec![bad], 1);
    assert!(input.next().is_none());
  }

  #[test]
  fn empty_directory_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let url = Url::parse(&format!("image://{}", dir.path().display())).unwrap();
    assert!(matches!(
      ImageFilesInput::from_url(&url),
      Err(ImageFilesInputError::Empty(_))
    ));
  }
}
