// 该文件是 Qianshen （浅深） 项目的一部分。
// tests/common/mod.rs - 测试用模拟推理引擎
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

#![allow(dead_code)]

use std::{
  convert::Infallible,
  sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
    mpsc::{self, Receiver, Sender},
  },
  thread,
  time::Duration,
};

use chrono::Utc;
use image::{Rgb, RgbImage};
use qianshen::{
  frame::{Frame, RgbNhwcFrame},
  model::{DepthMap, DetectItem, DetectResult, Model},
};

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// 推理过程的计数器
#[derive(Default)]
pub struct Counters {
  active: AtomicUsize,
  max_active: AtomicUsize,
  calls: AtomicUsize,
  drops: AtomicUsize,
}

impl Counters {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn max_active(&self) -> usize {
    self.max_active.load(Ordering::SeqCst)
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn drops(&self) -> usize {
    self.drops.load(Ordering::SeqCst)
  }
}

/// 每次推理先通知进入，再等待放行
pub struct Gate {
  entered: Sender<()>,
  release: Mutex<Receiver<()>>,
}

pub struct GateHandle {
  pub entered: Receiver<()>,
  pub release: Sender<()>,
}

impl GateHandle {
  pub fn wait_entered(&self) {
    self.entered.recv_timeout(TIMEOUT).unwrap();
  }

  pub fn open(&self) {
    self.release.send(()).unwrap();
  }
}

pub fn gate() -> (Gate, GateHandle) {
  let (entered_tx, entered_rx) = mpsc::channel();
  let (release_tx, release_rx) = mpsc::channel();
  (
    Gate {
      entered: entered_tx,
      release: Mutex::new(release_rx),
    },
    GateHandle {
      entered: entered_rx,
      release: release_tx,
    },
  )
}

type DepthFn = Box<dyn Fn(&RgbNhwcFrame, usize) -> Result<DepthMap, String> + Send>;

/// 可插桩的深度模型：输出由闭包决定，推理次数从 0 计
pub struct ScriptedModel {
  counters: Arc<Counters>,
  output: DepthFn,
  gate: Option<Gate>,
  delay: Duration,
}

impl ScriptedModel {
  pub fn new<F>(counters: Arc<Counters>, output: F) -> Self
  where
    F: Fn(&RgbNhwcFrame, usize) -> Result<DepthMap, String> + Send + 'static,
  {
    Self {
      counters,
      output: Box::new(output),
      gate: None,
      delay: Duration::ZERO,
    }
  }

  pub fn with_gate(mut self, gate: Gate) -> Self {
    self.gate = Some(gate);
    self
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }
}

impl Model for ScriptedModel {
  type Input = RgbNhwcFrame;
  type Output = DepthMap;
  type Error = String;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let active = self.counters.active.fetch_add(1, Ordering::SeqCst) + 1;
    self.counters.max_active.fetch_max(active, Ordering::SeqCst);
    let call = self.counters.calls.fetch_add(1, Ordering::SeqCst);

    if let Some(gate) = &self.gate {
      let _ = gate.entered.send(());
      let _ = gate.release.lock().unwrap().recv();
    }
    if !self.delay.is_zero() {
      thread::sleep(self.delay);
    }
    let result = (self.output)(input, call);

    self.counters.active.fetch_sub(1, Ordering::SeqCst);
    result
  }
}

impl Drop for ScriptedModel {
  fn drop(&mut self) {
    self.counters.drops.fetch_add(1, Ordering::SeqCst);
  }
}

/// `size`x`size` 的常数深度图，`cells` 中的格子另行赋值
pub fn depth_map(size: usize, fill: f32, cells: &[((usize, usize), f32)]) -> DepthMap {
  let mut values = vec![fill; size * size];
  for &((col, row), value) in cells {
    values[row * size + col] = value;
  }
  DepthMap::from_vec(size, values).unwrap()
}

pub fn uniform_frame(width: u32, height: u32, red: u8) -> Frame {
  Frame::new(RgbImage::from_pixel(width, height, Rgb([red, 0, 0])), Utc::now())
}

/// 固定输出若干框的检测模型
pub struct BoxDetector {
  items: Vec<DetectItem>,
}

impl BoxDetector {
  pub fn new(boxes: &[(u32, [f32; 4])]) -> Self {
    Self {
      items: boxes
        .iter()
        .map(|&(class_id, bbox)| DetectItem {
          class_id,
          score: 0.9,
          bbox,
        })
        .collect(),
    }
  }
}

impl Model for BoxDetector {
  type Input = RgbNhwcFrame;
  type Output = DetectResult;
  type Error = Infallible;

  fn infer(&self, _input: &Self::Input) -> Result<Self::Output, Self::Error> {
    Ok(DetectResult::from(self.items.clone()))
  }
}
