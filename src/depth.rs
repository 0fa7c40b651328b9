// 该文件是 Qianshen （浅深） 项目的一部分。
// src/depth.rs - 异步深度估计
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

//! # 深度估计工作线程
//!
//! 深度模型比检测慢得多，因此放在独立线程里按自己的节奏推理。
//! 视频线程通过 [`DepthWorker::submit`] 非阻塞地交接：
//!
//! 1. `try_lock` 推理槽，失败（或工作线程尚未空闲）直接返回 `None`，本帧无深度；
//! 2. 成功则先用上一周期的深度图回答上一次提交的查询点；
//! 3. 再把当前帧的 ROI 预处理进模型输入缓冲区，记下当前查询点，唤醒工作线程。
//!
//! 因此第 N 帧拿到的深度分数来自第 N−1 帧的像素，这一周期的滞后是固定的。
//! 推理期间输入缓冲区被工作线程取走、锁被释放，提交方只会看到 `Inferring`
//! 状态而得到 `None`，两者不会重叠。

use std::{
  convert::Infallible,
  fmt::Display,
  sync::{
    Arc, Condvar, Mutex, MutexGuard, PoisonError, TryLockError,
    atomic::{AtomicU64, Ordering},
    mpsc,
  },
  thread::{self, JoinHandle},
  time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  frame::{Frame, RgbNhwcFrame},
  geometry::{Point, RegionOfInterest},
  model::{DepthMap, Model},
};

const WORKER_THREAD_NAME: &str = "depth-worker";

#[derive(Error, Debug)]
pub enum DepthError {
  #[error("深度网格大小必须大于 0")]
  EmptyGrid,
  #[error("无法创建深度推理线程: {0}")]
  Spawn(#[from] std::io::Error),
  #[error("深度模型加载失败: {0}")]
  Load(String),
}

/// 对上一周期查询点的深度分数，顺序与查询点一致
///
/// 落在 ROI 外的点为 `None`，其余归一化到 [0, 1]。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DepthScores {
  values: Vec<Option<f32>>,
}

impl DepthScores {
  pub fn values(&self) -> &[Option<f32>] {
    &self.values
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }

  pub fn get(&self, index: usize) -> Option<f32> {
    self.values.get(index).copied().flatten()
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
  /// 已完成的推理次数（含失败）
  pub cycles: u64,
  pub failures: u64,
  pub accepted: u64,
  pub dropped: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
  Idle,
  Pending,
  Inferring,
}

struct SlotState {
  phase: Phase,
  quit: bool,
  /// 下一周期的模型输入，推理期间由工作线程持有
  input: Option<RgbNhwcFrame>,
  /// 与 `input` 同一帧的查询点，只保留一份
  points: Vec<Point>,
  /// `input` 在该帧上实际采样的区域，查询点按它映射到网格
  region: Option<RegionOfInterest>,
  depth: Option<DepthMap>,
  cycles: u64,
  failures: u64,
  accepted: u64,
}

struct InferenceSlot {
  state: Mutex<SlotState>,
  signal: Condvar,
}

impl InferenceSlot {
  fn new(grid: usize) -> Self {
    Self {
      state: Mutex::new(SlotState {
        phase: Phase::Idle,
        quit: false,
        input: Some(RgbNhwcFrame::square(grid)),
        points: Vec::new(),
        region: None,
        depth: None,
        cycles: 0,
        failures: 0,
        accepted: 0,
      }),
      signal: Condvar::new(),
    }
  }

  fn lock(&self) -> MutexGuard<'_, SlotState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

/// 持有深度模型的后台推理线程
pub struct DepthWorker {
  slot: Arc<InferenceSlot>,
  roi: RegionOfInterest,
  grid: usize,
  dropped: AtomicU64,
  handle: Option<JoinHandle<()>>,
}

impl DepthWorker {
  /// 启动工作线程，初始状态为空闲，不做推理
  pub fn spawn<M>(model: M, roi: RegionOfInterest, grid: usize) -> Result<Self, DepthError>
  where
    M: Model<Input = RgbNhwcFrame, Output = DepthMap> + Send + 'static,
    M::Error: Display,
  {
    Self::spawn_with(move || Ok::<_, Infallible>(model), roi, grid)
  }

  /// 在工作线程内构建模型
  ///
  /// 模型的创建、推理与释放都发生在同一线程上。构建失败时线程退出，
  /// 返回 [`DepthError::Load`]。
  pub fn spawn_with<M, E, B>(build: B, roi: RegionOfInterest, grid: usize) -> Result<Self, DepthError>
  where
    B: FnOnce() -> Result<M, E> + Send + 'static,
    E: Display,
    M: Model<Input = RgbNhwcFrame, Output = DepthMap>,
    M::Error: Display,
  {
    if grid == 0 {
      return Err(DepthError::EmptyGrid);
    }

    let slot = Arc::new(InferenceSlot::new(grid));
    let (ready_tx, ready_rx) = mpsc::sync_channel(1);
    let handle = thread::Builder::new()
      .name(WORKER_THREAD_NAME.to_string())
      .spawn({
        let slot = slot.clone();
        move || {
          let model = match build() {
            Ok(model) => {
              let _ = ready_tx.send(Ok(()));
              model
            }
            Err(e) => {
              let _ = ready_tx.send(Err(e.to_string()));
              return;
            }
          };
          worker_loop(slot, model, grid)
        }
      })?;

    let ready = ready_rx
      .recv()
      .unwrap_or_else(|_| Err("深度推理线程在加载模型时退出".to_string()));
    if let Err(reason) = ready {
      let _ = handle.join();
      error!("深度模型加载失败: {}", reason);
      return Err(DepthError::Load(reason));
    }

    info!(
      "深度推理线程已启动, ROI {}x{}+{}+{}, 网格 {}",
      roi.width(),
      roi.height(),
      roi.x(),
      roi.y(),
      grid
    );

    Ok(Self {
      slot,
      roi,
      grid,
      dropped: AtomicU64::new(0),
      handle: Some(handle),
    })
  }

  /// 非阻塞提交
  ///
  /// 返回 `None` 表示工作线程正忙，本帧没有深度结果；返回 `Some` 时其中的
  /// 分数对应 *上一次* 被接受的查询点。首次提交返回空分数。
  pub fn submit(&self, frame: &Frame, points: &[Point]) -> Option<DepthScores> {
    let mut state = match self.slot.state.try_lock() {
      Ok(guard) => guard,
      Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
      Err(TryLockError::WouldBlock) => {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        debug!("推理槽被占用, 跳过本帧深度");
        return None;
      }
    };

    if state.quit || state.phase != Phase::Idle {
      self.dropped.fetch_add(1, Ordering::Relaxed);
      debug!("深度推理未完成 ({:?}), 跳过本帧深度", state.phase);
      return None;
    }

    let scores = match &state.depth {
      Some(depth) => read_scores(depth, &state.points, state.region),
      None => DepthScores::default(),
    };

    let mut input = state
      .input
      .take()
      .unwrap_or_else(|| RgbNhwcFrame::square(self.grid));
    let region = frame.resize_region_into(self.roi, &mut input);
    if region != Some(self.roi) {
      debug!("ROI 超出帧 {}x{}, 实际采样 {:?}", frame.width(), frame.height(), region);
    }
    state.input = Some(input);
    state.region = region;
    state.points.clear();
    state.points.extend_from_slice(points);
    state.phase = Phase::Pending;
    state.accepted += 1;

    self.slot.signal.notify_all();
    drop(state);

    Some(scores)
  }

  /// 阻塞等待当前周期结束，超时返回 `false`
  pub fn wait_idle(&self, timeout: Duration) -> bool {
    let state = self.slot.lock();
    let (state, _) = self
      .slot
      .signal
      .wait_timeout_while(state, timeout, |s| s.phase != Phase::Idle && !s.quit)
      .unwrap_or_else(PoisonError::into_inner);
    state.phase == Phase::Idle
  }

  pub fn stats(&self) -> WorkerStats {
    let state = self.slot.lock();
    WorkerStats {
      cycles: state.cycles,
      failures: state.failures,
      accepted: state.accepted,
      dropped: self.dropped.load(Ordering::Relaxed),
    }
  }

  /// 请求退出并等待线程结束
  ///
  /// 正在进行的推理会跑完，之后不会再开始新的推理。
  pub fn shutdown(mut self) {
    self.stop();
  }

  fn stop(&mut self) {
    let Some(handle) = self.handle.take() else {
      return;
    };
    {
      let mut state = self.slot.lock();
      state.quit = true;
      self.slot.signal.notify_all();
    }
    if handle.join().is_err() {
      error!("深度推理线程异常退出");
    }
    info!("深度推理线程已停止");
  }
}

impl Drop for DepthWorker {
  fn drop(&mut self) {
    self.stop();
  }
}

fn worker_loop<M>(slot: Arc<InferenceSlot>, model: M, grid: usize)
where
  M: Model<Input = RgbNhwcFrame, Output = DepthMap>,
  M::Error: Display,
{
  let mut state = slot.lock();
  loop {
    state = slot
      .signal
      .wait_while(state, |s| !s.quit && s.phase != Phase::Pending)
      .unwrap_or_else(PoisonError::into_inner);
    if state.quit {
      break;
    }

    let Some(input) = state.input.take() else {
      state.phase = Phase::Idle;
      continue;
    };
    state.phase = Phase::Inferring;
    drop(state);

    let now = Instant::now();
    let result = model.infer(&input);
    let elapsed = now.elapsed();

    state = slot.lock();
    state.input = Some(input);
    state.cycles += 1;
    match result {
      Ok(depth) if depth.size() == grid => {
        debug!("深度推理完成，耗时: {:.2?}", elapsed);
        state.depth = Some(depth);
      }
      Ok(depth) => {
        warn!(
          "深度图尺寸 {} 与网格 {} 不符, 沿用上一周期结果",
          depth.size(),
          grid
        );
        state.failures += 1;
      }
      Err(e) => {
        warn!("深度推理失败, 沿用上一周期结果: {}", e);
        state.failures += 1;
      }
    }
    state.phase = Phase::Idle;
    slot.signal.notify_all();
  }
  drop(state);
  debug!("深度推理循环退出");
}

/// 在深度图上查询各点，按最大值归一化
///
/// `region` 必须是生成该深度图的输入所覆盖的区域；为 `None` 时所有点都没有分数。
fn read_scores(depth: &DepthMap, points: &[Point], region: Option<RegionOfInterest>) -> DepthScores {
  let (_, max) = depth.min_max();
  let values = points
    .iter()
    .map(|&point| {
      let cell = region?.grid_cell(point, depth.size())?;
      let value = depth.get(cell)?;
      if max.is_finite() && max > 0.0 {
        Some((value / max).clamp(0.0, 1.0))
      } else {
        Some(0.0)
      }
    })
    .collect();
  DepthScores { values }
}
