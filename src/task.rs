// 该文件是 Qianshen （浅深） 项目的一部分。
// src/task.rs - 连续帧任务
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
  fmt::Display,
  sync::mpsc::{self, Receiver},
  thread,
  time::{Duration, Instant},
};

use tracing::{debug, info, warn};

use crate::{
  dispatch::Coordinator,
  frame::{FrameAccess, RgbNhwcFrame},
  model::{DetectResult, Model},
  output::{HostSink, Publisher},
};

/// 任务运行概况
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskSummary {
  pub frames: usize,
  pub published: usize,
  pub access_failures: usize,
  pub with_depth: usize,
  /// 宿主写入失败的次数，结果与状态消息都计入
  pub sink_failures: usize,
}

/// 逐帧分发并发布，直到输入结束、达到帧数上限或收到中断
#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
  interrupt: bool,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  /// 安装 Ctrl-C 处理；一个进程只能安装一次
  pub fn with_interrupt(mut self, interrupt: bool) -> Self {
    self.interrupt = interrupt;
    self
  }

  fn install_interrupt(&self) -> anyhow::Result<Option<Receiver<()>>> {
    if !self.interrupt {
      return Ok(None);
    }
    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = tx.send(());
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })?;
    Ok(Some(rx))
  }

  pub fn run_task<F, I, D, S>(
    self,
    input: I,
    coordinator: &Coordinator<D>,
    publisher: &mut Publisher<S>,
  ) -> anyhow::Result<TaskSummary>
  where
    F: FrameAccess,
    I: IntoIterator<Item = F>,
    D: Model<Input = RgbNhwcFrame, Output = DetectResult>,
    D::Error: Display,
    S: HostSink,
    S::Error: Display,
  {
    info!("开始任务...");
    let interrupt = self.install_interrupt()?;

    let mut summary = TaskSummary::default();
    publish_status(publisher, &mut summary, "任务开始");

    let mut now = Instant::now();
    for frame in input {
      summary.frames += 1;
      debug!("处理第 {} 帧图像", summary.frames);

      match coordinator.dispatch(frame) {
        Ok(result) if result.detector_active => {
          let elapsed_a = now.elapsed();
          match publisher.publish(&result) {
            Ok(_) => {
              summary.published += 1;
              if result.depth_available {
                summary.with_depth += 1;
              }
            }
            Err(e) => {
              summary.sink_failures += 1;
              warn!("第 {} 帧结果发布失败: {}", summary.frames, e);
            }
          }
          let elapsed_b = now.elapsed();
          debug!("分发完成，耗时: {:.2?} / {:.2?}", elapsed_a, elapsed_b);
        }
        Ok(_) => debug!("检测未启用, 本帧不发布"),
        Err(e) => {
          summary.access_failures += 1;
          warn!("丢弃第 {} 帧: {}", summary.frames, e);
          publish_status(publisher, &mut summary, &e.to_string());
        }
      }
      now = Instant::now();

      if self.frame_number.is_some_and(|n| summary.frames >= n) {
        info!("达到指定帧数 {}, 退出任务循环", summary.frames);
        break;
      }
      if interrupt.as_ref().is_some_and(|rx| rx.try_recv().is_ok()) {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    if let Some(stats) = coordinator.depth_stats() {
      info!(
        "深度统计: 完成 {} 次 (失败 {}), 接受 {} 帧, 跳过 {} 帧",
        stats.cycles, stats.failures, stats.accepted, stats.dropped
      );
    }
    coordinator.shutdown();
    publish_status(publisher, &mut summary, "任务结束");

    info!(
      "任务完成: {} 帧, 发布 {} 帧, 含深度 {} 帧, 读帧失败 {} 帧, 发布失败 {} 次",
      summary.frames,
      summary.published,
      summary.with_depth,
      summary.access_failures,
      summary.sink_failures
    );
    Ok(summary)
  }
}

/// 发布状态消息；宿主写入失败只记录，不中断任务
fn publish_status<S>(publisher: &mut Publisher<S>, summary: &mut TaskSummary, message: &str)
where
  S: HostSink,
  S::Error: Display,
{
  if let Err(e) = publisher.publish_status(message) {
    summary.sink_failures += 1;
    warn!("状态消息发布失败: {}", e);
  }
}
