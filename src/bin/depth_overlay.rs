// 该文件是 Qianshen （浅深） 项目的一部分。
// src/bin/depth_overlay.rs - 检测与深度融合的连续推理
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

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

use qianshen::{
  FromUrl,
  config::{
    Accelerator, CoordinatorConfig, DEFAULT_CONFIDENCE, DEFAULT_DEPTH_GRID, DEFAULT_DISPLAY_SIZE,
    parse_roi,
  },
  dispatch::Coordinator,
  geometry::RegionOfInterest,
  input::InputWrapper,
  model::{RknnDepthBuilder, RknnYoloBuilder},
  output::{Publisher, SinkWrapper},
  task::ContinuousTask,
};

/// Qianshen 参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 检测模型，例如 rknn:///opt/models/yolo-generic-n.rknn?variant=generic-n
  #[arg(long, value_name = "MODEL")]
  pub detector: Url,
  /// 深度模型，例如 rknn:///opt/models/depth.rknn
  #[arg(long, value_name = "MODEL")]
  pub depth: Option<Url>,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出，log:// / stdout:// / jsonl:///path
  #[arg(long, value_name = "OUTPUT", default_value = "log://")]
  pub output: Url,
  /// 深度 ROI，x,y,w,h（整帧像素）
  #[arg(long, value_name = "ROI", value_parser = parse_roi)]
  pub roi: RegionOfInterest,
  #[arg(long, default_value_t = DEFAULT_DEPTH_GRID)]
  pub grid: usize,
  /// cpu / gpu
  #[arg(long, default_value = "cpu")]
  pub accelerator: Accelerator,
  /// 只在 ROI 内检测远处目标
  #[arg(long)]
  pub far_roi: bool,
  #[arg(long, default_value_t = DEFAULT_CONFIDENCE)]
  pub confidence: f32,
  /// 发布时使用的显示宽度
  #[arg(long, default_value_t = DEFAULT_DISPLAY_SIZE.0)]
  pub display_width: u32,
  #[arg(long, default_value_t = DEFAULT_DISPLAY_SIZE.1)]
  pub display_height: u32,

  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .init();

  let args = Args::parse();

  info!("检测模型: {}", args.detector);
  info!("深度模型: {:?}", args.depth.as_ref().map(Url::as_str));
  info!("输入来源: {}", args.input);
  info!("输出: {}", args.output);

  let (display_w, display_h) = (args.display_width, args.display_height);
  let config = CoordinatorConfig::new(args.roi)
    .with_depth_grid(args.grid)
    .with_accelerator(args.accelerator)
    .with_far_roi(args.far_roi)
    .with_depth_estimation(args.depth.is_some())
    .with_confidence(args.confidence)
    .with_display_size(display_w, display_h);
  let coordinator = Coordinator::new(config)?;

  let detector = RknnYoloBuilder::from_url(&args.detector)?;
  let variant = detector.variant();
  coordinator.replace_detector(variant, |_, accelerator| {
    if accelerator == Accelerator::Gpu {
      warn!("RKNN 后端在 NPU 上运行, 忽略 GPU 偏好");
    }
    detector.build()
  })?;

  if let Some(url) = &args.depth {
    let depth = RknnDepthBuilder::from_url(url)?;
    if depth.grid() != args.grid {
      anyhow::bail!("深度模型网格 {} 与 --grid {} 不符", depth.grid(), args.grid);
    }
    coordinator.replace_depth(move |_| depth.build())?;
  }

  let input = InputWrapper::from_url(&args.input)?;
  let mut publisher =
    Publisher::new(SinkWrapper::from_url(&args.output)?).with_display_size(display_w, display_h);

  ContinuousTask::default()
    .with_frame_number(args.frame_number)
    .with_interrupt(true)
    .run_task(input, &coordinator, &mut publisher)?;

  Ok(())
}
