// 该文件是 Kanjian （看见） 项目的一部分。
// tests/replay.rs - 回放检测器端到端测试
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

#![cfg(all(feature = "read_image_file", feature = "save_image_file"))]

use std::{path::Path, sync::Arc};

use image::{Rgb, RgbImage};
use kanjian::{
  FromUrl,
  config::RenderConfig,
  input::InputWrapper,
  labels::LabelTable,
  model::ModelWrapper,
  output::OutputWrapper,
  pipeline::Pipeline,
  task::{OneShotTask, Task},
};
use url::Url;

const FIXTURE: &str = r#"{
  "frames": [
    {
      "locations": [0.25, 0.1, 0.75, 0.9, 0.0, 0.0, 0.1, 0.1],
      "classes": [1, 3],
      "scores": [0.91, 0.2]
    },
    {
      "locations": [0.0, 0.0, 0.5, 0.5, 0.5, 0.5, 1.0, 1.0],
      "classes": [2, 3],
      "scores": [0.7, 0.65]
    }
  ]
}"#;

fn url(scheme: &str, path: &Path, query: &str) -> Url {
  Url::parse(&format!("{}://{}{}", scheme, path.display(), query)).unwrap()
}

fn setup(dir: &Path) -> (Url, Url, Arc<LabelTable>) {
  let fixture = dir.join("detections.json");
  std::fs::write(&fixture, FIXTURE).unwrap();
  let frame = dir.join("street.png");
  RgbImage::from_pixel(640, 480, Rgb([90, 120, 150])).save(&frame).unwrap();

  let labels = dir.join("labels.txt");
  std::fs::write(&labels, "???\r\nperson\r\nbicycle\r\ncar\r\n").unwrap();

  (
    url("replay", &fixture, ""),
    url("image", &frame, "?repeat=2"),
    Arc::new(LabelTable::load(&labels).unwrap()),
  )
}

#[test]
fn replayed_detections_are_saved_as_overlay() {
  let dir = tempfile::tempdir().unwrap();
  let (model_url, input_url, labels) = setup(dir.path());
  let output_path = dir.path().join("out/overlay.png");

  let model = ModelWrapper::from_url(&model_url).unwrap();
  let mut input = InputWrapper::from_url(&input_url).unwrap();
  let mut output = OutputWrapper::from_url(&url("image", &output_path, "")).unwrap();

  let mut pipeline = Pipeline::new(model, labels, RenderConfig::default()).unwrap();
  let stats = pipeline.run(&mut input, &mut output);

  assert_eq!(stats.frames_presented, 2);
  assert_eq!(stats.frames_failed, 0);
  // 第一帧 1 个框，第二帧 2 个框
  assert_eq!(stats.boxes_drawn, 3);

  let saved = image::open(&output_path).unwrap().to_rgb8();
  assert_eq!(saved.dimensions(), (640, 480));
  // 第二帧覆盖了第一帧：槽位 1 的框 (320, 240)-(640, 480) 为绿色
  assert_eq!(saved.get_pixel(320, 400), &Rgb([0x00, 0xFF, 0x00]));
}

#[test]
fn oneshot_processes_first_frame_only() {
  let dir = tempfile::tempdir().unwrap();
  let (model_url, input_url, labels) = setup(dir.path());
  let output_path = dir.path().join("oneshot.png");

  let model = ModelWrapper::from_url(&model_url).unwrap();
  let input = InputWrapper::from_url(&input_url).unwrap();
  let output = OutputWrapper::from_url(&url("image", &output_path, "")).unwrap();

  let stats = OneShotTask::new(labels, RenderConfig::default())
    .run_task(input, model, output)
    .unwrap();
  assert_eq!(stats.frames_presented, 1);
  assert_eq!(stats.boxes_drawn, 1);
  assert!(output_path.exists());
}

#[test]
fn class_outside_label_table_fails_the_cycle() {
  let dir = tempfile::tempdir().unwrap();
  let (model_url, input_url, _) = setup(dir.path());
  let output_path = dir.path().join("short.png");
  let labels = Arc::new(LabelTable::from_labels(["???", "person"]));

  let model = ModelWrapper::from_url(&model_url).unwrap();
  let mut input = InputWrapper::from_url(&input_url).unwrap();
  let mut output = OutputWrapper::from_url(&url("image", &output_path, "")).unwrap();

  let mut pipeline = Pipeline::new(model, labels, RenderConfig::default()).unwrap();
  let stats = pipeline.run(&mut input, &mut output);

  // 第二帧的类别 2 超出标签表
  assert_eq!(stats.frames_presented, 1);
  assert_eq!(stats.frames_failed, 1);
}
