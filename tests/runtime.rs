//! Request handling at the control boundary.

mod support;

use std::time::Duration;

use automic_runtime::messages::{ControlRequest, HealthState, Position, ReplyStatus};
use automic_runtime::motor::Phase;
use automic_runtime::runtime::Runtime;
use support::{FakeDrive, dead_endpoint, healthy_rig};

fn at(x: f64, y: f64, z: f64) -> Position {
    Position::new(x, y, z)
}

#[tokio::test]
async fn test_move_before_calibrate_is_client_error() {
    let (config, drives) = healthy_rig().await;
    let mut runtime = Runtime::new(&config);

    let reply = runtime.handle(ControlRequest::Move(at(1.0, 1.0, 1.0))).await;

    assert_eq!(reply.status, ReplyStatus::ClientError);
    assert_eq!(reply.op, "move");
    assert!(reply.message.contains("not calibrated"));
    assert!(drives.iter().all(|d| d.connections() == 0));
    assert_eq!(runtime.health().state, HealthState::Uncalibrated);
}

#[tokio::test]
async fn test_calibrate_reports_wire_lengths() {
    let (config, _drives) = healthy_rig().await;
    let mut runtime = Runtime::new(&config);

    let reply = runtime
        .handle(ControlRequest::Calibrate(at(6.5, 6.5, 6.5)))
        .await;

    assert_eq!(reply.status, ReplyStatus::Ok);
    assert_eq!(reply.position, Some(at(6.5, 6.5, 6.5)));
    assert_eq!(reply.motors["motor4"].as_f64(), Some(6.5));
    assert_eq!(runtime.health().state, HealthState::Ready);
    assert_eq!(runtime.health().position, Some(at(6.5, 6.5, 6.5)));
}

#[tokio::test]
async fn test_out_of_bounds_move_is_client_error() {
    let (config, drives) = healthy_rig().await;
    let mut runtime = Runtime::new(&config);
    runtime.handle(ControlRequest::Calibrate(at(6.5, 6.5, 6.5))).await;

    let reply = runtime.handle(ControlRequest::Move(at(6.5, 20.0, 1.0))).await;

    assert_eq!(reply.status, ReplyStatus::ClientError);
    assert!(reply.message.contains("y=20"));
    assert!(drives.iter().all(|d| d.commands().is_empty()));
}

#[tokio::test]
async fn test_move_dispatches_to_all_motors() {
    let (config, drives) = healthy_rig().await;
    let mut runtime = Runtime::new(&config);
    runtime.handle(ControlRequest::Calibrate(at(6.5, 6.5, 6.5))).await;

    let reply = runtime.handle(ControlRequest::Move(at(6.5, 6.5, 0.0))).await;

    assert_eq!(reply.status, ReplyStatus::Ok, "{}", reply.message);
    assert_eq!(reply.position, Some(at(6.5, 6.5, 0.0)));
    for drive in &drives {
        assert_eq!(drive.commands().last().map(String::as_str), Some("FL"));
    }
    assert_eq!(runtime.health().position, Some(at(6.5, 6.5, 0.0)));
}

#[tokio::test]
async fn test_sub_step_move_sends_nothing() {
    let (config, drives) = healthy_rig().await;
    let mut runtime = Runtime::new(&config);
    runtime.handle(ControlRequest::Calibrate(at(6.5, 6.5, 6.5))).await;

    let reply = runtime
        .handle(ControlRequest::Move(at(6.5, 6.5, 6.5 + 1e-7)))
        .await;

    assert_eq!(reply.status, ReplyStatus::Ok);
    assert_eq!(reply.message, "already at target");
    assert!(drives.iter().all(|d| d.connections() == 0));
}

#[tokio::test]
async fn test_failed_move_is_server_error() {
    let (mut config, drives) = healthy_rig().await;
    config.motors[2] = dead_endpoint("motor3").await;
    let mut runtime = Runtime::new(&config);
    runtime.handle(ControlRequest::Calibrate(at(6.5, 6.5, 6.5))).await;

    let reply = runtime.handle(ControlRequest::Move(at(6.5, 6.5, 0.0))).await;

    assert_eq!(reply.status, ReplyStatus::ServerError);
    assert!(reply.message.starts_with("configure phase failed"));
    assert_eq!(reply.motors.keys().collect::<Vec<_>>(), ["motor3"]);
    assert!(drives.iter().all(|d| !d.commands().contains(&"FL".to_string())));

    // Nothing was triggered, so the rig is still where it was calibrated
    assert_eq!(runtime.health().state, HealthState::Ready);
    assert_eq!(runtime.health().position, Some(at(6.5, 6.5, 6.5)));
}

#[tokio::test]
async fn test_retry_after_configure_failure_dispatches_again() {
    let (mut config, drives) = healthy_rig().await;
    config.motors[2] = dead_endpoint("motor3").await;
    let mut runtime = Runtime::new(&config);
    runtime.handle(ControlRequest::Calibrate(at(6.5, 6.5, 6.5))).await;

    let first = runtime.handle(ControlRequest::Move(at(6.5, 6.5, 0.0))).await;
    let retry = runtime.handle(ControlRequest::Move(at(6.5, 6.5, 0.0))).await;

    assert_eq!(first.status, ReplyStatus::ServerError);
    assert_eq!(retry.status, ReplyStatus::ServerError);
    assert_ne!(retry.message, "already at target");
    assert!(retry.message.starts_with("configure phase failed"));
    // one configure session per attempt on every reachable drive
    assert_eq!(drives[0].connections(), 2);
    assert_eq!(drives[3].commands().iter().filter(|c| *c == "ME").count(), 2);

    // and the calibrated point itself is still a no-op
    let reply = runtime.handle(ControlRequest::Move(at(6.5, 6.5, 6.5))).await;
    assert_eq!(reply.message, "already at target");
}

#[tokio::test]
async fn test_trigger_failure_requires_recalibration() {
    let (mut config, drives) = healthy_rig().await;
    let no_trigger = FakeDrive::spawn_failing_on(Some("FL")).await;
    config.motors[3] = no_trigger.endpoint("motor4");
    let mut runtime = Runtime::new(&config);
    runtime.handle(ControlRequest::Calibrate(at(6.5, 6.5, 6.5))).await;

    let reply = runtime.handle(ControlRequest::Move(at(6.5, 6.5, 0.0))).await;

    assert_eq!(reply.status, ReplyStatus::ServerError);
    assert!(reply.message.starts_with("trigger phase failed"));
    assert_eq!(drives[0].commands().last().map(String::as_str), Some("FL"));
    assert_eq!(runtime.health().state, HealthState::Uncalibrated);
    assert_eq!(runtime.health().position, None);

    let reply = runtime.handle(ControlRequest::Move(at(6.5, 6.5, 6.5))).await;
    assert_eq!(reply.status, ReplyStatus::ClientError);
    assert!(reply.message.contains("not calibrated"));
}

#[tokio::test]
async fn test_stop_is_not_held_up_by_a_stuck_move() {
    let (mut config, drives) = healthy_rig().await;
    let stuck = FakeDrive::spawn_silent().await;
    config.motors[0] = stuck.endpoint("motor1");
    config.motors[0].timeout_ms = 3000;
    let mut runtime = Runtime::new(&config);
    runtime.handle(ControlRequest::Calibrate(at(6.5, 6.5, 6.5))).await;
    let stopper = runtime.coordinator();

    let moving = tokio::spawn(async move {
        runtime.handle(ControlRequest::Move(at(6.5, 6.5, 0.0))).await
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    let stopping = tokio::spawn(async move { stopper.stop_all().await });

    let others = &drives[1..];
    let mut stopped = false;
    for _ in 0..50 {
        if others.iter().all(|d| d.commands().contains(&"ST".to_string())) {
            stopped = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(stopped, "ST did not reach the responsive drives");
    assert!(!moving.is_finished());

    // The stuck drive still times out both operations
    let reply = moving.await.unwrap();
    assert_eq!(reply.status, ReplyStatus::ServerError);
    let err = stopping.await.unwrap().unwrap_err();
    assert_eq!(err.phase, Phase::Stop);
    assert_eq!(err.failures.keys().collect::<Vec<_>>(), ["motor1"]);
    assert!(stuck.commands().contains(&"ST".to_string()));
}

#[tokio::test]
async fn test_get_config_reports_workspace() {
    let (config, drives) = healthy_rig().await;
    let mut runtime = Runtime::new(&config);

    let reply = runtime.handle(ControlRequest::GetConfig).await;

    assert_eq!(reply.status, ReplyStatus::Ok);
    let workspace = reply.workspace.unwrap();
    assert_eq!(workspace.max, at(13.0, 13.0, 13.0));
    assert_eq!(workspace.anchors["motor1"], at(6.5, 13.0, 0.0));
    assert_eq!(workspace.anchors["motor4"], at(6.5, 6.5, 13.0));
    assert_eq!(workspace.step_size_in, 0.0005);
    assert!(drives.iter().all(|d| d.connections() == 0));
}

#[tokio::test]
async fn test_check_motors_summarises() {
    let (mut config, _drives) = healthy_rig().await;
    config.motors[0] = dead_endpoint("motor1").await;
    let mut runtime = Runtime::new(&config);

    let reply = runtime.handle(ControlRequest::CheckMotors).await;

    assert_eq!(reply.status, ReplyStatus::Ok);
    assert_eq!(reply.message, "1 of 4 motors disconnected");
    assert_eq!(reply.motors["motor1"], "disconnected");
    assert_eq!(reply.motors["motor2"], "connected");
}

#[tokio::test]
async fn test_stop_and_analog_requests() {
    let (config, drives) = healthy_rig().await;
    let mut runtime = Runtime::new(&config);

    let reply = runtime.handle(ControlRequest::Stop).await;
    assert_eq!(reply.status, ReplyStatus::Ok);
    assert_eq!(reply.message, "stopped");

    let reply = runtime.handle(ControlRequest::ReadAnalog { channel: 1 }).await;
    assert_eq!(reply.status, ReplyStatus::Ok);
    assert_eq!(reply.motors["motor2"]["volts"].as_f64(), Some(2.5));
    assert_eq!(drives[1].commands(), ["ST", "IFD", "IA1"]);
}

#[tokio::test]
async fn test_read_alarms_partial_failure() {
    let (mut config, _drives) = healthy_rig().await;
    let mute = FakeDrive::spawn_failing_on(Some("AL")).await;
    config.motors[3] = mute.endpoint("motor4");
    let mut runtime = Runtime::new(&config);

    let reply = runtime.handle(ControlRequest::ReadAlarms).await;

    assert_eq!(reply.status, ReplyStatus::ServerError);
    assert_eq!(reply.message, "1 motor(s) failed");
    assert_eq!(reply.motors["motor1"], "AL=0000");
    assert!(reply.motors["motor4"].as_str().unwrap().starts_with("error:"));
}
