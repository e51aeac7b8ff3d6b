//! Parameter and command round trips against a scripted autopilot.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{connect_to_vehicle, VEHICLE_COMPONENT, VEHICLE_SYSTEM};
use mav_link_core::correlator::{CommandClient, ParamClient, ParamClientConfig, PreflightCalibration};
use mav_link_core::error::MavLinkError;
use mav_link_core::mavlink::messages::{
    CommandAck, CommandLong, MavResult, ParamRequestList, ParamRequestRead, ParamSet, ParamValue,
    MAV_PARAM_TYPE_REAL32,
};
use mav_link_core::mavlink::protocol::{MAV_CMD_PREFLIGHT_CALIBRATION, MAV_CMD_PREFLIGHT_REBOOT_SHUTDOWN};

fn value(name: &str, value: f32, index: u16) -> ParamValue {
    ParamValue {
        param_id: name.to_string(),
        param_value: value,
        param_type: MAV_PARAM_TYPE_REAL32,
        param_count: 900,
        param_index: index,
    }
}

#[tokio::test]
async fn test_read_by_name_ignores_unrelated_values() {
    let (mut link, mut vehicle) = connect_to_vehicle().await;
    let params = ParamClient::new(link.handle(), ParamClientConfig::default());

    let read = tokio::spawn(async move { params.read_by_name("INS_ACCOFFS_X").await });

    let request: ParamRequestRead = vehicle.expect().await;
    assert_eq!(request.param_id, "INS_ACCOFFS_X");
    assert_eq!(request.param_index, -1);
    assert_eq!(request.target_system, VEHICLE_SYSTEM);
    assert_eq!(request.target_component, VEHICLE_COMPONENT);

    // Streamed value for another parameter must not resolve the read
    vehicle.send(&value("INS_ACCOFFS_Y", 0.5, 11)).await;
    vehicle.send(&value("INS_ACCOFFS_X", 0.25, 10)).await;

    let result = read.await.unwrap().unwrap();
    assert_eq!(result.param_id, "INS_ACCOFFS_X");
    assert_eq!(result.param_value, 0.25);

    link.close().await;
}

#[tokio::test]
async fn test_read_by_index_matches_index() {
    let (mut link, mut vehicle) = connect_to_vehicle().await;
    let params = ParamClient::new(link.handle(), ParamClientConfig::default());

    let read = tokio::spawn(async move { params.read_by_index(42).await });

    let request: ParamRequestRead = vehicle.expect().await;
    assert_eq!(request.param_index, 42);
    assert!(request.param_id.is_empty());

    vehicle.send(&value("SYSID_THISMAV", 1.0, 42)).await;
    assert_eq!(read.await.unwrap().unwrap().param_id, "SYSID_THISMAV");

    link.close().await;
}

#[tokio::test]
async fn test_set_returns_echoed_value() {
    let (mut link, mut vehicle) = connect_to_vehicle().await;
    let params = ParamClient::new(link.handle(), ParamClientConfig::default());

    let set = tokio::spawn(async move { params.set("RC1_MIN", 700.0).await });

    let request: ParamSet = vehicle.expect().await;
    assert_eq!(request.param_id, "RC1_MIN");
    assert_eq!(request.param_value, 700.0);
    assert_eq!(request.param_type, MAV_PARAM_TYPE_REAL32);

    // The autopilot clamps the value
    vehicle.send(&value("RC1_MIN", 800.0, 3)).await;
    assert_eq!(set.await.unwrap().unwrap().param_value, 800.0);

    link.close().await;
}

#[tokio::test]
async fn test_second_request_waits_for_first() {
    let (mut link, mut vehicle) = connect_to_vehicle().await;
    let params = Arc::new(ParamClient::new(link.handle(), ParamClientConfig::default()));

    let first = tokio::spawn({
        let params = Arc::clone(&params);
        async move { params.read_by_name("FIRST").await }
    });
    let request: ParamRequestRead = vehicle.expect().await;
    assert_eq!(request.param_id, "FIRST");

    let second = tokio::spawn({
        let params = Arc::clone(&params);
        async move { params.read_by_name("SECOND").await }
    });

    // Nothing else goes out while FIRST is unanswered
    assert!(vehicle
        .try_expect::<ParamRequestRead>(Duration::from_millis(200))
        .await
        .is_none());

    vehicle.send(&value("FIRST", 1.0, 0)).await;
    assert_eq!(first.await.unwrap().unwrap().param_value, 1.0);

    let request: ParamRequestRead = vehicle.expect().await;
    assert_eq!(request.param_id, "SECOND");
    vehicle.send(&value("SECOND", 2.0, 1)).await;
    assert_eq!(second.await.unwrap().unwrap().param_value, 2.0);

    link.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_param_read_retries_then_times_out() {
    let (mut link, mut vehicle) = connect_to_vehicle().await;
    let params = ParamClient::new(
        link.handle(),
        ParamClientConfig {
            timeout: Duration::from_millis(1500),
            retries: 3,
        },
    );

    let read = tokio::spawn(async move { params.read_by_name("NEVER_ANSWERED").await });

    for _ in 0..4 {
        let request: ParamRequestRead = vehicle.expect().await;
        assert_eq!(request.param_id, "NEVER_ANSWERED");
    }

    assert!(matches!(
        read.await.unwrap(),
        Err(MavLinkError::Timeout { operation: "PARAM_VALUE" })
    ));
    assert!(vehicle
        .try_expect::<ParamRequestRead>(Duration::from_secs(10))
        .await
        .is_none());

    link.close().await;
}

#[tokio::test]
async fn test_command_rejection_carries_result() {
    let (mut link, mut vehicle) = connect_to_vehicle().await;
    let commands = CommandClient::new(link.handle(), Duration::from_secs(3));

    let send = tokio::spawn(async move {
        commands
            .send_checked(MAV_CMD_PREFLIGHT_CALIBRATION, PreflightCalibration::accelerometer().to_params())
            .await
    });

    let command: CommandLong = vehicle.expect().await;
    assert_eq!(command.command, MAV_CMD_PREFLIGHT_CALIBRATION);
    assert_eq!(command.params[4], 1.0);

    // An ACK for another command is not ours
    vehicle
        .send(&CommandAck::new(MAV_CMD_PREFLIGHT_REBOOT_SHUTDOWN, MavResult::Accepted))
        .await;
    vehicle
        .send(&CommandAck::new(MAV_CMD_PREFLIGHT_CALIBRATION, MavResult::TemporarilyRejected))
        .await;

    match send.await.unwrap() {
        Err(error @ MavLinkError::CommandRejected { .. }) => {
            assert!(matches!(
                error,
                MavLinkError::CommandRejected {
                    command: MAV_CMD_PREFLIGHT_CALIBRATION,
                    result: MavResult::TemporarilyRejected
                }
            ));
            assert!(error.to_string().contains("vehicle may be armed"));
            assert!(error.is_retryable());
        }
        other => panic!("Expected rejection, got {:?}", other),
    }

    link.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_command_times_out_without_retry() {
    let (mut link, mut vehicle) = connect_to_vehicle().await;
    let commands = CommandClient::new(link.handle(), Duration::from_secs(3));

    let send = tokio::spawn(async move { commands.reboot().await });

    let command: CommandLong = vehicle.expect().await;
    assert_eq!(command.command, MAV_CMD_PREFLIGHT_REBOOT_SHUTDOWN);
    assert_eq!(command.params[0], 1.0);

    assert!(matches!(
        send.await.unwrap(),
        Err(MavLinkError::Timeout { operation: "COMMAND_ACK" })
    ));
    assert!(vehicle
        .try_expect::<CommandLong>(Duration::from_secs(10))
        .await
        .is_none());

    link.close().await;
}

#[tokio::test]
async fn test_close_releases_pending_command() {
    let (mut link, mut vehicle) = connect_to_vehicle().await;
    let commands = CommandClient::new(link.handle(), Duration::from_secs(30));

    let send = tokio::spawn(async move { commands.arm(false).await });
    let _: CommandLong = vehicle.expect().await;

    link.close().await;

    let result = tokio::time::timeout(Duration::from_secs(1), send).await.unwrap().unwrap();
    assert!(matches!(result, Err(MavLinkError::LinkClosed)));
}

#[tokio::test(start_paused = true)]
async fn test_autopilot_vanishing_is_connection_lost() {
    let (mut link, mut vehicle) = connect_to_vehicle().await;
    let params = ParamClient::new(link.handle(), ParamClientConfig::default());

    let read = tokio::spawn(async move { params.read_by_name("BATT_CAPACITY").await });
    let _: ParamRequestRead = vehicle.expect().await;
    vehicle.hang_up();

    // The retry cannot be written
    assert!(matches!(read.await.unwrap(), Err(MavLinkError::ConnectionLost)));
    link.close().await;
}

#[tokio::test]
async fn test_request_list_addresses_learned_target() {
    let (mut link, mut vehicle) = connect_to_vehicle().await;
    let params = ParamClient::new(link.handle(), ParamClientConfig::default());

    params.request_list().await.unwrap();

    let request: ParamRequestList = vehicle.expect().await;
    assert_eq!(request.target_system, VEHICLE_SYSTEM);
    assert_eq!(request.target_component, VEHICLE_COMPONENT);

    link.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_param_read_answered_on_retry() {
    let (mut link, mut vehicle) = connect_to_vehicle().await;
    let params = ParamClient::new(link.handle(), ParamClientConfig::default());

    let read = tokio::spawn(async move { params.read_by_name("COMPASS_USE").await });

    // First request is lost; the retry gets an answer
    let _: ParamRequestRead = vehicle.expect().await;
    let retry: ParamRequestRead = vehicle.expect().await;
    assert_eq!(retry.param_id, "COMPASS_USE");
    vehicle.send(&value("COMPASS_USE", 1.0, 7)).await;

    assert_eq!(read.await.unwrap().unwrap().param_index, 7);
    link.close().await;
}
