use std::{sync::Arc, time::Duration};

use lasermount_lib::calibration::{CalibrationSession, CalibrationStep, JogOutcome};
use lasermount_lib::device::simulated::{serve, SimulatorConfig};
use lasermount_lib::device::{SimulatedConnector, SimulatedDevice, TcpConnector};
use lasermount_lib::error::{CalibrationError, CommandError, ConnectionError};
use lasermount_lib::motion::{MoveDirection, MoveDistance, PositionVector};
use lasermount_lib::settings::CalibrationSettings;
use tokio::net::TcpListener;

const ADDRESS: &str = "192.168.10.40";

fn simulated_session(device: &SimulatedDevice) -> CalibrationSession {
    CalibrationSession::new(
        Arc::new(SimulatedConnector::new(device.clone())),
        &CalibrationSettings::default(),
    )
}

async fn walk_plate(session: &CalibrationSession, address: &str) {
    session.connect(address).await.unwrap();
    session.advance().await.unwrap();
    session.advance().await.unwrap();
    session.advance().await.unwrap();
}

#[tokio::test]
async fn test_full_flow_with_laser_height() {
    let device = SimulatedDevice::default();
    let session = simulated_session(&device);

    let state = session.connect(ADDRESS).await.unwrap();
    assert_eq!(state.step, CalibrationStep::AtReference1);
    assert_eq!(state.current_position, Some(PositionVector::new(15.0, 11.0, 13.0)));

    let state = session.advance().await.unwrap();
    assert_eq!(state.step, CalibrationStep::AtReference2);
    assert_eq!(state.current_position, Some(PositionVector::new(114.0, 11.0, 13.0)));
    assert_eq!(state.offset, Some(PositionVector::new(0.5, -0.25, 1.0)));

    // Operator nudges the head 1 mm right at A12.
    let outcome = session.jog(MoveDirection::Right, MoveDistance::Medium).await.unwrap();
    assert_eq!(outcome, JogOutcome::Moved(PositionVector::new(115.0, 11.0, 13.0)));

    let state = session.advance().await.unwrap();
    assert_eq!(state.step, CalibrationStep::AtReference3);
    assert_eq!(state.offset, Some(PositionVector::new(1.5, -0.25, 1.0)));
    assert_eq!(device.laser_offset(), PositionVector::new(1.5, -0.25, 1.0));
    assert_eq!(state.current_position, Some(PositionVector::new(115.0, 74.0, 13.0)));

    let state = session.advance().await.unwrap();
    assert_eq!(state.step, CalibrationStep::OffsetSaved);
    assert_eq!(state.current_position, Some(PositionVector::new(16.0, 11.0, 13.0)));

    let state = session.save_and_continue().await.unwrap();
    assert_eq!(state.step, CalibrationStep::AtLaserReference);
    assert_eq!(device.saved_offset(), Some(PositionVector::new(1.5, -0.25, 1.0)));

    session.jog(MoveDirection::Down, MoveDistance::Coarse).await.unwrap();
    let state = session.confirm_laser_reference().await.unwrap();
    assert_eq!(state.step, CalibrationStep::PowerCalibrated);
    assert_eq!(state.puck_position, Some(PositionVector::new(16.0, 11.0, 3.0)));
    assert_eq!(state.current_position, Some(PositionVector::new(16.0, 11.0, 28.0)));

    session.jog(MoveDirection::Down, MoveDistance::Medium).await.unwrap();
    let state = session.confirm_power().await.unwrap();
    assert_eq!(state.step, CalibrationStep::Done);
    assert_eq!(state.laser_height_calibration, Some(24.0));
    assert_eq!(device.saved_laser_height(), Some(24.0));

    assert_eq!(
        device.received(),
        vec![
            "init",
            "gotoReference1",
            "gotoReference2",
            "updateLaserOffsets",
            "move",
            "updateLaserOffsets",
            "gotoReference3",
            "updateLaserOffsets",
            "updateLaserOffsets",
            "gotoReference1",
            "saveCalibration",
            "move",
            "move",
            "move",
            "saveLaserDistCalibration",
        ]
    );

    session.reset().await;
    assert_eq!(device.count("end"), 1);
    assert_eq!(device.disconnects(), 1);
}

#[tokio::test]
async fn test_save_and_finish_skips_laser_calibration() {
    let device = SimulatedDevice::default();
    let session = simulated_session(&device);
    walk_plate(&session, ADDRESS).await;

    let state = session.save_and_finish().await.unwrap();
    assert_eq!(state.step, CalibrationStep::Done);
    assert_eq!(device.saved_offset(), Some(PositionVector::new(0.5, -0.25, 1.0)));
    assert_eq!(device.count("saveLaserDistCalibration"), 0);

    let result = session.jog(MoveDirection::Up, MoveDistance::Fine).await;
    assert!(matches!(result, Err(CalibrationError::InvalidStep { .. })));
}

#[tokio::test]
async fn test_reported_offset_is_replaced_by_derived_offset() {
    let device = SimulatedDevice::default();
    device.report_offset(Some(PositionVector::new(9.0, 9.0, 9.0)));
    let session = simulated_session(&device);

    let state = session.connect(ADDRESS).await.unwrap();
    assert_eq!(state.offset, Some(PositionVector::new(9.0, 9.0, 9.0)));

    let state = session.advance().await.unwrap();
    assert_eq!(state.offset, Some(PositionVector::new(0.5, -0.25, 1.0)));
}

#[tokio::test]
async fn test_failed_transition_preserves_state() {
    let device = SimulatedDevice::default();
    let session = simulated_session(&device);
    let before = session.connect(ADDRESS).await.unwrap();

    device.reject_next("gotoReference2", "door open");
    let result = session.advance().await;
    assert_eq!(
        result,
        Err(CalibrationError::Command(CommandError::Rejected {
            command: "gotoReference2".into(),
            message: "door open".into()
        }))
    );
    assert_eq!(session.get_state().await, before);

    let state = session.advance().await.unwrap();
    assert_eq!(state.step, CalibrationStep::AtReference2);
}

#[tokio::test]
async fn test_partial_advance_keeps_reached_position() {
    let device = SimulatedDevice::default();
    let session = simulated_session(&device);
    session.connect(ADDRESS).await.unwrap();

    device.reject_next("updateLaserOffsets", "flash busy");
    let result = session.advance().await;
    assert!(matches!(result, Err(CalibrationError::Command(CommandError::Rejected { .. }))));

    let state = session.get_state().await;
    assert_eq!(state.step, CalibrationStep::AtReference1);
    assert_eq!(state.current_position, Some(PositionVector::new(114.0, 11.0, 13.0)));
    assert_eq!(state.current_position, Some(device.position()));

    let outcome = session.jog(MoveDirection::Right, MoveDistance::Fine).await.unwrap();
    let expected = PositionVector::new(114.0 + 0.1, 11.0, 13.0);
    assert_eq!(outcome, JogOutcome::Moved(expected));
    assert_eq!(device.position(), expected);

    let state = session.advance().await.unwrap();
    assert_eq!(state.step, CalibrationStep::AtReference2);
    assert_eq!(state.offset, Some(PositionVector::new(0.5, -0.25, 1.0)));
    assert_eq!(device.count("gotoReference2"), 2);
}

#[tokio::test]
async fn test_rejected_offset_save_keeps_choice_open() {
    let device = SimulatedDevice::default();
    let session = simulated_session(&device);
    walk_plate(&session, ADDRESS).await;
    let before = session.get_state().await;

    device.reject_next("saveCalibration", "eeprom locked");
    let result = session.save_and_finish().await;
    assert!(matches!(result, Err(CalibrationError::Command(CommandError::Rejected { .. }))));
    assert_eq!(session.get_state().await, before);

    device.reject_next("saveCalibration", "eeprom locked");
    let result = session.save_and_continue().await;
    assert!(matches!(result, Err(CalibrationError::Command(CommandError::Rejected { .. }))));
    assert_eq!(session.get_state().await, before);
    assert_eq!(device.saved_offset(), None);

    let state = session.save_and_continue().await.unwrap();
    assert_eq!(state.step, CalibrationStep::AtLaserReference);
}

#[tokio::test]
async fn test_rejected_height_save_keeps_power_step() {
    let device = SimulatedDevice::default();
    let session = simulated_session(&device);
    walk_plate(&session, ADDRESS).await;
    session.save_and_continue().await.unwrap();
    session.confirm_laser_reference().await.unwrap();
    let before = session.get_state().await;

    device.reject_next("saveLaserDistCalibration", "eeprom locked");
    let result = session.confirm_power().await;
    assert!(matches!(result, Err(CalibrationError::Command(CommandError::Rejected { .. }))));

    let state = session.get_state().await;
    assert_eq!(state, before);
    assert_eq!(state.step, CalibrationStep::PowerCalibrated);
    assert_eq!(state.laser_height_calibration, None);
    assert_eq!(device.saved_laser_height(), None);

    let state = session.confirm_power().await.unwrap();
    assert_eq!(state.laser_height_calibration, Some(25.0));
}

#[tokio::test]
async fn test_failed_entry_move_can_be_retried() {
    let device = SimulatedDevice::default();
    device.reject_next("gotoReference1", "homing");
    let session = simulated_session(&device);

    let result = session.connect(ADDRESS).await;
    assert!(matches!(result, Err(CalibrationError::Command(CommandError::Rejected { .. }))));
    let state = session.get_state().await;
    assert_eq!(state.step, CalibrationStep::AtReference1);
    assert_eq!(state.current_position, None);

    assert!(session.initialize_step().await.unwrap());
    assert!(!session.initialize_step().await.unwrap());
    assert_eq!(device.count("gotoReference1"), 2);
    assert!(session.get_state().await.current_position.is_some());
}

#[tokio::test]
async fn test_dropped_link_leaves_state_untouched() {
    let device = SimulatedDevice::default();
    let session = simulated_session(&device);
    let before = session.connect(ADDRESS).await.unwrap();

    device.drop_link_on("move");
    let result = session.jog(MoveDirection::Left, MoveDistance::Fine).await;
    assert_eq!(
        result,
        Err(CalibrationError::Command(CommandError::LinkClosed { command: "move".into() }))
    );
    assert_eq!(session.get_state().await, before);
    assert!(!session.get_snapshot().await.connected);

    let result = session.jog(MoveDirection::Left, MoveDistance::Fine).await;
    assert_eq!(result, Err(CalibrationError::Command(CommandError::NotConnected)));

    session.reset().await;
    assert_eq!(device.count("end"), 0);
    assert_eq!(session.get_state().await.step, CalibrationStep::Disconnected);
}

#[tokio::test]
async fn test_jog_burst_drops_overlapping_requests() {
    let device = SimulatedDevice::new(SimulatorConfig {
        latency: Duration::from_millis(50),
        ..Default::default()
    });
    let session = simulated_session(&device);
    session.connect(ADDRESS).await.unwrap();
    device.clear_received();

    let (first, second) = tokio::join!(
        session.jog(MoveDirection::Right, MoveDistance::Medium),
        session.jog(MoveDirection::Right, MoveDistance::Medium),
    );

    assert_eq!(first, Ok(JogOutcome::Moved(PositionVector::new(16.0, 11.0, 13.0))));
    assert_eq!(second, Ok(JogOutcome::Dropped));
    assert_eq!(device.count("move"), 1);
}

#[tokio::test]
async fn test_power_step_rejects_horizontal_jog() {
    let device = SimulatedDevice::default();
    let session = simulated_session(&device);
    walk_plate(&session, ADDRESS).await;
    session.save_and_continue().await.unwrap();
    session.confirm_laser_reference().await.unwrap();
    let before = device.count("move");

    let result = session.jog(MoveDirection::Left, MoveDistance::Fine).await;
    assert_eq!(
        result,
        Err(CalibrationError::InvalidStep {
            step: CalibrationStep::PowerCalibrated,
            action: "jog horizontally"
        })
    );
    assert_eq!(device.count("move"), before);

    let outcome = session.jog(MoveDirection::Up, MoveDistance::Fine).await.unwrap();
    assert!(matches!(outcome, JogOutcome::Moved(_)));
}

#[tokio::test]
async fn test_reset_survives_rejected_end() {
    let device = SimulatedDevice::default();
    let session = simulated_session(&device);
    walk_plate(&session, ADDRESS).await;
    device.reject_next("end", "motion in progress");

    session.reset().await;

    assert_eq!(device.count("end"), 1);
    assert_eq!(device.disconnects(), 1);
    let snapshot = session.get_snapshot().await;
    assert_eq!(snapshot.state.step, CalibrationStep::Disconnected);
    assert_eq!(snapshot.label, "Connect To Device");
    assert!(!snapshot.can_jog);

    session.connect(ADDRESS).await.unwrap();
    assert_eq!(device.connects(), 2);
}

#[tokio::test]
async fn test_refused_connection_stays_disconnected() {
    let device = SimulatedDevice::default();
    device.refuse_connections(true);
    let session = simulated_session(&device);

    let result = session.connect(ADDRESS).await;
    assert!(matches!(
        result,
        Err(CalibrationError::Connection(ConnectionError::Refused { .. }))
    ));
    assert_eq!(session.get_state().await.step, CalibrationStep::Disconnected);
    assert!(device.received().is_empty());
}

#[tokio::test]
async fn test_flow_over_tcp_loopback() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let device = SimulatedDevice::default();
    tokio::spawn(serve(listener, device.clone()));

    let settings = CalibrationSettings {
        port,
        connect_timeout_ms: 2_000,
        connect_poll_interval_ms: 20,
        ..Default::default()
    };
    let connector = TcpConnector::new(settings.connect_poll_interval());
    let session = CalibrationSession::new(Arc::new(connector), &settings);

    walk_plate(&session, "127.0.0.1").await;
    let state = session.save_and_finish().await.unwrap();
    assert_eq!(state.step, CalibrationStep::Done);
    assert_eq!(device.saved_offset(), Some(PositionVector::new(0.5, -0.25, 1.0)));

    session.reset().await;
    assert_eq!(device.count("end"), 1);
    assert!(!session.get_snapshot().await.connected);
}

#[tokio::test]
async fn test_tcp_connect_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let settings = CalibrationSettings {
        port,
        connect_timeout_ms: 200,
        connect_poll_interval_ms: 20,
        ..Default::default()
    };
    let session = CalibrationSession::new(
        Arc::new(TcpConnector::new(settings.connect_poll_interval())),
        &settings,
    );

    let result = session.connect("127.0.0.1").await;
    assert!(matches!(
        result,
        Err(CalibrationError::Connection(ConnectionError::Timeout { waited_ms: 200, .. }))
    ));
    assert_eq!(session.get_state().await.step, CalibrationStep::Disconnected);
}
