//! Whole-session tests: simulated and recorded transports through the coordinator

use approx::assert_abs_diff_eq;
use std::time::Duration;
use tokio::io::BufReader;
use vsm_core::Channel;
use vsm_monitor::{open_replay, Coordinator, CoordinatorState, MonitorConfig, StopReason};
use vsm_simulation::{
    start_line_stream, CardiacConfig, CardiacSimulator, Pacing, StreamCommand, StreamConfig,
};

fn fast_config() -> MonitorConfig {
    MonitorConfig {
        compute_interval_ms: 50,
        read_timeout_ms: 50,
        ..MonitorConfig::default()
    }
}

fn simulated(bpm: f64, seconds: f64) -> StreamConfig {
    StreamConfig {
        simulator: CardiacConfig::clean(bpm),
        pacing: Pacing::Unpaced,
        duration: Some(seconds),
        ..StreamConfig::default()
    }
}

#[tokio::test]
async fn test_malformed_line_in_stream() {
    let line = "12345,100,2000,2100,300\n";
    let mut input = line.repeat(10);
    input.push_str("x,y\n");
    input.push_str(&line.repeat(10));

    let coordinator = Coordinator::new(fast_config()).unwrap();
    let reason = coordinator.run(BufReader::new(input.as_bytes())).await.unwrap();

    assert_eq!(reason, StopReason::TransportClosed);
    assert_eq!(coordinator.buffered_len(), 20);
    let stats = coordinator.stats();
    assert_eq!(stats.accepted_lines, 20);
    assert_eq!(stats.malformed_lines, 1);
}

#[tokio::test]
async fn test_simulated_session_recovers_vitals() {
    let (reader, _control) = start_line_stream(simulated(75.0, 6.0)).unwrap();
    let coordinator = Coordinator::new(fast_config()).unwrap();

    let session = coordinator.run(BufReader::new(reader));
    let reason = tokio::time::timeout(Duration::from_secs(20), session)
        .await
        .expect("simulated session should end at EOF")
        .unwrap();
    assert_eq!(reason, StopReason::TransportClosed);
    assert_eq!(coordinator.stats().accepted_lines, 6000);
    assert_eq!(coordinator.buffered_len(), 6000);

    // The tail of the stream is analysed before the session stops
    let frame = coordinator.latest_frame();
    assert_abs_diff_eq!(frame.snapshot.bpm.unwrap(), 75.0, epsilon = 1.5);
    assert_abs_diff_eq!(frame.snapshot.spo2.unwrap(), 97.0, epsilon = 1.5);
    assert!(frame.snapshot.qr_interval_ms.is_some());
    assert!(frame.snapshot.crest_time_ms.is_some());

    // Display traces cover more than the analysed window
    assert_eq!(coordinator.latest_filtered(Channel::Ecg).len(), 5000);
    assert_eq!(frame.analysis_offset, 2000);
}

#[tokio::test]
async fn test_state_follows_session() {
    let coordinator = Coordinator::new(fast_config()).unwrap();
    let mut state = coordinator.subscribe_state();
    assert_eq!(*state.borrow_and_update(), CoordinatorState::Disconnected);

    let mut config = simulated(60.0, 60.0);
    config.autostart = false;
    let (reader, control) = start_line_stream(config).unwrap();

    let session = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.run(BufReader::new(reader)).await })
    };

    state
        .wait_for(|s| *s == CoordinatorState::Connecting)
        .await
        .unwrap();
    control.send(StreamCommand::InjectLine("garbage".into())).await.unwrap();
    control.send(StreamCommand::Start).await.unwrap();
    state
        .wait_for(|s| *s == CoordinatorState::Streaming)
        .await
        .unwrap();

    coordinator.stop();
    let reason = session.await.unwrap().unwrap();
    assert_eq!(reason, StopReason::Requested);
    assert_eq!(coordinator.state(), CoordinatorState::Stopped(StopReason::Requested));
    assert_eq!(coordinator.stats().malformed_lines, 1);
}

#[tokio::test]
async fn test_replay_recorded_capture() {
    let mut simulator = CardiacSimulator::new(CardiacConfig::clean(60.0)).unwrap();
    let mut capture = simulator.generate_lines(4.0).join("\n");
    capture.push('\n');

    let path = std::env::temp_dir().join(format!("vsm-replay-{}.csv", std::process::id()));
    std::fs::write(&path, capture).unwrap();

    let coordinator = Coordinator::new(fast_config()).unwrap();
    let source = open_replay(&path, None).await.unwrap();
    let reason = coordinator.run(source).await.unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(reason, StopReason::TransportClosed);
    assert_eq!(coordinator.buffered_len(), 4000);
    assert!(coordinator.stats().last_timestamp.is_some());

    let snapshot = coordinator.latest_snapshot();
    assert_abs_diff_eq!(snapshot.bpm.unwrap(), 60.0, epsilon = 1.5);
}

#[tokio::test]
async fn test_silent_transport_times_out() {
    let coordinator = Coordinator::new(MonitorConfig {
        connect_timeout_ms: 100,
        ..fast_config()
    })
    .unwrap();
    let (_writer, reader) = tokio::io::duplex(64);

    let result = coordinator.run(BufReader::new(reader)).await;
    assert!(result.is_err());
    assert_eq!(coordinator.state(), CoordinatorState::Disconnected);
}
