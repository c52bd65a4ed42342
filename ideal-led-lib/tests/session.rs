//! Tests for the session state machine: busy rejection, retries, cancellation and teardown

mod common;

use common::*;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_connect_and_send_power() {
    let channel = ScriptedChannel::new();
    let session = connected_session(&channel, SessionConfig::default()).await;
    assert_eq!(session.state(), ConnectionState::Connected);

    let result = session.send_power(true).await.unwrap();
    assert!(result.acked);
    assert_eq!(result.raw_response, None);
    assert_eq!(session.state(), ConnectionState::Connected);

    let writes = channel.writes();
    assert_eq!(writes.len(), 1);
    let expected = PacketCodec::default().encode(&Command::power(true)).unwrap();
    assert_eq!(writes[0].0, expected.as_bytes());
    assert_eq!(writes[0].1, WriteMode::WithResponse);
}

#[tokio::test(start_paused = true)]
async fn test_power_off_twice_same_shape() {
    let channel = ScriptedChannel::new();
    let session = connected_session(&channel, SessionConfig::default()).await;

    let first = session.send_power(false).await.unwrap();
    let second = session.send_power(false).await.unwrap();
    assert_eq!(first, second);

    let writes = channel.writes();
    assert_eq!(writes[0], writes[1]);
}

#[tokio::test(start_paused = true)]
async fn test_session_busy_while_retry_loop_pending() {
    let channel = ScriptedChannel::stalling();
    let session = connected_session(&channel, SessionConfig::default()).await;

    let (first, second) = tokio::join!(session.send_count(200), session.send_power(true));

    assert!(matches!(first, Err(LedError::CommandTimeout { .. })));
    match second {
        Err(LedError::SessionBusy { opcode }) => assert_eq!(opcode, Opcode::PowerSet),
        other => panic!("expected SessionBusy, got {other:?}"),
    }
    // the rejected call never touched the channel
    assert!(channel.writes().iter().all(|(_, mode)| *mode == WriteMode::WithResponse));
    assert_eq!(channel.writes().len(), 3);
    assert_eq!(session.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_after_bounded_retries() {
    let channel = ScriptedChannel::stalling();
    let session = connected_session(&channel, SessionConfig::default()).await;

    let started = tokio::time::Instant::now();
    let err = session.send_count(200).await.unwrap_err();
    match err {
        LedError::CommandTimeout { opcode, attempts } => {
            assert_eq!(opcode, Opcode::LedCountSet);
            assert_eq!(attempts, 3);
        }
        other => panic!("expected CommandTimeout, got {other:?}"),
    }
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(6) && elapsed < Duration::from_millis(6100));

    // the same encrypted packet is resent on every attempt
    let writes = channel.writes();
    assert_eq!(writes.len(), 3);
    assert!(writes.iter().all(|w| w.0 == writes[0].0));

    assert_eq!(session.state(), ConnectionState::Connected);
    assert!(session.last_error().unwrap().contains("timed out"));
}

#[tokio::test(start_paused = true)]
async fn test_retry_recovers_after_one_timeout() {
    let channel = ScriptedChannel::new();
    channel.with(|s| s.stall_next_writes = 1);
    let session = connected_session(&channel, SessionConfig::default()).await;

    let result = session.send_color(Rgb::WHITE).await.unwrap();
    assert!(result.acked);
    assert_eq!(channel.writes().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_write_without_response_fallback() {
    let channel = ScriptedChannel::new();
    channel.with(|s| s.reject_with_response = true);
    let session = connected_session(&channel, SessionConfig::default()).await;

    let result = session.send_power(true).await.unwrap();
    assert!(!result.acked);

    let modes: Vec<WriteMode> = channel.writes().into_iter().map(|(_, mode)| mode).collect();
    assert_eq!(modes, vec![WriteMode::WithResponse, WriteMode::WithoutResponse]);
}

#[tokio::test(start_paused = true)]
async fn test_notification_becomes_raw_response() {
    let channel = ScriptedChannel::new();
    channel.with(|s| s.reject_with_response = true);
    channel.push_notification(vec![0x01, 0x02, 0x03]);
    let session = connected_session(&channel, SessionConfig::default()).await;

    let result = session.send_power(true).await.unwrap();
    assert!(result.acked);
    assert_eq!(result.raw_response, Some(Bytes::from_static(&[0x01, 0x02, 0x03])));
}

#[tokio::test(start_paused = true)]
async fn test_malformed_command_not_sent() {
    let channel = ScriptedChannel::new();
    let session = connected_session(&channel, SessionConfig::default()).await;

    let err = session.send_command(&Command::led_count(65536)).await.unwrap_err();
    assert!(matches!(err, LedError::MalformedCommand { opcode: Opcode::LedCountSet, .. }));
    assert!(channel.writes().is_empty());
    assert_eq!(session.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_send_requires_connection() {
    let channel = ScriptedChannel::new();
    let session = DeviceSession::new(Box::new(channel.clone()), "AA:BB:CC:DD:EE:FF", SessionConfig::default());

    let err = session.send_power(true).await.unwrap_err();
    assert!(matches!(err, LedError::NotConnected { opcode: Opcode::PowerSet }));
}

#[tokio::test(start_paused = true)]
async fn test_connect_failure_reports_address() {
    let channel = ScriptedChannel::new();
    channel.with(|s| s.connect_error = Some(ChannelError::DeviceNotFound("AA:BB:CC:DD:EE:FF".to_string())));
    let session = DeviceSession::new(Box::new(channel.clone()), "AA:BB:CC:DD:EE:FF", SessionConfig::default());

    let err = session.connect().await.unwrap_err();
    match err {
        LedError::ConnectionFailed { address, reason } => {
            assert_eq!(address, "AA:BB:CC:DD:EE:FF");
            assert!(reason.contains("not found"));
        }
        other => panic!("expected ConnectionFailed, got {other:?}"),
    }
    assert_eq!(channel.with(|s| s.connects), 3);
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_connect_bounded_wait() {
    let channel = ScriptedChannel::new();
    channel.with(|s| s.connect_stalls = true);
    let config = SessionConfig {
        max_attempts: 1,
        ..SessionConfig::default()
    };
    let session = DeviceSession::new(Box::new(channel.clone()), "AA:BB:CC:DD:EE:FF", config);

    let err = session.connect().await.unwrap_err();
    assert!(matches!(err, LedError::ConnectionFailed { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_is_idempotent() {
    let channel = ScriptedChannel::new();
    let session = connected_session(&channel, SessionConfig::default()).await;

    session.disconnect().await;
    session.disconnect().await;
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(channel.with(|s| s.disconnects), 1);

    // never connected
    let fresh = DeviceSession::new(Box::new(ScriptedChannel::new()), "x", SessionConfig::default());
    fresh.disconnect().await;
    assert_eq!(fresh.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_retries_and_leaves_connected() {
    let channel = ScriptedChannel::stalling();
    let session = connected_session(&channel, SessionConfig::default()).await;
    let token = session.cancellation_token();

    let cancel_later = async {
        tokio::time::sleep(Duration::from_millis(2500)).await;
        token.cancel();
    };
    let (result, ()) = tokio::join!(session.send_power(false), cancel_later);

    assert!(matches!(result, Err(LedError::Cancelled { .. })));
    // first attempt timed out at 2s, second was interrupted
    assert_eq!(channel.writes().len(), 2);
    assert_eq!(session.state(), ConnectionState::Connected);

    session.disconnect().await;
    assert_eq!(session.state(), ConnectionState::Disconnected);
}
