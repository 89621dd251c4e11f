mod common;

use std::time::Duration;

use common::open_session;
use unflink::device::{CartType, DeviceError, ProtocolVer, UsbDataType};
use unflink::helpers::{self, LinkError};
use unflink::protocol::{negotiate, HeartbeatError, Packet};

fn heartbeat(body: &[u8]) -> Packet {
    Packet::new(UsbDataType::Heartbeat, body.to_vec())
}

#[tokio::test]
async fn heartbeat_upgrades_protocol_and_is_swallowed() {
    let (mut session, state) = open_session(CartType::EverDrive).await;
    assert_eq!(session.get_protocol(), ProtocolVer::Version1);
    state.lock().unwrap().inbound.push_back(heartbeat(&[0x00, 0x02, 0x00, 0x01]));

    let received = helpers::receive(&mut session, true).await.unwrap();
    assert_eq!(received, None);
    assert_eq!(session.get_protocol(), ProtocolVer::Version2);
}

#[tokio::test]
async fn heartbeat_is_delivered_when_not_handled() {
    let (mut session, state) = open_session(CartType::EverDrive).await;
    let packet = heartbeat(&[0x00, 0x02, 0x00, 0x01]);
    state.lock().unwrap().inbound.push_back(packet.clone());

    let received = helpers::receive(&mut session, false).await.unwrap();
    assert_eq!(received, Some(packet));
    assert_eq!(session.get_protocol(), ProtocolVer::Version1);
}

#[tokio::test]
async fn malformed_heartbeat_leaves_protocol_alone() {
    let (mut session, state) = open_session(CartType::Sc64).await;
    state.lock().unwrap().inbound.push_back(heartbeat(&[0x00, 0x02, 0x00]));

    let err = helpers::receive(&mut session, true).await.unwrap_err();
    assert!(matches!(err, LinkError::Heartbeat(HeartbeatError::Malformed { len: 3 })));
    assert_eq!(session.get_protocol(), ProtocolVer::Version1);
}

#[tokio::test]
async fn newer_protocol_asks_for_an_update() {
    let (mut session, _) = open_session(CartType::Sc64).await;
    let err = negotiate(&mut session, &[0x00, 0x03, 0x00, 0x01]).unwrap_err();
    assert_eq!(err, HeartbeatError::UnsupportedProtocol(3));
    assert!(err.to_string().contains("update"));
    assert_eq!(session.get_protocol(), ProtocolVer::Version1);
}

#[tokio::test]
async fn unknown_heartbeat_version_is_rejected_before_any_change() {
    let (mut session, _) = open_session(CartType::Sc64).await;
    let err = negotiate(&mut session, &[0x00, 0x02, 0x00, 0x02]).unwrap_err();
    assert_eq!(err, HeartbeatError::UnsupportedVersion(2));
    assert_eq!(session.get_protocol(), ProtocolVer::Version1);
}

#[tokio::test]
async fn heartbeat_can_downgrade() {
    let (mut session, _) = open_session(CartType::Sc64).await;
    session.set_protocol(ProtocolVer::Version2);
    assert_eq!(negotiate(&mut session, &[0x00, 0x00, 0x00, 0x01]), Ok(ProtocolVer::Version1));
    assert_eq!(session.get_protocol(), ProtocolVer::Version1);
}

#[tokio::test]
async fn wait_for_packet_skips_heartbeats() {
    let (mut session, state) = open_session(CartType::Sc64).await;
    let text = Packet::new(UsbDataType::Text, b"ready\0".to_vec());
    {
        let mut state = state.lock().unwrap();
        state.inbound.push_back(heartbeat(&[0x00, 0x02, 0x00, 0x01]));
        state.inbound.push_back(text.clone());
    }

    let packet = helpers::wait_for_packet(&mut session, Some(Duration::from_secs(1))).await.unwrap();
    assert_eq!(packet, text);
    assert_eq!(packet.text().as_deref(), Some("ready"));
    assert_eq!(session.get_protocol(), ProtocolVer::Version2);
}

#[tokio::test]
async fn wait_for_packet_times_out() {
    let (mut session, _) = open_session(CartType::Sc64).await;
    let err = helpers::wait_for_packet(&mut session, Some(Duration::from_millis(5)))
        .await
        .unwrap_err();
    assert_eq!(err.device_error(), Some(DeviceError::Timeout));
}
