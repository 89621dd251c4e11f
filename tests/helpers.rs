mod common;

use common::{mock_session, open_session, z64_rom, TEST_CHUNK};
use unflink::device::{CartType, CicChoice, CicType, DeviceError, ProtocolVer, SaveType, SessionState, UsbDataType};
use unflink::helpers::{self, LinkError};

fn rom_file(tag: &str, rom: &[u8]) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!("unflink-{}-{}.z64", tag, std::process::id()));
    std::fs::write(&path, rom).unwrap();
    path
}

#[tokio::test]
async fn init_finds_and_keeps_the_requested_protocol() {
    common::init_logging();
    let (mut session, _) = mock_session(Some(CartType::Sc64));
    helpers::init(&mut session, ProtocolVer::Version2).await.unwrap();
    assert_eq!(session.state(), SessionState::Found);
    assert_eq!(session.get_protocol(), ProtocolVer::Version2);
}

#[tokio::test]
async fn init_raises_with_the_error_name() {
    let (mut session, _) = mock_session(None);
    let err = helpers::init(&mut session, ProtocolVer::Version1).await.unwrap_err();
    assert_eq!(err.device_error(), Some(DeviceError::NotCart));
    assert!(err.to_string().contains("DEVICEERR_NOTCART"));
}

#[tokio::test]
async fn with_open_closes_after_success_and_failure() {
    let (mut session, state) = mock_session(Some(CartType::Sc64));
    helpers::init(&mut session, ProtocolVer::Version1).await.unwrap();

    let value = helpers::with_open(&mut session, |s| {
        Box::pin(async move {
            assert!(s.is_open());
            Ok(7)
        })
    })
    .await
    .unwrap();
    assert_eq!(value, 7);
    assert!(!session.is_open());

    let err = helpers::with_open(&mut session, |s| {
        Box::pin(async move { helpers::ensure_ok::<()>(s.test_debug().await.and(Err(DeviceError::PollFail))) })
    })
    .await
    .unwrap_err();
    assert_eq!(err.device_error(), Some(DeviceError::PollFail));
    assert!(!session.is_open());
    assert_eq!(state.lock().unwrap().closes, 2);
}

#[tokio::test]
async fn send_rom_from_path_applies_choices() {
    let (mut session, state) = open_session(CartType::Sc64).await;
    let rom = z64_rom(TEST_CHUNK as usize + 2);
    let path = rom_file("helper-send", &rom);

    helpers::send_rom_from_path(&mut session, &path, CicChoice::Explicit(CicType::X106), Some(SaveType::FlashRam))
        .await
        .unwrap();
    {
        let state = state.lock().unwrap();
        let boot = state.finished.unwrap();
        assert_eq!(boot.cic, CicType::X106);
        assert_eq!(boot.save, SaveType::FlashRam);
        // padded to the SC64's 4-byte alignment
        assert_eq!(state.written.len(), TEST_CHUNK as usize + 4);
    }
    assert_eq!(session.get_rom(), Some(path.as_path()));

    // Unset keeps the CIC, None keeps the save type
    helpers::send_rom_from_path(&mut session, &path, CicChoice::Unset, None).await.unwrap();
    assert_eq!(session.get_cic(), CicType::X106);
    assert_eq!(session.get_save(), SaveType::FlashRam);

    // Auto hands the CIC back to detection
    helpers::send_rom_from_path(&mut session, &path, CicChoice::Auto, None).await.unwrap();
    assert_eq!(session.get_cic(), CicType::Cic6102);
    assert!(!session.explicit_cic());
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn missing_rom_changes_nothing() {
    let (mut session, state) = open_session(CartType::Sc64).await;
    session.set_cic(CicType::X105);
    let err = helpers::send_rom_from_path(&mut session, "/no/such/rom.z64", CicChoice::Auto, Some(SaveType::Sram768))
        .await
        .unwrap_err();
    assert!(matches!(err, LinkError::Io(_)));
    assert_eq!(session.get_cic(), CicType::X105);
    assert_eq!(session.get_save(), SaveType::None);
    assert!(state.lock().unwrap().begun.is_none());
}

#[tokio::test]
async fn send_text_is_nul_terminated() {
    let (mut session, state) = open_session(CartType::Sc64).await;
    helpers::send_text(&mut session, "hello").await.unwrap();
    let sent = state.lock().unwrap().sent.clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, UsbDataType::Text);
    assert_eq!(sent[0].1, b"hello\0");
}
