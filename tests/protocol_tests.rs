// SPDX-License-Identifier: MPL-2.0

//! Integration tests for the data channel control protocol and file transfers

use camhub::errors::ProtocolError;
use camhub::session::{ControlMessage, FileOffer, PendingFileTransfer, WriteOutcome, parse_control_message};

fn offer_from(json: &str) -> FileOffer {
    match parse_control_message(json).unwrap() {
        ControlMessage::SendFile(offer) => offer,
        other => panic!("expected a file offer, got {:?}", other),
    }
}

#[test]
fn test_command_key_is_indirect() {
    let offer = offer_from(r#"{"type":"action","action":"sendfile","file":{"name":"clip.opus","size":12}}"#);
    assert_eq!(offer.name, "clip.opus");
    assert_eq!(offer.size, 12);

    // "cmd" carries sendfile but "type" points elsewhere
    let msg = r#"{"type":"kind","kind":"hello","cmd":"sendfile"}"#;
    assert_eq!(
        parse_control_message(msg).unwrap(),
        ControlMessage::Unknown("kind".into())
    );
}

#[test]
fn test_protocol_errors() {
    assert!(matches!(parse_control_message(""), Err(ProtocolError::Malformed(_))));
    assert!(matches!(parse_control_message("\"text\""), Err(ProtocolError::NotAnObject)));
    assert!(matches!(parse_control_message(r#"{"type":3}"#), Err(ProtocolError::MissingType)));
    assert!(matches!(
        parse_control_message(r#"{"type":"cmd","cmd":"sendfile","file":{"size":1}}"#),
        Err(ProtocolError::InvalidFile(_))
    ));
}

#[test]
fn test_transfer_completes_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let offer = offer_from(r#"{"type":"cmd","cmd":"sendfile","file":{"name":"a.bin","size":4}}"#);
    let mut transfer = PendingFileTransfer::begin(dir.path(), &offer).unwrap();

    let outcomes: Vec<WriteOutcome> = [&b"a"[..], b"bc", b"d", b"e"]
        .iter()
        .map(|chunk| transfer.write(chunk).unwrap())
        .collect();
    let completions = outcomes
        .iter()
        .filter(|o| matches!(o, WriteOutcome::Completed(_)))
        .count();

    assert_eq!(completions, 1);
    assert_eq!(outcomes[3], WriteOutcome::Ignored);
    assert!(transfer.is_complete());
    assert_eq!(std::fs::read(dir.path().join("a.bin")).unwrap(), b"abcd");
}

#[test]
fn test_short_transfer_stays_pending() {
    let dir = tempfile::tempdir().unwrap();
    let offer = offer_from(r#"{"type":"cmd","cmd":"sendfile","file":{"name":"a.bin","size":4}}"#);
    let mut transfer = PendingFileTransfer::begin(dir.path(), &offer).unwrap();

    assert_eq!(
        transfer.write(b"abc").unwrap(),
        WriteOutcome::InProgress { written: 3, remaining: 1 }
    );
    assert!(!transfer.is_complete());
    assert_eq!(transfer.declared_size(), 4);
}

#[test]
fn test_zero_size_offer_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let offer = offer_from(r#"{"type":"cmd","cmd":"sendfile","file":{"name":"empty"}}"#);
    assert!(matches!(
        PendingFileTransfer::begin(dir.path(), &offer),
        Err(ProtocolError::InvalidFile(_))
    ));
    assert!(!dir.path().join("empty").exists());
}
