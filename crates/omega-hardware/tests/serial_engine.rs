//! Integration tests for the serial engine.
//!
//! Device nodes are plain files in a temporary directory, configured as the
//! board's serial device prefix.

mod common;

use std::path::Path;
use std::time::Duration;

use common::{TIMEOUT, mock_board_with, next_serial_message};
use omega_core::Error;
use omega_hardware::{Board, BoardConfig, MockRunnerHandle, ProcessOutput, SerialEncoding};
use tempfile::TempDir;

/// Board whose channel `n` is the file `<dir>/ttyS<n>`.
fn serial_board(dir: &TempDir) -> (Board, MockRunnerHandle) {
    let config = BoardConfig::default().with_serial_device_prefix(dir.path().join("ttyS"));
    mock_board_with(config)
}

fn device(dir: &TempDir, channel: u8, contents: &[u8]) -> std::path::PathBuf {
    let path = dir.path().join(format!("ttyS{channel}"));
    std::fs::write(&path, contents).unwrap();
    path
}

async fn wait_for_contents(path: &Path, expected: &[u8]) {
    tokio::time::timeout(TIMEOUT, async {
        loop {
            if std::fs::read(path).unwrap() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("device never received the expected bytes");
}

#[tokio::test]
async fn test_open_configures_line_speed() {
    let dir = tempfile::tempdir().unwrap();
    let path = device(&dir, 0, b"");
    let (board, handle) = serial_board(&dir);

    board.serial_open(9600, 0).unwrap();

    assert!(board.is_serial_open(0));
    assert_eq!(board.serial_address(0), path);
    assert_eq!(
        handle.command_lines(),
        vec![format!("stty -F {} 9600", path.display())]
    );
}

#[tokio::test]
async fn test_open_defaults_to_115200() {
    let dir = tempfile::tempdir().unwrap();
    let path = device(&dir, 1, b"");
    let (board, handle) = serial_board(&dir);

    board.serial_open(0, 1).unwrap();

    assert_eq!(
        handle.command_lines(),
        vec![format!("stty -F {} 115200", path.display())]
    );
}

#[tokio::test]
async fn test_open_fails_when_stty_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = device(&dir, 0, b"");
    let (board, handle) = serial_board(&dir);
    handle.respond(
        format!("stty -F {} 9600", path.display()),
        ProcessOutput::failure(1, "stty: invalid argument"),
    );

    let result = board.serial_open(9600, 0);

    assert!(matches!(result, Err(Error::ProcessFailed { .. })));
    assert!(!board.is_serial_open(0));
}

#[tokio::test]
async fn test_open_missing_device() {
    let dir = tempfile::tempdir().unwrap();
    let (board, _handle) = serial_board(&dir);

    assert!(matches!(board.serial_open(9600, 3), Err(Error::Io(_))));
}

#[tokio::test]
async fn test_two_frames_in_one_chunk() {
    let dir = tempfile::tempdir().unwrap();
    device(&dir, 0, b"");
    let (board, _handle) = serial_board(&dir);
    board.serial_open(9600, 0).unwrap();
    let mut events = board.subscribe();

    board.serial_receive(0, b"AB\nCD\n");

    let first = next_serial_message(&mut events).await;
    let second = next_serial_message(&mut events).await;
    assert_eq!(first.message, &b"AB\n"[..]);
    assert_eq!(second.message, &b"CD\n"[..]);
    assert_eq!((first.channel, first.baud_rate), (0, 9600));
    assert_eq!(board.serial_buffered(0), Some(0));
}

#[tokio::test]
async fn test_partial_message_stays_buffered() {
    let dir = tempfile::tempdir().unwrap();
    device(&dir, 0, b"");
    let (board, _handle) = serial_board(&dir);
    board.serial_open(9600, 0).unwrap();
    board.serial_listen("\r\n", 0).unwrap();
    let mut events = board.subscribe();

    board.serial_receive(0, b"OK\r");
    assert_eq!(board.serial_buffered(0), Some(3));

    board.serial_receive(0, b"\nNEXT");
    let message = next_serial_message(&mut events).await;
    assert_eq!(message.text(), "OK\r\n");
    assert_eq!(board.serial_buffered(0), Some(4));
}

#[tokio::test]
async fn test_listen_publishes_device_messages() {
    let dir = tempfile::tempdir().unwrap();
    let path = device(&dir, 0, b"AB\nCD\n");
    let (board, _handle) = serial_board(&dir);
    let mut events = board.subscribe();

    board.serial_open(115_200, 0).unwrap().serial_listen("", 0).unwrap();

    let first = next_serial_message(&mut events).await;
    let second = next_serial_message(&mut events).await;
    assert_eq!(first.text(), "AB\n");
    assert_eq!(second.text(), "CD\n");
    assert_eq!(first.address, path);
}

#[tokio::test]
async fn test_writes_reach_device_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = device(&dir, 1, b"");
    let (board, _handle) = serial_board(&dir);
    board.serial_open(9600, 1).unwrap();

    board
        .serial_write("AT", SerialEncoding::Ascii, 1)
        .unwrap()
        .serial_write("0d0a", SerialEncoding::Hex, 1)
        .unwrap()
        .serial_write("ok", SerialEncoding::Utf8, 1)
        .unwrap();

    wait_for_contents(&path, b"AT\r\nok").await;
}

#[tokio::test]
async fn test_close_flushes_queued_writes() {
    let dir = tempfile::tempdir().unwrap();
    let path = device(&dir, 2, b"");
    let (board, _handle) = serial_board(&dir);
    board.serial_open(9600, 2).unwrap();

    board
        .serial_write("bye\n", SerialEncoding::Utf8, 2)
        .unwrap()
        .serial_close(2);

    assert!(!board.is_serial_open(2));
    wait_for_contents(&path, b"bye\n").await;
}

#[tokio::test]
async fn test_closed_channel() {
    let dir = tempfile::tempdir().unwrap();
    let (board, _handle) = serial_board(&dir);

    board.serial_close(5);

    assert!(matches!(
        board.serial_write("x", SerialEncoding::Utf8, 5),
        Err(Error::ChannelNotOpen(5))
    ));
    assert!(matches!(
        board.serial_listen("\n", 5),
        Err(Error::ChannelNotOpen(5))
    ));
    assert_eq!(board.serial_buffered(5), None);
}

#[tokio::test]
async fn test_invalid_encoding_is_rejected_before_queueing() {
    let dir = tempfile::tempdir().unwrap();
    let path = device(&dir, 0, b"");
    let (board, _handle) = serial_board(&dir);
    board.serial_open(9600, 0).unwrap();

    let result = board.serial_write("zz", SerialEncoding::Hex, 0);

    assert!(matches!(result, Err(Error::InvalidData { .. })));
    board.shutdown();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(std::fs::read(path).unwrap().is_empty());
    assert!(!board.is_serial_open(0));
}
