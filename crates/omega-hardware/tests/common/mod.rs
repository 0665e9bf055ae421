//! Shared helpers for the board integration tests.
//!
//! Every test drives a [`Board`] over a [`MockRunner`], so no hardware or
//! Omega2 utilities are needed. The helpers here build such boards and wait
//! for specific events on a subscription, skipping the `Connect`/`Ready`
//! pair every board publishes at startup.

#![allow(dead_code)]

use std::time::Duration;

use omega_hardware::{
    Board, BoardConfig, BoardEvent, ErrorEvent, I2cReply, MockRunner, MockRunnerHandle,
    SerialMessage,
};
use tokio::sync::broadcast;

/// Upper bound for waiting on anything in these tests.
pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Board with the Omega2 pin table over a fresh mock runner.
pub fn mock_board() -> (Board, MockRunnerHandle) {
    mock_board_with(BoardConfig::default())
}

/// Board built from `config` over a fresh mock runner.
pub fn mock_board_with(config: BoardConfig) -> (Board, MockRunnerHandle) {
    let (runner, handle) = MockRunner::new();
    let board = Board::with_runner(config, runner).expect("pin table should build");
    (board, handle)
}

/// Wait for the next event `pick` accepts.
pub async fn next_matching<T>(
    events: &mut broadcast::Receiver<BoardEvent>,
    mut pick: impl FnMut(BoardEvent) -> Option<T>,
) -> T {
    tokio::time::timeout(TIMEOUT, async {
        loop {
            let event = events.recv().await.expect("event stream closed");
            if let Some(found) = pick(event) {
                return found;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

pub async fn next_error(events: &mut broadcast::Receiver<BoardEvent>) -> ErrorEvent {
    next_matching(events, |event| match event {
        BoardEvent::Error(error) => Some(error),
        _ => None,
    })
    .await
}

pub async fn next_i2c_reply(events: &mut broadcast::Receiver<BoardEvent>) -> I2cReply {
    next_matching(events, |event| match event {
        BoardEvent::I2cReply(reply) => Some(reply),
        _ => None,
    })
    .await
}

pub async fn next_serial_message(events: &mut broadcast::Receiver<BoardEvent>) -> SerialMessage {
    next_matching(events, |event| match event {
        BoardEvent::SerialMessage(message) => Some(message),
        _ => None,
    })
    .await
}

/// Drain everything queued on `rx` without waiting.
pub fn drain<T>(rx: &mut tokio::sync::mpsc::UnboundedReceiver<T>) -> Vec<T> {
    let mut items = Vec::new();
    while let Ok(item) = rx.try_recv() {
        items.push(item);
    }
    items
}
