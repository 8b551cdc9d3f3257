//! Event channel factories and handles.

use super::types::WindowOpened;
use preconf_sdk::objects::Winner;
use tokio::sync::mpsc;

/// Sender handle for WindowOpened events.
///
/// Unbounded: the dispatcher invokes handlers synchronously and must never
/// wait on the settler. Windows open rarely.
pub type WindowOpenedSender = mpsc::UnboundedSender<WindowOpened>;
/// Receiver handle for WindowOpened events.
pub type WindowOpenedReceiver = mpsc::UnboundedReceiver<WindowOpened>;

/// Create a new WindowOpened channel.
pub fn window_opened_channel() -> (WindowOpenedSender, WindowOpenedReceiver) {
    mpsc::unbounded_channel()
}

/// Sender handle for winners announced on chain.
pub type AnnouncedWinnerSender = mpsc::UnboundedSender<Winner>;
/// Receiver handle for winners announced on chain.
pub type AnnouncedWinnerReceiver = mpsc::UnboundedReceiver<Winner>;

/// Create a new announced-winner channel.
pub fn announced_winner_channel() -> (AnnouncedWinnerSender, AnnouncedWinnerReceiver) {
    mpsc::unbounded_channel()
}
