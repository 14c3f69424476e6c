//! Core types shared across the protocol

/// Endpoint dialed when nothing else is configured (backend port 5000).
pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:5000/ws";

/// Keypad key that submits the buffered PIN.
pub const ENTER_KEY: char = '#';

/// Keypad key that erases the last buffered digit.
pub const CLEAR_KEY: char = '*';

/// Whether `key` exists on the physical 3x4 keypad.
pub fn is_keypad_key(key: char) -> bool {
    key.is_ascii_digit() || key == ENTER_KEY || key == CLEAR_KEY
}
