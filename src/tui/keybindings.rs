//! Key bindings — maps key events to application actions.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

/// Application-level actions triggered by key events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Quit the application.
    Quit,
    /// A tap: the player's input event.
    Hit,
    /// Stop and play the same seed again.
    Restart,
    /// Stop and play a freshly drawn seed.
    NewSeed,
    /// Start the run when idle.
    Start,
}

/// Map a key event to an action.
///
/// Every letter not bound to a command is a tap, so the player can drum on
/// the keyboard with both hands.
pub fn map_key(key: KeyEvent) -> Option<Action> {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    if ctrl && matches!(key.code, KeyCode::Char('c') | KeyCode::Char('q')) {
        return Some(Action::Quit);
    }
    if ctrl {
        return None;
    }

    match key.code {
        KeyCode::Esc | KeyCode::Char('q') => Some(Action::Quit),
        KeyCode::Char('r') => Some(Action::Restart),
        KeyCode::Char('n') => Some(Action::NewSeed),
        KeyCode::Enter => Some(Action::Start),
        KeyCode::Char(' ') => Some(Action::Hit),
        KeyCode::Char(c) if c.is_ascii_alphabetic() => Some(Action::Hit),
        _ => None,
    }
}
