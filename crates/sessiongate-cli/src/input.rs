//! Terminal events as watchdog activity.

use crossterm::event::{Event, KeyEventKind, MouseEventKind};
use sessiongate_core::ActivitySignal;

/// Map a terminal event onto the interaction kind it represents, if any.
///
/// Key releases/repeats, mouse-button releases, resizes, focus changes, and
/// pastes do not count as activity.
pub fn activity_from_event(event: &Event) -> Option<ActivitySignal> {
    match event {
        Event::Key(key) if key.kind == KeyEventKind::Press => Some(ActivitySignal::KeyPress),
        Event::Mouse(mouse) => match mouse.kind {
            MouseEventKind::Moved | MouseEventKind::Drag(_) => Some(ActivitySignal::PointerMove),
            MouseEventKind::Down(_) => Some(ActivitySignal::Click),
            MouseEventKind::ScrollUp
            | MouseEventKind::ScrollDown
            | MouseEventKind::ScrollLeft
            | MouseEventKind::ScrollRight => Some(ActivitySignal::Scroll),
            MouseEventKind::Up(_) => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::{
        KeyCode, KeyEvent, KeyEventState, KeyModifiers, MouseButton, MouseEvent,
    };

    fn mouse(kind: MouseEventKind) -> Event {
        Event::Mouse(MouseEvent {
            kind,
            column: 3,
            row: 4,
            modifiers: KeyModifiers::NONE,
        })
    }

    #[test]
    fn test_key_press_is_activity() {
        let event = Event::Key(KeyEvent::new(KeyCode::Char('x'), KeyModifiers::NONE));
        assert_eq!(activity_from_event(&event), Some(ActivitySignal::KeyPress));
    }

    #[test]
    fn test_key_release_is_not_activity() {
        let event = Event::Key(KeyEvent {
            code: KeyCode::Char('x'),
            modifiers: KeyModifiers::NONE,
            kind: KeyEventKind::Release,
            state: KeyEventState::NONE,
        });
        assert_eq!(activity_from_event(&event), None);
    }

    #[test]
    fn test_mouse_kinds() {
        assert_eq!(
            activity_from_event(&mouse(MouseEventKind::Moved)),
            Some(ActivitySignal::PointerMove)
        );
        assert_eq!(
            activity_from_event(&mouse(MouseEventKind::Drag(MouseButton::Left))),
            Some(ActivitySignal::PointerMove)
        );
        assert_eq!(
            activity_from_event(&mouse(MouseEventKind::Down(MouseButton::Left))),
            Some(ActivitySignal::Click)
        );
        assert_eq!(
            activity_from_event(&mouse(MouseEventKind::ScrollDown)),
            Some(ActivitySignal::Scroll)
        );
        assert_eq!(activity_from_event(&mouse(MouseEventKind::Up(MouseButton::Left))), None);
    }

    #[test]
    fn test_other_events_ignored() {
        assert_eq!(activity_from_event(&Event::Resize(80, 24)), None);
        assert_eq!(activity_from_event(&Event::FocusGained), None);
    }
}
