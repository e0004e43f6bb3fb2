use std::io::stdout;
use std::time::Duration;

use crossterm::{
    cursor::{Hide, MoveToColumn, Show},
    event::{poll, read, Event, KeyCode, KeyEvent, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode},
    Result,
};

/// What the operator did while we were polling the keyboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPress {
    Nothing,
    Escape,
    /// Ctrl+C, which raw mode delivers as a key instead of a signal.
    Interrupt,
    Other,
}

/// Wait up to `timeout` for a single key press.
pub(crate) fn poll_key(timeout: Duration) -> Result<KeyPress> {
    let event = in_raw_mode(enable_raw_mode, disable_raw_mode, || -> Result<Option<Event>> {
        execute!(stdout(), Hide)?;
        let ready = poll(timeout);
        execute!(stdout(), MoveToColumn(0), Show)?;

        // It's guaranteed that read() wont block if `poll` returns `Ok(true)`
        if ready? {
            read().map(Some)
        } else {
            Ok(None)
        }
    })?;

    Ok(match event {
        Some(event) => classify(&event),
        None => KeyPress::Nothing,
    })
}

/// Run `body` between `enter` and `leave`. Once `enter` succeeded, `leave`
/// runs whatever `body` returns, and the error of `body` wins over the one of
/// `leave`.
fn in_raw_mode<T, E>(
    enter: impl FnOnce() -> std::result::Result<(), E>,
    leave: impl FnOnce() -> std::result::Result<(), E>,
    body: impl FnOnce() -> std::result::Result<T, E>,
) -> std::result::Result<T, E> {
    enter()?;
    let result = body();
    let left = leave();
    let value = result?;
    left?;
    Ok(value)
}

fn classify(event: &Event) -> KeyPress {
    match event {
        Event::Key(KeyEvent {
            code: KeyCode::Esc, ..
        }) => KeyPress::Escape,
        Event::Key(KeyEvent {
            code: KeyCode::Char('c'),
            modifiers,
        }) if modifiers.contains(KeyModifiers::CONTROL) => KeyPress::Interrupt,
        Event::Key(_) => KeyPress::Other,
        _ => KeyPress::Nothing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_mode_is_left_when_the_terminal_fails() {
        let left = std::cell::Cell::new(0);
        let result: std::result::Result<(), &str> = in_raw_mode(
            || Ok(()),
            || {
                left.set(left.get() + 1);
                Ok(())
            },
            || Err("cursor hide failed"),
        );
        assert_eq!(result, Err("cursor hide failed"));
        assert_eq!(left.get(), 1);
    }

    #[test]
    fn body_error_wins_over_leave_error() {
        let result: std::result::Result<u8, &str> =
            in_raw_mode(|| Ok(()), || Err("leave"), || Err("body"));
        assert_eq!(result, Err("body"));

        let result: std::result::Result<u8, &str> = in_raw_mode(|| Ok(()), || Err("leave"), || Ok(7));
        assert_eq!(result, Err("leave"));
    }

    #[test]
    fn nothing_runs_when_raw_mode_cannot_be_entered() {
        let ran = std::cell::Cell::new(false);
        let result: std::result::Result<(), &str> = in_raw_mode(
            || Err("no tty"),
            || {
                ran.set(true);
                Ok(())
            },
            || {
                ran.set(true);
                Ok(())
            },
        );
        assert_eq!(result, Err("no tty"));
        assert!(!ran.get());
    }

    #[test]
    fn escape_and_ctrl_c_are_recognized() {
        assert_eq!(classify(&Event::Key(KeyCode::Esc.into())), KeyPress::Escape);
        let ctrl_c = Event::Key(KeyEvent {
            code: KeyCode::Char('c'),
            modifiers: KeyModifiers::CONTROL,
        });
        assert_eq!(classify(&ctrl_c), KeyPress::Interrupt);
        assert_eq!(classify(&Event::Key(KeyCode::Char('c').into())), KeyPress::Other);
        assert_eq!(classify(&Event::Resize(80, 24)), KeyPress::Nothing);
    }
}
