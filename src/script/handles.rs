// src/script/handles.rs

//! Buffer and window handles for the script host, plus the primitive
//! procedures operating through them.
//!
//! Handles are weak by construction: they carry only an id and are
//! validated against the editor on every dereference, so a script
//! holding a handle to a wiped buffer gets a clean error instead of a
//! dangling pointer. Mutating primitives respect the textlock and the
//! sandbox.

use super::value::EdValue;
use super::{check_sandbox, ScriptError};
use crate::editor::{Buffer, EditorState, OptionValue, Window};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuffHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WinHandle(pub u64);

pub fn buff_valid(state: &EditorState, h: BuffHandle) -> bool {
    state.buffer(h.0).is_some()
}

pub fn win_valid(state: &EditorState, h: WinHandle) -> bool {
    state.window(h.0).is_some()
}

fn deref_buf(state: &EditorState, h: BuffHandle) -> Result<&Buffer, ScriptError> {
    state
        .buffer(h.0)
        .ok_or_else(|| ScriptError::Vim(format!("buffer {} no longer exists", h.0)))
}

fn deref_win(state: &EditorState, h: WinHandle) -> Result<&Window, ScriptError> {
    state
        .window(h.0)
        .ok_or_else(|| ScriptError::Vim(format!("window {} no longer exists", h.0)))
}

fn check_textlock(state: &EditorState) -> Result<(), ScriptError> {
    if state.text_locked() {
        return Err(ScriptError::Vim("text is locked".to_string()));
    }
    Ok(())
}

pub fn curr_buff(state: &EditorState) -> BuffHandle {
    BuffHandle(state.current_buffer)
}

pub fn curr_win(state: &EditorState) -> WinHandle {
    WinHandle(state.current_window)
}

/// Opens (creates) a buffer on a file name. A file operation, so the
/// sandbox gets a say.
pub fn open_buff(state: &mut EditorState, name: &str) -> Result<BuffHandle, ScriptError> {
    check_sandbox(state, "open-buff")?;
    Ok(BuffHandle(state.open_buffer(name)))
}

pub fn buff_name(state: &EditorState, h: BuffHandle) -> Result<String, ScriptError> {
    Ok(deref_buf(state, h)?.name.clone())
}

pub fn buff_line_count(state: &EditorState, h: BuffHandle) -> Result<usize, ScriptError> {
    Ok(deref_buf(state, h)?.line_count())
}

pub fn get_buff_line(
    state: &EditorState,
    h: BuffHandle,
    lnum: usize,
) -> Result<String, ScriptError> {
    deref_buf(state, h)?
        .line(lnum)
        .map(str::to_string)
        .ok_or_else(|| ScriptError::Vim(format!("line {} out of range", lnum)))
}

/// Lines `start..=end`, clamped to the buffer.
pub fn get_buff_lines(
    state: &EditorState,
    h: BuffHandle,
    start: usize,
    end: usize,
) -> Result<Vec<String>, ScriptError> {
    let buf = deref_buf(state, h)?;
    let start = start.max(1);
    let end = end.min(buf.line_count());
    Ok((start..=end)
        .filter_map(|l| buf.line(l).map(str::to_string))
        .collect())
}

pub fn set_buff_line(
    state: &mut EditorState,
    h: BuffHandle,
    lnum: usize,
    text: &str,
) -> Result<(), ScriptError> {
    check_textlock(state)?;
    let buf = state
        .buffer_mut(h.0)
        .ok_or_else(|| ScriptError::Vim(format!("buffer {} no longer exists", h.0)))?;
    if !buf.set_line(lnum, text) {
        return Err(ScriptError::Vim(format!("line {} out of range", lnum)));
    }
    Ok(())
}

pub fn set_buff_lines(
    state: &mut EditorState,
    h: BuffHandle,
    start: usize,
    lines: &[String],
) -> Result<(), ScriptError> {
    for (i, text) in lines.iter().enumerate() {
        set_buff_line(state, h, start + i, text)?;
    }
    Ok(())
}

pub fn windows(state: &EditorState) -> Vec<WinHandle> {
    state.windows().map(|w| WinHandle(w.id)).collect()
}

pub fn win_buffer(state: &EditorState, h: WinHandle) -> Result<BuffHandle, ScriptError> {
    Ok(BuffHandle(deref_win(state, h)?.buffer))
}

pub fn get_cursor(state: &EditorState, h: WinHandle) -> Result<(usize, usize), ScriptError> {
    Ok(deref_win(state, h)?.cursor)
}

pub fn set_cursor(
    state: &mut EditorState,
    h: WinHandle,
    lnum: usize,
    col: usize,
) -> Result<(), ScriptError> {
    check_textlock(state)?;
    let buffer = deref_win(state, h)?.buffer;
    let max = state
        .buffer(buffer)
        .map(Buffer::line_count)
        .unwrap_or(1);
    if lnum == 0 || lnum > max {
        return Err(ScriptError::Vim(format!("cursor line {} out of range", lnum)));
    }
    let win = state
        .window_mut(h.0)
        .ok_or_else(|| ScriptError::Vim(format!("window {} no longer exists", h.0)))?;
    win.cursor = (lnum, col);
    Ok(())
}

pub fn win_width(state: &EditorState, h: WinHandle) -> Result<u16, ScriptError> {
    Ok(deref_win(state, h)?.width)
}

pub fn win_height(state: &EditorState, h: WinHandle) -> Result<u16, ScriptError> {
    Ok(deref_win(state, h)?.height)
}

/// Queues an Ex command for the editor. Sandboxed scripts may not.
pub fn execute(state: &mut EditorState, cmd: &str) -> Result<(), ScriptError> {
    check_sandbox(state, "execute")?;
    check_textlock(state)?;
    state.command_sink.push(cmd.to_string());
    Ok(())
}

/// Evaluates a literal expression. The full expression evaluator lives
/// in the editor core; only self-evaluating literals work from here.
pub fn evaluate(state: &mut EditorState, expr: &str) -> Result<EdValue, ScriptError> {
    let _ = state;
    let expr = expr.trim();
    if let Ok(n) = expr.parse::<i64>() {
        return Ok(EdValue::Number(n));
    }
    if let Ok(f) = expr.parse::<f64>() {
        return Ok(EdValue::Float(f));
    }
    if expr.len() >= 2 && expr.starts_with('\'') && expr.ends_with('\'') {
        return Ok(EdValue::Str(expr[1..expr.len() - 1].to_string()));
    }
    Err(ScriptError::Domain(format!(
        "cannot evaluate {:?} without the editor's evaluator",
        expr
    )))
}

pub fn get_option(state: &EditorState, name: &str) -> Result<EdValue, ScriptError> {
    match state.option(name) {
        Some(OptionValue::Number(n)) => Ok(EdValue::Number(*n)),
        Some(OptionValue::Bool(b)) => Ok(EdValue::Bool(*b)),
        Some(OptionValue::Str(s)) => Ok(EdValue::Str(s.clone())),
        None => Err(ScriptError::Vim(format!("unknown option {:?}", name))),
    }
}

pub fn set_option(
    state: &mut EditorState,
    name: &str,
    value: EdValue,
) -> Result<(), ScriptError> {
    let value = match value {
        EdValue::Number(n) => OptionValue::Number(n),
        EdValue::Bool(b) => OptionValue::Bool(b),
        EdValue::Str(s) => OptionValue::Str(s),
        other => {
            return Err(ScriptError::Domain(format!(
                "option value must be scalar, not {:?}",
                other
            )))
        }
    };
    state.set_option(name, value);
    Ok(())
}

pub fn beep(state: &mut EditorState) {
    state.beep();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_buffer_handle_errors_cleanly() {
        let state = EditorState::new();
        let stale = BuffHandle(999);
        assert!(!buff_valid(&state, stale));
        assert!(matches!(
            get_buff_line(&state, stale, 1),
            Err(ScriptError::Vim(_))
        ));
    }

    #[test]
    fn line_get_set_round_trip() {
        let mut state = EditorState::new();
        let buf = curr_buff(&state);
        set_buff_line(&mut state, buf, 1, "from the host").unwrap();
        assert_eq!(get_buff_line(&state, buf, 1).unwrap(), "from the host");
    }

    #[test]
    fn range_query_clamps() {
        let mut state = EditorState::new();
        let buf = curr_buff(&state);
        let id = buf.0;
        state
            .buffer_mut(id)
            .unwrap()
            .set_lines(vec!["a".into(), "b".into(), "c".into()]);
        assert_eq!(get_buff_lines(&state, buf, 0, 99).unwrap(), vec!["a", "b", "c"]);
        assert_eq!(get_buff_lines(&state, buf, 2, 2).unwrap(), vec!["b"]);
    }

    #[test]
    fn textlock_blocks_mutation() {
        let mut state = EditorState::new();
        let buf = curr_buff(&state);
        state.enter_textlock();
        assert!(matches!(
            set_buff_line(&mut state, buf, 1, "nope"),
            Err(ScriptError::Vim(_))
        ));
        state.leave_textlock();
        assert!(set_buff_line(&mut state, buf, 1, "yes").is_ok());
    }

    #[test]
    fn sandbox_blocks_open_and_execute() {
        let mut state = EditorState::new();
        state.sandbox = true;
        assert_eq!(open_buff(&mut state, "x"), Err(ScriptError::Sandbox));
        assert_eq!(execute(&mut state, "write"), Err(ScriptError::Sandbox));
        state.sandbox = false;
        execute(&mut state, "write").unwrap();
        assert_eq!(state.command_sink, vec!["write"]);
    }

    #[test]
    fn cursor_validation() {
        let mut state = EditorState::new();
        let win = curr_win(&state);
        assert!(set_cursor(&mut state, win, 2, 1).is_err());
        assert!(set_cursor(&mut state, win, 1, 5).is_ok());
        assert_eq!(get_cursor(&state, win).unwrap(), (1, 5));
    }

    #[test]
    fn literal_evaluation_only() {
        let mut state = EditorState::new();
        assert!(matches!(evaluate(&mut state, "42"), Ok(EdValue::Number(42))));
        assert!(matches!(evaluate(&mut state, "'hi'"), Ok(EdValue::Str(_))));
        assert!(evaluate(&mut state, "line('.')").is_err());
    }

    #[test]
    fn window_enumeration_and_geometry() {
        let mut state = EditorState::new();
        let buf = state.current_buffer;
        state.new_window(buf, 40, 10);
        let wins = windows(&state);
        assert_eq!(wins.len(), 2);
        assert_eq!(win_width(&state, wins[1]).unwrap(), 40);
        assert_eq!(win_height(&state, wins[1]).unwrap(), 10);
        assert_eq!(win_buffer(&state, wins[0]).unwrap().0, buf);
    }
}
