// src/listener.rs

//! Buffer change listeners and change batching.
//!
//! Changes are recorded into a pending batch and reported to listeners
//! later, usually once redraw happens. A new change whose line numbers
//! would invalidate the recorded ones forces the batch out to the
//! listeners first, so a listener always sees line numbers that are
//! still accurate when its callback runs. Callbacks run under textlock;
//! a listener removed from inside a callback is only marked and swept
//! after the walk.

use log::trace;

use crate::editor::EditorState;

/// One recorded change: lines `lnum..lnume` (1-based, end exclusive of
/// the change itself), `added` lines inserted (negative for deleted),
/// first changed column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeRec {
    pub lnum: usize,
    pub lnume: usize,
    pub added: i64,
    pub col: usize,
}

pub type ListenerFn = Box<dyn FnMut(&mut EditorState, u64, &[ChangeRec])>;

struct Listener {
    /// Zero marks a listener removed mid-invoke, swept afterwards.
    id: u64,
    callback: ListenerFn,
}

/// Listeners and the pending change batch for one buffer.
#[derive(Default)]
pub struct ListenerSet {
    listeners: Vec<Listener>,
    recorded: Vec<ChangeRec>,
    next_id: u64,
    invoking: bool,
}

impl ListenerSet {
    pub fn new() -> Self {
        ListenerSet::default()
    }

    pub fn add(&mut self, callback: ListenerFn) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.listeners.push(Listener { id, callback });
        id
    }

    /// Removes a listener. During an invoke the entry is only marked so
    /// the walk over the list stays sound.
    pub fn remove(&mut self, id: u64) -> bool {
        if id == 0 {
            return false;
        }
        if self.invoking {
            match self.listeners.iter_mut().find(|l| l.id == id) {
                Some(l) => {
                    l.id = 0;
                    true
                }
                None => false,
            }
        } else {
            let before = self.listeners.len();
            self.listeners.retain(|l| l.id != id);
            self.listeners.len() != before
        }
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.recorded.len()
    }

    fn would_invalidate(&self, lnum: usize, lnume: usize) -> bool {
        self.recorded
            .iter()
            .any(|prev| prev.lnum >= lnum || prev.lnum > lnume || prev.lnume >= lnum)
    }

    /// Records a change, flushing the current batch first when the new
    /// change's line numbers would make the recorded ones stale.
    pub fn may_record_change(
        &mut self,
        state: &mut EditorState,
        bufnr: u64,
        change: ChangeRec,
    ) {
        if !self.recorded.is_empty() && self.would_invalidate(change.lnum, change.lnume) {
            trace!(
                "change at line {} invalidates {} recorded changes, flushing",
                change.lnum,
                self.recorded.len()
            );
            self.invoke(state, bufnr);
        }
        if !self.listeners.is_empty() {
            self.recorded.push(change);
        }
    }

    /// Reports the pending batch to every listener, in the order they
    /// were added, with buffer text locked for the duration.
    pub fn invoke(&mut self, state: &mut EditorState, bufnr: u64) {
        if self.recorded.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.recorded);
        self.invoking = true;
        state.enter_textlock();
        let mut i = 0;
        while i < self.listeners.len() {
            if self.listeners[i].id != 0 {
                (self.listeners[i].callback)(state, bufnr, &batch);
            }
            // A callback may have asked for removals; honor them before
            // the next listener runs.
            for id in state.listener_removals.drain(..) {
                if let Some(l) = self.listeners.iter_mut().find(|l| l.id == id) {
                    l.id = 0;
                }
            }
            i += 1;
        }
        state.leave_textlock();
        self.invoking = false;
        self.listeners.retain(|l| l.id != 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn change(lnum: usize, lnume: usize, added: i64) -> ChangeRec {
        ChangeRec { lnum, lnume, added, col: 1 }
    }

    fn recording_listener(log: &Rc<RefCell<Vec<Vec<ChangeRec>>>>) -> ListenerFn {
        let log = Rc::clone(log);
        Box::new(move |_state, _buf, batch| log.borrow_mut().push(batch.to_vec()))
    }

    #[test]
    fn batch_accumulates_descending_safe_changes() {
        let mut set = ListenerSet::new();
        let mut state = EditorState::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        set.add(recording_listener(&log));

        set.may_record_change(&mut state, 1, change(2, 3, 0));
        set.may_record_change(&mut state, 1, change(5, 6, 0));
        assert!(log.borrow().is_empty());
        assert_eq!(set.pending_count(), 2);

        set.invoke(&mut state, 1);
        assert_eq!(log.borrow().len(), 1);
        assert_eq!(log.borrow()[0].len(), 2);
    }

    #[test]
    fn invalidating_change_flushes_previous_batch_first() {
        let mut set = ListenerSet::new();
        let mut state = EditorState::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        set.add(recording_listener(&log));

        set.may_record_change(&mut state, 1, change(5, 7, 1));
        // An earlier line: the recorded numbers would go stale.
        set.may_record_change(&mut state, 1, change(3, 4, 0));

        assert_eq!(log.borrow().len(), 1, "first batch must flush eagerly");
        assert_eq!(log.borrow()[0], vec![change(5, 7, 1)]);
        assert_eq!(set.pending_count(), 1);

        set.invoke(&mut state, 1);
        assert_eq!(log.borrow()[1], vec![change(3, 4, 0)]);
    }

    #[test]
    fn callbacks_run_under_textlock_in_order() {
        let mut set = ListenerSet::new();
        let mut state = EditorState::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        for tag in ["first", "second"] {
            let order = Rc::clone(&order);
            set.add(Box::new(move |state, _, _| {
                assert!(state.text_locked());
                order.borrow_mut().push(tag);
            }));
        }
        set.may_record_change(&mut state, 1, change(1, 2, 0));
        set.invoke(&mut state, 1);
        assert!(!state.text_locked());
        assert_eq!(*order.borrow(), vec!["first", "second"]);
    }

    #[test]
    fn no_listeners_records_nothing() {
        let mut set = ListenerSet::new();
        let mut state = EditorState::new();
        set.may_record_change(&mut state, 1, change(1, 2, 0));
        assert_eq!(set.pending_count(), 0);
    }

    #[test]
    fn removal_from_inside_a_callback_is_deferred() {
        let mut set = ListenerSet::new();
        let mut state = EditorState::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        set.add(recording_listener(&log));
        let victim_id = 2; // the listener added below
        set.add(recording_listener(&log));
        {
            let log = Rc::clone(&log);
            set.remove(1);
            set.add(Box::new(move |state, _, _| {
                state.listener_removals.push(victim_id);
                log.borrow_mut().push(vec![]);
            }));
        }

        // Listener order is now: victim (id 2), remover (id 3). The
        // victim runs this round; removal lands before the next invoke.
        set.may_record_change(&mut state, 1, change(1, 2, 0));
        set.invoke(&mut state, 1);
        let first_round = log.borrow().len();
        assert_eq!(first_round, 2);

        set.may_record_change(&mut state, 1, change(1, 2, 0));
        set.invoke(&mut state, 1);
        assert_eq!(log.borrow().len(), first_round + 1, "victim must be gone");
    }

    #[test]
    fn removal_after_invoke_takes_effect() {
        let mut set = ListenerSet::new();
        let mut state = EditorState::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let id = set.add(recording_listener(&log));
        assert!(set.remove(id));
        assert!(!set.remove(id));
        set.may_record_change(&mut state, 1, change(1, 2, 0));
        set.invoke(&mut state, 1);
        assert!(log.borrow().is_empty());
    }
}
