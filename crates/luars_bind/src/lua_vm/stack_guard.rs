use std::ops::{Deref, DerefMut};

use crate::state::State;

/// Scoped stack top guard.
///
/// Restores the stack top of the current frame when dropped, on every exit
/// path including `?` propagation. Derefs to the guarded `State`.
pub struct StackGuard<'a> {
    state: &'a mut State,
    top: usize,
}

impl<'a> StackGuard<'a> {
    pub fn new(state: &'a mut State) -> Self {
        let top = state.get_top();
        StackGuard { state, top }
    }

    /// Top that will be restored.
    pub fn saved_top(&self) -> usize {
        self.top
    }
}

impl Deref for StackGuard<'_> {
    type Target = State;

    fn deref(&self) -> &State {
        self.state
    }
}

impl DerefMut for StackGuard<'_> {
    fn deref_mut(&mut self) -> &mut State {
        self.state
    }
}

impl Drop for StackGuard<'_> {
    fn drop(&mut self) {
        self.state.set_top(self.top);
    }
}
