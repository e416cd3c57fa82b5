//! Isolation and selection
//!
//! Every serial link's remote devices share one command bus. Selecting a
//! link makes its remote devices reachable for ordinary traffic; isolating
//! a link forces it to be the only live link, which is required while
//! addressing a device at a factory address that other links may share.
//!
//! At most one link is isolated. A link can only be selected while no link
//! is isolated or the isolated link is that same link.

use std::time::Instant;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, warn};

use super::Fabric;
use crate::error::{Result, SerdesError};

/// Something that can force one of its links to be the only live one
pub trait LinkIsolation: Send + Sync {
    fn isolate(&self, link: usize) -> Result<()>;
    fn deisolate(&self, link: usize) -> Result<()>;
}

#[derive(Debug, Default)]
pub(crate) struct Selection {
    pub isolated: Option<usize>,
    pub selected: Option<usize>,
    /// Nesting depth of `selected`
    pub depth: u32,
}

#[derive(Debug, Default)]
pub(crate) struct SelectionState {
    state: Mutex<Selection>,
    changed: Condvar,
}

impl SelectionState {
    pub fn isolated(&self) -> Option<usize> {
        self.state.lock().isolated
    }

    pub fn selected(&self) -> Option<usize> {
        self.state.lock().selected
    }
}

/// Deisolates its link when dropped
pub struct IsolationGuard<'a> {
    owner: &'a dyn LinkIsolation,
    link: usize,
    armed: bool,
}

impl<'a> IsolationGuard<'a> {
    pub fn acquire(owner: &'a dyn LinkIsolation, link: usize) -> Result<Self> {
        owner.isolate(link)?;
        Ok(Self {
            owner,
            link,
            armed: true,
        })
    }

    pub fn link(&self) -> usize {
        self.link
    }

    /// Deisolate now and report the outcome
    pub fn release(mut self) -> Result<()> {
        self.armed = false;
        self.owner.deisolate(self.link)
    }
}

impl Drop for IsolationGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = self.owner.deisolate(self.link) {
                warn!(link = self.link, error = %e, "Deisolate failed");
            }
        }
    }
}

impl Fabric {
    /// Block until `ready` holds for the selection state, releasing the
    /// lock while waiting
    fn wait_selection<'s>(
        &'s self,
        what: &str,
        link: usize,
        ready: impl Fn(&Selection) -> bool,
    ) -> Result<MutexGuard<'s, Selection>> {
        let poll = self.timing.isolation_poll();
        let deadline = Instant::now() + self.timing.isolation_timeout();
        let mut st = self.selection.state.lock();

        while !ready(&st) {
            if Instant::now() >= deadline {
                return Err(SerdesError::timeout(format!(
                    "{} link {}: isolated {:?}, selected {:?}",
                    what, link, st.isolated, st.selected
                )));
            }
            self.selection.changed.wait_for(&mut st, poll);
        }
        Ok(st)
    }

    /// Make `link` the only live link. Fails immediately with
    /// [`SerdesError::AlreadyInProgress`] if it already is.
    pub fn isolate_link(&self, link: usize) -> Result<()> {
        self.check_link(link)?;
        {
            let st = self.selection.state.lock();
            if st.isolated == Some(link) {
                return Err(SerdesError::AlreadyInProgress { link });
            }
        }

        let mut st = self.wait_selection("isolate", link, |s| {
            s.isolated.is_none() && s.selected.map_or(true, |sel| sel == link)
        })?;
        st.isolated = Some(link);

        if let Some(ops) = self.chip.serial_link() {
            if let Err(e) = ops.isolate(self.io(), link) {
                warn!(link, error = %e, "Isolate hook failed, rolling back");
                st.isolated = None;
                drop(st);
                self.selection.changed.notify_all();
                return Err(e);
            }
        }
        debug!(link, "Link isolated");
        Ok(())
    }

    /// Undo [`Fabric::isolate_link`]. The isolation state is cleared even
    /// when the chip hook fails.
    pub fn deisolate_link(&self, link: usize) -> Result<()> {
        self.check_link(link)?;
        let mut st = self.selection.state.lock();
        let result = match self.chip.serial_link() {
            Some(ops) => ops.deisolate(self.io(), link),
            None => Ok(()),
        };
        st.isolated = None;
        drop(st);
        self.selection.changed.notify_all();
        debug!(link, "Link deisolated");
        result
    }

    /// Route ordinary traffic to `link`. Nests: every select needs a
    /// matching [`Fabric::deselect_link`].
    pub fn select_link(&self, link: usize) -> Result<()> {
        self.check_link(link)?;
        let mut st = self.wait_selection("select", link, |s| {
            s.selected.map_or(true, |sel| sel == link) && s.isolated.map_or(true, |iso| iso == link)
        })?;

        st.selected = Some(link);
        st.depth += 1;
        if st.depth == 1 {
            if let Some(ops) = self.chip.serial_link() {
                if let Err(e) = ops.select(self.io(), link) {
                    st.depth = 0;
                    st.selected = None;
                    drop(st);
                    self.selection.changed.notify_all();
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    pub fn deselect_link(&self, link: usize) -> Result<()> {
        self.check_link(link)?;
        let mut st = self.selection.state.lock();
        if st.selected != Some(link) || st.depth == 0 {
            return Err(SerdesError::config(format!("link {} is not selected", link)));
        }

        st.depth -= 1;
        if st.depth > 0 {
            return Ok(());
        }
        let result = match self.chip.serial_link() {
            Some(ops) => ops.deselect(self.io(), link),
            None => Ok(()),
        };
        st.selected = None;
        drop(st);
        self.selection.changed.notify_all();
        result
    }

    pub fn isolated_link(&self) -> Option<usize> {
        self.selection.isolated()
    }

    pub fn selected_link(&self) -> Option<usize> {
        self.selection.selected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Records isolate/deisolate calls
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(bool, usize)>>,
    }

    impl LinkIsolation for Recorder {
        fn isolate(&self, link: usize) -> Result<()> {
            self.calls.lock().push((true, link));
            Ok(())
        }

        fn deisolate(&self, link: usize) -> Result<()> {
            self.calls.lock().push((false, link));
            Ok(())
        }
    }

    #[test]
    fn test_guard_deisolates_on_drop() {
        let rec = Recorder::default();
        {
            let guard = IsolationGuard::acquire(&rec, 3).unwrap();
            assert_eq!(guard.link(), 3);
        }
        assert_eq!(*rec.calls.lock(), vec![(true, 3), (false, 3)]);
    }

    #[test]
    fn test_guard_release_once() {
        let rec = Recorder::default();
        let guard = IsolationGuard::acquire(&rec, 1).unwrap();
        guard.release().unwrap();
        assert_eq!(rec.calls.lock().len(), 2);
    }
}
