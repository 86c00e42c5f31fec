//! Known execution threads and the focus thread

use crate::common::{Error, Result};

/// An execution thread as last reported by the adapter
#[derive(Debug, Clone, PartialEq)]
pub struct Thread {
    id: i64,
    name: String,
    running: bool,
    selected_stack_frame: Option<usize>,
}

impl Thread {
    /// New threads are assumed to be running
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            running: true,
            selected_stack_frame: None,
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_stopped(&self) -> bool {
        !self.running
    }

    /// Index into the most recent stack trace
    pub fn selected_stack_frame(&self) -> Option<usize> {
        self.selected_stack_frame
    }

    pub fn set_selected_stack_frame(&mut self, index: usize) {
        self.selected_stack_frame = Some(index);
    }

    pub fn clear_selected_stack_frame(&mut self) {
        self.selected_stack_frame = None;
    }
}

/// Threads in the order they became known, plus the focus thread
#[derive(Debug, Default)]
pub struct ThreadRegistry {
    threads: Vec<Thread>,
    focus_thread_id: Option<i64>,
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a thread, replacing any existing entry with the same id
    pub fn add_thread(&mut self, thread: Thread) {
        match self.threads.iter_mut().find(|t| t.id == thread.id) {
            Some(existing) => *existing = thread,
            None => self.threads.push(thread),
        }
    }

    pub fn remove_thread(&mut self, id: i64) {
        self.threads.retain(|t| t.id != id);
        if self.focus_thread_id == Some(id) {
            self.focus_thread_id = None;
        }
    }

    /// Replace the whole list; nothing from the old list survives
    pub fn update_threads(&mut self, threads: Vec<Thread>) {
        self.threads = threads;
        if let Some(focus) = self.focus_thread_id {
            if !self.threads.iter().any(|t| t.id == focus) {
                self.focus_thread_id = None;
            }
        }
    }

    pub fn all_threads(&self) -> &[Thread] {
        &self.threads
    }

    pub fn get_thread_by_id(&self, id: i64) -> Result<&Thread> {
        self.threads
            .iter()
            .find(|t| t.id == id)
            .ok_or(Error::ThreadNotFound(id))
    }

    pub fn get_thread_by_id_mut(&mut self, id: i64) -> Result<&mut Thread> {
        self.threads
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(Error::ThreadNotFound(id))
    }

    pub fn mark_thread_running(&mut self, id: i64) -> Result<()> {
        self.get_thread_by_id_mut(id)?.running = true;
        Ok(())
    }

    pub fn mark_thread_stopped(&mut self, id: i64) -> Result<()> {
        self.get_thread_by_id_mut(id)?.running = false;
        Ok(())
    }

    pub fn mark_all_threads_running(&mut self) {
        self.threads.iter_mut().for_each(|t| t.running = true);
    }

    pub fn mark_all_threads_stopped(&mut self) {
        self.threads.iter_mut().for_each(|t| t.running = false);
    }

    /// Vacuously true when no threads are known
    pub fn all_threads_running(&self) -> bool {
        self.threads.iter().all(|t| t.running)
    }

    pub fn all_threads_stopped(&self) -> bool {
        self.threads.iter().all(|t| !t.running)
    }

    pub fn first_stopped_thread(&self) -> Option<i64> {
        self.threads.iter().find(|t| !t.running).map(|t| t.id)
    }

    pub fn set_focus_thread(&mut self, id: i64) -> Result<()> {
        self.get_thread_by_id(id)?;
        self.focus_thread_id = Some(id);
        Ok(())
    }

    pub fn focus_thread_id(&self) -> Option<i64> {
        self.focus_thread_id
    }

    pub fn focus_thread(&self) -> Option<&Thread> {
        self.focus_thread_id
            .and_then(|id| self.threads.iter().find(|t| t.id == id))
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(ids: &[i64]) -> ThreadRegistry {
        let mut reg = ThreadRegistry::new();
        for &id in ids {
            reg.add_thread(Thread::new(id, format!("thread {}", id)));
        }
        reg
    }

    #[test]
    fn test_empty_registry_is_all_running() {
        let reg = ThreadRegistry::new();
        assert!(reg.all_threads_running());
        assert!(reg.first_stopped_thread().is_none());
    }

    #[test]
    fn test_single_stop_breaks_all_running() {
        let mut reg = registry(&[1, 2]);
        reg.mark_all_threads_running();
        assert!(reg.all_threads_running());

        reg.mark_thread_stopped(2).unwrap();
        assert!(!reg.all_threads_running());
        assert!(!reg.all_threads_stopped());
        assert_eq!(reg.first_stopped_thread(), Some(2));

        reg.mark_all_threads_stopped();
        assert!(reg.all_threads_stopped());
    }

    #[test]
    fn test_add_thread_replaces_same_id_in_place() {
        let mut reg = registry(&[4, 5]);
        reg.add_thread(Thread::new(4, "worker"));
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.all_threads()[0].name(), "worker");
    }

    #[test]
    fn test_update_threads_discards_previous_state() {
        let mut reg = registry(&[1]);
        reg.mark_thread_stopped(1).unwrap();
        reg.get_thread_by_id_mut(1).unwrap().set_selected_stack_frame(2);
        reg.set_focus_thread(1).unwrap();

        reg.update_threads(vec![Thread::new(1, "main"), Thread::new(9, "io")]);
        let t = reg.get_thread_by_id(1).unwrap();
        assert!(t.is_running());
        assert_eq!(t.selected_stack_frame(), None);
        assert_eq!(reg.focus_thread_id(), Some(1));
    }

    #[test]
    fn test_removing_focus_thread_clears_focus() {
        let mut reg = registry(&[1, 2]);
        reg.set_focus_thread(2).unwrap();
        reg.remove_thread(2);
        assert!(reg.focus_thread().is_none());
        assert!(matches!(reg.get_thread_by_id(2), Err(Error::ThreadNotFound(2))));
    }

    #[test]
    fn test_focus_on_unknown_thread_fails() {
        let mut reg = registry(&[1]);
        assert!(reg.set_focus_thread(3).is_err());
        assert_eq!(reg.focus_thread_id(), None);
    }
}
