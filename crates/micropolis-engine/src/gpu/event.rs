use std::borrow::Cow;
use std::fmt;
use std::ops::BitOr;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use crate::error::{ReyesError, Result};

/// Completion handle for one queue submission or one host-side condition.
///
/// Cloning shares the handle. Device events complete when the submission they
/// name has finished executing; user events complete when `set_complete` is
/// called from any thread.
#[derive(Clone)]
pub struct Event {
    inner: Arc<Inner>,
}

struct Inner {
    label: Cow<'static, str>,
    done: Mutex<bool>,
    cond: Condvar,
    source: Source,
}

enum Source {
    Host,
    Device {
        device: wgpu::Device,
        index: wgpu::SubmissionIndex,
    },
}

impl Event {
    /// An event that is already complete.
    pub fn complete() -> Self {
        Self::with_source("complete", Source::Host, true)
    }

    /// Host-signalled event, initially pending.
    pub fn user(label: impl Into<Cow<'static, str>>) -> Self {
        Self::with_source(label, Source::Host, false)
    }

    /// Completes once the submission `index` has finished on the device.
    pub(crate) fn submitted(
        label: impl Into<Cow<'static, str>>,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        index: wgpu::SubmissionIndex,
    ) -> Self {
        let event = Self::with_source(
            label,
            Source::Device {
                device: device.clone(),
                index,
            },
            false,
        );

        // Covers everything submitted so far, which includes `index`.
        let signal = event.inner.clone();
        queue.on_submitted_work_done(move || signal.signal());
        event
    }

    fn with_source(label: impl Into<Cow<'static, str>>, source: Source, done: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                label: label.into(),
                done: Mutex::new(done),
                cond: Condvar::new(),
                source,
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn is_user(&self) -> bool {
        matches!(self.inner.source, Source::Host)
    }

    /// Non-blocking completion check. Drives device callbacks once.
    pub fn is_complete(&self) -> bool {
        if *self.inner.lock() {
            return true;
        }
        if let Source::Device { device, .. } = &self.inner.source {
            // Poll errors resurface through `wait`.
            let _ = device.poll(wgpu::PollType::Poll);
        }
        *self.inner.lock()
    }

    /// Marks a user event complete and wakes every waiter.
    pub fn set_complete(&self) {
        self.inner.signal();
    }

    /// Blocks the calling thread until the event completes.
    pub fn wait(&self) -> Result<()> {
        match &self.inner.source {
            Source::Host => {
                let mut done = self.inner.lock();
                while !*done {
                    done = self
                        .inner
                        .cond
                        .wait(done)
                        .unwrap_or_else(|e| e.into_inner());
                }
                Ok(())
            }
            Source::Device { device, index } => {
                if *self.inner.lock() {
                    return Ok(());
                }
                device
                    .poll(wgpu::PollType::Wait {
                        submission_index: Some(index.clone()),
                        timeout: None,
                    })
                    .map_err(|e| ReyesError::Poll(format!("{}: {e}", self.label())))?;
                self.inner.signal();
                Ok(())
            }
        }
    }

    pub fn ptr_eq(&self, other: &Event) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, bool> {
        self.done.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn signal(&self) {
        let mut done = self.lock();
        if !*done {
            *done = true;
            self.cond.notify_all();
        }
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("label", &self.label())
            .field("user", &self.is_user())
            .field("done", &*self.inner.lock())
            .finish()
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::complete()
    }
}

/// Events a submission depends on.
#[derive(Clone, Debug, Default)]
pub struct WaitList {
    events: Vec<Event>,
}

impl WaitList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: &Event) {
        if !self.events.iter().any(|e| e.ptr_eq(event)) {
            self.events.push(event.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    pub fn wait_all(&self) -> Result<()> {
        for event in &self.events {
            event.wait()?;
        }
        Ok(())
    }

    /// Waits on host-signalled events only.
    ///
    /// Device events need no host wait before a later submission: the queue
    /// executes submissions in order.
    pub(crate) fn wait_user_events(&self) -> Result<()> {
        for event in self.events.iter().filter(|e| e.is_user()) {
            event.wait()?;
        }
        Ok(())
    }
}

impl From<&Event> for WaitList {
    fn from(event: &Event) -> Self {
        Self {
            events: vec![event.clone()],
        }
    }
}

impl<'a> FromIterator<&'a Event> for WaitList {
    fn from_iter<I: IntoIterator<Item = &'a Event>>(iter: I) -> Self {
        let mut list = WaitList::new();
        for event in iter {
            list.push(event);
        }
        list
    }
}

impl BitOr<&Event> for &Event {
    type Output = WaitList;

    fn bitor(self, rhs: &Event) -> WaitList {
        let mut list = WaitList::from(self);
        list.push(rhs);
        list
    }
}

impl BitOr<&Event> for WaitList {
    type Output = WaitList;

    fn bitor(mut self, rhs: &Event) -> WaitList {
        self.push(rhs);
        self
    }
}
