//! Kernel Object Bodies
//!
//! Discriminated variants behind a handle. Waitable variants expose their
//! dispatcher so the wait machinery can treat them uniformly.

use crate::cm::KeyObject;
use crate::io::{FileObject, FindObject};
use crate::ke::dispatcher::Dispatcher;
use crate::ke::event::EventObject;
use crate::ke::mutex::MutexObject;
use crate::ke::semaphore::SemaphoreObject;
use crate::ke::thread::ThreadObject;
use crate::mm::SectionObject;
use crate::net::SocketObject;

/// The object behind a handle.
pub enum ObjectBody {
    File(FileObject),
    Find(FindObject),
    Event(EventObject),
    Mutex(MutexObject),
    Semaphore(SemaphoreObject),
    Thread(ThreadObject),
    Socket(SocketObject),
    Key(KeyObject),
    Section(SectionObject),
}

impl ObjectBody {
    /// Short type name for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            ObjectBody::File(_) => "File",
            ObjectBody::Find(_) => "Find",
            ObjectBody::Event(_) => "Event",
            ObjectBody::Mutex(_) => "Mutex",
            ObjectBody::Semaphore(_) => "Semaphore",
            ObjectBody::Thread(_) => "Thread",
            ObjectBody::Socket(_) => "Socket",
            ObjectBody::Key(_) => "Key",
            ObjectBody::Section(_) => "Section",
        }
    }
}

/// A handle-table entry: the object body, uniformly reference counted by
/// the `Arc` the table and every in-flight call hold.
pub struct KernelObject {
    pub body: ObjectBody,
}

impl KernelObject {
    pub fn new(body: ObjectBody) -> Self {
        Self { body }
    }

    /// The dispatcher for waitable objects, `None` for the rest.
    pub fn dispatcher(&self) -> Option<&Dispatcher> {
        match &self.body {
            ObjectBody::Event(e) => Some(&e.dispatcher),
            ObjectBody::Mutex(m) => Some(&m.dispatcher),
            ObjectBody::Semaphore(s) => Some(&s.dispatcher),
            ObjectBody::Thread(t) => Some(&t.dispatcher),
            _ => None,
        }
    }
}
