//! USER - Window Manager
//!
//! Window classes, windows, the per-thread message queue with its
//! retained dispatch loop, timers, focus, and the painting contract.
//!
//! - **class** - class registration (write-once registry)
//! - **window** - creation, destruction, z-order parentage, user data
//! - **message** - queues, retrieval, translation, dispatch
//! - **timer** - periodic WM_TIMER generation
//! - **paint** - invalid regions, BeginPaint/EndPaint

pub mod class;
pub mod message;
pub mod paint;
pub mod timer;
pub mod window;
