//! Winhost Library
//!
//! An in-process reimplementation of a Win32 / COM / D3D ABI subset, plus
//! the PE image loader that binds a guest executable to it. The guest runs
//! as ordinary host code: the loader maps the image, resolves its import
//! table against the export resolver, and transfers control in the
//! Microsoft x64 calling convention.
//!
//! # Architecture Overview
//!
//! The library follows the NT subsystem layout:
//!
//! - **ldr** - Image loader: PE parsing, mapping, relocation, import binding
//! - **ob** - Object manager: the process-wide handle table
//! - **ke** - Kernel primitives: dispatcher objects, threads, TLS, time
//! - **io** - File I/O and directory enumeration
//! - **mm** - Virtual memory over host mappings
//! - **cm** - Configuration manager: registry persisted to a directory tree
//! - **net** - Winsock bridge onto host BSD sockets
//! - **win32k** - USER (windows, message queues) and GDI (raster drawing)
//! - **com** - COM runtime: apartments, class factories, IUnknown contract
//! - **d3d** - Direct3D device with a software rasterizer
//! - **gpu** - Optional hardware backend reached through the host driver
//! - **exports** - Maps (DLL, symbol) to the host functions consumed by ldr
//!
//! # Initialization
//!
//! [`init`] performs the one-shot startup: subsystems register their
//! exported symbols, the registry store locates its backing directory, and
//! the export table is frozen. After that the ABI surface is read-only
//! apart from the objects the guest creates through it.

// ABI surface conventions:
// - exported entry points keep their Windows spellings (CreateFileA, ...)
// - guest-facing structures keep the Windows field casing where it is part
//   of the documented layout
#![allow(non_snake_case)]
// Function-pointer types for the export table and COM vtables are
// necessarily complex.
#![allow(clippy::type_complexity)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::missing_safety_doc)]

pub mod abi;
pub mod cm;
pub mod com;
pub mod d3d;
pub mod exports;
#[cfg(feature = "gpu")]
pub mod gpu;
pub mod io;
pub mod ke;
pub mod ldr;
pub mod mm;
pub mod net;
pub mod ob;
pub mod status;
pub mod win32k;

/// One-shot host initialization.
///
/// Builds the export table, initializes the registry store from the
/// environment and primes the per-process subsystem state. Safe to call
/// more than once; only the first call does work.
pub fn init() {
    exports::table();
    cm::init_from_env();
    net::init_socket_activation();
    // Every DLL is linked into the host; the override search directory
    // only participates in lookup diagnostics.
    if let Ok(dir) = std::env::var("WINHOST_DLL_PATH") {
        log::info!("[HOST] DLL search override {dir:?} (all DLLs are in-process)");
    }
    log::debug!("[HOST] subsystems initialized");
}
