// Tracing macros for skiff-testkit
//
// These macros forward to the tracing crate.

#![allow(unused_macro_rules)]

macro_rules! trace {
    ($($arg:tt)*) => { ::tracing::trace!($($arg)*) }
}

macro_rules! debug {
    ($($arg:tt)*) => { ::tracing::debug!($($arg)*) }
}

#[allow(unused_macros)]
macro_rules! warn {
    ($($arg:tt)*) => { ::tracing::warn!($($arg)*) }
}

// Macros are made available via #[macro_use] on the module in lib.rs
