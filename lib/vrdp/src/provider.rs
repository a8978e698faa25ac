// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Providers allow the engine to run in different contexts by
//! letting the host plug in implementations of core services. Today
//! that is only logging: the fragment engine reports drops and init
//! failures through a [`LogProvider`], which maps to `println!` in
//! unit tests and to a `slog` drain in a std host.

use core::fmt;
use core::fmt::Display;

/// A logging provider provides the means to log messages to some
/// destination based on the context in which the engine is running.
///
/// Logging levels are provided by [`LogLevel`]. These levels will map
/// to the underlying provider with varying degrees of success.
pub trait LogProvider: Send + Sync {
    /// Log a message at the specified level.
    fn log(&self, level: LogLevel, msg: &str);
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogLevel {
    Note,
    Warn,
    Error,
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let level_s = match self {
            Self::Note => "[NOTE]",
            Self::Warn => "[WARN]",
            Self::Error => "[ERROR]",
        };
        write!(f, "{level_s}")
    }
}

/// Discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullLog;

impl LogProvider for NullLog {
    fn log(&self, _level: LogLevel, _msg: &str) {}
}

cfg_if! {
    if #[cfg(feature = "std")] {
        #[derive(Clone, Copy)]
        pub struct PrintlnLog;

        impl LogProvider for PrintlnLog {
            fn log(&self, level: LogLevel, msg: &str) {
                println!("{level} {msg}");
            }
        }

        /// A provider backed by a `slog` logger.
        pub struct SlogLog {
            log: slog::Logger,
        }

        impl SlogLog {
            pub fn new(log: slog::Logger) -> Self {
                Self { log }
            }

            /// Build a terminal logger behind an async drain, filtered
            /// by the `RUST_LOG` environment variable.
            pub fn term() -> Self {
                use slog::Drain;

                let decorator = slog_term::TermDecorator::new().build();
                let drain =
                    slog_term::FullFormat::new(decorator).build().fuse();
                let drain = slog_envlogger::new(drain);
                let drain = slog_async::Async::new(drain).build().fuse();
                let log =
                    slog::Logger::root(drain, slog::o!("component" => "vrdp"));
                Self { log }
            }

            pub fn logger(&self) -> &slog::Logger {
                &self.log
            }
        }

        impl LogProvider for SlogLog {
            fn log(&self, level: LogLevel, msg: &str) {
                match level {
                    LogLevel::Note => slog::info!(self.log, "{}", msg),
                    LogLevel::Warn => slog::warn!(self.log, "{}", msg),
                    LogLevel::Error => slog::error!(self.log, "{}", msg),
                }
            }
        }
    }
}
