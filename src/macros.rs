// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//
// Lifecycle logging macros
//
// Connection, topology and consumer registration events go through these so
// `Config::disable_logging` can silence them. Per-message failures always log.
//

macro_rules! lifecycle_info {
    ($cfg:expr, $($arg:tt)*) => {
        if !$cfg.disable_logging {
            tracing::info!($($arg)*)
        }
    };
}

macro_rules! lifecycle_warn {
    ($cfg:expr, $($arg:tt)*) => {
        if !$cfg.disable_logging {
            tracing::warn!($($arg)*)
        }
    };
}

pub(crate) use lifecycle_info;
pub(crate) use lifecycle_warn;
