// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Built-in Middlewares
//!
//! Handlers meant to be registered with `App::use_middlewares`.

use crate::context::MessageContext;
use std::sync::Arc;

mod limiter;
mod logger;
mod recover;

pub use limiter::Limiter;
pub use logger::Logger;
pub use recover::{PanicHook, Recover};

/// Returns true when a middleware should step aside for the message.
pub type Skip = Arc<dyn Fn(&MessageContext) -> bool + Send + Sync>;
