//! fOS JavaScript Engine - Heap and Collection Control
//!
//! Accounts for what the script heap holds and serves memory relief's
//! collection requests.
//!
//! # Key Features
//!
//! 1. **Blocking collection**: `collect_now` always runs a full pass, even
//!    right after another one.
//!
//! 2. **Coalesced collection**: scheduled requests fold into a pending or
//!    recent pass instead of stacking up.
//!
//! 3. **Compiled code jettison**: compiled code is dropped under critical
//!    pressure, except while a collection is running.
//!
//! 4. **Time-of-death figures**: heap size, extra and external memory,
//!    global objects and a live object histogram.

mod gc;
mod heap;

pub use gc::{GcController, GcPolicy, GcReason, GcStats};
pub use heap::{HeapError, HeapLimits, JsHeap};
