//! GPU compute plumbing: device context, completion events, command queue,
//! WGSL programs and a device-side prefix sum.

mod context;
mod event;
mod prefix_sum;
mod program;
mod queue;

pub use context::GpuContext;
pub use event::{Event, WaitList};
pub use prefix_sum::{PrefixSum, SCAN_BLOCK};
pub use program::{BuiltProgram, Constant, Kernel, Program};
pub use queue::{CommandQueue, WorkSize};
