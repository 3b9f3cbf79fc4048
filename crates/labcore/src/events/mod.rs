mod bus;
mod event;

pub use bus::{EventBus, EventEmitter};
pub use event::{ExecutionEvent, ProcessEvent};
