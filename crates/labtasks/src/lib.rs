//! Standard task library
//!
//! Built-in tasks for moving data around, debugging protocols and the small
//! robot simulation used to exercise nesting and optional inputs.

mod data;
mod debug;
mod robot;
mod time;
mod transform;

pub use data::{MoveTask, SinkTask, SourceTask};
pub use debug::{DebugTask, FailTask};
pub use robot::{
    types as robot_types, Robot, RobotCreateTask, RobotEatTask, RobotFlyTask, RobotMoveTask,
    RobotSugarCreateTask, RobotWaitTask,
};
pub use time::DelayTask;
pub use transform::{JsonParseTask, JsonStringifyTask};
use labruntime::TaskRegistry;

use std::sync::Arc;

/// Register all standard tasks with a registry
pub fn register_all(registry: &mut TaskRegistry) {
    registry.register(Arc::new(data::SourceTaskFactory));
    registry.register(Arc::new(data::MoveTaskFactory));
    registry.register(Arc::new(data::SinkTaskFactory));
    registry.register(Arc::new(debug::DebugTaskFactory));
    registry.register(Arc::new(debug::FailTaskFactory));
    registry.register(Arc::new(time::DelayTaskFactory));
    registry.register(Arc::new(transform::JsonParseTaskFactory));
    registry.register(Arc::new(transform::JsonStringifyTaskFactory));
    registry.register(Arc::new(robot::RobotCreateTaskFactory));
    registry.register(Arc::new(robot::RobotMoveTaskFactory));
    registry.register(Arc::new(robot::RobotEatTaskFactory));
    registry.register(Arc::new(robot::RobotWaitTaskFactory));
    registry.register(Arc::new(robot::RobotFlyTaskFactory));
    registry.register(Arc::new(robot::RobotSugarCreateTaskFactory));
}

/// Registry preloaded with every standard task
pub fn standard_registry() -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    register_all(&mut registry);
    registry
}
