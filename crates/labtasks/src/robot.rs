//! Robot simulation tasks.
//!
//! A robot is a small JSON document (`age`, `position`, `weight`) carried in a
//! `Robot` resource. Tasks never mutate an incoming robot; they derive a new
//! resource from it.

use async_trait::async_trait;
use labcore::{
    ParamSpec, ParamType, ProgressTracker, Resource, Task, TaskContext, TaskError,
    TaskOutput, TaskSpec, Value,
};
use labruntime::{TaskFactory, TaskMetadata};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

pub const DIRECTIONS: [&str; 4] = ["north", "south", "east", "west"];

#[allow(clippy::approx_constant)]
const DEFAULT_FOOD_WEIGHT: f64 = 3.14;

/// Resource types of the robot simulation
pub mod types {
    use labcore::ResourceType;

    pub fn robot() -> ResourceType {
        ResourceType::new("Robot")
    }

    pub fn food() -> ResourceType {
        ResourceType::new("RobotFood")
    }

    /// Food with a large multiplicator; accepted wherever food is
    pub fn sugar() -> ResourceType {
        ResourceType::derive(&food(), "RobotSugar")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Robot {
    pub age: u32,
    pub position: [f64; 2],
    pub weight: f64,
}

impl Default for Robot {
    fn default() -> Self {
        Self {
            age: 9,
            position: [0.0, 0.0],
            weight: 70.0,
        }
    }
}

impl Robot {
    pub fn from_resource(resource: &Resource) -> Result<Self, TaskError> {
        serde_json::from_value(resource.value.to_json()).map_err(|e| {
            TaskError::InvalidInputType {
                field: "robot".to_string(),
                expected: "robot document".to_string(),
                actual: e.to_string(),
            }
        })
    }

    pub fn to_resource(&self) -> Result<Resource, TaskError> {
        let json = serde_json::to_value(self)
            .map_err(|e| TaskError::ExecutionFailed(format!("Cannot encode robot: {}", e)))?;
        Ok(Resource::new(types::robot(), Value::Json(json)))
    }

    pub fn moved(&self, direction: &str, step: f64) -> Result<Self, TaskError> {
        let mut robot = self.clone();
        match direction {
            "north" => robot.position[1] += step,
            "south" => robot.position[1] -= step,
            "west" => robot.position[0] -= step,
            "east" => robot.position[0] += step,
            other => {
                return Err(TaskError::Configuration(format!(
                    "Unknown direction: {}",
                    other
                )))
            }
        }
        Ok(robot)
    }
}

fn food_multiplicator(food: &Resource) -> f64 {
    food.value
        .to_json()
        .get("multiplicator")
        .and_then(|m| m.as_f64())
        .unwrap_or(1.0)
}

fn direction_param(default: &str, description: &str) -> ParamSpec {
    ParamSpec::new("direction", ParamType::Text)
        .with_default(default)
        .with_allowed(DIRECTIONS)
        .with_description(description)
}

fn robot_io(spec: TaskSpec) -> TaskSpec {
    spec.input("robot", types::robot())
        .output("robot", types::robot())
}

/// Shared by move and fly
async fn move_robot(ctx: &TaskContext, default_step: f64, default_direction: &str) -> Result<TaskOutput, TaskError> {
    let robot = Robot::from_resource(ctx.require_input("robot")?)?;
    let step = ctx
        .get_config_or("moving_step", Value::from(default_step))
        .as_f64()
        .unwrap_or(default_step);
    let direction = ctx
        .get_config_or("direction", Value::from(default_direction))
        .as_str()
        .unwrap_or(default_direction)
        .to_string();

    let moved = robot.moved(&direction, step)?;
    for i in 1..=4 {
        if ctx.cancellation.is_cancelled() {
            return Err(TaskError::Cancelled);
        }
        ctx.progress
            .set_value(f64::from(i) * 25.0, &format!("Moving iteration {}", i));
    }

    Ok(TaskOutput::new().with_output("robot", moved.to_resource()?))
}

pub struct RobotCreateTask;

#[async_trait]
impl Task for RobotCreateTask {
    fn task_type(&self) -> &str {
        "robot.create"
    }

    fn spec(&self) -> TaskSpec {
        TaskSpec::new().output("robot", types::robot())
    }

    async fn execute(&self, ctx: TaskContext) -> Result<TaskOutput, TaskError> {
        ctx.events.info("Creating robot");
        Ok(TaskOutput::new().with_output("robot", Robot::default().to_resource()?))
    }
}

pub struct RobotCreateTaskFactory;

impl TaskFactory for RobotCreateTaskFactory {
    fn create(&self, _config: &HashMap<String, Value>) -> Result<Box<dyn Task>, TaskError> {
        Ok(Box::new(RobotCreateTask))
    }

    fn task_type(&self) -> &str {
        "robot.create"
    }

    fn metadata(&self) -> TaskMetadata {
        TaskMetadata {
            description: "Create a robot".to_string(),
            category: "robot".to_string(),
        }
    }
}

/// A short moving step in one direction
pub struct RobotMoveTask;

#[async_trait]
impl Task for RobotMoveTask {
    fn task_type(&self) -> &str {
        "robot.move"
    }

    fn spec(&self) -> TaskSpec {
        robot_io(TaskSpec::new())
            .param(
                ParamSpec::new("moving_step", ParamType::Float)
                    .with_default(0.1)
                    .with_description("The moving step of the robot"),
            )
            .param(direction_param("north", "The moving direction"))
    }

    async fn execute(&self, ctx: TaskContext) -> Result<TaskOutput, TaskError> {
        move_robot(&ctx, 0.1, "north").await
    }
}

pub struct RobotMoveTaskFactory;

impl TaskFactory for RobotMoveTaskFactory {
    fn create(&self, _config: &HashMap<String, Value>) -> Result<Box<dyn Task>, TaskError> {
        Ok(Box::new(RobotMoveTask))
    }

    fn task_type(&self) -> &str {
        "robot.move"
    }

    fn metadata(&self) -> TaskMetadata {
        TaskMetadata {
            description: "Emulate a short moving step of the robot".to_string(),
            category: "robot".to_string(),
        }
    }
}

/// Long-distance move; only admins may run it
pub struct RobotFlyTask;

#[async_trait]
impl Task for RobotFlyTask {
    fn task_type(&self) -> &str {
        "robot.fly"
    }

    fn spec(&self) -> TaskSpec {
        robot_io(TaskSpec::new())
            .param(
                ParamSpec::new("moving_step", ParamType::Float)
                    .with_default(1000.0)
                    .with_description("Flight distance in km"),
            )
            .param(direction_param("west", "The flying direction"))
            .admin_only()
    }

    async fn execute(&self, ctx: TaskContext) -> Result<TaskOutput, TaskError> {
        move_robot(&ctx, 1000.0, "west").await
    }
}

pub struct RobotFlyTaskFactory;

impl TaskFactory for RobotFlyTaskFactory {
    fn create(&self, _config: &HashMap<String, Value>) -> Result<Box<dyn Task>, TaskError> {
        Ok(Box::new(RobotFlyTask))
    }

    fn task_type(&self) -> &str {
        "robot.fly"
    }

    fn metadata(&self) -> TaskMetadata {
        TaskMetadata {
            description: "Emulate the flight of the robot".to_string(),
            category: "robot".to_string(),
        }
    }
}

/// Meal before the flight. Food is optional and scales the weight gain.
pub struct RobotEatTask;

#[async_trait]
impl Task for RobotEatTask {
    fn task_type(&self) -> &str {
        "robot.eat"
    }

    fn spec(&self) -> TaskSpec {
        robot_io(TaskSpec::new())
            .optional_input("food", types::food())
            .param(ParamSpec::new("food_weight", ParamType::Float).with_default(DEFAULT_FOOD_WEIGHT))
    }

    async fn execute(&self, ctx: TaskContext) -> Result<TaskOutput, TaskError> {
        let mut robot = Robot::from_resource(ctx.require_input("robot")?)?;
        let food_weight = ctx
            .get_config_or("food_weight", Value::from(DEFAULT_FOOD_WEIGHT))
            .as_f64()
            .unwrap_or(DEFAULT_FOOD_WEIGHT);
        let multiplicator = ctx.input("food").map(|food| food_multiplicator(food)).unwrap_or(1.0);

        robot.weight += food_weight * multiplicator;
        ctx.events.info(format!("Robot now weighs {:.2}", robot.weight));

        Ok(TaskOutput::new().with_output("robot", robot.to_resource()?))
    }
}

pub struct RobotEatTaskFactory;

impl TaskFactory for RobotEatTaskFactory {
    fn create(&self, _config: &HashMap<String, Value>) -> Result<Box<dyn Task>, TaskError> {
        Ok(Box::new(RobotEatTask))
    }

    fn task_type(&self) -> &str {
        "robot.eat"
    }

    fn metadata(&self) -> TaskMetadata {
        TaskMetadata {
            description: "Emulate the meal of the robot before its flight".to_string(),
            category: "robot".to_string(),
        }
    }
}

/// Resting time before the flight
pub struct RobotWaitTask;

#[async_trait]
impl Task for RobotWaitTask {
    fn task_type(&self) -> &str {
        "robot.wait"
    }

    fn spec(&self) -> TaskSpec {
        robot_io(TaskSpec::new()).param(
            ParamSpec::new("waiting_time", ParamType::Float)
                .with_default(0.5)
                .with_range(0.0, 3600.0)
                .with_description("Seconds to wait"),
        )
    }

    async fn execute(&self, ctx: TaskContext) -> Result<TaskOutput, TaskError> {
        let robot = Arc::clone(ctx.require_input("robot")?);
        let waiting_time = ctx
            .get_config_or("waiting_time", Value::from(0.5))
            .as_f64()
            .unwrap_or(0.5)
            .max(0.0);

        tokio::select! {
            _ = ctx.cancellation.cancelled() => return Err(TaskError::Cancelled),
            _ = sleep(Duration::from_secs_f64(waiting_time)) => {}
        }

        Ok(TaskOutput::new().with_output("robot", robot))
    }
}

pub struct RobotWaitTaskFactory;

impl TaskFactory for RobotWaitTaskFactory {
    fn create(&self, _config: &HashMap<String, Value>) -> Result<Box<dyn Task>, TaskError> {
        Ok(Box::new(RobotWaitTask))
    }

    fn task_type(&self) -> &str {
        "robot.wait"
    }

    fn metadata(&self) -> TaskMetadata {
        TaskMetadata {
            description: "Emulate the resting time of the robot".to_string(),
            category: "robot".to_string(),
        }
    }
}

pub struct RobotSugarCreateTask;

#[async_trait]
impl Task for RobotSugarCreateTask {
    fn task_type(&self) -> &str {
        "robot.sugar_create"
    }

    fn spec(&self) -> TaskSpec {
        TaskSpec::new().output("sugar", types::food())
    }

    async fn execute(&self, _ctx: TaskContext) -> Result<TaskOutput, TaskError> {
        let sugar = Resource::new(
            types::sugar(),
            Value::Json(serde_json::json!({ "multiplicator": 10 })),
        );
        Ok(TaskOutput::new().with_output("sugar", sugar))
    }
}

pub struct RobotSugarCreateTaskFactory;

impl TaskFactory for RobotSugarCreateTaskFactory {
    fn create(&self, _config: &HashMap<String, Value>) -> Result<Box<dyn Task>, TaskError> {
        Ok(Box::new(RobotSugarCreateTask))
    }

    fn task_type(&self) -> &str {
        "robot.sugar_create"
    }

    fn metadata(&self) -> TaskMetadata {
        TaskMetadata {
            description: "Create a sugar type of food".to_string(),
            category: "robot".to_string(),
        }
    }
}
