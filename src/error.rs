use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Cyclic task graph: {0}")]
    CyclicGraph(String),

    #[error("Task {task} depends on unknown task {dependency}")]
    UnknownDependency { task: String, dependency: String },

    #[error("Duplicate task id: {0}")]
    DuplicateTask(String),

    #[error("Plan rejected: {0}")]
    PlanRejected(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Invalid status transition for task {task}: {from} -> {to}")]
    InvalidTransition {
        task: String,
        from: String,
        to: String,
    },

    #[error("Invalid capability identifier: {0:?}")]
    InvalidCapability(String),

    #[error("Invalid worker descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Worker not found: {0}")]
    WorkerNotFound(String),

    #[error("Planner error: {0}")]
    Planner(String),
}

pub type Result<T> = std::result::Result<T, Error>;
