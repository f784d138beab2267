//! Per-tenant model lifecycle: registry, training recipes, orchestration and
//! the tenant session pool.

pub mod orchestrator;
pub mod recipes;
pub mod registry;
pub mod session;

pub use orchestrator::{ModelLifecycle, ModelState, SweepReport, UpdateOutcome};
pub use recipes::{PreparedTraining, TrainingRecipe, price_features, recipe_for, risk_features};
pub use registry::{ModelRegistry, RegisteredModel, TrainingGuard};
pub use session::SessionPool;
