pub mod board;
pub mod capture;
pub mod config;
pub mod database;
pub mod facets;
pub mod filters;
pub mod model;
pub mod mutation;
pub mod parser;
pub mod permissions;
pub mod realtime;
pub mod recurrence;
pub mod reorder;
pub mod services;
pub mod store;
pub mod telemetry;
pub mod trash;

pub use board::{Settlement, TaskBoard, ViewSnapshot};
pub use capture::CaptureInput;
pub use config::AppConfig;
pub use database::Database;
pub use facets::{compute_filter_options, FacetOption, FilterOptions, Scope};
pub use filters::{filter_tasks, AssigneeFilter, DueBucket, Facet, SortOption, TaskFilters};
pub use model::*;
pub use mutation::{BulkAction, Mutation, MutationError, MutationKind, MutationState};
pub use permissions::{Actor, PermissionDenied, Role};
pub use services::TasksService;
pub use store::TaskStore;
