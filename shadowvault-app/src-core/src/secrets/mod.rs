//! Secrets: the remote collection and the list view kept in sync with it.

pub mod controller;
pub mod model;
pub mod repository;

pub use controller::{ListSnapshot, ListViewController, Mutated, SyncStatus};
pub use model::{sort_newest_first, NewSecret, Secret, SecretId};
pub use repository::SecretsRepository;
