pub mod delegate;
pub mod grid;
pub mod models;
pub mod poller;
pub mod reconcile;
pub mod store;
pub mod studio;

pub use delegate::{Delegate, DelegationEvent, Instruction, LocalDelegate, Route};
pub use models::{default_model_registry, ImageModel, ImageModelRegistry};
pub use reconcile::Reconciler;
pub use store::ArtifactStore;
pub use studio::Studio;
