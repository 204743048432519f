pub mod catalog;
pub mod coordinator;
pub mod dispatcher;
pub mod request;
mod resources;

pub use catalog::CatalogManager;
pub use coordinator::Coordinator;
pub use dispatcher::{Dispatcher, Reservation};
pub use request::{ClusterPatch, ClusterRequest};
pub use resources::{FlavorPatch, ImagePatch, ProjectPatch};
