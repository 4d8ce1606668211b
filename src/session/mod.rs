mod datastore;
#[allow(clippy::module_inception)]
mod session;

pub use datastore::{Backend, Datastore};
pub use session::{Session, UnitOfWork};
