pub mod cursor;
pub mod registry;

pub use cursor::{ActiveIdentityCursor, CursorState};
pub use registry::{IdentityDocument, IdentityEntry, IdentityRegistry};
