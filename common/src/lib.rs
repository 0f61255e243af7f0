pub mod cache;
pub mod error;
pub mod model;
pub mod protocol;

pub use cache::{Cache, CacheUpdate, GroupPatch, MutationId};
pub use error::Error;
pub use model::{GroupData, GroupId, GroupRef, Message, MessageId, UserData, UserId, UserRef};
