pub mod codec;
pub mod endpoint;
pub mod error;
pub mod id;
pub mod object;
pub mod outcome;
pub mod plan;
pub mod refs;

pub use endpoint::{AuthContext, Backend, RepositoryEndpoint};
pub use error::CoreError;
pub use id::{content_hash, ObjectId};
pub use object::{Object, ObjectInfo, ObjectKind};
pub use outcome::{FailureReason, JobResult, Outcome, SkipReason, TransferStats};
pub use plan::{RefUpdate, RefUpdateKind, RefUpdatePlan, SkippedRef};
pub use refs::{RefKind, RefSnapshot, RefTarget};
