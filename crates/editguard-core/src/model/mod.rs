pub mod batch;
pub mod change;
pub mod metadata;
pub mod session;
pub mod state;
pub mod submission;

pub use batch::Batch;
pub use change::{text_counts, Change, ChangeStatus};
pub use metadata::Metadata;
pub use session::{Session, SessionFields, SessionStatus};
pub use state::DocumentState;
pub use submission::{ChangeSubmission, ProcessingContext, ProposedEdit};
