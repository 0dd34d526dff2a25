pub mod detect;
pub mod error;
pub mod gate;
pub mod types;

pub use detect::detect;
pub use error::ApprovalError;
pub use gate::ApprovalGate;
pub use types::{Detection, PendingApproval, Resolution};
