//! Lifecycle handlers
//!
//! Each handler is invoked independently, shares nothing with the others but
//! the control store, and ends every invocation in an [`Outcome`].
//!
//! [`Outcome`]: crate::outcome::Outcome

pub mod events;
pub mod feed;
pub mod promoter;
pub mod stage_marker;
pub mod submitter;
pub mod validator;

pub use events::{
    ChangeBatch, ChangeKeys, ChangeType, ControlChangeEvent, ControlImage, StepEvent,
    SubmitRequest,
};
pub use feed::{spawn_promoter_worker, ChangeFeed, FeedClosed};
pub use promoter::StagePromoter;
pub use stage_marker::StageMarker;
pub use submitter::{
    build_step_args, JobSubmitter, SubmitSummary, SubmitterSettings, SETUP_STEP_NAME,
};
pub use validator::JobValidator;
