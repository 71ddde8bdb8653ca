pub mod cooldown;
pub mod partner;
pub mod position;
pub mod record;
pub mod validate;

pub use record::{
    ApplicationRecord, ApplicationStatus, MessageId, PartnerRecord, PartnerStatus, UserId,
};
pub use validate::ValidationError;
