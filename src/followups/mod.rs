pub mod handlers;
pub mod nps;
pub mod service;

pub use handlers::configure;
pub use nps::{send_after_appointment, NpsOutcome, NpsRequest};
pub use service::{
    apply_delivery, DeliveryReport, FollowupService, FollowupStatus, FollowupView,
    ScheduleFollowupInput,
};
