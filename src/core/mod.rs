pub mod cache;
pub mod config;
pub mod invitations;
pub mod maintenance;
pub mod permissions;
pub mod rate_limit;
pub mod realtime;
pub mod shared;
