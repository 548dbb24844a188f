pub mod entity;
pub mod event;
pub mod job;
pub mod verification;
