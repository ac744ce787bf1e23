pub mod advisory;
pub mod booking;
pub mod discount;
pub mod notification;
pub mod sessions;
