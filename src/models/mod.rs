pub mod event;
pub mod invoice;
pub mod payment;
pub mod plan;
pub mod subscription;
