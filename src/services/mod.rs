pub mod catalog;
pub mod collaborators;
pub mod invoice;
pub mod lifecycle;
pub mod retry;
pub mod store;
