//! HTTP bridge for the cloud edge collaborator

pub mod admin_handlers;
pub mod dto;
pub mod health_handlers;
pub mod outstation_handlers;
