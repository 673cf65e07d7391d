//! Request and response DTOs.

pub mod request;
pub mod response;

pub use request::{CreateJobRequest, JobListQuery, WsQuery};
pub use response::{ApiResponse, HealthResponse};
