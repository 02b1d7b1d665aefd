pub mod approval;
pub mod level;
pub mod request;
