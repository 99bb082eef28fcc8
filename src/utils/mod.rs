pub mod json;
pub mod response;
