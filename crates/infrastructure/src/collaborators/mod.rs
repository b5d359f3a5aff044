pub mod http;

pub use http::HttpCollaborators;
