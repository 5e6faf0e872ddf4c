pub mod acl;
pub mod auth;
pub mod error;
pub mod model;
pub mod store;
pub mod versions;
