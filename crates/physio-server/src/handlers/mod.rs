pub(crate) mod auth;
pub(crate) mod dashboard;
pub(crate) mod entities;
pub(crate) mod reports;
