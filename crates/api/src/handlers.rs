pub mod audit;
pub mod auth;
pub mod catalog;
pub mod health;
pub mod identities;
pub mod mfa;
pub mod module_access;
pub mod providers;
pub mod roles;
pub mod tenant;
