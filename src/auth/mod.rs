//! Authentication and authorization for Reunite
//!
//! Provides:
//! - JWT token validation (the identity provider is an opaque oracle)
//! - Role parsing and the unified case-action authorization check

pub mod jwt;
pub mod roles;

pub use jwt::{
    extract_token_from_header, extract_token_from_query, Actor, Claims, JwtValidator,
    TokenValidationResult,
};
pub use roles::{can_perform, CaseAction, Role};
