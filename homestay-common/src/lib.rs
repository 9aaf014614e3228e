//! Homestay Common Types
//!
//! Shared types used by the auth gateway and the booking site client.

pub mod protocol;
pub mod role;
pub mod user;

pub use protocol::{
    AuthResponse, ErrorBody, ErrorDetail, GuardOutcome, GuardResponse, LoginRequest,
    PopupOutcome, RegisterRequest, SessionSnapshot, UpdateRoleRequest, UsersResponse,
};
pub use role::{Role, RoleRequirement, UnknownRole};
pub use user::{AppUser, Principal, RoleRecord};
