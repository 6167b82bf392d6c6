pub mod guard;

pub use guard::{GuardTransition, Redirect, RouteGuard, RouteState, Surface};
