/// Router Module Index
///
/// Routing is split by who may reach a route. The gated portal pages rely on the global
/// gate middleware (see `gate::gate_middleware`); API routes outside the gated prefixes
/// enforce their own checks through the `AuthUser` extractor.

/// Routes reachable by anyone: health, sign-in pages, the auth callback, whoami.
pub mod public;

/// Portal pages under `/dashboard`, `/mentor` and `/admin`, guarded by the route rules.
pub mod portal;

/// JSON API restricted to the admin role.
pub mod admin;
