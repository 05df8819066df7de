//! Provider descriptors (data) and adapters (behavior).
//!
//! `descriptor` exposes validated metadata ([`ProviderDescriptor`]) covering HTTPS-only
//! endpoints, the PKCE policy, client authentication mode, and default scopes. `adapter` defines
//! [`ProviderAdapter`], the per-vendor capability the engine delegates identity lookups and data
//! fetches to. [`GarminAdapter`] and [`FitbitAdapter`] are the built-in implementations.

pub mod adapter;
pub mod descriptor;
pub mod fitbit;
pub mod garmin;

pub use adapter::*;
pub use descriptor::*;
pub use fitbit::{FITBIT, FitbitAdapter};
pub use garmin::{GARMIN, GarminAdapter};
