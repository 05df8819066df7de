//! Auth-domain identifiers, scope sets, PKCE material, and token models.

pub mod id;
pub mod pkce;
pub mod scope;
pub mod token;

pub use id::*;
pub use pkce::*;
pub use scope::*;
pub use token::{health::*, record::*, secret::*};
