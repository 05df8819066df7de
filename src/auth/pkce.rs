//! PKCE verifier/challenge pairs and opaque request tokens.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
use sha2::{Digest, Sha256};
// self
use crate::{_prelude::*, auth::TokenSecret};

/// Random bytes drawn for every opaque token and verifier (256 bits).
pub const OPAQUE_TOKEN_BYTES: usize = 32;

/// Supported PKCE challenge methods. `plain` is intentionally absent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PkceMethod {
	/// SHA-256 based PKCE (RFC 7636 S256).
	S256,
}
impl PkceMethod {
	/// Returns the RFC 7636 identifier for the challenge method.
	pub const fn as_str(self) -> &'static str {
		match self {
			PkceMethod::S256 => "S256",
		}
	}
}
impl Display for PkceMethod {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// PKCE verifier with its derived challenge.
#[derive(Clone, Debug)]
pub struct PkcePair {
	/// Secret verifier sent with the code exchange.
	pub verifier: TokenSecret,
	/// Challenge placed on the authorize URL.
	pub challenge: String,
	/// Challenge method (always [`PkceMethod::S256`]).
	pub method: PkceMethod,
}
impl PkcePair {
	/// Generates a fresh verifier from a CSPRNG and derives its S256 challenge.
	pub fn generate() -> Self {
		let verifier = new_opaque_token();
		let challenge = challenge_for(&verifier);

		Self { verifier: TokenSecret::new(verifier), challenge, method: PkceMethod::S256 }
	}
}

/// Returns a URL-safe token carrying [`OPAQUE_TOKEN_BYTES`] of CSPRNG output (43 characters).
pub fn new_opaque_token() -> String {
	let mut bytes = [0_u8; OPAQUE_TOKEN_BYTES];

	rand::rng().fill(&mut bytes);

	URL_SAFE_NO_PAD.encode(bytes)
}

/// Computes the S256 challenge for a verifier.
pub fn challenge_for(verifier: &str) -> String {
	URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}
