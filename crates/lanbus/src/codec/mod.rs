//! # Wire Codec
//!
//! The wire envelope, innermost to outermost:
//!
//! ```text
//! [ @<pid>: ]? [ nonce || ciphertext  |  plaintext of encode(event, args) ]
//! ```
//!
//! - [`payload`] serializes the ordered `(event, args)` list into a single
//!   self-describing binary frame and back.
//! - [`cipher`] optionally wraps that frame in symmetric encryption; a
//!   pass-through when no secret is configured.
//! - [`origin`] prepends the plaintext origin tag used for self-exclusion
//!   in foreign-only mode. The tag sits *outside* the encryption boundary
//!   so receivers can filter before paying for a decrypt.

pub mod cipher;
pub mod origin;
pub mod payload;

pub use cipher::CipherKind;
pub use payload::EventValue;
