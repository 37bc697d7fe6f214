//! Storage identifier generation.

use base64::{Engine as _, engine::general_purpose};
use uuid::Uuid;

/// Length of an encoded identifier: 16 bytes in unpadded base64.
pub const IDENTIFIER_LEN: usize = 22;

/// Generate an opaque, filesystem-safe storage identifier.
///
/// The 16 bytes of a random v4 UUID, encoded as URL-safe base64 (`-` and `_`
/// instead of `+` and `/`) with the `=` padding stripped.
pub fn generate_identifier() -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(Uuid::new_v4().as_bytes())
}
