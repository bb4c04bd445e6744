pub mod hashing;
pub mod hmac_verify;
pub mod multipass;

pub use hashing::PasswordHasher;
pub use hmac_verify::{verify_body_hmac, verify_query_hmac, HmacVerifyError};
pub use multipass::{MintInput, MultipassError, MultipassMinter};
