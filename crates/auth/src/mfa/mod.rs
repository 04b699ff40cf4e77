pub mod codes;
pub mod service;
pub mod totp;

pub use service::{ChallengeOutcome, EnrollMfa, IssuedChallenge, MfaEnrollment, MfaService};
pub use totp::{generate_qr_code, generate_secret, generate_totp, generate_totp_uri, verify_totp};
