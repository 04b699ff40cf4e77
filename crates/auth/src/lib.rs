pub mod error;
pub mod identities;
pub mod jwt;
pub mod lockout;
pub mod mfa;
pub mod password;
pub mod providers;
pub mod revocation;
pub mod session;
pub mod settings;

pub use authcore_models::ErrorKind;
pub use error::{AuthError, ProviderError, Result};
pub use identities::IdentityService;
pub use jwt::{Claims, JwtService, TokenType};
pub use lockout::LockoutService;
pub use mfa::{ChallengeOutcome, EnrollMfa, IssuedChallenge, MfaEnrollment, MfaService};
pub use password::{validate_password, PasswordHasher};
pub use providers::{
    AssertionVerifier, AuthenticatedIdentity, Credentials, ExternalProfile, HttpOAuthExchange,
    IdentityProvider, LocalProvider, OAuthExchange, Providers, Provisioner, RejectingVerifier,
    SamlAssertion, StateSealer,
};
pub use revocation::TokenRevocation;
pub use session::{
    LoginOutcome, LoginRequest, MfaPending, MfaVerification, RefreshedTokens, SessionService,
    SessionTokens, VerifiedToken,
};
pub use settings::AuthSettings;
