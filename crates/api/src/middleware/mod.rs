pub mod authorize;

pub use authorize::{authorize, bearer_token, AuthContext, Guard, RouteRequirements, API_KEY_HEADER, PLATFORM_KEY_HEADER};
