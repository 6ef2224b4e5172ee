//! Transport-free core of the Mocka client: persisted tokens, session state,
//! unverified JWT claims and validation-error normalization.

pub mod api_error;
pub mod config;
pub mod jwt;
pub mod lifetime;
pub mod session;
pub mod token_store;
pub mod validation;

pub use api_error::{ApiError, STATUS_UNAUTHORIZED, STATUS_UNPROCESSABLE_ENTITY};
pub use config::{ConfigError, normalize_base_url, resolve_api_base_url, resolve_token_file_path};
pub use jwt::{DecodedClaims, SubjectId, decode_claims};
pub use lifetime::{LifetimeError, LifetimeUnit, MockLifetime, format_expiry};
pub use session::{LoginRedirect, SessionContext, SessionInit, SessionRefresher, SessionState};
pub use token_store::{
    FilePersistence, ListenerId, MemoryPersistence, RefreshTokenUpdate, StoredSession,
    TokenChange, TokenPersistence, TokenStore, TokenStoreError,
};
pub use validation::{
    FieldErrors, GLOBAL_FIELD_KEY, extract_validation_messages, map_validation_errors,
    normalize_field_key,
};
