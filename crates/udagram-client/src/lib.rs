//! Client for the Udagram user and feed services.
//!
//! [`ApiClient`] attaches the access token to protected requests, refreshes
//! it before it expires and once more after a 401, and sends the user back to
//! the sign-in page when the session cannot be recovered.

pub mod client;
pub mod clock;
pub mod coordinator;
pub mod error;
pub mod navigation;
pub mod policy;
pub mod session;

pub use client::{ApiClient, ApiClientBuilder, ClientConfig, FileUpload, MultipartBody, Service};
pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::{REFRESH_GUARD_SECS, REFRESH_THRESHOLD_SECS, RefreshCoordinator, TokenRefresher};
pub use error::{ClientError, RefreshError};
pub use navigation::{Navigator, NoopNavigator};
pub use policy::EndpointPolicy;
pub use session::{MemorySessionStore, Session, SessionStore};
