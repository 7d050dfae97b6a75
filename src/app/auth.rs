//! Optional HTTP basic auth in front of the console routes.

use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_extra::headers::authorization::Basic;
use axum_extra::headers::{Authorization, HeaderMapExt};
use sha2::digest::Output;
use sha2::{Digest, Sha256};

use super::AppError;

pub const REALM_CHALLENGE: &str = "Basic realm=\"riverui\"";

/// Expected credentials, held as digests so comparison time does not depend
/// on how many leading bytes match.
#[derive(Clone)]
pub struct BasicAuth {
    user: Output<Sha256>,
    password: Output<Sha256>,
}

impl BasicAuth {
    /// Both empty disables auth. Only one of the two set is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Construct`] when exactly one credential is set.
    pub fn from_parts(user: &str, password: &str) -> Result<Option<Self>, AppError> {
        match (user.is_empty(), password.is_empty()) {
            (true, true) => Ok(None),
            (false, false) => Ok(Some(Self { user: Sha256::digest(user), password: Sha256::digest(password) })),
            _ => Err(AppError::Construct(
                "basic auth requires both BASIC_AUTH_USER and BASIC_AUTH_PASSWORD".into(),
            )),
        }
    }

    #[must_use]
    pub fn verify(&self, user: &str, password: &str) -> bool {
        let user_ok = Sha256::digest(user) == self.user;
        let password_ok = Sha256::digest(password) == self.password;
        user_ok & password_ok
    }
}

/// Middleware: pass the request through only with matching credentials.
pub async fn require_basic_auth(State(auth): State<BasicAuth>, request: Request, next: Next) -> Response {
    let authorized = request
        .headers()
        .typed_get::<Authorization<Basic>>()
        .is_some_and(|Authorization(basic)| auth.verify(basic.username(), basic.password()));

    if authorized {
        next.run(request).await
    } else {
        tracing::debug!(path = %request.uri().path(), "basic auth rejected");
        (StatusCode::UNAUTHORIZED, [(header::WWW_AUTHENTICATE, REALM_CHALLENGE)]).into_response()
    }
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
