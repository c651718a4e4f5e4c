use crate::auth::AuthenticatedUser;
use crate::auth::token::{TokenVerifier, bearer_token};
use crate::error::DowngateError;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use std::future::Future;

/// Axum extractor for authenticated callers.
///
/// Rejects the request with 401 if the bearer token is missing or fails
/// verification. Requires a [`TokenVerifier`] reachable from the app state
/// via `FromRef`.
///
/// # Example
///
/// ```rust,ignore
/// async fn handler(CurrentUser(user): CurrentUser) -> Json<Status> {
///     // user.id / user.role are backed by a verified signature
/// }
/// ```
#[derive(Debug)]
pub struct CurrentUser(pub AuthenticatedUser);

impl<S> FromRequestParts<S> for CurrentUser
where
    TokenVerifier: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = DowngateError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> impl Future<Output = Result<Self, Self::Rejection>> + Send {
        let verifier = TokenVerifier::from_ref(state);
        let header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        async move {
            let token = bearer_token(header.as_deref())?.to_owned();
            let claims = verifier.verify(&token)?;
            Ok(CurrentUser(claims.user()))
        }
    }
}
