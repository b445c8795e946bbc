use axum::{response::IntoResponse, Json};
use utoipa::OpenApi;

use super::handlers::{auth, health};
use super::types::{ErrorResponse, Health, LoginBody, LoginResponse, SessionResponse, UserResponse};

/// Add new endpoints to `paths(...)` so they show up in `/openapi.json`.
/// Info (title, version, contact, license) comes from Cargo metadata.
#[derive(OpenApi)]
#[openapi(
    paths(health::health, auth::login, auth::session, auth::logout),
    components(schemas(
        ErrorResponse,
        Health,
        LoginBody,
        LoginResponse,
        SessionResponse,
        UserResponse
    )),
    tags(
        (name = "auth", description = "Login, session check and logout"),
        (name = "health", description = "Service status")
    )
)]
pub struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

pub async fn openapi_json() -> impl IntoResponse {
    Json(openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_info_from_cargo() {
        let spec = openapi();
        assert_eq!(spec.info.title, env!("CARGO_PKG_NAME"));
        assert_eq!(spec.info.version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn openapi_documents_auth_paths() {
        let spec = openapi();
        for path in [
            "/health",
            "/v1/auth/login",
            "/v1/auth/session",
            "/v1/auth/logout",
        ] {
            assert!(spec.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
