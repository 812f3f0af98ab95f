use serde::{Deserialize, Serialize};

use crate::models::Profile;

// -- JWT Claims --

/// JWT claims shared between parley-api (token issuance) and
/// parley-server (WebSocket upgrade authentication). `sub` is the
/// username — the immutable identity key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignUpRequest {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignInRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: Profile,
    pub token: String,
}
