use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::model::role::Role;

#[derive(Deserialize, ToSchema)]
pub struct RegisterReq {
    #[schema(example = "juan")]
    pub username: String,
    #[schema(example = "s3cret")]
    pub password: String,
}

#[derive(Deserialize, ToSchema)]
pub struct LoginReqDto {
    #[schema(example = "juan")]
    pub username: String,
    #[schema(example = "s3cret")]
    pub password: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct SessionUser {
    #[schema(example = 1)]
    pub id: u64,
    #[schema(example = "juan")]
    pub username: String,
    pub role: Role,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    pub token: String,
    pub user: SessionUser,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: u64,
    pub sub: String,
    pub role: Role,
    pub iat: usize,
    pub exp: usize,
    pub jti: String,
}
