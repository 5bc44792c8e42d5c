// src/auth/service.rs

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::jwt::{Claims, TokenIssuer};
use super::password::{DEFAULT_COST, hash_password, verify_password};
use crate::config::RelayConfig;
use crate::error::{RelayError, RelayResult};

/// Public view of an account. Never carries the password hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
}

struct StoredUser {
    user: User,
    password_hash: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

/// In-memory accounts with sequential ids
pub struct AuthService {
    users: RwLock<Vec<StoredUser>>,
    tokens: TokenIssuer,
    cost: u32,
}

impl AuthService {
    pub fn new(tokens: TokenIssuer) -> Self {
        Self::with_cost(tokens, DEFAULT_COST)
    }

    /// Lower bcrypt costs keep tests fast
    pub fn with_cost(tokens: TokenIssuer, cost: u32) -> Self {
        Self {
            users: RwLock::new(Vec::new()),
            tokens,
            cost,
        }
    }

    /// Service with the configured secret, seeded with the test account if one is set
    pub fn from_config(config: &RelayConfig) -> RelayResult<Self> {
        let service = Self::new(TokenIssuer::new(&config.jwt_secret, config.token_ttl_hours));
        if let (Some(email), Some(password)) = (&config.test_user_email, &config.test_user_password) {
            let name = config.test_user_name.as_deref().unwrap_or("Test User");
            let user = service.create_user(email, password, name)?;
            info!(user_id = %user.id, email = %user.email, "Seeded test user");
        }
        Ok(service)
    }

    pub fn create_user(&self, email: &str, password: &str, name: &str) -> RelayResult<User> {
        let email = email.trim();
        let name = name.trim();
        if email.is_empty() || password.is_empty() || name.is_empty() {
            return Err(RelayError::validation("email, password and name are required"));
        }

        let password_hash = hash_password(password, self.cost)?;
        let mut users = self.users.write();
        if users.iter().any(|u| u.user.email == email) {
            return Err(RelayError::validation("Email already registered"));
        }

        let user = User {
            id: (users.len() + 1).to_string(),
            email: email.to_string(),
            name: name.to_string(),
        };
        users.push(StoredUser {
            user: user.clone(),
            password_hash,
        });
        Ok(user)
    }

    pub fn login(&self, req: &LoginRequest) -> RelayResult<AuthResponse> {
        let found = self
            .users
            .read()
            .iter()
            .find(|u| u.user.email == req.email.trim())
            .map(|u| (u.user.clone(), u.password_hash.clone()));

        let Some((user, password_hash)) = found else {
            warn!(email = %req.email, "Login for unknown account");
            return Err(RelayError::Unauthorized("Invalid credentials".to_string()));
        };
        if !verify_password(&req.password, &password_hash)? {
            warn!(email = %req.email, "Login with wrong password");
            return Err(RelayError::Unauthorized("Invalid credentials".to_string()));
        }

        let token = self.tokens.issue(&user.id, &user.email)?;
        Ok(AuthResponse { token, user })
    }

    pub fn register(&self, req: &RegisterRequest) -> RelayResult<AuthResponse> {
        let user = self.create_user(&req.email, &req.password, &req.name)?;
        info!(user_id = %user.id, "User registered");
        let token = self.tokens.issue(&user.id, &user.email)?;
        Ok(AuthResponse { token, user })
    }

    pub fn verify_token(&self, token: &str) -> RelayResult<Claims> {
        self.tokens.verify(token)
    }

    pub fn user(&self, user_id: &str) -> Option<User> {
        self.users
            .read()
            .iter()
            .find(|u| u.user.id == user_id)
            .map(|u| u.user.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> AuthService {
        AuthService::with_cost(TokenIssuer::new("secret", 24), 4)
    }

    fn register(service: &AuthService, email: &str) -> RelayResult<AuthResponse> {
        service.register(&RegisterRequest {
            email: email.into(),
            password: "pw".into(),
            name: "Ada".into(),
        })
    }

    #[test]
    fn test_register_then_login() {
        let service = service();
        let registered = register(&service, "ada@example.com").unwrap();
        assert_eq!(registered.user.id, "1");

        let login = service
            .login(&LoginRequest {
                email: "ada@example.com".into(),
                password: "pw".into(),
            })
            .unwrap();
        let claims = service.verify_token(&login.token).unwrap();
        assert_eq!(claims.sub, "1");
        assert_eq!(service.user(&claims.sub).unwrap().name, "Ada");
    }

    #[test]
    fn test_duplicate_email_rejected() {
        let service = service();
        register(&service, "ada@example.com").unwrap();
        assert!(matches!(
            register(&service, "ada@example.com"),
            Err(RelayError::Validation(_))
        ));
        assert_eq!(register(&service, "bob@example.com").unwrap().user.id, "2");
    }

    #[test]
    fn test_bad_credentials() {
        let service = service();
        register(&service, "ada@example.com").unwrap();

        for (email, password) in [("ada@example.com", "nope"), ("who@example.com", "pw")] {
            let result = service.login(&LoginRequest {
                email: email.into(),
                password: password.into(),
            });
            assert!(matches!(result, Err(RelayError::Unauthorized(_))));
        }
    }

    #[test]
    fn test_seeded_from_config() {
        let config = RelayConfig {
            test_user_email: Some("test@example.com".into()),
            test_user_password: Some("secret".into()),
            ..Default::default()
        };
        let service = AuthService::from_config(&config).unwrap();
        let user = service.user("1").unwrap();
        assert_eq!(user.email, "test@example.com");
        assert_eq!(user.name, "Test User");
    }

    #[test]
    fn test_user_serialization_omits_hash() {
        let service = service();
        let response = register(&service, "ada@example.com").unwrap();
        let json = serde_json::to_value(&response).unwrap();
        assert!(json["user"].get("password").is_none());
        assert!(json["token"].is_string());
    }
}
