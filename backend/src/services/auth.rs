//! Authentication service: credential checks, tokens and operator accounts

use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use shared::models::{NewUser, User};
use shared::types::{Role, Session, UserId};
use shared::validation;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::services::ledger_store::LedgerStore;

/// Authentication service
#[derive(Clone)]
pub struct AuthService {
    store: LedgerStore,
    jwt_secret: String,
    access_token_expiry: i64,
    bcrypt_cost: u32,
}

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User ID
    pub sub: String,
    pub username: String,
    pub role: Role,
    pub exp: i64,
    pub iat: i64,
}

/// Login response
#[derive(Debug, Serialize)]
pub struct AuthTokens {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user: User,
}

impl AuthService {
    pub fn new(store: LedgerStore, config: &Config) -> Self {
        Self {
            store,
            jwt_secret: config.jwt.secret.clone(),
            access_token_expiry: config.jwt.access_token_expiry,
            bcrypt_cost: DEFAULT_COST,
        }
    }

    /// Override the hashing cost (tests use the minimum)
    pub fn with_bcrypt_cost(mut self, cost: u32) -> Self {
        self.bcrypt_cost = cost;
        self
    }

    /// Check a username and plaintext password against the stored bcrypt hash
    pub async fn verify_credentials(&self, username: &str, password: &str) -> AppResult<bool> {
        let Some(user) = self.store.find_user(username).await? else {
            return Ok(false);
        };

        verify(password, &user.password_hash)
            .map_err(|e| AppError::Internal(format!("Password verification failed: {}", e)))
    }

    /// Verify credentials and issue an access token
    pub async fn login(&self, username: &str, password: &str) -> AppResult<AuthTokens> {
        let Some(credentials) = self.store.find_user(username).await? else {
            tracing::warn!("Login failed: unknown user '{}'", username);
            return Err(AppError::InvalidCredentials);
        };

        let valid = verify(password, &credentials.password_hash)
            .map_err(|e| AppError::Internal(format!("Password verification failed: {}", e)))?;
        if !valid {
            tracing::warn!("Login failed: wrong password for '{}'", username);
            return Err(AppError::InvalidCredentials);
        }

        let user = credentials.to_user()?;
        let access_token = self.issue_token(&user)?;
        tracing::info!(user_id = user.id.0, "{} logged in as {}", user.username, user.role);

        Ok(AuthTokens {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: self.access_token_expiry,
            user,
        })
    }

    /// Sign an access token for `user`
    pub fn issue_token(&self, user: &User) -> AppResult<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.id.0.to_string(),
            username: user.username.clone(),
            role: user.role,
            exp: (now + Duration::seconds(self.access_token_expiry)).timestamp(),
            iat: now.timestamp(),
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))
    }

    /// Validate an access token and return the session it carries
    pub fn session_from_token(&self, token: &str) -> AppResult<Session> {
        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AppError::InvalidToken("token has expired".to_string()),
            _ => AppError::InvalidToken(e.to_string()),
        })?;

        let claims = token_data.claims;
        let user_id = claims
            .sub
            .parse::<i64>()
            .map_err(|_| AppError::InvalidToken("invalid user id in token".to_string()))?;

        Ok(Session::new(UserId(user_id), claims.username, claims.role))
    }

    /// Create an operator account (admin only)
    pub async fn create_user(&self, session: &Session, new_user: NewUser) -> AppResult<User> {
        if session.role != Role::Admin {
            tracing::warn!("Permission denied: {} tried to create a user", session.username);
            return Err(AppError::PermissionDenied {
                role: session.role,
                action: "create users",
            });
        }

        let username = new_user.username.trim();
        validation::validate_username(username)
            .map_err(|message| AppError::validation("username", message))?;
        validation::validate_password(&new_user.password)
            .map_err(|message| AppError::validation("password", message))?;

        let password_hash = hash(&new_user.password, self.bcrypt_cost)
            .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))?;

        let user = self
            .store
            .insert_user(username, &password_hash, new_user.role)
            .await?;
        tracing::info!(
            user_id = user.id.0,
            "User '{}' ({}) created by {}",
            user.username,
            user.role,
            session.username
        );
        Ok(user)
    }

    /// Create the first admin when no account exists yet
    pub async fn ensure_bootstrap_admin(
        &self,
        username: &str,
        password: &str,
    ) -> AppResult<Option<User>> {
        if self.store.count_users().await? > 0 {
            return Ok(None);
        }

        validation::validate_username(username)
            .map_err(|message| AppError::validation("bootstrap.admin_username", message))?;
        validation::validate_password(password)
            .map_err(|message| AppError::validation("bootstrap.admin_password", message))?;

        let password_hash = hash(password, self.bcrypt_cost)
            .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))?;
        let admin = self
            .store
            .insert_user(username, &password_hash, Role::Admin)
            .await?;

        tracing::info!("Bootstrap admin '{}' created", admin.username);
        Ok(Some(admin))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::SqlitePool;

    fn service() -> AuthService {
        let pool = SqlitePool::connect_lazy("sqlite::memory:").unwrap();
        AuthService::new(LedgerStore::new(pool), &Config::in_memory("unit-test-secret"))
            .with_bcrypt_cost(4)
    }

    fn user(role: Role) -> User {
        User {
            id: UserId(7),
            username: "clerk".to_string(),
            role,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_token_carries_session() {
        let auth = service();
        let token = auth.issue_token(&user(Role::Manager)).unwrap();

        let session = auth.session_from_token(&token).unwrap();
        assert_eq!(session, Session::new(UserId(7), "clerk", Role::Manager));
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let auth = service();
        let issued = Utc::now() - Duration::hours(2);
        let claims = Claims {
            sub: "7".to_string(),
            username: "clerk".to_string(),
            role: Role::Viewer,
            exp: (issued + Duration::hours(1)).timestamp(),
            iat: issued.timestamp(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"unit-test-secret"),
        )
        .unwrap();

        let err = auth.session_from_token(&token).unwrap_err();
        assert!(matches!(err, AppError::InvalidToken(ref msg) if msg == "token has expired"));
    }

    #[tokio::test]
    async fn test_non_numeric_subject_rejected() {
        let auth = service();
        let claims = Claims {
            sub: "clerk".to_string(),
            username: "clerk".to_string(),
            role: Role::Admin,
            exp: (Utc::now() + Duration::hours(1)).timestamp(),
            iat: Utc::now().timestamp(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"unit-test-secret"),
        )
        .unwrap();

        assert!(matches!(
            auth.session_from_token(&token),
            Err(AppError::InvalidToken(_))
        ));
    }
}
