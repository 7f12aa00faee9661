use chrono::Utc;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;

use crate::{AccessToken, ExpiresIn, Scope, SharedTokenStore};

use super::access::Actor;
use super::error::{ServiceError, ServiceResult};
use super::ids::generate_unique_id_async;
use super::models::{AccessTokenResponse, GenerateAccessTokenRequest, GenerateAccessTokenResponse};

const SECRET_BYTES: usize = 32;

/// Scopes granted to the hidden token minted at login.
pub const SESSION_SCOPES: [Scope; 3] = [Scope::Paste, Scope::User, Scope::UserAccessTokens];

pub fn hash_secret(secret: &str) -> String {
    hex::encode(Sha512::digest(secret.as_bytes()))
}

/// Issues, verifies and revokes bearer tokens of the form `{id}-{secret}`.
#[derive(Clone)]
pub struct TokenService {
    tokens: SharedTokenStore,
}

impl TokenService {
    pub fn new(tokens: SharedTokenStore) -> Self {
        Self { tokens }
    }

    fn require_token_scope(actor: &Actor) -> ServiceResult<&str> {
        let user_id = actor.user_id().ok_or_else(|| {
            ServiceError::Unauthorized("You must be authorized to manage access tokens.".into())
        })?;
        if !actor.has_scope(&[Scope::UserAccessTokens]) {
            return Err(ServiceError::Forbidden(format!(
                "Missing required scope {}.",
                Scope::UserAccessTokens
            )));
        }
        Ok(user_id)
    }

    async fn issue(
        &self,
        owner_id: &str,
        scopes: Vec<Scope>,
        expires_in: ExpiresIn,
        description: String,
        hidden: bool,
    ) -> ServiceResult<GenerateAccessTokenResponse> {
        let store = &self.tokens;
        let id = generate_unique_id_async(|candidate| async move {
            store.get_token(&candidate).await.map(|t| t.is_some())
        })
        .await?;

        let mut raw = [0u8; SECRET_BYTES];
        OsRng.fill_bytes(&mut raw);
        let secret = hex::encode(raw);

        let created_at = Utc::now();
        let token = AccessToken {
            id: id.clone(),
            description,
            token_hash: hash_secret(&secret),
            owner_id: owner_id.to_string(),
            scopes,
            created_at,
            expires_at: expires_in.deletes_at(created_at),
            hidden,
        };
        let expires_at = token.expires_at;
        self.tokens.insert_token(token).await?;
        log::info!("issued access token {id} for user {owner_id}");

        Ok(GenerateAccessTokenResponse {
            access_token: format!("{id}-{secret}"),
            expires_at,
        })
    }

    /// A token can only carry scopes its issuer already holds.
    pub async fn issue_for_self(
        &self,
        actor: &Actor,
        request: GenerateAccessTokenRequest,
    ) -> ServiceResult<GenerateAccessTokenResponse> {
        let user_id = Self::require_token_scope(actor)?;
        if let Some(scope) = request
            .scopes
            .iter()
            .find(|scope| !actor.has_scope(&[**scope]))
        {
            return Err(ServiceError::Forbidden(format!(
                "Can't grant scope {scope} you don't hold."
            )));
        }

        let mut scopes: Vec<Scope> = Vec::new();
        for scope in request.scopes {
            if !scopes.contains(&scope) {
                scopes.push(scope);
            }
        }
        self.issue(user_id, scopes, request.expires_in, request.description, false)
            .await
    }

    /// Hidden token minted when a user logs in.
    pub async fn issue_session(&self, user_id: &str) -> ServiceResult<GenerateAccessTokenResponse> {
        self.issue(
            user_id,
            SESSION_SCOPES.to_vec(),
            ExpiresIn::OneMonth,
            String::new(),
            true,
        )
        .await
    }

    /// Resolves a bearer string to an actor. Anything that does not check out is anonymous.
    pub async fn authenticate(&self, bearer: Option<&str>) -> ServiceResult<Actor> {
        let Some((id, secret)) = bearer.map(str::trim).and_then(|b| b.split_once('-')) else {
            return Ok(Actor::Anonymous);
        };

        let Some(token) = self.tokens.get_token(id).await? else {
            return Ok(Actor::Anonymous);
        };

        if token.is_expired_at(Utc::now()) {
            if let Err(err) = self.tokens.delete_token(&token.id).await {
                log::warn!("failed to remove expired access token {}: {err}", token.id);
            }
            return Ok(Actor::Anonymous);
        }

        let presented = hash_secret(secret);
        if !bool::from(presented.as_bytes().ct_eq(token.token_hash.as_bytes())) {
            log::debug!("access token {id} presented with a wrong secret");
            return Ok(Actor::Anonymous);
        }

        Ok(Actor::user(token.owner_id, token.scopes))
    }

    /// Visible tokens of the caller, newest first.
    pub async fn list_for_self(&self, actor: &Actor) -> ServiceResult<Vec<AccessTokenResponse>> {
        let user_id = Self::require_token_scope(actor)?;
        let tokens = self.tokens.tokens_for_owner(user_id).await?;
        Ok(tokens
            .into_iter()
            .filter(|t| !t.hidden)
            .map(|t| AccessTokenResponse {
                id: t.id,
                description: t.description,
                created_at: t.created_at,
                expires_at: t.expires_at,
                scopes: t.scopes,
            })
            .collect())
    }

    pub async fn revoke(&self, actor: &Actor, token_id: &str) -> ServiceResult<()> {
        let user_id = Self::require_token_scope(actor)?;
        match self.tokens.get_token(token_id).await? {
            Some(token) if token.owner_id == user_id => {
                self.tokens.delete_token(token_id).await?;
                log::info!("revoked access token {token_id}");
                Ok(())
            }
            _ => Err(ServiceError::NotFound("Access token not found.".into())),
        }
    }
}
