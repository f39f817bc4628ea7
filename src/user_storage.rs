use std::sync::Arc;

use serde_json::Value;

use crate::error::ApiError;
use crate::storage::{from_document, to_document, Document, DocumentStore, Filter, Patch, Projection};
use crate::user_models::{LoginRequest, NewUser, User, USERS};

/// Users as seen by the API; the hash stays in the store.
pub fn public_projection() -> Projection {
    Projection::exclude(&["password"])
}

/// bcrypt is CPU-bound; both halves run on the blocking pool.
async fn hash_password(password: &str, cost: u32) -> Result<String, ApiError> {
    let password = password.to_string();
    Ok(tokio::task::spawn_blocking(move || bcrypt::hash(password, cost)).await??)
}

async fn verify_password(password: &str, hash: &str) -> Result<bool, ApiError> {
    let password = password.to_string();
    let hash = hash.to_string();
    Ok(tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash)).await??)
}

/// Account operations over the `users` collection.
pub struct UserStorage {
    store: Arc<dyn DocumentStore>,
    cost: u32,
}

impl UserStorage {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self::with_cost(store, bcrypt::DEFAULT_COST)
    }

    pub fn with_cost(store: Arc<dyn DocumentStore>, cost: u32) -> Self {
        Self { store, cost }
    }

    pub async fn create_user(&self, new_user: NewUser) -> Result<User, ApiError> {
        if new_user.username.trim().is_empty() {
            return Err(ApiError::bad_request("expected username, none found"));
        }
        if new_user.password.is_empty() {
            return Err(ApiError::bad_request("expected password, none found"));
        }
        if self.get_user_by_username(&new_user.username).await?.is_some() {
            return Err(ApiError::Conflict("username already exists".to_string()));
        }

        let password_hash = hash_password(&new_user.password, self.cost).await?;
        let user = User::new(new_user.id, new_user.username, password_hash);
        self.store.insert_one(USERS, to_document(&user)?).await?;

        tracing::info!(user_id = %user.id, username = %user.username, "user created");
        Ok(user)
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, ApiError> {
        let filter = Filter::new().eq("username", username);
        match self.store.select_one(USERS, Some(&filter), None).await? {
            Some(doc) => Ok(Some(from_document(doc)?)),
            None => Ok(None),
        }
    }

    pub async fn get_user(&self, id: &str) -> Result<Option<User>, ApiError> {
        match self.store.select_one(USERS, Some(&Filter::by_id(id)), None).await? {
            Some(doc) => Ok(Some(from_document(doc)?)),
            None => Ok(None),
        }
    }

    /// Checks credentials; on success returns the matching user.
    pub async fn verify_login(&self, login: &LoginRequest) -> Result<User, ApiError> {
        if login.username.is_empty() {
            return Err(ApiError::bad_request("expected username, found none"));
        }
        if login.password.is_empty() {
            return Err(ApiError::bad_request("expected password, found none"));
        }

        let invalid = || ApiError::Unauthorized("invalid username or password".to_string());
        let user = self
            .get_user_by_username(&login.username)
            .await?
            .ok_or_else(invalid)?;
        if let Some(id) = login.id.as_deref().filter(|id| !id.is_empty()) {
            if id != user.id {
                return Err(invalid());
            }
        }

        if !verify_password(&login.password, &user.password).await? {
            return Err(invalid());
        }
        Ok(user)
    }

    /// Applies a field patch to a user, re-hashing a new password and
    /// keeping usernames unique.
    pub async fn update_user(&self, id: &str, mut fields: Document) -> Result<(), ApiError> {
        if let Some(password) = fields.get("password") {
            let password = password
                .as_str()
                .filter(|p| !p.is_empty())
                .ok_or_else(|| ApiError::bad_request("expected password, none found"))?;
            let hash = hash_password(password, self.cost).await?;
            fields.insert("password".to_string(), Value::String(hash));
        }

        if let Some(username) = fields.get("username").and_then(Value::as_str) {
            if let Some(other) = self.get_user_by_username(username).await? {
                if other.id != id {
                    return Err(ApiError::Conflict("username already exists".to_string()));
                }
            }
        }

        self.store.update_one(USERS, id, Patch::set(fields)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStore;
    use serde_json::json;

    async fn users() -> UserStorage {
        let store = LocalStore::in_memory(concat!(env!("CARGO_MANIFEST_DIR"), "/schemas"));
        store.start().await.unwrap();
        UserStorage::with_cost(Arc::new(store), 4)
    }

    fn new_user(username: &str, password: &str) -> NewUser {
        NewUser {
            id: None,
            username: username.into(),
            password: password.into(),
        }
    }

    fn login(username: &str, password: &str) -> LoginRequest {
        LoginRequest {
            id: None,
            username: username.into(),
            password: password.into(),
        }
    }

    #[tokio::test]
    async fn stores_hash_not_password() {
        let users = users().await;
        let user = users.create_user(new_user("asha", "secret")).await.unwrap();
        assert_ne!(user.password, "secret");
        assert!(bcrypt::verify("secret", &user.password).unwrap());
    }

    #[tokio::test]
    async fn rejects_empty_password_and_duplicate_username() {
        let users = users().await;
        assert!(matches!(
            users.create_user(new_user("asha", "")).await,
            Err(ApiError::BadRequest(_))
        ));
        users.create_user(new_user("asha", "pw")).await.unwrap();
        assert!(matches!(
            users.create_user(new_user("asha", "pw2")).await,
            Err(ApiError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn login_checks_password_and_optional_id() {
        let users = users().await;
        let user = users.create_user(new_user("asha", "pw")).await.unwrap();

        assert_eq!(users.verify_login(&login("asha", "pw")).await.unwrap().id, user.id);
        assert!(matches!(
            users.verify_login(&login("asha", "nope")).await,
            Err(ApiError::Unauthorized(_))
        ));
        assert!(matches!(
            users.verify_login(&login("ghost", "pw")).await,
            Err(ApiError::Unauthorized(_))
        ));

        let mut wrong_id = login("asha", "pw");
        wrong_id.id = Some("someone-else".into());
        assert!(matches!(
            users.verify_login(&wrong_id).await,
            Err(ApiError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn update_rehashes_password() {
        let users = users().await;
        let user = users.create_user(new_user("asha", "pw")).await.unwrap();
        let fields = json!({"id": user.id, "password": "new-pw"})
            .as_object()
            .cloned()
            .unwrap();
        users.update_user(&user.id, fields).await.unwrap();

        assert!(users.verify_login(&login("asha", "new-pw")).await.is_ok());
        let stored = users.get_user(&user.id).await.unwrap().unwrap();
        assert_ne!(stored.password, "new-pw");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn hashing_leaves_the_runtime_free() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::time::Duration;

        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let ticker = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(1)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        let hash = hash_password("secret", 10).await.unwrap();
        let seen = ticks.load(Ordering::SeqCst);
        ticker.abort();

        assert!(seen > 0, "runtime stalled while hashing");
        assert!(verify_password("secret", &hash).await.unwrap());
        assert!(!verify_password("other", &hash).await.unwrap());
    }

    #[tokio::test]
    async fn update_keeps_usernames_unique() {
        let users = users().await;
        users.create_user(new_user("asha", "pw")).await.unwrap();
        let ravi = users.create_user(new_user("ravi", "pw")).await.unwrap();
        let fields = json!({"username": "asha"}).as_object().cloned().unwrap();
        assert!(matches!(
            users.update_user(&ravi.id, fields).await,
            Err(ApiError::Conflict(_))
        ));
    }
}
