use async_trait::async_trait;
use redis::{ AsyncCommands, Client };
use crate::credentials::{ CredentialError, CredentialStore };

pub struct RedisCredentialStore {
    client: Client,
    hash_key: String,
}

impl RedisCredentialStore {
    pub fn new(url: &str, hash_key: &str) -> Result<Self, CredentialError> {
        Ok(Self {
            client: Client::open(url)?,
            hash_key: hash_key.to_string(),
        })
    }
}

#[async_trait]
impl CredentialStore for RedisCredentialStore {
    async fn upsert(&self, user_id: &str, token: &str) -> Result<(), CredentialError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.hset::<_, _, _, ()>(&self.hash_key, user_id, token).await?;
        Ok(())
    }

    async fn get(&self, user_id: &str) -> Result<Option<String>, CredentialError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let token: Option<String> = conn.hget(&self.hash_key, user_id).await?;
        Ok(token)
    }
}
