//! Main client entry point.

use std::pin::Pin;
use std::sync::Arc;

use async_stream::try_stream;
use futures::{Stream, StreamExt};
use tracing::{debug, info};

use crate::api::messages::MessagesRequestBuilder;
use crate::auth::{KiroAuthManager, RefreshLock};
use crate::convert::model_resolver::ModelResolver;
use crate::convert::request::build_kiro_payload;
use crate::convert::response::{estimate_request_chars, ResponseAccumulator};
use crate::error::{Error, Result};
use crate::models::request::MessagesRequest;
use crate::models::response::MessagesResponse;
use crate::models::stream::StreamEvent;
use crate::transport::eventstream::DecoderPool;
use crate::transport::http::KiroHttpClient;
use crate::transport::sse;

/// Kiro API client.
///
/// Provides both an Anthropic Messages API surface and raw Kiro API access.
///
/// # Examples
///
/// ```rust,no_run
/// use kiro_gateway::{KiroClient, KiroClientBuilder};
///
/// # async fn example() -> kiro_gateway::Result<()> {
/// let client = KiroClientBuilder::new()
///     .credentials_file("~/.kiro/credentials.json")
///     .build()
///     .await?;
///
/// let response = client.messages()
///     .model("claude-sonnet-4.5")
///     .max_tokens(1024)
///     .user_message("Hello, Claude!")
///     .send()
///     .await?;
///
/// println!("{}", response.text());
/// # Ok(())
/// # }
/// ```
pub struct KiroClient {
    auth: Arc<KiroAuthManager>,
    http: Arc<KiroHttpClient>,
    model_resolver: Arc<ModelResolver>,
    decoder_pool: Arc<DecoderPool>,
}

impl KiroClient {
    /// Create a builder for configuring the client.
    pub fn builder() -> KiroClientBuilder {
        KiroClientBuilder::new()
    }

    /// Start building a Messages API request.
    pub fn messages(&self) -> MessagesRequestBuilder<'_> {
        MessagesRequestBuilder::new(self)
    }

    /// Send a Messages API request and get a complete response.
    pub async fn send_messages(&self, request: MessagesRequest) -> Result<MessagesResponse> {
        let model_id = self.model_resolver.resolve(&request.model);
        let region = self.auth.region().await;
        let profile_arn = self.auth.profile_arn().await;

        let payload = build_kiro_payload(&request, &model_id, profile_arn.as_deref())?;
        let url =
            crate::config::generate_assistant_response_url(&region, profile_arn.as_deref());

        debug!(model = model_id.as_str(), "Sending Messages request");

        let response = self.http.post_streaming(&url, &payload).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Stream(format!("Failed to read response body: {}", e)))?;

        let char_estimate = estimate_request_chars(&request);
        let mut accumulator = ResponseAccumulator::new(&model_id, char_estimate);
        let mut decoder = DecoderPool::checkout(&self.decoder_pool);

        for frame in decoder.feed(&body)? {
            if frame.is_exception() || frame.is_error() {
                let message = String::from_utf8_lossy(&frame.payload).into_owned();
                return Err(Error::Api {
                    status: 529,
                    message,
                });
            }
            for event in sse::parse_chunk(&String::from_utf8_lossy(&frame.payload)) {
                accumulator.process_event(event);
            }
        }
        accumulator.finish_events();

        Ok(accumulator.into_response())
    }

    /// Send a Messages API request and get a streaming response.
    pub async fn send_messages_stream(
        &self,
        request: MessagesRequest,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>> {
        let model_id = self.model_resolver.resolve(&request.model);
        let region = self.auth.region().await;
        let profile_arn = self.auth.profile_arn().await;

        let payload = build_kiro_payload(&request, &model_id, profile_arn.as_deref())?;
        let url =
            crate::config::generate_assistant_response_url(&region, profile_arn.as_deref());

        debug!(model = model_id.as_str(), "Sending streaming Messages request");

        let response = self.http.post_streaming(&url, &payload).await?;
        let model_id_owned = model_id.clone();
        let char_estimate = estimate_request_chars(&request);
        let decoder_pool = Arc::clone(&self.decoder_pool);

        let stream = try_stream! {
            let mut accumulator = ResponseAccumulator::new(&model_id_owned, char_estimate);
            let mut decoder = DecoderPool::checkout(&decoder_pool);

            let mut byte_stream = response.bytes_stream();

            while let Some(chunk_result) = byte_stream.next().await {
                let chunk = chunk_result.map_err(|e| Error::Stream(format!("Stream read error: {}", e)))?;

                for frame in decoder.feed(&chunk)? {
                    if frame.is_exception() || frame.is_error() {
                        let message = String::from_utf8_lossy(&frame.payload).into_owned();
                        Err(Error::Api { status: 529, message })?;
                    }

                    for event in sse::parse_chunk(&String::from_utf8_lossy(&frame.payload)) {
                        for se in accumulator.process_event(event) {
                            yield se;
                        }
                    }
                }
            }

            for event in accumulator.finish_events() {
                yield event;
            }
        };

        Ok(Box::pin(stream))
    }

    /// List available models.
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let region = self.auth.region().await;
        let profile_arn = self.auth.profile_arn().await;
        crate::api::models::list_models(&self.http, &region, profile_arn.as_deref()).await
    }

    /// Send a raw Kiro API payload.
    pub async fn raw_request(&self, payload: &serde_json::Value) -> Result<String> {
        let region = self.auth.region().await;
        let profile_arn = self.auth.profile_arn().await;
        crate::api::raw::raw_request(&self.http, &region, profile_arn.as_deref(), payload).await
    }

    /// Send a raw Kiro API payload and get a streaming response.
    pub async fn raw_request_stream(
        &self,
        payload: &serde_json::Value,
    ) -> Result<reqwest::Response> {
        let region = self.auth.region().await;
        let profile_arn = self.auth.profile_arn().await;
        crate::api::raw::raw_request_stream(&self.http, &region, profile_arn.as_deref(), payload)
            .await
    }

    /// Get a reference to the auth manager.
    pub fn auth(&self) -> &KiroAuthManager {
        &self.auth
    }

    /// Get a reference to the model resolver.
    pub fn model_resolver(&self) -> &ModelResolver {
        &self.model_resolver
    }
}

/// Builder for [`KiroClient`].
pub struct KiroClientBuilder {
    credentials_file: Option<String>,
    sqlite_db: Option<String>,
    refresh_token: Option<String>,
    region: Option<String>,
    profile_arn: Option<String>,
    storage: Option<Arc<dyn crate::storage::TokenStorage>>,
    reqwest_client: Option<reqwest::Client>,
    account_id: Option<String>,
    lock: Option<Arc<dyn RefreshLock>>,
}

impl KiroClientBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            credentials_file: None,
            sqlite_db: None,
            refresh_token: None,
            region: None,
            profile_arn: None,
            storage: None,
            reqwest_client: None,
            account_id: None,
            lock: None,
        }
    }

    /// Load credentials from a JSON file.
    pub fn credentials_file(mut self, path: impl Into<String>) -> Self {
        self.credentials_file = Some(path.into());
        self
    }

    /// Load credentials from a SQLite database.
    pub fn sqlite_db(mut self, path: impl Into<String>) -> Self {
        self.sqlite_db = Some(path.into());
        self
    }

    /// Set a refresh token directly.
    pub fn refresh_token(mut self, token: impl Into<String>) -> Self {
        self.refresh_token = Some(token.into());
        self
    }

    /// Set the AWS region.
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Set the profile ARN.
    pub fn profile_arn(mut self, arn: impl Into<String>) -> Self {
        self.profile_arn = Some(arn.into());
        self
    }

    /// Set a token storage backend.
    pub fn storage(mut self, storage: Arc<dyn crate::storage::TokenStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Set a custom reqwest client.
    pub fn reqwest_client(mut self, client: reqwest::Client) -> Self {
        self.reqwest_client = Some(client);
        self
    }

    /// Set the account identifier the refresh lock is keyed on. Required when
    /// several `KiroClient`s share one `lock` backend (e.g. a pool of accounts
    /// all backed by the same Redis instance).
    pub fn account_id(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    /// Set the refresh lock backend. Defaults to an in-process lock.
    pub fn lock(mut self, lock: Arc<dyn RefreshLock>) -> Self {
        self.lock = Some(lock);
        self
    }

    /// Build the client, loading and validating credentials.
    ///
    /// When a `storage` backend is configured but none of the direct
    /// credential sources (file, SQLite, env, refresh token) are, the
    /// client starts with no in-memory token and loads one from `storage`
    /// instead - the path a pool of accounts backed by a shared store takes.
    pub async fn build(self) -> Result<KiroClient> {
        let storage = self.storage.clone();

        let mut auth_manager = match self.load_credentials() {
            Ok(token_info) => KiroAuthManager::new(token_info),
            Err(Error::NotAuthenticated) if storage.is_some() => KiroAuthManager::empty(),
            Err(e) => return Err(e),
        };
        if let Some(storage) = storage {
            auth_manager = auth_manager.with_storage(storage);
        }
        if let Some(client) = &self.reqwest_client {
            auth_manager = auth_manager.with_client(client.clone());
        }
        if let Some(account_id) = self.account_id {
            auth_manager = auth_manager.with_account_id(account_id);
        }
        if let Some(lock) = self.lock {
            auth_manager = auth_manager.with_lock(lock);
        }

        let auth = Arc::new(auth_manager);
        if auth.token_info().await.is_none() {
            auth.load_from_storage().await?;
        }
        let http = Arc::new(KiroHttpClient::new(Arc::clone(&auth)));
        let model_resolver = Arc::new(ModelResolver::new());

        info!("KiroClient initialized");
        Ok(KiroClient {
            auth,
            http,
            model_resolver,
            decoder_pool: Arc::new(DecoderPool::new()),
        })
    }

    fn load_credentials(&self) -> Result<crate::models::auth::KiroTokenInfo> {
        // Priority: SQLite > JSON file > env > direct refresh token

        // 1. SQLite database
        if let Some(db_path) = &self.sqlite_db {
            let mut token = crate::auth::credentials::load_from_sqlite(db_path)?;
            self.apply_overrides(&mut token);
            return Ok(token);
        }

        // 2. JSON credentials file
        if let Some(file_path) = &self.credentials_file {
            let mut token = crate::auth::credentials::load_from_json_file(file_path)?;
            self.apply_overrides(&mut token);
            return Ok(token);
        }

        // 3. Environment variables
        if let Some(mut token) = crate::auth::credentials::load_from_env() {
            self.apply_overrides(&mut token);
            return Ok(token);
        }

        // 4. Direct refresh token
        if let Some(refresh_token) = &self.refresh_token {
            let mut token = crate::models::auth::KiroTokenInfo::new(refresh_token.clone());
            self.apply_overrides(&mut token);
            token.detect_auth_type();
            return Ok(token);
        }

        // 5. Try default paths
        // Default SQLite path
        let default_sqlite = "~/.local/share/kiro-cli/data.sqlite3";
        if let Ok(mut token) = crate::auth::credentials::load_from_sqlite(default_sqlite) {
            self.apply_overrides(&mut token);
            return Ok(token);
        }

        Err(Error::NotAuthenticated)
    }

    fn apply_overrides(&self, token: &mut crate::models::auth::KiroTokenInfo) {
        if let Some(region) = &self.region {
            token.region = region.clone();
        }
        if let Some(arn) = &self.profile_arn {
            token.profile_arn = Some(arn.clone());
        }
    }
}

impl Default for KiroClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
