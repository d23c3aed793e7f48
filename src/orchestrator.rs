//! Request Orchestrator: validates a request, selects an account, and
//! drives it through the Kiro client, retrying on another account when the
//! failure is the account's fault and surfacing to the client when it isn't.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use futures::{Stream, StreamExt};
use kiro_gateway::storage::RedisTokenStorage;
use kiro_gateway::{
    Error as KiroError, KiroClient, KiroClientBuilder, Message, MessageContent, MessagesRequest,
    MessagesResponse, Role, StreamEvent,
};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::GatewayError;
use crate::selector::{first_of_next_utc_month, AccountSelector, SelectError};

/// Validates a Messages API request before any upstream call is attempted.
pub fn validate_request(request: &MessagesRequest) -> Result<(), GatewayError> {
    if request.max_tokens == 0 || request.max_tokens > 200_000 {
        return Err(GatewayError::InvalidRequest(format!(
            "max_tokens must be between 1 and 200000, got {}",
            request.max_tokens
        )));
    }

    if request.messages.is_empty() {
        return Err(GatewayError::InvalidRequest(
            "messages must not be empty".to_string(),
        ));
    }

    for message in &request.messages {
        if !matches!(message.role, Role::User | Role::Assistant) {
            return Err(GatewayError::InvalidRequest(format!(
                "message role must be user or assistant, got {}",
                message.role
            )));
        }
    }

    if !matches!(request.messages[0].role, Role::User) {
        return Err(GatewayError::InvalidRequest(
            "first message must have role user".to_string(),
        ));
    }

    Ok(())
}

/// How a failed upstream attempt should be handled.
enum Classification {
    /// Exclude this account and retry on another; the account itself is
    /// not at fault (a local lock timeout, a transport hiccup).
    RetryExcluding,
    /// The account is unhealthy; mark it so and retry on another.
    RetryMarkingUnhealthy,
    /// The account's quota is exhausted; schedule its recovery and retry
    /// on another.
    RetryWithRecovery,
    /// Translate to a client-visible overloaded error; stop retrying.
    SurfaceOverloaded,
    /// Propagate the original status and body; stop retrying.
    SurfaceUpstream { status: u16, body: String },
}

fn classify(err: &KiroError) -> Classification {
    match err {
        KiroError::NotAuthenticated
        | KiroError::TokenExpired
        | KiroError::RefreshFailed(_)
        | KiroError::MissingCredential(_)
        | KiroError::Lock(_) => Classification::RetryExcluding,

        KiroError::Network(_) | KiroError::Timeout | KiroError::Stream(_) => {
            Classification::RetryExcluding
        }

        KiroError::Api { status: 402, .. } => Classification::RetryWithRecovery,
        KiroError::Api { status: 429, .. } => Classification::RetryMarkingUnhealthy,
        KiroError::Api { status: 403, .. } => Classification::RetryMarkingUnhealthy,
        KiroError::RateLimited { .. } => Classification::RetryMarkingUnhealthy,

        KiroError::Api { status: 529, .. } => Classification::SurfaceOverloaded,

        e if e.is_context_too_long() => Classification::SurfaceOverloaded,

        KiroError::Api { status: 400, .. } => Classification::RetryMarkingUnhealthy,

        KiroError::Api { status, message } => Classification::SurfaceUpstream {
            status: *status,
            body: message.clone(),
        },

        other => Classification::SurfaceUpstream {
            status: 502,
            body: other.to_string(),
        },
    }
}

/// Drives the account pool through the Messages API and Kiro client.
pub struct Orchestrator {
    selector: Arc<AccountSelector>,
    token_storage: Arc<RedisTokenStorage>,
    shared_http: reqwest::Client,
    clients: AsyncMutex<std::collections::HashMap<Uuid, Arc<KiroClient>>>,
    max_retries: u32,
}

impl Orchestrator {
    pub fn new(
        selector: Arc<AccountSelector>,
        token_storage: Arc<RedisTokenStorage>,
        shared_http: reqwest::Client,
        max_retries: u32,
    ) -> Self {
        Self {
            selector,
            token_storage,
            shared_http,
            clients: AsyncMutex::new(std::collections::HashMap::new()),
            max_retries,
        }
    }

    async fn client_for_account(
        &self,
        account: &crate::selector::Account,
    ) -> Result<Arc<KiroClient>, GatewayError> {
        {
            let cache = self.clients.lock().await;
            if let Some(client) = cache.get(&account.id) {
                return Ok(Arc::clone(client));
            }
        }

        let mut builder = KiroClientBuilder::new()
            .account_id(account.id.to_string())
            .storage(Arc::clone(&self.token_storage) as Arc<dyn kiro_gateway::TokenStorage>)
            .lock(Arc::clone(&self.token_storage) as Arc<dyn kiro_gateway::RefreshLock>)
            .reqwest_client(self.shared_http.clone())
            .region(account.region.clone());

        if let Some(arn) = &account.profile_arn {
            builder = builder.profile_arn(arn.clone());
        }

        let client = Arc::new(
            builder
                .build()
                .await
                .map_err(|e| GatewayError::Internal(format!("account {}: {e}", account.id)))?,
        );

        let mut cache = self.clients.lock().await;
        cache.insert(account.id, Arc::clone(&client));
        Ok(client)
    }

    async fn select_account(
        &self,
        excluded: &HashSet<Uuid>,
    ) -> Result<crate::selector::Account, GatewayError> {
        self.selector
            .select_with_retry(excluded)
            .await
            .map_err(|e| match e {
                SelectError::NoHealthyAccounts => GatewayError::NoHealthyAccounts,
                SelectError::Backend(msg) => GatewayError::Internal(msg),
            })
    }

    /// Non-streaming path: retries across accounts up to `max_retries`
    /// times, applying the error taxonomy on every failure.
    pub async fn handle(&self, request: MessagesRequest) -> Result<MessagesResponse, GatewayError> {
        validate_request(&request)?;

        let mut excluded = HashSet::new();
        let mut attempted = Vec::new();

        for attempt in 0..=self.max_retries {
            let account = self.select_account(&excluded).await?;
            attempted.push(account.id);

            let client = self.client_for_account(&account).await?;

            match client.send_messages(request.clone()).await {
                Ok(response) => {
                    self.selector.increment_usage(account.id).await;
                    return Ok(response);
                }
                Err(err) => {
                    info!(account = %account.id, attempt, error = %err, "messages request failed");
                    match self.apply_classification(&account, &err, &mut excluded, &attempted).await {
                        Some(terminal) => return Err(terminal),
                        None => continue,
                    }
                }
            }
        }

        Err(GatewayError::Upstream {
            status: 503,
            body: "retries exhausted across all available accounts".to_string(),
            attempted_accounts: attempted,
        })
    }

    /// Applies the taxonomy for one failed attempt. Returns `Some(error)` if
    /// retrying should stop and that error should reach the client, or
    /// `None` if the caller should select another account and retry.
    async fn apply_classification(
        &self,
        account: &crate::selector::Account,
        err: &KiroError,
        excluded: &mut HashSet<Uuid>,
        attempted: &[Uuid],
    ) -> Option<GatewayError> {
        match classify(err) {
            Classification::RetryExcluding => {
                excluded.insert(account.id);
                None
            }
            Classification::RetryMarkingUnhealthy => {
                self.selector.mark_unhealthy(account.id).await;
                excluded.insert(account.id);
                None
            }
            Classification::RetryWithRecovery => {
                let recovery = first_of_next_utc_month(Utc::now());
                self.selector
                    .mark_unhealthy_with_recovery(account.id, recovery)
                    .await;
                excluded.insert(account.id);
                None
            }
            Classification::SurfaceOverloaded => {
                if err.is_context_too_long() {
                    Some(GatewayError::ContextTooLong)
                } else {
                    Some(GatewayError::Overloaded)
                }
            }
            Classification::SurfaceUpstream { status, body } => Some(GatewayError::Upstream {
                status,
                body,
                attempted_accounts: attempted.to_vec(),
            }),
        }
    }

    /// Streaming path. Retries are only possible before the first event of
    /// a given attempt has been yielded; once upstream bytes have reached
    /// the client, a later failure is synthesized as a clean end of stream
    /// rather than retried, so the client never sees a half-open response
    /// restart mid-way.
    pub async fn handle_stream(
        &self,
        request: MessagesRequest,
        cancel: CancellationToken,
    ) -> Result<Pin<Box<dyn Stream<Item = StreamEvent> + Send>>, GatewayError> {
        validate_request(&request)?;

        let mut excluded = HashSet::new();
        let mut attempted = Vec::new();
        let max_retries = self.max_retries;

        for attempt in 0..=max_retries {
            let account = self.select_account(&excluded).await?;
            attempted.push(account.id);
            let client = self.client_for_account(&account).await?;

            match client.send_messages_stream(request.clone()).await {
                Ok(mut upstream) => {
                    // Peek at the first item to decide whether this attempt
                    // failed before producing any output (retryable) or
                    // produced at least one event (committed; no retry).
                    let first = upstream.next().await;
                    match first {
                        None => {
                            // Empty stream with no error: nothing to retry,
                            // nothing to forward either. Treat as a clean,
                            // silent end.
                            return Ok(Box::pin(futures::stream::empty()));
                        }
                        Some(Err(err)) => {
                            info!(account = %account.id, attempt, error = %err, "stream request failed before first event");
                            if let Some(terminal) =
                                self.apply_classification(&account, &err, &mut excluded, &attempted).await
                            {
                                return Err(terminal);
                            }
                            continue;
                        }
                        Some(Ok(first_event)) => {
                            self.selector.increment_usage(account.id).await;
                            return Ok(Box::pin(committed_stream(
                                first_event,
                                upstream,
                                cancel,
                            )));
                        }
                    }
                }
                Err(err) => {
                    info!(account = %account.id, attempt, error = %err, "failed to open upstream stream");
                    if let Some(terminal) =
                        self.apply_classification(&account, &err, &mut excluded, &attempted).await
                    {
                        return Err(terminal);
                    }
                }
            }
        }

        Err(GatewayError::Upstream {
            status: 503,
            body: "retries exhausted across all available accounts".to_string(),
            attempted_accounts: attempted,
        })
    }
}

/// Tracks what has already reached the client so a cancellation or stream
/// exception can synthesize a well-formed termination instead of dropping
/// the connection mid-block.
#[derive(Default)]
struct StreamState {
    open_block_index: Option<usize>,
    last_usage: Option<kiro_gateway::Usage>,
}

fn committed_stream(
    first_event: StreamEvent,
    mut upstream: Pin<Box<dyn Stream<Item = kiro_gateway::Result<StreamEvent>> + Send>>,
    cancel: CancellationToken,
) -> impl Stream<Item = StreamEvent> + Send {
    async_stream::stream! {
        let mut state = StreamState::default();
        observe(&mut state, &first_event);
        yield first_event;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    for event in terminate(&state) {
                        yield event;
                    }
                    return;
                }
                next = upstream.next() => {
                    match next {
                        None => return,
                        Some(Ok(event)) => {
                            observe(&mut state, &event);
                            let is_stop = matches!(event, StreamEvent::MessageStop);
                            yield event;
                            if is_stop {
                                return;
                            }
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "stream exception mid-response; synthesizing clean end");
                            for event in terminate(&state) {
                                yield event;
                            }
                            return;
                        }
                    }
                }
            }
        }
    }
}

fn observe(state: &mut StreamState, event: &StreamEvent) {
    match event {
        StreamEvent::ContentBlockStart { index, .. } => {
            state.open_block_index = Some(*index);
        }
        StreamEvent::ContentBlockStop { .. } => {
            state.open_block_index = None;
        }
        StreamEvent::MessageDelta { usage, .. } => {
            if usage.is_some() {
                state.last_usage = usage.clone();
            }
        }
        _ => {}
    }
}

/// Synthetic trio that closes out a response that was interrupted either
/// by client cancellation or an upstream stream exception: close any open
/// content block, emit a final message_delta carrying accumulated usage,
/// then message_stop.
fn terminate(state: &StreamState) -> Vec<StreamEvent> {
    let mut events = Vec::with_capacity(3);
    if let Some(index) = state.open_block_index {
        events.push(StreamEvent::ContentBlockStop { index });
    }
    events.push(StreamEvent::MessageDelta {
        delta: kiro_gateway::MessageDelta {
            stop_reason: None,
            stop_sequence: None,
        },
        usage: state.last_usage.clone(),
    });
    events.push(StreamEvent::MessageStop);
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(max_tokens: u32, roles: &[Role]) -> MessagesRequest {
        MessagesRequest {
            model: "claude-sonnet-4.5".to_string(),
            max_tokens,
            messages: roles
                .iter()
                .map(|r| Message {
                    role: *r,
                    content: MessageContent::Text("hi".to_string()),
                })
                .collect(),
            system: None,
            tools: None,
            tool_choice: None,
            stream: false,
            temperature: None,
            top_p: None,
            stop_sequences: None,
            thinking: None,
        }
    }

    #[test]
    fn rejects_zero_max_tokens() {
        let req = request(0, &[Role::User]);
        assert!(validate_request(&req).is_err());
    }

    #[test]
    fn rejects_max_tokens_over_ceiling() {
        let req = request(200_001, &[Role::User]);
        assert!(validate_request(&req).is_err());
    }

    #[test]
    fn accepts_max_tokens_at_ceiling() {
        let req = request(200_000, &[Role::User]);
        assert!(validate_request(&req).is_ok());
    }

    #[test]
    fn rejects_first_message_not_user() {
        let req = request(1024, &[Role::Assistant]);
        assert!(validate_request(&req).is_err());
    }

    #[test]
    fn rejects_system_role_in_messages() {
        let req = request(1024, &[Role::System]);
        assert!(validate_request(&req).is_err());
    }

    #[test]
    fn accepts_well_formed_request() {
        let req = request(1024, &[Role::User, Role::Assistant, Role::User]);
        assert!(validate_request(&req).is_ok());
    }
}
