//! In-memory fakes for the store, ledger and provider seams.
//!
//! Compiled for this crate's tests and for dependents that enable the
//! `test-util` feature.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use jobproof_shared::{normalize_email, EntitlementRecord, SubscriptionStatus};
use sha2::Sha256;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::events::EntitlementEvent;
use crate::ledger::{ProcessingResult, WebhookLedger};
use crate::provider::{
    BillingProvider, CheckoutRequest, ProviderCheckoutSession, ProviderCustomer,
    ProviderSubscription, SubscriptionLookup,
};
use crate::store::EntitlementStore;

/// Build a `t=...,v1=...` signature header the way the provider does
pub fn signature_header(secret: &str, timestamp: i64, payload: &str) -> String {
    let signed_payload = format!("{}.{}", timestamp, payload);
    let signature = match Hmac::<Sha256>::new_from_slice(secret.as_bytes()) {
        Ok(mut mac) => {
            mac.update(signed_payload.as_bytes());
            hex::encode(mac.finalize().into_bytes())
        }
        Err(_) => String::new(),
    };
    format!("t={},v1={}", timestamp, signature)
}

// =============================================================================
// Entitlement store
// =============================================================================

#[derive(Default)]
pub struct InMemoryEntitlementStore {
    records: RwLock<HashMap<Uuid, EntitlementRecord>>,
    events: RwLock<Vec<EntitlementEvent>>,
    fail_writes: AtomicBool,
}

impl InMemoryEntitlementStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail as a database error would
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn insert(&self, record: EntitlementRecord) {
        self.records.write().await.insert(record.user_id, record);
    }

    pub async fn events(&self) -> Vec<EntitlementEvent> {
        self.events.read().await.clone()
    }

    fn check_writable(&self) -> BillingResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(BillingError::Database("simulated write failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl EntitlementStore for InMemoryEntitlementStore {
    async fn ensure_record(
        &self,
        user_id: Uuid,
        email: &str,
        trial_ends_at: OffsetDateTime,
    ) -> BillingResult<EntitlementRecord> {
        self.check_writable()?;
        let mut records = self.records.write().await;
        let record = records
            .entry(user_id)
            .or_insert_with(|| EntitlementRecord::new_trial(user_id, email, trial_ends_at));
        record.email = normalize_email(email);
        Ok(record.clone())
    }

    async fn get(&self, user_id: Uuid) -> BillingResult<Option<EntitlementRecord>> {
        Ok(self.records.read().await.get(&user_id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> BillingResult<Option<EntitlementRecord>> {
        let email = normalize_email(email);
        Ok(self
            .records
            .read()
            .await
            .values()
            .find(|r| r.email == email)
            .cloned())
    }

    async fn find_by_customer_id(
        &self,
        customer_id: &str,
    ) -> BillingResult<Option<EntitlementRecord>> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .find(|r| r.provider_customer_id.as_deref() == Some(customer_id))
            .cloned())
    }

    async fn link_customer(
        &self,
        user_id: Uuid,
        customer_id: &str,
    ) -> BillingResult<Option<EntitlementRecord>> {
        self.check_writable()?;
        let mut records = self.records.write().await;
        let taken = records.values().any(|r| {
            r.user_id != user_id && r.provider_customer_id.as_deref() == Some(customer_id)
        });
        if taken {
            return Err(BillingError::Database(format!(
                "duplicate key: provider_customer_id {}",
                customer_id
            )));
        }
        Ok(records.get_mut(&user_id).map(|record| {
            if record.provider_customer_id.is_none() {
                record.provider_customer_id = Some(customer_id.to_string());
                record.updated_at = OffsetDateTime::now_utc();
            }
            record.clone()
        }))
    }

    async fn apply_status(
        &self,
        user_id: Uuid,
        subscription_id: Option<&str>,
        status: SubscriptionStatus,
    ) -> BillingResult<Option<EntitlementRecord>> {
        self.check_writable()?;
        let subscription_id = if status.is_billing() {
            subscription_id.map(str::to_string)
        } else {
            None
        };
        let mut records = self.records.write().await;
        Ok(records.get_mut(&user_id).map(|record| {
            if record.status != status || record.provider_subscription_id != subscription_id {
                record.status = status;
                record.provider_subscription_id = subscription_id;
                record.updated_at = OffsetDateTime::now_utc();
            }
            record.clone()
        }))
    }

    async fn apply_cancellation(
        &self,
        user_id: Uuid,
        subscription_id: &str,
    ) -> BillingResult<Option<EntitlementRecord>> {
        self.check_writable()?;
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(&user_id) else {
            return Ok(None);
        };
        match record.provider_subscription_id.as_deref() {
            Some(stored) if stored != subscription_id => Ok(None),
            _ => {
                if record.status != SubscriptionStatus::Inactive
                    || record.provider_subscription_id.is_some()
                {
                    record.status = SubscriptionStatus::Inactive;
                    record.provider_subscription_id = None;
                    record.updated_at = OffsetDateTime::now_utc();
                }
                Ok(Some(record.clone()))
            }
        }
    }

    async fn list_linked(&self) -> BillingResult<Vec<EntitlementRecord>> {
        let mut linked: Vec<_> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.provider_customer_id.is_some())
            .cloned()
            .collect();
        linked.sort_by_key(|r| r.user_id);
        Ok(linked)
    }

    async fn record_event(&self, event: &EntitlementEvent) -> BillingResult<()> {
        self.check_writable()?;
        self.events.write().await.push(event.clone());
        Ok(())
    }
}

// =============================================================================
// Webhook ledger
// =============================================================================

#[derive(Default)]
pub struct InMemoryWebhookLedger {
    entries: RwLock<HashMap<String, (ProcessingResult, u32)>>,
}

impl InMemoryWebhookLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn result_of(&self, event_id: &str) -> Option<ProcessingResult> {
        self.entries.read().await.get(event_id).map(|(r, _)| *r)
    }

    pub async fn attempts(&self, event_id: &str) -> u32 {
        self.entries
            .read()
            .await
            .get(event_id)
            .map(|(_, attempts)| *attempts)
            .unwrap_or(0)
    }
}

#[async_trait]
impl WebhookLedger for InMemoryWebhookLedger {
    async fn claim(&self, event_id: &str, _event_type: &str) -> BillingResult<bool> {
        let mut entries = self.entries.write().await;
        match entries.get_mut(event_id) {
            Some((result, attempts)) if result.is_retryable() => {
                *result = ProcessingResult::Processing;
                *attempts += 1;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => {
                entries.insert(event_id.to_string(), (ProcessingResult::Processing, 1));
                Ok(true)
            }
        }
    }

    async fn finish(
        &self,
        event_id: &str,
        result: ProcessingResult,
        _error_message: Option<&str>,
    ) -> BillingResult<()> {
        if let Some(entry) = self.entries.write().await.get_mut(event_id) {
            entry.0 = result;
        }
        Ok(())
    }
}

// =============================================================================
// Billing provider
// =============================================================================

#[derive(Default)]
struct FakeProviderState {
    customers: HashMap<String, ProviderCustomer>,
    subscriptions: HashMap<String, ProviderSubscription>,
    sessions: HashMap<String, ProviderCheckoutSession>,
}

/// Scriptable stand-in for the billing provider
#[derive(Default)]
pub struct FakeBillingProvider {
    state: RwLock<FakeProviderState>,
    unavailable: AtomicBool,
    delay_ms: AtomicU64,
    next_id: AtomicU64,
    calls: AtomicU64,
}

impl FakeBillingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every call as a network outage would
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every call, for exercising timeouts
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn add_customer(&self, id: &str, email: &str) -> ProviderCustomer {
        let customer = ProviderCustomer {
            id: id.to_string(),
            email: Some(email.to_string()),
            deleted: false,
        };
        self.state
            .write()
            .await
            .customers
            .insert(id.to_string(), customer.clone());
        customer
    }

    pub async fn set_subscription(
        &self,
        id: &str,
        customer_id: &str,
        status: &str,
        current_period_end: Option<OffsetDateTime>,
        trial_end: Option<OffsetDateTime>,
    ) {
        let subscription = ProviderSubscription {
            id: id.to_string(),
            customer_id: customer_id.to_string(),
            status: status.to_string(),
            current_period_end,
            trial_end,
            product_id: Some("prod_jobproof".to_string()),
        };
        self.state
            .write()
            .await
            .subscriptions
            .insert(id.to_string(), subscription);
    }

    /// Finish a hosted checkout: the session completes and its subscription starts
    pub async fn complete_session(
        &self,
        session_id: &str,
        subscription_id: &str,
        current_period_end: Option<OffsetDateTime>,
    ) -> Option<ProviderCheckoutSession> {
        let customer_id = {
            let mut state = self.state.write().await;
            let session = state.sessions.get_mut(session_id)?;
            session.complete = true;
            session.subscription_id = Some(subscription_id.to_string());
            session.customer_id.clone()?
        };
        self.set_subscription(subscription_id, &customer_id, "active", current_period_end, None)
            .await;
        self.state.read().await.sessions.get(session_id).cloned()
    }

    async fn check(&self) -> BillingResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BillingError::ProviderUnavailable(
                "simulated provider outage".to_string(),
            ));
        }
        Ok(())
    }

    fn next(&self, prefix: &str) -> String {
        format!("{}_fake_{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl BillingProvider for FakeBillingProvider {
    async fn find_customer_by_email(&self, email: &str) -> BillingResult<Option<ProviderCustomer>> {
        self.check().await?;
        let email = normalize_email(email);
        let state = self.state.read().await;
        let mut found: Vec<_> = state
            .customers
            .values()
            .filter(|c| !c.deleted && c.email.as_deref().map(normalize_email) == Some(email.clone()))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found.into_iter().next())
    }

    async fn get_customer(&self, customer_id: &str) -> BillingResult<Option<ProviderCustomer>> {
        self.check().await?;
        Ok(self.state.read().await.customers.get(customer_id).cloned())
    }

    async fn find_subscription(
        &self,
        customer_id: &str,
        lookup: SubscriptionLookup,
    ) -> BillingResult<Option<ProviderSubscription>> {
        self.check().await?;
        let wanted = lookup.to_string();
        let state = self.state.read().await;
        let mut found: Vec<_> = state
            .subscriptions
            .values()
            .filter(|s| s.customer_id == customer_id && s.status == wanted)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found.into_iter().next())
    }

    async fn get_subscription(
        &self,
        subscription_id: &str,
    ) -> BillingResult<Option<ProviderSubscription>> {
        self.check().await?;
        Ok(self.state.read().await.subscriptions.get(subscription_id).cloned())
    }

    async fn create_customer(&self, email: &str, _user_id: Uuid) -> BillingResult<ProviderCustomer> {
        self.check().await?;
        let id = self.next("cus");
        Ok(self.add_customer(&id, email).await)
    }

    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> BillingResult<ProviderCheckoutSession> {
        self.check().await?;
        let id = self.next("cs");
        let session = ProviderCheckoutSession {
            url: Some(format!("https://checkout.example.test/{}", id)),
            id: id.clone(),
            customer_id: Some(request.customer_id),
            subscription_id: None,
            client_reference_id: Some(request.user_id.to_string()),
            complete: false,
        };
        self.state.write().await.sessions.insert(id, session.clone());
        Ok(session)
    }

    async fn get_checkout_session(
        &self,
        session_id: &str,
    ) -> BillingResult<Option<ProviderCheckoutSession>> {
        self.check().await?;
        Ok(self.state.read().await.sessions.get(session_id).cloned())
    }
}
