//! Payment processing for order transactions.
//!
//! No credit cards are actually processed here; the handler records status
//! transitions and publishes the corresponding payment events.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{random_id, Result, ServiceError};
use crate::gateway::{publish_json, EventGateway};
use crate::store::{KeyValueBucket, RecordStore};

pub const SUBJECT_PAYMENT_AUTHORIZED: &str = "payment.authorized";
pub const SUBJECT_PAYMENT_CHARGED: &str = "payment.charged";
pub const SUBJECT_PAYMENT_REFUNDED: &str = "payment.refunded";
pub const SUBJECT_PAYMENT_CHARGEBACK: &str = "payment.chargeback";

pub const PROCESSOR_STRIPE: &str = "STRIPE";
pub const PROCESSOR_APPLE_PAY: &str = "APPLE_PAY";

/// Lifecycle status of a transaction. `Refunded` and `Chargeback` are both
/// terminal: once reversed, a transaction never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Authorized,
    Charged,
    Chargeback,
    Refunded,
}

impl TransactionStatus {
    /// Whether the money has already gone back to the customer.
    pub fn is_reversed(self) -> bool {
        matches!(self, Self::Refunded | Self::Chargeback)
    }
}

/// The financial transaction associated with an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    #[serde(rename = "transactionID")]
    pub transaction_id: String,
    #[serde(rename = "orderID")]
    pub order_id: String,
    pub total: i64,
    pub status: TransactionStatus,
    #[serde(rename = "processorID")]
    pub processor_id: String,
    pub processor_token: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchTransactionsCriteria {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetTransactionRequest {
    #[serde(rename = "transactionID", default)]
    pub transaction_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeRequest {
    #[serde(rename = "orderID", default)]
    pub order_id: String,
    #[serde(default)]
    pub total: i64,
    #[serde(rename = "processorID", default)]
    pub processor_id: String,
    #[serde(default)]
    pub processor_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeRequest {
    #[serde(rename = "transactionID", default)]
    pub transaction_id: String,
    #[serde(rename = "orderID", default)]
    pub order_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargebackRequest {
    #[serde(rename = "transactionID", default)]
    pub transaction_id: String,
}

/// Either id may be blank. A refund triggered by an order-cancelled event
/// only knows the order id, so lookup falls back to the order key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequest {
    #[serde(rename = "transactionID", default)]
    pub transaction_id: String,
    #[serde(rename = "orderID", default)]
    pub order_id: String,
}

/// Basic credit card processing operations.
#[async_trait]
pub trait PaymentService: Send + Sync {
    /// Finds all customer transactions based on the specified criteria.
    async fn search_transactions(&self, req: SearchTransactionsCriteria)
        -> Result<Vec<Transaction>>;

    /// Fetches a single transaction by its id.
    async fn get_transaction(&self, req: GetTransactionRequest) -> Result<Transaction>;

    /// Places a hold on the customer's payment method for the given amount.
    /// The charge comes later, once the underlying order ships.
    async fn authorize(&self, req: AuthorizeRequest) -> Result<Transaction>;

    /// Executes the authorization to actually charge the payment method.
    async fn charge(&self, req: ChargeRequest) -> Result<Transaction>;

    /// Fired when the customer issues a chargeback directly with their
    /// credit card company, without cancelling the order with us. The order
    /// workflow listens for the resulting event to cancel the order.
    async fn chargeback(&self, req: ChargebackRequest) -> Result<Transaction>;

    /// Reverses the transaction after the customer cancels through our
    /// portal.
    async fn refund(&self, req: RefundRequest) -> Result<Transaction>;
}

/// Read/write operations for the transactions table, stored in a key-value
/// bucket. Each record is indexed under both its transaction id and its
/// order id so workflow steps can find it either way.
pub struct TransactionRepo {
    store: RecordStore<Transaction>,
}

impl TransactionRepo {
    pub fn new(bucket: Arc<dyn KeyValueBucket>) -> Self {
        Self {
            store: RecordStore::new(bucket),
        }
    }

    /// Fetches a transaction by its own id, falling back to the associated
    /// order id.
    pub async fn get(&self, transaction_id: &str, order_id: &str) -> Result<Transaction> {
        if let Some(transaction) = self.store.get(transaction_id).await? {
            return Ok(transaction);
        }
        if let Some(transaction) = self.store.get(order_id).await? {
            return Ok(transaction);
        }
        Err(ServiceError::NotFound(format!(
            "Transaction not found: {}/{}",
            transaction_id, order_id
        )))
    }

    pub async fn search(&self) -> Result<Vec<Transaction>> {
        Ok(self.store.values().await?)
    }

    /// Assigns a fresh id to the transaction and persists it under both of
    /// its keys.
    pub async fn create(&self, mut transaction: Transaction) -> Result<Transaction> {
        transaction.transaction_id = random_id(4);
        self.update(transaction).await
    }

    pub async fn update(&self, transaction: Transaction) -> Result<Transaction> {
        self.store
            .put(&transaction.transaction_id, &transaction)
            .await?;
        self.store.put(&transaction.order_id, &transaction).await?;
        Ok(transaction)
    }

    /// Seed the datastore with a few starter transactions matching the
    /// starter orders. Writes nothing if records already exist.
    pub async fn seed_if_empty(&self) -> Result<()> {
        if !self.store.is_empty().await? {
            info!("Transaction data already present");
            return Ok(());
        }

        info!("Seeding starter transaction data");
        self.update(Transaction {
            transaction_id: "X".to_string(),
            order_id: "123".to_string(),
            total: 1999,
            status: TransactionStatus::Charged,
            processor_id: PROCESSOR_STRIPE.to_string(),
            processor_token: random_id(8),
        })
        .await?;

        self.update(Transaction {
            transaction_id: "Y".to_string(),
            order_id: "456".to_string(),
            total: 2700,
            status: TransactionStatus::Authorized,
            processor_id: PROCESSOR_STRIPE.to_string(),
            processor_token: random_id(8),
        })
        .await?;

        self.update(Transaction {
            transaction_id: "Z".to_string(),
            order_id: "789".to_string(),
            total: 44997,
            status: TransactionStatus::Charged,
            processor_id: PROCESSOR_APPLE_PAY.to_string(),
            processor_token: random_id(8),
        })
        .await?;

        Ok(())
    }
}

pub struct PaymentServiceHandler {
    repo: TransactionRepo,
    gateway: Arc<dyn EventGateway>,
}

impl PaymentServiceHandler {
    pub fn new(repo: TransactionRepo, gateway: Arc<dyn EventGateway>) -> Self {
        Self { repo, gateway }
    }
}

#[async_trait]
impl PaymentService for PaymentServiceHandler {
    async fn search_transactions(
        &self,
        _req: SearchTransactionsCriteria,
    ) -> Result<Vec<Transaction>> {
        info!("Searching customer's transactions");
        self.repo.search().await
    }

    async fn get_transaction(&self, req: GetTransactionRequest) -> Result<Transaction> {
        info!(transaction_id = %req.transaction_id, "Fetching transaction");
        self.repo.get(&req.transaction_id, "").await
    }

    async fn authorize(&self, req: AuthorizeRequest) -> Result<Transaction> {
        info!(total = req.total, order_id = %req.order_id, "Authorizing payment");

        let transaction = self
            .repo
            .create(Transaction {
                transaction_id: String::new(),
                order_id: req.order_id,
                total: req.total,
                status: TransactionStatus::Authorized,
                processor_id: req.processor_id,
                processor_token: req.processor_token,
            })
            .await?;

        publish_json(self.gateway.as_ref(), SUBJECT_PAYMENT_AUTHORIZED, &transaction).await?;
        Ok(transaction)
    }

    async fn charge(&self, req: ChargeRequest) -> Result<Transaction> {
        let mut transaction = self.repo.get(&req.transaction_id, &req.order_id).await?;

        match transaction.status {
            status if status.is_reversed() => {
                return Err(ServiceError::InvalidState(format!(
                    "Transaction already reversed: {}",
                    transaction.transaction_id
                )));
            }
            TransactionStatus::Charged => {
                info!(
                    transaction_id = %transaction.transaction_id,
                    "Transaction already processed; ignoring charge"
                );
                return Ok(transaction);
            }
            _ => {
                info!(transaction_id = %transaction.transaction_id, "Charging payment method");
                transaction.status = TransactionStatus::Charged;
                transaction = self.repo.update(transaction).await?;
            }
        }

        publish_json(self.gateway.as_ref(), SUBJECT_PAYMENT_CHARGED, &transaction).await?;
        Ok(transaction)
    }

    async fn refund(&self, req: RefundRequest) -> Result<Transaction> {
        let mut transaction = self.repo.get(&req.transaction_id, &req.order_id).await?;

        if transaction.status.is_reversed() {
            info!(
                transaction_id = %transaction.transaction_id,
                "Transaction already reversed; ignoring refund"
            );
            return Ok(transaction);
        }

        info!(transaction_id = %transaction.transaction_id, "Processing refund");
        transaction.status = TransactionStatus::Refunded;
        transaction = self.repo.update(transaction).await?;

        publish_json(self.gateway.as_ref(), SUBJECT_PAYMENT_REFUNDED, &transaction).await?;
        Ok(transaction)
    }

    async fn chargeback(&self, req: ChargebackRequest) -> Result<Transaction> {
        let mut transaction = self.repo.get(&req.transaction_id, "").await?;

        if transaction.status.is_reversed() {
            info!(
                transaction_id = %transaction.transaction_id,
                "Transaction already reversed; ignoring chargeback"
            );
            return Ok(transaction);
        }

        info!(transaction_id = %transaction.transaction_id, "Processing chargeback");
        transaction.status = TransactionStatus::Chargeback;
        transaction = self.repo.update(transaction).await?;

        publish_json(self.gateway.as_ref(), SUBJECT_PAYMENT_CHARGEBACK, &transaction).await?;
        Ok(transaction)
    }
}
